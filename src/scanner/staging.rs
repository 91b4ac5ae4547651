use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, PoisonError, TryLockError,
    },
};

use anyhow::Result;

use super::ScrAddrMeta;
use crate::structs::{OutputKey, ScrAddr};

/// Result of a background scan, waiting to be merged into the live filter.
#[derive(Debug, Default)]
pub struct StagedScan {
    pub scr_addrs: BTreeMap<ScrAddr, ScrAddrMeta>,
    pub utxos: HashSet<OutputKey>,
    /// Outputs spent in the scanned range that were created before it
    pub spent: HashSet<OutputKey>,
}

pub(crate) struct StagedResult {
    /// Generation of the filter the scan was started against
    pub generation: u64,
    pub result: Result<StagedScan>,
}

/// Hand-off point between a scan job and the filter that owns the live
/// state. The job only ever publishes, the owner only ever `try_take`s.
#[derive(Default)]
pub(crate) struct MergeStaging {
    in_flight: AtomicBool,
    ready: AtomicBool,
    slot: Mutex<Option<StagedResult>>,
}

impl MergeStaging {
    /// Claim the single scan slot. Returns `false` if a scan is already running.
    pub fn try_begin(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Give the slot back without staging anything, for a job that never ran.
    pub fn abort(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn publish(&self, generation: u64, result: Result<StagedScan>) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(StagedResult { generation, result });
        self.ready.store(true, Ordering::Release);
    }

    /// Take the staged result if there is one and the lock is free. Never
    /// blocks, a contended lock means "try again later".
    pub fn try_take(&self) -> Option<StagedResult> {
        if !self.is_ready() {
            return None;
        }

        let mut slot = match self.slot.try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };

        let staged = slot.take();
        self.ready.store(false, Ordering::Release);
        self.in_flight.store(false, Ordering::Release);

        staged
    }
}
