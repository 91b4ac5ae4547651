use std::{
    collections::{BTreeMap, HashSet},
    ops::RangeInclusive,
    sync::{Arc, Weak},
};

use anyhow::{Error, Result};
use bitcoin::absolute::Height;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::{
    staging::{MergeStaging, StagedResult},
    task::ScanJob,
};
use crate::{
    backend::ChainBackend,
    config::TrackerConfig,
    constants::DbType,
    structs::{OutputKey, ScrAddr, TxIoPair, UtxoStatus, WalletId},
    updater::Updater,
    zeroconf::AddressFilter,
};

/// Scan state of a tracked address. There is one entry per address, so only
/// one wallet can be registered for it at a time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ScrAddrMeta {
    pub last_scanned_height: Height,
    pub wallet: WalletId,
}

impl ScrAddrMeta {
    pub fn new(last_scanned_height: Height, wallet: WalletId) -> Self {
        Self {
            last_scanned_height,
            wallet,
        }
    }
}

/// Keeps track of the addresses registered with the database and of the
/// unspent outputs they own.
///
/// The filter expects a complete set of tracked unspent outputs from
/// `block_height_cutoff` on. This lets it tell that an input does not spend
/// a tracked output from the output key alone. Keys below the cutoff get an
/// indeterminate answer and the caller has to pull the output script from
/// the store.
///
/// Addresses that need history are scanned by a background job. The job
/// stages its results and the owner of the filter merges them in with
/// `check_for_merge`.
pub struct ScrAddrFilter {
    scr_addr_map: BTreeMap<ScrAddr, ScrAddrMeta>,
    utxos: HashSet<OutputKey>,
    block_height_cutoff: Height,

    /// Addresses waiting for a scan, keyed to their start height
    pending_scan: BTreeMap<ScrAddr, ScrAddrMeta>,
    /// Addresses handed to the job in flight
    scanning: BTreeMap<ScrAddr, ScrAddrMeta>,
    scan_range: Option<RangeInclusive<Height>>,
    staging: Arc<MergeStaging>,
    generation: u64,

    backend: Weak<dyn ChainBackend>,
    updater: Arc<dyn Updater>,
    db_type: DbType,
}

impl ScrAddrFilter {
    pub fn new(
        backend: &Arc<dyn ChainBackend>,
        updater: Arc<dyn Updater>,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            scr_addr_map: BTreeMap::new(),
            utxos: HashSet::new(),
            block_height_cutoff: Height::ZERO,
            pending_scan: BTreeMap::new(),
            scanning: BTreeMap::new(),
            scan_range: None,
            staging: Arc::new(MergeStaging::default()),
            generation: 0,
            backend: Arc::downgrade(backend),
            updater,
            db_type: config.db_type,
        }
    }

    fn backend(&self) -> Result<Arc<dyn ChainBackend>> {
        self.backend
            .upgrade()
            .ok_or_else(|| Error::msg("Block store is no longer available"))
    }

    pub fn get_scr_addr_map(&self) -> &BTreeMap<ScrAddr, ScrAddrMeta> {
        &self.scr_addr_map
    }

    pub fn num_scr_addr(&self) -> usize {
        self.scr_addr_map.len()
    }

    pub fn has_scr_address(&self, scr_addr: &ScrAddr) -> bool {
        self.scr_addr_map.contains_key(scr_addr)
    }

    pub fn block_height_cutoff(&self) -> Height {
        self.block_height_cutoff
    }

    pub fn num_utxos(&self) -> usize {
        self.utxos.len()
    }

    /// Register addresses for `wallet`.
    ///
    /// Before the block data manager is running addresses are only recorded,
    /// the scan happens once it is. New addresses have no history and start
    /// tracking at the current top block. Other addresses are scanned from
    /// the height the store last saw them at, their creation height, or 0.
    ///
    /// Returns whether any of the addresses need a background scan. The scan
    /// is launched right away unless one is already in flight, in which case
    /// it follows the next merge.
    pub async fn register_addresses(
        &mut self,
        scr_addrs: &[ScrAddr],
        wallet: &WalletId,
        is_new: bool,
    ) -> Result<bool> {
        if !self.updater.bdm_is_running() {
            for scr_addr in scr_addrs {
                self.reg_scr_addr_for_scan(scr_addr, Height::ZERO, wallet);
                self.scr_addr_map
                    .insert(scr_addr.clone(), ScrAddrMeta::new(Height::ZERO, wallet.clone()));
            }
            debug!("recorded {} addresses before initialization", scr_addrs.len());
            return Ok(false);
        }

        let top = self.updater.current_top_block_height();
        let mut needs_scan = false;

        for scr_addr in scr_addrs {
            if let Some(meta) = self.scr_addr_map.get_mut(scr_addr) {
                meta.wallet = wallet.clone();
                continue;
            }
            if let Some(meta) = self
                .pending_scan
                .get_mut(scr_addr)
                .or_else(|| self.scanning.get_mut(scr_addr))
            {
                meta.wallet = wallet.clone();
                needs_scan = true;
                continue;
            }

            if is_new || self.db_type == DbType::Super {
                self.insert_live(scr_addr, top, wallet);
                continue;
            }

            let sync = self.backend()?.sync_state(scr_addr).await?;
            let start = sync
                .last_scanned
                .or(sync.created_at)
                .unwrap_or(Height::ZERO);

            if start >= top {
                self.insert_live(scr_addr, start, wallet);
            } else {
                self.reg_scr_addr_for_scan(scr_addr, start, wallet);
                needs_scan = true;
            }
        }

        if needs_scan {
            self.scan_in_background()?;
        }

        Ok(needs_scan)
    }

    fn reg_scr_addr_for_scan(&mut self, scr_addr: &ScrAddr, scan_from: Height, wallet: &WalletId) {
        self.pending_scan
            .insert(scr_addr.clone(), ScrAddrMeta::new(scan_from, wallet.clone()));
    }

    fn insert_live(&mut self, scr_addr: &ScrAddr, height: Height, wallet: &WalletId) {
        self.scr_addr_map
            .insert(scr_addr.clone(), ScrAddrMeta::new(height, wallet.clone()));
        self.block_height_cutoff = self.block_height_cutoff.max(height);
    }

    /// Lowest height a pending or running scan starts from, `None` when no
    /// address needs scanning.
    pub fn scan_from(&self) -> Option<Height> {
        self.pending_scan
            .values()
            .chain(self.scanning.values())
            .map(|meta| meta.last_scanned_height)
            .min()
    }

    pub fn current_scan_range(&self) -> Option<RangeInclusive<Height>> {
        self.scan_range.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.staging.is_in_flight()
    }

    /// Scan the pending addresses up to the current top block on the rayon
    /// pool.
    ///
    /// Returns `Ok(false)` if there is nothing to scan or a scan is already
    /// in flight. Fails if the store went away.
    pub fn scan_in_background(&mut self) -> Result<bool> {
        if self.pending_scan.is_empty() {
            return Ok(false);
        }

        let backend = self.backend()?;

        if !self.staging.try_begin() {
            debug!("scan already in flight, deferring {} addresses", self.pending_scan.len());
            return Ok(false);
        }

        let job = ScanJob {
            generation: self.generation,
            scr_addrs: std::mem::take(&mut self.pending_scan),
            end: self.updater.current_top_block_height(),
            backend,
            updater: self.updater.clone(),
            staging: self.staging.clone(),
        };

        let Some(start) = job.start() else {
            self.staging.abort();
            return Ok(false);
        };

        info!("launching scan of {} addresses from {}", job.scr_addrs.len(), start);

        self.scan_range = Some(start..=job.end);
        self.scanning = job.scr_addrs.clone();
        job.spawn();

        Ok(true)
    }

    /// Merge the results of a finished scan, if any. Never blocks.
    pub fn check_for_merge(&mut self) -> Result<bool> {
        if !self.staging.is_ready() {
            return Ok(false);
        }
        self.merge()
    }

    /// Returns `Ok(true)` once staged results were merged, `Ok(false)` if
    /// there was nothing to merge or the staging area was busy.
    ///
    /// Addresses registered while the scan ran are scanned next, as are
    /// merged addresses the chain moved past during the scan. A failure to
    /// launch that scan is logged and left for `scan_in_background`.
    pub fn merge(&mut self) -> Result<bool> {
        let Some(StagedResult { generation, result }) = self.staging.try_take() else {
            return Ok(false);
        };

        if generation != self.generation {
            debug!("discarding scan results of a cleared filter");
            self.relaunch_scan();
            return Ok(false);
        }

        self.scan_range = None;
        let scanned = std::mem::take(&mut self.scanning);

        let staged = match result {
            Ok(staged) => staged,
            Err(e) => {
                for (scr_addr, meta) in scanned {
                    self.pending_scan.entry(scr_addr).or_insert(meta);
                }
                return Err(e.context("Background address scan failed"));
            }
        };

        info!(
            "merging {} addresses and {} outputs",
            staged.scr_addrs.len(),
            staged.utxos.len()
        );

        for key in &staged.spent {
            self.utxos.remove(key);
        }
        self.utxos.extend(staged.utxos);

        let top = self.updater.current_top_block_height();
        for (scr_addr, mut meta) in staged.scr_addrs {
            // unregistered while the scan ran
            let Some(current) = scanned.get(&scr_addr) else {
                continue;
            };
            meta.wallet = current.wallet.clone();

            if meta.last_scanned_height < top {
                debug!(
                    "{scr_addr} is behind the chain, scanning again from {}",
                    meta.last_scanned_height
                );
                self.pending_scan
                    .entry(scr_addr.clone())
                    .or_insert_with(|| meta.clone());
            }
            self.scr_addr_map.insert(scr_addr, meta);
        }
        self.update_cutoff();
        self.relaunch_scan();

        Ok(true)
    }

    fn relaunch_scan(&mut self) {
        if let Err(e) = self.scan_in_background() {
            warn!("couldn't launch the next address scan: {e}");
        }
    }

    fn update_cutoff(&mut self) {
        if let Some(max) = self
            .scr_addr_map
            .values()
            .map(|meta| meta.last_scanned_height)
            .max()
        {
            self.block_height_cutoff = self.block_height_cutoff.max(max);
        }
    }

    pub fn has_utxo(&self, key: &OutputKey) -> UtxoStatus {
        if self.utxos.contains(key) {
            return UtxoStatus::Tracked;
        }

        match key.height() {
            None => UtxoStatus::NotTracked,
            Some(height) if height >= self.block_height_cutoff.to_consensus_u32() => {
                UtxoStatus::NotTracked
            }
            Some(_) => UtxoStatus::Indeterminate,
        }
    }

    pub fn add_utxo(&mut self, key: OutputKey) {
        self.utxos.insert(key);
    }

    pub fn add_txio(&mut self, txio: &TxIoPair) {
        self.add_utxo(txio.txout_key);
    }

    pub fn erase_utxo(&mut self, key: &OutputKey) -> bool {
        self.utxos.remove(key)
    }

    /// Advance every tracked address after new blocks were applied.
    pub fn set_last_scanned(&mut self, height: Height) {
        for meta in self.scr_addr_map.values_mut() {
            meta.last_scanned_height = meta.last_scanned_height.max(height);
        }
        self.update_cutoff();
    }

    /// Reload the scanned heights of the tracked addresses from the store.
    pub async fn refresh_sync_state(&mut self) -> Result<()> {
        let backend = self.backend()?;
        for (scr_addr, meta) in self.scr_addr_map.iter_mut() {
            if let Some(height) = backend.sync_state(scr_addr).await?.last_scanned {
                meta.last_scanned_height = height;
            }
        }
        self.update_cutoff();
        Ok(())
    }

    pub fn unregister_scr_addr(&mut self, scr_addr: &ScrAddr) -> bool {
        self.pending_scan.remove(scr_addr);
        self.scanning.remove(scr_addr);
        self.scr_addr_map.remove(scr_addr).is_some()
    }

    /// Drop all state. A scan still in flight will be discarded on merge.
    pub fn clear(&mut self) {
        if self.staging.is_in_flight() {
            warn!("clearing filter with a scan in flight");
        }
        self.scr_addr_map.clear();
        self.utxos.clear();
        self.pending_scan.clear();
        self.scanning.clear();
        self.scan_range = None;
        self.block_height_cutoff = Height::ZERO;
        self.generation += 1;
    }
}

impl AddressFilter for ScrAddrFilter {
    fn has_scr_address(&self, scr_addr: &ScrAddr) -> bool {
        ScrAddrFilter::has_scr_address(self, scr_addr)
    }

    fn has_utxo(&self, key: &OutputKey) -> UtxoStatus {
        ScrAddrFilter::has_utxo(self, key)
    }
}
