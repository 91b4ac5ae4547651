//! In-memory store and hooks shared by the unit tests.

use std::{
    collections::HashMap,
    ops::RangeInclusive,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Condvar, Mutex,
    },
    time::Duration,
};

use anyhow::{Error, Result};
use async_trait::async_trait;
use bitcoin::{
    absolute::{Height, LockTime},
    consensus::serialize,
    transaction::Version,
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use futures::{stream, Stream};

use crate::{
    backend::{BlockData, ChainBackend, SyncState, UtxoData},
    scanner::ScrAddrFilter,
    structs::{OutputKey, ScrAddr, TxKey, WalletId},
    updater::Updater,
};

pub fn height(n: u32) -> Height {
    Height::from_consensus(n).unwrap()
}

pub fn p2pkh_script(hash: [u8; 20]) -> ScriptBuf {
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend_from_slice(&hash);
    script.extend_from_slice(&[0x88, 0xac]);
    ScriptBuf::from_bytes(script)
}

pub fn multisig_script(m: u8, pubkeys: &[[u8; 33]]) -> ScriptBuf {
    let mut script = vec![0x50 + m];
    for pubkey in pubkeys {
        script.push(33);
        script.extend_from_slice(pubkey);
    }
    script.push(0x50 + pubkeys.len() as u8);
    script.push(0xae);
    ScriptBuf::from_bytes(script)
}

/// A transaction spending `prevouts`. Coinbase-like when `prevouts` is empty,
/// so it always has an input and round-trips through consensus encoding.
pub fn make_tx(prevouts: &[OutPoint], outputs: &[(ScriptBuf, u64)]) -> Transaction {
    let prevouts = if prevouts.is_empty() {
        vec![OutPoint::null()]
    } else {
        prevouts.to_vec()
    };

    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: prevouts
            .into_iter()
            .map(|previous_output| TxIn {
                previous_output,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs
            .iter()
            .map(|(script_pubkey, value)| TxOut {
                value: Amount::from_sat(*value),
                script_pubkey: script_pubkey.clone(),
            })
            .collect(),
    }
}

pub fn raw(tx: &Transaction) -> Vec<u8> {
    serialize(tx)
}

#[derive(Default)]
struct MockStore {
    sync: HashMap<ScrAddr, SyncState>,
    utxos: Vec<(ScrAddr, OutputKey)>,
    spends: HashMap<OutputKey, u32>,
    tx_keys: HashMap<Txid, TxKey>,
    outputs: HashMap<OutputKey, TxOut>,
}

#[derive(Default)]
pub struct MockBackend {
    store: Mutex<MockStore>,
    fail_range: AtomicBool,
    output_lookups: AtomicUsize,
    tx_key_calls: AtomicUsize,
    tx_lookups_held: Mutex<bool>,
    tx_lookup_cv: Condvar,
}

impl MockBackend {
    pub fn set_sync_state(&self, scr_addr: ScrAddr, state: SyncState) {
        self.store.lock().unwrap().sync.insert(scr_addr, state);
    }

    pub fn add_utxo(&self, scr_addr: ScrAddr, key: OutputKey) {
        self.store.lock().unwrap().utxos.push((scr_addr, key));
    }

    pub fn spend(&self, key: OutputKey, at: u32) {
        self.store.lock().unwrap().spends.insert(key, at);
    }

    /// Record a mined transaction under `tx_key`.
    pub fn add_mined_tx(&self, tx: &Transaction, tx_key: TxKey) {
        let mut store = self.store.lock().unwrap();
        store.tx_keys.insert(tx.txid(), tx_key);
        for (i, txout) in tx.output.iter().enumerate() {
            store
                .outputs
                .insert(OutputKey::new(tx_key, i as u16), txout.clone());
        }
    }

    pub fn fail_range_queries(&self) {
        self.fail_range.store(true, Ordering::SeqCst);
    }

    pub fn output_lookups(&self) -> usize {
        self.output_lookups.load(Ordering::SeqCst)
    }

    /// Block `tx_key` calls until `release_tx_lookups`.
    pub fn hold_tx_lookups(&self) {
        *self.tx_lookups_held.lock().unwrap() = true;
    }

    pub fn release_tx_lookups(&self) {
        *self.tx_lookups_held.lock().unwrap() = false;
        self.tx_lookup_cv.notify_all();
    }

    /// Wait until some caller reached `tx_key`.
    pub fn wait_for_tx_lookup(&self) -> bool {
        for _ in 0..1000 {
            if self.tx_key_calls.load(Ordering::SeqCst) > 0 {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

#[async_trait]
impl ChainBackend for MockBackend {
    async fn sync_state(&self, scr_addr: &ScrAddr) -> Result<SyncState> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .sync
            .get(scr_addr)
            .copied()
            .unwrap_or_default())
    }

    fn get_block_data_for_range(
        &self,
        range: RangeInclusive<u32>,
        scr_addrs: Vec<ScrAddr>,
    ) -> Pin<Box<dyn Stream<Item = Result<BlockData>> + Send>> {
        if self.fail_range.load(Ordering::SeqCst) {
            let failed: Vec<Result<BlockData>> = vec![Err(Error::msg("store read failed"))];
            return Box::pin(stream::iter(failed));
        }

        let store = self.store.lock().unwrap();
        let blocks: Vec<Result<BlockData>> = range
            .map(|n| {
                let created = store
                    .utxos
                    .iter()
                    .filter(|(scr_addr, key)| key.height() == Some(n) && scr_addrs.contains(scr_addr))
                    .map(|(scr_addr, key)| UtxoData {
                        scr_addr: scr_addr.clone(),
                        key: *key,
                    })
                    .collect();
                let spent = store
                    .spends
                    .iter()
                    .filter(|(_, at)| **at == n)
                    .map(|(key, _)| *key)
                    .collect();

                Ok(BlockData {
                    blkheight: height(n),
                    created,
                    spent,
                })
            })
            .collect();

        Box::pin(stream::iter(blocks))
    }

    async fn tx_key(&self, txid: &Txid) -> Result<Option<TxKey>> {
        self.tx_key_calls.fetch_add(1, Ordering::SeqCst);
        let mut held = self.tx_lookups_held.lock().unwrap();
        while *held {
            held = self.tx_lookup_cv.wait(held).unwrap();
        }
        drop(held);

        Ok(self.store.lock().unwrap().tx_keys.get(txid).copied())
    }

    async fn stored_output(&self, key: &OutputKey) -> Result<Option<TxOut>> {
        self.output_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.lock().unwrap().outputs.get(key).cloned())
    }
}

pub struct MockUpdater {
    running: AtomicBool,
    top: AtomicU32,
    applied: Mutex<Vec<(Height, Height, WalletId)>>,
    progress: Mutex<Option<Height>>,
    gate: Mutex<bool>,
    gate_cv: Condvar,
}

impl MockUpdater {
    pub fn running(top: u32) -> Self {
        Self {
            running: AtomicBool::new(true),
            top: AtomicU32::new(top),
            applied: Mutex::new(vec![]),
            progress: Mutex::new(None),
            gate: Mutex::new(true),
            gate_cv: Condvar::new(),
        }
    }

    pub fn stopped(top: u32) -> Self {
        let updater = Self::running(top);
        updater.running.store(false, Ordering::SeqCst);
        updater
    }

    pub fn set_running(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn set_top(&self, top: u32) {
        self.top.store(top, Ordering::SeqCst);
    }

    /// Hold scans inside `apply_block_range_to_db` until `open_gate`.
    pub fn close_gate(&self) {
        *self.gate.lock().unwrap() = false;
    }

    pub fn open_gate(&self) {
        *self.gate.lock().unwrap() = true;
        self.gate_cv.notify_all();
    }

    pub fn applied(&self) -> Vec<(Height, Height, WalletId)> {
        self.applied.lock().unwrap().clone()
    }

    pub fn last_progress(&self) -> Option<Height> {
        *self.progress.lock().unwrap()
    }
}

impl Updater for MockUpdater {
    fn bdm_is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn current_top_block_height(&self) -> Height {
        height(self.top.load(Ordering::SeqCst))
    }

    fn apply_block_range_to_db(&self, start: Height, end: Height, wallet: &WalletId) -> Result<()> {
        let mut open = self.gate.lock().unwrap();
        while !*open {
            open = self.gate_cv.wait(open).unwrap();
        }
        drop(open);

        self.applied.lock().unwrap().push((start, end, wallet.clone()));
        Ok(())
    }

    fn send_scan_progress(&self, current: Height) {
        *self.progress.lock().unwrap() = Some(current);
    }
}

/// Poll `check_for_merge` until a scan got merged, or discarded when
/// `expect_merge` is false.
pub fn wait_for_merge(filter: &mut ScrAddrFilter, expect_merge: bool) -> Result<bool> {
    for _ in 0..1000 {
        if filter.check_for_merge()? {
            return Ok(true);
        }
        if !expect_merge && !filter.is_scanning() {
            return Ok(false);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    Err(Error::msg("scan never finished"))
}
