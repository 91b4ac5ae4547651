use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use anyhow::{Error, Result};
use bitcoin::{consensus::deserialize, OutPoint, Transaction, TxOut, Txid};
use log::{debug, info, warn};

use super::AddressFilter;
use crate::{
    backend::ChainBackend,
    config::TrackerConfig,
    structs::{OutputKey, ScrAddr, TxIoMap, TxIoPair, TxKey, UtxoStatus, ZeroConfData},
};

#[derive(Default)]
struct ZcState {
    tx_hash_to_key: HashMap<Txid, TxKey>,
    tx_map: HashMap<Txid, ZeroConfData>,
    txio_map: HashMap<Txid, TxIoMap>,
    /// Records found since the last drain
    new_txio_map: HashMap<Txid, TxIoMap>,
}

struct PendingTx {
    data: ZeroConfData,
    seq: u64,
}

struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Zero confirmation transactions, keyed like mined ones.
///
/// Mined outputs are keyed by 8 byte database keys that carry height, dup
/// id, tx index and output index, which are cheaper to compare and look up
/// than outpoints. Unconfirmed transactions never hit the store, so they get
/// a synthetic key: the `0xffff` prefix and a 4 byte counter bumped
/// atomically for every transaction classified.
///
/// Raw transactions are staged by `ingest` from any thread. A single
/// consumer then runs `classify_pending` to key them and find which tracked
/// addresses they touch.
pub struct ZeroConfPool {
    state: RwLock<ZcState>,
    new_zc: Mutex<HashMap<Txid, PendingTx>>,
    top_id: AtomicU32,
    ingest_seq: AtomicU64,
    processing: AtomicBool,
    backend: Arc<dyn ChainBackend>,
    second_order_multisig: bool,
}

impl ZeroConfPool {
    pub fn new(backend: Arc<dyn ChainBackend>, config: &TrackerConfig) -> Self {
        Self {
            state: RwLock::new(ZcState::default()),
            new_zc: Mutex::new(HashMap::new()),
            top_id: AtomicU32::new(0),
            ingest_seq: AtomicU64::new(0),
            processing: AtomicBool::new(false),
            backend,
            second_order_multisig: config.second_order_multisig,
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ZcState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ZcState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<Txid, PendingTx>> {
        self.new_zc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stage a raw transaction for classification.
    ///
    /// Returns `Ok(false)` if the transaction is already known, fails if the
    /// bytes don't deserialize.
    pub fn ingest(&self, raw_tx: &[u8], tx_time: u32) -> Result<bool> {
        let tx: Transaction = deserialize(raw_tx)?;
        let txid = tx.txid();

        // pending is locked before state everywhere both are held
        let mut new_zc = self.lock_pending();
        if new_zc.contains_key(&txid) || self.read_state().tx_map.contains_key(&txid) {
            return Ok(false);
        }

        let seq = self.ingest_seq.fetch_add(1, Ordering::Relaxed);
        new_zc.insert(
            txid,
            PendingTx {
                data: ZeroConfData { tx, tx_time },
                seq,
            },
        );

        Ok(true)
    }

    pub fn add_raw_tx(&self, raw_tx: &[u8], tx_time: u32) -> Result<bool> {
        self.ingest(raw_tx, tx_time)
    }

    pub fn num_pending(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn new_zc_key(&self) -> TxKey {
        TxKey::unconfirmed(self.top_id.fetch_add(1, Ordering::AcqRel))
    }

    /// Key and classify every staged transaction, in the order they were
    /// ingested so parents are keyed before their children.
    ///
    /// Transactions stay staged until they are committed, so a store error
    /// leaves the ones not yet classified for the next run. Returns whether
    /// any of them touch a tracked address.
    pub async fn classify_pending<F: AddressFilter>(&self, filter: &F) -> Result<bool> {
        if self.processing.swap(true, Ordering::AcqRel) {
            return Err(Error::msg("Zero conf transactions are already being classified"));
        }
        let _guard = ProcessingGuard(&self.processing);

        let mut pending: Vec<(Txid, u64, ZeroConfData)> = self
            .lock_pending()
            .iter()
            .map(|(txid, entry)| (*txid, entry.seq, entry.data.clone()))
            .collect();
        pending.sort_by_key(|(_, seq, _)| *seq);

        debug!("classifying {} zero conf transactions", pending.len());

        let mut found = false;
        for (txid, _, data) in pending {
            let zc_key = self.new_zc_key();
            let txios = self.zc_is_mine(&data, zc_key, filter).await?;

            // a tx leaves pending and enters tx_map under one pending lock
            let mut new_zc = self.lock_pending();
            let Some(entry) = new_zc.remove(&txid) else {
                debug!("zero conf tx {txid} was dropped while being classified");
                continue;
            };

            let mut state = self.write_state();
            state.tx_hash_to_key.insert(txid, zc_key);
            state.tx_map.insert(txid, entry.data);
            if !txios.is_empty() {
                found = true;
                debug!("zero conf tx {txid} touches {} tracked outputs", txios.len());
                state.new_txio_map.insert(txid, txios.clone());
                state.txio_map.insert(txid, txios);
            }
        }

        Ok(found)
    }

    /// Output `prevout` points to if its transaction is in the pool.
    fn zc_parent_output(&self, prevout: &OutPoint, vout: u16) -> Option<(OutputKey, Option<TxOut>)> {
        let state = self.read_state();
        let key = state.tx_hash_to_key.get(&prevout.txid)?;
        let txout = state
            .tx_map
            .get(&prevout.txid)
            .and_then(|data| data.tx.output.get(vout as usize))
            .cloned();

        Some((OutputKey::new(*key, vout), txout))
    }

    async fn zc_is_mine<F: AddressFilter>(
        &self,
        data: &ZeroConfData,
        zc_key: TxKey,
        filter: &F,
    ) -> Result<TxIoMap> {
        let mut txios = TxIoMap::new();

        for (i, txin) in data.tx.input.iter().enumerate() {
            let prevout = txin.previous_output;
            if prevout.is_null() {
                continue;
            }
            // indexes past u16::MAX can't be keyed
            let (Ok(i), Ok(vout)) = (u16::try_from(i), u16::try_from(prevout.vout)) else {
                warn!("zero conf input {i} of {} can't be keyed, skipping", data.tx.txid());
                continue;
            };
            let txin_key = OutputKey::new(zc_key, i);

            let (txout_key, txout) = match self.zc_parent_output(&prevout, vout) {
                Some(parent) => parent,
                None => {
                    let Some(tx_key) = self.backend.tx_key(&prevout.txid).await? else {
                        continue;
                    };
                    let txout_key = OutputKey::new(tx_key, vout);

                    // only inputs the filter can't rule out are worth a store lookup
                    if filter.has_utxo(&txout_key) == UtxoStatus::NotTracked {
                        continue;
                    }
                    (txout_key, self.backend.stored_output(&txout_key).await?)
                }
            };

            let Some(txout) = txout else {
                continue;
            };

            for scr_addr in ScrAddr::decompose_script(&txout.script_pubkey, self.second_order_multisig)
            {
                if filter.has_scr_address(&scr_addr) {
                    txios.insert(
                        (txout_key, scr_addr.clone()),
                        TxIoPair {
                            scr_addr,
                            value: txout.value,
                            txout_key,
                            txin_key: Some(txin_key),
                            tx_time: data.tx_time,
                        },
                    );
                }
            }
        }

        for (i, txout) in data.tx.output.iter().enumerate() {
            let Ok(i) = u16::try_from(i) else {
                warn!("zero conf tx {} has more outputs than can be keyed", data.tx.txid());
                break;
            };
            let txout_key = OutputKey::new(zc_key, i);

            for scr_addr in ScrAddr::decompose_script(&txout.script_pubkey, self.second_order_multisig)
            {
                if filter.has_scr_address(&scr_addr) {
                    txios.insert(
                        (txout_key, scr_addr.clone()),
                        TxIoPair {
                            scr_addr,
                            value: txout.value,
                            txout_key,
                            txin_key: None,
                            tx_time: data.tx_time,
                        },
                    );
                }
            }
        }

        Ok(txios)
    }

    /// Drop the ownership records of addresses that are no longer relevant,
    /// and the transactions left without any.
    ///
    /// Returns, per transaction, the addresses whose view has to be
    /// invalidated.
    pub fn purge<F: AddressFilter>(&self, filter: &F) -> HashMap<Txid, BTreeSet<ScrAddr>> {
        let mut guard = self.write_state();
        let state = &mut *guard;
        let mut invalidated = HashMap::new();

        let txids: Vec<Txid> = state.tx_map.keys().copied().collect();
        for txid in txids {
            let mut removed = BTreeSet::new();

            let still_relevant = match state.txio_map.get_mut(&txid) {
                Some(txios) => {
                    txios.retain(|_, txio| {
                        let keep = filter.has_scr_address(&txio.scr_addr);
                        if !keep {
                            removed.insert(txio.scr_addr.clone());
                        }
                        keep
                    });
                    !txios.is_empty()
                }
                None => false,
            };

            if let Some(new_txios) = state.new_txio_map.get_mut(&txid) {
                new_txios.retain(|_, txio| filter.has_scr_address(&txio.scr_addr));
                if new_txios.is_empty() {
                    state.new_txio_map.remove(&txid);
                }
            }

            if !still_relevant {
                state.txio_map.remove(&txid);
                state.tx_map.remove(&txid);
                state.tx_hash_to_key.remove(&txid);
            }

            if !removed.is_empty() {
                invalidated.insert(txid, removed);
            }
        }

        info!(
            "purged zero conf pool, {} transactions invalidated, {} left",
            invalidated.len(),
            state.tx_map.len()
        );

        invalidated
    }

    /// Forget a transaction, typically once it got mined. Returns the
    /// addresses it touched, `None` if it wasn't in the pool.
    pub fn remove_tx_by_hash(&self, txid: &Txid) -> Option<BTreeSet<ScrAddr>> {
        let pending = self.lock_pending().remove(txid).is_some();

        let mut state = self.write_state();
        state.new_txio_map.remove(txid);
        state.tx_hash_to_key.remove(txid);
        let known = state.tx_map.remove(txid).is_some();
        let txios = state.txio_map.remove(txid);

        if !known && !pending {
            return None;
        }

        Some(
            txios
                .into_iter()
                .flat_map(|txios| txios.into_values())
                .map(|txio| txio.scr_addr)
                .collect(),
        )
    }

    /// Hand out the ownership records found since the last call. Each record
    /// is returned once.
    pub fn drain_ownership_delta(&self) -> HashMap<Txid, TxIoMap> {
        std::mem::take(&mut self.write_state().new_txio_map)
    }

    pub fn get_new_txio_map(&self) -> HashMap<Txid, TxIoMap> {
        self.drain_ownership_delta()
    }

    pub fn reset_new_zc(&self) {
        self.write_state().new_txio_map.clear();
    }

    pub fn get_full_txio_map(&self) -> HashMap<Txid, TxIoMap> {
        self.read_state().txio_map.clone()
    }

    /// Hashes with records waiting to be drained.
    pub fn get_new_zc_by_hash(&self) -> BTreeSet<Txid> {
        self.read_state().new_txio_map.keys().copied().collect()
    }

    pub fn has_tx_by_hash(&self, txid: &Txid) -> bool {
        self.read_state().tx_map.contains_key(txid)
    }

    pub fn get_tx_by_hash(&self, txid: &Txid) -> Option<Transaction> {
        self.read_state()
            .tx_map
            .get(txid)
            .map(|data| data.tx.clone())
    }

    pub fn get_key_for_tx_hash(&self, txid: &Txid) -> Option<TxKey> {
        self.read_state().tx_hash_to_key.get(txid).copied()
    }

    pub fn clear(&self) {
        self.lock_pending().clear();
        *self.write_state() = ZcState::default();
        self.top_id.store(0, Ordering::Release);
    }
}
