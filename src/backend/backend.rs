use std::{ops::RangeInclusive, pin::Pin};

use anyhow::Result;
use async_trait::async_trait;
use bitcoin::{TxOut, Txid};
use futures::Stream;

use super::structs::{BlockData, SyncState};
use crate::structs::{OutputKey, ScrAddr, TxKey};

/// Read access to the block and transaction store.
#[async_trait]
pub trait ChainBackend: Send + Sync {
    /// Scan history the store holds for an address.
    async fn sync_state(&self, scr_addr: &ScrAddr) -> Result<SyncState>;

    /// Outputs created and spent by `scr_addrs`, block by block, in height
    /// order.
    fn get_block_data_for_range(
        &self,
        range: RangeInclusive<u32>,
        scr_addrs: Vec<ScrAddr>,
    ) -> Pin<Box<dyn Stream<Item = Result<BlockData>> + Send>>;

    /// Key of a mined transaction, `None` if the store doesn't know it.
    async fn tx_key(&self, txid: &Txid) -> Result<Option<TxKey>>;

    async fn stored_output(&self, key: &OutputKey) -> Result<Option<TxOut>>;
}
