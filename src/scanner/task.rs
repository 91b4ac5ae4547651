use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use anyhow::Result;
use bitcoin::absolute::Height;
use futures::StreamExt;
use log::{debug, info, warn};

use super::{
    staging::{MergeStaging, StagedScan},
    ScrAddrMeta,
};
use crate::{
    backend::ChainBackend,
    structs::{ScrAddr, WalletId},
    updater::Updater,
};

/// A rescan of freshly registered addresses.
///
/// The job owns everything it touches: it has no handle on the filter's
/// live state and can only publish into the staging area.
pub(crate) struct ScanJob {
    pub generation: u64,
    /// Addresses to scan, each with the height it has to be scanned from
    pub scr_addrs: BTreeMap<ScrAddr, ScrAddrMeta>,
    pub end: Height,
    pub backend: Arc<dyn ChainBackend>,
    pub updater: Arc<dyn Updater>,
    pub staging: Arc<MergeStaging>,
}

impl ScanJob {
    pub fn start(&self) -> Option<Height> {
        self.scr_addrs
            .values()
            .map(|meta| meta.last_scanned_height)
            .min()
    }

    pub fn spawn(self) {
        rayon::spawn(move || {
            let result = futures::executor::block_on(self.run());
            if let Err(e) = &result {
                warn!("address scan failed: {e}");
            }

            // release the store before the owner can see the result
            let (generation, staging) = (self.generation, self.staging.clone());
            drop(self);
            staging.publish(generation, result);
        });
    }

    async fn run(&self) -> Result<StagedScan> {
        let mut staged = StagedScan::default();
        let start = match self.start() {
            Some(start) => start,
            None => return Ok(staged),
        };

        info!(
            "scanning {} addresses from {} to {}",
            self.scr_addrs.len(),
            start,
            self.end
        );

        let range = start.to_consensus_u32()..=self.end.to_consensus_u32();
        let scr_addrs: Vec<ScrAddr> = self.scr_addrs.keys().cloned().collect();
        let mut stream = self.backend.get_block_data_for_range(range, scr_addrs);

        while let Some(blockdata) = stream.next().await {
            let blockdata = blockdata?;

            for utxo in blockdata.created {
                if !self.scr_addrs.contains_key(&utxo.scr_addr) {
                    debug!("store returned untracked address {}", utxo.scr_addr);
                    continue;
                }
                staged.utxos.insert(utxo.key);
            }

            for key in blockdata.spent {
                if !staged.utxos.remove(&key) {
                    staged.spent.insert(key);
                }
            }

            self.updater.send_scan_progress(blockdata.blkheight);
        }

        for (wallet, wallet_start) in self.wallet_ranges() {
            self.updater
                .apply_block_range_to_db(wallet_start, self.end, &wallet)?;
        }

        staged.scr_addrs = self
            .scr_addrs
            .iter()
            .map(|(scr_addr, meta)| {
                (
                    scr_addr.clone(),
                    ScrAddrMeta::new(self.end, meta.wallet.clone()),
                )
            })
            .collect();

        debug!("staged {} outputs", staged.utxos.len());

        Ok(staged)
    }

    /// Lowest start height per registering wallet.
    fn wallet_ranges(&self) -> BTreeMap<WalletId, Height> {
        let mut ranges: BTreeMap<WalletId, Height> = BTreeMap::new();
        for meta in self.scr_addrs.values() {
            ranges
                .entry(meta.wallet.clone())
                .and_modify(|h| *h = (*h).min(meta.last_scanned_height))
                .or_insert(meta.last_scanned_height);
        }
        ranges
    }

    #[cfg(test)]
    pub(crate) fn run_blocking(&self) -> Result<StagedScan> {
        futures::executor::block_on(self.run())
    }
}
