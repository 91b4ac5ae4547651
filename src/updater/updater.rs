use anyhow::Result;
use bitcoin::absolute::Height;

use crate::structs::WalletId;

/// Hooks supplied by the embedding system.
pub trait Updater: Send + Sync {
    /// Whether the block data manager finished its initial load.
    fn bdm_is_running(&self) -> bool;

    fn current_top_block_height(&self) -> Height;

    /// Scan `[start, end]` for the addresses of `wallet` and write the
    /// resulting history to the store.
    fn apply_block_range_to_db(&self, start: Height, end: Height, wallet: &WalletId)
        -> Result<()>;

    fn send_scan_progress(&self, _current: Height) {}
}
