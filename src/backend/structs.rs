use bitcoin::absolute::Height;

use crate::structs::{OutputKey, ScrAddr};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncState {
    pub last_scanned: Option<Height>,
    pub created_at: Option<Height>,
}

pub struct BlockData {
    pub blkheight: Height,
    pub created: Vec<UtxoData>,
    pub spent: Vec<OutputKey>,
}

pub struct UtxoData {
    pub scr_addr: ScrAddr,
    pub key: OutputKey,
}
