pub mod config;
pub mod constants;
mod backend;
mod scanner;
mod structs;
mod updater;
mod zeroconf;

#[cfg(test)]
mod test_utils;

pub use bitcoin;

pub use backend::{BlockData, ChainBackend, SyncState, UtxoData};
pub use config::TrackerConfig;
pub use scanner::{ScrAddrFilter, ScrAddrMeta, StagedScan};
pub use structs::*;
pub use updater::Updater;
pub use zeroconf::{AddressFilter, ZeroConfPool};
