mod filter;
mod staging;
mod task;

pub use filter::{ScrAddrFilter, ScrAddrMeta};
pub use staging::StagedScan;
