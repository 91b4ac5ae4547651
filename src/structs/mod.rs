mod keys;
mod scraddr;
mod txio;

use std::fmt;

use bitcoin::Transaction;
use serde::{Deserialize, Serialize};

pub use keys::{OutputKey, TxKey};
pub use scraddr::ScrAddr;
pub use txio::{TxIoKind, TxIoMap, TxIoPair};

/// Identifier of the wallet that registered an address. The wallet itself is
/// owned by the embedding system.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WalletId(String);

impl WalletId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WalletId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtxoStatus {
    Tracked,
    NotTracked,
    /// The filter can't tell, the output script has to be fetched from the store
    Indeterminate,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ZeroConfData {
    pub tx: Transaction,
    pub tx_time: u32,
}
