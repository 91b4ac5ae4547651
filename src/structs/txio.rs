use std::collections::BTreeMap;

use bitcoin::Amount;
use serde::{Deserialize, Serialize};

use super::{OutputKey, ScrAddr};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum TxIoKind {
    /// The transaction creates an output paying the address
    Credit,
    /// The transaction spends an output owned by the address
    Spend,
}

/// Ownership record linking a tracked address to value moved by a
/// transaction.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TxIoPair {
    pub scr_addr: ScrAddr,
    pub value: Amount,
    /// The output created, or the output being spent
    pub txout_key: OutputKey,
    /// Key of the spending input, only set on spends
    pub txin_key: Option<OutputKey>,
    pub tx_time: u32,
}

impl TxIoPair {
    pub fn kind(&self) -> TxIoKind {
        match self.txin_key {
            Some(_) => TxIoKind::Spend,
            None => TxIoKind::Credit,
        }
    }

    pub fn is_zero_conf(&self) -> bool {
        self.txin_key
            .map(|key| key.is_unconfirmed())
            .unwrap_or_else(|| self.txout_key.is_unconfirmed())
    }
}

/// Ownership records of a single transaction, by output key then address.
pub type TxIoMap = BTreeMap<(OutputKey, ScrAddr), TxIoPair>;
