mod pool;

pub use pool::ZeroConfPool;

use crate::structs::{OutputKey, ScrAddr, UtxoStatus};

/// Membership test the pool classifies transactions against.
///
/// Plain `Fn(&ScrAddr) -> bool` predicates work too; without an output index
/// behind them every spent output is looked up in the store.
pub trait AddressFilter {
    fn has_scr_address(&self, scr_addr: &ScrAddr) -> bool;

    fn has_utxo(&self, _key: &OutputKey) -> UtxoStatus {
        UtxoStatus::Indeterminate
    }
}

impl<F> AddressFilter for F
where
    F: Fn(&ScrAddr) -> bool,
{
    fn has_scr_address(&self, scr_addr: &ScrAddr) -> bool {
        self(scr_addr)
    }
}
