mod backend;
mod structs;

pub use backend::ChainBackend;
pub use structs::*;
