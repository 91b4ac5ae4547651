use serde::{Deserialize, Serialize};

/// First two bytes of every zero-confirmation transaction key.
pub const ZC_KEY_PREFIX: [u8; 2] = [0xff, 0xff];

pub const TX_KEY_LEN: usize = 6;
pub const OUTPUT_KEY_LEN: usize = 8;

// heights are packed in 3 bytes inside a key, and a height starting with
// 0xffff would read as a zero-conf key
pub const MAX_KEY_HEIGHT: u32 = 0x00ff_feff;

pub const SCRADDR_P2PKH_PREFIX: u8 = 0x00;
pub const SCRADDR_P2SH_PREFIX: u8 = 0x05;
pub const SCRADDR_P2WPKH_PREFIX: u8 = 0x90;
pub const SCRADDR_P2WSH_PREFIX: u8 = 0x95;
pub const SCRADDR_P2TR_PREFIX: u8 = 0x9a;
pub const SCRADDR_MULTISIG_PREFIX: u8 = 0xfe;
pub const SCRADDR_NONSTD_PREFIX: u8 = 0xff;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    /// Only registered addresses are indexed, new registrations trigger a scan
    #[default]
    Full,
    /// Every address is indexed by the store, registrations never scan
    Super,
}
