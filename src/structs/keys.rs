use std::fmt;

use anyhow::{Error, Result};
use bitcoin::hex::DisplayHex;
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_KEY_HEIGHT, OUTPUT_KEY_LEN, TX_KEY_LEN, ZC_KEY_PREFIX};

/// Database key of a transaction.
///
/// Mined transactions are keyed by `hgtx | tx_index`, where `hgtx` packs the
/// block height (24 bits) and the duplicate id of that block. Zero
/// confirmation transactions use the `0xffff` prefix followed by a 4 byte
/// counter instead, so both kinds of keys can sit in the same maps.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxKey([u8; TX_KEY_LEN]);

impl TxKey {
    pub fn confirmed(height: u32, dup_id: u8, tx_index: u16) -> Result<Self> {
        if height > MAX_KEY_HEIGHT {
            return Err(Error::msg(format!("Height {height} doesn't fit in a tx key")));
        }

        let hgtx = (height << 8) | dup_id as u32;
        let mut key = [0u8; TX_KEY_LEN];
        key[..4].copy_from_slice(&hgtx.to_be_bytes());
        key[4..].copy_from_slice(&tx_index.to_be_bytes());
        Ok(Self(key))
    }

    pub fn unconfirmed(id: u32) -> Self {
        let mut key = [0u8; TX_KEY_LEN];
        key[..2].copy_from_slice(&ZC_KEY_PREFIX);
        key[2..].copy_from_slice(&id.to_be_bytes());
        Self(key)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; TX_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| Error::msg(format!("Invalid tx key length {}", bytes.len())))?;
        Ok(Self(key))
    }

    pub fn is_unconfirmed(&self) -> bool {
        self.0[..2] == ZC_KEY_PREFIX
    }

    /// Block height encoded in the key, `None` for zero confirmation keys.
    pub fn height(&self) -> Option<u32> {
        if self.is_unconfirmed() {
            return None;
        }
        Some(u32::from_be_bytes([0, self.0[0], self.0[1], self.0[2]]))
    }

    pub fn zc_id(&self) -> Option<u32> {
        if !self.is_unconfirmed() {
            return None;
        }
        Some(u32::from_be_bytes([self.0[2], self.0[3], self.0[4], self.0[5]]))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for TxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.as_slice().to_lower_hex_string())
    }
}

/// Database key of a transaction output: its tx key followed by the output
/// index. Inputs of zero confirmation transactions are keyed the same way,
/// using the input index.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutputKey([u8; OUTPUT_KEY_LEN]);

impl OutputKey {
    pub fn new(tx_key: TxKey, index: u16) -> Self {
        let mut key = [0u8; OUTPUT_KEY_LEN];
        key[..TX_KEY_LEN].copy_from_slice(tx_key.as_bytes());
        key[TX_KEY_LEN..].copy_from_slice(&index.to_be_bytes());
        Self(key)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; OUTPUT_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| Error::msg(format!("Invalid output key length {}", bytes.len())))?;
        Ok(Self(key))
    }

    pub fn tx_key(&self) -> TxKey {
        let mut key = [0u8; TX_KEY_LEN];
        key.copy_from_slice(&self.0[..TX_KEY_LEN]);
        TxKey(key)
    }

    pub fn index(&self) -> u16 {
        u16::from_be_bytes([self.0[TX_KEY_LEN], self.0[TX_KEY_LEN + 1]])
    }

    pub fn height(&self) -> Option<u32> {
        self.tx_key().height()
    }

    pub fn is_unconfirmed(&self) -> bool {
        self.tx_key().is_unconfirmed()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for OutputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.as_slice().to_lower_hex_string())
    }
}
