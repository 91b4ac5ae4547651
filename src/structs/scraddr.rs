use std::fmt;

use bitcoin::{
    hashes::{hash160, Hash},
    hex::DisplayHex,
    opcodes::all::{OP_CHECKMULTISIG, OP_PUSHNUM_1, OP_PUSHNUM_16},
    script::Instruction,
    Script,
};
use serde::{Deserialize, Serialize};

use crate::constants::{
    SCRADDR_MULTISIG_PREFIX, SCRADDR_NONSTD_PREFIX, SCRADDR_P2PKH_PREFIX, SCRADDR_P2SH_PREFIX,
    SCRADDR_P2TR_PREFIX, SCRADDR_P2WPKH_PREFIX, SCRADDR_P2WSH_PREFIX,
};

/// Address identifier as indexed by the store: a script type prefix followed
/// by the hash (or witness program) the script commits to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScrAddr(Vec<u8>);

impl ScrAddr {
    pub fn p2pkh(hash: [u8; 20]) -> Self {
        Self::with_prefix(SCRADDR_P2PKH_PREFIX, &hash)
    }

    pub fn p2sh(hash: [u8; 20]) -> Self {
        Self::with_prefix(SCRADDR_P2SH_PREFIX, &hash)
    }

    /// P2PK and multisig keys are tracked under the P2PKH address of the key.
    pub fn from_pubkey(pubkey: &[u8]) -> Self {
        Self::with_prefix(
            SCRADDR_P2PKH_PREFIX,
            &hash160::Hash::hash(pubkey).to_byte_array(),
        )
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    fn with_prefix(prefix: u8, body: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(body.len() + 1);
        bytes.push(prefix);
        bytes.extend_from_slice(body);
        Self(bytes)
    }

    pub fn prefix(&self) -> Option<u8> {
        self.0.first().copied()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The address a script pays to, `None` for data carriers and empty scripts.
    pub fn from_script(script: &Script) -> Option<Self> {
        let b = script.as_bytes();
        if b.is_empty() || script.is_op_return() {
            return None;
        }

        let scr_addr = if script.is_p2pkh() {
            Self::with_prefix(SCRADDR_P2PKH_PREFIX, &b[3..23])
        } else if script.is_p2sh() {
            Self::with_prefix(SCRADDR_P2SH_PREFIX, &b[2..22])
        } else if script.is_p2wpkh() {
            Self::with_prefix(SCRADDR_P2WPKH_PREFIX, &b[2..])
        } else if script.is_p2wsh() {
            Self::with_prefix(SCRADDR_P2WSH_PREFIX, &b[2..])
        } else if script.is_p2tr() {
            Self::with_prefix(SCRADDR_P2TR_PREFIX, &b[2..])
        } else if script.is_p2pk() {
            // push opcode in front, OP_CHECKSIG behind
            Self::from_pubkey(&b[1..b.len() - 1])
        } else if multisig_pubkeys(script).is_some() {
            Self::with_prefix(SCRADDR_MULTISIG_PREFIX, &hash160::Hash::hash(b).to_byte_array())
        } else {
            Self::with_prefix(SCRADDR_NONSTD_PREFIX, &hash160::Hash::hash(b).to_byte_array())
        };

        Some(scr_addr)
    }

    /// Every address a script can be tracked under. With `with_multisig`, a
    /// bare multisig script also yields the address of each of its keys.
    pub fn decompose_script(script: &Script, with_multisig: bool) -> Vec<Self> {
        let mut res = vec![];
        let Some(scr_addr) = Self::from_script(script) else {
            return res;
        };

        let is_multisig = scr_addr.prefix() == Some(SCRADDR_MULTISIG_PREFIX);
        res.push(scr_addr);

        if with_multisig && is_multisig {
            if let Some(pubkeys) = multisig_pubkeys(script) {
                for pubkey in pubkeys {
                    let constituent = Self::from_pubkey(pubkey);
                    if !res.contains(&constituent) {
                        res.push(constituent);
                    }
                }
            }
        }

        res
    }
}

impl fmt::Display for ScrAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_lower_hex_string())
    }
}

/// Keys of an `m <keys> n OP_CHECKMULTISIG` script.
fn multisig_pubkeys(script: &Script) -> Option<Vec<&[u8]>> {
    let is_pushnum =
        |op: u8| (OP_PUSHNUM_1.to_u8()..=OP_PUSHNUM_16.to_u8()).contains(&op);

    let mut instructions = script.instructions();

    match instructions.next()? {
        Ok(Instruction::Op(op)) if is_pushnum(op.to_u8()) => {}
        _ => return None,
    }

    let mut pubkeys = vec![];
    let mut total = None;
    for instruction in instructions.by_ref() {
        match instruction.ok()? {
            Instruction::PushBytes(bytes) if total.is_none() => {
                let bytes = bytes.as_bytes();
                if bytes.len() != 33 && bytes.len() != 65 {
                    return None;
                }
                pubkeys.push(bytes);
            }
            Instruction::Op(op) if total.is_none() && is_pushnum(op.to_u8()) => {
                total = Some((op.to_u8() - OP_PUSHNUM_1.to_u8() + 1) as usize);
            }
            Instruction::Op(op) if total.is_some() && op == OP_CHECKMULTISIG => {
                break;
            }
            _ => return None,
        }
    }

    if instructions.next().is_some() || total != Some(pubkeys.len()) {
        return None;
    }

    Some(pubkeys)
}
