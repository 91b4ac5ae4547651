use std::{fs::File, io::Read, path::Path};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::constants::DbType;

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct TrackerConfig {
    pub db_type: DbType,
    /// Also match the individual keys of a bare multisig output
    pub second_order_multisig: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            db_type: DbType::Full,
            second_order_multisig: true,
        }
    }
}

impl TrackerConfig {
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path.as_ref())?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let config: Self = serde_json::from_str(&contents)?;

        Ok(config)
    }
}
