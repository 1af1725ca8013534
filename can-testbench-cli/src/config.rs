//! Transmit profile loading
//!
//! A profile is a TOML file describing which messages the bench transmits,
//! how often, and with what initial signal values. Loaded once at startup;
//! live edits go through `TransmitScheduler::update_value`.

use anyhow::{bail, Context, Result};
use can_testbench_core::Catalog;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// A transmit profile (loaded from a TOML file)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxProfile {
    /// Messages to transmit
    #[serde(default, rename = "message")]
    pub messages: Vec<TxMessageConfig>,
}

/// One message block of a transmit profile
#[derive(Debug, Clone, Deserialize)]
pub struct TxMessageConfig {
    /// Message name in the catalog (alternative to `id`)
    pub name: Option<String>,
    /// Arbitration ID (alternative to `name`)
    pub id: Option<u32>,
    /// Transmission period in milliseconds (default 100)
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    /// Send a single frame instead of arming a periodic entry
    #[serde(default)]
    pub once: bool,
    /// Initial signal values (signals not listed encode as zero)
    #[serde(default)]
    pub values: HashMap<String, f64>,
}

fn default_period_ms() -> u64 {
    100
}

impl TxMessageConfig {
    /// Resolve the block to an arbitration ID via the catalog
    pub fn resolve_id(&self, catalog: &Catalog) -> Result<u32> {
        match (self.id, &self.name) {
            (Some(id), _) => {
                if catalog.lookup(id).is_none() {
                    bail!("profile references unknown arbitration ID 0x{:X}", id);
                }
                Ok(id)
            }
            (None, Some(name)) => catalog
                .lookup_by_name(name)
                .map(|m| m.id)
                .with_context(|| format!("profile references unknown message '{}'", name)),
            (None, None) => bail!("profile message block needs either 'id' or 'name'"),
        }
    }
}

/// Load a transmit profile from a TOML file
pub fn load_profile(path: &Path) -> Result<TxProfile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read profile: {:?}", path))?;

    let profile: TxProfile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse profile: {:?}", path))?;

    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DBC: &str = r#"
VERSION ""

NS_ :

BS_:

BU_: VCU

BO_ 256 Motion: 1 VCU
 SG_ Speed : 0|8@1+ (0.5,0) [0|127.5] "km/h" VCU
"#;

    #[test]
    fn test_profile_deserialization() {
        let toml_content = r#"
            [[message]]
            name = "Motion"
            period_ms = 50

            [message.values]
            Speed = 42.5

            [[message]]
            id = 512
            once = true
        "#;

        let profile: TxProfile = toml::from_str(toml_content).unwrap();
        assert_eq!(profile.messages.len(), 2);
        assert_eq!(profile.messages[0].period_ms, 50);
        assert_eq!(profile.messages[0].values["Speed"], 42.5);
        assert!(profile.messages[1].once);
    }

    #[test]
    fn test_resolve_id() {
        let catalog = Catalog::from_dbc(TEST_DBC).unwrap();
        let profile: TxProfile = toml::from_str("[[message]]\nname = \"Motion\"\n").unwrap();
        assert_eq!(profile.messages[0].resolve_id(&catalog).unwrap(), 0x100);

        let profile: TxProfile = toml::from_str("[[message]]\nname = \"Nope\"\n").unwrap();
        assert!(profile.messages[0].resolve_id(&catalog).is_err());

        let profile: TxProfile = toml::from_str("[[message]]\nid = 999\n").unwrap();
        assert!(profile.messages[0].resolve_id(&catalog).is_err());
    }
}
