// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! The witness reads a JSON document (camelCase keys), optionally layers a
//! secret document over it, then applies environment overrides.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `WITNESS_PRIVATE_KEY` | Witness signing key (hex or PEM) | from config |
//! | `WITNESS_OPERATOR_KEY` | Destination gas payer key | from config |
//! | `WITNESS_STATUS_PORT` | Status API port | `9080` |
//! | `RELAYER_URL` | Destination RPC endpoint | from config |
//! | `WITNESS_DATABASE_PATH` | redb file | `./witness.redb` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::blockchain::ChainFamily;
use crate::error::{WitnessError, WitnessResult};

/// Environment variable overriding the witness private key.
pub const PRIVATE_KEY_ENV: &str = "WITNESS_PRIVATE_KEY";

/// Environment variable overriding the destination fee payer key.
pub const OPERATOR_KEY_ENV: &str = "WITNESS_OPERATOR_KEY";

pub const STATUS_PORT_ENV: &str = "WITNESS_STATUS_PORT";

pub const RELAYER_URL_ENV: &str = "RELAYER_URL";

pub const DATABASE_PATH_ENV: &str = "WITNESS_DATABASE_PATH";

/// Environment variable for the logging format (`json` or `pretty`).
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_DATABASE_PATH: &str = "./witness.redb";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Configuration {
    pub chain: String,
    pub destination_chain: String,
    #[serde(rename = "clientURL")]
    pub client_url: String,
    #[serde(rename = "relayerURL")]
    pub relayer_url: String,
    pub database: DatabaseConfig,
    pub private_key: String,
    /// Pays destination fees; the witness key is used when empty
    pub operator_key: String,
    pub slack_web_hook: String,
    pub lark_web_hook: String,
    pub confirm_block_number: u64,
    pub batch_size: usize,
    /// Seconds between cycles
    pub interval: u64,
    pub status_port: u16,
    pub disable_transfer_submit: bool,
    pub cashiers: Vec<CashierEntry>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            chain: "ethereum".to_string(),
            destination_chain: String::new(),
            client_url: String::new(),
            relayer_url: String::new(),
            database: DatabaseConfig::default(),
            private_key: String::new(),
            operator_key: String::new(),
            slack_web_hook: String::new(),
            lark_web_hook: String::new(),
            confirm_block_number: 20,
            batch_size: 100,
            interval: 60,
            status_port: 9080,
            disable_transfer_submit: false,
            cashiers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DATABASE_PATH),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CashierEntry {
    pub id: String,
    /// Empty: global relayer URL. `:<suffix>`: global URL plus suffix.
    #[serde(rename = "relayerURL")]
    pub relayer_url: String,
    pub cashier_contract_address: String,
    pub validator_contract_address: String,
    pub token_pairs: Vec<TokenPairEntry>,
    pub decimal_round: Vec<DecimalRoundEntry>,
    pub start_block_height: u64,
    pub reverse: Option<ReverseEntry>,
    pub qps_limit: u32,
    pub disable_pull: bool,
    pub disable_transfer_submit: bool,
    pub chunk_size: Option<u64>,
    /// Required for Solana destinations
    pub governance: Option<GovernanceEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenPairEntry {
    pub token1: String,
    pub token2: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecimalRoundEntry {
    pub token1: String,
    pub amount: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReverseEntry {
    pub cashier_contract_address: String,
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GovernanceEntry {
    pub program_id: String,
    pub governance: String,
    pub vote_record: String,
    pub record_transaction: String,
}

impl Configuration {
    /// Read `config`, layer `secret` over it, then apply the process
    /// environment.
    pub fn load(config: Option<&Path>, secret: Option<&Path>) -> WitnessResult<Self> {
        let mut document = Value::Object(Default::default());
        for path in [config, secret].into_iter().flatten() {
            merge(&mut document, read_document(path)?);
        }
        let mut cfg: Configuration = serde_json::from_value(document)
            .map_err(|e| WitnessError::Config(format!("invalid configuration: {e}")))?;
        cfg.apply_overrides(|name| std::env::var(name).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> WitnessResult<()> {
        if let Some(key) = lookup(PRIVATE_KEY_ENV) {
            self.private_key = key;
        }
        if let Some(key) = lookup(OPERATOR_KEY_ENV) {
            self.operator_key = key;
        }
        if let Some(url) = lookup(RELAYER_URL_ENV) {
            self.relayer_url = url;
        }
        if let Some(path) = lookup(DATABASE_PATH_ENV) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(port) = lookup(STATUS_PORT_ENV) {
            self.status_port = port.parse().map_err(|e| {
                WitnessError::Config(format!("{STATUS_PORT_ENV}={port}: {e}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> WitnessResult<()> {
        ChainFamily::from_chain_name(&self.chain)?;
        if self.client_url.is_empty() {
            return Err(WitnessError::Config("clientURL is required".into()));
        }
        if self.batch_size == 0 {
            return Err(WitnessError::Config("batchSize must be positive".into()));
        }
        if self.interval == 0 {
            return Err(WitnessError::Config("interval must be positive".into()));
        }
        if self.cashiers.is_empty() {
            return Err(WitnessError::Config("no cashier configured".into()));
        }
        let mut ids = HashSet::new();
        for cashier in &self.cashiers {
            if cashier.id.is_empty() {
                return Err(WitnessError::Config("cashier without id".into()));
            }
            if !ids.insert(cashier.id.as_str()) {
                return Err(WitnessError::Config(format!(
                    "duplicate cashier id {}",
                    cashier.id
                )));
            }
            if self.relayer_url_for(cashier).is_empty() {
                return Err(WitnessError::Config(format!(
                    "cashier {}: no relayer URL",
                    cashier.id
                )));
            }
        }
        Ok(())
    }

    pub fn source_family(&self) -> WitnessResult<ChainFamily> {
        ChainFamily::from_chain_name(&self.chain)
    }

    pub fn destination_family(&self) -> ChainFamily {
        ChainFamily::destination(&self.destination_chain)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn relayer_url_for(&self, cashier: &CashierEntry) -> String {
        if cashier.relayer_url.is_empty() {
            self.relayer_url.clone()
        } else if cashier.relayer_url.starts_with(':') {
            format!("{}{}", self.relayer_url, cashier.relayer_url)
        } else {
            cashier.relayer_url.clone()
        }
    }
}

fn read_document(path: &Path) -> WitnessResult<Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| WitnessError::Config(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| WitnessError::Config(format!("cannot parse {}: {e}", path.display())))
}

/// Deep object merge; non-object values in `overlay` replace.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn sample() -> Value {
        json!({
            "chain": "ethereum",
            "destinationChain": "iotex",
            "clientURL": "https://eth.example",
            "relayerURL": "https://relayer.example",
            "cashiers": [{
                "id": "eth-to-iotex",
                "relayerURL": ":8443",
                "cashierContractAddress": "0xcacacacacacacacacacacacacacacacacacacaca",
                "validatorContractAddress": "io1qyqsyqcy6nm58gjd2wr035wz5eyd5uq47zyqpng",
                "tokenPairs": [{ "token1": "0x01", "token2": "0x02" }],
                "decimalRound": [{ "token1": "0x01", "amount": 2 }],
                "qpsLimit": 5
            }]
        })
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: Configuration = serde_json::from_value(sample()).unwrap();
        assert_eq!(cfg.confirm_block_number, 20);
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.interval(), Duration::from_secs(60));
        assert_eq!(cfg.status_port, 9080);
        assert_eq!(cfg.database.path, PathBuf::from(DEFAULT_DATABASE_PATH));
        assert_eq!(cfg.cashiers[0].decimal_round[0].amount, 2);
        assert_eq!(cfg.cashiers[0].qps_limit, 5);
        assert!(cfg.cashiers[0].reverse.is_none());
        assert_eq!(cfg.destination_family(), ChainFamily::Iotex);
        cfg.validate().unwrap();
    }

    #[test]
    fn secret_document_is_layered_over_main() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("config.json");
        let secret = dir.path().join("secret.json");
        std::fs::write(&main, sample().to_string()).unwrap();
        std::fs::write(
            &secret,
            json!({ "privateKey": "abcd", "database": { "path": "/var/witness.redb" } }).to_string(),
        )
        .unwrap();

        let mut document = read_document(&main).unwrap();
        merge(&mut document, read_document(&secret).unwrap());
        let cfg: Configuration = serde_json::from_value(document).unwrap();
        assert_eq!(cfg.private_key, "abcd");
        assert_eq!(cfg.database.path, PathBuf::from("/var/witness.redb"));
        assert_eq!(cfg.client_url, "https://eth.example");
        assert_eq!(cfg.cashiers.len(), 1);
    }

    #[test]
    fn environment_overrides_win() {
        let mut cfg: Configuration = serde_json::from_value(sample()).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            (PRIVATE_KEY_ENV, "beef"),
            (STATUS_PORT_ENV, "9999"),
            (RELAYER_URL_ENV, "https://other.example"),
        ]);
        cfg.apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.private_key, "beef");
        assert_eq!(cfg.status_port, 9999);
        assert_eq!(
            cfg.relayer_url_for(&cfg.cashiers[0]),
            "https://other.example:8443"
        );

        let bad = HashMap::from([(STATUS_PORT_ENV, "port")]);
        assert!(cfg
            .apply_overrides(|name| bad.get(name).map(|v| v.to_string()))
            .is_err());
    }

    #[test]
    fn relayer_url_resolution() {
        let cfg: Configuration = serde_json::from_value(sample()).unwrap();
        let mut entry = CashierEntry::default();
        assert_eq!(cfg.relayer_url_for(&entry), "https://relayer.example");
        entry.relayer_url = ":9000".into();
        assert_eq!(cfg.relayer_url_for(&entry), "https://relayer.example:9000");
        entry.relayer_url = "https://own.example".into();
        assert_eq!(cfg.relayer_url_for(&entry), "https://own.example");
    }

    #[test]
    fn validation_rejects_bad_setups() {
        let mut cfg: Configuration = serde_json::from_value(sample()).unwrap();
        cfg.chain = "dogecoin".into();
        assert!(cfg.validate().is_err());

        let mut cfg: Configuration = serde_json::from_value(sample()).unwrap();
        let duplicate = cfg.cashiers[0].clone();
        cfg.cashiers.push(duplicate);
        assert!(matches!(cfg.validate(), Err(WitnessError::Config(_))));

        let mut cfg: Configuration = serde_json::from_value(sample()).unwrap();
        cfg.cashiers.clear();
        assert!(cfg.validate().is_err());
    }
}
