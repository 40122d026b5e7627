//! Configuration loading helpers.
//!
//! Tables and tries are sized once, at start-up. This module reads those sizes
//! from TOML and environment overrides:
//!
//! ```toml
//! [table]
//! bit_width = 20
//! probe_limit = 1048576
//!
//! [trie]
//! bin_bits = 2
//! max_levels = 1048576
//! levels_per_page = 256
//!
//! [spin]
//! stall_timeout_ms = 30000   # 0 waits forever
//! ```

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::index::TableConfig;
use crate::slot::SpinPolicy;
use crate::trie::TrieConfig;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "OXICOV_CONFIG";

/// Prefix of `OXICOV__section__field` override variables.
pub const ENV_OVERRIDE_PREFIX: &str = "OXICOV__";

/// Errors returned by configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error while reading config files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parse error.
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// Invalid value for a key.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Raw value string.
        value: String,
    },
    /// Unknown configuration key.
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Top-level configuration schema.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OxicovConfig {
    /// Fingerprint table configuration.
    pub table: Option<TableConfigSpec>,
    /// Lookup trie configuration.
    pub trie: Option<TrieConfigSpec>,
    /// Spin-wait configuration shared by both structures.
    pub spin: Option<SpinConfigSpec>,
}

impl OxicovConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from the `OXICOV_CONFIG` env var (if set),
    /// then apply `OXICOV__section__field` overrides.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let mut config = match env::var(CONFIG_PATH_ENV).ok() {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment overrides in-place.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(env::vars())
    }

    /// Apply `OXICOV__section__field` overrides from an iterator of pairs.
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(path) = key.strip_prefix(ENV_OVERRIDE_PREFIX) else {
                continue;
            };
            let path = path.to_ascii_lowercase();
            let parts: Vec<&str> = path.split("__").collect();
            let value = value.trim();

            match parts.as_slice() {
                ["table", "bit_width"] => {
                    self.table_mut().bit_width = Some(parse_value(&key, value)?);
                }
                ["table", "probe_limit"] => {
                    self.table_mut().probe_limit = Some(parse_value(&key, value)?);
                }
                ["trie", "bin_bits"] => {
                    self.trie_mut().bin_bits = Some(parse_value(&key, value)?);
                }
                ["trie", "max_levels"] => {
                    self.trie_mut().max_levels = Some(parse_value(&key, value)?);
                }
                ["trie", "levels_per_page"] => {
                    self.trie_mut().levels_per_page = Some(parse_value(&key, value)?);
                }
                ["spin", "stall_timeout_ms"] => {
                    self.spin_mut().stall_timeout_ms = Some(parse_value(&key, value)?);
                }
                _ => return Err(ConfigError::UnknownKey(key)),
            }
        }

        Ok(())
    }

    /// Build a `TableConfig` using defaults plus overrides.
    pub fn to_table_config(&self) -> TableConfig {
        let mut config = TableConfig::default().with_spin(self.spin_policy());
        if let Some(table) = &self.table {
            table.apply_to(&mut config);
        }
        config
    }

    /// Build a `TrieConfig` using defaults plus overrides.
    pub fn to_trie_config(&self) -> TrieConfig {
        let mut config = TrieConfig::default().with_spin(self.spin_policy());
        if let Some(trie) = &self.trie {
            trie.apply_to(&mut config);
        }
        config
    }

    /// Resolve the spin policy.
    pub fn spin_policy(&self) -> SpinPolicy {
        let mut policy = SpinPolicy::default();
        if let Some(spin) = &self.spin {
            spin.apply_to(&mut policy);
        }
        policy
    }

    fn table_mut(&mut self) -> &mut TableConfigSpec {
        self.table.get_or_insert_with(TableConfigSpec::default)
    }

    fn trie_mut(&mut self) -> &mut TrieConfigSpec {
        self.trie.get_or_insert_with(TrieConfigSpec::default)
    }

    fn spin_mut(&mut self) -> &mut SpinConfigSpec {
        self.spin.get_or_insert_with(SpinConfigSpec::default)
    }
}

/// Fingerprint table configuration overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfigSpec {
    /// Capacity is `2^bit_width` entries.
    pub bit_width: Option<u32>,
    /// Buckets probed before reporting a full table.
    pub probe_limit: Option<u64>,
}

impl TableConfigSpec {
    fn apply_to(&self, config: &mut TableConfig) {
        if let Some(value) = self.bit_width {
            config.bit_width = value;
        }
        if let Some(value) = self.probe_limit {
            config.probe_limit = Some(value);
        }
    }
}

/// Lookup trie configuration overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrieConfigSpec {
    /// Key bits consumed per level.
    pub bin_bits: Option<u32>,
    /// Arena capacity in levels; unset leaves the arena uncapped.
    pub max_levels: Option<u64>,
    /// Levels per page-source allocation.
    pub levels_per_page: Option<usize>,
}

impl TrieConfigSpec {
    fn apply_to(&self, config: &mut TrieConfig) {
        if let Some(value) = self.bin_bits {
            config.bin_bits = value;
        }
        if let Some(value) = self.max_levels {
            config.max_levels = Some(value);
        }
        if let Some(value) = self.levels_per_page {
            config.levels_per_page = value;
        }
    }
}

/// Spin-wait configuration overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpinConfigSpec {
    /// Stall timeout in milliseconds; 0 waits forever.
    pub stall_timeout_ms: Option<u64>,
}

impl SpinConfigSpec {
    fn apply_to(&self, policy: &mut SpinPolicy) {
        match self.stall_timeout_ms {
            Some(0) => *policy = SpinPolicy::unbounded(),
            Some(ms) => policy.stall_timeout = Some(Duration::from_millis(ms)),
            None => {}
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
