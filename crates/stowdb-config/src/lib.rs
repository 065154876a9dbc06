//! Store assembly settings for stowdb, read from TOML.
//!
//! ```toml
//! [stores.notes]
//! batch_size = 50
//! cache_ttl_secs = 30
//! exclude_fields = ["secret"]
//! validate_schema = true
//! dispatch_triggers = true
//! readonly = false
//! ```

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error as ThisError;

///
/// ConfigError
///

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("cannot read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("store '{store}': {reason}")]
    Invalid { store: String, reason: String },
}

///
/// StowConfig
///
/// Named per-record store sections.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StowConfig {
    pub stores: BTreeMap<String, StoreSettings>,
}

impl StowConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;

        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml_str(&text)
    }

    /// Settings for `record`; records without a section get the defaults.
    #[must_use]
    pub fn store(&self, record: &str) -> StoreSettings {
        self.stores.get(record).cloned().unwrap_or_default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, settings) in &self.stores {
            settings.validate().map_err(|reason| ConfigError::Invalid {
                store: name.clone(),
                reason,
            })?;
        }

        Ok(())
    }
}

///
/// StoreSettings
///
/// Which wrappers to put around one record type's base store.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSettings {
    /// Overrides the schema's batch size ceiling.
    pub batch_size: Option<usize>,

    /// Enables caching with this TTL.
    pub cache_ttl_secs: Option<u64>,

    pub exclude_fields: Vec<String>,
    pub validate_schema: bool,
    pub dispatch_triggers: bool,
    pub readonly: bool,
}

impl StoreSettings {
    #[must_use]
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<(), String> {
        if self.batch_size == Some(0) {
            return Err("batch_size must be at least 1".to_string());
        }

        let mut seen = BTreeSet::new();
        for field in &self.exclude_fields {
            if field.is_empty() {
                return Err("exclude_fields contains an empty name".to_string());
            }
            if !seen.insert(field.as_str()) {
                return Err(format!("field '{field}' is excluded twice"));
            }
        }

        Ok(())
    }
}
