//! Session configuration

use serde::Deserialize;

use crate::errors::{OrmError, Result};
use crate::logging_facility::Profile;

/// Tunables for loading and committing
///
/// ```
/// use relmap_core::config::OrmConfig;
///
/// let config = OrmConfig::from_toml_str("max_generations = 4").unwrap();
/// assert_eq!(config.max_generations, 4);
/// assert_eq!(config.sequence_table, "relmap_sequence");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrmConfig {
    /// Absolute generation bound for infinite build depth
    pub max_generations: u32,
    /// Table holding one row per id sequence
    pub sequence_table: String,
    /// Upper bound on commit passes, on top of the no-progress check
    pub max_commit_passes: u32,
    pub logging_profile: Option<Profile>,
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            max_generations: 10,
            sequence_table: "relmap_sequence".to_string(),
            max_commit_passes: 64,
            logging_profile: None,
        }
    }
}

impl OrmConfig {
    /// Parse TOML text; missing keys take their defaults
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for malformed TOML, unknown keys or
    /// zero bounds.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: OrmConfig = toml::from_str(text).map_err(|e| OrmError::InvalidConfiguration {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if a bound is zero or the sequence
    /// table name is not a plain identifier.
    pub fn validate(&self) -> Result<()> {
        if self.max_generations == 0 || self.max_commit_passes == 0 {
            return Err(OrmError::InvalidConfiguration {
                reason: "max_generations and max_commit_passes must be positive".to_string(),
            });
        }
        let plain = !self.sequence_table.is_empty()
            && self
                .sequence_table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !plain {
            return Err(OrmError::InvalidConfiguration {
                reason: format!("illegal sequence table name '{}'", self.sequence_table),
            });
        }
        Ok(())
    }
}
