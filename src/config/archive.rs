//! Boundary bookkeeping configuration.
//!
//! # Example
//!
//! ```toml
//! [archive]
//! increment_value = 10000
//! default_min_id_value = 10000
//! total_iterations = 1000
//! default_retention_days = 180
//!
//! [archive.tables]
//! header_table = "ttx_archive_rule_header"
//! term_table = "ttx_archive_rule_term"
//! ```

use serde::{Deserialize, Serialize};

use super::{ConfigError, is_plain_identifier};

/// Upper bound for `total_iterations`.
pub const MAX_TOTAL_ITERATIONS: u32 = 1_000_000;

/// Boundary arithmetic and loop bounds for a pacing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    /// Amount added to every boundary before each trigger.
    /// Must not be negative: boundaries never move backwards.
    /// Default: 10000
    #[serde(default = "default_increment_value")]
    pub increment_value: i64,

    /// Boundary written when a table has no qualifying rows, or when a
    /// header has no boundary term at bump time.
    /// Default: 10000
    #[serde(default = "default_min_id_value")]
    pub default_min_id_value: i64,

    /// Number of coordinator iterations to run, at most 1,000,000.
    /// Default: 1000
    #[serde(default = "default_total_iterations")]
    pub total_iterations: u32,

    /// Retention window used when a header's `archiveDaysBefore` is unset or not positive.
    /// Default: 180
    #[serde(default = "default_retention_days")]
    pub default_retention_days: u32,

    /// Names of the rule tables.
    #[serde(default)]
    pub tables: RuleTablesConfig,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            increment_value: default_increment_value(),
            default_min_id_value: default_min_id_value(),
            total_iterations: default_total_iterations(),
            default_retention_days: default_retention_days(),
            tables: RuleTablesConfig::default(),
        }
    }
}

impl ArchiveConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.increment_value < 0 {
            return Err(ConfigError::Validation(format!(
                "archive.increment_value must not be negative (got {})",
                self.increment_value
            )));
        }
        if self.total_iterations > MAX_TOTAL_ITERATIONS {
            return Err(ConfigError::Validation(format!(
                "archive.total_iterations must be at most {MAX_TOTAL_ITERATIONS} (got {})",
                self.total_iterations
            )));
        }
        if self.default_retention_days == 0 {
            return Err(ConfigError::Validation(
                "archive.default_retention_days must be greater than 0".into(),
            ));
        }
        self.tables.validate()
    }
}

fn default_increment_value() -> i64 {
    10_000
}

fn default_min_id_value() -> i64 {
    10_000
}

fn default_total_iterations() -> u32 {
    1000
}

fn default_retention_days() -> u32 {
    180
}

/// Rule table names.
///
/// These are interpolated into SQL, so they must be plain identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleTablesConfig {
    /// Per-table archival policy table.
    #[serde(default = "default_header_table")]
    pub header_table: String,

    /// Predicate rule table (including the `id <` boundary).
    #[serde(default = "default_term_table")]
    pub term_table: String,
}

impl Default for RuleTablesConfig {
    fn default() -> Self {
        Self {
            header_table: default_header_table(),
            term_table: default_term_table(),
        }
    }
}

impl RuleTablesConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (key, name) in [
            ("header_table", &self.header_table),
            ("term_table", &self.term_table),
        ] {
            if !is_plain_identifier(name) {
                return Err(ConfigError::Validation(format!(
                    "archive.tables.{key} must be a plain identifier (got {name:?})"
                )));
            }
        }
        Ok(())
    }
}

fn default_header_table() -> String {
    "archive_rule_header".to_string()
}

fn default_term_table() -> String {
    "archive_rule_term".to_string()
}
