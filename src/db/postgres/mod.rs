mod archive_rules;

pub use archive_rules::{PostgresArchiveRuleRepo, PostgresArchiveRuleTx};
