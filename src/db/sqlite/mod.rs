mod archive_rules;

pub use archive_rules::{SqliteArchiveRuleRepo, SqliteArchiveRuleTx};
