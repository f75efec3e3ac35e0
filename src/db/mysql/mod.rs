mod archive_rules;

pub use archive_rules::{MysqlArchiveRuleRepo, MysqlArchiveRuleTx};
