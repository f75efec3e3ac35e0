mod archive_rule;

pub use archive_rule::*;
