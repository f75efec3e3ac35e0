mod archive_rules;

pub use archive_rules::*;

use super::error::{DbError, DbResult};

/// Parse a stored boundary value.
///
/// Term values are text; tolerate a decimal rendering like `10000.0`.
pub(crate) fn parse_boundary_value(header_id: i64, raw: &str) -> DbResult<i64> {
    let raw = raw.trim().trim_matches(|c| c == '\'' || c == '"');
    raw.parse::<i64>()
        .ok()
        .or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && v.fract() == 0.0)
                .map(|v| v as i64)
        })
        .ok_or_else(|| {
            DbError::Internal(format!(
                "boundary term of header {header_id} holds non-integer value {raw:?}"
            ))
        })
}
