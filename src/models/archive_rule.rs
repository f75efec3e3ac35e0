use chrono::{Days, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Field name of the boundary term.
pub const BOUNDARY_FIELD: &str = "id";

/// Operator of the boundary term.
pub const BOUNDARY_OPERATOR: &str = "<";

/// Actor stamped on boundary writes made by the initializer.
pub const INIT_ACTOR: &str = "INIT_SYSTEM";

/// Actor stamped on boundary writes made by the coordinator loop.
pub const LOOP_ACTOR: &str = "SYSTEM";

/// Column every archived table must carry for the retention filter.
pub const CREATED_COLUMN: &str = "created";

/// Per-table archival policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveHeader {
    pub id: i64,
    /// Table the archival worker moves rows out of.
    pub table_name: String,
    pub auto_archive: bool,
    /// Retention window in days. Unset or non-positive means the configured default.
    pub archive_days_before: Option<i32>,
}

impl ArchiveHeader {
    /// Retention window in days, falling back to `default_days`.
    pub fn retention_days(&self, default_days: u32) -> u32 {
        match self.archive_days_before {
            Some(days) if days > 0 => days as u32,
            _ => default_days,
        }
    }

    /// Rows created before this instant are eligible for archival.
    ///
    /// `now` minus the retention window, truncated to midnight.
    pub fn retention_threshold(&self, now: NaiveDateTime, default_days: u32) -> NaiveDateTime {
        let date = now
            .date()
            .checked_sub_days(Days::new(u64::from(self.retention_days(default_days))))
            .unwrap_or(chrono::NaiveDate::MIN);
        date.and_time(chrono::NaiveTime::MIN)
    }
}

/// One predicate row of an archive rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveTerm {
    pub header_id: i64,
    pub field: String,
    pub operator: String,
    pub value: String,
}

impl ArchiveTerm {
    /// The boundary term is `id < N`; every other term is a static filter.
    pub fn is_boundary_field(field: &str) -> bool {
        field.trim().eq_ignore_ascii_case(BOUNDARY_FIELD)
    }
}

/// What an upsert of the boundary term did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryWrite {
    Updated,
    Inserted,
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rstest::rstest;

    use super::*;

    fn header(days: Option<i32>) -> ArchiveHeader {
        ArchiveHeader {
            id: 1,
            table_name: "orders".into(),
            auto_archive: true,
            archive_days_before: days,
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[rstest]
    #[case(None, 180)]
    #[case(Some(0), 180)]
    #[case(Some(-5), 180)]
    #[case(Some(30), 30)]
    fn test_retention_days(#[case] days: Option<i32>, #[case] expected: u32) {
        assert_eq!(header(days).retention_days(180), expected);
    }

    #[test]
    fn test_threshold_default_window() {
        let now = at(2024, 7, 15, 14, 35);
        assert_eq!(
            header(None).retention_threshold(now, 180),
            at(2024, 1, 17, 0, 0)
        );
    }

    #[test]
    fn test_threshold_thirty_days() {
        let now = at(2024, 3, 10, 23, 59);
        assert_eq!(
            header(Some(30)).retention_threshold(now, 180),
            at(2024, 2, 9, 0, 0)
        );
    }

    #[rstest]
    #[case("id", true)]
    #[case(" ID ", true)]
    #[case("Id", true)]
    #[case("orderId", false)]
    #[case("status", false)]
    fn test_boundary_field(#[case] field: &str, #[case] expected: bool) {
        assert_eq!(ArchiveTerm::is_boundary_field(field), expected);
    }
}
