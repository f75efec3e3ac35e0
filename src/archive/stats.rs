//! End-of-run timing summary.

use std::{fmt, time::Duration};

use super::IterationRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub count: usize,
    pub total: Duration,
    pub average: Duration,
    /// First record with the longest duration.
    pub longest: IterationRecord,
    /// First record with the shortest duration.
    pub shortest: IterationRecord,
}

/// Aggregate iteration timings. `None` when no iteration completed.
pub fn summarize(records: &[IterationRecord]) -> Option<RunSummary> {
    let longest = records
        .iter()
        .reduce(|best, r| if r.duration > best.duration { r } else { best })?;
    let shortest = records.iter().min_by_key(|r| r.duration)?;

    let total: Duration = records.iter().map(|r| r.duration).sum();
    let average = total.div_f64(records.len() as f64);

    Some(RunSummary {
        count: records.len(),
        total,
        average,
        longest: longest.clone(),
        shortest: shortest.clone(),
    })
}

/// Render a duration as seconds with the minute equivalent, e.g. `90.00s (1.50 min)`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    format!("{secs:.2}s ({:.2} min)", secs / 60.0)
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Iteration statistics")?;
        writeln!(f, "  iterations: {}", self.count)?;
        writeln!(f, "  total:      {}", format_duration(self.total))?;
        writeln!(f, "  average:    {}", format_duration(self.average))?;
        writeln!(
            f,
            "  longest:    {} (iteration {}, started {})",
            format_duration(self.longest.duration),
            self.longest.index,
            self.longest.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(
            f,
            "  shortest:   {} (iteration {}, started {})",
            format_duration(self.shortest.duration),
            self.shortest.index,
            self.shortest.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn record(index: u32, secs: u64) -> IterationRecord {
        let started_at = Utc.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap();
        IterationRecord {
            index,
            started_at,
            finished_at: started_at + chrono::Duration::seconds(secs as i64),
            duration: Duration::from_secs(secs),
        }
    }

    #[test]
    fn test_empty_yields_none() {
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn test_summary() {
        let records = vec![record(1, 5), record(2, 10), record(3, 15)];
        let summary = summarize(&records).unwrap();

        assert_eq!(summary.count, 3);
        assert_eq!(summary.total, Duration::from_secs(30));
        assert_eq!(summary.average, Duration::from_secs(10));
        assert_eq!(summary.longest, records[2]);
        assert_eq!(summary.shortest, records[0]);
    }

    #[test]
    fn test_ties_pick_first_record() {
        let records = vec![record(1, 7), record(2, 7), record(3, 3), record(4, 3)];
        let summary = summarize(&records).unwrap();

        assert_eq!(summary.longest.index, 1);
        assert_eq!(summary.shortest.index, 3);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0.00s (0.00 min)");
        assert_eq!(format_duration(Duration::from_millis(6_500)), "6.50s (0.11 min)");
        assert_eq!(format_duration(Duration::from_secs(3_600)), "3600.00s (60.00 min)");
    }

    #[test]
    fn test_display() {
        let summary = summarize(&[record(1, 90), record(2, 30)]).unwrap();
        let rendered = summary.to_string();

        assert!(rendered.contains("iterations: 2"), "{rendered}");
        assert!(rendered.contains("total:      120.00s (2.00 min)"), "{rendered}");
        assert!(rendered.contains("average:    60.00s (1.00 min)"), "{rendered}");
        assert!(rendered.contains("longest:    90.00s (1.50 min) (iteration 1"), "{rendered}");
        assert!(rendered.contains("shortest:   30.00s (0.50 min) (iteration 2"), "{rendered}");
    }
}
