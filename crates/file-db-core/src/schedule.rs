use crate::storage::models::DirStatus;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Adaptive re-crawl interval policy. All values are seconds.
///
/// A directory whose newest child changed `elapsed` seconds ago is revisited
/// after `elapsed / divisor`, bounded to `[min_interval, max_interval]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrawlFrequency {
    pub divisor: f64,
    pub min_interval: i64,
    pub max_interval: i64,
    /// Used instead of the formula when a crawl finds the directory gone or unreadable.
    pub missing_interval: i64,
    /// Interval recorded for a newly discovered directory before its first crawl.
    pub default_interval: i64,
}

impl Default for CrawlFrequency {
    fn default() -> Self {
        Self {
            divisor: 30.0,
            min_interval: 15 * 60,
            max_interval: 7 * 24 * 3600,
            missing_interval: 3600,
            default_interval: 24 * 3600,
        }
    }
}

impl CrawlFrequency {
    pub fn next_interval(&self, now: i64, last_activity: i64) -> i64 {
        let elapsed = now.saturating_sub(last_activity).max(0) as f64;
        let divisor = if self.divisor > 0.0 { self.divisor } else { 1.0 };
        self.clamp((elapsed / divisor) as i64)
    }

    pub fn clamp(&self, raw: i64) -> i64 {
        let upper = self.max_interval.max(self.min_interval);
        raw.max(self.min_interval).min(upper)
    }

    pub fn interval_for(&self, status: DirStatus, now: i64, last_activity: i64) -> i64 {
        match status {
            DirStatus::Present => self.next_interval(now, last_activity),
            DirStatus::Missing | DirStatus::Unreadable => self.missing_interval,
        }
    }
}

/// Claim ordering for due directories: overdue first, then smaller directories.
///
/// `score = hours_overdue - file_count / size_divisor - subdir_count / size_divisor`,
/// highest score claimed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlPriority {
    pub size_divisor: i64,
}

impl Default for CrawlPriority {
    fn default() -> Self {
        Self { size_divisor: 100 }
    }
}

impl CrawlPriority {
    pub fn score(&self, now: i64, next_due: i64, file_count: i64, subdir_count: i64) -> f64 {
        let divisor = self.size_divisor.max(1) as f64;
        let hours_overdue = (now - next_due) as f64 / SECONDS_PER_HOUR;
        hours_overdue - file_count as f64 / divisor - subdir_count as f64 / divisor
    }

    /// The same score as a SQL expression over `crawl_control`.
    /// `now_param` and `divisor_param` are positional placeholders such as `?2`.
    pub(crate) fn sql_score(now_param: &str, divisor_param: &str) -> String {
        format!(
            "(({now} - next_due) / 3600.0) - (file_count * 1.0 / {div}) - (subdir_count * 1.0 / {div})",
            now = now_param,
            div = divisor_param
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_activity_hits_minimum() {
        let frequency = CrawlFrequency::default();
        assert_eq!(frequency.next_interval(10_000, 9_990), frequency.min_interval);
    }

    #[test]
    fn test_stale_directory_hits_maximum() {
        let frequency = CrawlFrequency::default();
        let year = 365 * 24 * 3600;
        assert_eq!(frequency.next_interval(10 * year, 0), frequency.max_interval);
    }

    #[test]
    fn test_formula_between_bounds() {
        let frequency = CrawlFrequency::default();
        // Two days of quiet / 30 = 5760s.
        let now = 1_000_000;
        assert_eq!(frequency.next_interval(now, now - 2 * 86_400), 5_760);
    }

    #[test]
    fn test_clamp_invariant_holds_for_any_input() {
        let frequency = CrawlFrequency::default();
        for last in [i64::MIN / 2, -1, 0, 1_000, 1_000_000_000, i64::MAX / 2] {
            let interval = frequency.next_interval(1_700_000_000, last);
            assert!(interval >= frequency.min_interval);
            assert!(interval <= frequency.max_interval);
        }
    }

    #[test]
    fn test_future_activity_is_treated_as_now() {
        let frequency = CrawlFrequency::default();
        assert_eq!(frequency.next_interval(100, 5_000), frequency.min_interval);
    }

    #[test]
    fn test_missing_uses_fallback() {
        let frequency = CrawlFrequency::default();
        assert_eq!(frequency.missing_interval, 3_600);
        assert!(frequency.missing_interval < frequency.default_interval);
        assert_eq!(
            frequency.interval_for(DirStatus::Missing, 1_000_000, 0),
            frequency.missing_interval
        );
        assert_eq!(
            frequency.interval_for(DirStatus::Unreadable, 1_000_000, 0),
            frequency.missing_interval
        );
    }

    #[test]
    fn test_priority_prefers_overdue_then_small() {
        let priority = CrawlPriority::default();
        let now = 100_000;
        let long_overdue = priority.score(now, now - 10 * 3600, 0, 0);
        let just_due = priority.score(now, now, 0, 0);
        assert!(long_overdue > just_due);

        let small = priority.score(now, now - 3600, 5, 1);
        let large = priority.score(now, now - 3600, 5_000, 200);
        assert!(small > large);
    }
}
