// 📋 Data model - students and their rebate intervals
//
// A rebate interval is identified by (roll_no, start_date). Dates are
// inclusive on both ends; rebate_days is always derived from them.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// STUDENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub roll_no: String,
    pub name: String,
    pub mobile_no: Option<String>,
    pub email: Option<String>,
    pub branch: Option<String>,
    /// Enrollment year; decides the eligible rebate window
    pub batch: Option<i32>,
}

// ============================================================================
// DATE RANGE
// ============================================================================

/// Closed date range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Returns None when end < start
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        if end < start {
            return None;
        }
        Some(DateRange { start, end })
    }

    /// Range covering `days` days starting at `start` (days >= 1)
    pub fn from_days(start: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        DateRange {
            start,
            end: start + Duration::days(span),
        }
    }

    /// Number of days covered, both ends included
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Closed-interval intersection test
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Days shared with `other` (0 when disjoint)
    pub fn shared_days(&self, other: &DateRange) -> i64 {
        if !self.overlaps(other) {
            return 0;
        }
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (end - start).num_days() + 1
    }

    pub fn contains_range(&self, other: &DateRange) -> bool {
        self.start <= other.start && self.end >= other.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

// ============================================================================
// INTERVAL KEY + REBATE INTERVAL
// ============================================================================

/// Identity of a rebate interval: (roll_no, start_date)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IntervalKey {
    pub roll_no: String,
    pub start_date: NaiveDate,
}

impl IntervalKey {
    pub fn new(roll_no: impl Into<String>, start_date: NaiveDate) -> Self {
        IntervalKey {
            roll_no: roll_no.into(),
            start_date,
        }
    }
}

impl fmt::Display for IntervalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.roll_no, self.start_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebateInterval {
    pub roll_no: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Gate pass number, assigned lazily and never reassigned
    pub gate_pass_code: Option<String>,
}

impl RebateInterval {
    pub fn new(roll_no: impl Into<String>, range: DateRange) -> Self {
        RebateInterval {
            roll_no: roll_no.into(),
            start_date: range.start,
            end_date: range.end,
            gate_pass_code: None,
        }
    }

    pub fn key(&self) -> IntervalKey {
        IntervalKey::new(self.roll_no.clone(), self.start_date)
    }

    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }

    /// end_date - start_date + 1
    pub fn rebate_days(&self) -> i64 {
        self.range().days()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_rebate_days_inclusive() {
        let rebate = RebateInterval::new("A1", DateRange::new(d(2024, 1, 1), d(2024, 1, 10)).unwrap());
        assert_eq!(rebate.rebate_days(), 10);

        let single = RebateInterval::new("A1", DateRange::from_days(d(2024, 2, 28), 1));
        assert_eq!(single.end_date, d(2024, 2, 28));
        assert_eq!(single.rebate_days(), 1);
    }

    #[test]
    fn test_inverted_range_rejected() {
        assert!(DateRange::new(d(2024, 1, 5), d(2024, 1, 4)).is_none());
    }

    #[test]
    fn test_adjacent_ranges_do_not_overlap() {
        let a = DateRange::new(d(2024, 1, 1), d(2024, 1, 5)).unwrap();
        let b = DateRange::new(d(2024, 1, 6), d(2024, 1, 10)).unwrap();
        assert!(!a.overlaps(&b));
        assert_eq!(a.shared_days(&b), 0);

        let c = DateRange::new(d(2024, 1, 5), d(2024, 1, 7)).unwrap();
        assert!(a.overlaps(&c));
        assert_eq!(a.shared_days(&c), 1);
    }
}
