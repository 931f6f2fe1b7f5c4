// 🔍 Overlap Detector - find rebates of the same student whose dates intersect
//
// Works per student: intervals are grouped by roll_no and only compared
// within their group. Output is sorted by (roll_no, start dates) so repeated
// runs over the same data report pairs in the same order.

use crate::model::{DateRange, IntervalKey, RebateInterval};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// OVERLAP KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlapKind {
    /// Both rebates start on the same day
    SameStart,

    /// The earlier rebate covers the later one completely
    Contains,

    /// The later rebate starts inside the earlier one and runs past its end
    Partial,
}

impl OverlapKind {
    fn classify(first: &DateRange, second: &DateRange) -> Self {
        if first.start == second.start {
            OverlapKind::SameStart
        } else if first.contains_range(second) {
            OverlapKind::Contains
        } else {
            OverlapKind::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OverlapKind::SameStart => "same start",
            OverlapKind::Contains => "contains",
            OverlapKind::Partial => "partial",
        }
    }
}

// ============================================================================
// OVERLAP PAIR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlapPair {
    pub roll_no: String,

    /// The rebate that starts first
    pub first: DateRange,

    /// The rebate that starts later (or on the same day)
    pub second: DateRange,

    pub kind: OverlapKind,

    /// Days covered by both rebates
    pub shared_days: i64,
}

impl OverlapPair {
    pub fn first_key(&self) -> IntervalKey {
        IntervalKey::new(self.roll_no.clone(), self.first.start)
    }

    pub fn second_key(&self) -> IntervalKey {
        IntervalKey::new(self.roll_no.clone(), self.second.start)
    }
}

impl fmt::Display for OverlapPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: [{}] overlaps [{}] ({}, {} shared days)",
            self.roll_no,
            self.first,
            self.second,
            self.kind.as_str(),
            self.shared_days
        )
    }
}

// ============================================================================
// OVERLAP DETECTOR
// ============================================================================

#[derive(Debug, Default)]
pub struct OverlapDetector;

impl OverlapDetector {
    pub fn new() -> Self {
        OverlapDetector
    }

    /// All overlapping pairs among one student's rebates.
    ///
    /// Input order does not matter. Every pair is reported, not only
    /// neighbours, since one long rebate can cover several later ones.
    pub fn find_overlaps(&self, intervals: &[RebateInterval]) -> Vec<OverlapPair> {
        let mut sorted: Vec<&RebateInterval> = intervals.iter().collect();
        sorted.sort_by(|a, b| (a.start_date, a.end_date).cmp(&(b.start_date, b.end_date)));

        let mut pairs = Vec::new();
        for (i, earlier) in sorted.iter().enumerate() {
            for later in &sorted[i + 1..] {
                // Sorted by start: nothing further right can reach back
                if later.start_date > earlier.end_date {
                    break;
                }

                let first = earlier.range();
                let second = later.range();
                pairs.push(OverlapPair {
                    roll_no: earlier.roll_no.clone(),
                    first,
                    second,
                    kind: OverlapKind::classify(&first, &second),
                    shared_days: first.shared_days(&second),
                });
            }
        }

        pairs
    }

    /// Group the whole record set by roll_no and detect per student
    pub fn find_all_overlaps(&self, intervals: &[RebateInterval]) -> Vec<OverlapPair> {
        let mut by_student: BTreeMap<&str, Vec<RebateInterval>> = BTreeMap::new();
        for interval in intervals {
            by_student
                .entry(interval.roll_no.as_str())
                .or_default()
                .push(interval.clone());
        }

        by_student
            .values()
            .flat_map(|group| self.find_overlaps(group))
            .collect()
    }
}
