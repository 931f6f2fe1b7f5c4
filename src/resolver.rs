// 🧹 Conflict Resolver - remove overlapping rebates from the store
//
// Which side of a pair goes is a policy choice. The historical behaviour
// (and the default) treats any overlap as invalid data and drops both.

use crate::error::{RebateError, Result};
use crate::model::{DateRange, IntervalKey};
use crate::overlap::{OverlapDetector, OverlapPair};
use crate::store::IntervalStore;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

// ============================================================================
// RESOLUTION POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Delete both rebates of every overlapping pair
    #[default]
    DeleteBoth,

    /// Walk each student's rebates by start date and keep every one that
    /// does not overlap an earlier kept rebate
    KeepEarliest,

    /// Same walk from the latest start backwards
    KeepLatest,
}

impl ResolutionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionPolicy::DeleteBoth => "delete_both",
            ResolutionPolicy::KeepEarliest => "keep_earliest",
            ResolutionPolicy::KeepLatest => "keep_latest",
        }
    }

    /// Rebates to drop from one student's conflicting set, sorted by (start, end).
    ///
    /// The keep policies sweep greedily: a rebate is only dropped when it
    /// overlaps one that is being kept.
    fn victims(&self, ranges: &BTreeSet<DateRange>) -> Vec<DateRange> {
        let mut dropped = Vec::new();
        match self {
            ResolutionPolicy::DeleteBoth => dropped.extend(ranges.iter().copied()),
            ResolutionPolicy::KeepEarliest => {
                // end of the last kept rebate
                let mut reach: Option<NaiveDate> = None;
                for range in ranges {
                    match reach {
                        Some(end) if range.start <= end => dropped.push(*range),
                        _ => reach = Some(range.end),
                    }
                }
            }
            ResolutionPolicy::KeepLatest => {
                // start of the earliest kept rebate
                let mut floor: Option<NaiveDate> = None;
                for range in ranges.iter().rev() {
                    match floor {
                        Some(start) if range.end >= start => dropped.push(*range),
                        _ => floor = Some(range.start),
                    }
                }
            }
        }
        dropped
    }
}

impl fmt::Display for ResolutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionPolicy {
    type Err = RebateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "delete_both" => Ok(ResolutionPolicy::DeleteBoth),
            "keep_earliest" => Ok(ResolutionPolicy::KeepEarliest),
            "keep_latest" => Ok(ResolutionPolicy::KeepLatest),
            other => Err(RebateError::InvalidConfig(format!(
                "unknown resolution policy '{}' (expected delete_both, keep_earliest or keep_latest)",
                other
            ))),
        }
    }
}

// ============================================================================
// CONFLICT RESOLVER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    pub policy: ResolutionPolicy,
}

impl ConflictResolver {
    pub fn new(policy: ResolutionPolicy) -> Self {
        ConflictResolver { policy }
    }

    /// Keys this policy would delete, de-duplicated and sorted
    pub fn plan(&self, pairs: &[OverlapPair]) -> Vec<IntervalKey> {
        let mut conflicting: BTreeMap<&str, BTreeSet<DateRange>> = BTreeMap::new();
        for pair in pairs {
            let ranges = conflicting.entry(pair.roll_no.as_str()).or_default();
            ranges.insert(pair.first);
            ranges.insert(pair.second);
        }

        conflicting
            .into_iter()
            .flat_map(|(roll_no, ranges)| {
                self.policy
                    .victims(&ranges)
                    .into_iter()
                    .map(move |range| IntervalKey::new(roll_no, range.start))
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Delete the planned rebates; returns how many were removed.
    ///
    /// The removed count has to match the plan, otherwise the conflict is
    /// half-resolved and reported as `ResolutionMismatch`.
    pub fn resolve<S: IntervalStore>(&self, store: &mut S, pairs: &[OverlapPair]) -> Result<usize> {
        let keys = self.plan(pairs);
        if keys.is_empty() {
            return Ok(0);
        }

        let deleted = store.bulk_delete(&keys)?;
        if deleted != keys.len() {
            warn!(
                requested = keys.len(),
                deleted,
                policy = %self.policy,
                "conflict deletion did not reconcile"
            );
            return Err(RebateError::ResolutionMismatch {
                requested: keys.len(),
                deleted,
            });
        }

        info!(pairs = pairs.len(), deleted, policy = %self.policy, "overlapping rebates removed");
        Ok(deleted)
    }
}

/// Detect overlaps across the whole store
pub fn scan_store<S: IntervalStore>(store: &S) -> Result<Vec<OverlapPair>> {
    let intervals = store.list_all_intervals()?;
    let pairs = OverlapDetector::new().find_all_overlaps(&intervals);
    info!(rebates = intervals.len(), pairs = pairs.len(), "overlap scan finished");
    Ok(pairs)
}
