// 🗄️ IntervalStore - the contract every pipeline reads and writes through
//
// One call == one atomic unit. Mutating calls either apply fully or not at
// all, which is what lets callers chunk large writes safely.

use crate::error::Result;
use crate::model::{IntervalKey, RebateInterval};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Row selector for counting and bulk deletion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IntervalFilter {
    All,
    MissingCode,
    HasCode,
    /// start_date strictly after the given date
    StartsAfter(NaiveDate),
    RollNo(String),
}

/// A gate pass code proposed for one rebate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeAssignment {
    pub key: IntervalKey,
    pub code: String,
}

pub trait IntervalStore {
    /// All rebates for one student, ordered by start_date
    fn list_intervals(&self, roll_no: &str) -> Result<Vec<RebateInterval>>;

    /// Every rebate, ordered by (roll_no, start_date)
    fn list_all_intervals(&self) -> Result<Vec<RebateInterval>>;

    /// batch -> roll numbers, both sorted; students without a batch are left out
    fn roll_nos_by_batch(&self) -> Result<BTreeMap<i32, Vec<String>>>;

    /// Duplicate (roll_no, start_date) keys are ignored, not errors
    fn bulk_insert(&mut self, intervals: &[RebateInterval]) -> Result<usize>;

    fn bulk_delete(&mut self, keys: &[IntervalKey]) -> Result<usize>;

    fn list_missing_code(&self, limit: usize) -> Result<Vec<IntervalKey>>;

    fn list_used_codes(&self) -> Result<HashSet<String>>;

    /// Only rows whose code is still unset are updated
    fn assign_codes(&mut self, assignments: &[CodeAssignment]) -> Result<usize>;

    fn count_where(&self, filter: &IntervalFilter) -> Result<usize>;

    fn delete_where(&mut self, filter: &IntervalFilter) -> Result<usize>;

    fn mandatory_code_enabled(&self) -> Result<bool>;

    /// One-way switch: every future rebate must carry a code.
    /// Refused while any rebate still lacks one. Returns false if already on.
    fn enable_mandatory_code(&mut self) -> Result<bool>;
}
