// Store wrapper with injectable faults, shared by pipeline tests

use crate::db::SqliteStore;
use crate::error::{RebateError, Result};
use crate::model::{IntervalKey, RebateInterval};
use crate::store::{CodeAssignment, IntervalFilter, IntervalStore};
use std::collections::{BTreeMap, HashSet};

pub struct FaultyStore {
    pub inner: SqliteStore,

    /// Fail the n-th call (1-based) to assign_codes
    pub fail_assign_on_call: Option<usize>,

    /// Silently skip the last key of every bulk_delete
    pub drop_last_delete: bool,

    assign_calls: usize,
}

impl FaultyStore {
    pub fn new(inner: SqliteStore) -> Self {
        FaultyStore {
            inner,
            fail_assign_on_call: None,
            drop_last_delete: false,
            assign_calls: 0,
        }
    }

    pub fn into_inner(self) -> SqliteStore {
        self.inner
    }
}

impl IntervalStore for FaultyStore {
    fn list_intervals(&self, roll_no: &str) -> Result<Vec<RebateInterval>> {
        self.inner.list_intervals(roll_no)
    }

    fn list_all_intervals(&self) -> Result<Vec<RebateInterval>> {
        self.inner.list_all_intervals()
    }

    fn roll_nos_by_batch(&self) -> Result<BTreeMap<i32, Vec<String>>> {
        self.inner.roll_nos_by_batch()
    }

    fn bulk_insert(&mut self, intervals: &[RebateInterval]) -> Result<usize> {
        self.inner.bulk_insert(intervals)
    }

    fn bulk_delete(&mut self, keys: &[IntervalKey]) -> Result<usize> {
        if self.drop_last_delete {
            return self.inner.bulk_delete(&keys[..keys.len().saturating_sub(1)]);
        }
        self.inner.bulk_delete(keys)
    }

    fn list_missing_code(&self, limit: usize) -> Result<Vec<IntervalKey>> {
        self.inner.list_missing_code(limit)
    }

    fn list_used_codes(&self) -> Result<HashSet<String>> {
        self.inner.list_used_codes()
    }

    fn assign_codes(&mut self, assignments: &[CodeAssignment]) -> Result<usize> {
        self.assign_calls += 1;
        if self.fail_assign_on_call == Some(self.assign_calls) {
            return Err(RebateError::Io(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "operator interrupt",
            )));
        }
        self.inner.assign_codes(assignments)
    }

    fn count_where(&self, filter: &IntervalFilter) -> Result<usize> {
        self.inner.count_where(filter)
    }

    fn delete_where(&mut self, filter: &IntervalFilter) -> Result<usize> {
        self.inner.delete_where(filter)
    }

    fn mandatory_code_enabled(&self) -> Result<bool> {
        self.inner.mandatory_code_enabled()
    }

    fn enable_mandatory_code(&mut self) -> Result<bool> {
        self.inner.enable_mandatory_code()
    }
}
