// 🗓️ Future-dated cleanup - drop rebates that start after a cutoff date

use crate::error::Result;
use crate::store::{IntervalFilter, IntervalStore};
use chrono::NaiveDate;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FutureEntryCleanup {
    /// Rebates starting strictly after this date are removed
    pub cutoff: NaiveDate,
}

impl FutureEntryCleanup {
    pub fn new(cutoff: NaiveDate) -> Self {
        FutureEntryCleanup { cutoff }
    }

    fn filter(&self) -> IntervalFilter {
        IntervalFilter::StartsAfter(self.cutoff)
    }

    /// How many rebates a purge would delete
    pub fn preview<S: IntervalStore>(&self, store: &S) -> Result<usize> {
        store.count_where(&self.filter())
    }

    pub fn purge<S: IntervalStore>(&self, store: &mut S) -> Result<usize> {
        let deleted = store.delete_where(&self.filter())?;
        info!(cutoff = %self.cutoff, deleted, "future-dated rebates removed");
        Ok(deleted)
    }
}
