// 🎫 Gate Pass Codes - allocate unique PREFIX-NNNN codes to rebates
//
// The code space is finite and enumerated prefix by prefix. Every code
// handed out is reserved in the allocator at once, so a code is never
// proposed twice in a run, and codes already in the store are never proposed.

use crate::chunked::commit_in_chunks;
use crate::error::{RebateError, Result};
use crate::model::IntervalKey;
use crate::store::{CodeAssignment, IntervalFilter, IntervalStore};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

// ============================================================================
// CODE SPACE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSpace {
    prefixes: Vec<char>,
    digits: u32,
    first_counter: u32,
}

impl CodeSpace {
    /// Counters run from 0 to 10^digits - 1 for every prefix
    pub fn new(prefixes: impl IntoIterator<Item = char>, digits: u32) -> Result<Self> {
        Self::with_first_counter(prefixes, digits, 0)
    }

    pub fn with_first_counter(
        prefixes: impl IntoIterator<Item = char>,
        digits: u32,
        first_counter: u32,
    ) -> Result<Self> {
        let prefixes: Vec<char> = prefixes.into_iter().collect();

        if prefixes.is_empty() {
            return Err(RebateError::InvalidConfig(
                "code space needs at least one prefix".to_string(),
            ));
        }
        let distinct: HashSet<char> = prefixes.iter().copied().collect();
        if distinct.len() != prefixes.len() {
            return Err(RebateError::InvalidConfig(
                "code prefixes must not repeat".to_string(),
            ));
        }
        if let Some(bad) = prefixes.iter().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(RebateError::InvalidConfig(format!(
                "code prefix '{}' is not alphanumeric",
                bad
            )));
        }
        if !(1..=9).contains(&digits) {
            return Err(RebateError::InvalidConfig(format!(
                "code counter width must be 1-9 digits, got {}",
                digits
            )));
        }
        if u64::from(first_counter) >= 10u64.pow(digits) {
            return Err(RebateError::InvalidConfig(format!(
                "first counter {} does not fit in {} digits",
                first_counter, digits
            )));
        }

        Ok(CodeSpace {
            prefixes,
            digits,
            first_counter,
        })
    }

    /// A-Z with counters 0001-9999
    pub fn gate_pass() -> Self {
        CodeSpace {
            prefixes: ('A'..='Z').collect(),
            digits: 4,
            first_counter: 1,
        }
    }

    pub fn prefixes(&self) -> &[char] {
        &self.prefixes
    }

    pub fn per_prefix(&self) -> usize {
        (10usize.pow(self.digits)) - self.first_counter as usize
    }

    pub fn capacity(&self) -> usize {
        self.prefixes.len() * self.per_prefix()
    }

    pub fn format(&self, prefix: char, counter: u32) -> String {
        format!("{}-{:0width$}", prefix, counter, width = self.digits as usize)
    }

    pub fn contains(&self, code: &str) -> bool {
        let Some((prefix, counter)) = code.split_once('-') else {
            return false;
        };
        let mut chars = prefix.chars();
        let (Some(p), None) = (chars.next(), chars.next()) else {
            return false;
        };
        counter.len() == self.digits as usize
            && self.prefixes.contains(&p)
            && counter
                .parse::<u32>()
                .map(|n| n >= self.first_counter)
                .unwrap_or(false)
    }

    /// Every code, walking `order` prefix by prefix
    pub fn candidates<'a>(&'a self, order: &'a [char]) -> impl Iterator<Item = String> + 'a {
        let last = 10u32.pow(self.digits);
        order
            .iter()
            .flat_map(move |&prefix| (self.first_counter..last).map(move |n| self.format(prefix, n)))
    }
}

// ============================================================================
// ALLOCATOR
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub assignments: Vec<CodeAssignment>,

    /// Records left without a code because the space ran out
    pub shortage: usize,
}

pub struct CodeAllocator {
    space: CodeSpace,

    /// Prefix walk order, fixed for the allocator's lifetime
    prefix_order: Vec<char>,

    /// Codes in the store plus codes handed out by this allocator
    used: HashSet<String>,

    rng: StdRng,
}

impl CodeAllocator {
    /// Prefixes walked in the space's own order
    pub fn new(space: CodeSpace, existing_codes: HashSet<String>) -> Self {
        let prefix_order = space.prefixes().to_vec();
        CodeAllocator {
            space,
            prefix_order,
            used: existing_codes,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Randomize prefix order for spread; `lead` (if any) is walked first
    pub fn shuffle_prefixes(mut self, lead: Option<char>) -> Self {
        self.prefix_order.shuffle(&mut self.rng);
        if let Some(lead) = lead {
            if let Some(pos) = self.prefix_order.iter().position(|&p| p == lead) {
                let prefix = self.prefix_order.remove(pos);
                self.prefix_order.insert(0, prefix);
            }
        }
        self
    }

    pub fn prefix_order(&self) -> &[char] {
        &self.prefix_order
    }

    /// Mark codes as taken (e.g. freshly loaded from the store)
    pub fn reserve(&mut self, codes: impl IntoIterator<Item = String>) {
        self.used.extend(codes);
    }

    pub fn is_used(&self, code: &str) -> bool {
        self.used.contains(code)
    }

    /// Pair each record with an unused code.
    ///
    /// Duplicate keys are assigned once. When the space runs out the
    /// remaining records are counted in `shortage` and left unassigned.
    pub fn allocate(&mut self, records: &[IntervalKey]) -> Allocation {
        let mut seen = HashSet::new();
        let targets: Vec<&IntervalKey> = records.iter().filter(|k| seen.insert(*k)).collect();

        let mut candidates: Vec<String> = self
            .space
            .candidates(&self.prefix_order)
            .filter(|code| !self.used.contains(code))
            .take(targets.len())
            .collect();
        candidates.shuffle(&mut self.rng);

        let shortage = targets.len() - candidates.len();
        if shortage > 0 {
            warn!(
                needed = targets.len(),
                available = candidates.len(),
                shortage,
                capacity = self.space.capacity(),
                "gate pass code space exhausted"
            );
        }

        let mut assignments = Vec::with_capacity(candidates.len());
        for (key, code) in targets.into_iter().zip(candidates) {
            self.used.insert(code.clone());
            assignments.push(CodeAssignment {
                key: key.clone(),
                code,
            });
        }

        Allocation {
            assignments,
            shortage,
        }
    }
}

// ============================================================================
// ALLOCATION RUN (store-driven, chunked, resumable)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationSettings {
    /// Assignments per committed chunk
    pub chunk_size: usize,

    /// Cap on records handled in one run (None = all missing)
    pub limit: Option<usize>,

    /// Switch on the mandatory-code constraint once nothing is missing
    pub enforce_mandatory: bool,
}

impl Default for AllocationSettings {
    fn default() -> Self {
        AllocationSettings {
            chunk_size: 100,
            limit: None,
            enforce_mandatory: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationReport {
    pub run_id: Uuid,
    pub missing_before: usize,
    pub selected: usize,
    pub assigned: usize,
    pub committed: usize,

    /// Assignments the store refused (row coded meanwhile, or code taken)
    pub rejected: usize,

    pub shortage: usize,
    pub remaining: usize,
    pub mandatory_enabled: bool,
}

impl AllocationReport {
    pub fn summary(&self) -> String {
        format!(
            "run {}: {} missing, {} selected, {} committed, {} rejected, {} short, {} still missing{}",
            self.run_id,
            self.missing_before,
            self.selected,
            self.committed,
            self.rejected,
            self.shortage,
            self.remaining,
            if self.mandatory_enabled {
                " (gate pass mandatory)"
            } else {
                ""
            }
        )
    }
}

/// Give every codeless rebate a gate pass number.
///
/// Safe to re-run after an interruption: coded rows are no longer listed as
/// missing, their codes are reserved, and each chunk commits on its own.
pub fn allocate_missing_codes<S: IntervalStore>(
    store: &mut S,
    allocator: &mut CodeAllocator,
    settings: &AllocationSettings,
) -> Result<AllocationReport> {
    let run_id = Uuid::new_v4();
    let missing_before = store.count_where(&IntervalFilter::MissingCode)?;
    info!(%run_id, missing = missing_before, "starting gate pass allocation");

    let mut report = AllocationReport {
        run_id,
        missing_before,
        selected: 0,
        assigned: 0,
        committed: 0,
        rejected: 0,
        shortage: 0,
        remaining: missing_before,
        mandatory_enabled: false,
    };

    if missing_before > 0 {
        let limit = settings.limit.unwrap_or(missing_before);
        let keys = store.list_missing_code(limit)?;
        allocator.reserve(store.list_used_codes()?);

        let allocation = allocator.allocate(&keys);
        report.selected = keys.len();
        report.assigned = allocation.assignments.len();
        report.shortage = allocation.shortage;

        let progress = commit_in_chunks(
            &allocation.assignments,
            settings.chunk_size,
            "gate pass update",
            |chunk| store.assign_codes(chunk),
        )?;
        report.committed = progress.written;
        report.rejected = progress.submitted - progress.written;
        if report.rejected > 0 {
            warn!(%run_id, rejected = report.rejected, "some assignments were refused by the store");
        }

        report.remaining = store.count_where(&IntervalFilter::MissingCode)?;
    }

    if report.remaining == 0 && settings.enforce_mandatory {
        store.enable_mandatory_code()?;
    }
    report.mandatory_enabled = store.mandatory_code_enabled()?;

    info!(%run_id, committed = report.committed, remaining = report.remaining, "gate pass allocation finished");
    Ok(report)
}
