// 🎲 Synthetic Interval Generator - seed realistic rebate data
//
// Per-student counts follow a heavy-tailed (Lomax / Pareto II) distribution:
// a few students take many rebates, most take few, some take none.
// Non-overlap is enforced while placing intervals, never repaired afterwards.

use crate::chunked::commit_in_chunks;
use crate::error::{RebateError, Result};
use crate::model::{DateRange, IntervalKey, RebateInterval};
use crate::store::IntervalStore;
use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

// ============================================================================
// BATCH WINDOW
// ============================================================================

/// Eligible dates for one batch: `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BatchWindow {
    /// Returns None for an empty window
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        if end <= start {
            return None;
        }
        Some(BatchWindow { start, end })
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Last eligible day (end is exclusive)
    pub fn last_day(&self) -> NaiveDate {
        self.end - Duration::days(1)
    }

    pub fn contains(&self, range: &DateRange) -> bool {
        range.start >= self.start && range.end < self.end
    }
}

// ============================================================================
// PARAMETERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyModel {
    /// Pareto shape; lower = more skewed
    pub shape: f64,

    /// Share of students who get no rebates at all
    pub zero_fraction: f64,

    pub max_per_student: usize,
}

impl Default for FrequencyModel {
    fn default() -> Self {
        FrequencyModel {
            shape: 1.5,
            zero_fraction: 0.1,
            max_per_student: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Total rebates aimed for across all students
    pub target_volume: usize,

    pub frequency: FrequencyModel,

    /// Rebate length bounds in days, inclusive
    pub min_days: u32,
    pub max_days: u32,

    /// Placement attempts per student = target * retry_multiplier
    pub retry_multiplier: usize,
}

impl Default for GenerationParams {
    fn default() -> Self {
        GenerationParams {
            target_volume: 10_000,
            frequency: FrequencyModel::default(),
            min_days: 1,
            max_days: 30,
            retry_multiplier: 3,
        }
    }
}

impl GenerationParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.frequency.shape > 0.0) {
            return Err(RebateError::InvalidConfig(
                "frequency shape must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.frequency.zero_fraction) {
            return Err(RebateError::InvalidConfig(
                "zero_fraction must be between 0 and 1".to_string(),
            ));
        }
        if self.min_days == 0 || self.max_days < self.min_days {
            return Err(RebateError::InvalidConfig(format!(
                "invalid rebate length bounds {}..={}",
                self.min_days, self.max_days
            )));
        }
        if self.retry_multiplier == 0 {
            return Err(RebateError::InvalidConfig(
                "retry_multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    /// Students with a configured batch window
    pub students: usize,

    /// Students skipped because their batch has no window
    pub students_without_window: usize,

    /// Students planned to receive nothing
    pub students_planned_zero: usize,

    pub requested: usize,
    pub generated: usize,

    /// Students whose retry budget ran out before their target
    pub short_students: usize,

    /// Rows actually written (duplicates ignored by the store)
    pub inserted: usize,
}

impl GenerationReport {
    pub fn shortfall(&self) -> usize {
        self.requested.saturating_sub(self.generated)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} students ({} without window, {} planned zero): requested {}, generated {}, inserted {}, {} students short by {} in total",
            self.students,
            self.students_without_window,
            self.students_planned_zero,
            self.requested,
            self.generated,
            self.inserted,
            self.short_students,
            self.shortfall()
        )
    }
}

// ============================================================================
// GENERATOR
// ============================================================================

pub struct SyntheticIntervalGenerator {
    params: GenerationParams,
    windows: BTreeMap<i32, BatchWindow>,
    rng: StdRng,

    /// (roll_no, start_date) keys produced by this generator so far
    seen: HashSet<IntervalKey>,
}

impl SyntheticIntervalGenerator {
    pub fn new(params: GenerationParams, windows: BTreeMap<i32, BatchWindow>) -> Result<Self> {
        Self::build(params, windows, StdRng::from_entropy())
    }

    /// Deterministic generator for reproducible runs
    pub fn with_seed(params: GenerationParams, windows: BTreeMap<i32, BatchWindow>, seed: u64) -> Result<Self> {
        Self::build(params, windows, StdRng::seed_from_u64(seed))
    }

    fn build(params: GenerationParams, windows: BTreeMap<i32, BatchWindow>, rng: StdRng) -> Result<Self> {
        params.validate()?;
        if let Some((batch, window)) = windows.iter().find(|(_, w)| w.end <= w.start) {
            return Err(RebateError::InvalidConfig(format!(
                "batch {} window {}..{} is empty",
                batch, window.start, window.end
            )));
        }
        Ok(SyntheticIntervalGenerator {
            params,
            windows,
            rng,
            seen: HashSet::new(),
        })
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// Per-student rebate counts for `students` students.
    ///
    /// Weights are Lomax samples, a `zero_fraction` of students is forced to
    /// zero, and the rest are scaled so the total approaches `target_volume`.
    pub fn plan_frequencies(&mut self, students: usize) -> Vec<usize> {
        if students == 0 {
            return Vec::new();
        }

        let model = self.params.frequency.clone();
        let mut weights: Vec<f64> = (0..students)
            .map(|_| {
                let u: f64 = self.rng.gen();
                (1.0 - u).powf(-1.0 / model.shape) - 1.0
            })
            .collect();

        let zero_count = ((students as f64) * model.zero_fraction).floor() as usize;
        for index in rand::seq::index::sample(&mut self.rng, students, zero_count.min(students)) {
            weights[index] = 0.0;
        }

        let total: f64 = weights.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return vec![0; students];
        }

        let scale = self.params.target_volume as f64 / total;
        weights
            .iter()
            .map(|w| ((w * scale).floor() as usize).min(model.max_per_student))
            .collect()
    }

    /// Generate rebates for every student in `roster` (batch -> roll numbers).
    ///
    /// `existing` holds rebates already in the store; new ones never overlap
    /// them. Nothing is persisted here.
    pub fn generate(
        &mut self,
        roster: &BTreeMap<i32, Vec<String>>,
        existing: &[RebateInterval],
    ) -> (Vec<RebateInterval>, GenerationReport) {
        let mut report = GenerationReport::default();

        let mut existing_by_student: HashMap<&str, Vec<DateRange>> = HashMap::new();
        for interval in existing {
            existing_by_student
                .entry(interval.roll_no.as_str())
                .or_default()
                .push(interval.range());
        }

        let mut eligible: Vec<(&str, BatchWindow)> = Vec::new();
        for (batch, roll_nos) in roster {
            match self.windows.get(batch) {
                Some(window) => {
                    eligible.extend(roll_nos.iter().map(|r| (r.as_str(), *window)));
                }
                None => {
                    debug!(batch, students = roll_nos.len(), "no rebate window for batch");
                    report.students_without_window += roll_nos.len();
                }
            }
        }
        report.students = eligible.len();

        let targets = self.plan_frequencies(eligible.len());
        let mut generated = Vec::new();

        for ((roll_no, window), target) in eligible.into_iter().zip(targets) {
            if target == 0 {
                report.students_planned_zero += 1;
                continue;
            }
            report.requested += target;

            let taken = existing_by_student.get(roll_no).map(Vec::as_slice).unwrap_or(&[]);
            let placed = self.place_student(roll_no, &window, target, taken);
            if placed.len() < target {
                report.short_students += 1;
            }
            generated.extend(placed);
        }

        report.generated = generated.len();
        info!(
            students = report.students,
            requested = report.requested,
            generated = report.generated,
            short_students = report.short_students,
            "synthetic rebates generated"
        );
        (generated, report)
    }

    /// Place up to `target` rebates for one student inside `window`.
    ///
    /// Gives up after `target * retry_multiplier` draws; a short result is
    /// not an error.
    pub fn place_student(
        &mut self,
        roll_no: &str,
        window: &BatchWindow,
        target: usize,
        taken: &[DateRange],
    ) -> Vec<RebateInterval> {
        let mut occupied: Vec<DateRange> = taken.to_vec();
        let mut placed = Vec::new();
        let budget = target.saturating_mul(self.params.retry_multiplier);

        for _ in 0..budget {
            if placed.len() >= target {
                break;
            }

            let candidate = self.draw_range(window);
            let key = IntervalKey::new(roll_no, candidate.start);
            if self.seen.contains(&key) {
                continue;
            }
            if occupied.iter().any(|r| r.overlaps(&candidate)) {
                continue;
            }

            self.seen.insert(key);
            occupied.push(candidate);
            placed.push(RebateInterval::new(roll_no, candidate));
        }

        if placed.len() < target {
            debug!(roll_no, target, placed = placed.len(), "retry budget exhausted");
        }
        placed
    }

    fn draw_range(&mut self, window: &BatchWindow) -> DateRange {
        let offset = self.rng.gen_range(0..window.days());
        let start = window.start + Duration::days(offset);
        let days = self.rng.gen_range(self.params.min_days..=self.params.max_days);

        let mut range = DateRange::from_days(start, days);
        if range.end > window.last_day() {
            range.end = window.last_day();
        }
        range
    }
}

/// Generate against the store's roster and existing rebates, then insert in chunks
pub fn seed_store<S: IntervalStore>(
    store: &mut S,
    generator: &mut SyntheticIntervalGenerator,
    chunk_size: usize,
) -> Result<GenerationReport> {
    let roster = store.roll_nos_by_batch()?;
    let existing = store.list_all_intervals()?;

    let (intervals, mut report) = generator.generate(&roster, &existing);
    let progress = commit_in_chunks(&intervals, chunk_size, "rebate insert", |chunk| {
        store.bulk_insert(chunk)
    })?;

    report.inserted = progress.written;
    info!(inserted = report.inserted, chunks = progress.chunks, "synthetic rebates stored");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::model::Student;
    use crate::overlap::OverlapDetector;
    use crate::resolver::scan_store;
    use crate::store::IntervalFilter;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn windows() -> BTreeMap<i32, BatchWindow> {
        let mut windows = BTreeMap::new();
        windows.insert(2023, BatchWindow::new(d(2023, 11, 1), d(2024, 3, 1)).unwrap());
        windows.insert(2024, BatchWindow::new(d(2024, 11, 1), d(2025, 1, 1)).unwrap());
        windows
    }

    fn roster(per_batch: usize) -> BTreeMap<i32, Vec<String>> {
        let mut roster = BTreeMap::new();
        for batch in [2023, 2024] {
            let roll_nos = (0..per_batch).map(|i| format!("{}B{:03}", batch % 100, i)).collect();
            roster.insert(batch, roll_nos);
        }
        roster
    }

    fn params(target_volume: usize) -> GenerationParams {
        GenerationParams {
            target_volume,
            min_days: 1,
            max_days: 10,
            ..GenerationParams::default()
        }
    }

    #[test]
    fn test_generated_rebates_never_overlap_and_stay_in_window() {
        let mut generator = SyntheticIntervalGenerator::with_seed(params(400), windows(), 7).unwrap();
        let roster = roster(25);

        let (rebates, report) = generator.generate(&roster, &[]);

        assert!(!rebates.is_empty());
        assert_eq!(report.generated, rebates.len());
        assert!(OverlapDetector::new().find_all_overlaps(&rebates).is_empty());

        let windows = windows();
        for rebate in &rebates {
            let batch = if rebate.roll_no.starts_with("23") { 2023 } else { 2024 };
            assert!(
                windows[&batch].contains(&rebate.range()),
                "{} outside its batch window",
                rebate.key()
            );
            assert!(rebate.rebate_days() >= 1 && rebate.rebate_days() <= 10);
        }

        let keys: HashSet<IntervalKey> = rebates.iter().map(|r| r.key()).collect();
        assert_eq!(keys.len(), rebates.len(), "Keys must be unique within a run");
    }

    #[test]
    fn test_existing_rebates_are_respected() {
        let mut generator = SyntheticIntervalGenerator::with_seed(params(50), windows(), 11).unwrap();
        let window = windows()[&2024];
        let taken = vec![DateRange::new(d(2024, 11, 1), d(2024, 12, 20)).unwrap()];

        let placed = generator.place_student("24B000", &window, 5, &taken);

        for rebate in &placed {
            assert!(!rebate.range().overlaps(&taken[0]));
            assert!(rebate.start_date > d(2024, 12, 20));
        }
    }

    #[test]
    fn test_infeasible_student_gets_fewer_without_error() {
        let mut p = params(100);
        p.min_days = 2;
        p.max_days = 2;
        let mut generator = SyntheticIntervalGenerator::with_seed(p, windows(), 3).unwrap();
        let tiny = BatchWindow::new(d(2024, 1, 1), d(2024, 1, 4)).unwrap();

        let placed = generator.place_student("X1", &tiny, 10, &[]);

        assert!(!placed.is_empty());
        assert!(placed.len() <= 2);
        assert!(OverlapDetector::new().find_overlaps(&placed).is_empty());
        assert!(placed.iter().all(|r| tiny.contains(&r.range())));
    }

    #[test]
    fn test_frequencies_are_skewed() {
        let mut p = params(20_000);
        p.frequency = FrequencyModel {
            shape: 1.2,
            zero_fraction: 0.1,
            max_per_student: 10_000,
        };
        let mut generator = SyntheticIntervalGenerator::with_seed(p, windows(), 42).unwrap();

        let mut counts = generator.plan_frequencies(2000);
        counts.sort_unstable_by(|a, b| b.cmp(a));

        let total: usize = counts.iter().sum();
        let top_decile: usize = counts[..200].iter().sum();
        let zeros = counts.iter().filter(|&&c| c == 0).count();

        println!("total {}, top decile {}, zeros {}", total, top_decile, zeros);
        assert!(total > 0);
        assert!(top_decile * 2 > total, "Top 10% of students should hold most rebates");
        assert!(zeros >= 200, "At least the zero fraction receives nothing");
        assert!(total <= 20_000);
    }

    #[test]
    fn test_generated_output_is_skewed() {
        let mut p = params(10_000);
        p.min_days = 1;
        p.max_days = 1;
        p.frequency = FrequencyModel {
            shape: 1.1,
            zero_fraction: 0.1,
            max_per_student: 3000,
        };
        let mut wide = BTreeMap::new();
        wide.insert(2000, BatchWindow::new(d(2000, 1, 1), d(2020, 1, 1)).unwrap());
        let roll_nos: Vec<String> = (0..1000).map(|i| format!("00B{:04}", i)).collect();
        let mut roster = BTreeMap::new();
        roster.insert(2000, roll_nos);
        let mut generator = SyntheticIntervalGenerator::with_seed(p, wide, 42).unwrap();

        let (rebates, report) = generator.generate(&roster, &[]);

        let mut per_student: HashMap<&str, usize> = HashMap::new();
        for rebate in &rebates {
            *per_student.entry(rebate.roll_no.as_str()).or_default() += 1;
        }
        let mut counts: Vec<usize> = per_student.into_values().collect();
        counts.sort_unstable_by(|a, b| b.cmp(a));
        let top_decile: usize = counts.iter().take(100).sum();

        println!("generated {}, top decile {}, short {}", rebates.len(), top_decile, report.short_students);
        assert!(!rebates.is_empty());
        assert!(
            top_decile * 2 > rebates.len(),
            "Top 10% of students should hold most generated rebates"
        );
    }

    #[test]
    fn test_empty_window_rejected() {
        let mut empty = BTreeMap::new();
        empty.insert(2024, BatchWindow { start: d(2024, 6, 1), end: d(2024, 6, 1) });

        let result = SyntheticIntervalGenerator::with_seed(GenerationParams::default(), empty, 1);

        assert!(matches!(result, Err(RebateError::InvalidConfig(_))));
    }

    #[test]
    fn test_same_seed_same_output() {
        let roster = roster(10);
        let mut a = SyntheticIntervalGenerator::with_seed(params(100), windows(), 99).unwrap();
        let mut b = SyntheticIntervalGenerator::with_seed(params(100), windows(), 99).unwrap();

        assert_eq!(a.generate(&roster, &[]).0, b.generate(&roster, &[]).0);
    }

    #[test]
    fn test_batches_without_window_are_skipped() {
        let mut generator = SyntheticIntervalGenerator::with_seed(params(100), windows(), 5).unwrap();
        let mut roster = roster(5);
        roster.insert(2019, vec!["19B001".to_string(), "19B002".to_string()]);

        let (rebates, report) = generator.generate(&roster, &[]);

        assert_eq!(report.students, 10);
        assert_eq!(report.students_without_window, 2);
        assert!(rebates.iter().all(|r| !r.roll_no.starts_with("19")));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let mut p = params(10);
        p.min_days = 5;
        p.max_days = 2;
        assert!(SyntheticIntervalGenerator::new(p, windows()).is_err());

        let mut p = params(10);
        p.frequency.zero_fraction = 1.5;
        assert!(SyntheticIntervalGenerator::new(p, windows()).is_err());
    }

    #[test]
    fn test_seed_store_inserts_in_chunks() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        for (batch, roll_nos) in roster(20) {
            for roll_no in roll_nos {
                store
                    .insert_student(&Student {
                        roll_no: roll_no.clone(),
                        name: format!("Student {}", roll_no),
                        mobile_no: None,
                        email: None,
                        branch: None,
                        batch: Some(batch),
                    })
                    .unwrap();
            }
        }

        let mut generator = SyntheticIntervalGenerator::with_seed(params(300), windows(), 21).unwrap();
        let report = seed_store(&mut store, &mut generator, 17).unwrap();

        println!("{}", report.summary());
        assert_eq!(report.inserted, report.generated);
        assert_eq!(store.count_where(&IntervalFilter::All).unwrap(), report.generated);
        assert!(scan_store(&store).unwrap().is_empty());

        // A second run keeps the store overlap-free
        let mut again = SyntheticIntervalGenerator::with_seed(params(300), windows(), 22).unwrap();
        let second = seed_store(&mut store, &mut again, 17).unwrap();
        assert_eq!(
            store.count_where(&IntervalFilter::All).unwrap(),
            report.generated + second.inserted
        );
        assert!(scan_store(&store).unwrap().is_empty());
    }
}
