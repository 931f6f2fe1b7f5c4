// ⚙️ Configuration - JSON settings for every pipeline stage
//
// Every field has a default, so an empty `{}` file (or no file at all) gives
// the production setup.

use crate::codes::{AllocationSettings, CodeSpace};
use crate::error::{RebateError, Result};
use crate::generator::{BatchWindow, FrequencyModel, GenerationParams};
use crate::resolver::ResolutionPolicy;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub target_volume: usize,
    pub shape: f64,
    pub zero_fraction: f64,
    pub max_per_student: usize,
    pub min_days: u32,
    pub max_days: u32,
    pub retry_multiplier: usize,

    /// Rebates per insert transaction
    pub insert_chunk_size: usize,

    /// Fixed RNG seed for reproducible data sets
    pub seed: Option<u64>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        let params = GenerationParams::default();
        GenerationSettings {
            target_volume: params.target_volume,
            shape: params.frequency.shape,
            zero_fraction: params.frequency.zero_fraction,
            max_per_student: params.frequency.max_per_student,
            min_days: params.min_days,
            max_days: params.max_days,
            retry_multiplier: params.retry_multiplier,
            insert_chunk_size: 1000,
            seed: None,
        }
    }
}

impl GenerationSettings {
    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            target_volume: self.target_volume,
            frequency: FrequencyModel {
                shape: self.shape,
                zero_fraction: self.zero_fraction,
                max_per_student: self.max_per_student,
            },
            min_days: self.min_days,
            max_days: self.max_days,
            retry_multiplier: self.retry_multiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeSettings {
    /// One character per prefix, e.g. "ABCDEFGHIJKLMNOPQRSTUVWXYZ"
    pub prefixes: String,
    pub digits: u32,
    pub first_counter: u32,

    /// Prefix walked first; the rest are shuffled
    pub lead_prefix: Option<char>,

    pub chunk_size: usize,
    pub limit: Option<usize>,
    pub enforce_mandatory: bool,
    pub seed: Option<u64>,
}

impl Default for CodeSettings {
    fn default() -> Self {
        let allocation = AllocationSettings::default();
        CodeSettings {
            prefixes: ('A'..='Z').collect(),
            digits: 4,
            first_counter: 1,
            lead_prefix: Some('B'),
            chunk_size: allocation.chunk_size,
            limit: allocation.limit,
            enforce_mandatory: allocation.enforce_mandatory,
            seed: None,
        }
    }
}

impl CodeSettings {
    pub fn space(&self) -> Result<CodeSpace> {
        CodeSpace::with_first_counter(self.prefixes.chars(), self.digits, self.first_counter)
    }

    pub fn allocation(&self) -> AllocationSettings {
        AllocationSettings {
            chunk_size: self.chunk_size,
            limit: self.limit,
            enforce_mandatory: self.enforce_mandatory,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSettings {
    pub cutoff: NaiveDate,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        CleanupSettings {
            cutoff: ymd(2025, 4, 30),
        }
    }
}

// ============================================================================
// REBATE CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebateConfig {
    pub database: PathBuf,

    /// Batch year -> eligible dates `[start, end)`
    pub batch_windows: BTreeMap<i32, BatchWindow>,

    pub generation: GenerationSettings,
    pub codes: CodeSettings,
    pub cleanup: CleanupSettings,
    pub resolution_policy: ResolutionPolicy,
}

impl Default for RebateConfig {
    fn default() -> Self {
        let until = ymd(2025, 12, 31);
        let batch_windows = [
            (2022, ymd(2022, 12, 1)),
            (2023, ymd(2023, 11, 1)),
            (2024, ymd(2024, 11, 1)),
        ]
        .into_iter()
        .map(|(batch, start)| (batch, BatchWindow { start, end: until }))
        .collect();

        RebateConfig {
            database: PathBuf::from("mess_rebate.db"),
            batch_windows,
            generation: GenerationSettings::default(),
            codes: CodeSettings::default(),
            cleanup: CleanupSettings::default(),
            resolution_policy: ResolutionPolicy::default(),
        }
    }
}

impl RebateConfig {
    /// Load and validate a JSON config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: RebateConfig = serde_json::from_str(&content)?;
        config.validate()?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (batch, window) in &self.batch_windows {
            if window.end <= window.start {
                return Err(RebateError::InvalidConfig(format!(
                    "batch {} window {}..{} is empty",
                    batch, window.start, window.end
                )));
            }
        }

        self.generation.params().validate()?;
        if self.generation.insert_chunk_size == 0 || self.codes.chunk_size == 0 {
            return Err(RebateError::InvalidConfig(
                "chunk sizes must be at least 1".to_string(),
            ));
        }

        let space = self.codes.space()?;
        if let Some(lead) = self.codes.lead_prefix {
            if !space.prefixes().contains(&lead) {
                return Err(RebateError::InvalidConfig(format!(
                    "lead prefix '{}' is not in the prefix alphabet",
                    lead
                )));
            }
        }
        Ok(())
    }
}
