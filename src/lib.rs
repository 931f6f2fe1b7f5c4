// Mess Rebate System - Core Library
// Rebate storage, overlap cleanup, synthetic data and gate pass allocation

pub mod error;
pub mod model;
pub mod store;
pub mod db;
pub mod chunked;
pub mod overlap;        // Overlap detection per student
pub mod resolver;       // Conflict resolution policies
pub mod generator;      // Synthetic rebate generation
pub mod codes;          // Gate pass code allocation
pub mod roster;         // Student roster CSV import
pub mod cleanup;        // Future-dated rebate removal
pub mod config;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use error::{RebateError, Result};
pub use model::{DateRange, IntervalKey, RebateInterval, Student};
pub use store::{CodeAssignment, IntervalFilter, IntervalStore};
pub use db::{setup_database, SqliteStore};
pub use chunked::{commit_in_chunks, ChunkProgress};
pub use overlap::{OverlapDetector, OverlapKind, OverlapPair};
pub use resolver::{scan_store, ConflictResolver, ResolutionPolicy};
pub use generator::{
    seed_store, BatchWindow, FrequencyModel, GenerationParams, GenerationReport,
    SyntheticIntervalGenerator,
};
pub use codes::{
    allocate_missing_codes, Allocation, AllocationReport, AllocationSettings,
    CodeAllocator, CodeSpace,
};
pub use roster::{import_roster, import_roster_from_reader, ImportFailure, RosterReport};
pub use cleanup::FutureEntryCleanup;
pub use config::{CleanupSettings, CodeSettings, GenerationSettings, RebateConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
