use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use mess_rebate::{
    allocate_missing_codes, import_roster, scan_store, seed_store, CodeAllocator,
    ConflictResolver, FutureEntryCleanup, IntervalFilter, IntervalStore, RebateConfig,
    ResolutionPolicy, SqliteStore, SyntheticIntervalGenerator,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

#[derive(Parser)]
#[command(name = "mess-rebate", version, about = "Mess rebate data maintenance")]
struct Cli {
    /// JSON config file (defaults are used when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database, overrides the config file
    #[arg(long, global = true, env = "MESS_REBATE_DB")]
    db: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Skip confirmation prompts
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load students from a roster CSV
    ImportRoster { csv: PathBuf },

    /// Fill the rebate table with synthetic, non-overlapping rebates
    Generate {
        /// Total rebates to aim for
        #[arg(long)]
        target: Option<usize>,

        /// RNG seed for a reproducible run
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Find overlapping rebates and remove them
    CheckOverlaps {
        #[arg(long)]
        policy: Option<ResolutionPolicy>,

        /// Only list the overlaps
        #[arg(long)]
        dry_run: bool,
    },

    /// Give every rebate without a gate pass number a unique code
    AllocateCodes {
        /// Records handled in this run
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete rebates starting after the cutoff date
    RemoveFuture {
        /// YYYY-MM-DD
        #[arg(long)]
        cutoff: Option<NaiveDate>,
    },

    /// Show table totals
    Stats,
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

fn confirm(message: &str, yes_flag: bool) -> Result<bool> {
    if yes_flag {
        return Ok(true);
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .context("Failed to read confirmation")?;
    Ok(confirmed)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => RebateConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {:?}", path))?,
        None => RebateConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.database = db.clone();
    }

    let mut store = SqliteStore::open(&config.database)
        .with_context(|| format!("Failed to open database: {:?}", config.database))?;

    match cli.command {
        Command::ImportRoster { csv } => run_import_roster(&store, &csv),
        Command::Generate { target, seed } => run_generate(&mut store, &config, target, seed),
        Command::CheckOverlaps { policy, dry_run } => {
            let policy = policy.unwrap_or(config.resolution_policy);
            run_check_overlaps(&mut store, policy, dry_run, cli.yes)
        }
        Command::AllocateCodes { limit } => run_allocate_codes(&mut store, &config, limit, cli.yes),
        Command::RemoveFuture { cutoff } => {
            let cutoff = cutoff.unwrap_or(config.cleanup.cutoff);
            run_remove_future(&mut store, cutoff, cli.yes)
        }
        Command::Stats => run_stats(&store),
    }
}

fn run_import_roster(store: &SqliteStore, csv: &Path) -> Result<()> {
    println!("👥 Roster Import - CSV → SQLite");
    println!("{}", RULE);

    let report = import_roster(store, csv)
        .with_context(|| format!("Failed to import roster: {:?}", csv))?;

    for failure in &report.failures {
        println!(
            "  ⚠️  line {} ({}): {}",
            failure.line,
            failure.roll_no.as_deref().unwrap_or("-"),
            failure.reason
        );
    }
    if !report.skipped.is_empty() {
        println!("  ↪ {} roll numbers already present", report.skipped.len());
    }

    println!("{}", RULE);
    println!("✓ {}", report.summary());
    Ok(())
}

fn run_generate(
    store: &mut SqliteStore,
    config: &RebateConfig,
    target: Option<usize>,
    seed: Option<u64>,
) -> Result<()> {
    println!("🎲 Synthetic Rebates");
    println!("{}", RULE);

    let mut settings = config.generation.clone();
    if let Some(target) = target {
        settings.target_volume = target;
    }
    let windows = config.batch_windows.clone();
    let mut generator = match seed.or(settings.seed) {
        Some(seed) => SyntheticIntervalGenerator::with_seed(settings.params(), windows, seed)?,
        None => SyntheticIntervalGenerator::new(settings.params(), windows)?,
    };

    let report = seed_store(store, &mut generator, settings.insert_chunk_size)?;

    if report.students == 0 {
        println!("Nothing to do: no students with a configured batch window");
        return Ok(());
    }
    if report.students_without_window > 0 {
        println!(
            "  ⚠️  {} students have no configured batch window",
            report.students_without_window
        );
    }
    if report.shortfall() > 0 {
        println!(
            "  ⚠️  {} rebates short of target across {} students",
            report.shortfall(),
            report.short_students
        );
    }

    println!("{}", RULE);
    println!("✓ {}", report.summary());
    Ok(())
}

fn run_check_overlaps(
    store: &mut SqliteStore,
    policy: ResolutionPolicy,
    dry_run: bool,
    yes: bool,
) -> Result<()> {
    println!("🔍 Overlap Check");
    println!("{}", RULE);

    let pairs = scan_store(store)?;
    if pairs.is_empty() {
        println!("✓ No overlapping rebates found");
        return Ok(());
    }

    for pair in &pairs {
        println!("  {}", pair);
    }

    let resolver = ConflictResolver::new(policy);
    let planned = resolver.plan(&pairs);
    println!("{}", RULE);
    println!(
        "Found {} overlapping pairs; policy {} removes {} rebates",
        pairs.len(),
        policy,
        planned.len()
    );

    if dry_run {
        println!("Dry run: nothing deleted");
        return Ok(());
    }
    if !confirm("Delete these rebates?", yes)? {
        println!("Aborted");
        return Ok(());
    }

    let deleted = resolver.resolve(store, &pairs)?;
    println!("✓ Deleted {} rebates", deleted);
    Ok(())
}

fn run_allocate_codes(
    store: &mut SqliteStore,
    config: &RebateConfig,
    limit: Option<usize>,
    yes: bool,
) -> Result<()> {
    println!("🎫 Gate Pass Allocation");
    println!("{}", RULE);

    let mut settings = config.codes.allocation();
    if limit.is_some() {
        settings.limit = limit;
    }

    let missing = store.count_where(&IntervalFilter::MissingCode)?;
    if missing == 0 {
        println!("Nothing to do: every rebate has a gate pass number");
    } else {
        let planned = settings.limit.map_or(missing, |l| l.min(missing));
        let prompt = format!("Assign gate pass numbers to {} rebates?", planned);
        if !confirm(&prompt, yes)? {
            println!("Aborted");
            return Ok(());
        }
    }

    let allocator = CodeAllocator::new(config.codes.space()?, HashSet::new());
    let allocator = match config.codes.seed {
        Some(seed) => allocator.with_seed(seed),
        None => allocator,
    };
    let mut allocator = allocator.shuffle_prefixes(config.codes.lead_prefix);

    let report = allocate_missing_codes(store, &mut allocator, &settings)?;

    if report.shortage > 0 {
        println!("  ⚠️  code space exhausted: {} rebates left without a code", report.shortage);
    }
    if report.rejected > 0 {
        println!("  ⚠️  {} assignments rejected by the database", report.rejected);
    }

    println!("{}", RULE);
    println!("✓ {}", report.summary());
    Ok(())
}

fn run_remove_future(store: &mut SqliteStore, cutoff: NaiveDate, yes: bool) -> Result<()> {
    println!("🗓️  Future Rebate Cleanup");
    println!("{}", RULE);

    let cleanup = FutureEntryCleanup::new(cutoff);
    let count = cleanup.preview(store)?;
    if count == 0 {
        println!("Nothing to do: no rebates start after {}", cutoff);
        return Ok(());
    }

    println!("Found {} rebates starting after {}", count, cutoff);
    if !confirm("Delete them?", yes)? {
        println!("Aborted");
        return Ok(());
    }

    let deleted = cleanup.purge(store)?;
    println!("✓ Deleted {} rebates", deleted);
    Ok(())
}

fn run_stats(store: &SqliteStore) -> Result<()> {
    println!("📊 Mess Rebate Stats");
    println!("{}", RULE);

    let total = store.count_where(&IntervalFilter::All)?;
    let coded = store.count_where(&IntervalFilter::HasCode)?;
    let missing = store.count_where(&IntervalFilter::MissingCode)?;

    println!("Students:            {}", store.student_count()?);
    println!("Rebates:             {}", total);
    println!("  with gate pass:    {}", coded);
    println!("  without gate pass: {}", missing);
    println!(
        "Gate pass required:  {}",
        if store.mandatory_code_enabled()? { "yes" } else { "no" }
    );
    Ok(())
}
