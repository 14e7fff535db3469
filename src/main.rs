//! qc-engine - Westgard QC validation for laboratory control results
//!
//! # Usage
//!
//! ```bash
//! # Score a single control result against its baseline and prior z-scores
//! qc-engine check --value 112.4 --mean 100 --sd 4 --history 1.1,2.3
//!
//! # Ingest a batch of control results (JSON array)
//! qc-engine ingest runs.json
//!
//! # Per-level mean/SD for an analyte over a date range
//! qc-engine summary --name glucose --from 2024-01-01 --to 2024-01-31
//!
//! # Move a target mean after a recalibration
//! qc-engine update-mean --name glucose --level Normal --lot 076587 --mean 101.5
//!
//! # Drop the baseline of a retired control lot
//! qc-engine reset-baseline --name glucose --level Normal --lot 076587
//! ```
//!
//! # Environment Variables
//!
//! - `QC_ENGINE_CONFIG`: Path to the TOML config (default: ./qc_config.toml)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use qc_engine::aggregation::Reports;
use qc_engine::baseline::{BaselineStore, DEFAULT_MIN_SAMPLES};
use qc_engine::config::{self, QcConfig};
use qc_engine::ingestion::{IngestError, IngestionGuard};
use qc_engine::rules::RuleValidator;
use qc_engine::store::{MeasurementFilter, MeasurementQuery, SledRepository};
use qc_engine::types::{GroupKey, MeasurementCandidate};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "qc-engine")]
#[command(about = "Westgard rule validation for laboratory quality control")]
#[command(version)]
struct CliArgs {
    /// Path to a TOML config file (overrides QC_ENGINE_CONFIG)
    #[arg(long, env = "QC_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Score one value and print the verdict as JSON
    Check {
        #[arg(long, allow_hyphen_values = true)]
        value: f64,
        #[arg(long, allow_hyphen_values = true)]
        mean: f64,
        #[arg(long)]
        sd: f64,
        /// Prior z-scores of the group, oldest first (e.g. 1.2,-0.4,2.1)
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        history: Vec<f64>,
    },

    /// Validate, score and store a JSON array of control results
    Ingest {
        /// JSON file with the records
        file: PathBuf,
    },

    /// Print mean/SD per level for an analyte as JSON
    Summary {
        #[arg(long)]
        name: String,
        /// Restrict to one level and print a single mean/SD
        #[arg(long)]
        level: Option<String>,
        /// Inclusive lower bound (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)
        #[arg(long, value_parser = parse_datetime)]
        from: Option<NaiveDateTime>,
        /// Inclusive upper bound (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)
        #[arg(long, value_parser = parse_datetime)]
        to: Option<NaiveDateTime>,
        /// Leave out runs rejected by a Westgard rule
        #[arg(long)]
        in_control: bool,
    },

    /// Install or replace the baseline of a (name, level, lot) group
    SetBaseline {
        #[arg(long)]
        name: String,
        #[arg(long)]
        level: String,
        #[arg(long)]
        lot: String,
        #[arg(long, allow_hyphen_values = true)]
        mean: f64,
        #[arg(long)]
        sd: f64,
    },

    /// Change the target mean of an existing baseline (idempotent)
    UpdateMean {
        #[arg(long)]
        name: String,
        #[arg(long)]
        level: String,
        #[arg(long)]
        lot: String,
        #[arg(long, allow_hyphen_values = true)]
        mean: f64,
    },

    /// Forget the baseline of a group, e.g. when its control lot is retired
    ResetBaseline {
        #[arg(long)]
        name: String,
        #[arg(long)]
        level: String,
        #[arg(long)]
        lot: String,
    },

    /// Recompute baselines from stored in-control runs of an analyte
    LearnBaselines {
        #[arg(long)]
        name: String,
        /// Minimum in-control runs per group
        #[arg(long, default_value_t = DEFAULT_MIN_SAMPLES)]
        min_samples: usize,
    },
}

/// Input record of `ingest`. Mean and SD fall back to the stored baseline.
#[derive(Debug, Deserialize)]
struct IngestRecord {
    timestamp: NaiveDateTime,
    name: String,
    level: String,
    #[serde(default)]
    level_lot: String,
    #[serde(default)]
    test_lot: String,
    value: f64,
    #[serde(default)]
    unit: String,
    mean: Option<f64>,
    sd: Option<f64>,
}

fn parse_datetime(s: &str) -> Result<NaiveDateTime, String> {
    if let Ok(ts) = s.parse::<NaiveDateTime>() {
        return Ok(ts);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| format!("invalid date '{s}', expected YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS"))
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Initialize logging; stdout is reserved for JSON results
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr);
    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    let qc_config = match &args.config {
        Some(path) => QcConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => QcConfig::load(),
    };
    config::init(qc_config);
    let cfg = config::get();

    match args.command {
        SubCommand::Check {
            value,
            mean,
            sd,
            history,
        } => {
            let validator = RuleValidator::new(cfg.rules.clone());
            let verdict = validator.evaluate(value, mean, sd, &history);
            print_json(&verdict)
        }
        SubCommand::Ingest { file } => run_ingest(cfg, &file),
        SubCommand::Summary {
            name,
            level,
            from,
            to,
            in_control,
        } => {
            let repo = open_store(cfg)?;
            let reports = Reports::new(&repo);
            reports.ensure_analyte_exists(&name)?;

            let mut filter = MeasurementFilter::for_name(&name).between(from, to);
            match level {
                Some(level) => {
                    filter = filter.level(&level);
                    let stats = if in_control {
                        let kept = qc_engine::aggregation::filter_in_control(
                            &repo.find_by_filter(&filter)?,
                        );
                        qc_engine::aggregation::compute_mean_and_sd(&kept)?
                    } else {
                        reports.mean_and_sd(&filter)?
                    };
                    print_json(&stats)
                }
                None => print_json(&reports.grouped_summaries(&filter, in_control)?),
            }
        }
        SubCommand::SetBaseline {
            name,
            level,
            lot,
            mean,
            sd,
        } => {
            let path = &cfg.storage.baseline_path;
            let mut baselines = BaselineStore::load_or_new(path);
            let group = GroupKey::new(&name, &level, &lot);
            let now = chrono::Local::now().naive_local();
            baselines.set(&group, mean, sd, Some(now))?;
            baselines.save_to_file(path)?;
            Ok(())
        }
        SubCommand::UpdateMean {
            name,
            level,
            lot,
            mean,
        } => {
            let path = &cfg.storage.baseline_path;
            let mut baselines = BaselineStore::load_or_new(path);
            baselines.update_mean(&GroupKey::new(&name, &level, &lot), mean)?;
            baselines.save_to_file(path)?;
            Ok(())
        }
        SubCommand::ResetBaseline { name, level, lot } => {
            let path = &cfg.storage.baseline_path;
            let mut baselines = BaselineStore::load_or_new(path);
            let group = GroupKey::new(&name, &level, &lot);
            match baselines.remove(&group) {
                Some(_) => baselines.save_to_file(path)?,
                None => warn!(group = %group, "No baseline to reset"),
            }
            Ok(())
        }
        SubCommand::LearnBaselines { name, min_samples } => {
            let repo = open_store(cfg)?;
            let history = repo.find_by_filter(&MeasurementFilter::for_name(&name))?;
            let path = &cfg.storage.baseline_path;
            let mut baselines = BaselineStore::load_or_new(path);
            let learned = baselines.learn_from(&history, min_samples);
            if learned.is_empty() {
                warn!(name = %name, min_samples, "No group had enough in-control runs");
            } else {
                baselines.save_to_file(path)?;
            }
            print_json(&learned)
        }
    }
}

fn open_store(cfg: &QcConfig) -> Result<SledRepository> {
    SledRepository::open(&cfg.storage.db_path)
        .with_context(|| format!("Failed to open store {}", cfg.storage.db_path.display()))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_ingest(cfg: &QcConfig, file: &Path) -> Result<()> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let records: Vec<IngestRecord> = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse {}", file.display()))?;

    let baselines = BaselineStore::load_or_new(&cfg.storage.baseline_path);
    let batch = records
        .into_iter()
        .enumerate()
        .map(|(i, r)| resolve_baseline(i, r, &baselines))
        .collect::<Result<Vec<_>>>()?;

    let repo = open_store(cfg)?;
    let guard = IngestionGuard::new(
        RuleValidator::new(cfg.rules.clone()),
        cfg.ingestion.clone(),
    );

    let count = batch.len();
    let accepted = match guard.ingest_and_persist(batch, &repo) {
        Ok(accepted) => accepted,
        Err(IngestError::Duplicate(dup)) => {
            for c in &dup.collisions {
                warn!(record = c.index, key = %c.key, source = ?c.source, "Duplicate measurement");
            }
            return Err(IngestError::Duplicate(dup).into());
        }
        Err(e) => return Err(e.into()),
    };
    repo.flush()?;

    let rejected = accepted.iter().filter(|m| m.is_rejected()).count();
    let warnings = accepted
        .iter()
        .filter(|m| m.rule() == qc_engine::RuleCode::OneTwoS)
        .count();
    info!(lab = %cfg.lab.name, records = count, rejected, warnings, "Batch ingested");
    print_json(&accepted)
}

fn resolve_baseline(
    index: usize,
    record: IngestRecord,
    baselines: &BaselineStore,
) -> Result<MeasurementCandidate> {
    let group = GroupKey::new(&record.name, &record.level, &record.level_lot);
    let (mean, sd) = match (record.mean, record.sd) {
        (Some(mean), Some(sd)) => (mean, sd),
        (mean, sd) => {
            let baseline = baselines.get(&group).with_context(|| {
                format!("Record #{index}: no mean/sd given and no baseline for {group}")
            })?;
            (mean.unwrap_or(baseline.mean), sd.unwrap_or(baseline.sd))
        }
    };
    Ok(MeasurementCandidate {
        timestamp: record.timestamp,
        name: record.name,
        level: record.level,
        level_lot: record.level_lot,
        test_lot: record.test_lot,
        value: record.value,
        unit: record.unit,
        mean,
        sd,
    })
}
