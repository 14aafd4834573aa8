//! Progression Gate operator tool
//!
//! ## Usage
//!
//! ```bash
//! # Check a signup pair
//! progression-gate --config config.toml validate 'XYZ' A
//!
//! # Activate cohort 3 with two roster members selected
//! progression-gate --config config.toml activate 3 A B
//!
//! # Roadmap and assessment gate for a learner
//! progression-gate --config config.toml roadmap u1
//! progression-gate --config config.toml gate u1
//!
//! # Digest for an operator code (goes into [[operators]])
//! progression-gate hash-code 'secret'
//! ```
//!
//! Every command prints JSON on stdout; logs go to stderr.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use progression_gate::{
    operator_digest, AccessVerdict, CohortRegistry, Config, EvalContext, GateDb, LearningPath, LessonCatalog,
    OperatorCodes, ProgressionEngine, Stores,
};

#[derive(Parser, Debug)]
#[command(name = "progression-gate")]
#[command(about = "Learner progression and access-gating engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "PROGRESSION_GATE_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory (overrides config)
    #[arg(long, env = "PROGRESSION_GATE_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Log level (overrides config)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Classify an access code / identifier pair
    Validate {
        code: String,
        #[arg(default_value = "")]
        identifier: String,
    },

    /// Create a learner account for an activated pair
    Register {
        code: String,
        identifier: String,
        learner_id: String,
        /// Learning path (foundational, advanced)
        #[arg(short, long, default_value = "foundational")]
        path: LearningPath,
    },

    /// Lesson states for a learner
    Roadmap {
        learner_id: String,
        /// Operator code; opens every lesson for content QA
        #[arg(long)]
        operator_code: Option<String>,
    },

    /// Begin or resume a lesson
    Start { learner_id: String, lesson_id: String },

    /// Record a lesson completion
    Complete {
        learner_id: String,
        lesson_id: String,
        #[arg(short, long)]
        score: u32,
        #[arg(short, long, default_value = "0")]
        minutes: u32,
    },

    /// Streak and weekly minutes
    Streak {
        learner_id: String,
        /// IANA timezone (defaults to config default_timezone)
        #[arg(short, long)]
        timezone: Option<String>,
    },

    /// Delayed assessment gate for a learner
    Gate { learner_id: String },

    /// Activate a cohort with selected roster identifiers
    Activate { cohort: u32, identifiers: Vec<String> },

    /// Activate roster identifiers (all-or-nothing)
    ActivateIds {
        cohort: u32,
        #[arg(required = true)]
        identifiers: Vec<String>,
    },

    /// Deactivate a cohort
    Deactivate { cohort: u32 },

    /// Open a cohort's delayed assessment now
    Release { cohort: u32 },

    /// Per-cohort activation summary and database statistics
    Status,

    /// Print the SHA-256 digest of an operator code
    HashCode { code: String },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Relative data paths in a config file are taken from the file's directory
fn resolve(base: Option<&Path>, path: &Path) -> PathBuf {
    match base {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading config {:?}", path))?,
        None => Config::default(),
    };
    if let Some(dir) = cli.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    let default_filter = format!("progression_gate={},info", config.log_level);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if let Command::HashCode { code } = &cli.command {
        return print_json(&json!({ "digest": operator_digest(code) }));
    }

    let base = cli.config.as_deref().and_then(Path::parent);
    let registry = CohortRegistry::load(resolve(base, &config.registry_path)).context("loading cohort registry")?;
    let catalog = LessonCatalog::load(resolve(base, &config.catalog_path)).context("loading lesson catalog")?;
    let db = GateDb::open(&config.storage_dir).context("opening database")?;

    info!(
        storage_dir = %config.storage_dir.display(),
        policy = ?config.activation_policy,
        "Starting progression-gate"
    );

    let engine = ProgressionEngine::new(
        registry,
        catalog,
        Stores::shared(&db),
    )
    .with_operators(OperatorCodes::from_config(&config.operators))
    .with_policy(config.activation_policy)
    .with_default_timezone(config.default_timezone.clone());

    let now = Utc::now();

    match cli.command {
        Command::Validate { code, identifier } => print_json(&engine.validate_access(&code, &identifier)),
        Command::Register {
            code,
            identifier,
            learner_id,
            path,
        } => print_json(&engine.register(&code, &identifier, &learner_id, path)?),
        Command::Roadmap {
            learner_id,
            operator_code,
        } => {
            let learner = engine.learner(&learner_id)?;
            let ctx = match operator_code {
                Some(code) => match engine.validate_access(&code, "") {
                    AccessVerdict::AdminOverride { grant } => EvalContext::content_qa(&grant, now),
                    _ => bail!("operator code not recognised"),
                },
                None => EvalContext::learner(now),
            };
            print_json(&engine.roadmap(&learner, &ctx))
        }
        Command::Start { learner_id, lesson_id } => {
            let learner = engine.learner(&learner_id)?;
            print_json(&engine.open_lesson(&learner, &lesson_id, &EvalContext::learner(now))?)
        }
        Command::Complete {
            learner_id,
            lesson_id,
            score,
            minutes,
        } => {
            let mut learner = engine.learner(&learner_id)?;
            let xp = engine.complete_lesson(&mut learner, &lesson_id, score, minutes, &EvalContext::learner(now))?;
            print_json(&json!({ "xp_awarded": xp, "learner": learner }))
        }
        Command::Streak { learner_id, timezone } => {
            print_json(&engine.dashboard(&learner_id, timezone.as_deref(), now))
        }
        Command::Gate { learner_id } => {
            let learner = engine.learner(&learner_id)?;
            print_json(&engine.gate(&learner, now))
        }
        Command::Activate { cohort, identifiers } => {
            print_json(&engine.activator().activate_cohort(cohort, &identifiers, now)?)
        }
        Command::ActivateIds { cohort, identifiers } => {
            print_json(&engine.activator().bulk_activate_identifiers(cohort, &identifiers, now)?)
        }
        Command::Deactivate { cohort } => {
            engine.activator().deactivate_cohort(cohort)?;
            print_json(&json!({ "cohort": cohort, "activated": false }))
        }
        Command::Release { cohort } => print_json(&engine.activator().release_gate(cohort, now)?),
        Command::Status => print_json(&json!({
            "cohorts": engine.activator().summaries(now)?,
            "database": db.stats()?,
        })),
        Command::HashCode { .. } => Ok(()),
    }
}
