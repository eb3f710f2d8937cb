//! oversight: constitutional action gate and approval workflow daemon
//!
//! Evaluates proposed autonomous actions against a layered rule set and
//! drives human sign-off for the ones that need it:
//! - `evaluate`: one-shot evaluation of an action file
//! - `lint`: report same-priority rule conflicts
//! - `serve`: NDJSON workflow API on stdio with background expiry and rule reload

mod api;
mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{info, warn};

use approvals::{GovernanceService, InMemoryJournal, JsonlJournal, RequestJournal, SystemClock};
use constitution::{ActionProposal, ConflictDetector, ConstitutionEvaluator, RuleStore};

use config::OversightConfig;

#[derive(Parser)]
#[command(name = "oversight")]
#[command(about = "Constitutional action gate and human approval workflow")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "OVERSIGHT_CONFIG", default_value = "oversight.yaml")]
    config: PathBuf,

    /// Rule document (overrides config file)
    #[arg(short, long, env = "OVERSIGHT_RULES")]
    rules: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Evaluate an action and print the decision
    Evaluate {
        /// JSON action file, or "-" for stdin
        action: PathBuf,
    },

    /// Report rules that disagree at the same layer and priority
    Lint {
        /// Include inactive rules
        #[arg(long)]
        include_inactive: bool,
    },

    /// Serve the workflow API on stdin/stdout
    Serve {
        /// Request journal (overrides config file)
        #[arg(short, long, env = "OVERSIGHT_JOURNAL")]
        journal: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays clean for API responses
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("oversight=info".parse()?)
        )
        .init();

    let cli = Cli::parse();

    let mut config = OversightConfig::load(&cli.config)?;
    if let Some(rules) = cli.rules {
        config.rules_path = rules;
    }

    let rules = Arc::new(RuleStore::new());
    rules
        .load_file(&config.rules_path)
        .with_context(|| format!("loading rules from {}", config.rules_path.display()))?;

    match cli.command {
        Commands::Evaluate { action } => evaluate(&config, &rules, &action),
        Commands::Lint { include_inactive } => lint(&rules, include_inactive),
        Commands::Serve { journal } => {
            if journal.is_some() {
                config.journal_path = journal;
            }
            serve(config, rules).await
        }
    }
}

fn evaluate(config: &OversightConfig, rules: &RuleStore, path: &Path) -> anyhow::Result<()> {
    let content = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(path)?
    };
    let action: ActionProposal = serde_json::from_str(&content)?;

    let evaluator = ConstitutionEvaluator::with_config(
        config.approvals.evaluator.clone(),
        config.approvals.catalog.clone(),
    );
    let decision = evaluator.evaluate(&rules.snapshot(), &action);
    for warning in &decision.warnings {
        warn!(warning = ?warning, "Evaluation warning");
    }

    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

fn lint(rules: &RuleStore, include_inactive: bool) -> anyhow::Result<()> {
    let detector = if include_inactive {
        ConflictDetector::new().including_inactive()
    } else {
        ConflictDetector::new()
    };

    let snapshot = rules.snapshot();
    let conflicts = detector.detect(snapshot.rules());
    if conflicts.is_empty() {
        println!("{} rules, no conflicts", snapshot.rules().len());
        return Ok(());
    }

    for conflict in &conflicts {
        println!(
            "{} priority {}: {} disagree on {}",
            conflict.layer,
            conflict.priority,
            conflict.rule_ids.join(", "),
            conflict.categories.iter().cloned().collect::<Vec<_>>().join(", ")
        );
    }
    anyhow::bail!("{} rule conflict(s) found", conflicts.len())
}

async fn serve(config: OversightConfig, rules: Arc<RuleStore>) -> anyhow::Result<()> {
    let journal: Arc<dyn RequestJournal> = match &config.journal_path {
        Some(path) => {
            info!(path = %path.display(), "Using request journal");
            Arc::new(JsonlJournal::new(path))
        }
        None => {
            warn!("No journal configured, requests will not survive a restart");
            Arc::new(InMemoryJournal::new())
        }
    };

    let service = GovernanceService::new(
        config.approvals.clone(),
        rules.clone(),
        journal,
        Arc::new(SystemClock),
    )?;
    service.restore().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = service.spawn_sweeper(shutdown_rx.clone());
    let watcher = tokio::spawn(rules.clone().watch_file(
        config.rules_path.clone(),
        Duration::from_secs(config.reload_interval_secs.max(1)),
        shutdown_rx,
    ));

    info!("Serving workflow API on stdio");
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    tokio::select! {
        result = api::serve_lines(&service, stdin, stdout) => {
            result?;
            info!("Input closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(sweeper, watcher);
    info!("oversight stopped");
    Ok(())
}
