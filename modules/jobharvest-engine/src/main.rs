use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use jobharvest_common::{HarvestConfig, OrgId};
use jobharvest_engine::{
    ArtifactStore, BatchReviewer, Enricher, Fetcher, GateConfig, HttpTransport, JsonBaselineStore,
    QualityGate, RetryPolicy, RunCoordinator, RunOptions,
};

#[derive(Parser)]
#[command(name = "jobharvest", about = "Vacancy harvesting across organization job boards")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Harvest one or more organizations and persist run artifacts.
    Run(RunArgs),
    /// Approve a pending batch; listing counts feed the baselines.
    Approve {
        batch_id: String,
    },
    /// Reject a pending batch; artifacts stay, baselines are untouched.
    Reject {
        batch_id: String,
        #[arg(long)]
        reason: String,
    },
    /// List registered organizations.
    Orgs,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Organization abbreviation; repeat for several.
    #[arg(long = "org", value_name = "ABBREV", conflicts_with = "all")]
    orgs: Vec<String>,

    /// Harvest every enabled organization.
    #[arg(long)]
    all: bool,

    /// Maximum organizations processed in parallel.
    #[arg(long, default_value_t = 4)]
    parallel_orgs: usize,

    /// Fetch full description text for every listing.
    #[arg(long)]
    enrich: bool,

    /// Skip quality-gate evaluation.
    #[arg(long)]
    skip_validation: bool,

    /// Per-organization budget in seconds; defaults to ORG_TIMEOUT_SECS.
    #[arg(long)]
    org_timeout_secs: Option<u64>,

    /// Externally supplied run id; generated when absent.
    #[arg(long)]
    run_id: Option<String>,

    /// Open a review batch over the run's artifacts.
    #[arg(long)]
    review: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = HarvestConfig::from_env();

    match cli.command {
        Command::Run(args) => run(args, cfg).await,
        Command::Approve { batch_id } => {
            let store = ArtifactStore::new(&cfg.data_dir);
            let baselines = JsonBaselineStore::open(&cfg.data_dir)?;
            let reviewer = BatchReviewer::new(&cfg.data_dir);
            let report = reviewer.approve(&batch_id, &store, &baselines)?;
            println!("batch {} approved ({} orgs)", report.batch_id, report.orgs.len());
            Ok(())
        }
        Command::Reject { batch_id, reason } => {
            let reviewer = BatchReviewer::new(&cfg.data_dir);
            let report = reviewer.reject(&batch_id, &reason)?;
            println!("batch {} rejected", report.batch_id);
            Ok(())
        }
        Command::Orgs => {
            let registry = jobharvest_engine::sources::builtin_registry()?;
            for org in registry.organizations() {
                let flag = if org.enabled { "" } else { " (disabled)" };
                println!("{:8} {}{}", org.id, org.name, flag);
            }
            Ok(())
        }
    }
}

async fn run(args: RunArgs, cfg: HarvestConfig) -> anyhow::Result<()> {
    if !args.all && args.orgs.is_empty() {
        anyhow::bail!("nothing to harvest: pass --org ABBREV or --all");
    }

    let registry = jobharvest_engine::sources::builtin_registry()?;
    let transport = Arc::new(HttpTransport::new(&cfg)?);
    let fetcher = Fetcher::new(transport, RetryPolicy::standard(&cfg));
    let gate = QualityGate::new(GateConfig {
        drop_ratio: cfg.gate_drop_ratio,
        spike_multiplier: cfg.gate_spike_multiplier,
    });
    let baselines = JsonBaselineStore::open(&cfg.data_dir)
        .context("failed to open baseline store")?;
    let store = ArtifactStore::new(&cfg.data_dir);

    let coordinator = RunCoordinator::new(
        Arc::new(registry),
        Arc::new(fetcher),
        Arc::new(Enricher::new(&cfg)),
        Arc::new(gate),
        Arc::new(baselines),
        Arc::new(store),
    );

    let requested: Vec<OrgId> = args.orgs.iter().map(|s| OrgId::new(s)).collect();
    let opts = RunOptions {
        concurrency: args.parallel_orgs,
        org_timeout: Duration::from_secs(args.org_timeout_secs.unwrap_or(cfg.org_timeout_secs)),
        enrich: args.enrich,
        validate: !args.skip_validation,
        run_id: args.run_id,
    };
    let enforce_gate = opts.validate;

    let outcome = coordinator.run(&requested, opts).await?;
    print!("{}", outcome.stats);

    if args.review {
        let reviewer = BatchReviewer::new(&cfg.data_dir);
        let batch = reviewer.create_batch(outcome.refs.clone())?;
        info!(batch = %batch.batch_id, "review batch opened");
        println!("Review batch:      {}", batch.batch_id);
    }

    if !outcome.stats.is_clean(enforce_gate) {
        std::process::exit(1);
    }
    Ok(())
}
