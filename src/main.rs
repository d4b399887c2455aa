//! Sumi-Strata main entry point
//!
//! This is the command-line interface for the Sumi-Strata schema and crawl plan
//! inference pipeline.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::{Path, PathBuf};
use sumi_strata::config::{load_config_with_hash, Config};
use sumi_strata::orchestrator::{Orchestrator, PipelineRun, RunInput};
use sumi_strata::output::{generate_markdown_summary, render_ddl, render_markdown};
use tracing_subscriber::EnvFilter;

/// Sumi-Strata: infers a site's storage schema and crawl plan
///
/// Sumi-Strata samples a site from seed URLs (or analyzes responses it archived
/// earlier), groups pages by structure, and commits a versioned database schema
/// together with a crawl plan that populates it.
#[derive(Parser, Debug)]
#[command(name = "sumi-strata")]
#[command(version)]
#[command(about = "Infers a site's database schema and crawl plan", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Site identifier the run and its artifacts are recorded under
    #[arg(long, value_name = "SITE")]
    site: Option<String>,

    /// Seed URL to start sampling from (repeatable)
    #[arg(long = "seed", value_name = "URL")]
    seeds: Vec<String>,

    /// Analyze the snapshots already archived for the site instead of fetching
    #[arg(long, conflicts_with = "seeds")]
    snapshots: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be run without fetching anything
    #[arg(long, conflicts_with_all = ["status", "schema", "plan", "export_summary"])]
    dry_run: bool,

    /// Show the latest run of the site and exit
    #[arg(long, conflicts_with_all = ["dry_run", "schema", "plan", "export_summary"])]
    status: bool,

    /// Print the latest committed schema as JSON and exit
    #[arg(long, conflicts_with_all = ["dry_run", "status", "plan", "export_summary"])]
    schema: bool,

    /// With --schema: print SQL DDL instead of JSON
    #[arg(long, requires = "schema")]
    ddl: bool,

    /// Print the latest committed crawl plan as JSON and exit
    #[arg(long, conflicts_with_all = ["dry_run", "status", "schema", "export_summary"])]
    plan: bool,

    /// Write a markdown report of the latest schema and plan to this path and exit
    #[arg(long, value_name = "PATH")]
    export_summary: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config, &cli);
        return Ok(());
    }

    let site = cli
        .site
        .clone()
        .context("--site is required unless --dry-run is given")?;
    let orchestrator = Orchestrator::from_config(config)?;

    if cli.status {
        handle_status(&orchestrator, &site)
    } else if cli.schema {
        handle_schema(&orchestrator, &site, cli.ddl)
    } else if cli.plan {
        handle_plan(&orchestrator, &site)
    } else if let Some(path) = &cli.export_summary {
        handle_export_summary(&orchestrator, &site, path)
    } else {
        handle_run(&orchestrator, &site, &cli).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_strata=info,warn"),
            1 => EnvFilter::new("sumi_strata=debug,info"),
            2 => EnvFilter::new("sumi_strata=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be run
fn handle_dry_run(config: &Config, cli: &Cli) {
    println!("=== Sumi-Strata Dry Run ===\n");

    println!("Fetcher:");
    println!("  Requests per second: {}", config.fetcher.requests_per_second);
    println!("  Burst: {}", config.fetcher.burst);
    println!("  Max attempts: {}", config.fetcher.max_attempts);
    println!("  Extra headers: {}", config.fetcher.headers.len());
    if let Some(var) = &config.fetcher.authorization_env {
        println!("  Authorization from: ${}", var);
    }

    println!("\nDiscovery:");
    println!("  Max depth: {}", config.discovery.max_depth);
    println!("  Max pages: {}", config.discovery.max_pages);

    println!("\nAnalyzer:");
    println!("  Cluster threshold: {}", config.analyzer.cluster_threshold);
    match &config.inference.endpoint {
        Some(endpoint) => println!("  Inference: {}", endpoint),
        None => println!("  Inference: built-in heuristics"),
    }

    println!("\nUser Agent: {}", config.user_agent.header_value());
    println!("Database: {}", config.storage.database_path);
    println!("On conflict: {:?}", config.orchestrator.on_conflict);

    println!("\n✓ Configuration is valid");
    match (&cli.site, cli.snapshots) {
        (Some(site), true) => println!("✓ Would analyze stored snapshots of '{}'", site),
        (Some(site), false) => println!(
            "✓ Would sample '{}' from {} seed URL(s)",
            site,
            cli.seeds.len()
        ),
        (None, _) => println!("! No --site given"),
    }
}

fn handle_status(orchestrator: &Orchestrator, site: &str) -> anyhow::Result<()> {
    match orchestrator.status(site)? {
        Some(run) => print_run(&run),
        None => println!("No runs recorded for '{}'", site),
    }
    if orchestrator.is_running(site) {
        println!("A run is currently in progress");
    }
    Ok(())
}

fn handle_schema(orchestrator: &Orchestrator, site: &str, ddl: bool) -> anyhow::Result<()> {
    let Some(schema) = orchestrator.latest_schema(site)? else {
        bail!("no schema committed for '{}'", site);
    };
    if ddl {
        print!("{}", render_ddl(&schema));
    } else {
        println!("{}", serde_json::to_string_pretty(&schema)?);
    }
    Ok(())
}

fn handle_plan(orchestrator: &Orchestrator, site: &str) -> anyhow::Result<()> {
    let Some(plan) = orchestrator.latest_plan(site)? else {
        bail!("no crawl plan committed for '{}'", site);
    };
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

/// Handles the --export-summary mode: writes a markdown report
fn handle_export_summary(orchestrator: &Orchestrator, site: &str, path: &Path) -> anyhow::Result<()> {
    let (Some(schema), Some(plan)) = (orchestrator.latest_schema(site)?, orchestrator.latest_plan(site)?)
    else {
        bail!("nothing committed for '{}' yet", site);
    };

    tracing::info!("Generating markdown summary...");
    generate_markdown_summary(&schema, &plan, path)?;
    println!("✓ Summary exported to: {}", path.display());
    Ok(())
}

/// Handles the main pipeline run
async fn handle_run(orchestrator: &Orchestrator, site: &str, cli: &Cli) -> anyhow::Result<()> {
    let input = if cli.snapshots {
        RunInput::Stored
    } else if cli.seeds.is_empty() {
        bail!("give at least one --seed, or --snapshots to analyze stored responses");
    } else {
        RunInput::Seeds(cli.seeds.clone())
    };

    let run = orchestrator.run(site, input).await?;
    print_run(&run);

    if !cli.quiet {
        if let (Some(schema), Some(plan)) = (orchestrator.latest_schema(site)?, orchestrator.latest_plan(site)?) {
            println!();
            print!("{}", render_markdown(&schema, &plan));
        }
    }
    Ok(())
}

fn print_run(run: &PipelineRun) {
    println!("Run #{} for '{}': {} ({})", run.id, run.site_id, run.status, run.stage);
    println!("  Started: {}", run.started_at.to_rfc3339());
    if let Some(finished) = run.finished_at {
        println!("  Finished: {}", finished.to_rfc3339());
    }
    if let Some(fingerprint) = &run.fingerprint {
        println!("  Fingerprint: {}", fingerprint);
    }
    if let Some(reused) = run.reused_run {
        println!("  Reused artifacts of run #{}", reused);
    }
    if let Some(artifacts) = run.artifacts {
        println!(
            "  Model v{}, schema v{}, plan v{}",
            artifacts.model_version, artifacts.schema_version, artifacts.plan_version
        );
    }
    if let Some(failure) = &run.failure {
        println!("  Failed in {} ({}): {}", failure.stage, failure.kind, failure.message);
    }
}
