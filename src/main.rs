// src/main.rs
//! Simulation Orchestrator
//!
//! Runs an experiment locally: expands a configuration document, executes
//! every run with the reference engine and prints the experiment summary.

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use sim_orchestrator::expansion::{expand, index_width, run_name};
use sim_orchestrator::observability::{init_metrics, init_tracing};
use sim_orchestrator::runtime::local::{LinearEngine, LocalArtifactSink, LocalJobBackend};
use sim_orchestrator::summary::RangeFilter;
use sim_orchestrator::{
    ConfigDocument, Creator, EngineConfig, ExperimentRequest, SimulationService, SummaryFormat,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "sim-orchestrator")]
#[command(about = "Expand a configuration document and run it as an experiment")]
#[command(version)]
struct Cli {
    /// Configuration document (YAML or JSON)
    document: PathBuf,

    /// Experiment name, prefix of every run name
    #[arg(long, default_value = "experiment")]
    name: String,

    /// Target stopping time in simulation units
    #[arg(long)]
    target_time: f64,

    /// Repeats per configuration
    #[arg(long, default_value = "1")]
    runs_per_config: u32,

    /// Reference engine time step
    #[arg(long, default_value = "1.0")]
    time_step: f64,

    /// Summary format: csv or json
    #[arg(long, default_value = "csv")]
    format: SummaryFormat,

    /// Range filters as JSON triples, e.g. '[["fungus", "init_num", [10, null]]]'
    #[arg(long)]
    filter: Option<String>,

    /// Print the run plan without executing anything
    #[arg(long)]
    plan: bool,

    /// Engine configuration file stem (default: ./orchestrator)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(stem) => EngineConfig::load_from(Some(stem)),
        None => EngineConfig::load(),
    }
    .context("loading engine configuration")?;

    init_tracing(&config.observability)?;
    let metrics = init_metrics()?;

    info!("Starting sim-orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let document = ConfigDocument::load(&cli.document)
        .with_context(|| format!("reading {}", cli.document.display()))?;
    document.validate()?;

    if cli.plan {
        print_plan(&cli, &document);
        return Ok(());
    }

    let filters = match &cli.filter {
        Some(text) => RangeFilter::parse_list(text)?,
        None => Vec::new(),
    };

    let service = SimulationService::new(
        Arc::new(LinearEngine::new(cli.time_step)),
        Arc::new(LocalArtifactSink::new()),
        Arc::new(LocalJobBackend::new()),
        &config,
    )
    .await?;

    let launch = service
        .create_experiment(ExperimentRequest {
            parent_id: None,
            name: cli.name.clone(),
            document,
            runs_per_config: cli.runs_per_config,
            target_time: Some(cli.target_time),
            creator: Creator::new("local", "Local", "User"),
        })
        .await?;
    let experiment_id = launch.id().to_string();
    info!(experiment_id = %experiment_id, runs = launch.runs.len(), "Experiment launched");

    let runs = join_all(launch.runs.into_iter().map(|run| run.wait()));
    tokio::pin!(runs);

    let results = tokio::select! {
        results = &mut runs => results,
        _ = tokio::signal::ctrl_c() => {
            warn!("Received interrupt, canceling experiment");
            let report = service.cancel(&experiment_id).await?;
            info!(canceled = report.canceled.len(), failed = report.failed.len(), "Cancel requested");
            runs.await
        }
    };

    let failures = results.iter().filter(|r| r.is_err()).count();
    for result in results.iter().filter_map(|r| r.as_ref().err()) {
        error!("Run failed: {}", result);
    }

    let summary = service
        .experiment_summary(&experiment_id, &filters, cli.format)
        .await?;
    println!("{}", summary.render()?);

    info!("Metrics:\n{}", metrics.render());

    if failures > 0 {
        anyhow::bail!("{} of {} runs failed", failures, results.len());
    }
    Ok(())
}

fn print_plan(cli: &Cli, document: &ConfigDocument) {
    let expansion = expand(document);
    let width = index_width(cli.runs_per_config);

    println!(
        "{} configurations x {} runs, variables: {}",
        expansion.len(),
        cli.runs_per_config,
        expansion
            .variables
            .iter()
            .map(|v| v.key())
            .collect::<Vec<_>>()
            .join(", ")
    );

    for config in &expansion.configs {
        for index in 0..cli.runs_per_config {
            println!(
                "{}",
                run_name(&cli.name, index, width, &expansion.variables, config)
            );
        }
    }
}
