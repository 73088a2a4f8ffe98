//! ignis plans declarative smart-contract deployments and tracks their runs.

mod cli;
mod config;
mod render;
mod simulate;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Command, OutputFormat};
use config::{CONFIG_FILENAME, IgnisConfig};
use ignis_core::{
    DeployCoordinator, DeployJournal, DeployState, DeploymentResult, GraphHeader, ModuleManifest,
    Plan, PlanError, RunPhase, Services, plan_module,
};
use simulate::Simulator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILENAME));
    let config = IgnisConfig::load(&config_path)?;

    match cli.command {
        Command::Init { force } => init(&config, &config_path, force),
        Command::Plan { manifest, format } => {
            let plan = plan(&config, &manifest)?;
            match format {
                OutputFormat::Table => println!("{}", render::plan_table(&plan.execution)),
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&plan.execution)
                        .context("Failed to serialize execution graph")?
                ),
            }
            Ok(())
        }
        Command::Simulate {
            manifest,
            revert,
            fresh,
        } => simulate(&config, &manifest, revert, fresh).await,
        Command::Status { json } => status(&config, json),
    }
}

fn init(config: &IgnisConfig, path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }
    config.save_to_file(path)
}

fn plan(config: &IgnisConfig, manifest_path: &Path) -> Result<Plan> {
    let artifacts = config.artifacts()?;
    let accounts = config.accounts();
    let services = Services {
        artifacts: &artifacts,
        chain: &accounts,
    };

    let module = ModuleManifest::load_from_file(manifest_path)?.into_module(&artifacts)?;
    tracing::info!(
        module_id = %module.id,
        manifest = %manifest_path.display(),
        futures = module.futures.len(),
        artifacts_dir = %artifacts.root().display(),
        artifacts = artifacts.names().count(),
        "Planning module"
    );

    match plan_module(&module, &config.module_params()?, services) {
        Ok(plan) => Ok(plan),
        Err(PlanError::Validation(errors)) => {
            eprintln!("Module {} failed validation:", module.id);
            render::print_failures(&errors.0);
            anyhow::bail!("{} vertices failed validation", errors.0.len())
        }
        Err(err) => Err(err).with_context(|| format!("Failed to plan module {}", module.id)),
    }
}

async fn simulate(
    config: &IgnisConfig,
    manifest_path: &Path,
    revert: Vec<String>,
    fresh: bool,
) -> Result<()> {
    let plan = plan(config, manifest_path)?;
    let header = GraphHeader::from_graph(&plan.execution)?;

    let (journal, state) = if fresh {
        (
            DeployJournal::create(&config.journal, &header)?,
            DeployState::new(&header),
        )
    } else {
        DeployJournal::open_or_create(&config.journal, &header)?
    };

    let coordinator = DeployCoordinator::spawn(state, Some(journal));
    let simulator = Simulator::new(&plan.execution, revert);
    let outcome = simulator.run(&coordinator).await;
    let state = coordinator.finish().await?;
    outcome?;

    println!("{}", render::status_table(&state));
    tracing::info!(
        module_id = %state.module_id(),
        phase = %state.phase(),
        journal = %config.journal.display(),
        "Simulation finished"
    );

    if state.phase() == RunPhase::Failed {
        anyhow::bail!("Deployment of {} failed", state.module_id());
    }
    Ok(())
}

fn status(config: &IgnisConfig, json: bool) -> Result<()> {
    let (header, commands) = DeployJournal::read(&config.journal)?;
    let state = DeployState::replay(&header, &commands);

    if json {
        let result = DeploymentResult::from([(state.module_id().to_string(), state.module_result())]);
        let values: serde_json::Map<String, serde_json::Value> = result
            .iter()
            .map(|(module_id, outputs)| {
                let outputs = outputs
                    .iter()
                    .map(|(name, output)| (name.clone(), output.serialize_value()))
                    .collect();
                (module_id.clone(), serde_json::Value::Object(outputs))
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&values).context("Failed to serialize module results")?
        );
        return Ok(());
    }

    println!("{}", render::status_table(&state));
    println!("Phase: {}", state.phase());
    Ok(())
}
