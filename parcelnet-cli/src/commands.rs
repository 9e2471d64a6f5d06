//! CLI command implementations

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Subcommand, ValueEnum};
use parcelnet_core::{Anomaly, NodeId, ParcelnetConfig, SystemWallClock};
use parcelnet_sim::scenarios::{continental_config, three_region_config};
use parcelnet_sim::{ForcedAnomalyScenario, SimulationDriver, spawn_simulation};

/// Seed used when neither the command line nor the environment gives one.
const DEFAULT_SEED: u64 = 42;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a deterministic simulation on virtual time
    Run {
        /// Number of steps to run
        #[arg(short, long, default_value = "60")]
        steps: u64,
        /// Seed for the run
        #[arg(long)]
        seed: Option<u64>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the simulation in real time on the actor runtime
    Live {
        /// How long to run before printing the report
        #[arg(short, long, default_value = "10")]
        duration_secs: u64,
        /// Seed for event generation
        #[arg(long)]
        seed: Option<u64>,
        /// Node that starts a message-driven snapshot halfway through
        #[arg(long)]
        snapshot_from: Option<String>,
    },
    /// Run a canned scenario
    Scenario {
        /// Scenario to run
        #[arg(value_enum)]
        name: ScenarioName,
        /// Seed for the run
        #[arg(long)]
        seed: Option<u64>,
        /// Nodes per continent for the continental topology
        #[arg(long, default_value = "2")]
        nodes_per_region: usize,
        /// Steps for the continental run
        #[arg(short, long, default_value = "30")]
        steps: u64,
    },
    /// Run a deterministic simulation and print a global snapshot
    Snapshot {
        /// Number of steps to run before the capture
        #[arg(short, long, default_value = "30")]
        steps: u64,
        /// Seed for the run
        #[arg(long)]
        seed: Option<u64>,
        /// Merge per region first, then roll the regions up
        #[arg(long)]
        by_region: bool,
    },
    /// Print the merged cross-node history of one package
    Timeline {
        /// Package to follow
        package: String,
        /// Number of steps to run first
        #[arg(short, long, default_value = "30")]
        steps: u64,
        /// Seed for the run
        #[arg(long)]
        seed: Option<u64>,
    },
}

/// Canned scenarios selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScenarioName {
    /// Random traffic plus one injected ordering violation and one drift
    ForcedAnomaly,
    /// Skewed nodes on seven continents
    Continental,
}

/// Handle the CLI command
///
/// # Errors
/// Returns the error of the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run { steps, seed, json } => run_deterministic(steps, seed, json),
        Commands::Live {
            duration_secs,
            seed,
            snapshot_from,
        } => run_live(Duration::from_secs(duration_secs), seed, snapshot_from).await,
        Commands::Scenario {
            name,
            seed,
            nodes_per_region,
            steps,
        } => run_scenario(name, seed, nodes_per_region, steps),
        Commands::Snapshot {
            steps,
            seed,
            by_region,
        } => print_snapshot(steps, seed, by_region),
        Commands::Timeline {
            package,
            steps,
            seed,
        } => print_timeline(&package, steps, seed),
    }
}

/// Run a deterministic simulation and print its report
///
/// # Errors
/// - Invalid configuration from the environment
/// - Delivery queue overflow during the run
pub fn run_deterministic(steps: u64, seed: Option<u64>, json: bool) -> anyhow::Result<()> {
    let mut driver = deterministic_driver(seed)?;
    let report = driver.run_steps(steps)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.summary());
    }
    Ok(())
}

/// Run the actor runtime against the system clock
///
/// # Errors
/// - Invalid configuration from the environment
/// - Actor stopped before the report could be taken
pub async fn run_live(
    duration: Duration,
    seed: Option<u64>,
    snapshot_from: Option<String>,
) -> anyhow::Result<()> {
    let mut config = ParcelnetConfig::from_env();
    if seed.is_some() {
        config.simulation.deterministic_seed = seed;
    }

    let driver = SimulationDriver::new(config, Arc::new(SystemWallClock))?;
    let period = driver.step_period();
    println!(
        "Running {} nodes for {}s (step period {}ms, seed {})",
        driver.network().len(),
        duration.as_secs(),
        period.as_millis(),
        driver.seed()
    );

    let handle = spawn_simulation(driver);
    handle.start().await?;

    match snapshot_from {
        Some(initiator) => {
            tokio::time::sleep(duration / 2).await;
            let requested = handle.request_snapshot(NodeId::from(initiator.as_str())).await?;
            tracing::info!(initiator = %initiator, requested, "Requested snapshot");
            tokio::time::sleep(duration - duration / 2).await;
        }
        None => tokio::time::sleep(duration).await,
    }

    handle.pause().await?;
    let report = handle.report().await?;
    let captured = handle.snapshot().await?;
    handle.shutdown().await?;

    print!("{}", report.summary());
    println!(
        "\nSnapshot: {} packages, {} messages in flight",
        captured.snapshot.total_packages(),
        captured.snapshot.total_in_flight()
    );
    Ok(())
}

/// Run a canned scenario
///
/// # Errors
/// - Scenario produced an invalid configuration
/// - Delivery queue overflow during the run
pub fn run_scenario(
    name: ScenarioName,
    seed: Option<u64>,
    nodes_per_region: usize,
    steps: u64,
) -> anyhow::Result<()> {
    match name {
        ScenarioName::ForcedAnomaly => {
            let scenario = ForcedAnomalyScenario {
                seed: seed.unwrap_or(DEFAULT_SEED),
                ..ForcedAnomalyScenario::default()
            };
            let outcome = scenario.run().context("forced anomaly scenario failed")?;

            print!("{}", outcome.report.summary());
            println!("\nInjected anomalies:");
            print_anomalies(&outcome.forced);
            println!(
                "\nFinal snapshot: {} nodes, {} packages",
                outcome.snapshot.per_node.len(),
                outcome.snapshot.total_packages()
            );
        }
        ScenarioName::Continental => {
            let config = continental_config(nodes_per_region, seed.unwrap_or(DEFAULT_SEED));
            let mut driver = SimulationDriver::deterministic(config)?;
            let report = driver.run_steps(steps)?;
            print!("{}", report.summary());
        }
    }
    Ok(())
}

/// Print a global snapshot after a deterministic run
///
/// # Errors
/// - Invalid configuration from the environment
/// - Delivery queue overflow during the run
pub fn print_snapshot(steps: u64, seed: Option<u64>, by_region: bool) -> anyhow::Result<()> {
    let mut driver = deterministic_driver(seed)?;
    driver.run_steps(steps)?;
    if by_region {
        let snapshot = driver.capture_hierarchical_snapshot();
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        let captured = driver.capture_snapshot();
        println!("{}", serde_json::to_string_pretty(&captured.snapshot)?);
    }
    Ok(())
}

/// Print the merged history of one package
///
/// # Errors
/// - Invalid configuration from the environment
/// - Delivery queue overflow during the run
pub fn print_timeline(package: &str, steps: u64, seed: Option<u64>) -> anyhow::Result<()> {
    let mut driver = deterministic_driver(seed)?;
    driver.run_steps(steps)?;

    let timeline = driver.package_timeline(package);
    if timeline.is_empty() {
        println!("No events recorded for {package}");
        return Ok(());
    }

    println!("Timeline for {package}");
    println!("{:-<72}", "");
    for record in timeline {
        let source = if record.is_remote { "remote" } else { "local" };
        println!(
            "{:>28}  {:<10} {:<12} {:<24} {} ({source})",
            record.timestamp.to_string(),
            record.origin,
            record.kind,
            record.location,
            record.region
        );
    }
    Ok(())
}

fn deterministic_driver(seed: Option<u64>) -> anyhow::Result<SimulationDriver> {
    let env_config = ParcelnetConfig::from_env();
    let seed = seed
        .or(env_config.simulation.deterministic_seed)
        .unwrap_or(DEFAULT_SEED);

    let mut config = three_region_config(seed);
    config.simulation.event_probability = env_config.simulation.event_probability;
    config.network = env_config.network;
    config.retention = env_config.retention;

    SimulationDriver::deterministic(config).context("failed to create simulation driver")
}

fn print_anomalies(anomalies: &[Anomaly]) {
    if anomalies.is_empty() {
        println!("  none");
    }
    for anomaly in anomalies {
        println!("  [{}] {}: {}", anomaly.severity, anomaly.kind, anomaly.description);
    }
}
