use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;

use traffic_agents::simulation::{
    CollisionPolicy, ConfigOverrides, MapConfig, PolicySettings, ScenarioMode, SimClock, SimWorld,
    VehicleSettings, WorldOptions,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Roads, lights and crossings
    Basic,
    /// Adds parking areas
    Complete,
}

impl From<Mode> for ScenarioMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Basic => ScenarioMode::Basic,
            Mode::Complete => ScenarioMode::Complete,
        }
    }
}

#[derive(Parser)]
#[command(name = "traffic_agents")]
#[command(about = "Agent-based traffic simulation")]
struct Cli {
    /// Built-in scenario to run
    #[arg(value_enum, default_value = "complete")]
    mode: Mode,

    /// Simulated seconds to run
    #[arg(long, default_value = "50")]
    sim_time: u32,

    /// Capacity of every road segment
    #[arg(long)]
    lane_capacity: Option<u32>,

    /// Base change time of every traffic light, in seconds
    #[arg(long)]
    traffic_light_wait: Option<f64>,

    /// Fixed crossing duration of every pedestrian crossing, in seconds
    #[arg(long)]
    pedestrian_wait: Option<u32>,

    /// Base parking time of every parking area, in seconds
    #[arg(long)]
    parking_time: Option<u32>,

    /// Base exit time of every parking area, in seconds
    #[arg(long)]
    exit_time: Option<u32>,

    /// Capacity of street parking; building parking gets double
    #[arg(long)]
    parking_capacity: Option<u32>,

    /// Drive lights, crossings and parking areas with Q-learning
    #[arg(long)]
    use_rl: bool,

    /// Exploration rate of learning controllers
    #[arg(long, default_value = "0.1")]
    epsilon: f64,

    /// Learning rate of learning controllers
    #[arg(long, default_value = "0.1")]
    learning_rate: f64,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Wall-clock milliseconds per simulated second
    #[arg(long, default_value = "100")]
    tick_ms: u64,

    /// Scenario document to load instead of the built-in one
    #[arg(long)]
    config: Option<PathBuf>,

    /// Minimum distance vehicles keep from each other
    #[arg(long)]
    collision_radius: Option<f64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn,traffic_agents=info"),
    )
    .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => MapConfig::from_path(path)
            .with_context(|| format!("Failed to load scenario {}", path.display()))?,
        None => MapConfig::builtin(cli.mode.into()).context("Failed to load built-in scenario")?,
    };
    config
        .apply_overrides(&ConfigOverrides {
            lane_capacity: cli.lane_capacity,
            parking_capacity: cli.parking_capacity,
            parking_time: cli.parking_time,
            exit_time: cli.exit_time,
            traffic_light_wait: cli.traffic_light_wait,
            pedestrian_wait: cli.pedestrian_wait,
        })
        .context("Invalid override")?;

    let policy =
        PolicySettings::new(cli.epsilon, cli.learning_rate).context("Invalid learning settings")?;
    let options = WorldOptions {
        use_rl: cli.use_rl,
        policy,
        seed: cli.seed,
        clock: SimClock::from_millis(cli.tick_ms),
        vehicle: VehicleSettings {
            collision: CollisionPolicy::from_radius(cli.collision_radius),
            ..VehicleSettings::default()
        },
    };

    info!(
        "Starting simulation: sim time {}s, learning {}",
        cli.sim_time,
        if cli.use_rl { "on" } else { "off" }
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("Failed to start async runtime")?;
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, async move {
        let mut world = SimWorld::build(config, options).context("Failed to build world")?;
        let summary = world.run(cli.sim_time).await?;
        world.shutdown();
        summary.log();
        Ok(())
    })
}
