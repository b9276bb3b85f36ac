mod scenario;
mod simulation;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use market_provider::ResultPosting;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scenario::Scenario;
use simulation::Simulation;

#[derive(Parser, Debug)]
#[command(name = "market-sim")]
#[command(about = "Compute marketplace simulation: resource providers agreeing to matches and posting results over simulated time")]
struct Args {
    /// JSON scenario file; a round-robin scenario is generated when absent
    #[arg(short, long, env = "MARKET_SIM_SCENARIO")]
    scenario: Option<PathBuf>,

    #[arg(short, long, default_value = "3")]
    providers: usize,

    #[arg(short, long, default_value = "6")]
    matches: usize,

    #[arg(short, long, default_value = "12")]
    ticks: u64,

    /// Result posting policy for generated providers (once, every-tick)
    #[arg(long, default_value = "once")]
    posting: ResultPosting,

    /// Wall-clock pause between ticks
    #[arg(long, default_value = "0")]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting marketplace simulation");

    let scenario = match &args.scenario {
        Some(path) => Scenario::load(path)?,
        None => Scenario::generate(args.providers, args.matches, args.ticks, args.posting)?,
    };
    scenario.validate()?;
    info!(
        "{} providers, {} planned matches, {} ticks",
        scenario.providers.len(),
        scenario.matches.len(),
        scenario.ticks
    );

    let mut sim = Simulation::new(&scenario)?;
    run(&mut sim, scenario.ticks, args.tick_ms).await?;

    sim.log_summary();
    println!("{}", serde_json::to_string_pretty(&sim.summary())?);

    Ok(())
}

/// Main clock loop
async fn run(sim: &mut Simulation, ticks: u64, tick_ms: u64) -> Result<()> {
    while sim.tick() < ticks {
        let posted = sim.step()?;
        if posted > 0 {
            info!("Tick {}: {} results posted", sim.tick() - 1, posted);
        }

        if tick_ms > 0 {
            tokio::time::sleep(Duration::from_millis(tick_ms)).await;
        }
    }
    Ok(())
}
