//! # EMS Core
//!
//! Loads `ems.toml`, wires the simulated bridge and batteries, performs RT
//! setup and runs the scan cycle until Ctrl-C (or `--max-cycles`).

use clap::Parser;
use ems_common::config::LogLevel;
use ems_common::consts::DEFAULT_CONFIG_PATH;
use ems_core::config::{EngineConfig, load_config};
use ems_core::cycle::rt_setup;
use ems_core::runtime;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::Ordering;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// EMS Core: fixed-period scan-cycle runtime
#[derive(Parser, Debug)]
#[command(name = "ems_core")]
#[command(version)]
#[command(about = "Scan-cycle runtime for energy-management equipment")]
struct Args {
    /// Path to the runtime configuration.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Stop after this many ticks.
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Override `[rt].cpu_core`.
    #[arg(long)]
    cpu_core: Option<usize>,

    /// Override `[rt].priority` (SCHED_FIFO).
    #[arg(long)]
    rt_priority: Option<i32>,

    /// Validate the configuration, print the effective settings and exit.
    #[arg(long)]
    check: bool,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    let config = load_config(&args.config);
    let level = config
        .as_ref()
        .map(|c| c.shared.log_level)
        .unwrap_or_default();
    setup_tracing(&args, level);

    info!("EMS Core v{} starting...", env!("CARGO_PKG_VERSION"));

    let result = config
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)
        .and_then(|config| run(&args, config));
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("EMS Core shutdown complete");
}

fn run(args: &Args, mut config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    if args.cpu_core.is_some() {
        config.rt.cpu_core = args.cpu_core;
    }
    if args.rt_priority.is_some() {
        config.rt.priority = args.rt_priority;
    }
    config.validate()?;

    if args.check {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    info!(
        "Config OK: service={}, period={}ms, batteries={}",
        config.shared.service_name,
        config.cycle.period_ms,
        config.batteries.len()
    );

    rt_setup(&config.rt.params())?;

    let mut runtime = runtime::build(&config)?;

    let running = runtime.engine().running_flag();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running.store(false, Ordering::Release);
    })?;

    let stats = runtime.run(args.max_cycles)?;
    info!(
        "Ran {} cycles, {} overruns, max {:.1}ms, health {:?}",
        stats.cycle_count,
        stats.overruns,
        stats.max.as_secs_f64() * 1e3,
        stats.health()
    );
    Ok(())
}

fn setup_tracing(args: &Args, configured: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        configured.as_tracing()
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
