//! # Greenhouse Actuator Control Core Supervisor
//!
//! Wires the registry (C1), state store (C2), bus adapter (C3), and
//! scheduler (C4-C8) into a running service: loads and validates
//! configuration, restores persisted actuator state, runs startup
//! calibration when the prior shutdown was unclean, then drives the
//! background watchdog/calibration tasks for the life of the process.
//!
//! The LLM-facing tool surface and the UECS-CCM XML codec are out of
//! scope (`spec.md` §1); this binary's own transport is a line-delimited
//! JSON [`ControlIntent`]/[`IntentResponse`] pipe over stdin/stdout, the
//! simplest thing any real transport (HTTP, gRPC, the LLM tool surface)
//! can be layered in front of without this binary needing to know which.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use greenhouse_bus::udp::UdpBusAdapter;
use greenhouse_bus::BusAdapter;
use greenhouse_common::config::{AppConfig, ConfigLoader};
use greenhouse_common::intent::ControlIntent;
use greenhouse_common::registry::ActuatorRegistry;
use greenhouse_core::scheduler::{Scheduler, SchedulerConfig};
use greenhouse_store::StateStore;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Greenhouse actuator control core supervisor.
#[derive(Parser, Debug)]
#[command(name = "greenhoused")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Priority-driven preemptive actuator scheduler for greenhouse control")]
#[command(long_about = None)]
struct Args {
    /// Path to the application configuration file (calibration/bus/store/queue/rain sections).
    #[arg(short, long, default_value = "/etc/greenhouse/config/app.toml")]
    config: PathBuf,

    /// Path to the actuator descriptor file (`[[actuator]]` entries).
    #[arg(short, long, default_value = "/etc/greenhouse/config/actuators.toml")]
    actuators: PathBuf,

    /// Override the persisted state file path from the config file.
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Enable verbose (debug) logging.
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_tracing(&args);

    if let Err(e) = run(args).await {
        error!("greenhoused startup failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    info!("greenhoused v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(&args.config)?;
    config.validate()?;

    let actuators_src = std::fs::read_to_string(&args.actuators)?;
    let registry = ActuatorRegistry::from_toml_str(&actuators_src)?;
    info!(actuators = registry.len(), "actuator registry loaded");

    let state_file = args.state_file.unwrap_or_else(|| config.store.state_file.clone().into());
    let store = Arc::new(StateStore::new(state_file));

    let multicast_addr = config.bus.multicast_addr.parse()?;
    let bus: Arc<dyn BusAdapter> = Arc::new(
        UdpBusAdapter::bind(multicast_addr, config.bus.port, config.bus.repeat_spacing_ms).await?,
    );

    let roof_window_ids: HashSet<String> = config.rain.roof_window_ids.iter().cloned().collect();
    let scheduler_config = SchedulerConfig {
        queue_depth: config.queue.depth,
        queue_ttl_sec: config.queue.queue_ttl_sec as f64,
        bus_repeat: config.bus.repeat,
        daily_reset_hour: config.calibration.daily_reset_hour,
        calibrate_on_startup: config.calibration.on_startup,
        roof_window_ids,
        watchdog_poll_ms: 1_000,
    };

    let (scheduler, needs_startup_calibration) =
        Scheduler::new(&registry, store, bus, scheduler_config)?;

    if needs_startup_calibration {
        warn!("restored state is stale or startup calibration requested, calibrating every actuator before accepting L3/L4 traffic");
        scheduler.calibrate_all_on_startup().await;
    }

    let _background = scheduler.spawn_background_tasks();

    let shutdown_signal = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received shutdown signal (Ctrl+C)"),
            Err(e) => error!("unable to listen for shutdown signal: {}", e),
        }
    };

    tokio::select! {
        result = run_intent_pipe(scheduler.clone()) => {
            if let Err(e) = result {
                error!("intent pipe closed: {}", e);
            }
        }
        _ = shutdown_signal => {
            info!("initiating graceful shutdown...");
        }
    }

    scheduler.shutdown().await;
    info!("greenhoused shutdown complete");
    Ok(())
}

/// Read line-delimited JSON [`ControlIntent`]s from stdin, submit each to
/// the scheduler, and write the resulting `IntentResponse` as a single
/// JSON line to stdout. Malformed input lines are reported on stdout as a
/// rejected response rather than closing the pipe.
async fn run_intent_pipe(scheduler: Scheduler) -> Result<(), std::io::Error> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ControlIntent>(&line) {
            Ok(intent) => scheduler.submit(intent).await,
            Err(e) => {
                warn!(error = %e, "malformed control intent, rejecting");
                greenhouse_common::intent::IntentResponse::from_error(
                    &greenhouse_common::error::CoreError::OutOfRange(format!(
                        "malformed intent: {e}"
                    )),
                )
            }
        };
        let mut out = serde_json::to_vec(&response).unwrap_or_default();
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }
    Ok(())
}

/// Set up the `tracing` subscriber from CLI flags, mirroring every other
/// binary in the workspace.
fn setup_tracing(args: &Args) {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
