use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use runtime::{MonotonicClock, RunConfig, Session};
use sim::{NoisySensor, TankRig, VesselParams};
use tracing::{info, warn, Level};

mod operator;

#[derive(Parser, Debug)]
#[command(
    name = "tank-positioning",
    version,
    about = "Hold a vessel at a setpoint in the test tank (simulated rig)"
)]
struct Args {
    /// TOML run configuration; missing sections use the defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Control loop period in milliseconds
    #[arg(long)]
    period_ms: Option<u64>,

    /// Data log period in milliseconds
    #[arg(long)]
    log_period_ms: Option<u64>,

    /// Tab-separated data log written during the run
    #[arg(long)]
    log_path: Option<PathBuf>,

    /// Initial setpoint relative to the calibrated start point
    #[arg(long, allow_negative_numbers = true)]
    setpoint_offset: Option<f64>,

    /// Stop automatically after this many seconds
    #[arg(long)]
    seconds: Option<f64>,

    /// RNG seed for the simulated sensor noise
    #[arg(long)]
    seed: Option<u64>,

    /// Skip the plot at the end of the run
    #[arg(long, default_value_t = false)]
    no_plot: bool,

    /// Log per-tick detail
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn run_config(&self) -> Result<RunConfig> {
        let mut cfg = match &self.config {
            Some(path) => RunConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => RunConfig::default(),
        };
        if let Some(v) = self.period_ms {
            cfg.control.period_ms = v;
        }
        if let Some(v) = self.log_period_ms {
            cfg.control.log_period_ms = v;
        }
        if let Some(v) = &self.log_path {
            cfg.output.log_path = v.clone();
        }
        if let Some(v) = self.setpoint_offset {
            cfg.control.setpoint_offset = v;
        }
        if let Some(v) = self.seed {
            cfg.sim.seed = v;
        }
        if self.no_plot {
            cfg.output.plot = false;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let cfg = args.run_config()?;

    let clock = Arc::new(MonotonicClock);
    let (sensor, actuator) = TankRig::new(
        VesselParams::default(),
        cfg.sim.start_position,
        NoisySensor::new(cfg.sim.noise_std, cfg.sim.seed),
        clock.clone(),
    );

    // stdout carries one JSON object per logged sample
    let session = Session::start(&cfg, Box::new(sensor), Box::new(actuator), clock, |record| {
        match serde_json::to_string(record) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "failed to encode record"),
        }
    })
    .with_context(|| format!("starting run, data log {}", cfg.output.log_path.display()))?;

    // Blocks on stdin, so it is left detached.
    {
        let state = session.state().clone();
        let increment = cfg.control.setpoint_increment;
        thread::Builder::new().name("operator".into()).spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match operator::parse(&line, increment) {
                    Ok(cmd) => operator::apply(&state, cmd),
                    Err(msg) => warn!("{msg}"),
                }
                if !state.running() {
                    break;
                }
            }
        })?;
    }

    if let Some(seconds) = args.seconds.filter(|s| *s > 0.0) {
        let signal = session.state().shutdown_signal();
        if !signal.wait_timeout(Duration::from_secs_f64(seconds)) {
            info!(seconds, "run time elapsed");
            session.state().request_shutdown();
        }
    }

    let report = session.finish()?;
    info!(
        ticks = report.control.ticks,
        overruns = report.control.overruns,
        max_tick = ?report.control.max_tick,
        rows = report.rows,
        "run finished"
    );
    Ok(())
}
