//! CLI entry point for pi-scan.
//!
//! # Usage
//!
//! Compile a scan and print the programs without touching hardware:
//! ```bash
//! pi-scan compile --set NX=10 --set DX=0.5
//! ```
//!
//! Configure and start a scan:
//! ```bash
//! pi-scan --config config/default.toml scan
//! ```
//!
//! Stop a running scan:
//! ```bash
//! pi-scan abort
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pi_scan::config::{ScanConfig, DEFAULT_CONFIG_PATH};
use pi_scan::controller::ScanController;
use pi_scan::logging;
use pi_scan::trajectory::TrajectoryCompiler;
use pi_scan::transform::{CoordinateTransform, Orientation, Point3};
use pi_scan::validation::validate;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "pi-scan")]
#[command(about = "Raster step scans on PI piezo controllers", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log commands instead of sending them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Override a scan parameter, e.g. `--set NX=20`
    #[arg(long = "set", global = true, value_name = "NAME=VALUE", value_parser = parse_assignment)]
    overrides: Vec<(String, f64)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, compile and send the setup program
    Configure,
    /// Configure, then start the scan
    Scan,
    /// Stop both wave generators and all motion
    Abort,
    /// Close the servo loop on every axis
    Servo,
    /// Print the compiled programs without connecting
    Compile,
    /// Convert a point between the stage and lab frames
    Transform {
        x: f64,
        y: f64,
        z: f64,
        /// Yaw in degrees (defaults to the configured THETA)
        #[arg(long)]
        theta: Option<f64>,
        #[arg(long, default_value_t = 0.0)]
        pitch: f64,
        #[arg(long, default_value_t = 0.0)]
        roll: f64,
        #[arg(long, value_enum, default_value_t = Direction::Forward)]
        direction: Direction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Direction {
    /// Stage frame to lab frame
    Forward,
    /// Lab frame to stage frame
    Inverse,
}

fn parse_assignment(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid value for {name}: {e}"))?;
    Ok((name.trim().to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ScanConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if cli.dry_run {
        config.controller.dry_run = true;
    }
    for (name, value) in &cli.overrides {
        config.scan.set(name, *value)?;
    }
    config.validate()?;
    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;

    match cli.command {
        Commands::Compile => compile(&config),
        Commands::Transform {
            x,
            y,
            z,
            theta,
            pitch,
            roll,
            direction,
        } => {
            let transform = CoordinateTransform::new(config.scan.theta);
            let orientation = Orientation { theta, pitch, roll };
            let point = Point3::new(x, y, z);
            let result = match direction {
                Direction::Forward => transform.forward_with(point, orientation),
                Direction::Inverse => transform.inverse_with(point, orientation),
            };
            println!("{:.6} {:.6} {:.6}", result.x, result.y, result.z);
            Ok(())
        }
        command => run_on_controller(command, &config).await,
    }
}

fn compile(config: &ScanConfig) -> Result<()> {
    let report = validate(&config.scan, &config.limits)
        .map_err(|reasons| anyhow!("Parameter checks failed: {}", reasons.join("; ")))?;
    let compiler = TrajectoryCompiler::new(config.axes);
    let compiled = compiler.compile(&config.scan);

    println!(
        "# {:.0} wavetable points ({:.1}% of capacity)",
        report.total_points, report.capacity_used_percent
    );
    for buffer in [
        &compiled.setup,
        &compiled.start,
        &compiler.stop_buffer(),
        &compiler.servo_buffer(),
    ] {
        println!("# {}", buffer.name());
        println!("{}", buffer.render());
    }
    Ok(())
}

async fn run_on_controller(command: Commands, config: &ScanConfig) -> Result<()> {
    let mut controller = ScanController::from_config(config).await?;

    let outcome = match command {
        Commands::Configure => controller.configure(config.scan.clone()).await.map(|_| ()),
        Commands::Scan => controller.run(config.scan.clone()).await.map(|_| ()),
        Commands::Abort => controller.abort().await,
        Commands::Servo => controller.enable_servos().await,
        Commands::Compile | Commands::Transform { .. } => Ok(()),
    };
    info!("Controller state: {}", controller.state());
    controller.close().await?;

    outcome?;
    Ok(())
}
