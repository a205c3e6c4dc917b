//! Fake arm - runs the pose pipeline against a simulated servo bus.
//!
//! Drop-in replacement for arm-driver that doesn't need serial hardware.
//! Every joint of the configuration gets a simulated servo; poses are read,
//! normalized, dispatched and settled exactly as on a real arm.
//!
//! Usage:
//!   fake-arm [OPTIONS]
//!
//! Options:
//!   --config <path>        Arm configuration (JSON, default: built-in 7-joint arm)
//!   --input <path>         Read poses from a file instead of stdin
//!   --settle-polls <n>     Status polls a simulated move takes (default: 3)
//!   --stuck <id>           Servo that never stops moving (repeatable)
//!   --missing <id>         Servo that never answers (repeatable)
//!
//! Examples:
//!   echo "0 0 0 0 0 0 0" | fake-arm
//!   fake-arm --input poses.txt --stuck 3

use anyhow::Result;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dxl_arm::bus::sim::DEFAULT_SETTLE_POLLS;
use dxl_arm::control_table::{GOAL_POSITION, PRESENT_POSITION};
use dxl_arm::{ArmConfig, ArmController, PoseReader, SimulatedBus};

/// Resting position of every simulated servo (center of travel).
const REST_POSITION: u16 = 512;

struct Args {
    config: Option<String>,
    input: Option<String>,
    settle_polls: u32,
    stuck: Vec<u8>,
    missing: Vec<u8>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut result = Args {
        config: None,
        input: None,
        settle_polls: DEFAULT_SETTLE_POLLS,
        stuck: Vec::new(),
        missing: Vec::new(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                result.config = Some(args[i + 1].clone());
                i += 2;
            }
            "--input" if i + 1 < args.len() => {
                result.input = Some(args[i + 1].clone());
                i += 2;
            }
            "--settle-polls" if i + 1 < args.len() => {
                if let Ok(n) = args[i + 1].parse() {
                    result.settle_polls = n;
                }
                i += 2;
            }
            "--stuck" if i + 1 < args.len() => {
                if let Ok(id) = args[i + 1].parse() {
                    result.stuck.push(id);
                }
                i += 2;
            }
            "--missing" if i + 1 < args.len() => {
                if let Ok(id) = args[i + 1].parse() {
                    result.missing.push(id);
                }
                i += 2;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    result
}

fn print_usage() {
    println!("Fake Arm - runs the pose pipeline against simulated servos");
    println!();
    println!("Usage: fake-arm [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <path>        Arm configuration (JSON, default: built-in 7-joint arm)");
    println!("  --input <path>         Read poses from a file instead of stdin");
    println!("  --settle-polls <n>     Status polls a simulated move takes (default: 3)");
    println!("  --stuck <id>           Servo that never stops moving (repeatable)");
    println!("  --missing <id>         Servo that never answers (repeatable)");
    println!();
    println!("Examples:");
    println!("  echo \"0 0 0 0 0 0 0\" | fake-arm");
    println!("  fake-arm --input poses.txt --stuck 3");
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dxl_arm=info".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    let args = parse_args();

    let config = match &args.config {
        Some(path) => ArmConfig::load(std::path::Path::new(path))?,
        None => ArmConfig::default(),
    };

    let mut bus = SimulatedBus::new(config.arm()?.ids(), REST_POSITION)
        .with_settle_polls(args.settle_polls)
        .without_call_log();
    for &id in &args.stuck {
        bus.set_stuck(id, true);
    }
    for &id in &args.missing {
        bus.disconnect(id);
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let release = config.release_torque_on_exit;
    let mut arm = ArmController::new(bus, config)?;

    tracing::info!("Fake arm started");
    tracing::info!("Joints: {:?}", arm.arm().ids());
    if !args.stuck.is_empty() {
        tracing::info!("Stuck servos: {:?}", args.stuck);
    }

    let missing = arm.missing_joints();
    if !missing.is_empty() {
        tracing::warn!("No answer from joints {:?}", missing);
    }

    arm.initialize()?;

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => {
            tracing::info!("Reading poses from stdin...");
            Box::new(BufReader::new(std::io::stdin()))
        }
    };
    let mut poses = PoseReader::new(reader, arm.arm().len());

    let result = dxl_arm::command::run(&mut arm, &mut poses, &running);

    if release {
        if let Err(e) = arm.release_torque() {
            tracing::error!("Failed to release torque: {}", e);
        }
    }

    let ids = arm.arm().ids();
    let bus = arm.into_bus();
    for id in ids {
        tracing::info!(
            "Servo {}: goal {:?}, present {:?}",
            id,
            bus.register(id, GOAL_POSITION.address),
            bus.register(id, PRESENT_POSITION.address)
        );
    }

    let summary = result?;
    tracing::info!(
        "Done: {} poses, {} clamped targets, {} status passes, {} bus transactions",
        summary.poses,
        summary.corrections,
        summary.passes,
        bus.transactions()
    );
    Ok(())
}
