//! Arm driver - streams poses from stdin or a file to a servo arm.
//!
//! Usage: arm-driver <port> [baud_rate] [OPTIONS]
//!
//! Options:
//!   --config <path>       Arm configuration (JSON, default: built-in 7-joint arm)
//!   --input <path>        Read poses from a file instead of stdin
//!   --abort-on-error      Stop at the first failed joint operation
//!   --release             Disable torque on all joints before exiting
//!   --write-config <path> Write the effective configuration and exit
//!
//! Examples:
//!   arm-driver /dev/ttyUSB0                                  # defaults, poses on stdin
//!   arm-driver /dev/ttyUSB0 57600 --config arm.json --input poses.txt

use anyhow::Result;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dxl_arm::{ArmConfig, ArmController, FailurePolicy, PoseReader, SerialBus};

struct Args {
    port: String,
    baud_rate: Option<u32>,
    config: Option<PathBuf>,
    input: Option<PathBuf>,
    abort_on_error: bool,
    release: bool,
    write_config: Option<PathBuf>,
}

fn parse_args() -> Option<Args> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        return None;
    }

    let mut port = None;
    let mut baud_rate = None;
    let mut config = None;
    let mut input = None;
    let mut abort_on_error = false;
    let mut release = false;
    let mut write_config = None;
    let mut i = 1;

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--config" | "--input" | "--write-config" => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("Error: {} requires a path argument", arg);
                    return None;
                };
                let path = Some(PathBuf::from(value));
                match arg.as_str() {
                    "--config" => config = path,
                    "--input" => input = path,
                    _ => write_config = path,
                }
                i += 2;
                continue;
            }
            "--abort-on-error" => abort_on_error = true,
            "--release" => release = true,
            "--help" | "-h" => return None,
            _ => {
                // First positional arg is port, second is baud_rate
                if port.is_none() {
                    port = Some(arg.clone());
                } else if let Ok(br) = arg.parse::<u32>() {
                    baud_rate = Some(br);
                } else {
                    eprintln!("Error: unexpected argument {}", arg);
                    return None;
                }
            }
        }
        i += 1;
    }

    Some(Args {
        port: port?,
        baud_rate,
        config,
        input,
        abort_on_error,
        release,
        write_config,
    })
}

fn print_usage() {
    println!("Usage: arm-driver <port> [baud_rate] [OPTIONS]");
    println!();
    println!("Reads poses (one radian value per joint, whitespace separated) and");
    println!("drives the arm to each one in turn.");
    println!();
    println!("Options:");
    println!("  --config <path>       Arm configuration (JSON, default: built-in 7-joint arm)");
    println!("  --input <path>        Read poses from a file instead of stdin");
    println!("  --abort-on-error      Stop at the first failed joint operation");
    println!("  --release             Disable torque on all joints before exiting");
    println!("  --write-config <path> Write the effective configuration and exit");
    println!();
    println!("Examples:");
    println!("  arm-driver /dev/ttyUSB0                                  # defaults, poses on stdin");
    println!("  arm-driver /dev/ttyUSB0 57600 --config arm.json --input poses.txt");
    println!();
    println!("Available ports:");
    match dxl_arm::list_ports() {
        Ok(ports) => {
            if ports.is_empty() {
                println!("  (none found)");
            } else {
                for port in ports {
                    println!("  {} - {:?}", port.name, port.port_type);
                }
            }
        }
        Err(e) => println!("  Error listing ports: {}", e),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dxl_arm=info".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    let args = match parse_args() {
        Some(a) => a,
        None => {
            print_usage();
            return Ok(());
        }
    };

    let mut config = match &args.config {
        Some(path) => ArmConfig::load(path)?,
        None => ArmConfig::default(),
    };
    if let Some(baud_rate) = args.baud_rate {
        config.baud_rate = baud_rate;
    }
    if args.abort_on_error {
        config.on_error = FailurePolicy::Abort;
    }
    if args.release {
        config.release_torque_on_exit = true;
    }
    config.validate()?;

    if let Some(path) = &args.write_config {
        config.save(path)?;
        tracing::info!("Configuration written to {}", path.display());
        return Ok(());
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let release = config.release_torque_on_exit;
    let bus = SerialBus::open(&args.port, config.baud_rate)?;
    let mut arm = ArmController::new(bus, config)?;

    tracing::info!("Arm driver started");
    tracing::info!("Port: {} @ {} baud", args.port, arm.config().baud_rate);
    tracing::info!("Joints: {:?}", arm.arm().ids());

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

    let summary = result?;
    tracing::info!(
        "Done: {} poses, {} clamped targets, {} status passes",
        summary.poses,
        summary.corrections,
        summary.passes
    );
    Ok(())
}
