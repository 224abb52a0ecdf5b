use anyhow::{anyhow, bail, Context};
use crabexposure::commands::analysis::analyze_frame;
use crabexposure::platform::{list_devices, NokhwaCamera};
use crabexposure::{AutoExposure, AutoExposureConfig, ControllerEvent};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn main() -> anyhow::Result<()> {
    crabexposure::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: crabexposure-cli <command> [args]");
        eprintln!("Commands: list-devices, analyze, run, config");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "list-devices" => cmd_list_devices(&args),
        "analyze" => cmd_analyze(&args),
        "run" => cmd_run(&args),
        "config" => cmd_config(&args),
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> anyhow::Result<&'a str> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{} requires a value", flag))
}

fn load_config(path: Option<&str>) -> anyhow::Result<AutoExposureConfig> {
    match path {
        Some(path) => AutoExposureConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path)),
        None => Ok(AutoExposureConfig::load_or_default()),
    }
}

fn cmd_list_devices(args: &[String]) -> anyhow::Result<()> {
    let devices = list_devices()?;
    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(&devices)?);
    } else {
        for d in devices {
            println!("{}: {}", d.id, d.name);
        }
    }
    Ok(())
}

fn cmd_analyze(args: &[String]) -> anyhow::Result<()> {
    // Parse args: analyze <image> [--samples <n>] [--seed <s>] [--config <path>] [--json]
    let mut image_path = None;
    let mut samples = None;
    let mut seed = None;
    let mut config_path = None;
    let mut json = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--samples" => {
                i += 1;
                samples = Some(flag_value(args, i, "--samples")?.parse::<usize>()?);
            }
            "--seed" => {
                i += 1;
                seed = Some(flag_value(args, i, "--seed")?.parse::<u64>()?);
            }
            "--config" => {
                i += 1;
                config_path = Some(flag_value(args, i, "--config")?);
            }
            "--json" => json = true,
            _ => {
                if image_path.is_none() {
                    image_path = Some(args[i].clone());
                }
            }
        }
        i += 1;
    }

    let image_path = image_path.ok_or_else(|| anyhow!("image path required"))?;
    let mut sampling = load_config(config_path)?.sampling;
    if let Some(samples) = samples {
        sampling.num_samples = samples;
    }
    if seed.is_some() {
        sampling.seed = seed;
    }

    let image = image::open(&image_path)
        .with_context(|| format!("Failed to open {}", image_path))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    let report = analyze_frame(image.as_raw(), width, height, &sampling)?;

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!("Frame: {}x{}", report.width, report.height);
        println!(
            "Window: {}x{} at ({}, {})",
            report.window.width, report.window.height, report.window.start_x, report.window.start_y
        );
        println!("Samples: {}", report.samples);
        println!("Estimated APL: {:.2}", report.estimated_apl);
        println!("Exact APL: {:.2}", report.exact_apl);
    }
    Ok(())
}

fn cmd_run(args: &[String]) -> anyhow::Result<()> {
    // Parse args: run <device_id> [--seconds <n>] [--config <path>] [--json]
    let mut device_id = None;
    let mut seconds = None;
    let mut config_path = None;
    let mut json = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--seconds" => {
                i += 1;
                seconds = Some(flag_value(args, i, "--seconds")?.parse::<u64>()?);
            }
            "--config" => {
                i += 1;
                config_path = Some(flag_value(args, i, "--config")?);
            }
            "--json" => json = true,
            _ => {
                if device_id.is_none() {
                    device_id = Some(args[i].clone());
                }
            }
        }
        i += 1;
    }

    let device_id = device_id.ok_or_else(|| anyhow!("device_id required"))?;
    let config = load_config(config_path)?;
    if let Err(e) = config.validate() {
        bail!("Invalid config: {}", e);
    }

    let interrupted = Arc::new(Notify::new());
    let notify = Arc::clone(&interrupted);
    ctrlc::set_handler(move || notify.notify_one()).context("Failed to install Ctrl-C handler")?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let camera = NokhwaCamera::open(&device_id)?;
        camera.start_stream()?;

        let handle = AutoExposure::new(config).start(Arc::new(camera.clone()), Box::new(camera));

        let deadline = async {
            match seconds {
                Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = interrupted.notified() => break,
                _ = &mut deadline => break,
                event = handle.wait_for_event() => match event {
                    Some(event) => {
                        print_event(&event, json)?;
                        if matches!(event, ControllerEvent::Stopped) {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        let status = handle.stop().await?;
        if json {
            println!("{}", serde_json::to_string(&status)?);
        } else {
            println!(
                "Stopped at exposure {:.0} after {} adjustments ({} failed)",
                status.current_exposure_time,
                status.adjustments_committed,
                status.adjustments_failed
            );
        }
        Ok::<(), anyhow::Error>(())
    })
}

fn print_event(event: &ControllerEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        ControllerEvent::Attached { capabilities } => match capabilities.bounds() {
            Some((min, max)) => println!("Attached, exposure range {}..{}", min, max),
            None => println!("Attached"),
        },
        ControllerEvent::Unsupported { reason } => println!("No exposure control: {}", reason),
        ControllerEvent::AdjustmentIssued { from, to, apl } => {
            println!("APL {:.1}: exposure {:.0} -> {:.0}", apl, from, to)
        }
        ControllerEvent::Adjusted { exposure_time } => println!("Applied {:.0}", exposure_time),
        ControllerEvent::ApplyFailed { reason } => println!("Apply failed: {}", reason),
        ControllerEvent::RestoreFailed { reason } => {
            println!("Could not restore auto exposure: {}", reason)
        }
        ControllerEvent::Stopped => println!("Stopped"),
    }
    Ok(())
}

fn cmd_config(args: &[String]) -> anyhow::Result<()> {
    // Parse args: config [--path <path>]
    let mut path = None;
    let mut i = 2;
    while i < args.len() {
        if args[i] == "--path" {
            i += 1;
            path = Some(flag_value(args, i, "--path")?);
        }
        i += 1;
    }

    let config = AutoExposureConfig::default();
    match path {
        Some(path) => {
            config.save_to_file(path)?;
            println!("Wrote default config to {}", path);
        }
        None => print!("{}", config.to_toml()?),
    }
    Ok(())
}
