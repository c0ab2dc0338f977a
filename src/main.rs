//! ds4stream - DualShock 4 Bluetooth audio CLI

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ds4stream::audio::{open_capture, StreamEngine};
use ds4stream::config::{Args, Command, StreamerSettings};
use ds4stream::device;
use ds4stream::hid::OutputMode;

fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.clone().unwrap_or_default();

    // The config command may be creating the file
    let settings = match (&command, &args.config) {
        (Command::Config { .. }, _) => StreamerSettings::default(),
        (_, Some(path)) => StreamerSettings::load(path)?,
        (_, None) => StreamerSettings::load_default()?,
    };

    // Initialize logging
    init_logging(&args, &settings)?;

    match command {
        Command::Start {
            device,
            headset,
            no_init,
            bitpool,
            microphone,
        } => {
            let mut settings = settings;
            if let Some(path) = device {
                settings.device_path = path;
            }
            if headset {
                settings.output_mode = OutputMode::Headset;
            }
            if no_init {
                settings.send_init_report = false;
            }
            if let Some(bitpool) = bitpool {
                settings.bitpool = bitpool;
            }
            if microphone {
                settings.loopback = false;
            }
            cmd_start(settings)
        }
        Command::Config { write } => cmd_config(write, args.config),
    }
}

fn init_logging(args: &Args, settings: &StreamerSettings) -> Result<()> {
    let level = args
        .log_level()
        .map(|level| level.to_string())
        .unwrap_or_else(|| settings.log_level.clone());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let log_file = args
        .log
        .clone()
        .or_else(|| (!settings.log_file.is_empty()).then(|| settings.log_file.clone()));

    if let Some(log_file) = log_file {
        let file = std::fs::File::create(&log_file)
            .with_context(|| format!("cannot create log file {}", log_file))?;
        subscriber.with_writer(file).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Stream to the controller until Ctrl+C or the device goes away
fn cmd_start(settings: StreamerSettings) -> Result<()> {
    println!("ds4stream - DualShock 4 Bluetooth audio\n");

    settings.validate()?;
    if settings.device_path.is_empty() {
        bail!("No controller given. Use --device or set device_path in the config file.");
    }

    let writer = device::open(&settings.device_path)?;
    let capture = open_capture(&settings.capture_options())?;

    let mut engine = StreamEngine::new(settings.to_engine_config());

    // Setup Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    #[cfg(windows)]
    {
        let _ = ctrlc::set_handler(move || {
            println!("\nReceived Ctrl+C, stopping...");
            r.store(false, Ordering::SeqCst);
        });
    }
    #[cfg(not(windows))]
    {
        drop(r);
    }

    match engine.start(capture, writer) {
        Ok(()) => {
            if let Some(format) = engine.format() {
                println!("Capture format: {}", format);
            }
            println!(
                "Output: {:?}, bitpool {}",
                settings.output_mode, settings.bitpool
            );
            println!("\nStreaming. Press Ctrl+C to stop.\n");
        }
        Err(e) => {
            error!("Failed to start engine: {}", e);
            return Err(e.into());
        }
    }

    while running.load(Ordering::SeqCst) && engine.is_running() {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    if running.load(Ordering::SeqCst) {
        if device::is_connected(&settings.device_path) {
            warn!("Streaming ended while the controller is still present");
        } else {
            warn!("Controller disconnected");
        }
    }

    match engine.stop() {
        Ok(()) => {
            println!("Stopped.");
            Ok(())
        }
        Err(e) if e.is_fatal() => {
            error!("Streaming session lost: {}", e);
            Err(e.into())
        }
        Err(e) => {
            warn!("Stopped with error: {}", e);
            Err(e.into())
        }
    }
}

/// Print or write the sample configuration
fn cmd_config(write: bool, path: Option<PathBuf>) -> Result<()> {
    if !write {
        print!("{}", StreamerSettings::sample_config());
        return Ok(());
    }

    let path = match path.or_else(StreamerSettings::default_path) {
        Some(path) => path,
        None => bail!("No configuration directory on this system, pass --config"),
    };

    if path.exists() {
        bail!("{} already exists", path.display());
    }

    StreamerSettings::write_sample(&path)?;
    info!("Wrote sample configuration to {}", path.display());
    println!("Wrote {}", path.display());

    Ok(())
}
