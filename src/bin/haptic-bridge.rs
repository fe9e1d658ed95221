use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};
use clap::{Parser, Subcommand};
use log::{error, info};
use haptic_bridge::config::io::SettingsIO;
use haptic_bridge::device::btle::BtleTransport;
use haptic_bridge::device::transport::Transport;
use haptic_bridge::device::websocket::ButtplugTransport;
use haptic_bridge::error::AppRunError;
use haptic_bridge::{init_logging, Capability, HapticBridge, InMemoryTransport};

#[derive(Parser)]
#[command(version, about = "Scan for and command haptic devices")]
struct Cli {
    /// Settings file to use instead of the default location
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Use the in-memory transport with a vibrator of this name (repeatable)
    #[arg(long = "memory-device")]
    memory_devices: Vec<String>,

    /// Connect to a buttplug server (Intiface) at this address instead of using bluetooth
    #[arg(long, conflicts_with = "memory_devices")]
    websocket: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// List devices found within the scan period
    Devices {
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
    /// Scan and print events
    Scan {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Scan, then vibrate
    Vibrate {
        #[arg(long)]
        speed: f32,
        #[arg(long)]
        duration: f32,
        #[arg(long = "event")]
        events: Vec<String>,
        #[arg(long)]
        device: Option<String>,
        #[arg(long, default_value_t = 5)]
        scan_seconds: u64,
    },
    /// Enable a device and store the settings
    Enable { name: String },
    /// Disable a device and store the settings
    Disable { name: String },
    /// Subscribe a device to event tags and store the settings
    Events { name: String, tags: Vec<String> },
}

fn build_bridge(cli: &Cli) -> Result<HapticBridge, AppRunError> {
    let transport: Arc<dyn Transport> = if let Some(address) = &cli.websocket {
        Arc::new(ButtplugTransport::new(address))
    } else if cli.memory_devices.is_empty() {
        Arc::new(BtleTransport::new())
    } else {
        let mut memory = InMemoryTransport::new();
        for name in &cli.memory_devices {
            memory = memory.with_device(name, vec![Capability::Vibrate]);
        }
        Arc::new(memory)
    };

    let io = match &cli.settings {
        Some(path) => SettingsIO::at_path(path),
        None => SettingsIO::new()?,
    };
    Ok(HapticBridge::with_settings_file(transport, io)?)
}

fn print_events_for(bridge: &mut HapticBridge, period: Duration) {
    let start = Instant::now();
    loop {
        for event in bridge.poll_events() {
            println!("{}", event);
        }
        if start.elapsed() >= period {
            break;
        }
        sleep(Duration::from_millis(100));
    }
}

fn scan(bridge: &mut HapticBridge, seconds: u64) -> bool {
    if !bridge.connect() {
        for event in bridge.poll_events() {
            println!("{}", event);
        }
        return false;
    }
    bridge.scan_for_devices();
    print_events_for(bridge, Duration::from_secs(seconds));
    bridge.stop_scan();
    true
}

fn store(bridge: &HapticBridge) -> bool {
    let stored = bridge.settings_store();
    if !stored {
        error!("Failed to store settings");
    }
    stored
}

fn run(cli: Cli) -> Result<bool, AppRunError> {
    let mut bridge = build_bridge(&cli)?;

    let ok = match cli.command {
        CliCommand::Devices { seconds } => {
            let ok = scan(&mut bridge, seconds);
            for name in bridge.get_devices() {
                println!(
                    "{}\tconnected={}\tenabled={}\tcapabilities={:?}\tevents={:?}",
                    name,
                    bridge.get_device_connected(&name),
                    bridge.settings_get_enabled(&name),
                    bridge.get_device_capabilities(&name),
                    bridge.settings_get_events(&name),
                );
            }
            ok
        },
        CliCommand::Scan { seconds } => scan(&mut bridge, seconds),
        CliCommand::Vibrate { speed, duration, events, device, scan_seconds } => {
            if !scan(&mut bridge, scan_seconds) {
                return Ok(false);
            }

            let queued = match device {
                Some(name) => bridge.vibrate_device(&name, speed, duration),
                None if events.is_empty() => bridge.vibrate(speed, duration),
                None => bridge.vibrate_events(speed, duration, events),
            };

            let wait = Duration::try_from_secs_f32(duration.max(0.0) + 1.0).unwrap_or(Duration::from_secs(5));
            print_events_for(&mut bridge, wait);
            bridge.stop_all();
            queued
        },
        CliCommand::Enable { name } => {
            bridge.settings_set_enabled(&name, true);
            store(&bridge)
        },
        CliCommand::Disable { name } => {
            bridge.settings_set_enabled(&name, false);
            store(&bridge)
        },
        CliCommand::Events { name, tags } => {
            bridge.settings_set_events(&name, tags);
            store(&bridge)
        },
    };

    bridge.close();
    Ok(ok)
}

fn main() -> ExitCode {
    if let Err(err) = init_logging() {
        eprintln!("Failed to initialize logger: {}", err);
    }
    info!(concat!("haptic-bridge ", env!("CARGO_PKG_VERSION")));

    match run(Cli::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("Unexpected error: {}", err);
            ExitCode::FAILURE
        },
    }
}
