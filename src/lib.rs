use std::env;
use std::str::FromStr;

pub mod bridge;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod session;

pub use bridge::{HapticBridge, SessionState};
pub use device::memory::InMemoryTransport;
pub use device::types::{Capability, Device, DeviceStatus};
pub use event::types::{CommandFailure, Event, EventKind};

/// Installs the logger: stderr, plus the file named by `LOG_FILE` if set. `LOG_LEVEL`
/// (error, warn, info, debug, trace) overrides the default `info` level.
pub fn init_logging() -> Result<(), fern::InitError> {
    let level = env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| log::LevelFilter::from_str(&level).ok())
        .unwrap_or(log::LevelFilter::Info);

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("btleplug", log::LevelFilter::Warn)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(fern::log_file(log_file)?);
    }

    dispatch.apply()?;
    Ok(())
}
