use std::time::{Duration, Instant};

use crate::device::constants::{SPEED_MAX, SPEED_MIN};

/// Normalized actuation strength in [0.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Speed(f32);

impl Speed {
    /// Clamps `value` into the valid range. The flag is true if the value had to be changed.
    /// NaN is treated as a request to stop.
    pub fn clamped(value: f32) -> (Speed, bool) {
        if value.is_nan() {
            return (Speed(SPEED_MIN), true);
        }

        let speed = value.clamp(SPEED_MIN, SPEED_MAX);
        (Speed(speed), speed != value)
    }

    pub fn max() -> Speed {
        Speed(SPEED_MAX)
    }

    pub fn zero() -> Speed {
        Speed(SPEED_MIN)
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandDuration {
    Timed(Duration),
    /// until superseded or stopped
    Infinite,
}

impl CommandDuration {
    /// Host durations are seconds. `+inf`, and anything too long to represent, means infinite;
    /// negative and NaN durations revert immediately.
    pub fn from_secs_f32(secs: f32) -> CommandDuration {
        if secs.is_nan() || secs <= 0.0 {
            return CommandDuration::Timed(Duration::ZERO);
        }

        match Duration::try_from_secs_f32(secs) {
            Ok(duration) => CommandDuration::Timed(duration),
            Err(_) => CommandDuration::Infinite,
        }
    }

    pub fn from_millis(millis: u64) -> CommandDuration {
        CommandDuration::Timed(Duration::from_millis(millis))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Device(String),
    /// devices subscribed to any of the tags; no tags matches no device
    Events(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Vibrate { speed: Speed, clamped: bool, duration: CommandDuration },
    Stop,
}

#[derive(Debug, Clone)]
pub struct Command {
    pub scope: Scope,
    pub action: Action,
    pub issued: Instant,
    pub expires: Option<Instant>,
}

impl Command {
    pub fn vibrate(scope: Scope, speed: f32, duration: CommandDuration) -> Command {
        let (speed, clamped) = Speed::clamped(speed);
        let issued = Instant::now();
        let expires = match duration {
            CommandDuration::Timed(d) => issued.checked_add(d),
            CommandDuration::Infinite => None,
        };

        Command {
            scope,
            action: Action::Vibrate { speed, clamped, duration },
            issued,
            expires,
        }
    }

    pub fn stop(scope: Scope) -> Command {
        Command { scope, action: Action::Stop, issued: Instant::now(), expires: None }
    }
}
