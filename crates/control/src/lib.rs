#![cfg_attr(not(feature = "std"), no_std)]

//! The windlass control core.
//!
//! Nothing in here reads a clock, talks to the network or sleeps: callers
//! feed in telemetry, chain-counter pulses and the current time, and the core
//! decides which way (if any) the motor should run.

use windlass_physics::{valid, Len, LenExt as _};

pub mod config;
pub mod counter;
pub mod deploy;
pub mod position;
pub mod prefs;
pub mod relay;
pub mod retrieve;
pub mod time;
pub mod windlass;

#[cfg(test)]
mod testing;

pub use config::{ConfigBuilder, WinchConfig};
pub use counter::{ChainCounter, DirectionSense};
pub use deploy::{Deployment, DeploymentPolicy, Plan, StartError};
pub use position::{Calibration, Lease, Motion, PositionController};
pub use prefs::{FlashError, FlashPreferences, Preferences};
#[cfg(feature = "std")]
pub use prefs::MemoryPreferences;
pub use relay::{Actuator, Drive, Relays};
pub use retrieve::{ResumeThreshold, Retrieval, RetrievalPolicy, RetrievalState};
pub use time::{Instant, Periodic};
pub use windlass::{Events, Windlass};
pub use windlass_physics::{Vessel, VesselBuilder};
pub use windlass_protocol::{Cmd, Direction, Stage, Status, Telemetry};

/// The last known readings from the boat's instruments, with missing or
/// garbage values already filtered out.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Environment {
    pub depth: Option<f32>,
    pub distance: Option<f32>,
    pub wind_speed: Option<f32>,
    pub tide_now: Option<f32>,
    pub tide_high: Option<f32>,
}

impl From<Telemetry> for Environment {
    fn from(t: Telemetry) -> Self {
        Environment {
            depth: valid(t.depth),
            distance: valid(t.distance),
            wind_speed: valid(t.wind_speed),
            tide_now: valid(t.tide_now),
            tide_high: valid(t.tide_high),
        }
    }
}

impl Environment {
    /// Depth below the surface, or zero if we don't know it.
    pub fn depth(&self) -> Len {
        positive(self.depth).m()
    }

    /// Horizontal distance from the bow to the anchor, or zero if we don't
    /// know it.
    pub fn distance(&self) -> Len {
        positive(self.distance).m()
    }
}

fn positive(x: Option<f32>) -> f32 {
    match x {
        Some(x) if x > 0.01 => x,
        _ => 0.0,
    }
}

/// A state machine moved from one state to another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition<S> {
    pub from: S,
    pub to: S,
}
