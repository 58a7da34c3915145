#![no_std]

use serde::{Deserialize, Serialize};

/// Commands accepted by the windlass. Amounts are in meters of chain.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Cmd {
    PayOut(f32),
    HaulIn(f32),
    Stop,
    // Staged deployment to `scope` times the effective depth.
    Deploy { scope: f32 },
    Retrieve,
    // Tell the windlass that there's currently no chain out.
    ResetCounter,
}

/// Last known values from the instrument network, in meters and m/s.
///
/// Any field can be NaN or [`Telemetry::NO_DATA`] if the value was never
/// received.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub depth: f32,
    pub distance: f32,
    pub wind_speed: f32,
    pub tide_now: f32,
    pub tide_high: f32,
}

impl Telemetry {
    pub const NO_DATA: f32 = -999.0;
}

impl Default for Telemetry {
    fn default() -> Self {
        Telemetry {
            depth: Self::NO_DATA,
            distance: Self::NO_DATA,
            wind_speed: Self::NO_DATA,
            tide_now: Self::NO_DATA,
            tide_high: Self::NO_DATA,
        }
    }
}

/// Stages of an automatic deployment, in the order they run.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    #[default]
    Idle,
    Drop,
    WaitTight,
    HoldDrop,
    DeployFirst,
    WaitFirst,
    HoldFirst,
    DeploySecond,
    WaitSecond,
    HoldSecond,
    DeployFinal,
    Complete,
}

impl Stage {
    /// The stage that follows this one. `Complete` wraps around to `Idle`.
    pub fn next(self) -> Stage {
        use Stage::*;
        match self {
            Idle => Drop,
            Drop => WaitTight,
            WaitTight => HoldDrop,
            HoldDrop => DeployFirst,
            DeployFirst => WaitFirst,
            WaitFirst => HoldFirst,
            HoldFirst => DeploySecond,
            DeploySecond => WaitSecond,
            WaitSecond => HoldSecond,
            HoldSecond => DeployFinal,
            DeployFinal => Complete,
            Complete => Idle,
        }
    }

    pub fn display_name(self) -> &'static str {
        use Stage::*;
        match self {
            Idle => "Idle",
            Drop => "Dropping anchor",
            WaitTight => "Waiting for chain to tighten",
            HoldDrop => "Letting anchor settle",
            DeployFirst => "Deploying 40%",
            WaitFirst => "Drifting back (40%)",
            HoldFirst => "Digging in (40%)",
            DeploySecond => "Deploying 80%",
            WaitSecond => "Drifting back (80%)",
            HoldSecond => "Setting anchor (80%)",
            DeployFinal => "Deploying 100%",
            Complete => "Deployment complete",
        }
    }
}

/// Which way the chain is moving.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Down,
    Up,
    // Nothing is driving the gypsy, but chain may still be running out
    // under its own weight.
    #[default]
    FreeFall,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Direction::Down => "down",
            Direction::Up => "up",
            Direction::FreeFall => "free fall",
        }
    }
}

/// What the windlass publishes about itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// Chain paid out, in meters.
    pub rode: f32,
    /// Current slack estimate, in meters. Negative means the anchor is dragging.
    pub slack: f32,
    pub stage: Stage,
    pub direction: Direction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_run_in_order() {
        let mut stage = Stage::Idle;
        let mut seen = 0;
        loop {
            let next = stage.next();
            if next == Stage::Idle {
                break;
            }
            assert!(next > stage);
            stage = next;
            seen += 1;
        }
        assert_eq!(seen, 11);
        assert_eq!(stage, Stage::Complete);
    }

    // Commands have to fit in a single BLE write without negotiating a larger MTU.
    #[test]
    fn commands_are_small() {
        for cmd in [
            Cmd::PayOut(12.5),
            Cmd::HaulIn(3.0),
            Cmd::Stop,
            Cmd::Deploy { scope: 5.0 },
            Cmd::Retrieve,
            Cmd::ResetCounter,
        ] {
            let bytes = postcard::to_allocvec(&cmd).unwrap();
            assert!(bytes.len() <= 20, "{cmd:?} encodes to {} bytes", bytes.len());
            assert_eq!(postcard::from_bytes::<Cmd>(&bytes).unwrap(), cmd);
        }
    }

    #[test]
    fn missing_telemetry_by_default() {
        let t = Telemetry::default();
        assert_eq!(t.depth, Telemetry::NO_DATA);
        assert_eq!(t.tide_high, Telemetry::NO_DATA);
    }
}
