use std::{cell::Cell, rc::Rc, time::Duration};

use windlass_control::{Actuator, Drive};
use windlass_physics::{LenExt as _, Vessel, KNOT};
use windlass_protocol::Telemetry;

/// The winch motor. Clones share the same contactors, so the simulation can
/// see what the controller is asking for.
#[derive(Clone, Debug, Default)]
pub struct Motor(Rc<Cell<Drive>>);

impl Motor {
    pub fn get(&self) -> Drive {
        self.0.get()
    }
}

impl Actuator for Motor {
    fn drive(&mut self, drive: Drive) {
        if self.0.get() != drive {
            log::debug!("motor: {drive:?}");
        }
        self.0.set(drive);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Helm {
    /// Engine off, blowing downwind until the chain holds us.
    Drifting,
    /// Motoring slowly up to the anchor.
    Motoring,
}

/// A boat lying to its anchor, and the winch on its bow.
pub struct Simulation {
    pub motor: Motor,
    pub vessel: Vessel,
    /// How fast the winch really is, in ms per meter.
    pub down_ms_per_m: f32,
    pub up_ms_per_m: f32,
    pub gypsy: f32,
    pub depth: f32,
    /// Wind in knots, if the instruments have it.
    pub wind: Option<f32>,
    pub helm: Helm,
    /// Chain actually out.
    pub chain: f32,
    /// Horizontal distance from the bow to the anchor.
    pub distance: f32,
    turns: i64,
}

impl Simulation {
    pub fn new(motor: Motor, vessel: Vessel, depth: f32) -> Self {
        Simulation {
            motor,
            vessel,
            down_ms_per_m: 1400.0,
            up_ms_per_m: 1800.0,
            gypsy: 0.25,
            depth,
            wind: None,
            helm: Helm::Drifting,
            chain: 0.0,
            distance: 0.0,
            turns: 0,
        }
    }

    fn drift_speed(&self) -> f32 {
        0.2 + 0.02 * self.wind.unwrap_or(10.0)
    }

    /// Where the boat settles with the current chain out.
    pub fn rest_distance(&self) -> f32 {
        let wind = self.wind.map(|w| w * KNOT);
        let drop = self.vessel.drop(self.depth.m());
        // The boat surges a little past the point where the chain takes up.
        self.vessel.horizontal_reach(self.chain.m(), drop, wind).get() * 1.02
    }

    /// Runs the world forward, returning the number of gypsy pulses.
    pub fn advance(&mut self, dt: Duration) -> u32 {
        let ms = dt.as_secs_f32() * 1000.0;
        match self.motor.get() {
            Drive::Off => {}
            Drive::PayOut => self.chain += ms / self.down_ms_per_m,
            Drive::HaulIn => self.chain = (self.chain - ms / self.up_ms_per_m).max(0.0),
        }

        let rest = self.rest_distance();
        let secs = dt.as_secs_f32();
        self.distance = match self.helm {
            Helm::Drifting => (self.distance + self.drift_speed() * secs).min(rest),
            Helm::Motoring => (self.distance - 0.5 * secs).max(0.0).min(rest),
        };

        let turns = (self.chain / self.gypsy).floor() as i64;
        let pulses = (turns - self.turns).unsigned_abs() as u32;
        self.turns = turns;
        pulses
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            depth: self.depth,
            distance: self.distance,
            wind_speed: self.wind.map_or(Telemetry::NO_DATA, |w| w * KNOT),
            ..Telemetry::default()
        }
    }
}
