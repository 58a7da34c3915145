use core::time::Duration;

use windlass_physics::{Len, LenExt as _};
use windlass_protocol::Direction;

use crate::{position::Motion, prefs::Preferences, time::Instant};

const NAMESPACE: &str = "chain";
const KEY: &str = "length";

/// Turns gypsy sensor pulses into meters of chain.
///
/// The count is saved after every pulse, so that a power cut with chain out
/// doesn't leave us thinking the anchor is stowed.
#[derive(Clone, Debug)]
pub struct ChainCounter {
    per_pulse: Len,
    length: Len,
}

impl ChainCounter {
    /// A counter where each pulse is one turn of a gypsy with the given
    /// circumference.
    pub fn new(per_pulse: Len) -> Self {
        ChainCounter {
            per_pulse,
            length: 0.0.m(),
        }
    }

    /// A counter starting from whatever length was saved last.
    pub fn restore<P: Preferences>(per_pulse: Len, prefs: &mut P) -> Self {
        let length = match prefs.load(NAMESPACE, KEY) {
            Ok(Some(x)) if x.is_finite() && x >= 0.0 => x,
            Ok(_) => 0.0,
            Err(e) => {
                log::warn!("failed to load chain length: {e:?}");
                0.0
            }
        };
        log::info!("restored chain length {length:.2} m");
        ChainCounter {
            per_pulse,
            length: length.m(),
        }
    }

    pub fn length(&self) -> Len {
        self.length
    }

    /// Counts one turn of the gypsy.
    ///
    /// With nothing driving the motor the chain can only be running out under
    /// its own weight, so free fall counts as paying out.
    pub fn pulse<P: Preferences>(&mut self, direction: Direction, prefs: &mut P) -> Len {
        self.length = match direction {
            Direction::Down | Direction::FreeFall => self.length + self.per_pulse,
            Direction::Up => {
                let shorter = self.length - self.per_pulse;
                if shorter.get() < 0.0 {
                    0.0.m()
                } else {
                    shorter
                }
            }
        };
        self.save(prefs);
        self.length
    }

    /// Declares that no chain is out.
    pub fn reset<P: Preferences>(&mut self, prefs: &mut P) {
        log::info!("chain counter reset (was {:.2} m)", self.length.get());
        self.length = 0.0.m();
        self.save(prefs);
    }

    fn save<P: Preferences>(&self, prefs: &mut P) {
        if let Err(e) = prefs.store(NAMESPACE, KEY, self.length.get()) {
            log::warn!("failed to save chain length: {e:?}");
        }
    }
}

/// Works out which way the chain is going, for display.
///
/// When the motor stops the chain keeps its last direction for a little
/// while, since the gypsy doesn't stop instantly. After that we assume it's
/// in free fall.
#[derive(Clone, Debug)]
pub struct DirectionSense {
    hold: Duration,
    current: Direction,
    last_driven: Option<Instant>,
}

impl Default for DirectionSense {
    fn default() -> Self {
        DirectionSense::new(Duration::from_secs(2))
    }
}

impl DirectionSense {
    pub fn new(hold: Duration) -> Self {
        DirectionSense {
            hold,
            current: Direction::FreeFall,
            last_driven: None,
        }
    }

    pub fn current(&self) -> Direction {
        self.current
    }

    pub fn update(&mut self, motion: Motion, now: Instant) -> Direction {
        match motion {
            Motion::PayingOut => {
                self.current = Direction::Down;
                self.last_driven = Some(now);
            }
            Motion::HaulingIn => {
                self.current = Direction::Up;
                self.last_driven = Some(now);
            }
            Motion::Idle => {
                let expired = self
                    .last_driven
                    .map_or(true, |t| now.saturating_duration_since(t) >= self.hold);
                if expired {
                    self.current = Direction::FreeFall;
                    self.last_driven = None;
                }
            }
        }
        self.current
    }
}
