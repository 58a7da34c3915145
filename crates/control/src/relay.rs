use embedded_hal::digital::v2::{OutputPin, PinState};

/// What the winch motor is being asked to do.
///
/// There is deliberately no way to ask for both directions at once: the
/// contactors short the motor supply if both are closed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Drive {
    #[default]
    Off,
    PayOut,
    HaulIn,
}

/// Something that can run the winch motor.
pub trait Actuator {
    fn drive(&mut self, drive: Drive);
}

impl<A: Actuator + ?Sized> Actuator for &mut A {
    fn drive(&mut self, drive: Drive) {
        (**self).drive(drive)
    }
}

/// The usual windlass wiring: one relay for "down", one for "up".
pub struct Relays<D, U> {
    down: D,
    up: U,
    current: Drive,
}

impl<D, U> Relays<D, U>
where
    D: OutputPin,
    U: OutputPin,
    D::Error: core::fmt::Debug,
    U::Error: core::fmt::Debug,
{
    /// Takes ownership of the pins and opens both relays.
    pub fn new(down: D, up: U) -> Self {
        let mut ret = Relays {
            down,
            up,
            current: Drive::Off,
        };
        ret.apply(Drive::Off);
        ret
    }

    pub fn current(&self) -> Drive {
        self.current
    }

    pub fn release(self) -> (D, U) {
        (self.down, self.up)
    }

    fn apply(&mut self, drive: Drive) {
        // Whatever we're switching to, the relay we aren't using gets opened
        // before the other one closes.
        let (down, up) = match drive {
            Drive::Off => (false, false),
            Drive::PayOut => (true, false),
            Drive::HaulIn => (false, true),
        };
        if !down {
            set(&mut self.down, false);
        }
        if !up {
            set(&mut self.up, false);
        }
        if down {
            set(&mut self.down, true);
        }
        if up {
            set(&mut self.up, true);
        }
        self.current = drive;
    }
}

fn set<P>(pin: &mut P, on: bool)
where
    P: OutputPin,
    P::Error: core::fmt::Debug,
{
    if let Err(e) = pin.set_state(PinState::from(on)) {
        log::error!("failed to switch relay: {e:?}");
    }
}

impl<D, U> Actuator for Relays<D, U>
where
    D: OutputPin,
    U: OutputPin,
    D::Error: core::fmt::Debug,
    U::Error: core::fmt::Debug,
{
    fn drive(&mut self, drive: Drive) {
        if drive != self.current {
            log::debug!("relays {:?} -> {:?}", self.current, drive);
        }
        // Re-applying the same state is harmless, and it recovers from a pin
        // write that failed last time.
        self.apply(drive);
    }
}
