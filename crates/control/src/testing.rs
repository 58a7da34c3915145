//! Fake hardware for the unit tests.

use std::{cell::RefCell, convert::Infallible, rc::Rc};

use embedded_hal::digital::v2::OutputPin;
use windlass_physics::{Len, LenExt as _};

use crate::{
    config::WinchConfig, prefs::MemoryPreferences, relay::Relays, time::Instant, Motion,
    PositionController, Vessel,
};

#[derive(Debug, Default)]
struct Pins {
    down: bool,
    up: bool,
    overlaps: usize,
}

/// A pair of relay outputs that remembers whether they were ever both on.
#[derive(Clone, Debug, Default)]
pub struct Board(Rc<RefCell<Pins>>);

impl Board {
    pub fn down_pin(&self) -> Pin {
        Pin {
            board: self.clone(),
            down: true,
        }
    }

    pub fn up_pin(&self) -> Pin {
        Pin {
            board: self.clone(),
            down: false,
        }
    }

    pub fn down(&self) -> bool {
        self.0.borrow().down
    }

    pub fn up(&self) -> bool {
        self.0.borrow().up
    }

    /// How many times both outputs were on at once.
    pub fn overlaps(&self) -> usize {
        self.0.borrow().overlaps
    }
}

pub struct Pin {
    board: Board,
    down: bool,
}

impl Pin {
    fn set(&mut self, on: bool) {
        let mut pins = self.board.0.borrow_mut();
        if self.down {
            pins.down = on;
        } else {
            pins.up = on;
        }
        if pins.down && pins.up {
            pins.overlaps += 1;
        }
    }
}

impl OutputPin for Pin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        self.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.set(true);
        Ok(())
    }
}

pub type TestController = PositionController<Relays<Pin, Pin>, MemoryPreferences>;

pub fn ms(ms: u64) -> Instant {
    Instant::from_millis(ms)
}

/// The configuration most tests use: 2 to 80 meters, stopping at 75.
pub fn config() -> WinchConfig {
    crate::ConfigBuilder::default()
        .with_limits(2.0.m(), 80.0.m())
        .with_stop_before_max(75.0.m())
        .build()
}

pub fn controller(config: WinchConfig) -> (TestController, Board) {
    let board = Board::default();
    let relays = Relays::new(board.down_pin(), board.up_pin());
    let ctl = PositionController::new(
        config,
        Vessel::default(),
        relays,
        MemoryPreferences::default(),
    );
    (ctl, board)
}

/// A winch that moves at a fixed speed whenever its relays are closed.
pub struct Rig {
    pub ctl: TestController,
    pub board: Board,
    pub now: Instant,
    /// Meters of chain per 100ms tick.
    pub step: f32,
}

impl Rig {
    pub fn new(config: WinchConfig, position: Len) -> Self {
        let (mut ctl, board) = controller(config);
        ctl.set_position(position);
        Rig {
            ctl,
            board,
            now: ms(0),
            step: 0.1,
        }
    }

    /// Advances time by one tick, moving the chain if the motor is running.
    pub fn tick(&mut self) {
        assert_eq!(self.board.overlaps(), 0);
        self.now = self.now + core::time::Duration::from_millis(100);
        let mut pos = self.ctl.position();
        if self.board.down() {
            pos += self.step.m();
        }
        if self.board.up() {
            pos -= self.step.m();
        }
        self.ctl.tick(pos, self.now);
    }

    /// Ticks until the controller goes idle, or gives up after `max` ticks.
    pub fn run(&mut self, max: usize) {
        for _ in 0..max {
            if self.ctl.motion() == Motion::Idle {
                return;
            }
            self.tick();
        }
    }
}
