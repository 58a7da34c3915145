use core::time::Duration;

use libm::fabsf;
use serde::{Deserialize, Serialize};
use windlass_physics::{tide_adjusted_depth, Len, LenExt as _, Vessel};

use crate::{
    config::WinchConfig,
    prefs::Preferences,
    relay::{Actuator, Drive},
    time::Instant,
    Environment,
};

const NAMESPACE: &str = "speeds";
const DOWN_KEY: &str = "downSpeed";
const UP_KEY: &str = "upSpeed";

/// Moves shorter than this don't say anything useful about the winch speed.
const MIN_CALIBRATION_DISTANCE: f32 = 0.01;
const MIN_CALIBRATION_TIME: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Motion {
    #[default]
    Idle,
    PayingOut,
    HaulingIn,
}

impl Motion {
    fn drive(self) -> Drive {
        match self {
            Motion::Idle => Drive::Off,
            Motion::PayingOut => Drive::PayOut,
            Motion::HaulingIn => Drive::HaulIn,
        }
    }
}

/// Measured winch speeds, in milliseconds per meter of chain.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub down_ms_per_m: f32,
    pub up_ms_per_m: f32,
}

impl Calibration {
    pub fn uniform(ms_per_m: f32) -> Self {
        Calibration {
            down_ms_per_m: ms_per_m,
            up_ms_per_m: ms_per_m,
        }
    }

    /// Reads the saved speeds, falling back to `default` for anything that
    /// isn't there.
    pub fn load<P: Preferences>(prefs: &mut P, default: f32) -> Self {
        let mut get = |key: &str| match prefs.load(NAMESPACE, key) {
            Ok(Some(v)) if v.is_finite() && v > 0.0 => v,
            Ok(_) => default,
            Err(e) => {
                log::warn!("failed to load {NAMESPACE}/{key}: {e:?}");
                default
            }
        };
        Calibration {
            down_ms_per_m: get(DOWN_KEY),
            up_ms_per_m: get(UP_KEY),
        }
    }

    pub fn save<P: Preferences>(&self, prefs: &mut P) {
        for (key, value) in [(DOWN_KEY, self.down_ms_per_m), (UP_KEY, self.up_ms_per_m)] {
            if let Err(e) = prefs.store(NAMESPACE, key, value) {
                log::warn!("failed to save {NAMESPACE}/{key}: {e:?}");
            }
        }
    }

    pub fn speed(&self, motion: Motion) -> Option<f32> {
        match motion {
            Motion::Idle => None,
            Motion::PayingOut => Some(self.down_ms_per_m),
            Motion::HaulingIn => Some(self.up_ms_per_m),
        }
    }

    /// Blends a measured speed into the stored one, giving the measurement
    /// weight `alpha`. Returns the new speed.
    pub fn record(&mut self, motion: Motion, measured: f32, alpha: f32) -> Option<f32> {
        let speed = match motion {
            Motion::Idle => return None,
            Motion::PayingOut => &mut self.down_ms_per_m,
            Motion::HaulingIn => &mut self.up_ms_per_m,
        };
        if !measured.is_finite() || measured <= 0.0 {
            return None;
        }
        *speed = alpha * measured + (1.0 - alpha) * *speed;
        Some(*speed)
    }
}

/// Permission to move the chain.
///
/// There is only ever one of these per controller, so whoever holds it is the
/// only thing that can start a move. Anyone can stop the chain.
#[derive(Debug, PartialEq, Eq)]
pub struct Lease {
    id: u32,
}

#[derive(Clone, Copy, Debug)]
struct Move {
    target: Len,
    start: Len,
    started: Instant,
    deadline: Instant,
}

/// Runs the winch to a target length and stops it there.
///
/// The controller doesn't measure the chain itself: whoever owns it reports
/// the current length in [`PositionController::tick`], which should be
/// called at least every [`WinchConfig::tick_period`].
pub struct PositionController<A, P> {
    config: WinchConfig,
    vessel: Vessel,
    actuator: A,
    prefs: P,
    calibration: Calibration,
    env: Environment,
    position: Len,
    motion: Motion,
    mv: Option<Move>,
    lease: Option<u32>,
    next_lease: u32,
}

impl<A: Actuator, P: Preferences> PositionController<A, P> {
    pub fn new(config: WinchConfig, vessel: Vessel, mut actuator: A, mut prefs: P) -> Self {
        let calibration = Calibration::load(&mut prefs, config.default_speed);
        log::info!(
            "winch speeds: {:.0} ms/m down, {:.0} ms/m up",
            calibration.down_ms_per_m,
            calibration.up_ms_per_m
        );
        actuator.drive(Drive::Off);
        PositionController {
            config,
            vessel,
            actuator,
            prefs,
            calibration,
            env: Environment::default(),
            position: 0.0.m(),
            motion: Motion::Idle,
            mv: None,
            lease: None,
            next_lease: 0,
        }
    }

    /// Takes control of the winch, if nobody else has it.
    pub fn acquire(&mut self) -> Option<Lease> {
        if self.lease.is_some() {
            return None;
        }
        self.next_lease = self.next_lease.wrapping_add(1);
        self.lease = Some(self.next_lease);
        Some(Lease {
            id: self.next_lease,
        })
    }

    /// Stops the chain and gives up control of it.
    pub fn release(&mut self, lease: Lease, now: Instant) {
        if self.holds(&lease) {
            self.stop(now);
            self.lease = None;
        } else {
            log::warn!("released a lease from another controller");
        }
    }

    pub fn holds(&self, lease: &Lease) -> bool {
        self.lease == Some(lease.id)
    }

    pub fn is_leased(&self) -> bool {
        self.lease.is_some()
    }

    /// Lets out `amount` more chain.
    ///
    /// The target is clamped to the configured limits; a clamped move still
    /// goes ahead. Non-positive amounts are ignored.
    pub fn pay_out(&mut self, lease: &Lease, amount: Len, now: Instant) {
        self.start_move(lease, Motion::PayingOut, amount, now);
    }

    /// Brings in `amount` of chain. See [`PositionController::pay_out`].
    pub fn haul_in(&mut self, lease: &Lease, amount: Len, now: Instant) {
        self.start_move(lease, Motion::HaulingIn, amount, now);
    }

    fn start_move(&mut self, lease: &Lease, motion: Motion, amount: Len, now: Instant) {
        if !self.holds(lease) {
            log::warn!("ignoring {motion:?} from a stale lease");
            return;
        }
        if !(amount.get() > 0.0) {
            log::warn!("ignoring {motion:?} by {} m", amount.get());
            return;
        }

        let (wanted, lo, hi) = match motion {
            Motion::Idle => return,
            Motion::PayingOut => (
                self.position + amount,
                self.config.min_length,
                self.config.max_pay_out(),
            ),
            Motion::HaulingIn => (
                self.position - amount,
                self.config.min_length,
                self.config.max_length,
            ),
        };
        let target = wanted.get().max(lo.get()).min(hi.get());
        if target != wanted.get() {
            log::warn!(
                "{motion:?} target {:.2} m is outside [{:.2}, {:.2}], using {:.2} m",
                wanted.get(),
                lo.get(),
                hi.get(),
                target
            );
        }

        if self.motion != Motion::Idle {
            self.finish(now);
        }

        let speed = self.calibration.speed(motion).unwrap_or(0.0);
        let expected = amount.get() * speed;
        let timeout = if speed <= 0.01 || amount.get() <= 0.01 || !expected.is_finite() {
            self.config.default_timeout
        } else {
            Duration::from_millis(expected as u64) + self.config.timeout_buffer
        };

        log::info!(
            "{motion:?} from {:.2} m to {:.2} m (timeout {} ms)",
            self.position.get(),
            target,
            timeout.as_millis()
        );
        self.mv = Some(Move {
            target: target.m(),
            start: self.position,
            started: now,
            deadline: now + timeout,
        });
        self.motion = motion;
        self.actuator.drive(motion.drive());

        // The clamped target might already be satisfied.
        self.evaluate(now);
    }

    /// Stops the chain. Does nothing if it isn't moving.
    pub fn stop(&mut self, now: Instant) {
        if self.motion == Motion::Idle {
            return;
        }
        log::info!("stopping at {:.2} m", self.position.get());
        self.finish(now);
    }

    /// Reports the current chain length, and stops the winch if it has
    /// arrived, hit a limit or run out of time.
    pub fn tick(&mut self, position: Len, now: Instant) {
        if position.get().is_finite() {
            self.position = position;
        } else {
            log::warn!("ignoring chain length {}", position.get());
        }
        self.evaluate(now);
    }

    fn evaluate(&mut self, now: Instant) {
        let Some(mv) = self.mv else {
            return;
        };
        let pos = self.position;
        let arrived = match self.motion {
            Motion::Idle => true,
            Motion::PayingOut => pos >= mv.target || pos >= self.config.max_pay_out(),
            Motion::HaulingIn => pos <= mv.target || pos <= self.config.min_length,
        };

        if arrived {
            log::info!("{:?} finished at {:.2} m", self.motion, pos.get());
            self.finish(now);
        } else if now >= mv.deadline {
            log::warn!(
                "{:?} timed out at {:.2} m (target {:.2} m)",
                self.motion,
                pos.get(),
                mv.target.get()
            );
            self.finish(now);
        } else {
            self.actuator.drive(self.motion.drive());
        }
    }

    fn finish(&mut self, now: Instant) {
        let motion = core::mem::take(&mut self.motion);
        self.actuator.drive(Drive::Off);
        if let Some(mv) = self.mv.take() {
            self.calibrate(motion, &mv, now);
        }
    }

    fn calibrate(&mut self, motion: Motion, mv: &Move, now: Instant) {
        let moved = fabsf((self.position - mv.start).get());
        let elapsed = now.saturating_duration_since(mv.started);
        if moved < MIN_CALIBRATION_DISTANCE || elapsed < MIN_CALIBRATION_TIME {
            return;
        }
        let measured = elapsed.as_millis() as f32 / moved;
        if let Some(speed) = self
            .calibration
            .record(motion, measured, self.config.smoothing)
        {
            log::debug!("{motion:?} measured {measured:.0} ms/m, now {speed:.0} ms/m");
            self.calibration.save(&mut self.prefs);
        }
    }

    pub fn set_environment(&mut self, env: Environment) {
        self.env = env;
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn position(&self) -> Len {
        self.position
    }

    /// Overrides the chain length without moving anything.
    pub fn set_position(&mut self, position: Len) {
        self.position = position;
    }

    pub fn motion(&self) -> Motion {
        self.motion
    }

    pub fn target(&self) -> Option<Len> {
        self.mv.map(|mv| mv.target)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.mv.map(|mv| mv.deadline)
    }

    pub fn is_active(&self) -> bool {
        self.motion != Motion::Idle
    }

    pub fn is_actively_controlling(&self) -> bool {
        self.is_active()
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn config(&self) -> &WinchConfig {
        &self.config
    }

    pub fn vessel(&self) -> &Vessel {
        &self.vessel
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn preferences(&self) -> &P {
        &self.prefs
    }

    pub fn preferences_mut(&mut self) -> &mut P {
        &mut self.prefs
    }

    /// Depth below the surface right now, zero if unknown.
    pub fn current_depth(&self) -> Len {
        self.env.depth()
    }

    pub fn tide_adjusted_depth(&self) -> Len {
        tide_adjusted_depth(self.env.depth(), self.env.tide_now, self.env.tide_high)
    }

    /// Chain on the seabed beyond what's needed to reach the anchor, in the
    /// water that's there now.
    pub fn compute_slack(&self) -> Len {
        self.vessel
            .slack(self.position, self.current_depth(), self.env.distance())
    }

    /// How far from the anchor the boat will lie on `chain`, where `depth` is
    /// the vertical distance from the gypsy to the anchor.
    pub fn compute_horizontal_target(&self, chain: Len, depth: Len) -> Len {
        self.vessel
            .horizontal_reach(chain, depth, self.env.wind_speed)
    }

    pub fn max_pay_out(&self) -> Len {
        self.config.max_pay_out()
    }
}
