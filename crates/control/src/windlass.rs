use windlass_physics::{Len, LenExt as _};
use windlass_protocol::{Cmd, Stage, Status, Telemetry};

use crate::{
    counter::{ChainCounter, DirectionSense},
    deploy::{Deployment, StartError},
    position::{Lease, PositionController},
    prefs::Preferences,
    relay::Actuator,
    retrieve::{Retrieval, RetrievalState},
    time::{Instant, Periodic},
    Transition,
};

/// What happened during one call to [`Windlass::poll`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Events {
    pub stage: Option<Transition<Stage>>,
    pub retrieval: Option<Transition<RetrievalState>>,
    /// Set once a second, and whenever a command is handled.
    pub status: Option<Status>,
}

/// The whole windlass: the winch, the chain counter and the two automatic
/// sequences, driven by commands.
///
/// Every command stops whatever was running before starting anything new,
/// so at most one thing is ever driving the winch.
pub struct Windlass<A, P> {
    ctl: PositionController<A, P>,
    deployment: Deployment,
    retrieval: Retrieval,
    manual: Option<Lease>,
    counter: ChainCounter,
    direction: DirectionSense,
    tick: Periodic,
    publish: Periodic,
    dirty: bool,
}

impl<A: Actuator, P: Preferences> Windlass<A, P> {
    /// Sets up the windlass with the chain length that was saved before the
    /// last power cycle.
    pub fn new(
        mut ctl: PositionController<A, P>,
        deployment: Deployment,
        retrieval: Retrieval,
        per_pulse: Len,
        now: Instant,
    ) -> Self {
        let counter = ChainCounter::restore(per_pulse, ctl.preferences_mut());
        ctl.set_position(counter.length());
        let tick = Periodic::new(ctl.config().tick_period, now);
        Windlass {
            ctl,
            deployment,
            retrieval,
            manual: None,
            counter,
            direction: DirectionSense::default(),
            tick,
            publish: Periodic::new(core::time::Duration::from_secs(1), now),
            dirty: false,
        }
    }

    pub fn controller(&self) -> &PositionController<A, P> {
        &self.ctl
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn retrieval(&self) -> &Retrieval {
        &self.retrieval
    }

    pub fn rode(&self) -> Len {
        self.counter.length()
    }

    pub fn set_telemetry(&mut self, telemetry: Telemetry) {
        self.ctl.set_environment(telemetry.into());
    }

    pub fn handle(&mut self, cmd: Cmd, now: Instant) -> Result<(), StartError> {
        log::info!("command: {cmd:?}");
        self.stop_all(now);
        self.dirty = true;

        match cmd {
            Cmd::PayOut(amount) | Cmd::HaulIn(amount) => {
                let lease = self.ctl.acquire().ok_or(StartError::Busy)?;
                if matches!(cmd, Cmd::PayOut(_)) {
                    self.ctl.pay_out(&lease, amount.m(), now);
                } else {
                    self.ctl.haul_in(&lease, amount.m(), now);
                }
                self.manual = Some(lease);
            }
            Cmd::Stop => {}
            Cmd::Deploy { scope } => {
                self.deployment.start(&mut self.ctl, scope, now)?;
            }
            Cmd::Retrieve => {
                self.retrieval.start(&mut self.ctl, now)?;
            }
            Cmd::ResetCounter => {
                self.counter.reset(self.ctl.preferences_mut());
                self.ctl.set_position(0.0.m());
            }
        }
        Ok(())
    }

    /// Stops the winch and everything that might be driving it.
    pub fn stop_all(&mut self, now: Instant) {
        self.deployment.stop(&mut self.ctl, now);
        self.retrieval.stop(&mut self.ctl, now);
        if let Some(lease) = self.manual.take() {
            self.ctl.release(lease, now);
        }
        self.ctl.stop(now);
    }

    /// Counts one turn of the gypsy.
    ///
    /// The controller gets the new length straight away, so that it can stop
    /// on exactly the right pulse.
    pub fn pulse(&mut self, now: Instant) {
        let direction = self.direction.update(self.ctl.motion(), now);
        let length = self.counter.pulse(direction, self.ctl.preferences_mut());
        self.ctl.tick(length, now);
    }

    pub fn poll(&mut self, now: Instant) -> Events {
        if self.tick.due(now) {
            self.ctl.tick(self.counter.length(), now);
        }
        let mut events = Events {
            stage: self.deployment.update(&mut self.ctl, now),
            retrieval: self.retrieval.update(&mut self.ctl, now),
            status: None,
        };

        if self.manual.is_some() && !self.ctl.is_active() {
            if let Some(lease) = self.manual.take() {
                self.ctl.release(lease, now);
            }
        }
        self.direction.update(self.ctl.motion(), now);

        let dirty = core::mem::take(&mut self.dirty);
        if self.publish.due(now) || dirty {
            events.status = Some(self.status());
        }
        events
    }

    pub fn status(&self) -> Status {
        Status {
            rode: self.counter.length().get(),
            slack: self.ctl.compute_slack().get(),
            stage: self.deployment.stage(),
            direction: self.direction.current(),
        }
    }
}
