//! Staged anchor deployment.
//!
//! The anchor goes down with a little more than the depth in chain, and then
//! the rest is let out in three steps as the boat drifts back. Between steps
//! we wait for the boat to drift far enough to straighten the chain, and then
//! hold for a while to let the anchor dig in.

use core::time::Duration;

use serde::{Deserialize, Serialize};
use windlass_physics::{Len, LenExt as _};
use windlass_protocol::Stage;

use crate::{
    position::{Lease, PositionController},
    prefs::Preferences,
    relay::Actuator,
    time::{Instant, Periodic},
    Transition,
};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeploymentPolicy {
    /// Automatic deployment only runs in water between these depths.
    pub min_depth: f32,
    pub max_depth: f32,
    pub min_scope: f32,
    pub max_scope: f32,
    /// The intermediate chain targets, as fractions of the total.
    pub first_fraction: f32,
    pub second_fraction: f32,
    pub min_total: f32,
    /// Extra chain in the initial drop is `slack_per_meter` times the depth,
    /// kept within `[min_drop_slack, max_drop_slack]`.
    pub min_drop_slack: f32,
    pub max_drop_slack: f32,
    pub drop_slack_per_meter: f32,
    /// Below this much slack the chain counts as taut.
    pub taut_slack: f32,
    /// Paying out pauses when the slack is above `pause_slack_ratio` times the
    /// depth, and doesn't start again until it's below `resume_slack_ratio`
    /// times the depth.
    pub pause_slack_ratio: f32,
    pub resume_slack_ratio: f32,
    pub drop_hold: Duration,
    pub first_hold: Duration,
    pub second_hold: Duration,
    pub monitor_period: Duration,
    /// How many times in a row a paying-out stage may end short of its
    /// target, without having moved any chain, before the deployment gives
    /// up.
    pub max_stalls: u8,
    pub tolerance: f32,
}

impl Default for DeploymentPolicy {
    fn default() -> Self {
        DeploymentPolicy {
            min_depth: 3.0,
            max_depth: 45.0,
            min_scope: 3.0,
            max_scope: 10.0,
            first_fraction: 0.4,
            second_fraction: 0.8,
            min_total: 10.0,
            min_drop_slack: 4.0,
            max_drop_slack: 6.0,
            drop_slack_per_meter: 0.05,
            taut_slack: 0.5,
            pause_slack_ratio: 1.2,
            resume_slack_ratio: 0.6,
            drop_hold: Duration::from_secs(2),
            first_hold: Duration::from_secs(30),
            second_hold: Duration::from_secs(75),
            monitor_period: Duration::from_millis(500),
            max_stalls: 3,
            tolerance: 0.01,
        }
    }
}

/// Chain lengths and distances for one deployment.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Vertical distance from the gypsy to the anchor at high tide.
    pub anchor_depth: Len,
    pub drop: Len,
    pub first: Len,
    pub second: Len,
    pub total: Len,
    /// How far back the boat should lie on each of the intermediate lengths.
    pub drop_distance: Len,
    pub first_distance: Len,
    pub second_distance: Len,
}

impl Plan {
    pub fn new<A: Actuator, P: Preferences>(
        ctl: &PositionController<A, P>,
        scope: f32,
        policy: &DeploymentPolicy,
    ) -> Plan {
        let depth = ctl.tide_adjusted_depth();
        let anchor_depth = ctl.vessel().drop(depth);

        let mut total = (scope * anchor_depth.get()).max(policy.min_total);
        let max = ctl.max_pay_out().get();
        if total > max {
            log::warn!("{total:.1} m of chain needed, only {max:.1} m available");
            total = max;
        }
        let first = total * policy.first_fraction;
        let second = total * policy.second_fraction;

        let slack = (policy.min_drop_slack + policy.drop_slack_per_meter * depth.get())
            .clamp(policy.min_drop_slack, policy.max_drop_slack);
        let drop = (anchor_depth.get() + slack).min(first);

        let reach = |chain: f32| ctl.compute_horizontal_target(chain.m(), anchor_depth);
        Plan {
            anchor_depth,
            drop: drop.m(),
            first: first.m(),
            second: second.m(),
            total: total.m(),
            drop_distance: reach(drop),
            first_distance: reach(first),
            second_distance: reach(second),
        }
    }

    fn chain_target(&self, stage: Stage) -> Option<Len> {
        match stage {
            Stage::Drop => Some(self.drop),
            Stage::DeployFirst => Some(self.first),
            Stage::DeploySecond => Some(self.second),
            Stage::DeployFinal => Some(self.total),
            _ => None,
        }
    }

    fn distance_target(&self, stage: Stage) -> Option<Len> {
        match stage {
            Stage::WaitTight => Some(self.drop_distance),
            Stage::WaitFirst => Some(self.first_distance),
            Stage::WaitSecond => Some(self.second_distance),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StartError {
    AlreadyRunning,
    DepthOutOfRange(Option<f32>),
    /// Something else is driving the winch.
    Busy,
}

impl core::fmt::Display for StartError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StartError::AlreadyRunning => f.write_str("already running"),
            StartError::DepthOutOfRange(Some(d)) => write!(f, "depth {d:.1} m is out of range"),
            StartError::DepthOutOfRange(None) => f.write_str("depth is unknown"),
            StartError::Busy => f.write_str("the winch is busy"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BrakeAction {
    Pause,
    Resume,
}

/// Stops chain from piling up on the seabed faster than the boat drifts
/// back to take it up.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Brake {
    engaged: bool,
}

impl Brake {
    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    pub fn update(
        &mut self,
        slack: f32,
        depth: f32,
        policy: &DeploymentPolicy,
    ) -> Option<BrakeAction> {
        if !self.engaged && slack > policy.pause_slack_ratio * depth {
            self.engaged = true;
            Some(BrakeAction::Pause)
        } else if self.engaged && slack < policy.resume_slack_ratio * depth {
            self.engaged = false;
            Some(BrakeAction::Resume)
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct Monitor {
    cadence: Periodic,
    brake: Brake,
    /// Where the chain was when the last pay-out started.
    issued_at: Option<Len>,
    stalls: u8,
}

/// Per-stage state. Leaving a stage drops it, along with any periodic task
/// the stage was running.
#[derive(Debug)]
enum Scratch {
    None,
    Drop { issued: bool },
    Hold { until: Instant },
    Deploy(Monitor),
}

pub struct Deployment {
    policy: DeploymentPolicy,
    stage: Stage,
    plan: Option<Plan>,
    scratch: Scratch,
    lease: Option<Lease>,
}

impl Default for Deployment {
    fn default() -> Self {
        Deployment::new(DeploymentPolicy::default())
    }
}

impl Deployment {
    pub fn new(policy: DeploymentPolicy) -> Self {
        Deployment {
            policy,
            stage: Stage::Idle,
            plan: None,
            scratch: Scratch::None,
            lease: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn policy(&self) -> &DeploymentPolicy {
        &self.policy
    }

    pub fn is_running(&self) -> bool {
        self.stage != Stage::Idle
    }

    /// Whether the slack brake is currently holding the chain.
    pub fn is_paused(&self) -> bool {
        matches!(&self.scratch, Scratch::Deploy(m) if m.brake.is_engaged())
    }

    /// Starts deploying `scope` times the depth in chain.
    pub fn start<A: Actuator, P: Preferences>(
        &mut self,
        ctl: &mut PositionController<A, P>,
        scope: f32,
        now: Instant,
    ) -> Result<Plan, StartError> {
        if self.is_running() {
            return Err(StartError::AlreadyRunning);
        }
        let depth = ctl.environment().depth;
        match depth {
            Some(d) if d >= self.policy.min_depth && d <= self.policy.max_depth => {}
            _ => return Err(StartError::DepthOutOfRange(depth)),
        }
        let lease = ctl.acquire().ok_or(StartError::Busy)?;

        let clamped = if scope.is_finite() {
            scope.clamp(self.policy.min_scope, self.policy.max_scope)
        } else {
            self.policy.min_scope
        };
        if clamped != scope {
            log::warn!("scope {scope} clamped to {clamped}");
        }

        let plan = Plan::new(ctl, clamped, &self.policy);
        log::info!(
            "deploying {:.1} m for {:.1} m to the anchor: drop {:.1} m, then {:.1} m, {:.1} m",
            plan.total.get(),
            plan.anchor_depth.get(),
            plan.drop.get(),
            plan.first.get(),
            plan.second.get()
        );
        self.plan = Some(plan);
        self.lease = Some(lease);
        self.enter(Stage::Drop, now);
        Ok(plan)
    }

    /// Stops the chain and abandons the deployment.
    ///
    /// Returns the transition to `Idle`, or `None` if nothing was running.
    pub fn stop<A: Actuator, P: Preferences>(
        &mut self,
        ctl: &mut PositionController<A, P>,
        now: Instant,
    ) -> Option<Transition<Stage>> {
        if !self.is_running() {
            return None;
        }
        self.scratch = Scratch::None;
        match self.lease.take() {
            Some(lease) => ctl.release(lease, now),
            None => ctl.stop(now),
        }
        self.plan = None;
        Some(self.enter(Stage::Idle, now))
    }

    /// Runs the deployment. Call this every time around the main loop.
    pub fn update<A: Actuator, P: Preferences>(
        &mut self,
        ctl: &mut PositionController<A, P>,
        now: Instant,
    ) -> Option<Transition<Stage>> {
        let plan = self.plan?;
        let advance = match self.stage {
            Stage::Idle => false,
            Stage::Drop => self.run_drop(ctl, &plan, now),
            Stage::WaitTight => {
                self.distance_reached(ctl, &plan)
                    || ctl.compute_slack().get() < self.policy.taut_slack
            }
            Stage::WaitFirst | Stage::WaitSecond => self.distance_reached(ctl, &plan),
            Stage::HoldDrop | Stage::HoldFirst | Stage::HoldSecond => {
                matches!(self.scratch, Scratch::Hold { until } if now >= until)
            }
            Stage::DeployFirst | Stage::DeploySecond | Stage::DeployFinal => {
                match self.deploy(ctl, &plan, now) {
                    Ok(advance) => advance,
                    Err(()) => return self.stop(ctl, now),
                }
            }
            Stage::Complete => {
                log::info!("deployment complete at {:.1} m", ctl.position().get());
                return self.stop(ctl, now);
            }
        };

        advance.then(|| self.enter(self.stage.next(), now))
    }

    fn enter(&mut self, stage: Stage, now: Instant) -> Transition<Stage> {
        let from = self.stage;
        self.stage = stage;
        self.scratch = match stage {
            Stage::Drop => Scratch::Drop { issued: false },
            Stage::HoldDrop => Scratch::Hold {
                until: now + self.policy.drop_hold,
            },
            Stage::HoldFirst => Scratch::Hold {
                until: now + self.policy.first_hold,
            },
            Stage::HoldSecond => Scratch::Hold {
                until: now + self.policy.second_hold,
            },
            Stage::DeployFirst | Stage::DeploySecond | Stage::DeployFinal => {
                Scratch::Deploy(Monitor {
                    cadence: Periodic::new(self.policy.monitor_period, now),
                    brake: Brake::default(),
                    issued_at: None,
                    stalls: 0,
                })
            }
            _ => Scratch::None,
        };
        log::info!("deployment: {} -> {}", from.display_name(), stage.display_name());
        Transition { from, to: stage }
    }

    fn distance_reached<A: Actuator, P: Preferences>(
        &self,
        ctl: &PositionController<A, P>,
        plan: &Plan,
    ) -> bool {
        let Some(target) = plan.distance_target(self.stage) else {
            return false;
        };
        match ctl.environment().distance {
            Some(d) => d >= target.get(),
            None => {
                log::debug!("{}: no distance yet", self.stage.display_name());
                false
            }
        }
    }

    fn run_drop<A: Actuator, P: Preferences>(
        &mut self,
        ctl: &mut PositionController<A, P>,
        plan: &Plan,
        now: Instant,
    ) -> bool {
        let Scratch::Drop { issued } = &mut self.scratch else {
            return true;
        };
        if !*issued {
            let amount = plan.drop - ctl.position();
            if amount.get() <= self.policy.tolerance {
                log::info!("already {:.1} m out, no need to drop", ctl.position().get());
                return true;
            }
            if let Some(lease) = &self.lease {
                ctl.pay_out(lease, amount, now);
            }
            *issued = true;
            return false;
        }

        if !ctl.is_active() {
            return true;
        }
        // Drifting only counts once the anchor is on the bottom, and then the
        // rest of the drop isn't needed.
        let drifted = ctl.position() >= plan.anchor_depth
            && ctl
                .environment()
                .distance
                .map_or(false, |d| d >= plan.drop_distance.get());
        if drifted {
            log::info!("drifted back at {:.1} m, ending the drop", ctl.position().get());
            ctl.stop(now);
        }
        drifted
    }

    /// Returns `Ok(true)` when the stage target is reached, and `Err` if the
    /// winch keeps stopping short.
    fn deploy<A: Actuator, P: Preferences>(
        &mut self,
        ctl: &mut PositionController<A, P>,
        plan: &Plan,
        now: Instant,
    ) -> Result<bool, ()> {
        let Some(target) = plan.chain_target(self.stage) else {
            return Ok(true);
        };
        let Scratch::Deploy(monitor) = &mut self.scratch else {
            return Ok(true);
        };
        if !monitor.cadence.due(now) {
            return Ok(false);
        }

        let remaining = target - ctl.position();
        if remaining.get() <= self.policy.tolerance {
            ctl.stop(now);
            return Ok(true);
        }

        let slack = ctl.compute_slack().get();
        let depth = ctl.current_depth().get();
        let Some(lease) = &self.lease else {
            return Err(());
        };
        match monitor.brake.update(slack, depth, &self.policy) {
            Some(BrakeAction::Pause) => {
                log::info!("pausing: {slack:.1} m of slack in {depth:.1} m");
                ctl.stop(now);
                return Ok(false);
            }
            Some(BrakeAction::Resume) => {
                log::info!("resuming: slack down to {slack:.1} m");
                ctl.pay_out(lease, remaining, now);
                monitor.issued_at = Some(ctl.position());
                return Ok(false);
            }
            None => {}
        }

        if monitor.brake.is_engaged() || ctl.is_active() {
            return Ok(false);
        }
        if let Some(from) = monitor.issued_at {
            if (ctl.position() - from).get() > self.policy.tolerance {
                monitor.stalls = 0;
            } else {
                monitor.stalls += 1;
            }
            if monitor.stalls >= self.policy.max_stalls {
                log::warn!(
                    "{}: stopped short {} times, giving up at {:.1} m",
                    self.stage.display_name(),
                    monitor.stalls,
                    ctl.position().get()
                );
                return Err(());
            }
            log::warn!(
                "{}: stopped {:.1} m short, retrying",
                self.stage.display_name(),
                remaining.get()
            );
        }
        ctl.pay_out(lease, remaining, now);
        monitor.issued_at = Some(ctl.position());
        Ok(false)
    }
}
