//! Bringing the anchor back up.
//!
//! Hauling against a taut chain drags the boat (or the anchor) instead of
//! bringing in chain, so the winch only runs when there's slack to take up
//! and otherwise waits for the boat to motor up to the anchor. Near the end
//! the chain hangs almost vertically, the slack estimate stops meaning
//! anything, and the rest is hauled in one go.

use core::time::Duration;

use serde::{Deserialize, Serialize};
use windlass_physics::LenExt as _;

use crate::{
    deploy::StartError,
    position::{Lease, PositionController},
    prefs::Preferences,
    relay::Actuator,
    time::{Instant, Periodic},
    Transition,
};

/// How much slack there has to be before the winch starts hauling.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ResumeThreshold {
    /// A fixed number of meters.
    Fixed(f32),
    /// A multiple of the depth.
    DepthScaled(f32),
}

impl ResumeThreshold {
    pub fn at_depth(&self, depth: f32) -> f32 {
        match *self {
            ResumeThreshold::Fixed(m) => m,
            ResumeThreshold::DepthScaled(ratio) => ratio * depth,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalPolicy {
    /// Retrieval is finished once there's this little chain out.
    pub completion: f32,
    /// With less than the depth plus this much chain out, the rest comes in
    /// without waiting for slack.
    pub final_pull_margin: f32,
    pub resume: ResumeThreshold,
    /// Hauling stops if the slack falls below this.
    pub pause: f32,
    pub min_raise: f32,
    pub cooldown: Duration,
    pub poll_period: Duration,
    /// A final pull shorter than this isn't worth running the motor for.
    pub min_final_pull: f32,
}

impl Default for RetrievalPolicy {
    fn default() -> Self {
        RetrievalPolicy {
            completion: 2.0,
            final_pull_margin: 3.0,
            resume: ResumeThreshold::Fixed(1.5),
            pause: 0.2,
            min_raise: 1.0,
            cooldown: Duration::from_secs(3),
            poll_period: Duration::from_millis(100),
            min_final_pull: 0.1,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrievalState {
    #[default]
    Idle,
    CheckingSlack,
    Raising,
    WaitingForSlack,
    Complete,
}

pub struct Retrieval {
    policy: RetrievalPolicy,
    state: RetrievalState,
    poll: Option<Periodic>,
    last_raise: Option<Instant>,
    final_pull: bool,
    completed: bool,
    lease: Option<Lease>,
}

impl Default for Retrieval {
    fn default() -> Self {
        Retrieval::new(RetrievalPolicy::default())
    }
}

impl Retrieval {
    pub fn new(policy: RetrievalPolicy) -> Self {
        Retrieval {
            policy,
            state: RetrievalState::Idle,
            poll: None,
            last_raise: None,
            final_pull: false,
            completed: false,
            lease: None,
        }
    }

    pub fn state(&self) -> RetrievalState {
        self.state
    }

    pub fn policy(&self) -> &RetrievalPolicy {
        &self.policy
    }

    pub fn is_running(&self) -> bool {
        self.state != RetrievalState::Idle
    }

    /// Whether the last retrieval got all the chain in.
    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn start<A: Actuator, P: Preferences>(
        &mut self,
        ctl: &mut PositionController<A, P>,
        now: Instant,
    ) -> Result<(), StartError> {
        if self.is_running() {
            return Err(StartError::AlreadyRunning);
        }
        let lease = ctl.acquire().ok_or(StartError::Busy)?;
        log::info!("retrieving {:.1} m of chain", ctl.position().get());

        self.lease = Some(lease);
        self.poll = Some(Periodic::new(self.policy.poll_period, now));
        self.last_raise = None;
        self.final_pull = false;
        self.completed = false;
        self.transition(RetrievalState::CheckingSlack);
        Ok(())
    }

    pub fn stop<A: Actuator, P: Preferences>(
        &mut self,
        ctl: &mut PositionController<A, P>,
        now: Instant,
    ) -> Option<Transition<RetrievalState>> {
        if !self.is_running() {
            return None;
        }
        self.poll = None;
        match self.lease.take() {
            Some(lease) => ctl.release(lease, now),
            None => ctl.stop(now),
        }
        Some(self.transition(RetrievalState::Idle))
    }

    pub fn update<A: Actuator, P: Preferences>(
        &mut self,
        ctl: &mut PositionController<A, P>,
        now: Instant,
    ) -> Option<Transition<RetrievalState>> {
        if self.state == RetrievalState::Complete {
            log::info!("retrieval complete, {:.1} m out", ctl.position().get());
            return self.stop(ctl, now);
        }
        if !self.poll.as_mut()?.due(now) {
            return None;
        }

        let rode = ctl.position().get();
        let depth = ctl.current_depth().get();
        let slack = ctl.compute_slack().get();
        let in_final_pull = rode < depth + self.policy.final_pull_margin;
        let cooled_down = self
            .last_raise
            .map_or(true, |t| now.saturating_duration_since(t) >= self.policy.cooldown);
        let resume = self.policy.resume.at_depth(depth);

        let next = match self.state {
            RetrievalState::Idle | RetrievalState::Complete => None,
            RetrievalState::CheckingSlack => {
                if rode <= self.policy.completion {
                    self.completed = true;
                    Some(RetrievalState::Complete)
                } else if ctl.is_actively_controlling() {
                    None
                } else if in_final_pull {
                    let amount = rode - self.policy.completion;
                    if amount > self.policy.min_final_pull {
                        log::info!("final pull: {amount:.1} m in {depth:.1} m of water");
                        self.haul(ctl, amount, now);
                        self.final_pull = true;
                        Some(RetrievalState::Raising)
                    } else {
                        self.completed = true;
                        Some(RetrievalState::Complete)
                    }
                } else if !cooled_down {
                    Some(RetrievalState::WaitingForSlack)
                } else if slack >= resume && slack >= self.policy.min_raise {
                    log::debug!("taking up {slack:.1} m of slack");
                    self.haul(ctl, slack, now);
                    self.last_raise = Some(now);
                    self.final_pull = false;
                    Some(RetrievalState::Raising)
                } else {
                    Some(RetrievalState::WaitingForSlack)
                }
            }
            RetrievalState::Raising => {
                if !self.final_pull && slack < self.policy.pause && ctl.is_active() {
                    log::info!("chain is taut ({slack:.2} m of slack), waiting");
                    ctl.stop(now);
                    self.last_raise = Some(now);
                    Some(RetrievalState::WaitingForSlack)
                } else if !ctl.is_active() {
                    Some(RetrievalState::WaitingForSlack)
                } else {
                    None
                }
            }
            RetrievalState::WaitingForSlack => {
                if rode <= self.policy.completion {
                    Some(RetrievalState::CheckingSlack)
                } else if cooled_down && (in_final_pull || slack >= resume) {
                    Some(RetrievalState::CheckingSlack)
                } else {
                    None
                }
            }
        };
        next.map(|state| self.transition(state))
    }

    fn haul<A: Actuator, P: Preferences>(
        &self,
        ctl: &mut PositionController<A, P>,
        amount: f32,
        now: Instant,
    ) {
        if let Some(lease) = &self.lease {
            ctl.haul_in(lease, amount.m(), now);
        }
    }

    fn transition(&mut self, to: RetrievalState) -> Transition<RetrievalState> {
        let from = self.state;
        log::info!("retrieval: {from:?} -> {to:?}");
        self.state = to;
        Transition { from, to }
    }
}

#[cfg(test)]
mod tests {
    use windlass_physics::LenExt as _;

    use super::*;
    use crate::{
        testing::{config, controller, ms, Board, TestController},
        ConfigBuilder, Environment, Motion,
    };

    struct Anchorage {
        ctl: TestController,
        board: Board,
        retrieval: Retrieval,
        now: u64,
        states: Vec<RetrievalState>,
    }

    impl Anchorage {
        fn new(rode: f32, depth: f32, distance: f32) -> Self {
            let config = ConfigBuilder::default()
                .with_limits(0.0.m(), 80.0.m())
                .with_stop_before_max(75.0.m())
                .build();
            let (mut ctl, board) = controller(config);
            ctl.set_position(rode.m());
            ctl.set_environment(Environment {
                depth: Some(depth),
                distance: Some(distance),
                ..Default::default()
            });
            Anchorage {
                ctl,
                board,
                retrieval: Retrieval::default(),
                now: 0,
                states: Vec::new(),
            }
        }

        fn set_distance(&mut self, distance: f32) {
            let mut env = *self.ctl.environment();
            env.distance = Some(distance);
            self.ctl.set_environment(env);
        }

        fn start(&mut self) {
            self.retrieval.start(&mut self.ctl, ms(self.now)).unwrap();
            self.states.push(self.retrieval.state());
        }

        fn update(&mut self) {
            if let Some(t) = self.retrieval.update(&mut self.ctl, ms(self.now)) {
                self.states.push(t.to);
            }
        }

        /// Advances 100ms with the winch running at 0.1 m per tick.
        fn step(&mut self) {
            assert_eq!(self.board.overlaps(), 0);
            self.now += 100;
            let mut pos = self.ctl.position();
            if self.board.up() {
                pos -= 0.1.m();
            }
            self.ctl.tick(pos, ms(self.now));
            self.update();
        }
    }

    #[test]
    fn final_pull_skips_slack() {
        // Boat is well away from the anchor: no slack at all.
        let mut a = Anchorage::new(7.5, 5.0, 20.0);
        assert!(a.ctl.compute_slack().get() < 0.0);
        a.start();
        a.update();

        assert_eq!(a.retrieval.state(), RetrievalState::Raising);
        assert_eq!(a.ctl.motion(), Motion::HaulingIn);
        let target = a.ctl.target().unwrap().get();
        assert!((7.5 - target - 5.5).abs() < 1e-4);
        assert!(a.board.up());
    }

    #[test]
    fn final_pull_boundary() {
        // Exactly depth + margin isn't a final pull.
        let mut a = Anchorage::new(8.0, 5.0, 20.0);
        a.start();
        a.update();
        assert_eq!(a.retrieval.state(), RetrievalState::WaitingForSlack);
        assert!(!a.ctl.is_active());
    }

    #[test]
    fn final_pull_uses_the_depth_now() {
        // At high tide 9 m would be inside the final pull, but not yet.
        let mut a = Anchorage::new(9.0, 5.0, 20.0);
        let mut env = *a.ctl.environment();
        env.tide_now = Some(0.5);
        env.tide_high = Some(3.0);
        a.ctl.set_environment(env);
        a.start();
        a.update();
        assert_eq!(a.retrieval.state(), RetrievalState::WaitingForSlack);
        assert!(!a.ctl.is_active());
    }

    #[test]
    fn final_pull_ignores_taut_chain() {
        let mut a = Anchorage::new(7.5, 5.0, 20.0);
        a.start();
        for _ in 0..100 {
            a.step();
        }
        assert_eq!(
            a.states,
            vec![
                RetrievalState::CheckingSlack,
                RetrievalState::Raising,
                RetrievalState::WaitingForSlack,
                RetrievalState::CheckingSlack,
                RetrievalState::Complete,
                RetrievalState::Idle,
            ]
        );
        assert!((a.ctl.position().get() - 2.0).abs() < 0.15);
        assert!(a.retrieval.is_complete());
        assert!(!a.ctl.is_leased());
    }

    #[test]
    fn waits_for_slack() {
        // 30 m out in 10 m of water, lying back on a straight chain.
        let mut a = Anchorage::new(30.0, 10.0, 26.0);
        assert!(a.ctl.compute_slack().get() < 1.5);
        a.start();
        for _ in 0..50 {
            a.step();
        }
        assert_eq!(a.retrieval.state(), RetrievalState::WaitingForSlack);
        assert_eq!(a.ctl.position().get(), 30.0);

        // Motor up towards the anchor: slack = 30 - sqrt(15² + 12²) ≈ 10.8.
        a.set_distance(15.0);
        a.step();
        assert_eq!(a.retrieval.state(), RetrievalState::CheckingSlack);
        a.step();
        assert_eq!(a.retrieval.state(), RetrievalState::Raising);
        assert!(a.board.up());
    }

    #[test]
    fn pauses_when_taut() {
        let mut a = Anchorage::new(30.0, 10.0, 15.0);
        a.start();
        a.step();
        assert_eq!(a.retrieval.state(), RetrievalState::Raising);

        // The boat falls back while hauling, pulling the chain tight.
        a.set_distance(28.0);
        a.step();
        assert_eq!(a.retrieval.state(), RetrievalState::WaitingForSlack);
        assert!(!a.board.up());
        let stopped = a.ctl.position();

        // Lots of slack again, but the cooldown holds it back for 3s.
        a.set_distance(10.0);
        for _ in 0..29 {
            a.step();
            assert!(!a.board.up());
        }
        assert_eq!(a.ctl.position(), stopped);
        for _ in 0..3 {
            a.step();
        }
        assert!(a.board.up());
    }

    #[test]
    fn small_slack_isnt_worth_it() {
        let mut a = Anchorage::new(30.0, 10.0, 20.0);
        a.retrieval = Retrieval::new(RetrievalPolicy {
            resume: ResumeThreshold::Fixed(0.5),
            ..Default::default()
        });
        // Leaves about 0.75 m of slack: more than the threshold, less than
        // the smallest raise.
        a.set_distance(26.68);
        let slack = a.ctl.compute_slack().get();
        assert!(slack > 0.5 && slack < 1.0, "{slack}");
        a.start();
        a.step();
        assert_eq!(a.retrieval.state(), RetrievalState::WaitingForSlack);
        assert!(!a.ctl.is_active());
    }

    #[test]
    fn depth_scaled_resume() {
        let policy = RetrievalPolicy {
            resume: ResumeThreshold::DepthScaled(0.6),
            ..Default::default()
        };
        assert_eq!(policy.resume.at_depth(10.0), 6.0);

        // About 10.8 m of slack is plenty for the fixed threshold.
        let mut a = Anchorage::new(30.0, 10.0, 15.0);
        a.start();
        a.step();
        assert_eq!(a.retrieval.state(), RetrievalState::Raising);

        // About 10.3 m of slack in 20 m of water is short of 0.6 times the depth.
        let mut a = Anchorage::new(40.0, 20.0, 20.0);
        a.retrieval = Retrieval::new(policy);
        let slack = a.ctl.compute_slack().get();
        assert!(slack > 1.5 && slack < 12.0, "{slack}");
        a.start();
        a.step();
        assert_eq!(a.retrieval.state(), RetrievalState::WaitingForSlack);
    }

    #[test]
    fn already_in() {
        let mut a = Anchorage::new(1.5, 5.0, 0.0);
        a.start();
        a.step();
        assert_eq!(a.retrieval.state(), RetrievalState::Complete);
        a.step();
        assert_eq!(a.retrieval.state(), RetrievalState::Idle);
        assert!(a.retrieval.is_complete());
    }

    #[test]
    fn stop_is_idempotent() {
        let (mut ctl, board) = controller(config());
        let mut retrieval = Retrieval::default();
        assert_eq!(retrieval.stop(&mut ctl, ms(0)), None);

        ctl.set_position(7.5.m());
        ctl.set_environment(Environment {
            depth: Some(5.0),
            ..Default::default()
        });
        retrieval.start(&mut ctl, ms(0)).unwrap();
        retrieval.update(&mut ctl, ms(0));
        assert!(board.up());

        assert!(retrieval.stop(&mut ctl, ms(100)).is_some());
        assert!(!board.up());
        assert_eq!(retrieval.stop(&mut ctl, ms(200)), None);
        assert_eq!(retrieval.update(&mut ctl, ms(300)), None);
        assert!(!ctl.is_leased());
    }

    #[test]
    fn refuses_to_start_twice() {
        let mut a = Anchorage::new(30.0, 10.0, 15.0);
        a.start();
        assert_eq!(
            a.retrieval.start(&mut a.ctl, ms(0)),
            Err(StartError::AlreadyRunning)
        );
    }
}
