//! Physics of an anchor rode: how far a chain of a given length reaches
//! horizontally, how much of it is lying slack on the seabed, and how much
//! the tide will change the water depth.
//!
//! The "rode" is the chain that is currently paid out. It runs from the
//! gypsy on the bow, down through the water, and along the seabed to the
//! anchor. The vertical part of that run is the water depth plus the height
//! of the bow above the waterline.
//!
//! This crate supports `no_std` and uses `libm` so that the same numbers are
//! computed on the winch controller and in the host simulator.

#![cfg_attr(not(feature = "std"), no_std)]

use libm::sqrtf;

pub struct Meters;

pub type Len = euclid::Length<f32, Meters>;

/// Density of air at sea level, in kg/m³.
pub const AIR_DENSITY: f32 = 1.225;

/// Standard gravity, in m/s².
pub const GRAVITY: f32 = 9.81;

/// Meters per second in one knot.
pub const KNOT: f32 = 0.514_444;

fn square<T: core::ops::Mul<T> + Copy>(x: T) -> <T as core::ops::Mul<T>>::Output {
    x * x
}

pub trait LenExt {
    fn m(self) -> Len;
}

impl LenExt for f32 {
    fn m(self) -> Len {
        Len::new(self)
    }
}

/// Returns `Some(x)` if `x` is a usable measurement.
///
/// Telemetry arrives as "last known value", which may be NaN, infinite, or
/// the `-999.0` sentinel that the instrument network uses for "never
/// received". All of those are treated as missing.
pub fn valid(x: f32) -> Option<f32> {
    const NO_DATA: f32 = -999.0;
    (x.is_finite() && x != NO_DATA).then_some(x)
}

/// Length of a straight line from the bow down to the seabed and out to the
/// anchor, given the horizontal distance and the vertical drop.
pub fn straight_line(distance: Len, drop: Len) -> Len {
    sqrtf(square(distance.get()) + square(drop.get())).m()
}

/// Horizontal reach of a chain pulled perfectly straight.
///
/// Zero if the chain isn't even long enough to reach the bottom.
pub fn straight_reach(chain: Len, drop: Len) -> Len {
    let arg = square(chain.get()) - square(drop.get());
    if arg <= 0.0 {
        0.0.m()
    } else {
        sqrtf(arg).m()
    }
}

/// Depth that the water will have at the next high tide.
///
/// With no tide data at all the current depth is returned unchanged.
pub fn tide_adjusted_depth(depth: Len, tide_now: Option<f32>, tide_high: Option<f32>) -> Len {
    let now = tide_now.unwrap_or(0.0);
    let high = tide_high.unwrap_or(0.0);
    if now == 0.0 && high == 0.0 {
        return depth;
    }
    (depth.get() - now + high).max(0.0).m()
}

pub struct VesselBuilder {
    bow_height: Len,
    windage_area: f32,
    drag_coefficient: f32,
    chain_mass_per_meter: f32,
    baseline_force: f32,
    min_force: f32,
    max_force: f32,
    low_force_threshold: f32,
    assumed_wind: f32,
}

impl Default for VesselBuilder {
    fn default() -> Self {
        Self {
            bow_height: 2.0.m(),
            windage_area: 10.0,
            drag_coefficient: 1.0,
            chain_mass_per_meter: 1.5,
            baseline_force: 30.0,
            min_force: 30.0,
            max_force: 2000.0,
            low_force_threshold: 50.0,
            assumed_wind: 10.0 * KNOT,
        }
    }
}

impl VesselBuilder {
    pub fn build(&self) -> Vessel {
        Vessel {
            bow_height: self.bow_height,
            windage_area: self.windage_area,
            drag_coefficient: self.drag_coefficient,
            chain_mass_per_meter: self.chain_mass_per_meter,
            baseline_force: self.baseline_force,
            min_force: self.min_force,
            max_force: self.max_force.max(self.min_force),
            low_force_threshold: self.low_force_threshold,
            assumed_wind: self.assumed_wind,
        }
    }

    pub fn with_bow_height(&mut self, bow_height: Len) -> &mut Self {
        self.bow_height = bow_height;
        self
    }

    pub fn with_windage_area(&mut self, square_meters: f32) -> &mut Self {
        self.windage_area = square_meters;
        self
    }

    pub fn with_drag_coefficient(&mut self, cd: f32) -> &mut Self {
        self.drag_coefficient = cd;
        self
    }

    pub fn with_chain_mass_per_meter(&mut self, kg: f32) -> &mut Self {
        self.chain_mass_per_meter = kg;
        self
    }

    pub fn with_baseline_force(&mut self, newtons: f32) -> &mut Self {
        self.baseline_force = newtons;
        self
    }

    pub fn with_force_band(&mut self, min: f32, max: f32) -> &mut Self {
        self.min_force = min;
        self.max_force = max;
        self
    }

    pub fn with_assumed_wind(&mut self, meters_per_sec: f32) -> &mut Self {
        self.assumed_wind = meters_per_sec;
        self
    }
}

/// The parts of the boat and its ground tackle that the catenary model
/// cares about.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Vessel {
    /// Height of the gypsy above the waterline. Every vertical drop is the
    /// water depth plus this.
    pub bow_height: Len,
    /// Area of the boat presented to the wind, in m².
    pub windage_area: f32,
    pub drag_coefficient: f32,
    /// Chain mass in kg per meter.
    pub chain_mass_per_meter: f32,
    /// Force in newtons from current and hull drag, present even in a flat
    /// calm.
    pub baseline_force: f32,
    pub min_force: f32,
    pub max_force: f32,
    /// Below this many newtons the chain sags under its own weight and the
    /// sag approximation stops being meaningful.
    pub low_force_threshold: f32,
    /// Wind speed in m/s to assume when no wind measurement is available.
    pub assumed_wind: f32,
}

impl Default for Vessel {
    fn default() -> Self {
        VesselBuilder::default().build()
    }
}

impl Vessel {
    /// Vertical distance from the gypsy to the seabed.
    pub fn drop(&self, depth: Len) -> Len {
        depth + self.bow_height
    }

    /// Horizontal force on the boat, in newtons.
    ///
    /// Wind drag follows the square law; the baseline accounts for current
    /// and hull resistance. The total is kept inside the configured band.
    pub fn horizontal_force(&self, wind_speed: Option<f32>) -> f32 {
        let wind = wind_speed
            .filter(|w| *w >= 0.0)
            .unwrap_or(self.assumed_wind);
        let drag =
            0.5 * AIR_DENSITY * self.drag_coefficient * self.windage_area * square(wind);
        (drag + self.baseline_force).clamp(self.min_force, self.max_force)
    }

    /// Ratio of the true horizontal reach of the chain to its straight-line
    /// reach.
    ///
    /// A light horizontal force lets the chain hang in a deep curve, so the
    /// factor is low; as the force increases the chain straightens and the
    /// factor approaches one. For a fixed chain length and depth the factor
    /// never decreases as the force increases.
    pub fn catenary_reduction_factor(&self, chain: Len, depth: Len, force: f32) -> f32 {
        const MIN_FACTOR: f32 = 0.80;
        const MAX_FACTOR: f32 = 0.99;

        // In light air the chain's own weight dominates, and the sag depends
        // mostly on how much chain is out relative to the depth.
        let scope = chain.get() / depth.get().max(1.0);
        let light_air = if scope < 3.0 {
            0.90
        } else if scope < 5.0 {
            0.85
        } else {
            MIN_FACTOR
        };
        if !(force >= self.low_force_threshold) {
            return light_air;
        }

        let straight = straight_reach(chain, depth).get();
        if straight <= f32::EPSILON {
            return MAX_FACTOR;
        }

        // Parabolic approximation of the catenary: the horizontal distance
        // lost to sag is w L² / 8H.
        let weight = self.chain_mass_per_meter * GRAVITY;
        let sag = weight * square(chain.get()) / (8.0 * force);
        let factor = ((straight - sag) / straight).clamp(MIN_FACTOR, MAX_FACTOR);

        // Past the light-air threshold the chain can only get straighter.
        factor.max(light_air)
    }

    /// Horizontal distance from the bow at which a chain of length `chain`
    /// holds the boat, with the anchor at vertical distance `depth` below the
    /// gypsy.
    pub fn horizontal_reach(&self, chain: Len, depth: Len, wind_speed: Option<f32>) -> Len {
        if !chain.get().is_finite() || !depth.get().is_finite() {
            return 0.0.m();
        }
        let straight = straight_reach(chain, depth);
        if straight.get() <= 0.0 {
            return straight;
        }
        let force = self.horizontal_force(wind_speed);
        straight * self.catenary_reduction_factor(chain, depth, force)
    }

    /// The shortest chain that can reach an anchor `distance` away
    /// horizontally in water `depth` deep.
    pub fn minimum_chain_needed(&self, distance: Len, depth: Len) -> Len {
        let drop = self.drop(depth);
        if distance.get() <= 0.01 {
            drop
        } else {
            straight_line(distance, drop)
        }
    }

    /// Chain lying on the seabed beyond what is needed to reach the anchor.
    ///
    /// Negative slack means the boat is further away than the chain can
    /// reach, so the anchor is dragging. While the chain is shorter than the
    /// drop to the seabed the anchor is still falling and the slack is zero.
    pub fn slack(&self, chain: Len, depth: Len, distance: Len) -> Len {
        let (c, d, x) = (chain.get(), depth.get(), distance.get());
        if !c.is_finite() || !d.is_finite() || !x.is_finite() || c <= 0.01 || d <= 0.01 {
            return 0.0.m();
        }
        if chain < self.drop(depth) {
            return 0.0.m();
        }
        let slack = chain - self.minimum_chain_needed(distance, depth);
        if slack.get().is_finite() {
            slack
        } else {
            0.0.m()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn close(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn slack_is_chain_beyond_straight_line() {
        let vessel = Vessel::default();
        let slack = vessel.slack(20.0.m(), 10.0.m(), 5.0.m());
        assert!(close(slack.get(), 7.0, 1e-3), "slack was {slack:?}");
    }

    #[test]
    fn falling_anchor_has_no_slack() {
        let vessel = Vessel::default();
        for distance in [0.0, 3.0, 50.0] {
            assert_eq!(vessel.slack(10.0.m(), 10.0.m(), distance.m()).get(), 0.0);
        }
    }

    #[test]
    fn dragging_anchor_has_negative_slack() {
        let vessel = Vessel::default();
        assert!(vessel.slack(20.0.m(), 10.0.m(), 30.0.m()).get() < 0.0);
    }

    #[test]
    fn slack_ignores_garbage() {
        let vessel = Vessel::default();
        assert_eq!(vessel.slack(f32::NAN.m(), 10.0.m(), 5.0.m()).get(), 0.0);
        assert_eq!(vessel.slack(20.0.m(), f32::INFINITY.m(), 5.0.m()).get(), 0.0);
        assert_eq!(vessel.slack(20.0.m(), 0.0.m(), 5.0.m()).get(), 0.0);
    }

    #[test]
    fn sentinel_is_not_valid() {
        assert_eq!(valid(-999.0), None);
        assert_eq!(valid(f32::NAN), None);
        assert_eq!(valid(f32::NEG_INFINITY), None);
        assert_eq!(valid(4.5), Some(4.5));
    }

    #[test]
    fn tide() {
        assert_eq!(tide_adjusted_depth(10.0.m(), None, None).get(), 10.0);
        assert_eq!(tide_adjusted_depth(10.0.m(), Some(1.0), Some(3.0)).get(), 12.0);
        assert_eq!(tide_adjusted_depth(1.0.m(), Some(4.0), Some(0.5)).get(), 0.0);
    }

    #[test]
    fn short_chain_has_no_reach() {
        let vessel = Vessel::default();
        assert_eq!(vessel.horizontal_reach(5.0.m(), 12.0.m(), None).get(), 0.0);
        assert_eq!(vessel.horizontal_reach(12.0.m(), 12.0.m(), None).get(), 0.0);
    }

    #[test]
    fn light_air_bands() {
        let vessel = Vessel::default();
        assert_eq!(vessel.catenary_reduction_factor(20.0.m(), 10.0.m(), 30.0), 0.90);
        assert_eq!(vessel.catenary_reduction_factor(40.0.m(), 10.0.m(), 30.0), 0.85);
        assert_eq!(vessel.catenary_reduction_factor(60.0.m(), 10.0.m(), 30.0), 0.80);
    }

    #[test]
    fn force_is_clamped() {
        let vessel = Vessel::default();
        assert_eq!(vessel.horizontal_force(Some(0.0)), 30.0);
        assert_eq!(vessel.horizontal_force(Some(200.0)), 2000.0);
        assert_eq!(vessel.horizontal_force(None), vessel.horizontal_force(Some(vessel.assumed_wind)));
    }

    proptest! {
        #[test]
        fn factor_is_monotonic_in_force(
            chain in 1.0..100.0f32,
            depth in 1.0..50.0f32,
            f0 in 0.0..3000.0f32,
            df in 0.0..500.0f32,
        ) {
            let vessel = Vessel::default();
            let lo = vessel.catenary_reduction_factor(chain.m(), depth.m(), f0);
            let hi = vessel.catenary_reduction_factor(chain.m(), depth.m(), f0 + df);
            prop_assert!(hi >= lo, "{lo} at {f0}N but {hi} at {}N", f0 + df);
        }

        #[test]
        fn factor_is_bounded(chain in 0.0..100.0f32, depth in 0.0..50.0f32, force in 0.0..3000.0f32) {
            let vessel = Vessel::default();
            let f = vessel.catenary_reduction_factor(chain.m(), depth.m(), force);
            prop_assert!((0.80..=0.99).contains(&f));
        }

        #[test]
        fn reach_is_shorter_than_straight(chain in 0.0..100.0f32, depth in 0.0..50.0f32, wind in 0.0..30.0f32) {
            let vessel = Vessel::default();
            let reach = vessel.horizontal_reach(chain.m(), depth.m(), Some(wind));
            prop_assert!(reach.get() >= 0.0);
            prop_assert!(reach.get() <= straight_reach(chain.m(), depth.m()).get() + 1e-4);
        }

        #[test]
        fn no_slack_when_taut(depth in 1.0..50.0f32, distance in 0.1..100.0f32) {
            let vessel = Vessel::default();
            let chain = vessel.minimum_chain_needed(distance.m(), depth.m());
            let slack = vessel.slack(chain, depth.m(), distance.m());
            prop_assert!(slack.get().abs() < 1e-3);
        }
    }
}
