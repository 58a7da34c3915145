use core::time::Duration;

use windlass_physics::{Len, LenExt as _};

pub struct ConfigBuilder {
    min_length: Len,
    max_length: Len,
    stop_before_max: Len,
    timeout_buffer: Duration,
    default_timeout: Duration,
    default_speed: f32,
    smoothing: f32,
    tick_period: Duration,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            min_length: 0.0.m(),
            max_length: 80.0.m(),
            stop_before_max: 75.0.m(),
            timeout_buffer: Duration::from_secs(5),
            default_timeout: Duration::from_secs(10),
            default_speed: 1000.0,
            smoothing: 0.2,
            tick_period: Duration::from_millis(100),
        }
    }
}

impl ConfigBuilder {
    pub fn build(&self) -> WinchConfig {
        WinchConfig {
            min_length: self.min_length,
            max_length: if self.max_length < self.min_length {
                self.min_length
            } else {
                self.max_length
            },
            stop_before_max: self.stop_before_max,
            timeout_buffer: self.timeout_buffer,
            default_timeout: self.default_timeout,
            default_speed: self.default_speed,
            smoothing: self.smoothing.clamp(0.0, 1.0),
            tick_period: self.tick_period,
        }
    }

    pub fn with_limits(&mut self, min: Len, max: Len) -> &mut Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    pub fn with_stop_before_max(&mut self, stop: Len) -> &mut Self {
        self.stop_before_max = stop;
        self
    }

    pub fn with_timeout_buffer(&mut self, buffer: Duration) -> &mut Self {
        self.timeout_buffer = buffer;
        self
    }

    pub fn with_default_speed(&mut self, ms_per_meter: f32) -> &mut Self {
        self.default_speed = ms_per_meter;
        self
    }

    pub fn with_smoothing(&mut self, alpha: f32) -> &mut Self {
        self.smoothing = alpha;
        self
    }

    pub fn with_tick_period(&mut self, period: Duration) -> &mut Self {
        self.tick_period = period;
        self
    }
}

/// Limits and tuning for the winch itself.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WinchConfig {
    /// Chain that is always out, even when the anchor is stowed.
    pub min_length: Len,
    /// Total chain in the locker.
    pub max_length: Len,
    /// Paying out stops here, leaving a few meters on the gypsy so the bitter
    /// end never takes the load.
    pub stop_before_max: Len,
    /// Added to the expected duration of every move to get its timeout.
    pub timeout_buffer: Duration,
    /// Timeout for moves whose expected duration can't be estimated.
    pub default_timeout: Duration,
    /// Speed in ms per meter to assume before any calibration has been saved.
    pub default_speed: f32,
    /// Weight of the newest sample in the calibrated speeds.
    pub smoothing: f32,
    pub tick_period: Duration,
}

impl Default for WinchConfig {
    fn default() -> Self {
        ConfigBuilder::default().build()
    }
}

impl WinchConfig {
    /// The furthest that paying out is allowed to go.
    pub fn max_pay_out(&self) -> Len {
        if self.stop_before_max < self.max_length {
            self.stop_before_max
        } else {
            self.max_length
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_before_max_wins() {
        let config = ConfigBuilder::default().build();
        assert_eq!(config.max_pay_out().get(), 75.0);

        let config = ConfigBuilder::default()
            .with_limits(0.0.m(), 50.0.m())
            .build();
        assert_eq!(config.max_pay_out().get(), 50.0);
    }

    #[test]
    fn limits_never_cross() {
        let config = ConfigBuilder::default()
            .with_limits(10.0.m(), 5.0.m())
            .with_smoothing(3.0)
            .build();
        assert_eq!(config.max_length.get(), 10.0);
        assert_eq!(config.smoothing, 1.0);
    }
}
