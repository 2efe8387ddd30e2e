//! Sample clock configuration.

use std::time::Duration;

use daq_core::error::{DaqError, DaqResult};

/// Sample clock for finite bursts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockConfig {
    /// Samples per second per channel.
    pub sample_rate: f64,
    /// Samples per channel returned by each read.
    pub samples_per_channel: usize,
}

impl ClockConfig {
    /// Validate against the device's maximum sample clock rate.
    pub fn new(sample_rate: f64, samples_per_channel: usize, max_rate: f64) -> DaqResult<Self> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "Sample rate must be positive, got {}",
                sample_rate
            )));
        }
        if samples_per_channel == 0 {
            return Err(DaqError::Configuration(
                "Samples per channel must be at least 1".into(),
            ));
        }
        if sample_rate > max_rate {
            return Err(DaqError::Configuration(format!(
                "Sample rate {} Hz exceeds device maximum {} Hz",
                sample_rate, max_rate
            )));
        }
        Ok(Self {
            sample_rate,
            samples_per_channel,
        })
    }

    /// Time the hardware needs to acquire one burst.
    pub fn burst_duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples_per_channel as f64 / self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_duration() {
        let clock = ClockConfig::new(1000.0, 100, 250_000.0).unwrap();
        assert_eq!(clock.burst_duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_invalid_clocks() {
        assert!(ClockConfig::new(0.0, 100, 1e6).unwrap_err().is_configuration());
        assert!(ClockConfig::new(-5.0, 100, 1e6).unwrap_err().is_configuration());
        assert!(ClockConfig::new(f64::NAN, 100, 1e6).unwrap_err().is_configuration());
        assert!(ClockConfig::new(1000.0, 0, 1e6).unwrap_err().is_configuration());
        assert!(ClockConfig::new(2e6, 10, 1e6).unwrap_err().is_configuration());
    }
}
