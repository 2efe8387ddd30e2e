//! Driver binding boundary.
//!
//! [`DaqmxBinding`] is the set of task-level calls the card needs from the
//! vendor driver. A real implementation wraps the C API; [`crate::mock`] ships a
//! simulated one. Every method may block: the card dispatches the slow ones
//! (open, close, wait, transfer, stop) to the blocking pool.
//!
//! The binding is an owned resource handed to the card, never a process-wide
//! singleton, so several cards (or several simulated devices in one test
//! binary) can coexist.

use std::time::Duration;

use daq_core::capabilities::TerminalConfig;
use ndarray::Array2;

use crate::error::{DaqmxError, Result};

/// Opaque handle to an open driver task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub u64);

/// Driver-side reference to a created channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelRef(pub u32);

/// Analog voltage channel request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    /// Physical channel, e.g. `"Dev1/ai0"`.
    pub physical_channel: String,
    /// Input terminal configuration.
    pub terminal: TerminalConfig,
    /// Lower end of the expected input range, volts.
    pub min_val: f64,
    /// Upper end of the expected input range, volts.
    pub max_val: f64,
}

/// Analog edge start trigger request.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSpec {
    /// Trigger source terminal.
    pub source: String,
    /// Threshold, volts.
    pub level: f64,
}

/// Samples returned by one bulk read.
///
/// `samples` is channel-major: all samples of channel 0, then channel 1, ...
#[derive(Debug, Clone, PartialEq)]
pub struct RawBurst {
    /// Channels in the task.
    pub n_channels: usize,
    /// Interleaved-by-channel sample values.
    pub samples: Vec<f64>,
}

impl RawBurst {
    /// Samples per channel in this burst.
    pub fn samples_per_channel(&self) -> usize {
        if self.n_channels == 0 {
            0
        } else {
            self.samples.len() / self.n_channels
        }
    }

    /// Reshape into `(samples_per_channel, n_channels)`.
    pub fn into_array(self) -> Result<Array2<f64>> {
        let malformed = DaqmxError::MalformedTransfer {
            samples: self.samples.len(),
            channels: self.n_channels,
        };
        if self.n_channels == 0 || self.samples.len() % self.n_channels != 0 {
            return Err(malformed);
        }
        let per_channel = self.samples.len() / self.n_channels;
        let by_channel = Array2::from_shape_vec((self.n_channels, per_channel), self.samples)
            .map_err(|_| malformed)?;
        Ok(by_channel.t().as_standard_layout().into_owned())
    }
}

/// Task-level calls into the acquisition driver.
pub trait DaqmxBinding: Send + Sync + 'static {
    /// Create a task bound to `board`.
    fn open(&self, board: &str) -> Result<TaskHandle>;

    /// Clear the task and release its channels.
    fn close(&self, task: TaskHandle) -> Result<()>;

    /// Terminal configurations the device accepts.
    fn supported_terminal_configs(&self, task: TaskHandle) -> Vec<TerminalConfig>;

    /// Create an analog voltage input channel.
    fn add_channel(&self, task: TaskHandle, spec: &ChannelSpec) -> Result<ChannelRef>;

    /// Configure the sample clock for finite bursts.
    fn configure_clock(
        &self,
        task: TaskHandle,
        sample_rate: f64,
        samples_per_channel: usize,
    ) -> Result<()>;

    /// Configure the start trigger; `None` disables it.
    fn configure_trigger(&self, task: TaskHandle, trigger: Option<&TriggerSpec>) -> Result<()>;

    /// Maximum sample clock rate of the device, Hz.
    fn max_sample_rate(&self, task: TaskHandle) -> Result<f64>;

    /// Start the task.
    fn start(&self, task: TaskHandle) -> Result<()>;

    /// Stop the task.
    fn stop(&self, task: TaskHandle) -> Result<()>;

    /// Block until the current burst is acquired or `timeout` elapses.
    ///
    /// An error here is transient: the caller may simply wait again.
    fn wait_until_done(&self, task: TaskHandle, timeout: Duration) -> Result<()>;

    /// Transfer every sample currently available.
    fn read_all_available(&self, task: TaskHandle) -> Result<RawBurst>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_major_burst_reshapes_to_columns() {
        let burst = RawBurst {
            n_channels: 2,
            samples: vec![0.0, 1.0, 2.0, 10.0, 11.0, 12.0],
        };
        assert_eq!(burst.samples_per_channel(), 3);

        let array = burst.into_array().unwrap();
        assert_eq!(array.dim(), (3, 2));
        assert_eq!(array[[0, 0]], 0.0);
        assert_eq!(array[[2, 0]], 2.0);
        assert_eq!(array[[1, 1]], 11.0);
        assert!(array.is_standard_layout());
    }

    #[test]
    fn test_ragged_burst_is_malformed() {
        let burst = RawBurst {
            n_channels: 2,
            samples: vec![0.0, 1.0, 2.0],
        };
        assert!(matches!(
            burst.into_array(),
            Err(DaqmxError::MalformedTransfer {
                samples: 3,
                channels: 2
            })
        ));
    }

    #[test]
    fn test_zero_channel_burst_is_malformed() {
        let burst = RawBurst {
            n_channels: 0,
            samples: vec![],
        };
        assert_eq!(burst.samples_per_channel(), 0);
        assert!(burst.into_array().is_err());
    }
}
