//! Analog input channel bookkeeping.

use daq_core::capabilities::TerminalConfig;
use daq_core::error::{DaqError, DaqResult};

use crate::binding::{ChannelRef, ChannelSpec};

/// One configured analog input line.
///
/// Created by [`crate::DaqmxCard`] when the driver accepts the channel and
/// dropped when the card closes. Immutable in between.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionChannel {
    name: String,
    terminal: TerminalConfig,
    voltage_range: f64,
    reference: ChannelRef,
}

impl AcquisitionChannel {
    pub(crate) fn new(
        name: String,
        terminal: TerminalConfig,
        voltage_range: f64,
        reference: ChannelRef,
    ) -> Self {
        Self {
            name,
            terminal,
            voltage_range,
            reference,
        }
    }

    /// Physical channel identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Terminal configuration.
    pub fn terminal(&self) -> TerminalConfig {
        self.terminal
    }

    /// Symmetric range bound; the channel spans `±voltage_range` volts.
    pub fn voltage_range(&self) -> f64 {
        self.voltage_range
    }

    /// Driver-side reference.
    pub fn reference(&self) -> ChannelRef {
        self.reference
    }
}

/// Validate a channel request and turn it into a driver spec.
pub(crate) fn channel_spec(
    name: &str,
    terminal: TerminalConfig,
    voltage_range: f64,
    supported: &[TerminalConfig],
) -> DaqResult<ChannelSpec> {
    if name.trim().is_empty() {
        return Err(DaqError::Configuration(
            "Channel name must not be empty".into(),
        ));
    }
    if !supported.contains(&terminal) {
        return Err(DaqError::Configuration(format!(
            "Terminal configuration {} is not supported by this device",
            terminal
        )));
    }
    if !voltage_range.is_finite() || voltage_range <= 0.0 {
        return Err(DaqError::Configuration(format!(
            "Voltage range must be a positive number, got {}",
            voltage_range
        )));
    }
    Ok(ChannelSpec {
        physical_channel: name.to_string(),
        terminal,
        min_val: -voltage_range,
        max_val: voltage_range,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TerminalConfig; 2] = [TerminalConfig::Rse, TerminalConfig::Differential];

    #[test]
    fn test_symmetric_range() {
        let spec = channel_spec("Dev1/ai0", TerminalConfig::Rse, 5.0, &ALL).unwrap();
        assert_eq!(spec.min_val, -5.0);
        assert_eq!(spec.max_val, 5.0);
    }

    #[test]
    fn test_rejects_unsupported_terminal() {
        let err = channel_spec("Dev1/ai0", TerminalConfig::Nrse, 5.0, &ALL).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_rejects_non_positive_range() {
        for range in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(channel_spec("Dev1/ai0", TerminalConfig::Rse, range, &ALL)
                .unwrap_err()
                .is_configuration());
        }
    }
}
