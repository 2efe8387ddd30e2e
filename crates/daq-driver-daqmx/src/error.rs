//! Error types for DAQmx operations.
//!
//! The driver reports failures as a negative status code plus a decoded text.
//! Both are kept verbatim so the caller sees exactly what the vendor said.

use daq_core::error::{DaqError, DriverError, DriverErrorKind};
use thiserror::Error;

/// Result type alias for binding calls.
pub type Result<T> = std::result::Result<T, DaqmxError>;

/// Vendor status for a wait that ended before the task was done.
pub const WAIT_TIMEOUT_CODE: i32 = -200560;

/// Errors that can occur when talking to the DAQmx driver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DaqmxError {
    /// Status code and decoded text returned by the driver.
    #[error("DAQmx error {code}: {message}")]
    Vendor {
        /// Negative driver status code.
        code: i32,
        /// Driver-decoded error text.
        message: String,
    },

    /// A bulk transfer returned a sample count that does not fit the channel layout.
    #[error("Malformed transfer: {samples} samples cannot be split across {channels} channels")]
    MalformedTransfer {
        /// Total samples received.
        samples: usize,
        /// Channels in the burst.
        channels: usize,
    },
}

impl DaqmxError {
    /// Build a vendor error.
    pub fn vendor(code: i32, message: impl Into<String>) -> Self {
        Self::Vendor {
            code,
            message: message.into(),
        }
    }

    /// Vendor status code, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Vendor { code, .. } => Some(*code),
            Self::MalformedTransfer { .. } => None,
        }
    }

    /// True when a wait-until-done call ran out of time.
    pub fn is_wait_timeout(&self) -> bool {
        self.code() == Some(WAIT_TIMEOUT_CODE)
    }

    /// Convert into a device error tagged with the operation that failed.
    pub fn into_daq(self, kind: DriverErrorKind) -> DaqError {
        DaqError::Device(DriverError::new("daqmx", kind, self.to_string()))
    }
}

impl From<DaqmxError> for DaqError {
    fn from(err: DaqmxError) -> Self {
        let kind = match &err {
            DaqmxError::Vendor { .. } => DriverErrorKind::Hardware,
            DaqmxError::MalformedTransfer { .. } => DriverErrorKind::Transfer,
        };
        err.into_daq(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_text_preserved() {
        let err = DaqmxError::vendor(-200478, "no channels in the task");
        let daq: DaqError = err.into_daq(DriverErrorKind::Control);
        let driver = daq.driver_error().cloned();
        assert_eq!(driver.as_ref().map(|d| d.kind), Some(DriverErrorKind::Control));
        assert!(driver
            .map(|d| d.message.contains("no channels in the task"))
            .unwrap_or(false));
    }

    #[test]
    fn test_wait_timeout_detection() {
        assert!(DaqmxError::vendor(WAIT_TIMEOUT_CODE, "timeout").is_wait_timeout());
        assert!(!DaqmxError::vendor(-200279, "overwrite").is_wait_timeout());
        let malformed = DaqmxError::MalformedTransfer {
            samples: 7,
            channels: 2,
        };
        assert_eq!(malformed.code(), None);
        assert!(DaqError::from(malformed).is_device());
    }
}
