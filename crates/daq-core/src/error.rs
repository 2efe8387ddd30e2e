//! Error types shared by every acquisition driver.
//!
//! `DaqError` is the single error type crossing the public API of the card and
//! camera abstractions. Driver crates keep their own vendor error types
//! (carrying the decoded vendor text) and convert into `DaqError` with `From`,
//! so `?` works throughout.
//!
//! ## Error Hierarchy
//!
//! - **`Configuration`**: invalid parameters or call ordering. Caller-fixable,
//!   never retried.
//! - **`Device`**: the vendor driver or SDK reported a failure. The vendor text is
//!   preserved verbatim in [`DriverError::message`]. Fatal to the current
//!   operation, not to the process.
//! - **`Resource`**: buffer pool exhaustion or invalid slot reuse (double free,
//!   double queue, out-of-range index).
//! - **`UnsupportedFeature`**: the request is valid but the policy is not
//!   implemented (e.g. a falling-edge trigger).
//! - **`Settings`**: the settings file or environment could not be extracted.
//! - **`Worker`**: a task dispatched to the blocking pool panicked or was
//!   cancelled.

use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Coarse classification of a vendor-reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Opening the device or SDK failed.
    Initialization,
    /// The vendor rejected a configuration request.
    Configuration,
    /// Starting, stopping or arming the hardware failed.
    Control,
    /// A data transfer failed or returned malformed data.
    Transfer,
    /// Closing or releasing a resource failed.
    Shutdown,
    /// The hardware reported a fault condition.
    Hardware,
    /// Waiting for the hardware exceeded its deadline.
    Timeout,
    /// Anything the vendor did not classify.
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Control => "control",
            DriverErrorKind::Transfer => "transfer",
            DriverErrorKind::Shutdown => "shutdown",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// A vendor failure with its decoded text.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Short driver family name (`"daqmx"`, `"pco"`, ...).
    pub driver_type: String,
    /// Failure classification.
    pub kind: DriverErrorKind,
    /// Vendor-decoded error text, unmodified.
    pub message: String,
}

impl DriverError {
    /// Create a driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the acquisition error type.
pub type DaqResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for acquisition devices.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Invalid parameters or call ordering.
    ///
    /// Raised synchronously by the call that caused it, before any hardware
    /// interaction takes place where possible.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Vendor driver or SDK failure.
    #[error("{0}")]
    Device(DriverError),

    /// Buffer pool exhaustion or invalid slot reuse.
    #[error("Resource error: {0}")]
    Resource(String),

    /// Valid request for a policy that is not implemented.
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Settings extraction failed (file syntax, type mismatch, bad env var).
    #[error("Settings error: {0}")]
    Settings(#[from] figment::Error),

    /// A blocking-pool task failed to complete.
    #[error("Blocking worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl DaqError {
    /// Build a [`DaqError::Device`] in one call.
    pub fn device(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        DaqError::Device(DriverError::new(driver_type, kind, message))
    }

    /// True for caller-fixable configuration errors.
    pub fn is_configuration(&self) -> bool {
        matches!(self, DaqError::Configuration(_))
    }

    /// True for vendor-reported failures.
    pub fn is_device(&self) -> bool {
        matches!(self, DaqError::Device(_))
    }

    /// True for buffer/slot management errors.
    pub fn is_resource(&self) -> bool {
        matches!(self, DaqError::Resource(_))
    }

    /// True for valid-but-unimplemented requests.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, DaqError::UnsupportedFeature(_))
    }

    /// The underlying driver error, if this is a device failure.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            DaqError::Device(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DriverError> for DaqError {
    fn from(err: DriverError) -> Self {
        DaqError::Device(err)
    }
}
