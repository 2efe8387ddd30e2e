//! Error types for camera SDK calls.

use daq_core::error::{DaqError, DriverError, DriverErrorKind};
use thiserror::Error;

/// Result type alias for binding calls.
pub type Result<T> = std::result::Result<T, PcoError>;

/// Mask selecting the layer (firmware, driver, SDK DLL, application) of an error code.
pub const ERROR_LAYER_MASK: u32 = 0x0000_F000;

/// Set on every error code.
pub const ERROR_FLAG: u32 = 0x8000_0000;

/// Set on non-fatal codes; never combined with [`ERROR_FLAG`].
pub const WARNING_FLAG: u32 = 0x4000_0000;

/// SDK failure: raw return code plus the text the SDK decodes for it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("PCO error 0x{code:08X}: {text}")]
pub struct PcoError {
    /// Raw SDK return code.
    pub code: u32,
    /// SDK-decoded text.
    pub text: String,
}

/// Where in the stack an error code originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLayer {
    /// Camera firmware.
    Firmware,
    /// Kernel or interface driver.
    Driver,
    /// SDK DLL.
    SdkDll,
    /// Application-level misuse.
    Application,
    /// Code does not carry a known layer.
    Unknown,
}

impl PcoError {
    /// Build an error from a code and its decoded text.
    pub fn new(code: u32, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// True for non-fatal return codes.
    pub fn is_warning(&self) -> bool {
        self.code & ERROR_FLAG == 0 && self.code & WARNING_FLAG != 0
    }

    /// Layer encoded in the code.
    pub fn layer(&self) -> ErrorLayer {
        match self.code & ERROR_LAYER_MASK {
            0x1000 => ErrorLayer::Firmware,
            0x2000 => ErrorLayer::Driver,
            0x3000 => ErrorLayer::SdkDll,
            0x4000 => ErrorLayer::Application,
            _ => ErrorLayer::Unknown,
        }
    }

    /// Convert into a device error tagged with the operation that failed.
    pub fn into_daq(self, kind: DriverErrorKind) -> DaqError {
        DaqError::Device(DriverError::new("pco", kind, self.to_string()))
    }
}

impl From<PcoError> for DaqError {
    fn from(err: PcoError) -> Self {
        let kind = match err.layer() {
            ErrorLayer::Firmware => DriverErrorKind::Hardware,
            ErrorLayer::Driver => DriverErrorKind::Transfer,
            ErrorLayer::SdkDll | ErrorLayer::Application => DriverErrorKind::Configuration,
            ErrorLayer::Unknown => DriverErrorKind::Unknown,
        };
        err.into_daq(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_and_warning() {
        let err = PcoError::new(0x8000_2001, "Driver: image transfer failed");
        assert_eq!(err.layer(), ErrorLayer::Driver);
        assert!(!err.is_warning());
        assert!(PcoError::new(0x4000_3002, "SDK DLL: value adapted").is_warning());
        // Decoded text does not decide severity
        assert!(!PcoError::new(0x8000_3002, "SDK DLL warning text").is_warning());
        assert!(!PcoError::new(0, "").is_warning());
    }

    #[test]
    fn test_text_survives_conversion() {
        let daq = DaqError::from(PcoError::new(0x8000_1003, "Firmware: sensor not ready"));
        let driver = daq.driver_error().cloned();
        assert_eq!(driver.as_ref().map(|d| d.kind), Some(DriverErrorKind::Hardware));
        assert!(driver
            .map(|d| d.message.contains("sensor not ready"))
            .unwrap_or(false));
    }
}
