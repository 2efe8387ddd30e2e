//! SDK status words.
//!
//! The camera SDK reports buffer and health state as packed 32-bit words.
//! Unknown bits are retained so nothing the camera reports is silently lost.

use bitflags::bitflags;

bitflags! {
    /// Buffer context state reported by the SDK DLL.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DllStatus: u32 {
        /// Buffer is allocated.
        const ALLOCATED = 0x8000_0000;
        /// Completion event was created inside the SDK.
        const EVENT_CREATED = 0x4000_0000;
        /// Buffer memory is owned by the application.
        const EXTERNAL = 0x2000_0000;
        /// Completion event is set: the transfer finished.
        const EVENT_SET = 0x0000_8000;
    }
}

impl DllStatus {
    /// True when the slot holds a finished transfer.
    pub fn is_ready(self) -> bool {
        self.contains(Self::ALLOCATED | Self::EVENT_SET)
    }
}

bitflags! {
    /// Camera health warnings. Acquisition may continue.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HealthWarnings: u32 {
        /// Power supply voltage near limit.
        const POWER_SUPPLY_VOLTAGE = 0x0000_0001;
        /// Power supply temperature near limit.
        const POWER_SUPPLY_TEMPERATURE = 0x0000_0002;
        /// Camera temperature near limit.
        const CAMERA_TEMPERATURE = 0x0000_0004;
        /// Sensor temperature near limit.
        const SENSOR_TEMPERATURE = 0x0000_0008;
        /// Battery nearly discharged.
        const BATTERY_DISCHARGED = 0x0000_0010;
        /// Offset regulation out of range.
        const OFFSET_REGUL_RANGE = 0x0000_0020;
    }
}

bitflags! {
    /// Camera health errors. Recording must not start while any is set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HealthErrors: u32 {
        /// Power supply voltage out of range.
        const POWER_SUPPLY_VOLTAGE = 0x0000_0001;
        /// Power supply overheated.
        const POWER_SUPPLY_TEMPERATURE = 0x0000_0002;
        /// Camera overheated.
        const CAMERA_TEMPERATURE = 0x0000_0004;
        /// Sensor overheated.
        const SENSOR_TEMPERATURE = 0x0000_0008;
        /// Battery discharged.
        const BATTERY_DISCHARGED = 0x0000_0010;
        /// Interface failure.
        const CAMERA_INTERFACE_FAILURE = 0x0001_0000;
        /// RAM failure.
        const CAMERA_RAM_FAILURE = 0x0002_0000;
        /// Main board failure.
        const CAMERA_MAIN_BOARD_FAILURE = 0x0004_0000;
        /// Head board failure.
        const CAMERA_HEAD_BOARD_FAILURE = 0x0008_0000;
    }
}

bitflags! {
    /// General camera status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CameraStatus: u32 {
        /// Camera is in its default state.
        const DEFAULT_STATE = 0x0000_0001;
        /// Settings were validated by the last arm.
        const SETTINGS_VALID = 0x0000_0002;
        /// Recording is on.
        const RECORDING_STATE = 0x0000_0004;
        /// Sensor readout in progress.
        const SENSOR_READOUT_STATE = 0x0000_0008;
        /// Frame rate mode active.
        const FRAMERATE_STATE = 0x0000_0010;
        /// Stopped by trigger.
        const TRIGGERED_STOP = 0x0000_0020;
        /// Locked to an external sync.
        const CAMERA_LOCKED_TO_EXT = 0x0000_0040;
        /// Battery connected.
        const BATTERY_CONNECTED = 0x0000_0080;
        /// Power save mode.
        const POWER_SAVE = 0x0000_0100;
        /// Left power save mode.
        const POWER_SAVE_LEFT = 0x0000_0200;
        /// Locked to IRIG time code.
        const CAMERA_LOCKED_TO_IRIG = 0x0000_0400;
    }
}

/// Health words returned together by the SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HealthStatus {
    /// Non-fatal conditions.
    pub warnings: HealthWarnings,
    /// Fatal conditions.
    pub errors: HealthErrors,
    /// General status.
    pub status: CameraStatus,
}

impl HealthStatus {
    /// Decode raw words, keeping unknown bits.
    pub fn from_raw(warnings: u32, errors: u32, status: u32) -> Self {
        Self {
            warnings: HealthWarnings::from_bits_retain(warnings),
            errors: HealthErrors::from_bits_retain(errors),
            status: CameraStatus::from_bits_retain(status),
        }
    }

    /// True when no error bit is set.
    pub fn is_healthy(&self) -> bool {
        self.errors.is_empty()
    }
}
