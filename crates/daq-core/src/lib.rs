//! `daq-core`
//!
//! Shared model for streaming laboratory acquisition hardware.
//!
//! This crate defines what every acquisition driver agrees on: the error
//! taxonomy, the data payloads and their timestamps, the capability traits the
//! rest of an application programs against, settings loading and tracing setup.
//! Vendor specifics live in the driver crates (`daq-driver-daqmx`,
//! `daq-driver-pco`).
//!
//! ## Device families
//!
//! - [`AcquisitionCard`]: analog input card with an explicit
//!   `Idle → Running → Stopping → Idle` state machine and an async polled read.
//! - [`FrameSource`]: camera streaming frames out of a bounded ring of hardware
//!   buffers.
//!
//! ## Key Types
//!
//! - [`AcquiredSample`]: `(samples, channels)` burst with its timestamp
//! - [`AcquiredFrame`]: frame with session counter, ring slot and timestamp
//! - [`DaqError`]: error type shared by all drivers

pub mod capabilities;
pub mod config;
pub mod data;
pub mod error;
pub mod flow;
pub mod logging;
pub mod timestamp;

pub use capabilities::{
    AcquisitionCard, CardRunState, FrameSource, TerminalConfig, TriggerConfig, TriggerEdge,
};
pub use config::{CameraSettings, CardSettings, DaqSettings, LogFormat, LoggingSettings};
pub use data::{AcquiredFrame, AcquiredSample, Frame};
pub use error::{DaqError, DaqResult, DriverError, DriverErrorKind};
pub use timestamp::Timestamp;
