//! Buffer-ring camera driver.
//!
//! Drives a camera through a PCO SC2-style SDK: up to [`ring::MAX_BUFFERS`]
//! buffers are allocated per camera, transfers are queued on them, and finished
//! buffers are polled, copied out and re-queued while the camera records.
//!
//! # Architecture
//!
//! - [`PcoBinding`] - SDK call boundary
//! - [`BufferRing`] - slot bookkeeping (allocated / queued / ready)
//! - [`PcoCamera`] - session logic behind [`daq_core::FrameSource`]
//! - [`status`] - DLL buffer status and camera health words
//! - [`mock::SimulatedPco`] - simulated SDK (feature `mock`, on by default)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use daq_core::{CameraSettings, FrameSource};
//! use daq_driver_pco::{mock::SimulatedPco, PcoCamera};
//!
//! # async fn example() -> daq_core::DaqResult<()> {
//! let camera = PcoCamera::open(Arc::new(SimulatedPco::default()), &CameraSettings::default()).await?;
//! let mut frames = camera.acquisition(Some(10));
//! while let Some(frame) = frames.next().await {
//!     let frame = frame?;
//!     println!("frame {} from slot {}", frame.counter, frame.slot);
//! }
//! drop(frames);
//! camera.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod camera;
pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ring;
pub mod status;

pub use binding::{
    BitAlignment, CameraHandle, EventHandle, ImageParams, ImageReadMode, PcoBinding, SensorSizes,
};
pub use camera::{BufferPoll, PcoCamera};
pub use error::{ErrorLayer, PcoError};
pub use ring::{BufferRing, BufferSlot, SlotState, MAX_BUFFERS};
pub use status::{CameraStatus, DllStatus, HealthErrors, HealthStatus, HealthWarnings};
