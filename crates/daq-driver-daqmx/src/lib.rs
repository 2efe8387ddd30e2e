//! Task-based analog input card driver.
//!
//! Wraps a DAQmx-style driver (tasks, channels, sample clock, start trigger,
//! wait-until-done, bulk read) behind the [`daq_core::AcquisitionCard`] trait.
//!
//! # Architecture
//!
//! - [`DaqmxBinding`] - the vendor call boundary, one method per task-level call
//! - [`DaqmxCard`] - the card state machine and async polled read
//! - [`AcquisitionChannel`] / [`ClockConfig`] - validated configuration
//! - [`mock::SimulatedDaqmx`] - simulated driver (feature `mock`, on by default)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use daq_core::{AcquisitionCard, CardSettings, TerminalConfig};
//! use daq_driver_daqmx::{mock::SimulatedDaqmx, DaqmxCard};
//!
//! # async fn example() -> daq_core::DaqResult<()> {
//! let card = DaqmxCard::open(Arc::new(SimulatedDaqmx::default()), &CardSettings::default()).await?;
//! card.add_channel("Dev1/ai0", TerminalConfig::Rse, 10.0).await?;
//! card.add_channel("Dev1/ai1", TerminalConfig::Rse, 10.0).await?;
//! card.configure_clock(1000.0, 100).await?;
//! card.start().await?;
//!
//! if let Some(burst) = card.read().await? {
//!     assert_eq!(burst.shape(), (100, 2));
//! }
//! card.stop().await?;
//! card.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod card;
pub mod channel;
pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod timing;

pub use binding::{ChannelRef, ChannelSpec, DaqmxBinding, RawBurst, TaskHandle, TriggerSpec};
pub use card::DaqmxCard;
pub use channel::AcquisitionChannel;
pub use error::DaqmxError;
pub use timing::ClockConfig;
