//! Acquisition capability traits.
//!
//! Two device families share this crate:
//!
//! - [`AcquisitionCard`]: multi-channel analog input driven through
//!   configure → start → read → stop. `read()` is the polling primitive;
//!   [`AcquisitionCard::acquisition`] turns it into a lazy stream.
//! - [`FrameSource`]: a camera that delivers frames from a recording session as
//!   a lazy stream, each frame carrying its session counter and timestamp.
//!
//! Both traits are object safe so callers can hold `Arc<dyn AcquisitionCard>`
//! and `Arc<dyn FrameSource>` without knowing the vendor behind them.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! card.add_channel("Dev1/ai0", TerminalConfig::Rse, 10.0).await?;
//! card.configure_clock(1000.0, 100).await?;
//! card.start().await?;
//! let mut bursts = card.acquisition(Some(3));
//! while let Some(burst) = bursts.next().await {
//!     let burst = burst?;
//!     println!("{:?} at {}", burst.shape(), burst.timestamp.unix_seconds());
//! }
//! drop(bursts);
//! card.stop().await?;
//! ```

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::data::{AcquiredFrame, AcquiredSample};
use crate::error::{DaqError, DaqResult, DriverErrorKind};

// =============================================================================
// Card configuration vocabulary
// =============================================================================

/// Electrical reference of an analog input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminalConfig {
    /// Referenced single-ended.
    Rse,
    /// Non-referenced single-ended.
    Nrse,
    /// Differential.
    Differential,
    /// Pseudo-differential.
    PseudoDifferential,
}

impl std::fmt::Display for TerminalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TerminalConfig::Rse => "RSE",
            TerminalConfig::Nrse => "NRSE",
            TerminalConfig::Differential => "Differential",
            TerminalConfig::PseudoDifferential => "PseudoDifferential",
        };
        write!(f, "{}", label)
    }
}

/// Trigger edge polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerEdge {
    /// Low to high crossing.
    Rising,
    /// High to low crossing.
    Falling,
}

/// Analog start trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Trigger source terminal, e.g. `"Dev1/ai0"`.
    pub source: String,
    /// Threshold in volts.
    pub level: f64,
    /// Edge polarity.
    pub edge: TriggerEdge,
}

impl TriggerConfig {
    /// Rising-edge trigger on `source` at `level` volts.
    pub fn rising(source: impl Into<String>, level: f64) -> Self {
        Self {
            source: source.into(),
            level,
            edge: TriggerEdge::Rising,
        }
    }
}

/// Run state of an acquisition card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardRunState {
    /// Configurable; no hardware task running.
    Idle,
    /// Hardware task started; `read()` produces data.
    Running,
    /// Stop requested; waiting for the in-flight read before the hardware stop.
    Stopping,
}

// =============================================================================
// AcquisitionCard
// =============================================================================

/// Multi-channel analog input card.
///
/// Configuration calls are only accepted while the card is
/// [`CardRunState::Idle`].
#[async_trait]
pub trait AcquisitionCard: Send + Sync {
    /// Board identifier.
    fn name(&self) -> &str;

    /// Configured sample rate in Hz, if a clock has been configured.
    fn sample_rate(&self) -> Option<f64>;

    /// Number of configured channels.
    fn channel_count(&self) -> usize;

    /// Current run state.
    fn run_state(&self) -> CardRunState;

    /// Add an analog input channel with a symmetric `±voltage_range` span.
    async fn add_channel(
        &self,
        channel: &str,
        terminal: TerminalConfig,
        voltage_range: f64,
    ) -> DaqResult<()>;

    /// Configure the sample clock.
    async fn configure_clock(&self, sample_rate: f64, samples_per_channel: usize)
        -> DaqResult<()>;

    /// Configure (or with `None`, remove) the start trigger.
    async fn configure_trigger(&self, trigger: Option<TriggerConfig>) -> DaqResult<()>;

    /// Arm and start the hardware task.
    async fn start(&self) -> DaqResult<()>;

    /// Wait for the next burst and transfer it.
    ///
    /// Returns `Ok(None)` when the card left the running state before a burst
    /// completed.
    async fn read(&self) -> DaqResult<Option<AcquiredSample>>;

    /// Stop the hardware task once any in-flight read has finished.
    async fn stop(&self) -> DaqResult<()>;

    /// Release the device. Idempotent.
    async fn close(&self) -> DaqResult<()>;

    /// Lazy stream of successive bursts.
    ///
    /// Yields `count` bursts when given, otherwise runs until the card stops.
    fn acquisition(&self, count: Option<u64>) -> BoxStream<'_, DaqResult<AcquiredSample>> {
        futures::stream::try_unfold(0u64, move |taken| async move {
            if count.is_some_and(|limit| taken >= limit) {
                return Ok::<_, DaqError>(None);
            }
            let next = self.read().await?;
            Ok(next.map(|sample| (sample, taken + 1)))
        })
        .boxed()
    }
}

// =============================================================================
// FrameSource
// =============================================================================

/// Camera delivering frames through recording sessions.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Camera model name.
    fn name(&self) -> &str;

    /// Current `(width, height)` in pixels.
    fn resolution(&self) -> (u32, u32);

    /// Bits per pixel.
    fn bit_depth(&self) -> u32;

    /// Start a recording session and stream its frames.
    ///
    /// The session ends after `count` frames when given, or when
    /// [`FrameSource::request_stop`] is called. Dropping the stream ends the
    /// session and releases outstanding transfers.
    fn acquisition(&self, count: Option<u64>) -> BoxStream<'_, DaqResult<AcquiredFrame>>;

    /// Ask the running session to end at its next poll.
    fn request_stop(&self);

    /// Record a single frame.
    async fn acquisition_oneshot(&self) -> DaqResult<AcquiredFrame> {
        let mut frames = self.acquisition(Some(1));
        match frames.next().await {
            Some(frame) => frame,
            None => Err(DaqError::device(
                self.name(),
                DriverErrorKind::Control,
                "recording ended before a frame arrived",
            )),
        }
    }
}
