//! Default stream methods of the capability traits.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use ndarray::Array2;

use daq_core::{
    AcquiredFrame, AcquiredSample, AcquisitionCard, CardRunState, DaqError, DaqResult,
    DriverErrorKind, Frame, FrameSource, TerminalConfig, Timestamp, TriggerConfig,
};

/// Card that produces `bursts` reads, then reports it stopped.
struct CountingCard {
    bursts: u64,
    reads: AtomicU64,
}

impl CountingCard {
    fn new(bursts: u64) -> Self {
        Self {
            bursts,
            reads: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl AcquisitionCard for CountingCard {
    fn name(&self) -> &str {
        "counting"
    }

    fn sample_rate(&self) -> Option<f64> {
        Some(1000.0)
    }

    fn channel_count(&self) -> usize {
        1
    }

    fn run_state(&self) -> CardRunState {
        if self.reads.load(Ordering::SeqCst) < self.bursts {
            CardRunState::Running
        } else {
            CardRunState::Idle
        }
    }

    async fn add_channel(&self, _: &str, _: TerminalConfig, _: f64) -> DaqResult<()> {
        Ok(())
    }

    async fn configure_clock(&self, _: f64, _: usize) -> DaqResult<()> {
        Ok(())
    }

    async fn configure_trigger(&self, _: Option<TriggerConfig>) -> DaqResult<()> {
        Ok(())
    }

    async fn start(&self) -> DaqResult<()> {
        Ok(())
    }

    async fn read(&self) -> DaqResult<Option<AcquiredSample>> {
        let sequence = self.reads.fetch_add(1, Ordering::SeqCst);
        if sequence >= self.bursts {
            return Ok(None);
        }
        if sequence == 99 {
            return Err(DaqError::device(
                "counting",
                DriverErrorKind::Transfer,
                "burst 99 lost",
            ));
        }
        Ok(Some(AcquiredSample {
            data: Array2::from_elem((4, 1), sequence as f64),
            timestamp: Timestamp::now(),
            sequence,
        }))
    }

    async fn stop(&self) -> DaqResult<()> {
        Ok(())
    }

    async fn close(&self) -> DaqResult<()> {
        Ok(())
    }
}

/// Camera whose sessions deliver `frames` frames.
struct FixedCamera {
    frames: u64,
}

#[async_trait]
impl FrameSource for FixedCamera {
    fn name(&self) -> &str {
        "fixed"
    }

    fn resolution(&self) -> (u32, u32) {
        (2, 2)
    }

    fn bit_depth(&self) -> u32 {
        16
    }

    fn acquisition(&self, count: Option<u64>) -> BoxStream<'_, DaqResult<AcquiredFrame>> {
        let n = count.map_or(self.frames, |c| c.min(self.frames));
        stream::iter(1..=n)
            .map(|counter| {
                Ok::<_, DaqError>(AcquiredFrame {
                    frame: Frame::from_u16(2, 2, &[counter as u16; 4]),
                    counter,
                    slot: 0,
                    timestamp: Timestamp::now(),
                })
            })
            .boxed()
    }

    fn request_stop(&self) {}
}

#[tokio::test]
async fn test_card_stream_honours_count() {
    let card = CountingCard::new(10);

    let bursts: Vec<AcquiredSample> = card.acquisition(Some(3)).try_collect().await.unwrap();

    let sequences: Vec<u64> = bursts.iter().map(|b| b.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    assert!(bursts.iter().all(|b| b.shape() == (4, 1)));
    assert_eq!(card.reads.load(Ordering::SeqCst), 3, "no read past the count");
}

#[tokio::test]
async fn test_card_stream_ends_when_card_stops() {
    let card = CountingCard::new(5);

    let bursts: Vec<AcquiredSample> = card.acquisition(None).try_collect().await.unwrap();

    assert_eq!(bursts.len(), 5);
    assert_eq!(card.run_state(), CardRunState::Idle);
}

#[tokio::test]
async fn test_card_stream_stops_at_first_error() {
    let card = CountingCard::new(200);
    card.reads.store(98, Ordering::SeqCst);

    let results: Vec<DaqResult<AcquiredSample>> = card.acquisition(None).collect().await;

    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(results[1].as_ref().is_err_and(DaqError::is_device));
}

#[tokio::test]
async fn test_oneshot_takes_first_frame() {
    let camera = FixedCamera { frames: 3 };

    let frame = camera.acquisition_oneshot().await.unwrap();

    assert_eq!(frame.counter, 1);
    assert_eq!(frame.frame.get(1, 1), Some(1));
}

#[tokio::test]
async fn test_oneshot_without_frame_is_a_device_error() {
    let camera = FixedCamera { frames: 0 };

    let err = camera.acquisition_oneshot().await.unwrap_err();

    let driver = err.driver_error().unwrap();
    assert_eq!(driver.kind, DriverErrorKind::Control);
    assert_eq!(driver.driver_type, "fixed");
}
