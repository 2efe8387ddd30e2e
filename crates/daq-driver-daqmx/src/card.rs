//! Analog input card driven through a DAQmx task.
//!
//! # State machine
//!
//! ```text
//!            start()                stop()              hardware stop
//!   Idle ─────────────▶ Running ─────────────▶ Stopping ─────────────▶ Idle
//!    ▲  configure_*()      │ read()                 │ waits for the
//!    └── add_channel()     └── polls + transfers    │ in-flight read
//! ```
//!
//! `read()` holds the transfer guard for its whole duration. `stop()` flips the
//! state to `Stopping` first (so a polling read gives up at its next poll
//! boundary) and then takes the same guard before issuing the hardware stop, so
//! the hardware is never stopped underneath a running transfer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use daq_core::capabilities::{
    AcquisitionCard, CardRunState, TerminalConfig, TriggerConfig, TriggerEdge,
};
use daq_core::config::CardSettings;
use daq_core::data::AcquiredSample;
use daq_core::error::{DaqError, DaqResult, DriverErrorKind};
use daq_core::flow::run_blocking;
use daq_core::timestamp::Timestamp;

use crate::binding::{DaqmxBinding, TaskHandle, TriggerSpec};
use crate::channel::{channel_spec, AcquisitionChannel};
use crate::timing::ClockConfig;

/// Analog input card backed by a DAQmx task.
pub struct DaqmxCard {
    board: String,
    binding: Arc<dyn DaqmxBinding>,
    /// `None` once closed.
    task: Mutex<Option<TaskHandle>>,
    channels: RwLock<Vec<AcquisitionChannel>>,
    clock: Mutex<Option<ClockConfig>>,
    trigger: Mutex<Option<TriggerConfig>>,
    state: Mutex<CardRunState>,
    /// Held by `read()` for its whole duration and by `stop()` around the hardware stop.
    transfer: tokio::sync::Mutex<()>,
    poll_interval: Duration,
    sequence: AtomicU64,
    last_read: Mutex<Option<Timestamp>>,
}

impl DaqmxCard {
    /// Open a task on `settings.board`.
    pub async fn open(binding: Arc<dyn DaqmxBinding>, settings: &CardSettings) -> DaqResult<Self> {
        if settings.poll_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "Card poll interval must be positive".into(),
            ));
        }

        let board = settings.board.clone();
        let task = {
            let binding = Arc::clone(&binding);
            let board = board.clone();
            run_blocking(move || {
                binding
                    .open(&board)
                    .map_err(|e| e.into_daq(DriverErrorKind::Initialization))
            })
            .await?
        };
        info!(board = %board, task = task.0, "Opened DAQmx task");

        Ok(Self {
            board,
            binding,
            task: Mutex::new(Some(task)),
            channels: RwLock::new(Vec::new()),
            clock: Mutex::new(None),
            trigger: Mutex::new(None),
            state: Mutex::new(CardRunState::Idle),
            transfer: tokio::sync::Mutex::new(()),
            poll_interval: settings.poll_interval(),
            sequence: AtomicU64::new(0),
            last_read: Mutex::new(None),
        })
    }

    fn task(&self) -> DaqResult<TaskHandle> {
        (*self.task.lock())
            .ok_or_else(|| DaqError::Configuration(format!("Card '{}' is closed", self.board)))
    }

    /// Task handle, only if the card is open and idle.
    fn idle_task(&self, operation: &str) -> DaqResult<TaskHandle> {
        let task = self.task()?;
        let state = *self.state.lock();
        if state != CardRunState::Idle {
            return Err(DaqError::Configuration(format!(
                "Cannot {} while the card is {:?}",
                operation, state
            )));
        }
        Ok(task)
    }

    /// Snapshot of the configured channels.
    pub fn channels(&self) -> Vec<AcquisitionChannel> {
        self.channels.read().clone()
    }

    /// Samples per channel per burst, if a clock is configured.
    pub fn samples_per_channel(&self) -> Option<usize> {
        self.clock.lock().map(|c| c.samples_per_channel)
    }

    /// Active start trigger, if any.
    pub fn trigger(&self) -> Option<TriggerConfig> {
        self.trigger.lock().clone()
    }

    /// True while a `read()` is in flight.
    pub fn is_reading(&self) -> bool {
        self.transfer.try_lock().is_err()
    }

    /// Completion time of the most recent successful transfer.
    pub fn last_read(&self) -> Option<Timestamp> {
        *self.last_read.lock()
    }

    /// Poll timeout used for each wait-until-done call.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Maximum sample clock rate reported by the device.
    pub fn max_sample_rate(&self) -> DaqResult<f64> {
        let task = self.task()?;
        self.binding
            .max_sample_rate(task)
            .map_err(|e| e.into_daq(DriverErrorKind::Configuration))
    }

    /// True once `close()` has released the device.
    pub fn is_closed(&self) -> bool {
        self.task.lock().is_none()
    }

    fn set_state(&self, state: CardRunState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous != state {
            debug!(board = %self.board, ?previous, ?state, "Card state change");
        }
    }

    fn is_running(&self) -> bool {
        *self.state.lock() == CardRunState::Running
    }
}

#[async_trait]
impl AcquisitionCard for DaqmxCard {
    fn name(&self) -> &str {
        &self.board
    }

    fn sample_rate(&self) -> Option<f64> {
        self.clock.lock().map(|c| c.sample_rate)
    }

    fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    fn run_state(&self) -> CardRunState {
        *self.state.lock()
    }

    async fn add_channel(
        &self,
        channel: &str,
        terminal: TerminalConfig,
        voltage_range: f64,
    ) -> DaqResult<()> {
        let task = self.idle_task("add a channel")?;
        let supported = self.binding.supported_terminal_configs(task);
        let spec = channel_spec(channel, terminal, voltage_range, &supported)?;

        let reference = self
            .binding
            .add_channel(task, &spec)
            .map_err(|e| e.into_daq(DriverErrorKind::Configuration))?;

        debug!(
            board = %self.board,
            channel,
            %terminal,
            voltage_range,
            "Added analog input channel"
        );
        self.channels.write().push(AcquisitionChannel::new(
            channel.to_string(),
            terminal,
            voltage_range,
            reference,
        ));
        Ok(())
    }

    async fn configure_clock(
        &self,
        sample_rate: f64,
        samples_per_channel: usize,
    ) -> DaqResult<()> {
        let task = self.idle_task("configure the clock")?;
        let max_rate = self.max_sample_rate()?;
        let clock = ClockConfig::new(sample_rate, samples_per_channel, max_rate)?;

        self.binding
            .configure_clock(task, clock.sample_rate, clock.samples_per_channel)
            .map_err(|e| e.into_daq(DriverErrorKind::Configuration))?;

        debug!(board = %self.board, sample_rate, samples_per_channel, "Configured sample clock");
        *self.clock.lock() = Some(clock);
        Ok(())
    }

    async fn configure_trigger(&self, trigger: Option<TriggerConfig>) -> DaqResult<()> {
        let task = self.idle_task("configure the trigger")?;

        let spec = match &trigger {
            None => None,
            Some(t) if t.edge != TriggerEdge::Rising => {
                return Err(DaqError::UnsupportedFeature(format!(
                    "{:?} edge triggering",
                    t.edge
                )));
            }
            Some(t) => Some(TriggerSpec {
                source: t.source.clone(),
                level: t.level,
            }),
        };

        self.binding
            .configure_trigger(task, spec.as_ref())
            .map_err(|e| e.into_daq(DriverErrorKind::Configuration))?;

        match &trigger {
            Some(t) => debug!(
                board = %self.board,
                source = %t.source,
                trigger_level = t.level,
                "Analog edge start trigger"
            ),
            None => debug!(board = %self.board, "Start trigger disabled"),
        }
        *self.trigger.lock() = trigger;
        Ok(())
    }

    async fn start(&self) -> DaqResult<()> {
        let task = self.idle_task("start")?;
        let Some(clock) = *self.clock.lock() else {
            return Err(DaqError::Configuration(
                "Sample clock must be configured before start".into(),
            ));
        };

        self.binding
            .start(task)
            .map_err(|e| e.into_daq(DriverErrorKind::Control))?;

        self.set_state(CardRunState::Running);
        info!(
            board = %self.board,
            channels = self.channel_count(),
            burst = ?clock.burst_duration(),
            "Acquisition started"
        );
        Ok(())
    }

    async fn read(&self) -> DaqResult<Option<AcquiredSample>> {
        let _transfer = self.transfer.lock().await;
        let task = self.task()?;

        let mut done = false;
        while self.is_running() {
            let binding = Arc::clone(&self.binding);
            let timeout = self.poll_interval;
            match run_blocking(move || Ok(binding.wait_until_done(task, timeout))).await? {
                Ok(()) => {
                    done = true;
                    break;
                }
                Err(e) if e.is_wait_timeout() => {
                    trace!(board = %self.board, "Burst not ready, polling again");
                }
                Err(e) => {
                    debug!(board = %self.board, error = %e, "Wait failed, polling again");
                }
            }
        }

        if !done || !self.is_running() {
            debug!(board = %self.board, "Card left running state, no transfer");
            return Ok(None);
        }

        let binding = Arc::clone(&self.binding);
        let burst = run_blocking(move || {
            binding
                .read_all_available(task)
                .map_err(|e| e.into_daq(DriverErrorKind::Transfer))
        })
        .await?;
        let timestamp = Timestamp::now();
        *self.last_read.lock() = Some(timestamp);

        let data = burst
            .into_array()
            .map_err(|e| e.into_daq(DriverErrorKind::Transfer))?;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        trace!(
            board = %self.board,
            sequence,
            scans = data.nrows(),
            channels = data.ncols(),
            "Burst transferred"
        );

        Ok(Some(AcquiredSample {
            data,
            timestamp,
            sequence,
        }))
    }

    async fn stop(&self) -> DaqResult<()> {
        {
            let mut state = self.state.lock();
            if *state != CardRunState::Running {
                return Ok(());
            }
            *state = CardRunState::Stopping;
        }
        debug!(board = %self.board, "Stopping, waiting for in-flight read");

        let _transfer = self.transfer.lock().await;
        let result = match self.task() {
            Ok(task) => {
                let binding = Arc::clone(&self.binding);
                run_blocking(move || {
                    binding
                        .stop(task)
                        .map_err(|e| e.into_daq(DriverErrorKind::Control))
                })
                .await
            }
            Err(e) => Err(e),
        };

        self.set_state(CardRunState::Idle);
        match &result {
            Ok(()) => info!(board = %self.board, "Acquisition stopped"),
            Err(e) => warn!(board = %self.board, error = %e, "Hardware stop failed"),
        }
        result
    }

    async fn close(&self) -> DaqResult<()> {
        let mut first_error = None;
        if self.run_state() == CardRunState::Running {
            if let Err(e) = self.stop().await {
                warn!(board = %self.board, error = %e, "Stop during close failed");
                first_error = Some(e);
            }
        }

        // A concurrent stop() may have marked Stopping without queueing on the
        // guard yet; its hardware stop has to run before the vendor close.
        let _transfer = loop {
            let guard = self.transfer.lock().await;
            if self.run_state() != CardRunState::Stopping {
                break guard;
            }
            drop(guard);
            tokio::task::yield_now().await;
        };
        let Some(task) = self.task.lock().take() else {
            return Ok(());
        };
        self.channels.write().clear();
        *self.clock.lock() = None;
        *self.trigger.lock() = None;

        let binding = Arc::clone(&self.binding);
        let closed = run_blocking(move || {
            binding
                .close(task)
                .map_err(|e| e.into_daq(DriverErrorKind::Shutdown))
        })
        .await;
        match closed {
            Ok(()) => info!(board = %self.board, "Closed DAQmx task"),
            Err(e) => {
                warn!(board = %self.board, error = %e, "Task close failed");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for DaqmxCard {
    fn drop(&mut self) {
        let Some(task) = self.task.get_mut().take() else {
            return;
        };
        if *self.state.get_mut() != CardRunState::Idle {
            if let Err(e) = self.binding.stop(task) {
                warn!(board = %self.board, error = %e, "Error stopping task on drop");
            }
        }
        if let Err(e) = self.binding.close(task) {
            warn!(board = %self.board, error = %e, "Error closing task on drop");
        }
    }
}

impl std::fmt::Debug for DaqmxCard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaqmxCard")
            .field("board", &self.board)
            .field("state", &*self.state.lock())
            .field("channels", &self.channel_count())
            .field("clock", &*self.clock.lock())
            .finish()
    }
}
