//! Simulated DAQmx driver.
//!
//! Behaves like a finite-burst task that re-arms after every bulk read: once
//! started, a burst is ready `samples_per_channel / sample_rate` after the
//! start (or the previous read). Knobs in [`SimulatedDaqmxConfig`] inject
//! transfer latency, transient wait failures, transfer faults and failing
//! stop/clear calls. Every call is appended to a log so tests can assert on
//! ordering.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use daq_core::capabilities::TerminalConfig;
use parking_lot::Mutex;

use crate::binding::{ChannelRef, ChannelSpec, DaqmxBinding, RawBurst, TaskHandle, TriggerSpec};
use crate::error::{DaqmxError, Result, WAIT_TIMEOUT_CODE};

/// Recorded binding call.
#[derive(Debug, Clone, PartialEq)]
pub enum DaqmxCall {
    /// Task created on a board.
    Open(String),
    /// Channel created.
    AddChannel(String),
    /// Clock configured.
    ConfigureClock {
        /// Hz.
        sample_rate: f64,
        /// Samples per channel.
        samples_per_channel: usize,
    },
    /// Trigger configured (`None` = disabled).
    ConfigureTrigger(Option<String>),
    /// Task started.
    Start,
    /// A wait returned before the burst was ready.
    WaitTimeout,
    /// A wait returned with the burst ready.
    WaitDone,
    /// Bulk read began.
    TransferBegin,
    /// Bulk read finished.
    TransferEnd,
    /// Task stopped.
    Stop,
    /// Task cleared.
    Close,
}

/// Behaviour of a [`SimulatedDaqmx`].
#[derive(Debug, Clone)]
pub struct SimulatedDaqmxConfig {
    /// Terminal configurations the device accepts.
    pub terminal_configs: Vec<TerminalConfig>,
    /// Maximum sample clock rate, Hz.
    pub max_sample_rate: f64,
    /// Extra time spent inside every bulk read.
    pub transfer_delay: Duration,
    /// Number of initial waits that fail regardless of readiness.
    pub transient_wait_failures: u32,
    /// Replace the clock-derived burst duration.
    pub burst_duration: Option<Duration>,
    /// Fail the bulk read with this zero-based burst index.
    pub fail_transfer_at: Option<u64>,
    /// Every stop call fails and leaves the task running.
    pub fail_stop: bool,
    /// Every clear call fails and leaves the task allocated.
    pub fail_close: bool,
}

impl Default for SimulatedDaqmxConfig {
    fn default() -> Self {
        Self {
            terminal_configs: vec![
                TerminalConfig::Rse,
                TerminalConfig::Nrse,
                TerminalConfig::Differential,
                TerminalConfig::PseudoDifferential,
            ],
            max_sample_rate: 250_000.0,
            transfer_delay: Duration::ZERO,
            transient_wait_failures: 0,
            burst_duration: None,
            fail_transfer_at: None,
            fail_stop: false,
            fail_close: false,
        }
    }
}

#[derive(Debug, Default)]
struct SimTask {
    channels: Vec<ChannelSpec>,
    clock: Option<(f64, usize)>,
    trigger: Option<TriggerSpec>,
    running: bool,
    next_ready: Option<Instant>,
    bursts: u64,
}

#[derive(Debug, Default)]
struct SimState {
    next_handle: u64,
    tasks: HashMap<TaskHandle, SimTask>,
    calls: Vec<DaqmxCall>,
    transient_remaining: u32,
}

/// In-process stand-in for the DAQmx driver.
#[derive(Debug)]
pub struct SimulatedDaqmx {
    config: SimulatedDaqmxConfig,
    state: Mutex<SimState>,
}

impl Default for SimulatedDaqmx {
    fn default() -> Self {
        Self::new(SimulatedDaqmxConfig::default())
    }
}

impl SimulatedDaqmx {
    /// Create a simulated driver.
    pub fn new(config: SimulatedDaqmxConfig) -> Self {
        let state = SimState {
            transient_remaining: config.transient_wait_failures,
            ..SimState::default()
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<DaqmxCall> {
        self.state.lock().calls.clone()
    }

    /// Index of the first occurrence of `call` in the log.
    pub fn position(&self, call: &DaqmxCall) -> Option<usize> {
        self.state.lock().calls.iter().position(|c| c == call)
    }

    /// Number of `call` entries in the log.
    pub fn count(&self, call: &DaqmxCall) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Tasks not yet cleared.
    pub fn open_task_count(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Channels held by all open tasks.
    pub fn channel_count(&self) -> usize {
        self.state.lock().tasks.values().map(|t| t.channels.len()).sum()
    }

    /// True while any task is started.
    pub fn is_running(&self) -> bool {
        self.state.lock().tasks.values().any(|t| t.running)
    }

    fn burst_duration(&self, clock: Option<(f64, usize)>) -> Duration {
        self.config.burst_duration.unwrap_or_else(|| match clock {
            Some((rate, samples)) if rate > 0.0 => Duration::from_secs_f64(samples as f64 / rate),
            _ => Duration::ZERO,
        })
    }

    fn with_task<T>(
        &self,
        task: TaskHandle,
        f: impl FnOnce(&mut SimTask, &mut Vec<DaqmxCall>) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let sim = state
            .tasks
            .get_mut(&task)
            .ok_or_else(|| invalid_task(task))?;
        f(sim, &mut state.calls)
    }
}

fn invalid_task(task: TaskHandle) -> DaqmxError {
    DaqmxError::vendor(
        -200088,
        format!("Task specified is invalid or does not exist. Task: {}", task.0),
    )
}

fn wait_timeout() -> DaqmxError {
    DaqmxError::vendor(
        WAIT_TIMEOUT_CODE,
        "Wait Until Done did not indicate that the task was done within the specified timeout.",
    )
}

/// Test signal: channel `c` is a 10 Hz sine of amplitude 1 V offset by `c` volts.
fn sample_value(channel: usize, index: u64, rate: f64) -> f64 {
    let t = index as f64 / rate;
    channel as f64 + (2.0 * std::f64::consts::PI * 10.0 * t).sin()
}

impl DaqmxBinding for SimulatedDaqmx {
    fn open(&self, board: &str) -> Result<TaskHandle> {
        let mut state = self.state.lock();
        state.next_handle += 1;
        let handle = TaskHandle(state.next_handle);
        state.tasks.insert(handle, SimTask::default());
        state.calls.push(DaqmxCall::Open(board.to_string()));
        Ok(handle)
    }

    fn close(&self, task: TaskHandle) -> Result<()> {
        let mut state = self.state.lock();
        if !state.tasks.contains_key(&task) {
            return Err(invalid_task(task));
        }
        state.calls.push(DaqmxCall::Close);
        if self.config.fail_close {
            return Err(DaqmxError::vendor(
                -88705,
                "Device not present: the device was removed or is not responding.",
            ));
        }
        state.tasks.remove(&task);
        Ok(())
    }

    fn supported_terminal_configs(&self, _task: TaskHandle) -> Vec<TerminalConfig> {
        self.config.terminal_configs.clone()
    }

    fn add_channel(&self, task: TaskHandle, spec: &ChannelSpec) -> Result<ChannelRef> {
        self.with_task(task, |sim, calls| {
            if sim
                .channels
                .iter()
                .any(|c| c.physical_channel == spec.physical_channel)
            {
                return Err(DaqmxError::vendor(
                    -200489,
                    format!(
                        "Specified channel cannot be added to the task, because a channel with the same name is already in the task. Channel Name: {}",
                        spec.physical_channel
                    ),
                ));
            }
            sim.channels.push(spec.clone());
            calls.push(DaqmxCall::AddChannel(spec.physical_channel.clone()));
            Ok(ChannelRef((sim.channels.len() - 1) as u32))
        })
    }

    fn configure_clock(
        &self,
        task: TaskHandle,
        sample_rate: f64,
        samples_per_channel: usize,
    ) -> Result<()> {
        self.with_task(task, |sim, calls| {
            sim.clock = Some((sample_rate, samples_per_channel));
            calls.push(DaqmxCall::ConfigureClock {
                sample_rate,
                samples_per_channel,
            });
            Ok(())
        })
    }

    fn configure_trigger(&self, task: TaskHandle, trigger: Option<&TriggerSpec>) -> Result<()> {
        self.with_task(task, |sim, calls| {
            sim.trigger = trigger.cloned();
            calls.push(DaqmxCall::ConfigureTrigger(
                trigger.map(|t| t.source.clone()),
            ));
            Ok(())
        })
    }

    fn max_sample_rate(&self, task: TaskHandle) -> Result<f64> {
        self.with_task(task, |_, _| Ok(self.config.max_sample_rate))
    }

    fn start(&self, task: TaskHandle) -> Result<()> {
        let duration = {
            let state = self.state.lock();
            let sim = state.tasks.get(&task).ok_or_else(|| invalid_task(task))?;
            self.burst_duration(sim.clock)
        };
        self.with_task(task, |sim, calls| {
            if sim.channels.is_empty() {
                return Err(DaqmxError::vendor(
                    -200478,
                    "Specified operation cannot be performed when there are no channels in the task.",
                ));
            }
            if sim.running {
                return Err(DaqmxError::vendor(
                    -200479,
                    "Specified operation cannot be performed while the task is running.",
                ));
            }
            sim.running = true;
            sim.bursts = 0;
            sim.next_ready = Some(Instant::now() + duration);
            calls.push(DaqmxCall::Start);
            Ok(())
        })
    }

    fn stop(&self, task: TaskHandle) -> Result<()> {
        self.with_task(task, |sim, calls| {
            if self.config.fail_stop {
                return Err(DaqmxError::vendor(
                    -50103,
                    "The specified resource is reserved. The operation could not be completed as specified.",
                ));
            }
            sim.running = false;
            sim.next_ready = None;
            calls.push(DaqmxCall::Stop);
            Ok(())
        })
    }

    fn wait_until_done(&self, task: TaskHandle, timeout: Duration) -> Result<()> {
        let remaining = {
            let mut state = self.state.lock();
            let state = &mut *state;
            let sim = state.tasks.get(&task).ok_or_else(|| invalid_task(task))?;
            if state.transient_remaining > 0 {
                state.transient_remaining -= 1;
                state.calls.push(DaqmxCall::WaitTimeout);
                return Err(wait_timeout());
            }
            match sim.next_ready {
                Some(ready) if sim.running => ready.saturating_duration_since(Instant::now()),
                // A stopped task counts as done
                _ => Duration::ZERO,
            }
        };

        if remaining <= timeout {
            std::thread::sleep(remaining);
            self.state.lock().calls.push(DaqmxCall::WaitDone);
            Ok(())
        } else {
            std::thread::sleep(timeout);
            self.state.lock().calls.push(DaqmxCall::WaitTimeout);
            Err(wait_timeout())
        }
    }

    fn read_all_available(&self, task: TaskHandle) -> Result<RawBurst> {
        let (n_channels, rate, samples, burst) = self.with_task(task, |sim, calls| {
            calls.push(DaqmxCall::TransferBegin);
            let (rate, samples) = sim.clock.unwrap_or((1.0, 0));
            Ok((sim.channels.len(), rate, samples, sim.bursts))
        })?;

        std::thread::sleep(self.config.transfer_delay);

        let duration = self.burst_duration(Some((rate, samples)));
        self.with_task(task, |sim, calls| {
            sim.bursts += 1;
            sim.next_ready = sim.running.then(|| Instant::now() + duration);
            calls.push(DaqmxCall::TransferEnd);

            if self.config.fail_transfer_at == Some(burst) {
                return Err(DaqmxError::vendor(
                    -200279,
                    "The application is not able to keep up with the hardware acquisition.",
                ));
            }

            let first = burst * samples as u64;
            let values = (0..n_channels)
                .flat_map(|c| (0..samples as u64).map(move |i| sample_value(c, first + i, rate)))
                .collect();
            Ok(RawBurst {
                n_channels,
                samples: values,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_channel_rejected() {
        let sim = SimulatedDaqmx::default();
        let task = sim.open("Dev1").unwrap();
        let spec = ChannelSpec {
            physical_channel: "Dev1/ai0".into(),
            terminal: TerminalConfig::Rse,
            min_val: -10.0,
            max_val: 10.0,
        };
        assert!(sim.add_channel(task, &spec).is_ok());
        let err = sim.add_channel(task, &spec).unwrap_err();
        assert_eq!(err.code(), Some(-200489));
        assert_eq!(sim.channel_count(), 1);
    }

    #[test]
    fn test_wait_times_out_before_burst_ready() {
        let sim = SimulatedDaqmx::new(SimulatedDaqmxConfig {
            burst_duration: Some(Duration::from_millis(200)),
            ..SimulatedDaqmxConfig::default()
        });
        let task = sim.open("Dev1").unwrap();
        let spec = ChannelSpec {
            physical_channel: "Dev1/ai0".into(),
            terminal: TerminalConfig::Rse,
            min_val: -1.0,
            max_val: 1.0,
        };
        sim.add_channel(task, &spec).unwrap();
        sim.configure_clock(task, 1000.0, 10).unwrap();
        sim.start(task).unwrap();

        let err = sim
            .wait_until_done(task, Duration::from_millis(5))
            .unwrap_err();
        assert!(err.is_wait_timeout());
        assert!(sim
            .wait_until_done(task, Duration::from_millis(500))
            .is_ok());

        let burst = sim.read_all_available(task).unwrap();
        assert_eq!(burst.n_channels, 1);
        assert_eq!(burst.samples.len(), 10);
    }

    #[test]
    fn test_close_unknown_task() {
        let sim = SimulatedDaqmx::default();
        assert_eq!(sim.close(TaskHandle(99)).unwrap_err().code(), Some(-200088));
    }
}
