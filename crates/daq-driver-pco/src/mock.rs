//! Simulated camera SDK.
//!
//! Models one camera with a FIFO transfer queue: while recording, the buffer at
//! the head of the queue completes `frame_period` after it became the head.
//! Completed buffers carry a test pattern `(x + y + frame) % 4096`, so each
//! frame's content identifies its position in the camera's frame sequence.
//! With the power-on MSB alignment the pattern is shifted into the upper bits
//! of each word; LSB alignment delivers the plain values.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::binding::{
    BitAlignment, CameraHandle, EventHandle, ImageParams, ImageReadMode, PcoBinding, SensorSizes,
};
use crate::error::{PcoError, Result};
use crate::ring::MAX_BUFFERS;
use crate::status::{DllStatus, HealthStatus};

/// Camera is already open.
pub const ERR_CAMERA_BUSY: u32 = 0x8000_2003;
/// Handle does not refer to the open camera.
pub const ERR_INVALID_HANDLE: u32 = 0x8000_3004;
/// Buffer number is unknown or out of range.
pub const ERR_INVALID_BUFFER: u32 = 0x8000_3010;
/// No buffer slot left.
pub const ERR_NO_BUFFER: u32 = 0x8000_3011;
/// Buffer already has a transfer queued.
pub const ERR_BUFFER_QUEUED: u32 = 0x8000_3012;
/// Transfer geometry does not match the camera.
pub const ERR_IMAGE_SIZE: u32 = 0x8000_3013;
/// Operation not allowed while recording.
pub const ERR_RECORDING: u32 = 0x8000_4001;
/// Image transfer failed in the driver.
pub const ERR_TRANSFER_FAILED: u32 = 0x8000_2001;
/// Driver still holds the buffer.
pub const ERR_BUFFER_BUSY: u32 = 0x8000_3014;
/// Camera did not acknowledge the close request.
pub const ERR_CLOSE_TIMEOUT: u32 = 0x8000_2005;
/// Transfer finished late; the image is intact.
pub const WARN_TRANSFER_LATE: u32 = 0x4000_2002;

fn text_for(code: u32) -> &'static str {
    match code {
        ERR_CAMERA_BUSY => "Driver: camera is already opened by another process",
        ERR_INVALID_HANDLE => "SDK DLL: invalid camera handle",
        ERR_INVALID_BUFFER => "SDK DLL: buffer number is invalid",
        ERR_NO_BUFFER => "SDK DLL: no free buffer context available",
        ERR_BUFFER_QUEUED => "SDK DLL: buffer is already in the transfer queue",
        ERR_IMAGE_SIZE => "SDK DLL: image size does not match the armed camera",
        ERR_RECORDING => "Application: not allowed while recording is on",
        ERR_TRANSFER_FAILED => "Driver: image transfer failed, DMA timeout",
        ERR_BUFFER_BUSY => "SDK DLL: buffer is still in use by the driver",
        ERR_CLOSE_TIMEOUT => "Driver: timeout while closing the camera",
        WARN_TRANSFER_LATE => "Driver: image transfer finished late",
        _ => "Unknown error",
    }
}

fn sdk_error(code: u32) -> PcoError {
    PcoError::new(code, text_for(code))
}

/// Behaviour of a [`SimulatedPco`].
#[derive(Debug, Clone)]
pub struct SimulatedPcoConfig {
    /// Model name.
    pub name: String,
    /// Active width after open.
    pub width: u16,
    /// Active height after open.
    pub height: u16,
    /// Sensor dynamic range in bits.
    pub bit_depth: u16,
    /// Time between frame completions.
    pub frame_period: Duration,
    /// Extra time spent in every buffer copy.
    pub transfer_delay: Duration,
    /// Report a driver failure on this zero-based completed frame.
    pub fail_transfer_at: Option<u64>,
    /// Report a driver warning on this zero-based completed frame.
    pub warn_transfer_at: Option<u64>,
    /// Reject this zero-based allocation with [`ERR_NO_BUFFER`].
    pub fail_allocation_at: Option<u64>,
    /// `(k, number)`: report `number` for the k-th allocation, even when it
    /// is out of range or already taken.
    pub misnumber_allocation: Option<(u64, i16)>,
    /// Every free call fails and keeps the buffer context.
    pub fail_free: bool,
    /// Every close call fails and leaves the camera open.
    pub fail_close: bool,
}

impl Default for SimulatedPcoConfig {
    fn default() -> Self {
        Self {
            name: "pco.pixelfly usb".to_string(),
            width: 64,
            height: 48,
            bit_depth: 14,
            frame_period: Duration::from_millis(5),
            transfer_delay: Duration::ZERO,
            fail_transfer_at: None,
            warn_transfer_at: None,
            fail_allocation_at: None,
            misnumber_allocation: None,
            fail_free: false,
            fail_close: false,
        }
    }
}

#[derive(Debug)]
struct SimBuffer {
    size: u32,
    event: EventHandle,
    status: DllStatus,
    driver_status: u32,
    frame: u64,
}

#[derive(Debug, Default)]
struct SimState {
    next_handle: u64,
    open: Option<CameraHandle>,
    sizes: Option<SensorSizes>,
    pending_roi: Option<(u16, u16)>,
    recording: bool,
    buffers: BTreeMap<i16, SimBuffer>,
    queue: VecDeque<i16>,
    head_since: Option<Instant>,
    frames_completed: u64,
    max_queue_depth: usize,
    health: HealthStatus,
    next_event: u64,
    events_closed: usize,
    cancel_count: usize,
    arm_count: usize,
    read_mode: Option<ImageReadMode>,
    alignment: BitAlignment,
    armed_alignment: BitAlignment,
    allocations: u64,
    close_calls: usize,
}

/// In-process stand-in for the camera SDK.
#[derive(Debug)]
pub struct SimulatedPco {
    config: SimulatedPcoConfig,
    state: Mutex<SimState>,
}

impl Default for SimulatedPco {
    fn default() -> Self {
        Self::new(SimulatedPcoConfig::default())
    }
}

impl SimulatedPco {
    /// Create a simulated camera.
    pub fn new(config: SimulatedPcoConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Change the active region; takes effect at the next arm.
    pub fn set_roi(&self, width: u16, height: u16) {
        self.state.lock().pending_roi = Some((width, height));
    }

    /// Replace the reported health words.
    pub fn inject_health(&self, health: HealthStatus) {
        self.state.lock().health = health;
    }

    /// Deepest the transfer queue has been.
    pub fn max_queue_depth(&self) -> usize {
        self.state.lock().max_queue_depth
    }

    /// Transfers currently queued.
    pub fn queue_depth(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Calls to `cancel_images`.
    pub fn cancel_count(&self) -> usize {
        self.state.lock().cancel_count
    }

    /// Calls to `arm`.
    pub fn arm_count(&self) -> usize {
        self.state.lock().arm_count
    }

    /// Completion events created so far.
    pub fn events_created(&self) -> u64 {
        self.state.lock().next_event
    }

    /// Completion events closed by freeing buffers.
    pub fn events_closed(&self) -> usize {
        self.state.lock().events_closed
    }

    /// Buffer contexts currently allocated.
    pub fn allocated_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Frames completed since open.
    pub fn frames_completed(&self) -> u64 {
        self.state.lock().frames_completed
    }

    /// True while recording is on.
    pub fn is_recording(&self) -> bool {
        self.state.lock().recording
    }

    /// True while the camera is open.
    pub fn is_open(&self) -> bool {
        self.state.lock().open.is_some()
    }

    /// Bit alignment in effect since the last arm.
    pub fn armed_alignment(&self) -> BitAlignment {
        self.state.lock().armed_alignment
    }

    /// Calls to `close`, failed ones included.
    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    /// Read mode declared by the last `set_image_parameters`.
    pub fn read_mode(&self) -> Option<ImageReadMode> {
        self.state.lock().read_mode
    }

    fn initial_sizes(&self) -> SensorSizes {
        SensorSizes {
            x_act: self.config.width,
            y_act: self.config.height,
            x_max: self.config.width,
            y_max: self.config.height,
        }
    }
}

impl SimState {
    fn check(&self, cam: CameraHandle) -> Result<()> {
        if self.open == Some(cam) {
            Ok(())
        } else {
            Err(sdk_error(ERR_INVALID_HANDLE))
        }
    }

    /// Complete every queued transfer whose time has come.
    fn advance(&mut self, config: &SimulatedPcoConfig) {
        if !self.recording {
            return;
        }
        let now = Instant::now();
        while let Some(since) = self.head_since {
            let due = since + config.frame_period;
            if due > now {
                break;
            }
            let Some(number) = self.queue.pop_front() else {
                self.head_since = None;
                break;
            };
            let frame = self.frames_completed;
            self.frames_completed += 1;
            if let Some(buffer) = self.buffers.get_mut(&number) {
                buffer.status |= DllStatus::EVENT_SET;
                buffer.frame = frame;
                if config.fail_transfer_at == Some(frame) {
                    buffer.driver_status = ERR_TRANSFER_FAILED;
                } else if config.warn_transfer_at == Some(frame) {
                    buffer.driver_status = WARN_TRANSFER_LATE;
                }
            }
            self.head_since = if self.queue.is_empty() { None } else { Some(due) };
        }
    }

    fn release_event(&mut self, buffer: &SimBuffer) {
        if buffer.status.contains(DllStatus::EVENT_CREATED) {
            self.events_closed += 1;
        }
    }
}

impl PcoBinding for SimulatedPco {
    fn open(&self, _board: u16) -> Result<CameraHandle> {
        let mut state = self.state.lock();
        if state.open.is_some() {
            return Err(sdk_error(ERR_CAMERA_BUSY));
        }
        state.next_handle += 1;
        let cam = CameraHandle(state.next_handle);
        state.open = Some(cam);
        if state.sizes.is_none() {
            state.sizes = Some(self.initial_sizes());
        }
        Ok(cam)
    }

    fn close(&self, cam: CameraHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.check(cam)?;
        state.close_calls += 1;
        if self.config.fail_close {
            return Err(sdk_error(ERR_CLOSE_TIMEOUT));
        }
        state.recording = false;
        state.queue.clear();
        state.head_since = None;
        let buffers = std::mem::take(&mut state.buffers);
        for buffer in buffers.values() {
            state.release_event(buffer);
        }
        state.open = None;
        state.alignment = BitAlignment::default();
        state.armed_alignment = BitAlignment::default();
        Ok(())
    }

    fn camera_name(&self, cam: CameraHandle) -> Result<String> {
        self.state.lock().check(cam)?;
        Ok(self.config.name.clone())
    }

    fn bit_depth(&self, cam: CameraHandle) -> Result<u16> {
        self.state.lock().check(cam)?;
        Ok(self.config.bit_depth)
    }

    fn get_sizes(&self, cam: CameraHandle) -> Result<SensorSizes> {
        let state = self.state.lock();
        state.check(cam)?;
        Ok(state.sizes.unwrap_or_else(|| self.initial_sizes()))
    }

    fn health_status(&self, cam: CameraHandle) -> Result<HealthStatus> {
        let state = self.state.lock();
        state.check(cam)?;
        Ok(state.health)
    }

    fn bit_alignment(&self, cam: CameraHandle) -> Result<BitAlignment> {
        let state = self.state.lock();
        state.check(cam)?;
        Ok(state.alignment)
    }

    fn set_bit_alignment(&self, cam: CameraHandle, alignment: BitAlignment) -> Result<()> {
        let mut state = self.state.lock();
        state.check(cam)?;
        if state.recording {
            return Err(sdk_error(ERR_RECORDING));
        }
        state.alignment = alignment;
        Ok(())
    }

    fn arm(&self, cam: CameraHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.check(cam)?;
        if state.recording {
            return Err(sdk_error(ERR_RECORDING));
        }
        if let Some((width, height)) = state.pending_roi.take() {
            let mut sizes = state.sizes.unwrap_or_else(|| self.initial_sizes());
            sizes.x_act = width;
            sizes.y_act = height;
            state.sizes = Some(sizes);
        }
        state.armed_alignment = state.alignment;
        state.arm_count += 1;
        Ok(())
    }

    fn set_recording_state(&self, cam: CameraHandle, recording: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.check(cam)?;
        if recording && !state.recording {
            let has_queued = !state.queue.is_empty();
            state.head_since = has_queued.then(Instant::now);
        }
        if !recording {
            state.head_since = None;
        }
        state.recording = recording;
        Ok(())
    }

    fn set_image_parameters(
        &self,
        cam: CameraHandle,
        width: u16,
        height: u16,
        mode: ImageReadMode,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.check(cam)?;
        let sizes = state.sizes.unwrap_or_else(|| self.initial_sizes());
        if width != sizes.x_act || height != sizes.y_act {
            return Err(sdk_error(ERR_IMAGE_SIZE));
        }
        state.read_mode = Some(mode);
        Ok(())
    }

    fn allocate_buffer(
        &self,
        cam: CameraHandle,
        requested: Option<i16>,
        size: u32,
    ) -> Result<(i16, Option<EventHandle>)> {
        let mut state = self.state.lock();
        state.check(cam)?;
        let k = state.allocations;
        state.allocations += 1;
        if self.config.fail_allocation_at == Some(k) {
            return Err(sdk_error(ERR_NO_BUFFER));
        }
        if let Some((at, number)) = self.config.misnumber_allocation {
            if at == k {
                let event = EventHandle(state.next_event);
                state.next_event += 1;
                // A number that is already taken keeps its original context
                state.buffers.entry(number).or_insert(SimBuffer {
                    size,
                    event,
                    status: DllStatus::ALLOCATED | DllStatus::EVENT_CREATED,
                    driver_status: 0,
                    frame: 0,
                });
                return Ok((number, Some(event)));
            }
        }
        let number = match requested {
            Some(n) if n < 0 || n as usize >= MAX_BUFFERS => {
                return Err(sdk_error(ERR_INVALID_BUFFER))
            }
            Some(n) if state.buffers.contains_key(&n) => return Err(sdk_error(ERR_INVALID_BUFFER)),
            Some(n) => n,
            None => (0..MAX_BUFFERS as i16)
                .find(|n| !state.buffers.contains_key(n))
                .ok_or_else(|| sdk_error(ERR_NO_BUFFER))?,
        };

        let event = EventHandle(state.next_event);
        state.next_event += 1;
        state.buffers.insert(
            number,
            SimBuffer {
                size,
                event,
                status: DllStatus::ALLOCATED | DllStatus::EVENT_CREATED,
                driver_status: 0,
                frame: 0,
            },
        );
        Ok((number, Some(event)))
    }

    fn free_buffer(&self, cam: CameraHandle, buffer: i16) -> Result<()> {
        let mut state = self.state.lock();
        state.check(cam)?;
        if self.config.fail_free {
            return Err(sdk_error(ERR_BUFFER_BUSY));
        }
        let freed = state
            .buffers
            .remove(&buffer)
            .ok_or_else(|| sdk_error(ERR_INVALID_BUFFER))?;
        state.queue.retain(|n| *n != buffer);
        state.release_event(&freed);
        Ok(())
    }

    fn buffer_status(&self, cam: CameraHandle, buffer: i16) -> Result<(DllStatus, u32)> {
        let mut state = self.state.lock();
        state.check(cam)?;
        state.advance(&self.config);
        let buf = state
            .buffers
            .get(&buffer)
            .ok_or_else(|| sdk_error(ERR_INVALID_BUFFER))?;
        Ok((buf.status, buf.driver_status))
    }

    fn add_buffer(&self, cam: CameraHandle, params: &ImageParams, buffer: i16) -> Result<()> {
        let mut state = self.state.lock();
        state.check(cam)?;
        state.advance(&self.config);

        let sizes = state.sizes.unwrap_or_else(|| self.initial_sizes());
        if params.width != sizes.x_act || params.height != sizes.y_act {
            return Err(sdk_error(ERR_IMAGE_SIZE));
        }
        if state.queue.contains(&buffer) {
            return Err(sdk_error(ERR_BUFFER_QUEUED));
        }
        let needed = params.width as usize * params.height as usize * 2;
        let buf = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| sdk_error(ERR_INVALID_BUFFER))?;
        if (buf.size as usize) < needed {
            return Err(sdk_error(ERR_IMAGE_SIZE));
        }
        buf.status.remove(DllStatus::EVENT_SET);
        buf.driver_status = 0;

        state.queue.push_back(buffer);
        let depth = state.queue.len();
        state.max_queue_depth = state.max_queue_depth.max(depth);
        if state.recording && state.head_since.is_none() {
            state.head_since = Some(Instant::now());
        }
        Ok(())
    }

    fn copy_buffer(&self, cam: CameraHandle, buffer: i16, len: usize) -> Result<Vec<u8>> {
        std::thread::sleep(self.config.transfer_delay);

        let state = self.state.lock();
        state.check(cam)?;
        let buf = state
            .buffers
            .get(&buffer)
            .ok_or_else(|| sdk_error(ERR_INVALID_BUFFER))?;
        let failed = buf.driver_status != 0 && !sdk_error(buf.driver_status).is_warning();
        if !buf.status.contains(DllStatus::EVENT_SET) || failed {
            return Err(sdk_error(ERR_TRANSFER_FAILED));
        }
        let shift = match state.armed_alignment {
            BitAlignment::Msb => 16u32.saturating_sub(u32::from(self.config.bit_depth)),
            BitAlignment::Lsb => 0,
        };

        let sizes = state.sizes.unwrap_or_else(|| self.initial_sizes());
        let (width, height) = (u64::from(sizes.x_act), u64::from(sizes.y_act));
        let mut bytes = Vec::with_capacity(len);
        for y in 0..height {
            for x in 0..width {
                let value = (((x + y + buf.frame) % 4096) as u16) << shift;
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        bytes.truncate(len);
        Ok(bytes)
    }

    fn cancel_images(&self, cam: CameraHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.check(cam)?;
        state.queue.clear();
        state.head_since = None;
        for buffer in state.buffers.values_mut() {
            buffer.status.remove(DllStatus::EVENT_SET);
        }
        state.cancel_count += 1;
        Ok(())
    }

    fn error_text(&self, code: u32) -> String {
        match text_for(code) {
            "Unknown error" => format!("Unknown PCO error 0x{:08X}", code),
            text => text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_completes_in_order() {
        let sim = SimulatedPco::new(SimulatedPcoConfig {
            width: 4,
            height: 2,
            frame_period: Duration::from_millis(1),
            ..SimulatedPcoConfig::default()
        });
        let cam = sim.open(0).unwrap();
        let (a, _) = sim.allocate_buffer(cam, None, 16).unwrap();
        let (b, _) = sim.allocate_buffer(cam, None, 16).unwrap();
        let params = ImageParams::streaming(4, 2, 14);
        sim.set_bit_alignment(cam, BitAlignment::Lsb).unwrap();
        sim.arm(cam).unwrap();
        sim.add_buffer(cam, &params, a).unwrap();
        sim.add_buffer(cam, &params, b).unwrap();
        assert_eq!(sim.add_buffer(cam, &params, a).unwrap_err().code, ERR_BUFFER_QUEUED);

        sim.set_recording_state(cam, true).unwrap();
        std::thread::sleep(Duration::from_millis(10));

        let (status_a, drv_a) = sim.buffer_status(cam, a).unwrap();
        let (status_b, _) = sim.buffer_status(cam, b).unwrap();
        assert!(status_a.is_ready() && status_b.is_ready());
        assert_eq!(drv_a, 0);

        let first = sim.copy_buffer(cam, a, 16).unwrap();
        let second = sim.copy_buffer(cam, b, 16).unwrap();
        assert_eq!(u16::from_le_bytes([first[0], first[1]]), 0);
        assert_eq!(u16::from_le_bytes([second[0], second[1]]), 1);
        assert_eq!(sim.max_queue_depth(), 2);
    }

    #[test]
    fn test_second_open_is_busy() {
        let sim = SimulatedPco::default();
        let cam = sim.open(0).unwrap();
        assert_eq!(sim.open(0).unwrap_err().code, ERR_CAMERA_BUSY);
        sim.close(cam).unwrap();
        assert!(sim.open(0).is_ok());
    }

    #[test]
    fn test_free_closes_event() {
        let sim = SimulatedPco::default();
        let cam = sim.open(0).unwrap();
        let (n, event) = sim.allocate_buffer(cam, None, 64).unwrap();
        assert!(event.is_some());
        sim.free_buffer(cam, n).unwrap();
        assert_eq!(sim.events_closed(), 1);
        assert_eq!(sim.free_buffer(cam, n).unwrap_err().code, ERR_INVALID_BUFFER);
    }

    #[test]
    fn test_msb_alignment_shifts_pattern() {
        let sim = SimulatedPco::new(SimulatedPcoConfig {
            width: 4,
            height: 1,
            frame_period: Duration::from_millis(1),
            ..SimulatedPcoConfig::default()
        });
        let cam = sim.open(0).unwrap();
        assert_eq!(sim.bit_alignment(cam).unwrap(), BitAlignment::Msb);
        sim.arm(cam).unwrap();
        let (n, _) = sim.allocate_buffer(cam, None, 8).unwrap();
        sim.add_buffer(cam, &ImageParams::streaming(4, 1, 14), n).unwrap();
        sim.set_recording_state(cam, true).unwrap();
        assert_eq!(
            sim.set_bit_alignment(cam, BitAlignment::Lsb).unwrap_err().code,
            ERR_RECORDING
        );
        std::thread::sleep(Duration::from_millis(5));

        assert!(sim.buffer_status(cam, n).unwrap().0.is_ready());
        let bytes = sim.copy_buffer(cam, n, 8).unwrap();
        // 14-bit value 1 at x = 1, shifted up by two bits
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 4);
    }

    #[test]
    fn test_failed_close_keeps_camera_open() {
        let sim = SimulatedPco::new(SimulatedPcoConfig {
            fail_close: true,
            ..SimulatedPcoConfig::default()
        });
        let cam = sim.open(0).unwrap();
        assert_eq!(sim.close(cam).unwrap_err().code, ERR_CLOSE_TIMEOUT);
        assert!(sim.is_open());
        assert_eq!(sim.close_calls(), 1);
    }
}
