//! Buffer-ring camera.
//!
//! A recording session cycles a bounded set of SDK buffers against the frame
//! stream:
//!
//! 1. queue a transfer on every slot (up to the requested frame count)
//! 2. poll the oldest queued slot until its completion event is set
//! 3. copy the frame out, re-queue the slot, yield the frame
//!
//! Slots are consumed in the order they were queued, so frame counters follow
//! the camera's own frame order. A slot is never queued twice and never freed
//! while queued; [`BufferRing`] enforces both before any SDK call is made.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use daq_core::capabilities::FrameSource;
use daq_core::config::{CameraSettings, MAX_CAMERA_BUFFERS};
use daq_core::data::{AcquiredFrame, Frame};
use daq_core::error::{DaqError, DaqResult, DriverErrorKind};
use daq_core::flow::run_blocking;
use daq_core::timestamp::Timestamp;

use crate::binding::{
    BitAlignment, CameraHandle, ImageParams, ImageReadMode, PcoBinding, SensorSizes,
};
use crate::error::PcoError;
use crate::ring::{BufferRing, SlotState};
use crate::status::HealthStatus;

/// Result of a non-blocking buffer status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPoll {
    /// Transfer still outstanding.
    Pending,
    /// Transfer finished; the frame can be copied out.
    Ready,
}

fn buffer_number(slot: usize) -> DaqResult<i16> {
    i16::try_from(slot).map_err(|_| DaqError::Resource(format!("Buffer index {} out of range", slot)))
}

/// Camera driven through the SDK buffer API.
pub struct PcoCamera {
    binding: Arc<dyn PcoBinding>,
    /// `None` once closed.
    handle: Mutex<Option<CameraHandle>>,
    name: String,
    bit_depth: u16,
    sizes: Mutex<SensorSizes>,
    ring: Mutex<BufferRing>,
    settings: CameraSettings,
    recording: AtomicBool,
    /// Bumped by every stop request; a session ends once it moves past the
    /// value seen when its stream was created.
    stop_epoch: AtomicU64,
}

impl PcoCamera {
    /// Open the camera on `settings.board` and cache its description.
    pub async fn open(binding: Arc<dyn PcoBinding>, settings: &CameraSettings) -> DaqResult<Self> {
        if settings.buffer_count == 0 || settings.buffer_count > MAX_CAMERA_BUFFERS {
            return Err(DaqError::Configuration(format!(
                "buffer_count must be between 1 and {}, got {}",
                MAX_CAMERA_BUFFERS, settings.buffer_count
            )));
        }
        if settings.poll_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "Camera poll interval must be positive".into(),
            ));
        }

        let board = settings.board;
        let cam = {
            let binding = Arc::clone(&binding);
            run_blocking(move || {
                binding
                    .open(board)
                    .map_err(|e| e.into_daq(DriverErrorKind::Initialization))
            })
            .await?
        };

        let described = binding
            .camera_name(cam)
            .and_then(|name| Ok((name, binding.bit_depth(cam)?, binding.get_sizes(cam)?)));
        let (name, bit_depth, sizes) = match described {
            Ok(d) => d,
            Err(e) => {
                if let Err(close_err) = binding.close(cam) {
                    warn!(board, error = %close_err, "Close after failed open also failed");
                }
                return Err(e.into_daq(DriverErrorKind::Initialization));
            }
        };

        info!(
            board,
            camera = %name,
            width = sizes.x_act,
            height = sizes.y_act,
            bit_depth,
            "Opened camera"
        );

        Ok(Self {
            binding,
            handle: Mutex::new(Some(cam)),
            name,
            bit_depth,
            sizes: Mutex::new(sizes),
            ring: Mutex::new(BufferRing::new()),
            settings: settings.clone(),
            recording: AtomicBool::new(false),
            stop_epoch: AtomicU64::new(0),
        })
    }

    fn handle(&self) -> DaqResult<CameraHandle> {
        (*self.handle.lock())
            .ok_or_else(|| DaqError::Configuration(format!("Camera '{}' is closed", self.name)))
    }

    /// Cached sensor geometry, as of the last arm.
    pub fn sizes(&self) -> SensorSizes {
        *self.sizes.lock()
    }

    /// Transfer parameters for the current geometry.
    pub fn image_params(&self) -> ImageParams {
        let sizes = self.sizes();
        ImageParams::streaming(sizes.x_act, sizes.y_act, self.bit_depth)
    }

    /// Bytes needed for one frame at the current geometry.
    pub fn frame_bytes(&self) -> usize {
        let sizes = self.sizes();
        Frame::expected_len(
            u32::from(sizes.x_act),
            u32::from(sizes.y_act),
            u32::from(self.bit_depth),
        )
    }

    /// Allocate `count` buffers of `size` bytes. Returns their slot indices.
    pub fn allocate_buffers(&self, count: usize, size: u32) -> DaqResult<Vec<usize>> {
        let cam = self.handle()?;
        if count == 0 {
            return Err(DaqError::Resource(
                "At least one buffer must be allocated".into(),
            ));
        }
        if size == 0 {
            return Err(DaqError::Resource("Buffer size must be positive".into()));
        }

        let mut ring = self.ring.lock();
        if count > ring.free_capacity() {
            return Err(DaqError::Resource(format!(
                "Cannot allocate {} buffers: {} of {} already in use",
                count,
                ring.len(),
                MAX_CAMERA_BUFFERS
            )));
        }

        let mut allocated = Vec::with_capacity(count);
        for _ in 0..count {
            match self.allocate_one(cam, &mut ring, size) {
                Ok(index) => allocated.push(index),
                Err(e) => {
                    warn!(
                        camera = %self.name,
                        error = %e,
                        rolled_back = allocated.len(),
                        "Buffer allocation failed, releasing this call's buffers"
                    );
                    for &index in &allocated {
                        self.discard_buffer(cam, &mut ring, index);
                    }
                    return Err(e);
                }
            }
        }

        debug!(camera = %self.name, ?allocated, size, "Allocated buffers");
        Ok(allocated)
    }

    /// Allocate one SDK buffer and register it. A number the ring cannot take
    /// is handed back to the SDK unless it names a buffer the ring already holds.
    fn allocate_one(
        &self,
        cam: CameraHandle,
        ring: &mut BufferRing,
        size: u32,
    ) -> DaqResult<usize> {
        let (number, event) = self
            .binding
            .allocate_buffer(cam, None, size)
            .map_err(|e| DaqError::Resource(format!("Buffer allocation rejected: {}", e)))?;
        let registered = usize::try_from(number)
            .map_err(|_| {
                DaqError::Resource(format!("SDK returned invalid buffer number {}", number))
            })
            .and_then(|index| ring.insert(index, size, event).map(|()| index));

        if registered.is_err() {
            let held = usize::try_from(number).is_ok_and(|index| ring.get(index).is_some());
            if !held {
                if let Err(e) = self.binding.free_buffer(cam, number) {
                    warn!(camera = %self.name, buffer = number, error = %e, "Freeing rejected buffer failed");
                }
            }
        }
        registered
    }

    /// Free an idle slot and drop it from the ring, logging failures.
    fn discard_buffer(&self, cam: CameraHandle, ring: &mut BufferRing, slot: usize) {
        let freed = buffer_number(slot).and_then(|number| {
            self.binding
                .free_buffer(cam, number)
                .map_err(|e| e.into_daq(DriverErrorKind::Shutdown))
        });
        if let Err(e) = freed {
            warn!(camera = %self.name, slot, error = %e, "Freeing buffer failed");
        }
        if let Err(e) = ring.remove(slot) {
            warn!(camera = %self.name, slot, error = %e, "Buffer left in ring");
        }
    }

    /// Queue a transfer of the next image into `slot`.
    pub fn arm_and_acquire(&self, slot: usize, params: &ImageParams) -> DaqResult<()> {
        let cam = self.handle()?;
        let sizes = self.sizes();
        if params.width != sizes.x_act || params.height != sizes.y_act {
            return Err(DaqError::Configuration(format!(
                "Requested {}x{} but camera is armed for {}x{}",
                params.width, params.height, sizes.x_act, sizes.y_act
            )));
        }
        if params.bit_depth != self.bit_depth {
            return Err(DaqError::Configuration(format!(
                "Requested {} bits per pixel but camera delivers {}",
                params.bit_depth, self.bit_depth
            )));
        }
        if params.first_image > params.last_image {
            return Err(DaqError::Configuration(format!(
                "Image range {}..={} is empty",
                params.first_image, params.last_image
            )));
        }

        let number = buffer_number(slot)?;
        let needed = Frame::expected_len(
            u32::from(params.width),
            u32::from(params.height),
            u32::from(params.bit_depth),
        );

        let mut ring = self.ring.lock();
        let buffer = ring.check_queueable(slot)?;
        if (buffer.size as usize) < needed {
            return Err(DaqError::Resource(format!(
                "Buffer {} holds {} bytes, frame needs {}",
                slot, buffer.size, needed
            )));
        }

        self.binding
            .set_image_parameters(
                cam,
                params.width,
                params.height,
                ImageReadMode::ReadWhileRecording,
            )
            .map_err(|e| e.into_daq(DriverErrorKind::Configuration))?;
        self.binding
            .add_buffer(cam, params, number)
            .map_err(|e| e.into_daq(DriverErrorKind::Transfer))?;
        ring.mark_queued(slot)?;

        trace!(camera = %self.name, slot, "Transfer queued");
        Ok(())
    }

    /// Check, without blocking, whether the transfer into `slot` finished.
    pub fn poll_buffer(&self, slot: usize) -> DaqResult<BufferPoll> {
        let cam = self.handle()?;
        let number = buffer_number(slot)?;

        let mut ring = self.ring.lock();
        match ring.state(slot) {
            None => {
                return Err(DaqError::Resource(format!(
                    "Buffer {} is not allocated",
                    slot
                )))
            }
            Some(SlotState::Ready) => return Ok(BufferPoll::Ready),
            Some(SlotState::Allocated) => {
                return Err(DaqError::Resource(format!(
                    "Buffer {} has no transfer queued",
                    slot
                )))
            }
            Some(SlotState::Queued) => {}
        }

        let (dll, driver_status) = self
            .binding
            .buffer_status(cam, number)
            .map_err(|e| e.into_daq(DriverErrorKind::Hardware))?;

        if driver_status != 0 {
            let err = PcoError::new(driver_status, self.binding.error_text(driver_status));
            if !err.is_warning() {
                return Err(err.into_daq(DriverErrorKind::Transfer));
            }
            warn!(camera = %self.name, slot, warning = %err, "Transfer finished with a warning");
        }
        if dll.is_ready() {
            ring.mark_ready(slot)?;
            Ok(BufferPoll::Ready)
        } else {
            Ok(BufferPoll::Pending)
        }
    }

    /// Flush the device transfer queue. Every slot returns to `Allocated`.
    pub fn cancel_all(&self) -> DaqResult<()> {
        let cam = self.handle()?;
        let result = self
            .binding
            .cancel_images(cam)
            .map_err(|e| e.into_daq(DriverErrorKind::Control));
        let flushed = self.ring.lock().flush();
        debug!(camera = %self.name, flushed, "Cancelled outstanding transfers");
        result
    }

    /// Free one buffer.
    pub fn free_buffer(&self, slot: usize) -> DaqResult<()> {
        let cam = self.handle()?;
        let number = buffer_number(slot)?;

        let mut ring = self.ring.lock();
        ring.check_removable(slot)?;
        self.binding
            .free_buffer(cam, number)
            .map_err(|e| e.into_daq(DriverErrorKind::Shutdown))?;
        ring.remove(slot)?;

        debug!(camera = %self.name, slot, "Freed buffer");
        Ok(())
    }

    /// Arm the camera and refresh the cached geometry.
    pub fn arm(&self) -> DaqResult<()> {
        let cam = self.handle()?;
        self.binding
            .arm(cam)
            .map_err(|e| e.into_daq(DriverErrorKind::Control))?;
        let sizes = self
            .binding
            .get_sizes(cam)
            .map_err(|e| e.into_daq(DriverErrorKind::Configuration))?;
        *self.sizes.lock() = sizes;
        debug!(camera = %self.name, width = sizes.x_act, height = sizes.y_act, "Camera armed");
        Ok(())
    }

    /// Switch recording on or off.
    pub fn set_recording(&self, recording: bool) -> DaqResult<()> {
        let cam = self.handle()?;
        self.binding
            .set_recording_state(cam, recording)
            .map_err(|e| e.into_daq(DriverErrorKind::Control))
    }

    /// Read camera health.
    pub fn health(&self) -> DaqResult<HealthStatus> {
        let cam = self.handle()?;
        self.binding
            .health_status(cam)
            .map_err(|e| e.into_daq(DriverErrorKind::Hardware))
    }

    /// True while a recording session is alive.
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Allocated slot indices.
    pub fn slots(&self) -> Vec<usize> {
        self.ring.lock().indices()
    }

    /// State of one slot.
    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.ring.lock().state(slot)
    }

    /// Most slots ever queued at the same time.
    pub fn queued_high_water(&self) -> usize {
        self.ring.lock().high_water()
    }

    /// True once `close()` has released the camera.
    pub fn is_closed(&self) -> bool {
        self.handle.lock().is_none()
    }

    /// Cancel transfers and free every buffer, continuing past failures.
    fn release_buffers(&self, cam: CameraHandle) -> Option<DaqError> {
        let mut first_error = None;
        if let Err(e) = self.binding.cancel_images(cam) {
            warn!(camera = %self.name, error = %e, "Cancel during teardown failed");
            first_error.get_or_insert(e.into_daq(DriverErrorKind::Shutdown));
        }

        // The SDK drops every buffer context on close, so the ring empties
        // even when a free fails
        let slots = self.ring.lock().take_all();
        for slot in slots {
            let freed = buffer_number(slot.index).and_then(|number| {
                self.binding
                    .free_buffer(cam, number)
                    .map_err(|e| e.into_daq(DriverErrorKind::Shutdown))
            });
            if let Err(e) = freed {
                warn!(camera = %self.name, slot = slot.index, error = %e, "Freeing buffer failed");
                first_error.get_or_insert(e);
            }
        }
        first_error
    }

    /// Release all buffers and close the camera. Idempotent.
    pub async fn close(&self) -> DaqResult<()> {
        self.stop_epoch.fetch_add(1, Ordering::SeqCst);
        let Some(cam) = self.handle.lock().take() else {
            return Ok(());
        };

        let mut first_error = None;
        if self.recording.load(Ordering::SeqCst) {
            if let Err(e) = self.binding.set_recording_state(cam, false) {
                warn!(camera = %self.name, error = %e, "Stopping recording during close failed");
                first_error.get_or_insert(e.into_daq(DriverErrorKind::Shutdown));
            }
        }
        if let Some(e) = self.release_buffers(cam) {
            first_error.get_or_insert(e);
        }

        let binding = Arc::clone(&self.binding);
        let closed = run_blocking(move || {
            binding
                .close(cam)
                .map_err(|e| e.into_daq(DriverErrorKind::Shutdown))
        })
        .await;
        match closed {
            Ok(()) => info!(camera = %self.name, "Closed camera"),
            Err(e) => {
                warn!(camera = %self.name, error = %e, "Camera close failed");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Switch the camera to LSB alignment so frames read as plain `u16` values.
    fn align_lsb(&self) -> DaqResult<()> {
        let cam = self.handle()?;
        let current = self
            .binding
            .bit_alignment(cam)
            .map_err(|e| e.into_daq(DriverErrorKind::Configuration))?;
        if current != BitAlignment::Lsb {
            self.binding
                .set_bit_alignment(cam, BitAlignment::Lsb)
                .map_err(|e| e.into_daq(DriverErrorKind::Configuration))?;
            debug!(camera = %self.name, from = ?current, "Bit alignment set to LSB");
        }
        Ok(())
    }

    fn begin_session(&self, limit: Option<u64>, stop_epoch: u64) -> DaqResult<Session<'_>> {
        let mut guard = RecordingGuard::acquire(self)?;
        self.handle()?;

        if self.ring.lock().is_empty() {
            let size = u32::try_from(self.frame_bytes()).map_err(|_| {
                DaqError::Resource("Frame too large for an SDK buffer".into())
            })?;
            self.allocate_buffers(self.settings.buffer_count, size)?;
        }

        let health = self.health()?;
        if !health.is_healthy() {
            return Err(DaqError::device(
                "pco",
                DriverErrorKind::Hardware,
                format!("Camera reports health errors: {:?}", health.errors),
            ));
        }
        if !health.warnings.is_empty() {
            warn!(camera = %self.name, warnings = ?health.warnings, "Camera health warnings");
        }

        self.cancel_all()?;
        self.align_lsb()?;
        self.arm()?;
        self.set_recording(true)?;
        guard.recording_started = true;

        let params = self.image_params();
        let slots = self.slots();
        let prime = match limit {
            Some(n) => slots.len().min(usize::try_from(n).unwrap_or(usize::MAX)),
            None => slots.len(),
        };

        let mut queue = VecDeque::with_capacity(prime);
        for &slot in slots.iter().take(prime) {
            self.arm_and_acquire(slot, &params)?;
            queue.push_back(slot);
        }

        info!(
            camera = %self.name,
            buffers = slots.len(),
            primed = prime,
            limit = ?limit,
            "Recording started"
        );
        Ok(Session {
            _guard: guard,
            params,
            queue,
            limit,
            stop_epoch,
            requested: prime as u64,
            delivered: 0,
        })
    }

    async fn next_frame(&self, session: &mut Session<'_>) -> DaqResult<Option<AcquiredFrame>> {
        if session.limit.is_some_and(|n| session.delivered >= n) {
            return Ok(None);
        }
        let Some(&slot) = session.queue.front() else {
            return Ok(None);
        };

        let deadline = self.settings.frame_timeout().map(|t| Instant::now() + t);
        loop {
            if self.stop_epoch.load(Ordering::SeqCst) != session.stop_epoch {
                info!(camera = %self.name, delivered = session.delivered, "Recording stopped on request");
                return Ok(None);
            }
            if self.poll_buffer(slot)? == BufferPoll::Ready {
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(DaqError::device(
                    "pco",
                    DriverErrorKind::Timeout,
                    format!(
                        "No frame in buffer {} within {:?}",
                        slot,
                        self.settings.frame_timeout()
                    ),
                ));
            }
            tokio::time::sleep(self.settings.poll_interval()).await;
        }
        session.queue.pop_front();

        let cam = self.handle()?;
        let number = buffer_number(slot)?;
        let len = self.frame_bytes();
        let binding = Arc::clone(&self.binding);
        let bytes = run_blocking(move || {
            binding
                .copy_buffer(cam, number, len)
                .map_err(|e| e.into_daq(DriverErrorKind::Transfer))
        })
        .await?;
        let timestamp = Timestamp::now();
        if bytes.len() != len {
            return Err(DaqError::device(
                "pco",
                DriverErrorKind::Transfer,
                format!("Buffer {} returned {} bytes, expected {}", slot, bytes.len(), len),
            ));
        }
        self.ring.lock().mark_consumed(slot)?;
        session.delivered += 1;

        // Re-queue before handing the frame out, unless queued slots already cover the rest
        if session.limit.map_or(true, |n| session.requested < n) {
            self.arm_and_acquire(slot, &session.params)?;
            session.queue.push_back(slot);
            session.requested += 1;
        }

        trace!(camera = %self.name, slot, counter = session.delivered, "Frame delivered");
        Ok(Some(AcquiredFrame {
            frame: Frame::from_bytes(
                u32::from(session.params.width),
                u32::from(session.params.height),
                u32::from(session.params.bit_depth),
                bytes,
            ),
            counter: session.delivered,
            slot,
            timestamp,
        }))
    }

    /// One stream element: start the session on first use, then pull a frame.
    async fn step<'a>(
        &'a self,
        session: Option<Session<'a>>,
        limit: Option<u64>,
        stop_epoch: u64,
    ) -> DaqResult<Option<(AcquiredFrame, Option<Session<'a>>)>> {
        let mut session = match session {
            Some(session) => session,
            None => self.begin_session(limit, stop_epoch)?,
        };
        Ok(self
            .next_frame(&mut session)
            .await?
            .map(|frame| (frame, Some(session))))
    }

    fn end_session(&self, recording_started: bool) {
        if let Ok(cam) = self.handle() {
            if recording_started {
                if let Err(e) = self.binding.set_recording_state(cam, false) {
                    warn!(camera = %self.name, error = %e, "Stopping recording failed");
                }
            }
            if let Err(e) = self.cancel_all() {
                warn!(camera = %self.name, error = %e, "Cancelling transfers failed");
            }
        }
        self.recording.store(false, Ordering::SeqCst);
        debug!(camera = %self.name, "Recording session ended");
    }
}

/// Marks the camera as recording for the lifetime of one session.
struct RecordingGuard<'a> {
    camera: &'a PcoCamera,
    recording_started: bool,
}

impl<'a> RecordingGuard<'a> {
    fn acquire(camera: &'a PcoCamera) -> DaqResult<Self> {
        camera
            .recording
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| {
                DaqError::Configuration(format!(
                    "Camera '{}' already has a recording session",
                    camera.name
                ))
            })?;
        Ok(Self {
            camera,
            recording_started: false,
        })
    }
}

impl Drop for RecordingGuard<'_> {
    fn drop(&mut self) {
        self.camera.end_session(self.recording_started);
    }
}

struct Session<'a> {
    _guard: RecordingGuard<'a>,
    params: ImageParams,
    /// Queued slots, oldest first.
    queue: VecDeque<usize>,
    limit: Option<u64>,
    /// Stop epoch when the stream was created.
    stop_epoch: u64,
    requested: u64,
    delivered: u64,
}

#[async_trait]
impl FrameSource for PcoCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolution(&self) -> (u32, u32) {
        let sizes = self.sizes();
        (u32::from(sizes.x_act), u32::from(sizes.y_act))
    }

    fn bit_depth(&self) -> u32 {
        u32::from(self.bit_depth)
    }

    fn acquisition(&self, count: Option<u64>) -> BoxStream<'_, DaqResult<AcquiredFrame>> {
        if count == Some(0) {
            return futures::stream::empty().boxed();
        }
        // Stops requested before this call do not apply to the new stream
        let stop_epoch = self.stop_epoch.load(Ordering::SeqCst);
        futures::stream::try_unfold(None, move |session| self.step(session, count, stop_epoch))
            .boxed()
    }

    fn request_stop(&self) {
        if self.is_recording() {
            debug!(camera = %self.name, "Stop requested");
        }
        self.stop_epoch.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for PcoCamera {
    fn drop(&mut self) {
        let Some(cam) = self.handle.get_mut().take() else {
            return;
        };
        if *self.recording.get_mut() {
            if let Err(e) = self.binding.set_recording_state(cam, false) {
                warn!(camera = %self.name, error = %e, "Error stopping recording on drop");
            }
        }
        if let Some(e) = self.release_buffers(cam) {
            warn!(camera = %self.name, error = %e, "Error releasing buffers on drop");
        }
        if let Err(e) = self.binding.close(cam) {
            warn!(camera = %self.name, error = %e, "Error closing camera on drop");
        }
    }
}

impl std::fmt::Debug for PcoCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcoCamera")
            .field("name", &self.name)
            .field("bit_depth", &self.bit_depth)
            .field("sizes", &self.sizes())
            .field("slots", &self.slots())
            .field("recording", &self.is_recording())
            .finish()
    }
}
