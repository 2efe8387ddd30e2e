//! Camera SDK binding boundary.
//!
//! [`PcoBinding`] lists the SDK calls the buffer ring needs: camera lifecycle,
//! geometry, health, bit alignment, arm/record, and the buffer API (allocate, add, status,
//! copy, cancel, free). Buffers are addressed by the SDK's signed 16-bit buffer
//! number; the ring converts to and from `usize` slot indices.

use crate::error::Result;
use crate::status::{DllStatus, HealthStatus};

/// Opaque camera handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CameraHandle(pub u64);

/// Completion event created by the SDK for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(pub u64);

/// Active and maximum sensor geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSizes {
    /// Active width.
    pub x_act: u16,
    /// Active height.
    pub y_act: u16,
    /// Maximum width.
    pub x_max: u16,
    /// Maximum height.
    pub y_max: u16,
}

/// How the SDK reads images into buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageReadMode {
    /// Stream images while the camera records.
    ReadWhileRecording,
    /// Read back images stored in camera RAM segments.
    ReadFromSegments,
}

/// Placement of the pixel bits inside each 16-bit word of a transferred image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitAlignment {
    /// Pixel value in the upper bits. Power-on default of the camera.
    #[default]
    Msb,
    /// Pixel value in the lower bits, readable as a plain little-endian `u16`.
    Lsb,
}

/// Image range and geometry for one transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageParams {
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Bits per pixel.
    pub bit_depth: u16,
    /// First image number; 0 with read-while-recording.
    pub first_image: u32,
    /// Last image number; 0 with read-while-recording.
    pub last_image: u32,
}

impl ImageParams {
    /// Parameters for streaming the next recorded image.
    pub fn streaming(width: u16, height: u16, bit_depth: u16) -> Self {
        Self {
            width,
            height,
            bit_depth,
            first_image: 0,
            last_image: 0,
        }
    }
}

/// Calls into the camera SDK.
pub trait PcoBinding: Send + Sync + 'static {
    /// Open the camera on `board`.
    fn open(&self, board: u16) -> Result<CameraHandle>;

    /// Close the camera.
    fn close(&self, cam: CameraHandle) -> Result<()>;

    /// Camera model name.
    fn camera_name(&self, cam: CameraHandle) -> Result<String>;

    /// Dynamic resolution of the sensor in bits.
    fn bit_depth(&self, cam: CameraHandle) -> Result<u16>;

    /// Active and maximum sensor sizes. Reflects the last arm.
    fn get_sizes(&self, cam: CameraHandle) -> Result<SensorSizes>;

    /// Warning, error and status words.
    fn health_status(&self, cam: CameraHandle) -> Result<HealthStatus>;

    /// Current bit alignment of transferred images.
    fn bit_alignment(&self, cam: CameraHandle) -> Result<BitAlignment>;

    /// Change the bit alignment; takes effect at the next arm.
    fn set_bit_alignment(&self, cam: CameraHandle, alignment: BitAlignment) -> Result<()>;

    /// Validate settings and prepare the camera to record.
    fn arm(&self, cam: CameraHandle) -> Result<()>;

    /// Start or stop recording.
    fn set_recording_state(&self, cam: CameraHandle, recording: bool) -> Result<()>;

    /// Declare the geometry of following transfers.
    fn set_image_parameters(
        &self,
        cam: CameraHandle,
        width: u16,
        height: u16,
        mode: ImageReadMode,
    ) -> Result<()>;

    /// Allocate a buffer context of `size` bytes.
    ///
    /// `None` lets the SDK choose the buffer number.
    fn allocate_buffer(
        &self,
        cam: CameraHandle,
        requested: Option<i16>,
        size: u32,
    ) -> Result<(i16, Option<EventHandle>)>;

    /// Free a buffer context; the SDK closes its event.
    fn free_buffer(&self, cam: CameraHandle, buffer: i16) -> Result<()>;

    /// DLL status word and the driver status of the last transfer.
    fn buffer_status(&self, cam: CameraHandle, buffer: i16) -> Result<(DllStatus, u32)>;

    /// Queue a transfer of the images in `params` into `buffer`.
    fn add_buffer(&self, cam: CameraHandle, params: &ImageParams, buffer: i16) -> Result<()>;

    /// Copy `len` bytes out of a finished buffer.
    fn copy_buffer(&self, cam: CameraHandle, buffer: i16, len: usize) -> Result<Vec<u8>>;

    /// Remove every queued transfer.
    fn cancel_images(&self, cam: CameraHandle) -> Result<()>;

    /// Decode an SDK or driver status code.
    fn error_text(&self, code: u32) -> String;
}
