//! Acquired data payloads.
//!
//! Payloads always travel with their completion [`Timestamp`] and, for frames,
//! the session frame counter. Consumers order output by these fields, never by
//! the arrival order of asynchronous results.

use ndarray::{Array2, ArrayView1, Axis};

use crate::timestamp::Timestamp;

/// One burst of analog samples.
///
/// `data` has shape `(samples_per_channel, n_channels)`: row `i` holds the
/// i-th scan, column `j` the j-th configured channel.
#[derive(Debug, Clone)]
pub struct AcquiredSample {
    /// Voltages, one column per channel.
    pub data: Array2<f64>,
    /// Completion time of the bulk transfer.
    pub timestamp: Timestamp,
    /// Per-card burst sequence number, starting at 0.
    pub sequence: u64,
}

impl AcquiredSample {
    /// Number of scans (rows).
    pub fn n_scans(&self) -> usize {
        self.data.nrows()
    }

    /// Number of channels (columns).
    pub fn n_channels(&self) -> usize {
        self.data.ncols()
    }

    /// All samples of one channel, or `None` if out of range.
    pub fn channel(&self, index: usize) -> Option<ArrayView1<'_, f64>> {
        (index < self.n_channels()).then(|| self.data.index_axis(Axis(1), index))
    }

    /// `(rows, cols)` shape of the payload.
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }
}

/// Represents a single image frame.
///
/// # Storage
/// Data is stored as a raw byte vector (`Vec<u8>`).
/// - 8-bit images: 1 byte per pixel.
/// - 12/14/16-bit images: 2 bytes per pixel, Little Endian.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Bits per pixel (e.g., 8, 12, 14, 16)
    pub bit_depth: u32,

    /// Raw pixel data
    pub data: Vec<u8>,
}

impl Frame {
    /// Create a new frame from 16-bit pixel data.
    pub fn from_u16(width: u32, height: u32, pixels: &[u16]) -> Self {
        let mut data = Vec::with_capacity(pixels.len() * 2);
        for pixel in pixels {
            data.extend_from_slice(&pixel.to_le_bytes());
        }

        Self {
            width,
            height,
            bit_depth: 16,
            data,
        }
    }

    /// Create a frame from raw byte data with explicit bit depth.
    ///
    /// The caller must ensure the buffer length matches the expected size for the bit depth.
    pub fn from_bytes(width: u32, height: u32, bit_depth: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            bit_depth,
            data,
        }
    }

    /// Bytes used to store one pixel at this bit depth.
    pub fn bytes_per_pixel(bit_depth: u32) -> usize {
        if bit_depth <= 8 {
            1
        } else {
            2
        }
    }

    /// Expected payload size in bytes for the given geometry.
    pub fn expected_len(width: u32, height: u32, bit_depth: u32) -> usize {
        width as usize * height as usize * Self::bytes_per_pixel(bit_depth)
    }

    /// Get pixel value at (x, y) as u32 (handling bit depth conversion).
    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }

        let idx = (y * self.width + x) as usize;

        if self.bit_depth <= 8 {
            self.data.get(idx).map(|&v| v as u32)
        } else {
            let start = idx * 2;
            match (self.data.get(start), self.data.get(start + 1)) {
                (Some(&lo), Some(&hi)) => Some(u16::from_le_bytes([lo, hi]) as u32),
                _ => None,
            }
        }
    }

    /// Decode the payload as 16-bit pixels.
    ///
    /// Returns None for 8-bit frames or an odd-length payload.
    pub fn to_u16(&self) -> Option<Vec<u16>> {
        if self.bit_depth <= 8 || self.data.len() % 2 != 0 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect(),
        )
    }

    /// Calculate mean pixel value.
    pub fn mean(&self) -> f64 {
        if self.bit_depth <= 8 {
            if self.data.is_empty() {
                return 0.0;
            }
            let sum: u64 = self.data.iter().map(|&v| v as u64).sum();
            return sum as f64 / self.data.len() as f64;
        }

        match self.to_u16() {
            Some(pixels) if !pixels.is_empty() => {
                let sum: u64 = pixels.iter().map(|&v| v as u64).sum();
                sum as f64 / pixels.len() as f64
            }
            _ => 0.0,
        }
    }
}

/// A frame delivered by a recording session.
#[derive(Debug, Clone)]
pub struct AcquiredFrame {
    /// Pixel payload.
    pub frame: Frame,
    /// Session frame counter, strictly increasing by 1 from 1.
    pub counter: u64,
    /// Ring slot the frame was transferred into.
    pub slot: usize,
    /// Completion time of the transfer.
    pub timestamp: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_sample_shape_and_channel_view() {
        let sample = AcquiredSample {
            data: array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0]],
            timestamp: Timestamp::now(),
            sequence: 0,
        };

        assert_eq!(sample.shape(), (3, 2));
        assert_eq!(sample.n_scans(), 3);
        assert_eq!(sample.n_channels(), 2);
        let ch1: Vec<f64> = sample.channel(1).map(|c| c.to_vec()).unwrap_or_default();
        assert_eq!(ch1, vec![10.0, 20.0, 30.0]);
        assert!(sample.channel(2).is_none());
    }

    #[test]
    fn test_frame_u16_roundtrip_access() {
        let frame = Frame::from_u16(2, 2, &[1, 2, 3, 4000]);
        assert_eq!(frame.data.len(), Frame::expected_len(2, 2, 16));
        assert_eq!(frame.get(1, 1), Some(4000));
        assert_eq!(frame.get(2, 0), None);
        assert_eq!(frame.to_u16(), Some(vec![1, 2, 3, 4000]));
    }

    #[test]
    fn test_frame_mean() {
        let frame = Frame::from_u16(2, 1, &[10, 30]);
        assert_eq!(frame.mean(), 20.0);

        let frame8 = Frame::from_bytes(2, 1, 8, vec![4, 8]);
        assert_eq!(frame8.mean(), 6.0);
        assert!(frame8.to_u16().is_none());
    }
}
