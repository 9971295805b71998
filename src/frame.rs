//! Decoded video frames
//!
//! A [`Frame`] is created once by the stream decode loop and shared as
//! `Arc<Frame>` between the display and the recorder. It is never mutated
//! after construction.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pixel layout of frame data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed 8-bit R, G, B
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
        }
    }

    /// Name FFmpeg uses for this layout
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "rgb24",
        }
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Truncate both dimensions to even values.
    ///
    /// Most encoders reject odd sizes with 4:2:0 chroma subsampling.
    pub fn to_even(self) -> Self {
        Self {
            width: self.width - (self.width % 2),
            height: self.height - (self.height % 2),
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A decoded image from the stream
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Bytes,
    captured_at: DateTime<Utc>,
    sequence: u64,
}

/// Error returned when pixel data does not match the declared size
#[derive(Debug, thiserror::Error)]
#[error("frame data is {actual} bytes, expected {expected} for {width}x{height}")]
pub struct FrameSizeMismatch {
    pub width: u32,
    pub height: u32,
    pub expected: usize,
    pub actual: usize,
}

impl Frame {
    /// Build a frame from packed pixel data
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: impl Into<Bytes>,
        sequence: u64,
    ) -> Result<Self, FrameSizeMismatch> {
        let data = data.into();
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(FrameSizeMismatch {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            format,
            data,
            captured_at: Utc::now(),
            sequence,
        })
    }

    /// Same capture time and sequence, different pixels
    pub(crate) fn with_pixels(
        &self,
        width: u32,
        height: u32,
        data: impl Into<Bytes>,
    ) -> Result<Self, FrameSizeMismatch> {
        let mut frame = Self::new(width, height, self.format, data, self.sequence)?;
        frame.captured_at = self.captured_at;
        Ok(frame)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Raw pixel bytes, row-major, no padding
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Wall-clock time the frame was decoded
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Position of this frame in its stream, starting at 0
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_to_even() {
        assert_eq!(Resolution::new(931, 445).to_even(), Resolution::new(930, 444));
        assert_eq!(Resolution::new(1280, 720).to_even(), Resolution::new(1280, 720));
        assert_eq!(Resolution::new(1, 1).to_even(), Resolution::new(0, 0));
    }

    #[test]
    fn test_frame_rejects_wrong_size() {
        let err = Frame::new(4, 2, PixelFormat::Rgb24, vec![0u8; 10], 0).unwrap_err();
        assert_eq!(err.expected, 24);
        assert_eq!(err.actual, 10);

        let frame = Frame::new(4, 2, PixelFormat::Rgb24, vec![0u8; 24], 7).unwrap();
        assert_eq!(frame.resolution(), Resolution::new(4, 2));
        assert_eq!(frame.sequence(), 7);
    }
}
