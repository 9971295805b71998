//! MJPEG over HTTP
//!
//! Cameras answer a GET with a `multipart/x-mixed-replace` body where every
//! part is one JPEG image. Parts are cut at the JPEG start/end markers rather
//! than at the boundary string, which many cameras get wrong.

use crate::frame::{Frame, FrameSizeMismatch, PixelFormat};
use crate::stream::traits::{Connector, FrameReader};
use crate::stream::url::StreamUrl;
use crate::utils::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;

/// Largest image accepted before the buffer is considered garbage
const MAX_IMAGE_BYTES: usize = 16 * 1024 * 1024;

/// Outcome of walking the buffered image
enum Walk {
    /// The image ends at this offset
    Complete(usize),
    NeedMore,
    Corrupt,
}

/// Splits a byte stream into complete JPEG images.
///
/// After SOI the marker segments are skipped by their length field, so an
/// EXIF thumbnail embedded in APP1 does not end the image. EOI is only
/// looked for between segments and inside entropy-coded scan data.
#[derive(Debug, Default)]
pub struct MjpegParser {
    buffer: BytesMut,
    /// Walk position inside the current image
    cursor: usize,
    in_image: bool,
    /// Cursor is inside entropy-coded data following SOS
    in_scan: bool,
}

impl MjpegParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes received from the network
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Take the next complete JPEG image, if one is buffered
    pub fn next_image(&mut self) -> Option<Bytes> {
        loop {
            if !self.in_image {
                match find_soi(&self.buffer) {
                    Some(start) => {
                        self.buffer.advance(start);
                        self.in_image = true;
                        self.in_scan = false;
                        self.cursor = SOI.len();
                    }
                    None => {
                        // Keep a trailing 0xFF, it may be the first half of SOI
                        let keep = usize::from(self.buffer.last() == Some(&0xFF));
                        let drop = self.buffer.len() - keep;
                        self.buffer.advance(drop);
                        return None;
                    }
                }
            }

            match self.walk() {
                Walk::Complete(end) => {
                    self.in_image = false;
                    return Some(self.buffer.split_to(end).freeze());
                }
                Walk::NeedMore => {
                    if self.buffer.len() > MAX_IMAGE_BYTES {
                        tracing::warn!(
                            "Discarding {} bytes without a JPEG end marker",
                            self.buffer.len()
                        );
                        self.buffer.clear();
                        self.in_image = false;
                    }
                    return None;
                }
                Walk::Corrupt => {
                    tracing::debug!("Malformed JPEG segment, resynchronizing");
                    self.buffer.advance(SOI.len());
                    self.in_image = false;
                }
            }
        }
    }

    /// Bytes currently held
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn walk(&mut self) -> Walk {
        loop {
            if self.in_scan {
                match self.skip_scan_data() {
                    Some(marker_at) => {
                        self.cursor = marker_at;
                        self.in_scan = false;
                    }
                    None => return Walk::NeedMore,
                }
            }

            let at = self.cursor;
            let Some(&[prefix, marker]) = self.buffer.get(at..at + 2) else {
                return Walk::NeedMore;
            };
            if prefix != 0xFF {
                return Walk::Corrupt;
            }

            match marker {
                // Fill byte before a marker
                0xFF => self.cursor += 1,
                EOI => return Walk::Complete(at + 2),
                0xD8 => return Walk::Corrupt,
                // Markers without a length field
                0x01 | 0xD0..=0xD7 => self.cursor += 2,
                _ => {
                    let Some(&[high, low]) = self.buffer.get(at + 2..at + 4) else {
                        return Walk::NeedMore;
                    };
                    let length = usize::from(u16::from_be_bytes([high, low]));
                    if length < 2 {
                        return Walk::Corrupt;
                    }
                    if self.buffer.len() < at + 2 + length {
                        return Walk::NeedMore;
                    }
                    self.cursor = at + 2 + length;
                    self.in_scan = marker == SOS;
                }
            }
        }
    }

    /// Advance through entropy-coded data. Returns the offset of the next
    /// real marker, or `None` when more bytes are needed.
    fn skip_scan_data(&mut self) -> Option<usize> {
        let mut at = self.cursor;
        loop {
            let Some(offset) = self.buffer[at..].iter().position(|&byte| byte == 0xFF) else {
                self.cursor = self.buffer.len();
                return None;
            };
            at += offset;
            let Some(&next) = self.buffer.get(at + 1) else {
                self.cursor = at;
                return None;
            };
            match next {
                // Stuffed 0xFF and restart markers belong to the scan
                0x00 | 0xD0..=0xD7 => at += 2,
                0xFF => at += 1,
                _ => return Some(at),
            }
        }
    }
}

fn find_soi(haystack: &[u8]) -> Option<usize> {
    haystack.windows(2).position(|window| window == SOI)
}

/// A JPEG that could not be turned into a frame
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("JPEG decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Size(#[from] FrameSizeMismatch),
}

/// Decode one JPEG into an RGB24 frame
pub fn decode_jpeg(jpeg: &[u8], sequence: u64) -> Result<Frame, DecodeError> {
    let image = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)?.into_rgb8();
    let (width, height) = image.dimensions();
    Ok(Frame::new(
        width,
        height,
        PixelFormat::Rgb24,
        image.into_raw(),
        sequence,
    )?)
}

/// Connects to MJPEG cameras over HTTP
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new() -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ip-camcorder/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::Connection(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, url: &StreamUrl) -> PipelineResult<Box<dyn FrameReader>> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url.url().clone())
            .send()
            .await
            .map_err(|e| PipelineError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Connection(format!(
                "{} answered with HTTP {}",
                url, status
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.starts_with("multipart/") {
            return Err(PipelineError::Connection(format!(
                "{} is not an MJPEG stream (content type '{}')",
                url, content_type
            )));
        }

        tracing::info!("Connected to {} ({})", url, content_type);

        Ok(Box::new(MjpegReader {
            response,
            parser: MjpegParser::new(),
            next_sequence: 0,
        }))
    }
}

/// Reads frames from one HTTP response body
pub struct MjpegReader {
    response: reqwest::Response,
    parser: MjpegParser,
    next_sequence: u64,
}

#[async_trait]
impl FrameReader for MjpegReader {
    async fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        loop {
            while let Some(jpeg) = self.parser.next_image() {
                match decode_jpeg(&jpeg, self.next_sequence) {
                    Ok(frame) => {
                        self.next_sequence += 1;
                        return Ok(Some(frame));
                    }
                    Err(e) => tracing::warn!("Skipping frame ({} bytes): {}", jpeg.len(), e),
                }
            }

            match self.response.chunk().await {
                Ok(Some(chunk)) => self.parser.push(&chunk),
                Ok(None) => return Ok(None),
                Err(e) => {
                    return Err(PipelineError::Connection(format!(
                        "Lost connection to camera: {}",
                        e
                    )))
                }
            }
        }
    }
}
