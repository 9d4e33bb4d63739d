//! Decoded video frames and frame jobs

use std::time::{Duration, Instant};

use bytes::Bytes;

/// Pixel layout of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit blue/green/red
    Bgr24,
    /// Packed 8-bit red/green/blue
    Rgb24,
    /// Planar YUV 4:2:0
    I420,
}

impl PixelFormat {
    /// Bytes needed for a frame of the given size
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Bgr24 | PixelFormat::Rgb24 => pixels * 3,
            PixelFormat::I420 => {
                let chroma = width.div_ceil(2) as usize * height.div_ceil(2) as usize;
                pixels + 2 * chroma
            }
        }
    }
}

/// A decoded video frame
///
/// Cheap to clone: pixel data is reference counted.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Bytes,
    /// Presentation timestamp from the track, if known
    pub pts: Option<Duration>,
}

impl VideoFrame {
    /// Create a frame without a presentation timestamp
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Bytes) -> Self {
        Self {
            width,
            height,
            format,
            data,
            pts: None,
        }
    }

    /// Set the presentation timestamp
    pub fn with_pts(mut self, pts: Duration) -> Self {
        self.pts = Some(pts);
        self
    }

    /// Whether the data length matches the declared size and format
    pub fn is_complete(&self) -> bool {
        self.data.len() == self.format.frame_size(self.width, self.height)
    }
}

/// One frame tagged for processing
#[derive(Debug)]
pub struct FrameJob {
    /// Position of the frame on its track, starting at 0
    pub sequence: u64,
    /// When the pipeline pulled the frame
    pub arrived_at: Instant,
    pub frame: VideoFrame,
}

impl FrameJob {
    pub fn new(sequence: u64, frame: VideoFrame) -> Self {
        Self {
            sequence,
            arrived_at: Instant::now(),
            frame,
        }
    }
}
