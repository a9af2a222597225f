//! Core traits and types shared by the capture pipeline and its collaborators.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

/// Pixel format code (e.g., YUYV, MJPG).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{}", char::from(byte))?;
        }
        Ok(())
    }
}

impl std::str::FromStr for FourCC {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let code: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| format!("pixel format must be four characters, got {s:?}"))?;
        match Self(code) {
            fourcc @ (Self::YUYV | Self::MJPG) => Ok(fourcc),
            other => Err(format!("unsupported pixel format {other}")),
        }
    }
}

/// Video format of a configured stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Packed format with a two-bytes-per-pixel stride.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let stride = width * 2; // YUYV is 2 bytes per pixel
        let size = stride * height;
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }
}

/// Operating mode of the capture pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceMode {
    /// Continuous low-latency preview.
    Viewfinder,
    /// One-shot full resolution capture.
    Still,
}

impl std::fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Viewfinder => f.write_str("viewfinder"),
            Self::Still => f.write_str("still"),
        }
    }
}

/// The stream format requested for each device mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeFormats {
    /// Format used while previewing.
    pub viewfinder: Format,
    /// Format used for a still capture.
    pub still: Format,
}

impl ModeFormats {
    /// Format requested for `mode`.
    #[must_use]
    pub const fn for_mode(&self, mode: DeviceMode) -> &Format {
        match mode {
            DeviceMode::Viewfinder => &self.viewfinder,
            DeviceMode::Still => &self.still,
        }
    }
}

impl Default for ModeFormats {
    fn default() -> Self {
        Self {
            viewfinder: Format::new(640, 480, FourCC::YUYV),
            still: Format::new(2592, 1944, FourCC::YUYV),
        }
    }
}

/// Metadata for a captured frame.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// A captured video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw frame data.
    pub data: Vec<u8>,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl Frame {
    /// Get RGB values for a pixel of a YUYV frame laid out as `format`.
    ///
    /// For odd x coordinates the Y value of the second pixel in the pair is
    /// used together with the shared U/V values. Returns `None` when the
    /// coordinates fall outside the frame data.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32, format: &Format) -> Option<(u8, u8, u8)> {
        if x >= format.width || y >= format.height {
            return None;
        }

        // YUYV format: [Y0 U Y1 V] repeats
        let pair_x = x & !1;
        let offset = (y as usize) * (format.stride as usize) + (pair_x as usize) * 2;
        let quad = self.data.get(offset..offset + 4)?;
        let &[y0, u, y1, v] = quad else {
            return None;
        };

        let y_val = if x % 2 == 0 { y0 } else { y1 };
        Some(yuv_to_rgb(y_val, u, v))
    }

    /// Convert a whole YUYV frame to packed RGB8.
    ///
    /// Returns `None` if the frame holds fewer rows than `format` describes.
    #[must_use]
    pub fn to_rgb(&self, format: &Format) -> Option<Vec<u8>> {
        let width = format.width as usize;
        let height = format.height as usize;
        let stride = format.stride as usize;
        if stride < width * 2 || self.data.len() < stride * height {
            return None;
        }

        let mut rgb = Vec::with_capacity(width * height * 3);
        for row in self.data.chunks_exact(stride).take(height) {
            for quad in row.chunks_exact(4).take(width.div_ceil(2)) {
                let &[y0, u, y1, v] = quad else {
                    continue;
                };
                let (r, g, b) = yuv_to_rgb(y0, u, v);
                rgb.extend_from_slice(&[r, g, b]);
                if rgb.len() % (width * 3) != 0 {
                    let (r, g, b) = yuv_to_rgb(y1, u, v);
                    rgb.extend_from_slice(&[r, g, b]);
                }
            }
        }
        Some(rgb)
    }
}

/// Convert YUV values to RGB using the ITU-R BT.601 formula.
///
/// RGB values are clamped to the 0-255 range.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub(crate) fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamp = |val: f32| -> u8 { val.clamp(0.0, 255.0) as u8 };

    (clamp(r), clamp(g), clamp(b))
}

/// Something the capture pipeline reported while waiting for the next frame.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A frame for the active stream finished.
    FrameCompleted(Frame),
    /// No frame arrived within the device timeout.
    Timeout,
    /// The pipeline was asked to stop for good.
    Quit,
    /// A message the controller has no handling for.
    Unrecognised(String),
}

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Failed to open device.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// Requested format is not supported.
    #[error("Format not supported: {0:?}")]
    FormatNotSupported(Format),
    /// Error during streaming operation.
    #[error("Stream error: {0}")]
    StreamError(String),
    /// A pipeline operation was issued out of order.
    #[error("Pipeline is not configured for this operation")]
    NotConfigured,
    /// Still image encoding failed.
    #[error("Encoding failed: {0}")]
    Encode(String),
    /// GPIO setup failed.
    #[error("GPIO error: {0}")]
    Gpio(String),
    /// Power off request failed.
    #[error("Power off failed: {0}")]
    Power(String),
    /// The pipeline produced a message outside its protocol.
    #[error("Unrecognised pipeline message: {0}")]
    UnexpectedEvent(String),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Abstraction over the image sensor pipeline.
///
/// Calls follow `open` → `configure` → `start` → `wait`* → `stop` →
/// `teardown`; a reconfiguration always passes through `stop` and
/// `teardown` first.
pub trait Pipeline {
    /// Open the sensor.
    fn open(&mut self) -> Result<()>;

    /// Release the sensor. Stops and tears down first if needed.
    fn close(&mut self);

    /// Configure the streams for `mode`. Returns the format the driver accepted.
    fn configure(&mut self, mode: DeviceMode) -> Result<Format>;

    /// Drop the current configuration.
    fn teardown(&mut self);

    /// Start streaming with the current configuration.
    fn start(&mut self) -> Result<()>;

    /// Stop streaming. Stopping a stopped pipeline is a no-op.
    fn stop(&mut self);

    /// Block until the next event.
    fn wait(&mut self) -> Result<PipelineEvent>;

    /// Format of the configured stream, if any.
    fn stream_info(&self) -> Option<&Format>;

    /// Human readable sensor name, recorded alongside stills.
    fn device_label(&self) -> &str;
}

/// Encodes a still frame to a file.
pub trait StillEncoder {
    /// Encode `frame` (laid out as `info`) and write it to `dest`.
    fn encode(&self, frame: &Frame, info: &Format, dest: &Path, label: &str) -> Result<()>;
}

/// Renders viewfinder frames.
pub trait PreviewSink {
    /// Show `frame`. Rendering problems are the sink's own business.
    fn show(&mut self, frame: &Frame, info: &Format);
}

/// Turns the device off.
pub trait PowerController {
    /// Ask the operating system to power off.
    fn power_off(&self) -> Result<()>;
}
