//! V4L2 pipeline implementation using the v4l crate.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{
    CameraError, DeviceMode, Format, FourCC, Frame, FrameMetadata, ModeFormats, Pipeline,
    PipelineEvent, Result,
};

/// Settings for [`V4L2Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Device index (e.g., 0 for /dev/video0).
    pub device_index: u32,
    /// Format per device mode.
    pub formats: ModeFormats,
    /// Number of mmap buffers per stream.
    pub buffer_count: u32,
    /// How long `wait` blocks before reporting a timeout.
    pub frame_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            formats: ModeFormats::default(),
            buffer_count: 4,
            frame_timeout: Duration::from_millis(1000),
        }
    }
}

/// What a failed dequeue means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DequeueFailure {
    /// A signal landed mid-dequeue; check the quit flag and try again.
    Retry,
    /// No frame within the poll timeout.
    Timeout,
    /// Anything else.
    Fatal,
}

const fn dequeue_failure(kind: io::ErrorKind) -> DequeueFailure {
    match kind {
        io::ErrorKind::Interrupted => DequeueFailure::Retry,
        io::ErrorKind::TimedOut => DequeueFailure::Timeout,
        _ => DequeueFailure::Fatal,
    }
}

/// Dequeue one buffer and copy out the bytes the driver filled.
fn dequeue(stream: &mut Stream<'static>) -> io::Result<Frame> {
    let (buf, meta) = stream.next()?;

    // Safe conversions: V4L2 timestamps are always non-negative in practice
    #[allow(clippy::cast_sign_loss)]
    let secs = meta.timestamp.sec.max(0) as u64;
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

    let used = buf.get(..meta.bytesused as usize).unwrap_or(buf);

    Ok(Frame {
        data: used.to_vec(),
        metadata: FrameMetadata {
            sequence: meta.sequence,
            timestamp: Duration::new(secs, nanos),
            bytes_used: meta.bytesused,
        },
    })
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Capture pipeline over a V4L2 device.
///
/// The viewfinder and still modes are two formats on the same capture
/// node; switching between them stops the mmap stream, applies the new
/// format and creates a fresh stream.
pub struct V4L2Pipeline {
    config: PipelineConfig,
    quit: Arc<AtomicBool>,
    device: Option<Device>,
    capabilities: DeviceCapabilities,
    active: Option<Format>,
    stream: Option<Stream<'static>>,
}

impl V4L2Pipeline {
    /// Create a pipeline for `config`. `quit` turns the next `wait` into
    /// [`PipelineEvent::Quit`].
    #[must_use]
    pub fn new(config: PipelineConfig, quit: Arc<AtomicBool>) -> Self {
        Self {
            config,
            quit,
            device: None,
            capabilities: DeviceCapabilities::default(),
            active: None,
            stream: None,
        }
    }

    /// Capabilities reported by the driver. Empty until opened.
    pub const fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn device(&self) -> Result<&Device> {
        self.device.as_ref().ok_or(CameraError::NotConfigured)
    }
}

impl Pipeline for V4L2Pipeline {
    fn open(&mut self) -> Result<()> {
        let index = self.config.device_index;
        let device = Device::new(index as usize)
            .map_err(|err| CameraError::DeviceOpenFailed(format!("/dev/video{index}: {err}")))?;

        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        self.capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };

        if !self.capabilities.can_capture || !self.capabilities.can_stream {
            return Err(CameraError::DeviceOpenFailed(format!(
                "{} cannot stream video capture",
                self.capabilities.card
            )));
        }

        info!(
            card = %self.capabilities.card,
            driver = %self.capabilities.driver,
            "opened camera"
        );
        self.device = Some(device);
        Ok(())
    }

    fn close(&mut self) {
        self.stop();
        self.teardown();
        if self.device.take().is_some() {
            debug!("closed camera");
        }
    }

    fn configure(&mut self, mode: DeviceMode) -> Result<Format> {
        let requested = self.config.formats.for_mode(mode).clone();
        let device = self.device()?;

        let mut fmt = device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        fmt.width = requested.width;
        fmt.height = requested.height;
        fmt.fourcc = requested.fourcc.into();

        let fmt = device
            .set_format(&fmt)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        let actual = Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            stride: fmt.stride,
            size: fmt.size,
        };

        if actual.fourcc != requested.fourcc {
            return Err(CameraError::FormatNotSupported(requested));
        }

        debug!(
            %mode,
            width = actual.width,
            height = actual.height,
            fourcc = %actual.fourcc,
            "configured stream"
        );
        self.active = Some(actual.clone());
        Ok(actual)
    }

    fn teardown(&mut self) {
        self.stream = None;
        self.active = None;
    }

    fn start(&mut self) -> Result<()> {
        if self.active.is_none() {
            return Err(CameraError::NotConfigured);
        }
        let device = self.device()?;

        let mut stream = Stream::with_buffers(device, Type::VideoCapture, self.config.buffer_count)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        stream.set_timeout(self.config.frame_timeout);

        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the stream issues VIDIOC_STREAMOFF and unmaps the buffers.
        self.stream = None;
    }

    fn wait(&mut self) -> Result<PipelineEvent> {
        let stream = self.stream.as_mut().ok_or(CameraError::NotConfigured)?;
        loop {
            if self.quit.load(Ordering::SeqCst) {
                return Ok(PipelineEvent::Quit);
            }
            let err = match dequeue(stream) {
                Ok(frame) => return Ok(PipelineEvent::FrameCompleted(frame)),
                Err(err) => err,
            };
            match dequeue_failure(err.kind()) {
                DequeueFailure::Retry => trace!("dequeue interrupted, retrying"),
                DequeueFailure::Timeout => return Ok(PipelineEvent::Timeout),
                DequeueFailure::Fatal => return Err(CameraError::StreamError(err.to_string())),
            }
        }
    }

    fn stream_info(&self) -> Option<&Format> {
        self.active.as_ref()
    }

    fn device_label(&self) -> &str {
        &self.capabilities.card
    }
}
