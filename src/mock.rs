//! Test doubles for running the controller without hardware.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime};

use crate::storage::{Clock, VolumeOps};
use crate::traits::{
    CameraError, DeviceMode, Format, Frame, FrameMetadata, ModeFormats, Pipeline, PipelineEvent,
    PowerController, PreviewSink, Result, StillEncoder,
};

/// Recorded pipeline call for assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Open,
    Configure(DeviceMode),
    Start,
    Stop,
    Teardown,
    Close,
}

/// Scripted event kinds; frames are generated for whatever format is active.
#[derive(Debug, Clone)]
pub enum Scripted {
    Frame,
    Timeout,
    Quit,
    Unrecognised(&'static str),
}

/// Pipeline that replays a script and records every call.
pub struct MockPipeline {
    formats: ModeFormats,
    script: VecDeque<Scripted>,
    ops: Vec<Op>,
    active: Option<Format>,
    running: bool,
    frame_count: u32,
    pattern: TestPattern,
}

impl Default for MockPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPipeline {
    /// Small formats so generated frames stay cheap.
    pub fn new() -> Self {
        Self {
            formats: ModeFormats {
                viewfinder: Format::new(32, 24, crate::traits::FourCC::YUYV),
                still: Format::new(64, 48, crate::traits::FourCC::YUYV),
            },
            script: VecDeque::new(),
            ops: Vec::new(),
            active: None,
            running: false,
            frame_count: 0,
            pattern: TestPattern::ColorBars,
        }
    }

    pub fn with_script<I: IntoIterator<Item = Scripted>>(mut self, script: I) -> Self {
        self.script.extend(script);
        self
    }

    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub const fn is_running(&self) -> bool {
        self.running
    }

    pub fn count(&self, op: Op) -> usize {
        self.ops.iter().filter(|&&recorded| recorded == op).count()
    }
}

impl Pipeline for MockPipeline {
    fn open(&mut self) -> Result<()> {
        self.ops.push(Op::Open);
        Ok(())
    }

    fn close(&mut self) {
        self.running = false;
        self.active = None;
        self.ops.push(Op::Close);
    }

    fn configure(&mut self, mode: DeviceMode) -> Result<Format> {
        if self.running {
            return Err(CameraError::StreamError("configure while streaming".to_owned()));
        }
        self.ops.push(Op::Configure(mode));
        let format = self.formats.for_mode(mode).clone();
        self.active = Some(format.clone());
        Ok(format)
    }

    fn teardown(&mut self) {
        self.active = None;
        self.ops.push(Op::Teardown);
    }

    fn start(&mut self) -> Result<()> {
        if self.active.is_none() {
            return Err(CameraError::NotConfigured);
        }
        self.running = true;
        self.ops.push(Op::Start);
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
        self.ops.push(Op::Stop);
    }

    fn wait(&mut self) -> Result<PipelineEvent> {
        let next = self.script.pop_front().unwrap_or(Scripted::Quit);
        Ok(match next {
            Scripted::Frame => {
                let format = self.active.clone().ok_or(CameraError::NotConfigured)?;
                let seq = self.frame_count;
                self.frame_count += 1;
                PipelineEvent::FrameCompleted(Frame {
                    data: generate_test_frame(&format, self.pattern),
                    metadata: FrameMetadata {
                        sequence: seq,
                        timestamp: Duration::from_millis(u64::from(seq) * 33), // ~30fps
                        bytes_used: format.size,
                    },
                })
            }
            Scripted::Timeout => PipelineEvent::Timeout,
            Scripted::Quit => PipelineEvent::Quit,
            Scripted::Unrecognised(what) => PipelineEvent::Unrecognised(what.to_owned()),
        })
    }

    fn stream_info(&self) -> Option<&Format> {
        self.active.as_ref()
    }

    fn device_label(&self) -> &str {
        "mock"
    }
}

/// Encoder that records destinations and writes a marker file.
#[derive(Clone, Default)]
pub struct RecordingEncoder {
    pub written: Arc<Mutex<Vec<(PathBuf, Format)>>>,
    pub fail: bool,
}

impl RecordingEncoder {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn written(&self) -> Vec<(PathBuf, Format)> {
        self.written.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl StillEncoder for RecordingEncoder {
    fn encode(&self, frame: &Frame, info: &Format, dest: &Path, _label: &str) -> Result<()> {
        if self.fail {
            return Err(CameraError::Encode("scripted failure".to_owned()));
        }
        std::fs::write(dest, &frame.data)?;
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((dest.to_path_buf(), info.clone()));
        Ok(())
    }
}

/// Preview sink counting frames.
#[derive(Clone, Default)]
pub struct CountingPreview {
    pub shown: Arc<AtomicUsize>,
}

impl PreviewSink for CountingPreview {
    fn show(&mut self, _frame: &Frame, _info: &Format) {
        self.shown.fetch_add(1, Ordering::SeqCst);
    }
}

/// Power controller counting requests.
#[derive(Clone, Default)]
pub struct CountingPower {
    pub requests: Arc<AtomicUsize>,
}

impl PowerController for CountingPower {
    fn power_off(&self) -> Result<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Clock that only moves when slept on.
///
/// Wall time starts at 2024-01-02 03:04:05.
pub struct SimulatedClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
    wall: NaiveDateTime,
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            wall: NaiveDate::from_ymd_opt(2024, 1, 2)
                .and_then(|d| d.and_hms_opt(3, 4, 5))
                .expect("valid timestamp"),
        }
    }
}

impl SimulatedClock {
    pub fn slept(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Instant {
        self.origin + self.slept()
    }

    fn wall_time(&self) -> NaiveDateTime {
        chrono::Duration::from_std(self.slept()).map_or(self.wall, |elapsed| self.wall + elapsed)
    }

    fn sleep(&self, duration: Duration) {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner) += duration;
    }
}

/// Volume operations that stay busy until a simulated time.
#[derive(Default)]
pub struct FakeVolumeOps {
    clock: Option<Arc<SimulatedClock>>,
    busy_until: Duration,
    refuse_force: bool,
    syncs: AtomicUsize,
    unmounts: AtomicUsize,
    forces: AtomicUsize,
    last_unmount: Mutex<Duration>,
}

impl FakeVolumeOps {
    pub fn busy_until(clock: Arc<SimulatedClock>, until: Duration) -> Self {
        Self {
            clock: Some(clock),
            busy_until: until,
            ..Self::default()
        }
    }

    pub fn refuse_force(mut self) -> Self {
        self.refuse_force = true;
        self
    }

    pub fn sync_calls(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    pub fn unmount_calls(&self) -> usize {
        self.unmounts.load(Ordering::SeqCst)
    }

    pub fn force_calls(&self) -> usize {
        self.forces.load(Ordering::SeqCst)
    }

    pub fn last_unmount_at(&self) -> Duration {
        *self.last_unmount.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn elapsed(&self) -> Duration {
        self.clock.as_ref().map_or(Duration::ZERO, |clock| clock.slept())
    }
}

impl VolumeOps for FakeVolumeOps {
    fn sync(&self) {
        self.syncs.fetch_add(1, Ordering::SeqCst);
    }

    fn unmount(&self, _path: &Path) -> io::Result<()> {
        self.unmounts.fetch_add(1, Ordering::SeqCst);
        let now = self.elapsed();
        *self.last_unmount.lock().unwrap_or_else(PoisonError::into_inner) = now;
        if now < self.busy_until {
            Err(io::Error::from_raw_os_error(16)) // EBUSY
        } else {
            Ok(())
        }
    }

    fn force_unmount(&self, _path: &Path) -> io::Result<()> {
        self.forces.fetch_add(1, Ordering::SeqCst);
        if self.refuse_force {
            Err(io::Error::from_raw_os_error(16))
        } else {
            Ok(())
        }
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
}

/// Generate test frame data based on pattern.
pub fn generate_test_frame(format: &Format, pattern: TestPattern) -> Vec<u8> {
    let size = (format.stride * format.height) as usize;
    let mut data = vec![0u8; size];

    match pattern {
        TestPattern::ColorBars => generate_color_bars(&mut data, format),
        TestPattern::Gradient => generate_gradient(&mut data, format),
    }

    data
}

/// Fill each YUYV pair with the value `pick(x)` returns for its left pixel.
fn fill_pairs<F: Fn(u32) -> [u8; 4]>(data: &mut [u8], format: &Format, pick: F) {
    for row in data.chunks_exact_mut(format.stride as usize) {
        for (pair, quad) in row.chunks_exact_mut(4).enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let x = (pair * 2) as u32;
            if x >= format.width {
                break;
            }
            quad.copy_from_slice(&pick(x));
        }
    }
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], format: &Format) {
    // 8 color bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    const BARS: [(u8, u8, u8); 8] = [
        (235, 128, 128), // White
        (210, 16, 146),  // Yellow
        (170, 166, 16),  // Cyan
        (145, 54, 34),   // Green
        (106, 202, 222), // Magenta
        (81, 90, 240),   // Red
        (41, 240, 110),  // Blue
        (16, 128, 128),  // Black
    ];

    let bar_width = (format.width / 8).max(1);
    fill_pairs(data, format, |x| {
        let (y, u, v) = BARS
            .get((x / bar_width).min(7) as usize)
            .copied()
            .unwrap_or((16, 128, 128));
        [y, u, y, v]
    });
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], format: &Format) {
    let width = format.width.max(1);
    fill_pairs(data, format, |x| {
        #[allow(clippy::cast_possible_truncation)]
        let y = ((x * 255) / width) as u8;
        [y, 128, y, 128]
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::FourCC;

    #[test]
    fn test_mock_pipeline_records_ops() {
        let mut pipeline = MockPipeline::new().with_script([Scripted::Frame]);
        pipeline.open().expect("open");
        pipeline.configure(DeviceMode::Viewfinder).expect("configure");
        pipeline.start().expect("start");

        let event = pipeline.wait().expect("wait");
        assert!(matches!(event, PipelineEvent::FrameCompleted(ref f) if f.metadata.sequence == 0));
        assert!(matches!(pipeline.wait().expect("wait"), PipelineEvent::Quit));

        assert_eq!(
            pipeline.ops(),
            &[Op::Open, Op::Configure(DeviceMode::Viewfinder), Op::Start]
        );
    }

    #[test]
    fn test_mock_pipeline_rejects_out_of_order_calls() {
        let mut pipeline = MockPipeline::new();
        assert!(pipeline.start().is_err());
        pipeline.configure(DeviceMode::Still).expect("configure");
        pipeline.start().expect("start");
        assert!(pipeline.configure(DeviceMode::Viewfinder).is_err());
    }

    #[test]
    fn test_mock_pipeline_serves_chosen_pattern() {
        let mut pipeline = MockPipeline::new()
            .with_pattern(TestPattern::Gradient)
            .with_script([Scripted::Frame]);
        let format = pipeline.configure(DeviceMode::Still).expect("configure");
        pipeline.start().expect("start");

        let PipelineEvent::FrameCompleted(frame) = pipeline.wait().expect("wait") else {
            panic!("expected a frame");
        };
        assert_eq!(frame.data, generate_test_frame(&format, TestPattern::Gradient));
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::ColorBars);

        assert_eq!(data.len(), (640 * 480 * 2) as usize);
        // First bar should be white (Y=235)
        assert_eq!(data.first(), Some(&235));
    }

    #[test]
    fn test_gradient_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Gradient);
        let frame = Frame {
            data,
            metadata: FrameMetadata {
                sequence: 0,
                timestamp: Duration::ZERO,
                bytes_used: format.size,
            },
        };

        let (left, _, _) = frame.pixel_at(0, 479, &format).expect("left pixel");
        let (right, _, _) = frame.pixel_at(638, 479, &format).expect("right pixel");
        assert!(left < 10);
        assert!(right > 200);
    }

    #[test]
    fn test_simulated_clock_moves_only_on_sleep() {
        let clock = SimulatedClock::default();
        let start = clock.now();
        assert_eq!(clock.now(), start);
        clock.sleep(Duration::from_secs(3));
        assert_eq!(clock.now().duration_since(start), Duration::from_secs(3));
        assert_eq!(
            clock.wall_time().format("%H-%M-%S").to_string(),
            "03-04-08"
        );
    }
}
