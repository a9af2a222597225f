//! Viewfinder rendering on a Linux framebuffer.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::traits::{CameraError, Format, FourCC, Frame, PreviewSink, Result};

/// Pixel layouts the preview can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// 16 bpp, 5-6-5.
    Rgb565,
    /// 32 bpp, little-endian B, G, R, X.
    Xrgb8888,
}

impl PixelLayout {
    const fn bytes(self) -> usize {
        match self {
            Self::Rgb565 => 2,
            Self::Xrgb8888 => 4,
        }
    }

    fn put(self, out: &mut Vec<u8>, (r, g, b): (u8, u8, u8)) {
        match self {
            Self::Rgb565 => {
                let px = ((u16::from(r) >> 3) << 11) | ((u16::from(g) >> 2) << 5) | (u16::from(b) >> 3);
                out.extend_from_slice(&px.to_le_bytes());
            }
            Self::Xrgb8888 => out.extend_from_slice(&[b, g, r, 0xFF]),
        }
    }
}

/// Framebuffer geometry as reported by sysfs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Visible width in pixels.
    pub width: u32,
    /// Visible height in pixels.
    pub height: u32,
    /// Bytes per line.
    pub line_length: u32,
    /// Pixel layout.
    pub layout: PixelLayout,
}

impl Geometry {
    /// Read the geometry of framebuffer `name` (e.g. `fb0`) from `sysfs_root`.
    pub fn read(sysfs_root: &Path, name: &str) -> Result<Self> {
        let dir = sysfs_root.join(name);
        let read = |attr: &str| -> Result<String> {
            Ok(fs::read_to_string(dir.join(attr))?.trim().to_owned())
        };
        let bad = |what: &str, value: &str| {
            CameraError::DeviceOpenFailed(format!("framebuffer {name}: bad {what} {value:?}"))
        };

        let size = read("virtual_size")?;
        let (width, height) = size
            .split_once(',')
            .and_then(|(w, h)| Some((w.parse::<u32>().ok()?, h.parse::<u32>().ok()?)))
            .ok_or_else(|| bad("virtual_size", &size))?;

        let bpp = read("bits_per_pixel")?;
        let layout = match bpp.as_str() {
            "16" => PixelLayout::Rgb565,
            "32" => PixelLayout::Xrgb8888,
            _ => return Err(bad("bits_per_pixel", &bpp)),
        };

        #[allow(clippy::cast_possible_truncation)]
        let packed = width * layout.bytes() as u32;
        let line_length = read("stride")
            .ok()
            .and_then(|stride| stride.parse().ok())
            .unwrap_or(packed);

        Ok(Self {
            width,
            height,
            line_length,
            layout,
        })
    }
}

/// Scales viewfinder frames onto a framebuffer device.
pub struct FramebufferPreview {
    path: PathBuf,
    file: File,
    geometry: Geometry,
    buffer: Vec<u8>,
    disabled: bool,
}

impl FramebufferPreview {
    /// Open framebuffer device `path` (e.g. `/dev/fb0`).
    pub fn open(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| CameraError::DeviceOpenFailed(format!("{}", path.display())))?;
        let geometry = Geometry::read(Path::new("/sys/class/graphics"), name)?;
        let file = OpenOptions::new().write(true).open(path)?;
        debug!(path = %path.display(), ?geometry, "framebuffer preview ready");
        Ok(Self::with_file(path.to_path_buf(), file, geometry))
    }

    fn with_file(path: PathBuf, file: File, geometry: Geometry) -> Self {
        Self {
            path,
            file,
            geometry,
            buffer: Vec::new(),
            disabled: false,
        }
    }

    /// Render `frame` into the internal buffer, one framebuffer row after another.
    fn render(&mut self, frame: &Frame, info: &Format) {
        let Geometry {
            width,
            height,
            line_length,
            layout,
        } = self.geometry;

        self.buffer.clear();
        self.buffer.reserve(line_length as usize * height as usize);
        let row_bytes = width as usize * layout.bytes();
        let padding = (line_length as usize).saturating_sub(row_bytes);

        for ty in 0..height {
            let sy = scale(ty, height, info.height);
            for tx in 0..width {
                let sx = scale(tx, width, info.width);
                let rgb = frame.pixel_at(sx, sy, info).unwrap_or((0, 0, 0));
                layout.put(&mut self.buffer, rgb);
            }
            self.buffer.resize(self.buffer.len() + padding, 0);
        }
    }
}

/// Nearest-neighbour source coordinate for target coordinate `t`.
fn scale(t: u32, target: u32, source: u32) -> u32 {
    if target == 0 {
        return 0;
    }
    #[allow(clippy::cast_possible_truncation)]
    let s = (u64::from(t) * u64::from(source) / u64::from(target)) as u32;
    s.min(source.saturating_sub(1))
}

impl PreviewSink for FramebufferPreview {
    fn show(&mut self, frame: &Frame, info: &Format) {
        if self.disabled {
            return;
        }
        if info.fourcc != FourCC::YUYV {
            warn!(fourcc = %info.fourcc, "preview needs YUYV frames, disabling preview");
            self.disabled = true;
            return;
        }

        self.render(frame, info);
        if let Err(err) = self.file.write_all_at(&self.buffer, 0) {
            warn!(path = %self.path.display(), %err, "framebuffer write failed, disabling preview");
            self.disabled = true;
        }
    }
}

/// Preview that discards frames, for headless units.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPreview;

impl PreviewSink for NullPreview {
    fn show(&mut self, _frame: &Frame, _info: &Format) {}
}
