//! JPEG still encoder.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::ExtendedColorType;
use tracing::debug;

use crate::traits::{CameraError, Format, FourCC, Frame, Result, StillEncoder};

/// Default JPEG quality.
pub const DEFAULT_QUALITY: u8 = 93;

/// Writes stills as JPEG files.
///
/// MJPG frames are already JPEG and are written as-is; YUYV frames are
/// converted to RGB and compressed. Files appear under their final name
/// only once fully written and synced.
#[derive(Debug, Clone, Copy)]
pub struct JpegEncoder {
    quality: u8,
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY)
    }
}

impl JpegEncoder {
    /// Encoder with `quality` clamped to 1..=100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    /// Compress `frame` to JPEG bytes.
    pub fn to_jpeg(&self, frame: &Frame, info: &Format) -> Result<Vec<u8>> {
        match info.fourcc {
            FourCC::MJPG => Ok(frame.data.clone()),
            FourCC::YUYV => {
                let rgb = frame.to_rgb(info).ok_or_else(|| {
                    CameraError::Encode(format!(
                        "frame holds {} bytes, {}x{} stride {} needs {}",
                        frame.data.len(),
                        info.width,
                        info.height,
                        info.stride,
                        u64::from(info.stride) * u64::from(info.height)
                    ))
                })?;
                let mut jpeg = Vec::new();
                ImageJpegEncoder::new_with_quality(&mut jpeg, self.quality)
                    .encode(&rgb, info.width, info.height, ExtendedColorType::Rgb8)
                    .map_err(|err| CameraError::Encode(err.to_string()))?;
                Ok(jpeg)
            }
            _ => Err(CameraError::FormatNotSupported(info.clone())),
        }
    }
}

impl StillEncoder for JpegEncoder {
    fn encode(&self, frame: &Frame, info: &Format, dest: &Path, label: &str) -> Result<()> {
        let jpeg = self.to_jpeg(frame, info)?;
        write_synced(dest, &jpeg)?;
        debug!(
            path = %dest.display(),
            bytes = jpeg.len(),
            camera = label,
            quality = self.quality,
            "still encoded"
        );
        Ok(())
    }
}

/// Write `bytes` to a hidden sibling of `dest`, sync it, then rename.
fn write_synced(dest: &Path, bytes: &[u8]) -> Result<()> {
    let partial = partial_path(dest);
    let written = File::create(&partial).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(err) = written.and_then(|()| fs::rename(&partial, dest)) {
        let _ = fs::remove_file(&partial);
        return Err(err.into());
    }
    Ok(())
}

fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.part"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{generate_test_frame, TestPattern};
    use crate::traits::FrameMetadata;
    use std::time::Duration;

    fn frame(format: &Format, pattern: TestPattern) -> Frame {
        Frame {
            data: generate_test_frame(format, pattern),
            metadata: FrameMetadata {
                sequence: 0,
                timestamp: Duration::ZERO,
                bytes_used: format.size,
            },
        }
    }

    #[test]
    fn test_yuyv_encodes_to_decodable_jpeg() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("still.jpg");
        let format = Format::new(64, 48, FourCC::YUYV);

        JpegEncoder::default()
            .encode(&frame(&format, TestPattern::ColorBars), &format, &dest, "mock")
            .expect("encode");

        let decoded = image::open(&dest).expect("decode jpeg");
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
        assert!(!dir.path().join(".still.jpg.part").exists());
    }

    #[test]
    fn test_mjpg_written_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("still.jpg");
        let format = Format::new(64, 48, FourCC::MJPG);
        let data = vec![0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9];
        let mjpg = Frame {
            data: data.clone(),
            metadata: FrameMetadata {
                sequence: 0,
                timestamp: Duration::ZERO,
                bytes_used: 7,
            },
        };

        JpegEncoder::default()
            .encode(&mjpg, &format, &dest, "mock")
            .expect("encode");
        assert_eq!(fs::read(&dest).expect("read"), data);
    }

    #[test]
    fn test_short_frame_rejected() {
        let format = Format::new(64, 48, FourCC::YUYV);
        let short = Frame {
            data: vec![0; 16],
            metadata: FrameMetadata {
                sequence: 0,
                timestamp: Duration::ZERO,
                bytes_used: 16,
            },
        };
        assert!(matches!(
            JpegEncoder::default().to_jpeg(&short, &format),
            Err(CameraError::Encode(_))
        ));
    }

    #[test]
    fn test_missing_directory_leaves_nothing_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("gone").join("still.jpg");
        let format = Format::new(64, 48, FourCC::YUYV);

        let result = JpegEncoder::default().encode(
            &frame(&format, TestPattern::Gradient),
            &format,
            &dest,
            "mock",
        );
        assert!(matches!(result, Err(CameraError::Io(_))));
        assert!(!dest.exists());
    }

    #[test]
    fn test_quality_clamped() {
        assert_eq!(JpegEncoder::new(0).quality, 1);
        assert_eq!(JpegEncoder::new(200).quality, 100);
    }
}
