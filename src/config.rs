//! Command line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::buttons::{GLITCH_FILTER, POWER_HOLD};
use crate::device::PipelineConfig;
use crate::encoder::DEFAULT_QUALITY;
use crate::filename::APP_DIR;
use crate::storage::{StorageConfig, UnmountPolicy, MEDIA_ROOT, PROC_MOUNTS};
use crate::traits::{Format, FourCC, ModeFormats};

/// Button-driven still camera: MENU takes a picture, DOWN ejects the
/// drive, holding POWER shuts the device down.
#[derive(Parser, Debug)]
#[command(name = "micropiscope", version, about, long_about = None)]
pub struct Cli {
    /// V4L2 device index (/dev/videoN)
    #[arg(long, default_value_t = 0, env = "MICROPISCOPE_DEVICE")]
    pub device: u32,

    /// Viewfinder resolution
    #[arg(long, default_value = "640x480", value_parser = parse_size, env = "MICROPISCOPE_VIEWFINDER")]
    pub viewfinder: (u32, u32),

    /// Still capture resolution
    #[arg(long, default_value = "2592x1944", value_parser = parse_size, env = "MICROPISCOPE_STILL")]
    pub still: (u32, u32),

    /// Pixel format of the viewfinder stream (YUYV or MJPG)
    #[arg(long, default_value = "YUYV", env = "MICROPISCOPE_VIEWFINDER_FORMAT")]
    pub viewfinder_format: FourCC,

    /// Pixel format of the still stream (YUYV or MJPG)
    #[arg(long, default_value = "YUYV", env = "MICROPISCOPE_STILL_FORMAT")]
    pub still_format: FourCC,

    /// Wait this long for a frame before restarting the camera
    #[arg(long, default_value_t = 1000, env = "MICROPISCOPE_TIMEOUT_MS")]
    pub timeout_ms: u64,

    /// JPEG quality (1-100)
    #[arg(long, default_value_t = DEFAULT_QUALITY, value_parser = clap::value_parser!(u8).range(1..=100), env = "MICROPISCOPE_QUALITY")]
    pub quality: u8,

    /// Removable media mount root
    #[arg(long, default_value = MEDIA_ROOT, env = "MICROPISCOPE_MEDIA_ROOT")]
    pub media_root: String,

    /// Mount table to scan
    #[arg(long, default_value = PROC_MOUNTS, env = "MICROPISCOPE_MOUNTS")]
    pub mounts: PathBuf,

    /// Directory created on the drive for pictures
    #[arg(long, default_value = APP_DIR, env = "MICROPISCOPE_APP_DIR")]
    pub app_dir: String,

    /// How long POWER must be held to shut down
    #[arg(long, default_value_t = 2000, env = "MICROPISCOPE_POWER_HOLD_MS")]
    pub power_hold_ms: u64,

    /// Minimum button pulse width
    #[arg(long, default_value_t = 100_000, env = "MICROPISCOPE_GLITCH_FILTER_US")]
    pub glitch_filter_us: u64,

    /// Force the unmount once plain attempts have failed for this long
    #[arg(long, default_value_t = 5, env = "MICROPISCOPE_UNMOUNT_TIMEOUT_S")]
    pub unmount_timeout_s: u64,

    /// Pause between unmount attempts
    #[arg(long, default_value_t = 1000, env = "MICROPISCOPE_UNMOUNT_RETRY_MS")]
    pub unmount_retry_ms: u64,

    /// Framebuffer for the viewfinder, or "none"
    #[arg(long, default_value = "/dev/fb0", env = "MICROPISCOPE_PREVIEW")]
    pub preview: String,

    /// Log instead of powering off
    #[arg(long, env = "MICROPISCOPE_NO_POWER_OFF")]
    pub no_power_off: bool,

    /// Verbose output (-v debug, -vv trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let w: u32 = w.trim().parse().map_err(|err| format!("bad width {w:?}: {err}"))?;
    let h: u32 = h.trim().parse().map_err(|err| format!("bad height {h:?}: {err}"))?;
    if w == 0 || h == 0 || w % 2 != 0 {
        return Err(format!("{w}x{h} is not a usable frame size"));
    }
    Ok((w, h))
}

/// Button settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonConfig {
    /// Hold time for power off.
    pub power_hold: Duration,
    /// GPIO glitch filter.
    pub glitch_filter: Duration,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            power_hold: POWER_HOLD,
            glitch_filter: GLITCH_FILTER,
        }
    }
}

/// Everything the appliance needs to start.
#[derive(Debug, Clone)]
pub struct Config {
    /// Camera settings.
    pub pipeline: PipelineConfig,
    /// Removable storage settings.
    pub storage: StorageConfig,
    /// Button settings.
    pub buttons: ButtonConfig,
    /// JPEG quality.
    pub quality: u8,
    /// Framebuffer device, `None` for headless.
    pub preview: Option<PathBuf>,
    /// Actually power off on a long POWER press.
    pub power_off: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            storage: StorageConfig::default(),
            buttons: ButtonConfig::default(),
            quality: DEFAULT_QUALITY,
            preview: Some(PathBuf::from("/dev/fb0")),
            power_off: true,
        }
    }
}

impl From<&Cli> for Config {
    fn from(cli: &Cli) -> Self {
        let (vw, vh) = cli.viewfinder;
        let (sw, sh) = cli.still;
        Self {
            pipeline: PipelineConfig {
                device_index: cli.device,
                formats: ModeFormats {
                    viewfinder: Format::new(vw, vh, cli.viewfinder_format),
                    still: Format::new(sw, sh, cli.still_format),
                },
                frame_timeout: Duration::from_millis(cli.timeout_ms),
                ..PipelineConfig::default()
            },
            storage: StorageConfig {
                mounts_path: cli.mounts.clone(),
                media_root: cli.media_root.clone(),
                app_dir: cli.app_dir.clone(),
                unmount: UnmountPolicy {
                    timeout: Duration::from_secs(cli.unmount_timeout_s),
                    retry_interval: Duration::from_millis(cli.unmount_retry_ms),
                },
            },
            buttons: ButtonConfig {
                power_hold: Duration::from_millis(cli.power_hold_ms),
                glitch_filter: Duration::from_micros(cli.glitch_filter_us),
            },
            quality: cli.quality,
            preview: (!cli.preview.eq_ignore_ascii_case("none")).then(|| PathBuf::from(&cli.preview)),
            power_off: !cli.no_power_off,
        }
    }
}
