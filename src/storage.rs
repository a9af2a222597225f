//! Removable volume discovery, safe ejection and capture placement.
//!
//! Nothing here is cached: every call re-reads the mount table so the
//! answer reflects the volume as it is at the moment of use.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use nix::mount::{umount, umount2, MntFlags};
use tracing::{debug, error, info, warn};

use crate::filename;
use crate::traits::Result;

/// Mount table read by default.
pub const PROC_MOUNTS: &str = "/proc/mounts";

/// Mount points below this root are treated as removable media.
pub const MEDIA_ROOT: &str = "/media/";

/// Finds the mounted removable volume by scanning a mount table.
#[derive(Debug, Clone)]
pub struct MountLocator {
    mounts_path: PathBuf,
    media_root: String,
}

impl Default for MountLocator {
    fn default() -> Self {
        Self::new(PROC_MOUNTS, MEDIA_ROOT)
    }
}

impl MountLocator {
    /// Locator reading `mounts_path` and matching mount points under `media_root`.
    pub fn new<P: Into<PathBuf>, S: Into<String>>(mounts_path: P, media_root: S) -> Self {
        Self {
            mounts_path: mounts_path.into(),
            media_root: media_root.into(),
        }
    }

    /// Current removable volume, or `None` if nothing is mounted or the
    /// mount table cannot be read.
    pub fn locate(&self) -> Option<PathBuf> {
        match fs::read_to_string(&self.mounts_path) {
            Ok(table) => removable_mount_point(&table, &self.media_root),
            Err(err) => {
                debug!(path = %self.mounts_path.display(), %err, "cannot read mount table");
                None
            }
        }
    }
}

/// Pick the removable mount point out of `/proc/mounts` formatted `table`.
///
/// When several records match, the last one wins.
pub fn removable_mount_point(table: &str, media_root: &str) -> Option<PathBuf> {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(unescape_mount_field)
        .filter(|mount_point| mount_point.starts_with(media_root))
        .last()
        .map(PathBuf::from)
}

/// Decode the octal escapes (`\040` etc.) the kernel uses in mount fields.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = bytes
            .get(i + 1..i + 4)
            .filter(|_| bytes.get(i) == Some(&b'\\'))
            .and_then(|digits| std::str::from_utf8(digits).ok())
            .and_then(|digits| u8::from_str_radix(digits, 8).ok());
        match escaped {
            Some(byte) => {
                out.push(byte);
                i += 4;
            }
            None => {
                if let Some(&byte) = bytes.get(i) {
                    out.push(byte);
                }
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Filesystem operations needed to detach a volume.
pub trait VolumeOps: Send + Sync {
    /// Flush pending writes to every mounted filesystem.
    fn sync(&self);

    /// Plain unmount.
    fn unmount(&self, path: &Path) -> io::Result<()>;

    /// Detach even if the filesystem is busy.
    fn force_unmount(&self, path: &Path) -> io::Result<()>;
}

impl<T: VolumeOps + ?Sized> VolumeOps for Arc<T> {
    fn sync(&self) {
        (**self).sync();
    }

    fn unmount(&self, path: &Path) -> io::Result<()> {
        (**self).unmount(path)
    }

    fn force_unmount(&self, path: &Path) -> io::Result<()> {
        (**self).force_unmount(path)
    }
}

/// [`VolumeOps`] backed by the kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemVolumeOps;

impl VolumeOps for SystemVolumeOps {
    fn sync(&self) {
        nix::unistd::sync();
    }

    fn unmount(&self, path: &Path) -> io::Result<()> {
        umount(path).map_err(io::Error::from)
    }

    fn force_unmount(&self, path: &Path) -> io::Result<()> {
        umount2(path, MntFlags::MNT_FORCE).map_err(io::Error::from)
    }
}

/// Time source for retry loops and file names.
pub trait Clock: Send + Sync {
    /// Monotonic now.
    fn now(&self) -> Instant;

    /// Local wall clock time.
    fn wall_time(&self) -> NaiveDateTime;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn wall_time(&self) -> NaiveDateTime {
        (**self).wall_time()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}

/// [`Clock`] backed by the system clocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_time(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Retry policy for ejecting the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnmountPolicy {
    /// Once this much time has passed, a forced unmount is attempted.
    pub timeout: Duration,
    /// Pause between plain unmount attempts.
    pub retry_interval: Duration,
}

impl Default for UnmountPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(1000),
        }
    }
}

/// How an eject request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountOutcome {
    /// There was no removable volume to eject.
    NoVolume,
    /// A plain unmount succeeded on attempt number `attempts`.
    Unmounted {
        /// Plain unmount attempts issued, including the successful one.
        attempts: u32,
    },
    /// Plain unmounts kept failing; the forced unmount succeeded.
    Forced,
    /// The forced unmount failed too.
    Failed,
}

/// Storage settings.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Mount table to scan.
    pub mounts_path: PathBuf,
    /// Removable media root.
    pub media_root: String,
    /// Directory created on the volume for captures.
    pub app_dir: String,
    /// Eject retry policy.
    pub unmount: UnmountPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mounts_path: PathBuf::from(PROC_MOUNTS),
            media_root: MEDIA_ROOT.to_owned(),
            app_dir: filename::APP_DIR.to_owned(),
            unmount: UnmountPolicy::default(),
        }
    }
}

/// The removable volume as seen by the rest of the device.
///
/// Ejecting and writing a capture are serialised: an eject issued while a
/// still is being written waits for the write to finish.
pub struct Storage {
    locator: MountLocator,
    app_dir: String,
    policy: UnmountPolicy,
    ops: Box<dyn VolumeOps>,
    clock: Box<dyn Clock>,
    lock: Mutex<()>,
}

impl Storage {
    /// Storage over the live system.
    pub fn system(config: &StorageConfig) -> Self {
        Self::new(config, Box::new(SystemVolumeOps), Box::new(SystemClock))
    }

    /// Storage with explicit volume operations and clock.
    pub fn new(config: &StorageConfig, ops: Box<dyn VolumeOps>, clock: Box<dyn Clock>) -> Self {
        Self {
            locator: MountLocator::new(config.mounts_path.clone(), config.media_root.clone()),
            app_dir: config.app_dir.clone(),
            policy: config.unmount,
            ops,
            clock,
            lock: Mutex::new(()),
        }
    }

    /// Current removable volume.
    pub fn locate(&self) -> Option<PathBuf> {
        self.locator.locate()
    }

    /// Flush pending filesystem writes.
    pub fn flush(&self) {
        self.ops.sync();
    }

    /// Safely detach the removable volume.
    ///
    /// Blocks for up to the policy timeout plus one retry interval.
    pub fn unmount(&self) -> UnmountOutcome {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(mount_point) = self.locate() else {
            error!("cannot unmount drive: no mount location found");
            return UnmountOutcome::NoVolume;
        };

        info!(path = %mount_point.display(), "unmounting drive");
        self.ops.sync();

        let started = self.clock.now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match self.ops.unmount(&mount_point) {
                Ok(()) => {
                    info!(path = %mount_point.display(), attempts, "drive unmounted");
                    return UnmountOutcome::Unmounted { attempts };
                }
                Err(err) => err,
            };
            warn!(%err, attempts, "re-attempting to unmount device");

            self.clock.sleep(self.policy.retry_interval);

            if self.clock.now().duration_since(started) > self.policy.timeout {
                warn!(%err, "attempting to force unmount device");
                return match self.ops.force_unmount(&mount_point) {
                    Ok(()) => {
                        info!(path = %mount_point.display(), "drive force unmounted");
                        UnmountOutcome::Forced
                    }
                    Err(err) => {
                        error!(%err, path = %mount_point.display(), "failed to unmount device");
                        UnmountOutcome::Failed
                    }
                };
            }
        }
    }

    /// Destination for a capture taken now, creating the app directory if needed.
    pub fn next_capture_path(&self) -> Option<PathBuf> {
        let volume = self.locate()?;
        filename::generate(&volume, &self.app_dir, self.clock.wall_time())
    }

    /// Resolve a destination and hand it to `write`.
    ///
    /// Returns the path written, or `None` when there was no destination or
    /// `write` failed. Failures are logged, never propagated.
    pub fn save_capture<F>(&self, write: F) -> Option<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(path) = self.next_capture_path() else {
            error!("cannot save image, no mounted drive");
            return None;
        };

        info!(path = %path.display(), "saving image");
        match write(&path) {
            Ok(()) => Some(path),
            Err(err) => {
                error!(%err, path = %path.display(), "failed to save image");
                None
            }
        }
    }
}
