//! Timestamped destinations for still captures.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, error};

/// Directory created on the removable volume for captures.
pub const APP_DIR: &str = "micropiscope";

/// strftime pattern for capture names, one second resolution.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Extension of capture files.
pub const EXTENSION: &str = "jpg";

/// Build `<volume>/<app_dir>/<timestamp>.jpg`, creating `app_dir` if missing.
///
/// Returns `None` if the directory cannot be created. A second capture in
/// the same second gets a `-1`, `-2`, ... suffix instead of overwriting the
/// first.
pub fn generate(volume: &Path, app_dir: &str, now: NaiveDateTime) -> Option<PathBuf> {
    let dir = volume.join(app_dir);

    if !dir.is_dir() {
        if let Err(err) = fs::create_dir(&dir) {
            error!(path = %dir.display(), %err, "cannot create capture directory");
            return None;
        }
        debug!(path = %dir.display(), "created capture directory");
    }

    let stamp = now.format(TIMESTAMP_FORMAT).to_string();
    let path = (0u32..)
        .map(|n| {
            if n == 0 {
                dir.join(format!("{stamp}.{EXTENSION}"))
            } else {
                dir.join(format!("{stamp}-{n}.{EXTENSION}"))
            }
        })
        .find(|candidate| !candidate.exists())?;

    Some(path)
}
