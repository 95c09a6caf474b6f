//! Artifact file naming.
//!
//! Names have the form `<prefix>-<YYYYmmddHHMMSS>[.ext]`. Stamps handed out by one
//! process are strictly increasing, so two artifacts created within the same second
//! still get distinct names and sort chronologically.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

static TIME_FORMAT: &str = "%Y%m%d%H%M%S";
static LAST_ISSUED: Mutex<i64> = Mutex::new(i64::MIN);

fn next_stamp(now: DateTime<Utc>) -> DateTime<Utc> {
    let mut last = LAST_ISSUED.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let secs = now.timestamp().max(last.saturating_add(1));
    *last = secs;
    DateTime::from_timestamp(secs, 0).unwrap_or(now)
}

pub fn generate_name(prefix: &str, ext: Option<&str>) -> String {
    let stamp = next_stamp(Utc::now()).format(TIME_FORMAT);
    match ext {
        Some(ext) if !ext.is_empty() => format!("{prefix}-{stamp}.{ext}"),
        _ => format!("{prefix}-{stamp}"),
    }
}

pub fn generate_path<P: AsRef<Path>>(dir: P, prefix: &str, ext: Option<&str>) -> PathBuf {
    dir.as_ref().join(generate_name(prefix, ext))
}

/// File name component of an artifact path, used as its name in a store.
pub fn base_name<P: AsRef<Path>>(path: P) -> Option<String> {
    path.as_ref()
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}
