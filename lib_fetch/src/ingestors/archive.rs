//! Archive layout: `<root>/<YYYY>/<MM>/<remote dir>/<DD>-<HH><mm>-<name>`.
//!
//! The date parts come from the file's remote modification time (UTC), or
//! from the time of download when the server gave none. Path segments are
//! stored under their remote (percent-decoded) names.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use url::Url;

use crate::retrieve::RemoteFileRecord;

/// Where `file` is archived under `root`. `None` when the href has no file name.
pub fn archive_path(root: &Path, file: &RemoteFileRecord, now: DateTime<Utc>) -> Option<PathBuf> {
    let url = Url::parse(&file.href).ok()?;
    let mut segments: Vec<String> = url
        .path_segments()?
        .map(local_segment)
        .filter(|s| !s.is_empty() && s != "." && s != "..")
        .collect();
    let name = segments.pop()?;

    let stamp = file.modified.unwrap_or(now);
    let mut path = root.join(stamp.format("%Y").to_string()).join(stamp.format("%m").to_string());
    for segment in segments {
        path.push(segment);
    }
    path.push(format!("{}-{}", stamp.format("%d-%H%M"), name));
    Some(path)
}

/// Undoes percent-escapes; a decoded `/` must not open a new directory.
fn local_segment(segment: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(segment.as_bytes())).replace('/', "_")
}
