//! Destination naming
//!
//! Stored file name = `<upload name>.<extension>` inside the upload
//! directory. The extension is everything after the first `.` of the
//! original filename, so `archive.tar.gz` keeps `tar.gz`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Where an accepted part is stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Base name from the naming hook (or the timestamp fallback)
    pub uploaded_name: String,
    /// Extension taken from the original filename, if any
    pub extension: Option<String>,
    /// Full path inside the upload directory
    pub path: PathBuf,
}

impl Destination {
    /// Compute the destination for a part.
    ///
    /// `name` is the naming hook's answer; `None`, or a name with nothing
    /// usable left after sanitising, takes the name produced by `fallback`.
    pub fn resolve(
        upload_path: &Path,
        name: Option<String>,
        filename: &str,
        fallback: impl FnOnce() -> String,
    ) -> Self {
        let uploaded_name = name
            .map(|n| sanitize_component(&n))
            .filter(|n| !n.is_empty() && n != "." && n != "..")
            .unwrap_or_else(fallback);

        let extension = file_extension(filename).map(sanitize_component);

        Self {
            path: upload_path.join(stored_file_name(&uploaded_name, extension.as_deref())),
            uploaded_name,
            extension,
        }
    }

    /// Same directory and extension, base name extended with `-<suffix>`
    pub fn with_suffix(&self, suffix: impl fmt::Display) -> Self {
        let uploaded_name = format!("{}-{}", self.uploaded_name, suffix);
        Self {
            path: self
                .path
                .with_file_name(stored_file_name(&uploaded_name, self.extension.as_deref())),
            uploaded_name,
            extension: self.extension.clone(),
        }
    }
}

fn stored_file_name(uploaded_name: &str, extension: Option<&str>) -> String {
    match extension {
        Some(ext) => format!("{}.{}", uploaded_name, ext),
        None => uploaded_name.to_string(),
    }
}

/// Extension after the first `.`; `None` when there is no dot or nothing follows it
pub fn file_extension(filename: &str) -> Option<&str> {
    filename
        .split_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

/// Keep `[A-Za-z0-9._-]`, replace everything else with `_`
pub fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Name used when the naming hook has no answer:
/// `<timestamp ms>-<request id prefix>-<part index>`.
///
/// Unique per part even when several parts, or several requests sharing an
/// upload directory, land in the same millisecond.
pub fn fallback_name(request_id: Uuid, part: u64) -> String {
    let request = request_id.simple().to_string();
    format!(
        "{}-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        &request[..8],
        part
    )
}
