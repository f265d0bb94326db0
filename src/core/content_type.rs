//! Extension-driven `Content-Type` resolution.
//!
//! The extension table from the settings is authoritative. A request path with an
//! extension wins, then the archive member name reported by the archive server,
//! then the `default` entry. Extensions missing from the table resolve to `None`
//! and are never guessed.
use std::collections::HashMap;

use crate::config::DEFAULT_MIME_KEY;

/// Response header carrying the archive member the archive server resolved.
pub const ARCHIVE_FILENAME_HEADER: &str = "ZIPSVR_FILENAME";

#[derive(Debug, Clone, Default)]
pub struct ContentTypeResolver {
    mime_types: HashMap<String, String>,
}

impl ContentTypeResolver {
    pub fn new(mime_types: HashMap<String, String>) -> Self {
        Self { mime_types }
    }

    /// Resolve the MIME type for a request path and an optional backend-reported
    /// filename (empty when the backend reported none).
    pub fn resolve(&self, request_path: &str, backend_filename: &str) -> Option<&str> {
        let key = extension(request_path)
            .or_else(|| extension(backend_filename))
            .unwrap_or(DEFAULT_MIME_KEY);
        self.mime_types.get(key).map(String::as_str)
    }
}

/// Text after the last `.` of the final path segment, if that segment has one.
/// A trailing dot yields `Some("")`.
fn extension(path: &str) -> Option<&str> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    file_name.rfind('.').map(|dot| &file_name[dot + 1..])
}
