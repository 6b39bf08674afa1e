//! MIME type resolution for ingested files.

use std::collections::HashMap;

/// Generic content type reported by stores that know nothing about the bytes.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Lookup table from file extension to MIME type.
pub trait MimeTable: Send + Sync {
    /// Look up the MIME type for a lowercase extension without the leading dot.
    fn lookup(&self, extension: &str) -> Option<&str>;
}

/// Built-in table covering the file types a CMS usually stores.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinMimeTable;

impl MimeTable for BuiltinMimeTable {
    fn lookup(&self, extension: &str) -> Option<&str> {
        let mime = match extension {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "svg" => "image/svg+xml",
            "bmp" => "image/bmp",
            "ico" => "image/x-icon",
            "tif" | "tiff" => "image/tiff",
            "avif" => "image/avif",
            "mp4" => "video/mp4",
            "webm" => "video/webm",
            "mov" => "video/quicktime",
            "mp3" => "audio/mpeg",
            "wav" => "audio/wav",
            "ogg" => "audio/ogg",
            "flac" => "audio/flac",
            "pdf" => "application/pdf",
            "json" => "application/json",
            "xml" => "application/xml",
            "zip" => "application/zip",
            "gz" => "application/gzip",
            "doc" => "application/msword",
            "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            "xls" => "application/vnd.ms-excel",
            "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "ppt" => "application/vnd.ms-powerpoint",
            "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
            "txt" => "text/plain",
            "csv" => "text/csv",
            "md" => "text/markdown",
            "html" | "htm" => "text/html",
            "css" => "text/css",
            "js" => "text/javascript",
            "woff" => "font/woff",
            "woff2" => "font/woff2",
            _ => return None,
        };
        Some(mime)
    }
}

/// Table backed by a map, for deployments that extend or override the defaults.
#[derive(Clone, Debug, Default)]
pub struct MapMimeTable {
    entries: HashMap<String, String>,
}

impl MapMimeTable {
    pub fn new(entries: HashMap<String, String>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(ext, mime)| (ext.trim_start_matches('.').to_lowercase(), mime))
            .collect();
        Self { entries }
    }
}

impl MimeTable for MapMimeTable {
    fn lookup(&self, extension: &str) -> Option<&str> {
        self.entries
            .get(extension)
            .map(String::as_str)
            .or_else(|| BuiltinMimeTable.lookup(extension))
    }
}

/// Extension of a file name, lowercased, without the dot.
///
/// Returns `None` for names without an extension or ending in a dot.
pub fn file_type(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.trim().is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Resolve the MIME type of an ingested file.
///
/// The store-reported type wins unless it is the generic octet-stream
/// default, in which case the file extension is looked up in `table`.
pub fn resolve_mime_type(
    content_type: Option<&str>,
    file_name: &str,
    table: &dyn MimeTable,
) -> String {
    let reported = content_type
        .map(str::trim)
        .filter(|ct| !ct.is_empty())
        .unwrap_or(OCTET_STREAM)
        .to_lowercase();

    if reported != OCTET_STREAM {
        return reported;
    }

    file_type(file_name)
        .and_then(|ext| table.lookup(&ext).map(str::to_string))
        .unwrap_or(reported)
}
