//! Shared utilities for rprt.

use crate::protocol::attachment_mime;
use crate::types::{Attachment, Attribute};
use std::path::{Component, Path};

/// Shortest item name the reporting service accepts.
const MIN_NAME_LEN: usize = 3;
/// Longest item name the reporting service accepts.
const MAX_NAME_LEN: usize = 256;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parse a `"key:value;tag;key2:value2"` attribute list.
///
/// A segment with exactly one `:` becomes a key/value attribute; any other
/// segment becomes a value-only attribute. Empty segments are dropped.
pub fn parse_attributes(raw: &str) -> Vec<Attribute> {
    raw.split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let parts: Vec<&str> = segment.split(':').collect();
            match parts.as_slice() {
                [key, value] => Attribute::new(key.trim(), value.trim()),
                _ => Attribute::value(segment),
            }
        })
        .collect()
}

/// Pad or truncate an item name to the service's accepted length range.
///
/// Short names are padded with `.`; long names keep their last 256 chars.
pub fn format_name(name: &str) -> String {
    let len = name.chars().count();
    if len < MIN_NAME_LEN {
        let mut padded = name.to_string();
        padded.extend(std::iter::repeat_n('.', MIN_NAME_LEN - len));
        padded
    } else if len > MAX_NAME_LEN {
        name.chars().skip(len - MAX_NAME_LEN).collect()
    } else {
        name.to_string()
    }
}

/// Build the code reference of a test or suite.
///
/// The reference is the test file path relative to `base_dir`, with `/`
/// separators, followed by the node's title path.
pub fn code_ref(file: &str, title_path: &[String], base_dir: &Path) -> String {
    let path = Path::new(file);
    let relative = path.strip_prefix(base_dir).unwrap_or(path);
    let file_part = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");

    if title_path.is_empty() {
        file_part
    } else {
        format!("{file_part}/{}", title_path.join("/"))
    }
}

/// Read a file into a log attachment named after its base name.
pub fn load_attachment(path: &Path) -> std::io::Result<Attachment> {
    let content = std::fs::read(path)?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mime = attachment_mime(&name).to_string();
    Ok(Attachment { name, mime, content })
}
