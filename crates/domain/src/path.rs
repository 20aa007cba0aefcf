//! Sandbox-relative path handling.
//!
//! Every file path stored in the project context is relative: no leading
//! slash, no `..` segments. Tool inputs are normalized through here before
//! they touch the sandbox or the store.

use crate::error::{Error, Result};

/// Normalize a file path to the canonical sandbox-relative form.
///
/// Strips leading slashes and `./` prefixes, collapses empty segments, and
/// rejects any path containing a `..` segment.
pub fn normalize_rel_path(path: &str) -> Result<String> {
    let trimmed = path.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(Error::Validation("empty file path".into()));
    }

    let mut segments = Vec::new();
    for seg in trimmed.split('/') {
        match seg {
            "" | "." => continue,
            ".." => {
                return Err(Error::Validation(format!(
                    "path '{path}' contains a '..' segment"
                )))
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(Error::Validation("empty file path".into()));
    }
    Ok(segments.join("/"))
}

/// Best-effort language tag from a file extension, recorded alongside file
/// contents so the editor can pick a highlighter without re-deriving it.
pub fn language_for_path(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or_default();
    match ext {
        "ts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "json" => "json",
        "css" => "css",
        "html" => "html",
        "md" => "markdown",
        "svg" => "xml",
        "yml" | "yaml" => "yaml",
        _ => "plaintext",
    }
}
