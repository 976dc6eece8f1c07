use std::path::Path;

use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

const WINDOWS_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Extracts the file extension from a filename and converts it to lowercase.
pub fn get_file_extension(filename: &str) -> Option<String> {
    Path::new(filename) // treats string as filesystem path.
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Reduces a client supplied filename to something safe to display and to
/// embed in a stored name.
///
/// Accents are folded to their ASCII base letter (`é` → `e`). Path
/// separators and whitespace runs become `_`, anything else outside
/// `[A-Za-z0-9._-]` is dropped and leading/trailing `.`/`_` are trimmed, so
/// `"../../etc/passwd"` becomes `"etc_passwd"`. Windows device names get a
/// `_` prefix. May return an empty string.
pub fn secure_filename(filename: &str) -> String {
    // NFKD splits accented letters into base letter + combining mark
    let spaced: String = filename
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let safe = spaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect::<String>()
        .trim_matches(|c: char| c == '.' || c == '_')
        .to_string();

    let stem = safe.split('.').next().unwrap_or_default().to_ascii_uppercase();
    if WINDOWS_DEVICE_NAMES.contains(&stem.as_str()) {
        format!("_{}", safe)
    } else {
        safe
    }
}

/// Generates a collision-free storage name. The random prefix makes names
/// unique; the sanitized original is kept only for readability on disk.
pub fn generate_stored_name(safe_name: &str) -> String {
    format!("{}_{}", Uuid::new_v4().simple(), safe_name)
}

/// `None` means every extension is accepted.
pub fn is_extension_allowed(filename: &str, allowed: Option<&[String]>) -> bool {
    match allowed {
        None => true,
        Some(allowed) => get_file_extension(filename)
            .map(|ext| allowed.contains(&ext))
            .unwrap_or(false),
    }
}

/// `Content-Disposition` value that makes clients save the file as `filename`.
pub fn attachment_disposition(filename: &str) -> String {
    let escaped = filename.replace('\\', "\\\\").replace('"', "\\\"");
    format!("attachment; filename=\"{}\"", escaped)
}

/// Turns a search term into a `LIKE` pattern that matches it as a literal
/// substring. Pair with `ESCAPE '\'`.
pub fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}
