//! Output file helpers: name sanitizing and atomic writes.

use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Turn a PalmDB name into a safe file stem.
///
/// Non-ASCII characters and `\x08`, `\x15`, `\0` are dropped, path
/// separators become `_`. An empty result falls back to `dummy`.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii() && !matches!(c, '\x08' | '\x15' | '\0'))
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "dummy".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Write `data` to `path` via a temp file in the same directory, then rename.
///
/// Readers never observe a partially written file.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
