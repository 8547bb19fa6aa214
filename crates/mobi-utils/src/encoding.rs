//! Character encoding lookup and conversion for MOBI text.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

/// Map a MOBI header text-encoding field to a charset.
///
/// Only the two codepages MOBI writers actually emit are recognised.
pub fn encoding_for_codepage(codepage: u32) -> Option<&'static Encoding> {
    match codepage {
        1252 => Some(WINDOWS_1252),
        65001 => Some(UTF_8),
        _ => None,
    }
}

/// Look up a charset by a user-supplied label ("cp1252", "utf-8", "latin1", ...).
pub fn encoding_for_label(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Decode bytes with the given charset, replacing malformed sequences.
pub fn decode_with(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (result, _) = encoding.decode_without_bom_handling(bytes);
    result.into_owned()
}

/// Decode bytes using a charset label. Returns None for unknown labels.
pub fn decode_with_encoding(bytes: &[u8], encoding_name: &str) -> Option<String> {
    let encoding = encoding_for_label(encoding_name)?;
    Some(decode_with(bytes, encoding))
}

/// Whether the charset is UTF-8.
pub fn is_utf8(encoding: &'static Encoding) -> bool {
    encoding == UTF_8
}
