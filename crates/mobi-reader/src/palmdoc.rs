//! PalmDOC LZ77 codec (compression type 2).
//!
//! Opcode classes:
//! - `0x01..=0x08`: copy the next `n` bytes literally
//! - `0x00`, `0x09..=0x7F`: literal byte
//! - `0x80..=0xBF`: with the next byte, a 14-bit word; distance = word >> 3,
//!   length = (word & 7) + 3
//! - `0xC0..=0xFF`: a space followed by `byte ^ 0x80`

use mobi_core::error::{MobiError, Result};

/// Largest back-reference distance expressible in 11 bits.
const MAX_DISTANCE: usize = 2047;
const MIN_MATCH: usize = 3;
const MAX_MATCH: usize = 10;

/// Decompress one PalmDOC record.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(input.len() * 2);
    decompress_into(input, &mut output)?;
    Ok(output)
}

/// Decompress one record, appending to `output`. Back-references resolve
/// against bytes produced by this call only.
pub fn decompress_into(input: &[u8], output: &mut Vec<u8>) -> Result<()> {
    let base = output.len();
    let mut i = 0;

    while i < input.len() {
        let c = input[i];
        i += 1;

        match c {
            0x01..=0x08 => {
                let count = c as usize;
                let run = input.get(i..i + count).ok_or_else(|| {
                    MobiError::CorruptCompression(format!(
                        "literal run of {} at byte {} overruns the record",
                        count,
                        i - 1
                    ))
                })?;
                output.extend_from_slice(run);
                i += count;
            }
            0x00 | 0x09..=0x7F => output.push(c),
            0x80..=0xBF => {
                let next = *input.get(i).ok_or_else(|| {
                    MobiError::CorruptCompression(format!(
                        "back-reference at byte {} is truncated",
                        i - 1
                    ))
                })?;
                i += 1;

                let word = (((c & 0x3F) as usize) << 8) | next as usize;
                let distance = word >> 3;
                let length = (word & 7) + 3;
                let produced = output.len() - base;
                if distance == 0 || distance > produced {
                    return Err(MobiError::CorruptCompression(format!(
                        "back-reference distance {} with {} bytes decoded",
                        distance, produced
                    )));
                }
                // Byte by byte: a run may reference bytes it is producing
                for _ in 0..length {
                    let byte = output[output.len() - distance];
                    output.push(byte);
                }
            }
            0xC0..=0xFF => {
                output.push(b' ');
                output.push(c ^ 0x80);
            }
        }
    }

    Ok(())
}

/// PalmDOC compression: greedy longest match within the 2047-byte window,
/// space+letter packing, binary runs of up to eight bytes.
pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        if let Some((distance, length)) = find_match(input, i) {
            let word = (distance << 3) | (length - MIN_MATCH);
            output.push(0x80 | (word >> 8) as u8);
            output.push((word & 0xFF) as u8);
            i += length;
            continue;
        }

        let c = input[i];
        i += 1;

        if c == b' ' && i < input.len() && (0x40..=0x7F).contains(&input[i]) {
            output.push(input[i] ^ 0x80);
            i += 1;
            continue;
        }

        if c == 0 || (0x09..=0x7F).contains(&c) {
            output.push(c);
            continue;
        }

        // Binary run: bytes that would otherwise read as opcodes
        let start = i - 1;
        while i < input.len() && i - start < 8 {
            let next = input[i];
            if next == 0 || (0x09..=0x7F).contains(&next) {
                break;
            }
            i += 1;
        }
        output.push((i - start) as u8);
        output.extend_from_slice(&input[start..i]);
    }

    output
}

/// Longest earlier occurrence of the bytes at `pos`, as `(distance, length)`.
fn find_match(data: &[u8], pos: usize) -> Option<(usize, usize)> {
    let max_len = MAX_MATCH.min(data.len() - pos);
    if max_len < MIN_MATCH {
        return None;
    }

    let window_start = pos.saturating_sub(MAX_DISTANCE);
    let mut best: Option<(usize, usize)> = None;
    for start in (window_start..pos).rev() {
        let mut len = 0;
        while len < max_len && data[start + len] == data[pos + len] {
            len += 1;
        }
        if len >= MIN_MATCH && best.map_or(true, |(_, l)| len > l) {
            best = Some((pos - start, len));
            if len == max_len {
                break;
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_run() {
        assert_eq!(decompress(&[0x05, b'H', b'e', b'l', b'l', b'o']).unwrap(), b"Hello");
    }

    #[test]
    fn test_plain_literals() {
        assert_eq!(decompress(b"Hello\x00World").unwrap(), b"Hello\x00World");
    }

    #[test]
    fn test_space_prefixed_byte() {
        assert_eq!(decompress(&[0xC1]).unwrap(), b" A");
    }

    #[test]
    fn test_back_reference_with_overlap() {
        let mut input = b"abcabc".to_vec();
        input.extend_from_slice(&[0x80, 0x23]);
        assert_eq!(decompress(&input).unwrap(), b"abcabccabcab");
    }

    #[test]
    fn test_distance_out_of_range() {
        // distance 4 with only 2 bytes decoded
        let err = decompress(&[b'a', b'b', 0x80, 0x23]).unwrap_err();
        assert_eq!(err.kind(), "CorruptCompression");
    }

    #[test]
    fn test_zero_distance_rejected() {
        assert!(decompress(&[b'a', 0x80, 0x02]).is_err());
    }

    #[test]
    fn test_truncated_streams() {
        assert!(decompress(&[0x04, b'a']).is_err());
        assert!(decompress(&[b'a', 0x80]).is_err());
    }

    #[test]
    fn test_records_do_not_share_history() {
        let mut out = b"abcdef".to_vec();
        // Valid only if history from the previous record were visible
        assert!(decompress_into(&[0x80, 0x23], &mut out).is_err());
    }

    #[test]
    fn test_compress_round_trip_text() {
        let original = b"Hello, World! This is a test of PalmDOC compression. \
                         This is a test of PalmDOC compression, repeated.";
        let compressed = compress(original);
        assert!(compressed.len() < original.len());
        assert_eq!(decompress(&compressed).unwrap(), original.to_vec());
    }

    #[test]
    fn test_compress_round_trip_binary() {
        let original: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        let compressed = compress(&original);
        assert_eq!(decompress(&compressed).unwrap(), original);
    }

    #[test]
    fn test_compress_round_trip_markup() {
        let original = "<p height=\"1em\">Caf\u{e9} \u{2014} d\u{e9}j\u{e0} vu</p>\n".repeat(40);
        let compressed = compress(original.as_bytes());
        assert_eq!(decompress(&compressed).unwrap(), original.as_bytes());
    }

    #[test]
    fn test_compress_long_run_uses_overlap() {
        let original = vec![b'z'; 64];
        let compressed = compress(&original);
        assert!(compressed.len() < 20);
        assert_eq!(decompress(&compressed).unwrap(), original);
    }
}
