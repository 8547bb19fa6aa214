//! Text record assembly: trailer stripping, decompression and byte cleanup.

use std::collections::BTreeSet;

use encoding_rs::Encoding;

use mobi_core::error::{MobiError, Result};
use mobi_core::plugin::{DecodeContext, Log};
use mobi_utils::encoding::{decode_with, is_utf8};
use mobi_utils::xml::escape_xml_text;

use crate::header::{BookHeader, Compression};
use crate::huffcdic::HuffCdicReader;
use crate::palmdb::PalmDb;
use crate::palmdoc;

/// The concatenated, decompressed text of a book.
#[derive(Debug, Clone, Default)]
pub struct TextStream {
    pub bytes: Vec<u8>,
    /// Sections consumed as header, text or Huff tables; never images.
    pub processed: BTreeSet<usize>,
}

/// Number of trailing bytes to strip from a text record, or `None` when the
/// trailers the flags describe cannot fit in the record.
///
/// Each set bit of `extra_flags >> 1` is one backward varint giving the size
/// of a trailer; bit 0 adds `(byte & 3) + 1` multibyte-overlap bytes.
pub fn trailing_entry_size(record: &[u8], extra_flags: u16) -> Option<usize> {
    let size = record.len();
    let mut num = 0usize;

    let mut flags = extra_flags >> 1;
    while flags != 0 {
        if flags & 1 != 0 {
            if num >= size {
                return None;
            }
            num += backward_varint(&record[..size - num]);
            if num > size {
                return None;
            }
        }
        flags >>= 1;
    }

    if extra_flags & 1 != 0 {
        if num >= size {
            return None;
        }
        num += (record[size - num - 1] & 0x3) as usize + 1;
    }

    (num <= size).then_some(num)
}

/// Varint read from the end of `data`: the last byte is least significant,
/// seven bits per byte, stopping at a byte with the high bit set.
fn backward_varint(data: &[u8]) -> usize {
    let mut result = 0usize;
    let mut bitpos = 0;
    for &v in data.iter().rev() {
        result |= ((v & 0x7F) as usize) << bitpos;
        bitpos += 7;
        if v & 0x80 != 0 || bitpos >= 28 {
            break;
        }
    }
    result
}

/// Check every text record against the header's extra-data flags; return
/// the flags to use, 0 when any record cannot hold its trailers.
pub fn detect_extra_flags(pdb: &PalmDb, header: &BookHeader, log: &dyn Log) -> u16 {
    if header.extra_flags == 0 {
        return 0;
    }
    for i in text_record_range(pdb, header) {
        let Some(record) = pdb.section(i) else { break };
        if trailing_entry_size(record, header.extra_flags).is_none() {
            log.warn(&format!(
                "Extra data flags {:#x} do not fit text record {}; ignoring them",
                header.extra_flags, i
            ));
            return 0;
        }
    }
    header.extra_flags
}

fn text_record_range(pdb: &PalmDb, header: &BookHeader) -> std::ops::Range<usize> {
    1..(header.text_record_count + 1).min(pdb.section_count())
}

/// Strip trailers from, and decompress, every text record.
pub fn extract_text(
    pdb: &PalmDb,
    header: &BookHeader,
    extra_flags: u16,
    ctx: &DecodeContext<'_>,
) -> Result<TextStream> {
    let mut processed: BTreeSet<usize> = (0..=header.text_record_count).collect();

    let compression = header.compression()?;
    let mut huff = match compression {
        Compression::HuffCdic => {
            let end = header.huff_offset + header.huff_count;
            let tables: Vec<&[u8]> = (header.huff_offset..end)
                .map(|i| {
                    pdb.section(i).ok_or_else(|| {
                        MobiError::CorruptCompression(format!("Huff/CDIC section {} is missing", i))
                    })
                })
                .collect::<Result<_>>()?;
            let (huff, cdics) = tables.split_first().ok_or_else(|| {
                MobiError::CorruptCompression("book declares no HUFF record".to_string())
            })?;
            processed.extend(header.huff_offset..end);
            Some(HuffCdicReader::new(huff, cdics)?)
        }
        _ => None,
    };

    let range = text_record_range(pdb, header);
    let total = range.len().max(1);
    let mut bytes = Vec::with_capacity(total * header.text_record_size.max(4096));
    let mut warned = false;

    for (n, i) in range.enumerate() {
        let record = pdb.section(i).unwrap_or_default();
        let trail = match trailing_entry_size(record, extra_flags) {
            Some(size) => size,
            None => {
                if !warned {
                    ctx.log.warn(&format!(
                        "Trailing entries overrun text record {}; keeping the record whole",
                        i
                    ));
                    warned = true;
                }
                0
            }
        };
        let payload = &record[..record.len() - trail];

        match compression {
            Compression::None => bytes.extend_from_slice(payload),
            Compression::PalmDoc => palmdoc::decompress_into(payload, &mut bytes)?,
            Compression::HuffCdic => {
                if let Some(reader) = huff.as_mut() {
                    bytes.extend_from_slice(&reader.decompress(payload)?);
                }
            }
        }

        ctx.check_cancelled()?;
        ctx.report_progress(
            0.05 + 0.55 * (n + 1) as f64 / total as f64,
            "Decompressing text",
        );
    }

    clean_text(&mut bytes, header);
    Ok(TextStream { bytes, processed })
}

fn clean_text(bytes: &mut Vec<u8>, header: &BookHeader) {
    if bytes.last() == Some(&b'#') {
        bytes.pop();
    }
    if header.ancient && !has_html_prefix(bytes) {
        *bytes = replace_bytes(bytes, b"\r ", b"\n\n ");
    }
    if header.encoding == encoding_rs::WINDOWS_1252 {
        bytes.retain(|&b| b != 0 && b != 0x1E && b != 0x02);
    } else {
        bytes.retain(|&b| b != 0);
    }
}

/// Whether `<html` occurs, in any case, within the first 300 bytes.
pub fn has_html_prefix(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(300)];
    head.windows(5).any(|w| w.eq_ignore_ascii_case(b"<html"))
}

fn replace_bytes(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(from) {
            out.extend_from_slice(to);
            i += from.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

/// Decode markup bytes to a string. For UTF-8, a stray `0xEF` that does not
/// lead a three-byte sequence is dropped first.
pub fn decode_markup(bytes: &[u8], encoding: &'static Encoding) -> String {
    if !is_utf8(encoding) {
        return decode_with(bytes, encoding);
    }
    let is_cont = |b: Option<&u8>| matches!(b, Some(0x80..=0xBF));
    let mut cleaned = Vec::with_capacity(bytes.len());
    for (i, &b) in bytes.iter().enumerate() {
        if b == 0xEF && !(is_cont(bytes.get(i + 1)) && is_cont(bytes.get(i + 2))) {
            continue;
        }
        cleaned.push(b);
    }
    decode_with(&cleaned, encoding)
}

/// Wrap plain PalmDOC text in a minimal document, one `<p>` per
/// blank-line separated paragraph.
pub fn wrap_plain_text(text: &str, title: &str) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(normalized.len() + 128);
    out.push_str("<html><head><title>");
    out.push_str(&escape_xml_text(title));
    out.push_str("</title></head><body>\n");
    for para in normalized.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        out.push_str("<p>");
        out.push_str(&escape_xml_text(para).replace('\n', "<br />\n"));
        out.push_str("</p>\n");
    }
    out.push_str("</body></html>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::tests::{build_header, HeaderSpec};
    use crate::header::{BookType, read_book_header};
    use crate::huffcdic::tests::{build_cdic, byte_code_huff, encode_byte_code};
    use crate::images::ImageCrateCodec;
    use crate::palmdb::tests::build_pdb;
    use mobi_core::cancel::CancellationToken;
    use mobi_core::diagnostics::MemoryLog;
    use mobi_core::options::DecodeOptions;

    fn header_for(pdb: &PalmDb) -> BookHeader {
        read_book_header(pdb, &DecodeOptions::default(), &MemoryLog::new()).unwrap()
    }

    #[test]
    fn test_trailer_sizes() {
        // Multibyte bit plus one varint trailer
        let mut rec = vec![b'x'; 100];
        rec[96] = 0x01;
        rec[99] = 0x83;
        assert_eq!(trailing_entry_size(&rec, 0b011), Some(5));
        assert_eq!(100 - trailing_entry_size(&rec, 0b011).unwrap(), 95);

        // No flags
        assert_eq!(trailing_entry_size(&rec, 0), Some(0));

        // Multibyte only
        let rec = b"abc\x02".to_vec();
        assert_eq!(trailing_entry_size(&rec, 1), Some(3));
    }

    #[test]
    fn test_multi_byte_varint() {
        // Read backwards: 0x05, then 0x01, then the stop byte 0x80
        let mut rec = vec![0u8; 200];
        rec[197] = 0x80;
        rec[198] = 0x01;
        rec[199] = 0x05;
        assert_eq!(backward_varint(&rec), 5 | (1 << 7));
    }

    #[test]
    fn test_impossible_trailer() {
        let rec = vec![0x10, 0x90];
        assert_eq!(trailing_entry_size(&rec, 0b10), None);
    }

    #[test]
    fn test_extract_palmdoc_records() {
        let header = build_header(&HeaderSpec {
            records: 2,
            extra_flags: 0b10,
            ..Default::default()
        });
        let mut rec1 = palmdoc::compress(b"<html><body>Hello ");
        rec1.push(0x81);
        let mut rec2 = palmdoc::compress(b"world</body></html>#");
        rec2.extend_from_slice(&[0xAA, 0xBB, 0x83]);
        let pdb = PalmDb::parse(build_pdb("b", b"BOOKMOBI", &[header, rec1, rec2, b"img".to_vec()]))
            .unwrap();
        let header = header_for(&pdb);

        let log = MemoryLog::new();
        let codec = ImageCrateCodec::default();
        let ctx = DecodeContext::new(&log, &codec);
        let text = extract_text(&pdb, &header, header.extra_flags, &ctx).unwrap();
        assert_eq!(text.bytes, b"<html><body>Hello world</body></html>");
        assert_eq!(text.processed.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_extract_huff_records_marks_tables_processed() {
        let mut phrases: Vec<(Vec<u8>, bool)> = (0..256).map(|_| (b"?".to_vec(), true)).collect();
        phrases[0] = (b"<p>".to_vec(), true);
        phrases[1] = (b"Huff".to_vec(), true);
        phrases[2] = (b"</p>".to_vec(), true);
        let cdic = build_cdic(256, 8, &phrases);
        let header = build_header(&HeaderSpec {
            compression: 0x4448,
            records: 1,
            huff: (2, 2),
            first_image: 4,
            ..Default::default()
        });
        let text_rec = encode_byte_code(&[0, 1, 2]);
        let pdb = PalmDb::parse(build_pdb(
            "b",
            b"BOOKMOBI",
            &[header, text_rec, byte_code_huff(), cdic],
        ))
        .unwrap();
        let header = header_for(&pdb);

        let log = MemoryLog::new();
        let codec = ImageCrateCodec::default();
        let ctx = DecodeContext::new(&log, &codec);
        let text = extract_text(&pdb, &header, 0, &ctx).unwrap();
        assert_eq!(text.bytes, b"<p>Huff</p>");
        assert!(text.processed.contains(&2));
        assert!(text.processed.contains(&3));
    }

    #[test]
    fn test_cp1252_cleanup_and_cancellation() {
        let header = build_header(&HeaderSpec {
            compression: 1,
            codepage: 1252,
            ..Default::default()
        });
        let pdb = PalmDb::parse(build_pdb(
            "b",
            b"BOOKMOBI",
            &[header, b"a\x1eb\x02c\x00d".to_vec()],
        ))
        .unwrap();
        let header = header_for(&pdb);

        let log = MemoryLog::new();
        let codec = ImageCrateCodec::default();
        let ctx = DecodeContext::new(&log, &codec);
        let text = extract_text(&pdb, &header, 0, &ctx).unwrap();
        assert_eq!(text.bytes, b"abcd");

        let token = CancellationToken::new();
        token.cancel();
        let ctx = DecodeContext::new(&log, &codec).with_cancel(token);
        let err = extract_text(&pdb, &header, 0, &ctx).unwrap_err();
        assert!(matches!(err, MobiError::Cancelled));
    }

    #[test]
    fn test_overrunning_trailer_warns_once() {
        let header = build_header(&HeaderSpec {
            compression: 1,
            records: 2,
            extra_flags: 0b10,
            ..Default::default()
        });
        let pdb = PalmDb::parse(build_pdb(
            "b",
            b"BOOKMOBI",
            &[header, vec![b'a', 0xFF], vec![b'b', 0xFF]],
        ))
        .unwrap();
        let header = header_for(&pdb);

        let log = MemoryLog::new();
        let codec = ImageCrateCodec::default();
        let ctx = DecodeContext::new(&log, &codec);
        let text = extract_text(&pdb, &header, header.extra_flags, &ctx).unwrap();
        assert_eq!(text.bytes, b"a\xffb\xff");
        assert_eq!(log.messages(log::Level::Warn).len(), 1);

        assert_eq!(detect_extra_flags(&pdb, &header, &log), 0);
    }

    #[test]
    fn test_ancient_text_line_breaks() {
        let mut raw = vec![0u8; 16];
        raw[0..2].copy_from_slice(&1u16.to_be_bytes());
        raw[8..10].copy_from_slice(&1u16.to_be_bytes());
        let pdb = PalmDb::parse(build_pdb(
            "b",
            b"TEXtREAd",
            &[raw, b"one\r two".to_vec()],
        ))
        .unwrap();
        let header = header_for(&pdb);
        assert_eq!(header.book_type, BookType::TextRead);

        let log = MemoryLog::new();
        let codec = ImageCrateCodec::default();
        let ctx = DecodeContext::new(&log, &codec);
        let text = extract_text(&pdb, &header, 0, &ctx).unwrap();
        assert_eq!(text.bytes, b"one\n\n two");
        assert!(!has_html_prefix(&text.bytes));
    }

    #[test]
    fn test_decode_markup_strips_stray_ef() {
        let bytes = b"a\xefb \xef\xbb\xbfc";
        assert_eq!(decode_markup(bytes, encoding_rs::UTF_8), "ab \u{feff}c");
        assert_eq!(
            decode_markup(b"caf\xe9", encoding_rs::WINDOWS_1252),
            "caf\u{e9}"
        );
    }

    #[test]
    fn test_wrap_plain_text() {
        let html = wrap_plain_text("First <para>\n\n Second & last", "T");
        assert!(html.starts_with("<html><head><title>T</title>"));
        assert!(html.contains("<p>First &lt;para&gt;</p>"));
        assert!(html.contains("<p>Second &amp; last</p>"));
    }
}
