//! Huff/CDIC decompression (compression type 0x4448).
//!
//! A HUFF record holds the canonical-Huffman tables; one or more CDIC records
//! hold the phrase dictionary the codes index into. A phrase is either a
//! literal byte string or itself Huffman-packed and expanded on first use.

use mobi_core::error::{MobiError, Result};

use crate::palmdb::{be_u16, be_u32};

const HUFF_MAGIC: &[u8; 8] = b"HUFF\x00\x00\x00\x18";
const CDIC_MAGIC: &[u8; 8] = b"CDIC\x00\x00\x00\x10";

/// Nesting limit: a top-level record is depth 1, a packed phrase depth 2.
pub const MAX_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy)]
struct Dict1Entry {
    codelen: u32,
    term: bool,
    maxcode: u64,
}

#[derive(Debug, Clone)]
enum Phrase {
    Literal(Vec<u8>),
    Packed(Vec<u8>),
    /// Being expanded further up the stack
    Expanding,
}

/// Decoder state built from the HUFF and CDIC records.
#[derive(Debug, Clone)]
pub struct HuffCdicReader {
    dict1: Vec<Dict1Entry>,
    mincode: [u64; 33],
    maxcode: [u64; 33],
    dictionary: Vec<Phrase>,
}

impl HuffCdicReader {
    pub fn new(huff: &[u8], cdics: &[&[u8]]) -> Result<Self> {
        let mut reader = Self {
            dict1: Vec::with_capacity(256),
            mincode: [0; 33],
            maxcode: [0; 33],
            dictionary: Vec::new(),
        };
        reader.load_huff(huff)?;
        for cdic in cdics {
            reader.load_cdic(cdic)?;
        }
        Ok(reader)
    }

    pub fn phrase_count(&self) -> usize {
        self.dictionary.len()
    }

    fn load_huff(&mut self, huff: &[u8]) -> Result<()> {
        if huff.len() < 16 || &huff[..8] != HUFF_MAGIC {
            return Err(corrupt("invalid HUFF header"));
        }
        let off1 = be_u32(huff, 8).unwrap_or(0) as usize;
        let off2 = be_u32(huff, 12).unwrap_or(0) as usize;
        if huff.len() < off1 + 256 * 4 {
            return Err(corrupt("HUFF dict1 truncated"));
        }
        if huff.len() < off2 + 64 * 4 {
            return Err(corrupt("HUFF dict2 truncated"));
        }

        for i in 0..256 {
            let v = be_u32(huff, off1 + i * 4).unwrap_or(0);
            let codelen = v & 0x1F;
            let term = v & 0x80 != 0;
            if codelen == 0 {
                return Err(corrupt(&format!("HUFF dict1 entry {} has code length 0", i)));
            }
            if codelen <= 8 && !term {
                return Err(corrupt(&format!(
                    "HUFF dict1 entry {} is a short non-terminal code",
                    i
                )));
            }
            let maxcode = (((v >> 8) as u64 + 1) << (32 - codelen)) - 1;
            self.dict1.push(Dict1Entry {
                codelen,
                term,
                maxcode,
            });
        }

        for codelen in 1..=32usize {
            let pos = off2 + (codelen - 1) * 8;
            let min_raw = be_u32(huff, pos).unwrap_or(0) as u64;
            let max_raw = be_u32(huff, pos + 4).unwrap_or(0) as u64;
            self.mincode[codelen] = min_raw << (32 - codelen);
            self.maxcode[codelen] = ((max_raw + 1) << (32 - codelen)) - 1;
        }
        Ok(())
    }

    fn load_cdic(&mut self, cdic: &[u8]) -> Result<()> {
        if cdic.len() < 16 || &cdic[..8] != CDIC_MAGIC {
            return Err(corrupt("invalid CDIC header"));
        }
        let phrases = be_u32(cdic, 8).unwrap_or(0) as usize;
        let bits = be_u32(cdic, 12).unwrap_or(0);
        if bits > 16 {
            return Err(corrupt(&format!("CDIC code bits {} out of range", bits)));
        }
        let n = (1usize << bits).min(phrases.saturating_sub(self.dictionary.len()));

        for i in 0..n {
            let off = be_u16(cdic, 16 + i * 2)
                .ok_or_else(|| corrupt("CDIC offset table truncated"))? as usize;
            let blen = be_u16(cdic, 16 + off)
                .ok_or_else(|| corrupt(&format!("CDIC entry {} out of bounds", i)))?;
            let start = 18 + off;
            let end = (start + (blen & 0x7FFF) as usize).min(cdic.len());
            let bytes = cdic.get(start..end).unwrap_or_default().to_vec();
            self.dictionary.push(if blen & 0x8000 != 0 {
                Phrase::Literal(bytes)
            } else {
                Phrase::Packed(bytes)
            });
        }
        Ok(())
    }

    /// Decompress one text record.
    pub fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() * 3);
        self.unpack(data, 1, &mut out)?;
        Ok(out)
    }

    fn unpack(&mut self, data: &[u8], depth: usize, out: &mut Vec<u8>) -> Result<()> {
        let mut bits = BitReader::new(data);
        let mut bitsleft = data.len() as i64 * 8;

        loop {
            let code = bits.peek32() as u64;
            let entry = self.dict1[(code >> 24) as usize];
            let mut codelen = entry.codelen as usize;
            let mut maxcode = entry.maxcode;
            if !entry.term {
                while code < self.mincode[codelen] {
                    codelen += 1;
                    if codelen > 32 {
                        return Err(corrupt("Huffman code longer than 32 bits"));
                    }
                }
                maxcode = self.maxcode[codelen];
            }

            bits.consume(codelen as i32);
            bitsleft -= codelen as i64;
            if bitsleft < 0 {
                break;
            }

            let r = (maxcode.wrapping_sub(code) >> (32 - codelen)) as usize;
            match self.dictionary.get(r) {
                None => {
                    return Err(corrupt(&format!(
                        "dictionary index {} out of bounds ({} phrases)",
                        r,
                        self.dictionary.len()
                    )))
                }
                Some(Phrase::Literal(bytes)) => out.extend_from_slice(bytes),
                Some(Phrase::Expanding) => {
                    return Err(corrupt(&format!("phrase {} references itself", r)))
                }
                Some(Phrase::Packed(_)) => {
                    if depth >= MAX_DEPTH {
                        return Err(corrupt(&format!(
                            "phrase {} nests deeper than {} levels",
                            r, MAX_DEPTH
                        )));
                    }
                    let packed = match std::mem::replace(&mut self.dictionary[r], Phrase::Expanding) {
                        Phrase::Packed(bytes) => bytes,
                        _ => Vec::new(),
                    };
                    let mut expanded = Vec::new();
                    self.unpack(&packed, depth + 1, &mut expanded)?;
                    out.extend_from_slice(&expanded);
                    self.dictionary[r] = Phrase::Literal(expanded);
                }
            }
        }
        Ok(())
    }
}

fn corrupt(msg: &str) -> MobiError {
    MobiError::CorruptCompression(msg.to_string())
}

/// Big-endian bit reader over a 64-bit window; reads past the end yield zeros.
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    window: u64,
    /// Bits of the window below the current 32-bit code
    shift: i32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            window: read_u64_padded(data, 0),
            shift: 32,
        }
    }

    fn peek32(&mut self) -> u32 {
        if self.shift <= 0 {
            self.pos += 4;
            self.window = read_u64_padded(self.data, self.pos);
            self.shift += 32;
        }
        ((self.window >> self.shift) & 0xFFFF_FFFF) as u32
    }

    fn consume(&mut self, n: i32) {
        self.shift -= n;
    }
}

fn read_u64_padded(data: &[u8], pos: usize) -> u64 {
    let mut buf = [0u8; 8];
    if pos < data.len() {
        let n = (data.len() - pos).min(8);
        buf[..n].copy_from_slice(&data[pos..pos + n]);
    }
    u64::from_be_bytes(buf)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a HUFF record from 256 dict1 words and 32 (min, max) pairs.
    pub(crate) fn build_huff(dict1: &[u32; 256], dict2: &[(u32, u32); 32]) -> Vec<u8> {
        let mut out = HUFF_MAGIC.to_vec();
        out.extend_from_slice(&24u32.to_be_bytes());
        out.extend_from_slice(&(24 + 1024u32).to_be_bytes());
        out.extend_from_slice(&[0u8; 8]);
        for v in dict1 {
            out.extend_from_slice(&v.to_be_bytes());
        }
        for (min, max) in dict2 {
            out.extend_from_slice(&min.to_be_bytes());
            out.extend_from_slice(&max.to_be_bytes());
        }
        out
    }

    /// Build a CDIC record from `(bytes, terminal)` phrases.
    pub(crate) fn build_cdic(total_phrases: u32, bits: u32, phrases: &[(Vec<u8>, bool)]) -> Vec<u8> {
        let mut out = CDIC_MAGIC.to_vec();
        out.extend_from_slice(&total_phrases.to_be_bytes());
        out.extend_from_slice(&bits.to_be_bytes());
        let mut entries = Vec::new();
        let table_len = phrases.len() * 2;
        for (bytes, terminal) in phrases {
            out.extend_from_slice(&((table_len + entries.len()) as u16).to_be_bytes());
            let flag = if *terminal { 0x8000 } else { 0 };
            entries.extend_from_slice(&((bytes.len() as u16) | flag).to_be_bytes());
            entries.extend_from_slice(bytes);
        }
        out.extend_from_slice(&entries);
        out
    }

    /// Fixed 8-bit code: byte `c` selects phrase `255 - c`.
    pub(crate) fn byte_code_huff() -> Vec<u8> {
        let word = (255u32 << 8) | 0x80 | 8;
        build_huff(&[word; 256], &[(0, 0); 32])
    }

    /// Encode phrase indices for [`byte_code_huff`].
    pub(crate) fn encode_byte_code(indices: &[usize]) -> Vec<u8> {
        indices.iter().map(|&r| (255 - r) as u8).collect()
    }

    fn literal_phrases(n: usize) -> Vec<(Vec<u8>, bool)> {
        (0..n).map(|i| (vec![b'a' + (i % 26) as u8], true)).collect()
    }

    #[test]
    fn test_terminal_codes() {
        let mut phrases = literal_phrases(256);
        phrases[0] = (b"Hello".to_vec(), true);
        phrases[1] = (b", ".to_vec(), true);
        phrases[2] = (b"world".to_vec(), true);
        let cdic = build_cdic(256, 8, &phrases);
        let mut reader = HuffCdicReader::new(&byte_code_huff(), &[&cdic]).unwrap();
        assert_eq!(reader.phrase_count(), 256);

        let text = reader.decompress(&encode_byte_code(&[0, 1, 2])).unwrap();
        assert_eq!(text, b"Hello, world");
    }

    #[test]
    fn test_packed_phrase_expands_once() {
        let mut phrases = literal_phrases(256);
        phrases[0] = (b"ab".to_vec(), true);
        phrases[1] = (b"cd".to_vec(), true);
        // Phrase 2 is itself coded: phrases 0 then 1
        phrases[2] = (encode_byte_code(&[0, 1]), false);
        let cdic = build_cdic(256, 8, &phrases);
        let mut reader = HuffCdicReader::new(&byte_code_huff(), &[&cdic]).unwrap();

        let text = reader.decompress(&encode_byte_code(&[2, 0, 2])).unwrap();
        assert_eq!(text, b"abcdababcd");
        assert!(matches!(reader.dictionary[2], Phrase::Literal(ref b) if b == b"abcd"));
    }

    #[test]
    fn test_nesting_beyond_depth_cap() {
        let mut phrases = literal_phrases(256);
        phrases[0] = (b"x".to_vec(), true);
        phrases[1] = (encode_byte_code(&[0]), false);
        phrases[2] = (encode_byte_code(&[1]), false);
        let cdic = build_cdic(256, 8, &phrases);
        let mut reader = HuffCdicReader::new(&byte_code_huff(), &[&cdic]).unwrap();

        let err = reader.decompress(&encode_byte_code(&[2])).unwrap_err();
        assert_eq!(err.kind(), "CorruptCompression");
    }

    #[test]
    fn test_index_out_of_bounds() {
        let cdic = build_cdic(4, 8, &literal_phrases(4));
        let mut reader = HuffCdicReader::new(&byte_code_huff(), &[&cdic]).unwrap();
        assert_eq!(reader.phrase_count(), 4);
        assert!(reader.decompress(&encode_byte_code(&[10])).is_err());
    }

    #[test]
    fn test_bad_magic() {
        let cdic = build_cdic(1, 8, &literal_phrases(1));
        assert!(HuffCdicReader::new(b"HUFF\0\0\0\x10rest", &[&cdic]).is_err());
        let mut bad_cdic = cdic.clone();
        bad_cdic[0] = b'X';
        assert!(HuffCdicReader::new(&byte_code_huff(), &[&bad_cdic]).is_err());
    }

    #[test]
    fn test_zero_code_length_rejected() {
        let mut dict1 = [(255u32 << 8) | 0x80 | 8; 256];
        dict1[7] = 0x80;
        let huff = build_huff(&dict1, &[(0, 0); 32]);
        let err = HuffCdicReader::new(&huff, &[]).unwrap_err();
        assert!(matches!(err, MobiError::CorruptCompression(_)));
    }

    #[test]
    fn test_variable_length_codes_across_two_cdics() {
        // "1" (1 bit) selects phrase 256; "0" + 8 bits v selects phrase 255 - v.
        let mut dict1 = [0u32; 256];
        for (top, word) in dict1.iter_mut().enumerate() {
            *word = if top >= 0x80 {
                (256 << 8) | 0x80 | 1
            } else {
                9
            };
        }
        let mut dict2 = [(0u32, 0u32); 32];
        dict2[0] = (1, 256);
        dict2[8] = (0, 255);
        let huff = build_huff(&dict1, &dict2);

        let mut phrases = literal_phrases(256);
        phrases[255] = (b"zero".to_vec(), true);
        phrases[250] = (b"five".to_vec(), true);
        let first = build_cdic(257, 8, &phrases);
        let second = build_cdic(257, 8, &[(b" one ".to_vec(), true)]);
        let mut reader = HuffCdicReader::new(&huff, &[&first, &second]).unwrap();
        assert_eq!(reader.phrase_count(), 257);

        // 0 00000000 | 1 | 0 00000101 | 00000 padding; the padding is
        // shorter than the 9-bit code it would start, so it decodes nothing.
        let data = [0b0000_0000, 0b0100_0000, 0b1010_0000];
        let text = reader.decompress(&data).unwrap();
        assert_eq!(text, b"zero one five");
    }

    #[test]
    fn test_read_u64_padded() {
        assert_eq!(read_u64_padded(&[0x01], 0), 0x0100_0000_0000_0000);
        assert_eq!(read_u64_padded(&[0x01, 0x02], 4), 0);
    }
}
