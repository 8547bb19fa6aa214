//! MOBI book header, read from section 0.
//!
//! Covers the PalmDOC prelude (compression, record counts, encryption), the
//! MOBI sub-header starting at offset 16, and joint MOBI6/KF8 detection.

use encoding_rs::Encoding;

use mobi_core::error::{MobiError, Result};
use mobi_core::options::DecodeOptions;
use mobi_core::plugin::Log;
use mobi_utils::encoding::{decode_with, encoding_for_codepage, encoding_for_label};

use crate::exth::{ExthHeader, NULL_INDEX};
use crate::palmdb::{be_u16, be_u32, PalmDb};

/// Header lengths outside this range carry no trustworthy extra-data flags.
const MIN_EXTRA_FLAGS_HEADER: usize = 0xE4;
const MAX_EXTRA_FLAGS_HEADER: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookType {
    /// `BOOKMOBI`
    Mobi,
    /// `TEXTREAD`: plain PalmDOC
    TextRead,
}

impl BookType {
    pub fn from_identifier(ident: &[u8; 8]) -> Result<Self> {
        match ident {
            b"BOOKMOBI" => Ok(BookType::Mobi),
            b"TEXTREAD" => Ok(BookType::TextRead),
            other => Err(MobiError::UnknownFormat(format!(
                "identifier {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    PalmDoc,
    HuffCdic,
}

impl Compression {
    pub fn from_code(code: u16) -> Result<Self> {
        match code {
            1 => Ok(Compression::None),
            2 => Ok(Compression::PalmDoc),
            0x4448 => Ok(Compression::HuffCdic),
            other => Err(MobiError::UnsupportedCompression(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kf8Type {
    Standalone,
    Joint,
}

/// KF8 facts recorded for downstream consumers. The KF8 half is not decoded.
#[derive(Debug, Clone)]
pub struct Kf8Info {
    pub kind: Kf8Type,
    /// Section index of the `BOUNDARY` record
    pub boundary: Option<usize>,
    /// Inner header of a joint file: outer `first_image_index`, `huff_offset`
    /// rebased into the outer section numbering
    pub header: Option<Box<BookHeader>>,
}

#[derive(Debug, Clone)]
pub struct BookHeader {
    pub book_type: BookType,
    pub compression_code: u16,
    pub text_record_count: usize,
    pub text_record_size: usize,
    pub encryption: u16,
    /// Length of the MOBI sub-header (0 for minimal headers)
    pub header_length: usize,
    pub encoding: &'static Encoding,
    /// Full name from the header, or `Unknown`
    pub title: String,
    pub locale: u32,
    pub mobi_version: u32,
    pub first_image_index: Option<usize>,
    pub huff_offset: usize,
    pub huff_count: usize,
    pub exth_flags: u32,
    pub exth: Option<ExthHeader>,
    pub extra_flags: u16,
    /// Minimal 16-byte header (old PalmDOC / TEXTREAD)
    pub ancient: bool,
    pub kf8: Option<Kf8Info>,
}

impl BookHeader {
    /// Parse one header record. Joint-file detection and validation happen in
    /// [`read_book_header`].
    pub fn parse(
        raw: &[u8],
        book_type: BookType,
        options: &DecodeOptions,
        log: &dyn Log,
    ) -> Result<Self> {
        if raw.len() < 14 {
            return Err(MobiError::MalformedContainer(format!(
                "header record is {} bytes",
                raw.len()
            )));
        }
        let compression_code = be_u16(raw, 0).unwrap_or(0);
        let text_record_count = be_u16(raw, 8).unwrap_or(0) as usize;
        let text_record_size = be_u16(raw, 10).unwrap_or(0) as usize;
        let encryption = be_u16(raw, 12).unwrap_or(0);

        if raw.len() <= 16 || book_type == BookType::TextRead {
            // No codepage field: the user's charset, else cp1252
            let encoding = encoding_for_label(options.fallback_encoding()).unwrap_or_else(|| {
                log.warn(&format!(
                    "Unknown encoding {:?}. Assuming cp1252",
                    options.fallback_encoding()
                ));
                encoding_rs::WINDOWS_1252
            });
            return Ok(Self {
                book_type,
                compression_code,
                text_record_count,
                text_record_size,
                encryption,
                header_length: 0,
                encoding,
                title: "Unknown".to_string(),
                locale: 0,
                mobi_version: 1,
                first_image_index: None,
                huff_offset: 0,
                huff_count: 0,
                exth_flags: 0,
                exth: None,
                extra_flags: 0,
                ancient: true,
                kf8: None,
            });
        }

        let field = |offset: usize| be_u32(raw, offset).unwrap_or(0);

        let header_length = field(20) as usize;
        let codepage = field(28);

        let encoding = match encoding_for_codepage(codepage) {
            Some(enc) => enc,
            None => {
                let fallback = options.fallback_encoding();
                let enc = encoding_for_label(fallback).unwrap_or(encoding_rs::WINDOWS_1252);
                log.warn(&format!(
                    "Unknown codepage {}. Assuming {}",
                    codepage,
                    enc.name()
                ));
                enc
            }
        };

        let extra_flags = if header_length < MIN_EXTRA_FLAGS_HEADER
            || header_length > MAX_EXTRA_FLAGS_HEADER
            || (options.try_extra_data_fix && header_length == MIN_EXTRA_FLAGS_HEADER)
        {
            0
        } else {
            be_u16(raw, 0xF2).unwrap_or(0)
        };

        let (huff_offset, huff_count) = if compression_code == 0x4448 {
            (field(0x70) as usize, field(0x74) as usize)
        } else {
            (0, 0)
        };

        let toff = field(0x54) as usize;
        let tlen = field(0x58) as usize;
        let tend = toff.saturating_add(tlen);
        let title = if tend < raw.len() {
            decode_with(&raw[toff..tend], encoding)
        } else {
            "Unknown".to_string()
        };

        let locale = field(0x5C);
        let mobi_version = field(0x68);
        let first_image_index = match field(0x6C) {
            NULL_INDEX => None,
            idx => Some(idx as usize),
        };

        let mut exth_flags = field(0x80);
        let mut exth = None;
        if exth_flags & 0x40 != 0 {
            let start = (16 + header_length).min(raw.len());
            match ExthHeader::parse(&raw[start..], encoding) {
                Ok(parsed) => exth = parsed,
                Err(e) => {
                    log.warn(&format!("Invalid EXTH header: {}", e));
                    exth_flags = 0;
                }
            }
        }

        Ok(Self {
            book_type,
            compression_code,
            text_record_count,
            text_record_size,
            encryption,
            header_length,
            encoding,
            title,
            locale,
            mobi_version,
            first_image_index,
            huff_offset,
            huff_count,
            exth_flags,
            exth,
            extra_flags,
            ancient: false,
            kf8: None,
        })
    }

    pub fn compression(&self) -> Result<Compression> {
        Compression::from_code(self.compression_code)
    }

    /// Best available title: EXTH 503, then the full name, then `fallback`.
    pub fn display_title<'a>(&'a self, fallback: &'a str) -> &'a str {
        if let Some(title) = self.exth.as_ref().and_then(|e| e.title.as_deref()) {
            return title;
        }
        if self.title != "Unknown" && !self.title.trim().is_empty() {
            return &self.title;
        }
        fallback
    }

    /// ISO 639-1 language: EXTH 524 when present, else derived from the locale.
    pub fn language(&self) -> &str {
        self.exth
            .as_ref()
            .and_then(|e| e.language.as_deref())
            .unwrap_or_else(|| language_for_locale(self.locale))
    }

    /// Format version of the KF8 part: this header for a standalone KF8
    /// book, the inner header for a joint file.
    pub fn kf8_version(&self) -> Option<u32> {
        let kf8 = self.kf8.as_ref()?;
        match kf8.kind {
            Kf8Type::Standalone => Some(self.mobi_version),
            Kf8Type::Joint => kf8.header.as_ref().map(|inner| inner.mobi_version),
        }
    }

    pub fn joint_kf8_boundary(&self) -> Option<usize> {
        self.kf8
            .as_ref()
            .filter(|k| k.kind == Kf8Type::Joint)
            .and_then(|k| k.boundary)
    }
}

/// Read and validate the book header of `pdb`.
///
/// Fails with `UnknownFormat`, `DrmProtected` or `UnsupportedCompression`.
pub fn read_book_header(pdb: &PalmDb, options: &DecodeOptions, log: &dyn Log) -> Result<BookHeader> {
    let book_type = BookType::from_identifier(&pdb.identifier())?;
    let raw = pdb
        .section(0)
        .ok_or_else(|| MobiError::MalformedContainer("missing section 0".to_string()))?;
    let mut header = BookHeader::parse(raw, book_type, options, log)?;

    if header.encryption != 0 {
        let title = header.display_title(pdb.name()).trim().to_string();
        return Err(MobiError::DrmProtected {
            title: (!title.is_empty()).then_some(title),
        });
    }
    header.compression()?;

    detect_kf8(&mut header, raw, pdb, options, log);
    Ok(header)
}

fn detect_kf8(
    header: &mut BookHeader,
    raw: &[u8],
    pdb: &PalmDb,
    options: &DecodeOptions,
    log: &dyn Log,
) {
    if header.mobi_version == 8 && raw.len() >= 0xF8 + 16 {
        log.debug("Standalone KF8 book; decoding its text as MOBI markup");
        header.kf8 = Some(Kf8Info {
            kind: Kf8Type::Standalone,
            boundary: None,
            header: None,
        });
        return;
    }

    let k = match header.exth.as_ref().and_then(|e| e.kf8_header) {
        Some(k) if k > 0 => k as usize,
        _ => return,
    };
    if pdb.section(k - 1) != Some(&b"BOUNDARY"[..]) {
        return;
    }
    let inner_raw = match pdb.section(k) {
        Some(raw) => raw,
        None => return,
    };

    match BookHeader::parse(inner_raw, BookType::Mobi, options, log) {
        Ok(mut inner) => {
            inner.first_image_index = header.first_image_index;
            inner.huff_offset += k;
            log.debug(&format!("Joint MOBI6/KF8 file, boundary at section {}", k - 1));
            header.kf8 = Some(Kf8Info {
                kind: Kf8Type::Joint,
                boundary: Some(k - 1),
                header: Some(Box::new(inner)),
            });
        }
        Err(e) => log.warn(&format!("Ignoring unreadable KF8 header: {}", e)),
    }
}

/// Map the low byte of a MOBI locale (a Windows primary language id) to ISO 639-1.
pub fn language_for_locale(locale: u32) -> &'static str {
    match locale & 0xFF {
        0x01 => "ar",
        0x02 => "bg",
        0x03 => "ca",
        0x04 => "zh",
        0x05 => "cs",
        0x06 => "da",
        0x07 => "de",
        0x08 => "el",
        0x09 => "en",
        0x0A => "es",
        0x0B => "fi",
        0x0C => "fr",
        0x0D => "he",
        0x0E => "hu",
        0x0F => "is",
        0x10 => "it",
        0x11 => "ja",
        0x12 => "ko",
        0x13 => "nl",
        0x14 => "no",
        0x15 => "pl",
        0x16 => "pt",
        0x17 => "rm",
        0x18 => "ro",
        0x19 => "ru",
        0x1A => "hr",
        0x1B => "sk",
        0x1C => "sq",
        0x1D => "sv",
        0x1E => "th",
        0x1F => "tr",
        0x20 => "ur",
        0x21 => "id",
        0x22 => "uk",
        0x23 => "be",
        0x24 => "sl",
        0x25 => "et",
        0x26 => "lv",
        0x27 => "lt",
        0x29 => "fa",
        0x2A => "vi",
        0x2B => "hy",
        0x2C => "az",
        0x2D => "eu",
        0x2F => "mk",
        0x36 => "af",
        0x37 => "ka",
        0x38 => "fo",
        0x39 => "hi",
        0x3E => "ms",
        0x3F => "kk",
        0x41 => "sw",
        0x43 => "uz",
        0x44 => "tt",
        0x45 => "bn",
        0x46 => "pa",
        0x47 => "gu",
        0x48 => "or",
        0x49 => "ta",
        0x4A => "te",
        0x4B => "kn",
        0x4C => "ml",
        0x4D => "as",
        0x4E => "mr",
        0x4F => "sa",
        _ => "en",
    }
}
