//! EXTH metadata block: typed `(code, payload)` records following the MOBI header.

use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::Regex;

use mobi_core::error::{MobiError, Result};
use mobi_utils::encoding::decode_with;

use crate::palmdb::be_u32;

/// EXTH value meaning "no index".
pub const NULL_INDEX: u32 = 0xFFFF_FFFF;

/// "Last, First" author names as written by Amazon tooling.
static LAST_FIRST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^,]+?)\s*,\s+([^,]+)$").expect("valid regex"));

/// A record with a code this parser does not interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExthRecord {
    pub code: u32,
    pub data: Vec<u8>,
}

/// Metadata harvested from the EXTH block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExthHeader {
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub isbn: Option<String>,
    pub subjects: Vec<String>,
    pub pubdate: Option<String>,
    pub contributor: Option<String>,
    pub rights: Option<String>,
    pub source: Option<String>,
    /// Book uuid recorded by an earlier conversion (`calibre:` source prefix)
    pub uuid: Option<String>,
    pub asin: Option<String>,
    /// Text offset the reader opens at
    pub start_offset: Option<u32>,
    /// Section index of the KF8 header in a joint file
    pub kf8_header: Option<u32>,
    /// Cover image, as an offset from the first image section
    pub cover_offset: Option<u32>,
    pub thumb_offset: Option<u32>,
    /// Updated title; takes precedence over the header's full name
    pub title: Option<String>,
    pub language: Option<String>,
    pub unknown: Vec<ExthRecord>,
}

impl ExthHeader {
    /// Parse an EXTH block. `Ok(None)` when the signature is missing.
    ///
    /// A record whose length runs past the block is `CorruptMetadata`.
    pub fn parse(block: &[u8], encoding: &'static Encoding) -> Result<Option<ExthHeader>> {
        if block.len() < 12 || &block[..4] != b"EXTH" {
            return Ok(None);
        }
        let count = be_u32(block, 8).unwrap_or(0);
        let body = &block[12..];

        let mut exth = ExthHeader::default();
        let mut pos = 0usize;
        for n in 0..count {
            let (code, size) = match (be_u32(body, pos), be_u32(body, pos + 4)) {
                (Some(code), Some(size)) => (code, size as usize),
                _ => {
                    return Err(MobiError::CorruptMetadata(format!(
                        "EXTH record {} header at {} overruns the block",
                        n, pos
                    )))
                }
            };
            if size < 8 || pos + size > body.len() {
                return Err(MobiError::CorruptMetadata(format!(
                    "EXTH record {} (code {}) length {} overruns the block",
                    n, code, size
                )));
            }
            let content = &body[pos + 8..pos + size];
            pos += size;
            exth.apply(code, content, encoding)?;
        }

        Ok(Some(exth))
    }

    fn apply(&mut self, code: u32, content: &[u8], encoding: &'static Encoding) -> Result<()> {
        let text = || clean_text(&decode_with(content, encoding));
        match code {
            100 => {
                let author = text();
                if let Some(caps) = LAST_FIRST_RE.captures(&author) {
                    self.authors.push(format!("{} {}", &caps[2], &caps[1]));
                } else if !author.is_empty() {
                    self.authors.push(author);
                }
            }
            101 => {
                let publisher = text();
                self.publisher = match publisher.as_str() {
                    "" | "Unknown" => None,
                    _ => Some(publisher),
                };
            }
            103 => self.description = non_empty(text()),
            104 => {
                let raw = text().replace('-', "");
                if let Some(isbn) = check_isbn(&raw) {
                    self.isbn = Some(isbn);
                }
            }
            105 => {
                for subject in text().split(';') {
                    let subject = subject.trim();
                    if !subject.is_empty() && !self.subjects.iter().any(|s| s == subject) {
                        self.subjects.push(subject.to_string());
                    }
                }
            }
            106 => self.pubdate = non_empty(text()),
            108 => self.contributor = non_empty(text()),
            109 => self.rights = non_empty(text()),
            112 => {
                let source = text();
                let lower = source.to_ascii_lowercase();
                if let Some(rest) = lower.strip_prefix("urn:isbn:") {
                    if self.isbn.is_none() {
                        self.isbn = check_isbn(&rest.replace('-', ""));
                    }
                } else if let Some(id) = source.strip_prefix("calibre:") {
                    if !id.is_empty() {
                        self.uuid = Some(id.to_string());
                    }
                }
                self.source = non_empty(source);
            }
            113 => {
                if content.is_ascii() {
                    self.asin = non_empty(String::from_utf8_lossy(content).trim().to_string());
                }
            }
            116 => self.start_offset = Some(read_index(code, content)?),
            121 => {
                let k = read_index(code, content)?;
                self.kf8_header = (k != NULL_INDEX).then_some(k);
            }
            201 => {
                let co = read_index(code, content)?;
                if co < NULL_INDEX {
                    self.cover_offset = Some(co);
                }
            }
            202 => {
                let to = read_index(code, content)?;
                self.thumb_offset = (to < NULL_INDEX).then_some(to);
            }
            503 => self.title = non_empty(text()),
            524 => {
                let lang = text();
                let primary = lang.split(['-', '_']).next().unwrap_or("").to_ascii_lowercase();
                if !primary.is_empty() {
                    self.language = Some(primary);
                }
            }
            _ => self.unknown.push(ExthRecord {
                code,
                data: content.to_vec(),
            }),
        }
        Ok(())
    }
}

fn read_index(code: u32, content: &[u8]) -> Result<u32> {
    be_u32(content, 0).ok_or_else(|| {
        MobiError::CorruptMetadata(format!(
            "EXTH record {} holds {} bytes, expected 4",
            code,
            content.len()
        ))
    })
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Trim and drop ASCII control characters other than tab/newline.
fn clean_text(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_ascii_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Validate an ISBN-10 or ISBN-13 check digit.
pub fn check_isbn(raw: &str) -> Option<String> {
    let isbn: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = isbn.as_bytes();
    match bytes.len() {
        10 => {
            let mut sum = 0u32;
            for (i, &b) in bytes.iter().enumerate() {
                let v = match b {
                    b'0'..=b'9' => (b - b'0') as u32,
                    b'X' | b'x' if i == 9 => 10,
                    _ => return None,
                };
                sum += v * (10 - i as u32);
            }
            (sum % 11 == 0).then(|| isbn.to_ascii_uppercase())
        }
        13 => {
            let mut sum = 0u32;
            for (i, &b) in bytes.iter().enumerate() {
                if !b.is_ascii_digit() {
                    return None;
                }
                let v = (b - b'0') as u32;
                sum += if i % 2 == 0 { v } else { v * 3 };
            }
            (sum % 10 == 0).then_some(isbn)
        }
        _ => None,
    }
}
