//! In-memory builder for synthetic MOBI and PalmDOC files.

#![allow(dead_code)]

use std::io::Cursor;

use mobi_reader::palmdoc;

const RECORD_SIZE: usize = 4096;
const MOBI_HEADER_LEN: usize = 0xE8;

pub struct MobiBuilder {
    name: String,
    identifier: [u8; 8],
    text: Vec<u8>,
    compress: bool,
    encryption: u16,
    exth: Vec<(u32, Vec<u8>)>,
    images: Vec<Vec<u8>>,
    title: String,
}

impl MobiBuilder {
    pub fn new(name: &str, text: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.to_string(),
            identifier: *b"BOOKMOBI",
            text: text.into(),
            compress: true,
            encryption: 0,
            exth: Vec::new(),
            images: Vec::new(),
            title: name.to_string(),
        }
    }

    /// A plain PalmDOC file with a 16-byte header record.
    pub fn textread(name: &str, text: impl Into<Vec<u8>>) -> Self {
        Self {
            identifier: *b"TEXTREAD",
            ..Self::new(name, text)
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn uncompressed(mut self) -> Self {
        self.compress = false;
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.encryption = 2;
        self
    }

    pub fn exth(mut self, code: u32, data: impl Into<Vec<u8>>) -> Self {
        self.exth.push((code, data.into()));
        self
    }

    /// Append a record after the text; images and non-image records alike.
    pub fn record(mut self, data: Vec<u8>) -> Self {
        self.images.push(data);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let text_records: Vec<Vec<u8>> = self
            .text
            .chunks(RECORD_SIZE)
            .map(|chunk| {
                if self.compress {
                    palmdoc::compress(chunk)
                } else {
                    chunk.to_vec()
                }
            })
            .collect();

        let mut sections = vec![self.header_record(text_records.len())];
        sections.extend(text_records);
        sections.extend(self.images.iter().cloned());
        palm_database(&self.name, &self.identifier, &sections)
    }

    fn header_record(&self, text_records: usize) -> Vec<u8> {
        let compression: u16 = if self.compress { 2 } else { 1 };
        let mut raw = vec![0u8; 16];
        raw[0..2].copy_from_slice(&compression.to_be_bytes());
        raw[4..8].copy_from_slice(&(self.text.len() as u32).to_be_bytes());
        raw[8..10].copy_from_slice(&(text_records as u16).to_be_bytes());
        raw[10..12].copy_from_slice(&(RECORD_SIZE as u16).to_be_bytes());
        raw[12..14].copy_from_slice(&self.encryption.to_be_bytes());
        if &self.identifier == b"TEXTREAD" {
            return raw;
        }

        raw.resize(16 + MOBI_HEADER_LEN, 0);
        raw[16..20].copy_from_slice(b"MOBI");
        raw[20..24].copy_from_slice(&(MOBI_HEADER_LEN as u32).to_be_bytes());
        raw[24..28].copy_from_slice(&2u32.to_be_bytes());
        raw[28..32].copy_from_slice(&65001u32.to_be_bytes());
        raw[0x5C..0x60].copy_from_slice(&0x09u32.to_be_bytes());
        raw[0x68..0x6C].copy_from_slice(&6u32.to_be_bytes());
        raw[0x6C..0x70].copy_from_slice(&((text_records + 1) as u32).to_be_bytes());
        if !self.exth.is_empty() {
            raw[0x80..0x84].copy_from_slice(&0x40u32.to_be_bytes());
            raw.extend_from_slice(&exth_block(&self.exth));
        }
        let title_offset = raw.len() as u32;
        raw[0x54..0x58].copy_from_slice(&title_offset.to_be_bytes());
        raw[0x58..0x5C].copy_from_slice(&(self.title.len() as u32).to_be_bytes());
        raw.extend_from_slice(self.title.as_bytes());
        raw.extend_from_slice(&[0, 0]);
        raw
    }
}

fn exth_block(records: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (code, data) in records {
        body.extend_from_slice(&code.to_be_bytes());
        body.extend_from_slice(&((data.len() + 8) as u32).to_be_bytes());
        body.extend_from_slice(data);
    }
    let mut out = b"EXTH".to_vec();
    out.extend_from_slice(&((body.len() + 12) as u32).to_be_bytes());
    out.extend_from_slice(&(records.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

fn palm_database(name: &str, identifier: &[u8; 8], sections: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0u8; 78];
    let name_len = name.len().min(31);
    out[..name_len].copy_from_slice(&name.as_bytes()[..name_len]);
    out[0x3C..0x44].copy_from_slice(identifier);
    out[76..78].copy_from_slice(&(sections.len() as u16).to_be_bytes());

    let mut offset = 78 + sections.len() * 8 + 2;
    for (i, section) in sections.iter().enumerate() {
        out.extend_from_slice(&(offset as u32).to_be_bytes());
        out.extend_from_slice(&((i * 2) as u32).to_be_bytes());
        offset += section.len();
    }
    out.extend_from_slice(&[0, 0]);
    for section in sections {
        out.extend_from_slice(section);
    }
    out
}

pub fn encoded_image(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 40) as u8, (y * 40) as u8, 128])
    });
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), format)
        .expect("encode test image");
    buf
}

/// Replace each 10-character `placeholder` with the zero-padded byte offset
/// of the matching target string. Placeholders and offsets have the same
/// width, so offsets computed before substitution stay valid.
pub fn resolve_fileposes(template: &str, links: &[(&str, &str)]) -> String {
    let mut text = template.to_string();
    for (placeholder, target) in links {
        assert_eq!(placeholder.len(), 10);
        let offset = template
            .find(target)
            .unwrap_or_else(|| panic!("target {:?} not in template", target));
        text = text.replace(placeholder, &format!("{:010}", offset));
    }
    text
}
