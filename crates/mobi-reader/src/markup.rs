//! A forgiving tokenizer and serializer for MOBI markup.
//!
//! MOBI text is tag soup: unclosed paragraphs, unquoted attributes, stray
//! `<` in text. The tokenizer accepts all of that and only gives up on input
//! it cannot delimit (an unterminated tag, quote or comment, or control
//! bytes in a tag name).

use once_cell::sync::Lazy;
use regex::Regex;

use mobi_core::error::{MobiError, Result};

/// Tags with no content and no end tag.
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "wbr",
];

static RANDOM_BYTES: Lazy<Regex> = Lazy::new(|| {
    Regex::new("[\x01-\x08\x12-\x15\x19\x1c\x1d\u{ec}\u{ef}]").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Text(String),
    StartTag(Tag),
    EndTag(String),
    Comment(String),
    /// `<!DOCTYPE …>` or `<?…?>`, verbatim without the angle brackets
    Decl(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Lower-cased element name
    pub name: String,
    /// Attributes in source order; values keep their entity encoding
    pub attrs: Vec<(String, Option<String>)>,
    pub self_closing: bool,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            self_closing: false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    pub fn has(&self, name: &str) -> bool {
        self.attrs.iter().any(|(k, _)| k == name)
    }

    /// Set an attribute, replacing the first existing one of that name.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = Some(value.into());
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    /// Remove every attribute of that name, returning the first value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let mut first = None;
        self.attrs.retain(|(k, v)| {
            if k == name {
                if first.is_none() {
                    first = Some(v.clone().unwrap_or_default());
                }
                false
            } else {
                true
            }
        });
        first
    }

    pub fn is_void(&self) -> bool {
        self.self_closing || VOID_ELEMENTS.contains(&self.name.as_str())
    }

    /// Whether the whitespace-separated `class` attribute contains `class`.
    pub fn has_class(&self, class: &str) -> bool {
        self.get("class")
            .map(|c| c.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }
}

/// Strip the single-byte controls and stray Latin-1 bytes that corrupt MOBI
/// text typically carries.
pub fn remove_random_bytes(html: &str) -> String {
    RANDOM_BYTES.replace_all(html, "").into_owned()
}

pub fn tokenize(html: &str) -> Result<Vec<Token>> {
    Tokenizer {
        src: html,
        bytes: html.as_bytes(),
        pos: 0,
    }
    .run()
}

struct Tokenizer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn run(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        let mut text_start = 0;

        while self.pos < self.bytes.len() {
            if self.bytes[self.pos] != b'<' {
                self.pos += 1;
                continue;
            }
            let next = self.bytes.get(self.pos + 1).copied();
            let starts_markup = match next {
                Some(b'!') | Some(b'?') | Some(b'/') => true,
                Some(c) => c.is_ascii_alphabetic(),
                None => false,
            };
            if !starts_markup {
                self.pos += 1;
                continue;
            }

            if text_start < self.pos {
                tokens.push(Token::Text(self.src[text_start..self.pos].to_string()));
            }

            let token = match next {
                Some(b'!') if self.src[self.pos..].starts_with("<!--") => self.comment()?,
                Some(b'!') | Some(b'?') => self.declaration()?,
                Some(b'/') => self.end_tag()?,
                _ => self.start_tag()?,
            };

            let raw_text = match &token {
                Token::StartTag(tag) if !tag.self_closing => {
                    matches!(tag.name.as_str(), "script" | "style").then(|| tag.name.clone())
                }
                _ => None,
            };
            tokens.push(token);

            if let Some(name) = raw_text {
                if let Some(text) = self.raw_text(&name) {
                    tokens.push(Token::Text(text));
                }
            }
            text_start = self.pos;
        }

        if text_start < self.bytes.len() {
            tokens.push(Token::Text(self.src[text_start..].to_string()));
        }
        Ok(tokens)
    }

    fn comment(&mut self) -> Result<Token> {
        let body_start = self.pos + 4;
        match self.src[body_start..].find("-->") {
            Some(end) => {
                let body = self.src[body_start..body_start + end].to_string();
                self.pos = body_start + end + 3;
                Ok(Token::Comment(body))
            }
            None => Err(self.unterminated("comment")),
        }
    }

    fn declaration(&mut self) -> Result<Token> {
        match self.src[self.pos..].find('>') {
            Some(end) => {
                let body = self.src[self.pos + 1..self.pos + end].to_string();
                self.pos += end + 1;
                Ok(Token::Decl(body))
            }
            None => Err(self.unterminated("declaration")),
        }
    }

    fn end_tag(&mut self) -> Result<Token> {
        let start = self.pos;
        self.pos += 2;
        self.skip_whitespace();
        let name = self.name();
        match self.src[self.pos..].find('>') {
            Some(end) => {
                self.pos += end + 1;
                Ok(Token::EndTag(name))
            }
            None => {
                self.pos = start;
                Err(self.unterminated("end tag"))
            }
        }
    }

    fn start_tag(&mut self) -> Result<Token> {
        let start = self.pos;
        self.pos += 1;
        let name = self.name();
        if let Some(&c) = self.bytes.get(self.pos) {
            if c.is_ascii_control() && !c.is_ascii_whitespace() {
                return Err(MobiError::CorruptMarkup(format!(
                    "control byte {:#04x} in tag name at offset {}",
                    c, self.pos
                )));
            }
        }

        let mut tag = Tag::new(name);
        loop {
            self.skip_whitespace();
            match self.bytes.get(self.pos) {
                None => {
                    self.pos = start;
                    return Err(self.unterminated("tag"));
                }
                Some(b'>') => {
                    self.pos += 1;
                    break;
                }
                // A new tag opens before this one closed: end it here
                Some(b'<') => break,
                Some(b'/') => {
                    if self.bytes.get(self.pos + 1) == Some(&b'>') {
                        tag.self_closing = true;
                        self.pos += 2;
                        break;
                    }
                    self.pos += 1;
                }
                Some(_) => self.attribute(&mut tag)?,
            }
        }
        Ok(Token::StartTag(tag))
    }

    fn attribute(&mut self, tag: &mut Tag) -> Result<()> {
        let name_start = self.pos;
        while let Some(&c) = self.bytes.get(self.pos) {
            if c.is_ascii_whitespace() || matches!(c, b'=' | b'>' | b'<') || (c == b'/' && self.pos > name_start) {
                break;
            }
            self.pos += 1;
        }
        if self.pos == name_start {
            // Lone '=' or similar junk
            self.pos += 1;
            return Ok(());
        }
        let name = self.src[name_start..self.pos].to_ascii_lowercase();

        self.skip_whitespace();
        if self.bytes.get(self.pos) != Some(&b'=') {
            tag.attrs.push((name, None));
            return Ok(());
        }
        self.pos += 1;
        self.skip_whitespace();

        let value = match self.bytes.get(self.pos) {
            Some(&q @ (b'"' | b'\'')) => {
                let value_start = self.pos + 1;
                let end = self.src[value_start..]
                    .find(q as char)
                    .ok_or_else(|| self.unterminated("attribute value"))?;
                self.pos = value_start + end + 1;
                self.src[value_start..value_start + end].to_string()
            }
            _ => {
                let value_start = self.pos;
                while let Some(&c) = self.bytes.get(self.pos) {
                    if c.is_ascii_whitespace() || c == b'>' || c == b'<' {
                        break;
                    }
                    if c == b'/' && self.bytes.get(self.pos + 1) == Some(&b'>') {
                        break;
                    }
                    self.pos += 1;
                }
                self.src[value_start..self.pos].to_string()
            }
        };
        tag.attrs.push((name, Some(value)));
        Ok(())
    }

    fn raw_text(&mut self, name: &str) -> Option<String> {
        let rest = &self.src[self.pos..];
        let close = format!("</{}", name);
        let end = rest
            .as_bytes()
            .windows(close.len())
            .position(|w| w.eq_ignore_ascii_case(close.as_bytes()))
            .unwrap_or(rest.len());
        if end == 0 {
            return None;
        }
        self.pos += end;
        Some(rest[..end].to_string())
    }

    fn name(&mut self) -> String {
        let start = self.pos;
        while let Some(&c) = self.bytes.get(self.pos) {
            if c.is_ascii_alphanumeric() || matches!(c, b':' | b'-' | b'_' | b'.') {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.src[start..self.pos].to_ascii_lowercase()
    }

    fn skip_whitespace(&mut self) {
        while self.bytes.get(self.pos).is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn unterminated(&self, what: &str) -> MobiError {
        MobiError::CorruptMarkup(format!("unterminated {} at offset {}", what, self.pos))
    }
}

/// Serialize a start tag.
pub fn write_start_tag(out: &mut String, tag: &Tag) {
    out.push('<');
    out.push_str(&tag.name);
    for (name, value) in &tag.attrs {
        out.push(' ');
        out.push_str(name);
        if let Some(value) = value {
            out.push_str("=\"");
            out.push_str(&value.replace('"', "&quot;"));
            out.push('"');
        }
    }
    out.push_str(if tag.self_closing { " />" } else { ">" });
}

pub fn write_token(out: &mut String, token: &Token) {
    match token {
        Token::Text(text) => out.push_str(text),
        Token::StartTag(tag) => write_start_tag(out, tag),
        Token::EndTag(name) => {
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        Token::Comment(body) => {
            out.push_str("<!--");
            out.push_str(body);
            out.push_str("-->");
        }
        Token::Decl(body) => {
            out.push('<');
            out.push_str(body);
            out.push('>');
        }
    }
}

pub fn serialize(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        write_token(&mut out, token);
    }
    out
}

/// Decode the character references the MOBI corpus actually uses.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    static ENTITY: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").expect("valid regex"));
    ENTITY
        .replace_all(text, |caps: &regex::Captures| {
            let name = &caps[1];
            let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match name {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some('\u{a0}'),
                    "mdash" => Some('\u{2014}'),
                    "ndash" => Some('\u{2013}'),
                    "hellip" => Some('\u{2026}'),
                    "rsquo" => Some('\u{2019}'),
                    "lsquo" => Some('\u{2018}'),
                    "rdquo" => Some('\u{201d}'),
                    "ldquo" => Some('\u{201c}'),
                    _ => None,
                }
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
