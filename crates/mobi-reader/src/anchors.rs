//! `filepos` link targets.
//!
//! MOBI links address the decompressed text by byte offset. Every offset
//! some tag links to gets an anchor: an attribute on the tag it falls in, or
//! an empty `<a>` element. A single forward walk classifies each offset as
//! text, tag or entity; insertions are collected and applied in one pass.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::bytes::Regex;

use crate::markup::Tag;

static FILEPOS_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<[^<>]+filepos=['"]{0,1}(\d+)[^<>]*>"#).expect("valid regex")
});

/// Attribute carrying an anchor until the markup pass renames it to `id`.
pub const ANCHOR_ATTR: &str = "filepos-id";

/// Offsets referenced by `filepos=` attributes, ascending.
pub fn harvest_positions(text: &[u8]) -> BTreeSet<usize> {
    FILEPOS_LINK
        .captures_iter(text)
        .filter_map(|caps| std::str::from_utf8(&caps[1]).ok()?.parse::<usize>().ok())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Text,
    Tag { open: usize },
    Entity { amp: usize },
}

fn is_entity_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'#'
}

/// Advance the walk over byte `b` at `i`. Returns the class of `b` itself
/// and the state after it.
fn step(state: Scan, b: u8, i: usize) -> (Scan, Scan) {
    match (state, b) {
        (Scan::Tag { open }, b'>') => (Scan::Tag { open }, Scan::Text),
        (_, b'<') => (Scan::Tag { open: i }, Scan::Tag { open: i }),
        (Scan::Tag { open }, _) => (Scan::Tag { open }, Scan::Tag { open }),
        (_, b'&') => (Scan::Entity { amp: i }, Scan::Entity { amp: i }),
        (Scan::Entity { amp }, b';') => (Scan::Entity { amp }, Scan::Text),
        (Scan::Entity { amp }, c) if is_entity_byte(c) => {
            (Scan::Entity { amp }, Scan::Entity { amp })
        }
        _ => (Scan::Text, Scan::Text),
    }
}

fn anchor_element(p: usize) -> String {
    format!("<a id=\"filepos{}\"></a>", p)
}

fn anchor_attribute(p: usize) -> String {
    format!(" {}=\"filepos{}\"", ANCHOR_ATTR, p)
}

/// Whether the tag text `<…>` opens an element that can carry an id.
fn is_opening_tag(tag: &[u8]) -> bool {
    let skip = tag[1..].iter().take_while(|b| b.is_ascii_whitespace()).count();
    let inner = &tag[1 + skip..];
    !(inner.starts_with(b"/")
        || inner.starts_with(b"!")
        || inner.starts_with(b"?")
        || tag.ends_with(b"/>"))
}

/// Insert an anchor for every offset in `positions`.
pub fn add_anchors(text: &[u8], positions: &BTreeSet<usize>) -> Vec<u8> {
    let mut insertions: Vec<(usize, String)> = Vec::with_capacity(positions.len());
    let mut state = Scan::Text;
    let mut cursor = 0;
    let mut last_attributed: Option<usize> = None;

    for &p in positions {
        if p >= text.len() {
            insertions.push((text.len(), anchor_element(p)));
            continue;
        }
        while cursor < p {
            state = step(state, text[cursor], cursor).1;
            cursor += 1;
        }
        let class = step(state, text[p], p).0;

        let offset = match class {
            Scan::Text => Some(p),
            Scan::Tag { open } => {
                // The tag ends at the next '>' unless another '<' comes first
                let close = text[p..]
                    .iter()
                    .enumerate()
                    .skip(usize::from(text[p] == b'<'))
                    .find(|&(_, &b)| b == b'>' || b == b'<')
                    .map(|(k, &b)| (p + k, b));
                match close {
                    Some((r, b'>')) => {
                        if is_opening_tag(&text[open..=r]) && last_attributed != Some(open) {
                            last_attributed = Some(open);
                            insertions.push((r, anchor_attribute(p)));
                            None
                        } else {
                            Some(r + 1)
                        }
                    }
                    _ => Some(p),
                }
            }
            Scan::Entity { amp } => {
                let tail = &text[p.max(amp + 1)..];
                let run = tail.iter().take_while(|&&b| is_entity_byte(b)).count();
                let semi = p.max(amp + 1) + run;
                if text.get(semi) == Some(&b';') && semi > amp + 1 {
                    Some(semi + 1)
                } else {
                    Some(p)
                }
            }
        };
        if let Some(offset) = offset {
            insertions.push((offset, anchor_element(p)));
        }
    }

    apply_insertions(text, insertions)
}

fn apply_insertions(text: &[u8], mut insertions: Vec<(usize, String)>) -> Vec<u8> {
    insertions.sort_by_key(|(offset, _)| *offset);
    let extra: usize = insertions.iter().map(|(_, f)| f.len()).sum();
    let mut out = Vec::with_capacity(text.len() + extra);
    let mut pos = 0;
    for (offset, fragment) in insertions {
        out.extend_from_slice(&text[pos..offset]);
        out.extend_from_slice(fragment.as_bytes());
        pos = offset;
    }
    out.extend_from_slice(&text[pos..]);
    out
}

/// Rename `filepos-id` to `id` (keeping `name` in step) and turn
/// `filepos=N` into `href="#fileposN"`.
pub fn finalize_link_attrs(tag: &mut Tag) {
    if let Some(id) = tag.remove(ANCHOR_ATTR) {
        if tag.get("name").is_some_and(|name| name != id) {
            tag.set("name", id.clone());
        }
        tag.set("id", id);
    }
    if let Some(filepos) = tag.remove("filepos") {
        let digits = filepos.trim().trim_matches(|c| c == '"' || c == '\'');
        if let Ok(n) = digits.parse::<u64>() {
            tag.set("href", format!("#filepos{}", n));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchored(text: &str) -> String {
        let positions = harvest_positions(text.as_bytes());
        String::from_utf8(add_anchors(text.as_bytes(), &positions)).unwrap()
    }

    fn at(text: &str, p: usize) -> String {
        let positions: BTreeSet<usize> = [p].into_iter().collect();
        String::from_utf8(add_anchors(text.as_bytes(), &positions)).unwrap()
    }

    #[test]
    fn test_harvest_positions() {
        let text = br#"<a filepos=0000000120>x</a><a FILEPOS="7">y</a><reference filepos='0'/>"#;
        let positions: Vec<usize> = harvest_positions(text).into_iter().collect();
        assert_eq!(positions, vec![0, 7, 120]);
    }

    #[test]
    fn test_anchor_at_start_of_text() {
        assert_eq!(at("<html><body>x", 0), "<html filepos-id=\"filepos0\"><body>x");
        assert_eq!(at("Plain", 0), "<a id=\"filepos0\"></a>Plain");
    }

    #[test]
    fn test_anchor_in_text() {
        assert_eq!(at("Hello world", 6), "Hello <a id=\"filepos6\"></a>world");
    }

    #[test]
    fn test_anchor_after_entity() {
        let text = "foo&amp;bar";
        assert_eq!(at(text, 3), "foo&amp;<a id=\"filepos3\"></a>bar");
        assert_eq!(at(text, 5), "foo&amp;<a id=\"filepos5\"></a>bar");
        // A bare ampersand is not an entity
        assert_eq!(at("a & b", 2), "a <a id=\"filepos2\"></a>& b");
    }

    #[test]
    fn test_anchor_on_opening_tag() {
        let text = "ab<p class=\"x\">text</p>";
        assert_eq!(at(text, 2), "ab<p class=\"x\" filepos-id=\"filepos2\">text</p>");
        // Inside the tag's attribute list
        assert_eq!(at(text, 5), "ab<p class=\"x\" filepos-id=\"filepos5\">text</p>");
    }

    #[test]
    fn test_anchor_after_closing_and_empty_tags() {
        assert_eq!(at("a</p>b", 1), "a</p><a id=\"filepos1\"></a>b");
        assert_eq!(at("a<br/>b", 1), "a<br/><a id=\"filepos1\"></a>b");
    }

    #[test]
    fn test_second_anchor_on_same_tag() {
        let text = "x<div>y";
        let positions: BTreeSet<usize> = [1, 3].into_iter().collect();
        let out = String::from_utf8(add_anchors(text.as_bytes(), &positions)).unwrap();
        assert_eq!(out, "x<div filepos-id=\"filepos1\"><a id=\"filepos3\"></a>y");
    }

    #[test]
    fn test_anchor_past_end() {
        assert_eq!(at("abc", 10), "abc<a id=\"filepos10\"></a>");
    }

    #[test]
    fn test_links_and_targets_round_trip() {
        let text = "<a filepos=0000000042>jump</a><p>intro</p><h2>Chapter</h2>";
        let out = anchored(text);
        assert!(out.contains("<h2 filepos-id=\"filepos42\">"));
        // Original bytes survive in order
        let stripped = out.replace(" filepos-id=\"filepos42\"", "");
        assert_eq!(stripped, text);
    }

    #[test]
    fn test_finalize_link_attrs() {
        let mut tag = Tag::new("a");
        tag.set("filepos", "0000000042");
        finalize_link_attrs(&mut tag);
        assert_eq!(tag.get("href"), Some("#filepos42"));
        assert!(!tag.has("filepos"));

        let mut tag = Tag::new("h2");
        tag.set("name", "old");
        tag.set(ANCHOR_ATTR, "filepos30");
        finalize_link_attrs(&mut tag);
        assert_eq!(tag.get("id"), Some("filepos30"));
        assert_eq!(tag.get("name"), Some("filepos30"));

        let mut tag = Tag::new("a");
        tag.set("filepos", "abc");
        finalize_link_attrs(&mut tag);
        assert!(!tag.has("href"));
    }
}
