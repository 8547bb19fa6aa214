//! Table of contents recovered from the book's own TOC page.
//!
//! MOBI files carry no navigation structure; the guide's `toc` reference
//! points at an HTML page of links instead. Links are harvested from that
//! page up to the next page break, and their left indentation is clustered
//! into nesting levels.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use mobi_core::book::{GuideRef, Toc, TocEntry};

use crate::markup::{decode_entities, tokenize, Tag, Token};
use crate::styles::{declaration, unit_convert, StyleRules};

static ABSOLUTE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+://").expect("valid regex"));

/// More distinct indents than this are treated as noise and left flat.
const MAX_LEVELS: usize = 6;

/// One harvested link, before nesting.
#[derive(Debug, Clone, PartialEq)]
pub struct TocItem {
    pub title: String,
    pub href: String,
    /// Left indentation in points
    pub left_space: i64,
}

/// Build the navigation tree for the normalized document `html`.
pub fn build_toc(html: &str, html_filename: &str, guide: &[GuideRef], styles: &StyleRules) -> Toc {
    let mut toc = structure_toc(harvest_toc(html, html_filename, guide, styles));
    toc.rationalize_play_orders();
    toc
}

/// Links on the page the guide's `toc` reference points at, in document
/// order, stopping at the first page break after at least one link.
pub fn harvest_toc(
    html: &str,
    html_filename: &str,
    guide: &[GuideRef],
    styles: &StyleRules,
) -> Vec<TocItem> {
    let Some(target) = guide
        .iter()
        .find(|r| r.ref_type.eq_ignore_ascii_case("toc"))
        .and_then(|r| r.href.split_once('#'))
        .map(|(_, fragment)| fragment.to_string())
    else {
        return Vec::new();
    };
    let Ok(tokens) = tokenize(html) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    let mut ancestors: Vec<Tag> = Vec::new();
    let mut reached = false;
    // (href, left space, text parts, stack depth of the <a>)
    let mut pending: Option<(String, i64, Vec<String>, usize)> = None;

    for token in tokens {
        match token {
            Token::StartTag(tag) => {
                if !reached && tag.get("id") == Some(target.as_str()) {
                    reached = true;
                }
                if reached && !items.is_empty() && tag.has_class("mbp_pagebreak") {
                    break;
                }
                if reached && pending.is_none() && tag.name == "a" {
                    if let Some(href) = tag.get("href").filter(|h| !ABSOLUTE_URL.is_match(h)) {
                        let href = if href.starts_with('#') {
                            format!("{}{}", html_filename, href)
                        } else {
                            href.to_string()
                        };
                        let left_space = left_whitespace(&tag, &ancestors, styles);
                        pending = Some((href, left_space, Vec::new(), ancestors.len()));
                    }
                }
                if !tag.is_void() {
                    ancestors.push(tag);
                }
            }
            Token::EndTag(name) => {
                if let Some(pos) = ancestors.iter().rposition(|t| t.name == name) {
                    ancestors.truncate(pos);
                }
                let closed = matches!(&pending, Some((_, _, _, depth)) if ancestors.len() <= *depth);
                if closed {
                    if let Some((href, left_space, parts, _)) = pending.take() {
                        let title = decode_entities(&parts.join(" "));
                        if !title.is_empty() {
                            items.push(TocItem {
                                title,
                                href,
                                left_space,
                            });
                        }
                    }
                }
            }
            Token::Text(text) => {
                if let Some((_, _, parts, _)) = pending.as_mut() {
                    let part = text.trim();
                    if !part.is_empty() {
                        parts.push(part.to_string());
                    }
                }
            }
            Token::Comment(_) | Token::Decl(_) => {}
        }
    }
    items
}

/// Indentation of `tag`: its own, or that of the nearest ancestor with a
/// non-zero one.
fn left_whitespace(tag: &Tag, ancestors: &[Tag], styles: &StyleRules) -> i64 {
    std::iter::once(tag)
        .chain(ancestors.iter().rev())
        .map(|t| element_whitespace(t, styles))
        .find(|&ws| ws != 0.0)
        .unwrap_or(0.0) as i64
}

fn element_whitespace(tag: &Tag, styles: &StyleRules) -> f64 {
    let (mut margin, mut indent) = match tag.name.as_str() {
        "p" => (0.0, 18.0),
        "blockquote" => (24.0, 0.0),
        _ => (0.0, 0.0),
    };
    let classes = tag.get("class").unwrap_or("");
    for rule in classes.split_whitespace().filter_map(|c| styles.get(c)) {
        if let Some(v) = declaration(rule, "margin-left").and_then(unit_convert) {
            margin = v;
        }
        if let Some(v) = declaration(rule, "text-indent").and_then(unit_convert) {
            indent = v;
        }
    }
    margin + indent
}

/// Nest items by indentation: each distinct indent is a level, and an item
/// becomes a child of the most recent item on a shallower level.
pub fn structure_toc(items: Vec<TocItem>) -> Toc {
    let levels: Vec<i64> = items
        .iter()
        .map(|i| i.left_space)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut toc = Toc::new();
    if levels.len() < 2 || levels.len() > MAX_LEVELS {
        for item in items {
            toc.add(TocEntry::new(item.title, item.href));
        }
        return toc;
    }

    // Path (child indices from the root) of the last entry seen per level
    let mut last_found: Vec<Option<Vec<usize>>> = vec![None; levels.len()];
    for item in items {
        let level = levels.binary_search(&item.left_space).unwrap_or(0);
        let parent = last_found[..level].iter().rev().find_map(|p| p.clone());
        let entry = TocEntry::new(item.title, item.href);

        let path = match parent {
            Some(mut path) => {
                let Some(node) = entry_at(&mut toc, &path) else {
                    continue;
                };
                node.add_child(entry);
                path.push(node.children.len() - 1);
                path
            }
            None => {
                toc.add(entry);
                vec![toc.entries.len() - 1]
            }
        };
        last_found[level] = Some(path);
        for slot in last_found.iter_mut().skip(level + 1) {
            *slot = None;
        }
    }
    toc
}

fn entry_at<'a>(toc: &'a mut Toc, path: &[usize]) -> Option<&'a mut TocEntry> {
    let (first, rest) = path.split_first()?;
    let mut node = toc.entries.get_mut(*first)?;
    for &i in rest {
        node = node.children.get_mut(i)?;
    }
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, left_space: i64) -> TocItem {
        TocItem {
            title: title.to_string(),
            href: format!("b.html#{}", title),
            left_space,
        }
    }

    fn toc_guide() -> Vec<GuideRef> {
        vec![GuideRef::new("toc", "Table of Contents", "b.html#filepos100")]
    }

    #[test]
    fn test_harvest_from_toc_page() {
        let html = "<html><head></head><body><p>Intro <a href=\"#filepos1\">early</a></p>\
            <h2 id=\"filepos100\">Contents</h2>\
            <p><a href=\"#filepos200\">Chapter <b>One</b></a></p>\
            <p><a href=\"http://example.com\">web</a></p>\
            <p><a href=\"#filepos300\">Tom &amp; Jerry</a></p>\
            <div class=\"mbp_pagebreak\" />\
            <p><a href=\"#filepos400\">after break</a></p></body></html>";
        let items = harvest_toc(html, "b.html", &toc_guide(), &StyleRules::new());
        let titles: Vec<&str> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Chapter One", "Tom & Jerry"]);
        assert_eq!(items[0].href, "b.html#filepos200");
        assert_eq!(items[0].left_space, 18);
    }

    #[test]
    fn test_no_toc_reference() {
        let html = "<body><a href=\"#x\">x</a></body>";
        assert!(harvest_toc(html, "b.html", &[], &StyleRules::new()).is_empty());
    }

    #[test]
    fn test_indent_from_class_rules() {
        let mut styles = StyleRules::new();
        let deep = styles.class_for("text-indent: 0; margin-left: 3em", 5);
        let html = format!(
            "<body><div id=\"filepos100\"></div>\
             <div><a href=\"#a\">A</a></div>\
             <div class=\"{}\"><a href=\"#b\">B</a></div>\
             <blockquote><a href=\"#c\">C</a></blockquote></body>",
            deep
        );
        let items = harvest_toc(&html, "b.html", &toc_guide(), &styles);
        let spaces: Vec<i64> = items.iter().map(|i| i.left_space).collect();
        assert_eq!(spaces, vec![0, 36, 24]);
    }

    #[test]
    fn test_structure_nests_by_indent() {
        let toc = structure_toc(vec![
            item("part1", 0),
            item("ch1", 20),
            item("sec1", 40),
            item("ch2", 20),
            item("part2", 0),
            item("ch3", 20),
        ]);
        assert_eq!(toc.entries.len(), 2);
        assert_eq!(toc.entries[0].children.len(), 2);
        assert_eq!(toc.entries[0].children[0].children[0].title, "sec1");
        assert_eq!(toc.entries[1].children[0].title, "ch3");
        assert_eq!(toc.depth(), 3);
    }

    #[test]
    fn test_structure_child_before_any_parent() {
        let toc = structure_toc(vec![item("orphan", 30), item("top", 0), item("child", 30)]);
        assert_eq!(toc.entries.len(), 2);
        assert_eq!(toc.entries[0].title, "orphan");
        assert_eq!(toc.entries[1].children[0].title, "child");
    }

    #[test]
    fn test_too_many_levels_stay_flat() {
        let items: Vec<TocItem> = (0..7).map(|i| item(&format!("e{i}"), i * 10)).collect();
        let toc = structure_toc(items);
        assert_eq!(toc.entries.len(), 7);
        assert_eq!(toc.depth(), 1);
    }

    #[test]
    fn test_build_toc_assigns_play_orders() {
        let html = "<body><h1 id=\"filepos100\">TOC</h1>\
            <p><a href=\"#filepos1\">One</a></p>\
            <blockquote><p><a href=\"#filepos2\">Two</a></p></blockquote></body>";
        let toc = build_toc(html, "b.html", &toc_guide(), &StyleRules::new());
        let orders: Vec<Option<u32>> = toc.iter_depth_first().map(|e| e.play_order).collect();
        assert_eq!(orders, vec![Some(1), Some(2)]);
        assert_eq!(toc.entries.len(), 2);
    }
}
