//! Stylesheet assembled from presentational attributes.
//!
//! Each element's hoisted declarations are joined into one rule string; equal
//! rule strings share a single `calibre_N` class, `N` being the index of the
//! first element that produced it.

use once_cell::sync::Lazy;
use regex::Regex;

/// Rules every unpacked book starts from.
pub const BASE_CSS: &str = "\
blockquote { margin: 0em 0em 0em 2em; }

p { margin: 0em; text-indent: 1.5em }

.bold { font-weight: bold }

.italic { font-style: italic }

.underline { text-decoration: underline }

.mbp_pagebreak {
    page-break-after: always; margin: 0; display: block
}
";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleRules {
    rules: Vec<(String, String)>,
}

impl StyleRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Class for `rule`, registering it under `calibre_{element_index}` if new.
    pub fn class_for(&mut self, rule: &str, element_index: usize) -> String {
        if let Some((class, _)) = self.rules.iter().find(|(_, r)| r == rule) {
            return class.clone();
        }
        let class = format!("calibre_{}", element_index);
        self.rules.push((class.clone(), rule.to_string()));
        class
    }

    /// Rule text of a generated class.
    pub fn get(&self, class: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|(c, _)| c == class)
            .map(|(_, r)| r.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.rules.iter().map(|(c, r)| (c.as_str(), r.as_str()))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The complete `styles.css`: base rules followed by the generated ones.
    pub fn to_css(&self) -> String {
        let mut css = String::from(BASE_CSS);
        for (class, rule) in &self.rules {
            css.push_str(&format!("\n.{} {{ {} }}\n", class, rule));
        }
        css
    }
}

/// Append `unit` to a length that ends in a bare number.
pub fn ensure_unit(raw: &str, unit: &str) -> String {
    if raw.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{}{}", raw, unit)
    } else {
        raw.to_string()
    }
}

/// Body font size in points used for relative units.
const BASE_FONT_PT: f64 = 12.0;
/// Screen resolution assumed for `px` values.
const DPI: f64 = 166.0;

/// Convert a CSS length to points. Unparseable values yield `None`.
pub fn unit_convert(value: &str) -> Option<f64> {
    static LENGTH: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^\s*(-*[0-9]*\.?[0-9]*)\s*(%|em|ex|en|px|mm|cm|in|pt|pc|rem)?\s*$")
            .expect("valid regex")
    });
    let caps = LENGTH.captures(value)?;
    let number: f64 = caps[1].trim_start_matches("--").parse().ok()?;
    let points = match caps.get(2).map(|m| m.as_str()) {
        None | Some("px") => number * 72.0 / DPI,
        Some("%") => number / 100.0 * BASE_FONT_PT,
        Some("em") | Some("rem") => number * BASE_FONT_PT,
        Some("ex") | Some("en") => number * BASE_FONT_PT / 2.0,
        Some("in") => number * 72.0,
        Some("cm") => number * 72.0 / 2.54,
        Some("mm") => number * 72.0 / 25.4,
        Some("pc") => number * 12.0,
        Some("pt") => number,
        Some(_) => return None,
    };
    Some(points)
}

/// Value of `property` in a `; `-joined declaration list.
pub fn declaration<'a>(rule: &'a str, property: &str) -> Option<&'a str> {
    rule.split(';').find_map(|decl| {
        let (name, value) = decl.split_once(':')?;
        (name.trim().eq_ignore_ascii_case(property)).then(|| value.trim())
    })
}
