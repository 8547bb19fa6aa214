//! HTML normalization of decoded MOBI markup.
//!
//! Two stages: textual repairs on the raw string (control bytes, broken end
//! tags, junk namespaced tags, page breaks, block/inline reordering), then a
//! token pass that merges `<html>`/`<head>`/`<body>`, rewrites MOBI
//! presentational markup and hoists presentational attributes into
//! [`StyleRules`] classes.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use mobi_core::book::GuideRef;
use mobi_core::error::Result;
use mobi_core::plugin::Log;
use mobi_utils::xml::escape_xml_text;

use crate::anchors::{finalize_link_attrs, ANCHOR_ATTR};
use crate::markup::{remove_random_bytes, tokenize, write_start_tag, write_token, Tag, Token};
use crate::styles::{ensure_unit, StyleRules};

static CONTROL_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new("[\x01-\x08\x0b-\x14\x1c-\x1f\u{feff}]").expect("valid regex")
});
static BROKEN_END_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</([a-zA-Z]+)<").expect("valid regex"));
static NAMESPACED_JUNK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</{0,1}[a-zA-Z]+:\s+[^>]*>").expect("valid regex"));
static XML_DECL: Lazy<Regex> = Lazy::new(|| Regex::new(r"<\?xml[^>]*>").expect("valid regex"));
static OFFICE_P: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\s*(/?)\s*o:p[^>]*>").expect("valid regex"));
static EMPTY_SPACER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<div height="0(pt|px|ex|em|%){0,1}"></div>"#).expect("valid regex")
});
static PAGE_BREAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)<\s*/{0,1}\s*mbp:pagebreak((?:\s+[^/>]*){0,1})/{0,1}\s*>\s*(?:<\s*/{0,1}\s*mbp:pagebreak\s*/{0,1}\s*>)*",
    )
    .expect("valid regex")
});
/// Anchor elements the anchor pass placed inside raw text (`<script>`, `<style>`).
static RAW_TEXT_ANCHOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<a id="(filepos\d+)"></a>"#).expect("valid regex"));
static CLASS_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|\s)class\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).expect("valid regex")
});

/// Reorderings that put `<p>` outside inline styling and inside block
/// containers, as `(pattern, replacement)`.
static BLOCK_SWAPS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (
            r"(?i)(?P<styletags>(<(h\d+|i|b|u|em|small|big|strong|tt)>\s*){1,})(?P<para><p(?:\s[^>]*)?>)",
            "${para}${styletags}",
        ),
        (
            r"(?i)(?P<para></p\s*>)\s*(?P<styletags>(</(h\d+|i|b|u|em|small|big|strong|tt)>\s*){1,})",
            "${styletags}${para}",
        ),
        (
            r"(?i)(?P<blockquote>(</(blockquote|div)[^>]*>\s*){1,})(?P<para></p\s*>)",
            "${para}${blockquote}",
        ),
        (
            r"(?i)(?P<para><p(?:\s[^>]*)?>)\s*(?P<blockquote>(<(blockquote|div)[^>]*>\s*){1,})",
            "${blockquote}${para}",
        ),
    ]
    .into_iter()
    .map(|(pat, rep)| (Regex::new(pat).expect("valid regex"), rep))
    .collect()
});

const META_CONTENT_TYPE: &str =
    "<meta http-equiv=\"Content-Type\" content=\"text/html; charset=utf-8\" />";
const LINK_STYLESHEET: &str = "<link rel=\"stylesheet\" type=\"text/css\" href=\"styles.css\" />";

const BLOCK_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6", "div", "p"];
/// Elements removed together with their content.
const DROPPED_ELEMENTS: &[&str] = &["guide", "metadata", "ncx", "script"];
const SPAN_ALIASES: &[&str] = &[
    "country-region",
    "place",
    "placetype",
    "placename",
    "state",
    "city",
    "street",
    "address",
];
const IMAGE_INDEX_ATTRS: &[&str] = &["lowrecindex", "recindex", "hirecindex"];

/// Book facts the token pass needs.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    pub mobi_version: u32,
    /// Filename of the output HTML document, prefixed to guide hrefs
    pub html_filename: &'a str,
    /// Image record index (1-based from the first image) to file name
    pub image_map: &'a BTreeMap<usize, String>,
    /// Title used when the markup has none
    pub fallback_title: &'a str,
}

#[derive(Debug, Clone)]
pub struct NormalizedBook {
    pub html: String,
    pub styles: StyleRules,
    pub guide: Vec<GuideRef>,
    /// Title element content as written to the document
    pub title: String,
}

/// Normalize decoded markup. A tokenizer failure is retried once after
/// stripping random bytes; a second failure is returned as `CorruptMarkup`.
pub fn normalize(markup: &str, ctx: &NormalizeContext<'_>, log: &dyn Log) -> Result<NormalizedBook> {
    let cleaned = cleanup_markup(markup);
    let tokens = match tokenize(&cleaned) {
        Ok(tokens) => tokens,
        Err(e) => {
            log.warn(&format!("{}; retrying after removing random bytes", e));
            tokenize(&remove_random_bytes(&cleaned))?
        }
    };
    Ok(TokenPass::new(ctx, log).run(tokens))
}

/// Textual repairs applied before tokenizing.
pub fn cleanup_markup(markup: &str) -> String {
    let mut html = markup.replace("\r\n", "\n").replace('\r', "\n");
    html = CONTROL_CHARS.replace_all(&html, "").into_owned();
    html = html.replace("</</", "</");
    html = BROKEN_END_TAG.replace_all(&html, "</$1><").into_owned();
    html = html.replace("<mbp: ", "<mbp:");
    html = NAMESPACED_JUNK.replace_all(&html, "").into_owned();
    html = XML_DECL.replace_all(&html, "").into_owned();
    html = OFFICE_P.replace_all(&html, "").into_owned();
    html = EMPTY_SPACER.replace_all(&html, "").into_owned();
    html = html.replace("> <", ">\n<");
    html = PAGE_BREAK
        .replace_all(&html, |caps: &Captures| page_break_div(&caps[1]))
        .into_owned();
    reorder_blocks(html)
}

/// `<div>` replacing a page break, keeping its attributes and adding the
/// `mbp_pagebreak` class to any class it already has.
fn page_break_div(attrs: &str) -> String {
    let Some(caps) = CLASS_ATTR.captures(attrs) else {
        return format!("<div{} class=\"mbp_pagebreak\" />", attrs);
    };
    let whole = caps.get(0).map_or(0..0, |m| m.range());
    let existing = [1, 2, 3]
        .into_iter()
        .find_map(|i| caps.get(i))
        .map_or("", |m| m.as_str().trim());
    let class = if existing.is_empty() {
        "mbp_pagebreak".to_string()
    } else {
        format!("{} mbp_pagebreak", existing)
    };
    format!(
        "<div{} class=\"{}\"{} />",
        &attrs[..whole.start],
        class,
        &attrs[whole.end..]
    )
}

fn reorder_blocks(mut html: String) -> String {
    for _ in 0..10 {
        let mut changed = false;
        for (re, rep) in BLOCK_SWAPS.iter() {
            if re.is_match(&html) {
                let next = re.replace_all(&html, *rep).into_owned();
                changed |= next != html;
                html = next;
            }
        }
        if !changed {
            break;
        }
    }
    html
}

struct TokenPass<'a> {
    ctx: &'a NormalizeContext<'a>,
    log: &'a dyn Log,
    head: Vec<Token>,
    body: Vec<Token>,
    body_tag: Option<Tag>,
    title: Option<String>,
    styles: StyleRules,
    guide: Vec<GuideRef>,
    element_index: usize,
    /// Anchor ids from tags that never reach the body, placed before the
    /// next body token
    stray_anchors: Vec<String>,
}

impl<'a> TokenPass<'a> {
    fn new(ctx: &'a NormalizeContext<'a>, log: &'a dyn Log) -> Self {
        Self {
            ctx,
            log,
            head: Vec::new(),
            body: Vec::new(),
            body_tag: None,
            title: None,
            styles: StyleRules::new(),
            guide: Vec::new(),
            element_index: 0,
            stray_anchors: Vec::new(),
        }
    }

    fn run(mut self, tokens: Vec<Token>) -> NormalizedBook {
        let mut html_tags = 0;
        let mut in_head = false;
        let mut title_buf: Option<String> = None;
        let mut skipping: Option<(String, usize)> = None;

        let mut iter = tokens.into_iter().peekable();
        while let Some(token) = iter.next() {
            if let Some((name, depth)) = skipping.as_mut() {
                match &token {
                    Token::StartTag(tag) => self.keep_stray_anchor(tag),
                    Token::Text(text) => {
                        self.keep_raw_text_anchors(text);
                    }
                    _ => {}
                }
                match &token {
                    Token::StartTag(tag) if tag.name == *name && !tag.self_closing => *depth += 1,
                    Token::EndTag(end) if *end == *name => *depth -= 1,
                    Token::StartTag(tag) if tag.name == "reference" && *name == "guide" => {
                        self.harvest_guide_reference(tag.clone());
                    }
                    _ => {}
                }
                if *depth == 0 {
                    skipping = None;
                }
                continue;
            }

            if let Some(buf) = title_buf.as_mut() {
                match token {
                    Token::Text(text) => buf.push_str(&text),
                    Token::StartTag(ref tag) => self.keep_stray_anchor(tag),
                    Token::EndTag(ref end) if end == "title" => {
                        let text = buf.split_whitespace().collect::<Vec<_>>().join(" ");
                        if self.title.is_none() && !text.is_empty() {
                            self.title = Some(text);
                        }
                        title_buf = None;
                    }
                    _ => {}
                }
                continue;
            }

            match token {
                Token::Decl(_) => {}
                Token::StartTag(tag) => {
                    self.element_index += 1;
                    let name = tag.name.clone();
                    match name.as_str() {
                        "html" => {
                            html_tags += 1;
                            self.keep_stray_anchor(&tag);
                        }
                        "head" => {
                            in_head = true;
                            self.keep_stray_anchor(&tag);
                        }
                        "body" => {
                            in_head = false;
                            if self.body_tag.is_none() {
                                let index = self.element_index;
                                let mut body = tag;
                                self.convert(&mut body, index, false);
                                self.body_tag = Some(body);
                            } else {
                                self.keep_stray_anchor(&tag);
                            }
                        }
                        "title" => {
                            self.keep_stray_anchor(&tag);
                            if !tag.self_closing {
                                title_buf = Some(String::new());
                            }
                        }
                        name if DROPPED_ELEMENTS.contains(&name) => {
                            self.keep_stray_anchor(&tag);
                            if !tag.self_closing {
                                skipping = Some((tag.name.clone(), 1));
                            }
                        }
                        _ if is_generated_head_tag(&tag) => self.keep_stray_anchor(&tag),
                        _ if in_head => {
                            self.keep_stray_anchor(&tag);
                            if is_anchor_element(&tag) {
                                if matches!(iter.peek(), Some(Token::EndTag(end)) if end == "a") {
                                    iter.next();
                                }
                            } else {
                                let mut tag = tag;
                                tag.remove(ANCHOR_ATTR);
                                self.head.push(Token::StartTag(tag));
                            }
                        }
                        _ => {
                            let closes_immediately = matches!(
                                iter.peek(),
                                Some(Token::EndTag(end)) if *end == tag.name
                            );
                            self.push_element(tag, closes_immediately);
                        }
                    }
                }
                Token::EndTag(name) => match name.as_str() {
                    "head" => in_head = false,
                    "html" | "body" => {}
                    other if in_head => self.head.push(Token::EndTag(other.to_string())),
                    other => {
                        self.place_stray_anchors();
                        self.body.push(Token::EndTag(end_tag_alias(other).to_string()));
                    }
                },
                Token::Text(text) => {
                    if in_head || (self.body_tag.is_none() && self.body.is_empty()) {
                        if text.trim().is_empty() {
                            continue;
                        }
                        if in_head {
                            let text = self.keep_raw_text_anchors(&text);
                            self.head.push(Token::Text(text));
                            continue;
                        }
                    }
                    self.place_stray_anchors();
                    self.body.push(Token::Text(text));
                }
                Token::Comment(body) => {
                    if in_head {
                        self.head.push(Token::Comment(body));
                    } else {
                        self.place_stray_anchors();
                        self.body.push(Token::Comment(body));
                    }
                }
            }
        }

        if html_tags == 0 {
            self.log.warn("File does not have opening <html> tag");
        } else if html_tags > 1 {
            self.log.warn("Markup contains multiple <html> tags, merging.");
        }

        self.place_stray_anchors();
        forward_empty_anchors(&mut self.body);
        self.finish()
    }

    /// Remember the anchor id of a tag that is dropped or moved to the head.
    fn keep_stray_anchor(&mut self, tag: &Tag) {
        let id = tag
            .get(ANCHOR_ATTR)
            .or_else(|| tag.get("id").filter(|_| is_anchor_element(tag)));
        if let Some(id) = id {
            self.stray_anchors.push(id.to_string());
        }
    }

    /// Remember anchors embedded in head or dropped text and strip them out.
    fn keep_raw_text_anchors(&mut self, text: &str) -> String {
        for caps in RAW_TEXT_ANCHOR.captures_iter(text) {
            self.stray_anchors.push(caps[1].to_string());
        }
        RAW_TEXT_ANCHOR.replace_all(text, "").into_owned()
    }

    /// Emit the remembered anchors as empty `<a>` elements in the body.
    fn place_stray_anchors(&mut self) {
        for id in self.stray_anchors.drain(..) {
            let mut anchor = Tag::new("a");
            anchor.set("id", id);
            self.body.push(Token::StartTag(anchor));
            self.body.push(Token::EndTag("a".to_string()));
        }
    }

    fn harvest_guide_reference(&mut self, mut tag: Tag) {
        finalize_link_attrs(&mut tag);
        let Some(href) = tag.get("href").filter(|h| !h.is_empty()) else {
            return;
        };
        let ref_type = tag.get("type").unwrap_or("").to_string();
        if ref_type.is_empty() {
            return;
        }
        let title = tag.get("title").unwrap_or("").to_string();
        let href = format!("{}{}", self.ctx.html_filename, href);
        self.guide.push(GuideRef::new(ref_type, title, href));
    }

    fn push_element(&mut self, mut tag: Tag, closes_immediately: bool) {
        self.place_stray_anchors();
        let index = self.element_index;
        let was_hr = tag.name == "hr";
        let spacer = tag.name == "div" && closes_immediately;
        let sized_spacer = self.convert(&mut tag, index, spacer);

        let became_div = was_hr && tag.name == "div";
        self.body.push(Token::StartTag(tag));
        if sized_spacer {
            self.body.push(Token::Text("\u{a0}".to_string()));
        }
        if became_div {
            self.body.push(Token::EndTag("div".to_string()));
        }
    }

    /// Per-element rewrite: link attributes, MOBI presentational tags and
    /// attribute hoisting into a `calibre_N` class. Returns whether an empty
    /// `spacer` div was given an explicit height.
    fn convert(&mut self, tag: &mut Tag, index: usize, spacer: bool) -> bool {
        finalize_link_attrs(tag);
        tag.attrs.retain(|(k, _)| k != "xmlns" && !k.contains(':'));

        if SPAN_ALIASES.contains(&tag.name.as_str()) || matches!(tag.name.as_str(), "content" | "form") {
            tag.name = if SPAN_ALIASES.contains(&tag.name.as_str()) { "span" } else { "div" }.to_string();
            tag.attrs.retain(|(k, _)| k == "id");
            return false;
        }

        let mut styles: Vec<String> = Vec::new();
        if let Some(style) = tag.remove("style") {
            let style = style.trim().trim_end_matches(';').trim();
            if !style.is_empty() {
                styles.push(style.to_string());
            }
        }

        let is_table_part = matches!(tag.name.as_str(), "table" | "td" | "tr");
        let is_img = tag.name == "img";
        let mut sized_spacer = false;
        if let Some(height) = tag.get("height").map(|h| h.trim().to_string()).filter(|_| !is_img) {
            tag.remove("height");
            let usable = !height.contains('<')
                && !height.contains('>')
                && height.contains(|c: char| c.is_ascii_digit());
            if usable && !is_table_part {
                if spacer {
                    styles.push(format!("height: {}", ensure_unit(&height, "px")));
                    sized_spacer = true;
                } else {
                    styles.push(format!("margin-top: {}", ensure_unit(&height, "px")));
                }
            }
        }

        if let Some(width) = tag.get("width").map(|w| w.trim().to_string()).filter(|_| !is_img) {
            tag.remove("width");
            if width.contains(|c: char| c.is_ascii_digit()) && !is_table_part {
                styles.push(format!("text-indent: {}", ensure_unit(&width, "px")));
                if let Some(margin) = width.strip_prefix('-') {
                    styles.push(format!("margin-left: {}", ensure_unit(margin, "px")));
                }
            }
        }

        if let Some(align) = tag.remove("align") {
            let align = align.trim().to_ascii_lowercase();
            if align == "baseline" {
                styles.push(format!("vertical-align: {}", align));
            } else if !align.is_empty() {
                styles.push(format!("text-align: {}", align));
            }
        }

        match tag.name.as_str() {
            "hr" if self.ctx.mobi_version == 1 => {
                tag.name = "div".to_string();
                tag.self_closing = false;
                styles.push("page-break-before: always".to_string());
                styles.push("display: block".to_string());
                styles.push("margin: 0".to_string());
            }
            "i" | "u" | "b" => {
                let class = match tag.name.as_str() {
                    "i" => "italic",
                    "u" => "underline",
                    _ => "bold",
                };
                tag.name = "span".to_string();
                tag.set("class", class);
            }
            "font" => {
                tag.name = "span".to_string();
                if let Some(size) = tag.remove("size") {
                    if let Some(css) = font_size(&size) {
                        styles.push(format!("font-size: {}", css));
                    }
                }
                if let Some(face) = tag.remove("face") {
                    if !face.trim().is_empty() {
                        styles.push(format!("font-family: {}", face.trim()));
                    }
                }
            }
            "img" => self.rewrite_image(tag),
            _ => {}
        }

        if let Some(color) = tag.remove("color") {
            styles.push(format!("color: {}", color.trim()));
        }
        if let Some(bgcolor) = tag.remove("bgcolor") {
            styles.push(format!("background-color: {}", bgcolor.trim()));
        }

        if !styles.is_empty() {
            let class = self.styles.class_for(&styles.join("; "), index);
            let merged = match tag.get("class").filter(|c| !c.is_empty()) {
                Some(existing) if existing.split_whitespace().any(|c| c == class) => existing.to_string(),
                Some(existing) => format!("{} {}", existing, class),
                None => class,
            };
            tag.set("class", merged);
        }
        sized_spacer
    }

    fn rewrite_image(&self, tag: &mut Tag) {
        let mut recindex = None;
        for attr in IMAGE_INDEX_ATTRS {
            if let Some(value) = tag.remove(attr) {
                recindex = Some(value);
            }
        }
        if let Some(raw) = recindex {
            let file = match raw.trim().parse::<usize>() {
                Ok(n) => self
                    .ctx
                    .image_map
                    .get(&n)
                    .cloned()
                    .unwrap_or_else(|| format!("{:05}.jpg", n)),
                Err(_) => format!("{}.jpg", raw.trim()),
            };
            tag.set("src", format!("images/{}", file));
        }

        for attr in ["width", "height"] {
            let Some(value) = tag.get(attr).map(|v| v.trim().to_ascii_lowercase()) else {
                continue;
            };
            if let Some(em) = value.strip_suffix("em") {
                match em.trim().parse::<f64>() {
                    Ok(n) => {
                        let px = n * 16.0 * (168.451 / 72.0);
                        tag.set(attr, format!("{}px", px as i64));
                    }
                    Err(_) => {
                        tag.remove(attr);
                    }
                }
            } else if value.ends_with('%') {
                tag.remove(attr);
            }
        }
    }

    fn finish(self) -> NormalizedBook {
        let title = self
            .title
            .unwrap_or_else(|| escape_xml_text(self.ctx.fallback_title.trim()));

        let mut html = String::with_capacity(self.body.len() * 16 + 512);
        html.push_str("<html><head>\n");
        html.push_str(&format!("<title>{}</title>\n", title));
        html.push_str(META_CONTENT_TYPE);
        html.push('\n');
        html.push_str(LINK_STYLESHEET);
        html.push('\n');
        for token in &self.head {
            write_token(&mut html, token);
        }
        html.push_str("</head>\n");

        let mut body_tag = self.body_tag.unwrap_or_else(|| Tag::new("body"));
        body_tag.self_closing = false;
        write_start_tag(&mut html, &body_tag);

        let mut body = String::new();
        for token in &self.body {
            write_token(&mut body, token);
        }
        let body = reorder_blocks(body.replace("> <", ">\n<"));
        html.push_str(body.trim_end());
        html.push_str("</body>\n</html>\n");

        NormalizedBook {
            html,
            styles: self.styles,
            guide: self.guide,
            title,
        }
    }
}

/// An empty `filepos` target inserted by the anchor pass.
fn is_anchor_element(tag: &Tag) -> bool {
    tag.name == "a"
        && !tag.has("href")
        && tag.get("id").is_some_and(|id| id.starts_with("filepos"))
}

/// `<meta>` charset declarations and stylesheet links; the document gets
/// exactly one of each regenerated.
fn is_generated_head_tag(tag: &Tag) -> bool {
    match tag.name.as_str() {
        "meta" => {
            tag.has("charset")
                || tag
                    .get("http-equiv")
                    .is_some_and(|v| v.eq_ignore_ascii_case("content-type"))
        }
        "link" => tag
            .get("rel")
            .is_some_and(|v| v.eq_ignore_ascii_case("stylesheet")),
        _ => false,
    }
}

fn end_tag_alias(name: &str) -> &str {
    match name {
        "i" | "u" | "b" | "font" => "span",
        "content" | "form" => "div",
        n if SPAN_ALIASES.contains(&n) => "span",
        n => n,
    }
}

/// CSS `font-size` for an HTML `<font size>` value.
fn font_size(raw: &str) -> Option<&'static str> {
    let raw = raw.trim().to_ascii_lowercase();
    let named = match raw.as_str() {
        "xx-small" => "0.5",
        "x-small" => "1",
        "small" => "2",
        "medium" => "3",
        "large" => "4",
        "x-large" => "5",
        "xx-large" => "6",
        other => other,
    };
    if named.starts_with('+') {
        return Some("larger");
    }
    if named.starts_with('-') {
        return Some("smaller");
    }
    let size: f64 = named.parse().ok()?;
    Some(match size {
        s if s < 1.0 => "xx-small",
        s if s < 2.0 => "x-small",
        s if s < 3.0 => "small",
        s if s < 4.0 => "medium",
        s if s < 5.0 => "large",
        s if s < 6.0 => "x-large",
        _ => "xx-large",
    })
}

/// Move the id of an empty `filepos` anchor onto the block element right
/// after it, or into that block when it already has an id.
fn forward_empty_anchors(tokens: &mut Vec<Token>) {
    let mut i = 0;
    while i + 2 < tokens.len() {
        let anchor_id = match (&tokens[i], &tokens[i + 1]) {
            (Token::StartTag(a), Token::EndTag(end)) if end == "a" && is_anchor_element(a) => {
                a.get("id").map(String::from)
            }
            _ => None,
        };
        let Some(anchor_id) = anchor_id else {
            i += 1;
            continue;
        };

        let mut block = i + 2;
        if matches!(&tokens[block], Token::Text(t) if t.trim().is_empty()) {
            block += 1;
        }
        let is_block = matches!(
            tokens.get(block),
            Some(Token::StartTag(t)) if BLOCK_TAGS.contains(&t.name.as_str()) && !t.self_closing
        );
        if !is_block {
            i += 1;
            continue;
        }

        let has_id = matches!(&tokens[block], Token::StartTag(t) if t.has("id"));
        if has_id {
            let anchor: Vec<Token> = tokens.drain(i..i + 2).collect();
            let insert_at = block - 2 + 1;
            for (k, t) in anchor.into_iter().enumerate() {
                tokens.insert(insert_at + k, t);
            }
            i = insert_at + 2;
        } else {
            if let Token::StartTag(t) = &mut tokens[block] {
                t.set("id", anchor_id);
            }
            tokens.drain(i..i + 2);
        }
    }
}
