//! Book document intermediate representation.
//!
//! The decoder fills a `BookDocument`; the packager serializes it to disk.
//! Input plugin → BookDocument → output plugin.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The central intermediate representation for an unpacked book.
#[derive(Debug, Clone)]
pub struct BookDocument {
    /// Dublin Core metadata harvested from the MOBI and EXTH headers
    pub metadata: Metadata,
    /// All content items (the HTML document, stylesheet, images)
    pub manifest: Manifest,
    /// Reading order of content documents
    pub spine: Spine,
    /// Hierarchical table of contents, when one could be derived
    pub toc: Toc,
    /// Standard section references (cover, toc page, etc.)
    pub guide: Guide,
    /// Sanitized PalmDB name, used as the output file stem
    pub name: String,
    /// Unique book identifier
    pub uid: Option<String>,
    /// Manifest href of the cover image, if it was extracted
    pub cover: Option<String>,
    /// Markup before normalization, retained in debug mode
    pub raw_markup: Option<String>,
    /// Container facts recorded for downstream consumers
    pub source: SourceInfo,
}

impl BookDocument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: Metadata::new(),
            manifest: Manifest::new(),
            spine: Spine::new(),
            toc: Toc::new(),
            guide: Guide::new(),
            name: name.into(),
            uid: None,
            cover: None,
            raw_markup: None,
            source: SourceInfo::default(),
        }
    }

    /// Filename of the single HTML document.
    pub fn html_filename(&self) -> String {
        format!("{}.html", self.name)
    }

    /// Filename of the OPF package document.
    pub fn opf_filename(&self) -> String {
        format!("{}.opf", self.name)
    }
}

/// Facts about the container the book was decoded from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub mobi_version: u32,
    pub compression: u16,
    /// Section index of the `BOUNDARY` record in a joint MOBI6/KF8 file
    pub kf8_boundary: Option<usize>,
    pub joint_kf8: bool,
    /// Format version of the KF8 part, standalone or joint
    pub kf8_version: Option<u32>,
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Dublin Core metadata stored as a multimap: one term can have multiple
/// values (e.g., multiple `creator` entries for co-authors).
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    items: HashMap<String, Vec<String>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
        }
    }

    /// Add a value for the given term, keeping existing ones.
    pub fn add(&mut self, term: impl Into<String>, value: impl Into<String>) {
        self.items.entry(term.into()).or_default().push(value.into());
    }

    /// Get all values for a term.
    pub fn get(&self, term: &str) -> Option<&[String]> {
        self.items.get(term).map(|v| v.as_slice())
    }

    /// Get the first value as a string, or None.
    pub fn get_first_value(&self, term: &str) -> Option<&str> {
        self.items
            .get(term)
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    /// Set a term to a single value (replacing any existing).
    pub fn set(&mut self, term: impl Into<String>, value: impl Into<String>) {
        self.items.insert(term.into(), vec![value.into()]);
    }

    /// Check if a term exists.
    pub fn contains(&self, term: &str) -> bool {
        self.items.contains_key(term)
    }

    // -- Convenience accessors for common DC terms --

    pub fn title(&self) -> Option<&str> {
        self.get_first_value("title")
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        let t = title.into();
        let trimmed = t.trim();
        if !trimmed.is_empty() {
            self.set("title", trimmed.to_string());
        }
    }

    pub fn authors(&self) -> Vec<&str> {
        self.get("creator")
            .map(|items| items.iter().map(|i| i.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn language(&self) -> Option<&str> {
        self.get_first_value("language")
    }

    pub fn description(&self) -> Option<&str> {
        self.get_first_value("description")
    }

    pub fn publisher(&self) -> Option<&str> {
        self.get_first_value("publisher")
    }

    pub fn date(&self) -> Option<&str> {
        self.get_first_value("date")
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Collection of all content items in the book, indexed by id and by href.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    items: Vec<ManifestItem>,
    id_index: HashMap<String, usize>,
    href_index: HashMap<String, usize>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a manifest item. Returns the index.
    pub fn add(&mut self, item: ManifestItem) -> usize {
        let idx = self.items.len();
        self.id_index.insert(item.id.clone(), idx);
        self.href_index.insert(item.href.clone(), idx);
        self.items.push(item);
        idx
    }

    /// Get item by id.
    pub fn by_id(&self, id: &str) -> Option<&ManifestItem> {
        self.id_index.get(id).map(|&idx| &self.items[idx])
    }

    /// Get item by href.
    pub fn by_href(&self, href: &str) -> Option<&ManifestItem> {
        self.href_index.get(href).map(|&idx| &self.items[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManifestItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get items matching a media type prefix (e.g., "image/").
    pub fn items_of_type(&self, media_type_prefix: &str) -> Vec<&ManifestItem> {
        self.items
            .iter()
            .filter(|item| item.media_type.starts_with(media_type_prefix))
            .collect()
    }
}

/// A single item in the manifest.
#[derive(Debug, Clone)]
pub struct ManifestItem {
    /// Unique identifier within the manifest
    pub id: String,
    /// Path relative to the output directory
    pub href: String,
    /// MIME type (e.g., "text/html", "image/jpeg")
    pub media_type: String,
    pub data: ManifestData,
}

impl ManifestItem {
    pub fn new(
        id: impl Into<String>,
        href: impl Into<String>,
        media_type: impl Into<String>,
        data: ManifestData,
    ) -> Self {
        Self {
            id: id.into(),
            href: href.into(),
            media_type: media_type.into(),
            data,
        }
    }

    pub fn is_html(&self) -> bool {
        self.media_type == "text/html" || self.media_type == "application/xhtml+xml"
    }

    pub fn is_css(&self) -> bool {
        self.media_type == "text/css"
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }
}

/// Content data for a manifest item.
#[derive(Debug, Clone)]
pub enum ManifestData {
    /// Normalized HTML document
    Html(String),
    /// CSS stylesheet source
    Css(String),
    /// Raw binary data (images)
    Binary(Vec<u8>),
}

impl ManifestData {
    pub fn as_html(&self) -> Option<&str> {
        match self {
            ManifestData::Html(s) => Some(s),
            _ => None,
        }
    }

    /// Bytes as they are written to disk.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ManifestData::Html(s) | ManifestData::Css(s) => s.as_bytes(),
            ManifestData::Binary(b) => b,
        }
    }
}

// ---------------------------------------------------------------------------
// Spine
// ---------------------------------------------------------------------------

/// Ordered reading sequence of content documents.
#[derive(Debug, Clone, Default)]
pub struct Spine {
    items: Vec<SpineItem>,
}

#[derive(Debug, Clone)]
pub struct SpineItem {
    /// ID referencing a manifest item
    pub idref: String,
    /// Whether this item is part of the linear reading order
    pub linear: bool,
}

impl Spine {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Add an item to the end of the spine.
    pub fn push(&mut self, idref: impl Into<String>, linear: bool) {
        self.items.push(SpineItem {
            idref: idref.into(),
            linear,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpineItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Table of Contents
// ---------------------------------------------------------------------------

/// Hierarchical navigation tree.
#[derive(Debug, Clone, Default)]
pub struct Toc {
    /// Top-level TOC entries
    pub entries: Vec<TocEntry>,
}

impl Toc {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, entry: TocEntry) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate depth-first over all entries.
    pub fn iter_depth_first(&self) -> TocIter<'_> {
        TocIter {
            stack: self.entries.iter().rev().collect(),
        }
    }

    /// Depth of the deepest branch (0 for an empty TOC).
    pub fn depth(&self) -> usize {
        self.entries.iter().map(TocEntry::depth).max().unwrap_or(0)
    }

    /// Assign sequential play orders in depth-first order.
    pub fn rationalize_play_orders(&mut self) {
        let mut order = 1;
        for entry in &mut self.entries {
            entry.rationalize_play_orders_recursive(&mut order);
        }
    }
}

#[derive(Debug, Clone)]
pub struct TocEntry {
    pub title: String,
    pub href: String,
    pub children: Vec<TocEntry>,
    pub play_order: Option<u32>,
}

impl TocEntry {
    pub fn new(title: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            href: href.into(),
            children: Vec::new(),
            play_order: None,
        }
    }

    pub fn add_child(&mut self, child: TocEntry) {
        self.children.push(child);
    }

    fn depth(&self) -> usize {
        1 + self.children.iter().map(TocEntry::depth).max().unwrap_or(0)
    }

    fn rationalize_play_orders_recursive(&mut self, order: &mut u32) {
        self.play_order = Some(*order);
        *order += 1;
        for child in &mut self.children {
            child.rationalize_play_orders_recursive(order);
        }
    }
}

/// Depth-first iterator over TOC entries.
pub struct TocIter<'a> {
    stack: Vec<&'a TocEntry>,
}

impl<'a> Iterator for TocIter<'a> {
    type Item = &'a TocEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.stack.pop()?;
        // Push children in reverse so first child is popped next
        for child in entry.children.iter().rev() {
            self.stack.push(child);
        }
        Some(entry)
    }
}

// ---------------------------------------------------------------------------
// Guide
// ---------------------------------------------------------------------------

/// Standard section references (cover, table of contents, etc.).
#[derive(Debug, Clone, Default)]
pub struct Guide {
    refs: Vec<GuideRef>,
}

impl Guide {
    pub fn new() -> Self {
        Self { refs: Vec::new() }
    }

    pub fn add(&mut self, reference: GuideRef) {
        // Replace existing reference of same type
        self.refs.retain(|r| r.ref_type != reference.ref_type);
        self.refs.push(reference);
    }

    pub fn get(&self, ref_type: &str) -> Option<&GuideRef> {
        self.refs.iter().find(|r| r.ref_type == ref_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GuideRef> {
        self.refs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuideRef {
    pub ref_type: String,
    pub title: String,
    pub href: String,
}

impl GuideRef {
    pub fn new(
        ref_type: impl Into<String>,
        title: impl Into<String>,
        href: impl Into<String>,
    ) -> Self {
        Self {
            ref_type: ref_type.into(),
            title: title.into(),
            href: href.into(),
        }
    }
}
