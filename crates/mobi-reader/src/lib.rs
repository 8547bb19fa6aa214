//! MOBI input plugin: decodes a PalmDB-wrapped Mobipocket book into a
//! `BookDocument` holding one normalized HTML document, its stylesheet and
//! the book's images re-encoded as JPEG.
//!
//! Stages: PalmDB container → book header and EXTH → text records
//! (PalmDOC or Huff/CDIC) → `filepos` anchors → HTML normalizer → images
//! → TOC heuristic.

pub mod anchors;
pub mod exth;
pub mod header;
pub mod huffcdic;
pub mod images;
pub mod markup;
pub mod normalize;
pub mod palmdb;
pub mod palmdoc;
pub mod styles;
pub mod text;
pub mod toc;

use std::path::Path;

use mobi_core::book::{BookDocument, GuideRef, ManifestData, ManifestItem, SourceInfo};
use mobi_core::error::Result;
use mobi_core::options::DecodeOptions;
use mobi_core::plugin::{DecodeContext, InputPlugin};
use mobi_utils::fs::sanitize_file_name;

use crate::header::{read_book_header, BookHeader};
use crate::images::{extract_images, ExtractedImages};
use crate::normalize::{normalize, NormalizeContext, NormalizedBook};
use crate::palmdb::PalmDb;
use crate::styles::StyleRules;

pub use crate::images::ImageCrateCodec;

/// File name of the generated stylesheet.
pub const STYLESHEET_HREF: &str = "styles.css";
/// Directory, relative to the output root, holding the images.
pub const IMAGES_DIR: &str = "images";

pub struct MobiInputPlugin;

impl InputPlugin for MobiInputPlugin {
    fn name(&self) -> &str {
        "MOBI Input"
    }

    fn convert(
        &self,
        input_path: &Path,
        options: &DecodeOptions,
        ctx: &DecodeContext<'_>,
    ) -> Result<BookDocument> {
        log::info!("Reading MOBI: {}", input_path.display());
        let data = std::fs::read(input_path)?;
        decode_book(data, options, ctx)
    }
}

/// Decode an in-memory MOBI file.
pub fn decode_book(data: Vec<u8>, options: &DecodeOptions, ctx: &DecodeContext<'_>) -> Result<BookDocument> {
    let pdb = PalmDb::parse(data)?;
    let header = read_book_header(&pdb, options, ctx.log)?;
    ctx.report_progress(0.05, "Read book header");
    ctx.check_cancelled()?;

    let extra_flags = if options.try_extra_data_fix {
        text::detect_extra_flags(&pdb, &header, ctx.log)
    } else {
        header.extra_flags
    };
    let stream = text::extract_text(&pdb, &header, extra_flags, ctx)?;

    let mut positions = anchors::harvest_positions(&stream.bytes);
    let start_offset = header
        .exth
        .as_ref()
        .and_then(|e| e.start_offset)
        .map(|offset| offset as usize)
        .filter(|&offset| offset < stream.bytes.len());
    if let Some(offset) = start_offset {
        positions.insert(offset);
    }
    let anchored = anchors::add_anchors(&stream.bytes, &positions);
    let title = header.display_title(pdb.name()).trim().to_string();
    let mut markup = text::decode_markup(&anchored, header.encoding);
    if header.ancient && !text::has_html_prefix(&stream.bytes) {
        markup = text::wrap_plain_text(&markup, &title);
    }

    let images = if options.extract_images {
        extract_images(&pdb, &header, &stream.processed, options, ctx)?
    } else {
        ExtractedImages::default()
    };

    let mut book = BookDocument::new(sanitize_file_name(pdb.name()));
    let html_filename = book.html_filename();
    let normalize_ctx = NormalizeContext {
        mobi_version: header.mobi_version,
        html_filename: &html_filename,
        image_map: &images.by_recindex,
        fallback_title: &title,
    };
    let normalized = match normalize(&markup, &normalize_ctx, ctx.log) {
        Ok(normalized) => normalized,
        Err(e) => {
            ctx.log.error(&format!("{}; emitting the markup unnormalized", e));
            NormalizedBook {
                html: markup.clone(),
                styles: StyleRules::new(),
                guide: Vec::new(),
                title: title.clone(),
            }
        }
    };

    if options.generate_ncx {
        book.toc = toc::build_toc(
            &normalized.html,
            &html_filename,
            &normalized.guide,
            &normalized.styles,
        );
    }
    if options.debug {
        book.raw_markup = Some(markup);
    }

    fill_metadata(&mut book, &header, &title);
    fill_manifest(&mut book, normalized, &images, &header);
    if let Some(offset) = start_offset.filter(|_| book.guide.get("text").is_none()) {
        let href = format!("{}#filepos{}", html_filename, offset);
        book.guide.add(GuideRef::new("text", "Start", href));
    }
    book.source = SourceInfo {
        mobi_version: header.mobi_version,
        compression: header.compression_code,
        kf8_boundary: header.joint_kf8_boundary(),
        joint_kf8: header.joint_kf8_boundary().is_some(),
        kf8_version: header.kf8_version(),
    };

    ctx.report_progress(0.85, "Decoded book");
    log::info!(
        "Decoded MOBI: \"{}\" with {} images, {} TOC entries",
        title,
        images.len(),
        book.toc.iter_depth_first().count()
    );
    Ok(book)
}

fn fill_manifest(
    book: &mut BookDocument,
    normalized: NormalizedBook,
    images: &ExtractedImages,
    header: &BookHeader,
) {
    let html_filename = book.html_filename();
    book.manifest.add(ManifestItem::new(
        "html",
        html_filename,
        "text/html",
        ManifestData::Html(normalized.html),
    ));
    book.manifest.add(ManifestItem::new(
        "css",
        STYLESHEET_HREF,
        "text/css",
        ManifestData::Css(normalized.styles.to_css()),
    ));
    for image in &images.images {
        let stem = image.file_name.trim_end_matches(".jpg");
        book.manifest.add(ManifestItem::new(
            format!("image{}", stem),
            format!("{}/{}", IMAGES_DIR, image.file_name),
            "image/jpeg",
            ManifestData::Binary(image.data.clone()),
        ));
    }
    book.spine.push("html", true);

    for reference in normalized.guide {
        book.guide.add(reference);
    }
    if let Some(cover) = images.cover(header.exth.as_ref()) {
        let href = format!("{}/{}", IMAGES_DIR, cover);
        book.guide.add(GuideRef::new("cover", "Cover", href.clone()));
        book.cover = Some(href);
    }
}

fn fill_metadata(book: &mut BookDocument, header: &BookHeader, title: &str) {
    let meta = &mut book.metadata;
    meta.set_title(title);
    meta.set("language", header.language());

    let mut identifiers = Vec::new();
    if let Some(exth) = header.exth.as_ref() {
        for author in &exth.authors {
            meta.add("creator", author.as_str());
        }
        if let Some(publisher) = &exth.publisher {
            meta.set("publisher", publisher.as_str());
        }
        if let Some(description) = &exth.description {
            meta.set("description", description.as_str());
        }
        for subject in &exth.subjects {
            meta.add("subject", subject.as_str());
        }
        if let Some(date) = &exth.pubdate {
            meta.set("date", date.as_str());
        }
        if let Some(rights) = &exth.rights {
            meta.set("rights", rights.as_str());
        }
        if let Some(contributor) = &exth.contributor {
            meta.add("contributor", contributor.as_str());
        }
        if let Some(source) = &exth.source {
            meta.set("source", source.as_str());
        }
        if let Some(isbn) = &exth.isbn {
            identifiers.push(format!("urn:isbn:{}", isbn));
        }
        if let Some(asin) = &exth.asin {
            identifiers.push(format!("urn:asin:{}", asin));
        }
        if let Some(uuid) = &exth.uuid {
            identifiers.push(format!("urn:uuid:{}", uuid));
        }
    }
    if !meta.contains("creator") {
        meta.add("creator", "Unknown");
    }
    if identifiers.is_empty() {
        identifiers.push(format!("urn:uuid:{}", uuid::Uuid::new_v4()));
    }
    book.uid = identifiers.first().cloned();
    for id in identifiers {
        book.metadata.add("identifier", id);
    }
}
