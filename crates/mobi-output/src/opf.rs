//! OPF 2.0 package document.

use mobi_core::book::BookDocument;
use mobi_utils::xml::XmlBuilder;

/// Href of the NCX document inside the output directory.
pub const NCX_HREF: &str = "toc.ncx";

/// Split a `urn:<scheme>:<value>` identifier into its OPF scheme and value.
fn identifier_scheme(identifier: &str) -> (Option<&'static str>, &str) {
    for (prefix, scheme) in [
        ("urn:isbn:", "ISBN"),
        ("urn:asin:", "ASIN"),
        ("urn:uuid:", "UUID"),
    ] {
        if let Some(value) = identifier.strip_prefix(prefix) {
            return (Some(scheme), value);
        }
    }
    (None, identifier)
}

pub fn generate_opf(book: &BookDocument, with_ncx: bool) -> String {
    let meta = &book.metadata;
    let title = meta.title().unwrap_or("Unknown");
    let language = meta.language().unwrap_or("en");

    let mut xml = XmlBuilder::new();
    xml.open_tag(
        "package",
        &[
            ("xmlns", "http://www.idpf.org/2007/opf"),
            ("unique-identifier", "uid"),
            ("version", "2.0"),
        ],
    );

    xml.open_tag(
        "metadata",
        &[
            ("xmlns:dc", "http://purl.org/dc/elements/1.1/"),
            ("xmlns:opf", "http://www.idpf.org/2007/opf"),
        ],
    );
    xml.text_element("dc:title", title, &[]);
    for author in meta.authors() {
        xml.text_element("dc:creator", author, &[("opf:role", "aut")]);
    }
    for contributor in meta.get("contributor").unwrap_or_default() {
        xml.text_element("dc:contributor", contributor, &[("opf:role", "bkp")]);
    }
    if let Some(publisher) = meta.publisher() {
        xml.text_element("dc:publisher", publisher, &[]);
    }
    if let Some(description) = meta.description() {
        xml.text_element("dc:description", description, &[]);
    }
    xml.text_element("dc:language", language, &[]);

    let identifiers = meta.get("identifier").unwrap_or_default();
    for (i, identifier) in identifiers.iter().enumerate() {
        let (scheme, value) = identifier_scheme(identifier);
        let mut attrs: Vec<(&str, &str)> = Vec::new();
        if i == 0 {
            attrs.push(("id", "uid"));
        }
        if let Some(scheme) = scheme {
            attrs.push(("opf:scheme", scheme));
        }
        xml.text_element("dc:identifier", value, &attrs);
    }
    for subject in meta.get("subject").unwrap_or_default() {
        xml.text_element("dc:subject", subject, &[]);
    }
    if let Some(date) = meta.date() {
        xml.text_element("dc:date", date, &[]);
    }
    if let Some(rights) = meta.get_first_value("rights") {
        xml.text_element("dc:rights", rights, &[]);
    }
    if let Some(source) = meta.get_first_value("source") {
        xml.text_element("dc:source", source, &[]);
    }
    let cover_id = book
        .cover
        .as_deref()
        .and_then(|href| book.manifest.by_href(href))
        .map(|item| item.id.as_str());
    if let Some(id) = cover_id {
        xml.empty_tag("meta", &[("name", "cover"), ("content", id)]);
    }
    xml.close_tag("metadata");

    xml.open_tag("manifest", &[]);
    for item in book.manifest.iter() {
        xml.empty_tag(
            "item",
            &[
                ("id", &item.id),
                ("href", &item.href),
                ("media-type", &item.media_type),
            ],
        );
    }
    if with_ncx {
        xml.empty_tag(
            "item",
            &[
                ("id", "ncx"),
                ("href", NCX_HREF),
                ("media-type", "application/x-dtbncx+xml"),
            ],
        );
    }
    xml.close_tag("manifest");

    if with_ncx {
        xml.open_tag("spine", &[("toc", "ncx")]);
    } else {
        xml.open_tag("spine", &[]);
    }
    for spine_item in book.spine.iter() {
        if spine_item.linear {
            xml.empty_tag("itemref", &[("idref", &spine_item.idref)]);
        } else {
            xml.empty_tag("itemref", &[("idref", &spine_item.idref), ("linear", "no")]);
        }
    }
    xml.close_tag("spine");

    if !book.guide.is_empty() {
        xml.open_tag("guide", &[]);
        for guide_ref in book.guide.iter() {
            xml.empty_tag(
                "reference",
                &[
                    ("type", &guide_ref.ref_type),
                    ("title", &guide_ref.title),
                    ("href", &guide_ref.href),
                ],
            );
        }
        xml.close_tag("guide");
    }

    xml.close_tag("package");
    xml.build()
}
