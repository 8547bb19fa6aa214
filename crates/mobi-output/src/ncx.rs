//! NCX navigation document with nested navPoints.

use mobi_core::book::{BookDocument, TocEntry};
use mobi_utils::xml::XmlBuilder;

pub fn generate_ncx(book: &BookDocument) -> String {
    let uid = book.uid.as_deref().unwrap_or_default();
    let title = book.metadata.title().unwrap_or("Unknown");
    let depth = book.toc.depth().to_string();

    let mut xml = XmlBuilder::new();
    xml.raw("<!DOCTYPE ncx PUBLIC \"-//NISO//DTD ncx 2005-1//EN\" \"http://www.daisy.org/z3986/2005/ncx-2005-1.dtd\">\n");
    xml.open_tag(
        "ncx",
        &[
            ("xmlns", "http://www.daisy.org/z3986/2005/ncx/"),
            ("version", "2005-1"),
        ],
    );

    xml.open_tag("head", &[]);
    xml.empty_tag("meta", &[("name", "dtb:uid"), ("content", uid)]);
    xml.empty_tag("meta", &[("name", "dtb:depth"), ("content", &depth)]);
    xml.empty_tag("meta", &[("name", "dtb:totalPageCount"), ("content", "0")]);
    xml.empty_tag("meta", &[("name", "dtb:maxPageNumber"), ("content", "0")]);
    xml.close_tag("head");

    xml.open_tag("docTitle", &[]);
    xml.text_element("text", title, &[]);
    xml.close_tag("docTitle");

    xml.open_tag("navMap", &[]);
    let mut counter = 1;
    for entry in &book.toc.entries {
        write_nav_point(&mut xml, entry, &mut counter);
    }
    xml.close_tag("navMap");

    xml.close_tag("ncx");
    xml.build()
}

fn write_nav_point(xml: &mut XmlBuilder, entry: &TocEntry, counter: &mut u32) {
    let play_order = entry.play_order.unwrap_or(*counter).to_string();
    let id = format!("num_{}", counter);
    *counter += 1;

    xml.open_tag("navPoint", &[("id", &id), ("playOrder", &play_order)]);
    xml.open_tag("navLabel", &[]);
    xml.text_element("text", &entry.title, &[]);
    xml.close_tag("navLabel");
    xml.empty_tag("content", &[("src", &entry.href)]);
    for child in &entry.children {
        write_nav_point(xml, child, counter);
    }
    xml.close_tag("navPoint");
}
