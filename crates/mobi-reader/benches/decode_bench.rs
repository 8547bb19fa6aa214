//! Benchmarks for text decompression and the markup passes.

use std::collections::BTreeMap;
use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use mobi_core::diagnostics::MemoryLog;
use mobi_reader::anchors::{add_anchors, harvest_positions};
use mobi_reader::huffcdic::HuffCdicReader;
use mobi_reader::normalize::{normalize, NormalizeContext};
use mobi_reader::palmdoc;

fn sample_markup(paragraphs: usize) -> String {
    let mut html = String::from("<html><head><title>Bench</title></head><body>");
    for i in 0..paragraphs {
        html.push_str(&format!(
            "<p width=\"-20\" align=\"justify\"><a filepos={:010}>Link {}</a> Lorem ipsum \
             dolor sit amet, <b>consectetur</b> adipiscing elit &amp; more.</p>\
             <mbp:pagebreak/>",
            i * 97,
            i
        ));
    }
    html.push_str("</body></html>");
    html
}

/// HUFF record where every byte is a terminal 8-bit code for phrase `255 - byte`.
fn byte_code_huff() -> Vec<u8> {
    let mut out = b"HUFF\x00\x00\x00\x18".to_vec();
    out.extend_from_slice(&24u32.to_be_bytes());
    out.extend_from_slice(&(24 + 1024u32).to_be_bytes());
    out.extend_from_slice(&[0u8; 8]);
    let word = (255u32 << 8) | 0x80 | 8;
    for _ in 0..256 {
        out.extend_from_slice(&word.to_be_bytes());
    }
    out.extend_from_slice(&[0u8; 32 * 8]);
    out
}

fn word_cdic() -> Vec<u8> {
    let words: Vec<Vec<u8>> = (0..256).map(|i| format!("word{} ", i).into_bytes()).collect();
    let mut out = b"CDIC\x00\x00\x00\x10".to_vec();
    out.extend_from_slice(&256u32.to_be_bytes());
    out.extend_from_slice(&8u32.to_be_bytes());
    let mut entries = Vec::new();
    for word in &words {
        out.extend_from_slice(&((words.len() * 2 + entries.len()) as u16).to_be_bytes());
        entries.extend_from_slice(&((word.len() as u16) | 0x8000).to_be_bytes());
        entries.extend_from_slice(word);
    }
    out.extend_from_slice(&entries);
    out
}

fn bench_palmdoc(c: &mut Criterion) {
    let mut group = c.benchmark_group("PalmDOC");
    let text = sample_markup(40);
    let records: Vec<Vec<u8>> = text
        .as_bytes()
        .chunks(4096)
        .map(palmdoc::compress)
        .collect();

    group.bench_function("decompress_records", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(text.len());
            for record in &records {
                palmdoc::decompress_into(black_box(record), &mut out).unwrap();
            }
            black_box(out)
        })
    });

    group.bench_function("compress_4k", |b| {
        let chunk = &text.as_bytes()[..4096.min(text.len())];
        b.iter(|| black_box(palmdoc::compress(black_box(chunk))))
    });
    group.finish();
}

fn bench_huffcdic(c: &mut Criterion) {
    let huff = byte_code_huff();
    let cdic = word_cdic();
    let record: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 256) as u8).collect();

    c.bench_function("HuffCdic/decompress_4k_codes", |b| {
        let mut reader = HuffCdicReader::new(&huff, &[cdic.as_slice()]).unwrap();
        b.iter(|| black_box(reader.decompress(black_box(&record)).unwrap()))
    });
}

fn bench_markup(c: &mut Criterion) {
    let mut group = c.benchmark_group("Markup");
    let text = sample_markup(200);

    group.bench_function("anchors_200_links", |b| {
        b.iter(|| {
            let positions = harvest_positions(black_box(text.as_bytes()));
            black_box(add_anchors(text.as_bytes(), &positions))
        })
    });

    group.bench_function("normalize_200_paragraphs", |b| {
        let images = BTreeMap::new();
        let log = MemoryLog::new();
        let ctx = NormalizeContext {
            mobi_version: 6,
            html_filename: "bench.html",
            image_map: &images,
            fallback_title: "Bench",
        };
        b.iter(|| black_box(normalize(black_box(&text), &ctx, &log).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_palmdoc, bench_huffcdic, bench_markup);
criterion_main!(benches);
