//! Image records: sniffing, re-encoding to JPEG and dense file numbering.

use std::collections::{BTreeMap, BTreeSet};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder, RgbImage};

use mobi_core::error::{MobiError, Result};
use mobi_core::options::DecodeOptions;
use mobi_core::plugin::{DecodeContext, ImageCodec, Raster};

use crate::exth::ExthHeader;
use crate::header::BookHeader;
use crate::palmdb::PalmDb;

/// Four-byte prefixes of non-image records found among the image records.
const NON_IMAGE_MAGICS: &[&[u8; 4]] = &[
    b"FLIS", b"FCIS", b"SRCS", b"RESC", b"BOUN", b"FDST", b"DATP", b"AUDI", b"VIDE",
    b"\xe9\x8e\r\n",
];

/// `ImageCodec` backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateCodec;

fn codec_error(err: impl std::fmt::Display) -> MobiError {
    MobiError::ImageDecodeFailed {
        index: 0,
        reason: err.to_string(),
    }
}

impl ImageCodec for ImageCrateCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Raster> {
        let rgb = image::load_from_memory(bytes).map_err(codec_error)?.to_rgb8();
        Ok(Raster {
            width: rgb.width(),
            height: rgb.height(),
            rgb: rgb.into_raw(),
        })
    }

    fn encode_jpeg(&self, raster: &Raster, quality: u8) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
            .write_image(
                &raster.rgb,
                raster.width,
                raster.height,
                ExtendedColorType::Rgb8,
            )
            .map_err(codec_error)?;
        Ok(buf)
    }

    fn downscale(&self, raster: Raster, max_dimension: u32) -> Result<Raster> {
        if max_dimension == 0 || (raster.width <= max_dimension && raster.height <= max_dimension) {
            return Ok(raster);
        }
        let (w, h) = (raster.width, raster.height);
        let (new_w, new_h) = fit_dimensions(w, h, max_dimension, max_dimension);
        let src = RgbImage::from_raw(w, h, raster.rgb)
            .ok_or_else(|| codec_error(format!("raster buffer does not match {}x{}", w, h)))?;
        let resized = image::imageops::resize(&src, new_w, new_h, FilterType::Lanczos3);
        Ok(Raster {
            width: new_w,
            height: new_h,
            rgb: resized.into_raw(),
        })
    }
}

/// Dimensions that fit within `max_w` x `max_h` preserving aspect ratio.
fn fit_dimensions(w: u32, h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    let ratio_w = max_w as f64 / w as f64;
    let ratio_h = max_h as f64 / h as f64;
    let ratio = ratio_w.min(ratio_h);
    let new_w = (w as f64 * ratio).round() as u32;
    let new_h = (h as f64 * ratio).round() as u32;
    (new_w.max(1), new_h.max(1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Gif,
    Png,
    Bmp,
}

/// Identify a supported image payload by its signature.
pub fn sniff(data: &[u8]) -> Option<ImageKind> {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageKind::Jpeg)
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Some(ImageKind::Gif)
    } else if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some(ImageKind::Png)
    } else if data.starts_with(b"BM") {
        Some(ImageKind::Bmp)
    } else {
        None
    }
}

pub fn is_non_image_record(data: &[u8]) -> bool {
    NON_IMAGE_MAGICS.iter().any(|magic| data.starts_with(&magic[..]))
}

/// One re-encoded image.
#[derive(Debug, Clone)]
pub struct ExtractedImage {
    /// `00001.jpg`, `00002.jpg`, ...
    pub file_name: String,
    /// Position relative to the first image record, 1-based, as used by
    /// `recindex` attributes
    pub recindex: usize,
    pub section: usize,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractedImages {
    pub images: Vec<ExtractedImage>,
    /// `recindex` to file name, for the markup rewrite
    pub by_recindex: BTreeMap<usize, String>,
}

impl ExtractedImages {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// File name of the cover: EXTH 201 (or the 202 thumbnail) is an offset
    /// from the first image record, the first image record when both are absent.
    pub fn cover(&self, exth: Option<&ExthHeader>) -> Option<&str> {
        let offset = exth.and_then(|e| e.cover_offset.or(e.thumb_offset));
        let recindex = match offset {
            Some(offset) => (offset as usize).checked_add(1)?,
            None => 1,
        };
        self.by_recindex.get(&recindex).map(String::as_str)
    }
}

/// First section scanned for images. A missing or out-of-range image index
/// means every unprocessed section is a candidate.
fn first_image_section(pdb: &PalmDb, header: &BookHeader) -> usize {
    match header.first_image_index {
        Some(start) if start <= pdb.section_count() => start,
        _ => 0,
    }
}

/// Decode every image record after `first_image_index`, skipping sections
/// already consumed as text or tables. Images that fail to decode are
/// reported and skipped without using up a file number.
pub fn extract_images(
    pdb: &PalmDb,
    header: &BookHeader,
    processed: &BTreeSet<usize>,
    options: &DecodeOptions,
    ctx: &DecodeContext<'_>,
) -> Result<ExtractedImages> {
    let start = first_image_section(pdb, header);
    let end = pdb.section_count();
    let total = end.saturating_sub(start).max(1);
    let mut extracted = ExtractedImages::default();

    for i in start..end {
        if processed.contains(&i) {
            continue;
        }
        let recindex = i - start + 1;
        let data = pdb.section(i).unwrap_or_default();

        if is_non_image_record(data) {
            ctx.log.debug(&format!(
                "Section {} is a {} record, not an image",
                i,
                String::from_utf8_lossy(&data[..4])
            ));
        } else if sniff(data).is_none() {
            ctx.log.debug(&format!("Section {} is not a recognised image", i));
        } else {
            match reencode(data, options, ctx) {
                Ok(jpeg) => {
                    let file_name = format!("{:05}.jpg", extracted.images.len() + 1);
                    extracted.by_recindex.insert(recindex, file_name.clone());
                    extracted.images.push(ExtractedImage {
                        file_name,
                        recindex,
                        section: i,
                        data: jpeg,
                    });
                }
                Err(e) => {
                    let reason = match e {
                        MobiError::ImageDecodeFailed { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    let err = MobiError::ImageDecodeFailed {
                        index: recindex,
                        reason,
                    };
                    ctx.log.warn(&err.to_string());
                }
            }
        }

        ctx.check_cancelled()?;
        ctx.report_progress(
            0.6 + 0.25 * (i - start + 1) as f64 / total as f64,
            "Extracting images",
        );
    }

    log::info!("Extracted {} images", extracted.len());
    Ok(extracted)
}

fn reencode(data: &[u8], options: &DecodeOptions, ctx: &DecodeContext<'_>) -> Result<Vec<u8>> {
    let raster = ctx.codec.decode(data)?;
    let raster = ctx.codec.downscale(raster, options.max_image_dimension)?;
    ctx.codec.encode_jpeg(&raster, options.jpeg_quality)
}
