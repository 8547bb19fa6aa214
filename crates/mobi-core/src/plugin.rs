//! Plugin traits for the decoder, the packager and the collaborators they
//! consume (diagnostics sink, image codec).

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::book::{BookDocument, SourceInfo};
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::options::DecodeOptions;

/// Progress reporter callback type.
pub type ProgressReporter = Box<dyn Fn(f64, &str) + Send + Sync>;

/// Diagnostics sink passed explicitly through the pipeline.
pub trait Log: Send + Sync {
    fn debug(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// A decoded image as packed 8-bit RGB triples, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// Image decoding capability used by the image extractor.
pub trait ImageCodec: Send + Sync {
    /// Decode an arbitrary image payload (JPEG, GIF, PNG, BMP) into RGB.
    fn decode(&self, bytes: &[u8]) -> Result<Raster>;

    /// Encode a raster as a baseline JPEG with the given quality (1-100).
    fn encode_jpeg(&self, raster: &Raster, quality: u8) -> Result<Vec<u8>>;

    /// Shrink a raster so neither side exceeds `max_dimension`, keeping the
    /// aspect ratio. Codecs without a resampler return it unchanged.
    fn downscale(&self, raster: Raster, max_dimension: u32) -> Result<Raster> {
        let _ = max_dimension;
        Ok(raster)
    }
}

/// Per-job collaborators handed to every plugin.
pub struct DecodeContext<'a> {
    pub log: &'a dyn Log,
    pub codec: &'a dyn ImageCodec,
    pub cancel: CancellationToken,
    pub progress: Option<&'a ProgressReporter>,
}

impl<'a> DecodeContext<'a> {
    pub fn new(log: &'a dyn Log, codec: &'a dyn ImageCodec) -> Self {
        Self {
            log,
            codec,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: &'a ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn report_progress(&self, fraction: f64, message: &str) {
        if let Some(reporter) = self.progress {
            reporter(fraction, message);
        }
    }

    /// Returns `Err(Cancelled)` once the token has been triggered.
    pub fn check_cancelled(&self) -> Result<()> {
        self.cancel.check()
    }
}

/// Input plugin: decodes a file into a BookDocument.
pub trait InputPlugin: Send + Sync {
    /// Human-readable name of this plugin.
    fn name(&self) -> &str;

    /// Decode an input file to a BookDocument.
    fn convert(
        &self,
        input_path: &Path,
        options: &DecodeOptions,
        ctx: &DecodeContext<'_>,
    ) -> Result<BookDocument>;
}

/// Output plugin: writes a BookDocument into an output directory.
pub trait OutputPlugin: Send + Sync {
    /// Human-readable name of this plugin.
    fn name(&self) -> &str;

    /// Write every artifact of the book below `out_dir`.
    fn write(
        &self,
        book: &BookDocument,
        out_dir: &Path,
        options: &DecodeOptions,
        ctx: &DecodeContext<'_>,
    ) -> Result<UnpackResult>;
}

/// Structured result of a successful unpack.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnpackResult {
    pub html_path: PathBuf,
    pub opf_path: PathBuf,
    pub css_path: PathBuf,
    pub ncx_path: Option<PathBuf>,
    /// Pre-normalization markup, written in debug mode
    pub raw_markup_path: Option<PathBuf>,
    pub images: Vec<PathBuf>,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultMetadata {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    /// Cover image path relative to the output directory
    pub cover: Option<String>,
    pub identifiers: Vec<String>,
    pub source: SourceInfo,
}

impl ResultMetadata {
    pub fn from_book(book: &BookDocument) -> Self {
        let meta = &book.metadata;
        Self {
            title: meta.title().map(String::from),
            authors: meta.authors().into_iter().map(String::from).collect(),
            publisher: meta.publisher().map(String::from),
            description: meta.description().map(String::from),
            language: meta.language().map(String::from),
            cover: book.cover.clone(),
            identifiers: meta
                .get("identifier")
                .map(|ids| ids.to_vec())
                .unwrap_or_default(),
            source: book.source.clone(),
        }
    }
}
