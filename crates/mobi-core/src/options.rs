//! Decoding options shared across the pipeline.

use serde::{Deserialize, Serialize};

/// All options controlling a MOBI unpack job.
///
/// Loaded from TOML config files and overridden by CLI flags; every field has
/// a default so partial config files are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    // -- General --
    pub verbose: u8,
    /// Retain the raw pre-normalization markup next to the output.
    pub debug: bool,

    // -- Input --
    /// Charset label used when the MOBI text encoding is unknown.
    pub user_encoding: Option<String>,
    /// Distrust the trailing-entry flags of the header and infer them from the records.
    pub try_extra_data_fix: bool,

    // -- Images --
    pub extract_images: bool,
    /// JPEG quality (1-100) for re-encoded images.
    pub jpeg_quality: u8,
    /// Images larger than this on either side are downscaled before encoding.
    pub max_image_dimension: u32,

    // -- Output --
    pub generate_ncx: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            verbose: 0,
            debug: false,
            user_encoding: None,
            try_extra_data_fix: false,
            extract_images: true,
            jpeg_quality: 90,
            max_image_dimension: 10_000,
            generate_ncx: true,
        }
    }
}

impl DecodeOptions {
    /// Charset to fall back to when the header codepage is not recognised.
    pub fn fallback_encoding(&self) -> &str {
        self.user_encoding.as_deref().unwrap_or("cp1252")
    }
}
