use thiserror::Error;

#[derive(Error, Debug)]
pub enum MobiError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed PalmDB container: {0}")]
    MalformedContainer(String),

    #[error("Unknown book format: {0}")]
    UnknownFormat(String),

    #[error("Book is DRM protected{}", title.as_deref().map(|t| format!(": {}", t)).unwrap_or_default())]
    DrmProtected { title: Option<String> },

    #[error("Unsupported compression type: {0:#06x}")]
    UnsupportedCompression(u16),

    #[error("Corrupt compressed text: {0}")]
    CorruptCompression(String),

    #[error("Corrupt EXTH metadata: {0}")]
    CorruptMetadata(String),

    #[error("Corrupt markup: {0}")]
    CorruptMarkup(String),

    #[error("Failed to decode image {index}: {reason}")]
    ImageDecodeFailed { index: usize, reason: String },

    #[error("Decoding cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl MobiError {
    /// Stable kind name, used for the single user-facing error line.
    pub fn kind(&self) -> &'static str {
        match self {
            MobiError::Io(_) => "Io",
            MobiError::MalformedContainer(_) => "MalformedContainer",
            MobiError::UnknownFormat(_) => "UnknownFormat",
            MobiError::DrmProtected { .. } => "DRMProtected",
            MobiError::UnsupportedCompression(_) => "UnsupportedCompression",
            MobiError::CorruptCompression(_) => "CorruptCompression",
            MobiError::CorruptMetadata(_) => "CorruptMetadata",
            MobiError::CorruptMarkup(_) => "CorruptMarkup",
            MobiError::ImageDecodeFailed { .. } => "ImageDecodeFailed",
            MobiError::Cancelled => "Cancelled",
            MobiError::Config(_) => "Config",
            MobiError::Pipeline(_) => "Pipeline",
        }
    }

    /// Whether the pipeline can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MobiError::ImageDecodeFailed { .. }
                | MobiError::CorruptMetadata(_)
                | MobiError::CorruptMarkup(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MobiError>;
