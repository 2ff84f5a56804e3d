use thiserror::Error;

#[derive(Error, Debug)]
pub enum SkystackError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid SER file: {0}")]
    InvalidSer(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("No more images in sequence")]
    NoMoreImages,

    #[error("Frame index {index} out of range (total: {total})")]
    FrameIndexOutOfRange { index: usize, total: usize },

    #[error("Unsupported pixel format: {0}")]
    UnsupportedPixelFormat(String),

    #[error("Empty frame sequence")]
    EmptySequence,

    #[error("Aligned frames have no common intersection")]
    EmptyIntersection,

    #[error("Stage previously failed: {0}")]
    Poisoned(String),

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, SkystackError>;
