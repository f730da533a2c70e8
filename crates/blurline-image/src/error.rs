/// An error type for the image module.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ImageError {
    /// Error when the image has no pixels along one of its axes.
    #[error("Image extent must be positive, got {0}x{1}")]
    EmptyImage(usize, usize),

    /// Error when a stride is zero.
    #[error("Image strides must be positive, got [{0}, {1}]")]
    ZeroStride(usize, usize),

    /// Error when two distinct coordinates map to the same element.
    #[error("Strides [{0}, {1}] alias pixels of a {2}x{3} image")]
    AliasingStrides(usize, usize, usize, usize),

    /// Error when the data is too short for the size and strides.
    #[error("Data length ({0}) is smaller than the addressed extent ({1})")]
    InvalidDataLength(usize, usize),

    /// Error when two images are expected to have the same size.
    #[error("Image size mismatch: {0}x{1} vs {2}x{3}")]
    InvalidImageSize(usize, usize, usize, usize),

    /// Error when a pixel index is out of bounds.
    #[error("Pixel index ({0}, {1}) is out of bounds ({2}x{3})")]
    PixelIndexOutOfBounds(usize, usize, usize, usize),
}
