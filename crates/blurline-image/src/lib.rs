#![deny(missing_docs)]
//! Strided single-channel image buffers and boundary policies.

/// image representation for pipeline inputs and outputs.
pub mod image;

/// Boundary policies for out-of-range reads.
pub mod boundary;

/// Error types for the image module.
pub mod error;

pub use crate::boundary::{BoundaryBuffer, BoundaryPolicy};
pub use crate::error::ImageError;
pub use crate::image::{Image, ImageSize};
