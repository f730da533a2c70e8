#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use blurline_image as image;

#[doc(inline)]
pub use blurline_imgproc as imgproc;

#[doc(inline)]
pub use blurline_pipeline as pipeline;
