//! Filter operations
//!
//! This module provides the scheduled 3x3 box blur.

/// Box blur pipeline, schedules and entry points
mod box_blur;
pub use box_blur::*;
