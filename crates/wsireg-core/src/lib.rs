//! Core types for whole-slide image registration.
//!
//! Images and masks are plain in-memory buffers, transforms are 3x3
//! homogeneous matrices with a fixed `(0, 0, 1)` bottom row. Nothing here
//! knows about feature networks or file formats.

mod affine_fit;
mod error;
mod image;
mod logger;
mod transform;

pub use affine_fit::{estimate_affine, fit_affine_lstsq, AffineFit, RansacParams};
pub use error::{RegistrationError, Result};
pub use image::{sample_bilinear, sample_bilinear_u8, Image, ImageView, Mask};
pub use transform::{warp_affine, AffineTransform};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;

pub use nalgebra::Point2;
