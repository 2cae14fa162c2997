//! Whole-slide image registration.
//!
//! [`Registrar`] estimates one global affine transform mapping a moving slide
//! onto a fixed slide:
//!
//! 1. optional mask-based prealignment (centroid translation + exhaustive
//!    rotation search scored by Dice overlap) on histogram-matched grayscale
//!    copies;
//! 2. a single forward pass of a frozen convolutional backbone over the
//!    (fixed, prealigned moving) pair;
//! 3. coarse-to-fine feature matching;
//! 4. robust affine fitting of the correspondences.
//!
//! The final transform is the refinement composed with the prealignment.
//!
//! ## Quickstart
//!
//! ```no_run
//! use std::sync::Arc;
//! use wsireg::features::ConvBackbone;
//! use wsireg::{Registrar, RegistrationParams};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backbone = Arc::new(ConvBackbone::load_json("backbone.json")?);
//! let registrar = Registrar::new(backbone, RegistrationParams::default());
//!
//! let fixed = image::open("fixed.png")?.to_rgb8();
//! let moving = image::open("moving.png")?.to_rgb8();
//! let registration = registrar.register(
//!     &wsireg::interop::rgb_view(&fixed),
//!     &wsireg::interop::rgb_view(&moving),
//!     None,
//!     None,
//! )?;
//! println!("{:?}", registration.transform.to_array());
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `wsireg::core`: images, masks, affine transforms, warping, robust fitting.
//! - `wsireg::prealign`: histogram matching, Dice, rotation search.
//! - `wsireg::features`: backbone trait, feature pyramids, matcher.
//! - `wsireg::interop` (feature `image`): views over `image` crate buffers.

pub use wsireg_core as core;
pub use wsireg_features as features;
pub use wsireg_prealign as prealign;

pub use wsireg_core::{AffineTransform, Image, ImageView, Mask, RegistrationError};

mod io;
mod params;
mod registrar;

pub use io::{ConfigIoError, RegistrationConfig, RegistrationReport};
pub use params::RegistrationParams;
pub use registrar::{Registrar, Registration};

#[cfg(feature = "image")]
pub mod interop;
