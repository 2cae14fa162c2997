//! Adapters between `image` crate buffers and the registration views.

use wsireg_core::{Image, ImageView, Mask};

/// Borrow an `image::RgbImage` as a 3-channel view.
pub fn rgb_view(img: &::image::RgbImage) -> ImageView<'_> {
    ImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        channels: 3,
        data: img.as_raw(),
    }
}

/// Borrow an `image::GrayImage` as a 1-channel view.
pub fn gray_view(img: &::image::GrayImage) -> ImageView<'_> {
    ImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        channels: 1,
        data: img.as_raw(),
    }
}

/// Non-zero pixels of a grayscale mask image are foreground.
pub fn mask_from_gray(img: &::image::GrayImage) -> Mask {
    Mask::from_image(&gray_view(img))
}

/// Copy an owned 3-channel image into an `image::RgbImage`, e.g. to save a
/// warped slide.
pub fn to_rgb_image(img: &Image) -> Option<::image::RgbImage> {
    if img.channels != 3 {
        return None;
    }
    ::image::RgbImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
}
