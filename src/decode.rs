use image::{ImageReader, RgbImage};
use std::io::Cursor;

/// Errors raised while turning uploaded bytes into a pixel grid.
#[derive(Debug, thiserror::Error)]
pub enum ImageDecodeError {
    #[error("the uploaded image is empty")]
    Empty,

    #[error("unrecognized image format")]
    UnknownFormat,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// Decodes an in-memory raster image and normalizes it to 3-channel RGB.
///
/// The format is guessed from the content, so the upload's filename and
/// declared content type are irrelevant.
pub fn decode_rgb_image(bytes: &[u8]) -> Result<RgbImage, ImageDecodeError> {
    if bytes.is_empty() {
        return Err(ImageDecodeError::Empty);
    }

    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    if reader.format().is_none() {
        return Err(ImageDecodeError::UnknownFormat);
    }

    let image = reader.decode()?;
    log::debug!(
        "Decoded {}x{} image ({:?})",
        image.width(),
        image.height(),
        image.color()
    );

    Ok(image.into_rgb8())
}
