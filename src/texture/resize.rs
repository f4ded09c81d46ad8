use std::error::Error;
use std::io::Write;

use fast_image_resize::PixelType;
use fast_image_resize::images::Image;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ExtendedColorType, ImageEncoder};

pub(crate) type ResizeResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Fits `width` x `height` inside a `max_dimension` square, keeping the
/// aspect ratio. Never upscales.
pub fn target_size(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_dimension {
        return (width, height);
    }
    let scale = f64::from(max_dimension) / f64::from(longest);
    let fit = |side: u32| ((f64::from(side) * scale).round() as u32).max(1);
    (fit(width), fit(height))
}

/// Width and height read from the image header without decoding pixels.
pub fn probe(bytes: &[u8]) -> Option<(u32, u32)> {
    let size = imagesize::blob_size(bytes).ok()?;
    Some((u32::try_from(size.width).ok()?, u32::try_from(size.height).ok()?))
}

fn resample(
    pixels: Vec<u8>,
    src: (u32, u32),
    dst: (u32, u32),
    pixel_type: PixelType,
) -> ResizeResult<Vec<u8>> {
    if src == dst {
        return Ok(pixels);
    }
    let src_img = Image::from_vec_u8(src.0, src.1, pixels, pixel_type)?;
    let mut dst_img = Image::new(dst.0, dst.1, pixel_type);

    let mut resizer = fast_image_resize::Resizer::new();
    resizer.resize(&src_img, &mut dst_img, None)?;

    Ok(dst_img.into_vec())
}

pub(crate) fn resize_to_jpg<W: Write>(
    img: &DynamicImage,
    width: u32,
    height: u32,
    quality: u8,
    mut buf: W,
) -> ResizeResult<()> {
    let rgb = img.to_rgb8();
    let pixels = resample(
        rgb.into_raw(),
        (img.width(), img.height()),
        (width, height),
        PixelType::U8x3,
    )?;

    JpegEncoder::new_with_quality(&mut buf, quality).write_image(
        &pixels,
        width,
        height,
        ExtendedColorType::Rgb8,
    )?;

    Ok(())
}

pub(crate) fn resize_to_png<W: Write>(
    img: &DynamicImage,
    width: u32,
    height: u32,
    mut buf: W,
) -> ResizeResult<()> {
    let rgba = img.to_rgba8();
    let pixels = resample(
        rgba.into_raw(),
        (img.width(), img.height()),
        (width, height),
        PixelType::U8x4,
    )?;

    PngEncoder::new_with_quality(&mut buf, CompressionType::Best, FilterType::Adaptive)
        .write_image(&pixels, width, height, ExtendedColorType::Rgba8)?;

    Ok(())
}
