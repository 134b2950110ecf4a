//! Pixel conversion from validated frames to RGB images.
//!
//! YUV layouts use BT.601 limited-range coefficients. EXIF orientation is
//! applied separately so callers can choose between the stored and the
//! upright image.

use image::{imageops, Rgb, RgbImage};

use crate::error::{AlprError, Result};
use crate::image::{FrameRef, ImageType, PlaneRef};

/// Convert a frame to RGB as stored, ignoring its EXIF orientation.
pub fn to_rgb(frame: &FrameRef<'_>) -> Result<RgbImage> {
    let width = u32::try_from(frame.width())
        .map_err(|_| AlprError::invalid("image width exceeds u32"))?;
    let height = u32::try_from(frame.height())
        .map_err(|_| AlprError::invalid("image height exceeds u32"))?;
    let planes = frame.planes();

    let image = match frame.image_type() {
        ImageType::Rgb24 | ImageType::Rgba32 => interleaved(&planes[0], width, height, [0, 1, 2]),
        ImageType::Bgr24 | ImageType::Bgra32 => interleaved(&planes[0], width, height, [2, 1, 0]),
        ImageType::Y => {
            let p = planes[0];
            RgbImage::from_fn(width, height, |x, y| {
                let v = p.data()[p.offset(x as usize, y as usize)];
                Rgb([v, v, v])
            })
        }
        yuv => {
            let (sx, sy) = yuv.chroma_shift();
            let (yp, up, vp) = (planes[0], planes[1], planes[2]);
            RgbImage::from_fn(width, height, |x, y| {
                let (x, y) = (x as usize, y as usize);
                let (cx, cy) = (x >> sx, y >> sy);
                yuv_to_rgb(
                    yp.data()[yp.offset(x, y)],
                    up.data()[up.offset(cx, cy)],
                    vp.data()[vp.offset(cx, cy)],
                )
            })
        }
    };

    Ok(image)
}

/// Convert a frame to RGB and rotate/flip it upright.
pub fn to_upright_rgb(frame: &FrameRef<'_>) -> Result<RgbImage> {
    Ok(apply_orientation(to_rgb(frame)?, frame.exif_orientation()))
}

/// Apply an EXIF orientation (1..=8). Other values leave the image as is.
pub fn apply_orientation(image: RgbImage, orientation: i32) -> RgbImage {
    match orientation {
        2 => imageops::flip_horizontal(&image),
        3 => imageops::rotate180(&image),
        4 => imageops::flip_vertical(&image),
        5 => imageops::flip_horizontal(&imageops::rotate90(&image)),
        6 => imageops::rotate90(&image),
        7 => imageops::flip_horizontal(&imageops::rotate270(&image)),
        8 => imageops::rotate270(&image),
        _ => image,
    }
}

fn interleaved(plane: &PlaneRef<'_>, width: u32, height: u32, order: [usize; 3]) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let at = plane.offset(x as usize, y as usize);
        let px = &plane.data()[at..];
        Rgb([px[order[0]], px[order[1]], px[order[2]]])
    })
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> Rgb<u8> {
    let c = (y as i32 - 16).max(0) * 298;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let clamp = |n: i32| ((n + 128) >> 8).clamp(0, 255) as u8;
    Rgb([
        clamp(c + 409 * e),
        clamp(c - 100 * d - 208 * e),
        clamp(c + 516 * d),
    ])
}
