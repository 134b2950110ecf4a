//! Image descriptors and validated frames
//!
//! An [`ImageDescriptor`] describes caller-owned pixel memory. Validation turns
//! it into a [`FrameRef`]: a canonical view with one plane for interleaved and
//! grayscale layouts and three planes (Y, U, V) for YUV layouts, whatever the
//! plane order of the input. Backends only ever see `FrameRef`s.

use crate::error::{AlprError, Result};

/// Pixel layouts accepted by the engine.
///
/// The numbering is part of the C interface: values are only ever appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(C)]
pub enum ImageType {
    /// 3 bytes per pixel, R at the lowest address, then G, B
    Rgb24 = 0,
    /// 4 bytes per pixel: R, G, B, A
    Rgba32 = 1,
    /// 4 bytes per pixel: B, G, R, A
    Bgra32 = 2,
    /// 4:2:0, Y plane followed by interleaved U/V
    Nv12 = 3,
    /// 4:2:0, Y plane followed by interleaved V/U
    Nv21 = 4,
    /// 4:2:0, Y, U and V planes
    Yuv420p = 5,
    /// 4:2:0, Y, V and U planes
    Yvu420p = 6,
    /// 4:2:2, Y, U and V planes
    Yuv422p = 7,
    /// 4:4:4, Y, U and V planes
    Yuv444p = 8,
    /// Single 8-bit luma channel
    Y = 9,
    /// 3 bytes per pixel: B, G, R
    Bgr24 = 10,
}

impl ImageType {
    pub const ALL: [ImageType; 11] = [
        ImageType::Rgb24,
        ImageType::Rgba32,
        ImageType::Bgra32,
        ImageType::Nv12,
        ImageType::Nv21,
        ImageType::Yuv420p,
        ImageType::Yvu420p,
        ImageType::Yuv422p,
        ImageType::Yuv444p,
        ImageType::Y,
        ImageType::Bgr24,
    ];

    /// Map a C interface value to a layout.
    pub fn from_raw(value: i32) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| *t as i32 == value)
            .ok_or_else(|| AlprError::invalid(format!("unknown image type {}", value)))
    }

    /// Bytes per pixel for interleaved and grayscale layouts.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            ImageType::Rgb24 | ImageType::Bgr24 => Some(3),
            ImageType::Rgba32 | ImageType::Bgra32 => Some(4),
            ImageType::Y => Some(1),
            _ => None,
        }
    }

    pub fn is_yuv(self) -> bool {
        self.bytes_per_pixel().is_none()
    }

    /// Semi-planar layouts store U and V interleaved in one plane.
    pub fn is_semi_planar(self) -> bool {
        matches!(self, ImageType::Nv12 | ImageType::Nv21)
    }

    /// Horizontal and vertical chroma subsampling shifts.
    pub fn chroma_shift(self) -> (u32, u32) {
        match self {
            ImageType::Nv12
            | ImageType::Nv21
            | ImageType::Yuv420p
            | ImageType::Yvu420p => (1, 1),
            ImageType::Yuv422p => (1, 0),
            _ => (0, 0),
        }
    }

    /// Chroma plane dimensions for a luma plane of `width` x `height`.
    pub fn chroma_size(self, width: usize, height: usize) -> (usize, usize) {
        let (sx, sy) = self.chroma_shift();
        let w = (width + (1 << sx) - 1) >> sx;
        let h = (height + (1 << sy) - 1) >> sy;
        (w, h)
    }

    fn default_uv_pixel_stride(self) -> usize {
        if self.is_semi_planar() {
            2
        } else {
            1
        }
    }
}

impl TryFrom<i32> for ImageType {
    type Error = AlprError;

    fn try_from(value: i32) -> Result<Self> {
        Self::from_raw(value)
    }
}

/// One caller-provided plane.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub data: &'a [u8],
    /// Bytes per row, 0 to derive from the width
    pub stride: usize,
}

impl<'a> Plane<'a> {
    pub fn new(data: &'a [u8], stride: usize) -> Self {
        Self { data, stride }
    }
}

/// How the pixel memory of a descriptor is laid out.
#[derive(Debug, Clone, Copy)]
pub enum PixelData<'a> {
    /// One buffer. `stride` is in samples (0 = width). YUV planes are
    /// contiguous in layout order.
    Single { data: &'a [u8], stride: usize },
    /// Three planes: Y, U, V. For semi-planar layouts U and V may alias the
    /// interleaved chroma plane.
    Planar {
        y: Plane<'a>,
        u: Plane<'a>,
        v: Plane<'a>,
        /// Chroma sample step in bytes: 0 auto, 1 planar, 2 semi-planar
        uv_pixel_stride: usize,
    },
}

/// Description of a caller-owned image, borrowed for one `process` call.
#[derive(Debug, Clone, Copy)]
pub struct ImageDescriptor<'a> {
    pub image_type: ImageType,
    pub width: usize,
    pub height: usize,
    pub pixels: PixelData<'a>,
    /// EXIF orientation, 1..=8
    pub exif_orientation: i32,
}

impl<'a> ImageDescriptor<'a> {
    /// Single-buffer image without padding.
    pub fn packed(image_type: ImageType, data: &'a [u8], width: usize, height: usize) -> Self {
        Self {
            image_type,
            width,
            height,
            pixels: PixelData::Single { data, stride: 0 },
            exif_orientation: 1,
        }
    }

    /// Three-plane YUV image.
    pub fn planar(
        image_type: ImageType,
        y: Plane<'a>,
        u: Plane<'a>,
        v: Plane<'a>,
        width: usize,
        height: usize,
    ) -> Self {
        Self {
            image_type,
            width,
            height,
            pixels: PixelData::Planar {
                y,
                u,
                v,
                uv_pixel_stride: 0,
            },
            exif_orientation: 1,
        }
    }

    /// Row stride in samples for single-buffer images. No effect on planar ones.
    pub fn with_stride(mut self, stride_in_samples: usize) -> Self {
        if let PixelData::Single { stride, .. } = &mut self.pixels {
            *stride = stride_in_samples;
        }
        self
    }

    /// Chroma pixel stride for planar images. No effect on single-buffer ones.
    pub fn with_uv_pixel_stride(mut self, pixel_stride: usize) -> Self {
        if let PixelData::Planar {
            uv_pixel_stride, ..
        } = &mut self.pixels
        {
            *uv_pixel_stride = pixel_stride;
        }
        self
    }

    pub fn with_exif_orientation(mut self, orientation: i32) -> Self {
        self.exif_orientation = orientation;
        self
    }

    /// Check the descriptor against its layout and produce the canonical view.
    pub fn validate(&self) -> Result<FrameRef<'a>> {
        if self.width == 0 || self.height == 0 {
            return Err(AlprError::invalid(format!(
                "image dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if !(1..=8).contains(&self.exif_orientation) {
            return Err(AlprError::invalid(format!(
                "EXIF orientation must be within [1, 8], got {}",
                self.exif_orientation
            )));
        }

        let planes = match self.pixels {
            PixelData::Single { data, stride } => self.single_buffer_planes(data, stride)?,
            PixelData::Planar {
                y,
                u,
                v,
                uv_pixel_stride,
            } => self.planar_planes(y, u, v, uv_pixel_stride)?,
        };

        Ok(FrameRef {
            image_type: self.image_type,
            width: self.width,
            height: self.height,
            exif_orientation: self.exif_orientation,
            planes,
        })
    }

    fn single_buffer_planes(&self, data: &'a [u8], stride: usize) -> Result<Vec<PlaneRef<'a>>> {
        let stride = if stride == 0 { self.width } else { stride };
        if stride < self.width {
            return Err(AlprError::invalid(format!(
                "stride {} is smaller than width {}",
                stride, self.width
            )));
        }

        if let Some(bpp) = self.image_type.bytes_per_pixel() {
            let row_bytes = checked(stride.checked_mul(bpp))?;
            let needed = required_len(self.height, self.width, row_bytes, bpp, bpp)?;
            ensure_len("image buffer", data.len(), needed)?;
            return Ok(vec![PlaneRef::new(&data[..needed], row_bytes, bpp)]);
        }

        // Contiguous YUV: Y plane, then chroma in layout order. Planar chroma
        // rows follow the luma padding.
        let chroma_stride = if self.image_type.is_semi_planar() {
            0
        } else {
            let (sx, _) = self.image_type.chroma_shift();
            (stride + (1 << sx) - 1) >> sx
        };
        let geometry = PlanarGeometry::resolve(
            self.image_type,
            self.width,
            self.height,
            stride,
            chroma_stride,
            chroma_stride,
            0,
        )?;
        let y_size = checked(stride.checked_mul(self.height))?;
        let (cw, ch) = geometry.chroma;

        let (u, v) = if self.image_type.is_semi_planar() {
            let uv_stride = geometry.u_stride;
            let uv_len = required_len(ch, cw, uv_stride, 2, 2)?;
            ensure_len("image buffer", data.len(), checked(y_size.checked_add(uv_len))?)?;
            let uv = &data[y_size..y_size + uv_len];
            let (first, second) = (
                PlaneRef::new(&uv[..uv_len], uv_stride, 2),
                PlaneRef::new(&uv[1..uv_len], uv_stride, 2),
            );
            if self.image_type == ImageType::Nv12 {
                (first, second)
            } else {
                (second, first)
            }
        } else {
            let c_stride = geometry.u_stride;
            let c_size = checked(c_stride.checked_mul(ch))?;
            let total = checked(y_size.checked_add(c_size).and_then(|n| n.checked_add(c_size)))?;
            ensure_len("image buffer", data.len(), total)?;
            let first = PlaneRef::new(&data[y_size..y_size + c_size], c_stride, 1);
            let second = PlaneRef::new(&data[y_size + c_size..total], c_stride, 1);
            if self.image_type == ImageType::Yvu420p {
                (second, first)
            } else {
                (first, second)
            }
        };

        let y = PlaneRef::new(&data[..y_size], stride, 1);
        Ok(vec![y, u, v])
    }

    fn planar_planes(
        &self,
        y: Plane<'a>,
        u: Plane<'a>,
        v: Plane<'a>,
        uv_pixel_stride: usize,
    ) -> Result<Vec<PlaneRef<'a>>> {
        if !self.image_type.is_yuv() {
            return Err(AlprError::invalid(format!(
                "{:?} cannot be submitted as separate planes",
                self.image_type
            )));
        }
        if y.data.is_empty() || u.data.is_empty() || v.data.is_empty() {
            return Err(AlprError::invalid(
                "planar images require three non-empty planes",
            ));
        }

        let geometry = PlanarGeometry::resolve(
            self.image_type,
            self.width,
            self.height,
            y.stride,
            u.stride,
            v.stride,
            uv_pixel_stride,
        )?;
        let [y_len, u_len, v_len] = geometry.required_lengths()?;
        ensure_len("Y plane", y.data.len(), y_len)?;
        ensure_len("U plane", u.data.len(), u_len)?;
        ensure_len("V plane", v.data.len(), v_len)?;

        Ok(vec![
            PlaneRef::new(&y.data[..y_len], geometry.y_stride, 1),
            PlaneRef::new(&u.data[..u_len], geometry.u_stride, geometry.uv_pixel_stride),
            PlaneRef::new(&v.data[..v_len], geometry.v_stride, geometry.uv_pixel_stride),
        ])
    }
}

/// Resolved strides and chroma size of a YUV image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanarGeometry {
    pub width: usize,
    pub height: usize,
    pub y_stride: usize,
    pub u_stride: usize,
    pub v_stride: usize,
    pub uv_pixel_stride: usize,
    pub chroma: (usize, usize),
}

impl PlanarGeometry {
    /// Fill in defaulted (zero) strides and check the explicit ones.
    pub fn resolve(
        image_type: ImageType,
        width: usize,
        height: usize,
        y_stride: usize,
        u_stride: usize,
        v_stride: usize,
        uv_pixel_stride: usize,
    ) -> Result<Self> {
        if !image_type.is_yuv() {
            return Err(AlprError::invalid(format!("{:?} is not a YUV layout", image_type)));
        }
        if width == 0 || height == 0 {
            return Err(AlprError::invalid(format!(
                "image dimensions must be positive, got {}x{}",
                width, height
            )));
        }

        let uv_pixel_stride = match uv_pixel_stride {
            0 => image_type.default_uv_pixel_stride(),
            1 | 2 => uv_pixel_stride,
            other => {
                return Err(AlprError::invalid(format!(
                    "UV pixel stride must be 0, 1 or 2, got {}",
                    other
                )))
            }
        };

        let y_stride = if y_stride == 0 { width } else { y_stride };
        if y_stride < width {
            return Err(AlprError::invalid(format!(
                "Y stride {} is smaller than width {}",
                y_stride, width
            )));
        }

        let chroma = image_type.chroma_size(width, height);
        let min_chroma_stride = (chroma.0 - 1) * uv_pixel_stride + 1;
        let default_chroma_stride = if image_type.is_semi_planar() {
            // interleaved chroma rows span the luma row
            y_stride.max(chroma.0 * 2)
        } else {
            chroma.0 * uv_pixel_stride
        };

        let resolve_chroma = |name: &str, stride: usize| -> Result<usize> {
            let stride = if stride == 0 { default_chroma_stride } else { stride };
            if stride < min_chroma_stride {
                return Err(AlprError::invalid(format!(
                    "{} stride {} is too small for chroma width {}",
                    name, stride, chroma.0
                )));
            }
            Ok(stride)
        };

        Ok(Self {
            width,
            height,
            y_stride,
            u_stride: resolve_chroma("U", u_stride)?,
            v_stride: resolve_chroma("V", v_stride)?,
            uv_pixel_stride,
            chroma,
        })
    }

    /// Minimum byte length of the Y, U and V planes.
    pub fn required_lengths(&self) -> Result<[usize; 3]> {
        let (cw, ch) = self.chroma;
        Ok([
            required_len(self.height, self.width, self.y_stride, 1, 1)?,
            required_len(ch, cw, self.u_stride, self.uv_pixel_stride, 1)?,
            required_len(ch, cw, self.v_stride, self.uv_pixel_stride, 1)?,
        ])
    }
}

/// Borrowed plane of a validated frame.
#[derive(Debug, Clone, Copy)]
pub struct PlaneRef<'a> {
    data: &'a [u8],
    stride: usize,
    pixel_stride: usize,
}

impl<'a> PlaneRef<'a> {
    fn new(data: &'a [u8], stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            stride,
            pixel_stride,
        }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Bytes between horizontally adjacent samples.
    pub fn pixel_stride(&self) -> usize {
        self.pixel_stride
    }

    /// Byte offset of the sample at column `x`, row `y`.
    #[inline]
    pub fn offset(&self, x: usize, y: usize) -> usize {
        y * self.stride + x * self.pixel_stride
    }
}

/// Validated, borrowed frame.
#[derive(Debug, Clone)]
pub struct FrameRef<'a> {
    image_type: ImageType,
    width: usize,
    height: usize,
    exif_orientation: i32,
    planes: Vec<PlaneRef<'a>>,
}

impl<'a> FrameRef<'a> {
    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn exif_orientation(&self) -> i32 {
        self.exif_orientation
    }

    /// One plane for interleaved/grayscale layouts, Y/U/V for YUV layouts.
    pub fn planes(&self) -> &[PlaneRef<'a>] {
        &self.planes
    }

    /// Copy the referenced pixels so they outlive the caller's buffers.
    pub fn to_frame(&self) -> Frame {
        let planes = self
            .planes
            .iter()
            .map(|p| OwnedPlane {
                data: p.data.to_vec(),
                stride: p.stride,
                pixel_stride: p.pixel_stride,
            })
            .collect();

        Frame {
            image_type: self.image_type,
            width: self.width,
            height: self.height,
            exif_orientation: self.exif_orientation,
            planes,
        }
    }
}

#[derive(Debug, Clone)]
struct OwnedPlane {
    data: Vec<u8>,
    stride: usize,
    pixel_stride: usize,
}

/// Owned frame, used when pixels must outlive the submitting call.
#[derive(Debug, Clone)]
pub struct Frame {
    image_type: ImageType,
    width: usize,
    height: usize,
    exif_orientation: i32,
    planes: Vec<OwnedPlane>,
}

impl Frame {
    /// Uniform frame of the given layout: mid-gray luma, neutral chroma.
    pub fn blank(image_type: ImageType, width: usize, height: usize) -> Self {
        let planes = match image_type.bytes_per_pixel() {
            Some(bpp) => vec![OwnedPlane {
                data: vec![128u8; width * height * bpp],
                stride: width * bpp,
                pixel_stride: bpp,
            }],
            None => {
                let (cw, ch) = image_type.chroma_size(width, height);
                let chroma = || OwnedPlane {
                    data: vec![128u8; cw * ch],
                    stride: cw,
                    pixel_stride: 1,
                };
                vec![
                    OwnedPlane {
                        data: vec![128u8; width * height],
                        stride: width,
                        pixel_stride: 1,
                    },
                    chroma(),
                    chroma(),
                ]
            }
        };

        Self {
            image_type,
            width,
            height,
            exif_orientation: 1,
            planes,
        }
    }

    pub fn view(&self) -> FrameRef<'_> {
        FrameRef {
            image_type: self.image_type,
            width: self.width,
            height: self.height,
            exif_orientation: self.exif_orientation,
            planes: self
                .planes
                .iter()
                .map(|p| PlaneRef::new(&p.data, p.stride, p.pixel_stride))
                .collect(),
        }
    }
}

/// Bytes needed for `rows` x `cols` samples of `sample_len` bytes.
fn required_len(
    rows: usize,
    cols: usize,
    stride: usize,
    pixel_stride: usize,
    sample_len: usize,
) -> Result<usize> {
    if rows == 0 || cols == 0 {
        return Ok(0);
    }
    let last_row = (rows - 1).checked_mul(stride);
    let last_col = (cols - 1).checked_mul(pixel_stride);
    checked(
        last_row
            .zip(last_col)
            .and_then(|(r, c)| r.checked_add(c))
            .and_then(|n| n.checked_add(sample_len)),
    )
}

fn checked(value: Option<usize>) -> Result<usize> {
    value.ok_or_else(|| AlprError::invalid("image dimensions overflow"))
}

fn ensure_len(what: &str, actual: usize, needed: usize) -> Result<()> {
    if actual < needed {
        return Err(AlprError::invalid(format!(
            "{} too small: {} bytes, {} required",
            what, actual, needed
        )));
    }
    Ok(())
}
