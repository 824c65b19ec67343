//! Host-side raster images
//!
//! A `RasterImage` is the caller's in-process picture: rows of pixels with an
//! optional end-of-row padding (`stride >= width * bytes_per_pixel`).
//! Multi-channel pixels are stored blue-first (BGR / BGRA), which is the layout
//! the native engine receives; nothing in this crate reorders channels on the
//! way in.

use image::{DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::{InteropError, Result};

/// Pixel layouts understood on both sides of the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit single channel
    Gray8,
    /// 16-bit single channel
    Gray16,
    /// 24-bit, blue-green-red
    Bgr24,
    /// 32-bit, blue-green-red-alpha
    Bgra32,
}

impl PixelFormat {
    /// Map a native format code; `None` for anything unrecognized.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Gray8),
            2 => Some(Self::Gray16),
            3 => Some(Self::Bgr24),
            4 => Some(Self::Bgra32),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Gray8 => 1,
            Self::Gray16 => 2,
            Self::Bgr24 => 3,
            Self::Bgra32 => 4,
        }
    }

    /// Bytes per pixel, which is also the channel count handed to the native
    /// matrix (a 16-bit gray pixel travels as two 8-bit channels).
    pub fn bytes_per_pixel(self) -> usize {
        self.code() as usize
    }
}

/// An image owned by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    data: Vec<u8>,
}

impl RasterImage {
    /// Wrap a pixel buffer with an explicit row stride.
    ///
    /// Fails when the stride is shorter than one row of pixels or the buffer
    /// does not cover every row.
    pub fn new(
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self> {
        let row_bytes = checked_row_bytes(width, format)?;
        if stride < row_bytes {
            return Err(InteropError::InvalidImage(format!(
                "stride {} is shorter than a row of {} bytes",
                stride, row_bytes
            )));
        }
        let required = if height == 0 {
            0
        } else {
            stride
                .checked_mul(height as usize - 1)
                .and_then(|n| n.checked_add(row_bytes))
                .ok_or_else(|| {
                    InteropError::InvalidImage(format!("{}x{} overflows", width, height))
                })?
        };
        if data.len() < required {
            return Err(InteropError::InvalidImage(format!(
                "buffer holds {} bytes, {}x{} {:?} with stride {} needs {}",
                data.len(),
                width,
                height,
                format,
                stride,
                required
            )));
        }
        Ok(Self {
            width,
            height,
            stride,
            format,
            data,
        })
    }

    /// Wrap tightly packed rows (`stride == width * bytes_per_pixel`).
    pub fn from_packed(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        let stride = checked_row_bytes(width, format)?;
        Self::new(width, height, stride, format, data)
    }

    /// A zeroed image with 4-byte aligned rows.
    ///
    /// Fails when the buffer size does not fit in `usize`.
    pub fn blank(width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let overflow =
            || InteropError::InvalidImage(format!("{}x{} {:?} overflows", width, height, format));
        let row_bytes = checked_row_bytes(width, format)?;
        if row_bytes > usize::MAX - (codec::ROW_ALIGNMENT - 1) {
            return Err(overflow());
        }
        let stride = codec::aligned_stride(row_bytes);
        let len = stride.checked_mul(height as usize).ok_or_else(overflow)?;
        Ok(Self {
            width,
            height,
            stride,
            format,
            data: vec![0; len],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Bytes of pixel data in one row, excluding padding.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Pixel bytes of row `y`, without padding.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.row_bytes()]
    }

    /// Convert a decoded image file into host layout.
    ///
    /// Luma images stay single channel, images with alpha become `Bgra32`,
    /// everything else `Bgr24`.
    pub fn from_dynamic(img: &DynamicImage) -> Result<Self> {
        match img {
            DynamicImage::ImageLuma8(buf) => {
                let (w, h) = buf.dimensions();
                Self::from_rows(w, h, PixelFormat::Gray8, buf.as_raw(), |_| {})
            }
            DynamicImage::ImageLuma16(buf) => {
                let (w, h) = buf.dimensions();
                let bytes: Vec<u8> = buf.as_raw().iter().flat_map(|v| v.to_le_bytes()).collect();
                Self::from_rows(w, h, PixelFormat::Gray16, &bytes, |_| {})
            }
            other if other.color().has_alpha() => {
                let rgba = other.to_rgba8();
                let (w, h) = rgba.dimensions();
                Self::from_rows(w, h, PixelFormat::Bgra32, rgba.as_raw(), swap_red_blue)
            }
            other => {
                let rgb = other.to_rgb8();
                let (w, h) = rgb.dimensions();
                Self::from_rows(w, h, PixelFormat::Bgr24, rgb.as_raw(), swap_red_blue)
            }
        }
    }

    /// Convert back to an `image` buffer in conventional channel order.
    pub fn to_dynamic(&self) -> Option<DynamicImage> {
        let (w, h) = (self.width, self.height);
        let mut packed = codec::encode(self).bytes;
        match self.format {
            PixelFormat::Gray8 => GrayImage::from_raw(w, h, packed).map(DynamicImage::ImageLuma8),
            PixelFormat::Gray16 => {
                let values: Vec<u16> = packed
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]))
                    .collect();
                ImageBuffer::<Luma<u16>, _>::from_raw(w, h, values).map(DynamicImage::ImageLuma16)
            }
            PixelFormat::Bgr24 => {
                packed.chunks_exact_mut(3).for_each(swap_red_blue);
                RgbImage::from_raw(w, h, packed).map(DynamicImage::ImageRgb8)
            }
            PixelFormat::Bgra32 => {
                packed.chunks_exact_mut(4).for_each(swap_red_blue);
                RgbaImage::from_raw(w, h, packed).map(DynamicImage::ImageRgba8)
            }
        }
    }

    fn from_rows(
        width: u32,
        height: u32,
        format: PixelFormat,
        packed: &[u8],
        fix_pixel: fn(&mut [u8]),
    ) -> Result<Self> {
        let mut out = Self::blank(width, height, format)?;
        let row_bytes = out.row_bytes();
        let stride = out.stride;
        let bpp = format.bytes_per_pixel();
        if row_bytes == 0 {
            return Ok(out);
        }
        for (y, src) in packed.chunks_exact(row_bytes).enumerate() {
            let dst = &mut out.data[y * stride..y * stride + row_bytes];
            dst.copy_from_slice(src);
            dst.chunks_exact_mut(bpp).for_each(fix_pixel);
        }
        Ok(out)
    }
}

fn checked_row_bytes(width: u32, format: PixelFormat) -> Result<usize> {
    (width as usize)
        .checked_mul(format.bytes_per_pixel())
        .ok_or_else(|| InteropError::InvalidImage(format!("width {} overflows", width)))
}

fn swap_red_blue(pixel: &mut [u8]) {
    pixel.swap(0, 2);
}
