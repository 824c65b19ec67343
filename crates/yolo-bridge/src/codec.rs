//! PixelBuffer codec
//!
//! Moves pixels between the host raster layout (rows padded to a stride) and
//! the tightly packed layout the native matrix takes. Rows never alias, so
//! both directions copy them in parallel.
//!
//! Channel order is passed through untouched in both directions.

use rayon::prelude::*;
use tracing::warn;

use crate::raster::{PixelFormat, RasterImage};

/// Row alignment required by host raster consumers.
pub const ROW_ALIGNMENT: usize = 4;

/// Round a row length up to the next multiple of four bytes.
///
/// Already-aligned lengths are returned unchanged.
#[inline]
pub fn aligned_stride(row_bytes: usize) -> usize {
    (row_bytes + (ROW_ALIGNMENT - 1)) & !(ROW_ALIGNMENT - 1)
}

/// Tightly packed pixels ready for `matrix_create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// `width * height * channels` bytes, no row padding
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel; a 16-bit gray pixel counts as two channels
    pub channels: u32,
}

impl EncodedImage {
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.channels as usize
    }
}

/// Strip stride padding from a host image.
pub fn encode(image: &RasterImage) -> EncodedImage {
    let row_bytes = image.row_bytes();
    let height = image.height() as usize;
    let stride = image.stride();
    let src = image.data();

    let mut bytes = vec![0u8; row_bytes * height];
    if row_bytes > 0 {
        bytes
            .par_chunks_mut(row_bytes)
            .enumerate()
            .for_each(|(row, dst)| {
                let start = row * stride;
                dst.copy_from_slice(&src[start..start + row_bytes]);
            });
    }

    EncodedImage {
        bytes,
        width: image.width(),
        height: image.height(),
        channels: image.format().bytes_per_pixel() as u32,
    }
}

/// Re-pad native pixels into a host image with 4-byte aligned rows.
///
/// `src` holds `height` rows of `width * bytes_per_pixel` bytes each.
/// Returns `None` for an unknown `format_code` or a buffer too short for the
/// declared geometry. Padding bytes at the end of each row are zero.
pub fn decode(
    src: &[u8],
    width: u32,
    height: u32,
    channels: u32,
    format_code: i32,
) -> Option<RasterImage> {
    let format = PixelFormat::from_code(format_code)?;
    if channels as usize != format.bytes_per_pixel() {
        // Reported channel count disagrees with the format; the format decides the layout.
        warn!(
            "matrix reports {} channels for format code {}",
            channels, format_code
        );
    }

    let src_row_bytes = (width as usize).checked_mul(format.bytes_per_pixel())?;
    let required = src_row_bytes.checked_mul(height as usize)?;
    if src.len() < required {
        warn!(
            "native buffer holds {} bytes, {}x{} {:?} needs {}",
            src.len(),
            width,
            height,
            format,
            required
        );
        return None;
    }

    let mut image = RasterImage::blank(width, height, format).ok()?;
    let stride = image.stride();
    if src_row_bytes > 0 {
        image
            .data_mut()
            .par_chunks_mut(stride)
            .enumerate()
            .for_each(|(row, dst)| {
                let start = row * src_row_bytes;
                dst[..src_row_bytes].copy_from_slice(&src[start..start + src_row_bytes]);
            });
    }
    Some(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn patterned(width: u32, height: u32, format: PixelFormat, padding: usize) -> RasterImage {
        let row_bytes = width as usize * format.bytes_per_pixel();
        let stride = row_bytes + padding;
        let data = (0..stride * height as usize)
            .map(|i| {
                if i % stride < row_bytes {
                    (i % 251) as u8
                } else {
                    0xEE
                }
            })
            .collect();
        RasterImage::new(width, height, stride, format, data).unwrap()
    }

    #[test]
    fn test_aligned_stride() {
        assert_eq!(aligned_stride(0), 0);
        assert_eq!(aligned_stride(1), 4);
        assert_eq!(aligned_stride(4), 4);
        assert_eq!(aligned_stride(15), 16);
        assert_eq!(aligned_stride(16), 16);
    }

    #[test]
    fn test_encode_strips_padding() {
        let image = patterned(3, 2, PixelFormat::Bgr24, 7);
        let encoded = encode(&image);

        assert_eq!(encoded.bytes.len(), 18);
        assert_eq!(encoded.channels, 3);
        assert!(!encoded.bytes.contains(&0xEE));
        assert_eq!(&encoded.bytes[9..18], image.row(1));
    }

    #[test]
    fn test_round_trip_per_channel_count() {
        for format in [PixelFormat::Gray8, PixelFormat::Bgr24, PixelFormat::Bgra32] {
            let image = patterned(7, 5, format, 3);
            let encoded = encode(&image);
            let decoded = decode(
                &encoded.bytes,
                encoded.width,
                encoded.height,
                encoded.channels,
                format.code(),
            )
            .unwrap();

            assert_eq!(decoded.stride() % 4, 0);
            for y in 0..image.height() {
                assert_eq!(decoded.row(y), image.row(y), "{:?} row {}", format, y);
            }
            assert_eq!(encode(&decoded), encoded);
        }
    }

    #[test]
    fn test_decode_pads_unaligned_rows() {
        // 5 pixels * 3 bytes = 15, padded to 16
        let src: Vec<u8> = (1..=30).collect();
        let decoded = decode(&src, 5, 2, 3, 3).unwrap();

        assert_eq!(decoded.stride(), 16);
        assert_eq!(decoded.data().len(), 32);
        assert_eq!(decoded.row(1), &src[15..30]);
        assert_eq!(decoded.data()[15], 0);
    }

    #[test]
    fn test_decode_unknown_format_is_none() {
        let src = [0u8; 16];
        assert!(decode(&src, 2, 2, 4, 0).is_none());
        assert!(decode(&src, 2, 2, 4, 99).is_none());
    }

    #[test]
    fn test_decode_short_buffer_is_none() {
        assert!(decode(&[0u8; 11], 2, 2, 3, 3).is_none());
    }

    #[test]
    fn test_zero_sized_image() {
        let image = RasterImage::blank(0, 4, PixelFormat::Bgr24).unwrap();
        let encoded = encode(&image);
        assert!(encoded.bytes.is_empty());

        let decoded = decode(&[], 0, 4, 3, 3).unwrap();
        assert_eq!(decoded.width(), 0);
        assert!(decoded.data().is_empty());
    }

    #[test]
    fn test_gray16_travels_as_two_bytes() {
        let image = patterned(3, 2, PixelFormat::Gray16, 2);
        let encoded = encode(&image);
        assert_eq!(encoded.channels, 2);
        assert_eq!(encoded.bytes.len(), 12);

        let decoded = decode(&encoded.bytes, 3, 2, 2, 2).unwrap();
        assert_eq!(decoded.stride(), 8);
        assert_eq!(decoded.row(1), image.row(1));
    }
}
