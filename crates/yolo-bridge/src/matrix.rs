//! Native matrix adapter
//!
//! Scope guards over `matrix_create` / `matrix_destroy`. A matrix lives for
//! one prediction call and is destroyed when its guard drops, on every exit
//! path including unwinding.
//!
//! The native side may wrap the pixel bytes instead of copying them, so a
//! guard borrows the `EncodedImage` it was built from for its whole life.

use std::marker::PhantomData;

use tracing::{debug, warn};
use yolo_ffi_common::native_bytes;

use crate::codec::{self, EncodedImage};
use crate::error::{InteropError, Result};
use crate::raster::{PixelFormat, RasterImage};
use crate::release::Released;
use crate::runtime::{NativeRuntime, RawMatrix};

fn native_dims(image: &EncodedImage) -> Result<(i32, i32, i32)> {
    let convert = |v: u32, what: &str| {
        i32::try_from(v)
            .map_err(|_| InteropError::InvalidImage(format!("{} {} exceeds native range", what, v)))
    };
    Ok((
        convert(image.width, "width")?,
        convert(image.height, "height")?,
        convert(image.channels, "channel count")?,
    ))
}

fn create_raw<R: NativeRuntime>(runtime: &R, image: &EncodedImage) -> Result<RawMatrix> {
    let (width, height, channels) = native_dims(image)?;
    runtime
        .matrix_create(&image.bytes, width, height, channels)
        .ok_or(InteropError::MatrixCreate {
            width: image.width,
            height: image.height,
            channels: image.channels,
        })
}

/// One native matrix, destroyed on drop.
pub struct NativeMatrix<'a, R: NativeRuntime> {
    raw: Released<'a, R, RawMatrix>,
    _pixels: PhantomData<&'a [u8]>,
}

impl<'a, R: NativeRuntime> NativeMatrix<'a, R> {
    pub fn create(runtime: &'a R, image: &'a EncodedImage) -> Result<Self> {
        let raw = create_raw(runtime, image)?;
        debug!(
            "created native matrix {}x{}x{}",
            image.width, image.height, image.channels
        );
        Ok(Self {
            raw: Released::new(runtime, raw, R::matrix_destroy),
            _pixels: PhantomData,
        })
    }

    pub fn raw(&self) -> &RawMatrix {
        &self.raw
    }

    /// Copy the matrix's pixels back into a host image.
    ///
    /// `None` when the native side reports an unknown format or no pixel data.
    pub fn read_back(&self) -> Option<RasterImage> {
        let view = self.raw.runtime().matrix_read_back(&self.raw);
        let width = u32::try_from(view.width).ok()?;
        let height = u32::try_from(view.height).ok()?;
        let channels = u32::try_from(view.channels).ok()?;
        let format = match PixelFormat::from_code(view.format_code) {
            Some(format) => format,
            None => {
                warn!("native matrix has unknown format code {}", view.format_code);
                return None;
            }
        };
        let len = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(format.bytes_per_pixel())?;
        // The view stays valid while `self` keeps the matrix alive; decode copies out.
        let bytes = unsafe { native_bytes(view.data, len) }?;
        codec::decode(bytes, width, height, channels, view.format_code)
    }
}

/// Contiguous native matrices for one batched call, all destroyed on drop.
///
/// A partially built batch (the k-th create failed) still releases the
/// first k-1 matrices.
pub struct MatrixBatch<'a, R: NativeRuntime> {
    runtime: &'a R,
    raws: Vec<RawMatrix>,
    _pixels: PhantomData<&'a [u8]>,
}

impl<'a, R: NativeRuntime> MatrixBatch<'a, R> {
    pub fn with_capacity(runtime: &'a R, capacity: usize) -> Self {
        Self {
            runtime,
            raws: Vec::with_capacity(capacity),
            _pixels: PhantomData,
        }
    }

    pub fn push(&mut self, image: &'a EncodedImage) -> Result<()> {
        let raw = create_raw(self.runtime, image)?;
        self.raws.push(raw);
        Ok(())
    }

    /// Handles in push order, laid out as a C array of matrix pointers.
    pub fn as_slice(&self) -> &[RawMatrix] {
        &self.raws
    }

    pub fn len(&self) -> usize {
        self.raws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raws.is_empty()
    }
}

impl<R: NativeRuntime> Drop for MatrixBatch<'_, R> {
    fn drop(&mut self) {
        if !self.raws.is_empty() {
            debug!("destroying {} batched native matrices", self.raws.len());
        }
        for raw in self.raws.drain(..) {
            self.runtime.matrix_destroy(raw);
        }
    }
}

/// Upload an image to a native matrix and read it straight back.
///
/// Shows exactly what the engine receives after the host layout has been
/// packed and re-padded. `Ok(None)` when the native side reports a format the
/// host cannot represent.
pub fn read_back_image<R: NativeRuntime>(
    runtime: &R,
    image: &RasterImage,
) -> Result<Option<RasterImage>> {
    let encoded = codec::encode(image);
    let matrix = NativeMatrix::create(runtime, &encoded)?;
    Ok(matrix.read_back())
}

#[cfg(all(test, feature = "stub"))]
mod tests {
    use super::*;
    use crate::runtime::stub::StubRuntime;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_matrix_destroyed_on_drop() {
        let runtime = StubRuntime::new();
        let encoded = codec::encode(&RasterImage::blank(4, 4, PixelFormat::Bgr24).unwrap());
        {
            let _matrix = NativeMatrix::create(&runtime, &encoded).unwrap();
            assert_eq!(runtime.stats().live_matrices(), 1);
        }
        let stats = runtime.stats();
        assert_eq!(stats.live_matrices(), 0);
        assert!(stats.is_balanced());
    }

    #[test]
    fn test_create_failure_is_error() {
        let runtime = StubRuntime::new();
        let encoded = codec::encode(&RasterImage::blank(0, 4, PixelFormat::Gray8).unwrap());
        let err = NativeMatrix::create(&runtime, &encoded).err().unwrap();
        assert!(matches!(err, InteropError::MatrixCreate { width: 0, .. }));
        assert_eq!(runtime.stats().matrices_created, 0);
    }

    #[test]
    fn test_partial_batch_releases_created_matrices() {
        let runtime = StubRuntime::new();
        let good = codec::encode(&RasterImage::blank(2, 2, PixelFormat::Gray8).unwrap());
        let bad = codec::encode(&RasterImage::blank(2, 0, PixelFormat::Gray8).unwrap());
        {
            let mut batch = MatrixBatch::with_capacity(&runtime, 3);
            batch.push(&good).unwrap();
            batch.push(&good).unwrap();
            assert!(batch.push(&bad).is_err());
            assert_eq!(batch.len(), 2);
        }
        let stats = runtime.stats();
        assert_eq!(stats.matrices_created, 2);
        assert!(stats.is_balanced());
    }

    #[test]
    fn test_read_back_image_repads_rows() {
        let runtime = StubRuntime::new();
        let data: Vec<u8> = (0..5 * 3 * 2).map(|i| i as u8).collect();
        let image = RasterImage::from_packed(5, 2, PixelFormat::Bgr24, data).unwrap();

        let back = read_back_image(&runtime, &image).unwrap().unwrap();
        assert_eq!(back.stride(), 16);
        assert_eq!(back.row(0), image.row(0));
        assert_eq!(back.row(1), image.row(1));
        assert!(runtime.stats().is_balanced());
    }
}
