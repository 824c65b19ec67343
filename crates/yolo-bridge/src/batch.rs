//! Batch dispatcher
//!
//! One batched prediction: encode every image, create one matrix per image,
//! issue a single `engine_infer_batch` call, release the matrices, then hand
//! the nested result to the decoder. Matrix cleanup belongs to this call and
//! runs even when the foreign call fails or unwinds.

use std::time::Instant;

use rayon::prelude::*;
use tracing::debug;

use crate::codec::{self, EncodedImage};
use crate::decoder;
use crate::error::{InteropError, Result};
use crate::matrix::MatrixBatch;
use crate::raster::RasterImage;
use crate::runtime::{NativeRuntime, RawEngine};
use crate::types::Detection;

/// Run detection over `images`; output `i` belongs to `images[i]`.
pub fn dispatch<R: NativeRuntime>(
    runtime: &R,
    engine: &RawEngine,
    images: &[RasterImage],
) -> Result<Vec<Vec<Detection>>> {
    let start = Instant::now();
    let encoded: Vec<EncodedImage> = images.par_iter().map(codec::encode).collect();

    let sets = {
        let mut batch = MatrixBatch::with_capacity(runtime, encoded.len());
        for image in &encoded {
            batch.push(image)?;
        }
        let sets = runtime.engine_infer_batch(engine, batch.as_slice());
        // Input matrices are released here, before any decoding starts.
        drop(batch);
        sets.ok_or_else(|| {
            InteropError::Inference(format!("batched call over {} images failed", images.len()))
        })?
    };

    let decoded = decoder::decode_batch(runtime, sets)?;
    if decoded.len() != images.len() {
        return Err(InteropError::BatchSizeMismatch {
            expected: images.len(),
            actual: decoded.len(),
        });
    }

    debug!(
        "batch of {} images: {} detections in {}us",
        images.len(),
        decoded.iter().map(Vec::len).sum::<usize>(),
        start.elapsed().as_micros()
    );
    Ok(decoded)
}

#[cfg(all(test, feature = "stub"))]
mod tests {
    use super::*;
    use crate::raster::PixelFormat;
    use crate::runtime::stub::{StubModel, StubRuntime};
    use crate::runtime::EngineParams;
    use pretty_assertions::assert_eq;

    fn engine(runtime: &StubRuntime) -> RawEngine {
        let params = EngineParams {
            use_accelerator: false,
            reduced_precision: false,
            height: 64,
            width: 64,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        };
        let artifact = StubModel::default().tagged().to_artifact().unwrap();
        runtime.engine_create_from_bytes(&artifact, &params).unwrap()
    }

    #[test]
    fn test_dispatch_keeps_input_order() {
        let runtime = StubRuntime::new();
        let raw = engine(&runtime);
        let images: Vec<_> = (1..=6)
            .map(|i| RasterImage::blank(i * 3, i, PixelFormat::Bgr24).unwrap())
            .collect();

        let out = dispatch(&runtime, &raw, &images).unwrap();
        assert_eq!(out.len(), 6);
        for (i, detections) in out.iter().enumerate() {
            assert_eq!(detections[0].class_index, i as i32);
            assert_eq!(detections[0].bbox.width as u32, images[i].width());
        }

        runtime.engine_destroy(raw);
        assert!(runtime.stats().is_balanced());
    }

    #[test]
    fn test_failed_call_releases_matrices() {
        let runtime = StubRuntime::new().with_failing_inference();
        let raw = engine(&runtime);
        let images = vec![RasterImage::blank(8, 8, PixelFormat::Gray8).unwrap(); 3];

        let err = dispatch(&runtime, &raw, &images).unwrap_err();
        assert!(matches!(err, InteropError::Inference(_)));

        runtime.engine_destroy(raw);
        let stats = runtime.stats();
        assert_eq!(stats.matrices_created, 3);
        assert!(stats.is_balanced());
    }
}
