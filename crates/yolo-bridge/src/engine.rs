//! Detection engine handle
//!
//! Owns one native engine from construction until `dispose` (or drop).
//! Every prediction creates its matrices and result collections inside the
//! call and releases them before returning, so only `Detection` values
//! outlive a call.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use yolo_ffi_common::cstring_from_path;

use crate::batch;
use crate::codec;
use crate::config::{EngineConfig, ModelSource};
use crate::decoder;
use crate::error::{InteropError, Result};
use crate::matrix::NativeMatrix;
use crate::raster::{PixelFormat, RasterImage};
use crate::runtime::{NativeRuntime, RawEngine};
use crate::types::Detection;

/// Throwaway predictions run by `warm_up`.
pub const WARMUP_ITERATIONS: usize = 3;

/// One loaded model instance.
///
/// `predict` and `predict_batch` take `&self`; sharing an engine between
/// threads is only sound when the native engine is reentrant. Otherwise build
/// it over a `SerializedRuntime`.
pub struct DetectionEngine<R: NativeRuntime> {
    runtime: Arc<R>,
    raw: Option<RawEngine>,
    config: EngineConfig,
}

impl<R: NativeRuntime> DetectionEngine<R> {
    /// Load a model from a file.
    pub fn from_path(runtime: Arc<R>, path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let path = path.as_ref();
        config.validate()?;
        let c_path = cstring_from_path(path)
            .map_err(|e| InteropError::EngineCreate(format!("{}: {}", path.display(), e)))?;

        let raw = runtime
            .engine_create_from_path(&c_path, &config.to_params())
            .ok_or_else(|| InteropError::EngineCreate(path.display().to_string()))?;
        info!(
            "loaded detection engine from {} ({}x{})",
            path.display(),
            config.width,
            config.height
        );
        Ok(Self::assemble(runtime, raw, config))
    }

    /// Load a model from an in-memory artifact.
    pub fn from_bytes(runtime: Arc<R>, model: &[u8], config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let raw = runtime
            .engine_create_from_bytes(model, &config.to_params())
            .ok_or_else(|| InteropError::EngineCreate(format!("{}-byte artifact", model.len())))?;
        info!(
            "loaded detection engine from {}-byte artifact ({}x{})",
            model.len(),
            config.width,
            config.height
        );
        Ok(Self::assemble(runtime, raw, config))
    }

    /// Drain `reader` and load the model from the collected bytes.
    pub fn from_reader(runtime: Arc<R>, mut reader: impl Read, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let mut model = Vec::new();
        reader.read_to_end(&mut model)?;
        Self::from_bytes(runtime, &model, config)
    }

    pub fn from_source(runtime: Arc<R>, source: ModelSource, config: EngineConfig) -> Result<Self> {
        match source {
            ModelSource::Path(path) => Self::from_path(runtime, path, config),
            ModelSource::Bytes(bytes) => Self::from_bytes(runtime, &bytes, config),
            ModelSource::Reader(reader) => Self::from_reader(runtime, reader, config),
        }
    }

    fn assemble(runtime: Arc<R>, raw: RawEngine, config: EngineConfig) -> Self {
        Self {
            runtime,
            raw: Some(raw),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    pub fn is_disposed(&self) -> bool {
        self.raw.is_none()
    }

    fn raw(&self) -> Result<&RawEngine> {
        self.raw.as_ref().ok_or(InteropError::EngineDisposed)
    }

    /// Detect objects in one image. An empty vector means nothing was found.
    pub fn predict(&self, image: &RasterImage) -> Result<Vec<Detection>> {
        let raw = self.raw()?;
        let runtime = &*self.runtime;
        let start = Instant::now();

        let encoded = codec::encode(image);
        let results = {
            let matrix = NativeMatrix::create(runtime, &encoded)?;
            runtime.engine_infer(raw, matrix.raw())
        };
        let results = results.ok_or_else(|| {
            InteropError::Inference(format!(
                "call over {}x{} image returned no results",
                image.width(),
                image.height()
            ))
        })?;
        let detections = decoder::decode_one(runtime, results);

        debug!(
            "predict {}x{} {:?}: {} detections in {}us",
            image.width(),
            image.height(),
            image.format(),
            detections.len(),
            start.elapsed().as_micros()
        );
        Ok(detections)
    }

    /// Detect objects in several images with one native call.
    ///
    /// Output `i` belongs to `images[i]`. An empty slice returns immediately.
    pub fn predict_batch(&self, images: &[RasterImage]) -> Result<Vec<Vec<Detection>>> {
        let raw = self.raw()?;
        if images.is_empty() {
            return Ok(Vec::new());
        }
        batch::dispatch(&*self.runtime, raw, images)
    }

    /// Load an image file and detect objects in it.
    pub fn predict_file(&self, path: impl AsRef<Path>) -> Result<Vec<Detection>> {
        self.raw()?;
        let decoded = image::open(path.as_ref())?;
        self.predict(&RasterImage::from_dynamic(&decoded)?)
    }

    /// Run a few predictions on a blank frame so one-time native
    /// initialization happens before the first real call.
    pub fn warm_up(&self) -> Result<()> {
        let blank =
            RasterImage::blank(self.config.width, self.config.height, PixelFormat::Bgra32)?;
        let start = Instant::now();
        for _ in 0..WARMUP_ITERATIONS {
            self.predict(&blank)?;
        }
        info!(
            "engine warm-up finished in {}ms",
            start.elapsed().as_millis()
        );
        Ok(())
    }

    /// Destroy the native engine. Later calls are no-ops.
    pub fn dispose(&mut self) {
        if let Some(raw) = self.raw.take() {
            self.runtime.engine_destroy(raw);
            info!("detection engine disposed");
        }
    }
}

impl<R: NativeRuntime> Drop for DetectionEngine<R> {
    fn drop(&mut self) {
        if self.raw.is_some() {
            warn!("detection engine dropped without dispose; releasing native engine");
            self.dispose();
        }
    }
}

impl<R: NativeRuntime> fmt::Debug for DetectionEngine<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectionEngine")
            .field("config", &self.config)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(all(test, feature = "stub"))]
mod tests {
    use super::*;
    use crate::runtime::stub::{StubModel, StubRuntime};
    use crate::runtime::DetectionRecord;
    use pretty_assertions::assert_eq;

    fn artifact() -> Vec<u8> {
        StubModel::new(vec![DetectionRecord {
            class_index: 2,
            confidence: 0.8,
            x: 1,
            y: 2,
            width: 3,
            height: 4,
        }])
        .to_artifact()
        .unwrap()
    }

    #[test]
    fn test_use_after_dispose_is_error() {
        let runtime = Arc::new(StubRuntime::new());
        let mut engine =
            DetectionEngine::from_bytes(runtime.clone(), &artifact(), EngineConfig::default())
                .unwrap();
        engine.dispose();

        let image = RasterImage::blank(4, 4, PixelFormat::Gray8).unwrap();
        assert!(matches!(engine.predict(&image), Err(InteropError::EngineDisposed)));
        assert!(matches!(engine.predict_batch(&[]), Err(InteropError::EngineDisposed)));
        assert_eq!(runtime.stats().matrices_created, 0);
    }

    #[test]
    fn test_drop_releases_engine() {
        let runtime = Arc::new(StubRuntime::new());
        {
            let _engine =
                DetectionEngine::from_bytes(runtime.clone(), &artifact(), EngineConfig::default())
                    .unwrap();
        }
        let stats = runtime.stats();
        assert_eq!(stats.engines_created, 1);
        assert_eq!(stats.engines_destroyed, 1);
    }

    #[test]
    fn test_invalid_config_makes_no_native_call() {
        let runtime = Arc::new(StubRuntime::new());
        let config = EngineConfig::default().with_thresholds(0.0, 0.45);
        let err = DetectionEngine::from_bytes(runtime.clone(), &artifact(), config).unwrap_err();
        assert!(matches!(err, InteropError::InvalidConfig(_)));
        assert_eq!(runtime.stats().engines_created, 0);
    }

    #[test]
    fn test_debug_shows_state() {
        let runtime = Arc::new(StubRuntime::new());
        let mut engine =
            DetectionEngine::from_bytes(runtime, &artifact(), EngineConfig::default()).unwrap();
        assert!(format!("{:?}", engine).contains("disposed: false"));
        engine.dispose();
        assert!(format!("{:?}", engine).contains("disposed: true"));
    }
}
