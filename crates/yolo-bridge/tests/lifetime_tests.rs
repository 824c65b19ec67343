//! Native allocation parity under faults and concurrency
#![cfg(feature = "stub")]

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use yolo_bridge::matrix::read_back_image;
use yolo_bridge::runtime::stub::{StubModel, StubRuntime};
use yolo_bridge::runtime::DetectionRecord;
use yolo_bridge::{
    capabilities, DetectionEngine, EngineConfig, InteropError, PixelFormat, RasterImage,
    NativeRuntime, RuntimeInfo, SerializedRuntime,
};

fn artifact() -> Vec<u8> {
    StubModel::new(vec![DetectionRecord {
        class_index: 1,
        confidence: 0.9,
        x: 4,
        y: 4,
        width: 8,
        height: 8,
    }])
    .to_artifact()
    .unwrap()
}

fn images(n: u32) -> Vec<RasterImage> {
    (0..n)
        .map(|i| RasterImage::blank(16 + i, 16, PixelFormat::Bgr24).unwrap())
        .collect()
}

#[test]
fn test_failed_predict_leaks_nothing() {
    let runtime = Arc::new(StubRuntime::new().with_failing_inference());
    let engine =
        DetectionEngine::from_bytes(runtime.clone(), &artifact(), EngineConfig::default()).unwrap();

    let single = engine.predict(&images(1)[0]);
    assert!(matches!(single, Err(InteropError::Inference(_))));
    let batch = engine.predict_batch(&images(4));
    assert!(matches!(batch, Err(InteropError::Inference(_))));

    let stats = runtime.stats();
    assert_eq!(stats.matrices_created, 5);
    assert_eq!(stats.live_matrices(), 0);
    assert_eq!(stats.live_results(), 0);
    assert!(stats.is_balanced());
}

#[test]
fn test_panicking_predict_leaks_nothing() {
    let runtime = Arc::new(StubRuntime::new().with_panicking_inference());
    let engine =
        DetectionEngine::from_bytes(runtime.clone(), &artifact(), EngineConfig::default()).unwrap();
    let frames = images(3);

    let single = panic::catch_unwind(AssertUnwindSafe(|| engine.predict(&frames[0])));
    assert!(single.is_err());
    let batch = panic::catch_unwind(AssertUnwindSafe(|| engine.predict_batch(&frames)));
    assert!(batch.is_err());

    let stats = runtime.stats();
    assert_eq!(stats.matrices_created, 4);
    assert_eq!(stats.matrices_destroyed, 4);
    assert!(stats.is_balanced());

    // The engine itself is still usable for disposal after the fault.
    drop(engine);
    assert_eq!(runtime.stats().engines_destroyed, 1);
}

#[test]
fn test_concurrent_predictions_through_serialized_runtime() {
    let runtime = Arc::new(SerializedRuntime::new(StubRuntime::new()));
    let engine =
        DetectionEngine::from_bytes(runtime.clone(), &artifact(), EngineConfig::default()).unwrap();
    let frames = images(4);

    thread::scope(|s| {
        for t in 0..8 {
            let engine = &engine;
            let frames = &frames;
            s.spawn(move || {
                for _ in 0..10 {
                    if t % 2 == 0 {
                        assert_eq!(engine.predict(&frames[0]).unwrap().len(), 1);
                    } else {
                        assert_eq!(engine.predict_batch(frames).unwrap().len(), 4);
                    }
                }
            });
        }
    });

    drop(engine);
    let stats = runtime.inner().stats();
    assert_eq!(stats.matrices_created, 4 * 10 + 4 * 10 * 4);
    assert!(stats.is_balanced());
    assert_eq!(stats.engines_destroyed, 1);
}

/// Start `threads` callers together and run three predictions each.
fn predict_together<R: NativeRuntime>(engine: &DetectionEngine<R>, threads: usize) {
    let frames = images(1);
    let frame = &frames[0];
    let start = Barrier::new(threads);
    thread::scope(|s| {
        for _ in 0..threads {
            let start = &start;
            s.spawn(move || {
                start.wait();
                for _ in 0..3 {
                    assert_eq!(engine.predict(frame).unwrap().len(), 1);
                }
            });
        }
    });
}

#[test]
fn test_serialized_runtime_admits_one_inference_at_a_time() {
    let stub = StubRuntime::new().with_inference_delay(Duration::from_millis(20));
    let runtime = Arc::new(SerializedRuntime::new(stub));
    let engine =
        DetectionEngine::from_bytes(runtime.clone(), &artifact(), EngineConfig::default()).unwrap();

    predict_together(&engine, 6);
    drop(engine);

    let stats = runtime.inner().stats();
    assert_eq!(stats.max_concurrent_inferences, 1);
    assert_eq!(stats.results_created, 18);
    assert!(stats.is_balanced());
}

#[test]
fn test_bare_runtime_overlaps_inferences() {
    let runtime = Arc::new(StubRuntime::new().with_inference_delay(Duration::from_millis(20)));
    let engine =
        DetectionEngine::from_bytes(runtime.clone(), &artifact(), EngineConfig::default()).unwrap();

    predict_together(&engine, 6);
    drop(engine);

    let stats = runtime.stats();
    assert!(stats.max_concurrent_inferences > 1);
    assert!(stats.is_balanced());
}

#[test]
fn test_accelerator_config_without_device_fails_creation() {
    let config = EngineConfig::default().with_accelerator(false);

    let runtime = Arc::new(StubRuntime::new());
    let err = DetectionEngine::from_bytes(runtime.clone(), &artifact(), config.clone()).unwrap_err();
    assert!(matches!(err, InteropError::EngineCreate(_)));
    assert!(runtime.stats().is_balanced());

    let runtime = Arc::new(StubRuntime::new().with_accelerators(1));
    let engine = DetectionEngine::from_bytes(runtime.clone(), &artifact(), config).unwrap();
    drop(engine);
    assert!(runtime.stats().is_balanced());
}

#[test]
fn test_read_back_unaligned_rows() {
    let runtime = StubRuntime::new();
    for format in [PixelFormat::Gray8, PixelFormat::Bgr24, PixelFormat::Bgra32] {
        // 7 px wide: row lengths 7, 21 and 28 bytes
        let data: Vec<u8> = (0..7 * 3 * format.bytes_per_pixel())
            .map(|i| (i * 3) as u8)
            .collect();
        let image = RasterImage::from_packed(7, 3, format, data).unwrap();

        let back = read_back_image(&runtime, &image).unwrap().unwrap();
        assert_eq!(back.stride() % 4, 0);
        assert!(back.stride() >= back.row_bytes());
        for y in 0..3 {
            assert_eq!(back.row(y), image.row(y));
        }
    }
    assert!(runtime.stats().is_balanced());
}

#[test]
fn test_capability_queries_release_version_buffer() {
    let runtime = StubRuntime::new().with_accelerators(1).with_version("1.13.1");

    assert!(capabilities::accelerator_available(&runtime));
    assert!(capabilities::accelerator_extension_available(&runtime));
    assert_eq!(capabilities::accelerator_device_count(&runtime), 1);
    assert_eq!(capabilities::engine_version(&runtime).unwrap(), "1.13.1");

    let info = RuntimeInfo::query(&runtime).unwrap();
    assert_eq!(info.engine_version, "1.13.1");

    let stats = runtime.stats();
    assert_eq!(stats.strings_created, 2);
    assert!(stats.is_balanced());
}
