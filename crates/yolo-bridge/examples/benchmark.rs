use std::sync::Arc;
use std::time::Instant;

use yolo_bridge::runtime::stub::{StubModel, StubRuntime};
use yolo_bridge::runtime::DetectionRecord;
use yolo_bridge::{logging, DetectionEngine, EngineConfig, PixelFormat, RasterImage, RuntimeInfo};

fn main() {
    logging::init();

    let model = StubModel::new(vec![
        DetectionRecord {
            class_index: 0,
            confidence: 0.91,
            x: 10,
            y: 10,
            width: 50,
            height: 80,
        },
        DetectionRecord {
            class_index: 5,
            confidence: 0.76,
            x: 200,
            y: 150,
            width: 60,
            height: 40,
        },
    ]);
    let artifact = match model.to_artifact() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Failed to build model artifact: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = Arc::new(StubRuntime::new());
    match RuntimeInfo::query(&*runtime) {
        Ok(info) => println!("Runtime: {:?}", info),
        Err(e) => eprintln!("Runtime query failed: {}", e),
    }

    let config = EngineConfig::default();
    println!("Creating engine at {}x{}", config.width, config.height);
    let mut engine = match DetectionEngine::from_bytes(runtime.clone(), &artifact, config) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Failed to create engine: {}", e);
            std::process::exit(1);
        }
    };

    // Test frame (640x480, BGR24) with a gradient pattern
    let test_width = 640u32;
    let test_height = 480u32;
    let stride = match RasterImage::blank(test_width, test_height, PixelFormat::Bgr24) {
        Ok(blank) => blank.stride(),
        Err(e) => {
            eprintln!("Bad test frame: {}", e);
            std::process::exit(1);
        }
    };
    let mut data = vec![0u8; stride * test_height as usize];
    for y in 0..test_height as usize {
        for x in 0..test_width as usize {
            let idx = y * stride + x * 3;
            data[idx] = 128; // B
            data[idx + 1] = (y % 256) as u8; // G
            data[idx + 2] = (x % 256) as u8; // R
        }
    }
    let frame = match RasterImage::new(test_width, test_height, stride, PixelFormat::Bgr24, data) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Bad test frame: {}", e);
            std::process::exit(1);
        }
    };

    println!("\nRunning warmup pass...");
    if let Err(e) = engine.warm_up() {
        eprintln!("Warm-up failed: {}", e);
        std::process::exit(1);
    }

    let iterations = 10u128;
    println!(
        "\nBenchmarking {} frames at {}x{}...",
        iterations, test_width, test_height
    );
    let mut total_time = 0u128;
    for i in 0..iterations {
        let start = Instant::now();
        let detections = match engine.predict(&frame) {
            Ok(d) => d,
            Err(e) => {
                eprintln!("Frame {} failed: {}", i, e);
                continue;
            }
        };
        let elapsed = start.elapsed();
        total_time += elapsed.as_micros();

        println!("Frame {}: {:?}, {} detections", i, elapsed, detections.len());
        if let Some(first) = detections.first() {
            println!("  First detection: {:?}", first);
        }
    }

    let batch = vec![frame; 8];
    let start = Instant::now();
    match engine.predict_batch(&batch) {
        Ok(results) => println!(
            "\nBatch of {}: {:?} ({} result sets)",
            batch.len(),
            start.elapsed(),
            results.len()
        ),
        Err(e) => eprintln!("Batch failed: {}", e),
    }

    engine.dispose();

    let avg_time = total_time / iterations;
    println!("\n=== Results ===");
    println!(
        "Average latency: {} μs ({:.2} ms)",
        avg_time,
        avg_time as f64 / 1000.0
    );
    if avg_time > 0 {
        println!("Throughput: {:.1} FPS", 1_000_000.0 / avg_time as f64);
    }
    println!("Native allocations: {:?}", runtime.stats());
}
