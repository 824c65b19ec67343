//! Object-detection engine bridge
//!
//! Safe Rust access to an opaque, natively implemented object-detection
//! engine. Images go in as host rasters, detections come out as plain
//! values, and every native allocation made on the way is released exactly
//! once.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌───────────┐     ┌──────────────┐     ┌─────────────────┐
//! │ RasterImage │────▶│   codec   │────▶│ NativeMatrix │────▶│ DetectionEngine │
//! │ (host rows) │     │ (packing) │     │ (scope guard)│     │  (native call)  │
//! └─────────────┘     └───────────┘     └──────────────┘     └────────┬────────┘
//!                                                                     │
//!                     ┌───────────┐     ┌──────────────┐              │
//!                     │ Detection │◀────│   decoder    │◀─────────────┘
//!                     │  (value)  │     │ (par decode) │  result handles
//!                     └───────────┘     └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! # #[cfg(feature = "stub")]
//! # fn main() -> yolo_bridge::Result<()> {
//! use std::sync::Arc;
//! use yolo_bridge::runtime::stub::StubRuntime;
//! use yolo_bridge::{DetectionEngine, EngineConfig};
//!
//! let runtime = Arc::new(StubRuntime::new());
//! let mut engine = DetectionEngine::from_path(runtime, "model.json", EngineConfig::default())?;
//! engine.warm_up()?;
//!
//! for detection in engine.predict_file("frame.png")? {
//!     println!("class {} at {:?}", detection.class_index, detection.bbox);
//! }
//! engine.dispose();
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "stub"))]
//! # fn main() {}
//! ```
//!
//! ## Memory Ownership
//!
//! - `DetectionEngine` owns its native engine until `dispose()` or drop
//! - Native matrices live inside one prediction call and are destroyed on
//!   every exit path, including panics
//! - Result collections are destroyed by the decoder once read; for batches
//!   every inner collection goes before the outer one
//! - The version string buffer is freed as soon as it has been copied
//!
//! ## Features
//!
//! - `stub` (default): scripted in-process runtime for tests and demos
//! - `native`: runtime linked against `libyolo_native`

pub mod batch;
pub mod capabilities;
pub mod codec;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod logging;
pub mod matrix;
pub mod raster;
mod release;
pub mod runtime;
pub mod types;

pub use capabilities::RuntimeInfo;
pub use config::{EngineConfig, ModelSource};
pub use engine::DetectionEngine;
pub use error::{InteropError, Result};
pub use raster::{PixelFormat, RasterImage};
pub use runtime::{NativeRuntime, SerializedRuntime};
pub use types::{BoundingBox, Detection};

#[cfg(feature = "native")]
pub use runtime::LinkedRuntime;
