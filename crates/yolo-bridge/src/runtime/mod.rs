//! The foreign call boundary
//!
//! `NativeRuntime` has one method per entry point of the native detection
//! library. Handles are opaque, non-null and non-copyable; every `*_destroy`
//! call consumes its handle, so a handle can only be released once through
//! safe code.
//!
//! # Ownership Rules
//!
//! - `engine_create_*` returns an engine owned by the caller until `engine_destroy`
//! - `matrix_create` may keep a pointer into `bytes`; the caller keeps the
//!   buffer alive until `matrix_destroy`
//! - `engine_infer*` return result collections owned by the caller
//! - Inner handles obtained from `result_sets_at` are destroyed individually;
//!   `result_sets_destroy` releases only the outer collection
//! - The buffer behind `engine_version` is released with `string_destroy`
//!
//! # Thread Safety
//!
//! Implementations are `Send + Sync`. Whether concurrent `engine_infer`
//! calls on one engine are allowed is the native library's contract; wrap the
//! runtime in `SerializedRuntime` when it is not reentrant.

use std::ffi::CStr;
use std::os::raw::c_char;

use serde::{Deserialize, Serialize};
use yolo_ffi_common::define_opaque_handle;

#[cfg(feature = "native")]
mod linked;
mod serialized;
#[cfg(feature = "stub")]
pub mod stub;

#[cfg(feature = "native")]
pub use linked::LinkedRuntime;
pub use serialized::SerializedRuntime;

define_opaque_handle! {
    /// One loaded model instance bound to a device and input resolution.
    pub struct RawEngine;
}

define_opaque_handle! {
    /// One native image container.
    pub struct RawMatrix;
}

define_opaque_handle! {
    /// A native collection of detection records for one image.
    pub struct RawResults;
}

define_opaque_handle! {
    /// A native collection of per-image result collections.
    pub struct RawResultSets;
}

/// Fixed-size detection record as laid out by the native library.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub class_index: i32,
    pub confidence: f32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

const _: () = assert!(std::mem::size_of::<DetectionRecord>() == 24);

/// Engine construction parameters, passed by pointer to `engine_create_*`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineParams {
    pub use_accelerator: bool,
    pub reduced_precision: bool,
    pub height: i32,
    pub width: i32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

/// Borrowed view of a native matrix's pixels, valid until the matrix is destroyed.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MatrixView {
    pub data: *const u8,
    pub width: i32,
    pub height: i32,
    pub channels: i32,
    /// 1 = 8-bit single channel, 2 = 16-bit single channel,
    /// 3 = 24-bit triple channel, 4 = 32-bit quad channel, anything else unknown
    pub format_code: i32,
}

/// Length-delimited native string; not NUL-terminated.
#[repr(C)]
#[derive(Debug)]
pub struct RawString {
    pub ptr: *const c_char,
    pub len: usize,
}

/// Entry points of the native detection library.
pub trait NativeRuntime: Send + Sync {
    /// Load a model from a filesystem path. `None` if the native side refused.
    fn engine_create_from_path(&self, path: &CStr, params: &EngineParams) -> Option<RawEngine>;

    /// Load a model from an in-memory artifact. `None` if the native side refused.
    fn engine_create_from_bytes(&self, model: &[u8], params: &EngineParams) -> Option<RawEngine>;

    fn engine_destroy(&self, engine: RawEngine);

    /// Run detection on one matrix. `None` if the native call faulted.
    fn engine_infer(&self, engine: &RawEngine, matrix: &RawMatrix) -> Option<RawResults>;

    /// Run detection on a batch in one call. Entry `i` of the returned
    /// collection belongs to `matrices[i]`.
    fn engine_infer_batch(
        &self,
        engine: &RawEngine,
        matrices: &[RawMatrix],
    ) -> Option<RawResultSets>;

    fn result_count(&self, results: &RawResults) -> usize;

    /// Read record `index`; `index < result_count(results)`.
    fn result_at(&self, results: &RawResults, index: usize) -> DetectionRecord;

    fn result_destroy(&self, results: RawResults);

    fn result_sets_count(&self, sets: &RawResultSets) -> usize;

    /// Fetch inner collection `index`; the caller owns it from here on.
    fn result_sets_at(&self, sets: &RawResultSets, index: usize) -> Option<RawResults>;

    /// Release the outer collection only. Every inner collection must already
    /// have been fetched and destroyed.
    fn result_sets_destroy(&self, sets: RawResultSets);

    /// Wrap tightly packed pixels as a native matrix.
    fn matrix_create(
        &self,
        bytes: &[u8],
        width: i32,
        height: i32,
        channels: i32,
    ) -> Option<RawMatrix>;

    fn matrix_read_back(&self, matrix: &RawMatrix) -> MatrixView;

    fn matrix_destroy(&self, matrix: RawMatrix);

    fn accelerator_available(&self) -> bool;

    fn accelerator_extension_available(&self) -> bool;

    fn accelerator_device_count(&self) -> usize;

    /// Version of the native runtime, in a buffer released by `string_destroy`.
    fn engine_version(&self) -> RawString;

    fn string_destroy(&self, s: RawString);
}
