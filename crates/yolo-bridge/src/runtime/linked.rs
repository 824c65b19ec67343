//! Runtime bound to the native detection library at link time
//!
//! Enabled by the `native` feature. Expects `libyolo_native` on the linker
//! search path.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;

use super::{
    DetectionRecord, EngineParams, MatrixView, NativeRuntime, RawEngine, RawMatrix, RawResultSets,
    RawResults, RawString,
};

#[link(name = "yolo_native")]
extern "C" {
    fn yolo_engine_create_by_path(path: *const c_char, params: *const EngineParams)
        -> *mut c_void;
    fn yolo_engine_create_by_bytes(
        model: *const u8,
        model_len: usize,
        params: *const EngineParams,
    ) -> *mut c_void;
    fn yolo_engine_destroy(engine: *mut c_void);
    fn yolo_engine_infer(engine: *mut c_void, matrix: *mut c_void) -> *mut c_void;
    fn yolo_engine_infer_batch(
        engine: *mut c_void,
        matrices: *const *mut c_void,
        matrices_len: c_int,
    ) -> *mut c_void;

    fn yolo_result_count(results: *mut c_void) -> c_int;
    fn yolo_result_at(results: *mut c_void, index: c_int) -> DetectionRecord;
    fn yolo_result_destroy(results: *mut c_void);
    fn yolo_result_sets_count(sets: *mut c_void) -> c_int;
    fn yolo_result_sets_at(sets: *mut c_void, index: c_int) -> *mut c_void;
    fn yolo_result_sets_destroy(sets: *mut c_void);

    fn yolo_matrix_create(bytes: *const u8, width: c_int, height: c_int, channels: c_int)
        -> *mut c_void;
    fn yolo_matrix_read_back(
        matrix: *mut c_void,
        width: *mut c_int,
        height: *mut c_int,
        channels: *mut c_int,
        format_code: *mut c_int,
    ) -> *const u8;
    fn yolo_matrix_destroy(matrix: *mut c_void);

    fn yolo_accelerator_available() -> bool;
    fn yolo_accelerator_extension_available() -> bool;
    fn yolo_accelerator_device_count() -> c_int;
    fn yolo_engine_version(out: *mut *const c_char, len: *mut c_int);
    fn yolo_string_destroy(s: *const c_char);
}

/// Runtime backed by `libyolo_native`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkedRuntime;

impl LinkedRuntime {
    pub fn new() -> Self {
        Self
    }
}

fn count(n: c_int) -> usize {
    usize::try_from(n).unwrap_or(0)
}

impl NativeRuntime for LinkedRuntime {
    fn engine_create_from_path(&self, path: &CStr, params: &EngineParams) -> Option<RawEngine> {
        RawEngine::from_raw(unsafe { yolo_engine_create_by_path(path.as_ptr(), params) })
    }

    fn engine_create_from_bytes(&self, model: &[u8], params: &EngineParams) -> Option<RawEngine> {
        RawEngine::from_raw(unsafe {
            yolo_engine_create_by_bytes(model.as_ptr(), model.len(), params)
        })
    }

    fn engine_destroy(&self, engine: RawEngine) {
        unsafe { yolo_engine_destroy(engine.as_ptr()) }
    }

    fn engine_infer(&self, engine: &RawEngine, matrix: &RawMatrix) -> Option<RawResults> {
        RawResults::from_raw(unsafe { yolo_engine_infer(engine.as_ptr(), matrix.as_ptr()) })
    }

    fn engine_infer_batch(
        &self,
        engine: &RawEngine,
        matrices: &[RawMatrix],
    ) -> Option<RawResultSets> {
        let len = c_int::try_from(matrices.len()).ok()?;
        // RawMatrix is repr(transparent) over a non-null pointer.
        let array = matrices.as_ptr() as *const *mut c_void;
        RawResultSets::from_raw(unsafe { yolo_engine_infer_batch(engine.as_ptr(), array, len) })
    }

    fn result_count(&self, results: &RawResults) -> usize {
        count(unsafe { yolo_result_count(results.as_ptr()) })
    }

    fn result_at(&self, results: &RawResults, index: usize) -> DetectionRecord {
        unsafe { yolo_result_at(results.as_ptr(), index as c_int) }
    }

    fn result_destroy(&self, results: RawResults) {
        unsafe { yolo_result_destroy(results.as_ptr()) }
    }

    fn result_sets_count(&self, sets: &RawResultSets) -> usize {
        count(unsafe { yolo_result_sets_count(sets.as_ptr()) })
    }

    fn result_sets_at(&self, sets: &RawResultSets, index: usize) -> Option<RawResults> {
        RawResults::from_raw(unsafe { yolo_result_sets_at(sets.as_ptr(), index as c_int) })
    }

    fn result_sets_destroy(&self, sets: RawResultSets) {
        unsafe { yolo_result_sets_destroy(sets.as_ptr()) }
    }

    fn matrix_create(
        &self,
        bytes: &[u8],
        width: i32,
        height: i32,
        channels: i32,
    ) -> Option<RawMatrix> {
        RawMatrix::from_raw(unsafe { yolo_matrix_create(bytes.as_ptr(), width, height, channels) })
    }

    fn matrix_read_back(&self, matrix: &RawMatrix) -> MatrixView {
        let (mut width, mut height, mut channels, mut format_code) = (0, 0, 0, 0);
        let data = unsafe {
            yolo_matrix_read_back(
                matrix.as_ptr(),
                &mut width,
                &mut height,
                &mut channels,
                &mut format_code,
            )
        };
        MatrixView {
            data,
            width,
            height,
            channels,
            format_code,
        }
    }

    fn matrix_destroy(&self, matrix: RawMatrix) {
        unsafe { yolo_matrix_destroy(matrix.as_ptr()) }
    }

    fn accelerator_available(&self) -> bool {
        unsafe { yolo_accelerator_available() }
    }

    fn accelerator_extension_available(&self) -> bool {
        unsafe { yolo_accelerator_extension_available() }
    }

    fn accelerator_device_count(&self) -> usize {
        count(unsafe { yolo_accelerator_device_count() })
    }

    fn engine_version(&self) -> RawString {
        let mut out: *const c_char = ptr::null();
        let mut len: c_int = 0;
        unsafe { yolo_engine_version(&mut out, &mut len) };
        RawString {
            ptr: out,
            len: count(len),
        }
    }

    fn string_destroy(&self, s: RawString) {
        if !s.ptr.is_null() {
            unsafe { yolo_string_destroy(s.ptr) }
        }
    }
}
