//! Serializing adapter for engines that are not call-reentrant

use std::ffi::CStr;

use parking_lot::Mutex;

use super::{
    DetectionRecord, EngineParams, MatrixView, NativeRuntime, RawEngine, RawMatrix, RawResultSets,
    RawResults, RawString,
};

/// Wraps a runtime so that at most one prediction call is inside the native
/// library at a time.
///
/// The lock covers exactly one `engine_infer` / `engine_infer_batch` call.
/// Encoding, matrix creation and result decoding stay concurrent.
pub struct SerializedRuntime<R> {
    inner: R,
    infer_lock: Mutex<()>,
}

impl<R: NativeRuntime> SerializedRuntime<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            infer_lock: Mutex::new(()),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: NativeRuntime> NativeRuntime for SerializedRuntime<R> {
    fn engine_create_from_path(&self, path: &CStr, params: &EngineParams) -> Option<RawEngine> {
        self.inner.engine_create_from_path(path, params)
    }

    fn engine_create_from_bytes(&self, model: &[u8], params: &EngineParams) -> Option<RawEngine> {
        self.inner.engine_create_from_bytes(model, params)
    }

    fn engine_destroy(&self, engine: RawEngine) {
        self.inner.engine_destroy(engine)
    }

    fn engine_infer(&self, engine: &RawEngine, matrix: &RawMatrix) -> Option<RawResults> {
        let _guard = self.infer_lock.lock();
        self.inner.engine_infer(engine, matrix)
    }

    fn engine_infer_batch(
        &self,
        engine: &RawEngine,
        matrices: &[RawMatrix],
    ) -> Option<RawResultSets> {
        let _guard = self.infer_lock.lock();
        self.inner.engine_infer_batch(engine, matrices)
    }

    fn result_count(&self, results: &RawResults) -> usize {
        self.inner.result_count(results)
    }

    fn result_at(&self, results: &RawResults, index: usize) -> DetectionRecord {
        self.inner.result_at(results, index)
    }

    fn result_destroy(&self, results: RawResults) {
        self.inner.result_destroy(results)
    }

    fn result_sets_count(&self, sets: &RawResultSets) -> usize {
        self.inner.result_sets_count(sets)
    }

    fn result_sets_at(&self, sets: &RawResultSets, index: usize) -> Option<RawResults> {
        self.inner.result_sets_at(sets, index)
    }

    fn result_sets_destroy(&self, sets: RawResultSets) {
        self.inner.result_sets_destroy(sets)
    }

    fn matrix_create(
        &self,
        bytes: &[u8],
        width: i32,
        height: i32,
        channels: i32,
    ) -> Option<RawMatrix> {
        self.inner.matrix_create(bytes, width, height, channels)
    }

    fn matrix_read_back(&self, matrix: &RawMatrix) -> MatrixView {
        self.inner.matrix_read_back(matrix)
    }

    fn matrix_destroy(&self, matrix: RawMatrix) {
        self.inner.matrix_destroy(matrix)
    }

    fn accelerator_available(&self) -> bool {
        self.inner.accelerator_available()
    }

    fn accelerator_extension_available(&self) -> bool {
        self.inner.accelerator_extension_available()
    }

    fn accelerator_device_count(&self) -> usize {
        self.inner.accelerator_device_count()
    }

    fn engine_version(&self) -> RawString {
        self.inner.engine_version()
    }

    fn string_destroy(&self, s: RawString) {
        self.inner.string_destroy(s)
    }
}
