//! Scripted in-process runtime
//!
//! Every handle it returns points at a real heap allocation, and every
//! create/destroy is counted, so lifetime mistakes on the Rust side show up
//! as unbalanced `AllocationStats` instead of silent leaks.
//!
//! The model artifact is a JSON `StubModel`: the records it lists are
//! returned for every image. Anything that does not parse is rejected the way
//! a corrupt artifact would be.

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use yolo_ffi_common::{boxed_into_raw, free_boxed, free_boxed_slice, vec_into_raw};

use super::{
    DetectionRecord, EngineParams, MatrixView, NativeRuntime, RawEngine, RawMatrix, RawResultSets,
    RawResults, RawString,
};

const DEFAULT_STUB_VERSION: &str = "0.0.0-stub";

/// Model artifact understood by `StubRuntime`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StubModel {
    /// Records returned, in order, for every image
    pub detections: Vec<DetectionRecord>,
    /// Prefix each image's results with a whole-frame record whose
    /// `class_index` is the image's position in the batch
    pub tag_batch_index: bool,
}

impl StubModel {
    pub fn new(detections: Vec<DetectionRecord>) -> Self {
        Self {
            detections,
            tag_batch_index: false,
        }
    }

    pub fn tagged(mut self) -> Self {
        self.tag_batch_index = true;
        self
    }

    /// Serialize as a model artifact.
    pub fn to_artifact(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Snapshot of native allocation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AllocationStats {
    pub engines_created: usize,
    pub engines_destroyed: usize,
    pub matrices_created: usize,
    pub matrices_destroyed: usize,
    pub results_created: usize,
    pub results_destroyed: usize,
    pub result_sets_created: usize,
    pub result_sets_destroyed: usize,
    pub strings_created: usize,
    pub strings_destroyed: usize,
    /// Destroy calls on handles that were not live
    pub double_frees: usize,
    /// Reads through handles that were not live
    pub invalid_accesses: usize,
    /// Outer collections destroyed while inner collections they handed out were still live
    pub premature_outer_frees: usize,
    /// Most prediction calls observed inside the runtime at the same time
    pub max_concurrent_inferences: usize,
}

impl AllocationStats {
    pub fn live_matrices(&self) -> usize {
        self.matrices_created - self.matrices_destroyed
    }

    pub fn live_results(&self) -> usize {
        (self.results_created - self.results_destroyed)
            + (self.result_sets_created - self.result_sets_destroyed)
    }

    /// Every transient allocation released exactly once, nothing touched after release.
    pub fn is_balanced(&self) -> bool {
        self.matrices_created == self.matrices_destroyed
            && self.results_created == self.results_destroyed
            && self.result_sets_created == self.result_sets_destroyed
            && self.strings_created == self.strings_destroyed
            && self.double_frees == 0
            && self.invalid_accesses == 0
            && self.premature_outer_frees == 0
    }
}

#[derive(Default)]
struct Counters {
    engines_created: AtomicUsize,
    engines_destroyed: AtomicUsize,
    matrices_created: AtomicUsize,
    matrices_destroyed: AtomicUsize,
    results_created: AtomicUsize,
    results_destroyed: AtomicUsize,
    result_sets_created: AtomicUsize,
    result_sets_destroyed: AtomicUsize,
    strings_created: AtomicUsize,
    strings_destroyed: AtomicUsize,
    double_frees: AtomicUsize,
    invalid_accesses: AtomicUsize,
    premature_outer_frees: AtomicUsize,
    inferences_in_flight: AtomicUsize,
    max_inferences_in_flight: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

/// Marks one prediction call as running until dropped.
struct InFlight<'a>(&'a Counters);

impl<'a> InFlight<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.inferences_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters
            .max_inferences_in_flight
            .fetch_max(now, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.inferences_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    Engine,
    Matrix,
    Results,
    ResultSets,
    String,
}

struct StubEngine {
    model: StubModel,
}

struct StubMatrix {
    data: Vec<u8>,
    width: i32,
    height: i32,
    channels: i32,
}

type StubResults = Vec<DetectionRecord>;
type StubResultSets = Vec<*mut c_void>;

/// In-process `NativeRuntime` with fault injection and allocation accounting.
pub struct StubRuntime {
    fail_inference: bool,
    panic_on_inference: bool,
    missing_inner_result: Option<usize>,
    accelerator_devices: usize,
    inference_delay: Option<Duration>,
    version: String,
    counters: Counters,
    live: Mutex<AHashSet<(Kind, usize)>>,
    /// Inner result address -> outer collection address, until the inner one is destroyed
    set_members: Mutex<AHashMap<usize, usize>>,
}

impl Default for StubRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl StubRuntime {
    pub fn new() -> Self {
        Self {
            fail_inference: false,
            panic_on_inference: false,
            missing_inner_result: None,
            accelerator_devices: 0,
            inference_delay: None,
            version: DEFAULT_STUB_VERSION.to_string(),
            counters: Counters::default(),
            live: Mutex::new(AHashSet::new()),
            set_members: Mutex::new(AHashMap::new()),
        }
    }

    /// Prediction calls return no result handle.
    pub fn with_failing_inference(mut self) -> Self {
        self.fail_inference = true;
        self
    }

    /// Prediction calls panic, standing in for a native exception.
    pub fn with_panicking_inference(mut self) -> Self {
        self.panic_on_inference = true;
        self
    }

    /// Batched results report a null inner collection at `index`.
    pub fn with_missing_inner_result(mut self, index: usize) -> Self {
        self.missing_inner_result = Some(index);
        self
    }

    /// Report `count` accelerator devices (and accelerator support when non-zero).
    pub fn with_accelerators(mut self, count: usize) -> Self {
        self.accelerator_devices = count;
        self
    }

    /// Each prediction call sleeps for `delay` while counted as in flight.
    pub fn with_inference_delay(mut self, delay: Duration) -> Self {
        self.inference_delay = Some(delay);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn stats(&self) -> AllocationStats {
        let c = &self.counters;
        let load = |a: &AtomicUsize| a.load(Ordering::SeqCst);
        AllocationStats {
            engines_created: load(&c.engines_created),
            engines_destroyed: load(&c.engines_destroyed),
            matrices_created: load(&c.matrices_created),
            matrices_destroyed: load(&c.matrices_destroyed),
            results_created: load(&c.results_created),
            results_destroyed: load(&c.results_destroyed),
            result_sets_created: load(&c.result_sets_created),
            result_sets_destroyed: load(&c.result_sets_destroyed),
            strings_created: load(&c.strings_created),
            strings_destroyed: load(&c.strings_destroyed),
            double_frees: load(&c.double_frees),
            invalid_accesses: load(&c.invalid_accesses),
            premature_outer_frees: load(&c.premature_outer_frees),
            max_concurrent_inferences: load(&c.max_inferences_in_flight),
        }
    }

    fn track(&self, kind: Kind, ptr: *mut c_void) {
        self.live.lock().insert((kind, ptr as usize));
    }

    fn is_live(&self, kind: Kind, addr: usize) -> bool {
        let live = self.live.lock().contains(&(kind, addr));
        if !live {
            bump(&self.counters.invalid_accesses);
            warn!("stub: access through released {:?} handle {:#x}", kind, addr);
        }
        live
    }

    fn release(&self, kind: Kind, addr: usize) -> bool {
        let removed = self.live.lock().remove(&(kind, addr));
        if !removed {
            bump(&self.counters.double_frees);
            warn!("stub: destroy of unknown {:?} handle {:#x}", kind, addr);
        }
        removed
    }

    fn alloc_results(&self, records: StubResults) -> *mut c_void {
        let ptr = boxed_into_raw(records) as *mut c_void;
        self.track(Kind::Results, ptr);
        bump(&self.counters.results_created);
        ptr
    }

    fn records_for(model: &StubModel, matrix: &StubMatrix, batch_index: usize) -> StubResults {
        let mut records = Vec::with_capacity(model.detections.len() + 1);
        if model.tag_batch_index {
            records.push(DetectionRecord {
                class_index: batch_index as i32,
                confidence: 1.0,
                x: 0,
                y: 0,
                width: matrix.width,
                height: matrix.height,
            });
        }
        records.extend_from_slice(&model.detections);
        records
    }

    fn simulate_work(&self) {
        if let Some(delay) = self.inference_delay {
            thread::sleep(delay);
        }
    }

    fn inference_fault(&self) -> bool {
        if self.panic_on_inference {
            panic!("stub engine fault during inference");
        }
        self.fail_inference
    }
}

impl NativeRuntime for StubRuntime {
    fn engine_create_from_path(&self, path: &CStr, params: &EngineParams) -> Option<RawEngine> {
        let path = path.to_str().ok()?;
        match std::fs::read(path) {
            Ok(model) => self.engine_create_from_bytes(&model, params),
            Err(e) => {
                debug!("stub: cannot read model {}: {}", path, e);
                None
            }
        }
    }

    fn engine_create_from_bytes(&self, model: &[u8], params: &EngineParams) -> Option<RawEngine> {
        if params.width <= 0 || params.height <= 0 {
            return None;
        }
        if params.use_accelerator && self.accelerator_devices == 0 {
            debug!("stub: accelerator requested but no device is present");
            return None;
        }
        let model: StubModel = match serde_json::from_slice(model) {
            Ok(model) => model,
            Err(e) => {
                debug!("stub: rejecting model artifact: {}", e);
                return None;
            }
        };
        let ptr = boxed_into_raw(StubEngine { model }) as *mut c_void;
        self.track(Kind::Engine, ptr);
        bump(&self.counters.engines_created);
        RawEngine::from_raw(ptr)
    }

    fn engine_destroy(&self, engine: RawEngine) {
        if self.release(Kind::Engine, engine.addr()) {
            unsafe { free_boxed(engine.as_ptr() as *mut StubEngine) };
            bump(&self.counters.engines_destroyed);
        }
    }

    fn engine_infer(&self, engine: &RawEngine, matrix: &RawMatrix) -> Option<RawResults> {
        if !self.is_live(Kind::Engine, engine.addr()) || !self.is_live(Kind::Matrix, matrix.addr())
        {
            return None;
        }
        let _in_flight = InFlight::enter(&self.counters);
        if self.inference_fault() {
            return None;
        }
        self.simulate_work();
        let engine = unsafe { &*(engine.as_ptr() as *const StubEngine) };
        let matrix = unsafe { &*(matrix.as_ptr() as *const StubMatrix) };
        RawResults::from_raw(self.alloc_results(Self::records_for(&engine.model, matrix, 0)))
    }

    fn engine_infer_batch(
        &self,
        engine: &RawEngine,
        matrices: &[RawMatrix],
    ) -> Option<RawResultSets> {
        if !self.is_live(Kind::Engine, engine.addr()) {
            return None;
        }
        if matrices
            .iter()
            .any(|m| !self.is_live(Kind::Matrix, m.addr()))
        {
            return None;
        }
        let _in_flight = InFlight::enter(&self.counters);
        if self.inference_fault() {
            return None;
        }
        self.simulate_work();
        let engine = unsafe { &*(engine.as_ptr() as *const StubEngine) };

        let sets: StubResultSets = matrices
            .iter()
            .enumerate()
            .map(|(i, m)| {
                if self.missing_inner_result == Some(i) {
                    return std::ptr::null_mut();
                }
                let matrix = unsafe { &*(m.as_ptr() as *const StubMatrix) };
                self.alloc_results(Self::records_for(&engine.model, matrix, i))
            })
            .collect();

        let members: Vec<usize> = sets
            .iter()
            .filter(|p| !p.is_null())
            .map(|&p| p as usize)
            .collect();
        let ptr = boxed_into_raw(sets) as *mut c_void;
        self.track(Kind::ResultSets, ptr);
        self.set_members
            .lock()
            .extend(members.into_iter().map(|inner| (inner, ptr as usize)));
        bump(&self.counters.result_sets_created);
        RawResultSets::from_raw(ptr)
    }

    fn result_count(&self, results: &RawResults) -> usize {
        if !self.is_live(Kind::Results, results.addr()) {
            return 0;
        }
        unsafe { &*(results.as_ptr() as *const StubResults) }.len()
    }

    fn result_at(&self, results: &RawResults, index: usize) -> DetectionRecord {
        if !self.is_live(Kind::Results, results.addr()) {
            return DetectionRecord::default();
        }
        let records = unsafe { &*(results.as_ptr() as *const StubResults) };
        match records.get(index) {
            Some(record) => *record,
            None => {
                bump(&self.counters.invalid_accesses);
                DetectionRecord::default()
            }
        }
    }

    fn result_destroy(&self, results: RawResults) {
        if self.release(Kind::Results, results.addr()) {
            self.set_members.lock().remove(&results.addr());
            unsafe { free_boxed(results.as_ptr() as *mut StubResults) };
            bump(&self.counters.results_destroyed);
        }
    }

    fn result_sets_count(&self, sets: &RawResultSets) -> usize {
        if !self.is_live(Kind::ResultSets, sets.addr()) {
            return 0;
        }
        unsafe { &*(sets.as_ptr() as *const StubResultSets) }.len()
    }

    fn result_sets_at(&self, sets: &RawResultSets, index: usize) -> Option<RawResults> {
        if !self.is_live(Kind::ResultSets, sets.addr()) {
            return None;
        }
        let sets = unsafe { &*(sets.as_ptr() as *const StubResultSets) };
        sets.get(index).and_then(|&ptr| RawResults::from_raw(ptr))
    }

    fn result_sets_destroy(&self, sets: RawResultSets) {
        // Inner collections are owned by whoever fetched them, but they must
        // all be gone before their outer collection is.
        if self.release(Kind::ResultSets, sets.addr()) {
            let outer = sets.addr();
            let mut members = self.set_members.lock();
            let before = members.len();
            members.retain(|_, owner| *owner != outer);
            let still_live = before - members.len();
            drop(members);
            if still_live > 0 {
                self.counters
                    .premature_outer_frees
                    .fetch_add(still_live, Ordering::SeqCst);
                warn!(
                    "stub: outer result collection {:#x} destroyed before {} inner collections",
                    outer, still_live
                );
            }
            unsafe { free_boxed(sets.as_ptr() as *mut StubResultSets) };
            bump(&self.counters.result_sets_destroyed);
        }
    }

    fn matrix_create(
        &self,
        bytes: &[u8],
        width: i32,
        height: i32,
        channels: i32,
    ) -> Option<RawMatrix> {
        if width <= 0 || height <= 0 || !(1..=4).contains(&channels) {
            return None;
        }
        let len = width as usize * height as usize * channels as usize;
        let data = bytes.get(..len)?.to_vec();
        let ptr = boxed_into_raw(StubMatrix {
            data,
            width,
            height,
            channels,
        }) as *mut c_void;
        self.track(Kind::Matrix, ptr);
        bump(&self.counters.matrices_created);
        RawMatrix::from_raw(ptr)
    }

    fn matrix_read_back(&self, matrix: &RawMatrix) -> MatrixView {
        if !self.is_live(Kind::Matrix, matrix.addr()) {
            return MatrixView {
                data: std::ptr::null(),
                width: 0,
                height: 0,
                channels: 0,
                format_code: 0,
            };
        }
        let m = unsafe { &*(matrix.as_ptr() as *const StubMatrix) };
        MatrixView {
            data: m.data.as_ptr(),
            width: m.width,
            height: m.height,
            channels: m.channels,
            format_code: m.channels,
        }
    }

    fn matrix_destroy(&self, matrix: RawMatrix) {
        if self.release(Kind::Matrix, matrix.addr()) {
            unsafe { free_boxed(matrix.as_ptr() as *mut StubMatrix) };
            bump(&self.counters.matrices_destroyed);
        }
    }

    fn accelerator_available(&self) -> bool {
        self.accelerator_devices > 0
    }

    fn accelerator_extension_available(&self) -> bool {
        self.accelerator_devices > 0
    }

    fn accelerator_device_count(&self) -> usize {
        self.accelerator_devices
    }

    fn engine_version(&self) -> RawString {
        let (ptr, len) = vec_into_raw(self.version.as_bytes().to_vec());
        if !ptr.is_null() {
            self.track(Kind::String, ptr as *mut c_void);
            bump(&self.counters.strings_created);
        }
        RawString {
            ptr: ptr as *const c_char,
            len,
        }
    }

    fn string_destroy(&self, s: RawString) {
        if s.ptr.is_null() {
            return;
        }
        if self.release(Kind::String, s.ptr as usize) {
            unsafe { free_boxed_slice(s.ptr as *mut u8, s.len) };
            bump(&self.counters.strings_destroyed);
        }
    }
}

impl Drop for StubRuntime {
    fn drop(&mut self) {
        let live = self.live.get_mut();
        if !live.is_empty() {
            warn!("stub runtime dropped with {} live native handles", live.len());
        }
    }
}
