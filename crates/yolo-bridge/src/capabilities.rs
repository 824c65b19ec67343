//! Stateless runtime capability queries

use serde::Serialize;
use yolo_ffi_common::copy_native_str;

use crate::error::{InteropError, Result};
use crate::release::Released;
use crate::runtime::NativeRuntime;

pub fn accelerator_available<R: NativeRuntime>(runtime: &R) -> bool {
    runtime.accelerator_available()
}

pub fn accelerator_extension_available<R: NativeRuntime>(runtime: &R) -> bool {
    runtime.accelerator_extension_available()
}

pub fn accelerator_device_count<R: NativeRuntime>(runtime: &R) -> usize {
    runtime.accelerator_device_count()
}

/// Version of the native runtime.
///
/// The native buffer is copied into a `String` and released before
/// returning, whether or not the copy succeeded.
pub fn engine_version<R: NativeRuntime>(runtime: &R) -> Result<String> {
    let raw = Released::new(runtime, runtime.engine_version(), R::string_destroy);
    unsafe { copy_native_str(raw.ptr, raw.len) }.map_err(InteropError::NativeString)
}

/// Snapshot of every capability query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeInfo {
    pub accelerator_available: bool,
    pub accelerator_extension_available: bool,
    pub accelerator_device_count: usize,
    pub engine_version: String,
}

impl RuntimeInfo {
    pub fn query<R: NativeRuntime>(runtime: &R) -> Result<Self> {
        Ok(Self {
            accelerator_available: accelerator_available(runtime),
            accelerator_extension_available: accelerator_extension_available(runtime),
            accelerator_device_count: accelerator_device_count(runtime),
            engine_version: engine_version(runtime)?,
        })
    }
}
