//! Scope guard for one native handle

use std::mem::ManuallyDrop;
use std::ops::Deref;

use crate::runtime::NativeRuntime;

/// Owns a native handle and hands it to its destroy call on drop,
/// including while unwinding.
pub(crate) struct Released<'r, R: NativeRuntime, H> {
    runtime: &'r R,
    handle: ManuallyDrop<H>,
    destroy: fn(&R, H),
}

impl<'r, R: NativeRuntime, H> Released<'r, R, H> {
    pub(crate) fn new(runtime: &'r R, handle: H, destroy: fn(&R, H)) -> Self {
        Self {
            runtime,
            handle: ManuallyDrop::new(handle),
            destroy,
        }
    }

    pub(crate) fn runtime(&self) -> &'r R {
        self.runtime
    }
}

impl<R: NativeRuntime, H> Deref for Released<'_, R, H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.handle
    }
}

impl<R: NativeRuntime, H> Drop for Released<'_, R, H> {
    fn drop(&mut self) {
        // SAFETY: `handle` is not touched again after this point.
        let handle = unsafe { ManuallyDrop::take(&mut self.handle) };
        (self.destroy)(self.runtime, handle);
    }
}
