//! Common helpers for crossing the native detection-engine C boundary.
//!
//! Both sides of the boundary use these: `yolo-bridge` calls them when it consumes the
//! native engine, and in-process runtimes call them when they hand memory out as
//! opaque handles.
//!
//! # Memory Ownership
//!
//! - Pointers produced by `boxed_into_raw` / `vec_into_raw` are owned by whoever
//!   receives them and must be returned through the matching `free_*` function
//! - Native strings are copied into Rust-owned `String`s; the native buffer is
//!   never retained
//! - NULL pointers are handled safely (no-op for free functions)

use std::ffi::CString;
use std::os::raw::c_char;
use std::path::Path;
use std::ptr;
use std::slice;

/// Convert a filesystem path into a NUL-terminated C string.
///
/// On Unix the raw path bytes are used as-is; elsewhere the path must be
/// valid UTF-8.
///
/// # Returns
/// `Err` if the path contains an interior NUL byte or cannot be represented.
pub fn cstring_from_path(path: &Path) -> Result<CString, &'static str> {
    #[cfg(unix)]
    let bytes = {
        use std::os::unix::ffi::OsStrExt;
        path.as_os_str().as_bytes().to_vec()
    };
    #[cfg(not(unix))]
    let bytes = path
        .to_str()
        .ok_or("path is not valid UTF-8")?
        .as_bytes()
        .to_vec();

    CString::new(bytes).map_err(|_| "path contains an interior NUL byte")
}

/// Copy a length-delimited native string into an owned Rust `String`.
///
/// The native buffer is not required to be NUL-terminated. A NULL pointer
/// with zero length is the empty string.
///
/// # Safety
/// `ptr` must point to at least `len` readable bytes, or be NULL.
pub unsafe fn copy_native_str(ptr: *const c_char, len: usize) -> Result<String, &'static str> {
    if ptr.is_null() {
        return if len == 0 {
            Ok(String::new())
        } else {
            Err("null pointer")
        };
    }
    let bytes = unsafe { slice::from_raw_parts(ptr as *const u8, len) };
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| "invalid UTF-8")
}

/// Borrow a native byte buffer as a slice.
///
/// Returns `None` for a NULL pointer with a non-zero length.
///
/// # Safety
/// `ptr` must point to at least `len` readable bytes that stay valid and
/// unmodified for `'a`.
#[inline]
pub unsafe fn native_bytes<'a>(ptr: *const u8, len: usize) -> Option<&'a [u8]> {
    if len == 0 {
        return Some(&[]);
    }
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { slice::from_raw_parts(ptr, len) })
}

/// Move a value to the heap and hand out the raw pointer.
///
/// The pointer must eventually be released with `free_boxed`.
#[inline]
pub fn boxed_into_raw<T>(value: T) -> *mut T {
    Box::into_raw(Box::new(value))
}

/// Safely free a boxed value.
///
/// Does nothing if the pointer is null.
///
/// # Safety
/// The pointer must have been allocated by `Box::into_raw()` or be null.
#[inline]
pub unsafe fn free_boxed<T>(ptr: *mut T) {
    if !ptr.is_null() {
        unsafe {
            let _ = Box::from_raw(ptr);
        }
    }
}

/// Free a boxed slice and its contents.
///
/// Does nothing if the pointer is null or length is zero.
///
/// # Safety
/// The pointer must have been allocated by `Box::into_raw(slice.into_boxed_slice())`.
#[inline]
pub unsafe fn free_boxed_slice<T>(ptr: *mut T, len: usize) {
    if !ptr.is_null() && len > 0 {
        unsafe {
            let _ = Box::from_raw(ptr::slice_from_raw_parts_mut(ptr, len));
        }
    }
}

/// Convert a vector to a raw pointer and length.
///
/// Returns null pointer and 0 length for empty vectors.
/// The returned pointer is owned by the caller.
#[inline]
pub fn vec_into_raw<T>(vec: Vec<T>) -> (*mut T, usize) {
    let len = vec.len();
    if len == 0 {
        (ptr::null_mut(), 0)
    } else {
        (Box::into_raw(vec.into_boxed_slice()) as *mut T, len)
    }
}

/// Define an opaque, non-null handle to a native object.
///
/// The generated type is `#[repr(transparent)]` over `NonNull<c_void>`, so a
/// slice of handles has the layout of a C array of pointers. It is neither
/// `Clone` nor `Copy`: whoever holds the value owns the native object.
///
/// # Example
/// ```
/// yolo_ffi_common::define_opaque_handle! {
///     /// Handle to a native widget.
///     pub struct RawWidget;
/// }
///
/// assert!(RawWidget::from_raw(std::ptr::null_mut()).is_none());
/// ```
#[macro_export]
macro_rules! define_opaque_handle {
    ($(#[$meta:meta])* $vis:vis struct $name:ident;) => {
        $(#[$meta])*
        #[derive(Debug, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        $vis struct $name(::std::ptr::NonNull<::std::os::raw::c_void>);

        impl $name {
            /// Wrap a pointer returned by the native side; `None` for NULL.
            #[inline]
            pub fn from_raw(ptr: *mut ::std::os::raw::c_void) -> ::std::option::Option<Self> {
                ::std::ptr::NonNull::new(ptr).map(Self)
            }

            /// The pointer value, for passing back across the boundary.
            #[inline]
            pub fn as_ptr(&self) -> *mut ::std::os::raw::c_void {
                self.0.as_ptr()
            }

            /// Numeric address, used as a stable key for bookkeeping.
            #[inline]
            pub fn addr(&self) -> usize {
                self.0.as_ptr() as usize
            }
        }

        // The handle is an opaque token; thread affinity is the native side's contract.
        unsafe impl ::std::marker::Send for $name {}
        unsafe impl ::std::marker::Sync for $name {}
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::raw::c_void;

    define_opaque_handle! {
        /// Test handle.
        struct RawThing;
    }

    #[test]
    fn test_handle_rejects_null() {
        assert!(RawThing::from_raw(ptr::null_mut()).is_none());
    }

    #[test]
    fn test_handle_has_pointer_layout() {
        assert_eq!(
            std::mem::size_of::<RawThing>(),
            std::mem::size_of::<*mut c_void>()
        );
        assert_eq!(
            std::mem::size_of::<Option<RawThing>>(),
            std::mem::size_of::<*mut c_void>()
        );
    }

    #[test]
    fn test_handle_round_trips_pointer() {
        let raw = boxed_into_raw(7u32) as *mut c_void;
        let handle = RawThing::from_raw(raw).unwrap();
        assert_eq!(handle.as_ptr(), raw);
        assert_eq!(handle.addr(), raw as usize);
        unsafe { free_boxed(handle.as_ptr() as *mut u32) };
    }

    #[test]
    fn test_copy_native_str_without_terminator() {
        let bytes = b"2.1.0garbage";
        let s = unsafe { copy_native_str(bytes.as_ptr() as *const c_char, 5) }.unwrap();
        assert_eq!(s, "2.1.0");
    }

    #[test]
    fn test_copy_native_str_null() {
        assert_eq!(unsafe { copy_native_str(ptr::null(), 0) }.unwrap(), "");
        assert_eq!(
            unsafe { copy_native_str(ptr::null(), 3) }.unwrap_err(),
            "null pointer"
        );
    }

    #[test]
    fn test_copy_native_str_invalid_utf8() {
        let bytes = [0xffu8, 0xfe];
        let result = unsafe { copy_native_str(bytes.as_ptr() as *const c_char, bytes.len()) };
        assert_eq!(result.unwrap_err(), "invalid UTF-8");
    }

    #[test]
    fn test_cstring_from_path() {
        let c = cstring_from_path(Path::new("/models/yolov5s.torchscript")).unwrap();
        assert_eq!(c.to_str().unwrap(), "/models/yolov5s.torchscript");
    }

    #[test]
    fn test_native_bytes() {
        let data = [1u8, 2, 3];
        assert_eq!(unsafe { native_bytes(data.as_ptr(), 3) }, Some(&data[..]));
        assert_eq!(unsafe { native_bytes(ptr::null(), 0) }, Some(&[][..]));
        assert_eq!(unsafe { native_bytes(ptr::null(), 4) }, None);
    }

    #[test]
    fn test_free_boxed_null_is_safe() {
        unsafe { free_boxed::<i32>(ptr::null_mut()) };
    }

    #[test]
    fn test_vec_into_raw_empty() {
        let (ptr, len): (*mut i32, usize) = vec_into_raw(Vec::new());
        assert!(ptr.is_null());
        assert_eq!(len, 0);
    }

    #[test]
    fn test_vec_into_raw_non_empty() {
        let (ptr, len) = vec_into_raw(vec![1i32, 2, 3]);
        assert!(!ptr.is_null());
        assert_eq!(len, 3);
        unsafe { free_boxed_slice(ptr, len) };
    }
}
