//! Conversions and RAII wrappers shared by the Win32 backend

use crate::WindowHandle;
use std::ffi::c_void;
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND};

/// RAII wrapper for a kernel HANDLE that closes it on drop
pub(crate) struct HandleGuard(pub(crate) HANDLE);

impl Drop for HandleGuard {
    fn drop(&mut self) {
        unsafe {
            if !self.0.is_invalid() {
                let _ = CloseHandle(self.0);
            }
        }
    }
}

pub(crate) fn to_hwnd(handle: WindowHandle) -> HWND {
    HWND(handle.0 as *mut c_void)
}

pub(crate) fn from_hwnd(hwnd: HWND) -> WindowHandle {
    WindowHandle(hwnd.0 as isize)
}

/// Decodes the first `len` UTF-16 units of a buffer filled by the OS.
pub(crate) fn wide_to_string(buffer: &[u16], len: i32) -> String {
    let len = (len.max(0) as usize).min(buffer.len());
    String::from_utf16_lossy(&buffer[..len])
}

/// NUL-terminated UTF-16 copy of `value`.
pub(crate) fn to_wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}
