//! C ABI for linking wormhole-core as a static library from Android (NDK) or other C/C++ hosts.
//! Strings cross the boundary as NUL-terminated UTF-8; outputs are written into caller buffers.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

use crate::link::{parse_link, TransferCode};
use crate::progress::progress_fraction;

/// ABI version of this surface. Bumped on any signature change.
pub const FFI_VERSION: u8 = 1;

#[no_mangle]
pub extern "C" fn wormhole_core_version() -> u8 {
    FFI_VERSION
}

/// Resolve `text` into a code and optional rendezvous endpoint.
/// Returns 1 = resolved with rendezvous, 0 = resolved without (out_rendezvous set to ""),
/// -1 = no link, invalid UTF-8, null pointer or a buffer too small.
#[no_mangle]
pub extern "C" fn wormhole_parse_link(
    text: *const c_char,
    out_code: *mut c_char,
    out_code_len: usize,
    out_rendezvous: *mut c_char,
    out_rendezvous_len: usize,
) -> c_int {
    if out_code.is_null() || out_rendezvous.is_null() {
        return -1;
    }
    let Some(text) = (unsafe { read_str(text) }) else {
        return -1;
    };
    let Some(link) = parse_link(text) else {
        return -1;
    };
    let rendezvous = link.rendezvous.as_deref().unwrap_or("");
    unsafe {
        if write_str(link.code.as_str(), out_code, out_code_len).is_none()
            || write_str(rendezvous, out_rendezvous, out_rendezvous_len).is_none()
        {
            return -1;
        }
    }
    if link.rendezvous.is_some() {
        1
    } else {
        0
    }
}

/// Normalize a typed code into out_buf. Returns bytes written (excluding NUL), or -1 on error.
#[no_mangle]
pub extern "C" fn wormhole_normalize_code(
    input: *const c_char,
    out_buf: *mut c_char,
    out_buf_len: usize,
) -> c_int {
    if out_buf.is_null() {
        return -1;
    }
    let Some(input) = (unsafe { read_str(input) }) else {
        return -1;
    };
    let code = TransferCode::normalize(input);
    match unsafe { write_str(code.as_str(), out_buf, out_buf_len) } {
        Some(n) => n as c_int,
        None => -1,
    }
}

#[no_mangle]
pub extern "C" fn wormhole_progress_fraction(current: u64, total: u64) -> f32 {
    progress_fraction(current, total)
}

/// # Safety
/// `p` must be null or point to a NUL-terminated string that outlives the returned slice.
unsafe fn read_str<'a>(p: *const c_char) -> Option<&'a str> {
    if p.is_null() {
        return None;
    }
    CStr::from_ptr(p).to_str().ok()
}

/// Copy `s` plus a trailing NUL into `out`. `None` if it does not fit.
///
/// # Safety
/// `out` must be valid for `out_len` bytes.
unsafe fn write_str(s: &str, out: *mut c_char, out_len: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.len() >= out_len || bytes.len() > c_int::MAX as usize {
        return None;
    }
    out.copy_from_nonoverlapping(bytes.as_ptr() as *const c_char, bytes.len());
    *out.add(bytes.len()) = 0;
    Some(bytes.len())
}
