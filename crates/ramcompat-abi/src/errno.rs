//! Process-visible error indicator.
//!
//! Failures at the C boundary store the numeric reply code in the calling
//! thread's libc `errno`.

use std::ffi::c_int;

use ramcompat_core::ReplyCode;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd"
)))]
compile_error!("ramcompat-abi has no errno accessor for this target");

#[inline]
fn errno_slot() -> *mut c_int {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        // SAFETY: returns the calling thread's errno storage.
        unsafe { libc::__errno_location() }
    }
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    {
        // SAFETY: returns the calling thread's errno storage.
        unsafe { libc::__error() }
    }
}

/// Store `value` in errno.
#[inline]
pub fn set_errno(value: c_int) {
    // SAFETY: the slot is valid, thread-local and writable.
    unsafe { *errno_slot() = value };
}

#[inline]
#[must_use]
pub fn get_errno() -> c_int {
    // SAFETY: the slot is valid and thread-local.
    unsafe { *errno_slot() }
}

/// Surface `code` through errno.
#[inline]
pub fn set_reply(code: ReplyCode) {
    set_errno(code.code());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_lands_in_errno() {
        set_reply(ReplyCode::ResourceFail);
        assert_eq!(get_errno(), 8);
        set_errno(0);
        assert_eq!(get_errno(), 0);
    }
}
