//! `ramcompat_tag`: lazily attach an opaque value to an allocation.

use std::ffi::{c_int, c_void};
use std::ptr;

use ramcompat_core::ReplyCode;
use ramcompat_core::reply::reply_to_code;

use crate::state::{TagValue, enter_allocator_reentry_guard, outside_reentry_guard, shim};

/// Tag factory: store the value for `len` bytes at `bytes` into `*out` and
/// return 0, or return a nonzero reply code. Unknown codes are read as
/// `Insane`.
pub type TagFactoryFn = unsafe extern "C" fn(
    out: *mut *mut c_void,
    bytes: *const c_void,
    len: usize,
    ctx: *mut c_void,
) -> c_int;

/// Look up the tag of `ptr`, creating it with `factory(.., ctx)` on first use.
///
/// Returns 0 and stores the value in `*out`, or returns a reply code and
/// leaves `*out` untouched. The factory runs at most once per successful
/// tag; a failing factory leaves no tag and may be retried.
///
/// # Safety
/// `out` must be writable; `ptr` must be a live pointer returned by this
/// library; `factory` must be safe to call with `ctx`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ramcompat_tag(
    out: *mut *mut c_void,
    ptr: *mut c_void,
    factory: Option<TagFactoryFn>,
    ctx: *mut c_void,
) -> c_int {
    let Some(shim) = shim() else {
        return ReplyCode::Inconsistent.code();
    };
    let (Some(factory), false) = (factory, out.is_null()) else {
        return ReplyCode::Disallowed.code();
    };
    let guard = enter_allocator_reentry_guard();
    let entered = guard.is_some();
    let make = |bytes: std::ptr::NonNull<u8>, len: usize| {
        let call = || {
            let mut value = ptr::null_mut();
            // SAFETY: `bytes` is live for `len` bytes; `ctx` is the caller's.
            let rc = unsafe { factory(&mut value, bytes.as_ptr().cast(), len, ctx) };
            (rc, value)
        };
        // The factory runs with no shim lock held, so its own malloc-family
        // calls take the full path and keep the tag table in step.
        let (rc, value) = if entered {
            outside_reentry_guard(call)
        } else {
            call()
        };
        match rc {
            0 => Ok(TagValue(value)),
            rc => Err(ReplyCode::from_code(rc).unwrap_or(ReplyCode::Insane)),
        }
    };
    // SAFETY: forwarded caller contract.
    let result = unsafe { shim.get_or_create_tag(ptr.cast(), make) };
    drop(guard);
    if let Ok(TagValue(value)) = result {
        // SAFETY: `out` is non-null and writable per the contract.
        unsafe { *out = value };
    }
    reply_to_code(&result)
}
