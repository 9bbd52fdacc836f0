//! # ramcompat-abi
//!
//! C boundary of the ramcompat allocation shim.
//!
//! The process-wide shim is built by `ramcompat_initialize` and never torn
//! down. Until then the malloc-family entry points delegate to the native
//! allocator. Failed allocations return null and set `errno` to the numeric
//! reply code; `ramcompat_msize` and `ramcompat_tag` return the code.
//!
//! With the `override` feature the library also exports `malloc`, `free`,
//! `calloc` and `realloc`, making the shim the process allocator when loaded
//! with `LD_PRELOAD`.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod bootstrap_abi;
pub mod errno;
pub mod malloc_abi;
#[cfg(all(feature = "override", not(test)))]
pub mod override_abi;
pub mod state;
pub mod tag_abi;
