//! # ramcompat-core
//!
//! Safe Rust core of the ramcompat allocation shim.
//!
//! Every malloc-family call is routed to one of two backends using only the
//! pointer itself: a size-class limited primary pool is tried first, and a
//! general purpose supplemental allocator serves whatever the pool refuses
//! (`RangeFail`) or does not own (`NotFound`). Allocations may carry one
//! lazily computed opaque tag each, regardless of which backend produced them.
//!
//! The [`Compat`] context object bundles the bootstrap state, the router and
//! the tag table; it is built once and shared by reference.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod compat;
pub mod config;
pub mod fail;
pub mod log;
pub mod metrics;
pub mod platform;
pub mod primary;
pub mod reply;
pub mod router;
pub mod supplemental;
pub mod tag;

pub use compat::Compat;
pub use fail::{FailReport, FirstError, Reporter, fatal, set_reporter};
pub use platform::{PageGeometry, Platform};
pub use primary::PrimaryAllocator;
pub use primary::slab::SlabPool;
pub use reply::{Reply, ReplyCode};
pub use router::Router;
pub use supplemental::{SupplementalAllocator, SupplementalFns};
pub use tag::{Tag, TagTable};
