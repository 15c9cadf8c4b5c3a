//! Indirection over `std::sync::atomic` vs `loom::sync::atomic`.
//!
//! Every hot-path CAS loop in this crate goes through these re-exports
//! instead of `std::sync::atomic` directly, so the same code can run under
//! `loom`'s exhaustive interleaving checker (`cargo test --cfg loom`) without
//! a second, parallel lock-free implementation to keep in sync.

#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
