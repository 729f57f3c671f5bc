//! Filesystem utilities for mirrorlock.
//!
//! Atomic writes for stored values and the advisory file lock that guards
//! every multi-step mutation of on-disk lock state.

pub mod atomic;
pub mod flock;

pub use atomic::{atomic_write, atomic_write_file};
pub use flock::ExclusiveFile;
