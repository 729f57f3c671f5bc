//! Per-repository reader/writer lock on the local filesystem.
//!
//! Many readers or one writer group may use a repository at a time. State
//! lives in marker files under `{lock_root}/locks/{repo}/`:
//!
//! - `lock`: the guard file. Every read-modify-write of the markers happens
//!   while holding an exclusive advisory lock on it; its content is the PID
//!   of the last holder.
//! - `write`: the write marker, a newline-separated set of owner PIDs. Its
//!   presence stops new readers.
//! - `<pid>`: one read marker per reading process (content `1`).
//!
//! # Writers
//!
//! A writer first claims the write marker, then waits for the existing
//! readers to drain. With `upgrade` one reader (normally the writer itself)
//! may remain. With `append` a writer joins an existing marker instead of
//! waiting, so a foreground process and the background process it spawns
//! can share it.
//!
//! # Stale markers
//!
//! Markers of processes that died are swept by whoever is waiting on them,
//! once per wait episode. A process is only considered dead when the
//! zero-signal probe says so; anything else keeps the marker.
//!
//! # RAII Guards
//!
//! [`LocalRepoLocks::read_lock`] and [`LocalRepoLocks::write_lock`] return
//! guards that remove their marker when dropped. Failures during drop are
//! logged and never panic.

mod guard;
mod markers;
mod operations;


// Re-export public API
pub use guard::{ReadLockGuard, WriteLockGuard};
pub use markers::RepoMarkers;
pub use operations::{LocalRepoLocks, WriteOptions};
