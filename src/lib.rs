//! mirrorlock: process-level locking for per-repository Git mirrors.
//!
//! Two tiers of locks coordinate the processes that update a mirror:
//!
//! - [`remote`]: locks kept in a shared key/value service, visible to every
//!   server. A per-repository [`remote::RemoteOwnerGroupLock`] can be owned by
//!   a group of cooperating processes and handed off to a successor without a
//!   gap; [`remote::SimpleSharedLock`] guards one globally shared resource.
//! - [`local`]: a reader/writer lock per repository made of marker files
//!   under a lock root, guarded by an advisory file lock.
//!
//! Both tiers poll (see [`wait`]) and sweep locks left behind by dead
//! processes. Contention surfaces as [`error::LockError::Busy`]; broken lock
//! state as [`error::LockError::Corrupt`].

pub mod config;
pub mod error;
pub mod exit_codes;
pub mod fs;
pub mod local;
pub mod process;
pub mod remote;
pub mod status;
pub mod store;
pub mod wait;

#[cfg(test)]
pub(crate) mod test_support;
