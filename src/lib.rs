//! Upgradable reader/writer mutex for parallel OS threads.
//!
//! `upsync` provides a mutex with three access modes that compose into a
//! small state machine, together with RAII handles that make the mode
//! transitions atomic:
//!
//! | Mode      | Holders | Coexists with        | Intent                    |
//! |-----------|---------|----------------------|---------------------------|
//! | shared    | many    | shared, upgrade      | read                      |
//! | upgrade   | one     | shared               | read now, maybe write     |
//! | exclusive | one     | nothing              | write                     |
//!
//! The upgrade mode is what separates this from a plain `RwLock`: a holder
//! can promote itself to exclusive without releasing, so the state it
//! observed while reading is still valid when it starts writing. The
//! classic check-then-act race (`read`, release, reacquire for write,
//! discover the world changed) cannot happen.
//!
//! # Layers
//!
//! - [`UpgradeMutex`] ([`raw`]): the data-less state machine with paired
//!   `lock_*`/`unlock_*` entry points per mode.
//! - [`SharedGuard`] / [`UpgradeGuard`] / [`ExclusiveGuard`] /
//!   [`ScopedUpgrade`] ([`guard`]): move-only handles that own a mode and
//!   release on drop; cross-mode constructors perform the transitions.
//! - [`UpgradeRwLock<T>`] ([`rwlock`]): the typed wrapper guarding a value,
//!   the interface most callers want.
//!
//! # Example
//!
//! ```
//! use upsync::{UpgradeReadGuard, UpgradeRwLock};
//!
//! let cache = UpgradeRwLock::new(Vec::<u32>::new());
//!
//! // Cheap check under upgrade mode, readers keep flowing.
//! let guard = cache.upgrade();
//! if guard.is_empty() {
//!     // Promote only if there is something to do.
//!     let mut cache = UpgradeReadGuard::into_write(guard);
//!     cache.push(1);
//! }
//! assert_eq!(cache.read().len(), 1);
//! ```
//!
//! # Guarantees and limits
//!
//! - Mutual exclusion and happens-before: releasing any mode synchronizes
//!   with the next acquisition of any mode on the same lock.
//! - Readers are preferred; a writer can starve under sustained reader
//!   overlap. A draining promotion turns new readers away until it
//!   completes.
//! - No FIFO order among waiters, no recursion, no try/timed variants, no
//!   cancellation, no cross-process use.
//!
//! # Features
//!
//! - `lock-metrics`: per-mode contention counters on every lock path, read
//!   through [`UpgradeMutex::snapshot`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod guard;
pub mod metrics;
pub mod raw;
pub mod rwlock;
pub mod test_logging;

pub use guard::{ExclusiveGuard, ScopedUpgrade, SharedGuard, UpgradeGuard};
pub use metrics::{LockMetricsSnapshot, ModeCounters};
pub use raw::UpgradeMutex;
pub use rwlock::{ReadGuard, ScopedWrite, UpgradeReadGuard, UpgradeRwLock, WriteGuard};
