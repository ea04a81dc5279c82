//! RAII handles that own the mutex in one mode.
//!
//! Each handle either owns [`UpgradeMutex`](crate::UpgradeMutex) in its mode
//! or is empty. Dropping a non-empty handle releases the mode; dropping an
//! empty one is a no-op. Handles are move-only, so the right to release a
//! mode exists exactly once.
//!
//! Cross-mode constructors consume a handle and produce one in another mode
//! through an atomic transition. The mutex is never observable as free in
//! between, so a third party cannot slip in:
//!
//! - [`ExclusiveGuard::from_upgrade`]: waits out current shared holders
//!   while turning new ones away, then takes exclusive mode.
//! - [`UpgradeGuard::from_exclusive`] and [`SharedGuard::from_exclusive`]:
//!   unconditional demotions, never block.
//!
//! There is no upgrade-from-shared constructor: a shared holder has no claim
//! to the single upgrade slot and could only get one by waiting in line like
//! everyone else.
//!
//! [`ScopedUpgrade`] covers the remaining shape: temporarily operating an
//! upgrade handle as exclusive and reverting on scope exit.
//!
//! # Example
//!
//! ```
//! use upsync::{ScopedUpgrade, UpgradeGuard, UpgradeMutex};
//!
//! let mutex = UpgradeMutex::new();
//!
//! let mut upgrade = UpgradeGuard::new(&mutex);
//! {
//!     let _scope = ScopedUpgrade::new(&mut upgrade);
//!     // exclusive here
//! }
//! // back to upgrade mode
//! assert!(upgrade.owns_lock());
//! ```

use crate::raw::UpgradeMutex;

/// Owns the mutex in shared mode.
#[must_use = "the mode is released immediately if the guard is not held"]
#[derive(Debug)]
pub struct SharedGuard<'a> {
    mutex: Option<&'a UpgradeMutex>,
}

impl<'a> SharedGuard<'a> {
    /// Acquires shared access, blocking while an exclusive holder is present
    /// or a promotion is draining.
    pub fn new(mutex: &'a UpgradeMutex) -> Self {
        mutex.lock_shared();
        Self { mutex: Some(mutex) }
    }

    /// Demotes an exclusive handle to a shared one.
    ///
    /// The transition is atomic: other readers become admissible at the same
    /// instant this handle's shared hold is installed. An empty input yields
    /// an empty handle.
    pub fn from_exclusive(mut exclusive: ExclusiveGuard<'a>) -> Self {
        match exclusive.mutex.take() {
            Some(mutex) => {
                mutex.exclusive_to_shared();
                Self { mutex: Some(mutex) }
            }
            None => Self { mutex: None },
        }
    }

    /// Returns true if this handle currently owns the mutex.
    #[must_use]
    pub fn owns_lock(&self) -> bool {
        self.mutex.is_some()
    }

    /// Gives up ownership without releasing the mode.
    ///
    /// Returns the mutex so the caller can unlock it manually; the handle is
    /// empty afterwards and drops as a no-op.
    pub fn release(&mut self) -> Option<&'a UpgradeMutex> {
        self.mutex.take()
    }

    /// Returns the mutex this handle refers to, if any.
    #[must_use]
    pub fn mutex(&self) -> Option<&'a UpgradeMutex> {
        self.mutex
    }
}

impl Drop for SharedGuard<'_> {
    fn drop(&mut self) {
        if let Some(mutex) = self.mutex.take() {
            mutex.unlock_shared();
        }
    }
}

/// Owns the mutex in upgrade mode.
///
/// At most one upgrade handle exists per mutex at a time. It coexists with
/// shared holders and is the only mode allowed to promote to exclusive.
#[must_use = "the mode is released immediately if the guard is not held"]
#[derive(Debug)]
pub struct UpgradeGuard<'a> {
    mutex: Option<&'a UpgradeMutex>,
}

impl<'a> UpgradeGuard<'a> {
    /// Acquires upgrade access, blocking while an exclusive or another
    /// upgrade holder is present.
    pub fn new(mutex: &'a UpgradeMutex) -> Self {
        mutex.lock_upgrade();
        Self { mutex: Some(mutex) }
    }

    /// Demotes an exclusive handle to an upgrade one.
    ///
    /// Never blocks. Readers parked behind the exclusive holder become
    /// admissible at the same instant. An empty input yields an empty handle.
    pub fn from_exclusive(mut exclusive: ExclusiveGuard<'a>) -> Self {
        match exclusive.mutex.take() {
            Some(mutex) => {
                mutex.exclusive_to_upgrade();
                Self { mutex: Some(mutex) }
            }
            None => Self { mutex: None },
        }
    }

    /// Returns true if this handle currently owns the mutex.
    #[must_use]
    pub fn owns_lock(&self) -> bool {
        self.mutex.is_some()
    }

    /// Gives up ownership without releasing the mode.
    pub fn release(&mut self) -> Option<&'a UpgradeMutex> {
        self.mutex.take()
    }

    /// Returns the mutex this handle refers to, if any.
    #[must_use]
    pub fn mutex(&self) -> Option<&'a UpgradeMutex> {
        self.mutex
    }
}

impl Drop for UpgradeGuard<'_> {
    fn drop(&mut self) {
        if let Some(mutex) = self.mutex.take() {
            mutex.unlock_upgrade();
        }
    }
}

/// Owns the mutex in exclusive mode.
#[must_use = "the mode is released immediately if the guard is not held"]
#[derive(Debug)]
pub struct ExclusiveGuard<'a> {
    mutex: Option<&'a UpgradeMutex>,
}

impl<'a> ExclusiveGuard<'a> {
    /// Acquires exclusive access, blocking until no holder of any mode
    /// remains.
    pub fn new(mutex: &'a UpgradeMutex) -> Self {
        mutex.lock_exclusive();
        Self { mutex: Some(mutex) }
    }

    /// Promotes an upgrade handle to an exclusive one.
    ///
    /// Blocks until current shared holders drain; new shared acquisitions
    /// are turned away meanwhile. The upgrade mode is held throughout, so no
    /// other thread can take the mutex during the transition. An empty input
    /// yields an empty handle.
    pub fn from_upgrade(mut upgrade: UpgradeGuard<'a>) -> Self {
        match upgrade.mutex.take() {
            Some(mutex) => {
                mutex.upgrade_to_exclusive();
                Self { mutex: Some(mutex) }
            }
            None => Self { mutex: None },
        }
    }

    /// Returns true if this handle currently owns the mutex.
    #[must_use]
    pub fn owns_lock(&self) -> bool {
        self.mutex.is_some()
    }

    /// Gives up ownership without releasing the mode.
    pub fn release(&mut self) -> Option<&'a UpgradeMutex> {
        self.mutex.take()
    }

    /// Returns the mutex this handle refers to, if any.
    #[must_use]
    pub fn mutex(&self) -> Option<&'a UpgradeMutex> {
        self.mutex
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        if let Some(mutex) = self.mutex.take() {
            mutex.unlock_exclusive();
        }
    }
}

/// Temporarily operates an [`UpgradeGuard`] as exclusive.
///
/// Construction promotes the borrowed handle's mode to exclusive; drop
/// demotes it back to upgrade. The mutable borrow keeps the upgrade handle
/// alive and untouched for the whole scope, so the promotion can never
/// outlive or race the handle it rides on.
#[must_use = "the promotion is reverted immediately if the scope is not held"]
#[derive(Debug)]
pub struct ScopedUpgrade<'a, 'guard> {
    guard: &'guard mut UpgradeGuard<'a>,
}

impl<'a, 'guard> ScopedUpgrade<'a, 'guard> {
    /// Promotes the handle's mode to exclusive for this value's lifetime.
    ///
    /// Blocks until current shared holders drain. If the handle is empty,
    /// both the promotion and the later demotion are no-ops.
    pub fn new(guard: &'guard mut UpgradeGuard<'a>) -> Self {
        if let Some(mutex) = guard.mutex {
            mutex.upgrade_to_exclusive();
        }
        Self { guard }
    }

    /// Returns true if the underlying handle owns the mutex (now in
    /// exclusive mode).
    #[must_use]
    pub fn owns_lock(&self) -> bool {
        self.guard.mutex.is_some()
    }
}

impl Drop for ScopedUpgrade<'_, '_> {
    fn drop(&mut self) {
        if let Some(mutex) = self.guard.mutex {
            mutex.exclusive_to_upgrade();
        }
    }
}
