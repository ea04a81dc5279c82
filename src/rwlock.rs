//! Typed lock that guards a value with shared, upgrade, and exclusive modes.
//!
//! [`UpgradeRwLock<T>`] pairs the raw mode machine with the value it
//! protects, so access rights and data access cannot drift apart:
//!
//! - [`read`](UpgradeRwLock::read): any number of concurrent holders, `&T`.
//! - [`upgrade`](UpgradeRwLock::upgrade): a single holder that coexists with
//!   readers, `&T` only; writing requires promoting first.
//! - [`write`](UpgradeRwLock::write): a single holder, `&mut T`.
//!
//! The upgrade mode is the interesting one: check a condition under shared
//! access that stays consistent (no writer can sneak in past the single
//! upgrade slot), and only pay for exclusivity if the check says so.
//!
//! # Example
//!
//! ```
//! use upsync::{UpgradeReadGuard, UpgradeRwLock};
//!
//! let balance = UpgradeRwLock::new(100_i64);
//!
//! let audit = balance.upgrade();
//! if *audit >= 40 {
//!     let mut funds = UpgradeReadGuard::into_write(audit);
//!     *funds -= 40;
//! }
//! assert_eq!(*balance.read(), 60);
//! ```
//!
//! # When to use which guard
//!
//! | Pattern                         | Guard                                |
//! |---------------------------------|--------------------------------------|
//! | Plain read                      | [`ReadGuard`]                        |
//! | Plain write                     | [`WriteGuard`]                       |
//! | Read, maybe write               | [`UpgradeReadGuard`] + promotion     |
//! | Write briefly inside a long read| [`UpgradeReadGuard`] + [`ScopedWrite`] |

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

use crate::raw::UpgradeMutex;

/// A reader/writer/upgrader lock protecting a value of type `T`.
pub struct UpgradeRwLock<T> {
    raw: UpgradeMutex,
    data: UnsafeCell<T>,
}

// Safety: the mode machine guarantees a writer is alone and readers only
// ever alias immutably, so the lock adds the same sharing power as RwLock.
unsafe impl<T: Send> Send for UpgradeRwLock<T> {}
unsafe impl<T: Send + Sync> Sync for UpgradeRwLock<T> {}

impl<T> UpgradeRwLock<T> {
    /// Creates an unlocked lock containing the given value.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            raw: UpgradeMutex::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Consumes the lock and returns the inner value.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Returns a mutable reference to the inner value.
    ///
    /// No locking is needed: the exclusive borrow proves no guard exists.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Acquires shared access, blocking while a writer is present or a
    /// promotion is draining.
    pub fn read(&self) -> ReadGuard<'_, T> {
        self.raw.lock_shared();
        ReadGuard { lock: self }
    }

    /// Acquires upgrade access, blocking while a writer or another upgrade
    /// holder is present. Coexists with readers.
    pub fn upgrade(&self) -> UpgradeReadGuard<'_, T> {
        self.raw.lock_upgrade();
        UpgradeReadGuard { lock: self }
    }

    /// Acquires exclusive access, blocking until no holder of any mode
    /// remains.
    pub fn write(&self) -> WriteGuard<'_, T> {
        self.raw.lock_exclusive();
        WriteGuard { lock: self }
    }

    /// Returns the raw mode machine backing this lock.
    ///
    /// Useful for reading contention metrics; acquiring modes through the
    /// raw handle while typed guards exist is the caller's responsibility.
    #[must_use]
    pub fn raw(&self) -> &UpgradeMutex {
        &self.raw
    }
}

impl<T: Default> Default for UpgradeRwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for UpgradeRwLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeRwLock")
            .field("raw", &self.raw)
            .finish_non_exhaustive()
    }
}

impl<T> From<T> for UpgradeRwLock<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

/// Shared access to the value.
#[must_use = "the lock is released immediately if the guard is not held"]
pub struct ReadGuard<'a, T> {
    lock: &'a UpgradeRwLock<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: shared mode is held; only readers and at most one
        // non-writing upgrade holder alias the value.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.raw.unlock_shared();
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ReadGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ReadGuard").field(&&**self).finish()
    }
}

/// Upgrade access to the value: shared reads now, the option to promote to
/// a write later without ever releasing the lock.
#[must_use = "the lock is released immediately if the guard is not held"]
pub struct UpgradeReadGuard<'a, T> {
    lock: &'a UpgradeRwLock<T>,
}

impl<'a, T> UpgradeReadGuard<'a, T> {
    /// Promotes this guard to a write guard.
    ///
    /// Blocks until current readers drain; new readers are turned away
    /// meanwhile. No other thread can acquire the lock in between, so state
    /// observed through this guard is still valid through the returned one.
    ///
    /// An associated function, so it does not shadow a `T::into_write`.
    pub fn into_write(this: Self) -> WriteGuard<'a, T> {
        let lock = this.lock;
        std::mem::forget(this);
        lock.raw.upgrade_to_exclusive();
        WriteGuard { lock }
    }

    /// Promotes to write access for a nested scope, demoting back when the
    /// returned guard drops.
    ///
    /// The mutable borrow parks this guard for the scope's duration; it
    /// remains the owner of the upgrade mode throughout.
    pub fn scoped_write<'guard>(&'guard mut self) -> ScopedWrite<'guard, 'a, T> {
        self.lock.raw.upgrade_to_exclusive();
        ScopedWrite { guard: self }
    }
}

impl<T> Deref for UpgradeReadGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: upgrade mode is held and permits no writer; readers may
        // alias concurrently, so only shared access is handed out.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for UpgradeReadGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.raw.unlock_upgrade();
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for UpgradeReadGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("UpgradeReadGuard").field(&&**self).finish()
    }
}

/// Exclusive access to the value.
#[must_use = "the lock is released immediately if the guard is not held"]
pub struct WriteGuard<'a, T> {
    lock: &'a UpgradeRwLock<T>,
}

impl<'a, T> WriteGuard<'a, T> {
    /// Demotes this guard to an upgrade guard without releasing the lock.
    ///
    /// Never blocks. Values written through this guard are visible to every
    /// holder admitted after the demotion.
    pub fn into_upgrade(this: Self) -> UpgradeReadGuard<'a, T> {
        let lock = this.lock;
        std::mem::forget(this);
        lock.raw.exclusive_to_upgrade();
        UpgradeReadGuard { lock }
    }

    /// Demotes this guard to a read guard without releasing the lock.
    ///
    /// Never blocks. Other readers become admissible at the same instant.
    pub fn into_read(this: Self) -> ReadGuard<'a, T> {
        let lock = this.lock;
        std::mem::forget(this);
        lock.raw.exclusive_to_shared();
        ReadGuard { lock }
    }
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: exclusive mode is held; this guard is the only accessor.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: exclusive mode is held; this guard is the only accessor.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.raw.unlock_exclusive();
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for WriteGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WriteGuard").field(&&**self).finish()
    }
}

/// Write access bounded by a scope inside an [`UpgradeReadGuard`].
///
/// Dropping demotes back to upgrade mode; the borrowed guard resumes as if
/// the promotion never happened, except that writes made here stay.
#[must_use = "write access is demoted immediately if the guard is not held"]
pub struct ScopedWrite<'guard, 'a, T> {
    guard: &'guard mut UpgradeReadGuard<'a, T>,
}

impl<T> Deref for ScopedWrite<'_, '_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: exclusive mode is held for the scope; the upgrade guard
        // it was taken from is mutably borrowed and cannot read.
        unsafe { &*self.guard.lock.data.get() }
    }
}

impl<T> DerefMut for ScopedWrite<'_, '_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: as above; this value is the only accessor.
        unsafe { &mut *self.guard.lock.data.get() }
    }
}

impl<T> Drop for ScopedWrite<'_, '_, T> {
    #[inline]
    fn drop(&mut self) {
        self.guard.lock.raw.exclusive_to_upgrade();
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ScopedWrite<'_, '_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ScopedWrite").field(&&**self).finish()
    }
}
