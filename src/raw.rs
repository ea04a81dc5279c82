//! Core state machine for the upgradable mutex.
//!
//! [`UpgradeMutex`] manages three levels of access to a resource it does not
//! itself own:
//!
//! 1. **Shared**: any number of concurrent holders, read intent.
//! 2. **Upgrade**: a single holder that coexists with shared holders and may
//!    later promote itself to exclusive.
//! 3. **Exclusive**: a single holder, all others excluded.
//!
//! The entire mode configuration lives in one atomic word, so uncontended
//! acquisition and release are a single compare-and-swap or subtraction.
//! Contended callers park on one of two condition variables:
//!
//! - `gate1` wakes shared/upgrade waiters (after an exclusive or upgrade
//!   release, all of them may be admissible at once).
//! - `gate2` wakes exclusive waiters and a draining promotion (at most one
//!   of them can win, so a single wakeup usually suffices).
//!
//! Splitting the audiences keeps an exclusive release from stampeding every
//! parked writer and keeps a shared release from waking readers that were
//! never blocked on each other.
//!
//! # State word layout
//!
//! | Bits   | Meaning                                  |
//! |--------|------------------------------------------|
//! | 31     | exclusive holder present                 |
//! | 30     | upgrade holder present                   |
//! | 29     | a promotion to exclusive is draining     |
//! | 0..=28 | count of shared holders                  |
//!
//! Between operations the word always satisfies: an exclusive holder implies
//! no upgrade holder and zero shared holders; at most one upgrade holder
//! exists; the pending bit is only ever set by the current upgrade holder.
//!
//! # Fairness
//!
//! Readers are preferred: an exclusive waiter parks until the word reaches
//! zero and can wait indefinitely under sustained reader overlap. The one
//! exception is a draining promotion, whose pending bit turns away newly
//! arriving readers so the existing ones can drain. There is no FIFO order
//! among waiters.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::metrics::{LockMetricsSnapshot, Metrics, WaitTimer};

/// Exclusive holder present.
pub(crate) const EXCLUSIVE: u32 = 1 << 31;
/// Upgrade holder present.
pub(crate) const UPGRADE: u32 = 1 << 30;
/// A promotion to exclusive is draining; new shared acquisitions are turned
/// away until it completes or is abandoned.
pub(crate) const UPGRADE_PENDING: u32 = 1 << 29;
/// Low bits counting shared holders.
pub(crate) const READER_MASK: u32 = !(EXCLUSIVE | UPGRADE | UPGRADE_PENDING);
const ONE_READER: u32 = 1;

/// A reader/writer/upgrader mutex with atomic transitions between modes.
///
/// The mutex does not carry data; see [`UpgradeRwLock`](crate::UpgradeRwLock)
/// for the typed wrapper. Its address is its identity: it is neither `Clone`
/// nor meaningfully movable while guards reference it, which the borrow
/// checker enforces.
///
/// Acquire and release come in pairs per mode. Releasing a mode that is not
/// currently held is not checked in release builds and leaves the state word
/// corrupt; the RAII handles in [`guard`](crate::guard) make that misuse
/// unrepresentable and are the intended interface.
///
/// # Example
///
/// ```
/// use upsync::UpgradeMutex;
///
/// let mutex = UpgradeMutex::new();
/// mutex.lock_shared();
/// mutex.lock_shared();
/// mutex.unlock_shared();
/// mutex.unlock_shared();
/// ```
pub struct UpgradeMutex {
    /// Mode flags plus shared-holder count, the sole source of truth.
    state: AtomicU32,
    /// Serializes wait-predicate evaluation. Never held while parked and
    /// never held across a user callback.
    pred_lock: Mutex<()>,
    /// Shared and upgrade waiters.
    gate1: Condvar,
    /// Exclusive waiters and a draining promotion.
    gate2: Condvar,
    metrics: Metrics,
}

impl UpgradeMutex {
    /// Creates an unlocked mutex.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
            pred_lock: Mutex::new(()),
            gate1: Condvar::new(),
            gate2: Condvar::new(),
            metrics: Metrics::new(),
        }
    }

    // ── Exclusive ─────────────────────────────────────────────────────────

    /// Acquires exclusive access, blocking until no holder of any mode
    /// remains.
    pub fn lock_exclusive(&self) {
        let timer = WaitTimer::start();
        let mut held = self.pred_lock.lock();
        let mut contended = false;
        while !self.try_install_exclusive() {
            contended = true;
            self.gate2.wait(&mut held);
        }
        drop(held);
        self.metrics.record_exclusive(timer, contended);
    }

    /// Releases exclusive access.
    ///
    /// The caller must currently hold the mutex in exclusive mode; this is
    /// not checked in release builds.
    pub fn unlock_exclusive(&self) {
        let old = self.state.fetch_sub(EXCLUSIVE, Ordering::Release);
        debug_assert!(old & EXCLUSIVE != 0, "exclusive release without holder");
        self.sync_waiters();
        // One writer can win; every parked reader and upgrader can.
        self.gate2.notify_one();
        self.gate1.notify_all();
    }

    // ── Shared ────────────────────────────────────────────────────────────

    /// Acquires shared access, blocking while an exclusive holder is present
    /// or a promotion is draining.
    ///
    /// # Panics
    ///
    /// Panics if the shared-holder count would overflow its bit range. The
    /// count never wraps silently.
    pub fn lock_shared(&self) {
        let timer = WaitTimer::start();
        let mut held = self.pred_lock.lock();
        let mut contended = false;
        while !self.try_install_shared() {
            contended = true;
            self.gate1.wait(&mut held);
        }
        drop(held);
        self.metrics.record_shared(timer, contended);
    }

    /// Releases shared access.
    ///
    /// The caller must currently hold the mutex in shared mode; this is not
    /// checked in release builds.
    pub fn unlock_shared(&self) {
        let old = self.state.fetch_sub(ONE_READER, Ordering::Release);
        debug_assert!(old & READER_MASK != 0, "shared release without holder");
        if old & READER_MASK != ONE_READER {
            // Readers never block other readers; only the last one out has
            // anyone to wake.
            return;
        }
        if old & UPGRADE == 0 {
            self.sync_waiters();
            self.gate2.notify_one();
        } else if old & UPGRADE_PENDING != 0 {
            // A promotion is draining on gate2, possibly alongside parked
            // writers whose predicate is still false. Wake the whole gate so
            // the wakeup cannot be swallowed by one of the writers.
            self.sync_waiters();
            self.gate2.notify_all();
        }
    }

    // ── Upgrade ───────────────────────────────────────────────────────────

    /// Acquires upgrade access, blocking while an exclusive or another
    /// upgrade holder is present. Coexists with shared holders.
    pub fn lock_upgrade(&self) {
        let timer = WaitTimer::start();
        let mut held = self.pred_lock.lock();
        let mut contended = false;
        while !self.try_install_upgrade() {
            contended = true;
            self.gate1.wait(&mut held);
        }
        drop(held);
        self.metrics.record_upgrade(timer, contended);
    }

    /// Releases upgrade access.
    ///
    /// Also clears a pending-promotion signal left by this holder, so an
    /// abandoned promotion cannot keep turning readers away.
    ///
    /// The caller must currently hold the mutex in upgrade mode; this is not
    /// checked in release builds.
    pub fn unlock_upgrade(&self) {
        let old = self
            .state
            .fetch_and(!(UPGRADE | UPGRADE_PENDING), Ordering::Release);
        debug_assert!(old & UPGRADE != 0, "upgrade release without holder");
        self.sync_waiters();
        if old & READER_MASK == 0 {
            self.gate2.notify_one();
        }
        // A new upgrader, or readers that arrived behind a now-cleared
        // pending bit, may proceed.
        self.gate1.notify_all();
    }

    // ── Transitions (driven by the scoped handles) ────────────────────────

    /// Promotes upgrade access to exclusive access.
    ///
    /// Sets the pending bit to turn away new readers, waits for the current
    /// ones to drain, then swaps the upgrade and pending bits for the
    /// exclusive bit in a single store. The holder keeps the upgrade mode
    /// throughout, so no third party can acquire in between.
    pub(crate) fn upgrade_to_exclusive(&self) {
        let mut held = self.pred_lock.lock();
        self.state.fetch_or(UPGRADE_PENDING, Ordering::Relaxed);
        loop {
            // Acquire pairs with the departing readers' release decrements:
            // everything they did before unlocking is visible to the new
            // exclusive holder.
            if self.state.load(Ordering::Acquire) & READER_MASK == 0 {
                break;
            }
            self.gate2.wait(&mut held);
        }
        self.state.store(EXCLUSIVE, Ordering::Release);
        drop(held);
        self.metrics.record_promotion();
    }

    /// Demotes exclusive access to upgrade access. Never blocks.
    pub(crate) fn exclusive_to_upgrade(&self) {
        self.state.store(UPGRADE, Ordering::Release);
        self.sync_waiters();
        self.gate1.notify_all();
    }

    /// Demotes exclusive access to a single shared hold. Never blocks.
    pub(crate) fn exclusive_to_shared(&self) {
        self.state.store(ONE_READER, Ordering::Release);
        self.sync_waiters();
        self.gate1.notify_all();
    }

    // ── Install attempts ──────────────────────────────────────────────────
    //
    // Each attempt returns false only when the observed state forbids the
    // acquisition outright, so the caller parks knowing the holder of the
    // forbidding bit will notify on its release. A CAS that loses to benign
    // churn (a reader arriving or leaving) retries instead; reporting it as
    // blocked would park the caller with nobody left to wake it.

    #[inline]
    fn try_install_exclusive(&self) -> bool {
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            if current != 0 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                EXCLUSIVE,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    #[inline]
    fn try_install_shared(&self) -> bool {
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            if current & (EXCLUSIVE | UPGRADE_PENDING) != 0 {
                return false;
            }
            assert!(
                current & READER_MASK != READER_MASK,
                "too many shared holders"
            );
            match self.state.compare_exchange_weak(
                current,
                current + ONE_READER,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    #[inline]
    fn try_install_upgrade(&self) -> bool {
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            if current & (EXCLUSIVE | UPGRADE) != 0 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                current | UPGRADE,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Bridges a state-word change to the parked waiters.
    ///
    /// Releases mutate the word outside `pred_lock`. A waiter that read the
    /// stale word is either still evaluating its predicate (and then this
    /// acquisition waits until it parks) or already parked; in both cases
    /// the notification issued after this call reaches it.
    #[inline]
    fn sync_waiters(&self) {
        drop(self.pred_lock.lock());
    }

    /// Returns a snapshot of the contention metrics.
    ///
    /// All-zero unless the `lock-metrics` feature is enabled.
    #[must_use]
    pub fn snapshot(&self) -> LockMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Resets all contention metrics to zero.
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    #[cfg(test)]
    pub(crate) fn state_bits(&self) -> u32 {
        self.state.load(Ordering::SeqCst)
    }
}

impl Default for UpgradeMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UpgradeMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.load(Ordering::Relaxed);
        f.debug_struct("UpgradeMutex")
            .field("exclusive", &(state & EXCLUSIVE != 0))
            .field("upgrade", &(state & UPGRADE != 0))
            .field("upgrade_pending", &(state & UPGRADE_PENDING != 0))
            .field("shared_holders", &(state & READER_MASK))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_logging::{EventJournal, LockMode, TestEvent};
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn exclusive_round_trip_restores_state() {
        let mutex = UpgradeMutex::new();
        mutex.lock_exclusive();
        assert_eq!(mutex.state_bits(), EXCLUSIVE);
        mutex.unlock_exclusive();
        assert_eq!(mutex.state_bits(), 0);
    }

    #[test]
    fn shared_round_trip_restores_state() {
        let mutex = UpgradeMutex::new();
        mutex.lock_shared();
        mutex.lock_shared();
        assert_eq!(mutex.state_bits(), 2);
        mutex.unlock_shared();
        mutex.unlock_shared();
        assert_eq!(mutex.state_bits(), 0);
    }

    #[test]
    fn upgrade_round_trip_restores_state() {
        let mutex = UpgradeMutex::new();
        mutex.lock_upgrade();
        assert_eq!(mutex.state_bits(), UPGRADE);
        mutex.unlock_upgrade();
        assert_eq!(mutex.state_bits(), 0);
    }

    #[test]
    fn upgrade_coexists_with_shared_in_state_word() {
        let mutex = UpgradeMutex::new();
        mutex.lock_upgrade();
        mutex.lock_shared();
        mutex.lock_shared();
        assert_eq!(mutex.state_bits(), UPGRADE | 2);
        mutex.unlock_shared();
        mutex.unlock_shared();
        mutex.unlock_upgrade();
        assert_eq!(mutex.state_bits(), 0);
    }

    #[test]
    fn promotion_swaps_flags_atomically() {
        let mutex = UpgradeMutex::new();
        mutex.lock_upgrade();
        mutex.upgrade_to_exclusive();
        assert_eq!(mutex.state_bits(), EXCLUSIVE);
        mutex.exclusive_to_upgrade();
        assert_eq!(mutex.state_bits(), UPGRADE);
        mutex.unlock_upgrade();
        assert_eq!(mutex.state_bits(), 0);
    }

    #[test]
    fn demotion_to_shared_installs_one_reader() {
        let mutex = UpgradeMutex::new();
        mutex.lock_exclusive();
        mutex.exclusive_to_shared();
        assert_eq!(mutex.state_bits(), 1);
        mutex.unlock_shared();
        assert_eq!(mutex.state_bits(), 0);
    }

    #[test]
    fn abandoned_promotion_signal_is_cleared_on_upgrade_release() {
        let mutex = UpgradeMutex::new();
        mutex.lock_upgrade();
        // Plant the pending bit by hand; a holder that parks in the promotion
        // wait and then gives up leaves the word in exactly this shape.
        mutex.state.fetch_or(UPGRADE_PENDING, Ordering::SeqCst);
        mutex.unlock_upgrade();
        assert_eq!(mutex.state_bits(), 0);
        // Readers must be admissible again.
        mutex.lock_shared();
        mutex.unlock_shared();
    }

    #[test]
    fn exclusive_blocks_shared_until_release() {
        let journal = Arc::new(EventJournal::new());
        let mutex = Arc::new(UpgradeMutex::new());
        let acquired = Arc::new(AtomicBool::new(false));

        mutex.lock_exclusive();
        journal.record(TestEvent::Acquired {
            mode: LockMode::Exclusive,
            thread: 0,
        });

        let reader_mutex = Arc::clone(&mutex);
        let reader_journal = Arc::clone(&journal);
        let reader_done = Arc::clone(&acquired);
        let reader = thread::spawn(move || {
            reader_journal.record(TestEvent::Blocked {
                mode: LockMode::Shared,
                thread: 1,
            });
            reader_mutex.lock_shared();
            reader_journal.record(TestEvent::Acquired {
                mode: LockMode::Shared,
                thread: 1,
            });
            reader_done.store(true, Ordering::SeqCst);
            reader_mutex.unlock_shared();
        });

        thread::sleep(Duration::from_millis(50));
        let blocked = !acquired.load(Ordering::SeqCst);
        crate::assert_journal!(journal, blocked, "reader acquired while exclusive was held");

        mutex.unlock_exclusive();
        journal.record(TestEvent::Released {
            mode: LockMode::Exclusive,
            thread: 0,
        });
        reader.join().expect("reader thread panicked");
        crate::assert_journal!(
            journal,
            acquired.load(Ordering::SeqCst),
            "reader never acquired after exclusive release"
        );
    }

    #[test]
    fn exclusive_waits_for_shared_and_upgrade() {
        let journal = EventJournal::new();
        let mutex = Arc::new(UpgradeMutex::new());

        mutex.lock_upgrade();
        mutex.lock_shared();
        journal.note("upgrade and shared held on main thread");

        let writer_mutex = Arc::clone(&mutex);
        let writer_acquired = Arc::new(AtomicBool::new(false));
        let writer_flag = Arc::clone(&writer_acquired);
        let writer = thread::spawn(move || {
            writer_mutex.lock_exclusive();
            writer_flag.store(true, Ordering::SeqCst);
            writer_mutex.unlock_exclusive();
        });

        thread::sleep(Duration::from_millis(50));
        crate::assert_journal!(
            journal,
            !writer_acquired.load(Ordering::SeqCst),
            "writer acquired while shared and upgrade holders were present"
        );

        mutex.unlock_shared();
        journal.note("shared released, upgrade still held");
        thread::sleep(Duration::from_millis(20));
        crate::assert_journal!(
            journal,
            !writer_acquired.load(Ordering::SeqCst),
            "writer acquired while the upgrade holder was still present"
        );

        mutex.unlock_upgrade();
        writer.join().expect("writer thread panicked");
        crate::assert_journal!(
            journal,
            writer_acquired.load(Ordering::SeqCst),
            "writer never acquired after all holders released"
        );
    }

    #[test]
    fn second_upgrader_waits_for_first() {
        let mutex = Arc::new(UpgradeMutex::new());
        let acquired = Arc::new(AtomicBool::new(false));

        mutex.lock_upgrade();

        let second_mutex = Arc::clone(&mutex);
        let second_flag = Arc::clone(&acquired);
        let second = thread::spawn(move || {
            second_mutex.lock_upgrade();
            second_flag.store(true, Ordering::SeqCst);
            second_mutex.unlock_upgrade();
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));

        mutex.unlock_upgrade();
        second.join().expect("second upgrader panicked");
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn promotion_drains_readers_and_turns_new_ones_away() {
        let journal = EventJournal::new();
        let mutex = Arc::new(UpgradeMutex::new());

        // Two readers in place, then an upgrade holder starts promoting.
        mutex.lock_shared();
        mutex.lock_shared();
        mutex.lock_upgrade();
        journal.note("two readers and the upgrade holder in place");

        let promoter_mutex = Arc::clone(&mutex);
        let promoted = Arc::new(AtomicBool::new(false));
        let promoted_flag = Arc::clone(&promoted);
        let promoter = thread::spawn(move || {
            promoter_mutex.upgrade_to_exclusive();
            promoted_flag.store(true, Ordering::SeqCst);
            promoter_mutex.unlock_exclusive();
        });

        // Wait until the pending bit is visible, then a late reader must park.
        while mutex.state_bits() & UPGRADE_PENDING == 0 {
            thread::yield_now();
        }
        let late_mutex = Arc::clone(&mutex);
        let late_acquired = Arc::new(AtomicBool::new(false));
        let late_flag = Arc::clone(&late_acquired);
        let late_reader = thread::spawn(move || {
            late_mutex.lock_shared();
            late_flag.store(true, Ordering::SeqCst);
            late_mutex.unlock_shared();
        });

        thread::sleep(Duration::from_millis(50));
        crate::assert_journal!(
            journal,
            !promoted.load(Ordering::SeqCst),
            "promotion completed while readers were still present"
        );
        crate::assert_journal!(
            journal,
            !late_acquired.load(Ordering::SeqCst),
            "late reader acquired past a draining promotion"
        );

        // Draining the existing readers completes the promotion, and the
        // exclusive release then admits the late reader.
        mutex.unlock_shared();
        mutex.unlock_shared();
        promoter.join().expect("promoter thread panicked");
        late_reader.join().expect("late reader panicked");
        crate::assert_journal!(
            journal,
            promoted.load(Ordering::SeqCst) && late_acquired.load(Ordering::SeqCst),
            "promotion or late reader never completed"
        );
        assert_eq!(mutex.state_bits(), 0);
    }

    #[test]
    fn exclusion_invariant_holds_under_contention() {
        // No interleaving may observe the exclusive flag together with a
        // shared holder or an upgrade holder.
        let mutex = Arc::new(UpgradeMutex::new());
        let violations = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();

        for worker in 0..4 {
            let mutex = Arc::clone(&mutex);
            let violations = Arc::clone(&violations);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    match worker % 2 {
                        0 => {
                            mutex.lock_exclusive();
                            let state = mutex.state_bits();
                            if state & READER_MASK != 0 || state & UPGRADE != 0 {
                                violations.store(true, Ordering::SeqCst);
                            }
                            mutex.unlock_exclusive();
                        }
                        _ => {
                            mutex.lock_shared();
                            if mutex.state_bits() & EXCLUSIVE != 0 {
                                violations.store(true, Ordering::SeqCst);
                            }
                            mutex.unlock_shared();
                        }
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().expect("worker panicked");
        }
        assert!(!violations.load(Ordering::SeqCst));
        assert_eq!(mutex.state_bits(), 0);
    }

    #[test]
    fn debug_output_decodes_the_state_word() {
        let mutex = UpgradeMutex::new();
        mutex.lock_upgrade();
        let debug = format!("{mutex:?}");
        assert!(debug.contains("upgrade: true"));
        assert!(debug.contains("shared_holders: 0"));
        mutex.unlock_upgrade();
    }
}
