//! Feature-gated contention instrumentation for the lock paths.
//!
//! When the `lock-metrics` feature is enabled, every acquisition records
//! wait time and whether it contended, broken out per mode, plus a count of
//! completed promotions. When disabled, the recording hooks compile to
//! nothing and [`UpgradeMutex::snapshot`](crate::UpgradeMutex::snapshot)
//! returns zeros.
//!
//! # Usage
//!
//! ```ignore
//! let mutex = UpgradeMutex::new();
//! mutex.lock_shared();
//! mutex.unlock_shared();
//!
//! #[cfg(feature = "lock-metrics")]
//! {
//!     let snap = mutex.snapshot();
//!     println!("shared acquisitions: {}", snap.shared.acquisitions);
//! }
//! ```

/// Counters for one acquisition mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeCounters {
    /// Total successful acquisitions in this mode.
    pub acquisitions: u64,
    /// Acquisitions that had to park at least once.
    pub contentions: u64,
    /// Cumulative nanoseconds spent waiting to acquire.
    pub wait_ns: u64,
    /// Maximum single wait in nanoseconds.
    pub max_wait_ns: u64,
}

/// Snapshot of lock contention metrics across all modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockMetricsSnapshot {
    /// Shared-mode acquisitions.
    pub shared: ModeCounters,
    /// Upgrade-mode acquisitions.
    pub upgrade: ModeCounters,
    /// Exclusive-mode acquisitions.
    pub exclusive: ModeCounters,
    /// Completed upgrade-to-exclusive promotions.
    pub promotions: u64,
}

// ── Feature-gated implementation ──────────────────────────────────────────

#[cfg(feature = "lock-metrics")]
mod inner {
    use super::{LockMetricsSnapshot, ModeCounters};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Instant;

    /// One mode's counters padded out to a cache line, so the three modes
    /// do not invalidate each other under mixed workloads.
    #[derive(Debug)]
    #[repr(C)]
    struct ModeCells {
        acquisitions: AtomicU64,
        contentions: AtomicU64,
        wait_ns: AtomicU64,
        max_wait_ns: AtomicU64,
        _pad: [u8; 32],
    }

    impl ModeCells {
        const fn new() -> Self {
            Self {
                acquisitions: AtomicU64::new(0),
                contentions: AtomicU64::new(0),
                wait_ns: AtomicU64::new(0),
                max_wait_ns: AtomicU64::new(0),
                _pad: [0; 32],
            }
        }

        fn record(&self, wait_ns: u64, contended: bool) {
            self.acquisitions.fetch_add(1, Ordering::Relaxed);
            self.wait_ns.fetch_add(wait_ns, Ordering::Relaxed);
            if contended {
                self.contentions.fetch_add(1, Ordering::Relaxed);
            }
            let mut old = self.max_wait_ns.load(Ordering::Relaxed);
            while wait_ns > old {
                match self.max_wait_ns.compare_exchange_weak(
                    old,
                    wait_ns,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(actual) => old = actual,
                }
            }
        }

        fn snapshot(&self) -> ModeCounters {
            ModeCounters {
                acquisitions: self.acquisitions.load(Ordering::Relaxed),
                contentions: self.contentions.load(Ordering::Relaxed),
                wait_ns: self.wait_ns.load(Ordering::Relaxed),
                max_wait_ns: self.max_wait_ns.load(Ordering::Relaxed),
            }
        }

        fn reset(&self) {
            self.acquisitions.store(0, Ordering::Relaxed);
            self.contentions.store(0, Ordering::Relaxed);
            self.wait_ns.store(0, Ordering::Relaxed);
            self.max_wait_ns.store(0, Ordering::Relaxed);
        }
    }

    /// Contention counters embedded in the mutex.
    #[derive(Debug)]
    pub(crate) struct Metrics {
        shared: ModeCells,
        upgrade: ModeCells,
        exclusive: ModeCells,
        promotions: AtomicU64,
    }

    impl Metrics {
        pub(crate) const fn new() -> Self {
            Self {
                shared: ModeCells::new(),
                upgrade: ModeCells::new(),
                exclusive: ModeCells::new(),
                promotions: AtomicU64::new(0),
            }
        }

        pub(crate) fn record_shared(&self, timer: WaitTimer, contended: bool) {
            self.shared.record(timer.elapsed_ns(), contended);
        }

        pub(crate) fn record_upgrade(&self, timer: WaitTimer, contended: bool) {
            self.upgrade.record(timer.elapsed_ns(), contended);
        }

        pub(crate) fn record_exclusive(&self, timer: WaitTimer, contended: bool) {
            self.exclusive.record(timer.elapsed_ns(), contended);
        }

        pub(crate) fn record_promotion(&self) {
            self.promotions.fetch_add(1, Ordering::Relaxed);
        }

        pub(crate) fn snapshot(&self) -> LockMetricsSnapshot {
            LockMetricsSnapshot {
                shared: self.shared.snapshot(),
                upgrade: self.upgrade.snapshot(),
                exclusive: self.exclusive.snapshot(),
                promotions: self.promotions.load(Ordering::Relaxed),
            }
        }

        pub(crate) fn reset(&self) {
            self.shared.reset();
            self.upgrade.reset();
            self.exclusive.reset();
            self.promotions.store(0, Ordering::Relaxed);
        }
    }

    /// Measures the wall-clock wait of one acquisition.
    #[derive(Debug, Clone, Copy)]
    pub(crate) struct WaitTimer {
        start: Instant,
    }

    impl WaitTimer {
        pub(crate) fn start() -> Self {
            Self {
                start: Instant::now(),
            }
        }

        fn elapsed_ns(self) -> u64 {
            u64::try_from(self.start.elapsed().as_nanos()).unwrap_or(u64::MAX)
        }
    }
}

// ── No-op implementation (feature disabled) ───────────────────────────────

#[cfg(not(feature = "lock-metrics"))]
mod inner {
    use super::LockMetricsSnapshot;

    /// Zero-sized stand-in (metrics disabled).
    #[derive(Debug)]
    pub(crate) struct Metrics;

    impl Metrics {
        pub(crate) const fn new() -> Self {
            Self
        }

        #[inline]
        pub(crate) fn record_shared(&self, _timer: WaitTimer, _contended: bool) {}

        #[inline]
        pub(crate) fn record_upgrade(&self, _timer: WaitTimer, _contended: bool) {}

        #[inline]
        pub(crate) fn record_exclusive(&self, _timer: WaitTimer, _contended: bool) {}

        #[inline]
        pub(crate) fn record_promotion(&self) {}

        pub(crate) fn snapshot(&self) -> LockMetricsSnapshot {
            LockMetricsSnapshot::default()
        }

        pub(crate) fn reset(&self) {}
    }

    /// Zero-sized stand-in (metrics disabled).
    #[derive(Debug, Clone, Copy)]
    pub(crate) struct WaitTimer;

    impl WaitTimer {
        #[inline]
        pub(crate) fn start() -> Self {
            Self
        }
    }
}

pub(crate) use inner::{Metrics, WaitTimer};
