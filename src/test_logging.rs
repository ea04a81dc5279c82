//! Event journal for concurrency tests.
//!
//! An interleaving test usually panics far from the decision that went
//! wrong, and by then the schedule that produced the failure is gone. The
//! tests in this crate therefore record what each thread did to the lock as
//! it happens; when an assertion fires, the whole history is dumped next to
//! the panic message.
//!
//! Entries are timestamped from the journal's creation, so the dump doubles
//! as a coarse schedule of the failing run. Set `UPSYNC_TEST_LOG=1` to echo
//! entries to stderr as they are recorded instead of only on failure.
//!
//! # Example
//!
//! ```
//! use upsync::test_logging::{EventJournal, LockMode, TestEvent};
//!
//! let journal = EventJournal::new();
//! journal.record(TestEvent::Acquired {
//!     mode: LockMode::Shared,
//!     thread: 1,
//! });
//! journal.note("reader parked");
//! assert_eq!(journal.len(), 2);
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Lock mode named in a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared access.
    Shared,
    /// Upgrade access.
    Upgrade,
    /// Exclusive access.
    Exclusive,
}

impl LockMode {
    /// Returns the mode's lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Upgrade => "upgrade",
            Self::Exclusive => "exclusive",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a test thread did to the lock under test.
#[derive(Debug, Clone)]
pub enum TestEvent {
    /// A mode was acquired.
    Acquired {
        /// Mode that was acquired.
        mode: LockMode,
        /// Test-assigned thread number.
        thread: usize,
    },

    /// A mode was released.
    Released {
        /// Mode that was released.
        mode: LockMode,
        /// Test-assigned thread number.
        thread: usize,
    },

    /// A holder moved between modes without releasing.
    Transition {
        /// Departing mode.
        from: LockMode,
        /// Destination mode.
        to: LockMode,
        /// Test-assigned thread number.
        thread: usize,
    },

    /// An acquisition attempt parked.
    Blocked {
        /// Mode being waited for.
        mode: LockMode,
        /// Test-assigned thread number.
        thread: usize,
    },

    /// Freeform test commentary (setup steps, phase markers).
    Note(String),
}

impl fmt::Display for TestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acquired { mode, thread } => write!(f, "t{thread} acquired {mode}"),
            Self::Released { mode, thread } => write!(f, "t{thread} released {mode}"),
            Self::Transition { from, to, thread } => {
                write!(f, "t{thread} transitioned {from} -> {to}")
            }
            Self::Blocked { mode, thread } => write!(f, "t{thread} blocked on {mode}"),
            Self::Note(message) => f.write_str(message),
        }
    }
}

/// A journal entry with its offset from the start of the test.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Time since the journal was created.
    pub at: Duration,
    /// The recorded event.
    pub event: TestEvent,
}

/// Collects timestamped events from every thread in a test.
///
/// Threads share the journal behind an `Arc` and record into it freely; the
/// assertion macro below prints the collected history when a check fails.
#[derive(Debug)]
pub struct EventJournal {
    entries: Mutex<Vec<Entry>>,
    epoch: Instant,
    echo: bool,
}

impl EventJournal {
    /// Creates an empty journal.
    ///
    /// Entries are echoed to stderr as they arrive when `UPSYNC_TEST_LOG`
    /// is set to `1` or `true`.
    #[must_use]
    pub fn new() -> Self {
        let echo = std::env::var("UPSYNC_TEST_LOG")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self {
            entries: Mutex::new(Vec::new()),
            epoch: Instant::now(),
            echo,
        }
    }

    /// Records an event.
    pub fn record(&self, event: TestEvent) {
        let at = self.epoch.elapsed();
        if self.echo {
            eprintln!("  +{:.3}ms  {}", at.as_secs_f64() * 1000.0, event);
        }
        self.entries.lock().push(Entry { at, event });
    }

    /// Records freeform commentary.
    pub fn note(&self, message: impl Into<String>) {
        self.record(TestEvent::Note(message.into()));
    }

    /// Returns the number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns a snapshot of the recorded entries.
    #[must_use]
    pub fn entries(&self) -> Vec<Entry> {
        self.entries.lock().clone()
    }

    /// Renders the history, one entry per line, oldest first.
    #[must_use]
    pub fn dump(&self) -> String {
        use fmt::Write as _;

        let entries = self.entries.lock();
        let mut out = format!("journal of {} events:\n", entries.len());
        for entry in entries.iter() {
            let _ = writeln!(
                out,
                "  +{:.3}ms  {}",
                entry.at.as_secs_f64() * 1000.0,
                entry.event
            );
        }
        out
    }
}

impl Default for EventJournal {
    fn default() -> Self {
        Self::new()
    }
}

/// Asserts a condition, dumping the journal next to the panic on failure.
///
/// # Example
///
/// ```ignore
/// assert_journal!(journal, blocked, "reader acquired past the exclusive holder");
/// ```
#[macro_export]
macro_rules! assert_journal {
    ($journal:expr, $cond:expr) => {
        $crate::assert_journal!($journal, $cond, "assertion failed: {}", stringify!($cond));
    };
    ($journal:expr, $cond:expr, $($msg:tt)+) => {
        if !$cond {
            eprintln!("{}", $journal.dump());
            panic!($($msg)+);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names_render_lowercase() {
        assert_eq!(LockMode::Shared.name(), "shared");
        assert_eq!(LockMode::Upgrade.to_string(), "upgrade");
        assert_eq!(LockMode::Exclusive.to_string(), "exclusive");
    }

    #[test]
    fn events_render_as_one_line_each() {
        let acquired = TestEvent::Acquired {
            mode: LockMode::Upgrade,
            thread: 1,
        };
        assert_eq!(acquired.to_string(), "t1 acquired upgrade");

        let transition = TestEvent::Transition {
            from: LockMode::Upgrade,
            to: LockMode::Exclusive,
            thread: 1,
        };
        assert_eq!(transition.to_string(), "t1 transitioned upgrade -> exclusive");

        let blocked = TestEvent::Blocked {
            mode: LockMode::Exclusive,
            thread: 2,
        };
        assert_eq!(blocked.to_string(), "t2 blocked on exclusive");
    }

    #[test]
    fn journal_keeps_entries_in_arrival_order() {
        let journal = EventJournal::new();
        assert!(journal.is_empty());

        journal.record(TestEvent::Acquired {
            mode: LockMode::Shared,
            thread: 1,
        });
        journal.note("promotion starts");
        journal.record(TestEvent::Released {
            mode: LockMode::Shared,
            thread: 1,
        });

        let entries = journal.entries();
        assert_eq!(entries.len(), 3);
        assert!(matches!(entries[0].event, TestEvent::Acquired { .. }));
        assert!(matches!(entries[2].event, TestEvent::Released { .. }));
        assert!(entries[0].at <= entries[2].at);
    }

    #[test]
    fn dump_renders_every_entry() {
        let journal = EventJournal::new();
        journal.record(TestEvent::Blocked {
            mode: LockMode::Exclusive,
            thread: 3,
        });
        journal.note("released the last reader");

        let dump = journal.dump();
        assert!(dump.contains("journal of 2 events"));
        assert!(dump.contains("t3 blocked on exclusive"));
        assert!(dump.contains("released the last reader"));
    }

    #[test]
    fn assert_journal_passes_quietly() {
        let journal = EventJournal::new();
        crate::assert_journal!(journal, true);
        crate::assert_journal!(journal, 1 + 1 == 2, "arithmetic broke");
    }
}
