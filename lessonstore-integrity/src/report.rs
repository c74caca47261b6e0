//! End-of-pass summaries
//!
//! Every pass prints one summary line so an operator can compare runs and
//! re-run safely after inspecting discrepancies.

use lessonstore_common::db::MigrationReport;
use std::fmt;

/// Counts reported at the end of every pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub pass: &'static str,
    pub repaired: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl PassSummary {
    pub fn new(pass: &'static str) -> Self {
        Self {
            pass,
            repaired: 0,
            deleted: 0,
            skipped: 0,
            errored: 0,
        }
    }

    /// Whether the pass changed nothing
    pub fn is_noop(&self) -> bool {
        self.repaired == 0 && self.deleted == 0
    }
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Summary [{}]: repaired={} deleted={} skipped={} errored={}",
            self.pass, self.repaired, self.deleted, self.skipped, self.errored
        )
    }
}

/// Reduce a pass report to its summary counts
pub trait Summarize {
    fn summary(&self) -> PassSummary;
}

impl Summarize for MigrationReport {
    fn summary(&self) -> PassSummary {
        PassSummary {
            repaired: self.applied_count(),
            skipped: self.already_applied_count(),
            ..PassSummary::new("migrate")
        }
    }
}
