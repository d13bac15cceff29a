//! # Diagnostics Context (`diagnostics_module.rs`)
//!
//! Counts and prints recoverable anomalies and lint failures. A
//! systematically broken directory can produce the same anomaly for every
//! entry, so printing is capped per category: the first `cap` reports of a
//! kind are printed, one suppression notice follows, and later reports are
//! only counted.
//!
//! The context is an ordinary value owned by the orchestrator and lent to
//! streams and the comparator; there is no process-wide counter state.

use std::fmt;

use log::{info, warn};

/// Default number of printed reports per category.
pub const DEFAULT_REPORT_CAP: u32 = 8;

// ============================================================================
// ANOMALY CATEGORIES
// ============================================================================

/// Category of a non-fatal finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalyKind {
    /// Record length is zero, smaller than a header, or runs past the window.
    InvalidEntrySize,
    /// The primitive reported more bytes than the buffer can hold.
    BufferOverflow,
    /// Name is not followed by a NUL terminator inside its record.
    UnterminatedName,
    /// Name exceeds the platform maximum or does not fit its record.
    NameTooLong,
    ZeroFileno,
    ZeroResumeOffset,
    /// Last entry's `d_off` differs from the descriptor position.
    ResumeOffsetMismatch,
    /// A read delivered nothing but the descriptor position moved.
    OffsetMovedWithoutData,
    /// A non-empty read produced no valid record at all.
    EmptyWindow,
    /// Two readers disagree on an entry.
    LintMismatch,
}

impl AnomalyKind {
    pub const ALL: [AnomalyKind; 10] = [
        AnomalyKind::InvalidEntrySize,
        AnomalyKind::BufferOverflow,
        AnomalyKind::UnterminatedName,
        AnomalyKind::NameTooLong,
        AnomalyKind::ZeroFileno,
        AnomalyKind::ZeroResumeOffset,
        AnomalyKind::ResumeOffsetMismatch,
        AnomalyKind::OffsetMovedWithoutData,
        AnomalyKind::EmptyWindow,
        AnomalyKind::LintMismatch,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Short label used in report lines and the run summary.
    pub fn label(self) -> &'static str {
        match self {
            AnomalyKind::InvalidEntrySize => "invalid entry size",
            AnomalyKind::BufferOverflow => "buffer overflow",
            AnomalyKind::UnterminatedName => "unterminated name",
            AnomalyKind::NameTooLong => "name too long",
            AnomalyKind::ZeroFileno => "zero d_fileno",
            AnomalyKind::ZeroResumeOffset => "zero d_off",
            AnomalyKind::ResumeOffsetMismatch => "offset mismatch",
            AnomalyKind::OffsetMovedWithoutData => "offset moved without data",
            AnomalyKind::EmptyWindow => "empty window",
            AnomalyKind::LintMismatch => "entries mismatch",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// DIAGNOSTICS CONTEXT
// ============================================================================

/// Per-run anomaly counters with a print cap per category.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    counts: [u32; AnomalyKind::ALL.len()],
    cap: u32,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::with_cap(DEFAULT_REPORT_CAP)
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context printing at most `cap` reports per category.
    /// A cap of zero is raised to one: the first report is never hidden.
    pub fn with_cap(cap: u32) -> Self {
        Diagnostics {
            counts: [0; AnomalyKind::ALL.len()],
            cap: cap.max(1),
        }
    }

    /// Record one anomaly and print it unless its category is saturated.
    ///
    /// # Returns
    /// `true` if the report was printed.
    pub fn report(&mut self, kind: AnomalyKind, details: fmt::Arguments<'_>) -> bool {
        let slot = &mut self.counts[kind.index()];
        *slot = slot.saturating_add(1);
        let seen = *slot;

        if seen <= self.cap {
            warn!("{}: {}", kind, details);
            true
        } else {
            if seen == self.cap + 1 {
                info!("{}: further reports suppressed", kind);
            }
            false
        }
    }

    /// Number of times `kind` was reported, printed or not.
    pub fn count(&self, kind: AnomalyKind) -> u32 {
        self.counts[kind.index()]
    }

    /// Total of all recoverable anomalies, excluding lint mismatches.
    pub fn anomaly_total(&self) -> u32 {
        AnomalyKind::ALL
            .iter()
            .filter(|kind| **kind != AnomalyKind::LintMismatch)
            .map(|kind| self.count(*kind))
            .sum()
    }

    /// Non-zero counters, in category order.
    pub fn summary(&self) -> Vec<(AnomalyKind, u32)> {
        AnomalyKind::ALL
            .iter()
            .map(|kind| (*kind, self.count(*kind)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}
