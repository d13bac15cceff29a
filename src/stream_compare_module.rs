//! # Stream Comparator (`stream_compare_module.rs`)
//!
//! Walks two independent streams over the same directory in lockstep and
//! checks that they see the same entries in the same order. Differences in
//! end-of-stream status are fatal: the two readers disagree on how long the
//! directory is. Differences in an entry are lint failures: reported, this
//! pair stops, the run goes on.

use log::trace;

use crate::diagnostics_module::{AnomalyKind, Diagnostics};
use crate::dir_stream_module::{DirStream, FillMode};
use crate::entry_validator_module::DirEntryView;
use crate::lint_error_module::LintError;
use crate::platform_module::{PlatformCaps, RawDirReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOutcome {
    /// Both cursors are on identical entries.
    Equal,
    /// Both streams are at end of stream.
    BothAtEnd,
    /// The entries differ (already reported as a lint failure).
    Mismatch,
}

/// Result of one `lint` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LintReport {
    /// Entry pairs found equal.
    pub compared: usize,
    /// Whether the pass stopped on a divergence.
    pub mismatched: bool,
}

fn describe(entry: &DirEntryView<'_>) -> String {
    format!(
        "{:08x} ({} bytes) {}",
        entry.resume_offset,
        entry.record_len,
        entry.display_name()
    )
}

fn describe_side(entry: Option<DirEntryView<'_>>) -> String {
    entry.map_or_else(|| "<no entry>".to_string(), |e| describe(&e))
}

fn entries_match(caps: &PlatformCaps, a: &DirEntryView<'_>, b: &DirEntryView<'_>) -> bool {
    if a.name != b.name {
        return false;
    }
    if caps.has_resume_offset && a.resume_offset != b.resume_offset {
        return false;
    }
    !(caps.compares_fileno && a.fileno != b.fileno)
}

/// Compare the entries currently under both cursors.
///
/// # Errors
/// `LintError::EofMismatch` when exactly one stream is at end of stream.
pub fn compare<A, B>(
    a: &DirStream<A>,
    b: &DirStream<B>,
    diag: &mut Diagnostics,
    verbosity: u8,
) -> Result<CompareOutcome, LintError>
where
    A: RawDirReader,
    B: RawDirReader,
{
    if a.is_eof() != b.is_eof() {
        return Err(LintError::EofMismatch {
            eof_a: a.is_eof(),
            base_a: a.base(),
            eof_b: b.is_eof(),
            base_b: b.base(),
        });
    }
    if a.is_eof() {
        return Ok(CompareOutcome::BothAtEnd);
    }

    let (entry_a, entry_b) = match (a.current(), b.current()) {
        (Some(entry_a), Some(entry_b)) => (entry_a, entry_b),
        (entry_a, entry_b) => {
            diag.report(
                AnomalyKind::LintMismatch,
                format_args!(
                    "Entries mismatch ({} -- {} bytes): {} -- {}",
                    a.bufsize(),
                    b.bufsize(),
                    describe_side(entry_a),
                    describe_side(entry_b)
                ),
            );
            return Ok(CompareOutcome::Mismatch);
        }
    };

    if verbosity >= 2 {
        trace!("   {} -- {}", describe(&entry_a), describe(&entry_b));
    }

    if !entries_match(a.caps(), &entry_a, &entry_b) {
        diag.report(
            AnomalyKind::LintMismatch,
            format_args!(
                "Entries mismatch ({} -- {} bytes): {} [ino {}] -- {} [ino {}]",
                a.bufsize(),
                b.bufsize(),
                describe(&entry_a),
                entry_a.fileno,
                describe(&entry_b),
                entry_b.fileno
            ),
        );
        return Ok(CompareOutcome::Mismatch);
    }

    Ok(CompareOutcome::Equal)
}

/// Read both streams from their current descriptor positions and compare
/// them entry by entry until both end or they diverge.
pub fn lint<A, B>(
    a: &mut DirStream<A>,
    b: &mut DirStream<B>,
    diag: &mut Diagnostics,
    verbosity: u8,
) -> Result<LintReport, LintError>
where
    A: RawDirReader,
    B: RawDirReader,
{
    a.fill(FillMode::Strict, diag)?;
    b.fill(FillMode::Strict, diag)?;

    let mut report = LintReport::default();
    loop {
        match compare(a, b, diag, verbosity)? {
            CompareOutcome::Equal => {
                report.compared += 1;
                a.advance(diag)?;
                b.advance(diag)?;
            }
            CompareOutcome::BothAtEnd => break,
            CompareOutcome::Mismatch => {
                report.mismatched = true;
                break;
            }
        }
    }
    Ok(report)
}
