//! # Fatal Error Type (`lint_error_module.rs`)
//!
//! Errors in this module abort the whole run. Recoverable anomalies and
//! lint mismatches never become a `LintError`; they are counted and printed
//! through `diagnostics_module::Diagnostics` and the run carries on.
//!
//! Each variant's message starts with a unique prefix code (e.g. `RLOP`)
//! so a line of output can be traced back to the site that produced it.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

// ============================================================================
// EXIT STATUS
// ============================================================================

/// Process status for a completed run, including runs with lint failures.
pub const EXIT_OK: i32 = 0;

/// Process status for a malformed command line.
pub const EXIT_USAGE: i32 = 1;

/// Process status for fatal setup errors (open, allocation, directory size).
pub const EXIT_SETUP: i32 = 2;

/// Process status for fatal protocol violations by the directory primitive.
pub const EXIT_PROTOCOL: i32 = 3;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Fatal errors: the run cannot meaningfully continue after any of these.
#[derive(Debug, Error)]
pub enum LintError {
    /// Command line could not be parsed.
    #[error("RLUS: usage error: {reason}")]
    Usage { reason: String },

    /// The target path could not be opened read-only as a directory.
    #[error("RLOP: cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A read buffer of the requested size could not be allocated.
    #[error("RLAL: cannot allocate a {bufsize} byte read buffer")]
    BufferAllocation { bufsize: usize },

    /// The maximal buffer did not capture the whole directory in one read.
    #[error("RLTL: directory is too large (does not fit in {bufsize} bytes)")]
    DirectoryTooLarge { bufsize: usize },

    /// The raw directory read failed with something other than
    /// "buffer too small".
    #[error("RLRD: directory read on fd {fd} with {bufsize} byte buffer: {source}")]
    Read {
        fd: i32,
        bufsize: usize,
        #[source]
        source: io::Error,
    },

    /// Repositioning the descriptor failed.
    #[error("RLSK: seek({offset}) on fd {fd}: {source}")]
    Seek {
        fd: i32,
        offset: i64,
        #[source]
        source: io::Error,
    },

    /// Two streams over the same directory disagree on end-of-stream.
    #[error("RLEF: invalid EOF: {eof_a} {base_a} -- {eof_b} {base_b}")]
    EofMismatch {
        eof_a: bool,
        base_a: i64,
        eof_b: bool,
        base_b: i64,
    },

    /// No buffer size up to the maximal-entry ceiling delivered the entry
    /// at this position.
    #[error("RLMS: couldn't read entry at offset {offset} with buffers up to {ceiling} bytes")]
    NoSufficientBuffer { offset: i64, ceiling: usize },
}

impl LintError {
    /// Map the error to its process exit status.
    ///
    /// Usage errors and setup errors are distinguished from protocol
    /// violations so that scripts can tell "tool misconfigured" apart from
    /// "the filesystem under test is broken".
    pub fn exit_code(&self) -> i32 {
        match self {
            LintError::Usage { .. } => EXIT_USAGE,
            LintError::Open { .. }
            | LintError::BufferAllocation { .. }
            | LintError::DirectoryTooLarge { .. } => EXIT_SETUP,
            LintError::Read { .. }
            | LintError::Seek { .. }
            | LintError::EofMismatch { .. }
            | LintError::NoSufficientBuffer { .. } => EXIT_PROTOCOL,
        }
    }
}
