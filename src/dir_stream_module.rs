//! # Directory Stream (`dir_stream_module.rs`)
//!
//! One open directory, one read buffer, one cursor. A stream turns the raw
//! "fill a buffer with records" primitive into a forward-only sequence of
//! entries, validating every window as soon as it is read.
//!
//! ## State
//! - `window`: validated record spans of the last successful read
//! - `cursor`: index into `window.spans`; `None` before the first read,
//!   after a reset, and at end of stream
//! - `eof`: set only when a read returns zero bytes
//! - `base`: cursor value reported alongside the last read
//!
//! Two streams never share a descriptor or a buffer; each owns both for its
//! whole lifetime and releases them on drop.

use std::path::{Path, PathBuf};

use log::trace;

use crate::diagnostics_module::{AnomalyKind, Diagnostics};
use crate::entry_validator_module::{DirEntryView, ReadContext, ValidatedWindow, validate_window};
use crate::lint_error_module::LintError;
use crate::platform_module::{OsDirHandle, PlatformCaps, RawDirReader, is_buffer_too_small};

// ============================================================================
// OPENING
// ============================================================================

/// Source of fresh, independent readers over the same directory.
///
/// The orchestrator opens one reference and several candidate streams;
/// each needs its own descriptor positioned at the start.
pub trait DirOpener {
    type Reader: RawDirReader;

    fn open_reader(&self) -> Result<Self::Reader, LintError>;
}

/// Opens the directory at a filesystem path through the OS.
#[derive(Debug, Clone)]
pub struct PathOpener {
    path: PathBuf,
}

impl PathOpener {
    pub fn new(path: &Path) -> Self {
        PathOpener {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DirOpener for PathOpener {
    type Reader = OsDirHandle;

    fn open_reader(&self) -> Result<OsDirHandle, LintError> {
        OsDirHandle::open(&self.path).map_err(|source| LintError::Open {
            path: self.path.clone(),
            source,
        })
    }
}

// ============================================================================
// READ OUTCOMES
// ============================================================================

/// How a read error is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Every read error is fatal.
    Strict,
    /// "Buffer too small" is an expected answer while searching for the
    /// minimal buffer size.
    Probe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// The read delivered this many bytes (as reported by the primitive).
    Filled(usize),
    EndOfStream,
    /// Only in `FillMode::Probe`: the buffer cannot hold the next entry.
    BufferTooSmall,
}

// ============================================================================
// DIRECTORY STREAM
// ============================================================================

pub struct DirStream<R: RawDirReader> {
    reader: R,
    caps: PlatformCaps,
    buffer: Vec<u8>,
    bufsize: usize,
    window: ValidatedWindow,
    cursor: Option<usize>,
    base: i64,
    eof: bool,
    verbosity: u8,
}

impl<R: RawDirReader> DirStream<R> {
    /// Open a fresh reader from `opener` (for the OS, `PathOpener` opens
    /// the path read-only) and allocate a `bufsize` byte read buffer.
    ///
    /// # Errors
    /// `LintError::Open` or `LintError::BufferAllocation`.
    pub fn open<O>(opener: &O, bufsize: usize, caps: PlatformCaps) -> Result<Self, LintError>
    where
        O: DirOpener<Reader = R>,
    {
        Self::with_reader(opener.open_reader()?, bufsize, caps)
    }

    /// Wrap an already open reader.
    ///
    /// # Errors
    /// `LintError::BufferAllocation` if the buffer cannot be allocated.
    pub fn with_reader(reader: R, bufsize: usize, caps: PlatformCaps) -> Result<Self, LintError> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(bufsize)
            .map_err(|_| LintError::BufferAllocation { bufsize })?;
        buffer.resize(bufsize, 0);

        Ok(DirStream {
            reader,
            caps,
            buffer,
            bufsize,
            window: ValidatedWindow::default(),
            cursor: None,
            base: 0,
            eof: false,
            verbosity: 0,
        })
    }

    /// Verbosity for per-read trace lines (printed at 3 and above).
    pub fn set_verbosity(&mut self, verbosity: u8) {
        self.verbosity = verbosity;
    }

    /// Change the size requested from the primitive on the next read.
    ///
    /// Only minimal-size probing does this. The backing allocation grows
    /// as needed and never shrinks.
    pub fn set_bufsize(&mut self, bufsize: usize) -> Result<(), LintError> {
        if bufsize > self.buffer.len() {
            self.buffer
                .try_reserve_exact(bufsize - self.buffer.len())
                .map_err(|_| LintError::BufferAllocation { bufsize })?;
            self.buffer.resize(bufsize, 0);
        }
        self.bufsize = bufsize;
        Ok(())
    }

    /// Size requested from the primitive on each read.
    pub fn bufsize(&self) -> usize {
        self.bufsize
    }

    /// Set once a read returned zero bytes; cleared by `seek_to`.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Descriptor position sampled before the last read.
    pub fn base(&self) -> i64 {
        self.base
    }

    /// Descriptor number of the underlying reader, for diagnostics.
    pub fn descriptor(&self) -> i32 {
        self.reader.descriptor()
    }

    /// Capabilities the stream validates and compares with.
    pub fn caps(&self) -> &PlatformCaps {
        &self.caps
    }

    /// Read the next window from the primitive and validate it.
    ///
    /// # Returns
    /// - `Filled(n)`: the cursor is on the first valid entry of the window
    ///   (or `None` if the window held no valid entry, which is reported)
    /// - `EndOfStream`: zero bytes; the stream is at end of stream
    /// - `BufferTooSmall`: probe mode only, nothing was consumed
    ///
    /// # Errors
    /// `LintError::Read` for any read failure not accepted by `mode`.
    pub fn fill(&mut self, mode: FillMode, diag: &mut Diagnostics) -> Result<FillOutcome, LintError> {
        let fd = self.descriptor();
        let bufsize = self.bufsize;

        let read = match self.reader.read_entries(&mut self.buffer[..bufsize]) {
            Ok(read) => read,
            Err(err) if mode == FillMode::Probe && is_buffer_too_small(&err) => {
                self.clear_window();
                return Ok(FillOutcome::BufferTooSmall);
            }
            Err(source) => return Err(LintError::Read { fd, bufsize, source }),
        };

        self.base = read.base;
        if self.verbosity >= 3 {
            trace!("dir_read {}: len={} base={}", fd, read.bytes, read.base);
        }

        if read.bytes == 0 {
            self.eof = true;
            self.clear_window();
            return Ok(FillOutcome::EndOfStream);
        }

        let seek_position = self.current_offset()?;
        let context = ReadContext {
            reported_len: read.bytes,
            bufsize,
            seek_position: Some(seek_position),
        };
        self.window = validate_window(&self.caps, &mut self.buffer[..bufsize], context, diag);

        if self.window.spans.is_empty() {
            diag.report(
                AnomalyKind::EmptyWindow,
                format_args!(
                    "read of {} bytes on fd {} ({} byte buffer) held no valid entry",
                    read.bytes, fd, bufsize
                ),
            );
            self.cursor = None;
        } else {
            self.cursor = Some(0);
        }

        Ok(FillOutcome::Filled(read.bytes))
    }

    /// Move to the next entry, reading a new window when this one is used up.
    ///
    /// # Returns
    /// The entry now under the cursor, or `None` at end of stream (or if a
    /// fresh window held no valid entry; `is_eof()` tells them apart).
    pub fn advance(&mut self, diag: &mut Diagnostics) -> Result<Option<DirEntryView<'_>>, LintError> {
        if self.eof {
            return Ok(None);
        }
        match self.cursor {
            Some(index) if index + 1 < self.window.spans.len() => {
                self.cursor = Some(index + 1);
            }
            _ => {
                self.fill(FillMode::Strict, diag)?;
            }
        }
        Ok(self.current())
    }

    /// Whether the current window holds entries past the cursor.
    pub fn has_next_in_window(&self) -> bool {
        self.cursor
            .is_some_and(|index| index + 1 < self.window.spans.len())
    }

    /// Entry under the cursor.
    pub fn current(&self) -> Option<DirEntryView<'_>> {
        let span = *self.window.spans.get(self.cursor?)?;
        DirEntryView::parse(self.caps.layout, &self.buffer, span)
    }

    /// Reposition the descriptor to `offset` and forget the current window.
    ///
    /// `seek_to(0)` restarts the stream; any other value is normally a
    /// `d_off` seen earlier on a stream over the same directory.
    pub fn seek_to(&mut self, offset: i64) -> Result<(), LintError> {
        let fd = self.descriptor();
        self.reader
            .seek(offset)
            .map_err(|source| LintError::Seek { fd, offset, source })?;
        self.clear_window();
        self.base = 0;
        self.eof = false;
        Ok(())
    }

    /// Raw descriptor position.
    pub fn current_offset(&mut self) -> Result<i64, LintError> {
        let fd = self.descriptor();
        self.reader
            .tell()
            .map_err(|source| LintError::Seek { fd, offset: 0, source })
    }

    /// Forget the window and end-of-stream flag without touching the
    /// descriptor, so the next read retries at the same position.
    pub fn discard_window(&mut self) {
        self.clear_window();
        self.eof = false;
    }

    fn clear_window(&mut self) {
        self.window = ValidatedWindow::default();
        self.cursor = None;
    }
}
