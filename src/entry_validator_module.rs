//! # Entry Validator (`entry_validator_module.rs`)
//!
//! Walks one freshly filled read buffer record by record and checks what
//! the kernel handed back. The buffer is treated as untrusted input: every
//! declared record length is checked against the bytes that remain before
//! the cursor steps, so a corrupt `d_reclen` can never move parsing outside
//! the window.
//!
//! ## What Is Checked (per entry, in buffer order)
//! - record length is large enough to hold a header and inside the window
//! - the name is NUL-terminated inside its record (fixed in place if not)
//! - the name length is within `MAXNAMLEN` and within the record
//! - zero `d_fileno` and zero `d_off`
//! - the last record's `d_off` equals the descriptor position after the read
//! - the reported byte count does not exceed the buffer
//!
//! ## Recovery
//! Nothing in here is fatal. A record that cannot even be stepped over ends
//! the window at that point; the valid prefix is kept. A record that only
//! overruns the window end is clamped to it and kept. Every recovery is
//! reported through `Diagnostics`.

use std::borrow::Cow;

use log::trace;

use crate::diagnostics_module::{AnomalyKind, Diagnostics};
use crate::platform_module::{PlatformCaps, RecordLayout};

// ============================================================================
// RECORD CURSOR
// ============================================================================

/// Byte span `[start, start + len)` of one record inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSpan {
    pub start: usize,
    pub len: usize,
}

impl RecordSpan {
    /// One past the last byte of the record.
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// One step of the record cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStep {
    /// A record that lies entirely inside the window.
    Record(RecordSpan),
    /// A record whose declared length runs past the window end; the span
    /// is clamped to the window.
    Clamped {
        span: RecordSpan,
        declared_len: usize,
    },
    /// The record at `start` cannot be stepped over (header cut off, or a
    /// length too small to hold a header and a name byte). The cursor stops.
    Invalid {
        start: usize,
        declared_len: Option<usize>,
    },
    /// No further entries in this window.
    EndOfWindow,
}

/// Forward-only cursor over the records of one window.
#[derive(Debug, Clone)]
pub struct RecordCursor {
    layout: RecordLayout,
    window_len: usize,
    position: usize,
}

impl RecordCursor {
    pub fn new(layout: RecordLayout, window_len: usize) -> Self {
        RecordCursor {
            layout,
            window_len,
            position: 0,
        }
    }

    /// Advance over the next record of `window[..window_len]`.
    pub fn step(&mut self, window: &[u8]) -> CursorStep {
        let window_len = self.window_len.min(window.len());
        if self.position >= window_len {
            return CursorStep::EndOfWindow;
        }

        let start = self.position;
        let remaining = window_len - start;
        let header = match self.layout.decode_header(&window[start..window_len]) {
            Some(header) => header,
            None => {
                self.position = window_len;
                return CursorStep::Invalid {
                    start,
                    declared_len: None,
                };
            }
        };

        let declared_len = usize::from(header.record_len);
        if declared_len <= self.layout.header_size() {
            self.position = window_len;
            return CursorStep::Invalid {
                start,
                declared_len: Some(declared_len),
            };
        }

        if declared_len > remaining {
            self.position = window_len;
            if remaining <= self.layout.header_size() {
                return CursorStep::Invalid {
                    start,
                    declared_len: Some(declared_len),
                };
            }
            return CursorStep::Clamped {
                span: RecordSpan {
                    start,
                    len: remaining,
                },
                declared_len,
            };
        }

        self.position = start + declared_len;

        #[cfg(all(debug_assertions, not(test)))]
        debug_assert!(
            self.position > start && self.position <= window_len,
            "RecordCursor must advance and stay inside the window"
        );

        CursorStep::Record(RecordSpan {
            start,
            len: declared_len,
        })
    }
}

// ============================================================================
// ENTRY VIEW
// ============================================================================

/// Borrowed view of one directory entry; lives as long as its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntryView<'a> {
    /// Name bytes without the terminator. Not necessarily UTF-8.
    pub name: &'a [u8],
    /// `d_ino` / `d_fileno`.
    pub fileno: u64,
    /// `d_off`: seek here to continue right after this entry.
    pub resume_offset: i64,
    /// `d_reclen` as declared by the kernel, even when clamped.
    pub record_len: u16,
    /// `d_type` (`DT_DIR`, `DT_REG`, ...).
    pub entry_type: u8,
}

impl<'a> DirEntryView<'a> {
    /// Decode the entry occupying `span` of `window`.
    ///
    /// Expects a span produced by `RecordCursor` (at least one byte past
    /// the header). The name stops at the first NUL inside the record, and
    /// on layouts with an explicit length also at that length.
    pub fn parse(layout: RecordLayout, window: &'a [u8], span: RecordSpan) -> Option<Self> {
        let record = window.get(span.start..span.end())?;
        let header = layout.decode_header(record)?;
        let name_area = record.get(layout.header_size()..)?;
        let mut name_len = name_area
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(name_area.len());
        if let Some(explicit) = header.name_len {
            name_len = name_len.min(usize::from(explicit));
        }
        Some(DirEntryView {
            name: &name_area[..name_len],
            fileno: header.fileno,
            resume_offset: header.resume_offset,
            record_len: header.record_len,
            entry_type: header.entry_type,
        })
    }

    /// Name for display; invalid UTF-8 is replaced, never rejected.
    pub fn display_name(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.name)
    }
}

// ============================================================================
// WINDOW VALIDATION
// ============================================================================

/// Outcome of validating one window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedWindow {
    /// Records that callers may read, in buffer order.
    pub spans: Vec<RecordSpan>,
    /// Bytes of the buffer that belong to this window.
    pub len: usize,
    /// Whether parsing stopped early or clamped a record.
    pub truncated: bool,
}

/// Inputs describing the read that produced a window.
#[derive(Debug, Clone, Copy)]
pub struct ReadContext {
    /// Byte count the primitive reported.
    pub reported_len: usize,
    /// Buffer size the primitive was asked to fill.
    pub bufsize: usize,
    /// Descriptor position right after the read, if known.
    pub seek_position: Option<i64>,
}

/// Validate every entry of a freshly filled buffer.
///
/// Anomalies are reported to `diag`; the buffer may be modified in place
/// to terminate unterminated names.
///
/// # Arguments
/// * `caps` - Record layout and which fields are meaningful
/// * `buffer` - The whole read buffer; only `min(reported_len, len)` bytes
///   are considered part of the window
/// * `read` - Byte count, requested size and post-read position
/// * `diag` - Diagnostics context receiving reports
pub fn validate_window(
    caps: &PlatformCaps,
    buffer: &mut [u8],
    read: ReadContext,
    diag: &mut Diagnostics,
) -> ValidatedWindow {
    if read.reported_len > read.bufsize || read.reported_len > buffer.len() {
        diag.report(
            AnomalyKind::BufferOverflow,
            format_args!(
                "read returned {} bytes into a {} byte buffer",
                read.reported_len, read.bufsize
            ),
        );
    }
    let window_len = read.reported_len.min(buffer.len()).min(read.bufsize);

    let mut window = ValidatedWindow {
        spans: Vec::new(),
        len: window_len,
        truncated: false,
    };
    let mut cursor = RecordCursor::new(caps.layout, window_len);

    loop {
        match cursor.step(buffer) {
            CursorStep::Record(span) => {
                check_entry(caps, buffer, span, diag);
                window.spans.push(span);
            }
            CursorStep::Clamped { span, declared_len } => {
                diag.report(
                    AnomalyKind::InvalidEntrySize,
                    format_args!(
                        "record at {} declares {} bytes, only {} left in window",
                        span.start, declared_len, span.len
                    ),
                );
                check_entry(caps, buffer, span, diag);
                window.spans.push(span);
                window.truncated = true;
            }
            CursorStep::Invalid {
                start,
                declared_len,
            } => {
                match declared_len {
                    Some(declared) => diag.report(
                        AnomalyKind::InvalidEntrySize,
                        format_args!("record at {} declares {} bytes", start, declared),
                    ),
                    None => diag.report(
                        AnomalyKind::InvalidEntrySize,
                        format_args!(
                            "record header at {} cut off by window end {}",
                            start, window_len
                        ),
                    ),
                };
                window.truncated = true;
            }
            CursorStep::EndOfWindow => break,
        }
    }

    if !window.truncated {
        check_terminal_offset(caps, buffer, &window, read, diag);
    }

    window
}

/// Name, identifier and offset checks for one record.
fn check_entry(caps: &PlatformCaps, buffer: &mut [u8], span: RecordSpan, diag: &mut Diagnostics) {
    let layout = caps.layout;
    let header_size = layout.header_size();
    let Some(header) = layout.decode_header(&buffer[span.start..span.end()]) else {
        return;
    };
    let name_start = span.start + header_size;
    let record_end = span.end();

    // Position of the byte that must be NUL.
    let terminator = match header.name_len {
        Some(explicit) => {
            let explicit = usize::from(explicit);
            let room = record_end - name_start - 1;
            if explicit > caps.max_name_len || explicit > room {
                diag.report(
                    AnomalyKind::NameTooLong,
                    format_args!(
                        "name length {} in a {} byte record at {}",
                        explicit, span.len, span.start
                    ),
                );
            }
            name_start + explicit.min(room)
        }
        None => match buffer[name_start..record_end].iter().position(|b| *b == 0) {
            Some(found) => {
                if found > caps.max_name_len {
                    diag.report(
                        AnomalyKind::NameTooLong,
                        format_args!("name length {} in record at {}", found, span.start),
                    );
                }
                name_start + found
            }
            None => {
                let forced = record_end - 1 - name_start;
                if forced > caps.max_name_len {
                    diag.report(
                        AnomalyKind::NameTooLong,
                        format_args!("name length {} in record at {}", forced, span.start),
                    );
                }
                record_end - 1
            }
        },
    };

    if buffer[terminator] != 0 {
        buffer[terminator] = 0;
        let name = String::from_utf8_lossy(&buffer[name_start..terminator]);
        diag.report(
            AnomalyKind::UnterminatedName,
            format_args!("record at {}: {}", span.start, name),
        );
    }

    let Some(entry) = DirEntryView::parse(layout, buffer, span) else {
        return;
    };
    if entry.fileno == 0 {
        diag.report(
            AnomalyKind::ZeroFileno,
            format_args!("{:08x} {}", entry.resume_offset, entry.display_name()),
        );
    }
    if caps.has_resume_offset && entry.resume_offset == 0 {
        diag.report(
            AnomalyKind::ZeroResumeOffset,
            format_args!("{}", entry.display_name()),
        );
    }
}

/// The last record's resume offset must be where the descriptor now is.
///
/// Entries with a zero identifier are informational only and do not take
/// part in this check.
fn check_terminal_offset(
    caps: &PlatformCaps,
    buffer: &[u8],
    window: &ValidatedWindow,
    read: ReadContext,
    diag: &mut Diagnostics,
) {
    if !caps.has_resume_offset {
        return;
    }
    let (Some(position), Some(last)) = (read.seek_position, window.spans.last()) else {
        return;
    };
    let Some(entry) = DirEntryView::parse(caps.layout, buffer, *last) else {
        return;
    };
    if entry.fileno == 0 {
        trace!("skipping offset check for zero d_fileno entry {}", entry.display_name());
        return;
    }
    if entry.resume_offset != position {
        diag.report(
            AnomalyKind::ResumeOffsetMismatch,
            format_args!(
                "Directory({}) and last entry offsets mismatch: {} -- {}",
                read.bufsize, position, entry.resume_offset
            ),
        );
    }
}
