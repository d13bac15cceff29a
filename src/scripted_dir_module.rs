//! # Scripted Directory (`scripted_dir_module.rs`, test builds only)
//!
//! In-memory stand-in for the raw directory primitive. It serves a fixed
//! entry list with `getdents64` semantics:
//! - records are packed until the next one does not fit,
//! - a read that cannot fit even the first record fails with `EINVAL`
//!   (or returns 0 when emulating BSD),
//! - `d_off` of entry `i` is the cookie `i + 1`, and seeking to a cookie
//!   resumes right after that entry.
//!
//! `ScriptFaults` injects the kernel bugs the tool is meant to catch.

use std::io;

use zerocopy::AsBytes;

use crate::dir_stream_module::DirOpener;
use crate::lint_error_module::LintError;
use crate::platform_module::{
    BsdDirentHeader, LinuxDirentHeader, RawDirReader, RawRead, RecordLayout,
};

/// `DT_DIR`
const TYPE_DIR: u8 = 4;
/// `DT_REG`
const TYPE_REG: u8 = 8;

/// One directory entry of the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptEntry {
    pub name: Vec<u8>,
    pub fileno: u64,
    pub entry_type: u8,
}

impl ScriptEntry {
    pub fn new(name: &[u8], fileno: u64) -> Self {
        let entry_type = if name == b"." || name == b".." {
            TYPE_DIR
        } else {
            TYPE_REG
        };
        ScriptEntry {
            name: name.to_vec(),
            fileno,
            entry_type,
        }
    }
}

/// `.`, `..` and then `names`, with identifiers 2, 3, 4, ...
pub fn entries_with_dots(names: &[&str]) -> Vec<ScriptEntry> {
    [".", ".."]
        .iter()
        .chain(names.iter())
        .enumerate()
        .map(|(index, name)| ScriptEntry::new(name.as_bytes(), index as u64 + 2))
        .collect()
}

/// Serialize one record in `layout`, padded to its aligned size.
pub fn encode_record(layout: RecordLayout, entry: &ScriptEntry, resume_offset: i64) -> Vec<u8> {
    let size = layout.record_size(entry.name.len());
    let reclen = u16::try_from(size).unwrap_or(u16::MAX);
    let mut record = match layout {
        RecordLayout::LinuxDirent64 => LinuxDirentHeader {
            d_ino: entry.fileno,
            d_off: resume_offset,
            d_reclen: reclen,
            d_type: entry.entry_type,
        }
        .as_bytes()
        .to_vec(),
        RecordLayout::BsdDirent => BsdDirentHeader {
            d_fileno: entry.fileno,
            d_off: resume_offset,
            d_reclen: reclen,
            d_type: entry.entry_type,
            d_pad0: 0,
            d_namlen: u16::try_from(entry.name.len()).unwrap_or(u16::MAX),
            d_pad1: 0,
        }
        .as_bytes()
        .to_vec(),
    };
    record.extend_from_slice(&entry.name);
    record.resize(size, 0);
    record
}

/// Kernel misbehaviour to inject.
#[derive(Debug, Clone, Default)]
pub struct ScriptFaults {
    /// Added to the byte count of every non-empty read.
    pub overreport_bytes: usize,
    /// A too-small read still advances the position by one entry.
    pub drift_on_too_small: bool,
    /// The last record of every window carries a wrong `d_off`.
    pub wrong_terminal_offset: bool,
    /// The record of this entry index is written with `d_reclen == 0`.
    pub zero_reclen_at: Option<usize>,
    /// Entries at or after this index are never delivered: reads there
    /// report end of directory.
    pub stop_at: Option<usize>,
}

/// Scripted raw reader.
#[derive(Debug, Clone)]
pub struct ScriptedDir {
    layout: RecordLayout,
    entries: Vec<ScriptEntry>,
    position: usize,
    /// Emulate BSD: a too-small buffer yields 0 bytes instead of `EINVAL`.
    zero_when_too_small: bool,
    pub faults: ScriptFaults,
}

impl ScriptedDir {
    pub fn new(layout: RecordLayout, entries: Vec<ScriptEntry>) -> Self {
        ScriptedDir {
            layout,
            entries,
            position: 0,
            zero_when_too_small: layout == RecordLayout::BsdDirent,
            faults: ScriptFaults::default(),
        }
    }

    pub fn with_faults(mut self, faults: ScriptFaults) -> Self {
        self.faults = faults;
        self
    }

    fn visible_len(&self) -> usize {
        self.faults
            .stop_at
            .map_or(self.entries.len(), |stop| stop.min(self.entries.len()))
    }

    fn cookie_after(index: usize) -> i64 {
        index as i64 + 1
    }
}

impl RawDirReader for ScriptedDir {
    fn read_entries(&mut self, buf: &mut [u8]) -> io::Result<RawRead> {
        let base = self.position as i64;
        let visible = self.visible_len();

        let mut written = 0;
        let mut index = self.position;
        let mut last_start = None;
        while index < visible {
            let record = encode_record(
                self.layout,
                &self.entries[index],
                Self::cookie_after(index),
            );
            if written + record.len() > buf.len() {
                break;
            }
            buf[written..written + record.len()].copy_from_slice(&record);
            if self.faults.zero_reclen_at == Some(index) {
                buf[written + 16] = 0;
                buf[written + 17] = 0;
            }
            last_start = Some(written);
            written += record.len();
            index += 1;
        }

        if written == 0 && self.position < visible {
            if self.faults.drift_on_too_small {
                self.position += 1;
            }
            if self.zero_when_too_small {
                return Ok(RawRead { bytes: 0, base });
            }
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }

        if let (true, Some(start)) = (self.faults.wrong_terminal_offset, last_start) {
            let bogus = Self::cookie_after(index - 1) + 100;
            buf[start + 8..start + 16].copy_from_slice(&bogus.to_ne_bytes());
        }

        self.position = index;
        let bytes = if written > 0 {
            written + self.faults.overreport_bytes
        } else {
            0
        };
        Ok(RawRead { bytes, base })
    }

    fn seek(&mut self, offset: i64) -> io::Result<i64> {
        if offset < 0 {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        self.position = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(self.entries.len());
        Ok(self.position as i64)
    }

    fn tell(&mut self) -> io::Result<i64> {
        Ok(self.position as i64)
    }

    fn descriptor(&self) -> i32 {
        -1
    }
}

impl DirOpener for ScriptedDir {
    type Reader = ScriptedDir;

    fn open_reader(&self) -> Result<ScriptedDir, LintError> {
        let mut fresh = self.clone();
        fresh.position = 0;
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_packs_records_until_buffer_is_full() {
        let mut dir = ScriptedDir::new(
            RecordLayout::LinuxDirent64,
            entries_with_dots(&["a", "bb", "ccc"]),
        );
        let mut buf = vec![0u8; 60];

        let read = dir.read_entries(&mut buf).expect("read");
        assert_eq!(read.bytes, 48);
        assert_eq!(read.base, 0);
        assert_eq!(dir.tell().expect("tell"), 2);
    }

    #[test]
    fn test_too_small_is_einval_on_linux_and_zero_on_bsd() {
        let mut linux = ScriptedDir::new(RecordLayout::LinuxDirent64, entries_with_dots(&[]));
        let err = linux.read_entries(&mut [0u8; 10]).expect_err("too small");
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));

        let mut bsd = ScriptedDir::new(RecordLayout::BsdDirent, entries_with_dots(&[]));
        let read = bsd.read_entries(&mut [0u8; 10]).expect("zero read");
        assert_eq!(read.bytes, 0);
        assert_eq!(bsd.tell().expect("tell"), 0);
    }

    #[test]
    fn test_seek_to_cookie_resumes_after_entry() {
        let mut dir = ScriptedDir::new(
            RecordLayout::LinuxDirent64,
            entries_with_dots(&["a", "bb", "ccc"]),
        );
        dir.seek(4).expect("seek");
        let mut buf = vec![0u8; 280];
        let read = dir.read_entries(&mut buf).expect("read");
        assert_eq!(read.bytes, 24);
        assert_eq!(&buf[19..22], b"ccc");
    }

    #[test]
    fn test_end_of_directory_reads_zero() {
        let mut dir = ScriptedDir::new(RecordLayout::LinuxDirent64, entries_with_dots(&[]));
        let mut buf = vec![0u8; 4096];
        assert_eq!(dir.read_entries(&mut buf).expect("read").bytes, 48);
        assert_eq!(dir.read_entries(&mut buf).expect("read").bytes, 0);
        assert_eq!(dir.read_entries(&mut buf).expect("read").bytes, 0);
    }
}
