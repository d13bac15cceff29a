//! # Platform Capabilities and Raw Reader (`platform_module.rs`)
//!
//! Everything that differs between directory-entry ABIs lives here and is
//! resolved once at startup into a `PlatformCaps` value. The validator and
//! the comparator branch on that value instead of on `#[cfg]`, which also
//! lets the tests exercise both record layouts on any host.
//!
//! ## Record Layouts
//! ```text
//! LinuxDirent64 (getdents64):          BsdDirent (getdirentries):
//!   0  d_ino     u64                     0  d_fileno  u64
//!   8  d_off     i64                     8  d_off     i64
//!  16  d_reclen  u16                    16  d_reclen  u16
//!  18  d_type    u8                     18  d_type    u8
//!  19  d_name    NUL-terminated         19  d_pad0    u8
//!                                       20  d_namlen  u16
//!                                       22  d_pad1    u16
//!                                       24  d_name    d_namlen bytes + NUL
//! ```
//! Both layouts pad each record to a multiple of 8 bytes.
//!
//! ## Raw Reader
//! `RawDirReader` is the seam between this tool and the primitive under
//! test. `OsDirHandle` is the real one; tests plug in a scripted reader.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ============================================================================
// CONSTANTS: BUFFER SIZES
// ============================================================================

/// Reference buffer size. A directory must fit into one read of this size.
pub const DIRSIZE_MAX: usize = 1024 * 1024;

/// Page-aligned candidate buffer size.
pub const DIRSIZE_PAGE: usize = 4096;

/// Block-aligned candidate buffer size.
pub const DIRSIZE_BLOCK: usize = 512;

/// Increment used while probing for the minimal buffer size.
pub const PROBE_STEP: usize = 4;

/// Longest name a directory entry may carry (`MAXNAMLEN`).
pub const MAX_NAME_LEN: usize = 255;

/// Records are padded to this boundary on every supported layout.
const RECORD_ALIGN: usize = 8;

// ============================================================================
// RECORD HEADERS
// ============================================================================

/// Fixed part of a `linux_dirent64` record.
#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[repr(C, packed)]
pub struct LinuxDirentHeader {
    pub d_ino: u64,
    pub d_off: i64,
    pub d_reclen: u16,
    pub d_type: u8,
}

/// Fixed part of a BSD `struct dirent` record (FreeBSD 12+ ABI).
#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct BsdDirentHeader {
    pub d_fileno: u64,
    pub d_off: i64,
    pub d_reclen: u16,
    pub d_type: u8,
    pub d_pad0: u8,
    pub d_namlen: u16,
    pub d_pad1: u16,
}

/// Layout-independent view of a record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub fileno: u64,
    pub resume_offset: i64,
    pub record_len: u16,
    pub entry_type: u8,
    /// Explicit name length, only on layouts that carry one.
    pub name_len: Option<u16>,
}

/// On-wire format of the records the raw reader produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLayout {
    LinuxDirent64,
    BsdDirent,
}

impl RecordLayout {
    /// Bytes preceding the name.
    pub fn header_size(self) -> usize {
        match self {
            RecordLayout::LinuxDirent64 => std::mem::size_of::<LinuxDirentHeader>(),
            RecordLayout::BsdDirent => std::mem::size_of::<BsdDirentHeader>(),
        }
    }

    /// Decode the header at the start of `bytes`.
    ///
    /// # Returns
    /// `None` if fewer than `header_size()` bytes are available.
    pub fn decode_header(self, bytes: &[u8]) -> Option<RecordHeader> {
        match self {
            RecordLayout::LinuxDirent64 => {
                let raw = LinuxDirentHeader::read_from_prefix(bytes)?;
                Some(RecordHeader {
                    fileno: raw.d_ino,
                    resume_offset: raw.d_off,
                    record_len: raw.d_reclen,
                    entry_type: raw.d_type,
                    name_len: None,
                })
            }
            RecordLayout::BsdDirent => {
                let raw = BsdDirentHeader::read_from_prefix(bytes)?;
                Some(RecordHeader {
                    fileno: raw.d_fileno,
                    resume_offset: raw.d_off,
                    record_len: raw.d_reclen,
                    entry_type: raw.d_type,
                    name_len: Some(raw.d_namlen),
                })
            }
        }
    }

    /// Size of a well-formed record holding a name of `name_len` bytes.
    pub fn record_size(self, name_len: usize) -> usize {
        round_up(self.header_size() + name_len + 1, RECORD_ALIGN)
    }
}

fn round_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

// ============================================================================
// CAPABILITY DESCRIPTOR
// ============================================================================

/// What the directory primitive of the target platform provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformCaps {
    /// On-wire record format of the raw read primitive.
    pub layout: RecordLayout,
    /// `d_off` is a meaningful resume cursor.
    pub has_resume_offset: bool,
    /// Identifiers are stable enough to compare between two readers.
    pub compares_fileno: bool,
    /// Longest name an entry may carry (`MAXNAMLEN`).
    pub max_name_len: usize,
}

impl PlatformCaps {
    /// Capabilities of `getdents64`.
    pub fn linux() -> Self {
        PlatformCaps {
            layout: RecordLayout::LinuxDirent64,
            has_resume_offset: true,
            compares_fileno: true,
            max_name_len: MAX_NAME_LEN,
        }
    }

    /// Capabilities of BSD `getdirentries`.
    pub fn bsd() -> Self {
        PlatformCaps {
            layout: RecordLayout::BsdDirent,
            has_resume_offset: true,
            compares_fileno: true,
            max_name_len: MAX_NAME_LEN,
        }
    }

    /// Capabilities of the host this binary was built for.
    pub fn native() -> Self {
        if cfg!(any(target_os = "linux", target_os = "android")) {
            Self::linux()
        } else {
            Self::bsd()
        }
    }

    /// Fixed record header size of the platform layout.
    pub fn header_size(&self) -> usize {
        self.layout.header_size()
    }

    /// Size of one maximal entry record (`sizeof(struct dirent)`).
    pub fn entry_size(&self) -> usize {
        self.layout.record_size(self.max_name_len)
    }

    /// Smallest buffer that could theoretically hold one entry: the fixed
    /// header plus a few name bytes.
    pub fn min_probe_size(&self) -> usize {
        self.entry_size() - (self.max_name_len + 1) + PROBE_STEP
    }
}

// ============================================================================
// RAW READER
// ============================================================================

/// Result of one raw directory read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRead {
    /// Byte count reported by the primitive. May exceed the buffer length
    /// when the primitive misbehaves; callers must not trust it blindly.
    pub bytes: usize,
    /// Implementation-defined cursor reported alongside the read.
    pub base: i64,
}

/// The directory-enumeration primitive under test.
pub trait RawDirReader {
    /// Fill `buf` with consecutive records. `bytes == 0` means end of
    /// directory (or, while probing, possibly "buffer too small").
    fn read_entries(&mut self, buf: &mut [u8]) -> io::Result<RawRead>;

    /// Reposition to an absolute offset, usually a previously seen `d_off`.
    fn seek(&mut self, offset: i64) -> io::Result<i64>;

    /// Current raw position of the descriptor.
    fn tell(&mut self) -> io::Result<i64>;

    /// Descriptor number, for diagnostics only.
    fn descriptor(&self) -> i32;
}

/// Whether a read error means "the buffer cannot hold the next entry".
pub fn is_buffer_too_small(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINVAL)
}

/// Read-only directory descriptor, closed on drop.
#[derive(Debug)]
pub struct OsDirHandle {
    fd: libc::c_int,
}

impl OsDirHandle {
    /// Open `path` read-only as a directory.
    pub fn open(path: &Path) -> io::Result<Self> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))?;
        let flags = libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC;
        // SAFETY: `c_path` is NUL-terminated and outlives the call.
        let fd = unsafe { libc::open(c_path.as_ptr(), flags) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(OsDirHandle { fd })
    }

    fn lseek(&self, offset: i64, whence: libc::c_int) -> io::Result<i64> {
        let offset = libc::off_t::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
        // SAFETY: `self.fd` is an open descriptor owned by `self`.
        let rv = unsafe { libc::lseek(self.fd, offset, whence) };
        if rv < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(i64::from(rv))
    }
}

impl RawDirReader for OsDirHandle {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn read_entries(&mut self, buf: &mut [u8]) -> io::Result<RawRead> {
        // getdents64 reports no base cursor; sample the position instead.
        let base = self.tell()?;
        // SAFETY: pointer and length come from a live `&mut [u8]`, so the
        // kernel writes at most `buf.len()` bytes into memory we own; the
        // descriptor is owned by `self`.
        let rv = unsafe {
            libc::syscall(
                libc::SYS_getdents64,
                self.fd,
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
            )
        };
        if rv < 0 {
            return Err(io::Error::last_os_error());
        }
        let bytes = usize::try_from(rv)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "byte count out of range"))?;
        Ok(RawRead { bytes, base })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn read_entries(&mut self, _buf: &mut [u8]) -> io::Result<RawRead> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "no raw directory read primitive on this target",
        ))
    }

    fn seek(&mut self, offset: i64) -> io::Result<i64> {
        self.lseek(offset, libc::SEEK_SET)
    }

    fn tell(&mut self) -> io::Result<i64> {
        self.lseek(0, libc::SEEK_CUR)
    }

    fn descriptor(&self) -> i32 {
        self.fd
    }
}

impl Drop for OsDirHandle {
    fn drop(&mut self) {
        // SAFETY: `self.fd` is owned by `self` and closed exactly once here.
        unsafe { libc::close(self.fd) };
    }
}
