//! VFS error types.
//!
//! Every failure maps onto a fixed numeric code from the WASI errno table.
//! The engine inspects these numbers directly, so the values in [`Errno`]
//! must never change.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric error conditions understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
#[repr(i32)]
pub enum Errno {
    Acces = 2,
    Badf = 8,
    Busy = 10,
    Exist = 20,
    Fbig = 22,
    Inval = 28,
    Io = 29,
    Isdir = 31,
    Loop = 32,
    Mfile = 33,
    Nodev = 43,
    Noent = 44,
    Nosys = 52,
    Notdir = 54,
    Notempty = 55,
    Nxio = 60,
    Perm = 63,
    Rofs = 69,
    Spipe = 70,
    Xdev = 75,
}

impl Errno {
    const ALL: [Errno; 20] = [
        Errno::Acces,
        Errno::Badf,
        Errno::Busy,
        Errno::Exist,
        Errno::Fbig,
        Errno::Inval,
        Errno::Io,
        Errno::Isdir,
        Errno::Loop,
        Errno::Mfile,
        Errno::Nodev,
        Errno::Noent,
        Errno::Nosys,
        Errno::Notdir,
        Errno::Notempty,
        Errno::Nxio,
        Errno::Perm,
        Errno::Rofs,
        Errno::Spipe,
        Errno::Xdev,
    ];

    /// The raw code handed to the engine.
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Look up a condition by its raw code.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.code() == code)
    }
}

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("no such file or directory: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("file exists: {0}")]
    AlreadyExists(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected something other than a directory.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Mode bits forbid the access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The node kind does not allow the operation.
    #[error("operation not permitted: {0}")]
    NotPermitted(String),

    /// Write through a read-only mount.
    #[error("read-only file system: {0}")]
    ReadOnly(String),

    /// Root or mountpoint in use.
    #[error("resource busy: {0}")]
    Busy(String),

    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Symlink resolution exceeded its depth limit.
    #[error("too many levels of symbolic links")]
    TooManySymlinks,

    /// Write or truncate past the maximum file size.
    #[error("file too large: {0}")]
    FileTooLarge(String),

    /// Descriptor pool exhausted.
    #[error("too many open files")]
    TooManyOpenFiles,

    /// Descriptor not open, or not open for this access.
    #[error("bad file descriptor: {0}")]
    BadDescriptor(u32),

    /// Rename across mounts.
    #[error("cross-device link")]
    CrossDeviceLink,

    /// Seek on a stream that cannot seek.
    #[error("illegal seek")]
    IllegalSeek,

    /// No device registered for a device node.
    #[error("no such device: {0}")]
    NoDevice(String),

    /// Operation not implemented for this node.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// Backing fetch or device failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a Busy error.
    pub fn busy(path: impl Into<String>) -> Self {
        Self::Busy(path.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an Io error.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// The numeric condition this error reports to the engine.
    pub fn errno(&self) -> Errno {
        match self {
            VfsError::NotFound(_) => Errno::Noent,
            VfsError::AlreadyExists(_) => Errno::Exist,
            VfsError::NotADirectory(_) => Errno::Notdir,
            VfsError::IsADirectory(_) => Errno::Isdir,
            VfsError::DirectoryNotEmpty(_) => Errno::Notempty,
            VfsError::PermissionDenied(_) => Errno::Acces,
            VfsError::NotPermitted(_) => Errno::Perm,
            VfsError::ReadOnly(_) => Errno::Rofs,
            VfsError::Busy(_) => Errno::Busy,
            VfsError::InvalidArgument(_) => Errno::Inval,
            VfsError::TooManySymlinks => Errno::Loop,
            VfsError::FileTooLarge(_) => Errno::Fbig,
            VfsError::TooManyOpenFiles => Errno::Mfile,
            VfsError::BadDescriptor(_) => Errno::Badf,
            VfsError::CrossDeviceLink => Errno::Xdev,
            VfsError::IllegalSeek => Errno::Spipe,
            VfsError::NoDevice(_) => Errno::Nodev,
            VfsError::Unsupported(_) => Errno::Nosys,
            VfsError::Io(_) => Errno::Io,
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Errno::Noent.code(), 44);
        assert_eq!(Errno::Notdir.code(), 54);
        assert_eq!(Errno::Exist.code(), 20);
        assert_eq!(Errno::Nosys.code(), 52);
        assert_eq!(Errno::Loop.code(), 32);
        assert_eq!(Errno::Notempty.code(), 55);
        assert_eq!(Errno::Acces.code(), 2);
        assert_eq!(Errno::Mfile.code(), 33);
    }

    #[test]
    fn test_from_code() {
        assert_eq!(Errno::from_code(44), Some(Errno::Noent));
        assert_eq!(Errno::from_code(75), Some(Errno::Xdev));
        assert_eq!(Errno::from_code(1), None);
    }

    #[test]
    fn test_error_maps_to_errno() {
        assert_eq!(VfsError::not_found("/x").errno(), Errno::Noent);
        assert_eq!(VfsError::TooManySymlinks.errno(), Errno::Loop);
        assert_eq!(VfsError::directory_not_empty("/a").errno(), Errno::Notempty);
        assert_eq!(VfsError::BadDescriptor(9).errno(), Errno::Badf);
        assert_eq!(VfsError::FileTooLarge("/f".into()).errno().code(), 22);
    }

    #[test]
    fn test_display() {
        assert_eq!(Errno::Noent.to_string(), "NOENT");
        assert_eq!(
            VfsError::not_found("/work/a.tex").to_string(),
            "no such file or directory: /work/a.tex"
        );
    }
}
