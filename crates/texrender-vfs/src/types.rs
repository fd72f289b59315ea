//! Core VFS types.
//!
//! Mode bits, open flags and stat records use the numeric layout the
//! engine was built against, so they can be handed across unchanged.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// File mode bits.
pub mod mode {
    pub const S_IFMT: u32 = 0o170000;
    pub const S_IFREG: u32 = 0o100000;
    pub const S_IFDIR: u32 = 0o040000;
    pub const S_IFLNK: u32 = 0o120000;
    pub const S_IFCHR: u32 = 0o020000;

    /// Permission bits (including setuid/setgid/sticky).
    pub const S_IALLUGO: u32 = 0o7777;
    /// rwx for user, group and other.
    pub const S_IRWXUGO: u32 = 0o777;

    pub const S_IRUGO: u32 = 0o444;
    pub const S_IWUGO: u32 = 0o222;
    pub const S_IXUGO: u32 = 0o111;
}

/// Open flag bits.
pub mod oflags {
    pub const O_RDONLY: i32 = 0;
    pub const O_WRONLY: i32 = 1;
    pub const O_RDWR: i32 = 2;
    pub const O_ACCMODE: i32 = 3;
    pub const O_CREAT: i32 = 0o100;
    pub const O_EXCL: i32 = 0o200;
    pub const O_TRUNC: i32 = 0o1000;
    pub const O_APPEND: i32 = 0o2000;
    pub const O_DIRECTORY: i32 = 0o200000;
    pub const O_NOFOLLOW: i32 = 0o400000;
}

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Character device.
    CharDevice,
}

impl FileType {
    /// Decode the type bits of a mode.
    pub fn from_mode(m: u32) -> Option<Self> {
        match m & mode::S_IFMT {
            mode::S_IFREG => Some(FileType::File),
            mode::S_IFDIR => Some(FileType::Directory),
            mode::S_IFLNK => Some(FileType::Symlink),
            mode::S_IFCHR => Some(FileType::CharDevice),
            _ => None,
        }
    }

    /// The `S_IF*` bits for this type.
    pub fn mode_bits(self) -> u32 {
        match self {
            FileType::File => mode::S_IFREG,
            FileType::Directory => mode::S_IFDIR,
            FileType::Symlink => mode::S_IFLNK,
            FileType::CharDevice => mode::S_IFCHR,
        }
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// Device number, split into major and minor halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    pub major: u32,
    pub minor: u32,
}

impl DeviceId {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Packed form reported in `st_rdev`.
    pub const fn encode(self) -> u64 {
        ((self.major as u64) << 8) | self.minor as u64
    }

    pub const fn decode(raw: u64) -> Self {
        Self {
            major: (raw >> 8) as u32,
            minor: (raw & 0xff) as u32,
        }
    }
}

/// Result of `stat`/`lstat`/`fstat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stat {
    /// Mount the node lives on.
    pub dev: u64,
    /// Node id.
    pub ino: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub blksize: u32,
    pub blocks: u64,
}

impl Stat {
    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_mode(self.mode)
    }

    pub fn is_file(&self) -> bool {
        self.mode & mode::S_IFMT == mode::S_IFREG
    }

    pub fn is_dir(&self) -> bool {
        self.mode & mode::S_IFMT == mode::S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & mode::S_IFMT == mode::S_IFLNK
    }

    /// Permission bits only.
    pub fn permissions(&self) -> u32 {
        self.mode & mode::S_IALLUGO
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: FileType,
}

/// Open file flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub truncate: bool,
    pub exclusive: bool,
    pub directory: bool,
    pub nofollow: bool,
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self {
            read: true,
            ..Default::default()
        }
    }

    /// Read/write access to an existing file.
    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Default::default()
        }
    }

    /// Write-only, create if missing, truncate.
    pub fn create_truncate() -> Self {
        Self {
            write: true,
            create: true,
            truncate: true,
            ..Default::default()
        }
    }

    /// Create exclusively (fail if exists).
    pub fn create_exclusive() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            exclusive: true,
            ..Default::default()
        }
    }

    /// Write-only append, create if missing.
    pub fn append() -> Self {
        Self {
            write: true,
            append: true,
            create: true,
            ..Default::default()
        }
    }

    /// Decode a raw `O_*` bitmask.
    pub fn from_bits(bits: i32) -> Self {
        let (read, write) = match bits & oflags::O_ACCMODE {
            oflags::O_WRONLY => (false, true),
            oflags::O_RDWR => (true, true),
            _ => (true, false),
        };
        Self {
            read,
            write,
            append: bits & oflags::O_APPEND != 0,
            create: bits & oflags::O_CREAT != 0,
            truncate: bits & oflags::O_TRUNC != 0,
            exclusive: bits & oflags::O_EXCL != 0,
            directory: bits & oflags::O_DIRECTORY != 0,
            nofollow: bits & oflags::O_NOFOLLOW != 0,
        }
    }

    /// Encode back into an `O_*` bitmask.
    pub fn bits(&self) -> i32 {
        let mut bits = match (self.read, self.write) {
            (true, true) => oflags::O_RDWR,
            (false, true) => oflags::O_WRONLY,
            _ => oflags::O_RDONLY,
        };
        let flag = |on: bool, bit: i32| if on { bit } else { 0 };
        bits |= flag(self.append, oflags::O_APPEND);
        bits |= flag(self.create, oflags::O_CREAT);
        bits |= flag(self.truncate, oflags::O_TRUNC);
        bits |= flag(self.exclusive, oflags::O_EXCL);
        bits |= flag(self.directory, oflags::O_DIRECTORY);
        bits |= flag(self.nofollow, oflags::O_NOFOLLOW);
        bits
    }
}

/// How a path lookup treats its final component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupOptions {
    /// Resolve a trailing symlink.
    pub follow_symlink: bool,
    /// Enter a filesystem mounted on the final component.
    pub follow_mount: bool,
    /// Stop at the parent of the final component.
    pub want_parent: bool,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self {
            follow_symlink: true,
            follow_mount: true,
            want_parent: false,
        }
    }
}

impl LookupOptions {
    /// Do not resolve a trailing symlink (lstat semantics).
    pub fn no_follow() -> Self {
        Self {
            follow_symlink: false,
            ..Default::default()
        }
    }

    /// Stop on a mountpoint instead of entering the mounted root.
    pub fn at_mountpoint() -> Self {
        Self {
            follow_mount: false,
            ..Default::default()
        }
    }

    /// Resolve only up to the parent directory.
    pub fn parent() -> Self {
        Self {
            want_parent: true,
            ..Default::default()
        }
    }
}

/// Seek origin for `llseek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_round_trip_bits() {
        for kind in [
            FileType::File,
            FileType::Directory,
            FileType::Symlink,
            FileType::CharDevice,
        ] {
            assert_eq!(FileType::from_mode(kind.mode_bits() | 0o644), Some(kind));
        }
        assert_eq!(FileType::from_mode(0o644), None);
    }

    #[test]
    fn test_open_flags_decode() {
        let flags = OpenFlags::from_bits(oflags::O_WRONLY | oflags::O_CREAT | oflags::O_TRUNC);
        assert!(!flags.read);
        assert!(flags.write);
        assert!(flags.create);
        assert!(flags.truncate);
        assert!(!flags.append);

        let rdwr = OpenFlags::from_bits(oflags::O_RDWR | oflags::O_APPEND);
        assert!(rdwr.read && rdwr.write && rdwr.append);
    }

    #[test]
    fn test_open_flags_bits() {
        assert_eq!(OpenFlags::read().bits(), oflags::O_RDONLY);
        assert_eq!(
            OpenFlags::create_truncate().bits(),
            oflags::O_WRONLY | oflags::O_CREAT | oflags::O_TRUNC
        );
    }

    #[test]
    fn test_device_id_encoding() {
        let dev = DeviceId::new(5, 1);
        assert_eq!(dev.encode(), 0x501);
        assert_eq!(DeviceId::decode(dev.encode()), dev);
    }

    #[test]
    fn test_lookup_options() {
        let opts = LookupOptions::default();
        assert!(opts.follow_symlink && opts.follow_mount && !opts.want_parent);
        assert!(!LookupOptions::no_follow().follow_symlink);
        assert!(!LookupOptions::at_mountpoint().follow_mount);
        assert!(LookupOptions::parent().want_parent);
    }
}
