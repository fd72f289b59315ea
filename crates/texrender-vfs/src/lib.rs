//! # texrender-vfs
//!
//! In-memory POSIX-like filesystem that the typesetting engine treats as its
//! whole disk.
//!
//! The filesystem:
//! - Keeps nodes in an arena keyed by [`NodeId`]
//! - Mounts fresh in-memory trees at arbitrary directories, optionally read-only
//! - Resolves symlinks with fixed depth limits
//! - Hands out numbered descriptors from a bounded table
//! - Routes device nodes (`/dev/null`, `/dev/stdout`, ...) through a registry
//! - Fetches lazy files in chunks on first read
//!
//! Every failure carries a fixed numeric [`Errno`].
//!
//! ```
//! use texrender_vfs::Vfs;
//!
//! let mut vfs = Vfs::new();
//! vfs.mkdir_tree("/work/figures", 0o777).unwrap();
//! vfs.write_file("/work/main.tex", b"\\documentclass{article}").unwrap();
//! assert_eq!(vfs.read_file("/work/main.tex").unwrap(), b"\\documentclass{article}");
//! ```

pub mod device;
pub mod error;
mod fs;
mod io;
pub mod lazy;
pub mod mount;
mod node;
pub mod path;
mod stream;
pub mod types;

pub use device::{CaptureDevice, DeviceOps, InputDevice, NullDevice, OutputBuffer, RandomDevice};
pub use error::{Errno, VfsError, VfsResult};
pub use fs::{Lookup, Vfs, MAX_LOOKUP_DEPTH, MAX_SYMLINK_FOLLOWS};
pub use lazy::{FileRangeFetcher, HttpRangeFetcher, RangeFetcher, DEFAULT_CHUNK_SIZE};
pub use mount::{MountId, MountInfo, MountOptions};
pub use node::{grown_capacity, NodeId, MAX_FILE_SIZE};
pub use stream::{Fd, MAX_OPEN_FDS};
pub use types::{DeviceId, DirEntry, FileType, LookupOptions, OpenFlags, Stat, Whence};
