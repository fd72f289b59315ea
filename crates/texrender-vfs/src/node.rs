//! Node arena entries.
//!
//! Nodes live in a map keyed by [`NodeId`]; parent and child links are ids,
//! never references.

use std::collections::HashMap;
use std::time::SystemTime;

use crate::lazy::LazyFile;
use crate::mount::MountId;
use crate::types::{mode, DeviceId, FileType};

/// Below this capacity a file buffer doubles when it grows.
pub const CAPACITY_DOUBLING_MAX: usize = 1024 * 1024;

/// Smallest capacity a non-empty buffer is grown to.
pub const MIN_GROWN_CAPACITY: usize = 256;

/// Largest size a regular file may reach.
pub const MAX_FILE_SIZE: u64 = 1 << 30;

/// End offset of `len` bytes written at `pos`, or `None` past [`MAX_FILE_SIZE`].
pub fn checked_end(pos: u64, len: usize) -> Option<usize> {
    pos.checked_add(len as u64)
        .filter(|end| *end <= MAX_FILE_SIZE)
        .map(|end| end as usize)
}

/// Opaque node identifier (the inode number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Compute the capacity a buffer grows to when `requested` bytes are needed.
pub fn grown_capacity(current: usize, requested: usize) -> usize {
    if current >= requested {
        return current;
    }
    let factor = if current < CAPACITY_DOUBLING_MAX { 2.0 } else { 1.125 };
    let mut capacity = requested.max((current as f64 * factor) as usize);
    if current != 0 {
        capacity = capacity.max(MIN_GROWN_CAPACITY);
    }
    capacity
}

/// Contents of a regular file.
#[derive(Debug, Default, Clone)]
pub(crate) struct FileBuffer {
    bytes: Vec<u8>,
}

impl FileBuffer {
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    fn reserve_for(&mut self, needed: usize) {
        let target = grown_capacity(self.bytes.capacity(), needed);
        if target > self.bytes.capacity() {
            self.bytes.reserve_exact(target - self.bytes.len());
        }
    }

    /// Copy bytes starting at `pos` into `buf`, returning the count.
    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> usize {
        let start = pos.min(self.bytes.len() as u64) as usize;
        let end = (start + buf.len()).min(self.bytes.len());
        let n = end - start;
        buf[..n].copy_from_slice(&self.bytes[start..end]);
        n
    }

    /// Write `data` at `pos`, zero-filling any gap past the end. `None`
    /// when the write would end past [`MAX_FILE_SIZE`]; nothing is written.
    pub fn write_at(&mut self, pos: u64, data: &[u8]) -> Option<usize> {
        let end = checked_end(pos, data.len())?;
        let start = end - data.len();
        if end > self.bytes.len() {
            self.reserve_for(end);
            self.bytes.resize(end, 0);
        }
        self.bytes[start..end].copy_from_slice(data);
        Some(data.len())
    }

    /// Set the exact length (truncate or zero-extend). `None` past
    /// [`MAX_FILE_SIZE`].
    pub fn resize(&mut self, len: u64) -> Option<()> {
        let len = checked_end(len, 0)?;
        if len < self.bytes.len() {
            self.bytes.truncate(len);
            self.bytes.shrink_to(len);
        } else {
            self.bytes.resize(len, 0);
        }
        Some(())
    }
}

/// Per-kind node payload.
pub(crate) enum NodeData {
    File(FileBuffer),
    Directory(HashMap<String, NodeId>),
    Symlink(String),
    Device(DeviceId),
    Lazy(LazyFile),
}

pub(crate) struct Node {
    pub id: NodeId,
    /// Parent directory; a mount root is its own parent.
    pub parent: NodeId,
    pub name: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: SystemTime,
    /// Mount this node belongs to.
    pub mount: MountId,
    /// Mount whose root covers this directory, if any.
    pub mounted: Option<MountId>,
    /// False once unlinked while streams still reference it.
    pub linked: bool,
    pub data: NodeData,
}

impl Node {
    pub fn file_type(&self) -> FileType {
        match &self.data {
            NodeData::File(_) | NodeData::Lazy(_) => FileType::File,
            NodeData::Directory(_) => FileType::Directory,
            NodeData::Symlink(_) => FileType::Symlink,
            NodeData::Device(_) => FileType::CharDevice,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.data, NodeData::Directory(_))
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.data, NodeData::Symlink(_))
    }

    pub fn is_device(&self) -> bool {
        matches!(self.data, NodeData::Device(_))
    }

    pub fn children(&self) -> Option<&HashMap<String, NodeId>> {
        match &self.data {
            NodeData::Directory(children) => Some(children),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut HashMap<String, NodeId>> {
        match &mut self.data {
            NodeData::Directory(children) => Some(children),
            _ => None,
        }
    }

    /// True if any of the `S_I*UGO` bits in `access` is set.
    pub fn permits(&self, access: u32) -> bool {
        self.mode & access != 0
    }

    pub fn set_permissions(&mut self, perm: u32) {
        self.mode = (perm & mode::S_IALLUGO) | (self.mode & !mode::S_IALLUGO);
    }

    pub fn touch(&mut self) {
        self.mtime = SystemTime::now();
    }
}
