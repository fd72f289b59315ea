//! Open file descriptions and the bounded descriptor table.

use std::collections::BTreeMap;

use crate::error::{VfsError, VfsResult};
use crate::node::NodeId;
use crate::types::OpenFlags;

/// Maximum number of simultaneously open descriptors.
pub const MAX_OPEN_FDS: u32 = 4096;

/// File descriptor number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(pub u32);

impl std::fmt::Display for Fd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Stream {
    pub node: NodeId,
    /// Path as opened, for diagnostics.
    pub path: String,
    pub flags: OpenFlags,
    pub position: u64,
    pub seekable: bool,
}

#[derive(Debug)]
pub(crate) struct StreamTable {
    streams: BTreeMap<u32, Stream>,
    max: u32,
}

impl StreamTable {
    pub fn new(max: u32) -> Self {
        Self {
            streams: BTreeMap::new(),
            max,
        }
    }

    /// Insert at the lowest free descriptor.
    pub fn insert(&mut self, stream: Stream) -> VfsResult<Fd> {
        let fd = (0..self.max)
            .find(|fd| !self.streams.contains_key(fd))
            .ok_or(VfsError::TooManyOpenFiles)?;
        self.streams.insert(fd, stream);
        Ok(Fd(fd))
    }

    pub fn get(&self, fd: Fd) -> VfsResult<&Stream> {
        self.streams.get(&fd.0).ok_or(VfsError::BadDescriptor(fd.0))
    }

    pub fn get_mut(&mut self, fd: Fd) -> VfsResult<&mut Stream> {
        self.streams
            .get_mut(&fd.0)
            .ok_or(VfsError::BadDescriptor(fd.0))
    }

    pub fn remove(&mut self, fd: Fd) -> VfsResult<Stream> {
        self.streams
            .remove(&fd.0)
            .ok_or(VfsError::BadDescriptor(fd.0))
    }

    /// True if any open stream references `node`.
    pub fn references(&self, node: NodeId) -> bool {
        self.streams.values().any(|s| s.node == node)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn clear(&mut self) {
        self.streams.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(node: u64) -> Stream {
        Stream {
            node: NodeId(node),
            path: format!("/n{}", node),
            flags: OpenFlags::read(),
            position: 0,
            seekable: true,
        }
    }

    #[test]
    fn test_lowest_free_descriptor() {
        let mut table = StreamTable::new(8);
        assert_eq!(table.insert(stream(1)).ok(), Some(Fd(0)));
        assert_eq!(table.insert(stream(2)).ok(), Some(Fd(1)));
        assert_eq!(table.insert(stream(3)).ok(), Some(Fd(2)));
        table.remove(Fd(1)).ok();
        assert_eq!(table.insert(stream(4)).ok(), Some(Fd(1)));
    }

    #[test]
    fn test_exhaustion() {
        let mut table = StreamTable::new(2);
        table.insert(stream(1)).ok();
        table.insert(stream(2)).ok();
        assert!(matches!(
            table.insert(stream(3)),
            Err(VfsError::TooManyOpenFiles)
        ));
    }

    #[test]
    fn test_bad_descriptor() {
        let mut table = StreamTable::new(2);
        assert!(matches!(table.get(Fd(5)), Err(VfsError::BadDescriptor(5))));
        assert!(matches!(table.remove(Fd(0)), Err(VfsError::BadDescriptor(0))));
    }

    #[test]
    fn test_references() {
        let mut table = StreamTable::new(4);
        table.insert(stream(9)).ok();
        assert!(table.references(NodeId(9)));
        assert!(!table.references(NodeId(10)));
    }
}
