//! Descriptor-based I/O and the bulk file helpers built on it.

use tracing::debug;

use crate::error::{VfsError, VfsResult};
use crate::node::{NodeData, NodeId};
use crate::stream::{Fd, Stream};
use crate::types::{mode, LookupOptions, OpenFlags, Stat, Whence};
use crate::{fs::Vfs, path};

impl Vfs {
    /// Open `path`, creating it with permission bits `perm` when
    /// `flags.create` is set and it does not exist.
    pub fn open(&mut self, path: &str, flags: OpenFlags, perm: u32) -> VfsResult<Fd> {
        if path.is_empty() {
            return Err(VfsError::not_found(path));
        }
        let opts = LookupOptions {
            follow_symlink: !flags.nofollow,
            ..Default::default()
        };
        let existing = self.lookup_path(path, opts).ok();

        let mut truncate = flags.truncate;
        let (node, resolved, created) = match existing {
            Some(_) if flags.create && flags.exclusive => {
                return Err(VfsError::already_exists(path::resolve(&self.cwd, path)));
            }
            Some(lookup) => (lookup.node, lookup.path, false),
            None if flags.create => {
                let id = self.create(path, perm)?;
                (id, path::resolve(&self.cwd, path), true)
            }
            None => return Err(VfsError::not_found(path::resolve(&self.cwd, path))),
        };

        let (is_device, is_dir) = {
            let n = self.node(node)?;
            (n.is_device(), n.is_dir())
        };
        if is_device {
            truncate = false;
        }
        if flags.directory && !is_dir {
            return Err(VfsError::not_a_directory(&resolved));
        }
        if !created {
            self.may_open(node, flags, truncate, &resolved)?;
        }
        if truncate && !created {
            self.truncate_node(node, 0, &resolved)?;
        }

        let fd = self.streams.insert(Stream {
            node,
            path: resolved.clone(),
            flags: OpenFlags {
                truncate: false,
                exclusive: false,
                nofollow: false,
                ..flags
            },
            position: 0,
            seekable: !is_device,
        })?;
        debug!(path = %resolved, fd = fd.0, created, "opened");
        Ok(fd)
    }

    fn may_open(&self, id: NodeId, flags: OpenFlags, truncate: bool, path: &str) -> VfsResult<()> {
        let node = self.node(id)?;
        match &node.data {
            NodeData::Symlink(_) => return Err(VfsError::TooManySymlinks),
            NodeData::Directory(_) if flags.write || truncate => {
                return Err(VfsError::is_a_directory(path));
            }
            NodeData::Lazy(_) if flags.write || truncate => {
                return Err(VfsError::NotPermitted(path.to_string()));
            }
            NodeData::Device(dev) if !self.devices.contains(*dev) => {
                return Err(VfsError::NoDevice(path.to_string()));
            }
            _ => {}
        }
        let mut access = 0;
        if flags.read {
            access |= mode::S_IRUGO;
        }
        if flags.write || truncate {
            access |= mode::S_IWUGO;
        }
        Self::require(node, access, path)?;
        if (flags.write || truncate) && !node.is_device() {
            self.require_writable_mount(node, path)?;
        }
        Ok(())
    }

    /// Close `fd`. A node unlinked while open is freed on its last close.
    pub fn close(&mut self, fd: Fd) -> VfsResult<()> {
        let stream = self.streams.remove(fd)?;
        let orphaned = self
            .nodes
            .get(&stream.node)
            .is_some_and(|node| !node.linked);
        if orphaned && !self.streams.references(stream.node) {
            self.nodes.remove(&stream.node);
            debug!(path = %stream.path, "freed unlinked node");
        }
        Ok(())
    }

    /// Read into `buf` at `position`, or at the stream offset (advancing it)
    /// when `position` is `None`.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8], position: Option<u64>) -> VfsResult<usize> {
        let stream = self.streams.get(fd)?;
        if !stream.flags.read {
            return Err(VfsError::BadDescriptor(fd.0));
        }
        if position.is_some() && !stream.seekable {
            return Err(VfsError::IllegalSeek);
        }
        let node_id = stream.node;
        let pos = position.unwrap_or(stream.position);
        let path = stream.path.clone();

        let node = self
            .nodes
            .get(&node_id)
            .ok_or_else(|| VfsError::not_found(&path))?;
        let n = match &node.data {
            NodeData::File(buffer) => buffer.read_at(pos, buf),
            NodeData::Lazy(lazy) => lazy.read_at(pos, buf)?,
            NodeData::Device(dev) => {
                let dev = *dev;
                self.devices
                    .get_mut(dev)
                    .ok_or(VfsError::NoDevice(path))?
                    .read(buf, pos)?
            }
            NodeData::Directory(_) => return Err(VfsError::is_a_directory(path)),
            NodeData::Symlink(_) => return Err(VfsError::invalid(path)),
        };
        if position.is_none() {
            self.streams.get_mut(fd)?.position += n as u64;
        }
        Ok(n)
    }

    /// Write `data` at `position`, or at the stream offset (advancing it)
    /// when `position` is `None`. Append streams always write at the end.
    pub fn write(&mut self, fd: Fd, data: &[u8], position: Option<u64>) -> VfsResult<usize> {
        let stream = self.streams.get(fd)?;
        if !stream.flags.write {
            return Err(VfsError::BadDescriptor(fd.0));
        }
        if position.is_some() && !stream.seekable {
            return Err(VfsError::IllegalSeek);
        }
        let (node_id, seekable, append) = (stream.node, stream.seekable, stream.flags.append);
        let path = stream.path.clone();

        if seekable && append {
            let end = self.stat_node(node_id)?.size;
            self.streams.get_mut(fd)?.position = end;
        }
        let pos = match position {
            Some(pos) => pos,
            None => self.streams.get(fd)?.position,
        };

        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| VfsError::not_found(&path))?;
        let n = match &mut node.data {
            NodeData::File(buffer) => buffer
                .write_at(pos, data)
                .ok_or_else(|| VfsError::FileTooLarge(path.clone()))?,
            NodeData::Device(dev) => {
                let dev = *dev;
                self.devices
                    .get_mut(dev)
                    .ok_or(VfsError::NoDevice(path))?
                    .write(data, pos)?
            }
            NodeData::Lazy(_) => return Err(VfsError::NotPermitted(path)),
            NodeData::Directory(_) => return Err(VfsError::is_a_directory(path)),
            NodeData::Symlink(_) => return Err(VfsError::invalid(path)),
        };
        if !node.is_device() {
            node.touch();
        }
        if position.is_none() {
            self.streams.get_mut(fd)?.position += n as u64;
        }
        Ok(n)
    }

    /// Reposition the stream offset; returns the new offset.
    pub fn llseek(&mut self, fd: Fd, offset: i64, whence: Whence) -> VfsResult<u64> {
        let stream = self.streams.get(fd)?;
        if !stream.seekable {
            return Err(VfsError::IllegalSeek);
        }
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => stream.position as i64,
            Whence::End => self.stat_node(stream.node)?.size as i64,
        };
        let target = base
            .checked_add(offset)
            .filter(|target| *target >= 0)
            .ok_or_else(|| VfsError::invalid(format!("seek to {} + {}", base, offset)))?;
        self.streams.get_mut(fd)?.position = target as u64;
        Ok(target as u64)
    }

    pub fn fstat(&self, fd: Fd) -> VfsResult<Stat> {
        let stream = self.streams.get(fd)?;
        self.stat_node(stream.node)
    }

    pub fn ftruncate(&mut self, fd: Fd, len: u64) -> VfsResult<()> {
        let stream = self.streams.get(fd)?;
        if !stream.flags.write {
            return Err(VfsError::invalid(format!("{} not open for writing", stream.path)));
        }
        let (node, path) = (stream.node, stream.path.clone());
        self.truncate_node(node, len, &path)
    }

    /// Number of open descriptors, including the standard streams.
    pub fn open_count(&self) -> usize {
        self.streams.len()
    }

    // ========================================================================
    // Bulk helpers
    // ========================================================================

    /// Read a whole file.
    pub fn read_file(&mut self, path: &str) -> VfsResult<Vec<u8>> {
        let fd = self.open(path, OpenFlags::read(), 0)?;
        let result = self.read_all(fd);
        self.close(fd)?;
        result
    }

    fn read_all(&mut self, fd: Fd) -> VfsResult<Vec<u8>> {
        let size = self.fstat(fd)?.size as usize;
        let mut buf = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            let n = self.read(fd, &mut buf[filled..], None)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    pub fn read_to_string(&mut self, path: &str) -> VfsResult<String> {
        let bytes = self.read_file(path)?;
        String::from_utf8(bytes).map_err(|_| VfsError::invalid(format!("not UTF-8: {}", path)))
    }

    /// Create or replace `path` with `data` (mode 0666).
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> VfsResult<()> {
        let fd = self.open(path, OpenFlags::create_truncate(), 0o666)?;
        let result = self.write(fd, data, None);
        self.close(fd)?;
        result.map(|_| ())
    }
}
