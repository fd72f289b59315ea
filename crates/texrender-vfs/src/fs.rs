//! The filesystem proper: node arena, path lookup and namespace operations.
//!
//! Stream I/O lives in `io.rs`; both are `impl Vfs` blocks over the same
//! state.

use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

use tracing::{debug, error};

use crate::device::{
    self, CaptureDevice, DeviceOps, DeviceRegistry, InputDevice, NullDevice, OutputBuffer,
    RandomDevice,
};
use crate::error::{VfsError, VfsResult};
use crate::lazy::{LazyFile, RangeFetcher};
use crate::mount::{Mount, MountId, MountInfo, MountOptions, MountTable};
use crate::node::{FileBuffer, Node, NodeData, NodeId};
use crate::path;
use crate::stream::{MAX_OPEN_FDS, StreamTable};
use crate::types::{mode, DeviceId, DirEntry, FileType, LookupOptions, OpenFlags, Stat};

/// Symlinks followed within one lookup before giving up.
pub const MAX_SYMLINK_FOLLOWS: u32 = 40;

/// Nested lookups (a symlink target resolving another symlink target...).
pub const MAX_LOOKUP_DEPTH: u32 = 8;

/// Reported block size, and size of a directory.
const BLOCK_SIZE: u32 = 4096;

/// Result of a path lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// Canonical path of the node found, after symlink resolution.
    pub path: String,
    pub node: NodeId,
}

/// In-memory POSIX-like filesystem.
///
/// Single-threaded: every mutating operation takes `&mut self`.
pub struct Vfs {
    pub(crate) nodes: HashMap<NodeId, Node>,
    next_node: u64,
    pub(crate) mounts: MountTable,
    pub(crate) root: NodeId,
    pub(crate) cwd: String,
    pub(crate) streams: StreamTable,
    pub(crate) devices: DeviceRegistry,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vfs")
            .field("nodes", &self.nodes.len())
            .field("mounts", &self.mounts.list())
            .field("cwd", &self.cwd)
            .field("open_streams", &self.streams.len())
            .finish()
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    /// Create a filesystem with the default layout and the standard streams
    /// open on descriptors 0, 1 and 2.
    pub fn new() -> Self {
        Self::with_fd_limit(MAX_OPEN_FDS)
    }

    /// Like [`Vfs::new`] with a smaller descriptor table. The limit counts
    /// the three standard streams.
    pub fn with_fd_limit(max_fds: u32) -> Self {
        let mut vfs = Self {
            nodes: HashMap::new(),
            next_node: 0,
            mounts: MountTable::default(),
            root: NodeId(0),
            cwd: "/".to_string(),
            streams: StreamTable::new(max_fds),
            devices: DeviceRegistry::default(),
            stdout: OutputBuffer::new(),
            stderr: OutputBuffer::new(),
        };
        let mount = vfs.mounts.allocate_id();
        vfs.root = vfs.alloc_root(mount, "/");
        vfs.mounts.insert(Mount {
            id: mount,
            mountpoint: "/".to_string(),
            root: vfs.root,
            attached: None,
            options: MountOptions::default(),
            children: Vec::new(),
        });
        if let Err(err) = vfs.create_default_layout() {
            error!(%err, "default filesystem layout incomplete");
        }
        vfs
    }

    fn create_default_layout(&mut self) -> VfsResult<()> {
        self.mkdir("/tmp", 0o777)?;
        self.mkdir_tree("/home/web_user", 0o777)?;
        self.mkdir("/dev", 0o777)?;

        self.register_device(device::ids::NULL, Box::new(NullDevice));
        self.register_device(device::ids::TTY, Box::new(CaptureDevice::new(self.stdout.clone())));
        self.register_device(device::ids::RANDOM, Box::new(RandomDevice::new()));
        self.register_device(device::ids::URANDOM, Box::new(RandomDevice::new()));
        self.register_device(device::ids::STDIN, Box::new(InputDevice::default()));
        self.register_device(device::ids::STDOUT, Box::new(CaptureDevice::new(self.stdout.clone())));
        self.register_device(device::ids::STDERR, Box::new(CaptureDevice::new(self.stderr.clone())));

        for (name, dev) in [
            ("null", device::ids::NULL),
            ("tty", device::ids::TTY),
            ("random", device::ids::RANDOM),
            ("urandom", device::ids::URANDOM),
            ("stdin", device::ids::STDIN),
            ("stdout", device::ids::STDOUT),
            ("stderr", device::ids::STDERR),
        ] {
            self.mkdev(&path::join("/dev", name), 0o666, dev)?;
        }

        self.open("/dev/stdin", OpenFlags::read(), 0)?;
        self.open("/dev/stdout", OpenFlags::from_bits(crate::types::oflags::O_WRONLY), 0)?;
        self.open("/dev/stderr", OpenFlags::from_bits(crate::types::oflags::O_WRONLY), 0)?;
        Ok(())
    }

    // ========================================================================
    // Arena helpers
    // ========================================================================

    fn alloc_id(&mut self) -> NodeId {
        self.next_node += 1;
        NodeId(self.next_node)
    }

    fn alloc_root(&mut self, mount: MountId, name: &str) -> NodeId {
        let id = self.alloc_id();
        self.nodes.insert(
            id,
            Node {
                id,
                parent: id,
                name: name.to_string(),
                mode: mode::S_IFDIR | 0o777,
                uid: 0,
                gid: 0,
                mtime: SystemTime::now(),
                mount,
                mounted: None,
                linked: true,
                data: NodeData::Directory(HashMap::new()),
            },
        );
        id
    }

    pub(crate) fn node(&self, id: NodeId) -> VfsResult<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| VfsError::not_found(format!("node {}", id.raw())))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> VfsResult<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| VfsError::not_found(format!("node {}", id.raw())))
    }

    /// Fail with `EACCES` unless every class in `access` is granted.
    pub(crate) fn require(node: &Node, access: u32, path: &str) -> VfsResult<()> {
        for class in [mode::S_IRUGO, mode::S_IWUGO, mode::S_IXUGO] {
            if access & class != 0 && !node.permits(class) {
                return Err(VfsError::permission_denied(path));
            }
        }
        Ok(())
    }

    pub(crate) fn require_writable_mount(&self, node: &Node, path: &str) -> VfsResult<()> {
        if self.mounts.is_read_only(node.mount) {
            return Err(VfsError::ReadOnly(path.to_string()));
        }
        Ok(())
    }

    /// Resolve one name inside a directory node, without following anything.
    fn child_of(&self, dir: NodeId, name: &str, dir_path: &str) -> VfsResult<NodeId> {
        let node = self.node(dir)?;
        let children = node
            .children()
            .ok_or_else(|| VfsError::not_a_directory(dir_path))?;
        Self::require(node, mode::S_IXUGO, dir_path)?;
        children
            .get(name)
            .copied()
            .ok_or_else(|| VfsError::not_found(path::join(dir_path, name)))
    }

    fn mounted_root(&self, id: NodeId) -> Option<NodeId> {
        let node = self.nodes.get(&id)?;
        let mount = self.mounts.get(node.mounted?)?;
        Some(mount.root)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Resolve `path` (relative paths against the working directory).
    pub fn lookup_path(&self, path: &str, opts: LookupOptions) -> VfsResult<Lookup> {
        self.lookup_at_depth(path, opts, 0)
    }

    fn lookup_at_depth(&self, path: &str, opts: LookupOptions, depth: u32) -> VfsResult<Lookup> {
        if depth > MAX_LOOKUP_DEPTH {
            return Err(VfsError::TooManySymlinks);
        }
        let resolved = path::resolve(&self.cwd, path);
        let parts = path::components(&resolved);

        let mut current = self.root;
        let mut current_path = "/".to_string();
        for (i, part) in parts.iter().enumerate() {
            let last = i + 1 == parts.len();
            if last && opts.want_parent {
                break;
            }
            current = self.child_of(current, part, &current_path)?;
            current_path = path::join(&current_path, part);

            if !last || opts.follow_mount {
                if let Some(root) = self.mounted_root(current) {
                    current = root;
                }
            }

            if !last || opts.follow_symlink {
                let mut follows = 0;
                while let NodeData::Symlink(target) = &self.node(current)?.data {
                    follows += 1;
                    if follows > MAX_SYMLINK_FOLLOWS {
                        return Err(VfsError::TooManySymlinks);
                    }
                    let target_path = path::resolve(path::dirname(&current_path), target);
                    let nested =
                        self.lookup_at_depth(&target_path, LookupOptions::default(), depth + 1)?;
                    current = nested.node;
                    current_path = nested.path;
                }
            }
        }
        Ok(Lookup {
            path: current_path,
            node: current,
        })
    }

    /// Parent directory lookup plus the final name of `path`.
    fn lookup_parent(&self, path: &str) -> VfsResult<(Lookup, String)> {
        let full = path::resolve(&self.cwd, path);
        let name = path::basename(&full).to_string();
        let parent = self.lookup_path(&full, LookupOptions::parent())?;
        Ok((parent, name))
    }

    /// True if `path` resolves.
    pub fn exists(&self, path: &str) -> bool {
        self.lookup_path(path, LookupOptions::default()).is_ok()
    }

    // ========================================================================
    // Working directory
    // ========================================================================

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn chdir(&mut self, path: &str) -> VfsResult<()> {
        let lookup = self.lookup_path(path, LookupOptions::default())?;
        let node = self.node(lookup.node)?;
        if !node.is_dir() {
            return Err(VfsError::not_a_directory(&lookup.path));
        }
        Self::require(node, mode::S_IXUGO, &lookup.path)?;
        self.cwd = lookup.path;
        Ok(())
    }

    // ========================================================================
    // Mounts
    // ========================================================================

    /// Mount a fresh in-memory filesystem on the directory at `path`.
    pub fn mount(&mut self, path: &str, options: MountOptions) -> VfsResult<MountId> {
        let lookup = self.lookup_path(path, LookupOptions::at_mountpoint())?;
        let (parent_mount, is_dir, already_mounted) = {
            let node = self.node(lookup.node)?;
            (node.mount, node.is_dir(), node.mounted.is_some())
        };
        if lookup.node == self.root || already_mounted {
            return Err(VfsError::busy(&lookup.path));
        }
        if !is_dir {
            return Err(VfsError::not_a_directory(&lookup.path));
        }

        let id = self.mounts.allocate_id();
        let root = self.alloc_root(id, path::basename(&lookup.path));
        self.mounts.insert(Mount {
            id,
            mountpoint: lookup.path.clone(),
            root,
            attached: Some((parent_mount, lookup.node)),
            options,
            children: Vec::new(),
        });
        self.node_mut(lookup.node)?.mounted = Some(id);
        debug!(path = %lookup.path, mount = id.raw(), read_only = options.read_only, "mounted");
        Ok(id)
    }

    /// Detach the mount at `path` and every mount beneath it, dropping
    /// their nodes.
    pub fn unmount(&mut self, path: &str) -> VfsResult<()> {
        let lookup = self.lookup_path(path, LookupOptions::at_mountpoint())?;
        let mount = self
            .node(lookup.node)?
            .mounted
            .ok_or_else(|| VfsError::invalid(format!("not a mountpoint: {}", lookup.path)))?;

        let mut doomed = HashSet::new();
        let mut pending = vec![mount];
        while let Some(id) = pending.pop() {
            if let Some(m) = self.mounts.get(id) {
                pending.extend(m.children.iter().copied());
            }
            doomed.insert(id);
        }
        for id in &doomed {
            self.mounts.remove(*id);
        }
        self.nodes.retain(|_, node| !doomed.contains(&node.mount));
        self.node_mut(lookup.node)?.mounted = None;
        debug!(path = %lookup.path, mounts = doomed.len(), "unmounted");
        Ok(())
    }

    pub fn mounts(&self) -> Vec<MountInfo> {
        self.mounts.list()
    }

    // ========================================================================
    // Creation
    // ========================================================================

    fn may_create(&self, dir: NodeId, name: &str, dir_path: &str) -> VfsResult<()> {
        let node = self.node(dir)?;
        let children = node
            .children()
            .ok_or_else(|| VfsError::not_a_directory(dir_path))?;
        if name.is_empty() || children.contains_key(name) {
            return Err(VfsError::already_exists(path::join(dir_path, name)));
        }
        Self::require(node, mode::S_IWUGO | mode::S_IXUGO, dir_path)?;
        self.require_writable_mount(node, dir_path)
    }

    fn insert_node(&mut self, path: &str, node_mode: u32, data: NodeData) -> VfsResult<NodeId> {
        let (parent, name) = self.lookup_parent(path)?;
        if name == "." || name == ".." {
            return Err(VfsError::invalid(format!("bad name: {}", path)));
        }
        self.may_create(parent.node, &name, &parent.path)?;

        let mount = self.node(parent.node)?.mount;
        let id = self.alloc_id();
        self.nodes.insert(
            id,
            Node {
                id,
                parent: parent.node,
                name: name.clone(),
                mode: node_mode,
                uid: 0,
                gid: 0,
                mtime: SystemTime::now(),
                mount,
                mounted: None,
                linked: true,
                data,
            },
        );
        let dir = self.node_mut(parent.node)?;
        if let Some(children) = dir.children_mut() {
            children.insert(name, id);
        }
        dir.touch();
        Ok(id)
    }

    /// Create a node of the type encoded in `node_mode`.
    pub fn mknod(&mut self, path: &str, node_mode: u32, dev: DeviceId) -> VfsResult<NodeId> {
        let data = match FileType::from_mode(node_mode) {
            Some(FileType::File) => NodeData::File(FileBuffer::default()),
            Some(FileType::Directory) => NodeData::Directory(HashMap::new()),
            Some(FileType::CharDevice) => NodeData::Device(dev),
            Some(FileType::Symlink) | None => {
                return Err(VfsError::invalid(format!("mknod mode {:o}", node_mode)));
            }
        };
        self.insert_node(path, node_mode, data)
    }

    /// Create an empty regular file.
    pub fn create(&mut self, path: &str, perm: u32) -> VfsResult<NodeId> {
        self.mknod(path, mode::S_IFREG | (perm & mode::S_IALLUGO), DeviceId::new(0, 0))
    }

    pub fn mkdir(&mut self, path: &str, perm: u32) -> VfsResult<NodeId> {
        self.mknod(path, mode::S_IFDIR | (perm & mode::S_IRWXUGO), DeviceId::new(0, 0))
    }

    /// Create `path` and any missing ancestors. Existing directories along
    /// the way are fine.
    pub fn mkdir_tree(&mut self, path: &str, perm: u32) -> VfsResult<()> {
        let full = path::resolve(&self.cwd, path);
        let mut current = String::from("/");
        for part in path::components(&full) {
            current = path::join(&current, part);
            match self.mkdir(&current, perm) {
                Ok(_) | Err(VfsError::AlreadyExists(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Create a character device node.
    pub fn mkdev(&mut self, path: &str, perm: u32, dev: DeviceId) -> VfsResult<NodeId> {
        self.mknod(path, mode::S_IFCHR | (perm & mode::S_IALLUGO), dev)
    }

    pub fn symlink(&mut self, target: &str, link_path: &str) -> VfsResult<NodeId> {
        self.insert_node(
            link_path,
            mode::S_IFLNK | 0o777,
            NodeData::Symlink(target.to_string()),
        )
    }

    pub fn readlink(&self, path: &str) -> VfsResult<String> {
        let lookup = self.lookup_path(path, LookupOptions::no_follow())?;
        match &self.node(lookup.node)?.data {
            NodeData::Symlink(target) => Ok(target.clone()),
            _ => Err(VfsError::invalid(format!("not a symlink: {}", lookup.path))),
        }
    }

    /// Create a read-only file whose content is fetched on demand.
    pub fn create_lazy_file(
        &mut self,
        path: &str,
        fetcher: Box<dyn RangeFetcher>,
        chunk_size: u64,
    ) -> VfsResult<NodeId> {
        let source = fetcher.describe();
        let id = self.insert_node(
            path,
            mode::S_IFREG | mode::S_IRUGO,
            NodeData::Lazy(LazyFile::new(fetcher, chunk_size)),
        )?;
        debug!(path, %source, chunk_size, "lazy file created");
        Ok(id)
    }

    /// Register the operations for a device number.
    pub fn register_device(&mut self, dev: DeviceId, ops: Box<dyn DeviceOps>) {
        self.devices.register(dev, ops);
    }

    /// Replace what the engine reads from `/dev/stdin`.
    pub fn set_stdin(&mut self, data: impl Into<Vec<u8>>) {
        self.register_device(device::ids::STDIN, Box::new(InputDevice::new(data)));
    }

    /// Bytes written to `/dev/stdout` and `/dev/tty`.
    pub fn stdout(&self) -> OutputBuffer {
        self.stdout.clone()
    }

    /// Bytes written to `/dev/stderr`.
    pub fn stderr(&self) -> OutputBuffer {
        self.stderr.clone()
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Checks shared by unlink, rmdir and rename. Returns the child.
    fn may_delete(&self, dir: NodeId, name: &str, dir_path: &str, want_dir: bool) -> VfsResult<NodeId> {
        let child = self.child_of(dir, name, dir_path)?;
        let full = path::join(dir_path, name);
        let parent = self.node(dir)?;
        Self::require(parent, mode::S_IWUGO | mode::S_IXUGO, dir_path)?;
        self.require_writable_mount(parent, dir_path)?;

        let node = self.node(child)?;
        if want_dir {
            if !node.is_dir() {
                return Err(VfsError::not_a_directory(full));
            }
            if child == self.root || node.mounted.is_some() || full == self.cwd {
                return Err(VfsError::busy(full));
            }
        } else if node.is_dir() {
            return Err(VfsError::is_a_directory(full));
        }
        Ok(child)
    }

    /// Remove `name` from `dir`; free the node now, or on last close if a
    /// stream still has it open.
    fn detach(&mut self, dir: NodeId, name: &str, child: NodeId) -> VfsResult<()> {
        let parent = self.node_mut(dir)?;
        if let Some(children) = parent.children_mut() {
            children.remove(name);
        }
        parent.touch();
        if self.streams.references(child) {
            self.node_mut(child)?.linked = false;
        } else {
            self.nodes.remove(&child);
        }
        Ok(())
    }

    pub fn unlink(&mut self, path: &str) -> VfsResult<()> {
        let (parent, name) = self.lookup_parent(path)?;
        let child = self.may_delete(parent.node, &name, &parent.path, false)?;
        if self.node(child)?.mounted.is_some() {
            return Err(VfsError::busy(path::join(&parent.path, &name)));
        }
        self.detach(parent.node, &name, child)
    }

    pub fn rmdir(&mut self, path: &str) -> VfsResult<()> {
        let full = path::resolve(&self.cwd, path);
        if full == "/" {
            return Err(VfsError::busy(full));
        }
        let (parent, name) = self.lookup_parent(&full)?;
        let child = self.may_delete(parent.node, &name, &parent.path, true)?;
        if self
            .node(child)?
            .children()
            .is_some_and(|children| !children.is_empty())
        {
            return Err(VfsError::directory_not_empty(path::join(&parent.path, &name)));
        }
        self.detach(parent.node, &name, child)
    }

    /// Remove `path` and everything beneath it. Symlinks are removed, not
    /// followed.
    pub fn remove_tree(&mut self, path: &str) -> VfsResult<()> {
        let full = path::resolve(&self.cwd, path);
        if self.lstat(&full)?.is_dir() {
            for entry in self.readdir(&full)? {
                self.remove_tree(&path::join(&full, &entry.name))?;
            }
            self.rmdir(&full)
        } else {
            self.unlink(&full)
        }
    }

    pub fn rename(&mut self, old_path: &str, new_path: &str) -> VfsResult<()> {
        let (old_dir, old_name) = self.lookup_parent(old_path)?;
        let (new_dir, new_name) = self.lookup_parent(new_path)?;
        if old_name.is_empty() || new_name.is_empty() {
            return Err(VfsError::busy("/"));
        }
        if self.node(old_dir.node)?.mount != self.node(new_dir.node)?.mount {
            return Err(VfsError::CrossDeviceLink);
        }

        let old_full = path::join(&old_dir.path, &old_name);
        let new_full = path::join(&new_dir.path, &new_name);
        let old_node = self.child_of(old_dir.node, &old_name, &old_dir.path)?;

        if old_full != new_full && path::is_within(&new_full, &old_full) {
            return Err(VfsError::invalid(format!(
                "cannot move {} into itself",
                old_full
            )));
        }
        if old_full != new_full && path::is_within(&old_full, &new_full) {
            return Err(VfsError::directory_not_empty(new_full));
        }

        let new_node = self
            .node(new_dir.node)?
            .children()
            .and_then(|children| children.get(&new_name).copied());
        if new_node == Some(old_node) {
            return Ok(());
        }

        let is_dir = self.node(old_node)?.is_dir();
        self.may_delete(old_dir.node, &old_name, &old_dir.path, is_dir)?;
        match new_node {
            Some(_) => {
                self.may_delete(new_dir.node, &new_name, &new_dir.path, is_dir)?;
            }
            None => self.may_create(new_dir.node, &new_name, &new_dir.path)?,
        }
        if self.node(old_node)?.mounted.is_some() {
            return Err(VfsError::busy(old_full));
        }
        if new_dir.node != old_dir.node && is_dir {
            Self::require(self.node(old_node)?, mode::S_IWUGO, &old_full)?;
        }

        if let Some(target) = new_node {
            if self
                .node(target)?
                .children()
                .is_some_and(|children| !children.is_empty())
            {
                return Err(VfsError::directory_not_empty(new_full));
            }
            self.detach(new_dir.node, &new_name, target)?;
        }

        let source_dir = self.node_mut(old_dir.node)?;
        if let Some(children) = source_dir.children_mut() {
            children.remove(&old_name);
        }
        source_dir.touch();
        let dest_dir = self.node_mut(new_dir.node)?;
        if let Some(children) = dest_dir.children_mut() {
            children.insert(new_name.clone(), old_node);
        }
        dest_dir.touch();
        let moved = self.node_mut(old_node)?;
        moved.parent = new_dir.node;
        moved.name = new_name;
        debug!(from = %old_full, to = %new_full, "renamed");
        Ok(())
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    pub(crate) fn stat_node(&self, id: NodeId) -> VfsResult<Stat> {
        let node = self.node(id)?;
        let (size, rdev) = match &node.data {
            NodeData::File(buffer) => (buffer.len() as u64, 0),
            NodeData::Lazy(lazy) => (lazy.length()?, 0),
            NodeData::Directory(_) => (BLOCK_SIZE as u64, 0),
            NodeData::Symlink(target) => (target.len() as u64, 0),
            NodeData::Device(dev) => (0, dev.encode()),
        };
        Ok(Stat {
            dev: node.mount.raw() as u64,
            ino: id.raw(),
            mode: node.mode,
            nlink: if node.is_dir() { 2 } else { 1 },
            uid: node.uid,
            gid: node.gid,
            rdev,
            size,
            atime: node.mtime,
            mtime: node.mtime,
            ctime: node.mtime,
            blksize: BLOCK_SIZE,
            blocks: size.div_ceil(BLOCK_SIZE as u64),
        })
    }

    pub fn stat(&self, path: &str) -> VfsResult<Stat> {
        let lookup = self.lookup_path(path, LookupOptions::default())?;
        self.stat_node(lookup.node)
    }

    /// Like [`Vfs::stat`] but reports a trailing symlink itself.
    pub fn lstat(&self, path: &str) -> VfsResult<Stat> {
        let lookup = self.lookup_path(path, LookupOptions::no_follow())?;
        self.stat_node(lookup.node)
    }

    pub fn chmod(&mut self, path: &str, perm: u32) -> VfsResult<()> {
        let lookup = self.lookup_path(path, LookupOptions::default())?;
        self.require_writable_mount(self.node(lookup.node)?, &lookup.path)?;
        let node = self.node_mut(lookup.node)?;
        node.set_permissions(perm);
        node.touch();
        Ok(())
    }

    pub fn chown(&mut self, path: &str, uid: u32, gid: u32) -> VfsResult<()> {
        let lookup = self.lookup_path(path, LookupOptions::default())?;
        self.require_writable_mount(self.node(lookup.node)?, &lookup.path)?;
        let node = self.node_mut(lookup.node)?;
        node.uid = uid;
        node.gid = gid;
        node.touch();
        Ok(())
    }

    pub(crate) fn truncate_node(&mut self, id: NodeId, len: u64, path: &str) -> VfsResult<()> {
        let node = self.node(id)?;
        match &node.data {
            NodeData::Directory(_) => return Err(VfsError::is_a_directory(path)),
            NodeData::Lazy(_) => return Err(VfsError::NotPermitted(path.to_string())),
            NodeData::File(_) => {}
            _ => return Err(VfsError::invalid(format!("cannot truncate {}", path))),
        }
        Self::require(node, mode::S_IWUGO, path)?;
        self.require_writable_mount(node, path)?;

        let node = self.node_mut(id)?;
        if let NodeData::File(buffer) = &mut node.data {
            buffer
                .resize(len)
                .ok_or_else(|| VfsError::FileTooLarge(path.to_string()))?;
        }
        node.touch();
        Ok(())
    }

    pub fn truncate(&mut self, path: &str, len: u64) -> VfsResult<()> {
        let lookup = self.lookup_path(path, LookupOptions::default())?;
        self.truncate_node(lookup.node, len, &lookup.path)
    }

    /// Set the modification time.
    pub fn utime(&mut self, path: &str, mtime: SystemTime) -> VfsResult<()> {
        let lookup = self.lookup_path(path, LookupOptions::default())?;
        self.require_writable_mount(self.node(lookup.node)?, &lookup.path)?;
        self.node_mut(lookup.node)?.mtime = mtime;
        Ok(())
    }

    /// Directory entries sorted by name, without `.` and `..`.
    pub fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let lookup = self.lookup_path(path, LookupOptions::default())?;
        let node = self.node(lookup.node)?;
        let children = node
            .children()
            .ok_or_else(|| VfsError::not_a_directory(&lookup.path))?;
        let mut entries = children
            .iter()
            .map(|(name, id)| {
                Ok(DirEntry {
                    name: name.clone(),
                    kind: self.node(*id)?.file_type(),
                })
            })
            .collect::<VfsResult<Vec<_>>>()?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Number of live nodes, including unlinked ones still held open.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
