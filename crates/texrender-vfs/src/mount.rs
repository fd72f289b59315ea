//! Mount tree.
//!
//! Every mount owns a root directory node. A mount other than `/` is attached
//! to a directory node (its mountpoint), which records the mount in its
//! `mounted` field so lookups can cross into it.

use std::collections::BTreeMap;

use crate::node::NodeId;

/// Mount identifier; doubles as the `dev` number reported by `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MountId(pub(crate) u32);

impl MountId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Options for a new mount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountOptions {
    /// Reject every mutation through this mount.
    pub read_only: bool,
}

impl MountOptions {
    pub fn read_only() -> Self {
        Self { read_only: true }
    }
}

/// Information about a mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    /// The mount path (e.g., "/tex").
    pub path: String,
    /// Whether this mount is read-only.
    pub read_only: bool,
}

#[derive(Debug)]
pub(crate) struct Mount {
    pub id: MountId,
    pub mountpoint: String,
    /// Root directory node of this mount.
    pub root: NodeId,
    /// Parent mount and the directory node in it we are attached to.
    /// `None` only for `/`.
    pub attached: Option<(MountId, NodeId)>,
    pub options: MountOptions,
    pub children: Vec<MountId>,
}

/// All live mounts, keyed by id.
#[derive(Debug, Default)]
pub(crate) struct MountTable {
    mounts: BTreeMap<MountId, Mount>,
    next_id: u32,
}

impl MountTable {
    pub fn allocate_id(&mut self) -> MountId {
        self.next_id += 1;
        MountId(self.next_id)
    }

    pub fn insert(&mut self, mount: Mount) {
        if let Some(parent) = mount.attached.and_then(|(p, _)| self.mounts.get_mut(&p)) {
            parent.children.push(mount.id);
        }
        self.mounts.insert(mount.id, mount);
    }

    pub fn remove(&mut self, id: MountId) -> Option<Mount> {
        let mount = self.mounts.remove(&id)?;
        if let Some(parent) = mount.attached.and_then(|(p, _)| self.mounts.get_mut(&p)) {
            parent.children.retain(|child| *child != id);
        }
        Some(mount)
    }

    pub fn get(&self, id: MountId) -> Option<&Mount> {
        self.mounts.get(&id)
    }

    pub fn is_read_only(&self, id: MountId) -> bool {
        self.mounts
            .get(&id)
            .is_some_and(|mount| mount.options.read_only)
    }

    /// Mounts in mountpoint order.
    pub fn list(&self) -> Vec<MountInfo> {
        let mut infos: Vec<MountInfo> = self
            .mounts
            .values()
            .map(|mount| MountInfo {
                path: mount.mountpoint.clone(),
                read_only: mount.options.read_only,
            })
            .collect();
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        infos
    }

    pub fn clear(&mut self) {
        self.mounts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount(table: &mut MountTable, path: &str, attached: Option<(MountId, NodeId)>) -> MountId {
        let id = table.allocate_id();
        table.insert(Mount {
            id,
            mountpoint: path.to_string(),
            root: NodeId(id.0 as u64 * 100),
            attached,
            options: MountOptions::default(),
            children: Vec::new(),
        });
        id
    }

    #[test]
    fn test_children_tracked() {
        let mut table = MountTable::default();
        let root = mount(&mut table, "/", None);
        let child = mount(&mut table, "/tex", Some((root, NodeId(7))));
        assert_eq!(table.get(root).map(|m| m.children.clone()), Some(vec![child]));

        table.remove(child);
        assert!(table.get(root).is_some_and(|m| m.children.is_empty()));
    }

    #[test]
    fn test_list_sorted() {
        let mut table = MountTable::default();
        let root = mount(&mut table, "/", None);
        mount(&mut table, "/work", Some((root, NodeId(2))));
        mount(&mut table, "/tex", Some((root, NodeId(3))));
        let paths: Vec<String> = table.list().into_iter().map(|m| m.path).collect();
        assert_eq!(paths, vec!["/", "/tex", "/work"]);
    }
}
