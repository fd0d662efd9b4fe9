use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::error::{FsError, Result};
use crate::fs::{DirEntry, FileType, Metadata};

/// Set file contents to `len` bytes, zero-filling any gap. A length the
/// process cannot hold is `InvalidInput` rather than an abort.
pub(crate) fn set_len(data: &mut Vec<u8>, len: u64, path: &str) -> Result<()> {
    let out_of_range = || FsError::InvalidInput {
        path: path.to_string(),
        reason: format!("file size {} out of range", len),
    };
    let len = usize::try_from(len).map_err(|_| out_of_range())?;
    if len > data.len() {
        data.try_reserve_exact(len - data.len())
            .map_err(|_| out_of_range())?;
    }
    data.resize(len, 0);
    Ok(())
}

/// A node shared between the tree and any files open on it.
pub(crate) type NodeRef = Arc<RwLock<Node>>;

#[derive(Debug)]
pub(crate) enum NodeKind {
    File(Vec<u8>),
    Dir(BTreeMap<String, NodeRef>),
    Symlink(String),
}

#[derive(Debug)]
pub(crate) struct Node {
    pub kind: NodeKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub accessed: SystemTime,
    pub modified: SystemTime,
}

impl Node {
    fn new(kind: NodeKind, mode: u32, uid: u32, gid: u32) -> NodeRef {
        let now = SystemTime::now();
        Arc::new(RwLock::new(Node {
            kind,
            mode: mode & 0o7777,
            uid,
            gid,
            accessed: now,
            modified: now,
        }))
    }

    pub fn new_file(mode: u32, uid: u32, gid: u32) -> NodeRef {
        Self::new(NodeKind::File(Vec::new()), mode, uid, gid)
    }

    pub fn new_dir(mode: u32, uid: u32, gid: u32) -> NodeRef {
        Self::new(NodeKind::Dir(BTreeMap::new()), mode, uid, gid)
    }

    pub fn new_symlink(target: &str, uid: u32, gid: u32) -> NodeRef {
        Self::new(NodeKind::Symlink(target.to_string()), 0o777, uid, gid)
    }

    pub fn file_type(&self) -> FileType {
        match self.kind {
            NodeKind::File(_) => FileType::File,
            NodeKind::Dir(_) => FileType::Directory,
            NodeKind::Symlink(_) => FileType::Symlink,
        }
    }

    pub fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::File(data) => data.len() as u64,
            NodeKind::Dir(children) => children.len() as u64,
            NodeKind::Symlink(target) => target.len() as u64,
        }
    }

    pub fn metadata(&self, name: &str) -> Metadata {
        Metadata {
            name: name.to_string(),
            file_type: self.file_type(),
            size: self.size(),
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            accessed: self.accessed,
            modified: self.modified,
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<String, NodeRef>> {
        match &self.kind {
            NodeKind::Dir(children) => Some(children),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut BTreeMap<String, NodeRef>> {
        match &mut self.kind {
            NodeKind::Dir(children) => Some(children),
            _ => None,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir(_))
    }

    /// Directory listing in name order.
    pub fn entries(&self) -> Vec<DirEntry> {
        self.children()
            .map(|children| {
                children
                    .iter()
                    .map(|(name, child)| DirEntry {
                        name: name.clone(),
                        file_type: child.read().file_type(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
