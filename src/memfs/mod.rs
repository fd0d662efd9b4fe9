//! In-memory filesystem backend.
//!
//! `MemFs` keeps the whole tree in memory. Open files share their node with
//! the tree, so writes through a file are visible to `stat` and `read_file`
//! immediately and a removed file stays readable through handles that are
//! already open.

mod file;
mod node;

use std::time::SystemTime;

use tracing::debug;

pub use self::file::MemFile;
use self::node::{set_len, Node, NodeKind, NodeRef};
use crate::error::{FsError, Result};
use crate::fs::path;
use crate::fs::{DirEntry, FileSystem, Filer, Metadata, OpenFlags, SymlinkFileSystem};

/// Symlink expansions allowed while resolving one path.
const MAX_LINKS: usize = 40;

const TEMP_DIR: &str = "/tmp";

pub struct MemFs {
    root: NodeRef,
    cwd: String,
    uid: u32,
    gid: u32,
}

impl MemFs {
    /// An empty filesystem containing only `/`, owned by the current user.
    pub fn new() -> Self {
        let uid = nix::unistd::getuid().as_raw();
        let gid = nix::unistd::getgid().as_raw();
        MemFs {
            root: Node::new_dir(0o755, uid, gid),
            cwd: "/".to_string(),
            uid,
            gid,
        }
    }

    fn abs(&self, name: &str) -> String {
        path::resolve(&self.cwd, name)
    }

    /// Resolve `name` to a node. Symlinks in intermediate components are
    /// always followed; the last component only when `follow` is set.
    /// Returns the node and the path it was reached by.
    fn walk(&self, name: &str, follow: bool) -> Result<(NodeRef, String)> {
        let mut full = self.abs(name);
        let mut links = 0;

        'restart: loop {
            let comps: Vec<String> = path::components(&full).map(str::to_string).collect();
            let mut node = self.root.clone();

            for (i, comp) in comps.iter().enumerate() {
                let child = {
                    let guard = node.read();
                    let children = guard.children().ok_or_else(|| FsError::NotADirectory {
                        path: format!("/{}", comps[..i].join("/")),
                    })?;
                    children.get(comp).cloned()
                };
                let child = child.ok_or_else(|| FsError::NotFound { path: full.clone() })?;

                let is_last = i + 1 == comps.len();
                let target = match &child.read().kind {
                    NodeKind::Symlink(target) if !is_last || follow => Some(target.clone()),
                    _ => None,
                };

                if let Some(target) = target {
                    links += 1;
                    if links > MAX_LINKS {
                        return Err(FsError::TooManyLinks { path: full });
                    }
                    let parent = format!("/{}", comps[..i].join("/"));
                    let base = path::resolve(&parent, &target);
                    let rest = comps[i + 1..].join("/");
                    full = if rest.is_empty() {
                        base
                    } else {
                        path::clean(&format!("{}/{}", base, rest))
                    };
                    continue 'restart;
                }

                node = child;
            }

            return Ok((node, full));
        }
    }

    /// The directory that holds `name`, plus the base name within it.
    fn parent_dir(&self, name: &str) -> Result<(NodeRef, String, String)> {
        let full = self.abs(name);
        if full == "/" {
            return Err(FsError::InvalidInput {
                path: full,
                reason: "operation not permitted on the root".to_string(),
            });
        }
        let (parent, base) = path::split(&full);
        let (dir, _) = self.walk(parent, true)?;
        if !dir.read().is_dir() {
            return Err(FsError::NotADirectory {
                path: parent.to_string(),
            });
        }
        let base = base.to_string();
        Ok((dir, base, full))
    }

    fn child(dir: &NodeRef, base: &str) -> Option<NodeRef> {
        dir.read().children().and_then(|c| c.get(base).cloned())
    }

    fn insert(&self, name: &str, node: NodeRef) -> Result<String> {
        let (dir, base, full) = self.parent_dir(name)?;
        let mut guard = dir.write();
        let children = guard
            .children_mut()
            .ok_or_else(|| FsError::NotADirectory { path: full.clone() })?;
        if children.contains_key(&base) {
            return Err(FsError::AlreadyExists { path: full });
        }
        children.insert(base, node);
        guard.modified = SystemTime::now();
        Ok(full)
    }

    /// Open an existing node.
    fn open_existing(&self, name: &str, flags: OpenFlags) -> Result<MemFile> {
        let (node, full) = self.walk(name, true)?;
        {
            let mut guard = node.write();
            if guard.is_dir() && flags.writable() {
                return Err(FsError::IsADirectory { path: full });
            }
            if flags.contains(OpenFlags::TRUNCATE) && flags.writable() {
                if let NodeKind::File(data) = &mut guard.kind {
                    data.clear();
                    guard.modified = SystemTime::now();
                }
            }
        }
        Ok(MemFile::new(name, node, flags))
    }

    fn set_attr(&self, name: &str, follow: bool, update: impl FnOnce(&mut Node)) -> Result<()> {
        let (node, _) = self.walk(name, follow)?;
        update(&mut *node.write());
        Ok(())
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl Filer for MemFs {
    type File = MemFile;

    fn open_file(&mut self, name: &str, flags: OpenFlags, perm: u32) -> Result<MemFile> {
        match self.walk(name, true) {
            Ok(_) if flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUSIVE) => {
                Err(FsError::AlreadyExists {
                    path: self.abs(name),
                })
            }
            Ok(_) => self.open_existing(name, flags),
            Err(e) if e.is_not_found() && flags.contains(OpenFlags::CREATE) => {
                let node = Node::new_file(perm, self.uid, self.gid);
                let full = self.insert(name, node.clone())?;
                debug!("memfs: created {}", full);
                Ok(MemFile::new(name, node, flags))
            }
            Err(e) => Err(e),
        }
    }

    fn mkdir(&mut self, name: &str, perm: u32) -> Result<()> {
        let full = self.insert(name, Node::new_dir(perm, self.uid, self.gid))?;
        debug!("memfs: mkdir {}", full);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        let (dir, base, full) = self.parent_dir(name)?;
        let child = Self::child(&dir, &base).ok_or_else(|| FsError::NotFound { path: full.clone() })?;
        if child.read().children().is_some_and(|c| !c.is_empty()) {
            return Err(FsError::DirectoryNotEmpty { path: full });
        }
        let mut guard = dir.write();
        if let Some(children) = guard.children_mut() {
            children.remove(&base);
        }
        guard.modified = SystemTime::now();
        debug!("memfs: removed {}", full);
        Ok(())
    }

    fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        let (old_dir, old_base, old_full) = self.parent_dir(old)?;
        let (new_dir, new_base, new_full) = self.parent_dir(new)?;
        if old_full == new_full {
            return Ok(());
        }
        let src = Self::child(&old_dir, &old_base).ok_or_else(|| FsError::NotFound {
            path: old_full.clone(),
        })?;
        let src_is_dir = src.read().is_dir();
        if src_is_dir && new_full.starts_with(&format!("{}/", old_full)) {
            return Err(FsError::InvalidInput {
                path: new_full,
                reason: "cannot move a directory into itself".to_string(),
            });
        }

        if let Some(dst) = Self::child(&new_dir, &new_base) {
            let dst = dst.read();
            match dst.children() {
                Some(_) if !src_is_dir => return Err(FsError::IsADirectory { path: new_full }),
                Some(c) if !c.is_empty() => {
                    return Err(FsError::DirectoryNotEmpty { path: new_full });
                }
                None if src_is_dir => return Err(FsError::NotADirectory { path: new_full }),
                _ => {}
            }
        }

        let now = SystemTime::now();
        {
            let mut guard = old_dir.write();
            if let Some(children) = guard.children_mut() {
                children.remove(&old_base);
            }
            guard.modified = now;
        }
        {
            let mut guard = new_dir.write();
            if let Some(children) = guard.children_mut() {
                children.insert(new_base, src);
            }
            guard.modified = now;
        }
        debug!("memfs: renamed {} -> {}", old_full, new_full);
        Ok(())
    }

    fn stat(&self, name: &str) -> Result<Metadata> {
        let (node, _) = self.walk(name, true)?;
        let meta = node.read().metadata(path::base(&self.abs(name)));
        Ok(meta)
    }

    fn chmod(&mut self, name: &str, mode: u32) -> Result<()> {
        self.set_attr(name, true, |node| node.mode = mode & 0o7777)
    }

    fn chtimes(&mut self, name: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        self.set_attr(name, true, |node| {
            node.accessed = atime;
            node.modified = mtime;
        })
    }

    fn chown(&mut self, name: &str, uid: u32, gid: u32) -> Result<()> {
        self.set_attr(name, true, |node| {
            node.uid = uid;
            node.gid = gid;
        })
    }

    fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>> {
        let (node, full) = self.walk(name, true)?;
        let guard = node.read();
        if !guard.is_dir() {
            return Err(FsError::NotADirectory { path: full });
        }
        Ok(guard.entries())
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let (node, full) = self.walk(name, true)?;
        let guard = node.read();
        match &guard.kind {
            NodeKind::File(data) => Ok(data.clone()),
            _ => Err(FsError::IsADirectory { path: full }),
        }
    }
}

impl FileSystem for MemFs {
    fn chdir(&mut self, dir: &str) -> Result<()> {
        let (node, full) = self.walk(dir, true)?;
        if !node.read().is_dir() {
            return Err(FsError::NotADirectory { path: full });
        }
        self.cwd = full;
        Ok(())
    }

    fn getwd(&self) -> Result<String> {
        Ok(self.cwd.clone())
    }

    fn temp_dir(&self) -> String {
        TEMP_DIR.to_string()
    }

    fn open(&self, name: &str) -> Result<MemFile> {
        self.open_existing(name, OpenFlags::READ_ONLY)
    }

    fn mkdir_all(&mut self, name: &str, perm: u32) -> Result<()> {
        let full = self.abs(name);
        let mut prefix = String::new();
        for comp in path::components(&full) {
            prefix.push('/');
            prefix.push_str(comp);
            match self.walk(&prefix, true) {
                Ok((node, _)) if node.read().is_dir() => {}
                Ok(_) => return Err(FsError::NotADirectory { path: prefix }),
                Err(e) if e.is_not_found() => self.mkdir(&prefix, perm)?,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn remove_all(&mut self, name: &str) -> Result<()> {
        let (dir, base, full) = match self.parent_dir(name) {
            Ok(found) => found,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        let mut guard = dir.write();
        if let Some(children) = guard.children_mut() {
            if children.remove(&base).is_some() {
                debug!("memfs: removed tree {}", full);
            }
        }
        guard.modified = SystemTime::now();
        Ok(())
    }

    fn truncate(&mut self, name: &str, size: u64) -> Result<()> {
        let (node, full) = self.walk(name, true)?;
        let mut guard = node.write();
        match &mut guard.kind {
            NodeKind::File(data) => set_len(data, size, &full)?,
            _ => return Err(FsError::IsADirectory { path: full }),
        }
        guard.modified = SystemTime::now();
        Ok(())
    }
}

impl SymlinkFileSystem for MemFs {
    fn lstat(&self, name: &str) -> Result<Metadata> {
        let (node, _) = self.walk(name, false)?;
        let meta = node.read().metadata(path::base(&self.abs(name)));
        Ok(meta)
    }

    fn lchown(&mut self, name: &str, uid: u32, gid: u32) -> Result<()> {
        self.set_attr(name, false, |node| {
            node.uid = uid;
            node.gid = gid;
        })
    }

    fn readlink(&self, name: &str) -> Result<String> {
        let (node, full) = self.walk(name, false)?;
        let guard = node.read();
        match &guard.kind {
            NodeKind::Symlink(target) => Ok(target.clone()),
            _ => Err(FsError::InvalidInput {
                path: full,
                reason: "not a symbolic link".to_string(),
            }),
        }
    }

    fn symlink(&mut self, target: &str, link: &str) -> Result<()> {
        let full = self.insert(link, Node::new_symlink(target, self.uid, self.gid))?;
        debug!("memfs: symlink {} -> {}", full, target);
        Ok(())
    }
}
