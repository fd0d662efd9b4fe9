//! Hierarchical locking wrappers.
//!
//! [`LockFs`] owns a wrapped filesystem behind one shared/exclusive lock.
//! Inspections run under the shared lock and may overlap each other;
//! everything that can change the tree runs under the exclusive lock. Files it
//! opens come back as [`LockFile`]s that hold a weak reference to that lock
//! and take it in shared mode before their own lock, so the order is always
//! filesystem then file.

pub mod file;
mod locker;
pub mod sub;

use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::{debug, trace};

use self::file::LockFile;
use self::locker::Locker;
use self::sub::SubFs;
use crate::error::{FsError, Result};
use crate::fs::{DirEntry, FileSystem, Filer, Metadata, OpenFlags, SymlinkFileSystem};

/// Thread-safe wrapper around a [`Filer`], [`FileSystem`] or
/// [`SymlinkFileSystem`].
///
/// The operations available follow the capability of `F`: the accessor set
/// for any `Filer`, the path hierarchy set when `F: FileSystem`, and link
/// operations when `F: SymlinkFileSystem`. Every operation is also reachable
/// through the matching trait, so a `LockFs<F>` can stand in for `F`.
pub struct LockFs<F> {
    fs: Arc<RwLock<F>>,
}

impl<F: Filer + 'static> LockFs<F> {
    pub fn new(fs: F) -> Self {
        debug!("lockfs: wrapping {}", std::any::type_name::<F>());
        LockFs {
            fs: Arc::new(RwLock::new(fs)),
        }
    }

    /// Give back the wrapped filesystem. Fails, returning the wrapper, while
    /// a file operation is in flight on another thread.
    pub fn into_inner(self) -> std::result::Result<F, Self> {
        Arc::try_unwrap(self.fs)
            .map(RwLock::into_inner)
            .map_err(|fs| LockFs { fs })
    }

    fn locker(&self) -> Weak<dyn Locker> {
        let weak: Weak<RwLock<F>> = Arc::downgrade(&self.fs);
        weak
    }

    fn shared<R>(&self, op: impl FnOnce(&F) -> R) -> R {
        let fs = self.fs.read();
        op(&*fs)
    }

    fn exclusive<R>(&self, op: impl FnOnce(&mut F) -> R) -> R {
        let mut fs = self.fs.write();
        op(&mut *fs)
    }

    /// Wrap a freshly opened file. Called while the filesystem lock is held.
    fn wrap(&self, file: Result<F::File>) -> Result<LockFile<F::File>> {
        file.map(|file| LockFile::new(file, self.locker()))
    }

    pub fn open_file(&self, name: &str, flags: OpenFlags, perm: u32) -> Result<LockFile<F::File>> {
        trace!("open_file(name={}, flags={:#x}, perm={:o})", name, flags.bits(), perm);
        self.exclusive(|fs| self.wrap(fs.open_file(name, flags, perm)))
    }

    pub fn mkdir(&self, name: &str, perm: u32) -> Result<()> {
        trace!("mkdir(name={}, perm={:o})", name, perm);
        self.exclusive(|fs| fs.mkdir(name, perm))
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        trace!("remove({})", name);
        self.exclusive(|fs| fs.remove(name))
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        trace!("rename(old={}, new={})", old, new);
        self.exclusive(|fs| fs.rename(old, new))
    }

    pub fn stat(&self, name: &str) -> Result<Metadata> {
        trace!("stat({})", name);
        self.shared(|fs| fs.stat(name))
    }

    pub fn chmod(&self, name: &str, mode: u32) -> Result<()> {
        trace!("chmod(name={}, mode={:o})", name, mode);
        self.exclusive(|fs| fs.chmod(name, mode))
    }

    pub fn chtimes(&self, name: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        trace!("chtimes({})", name);
        self.exclusive(|fs| fs.chtimes(name, atime, mtime))
    }

    pub fn chown(&self, name: &str, uid: u32, gid: u32) -> Result<()> {
        trace!("chown(name={}, uid={}, gid={})", name, uid, gid);
        self.exclusive(|fs| fs.chown(name, uid, gid))
    }

    pub fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>> {
        trace!("read_dir({})", name);
        self.shared(|fs| fs.read_dir(name))
    }

    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        trace!("read_file({})", name);
        self.shared(|fs| fs.read_file(name))
    }

    /// A read-only view of the subtree rooted at `dir`. The view borrows this
    /// wrapper and locks through it on every call.
    pub fn sub(&self, dir: &str) -> Result<SubFs<'_, F>> {
        trace!("sub({})", dir);
        let meta = self.shared(|fs| fs.stat(dir))?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory {
                path: dir.to_string(),
            });
        }
        debug!("sub view rooted at {}", dir);
        Ok(SubFs::new(self, dir))
    }
}

impl<F: FileSystem + 'static> LockFs<F> {
    pub fn chdir(&self, dir: &str) -> Result<()> {
        trace!("chdir({})", dir);
        self.exclusive(|fs| fs.chdir(dir))
    }

    pub fn getwd(&self) -> Result<String> {
        trace!("getwd()");
        self.shared(|fs| fs.getwd())
    }

    pub fn temp_dir(&self) -> String {
        self.shared(|fs| fs.temp_dir())
    }

    /// Open read-only. Shared mode, since nothing can be created.
    pub fn open(&self, name: &str) -> Result<LockFile<F::File>> {
        trace!("open({})", name);
        self.shared(|fs| self.wrap(fs.open(name)))
    }

    pub fn create(&self, name: &str) -> Result<LockFile<F::File>> {
        trace!("create({})", name);
        self.exclusive(|fs| self.wrap(fs.create(name)))
    }

    pub fn mkdir_all(&self, name: &str, perm: u32) -> Result<()> {
        trace!("mkdir_all(name={}, perm={:o})", name, perm);
        self.exclusive(|fs| fs.mkdir_all(name, perm))
    }

    pub fn remove_all(&self, name: &str) -> Result<()> {
        trace!("remove_all({})", name);
        self.exclusive(|fs| fs.remove_all(name))
    }

    pub fn truncate(&self, name: &str, size: u64) -> Result<()> {
        trace!("truncate(name={}, size={})", name, size);
        self.exclusive(|fs| fs.truncate(name, size))
    }

    pub fn write_file(&self, name: &str, data: &[u8], perm: u32) -> Result<()> {
        trace!("write_file(name={}, len={})", name, data.len());
        self.exclusive(|fs| fs.write_file(name, data, perm))
    }
}

impl<F: SymlinkFileSystem + 'static> LockFs<F> {
    pub fn lstat(&self, name: &str) -> Result<Metadata> {
        trace!("lstat({})", name);
        self.shared(|fs| fs.lstat(name))
    }

    pub fn lchown(&self, name: &str, uid: u32, gid: u32) -> Result<()> {
        trace!("lchown(name={}, uid={}, gid={})", name, uid, gid);
        self.exclusive(|fs| fs.lchown(name, uid, gid))
    }

    pub fn readlink(&self, name: &str) -> Result<String> {
        trace!("readlink({})", name);
        self.shared(|fs| fs.readlink(name))
    }

    pub fn symlink(&self, target: &str, link: &str) -> Result<()> {
        trace!("symlink(target={}, link={})", target, link);
        self.exclusive(|fs| fs.symlink(target, link))
    }
}

impl<F: Filer + 'static> Filer for LockFs<F> {
    type File = LockFile<F::File>;

    fn open_file(&mut self, name: &str, flags: OpenFlags, perm: u32) -> Result<Self::File> {
        LockFs::open_file(self, name, flags, perm)
    }

    fn mkdir(&mut self, name: &str, perm: u32) -> Result<()> {
        LockFs::mkdir(self, name, perm)
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        LockFs::remove(self, name)
    }

    fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        LockFs::rename(self, old, new)
    }

    fn stat(&self, name: &str) -> Result<Metadata> {
        LockFs::stat(self, name)
    }

    fn chmod(&mut self, name: &str, mode: u32) -> Result<()> {
        LockFs::chmod(self, name, mode)
    }

    fn chtimes(&mut self, name: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        LockFs::chtimes(self, name, atime, mtime)
    }

    fn chown(&mut self, name: &str, uid: u32, gid: u32) -> Result<()> {
        LockFs::chown(self, name, uid, gid)
    }

    fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>> {
        LockFs::read_dir(self, name)
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        LockFs::read_file(self, name)
    }
}

impl<F: FileSystem + 'static> FileSystem for LockFs<F> {
    fn chdir(&mut self, dir: &str) -> Result<()> {
        LockFs::chdir(self, dir)
    }

    fn getwd(&self) -> Result<String> {
        LockFs::getwd(self)
    }

    fn temp_dir(&self) -> String {
        LockFs::temp_dir(self)
    }

    fn open(&self, name: &str) -> Result<Self::File> {
        LockFs::open(self, name)
    }

    fn create(&mut self, name: &str) -> Result<Self::File> {
        LockFs::create(self, name)
    }

    fn mkdir_all(&mut self, name: &str, perm: u32) -> Result<()> {
        LockFs::mkdir_all(self, name, perm)
    }

    fn remove_all(&mut self, name: &str) -> Result<()> {
        LockFs::remove_all(self, name)
    }

    fn truncate(&mut self, name: &str, size: u64) -> Result<()> {
        LockFs::truncate(self, name, size)
    }

    fn write_file(&mut self, name: &str, data: &[u8], perm: u32) -> Result<()> {
        LockFs::write_file(self, name, data, perm)
    }
}

impl<F: SymlinkFileSystem + 'static> SymlinkFileSystem for LockFs<F> {
    fn lstat(&self, name: &str) -> Result<Metadata> {
        LockFs::lstat(self, name)
    }

    fn lchown(&mut self, name: &str, uid: u32, gid: u32) -> Result<()> {
        LockFs::lchown(self, name, uid, gid)
    }

    fn readlink(&self, name: &str) -> Result<String> {
        LockFs::readlink(self, name)
    }

    fn symlink(&mut self, target: &str, link: &str) -> Result<()> {
        LockFs::symlink(self, target, link)
    }
}
