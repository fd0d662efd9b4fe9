use std::fmt;
use std::io::SeekFrom;
use std::sync::Weak;

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::locker::{Locker, ParentReadGuard};
use crate::error::Result;
use crate::fs::{DirEntry, File, Metadata};

/// A thread-safe open file.
///
/// Every operation except `name` and `close` first takes the lock of the
/// filesystem that opened it in shared mode, then this file's own lock:
///
/// - `read_at` and `stat` take the file lock shared;
/// - everything that moves the cursor or changes contents takes it exclusive;
/// - `close` takes only the file lock, exclusive.
///
/// Locks are released in the reverse order. Holding the parent shared keeps
/// I/O on this file from overlapping a remove, rename or truncate issued
/// through the filesystem, without making peer files wait on each other.
pub struct LockFile<H> {
    file: RwLock<H>,
    name: String,
    parent: Weak<dyn Locker>,
}

impl<H> fmt::Debug for LockFile<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFile").field("name", &self.name).finish_non_exhaustive()
    }
}

impl<H: File> LockFile<H> {
    pub(crate) fn new(file: H, parent: Weak<dyn Locker>) -> Self {
        let name = file.name().to_string();
        trace!("wrap_file({})", name);
        LockFile {
            file: RwLock::new(file),
            name,
            parent,
        }
    }

    fn shared<R>(&self, op: impl FnOnce(&H) -> R) -> R {
        let _fs = ParentReadGuard::acquire(&self.parent);
        let file = self.file.read();
        op(&*file)
    }

    fn exclusive<R>(&self, op: impl FnOnce(&mut H) -> R) -> R {
        let _fs = ParentReadGuard::acquire(&self.parent);
        let mut file = self.file.write();
        op(&mut *file)
    }

    /// Name given at open time. Takes no lock.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        trace!("read(name={}, len={})", self.name, buf.len());
        self.exclusive(|f| f.read(buf))
    }

    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        trace!("read_at(name={}, len={}, offset={})", self.name, buf.len(), offset);
        self.shared(|f| f.read_at(buf, offset))
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        trace!("write(name={}, len={})", self.name, buf.len());
        self.exclusive(|f| f.write(buf))
    }

    pub fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        trace!("write_at(name={}, len={}, offset={})", self.name, buf.len(), offset);
        self.exclusive(|f| f.write_at(buf, offset))
    }

    pub fn write_str(&self, s: &str) -> Result<usize> {
        trace!("write_str(name={}, len={})", self.name, s.len());
        self.exclusive(|f| f.write_str(s))
    }

    pub fn seek(&self, pos: SeekFrom) -> Result<u64> {
        trace!("seek(name={}, pos={:?})", self.name, pos);
        self.exclusive(|f| f.seek(pos))
    }

    pub fn stat(&self) -> Result<Metadata> {
        trace!("fstat(name={})", self.name);
        self.shared(|f| f.stat())
    }

    pub fn sync(&self) -> Result<()> {
        trace!("sync(name={})", self.name);
        self.exclusive(|f| f.sync())
    }

    pub fn truncate(&self, size: u64) -> Result<()> {
        trace!("ftruncate(name={}, size={})", self.name, size);
        self.exclusive(|f| f.truncate(size))
    }

    pub fn readdir(&self, n: Option<usize>) -> Result<Vec<Metadata>> {
        trace!("readdir(name={}, n={:?})", self.name, n);
        self.exclusive(|f| f.readdir(n))
    }

    pub fn readdir_names(&self, n: Option<usize>) -> Result<Vec<String>> {
        trace!("readdir_names(name={}, n={:?})", self.name, n);
        self.exclusive(|f| f.readdir_names(n))
    }

    pub fn read_dir(&self, n: Option<usize>) -> Result<Vec<DirEntry>> {
        trace!("read_dir(name={}, n={:?})", self.name, n);
        self.exclusive(|f| f.read_dir(n))
    }

    /// Close the underlying file. Does not touch the filesystem lock.
    pub fn close(&self) -> Result<()> {
        debug!("close({})", self.name);
        let mut file = self.file.write();
        file.close()
    }
}

impl<H: File> File for LockFile<H> {
    fn name(&self) -> &str {
        LockFile::name(self)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        LockFile::read(self, buf)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        LockFile::read_at(self, buf, offset)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        LockFile::write(self, buf)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        LockFile::write_at(self, buf, offset)
    }

    fn write_str(&mut self, s: &str) -> Result<usize> {
        LockFile::write_str(self, s)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        LockFile::seek(self, pos)
    }

    fn stat(&self) -> Result<Metadata> {
        LockFile::stat(self)
    }

    fn sync(&mut self) -> Result<()> {
        LockFile::sync(self)
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        LockFile::truncate(self, size)
    }

    fn readdir(&mut self, n: Option<usize>) -> Result<Vec<Metadata>> {
        LockFile::readdir(self, n)
    }

    fn readdir_names(&mut self, n: Option<usize>) -> Result<Vec<String>> {
        LockFile::readdir_names(self, n)
    }

    fn read_dir(&mut self, n: Option<usize>) -> Result<Vec<DirEntry>> {
        LockFile::read_dir(self, n)
    }

    fn close(&mut self) -> Result<()> {
        LockFile::close(self)
    }
}
