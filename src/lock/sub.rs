use tracing::trace;

use super::file::LockFile;
use super::LockFs;
use crate::error::{FsError, Result};
use crate::fs::path;
use crate::fs::{DirEntry, Filer, Metadata, OpenFlags};

/// Read-only view of a directory subtree of a [`LockFs`].
///
/// Names are relative to the view root, slash separated, and may not contain
/// empty, `.` or `..` elements; `.` alone names the root itself.
pub struct SubFs<'a, F> {
    fs: &'a LockFs<F>,
    dir: String,
}

impl<'a, F: Filer + 'static> SubFs<'a, F> {
    pub(crate) fn new(fs: &'a LockFs<F>, dir: &str) -> Self {
        SubFs {
            fs,
            dir: dir.to_string(),
        }
    }

    /// Directory the view is rooted at, as given to `sub`.
    pub fn root(&self) -> &str {
        &self.dir
    }

    fn full_path(&self, name: &str) -> Result<String> {
        if !path::valid_view_path(name) {
            return Err(FsError::InvalidPath {
                path: name.to_string(),
            });
        }
        Ok(path::join(&self.dir, name))
    }

    /// Open `name` read-only.
    ///
    /// A view only needs `F: Filer`, which has no plain `open`, so this goes
    /// through `open_file` and takes the filesystem lock exclusive, unlike
    /// [`LockFs::open`].
    pub fn open(&self, name: &str) -> Result<LockFile<F::File>> {
        let full = self.full_path(name)?;
        trace!("sub_open(root={}, name={})", self.dir, name);
        self.fs.open_file(&full, OpenFlags::READ_ONLY, 0)
    }

    pub fn stat(&self, name: &str) -> Result<Metadata> {
        let full = self.full_path(name)?;
        self.fs.stat(&full)
    }

    pub fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>> {
        let full = self.full_path(name)?;
        self.fs.read_dir(&full)
    }

    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let full = self.full_path(name)?;
        self.fs.read_file(&full)
    }

    /// A narrower view below this one.
    pub fn sub(&self, dir: &str) -> Result<SubFs<'a, F>> {
        let full = self.full_path(dir)?;
        self.fs.sub(&full)
    }
}
