//! Filesystem capability sets.
//!
//! Methods that only inspect state take `&self`; methods that change state
//! take `&mut self`. An implementation does not need to be usable from
//! several threads at once through `&mut` access; `LockFs` provides that.

pub mod path;
pub mod types;

use std::io::{self, SeekFrom};
use std::time::SystemTime;

pub use self::types::{DirEntry, FileType, Metadata, OpenFlags};
use crate::error::Result;

/// An open file or directory.
pub trait File: Send + Sync {
    /// Name the file was opened with.
    fn name(&self) -> &str;

    /// Read into `buf` from the current offset. Returns 0 at end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Read into `buf` from `offset` without moving the cursor.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Write `buf` at `offset` without moving the cursor.
    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize>;

    fn write_str(&mut self, s: &str) -> Result<usize> {
        self.write(s.as_bytes())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    fn stat(&self) -> Result<Metadata>;

    fn sync(&mut self) -> Result<()>;

    fn truncate(&mut self, size: u64) -> Result<()>;

    /// Next directory entries with full metadata. `None` reads everything
    /// that is left; an empty result means the listing is exhausted.
    fn readdir(&mut self, n: Option<usize>) -> Result<Vec<Metadata>>;

    /// Like `readdir` but returns only names.
    fn readdir_names(&mut self, n: Option<usize>) -> Result<Vec<String>>;

    /// Like `readdir` but returns `DirEntry` values.
    fn read_dir(&mut self, n: Option<usize>) -> Result<Vec<DirEntry>>;

    fn close(&mut self) -> Result<()>;
}

/// Minimal file accessor: open files and manipulate single paths.
pub trait Filer: Send + Sync {
    type File: File;

    fn open_file(&mut self, name: &str, flags: OpenFlags, perm: u32) -> Result<Self::File>;

    fn mkdir(&mut self, name: &str, perm: u32) -> Result<()>;

    /// Remove a file or an empty directory.
    fn remove(&mut self, name: &str) -> Result<()>;

    fn rename(&mut self, old: &str, new: &str) -> Result<()>;

    fn stat(&self, name: &str) -> Result<Metadata>;

    fn chmod(&mut self, name: &str, mode: u32) -> Result<()>;

    fn chtimes(&mut self, name: &str, atime: SystemTime, mtime: SystemTime) -> Result<()>;

    fn chown(&mut self, name: &str, uid: u32, gid: u32) -> Result<()>;

    /// Entries of the named directory, sorted by name.
    fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>>;

    fn read_file(&self, name: &str) -> Result<Vec<u8>>;
}

/// A full path hierarchy with a working directory.
pub trait FileSystem: Filer {
    fn chdir(&mut self, dir: &str) -> Result<()>;

    fn getwd(&self) -> Result<String>;

    fn temp_dir(&self) -> String;

    /// Open an existing file read-only. Never creates anything.
    fn open(&self, name: &str) -> Result<Self::File>;

    /// Create or truncate `name` and open it read-write.
    fn create(&mut self, name: &str) -> Result<Self::File> {
        self.open_file(
            name,
            OpenFlags::READ_WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            0o666,
        )
    }

    fn mkdir_all(&mut self, name: &str, perm: u32) -> Result<()>;

    /// Remove `name` and everything below it. Missing paths are not an error.
    fn remove_all(&mut self, name: &str) -> Result<()>;

    fn truncate(&mut self, name: &str, size: u64) -> Result<()>;

    /// Replace the contents of `name`, creating it with `perm` if needed.
    fn write_file(&mut self, name: &str, data: &[u8], perm: u32) -> Result<()> {
        let mut file = self.open_file(
            name,
            OpenFlags::WRITE_ONLY | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            perm,
        )?;
        let mut written = 0;
        while written < data.len() {
            let n = file.write(&data[written..])?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
            written += n;
        }
        file.close()
    }
}

/// A filesystem that also understands symbolic links.
pub trait SymlinkFileSystem: FileSystem {
    /// Like `stat` but describes a symlink itself rather than its target.
    fn lstat(&self, name: &str) -> Result<Metadata>;

    fn lchown(&mut self, name: &str, uid: u32, gid: u32) -> Result<()>;

    fn readlink(&self, name: &str) -> Result<String>;

    /// Create `link` pointing at `target`.
    fn symlink(&mut self, target: &str, link: &str) -> Result<()>;
}
