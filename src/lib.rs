//! Thread-safe wrappers for abstract filesystems.
//!
//! A [`LockFs`] wraps any [`Filer`], [`FileSystem`] or [`SymlinkFileSystem`]
//! behind one shared/exclusive lock, and every file it opens comes back as a
//! [`LockFile`] with a lock of its own that coordinates with the filesystem
//! lock. See the [`lock`] module for the locking rules.

pub mod config;
pub mod error;
pub mod fs;
pub mod lock;
pub mod memfs;
pub mod osfs;
pub mod stress;

pub use error::{FsError, Result};
pub use fs::{DirEntry, File, FileSystem, FileType, Filer, Metadata, OpenFlags, SymlinkFileSystem};
pub use lock::file::LockFile;
pub use lock::sub::SubFs;
pub use lock::LockFs;
pub use memfs::MemFs;
pub use osfs::OsFs;

/// Wrap a file accessor.
pub fn new_filer<F: Filer + 'static>(fs: F) -> LockFs<F> {
    LockFs::new(fs)
}

/// Wrap a full filesystem.
pub fn new_fs<F: FileSystem + 'static>(fs: F) -> LockFs<F> {
    LockFs::new(fs)
}

/// Wrap a symlink-capable filesystem.
pub fn new_symlink_fs<F: SymlinkFileSystem + 'static>(fs: F) -> LockFs<F> {
    LockFs::new(fs)
}
