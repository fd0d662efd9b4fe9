//! Passthrough backend over a host directory.
//!
//! Virtual absolute paths map below the root directory given to
//! [`OsFs::new`]. `..` is applied lexically and stops at the root, and the
//! working directory is tracked virtually, so the process working directory
//! is never touched.
//!
//! Links made through `symlink` stay inside the root as well: absolute
//! targets are rewritten below it, and a relative target that would climb
//! above it from the link's directory is refused. Links already present in
//! the host tree are followed as the host resolves them.

mod file;

use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use nix::errno::Errno;
use nix::sys::time::TimeVal;
use tracing::debug;

pub use self::file::OsFile;
use crate::error::{FsError, Result};
use crate::fs::path;
use crate::fs::{DirEntry, FileSystem, FileType, Filer, Metadata, OpenFlags, SymlinkFileSystem};

const TEMP_DIR: &str = "/tmp";

pub struct OsFs {
    root: PathBuf,
    cwd: String,
}

/// Attach the virtual path to a host I/O error, mapping the common errno
/// values onto their `FsError` kinds.
pub(crate) trait IoResultExt<T> {
    fn at(self, path: &str) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: &str) -> Result<T> {
        self.map_err(|err| {
            let path = path.to_string();
            match err.kind() {
                io::ErrorKind::NotFound => return FsError::NotFound { path },
                io::ErrorKind::AlreadyExists => return FsError::AlreadyExists { path },
                io::ErrorKind::PermissionDenied => return FsError::PermissionDenied { path },
                _ => {}
            }
            match err.raw_os_error().map(Errno::from_raw) {
                Some(Errno::ENOTDIR) => FsError::NotADirectory { path },
                Some(Errno::EISDIR) => FsError::IsADirectory { path },
                Some(Errno::ENOTEMPTY) => FsError::DirectoryNotEmpty { path },
                Some(Errno::ELOOP) => FsError::TooManyLinks { path },
                _ => FsError::Io(err),
            }
        })
    }
}

fn file_type(ft: fs::FileType) -> FileType {
    if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_dir() {
        FileType::Directory
    } else {
        FileType::File
    }
}

pub(crate) fn convert_metadata(name: &str, meta: &fs::Metadata) -> io::Result<Metadata> {
    Ok(Metadata {
        name: name.to_string(),
        file_type: file_type(meta.file_type()),
        size: meta.len(),
        mode: meta.mode() & 0o7777,
        uid: meta.uid(),
        gid: meta.gid(),
        accessed: meta.accessed()?,
        modified: meta.modified()?,
    })
}

fn timeval(t: SystemTime) -> TimeVal {
    let since = t.duration_since(UNIX_EPOCH).unwrap_or_default();
    TimeVal::new(since.as_secs() as _, since.subsec_micros() as _)
}

impl OsFs {
    /// Serve the tree below `root`, which must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let shown = root.as_ref().display().to_string();
        let root = fs::canonicalize(root.as_ref()).at(&shown)?;
        if !root.is_dir() {
            return Err(FsError::NotADirectory { path: shown });
        }
        debug!("osfs: rooted at {}", root.display());
        Ok(OsFs {
            root,
            cwd: "/".to_string(),
        })
    }

    /// Host directory backing `/`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn abs(&self, name: &str) -> String {
        path::resolve(&self.cwd, name)
    }

    /// Virtual path of `name` and the host path it maps to.
    fn host(&self, name: &str) -> (String, PathBuf) {
        let abs = self.abs(name);
        let host = self.root.join(abs.trim_start_matches('/'));
        (abs, host)
    }

    /// Follow a relative link `target` from `link_dir` the way the host will,
    /// and refuse it if any step lands outside the root.
    fn contain_target(&self, link_dir: &str, target: &str) -> Result<()> {
        let escapes = || FsError::InvalidPath {
            path: target.to_string(),
        };
        let mut at = fs::canonicalize(self.host(link_dir).1).at(link_dir)?;
        if !at.starts_with(&self.root) {
            return Err(escapes());
        }
        for part in target.split('/') {
            match part {
                "" | "." => continue,
                ".." => {
                    if at == self.root {
                        return Err(escapes());
                    }
                    at.pop();
                }
                name => {
                    at.push(name);
                    // Existing entries may be links themselves.
                    if let Ok(real) = fs::canonicalize(&at) {
                        at = real;
                    }
                }
            }
            if !at.starts_with(&self.root) {
                return Err(escapes());
            }
        }
        Ok(())
    }

    fn stat_with(&self, name: &str, follow: bool) -> Result<Metadata> {
        let (abs, host) = self.host(name);
        let meta = if follow {
            fs::metadata(&host)
        } else {
            fs::symlink_metadata(&host)
        };
        meta.and_then(|m| convert_metadata(path::base(&abs), &m))
            .at(&abs)
    }
}

impl Filer for OsFs {
    type File = OsFile;

    fn open_file(&mut self, name: &str, flags: OpenFlags, perm: u32) -> Result<OsFile> {
        let (abs, host) = self.host(name);
        let writable = flags.writable();
        let mut opts = OpenOptions::new();
        opts.read(flags.readable())
            .write(writable)
            .append(writable && flags.contains(OpenFlags::APPEND))
            .mode(perm);
        if writable {
            if flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUSIVE) {
                opts.create_new(true);
            } else {
                opts.create(flags.contains(OpenFlags::CREATE));
            }
            opts.truncate(flags.contains(OpenFlags::TRUNCATE));
        }
        let file = opts.open(&host).at(&abs)?;
        Ok(OsFile::new(name, host, file))
    }

    fn mkdir(&mut self, name: &str, perm: u32) -> Result<()> {
        let (abs, host) = self.host(name);
        DirBuilder::new().mode(perm).create(&host).at(&abs)?;
        debug!("osfs: mkdir {}", abs);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        let (abs, host) = self.host(name);
        let meta = fs::symlink_metadata(&host).at(&abs)?;
        if meta.is_dir() {
            fs::remove_dir(&host).at(&abs)
        } else {
            fs::remove_file(&host).at(&abs)
        }
    }

    fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        let (old_abs, old_host) = self.host(old);
        let (_, new_host) = self.host(new);
        fs::rename(&old_host, &new_host).at(&old_abs)
    }

    fn stat(&self, name: &str) -> Result<Metadata> {
        self.stat_with(name, true)
    }

    fn chmod(&mut self, name: &str, mode: u32) -> Result<()> {
        let (abs, host) = self.host(name);
        fs::set_permissions(&host, Permissions::from_mode(mode & 0o7777)).at(&abs)
    }

    fn chtimes(&mut self, name: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let (abs, host) = self.host(name);
        nix::sys::stat::utimes(&host, &timeval(atime), &timeval(mtime))
            .map_err(io::Error::from)
            .at(&abs)
    }

    fn chown(&mut self, name: &str, uid: u32, gid: u32) -> Result<()> {
        let (abs, host) = self.host(name);
        std::os::unix::fs::chown(&host, Some(uid), Some(gid)).at(&abs)
    }

    fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>> {
        let (abs, host) = self.host(name);
        let mut entries = Vec::new();
        for entry in fs::read_dir(&host).at(&abs)? {
            let entry = entry.at(&abs)?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                file_type: file_type(entry.file_type().at(&abs)?),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let (abs, host) = self.host(name);
        fs::read(&host).at(&abs)
    }
}

impl FileSystem for OsFs {
    fn chdir(&mut self, dir: &str) -> Result<()> {
        let (abs, host) = self.host(dir);
        let meta = fs::metadata(&host).at(&abs)?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory { path: abs });
        }
        self.cwd = abs;
        Ok(())
    }

    fn getwd(&self) -> Result<String> {
        Ok(self.cwd.clone())
    }

    fn temp_dir(&self) -> String {
        TEMP_DIR.to_string()
    }

    fn open(&self, name: &str) -> Result<OsFile> {
        let (abs, host) = self.host(name);
        let file = fs::File::open(&host).at(&abs)?;
        Ok(OsFile::new(name, host, file))
    }

    fn mkdir_all(&mut self, name: &str, perm: u32) -> Result<()> {
        let (abs, host) = self.host(name);
        DirBuilder::new()
            .recursive(true)
            .mode(perm)
            .create(&host)
            .at(&abs)
    }

    fn remove_all(&mut self, name: &str) -> Result<()> {
        let (abs, host) = self.host(name);
        if abs == "/" {
            return Err(FsError::InvalidInput {
                path: abs,
                reason: "operation not permitted on the root".to_string(),
            });
        }
        let meta = match fs::symlink_metadata(&host) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err::<(), _>(e).at(&abs),
        };
        if meta.is_dir() {
            fs::remove_dir_all(&host).at(&abs)?;
        } else {
            fs::remove_file(&host).at(&abs)?;
        }
        debug!("osfs: removed tree {}", abs);
        Ok(())
    }

    fn truncate(&mut self, name: &str, size: u64) -> Result<()> {
        let (abs, host) = self.host(name);
        let file = OpenOptions::new().write(true).open(&host).at(&abs)?;
        file.set_len(size).at(&abs)
    }
}

impl SymlinkFileSystem for OsFs {
    fn lstat(&self, name: &str) -> Result<Metadata> {
        self.stat_with(name, false)
    }

    fn lchown(&mut self, name: &str, uid: u32, gid: u32) -> Result<()> {
        let (abs, host) = self.host(name);
        std::os::unix::fs::lchown(&host, Some(uid), Some(gid)).at(&abs)
    }

    /// Absolute targets are stored as host paths and mapped back here.
    fn readlink(&self, name: &str) -> Result<String> {
        let (abs, host) = self.host(name);
        let target = fs::read_link(&host).at(&abs)?;
        match target.strip_prefix(&self.root) {
            Ok(rel) if target.is_absolute() => Ok(format!("/{}", rel.to_string_lossy())),
            _ => Ok(target.to_string_lossy().into_owned()),
        }
    }

    fn symlink(&mut self, target: &str, link: &str) -> Result<()> {
        let (abs, host) = self.host(link);
        let host_target = if target.starts_with('/') {
            self.host(target).1
        } else {
            self.contain_target(path::split(&abs).0, target)?;
            PathBuf::from(target)
        };
        std::os::unix::fs::symlink(&host_target, &host).at(&abs)?;
        debug!("osfs: symlink {} -> {}", abs, target);
        Ok(())
    }
}
