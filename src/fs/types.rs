use std::ops::BitOr;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    Symlink,
}

/// Information about a file, as returned by `stat`-style calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Base name of the file.
    pub name: String,
    pub file_type: FileType,
    pub size: u64,
    /// Permission bits (`0o7777` range).
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub accessed: SystemTime,
    pub modified: SystemTime,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type == FileType::Symlink
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub file_type: FileType,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

/// Flags for `open_file`. The low two bits select the access mode, the rest
/// are modifiers that can be or-ed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const READ_ONLY: OpenFlags = OpenFlags(0);
    pub const WRITE_ONLY: OpenFlags = OpenFlags(1);
    pub const READ_WRITE: OpenFlags = OpenFlags(2);
    pub const APPEND: OpenFlags = OpenFlags(1 << 3);
    pub const CREATE: OpenFlags = OpenFlags(1 << 4);
    pub const EXCLUSIVE: OpenFlags = OpenFlags(1 << 5);
    pub const TRUNCATE: OpenFlags = OpenFlags(1 << 6);

    const ACCESS_MASK: u32 = 0b11;

    pub fn bits(self) -> u32 {
        self.0
    }

    /// True if every modifier bit in `other` is set. Access modes compare by
    /// equality since `READ_ONLY` is zero.
    pub fn contains(self, other: OpenFlags) -> bool {
        let modifiers = other.0 & !Self::ACCESS_MASK;
        let access = other.0 & Self::ACCESS_MASK;
        (self.0 & modifiers) == modifiers && (access == 0 || self.0 & Self::ACCESS_MASK == access)
    }

    pub fn readable(self) -> bool {
        matches!(self.0 & Self::ACCESS_MASK, 0 | 2)
    }

    pub fn writable(self) -> bool {
        matches!(self.0 & Self::ACCESS_MASK, 1 | 2)
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}
