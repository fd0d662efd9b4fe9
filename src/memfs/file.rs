use std::io::SeekFrom;
use std::time::SystemTime;

use super::node::{self, NodeKind, NodeRef};
use crate::error::{FsError, Result};
use crate::fs::path;
use crate::fs::{DirEntry, File, Metadata, OpenFlags};

/// An open `MemFs` file or directory.
pub struct MemFile {
    name: String,
    node: NodeRef,
    flags: OpenFlags,
    offset: u64,
    /// Entries already returned by the directory iterators.
    dir_cursor: usize,
    closed: bool,
}

impl MemFile {
    pub(crate) fn new(name: &str, node: NodeRef, flags: OpenFlags) -> Self {
        MemFile {
            name: name.to_string(),
            node,
            flags,
            offset: 0,
            dir_cursor: 0,
            closed: false,
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(FsError::Closed {
                path: self.name.clone(),
            });
        }
        Ok(())
    }

    fn check_readable(&self) -> Result<()> {
        self.check_open()?;
        if !self.flags.readable() {
            return Err(FsError::PermissionDenied {
                path: self.name.clone(),
            });
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_open()?;
        if !self.flags.writable() {
            return Err(FsError::PermissionDenied {
                path: self.name.clone(),
            });
        }
        Ok(())
    }

    fn copy_out(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let guard = self.node.read();
        let data = match &guard.kind {
            NodeKind::File(data) => data,
            _ => {
                return Err(FsError::IsADirectory {
                    path: self.name.clone(),
                })
            }
        };
        let start = offset.min(data.len() as u64) as usize;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn copy_in(&self, buf: &[u8], offset: u64) -> Result<usize> {
        let mut guard = self.node.write();
        let data = match &mut guard.kind {
            NodeKind::File(data) => data,
            _ => {
                return Err(FsError::IsADirectory {
                    path: self.name.clone(),
                })
            }
        };
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or_else(|| FsError::InvalidInput {
                path: self.name.clone(),
                reason: format!("write at offset {} overflows", offset),
            })?;
        if (data.len() as u64) < end {
            node::set_len(data, end, &self.name)?;
        }
        // `end` fits in memory past this point.
        let start = offset as usize;
        data[start..start + buf.len()].copy_from_slice(buf);
        guard.modified = SystemTime::now();
        Ok(buf.len())
    }

    fn len(&self) -> u64 {
        self.node.read().size()
    }

    /// Next `n` (or all remaining) children, advancing the directory cursor.
    fn next_children(&mut self, n: Option<usize>) -> Result<Vec<(String, Metadata)>> {
        self.check_open()?;
        let batch: Vec<(String, Metadata)> = {
            let guard = self.node.read();
            let children = guard.children().ok_or_else(|| FsError::NotADirectory {
                path: self.name.clone(),
            })?;
            children
                .iter()
                .skip(self.dir_cursor)
                .take(n.unwrap_or(usize::MAX))
                .map(|(name, child)| (name.clone(), child.read().metadata(name)))
                .collect()
        };
        self.dir_cursor += batch.len();
        Ok(batch)
    }
}

impl File for MemFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_readable()?;
        let n = self.copy_out(buf, self.offset)?;
        self.offset += n as u64;
        Ok(n)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.check_readable()?;
        self.copy_out(buf, offset)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_writable()?;
        if self.flags.contains(OpenFlags::APPEND) {
            self.offset = self.len();
        }
        let n = self.copy_in(buf, self.offset)?;
        self.offset += n as u64;
        Ok(n)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.check_writable()?;
        self.copy_in(buf, offset)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check_open()?;
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => self.len().checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| FsError::InvalidInput {
            path: self.name.clone(),
            reason: format!("invalid seek to {:?}", pos),
        })?;
        self.offset = target;
        Ok(target)
    }

    fn stat(&self) -> Result<Metadata> {
        self.check_open()?;
        Ok(self.node.read().metadata(path::base(&self.name)))
    }

    fn sync(&mut self) -> Result<()> {
        self.check_open()
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.check_writable()?;
        let mut guard = self.node.write();
        match &mut guard.kind {
            NodeKind::File(data) => node::set_len(data, size, &self.name)?,
            _ => {
                return Err(FsError::IsADirectory {
                    path: self.name.clone(),
                })
            }
        }
        guard.modified = SystemTime::now();
        Ok(())
    }

    fn readdir(&mut self, n: Option<usize>) -> Result<Vec<Metadata>> {
        Ok(self
            .next_children(n)?
            .into_iter()
            .map(|(_, meta)| meta)
            .collect())
    }

    fn readdir_names(&mut self, n: Option<usize>) -> Result<Vec<String>> {
        Ok(self
            .next_children(n)?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    fn read_dir(&mut self, n: Option<usize>) -> Result<Vec<DirEntry>> {
        Ok(self
            .next_children(n)?
            .into_iter()
            .map(|(name, meta)| DirEntry {
                name,
                file_type: meta.file_type,
            })
            .collect())
    }

    fn close(&mut self) -> Result<()> {
        self.check_open()?;
        self.closed = true;
        Ok(())
    }
}
