use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;

use super::{convert_metadata, IoResultExt};
use crate::error::{FsError, Result};
use crate::fs::path;
use crate::fs::{DirEntry, File, Metadata};

/// An open host file or directory. Closing drops the descriptor.
pub struct OsFile {
    name: String,
    host: PathBuf,
    file: Option<fs::File>,
    dir_cursor: usize,
}

impl OsFile {
    pub(crate) fn new(name: &str, host: PathBuf, file: fs::File) -> Self {
        OsFile {
            name: name.to_string(),
            host,
            file: Some(file),
            dir_cursor: 0,
        }
    }

    fn handle(&self) -> Result<&fs::File> {
        self.file.as_ref().ok_or_else(|| FsError::Closed {
            path: self.name.clone(),
        })
    }

    fn handle_mut(&mut self) -> Result<&mut fs::File> {
        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => Err(FsError::Closed {
                path: self.name.clone(),
            }),
        }
    }

    /// Next `n` (or all remaining) entries in name order with their lstat
    /// metadata, advancing the directory cursor.
    fn next_entries(&mut self, n: Option<usize>) -> Result<Vec<Metadata>> {
        let meta = self.handle()?.metadata().at(&self.name)?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory {
                path: self.name.clone(),
            });
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.host).at(&self.name)? {
            names.push(entry.at(&self.name)?.file_name());
        }
        names.sort();

        let mut batch = Vec::new();
        for name in names
            .iter()
            .skip(self.dir_cursor)
            .take(n.unwrap_or(usize::MAX))
        {
            let shown = name.to_string_lossy();
            let meta = fs::symlink_metadata(self.host.join(name))
                .and_then(|m| convert_metadata(&shown, &m))
                .at(&self.name)?;
            batch.push(meta);
        }
        self.dir_cursor += batch.len();
        Ok(batch)
    }
}

impl File for OsFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let name = self.name.clone();
        self.handle_mut()?.read(buf).at(&name)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.handle()?.read_at(buf, offset).at(&self.name)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let name = self.name.clone();
        self.handle_mut()?.write(buf).at(&name)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.handle()?.write_at(buf, offset).at(&self.name)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let name = self.name.clone();
        self.handle_mut()?.seek(pos).at(&name)
    }

    fn stat(&self) -> Result<Metadata> {
        self.handle()?
            .metadata()
            .and_then(|m| convert_metadata(path::base(&self.name), &m))
            .at(&self.name)
    }

    fn sync(&mut self) -> Result<()> {
        self.handle()?.sync_all().at(&self.name)
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.handle()?.set_len(size).at(&self.name)
    }

    fn readdir(&mut self, n: Option<usize>) -> Result<Vec<Metadata>> {
        self.next_entries(n)
    }

    fn readdir_names(&mut self, n: Option<usize>) -> Result<Vec<String>> {
        Ok(self.next_entries(n)?.into_iter().map(|m| m.name).collect())
    }

    fn read_dir(&mut self, n: Option<usize>) -> Result<Vec<DirEntry>> {
        Ok(self
            .next_entries(n)?
            .into_iter()
            .map(|m| DirEntry {
                name: m.name,
                file_type: m.file_type,
            })
            .collect())
    }

    fn close(&mut self) -> Result<()> {
        match self.file.take() {
            Some(_) => Ok(()),
            None => Err(FsError::Closed {
                path: self.name.clone(),
            }),
        }
    }
}
