//! Optional storage hook for file-backed attachments and downloads.
//!
//! Engines without a [`FileStore`] simply cannot use file sources or sinks;
//! everything else keeps working.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// How a path is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileMode {
    /// Open an existing file for reading.
    Read,
    /// Create or truncate for writing.
    Write,
    /// Create or append.
    Append,
    /// Delete the file.
    Remove,
}

/// An open file.
pub trait FileHandle: Send {
    /// Reads into `buf`, returning the count read (0 at end of file).
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes all of `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Moves the read position to `pos` bytes from the start.
    ///
    /// # Errors
    ///
    /// Returns an error if the seek fails.
    fn seek(&mut self, pos: u64) -> io::Result<()>;

    /// Total size in bytes.
    fn size(&self) -> u64;
}

/// Opens files by path.
pub trait FileStore: Send {
    /// Opens `path` in `mode`.
    ///
    /// Returns `None` for [`FileMode::Remove`], which deletes the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or removed.
    fn open(&mut self, path: &str, mode: FileMode) -> io::Result<Option<Box<dyn FileHandle>>>;
}

/// [`FileStore`] backed by the local filesystem, rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Creates a store resolving relative paths against `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path.trim_start_matches('/'));
        self.root.join(p)
    }
}

impl FileStore for FsStore {
    fn open(&mut self, path: &str, mode: FileMode) -> io::Result<Option<Box<dyn FileHandle>>> {
        let full = self.resolve(path);
        let file = match mode {
            FileMode::Remove => {
                match fs::remove_file(&full) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
                return Ok(None);
            }
            FileMode::Read => File::open(&full)?,
            FileMode::Write | FileMode::Append => {
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut opts = OpenOptions::new();
                opts.create(true);
                if mode == FileMode::Write {
                    opts.write(true).truncate(true);
                } else {
                    opts.append(true);
                }
                opts.open(&full)?
            }
        };
        let size = file.metadata()?.len();
        tracing::debug!(path = %full.display(), ?mode, size, "file opened");
        Ok(Some(Box::new(FsHandle { file, size })))
    }
}

struct FsHandle {
    file: File,
    size: u64,
}

impl FileHandle for FsHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.size += data.len() as u64;
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(pos)).map(|_| ())
    }

    fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mailpoll-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn write_append_read_remove() {
        let root = scratch("fs");
        let mut store = FsStore::new(&root);

        let mut f = store.open("inbox/1/a.txt", FileMode::Write).unwrap().unwrap();
        f.write(b"hello ").unwrap();
        drop(f);

        let mut f = store.open("inbox/1/a.txt", FileMode::Append).unwrap().unwrap();
        f.write(b"world").unwrap();
        drop(f);

        let mut f = store.open("inbox/1/a.txt", FileMode::Read).unwrap().unwrap();
        assert_eq!(f.size(), 11);
        f.seek(6).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(f.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"world");
        drop(f);

        assert!(store.open("inbox/1/a.txt", FileMode::Remove).unwrap().is_none());
        assert!(store.open("inbox/1/a.txt", FileMode::Read).is_err());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn removing_missing_file_is_ok() {
        let root = scratch("missing");
        let mut store = FsStore::new(&root);
        assert!(store.open("nope.bin", FileMode::Remove).unwrap().is_none());
    }
}
