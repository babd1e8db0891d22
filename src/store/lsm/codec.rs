//! Byte-level I/O seam for segment and metadata files.
//!
//! Every byte the tree persists goes through a [`Codec`], so compression or
//! encryption can be layered under the storage engine without touching the
//! builder, segment or level code. [`FileCodec`] stores bytes verbatim.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// A sequential writer that can be made durable.
pub trait DataWriter: Write + Send {
    /// Flushes buffered bytes and syncs them to stable storage.
    fn sync(&mut self) -> Result<()>;
}

/// A reader that can be rewound for repeated scans.
pub trait DataReader: Read + Seek + Send {}

impl<T> DataReader for T where T: Read + Seek + Send {}

pub trait Codec: Send + Sync + fmt::Debug {
    /// Creates (or truncates) the file at `path` for writing.
    fn writer(&self, path: &Path) -> Result<Box<dyn DataWriter>>;

    /// Opens the file at `path` for reading. Missing files yield `NotFound`.
    fn reader(&self, path: &Path) -> Result<Box<dyn DataReader>>;

    /// Removes the file at `path`.
    fn remove(&self, path: &Path) -> Result<()>;

    /// Replaces the contents of `path` with `bytes`.
    fn write_all(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer(path)?;
        writer.write_all(bytes)?;
        writer.sync()
    }

    /// Reads the whole file at `path`.
    fn read_all(&self, path: &Path) -> Result<Vec<u8>> {
        let mut reader = self.reader(path)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl DataWriter for BufWriter<File> {
    fn sync(&mut self) -> Result<()> {
        self.flush()?;
        self.get_ref().sync_all()?;
        Ok(())
    }
}

/// Plain files on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileCodec;

impl Codec for FileCodec {
    fn writer(&self, path: &Path) -> Result<Box<dyn DataWriter>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::from_open(path, e))?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn reader(&self, path: &Path) -> Result<Box<dyn DataReader>> {
        let file = File::open(path).map_err(|e| Error::from_open(path, e))?;
        Ok(Box::new(file))
    }

    fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| Error::from_open(path, e))
    }

    /// Writes to a sibling temporary file and renames it over `path`, so a
    /// crash never leaves a torn metadata file behind.
    fn write_all(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        let mut writer = self.writer(&tmp)?;
        writer.write_all(bytes)?;
        writer.sync()?;
        drop(writer);
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Records every path the engine touches, delegating to [`FileCodec`].
    #[derive(Debug, Default, Clone)]
    pub(crate) struct RecordingCodec {
        pub(crate) written: Arc<Mutex<Vec<PathBuf>>>,
        pub(crate) read: Arc<Mutex<Vec<PathBuf>>>,
        pub(crate) removed: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl Codec for RecordingCodec {
        fn writer(&self, path: &Path) -> Result<Box<dyn DataWriter>> {
            self.written.lock().push(path.to_path_buf());
            FileCodec.writer(path)
        }

        fn reader(&self, path: &Path) -> Result<Box<dyn DataReader>> {
            self.read.lock().push(path.to_path_buf());
            FileCodec.reader(path)
        }

        fn remove(&self, path: &Path) -> Result<()> {
            self.removed.lock().push(path.to_path_buf());
            FileCodec.remove(path)
        }
    }

    /// Fails every write to a file with a chosen name, delegating the rest to
    /// [`FileCodec`].
    #[derive(Debug, Default, Clone)]
    pub(crate) struct FailingCodec {
        fail_on: Arc<Mutex<Option<String>>>,
    }

    impl FailingCodec {
        pub(crate) fn fail_on(&self, file_name: &str) {
            *self.fail_on.lock() = Some(file_name.to_string());
        }

        pub(crate) fn clear(&self) {
            self.fail_on.lock().take();
        }

        fn check(&self, path: &Path) -> Result<()> {
            let failing = self.fail_on.lock();
            match (failing.as_deref(), path.file_name()) {
                (Some(name), Some(file)) if file == name => Err(Error::IoError(
                    std::io::Error::other(format!("injected failure writing {}", name)),
                )),
                _ => Ok(()),
            }
        }
    }

    impl Codec for FailingCodec {
        fn writer(&self, path: &Path) -> Result<Box<dyn DataWriter>> {
            self.check(path)?;
            FileCodec.writer(path)
        }

        fn reader(&self, path: &Path) -> Result<Box<dyn DataReader>> {
            FileCodec.reader(path)
        }

        fn remove(&self, path: &Path) -> Result<()> {
            FileCodec.remove(path)
        }

        fn write_all(&self, path: &Path, bytes: &[u8]) -> Result<()> {
            self.check(path)?;
            FileCodec.write_all(path, bytes)
        }
    }

    #[test]
    fn test_failing_codec_targets_one_file_name() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let codec = FailingCodec::default();
        codec.fail_on("bloom.dat");

        assert!(matches!(
            codec.write_all(&dir.path().join("bloom.dat"), b"x"),
            Err(Error::IoError(_))
        ));
        codec.write_all(&dir.path().join("data.dat"), b"x").unwrap();

        codec.clear();
        codec.write_all(&dir.path().join("bloom.dat"), b"x").unwrap();
    }

    #[test]
    fn test_write_all_then_read_all() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("_meta.json");

        FileCodec.write_all(&path, b"{\"levels\":1}").unwrap();
        assert_eq!(FileCodec.read_all(&path).unwrap(), b"{\"levels\":1}");
        assert!(!path.with_extension("tmp").exists());

        FileCodec.write_all(&path, b"{}").unwrap();
        assert_eq!(FileCodec.read_all(&path).unwrap(), b"{}");
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("data.dat");

        assert!(matches!(FileCodec.reader(&path), Err(Error::NotFound(p)) if p == path));
        assert!(matches!(FileCodec.remove(&path), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_reader_can_rewind() {
        use std::io::SeekFrom;

        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("data.dat");
        FileCodec.write_all(&path, b"abc").unwrap();

        let mut reader = FileCodec.reader(&path).unwrap();
        let mut first = String::new();
        reader.read_to_string(&mut first).unwrap();
        reader.seek(SeekFrom::Start(0)).unwrap();
        let mut second = String::new();
        reader.read_to_string(&mut second).unwrap();

        assert_eq!(first, second);
    }
}
