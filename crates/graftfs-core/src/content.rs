//! Content access for file nodes.
//!
//! Any number of readers may be open on a node, tracked per opening thread.
//! A node has a single writer slot. Readers and writers give their slot back
//! on `close()` or when dropped.

use crate::adapter::Attributes;
use crate::capability::Capability;
use crate::error::{Result, VfsError};
use crate::node::{FileObject, FileType};
use std::fmt;
use std::io::{self, Read, Write};
use std::thread::{self, ThreadId};
use std::time::SystemTime;
use tracing::{trace, warn};

pub struct FileContent {
    file: FileObject,
}

impl FileContent {
    pub(crate) fn new(file: FileObject) -> Self {
        FileContent { file }
    }

    pub fn file(&self) -> &FileObject {
        &self.file
    }

    fn require_file(&self) -> Result<()> {
        match self.file.type_of()? {
            FileType::File => Ok(()),
            FileType::Imaginary => Err(VfsError::NotFound {
                name: self.file.name().clone(),
            }),
            actual => Err(VfsError::TypeMismatch {
                name: self.file.name().clone(),
                expected: FileType::File,
                actual,
            }),
        }
    }

    fn require_exists(&self) -> Result<FileType> {
        match self.file.type_of()? {
            FileType::Imaginary => Err(VfsError::NotFound {
                name: self.file.name().clone(),
            }),
            t => Ok(t),
        }
    }

    pub fn size(&self) -> Result<u64> {
        self.file.on_call()?;
        self.require_file()?;
        self.file.file_system().adapter().content_size(self.file.name())
    }

    pub fn last_modified(&self) -> Result<SystemTime> {
        self.file.on_call()?;
        self.require_exists()?;
        let fs = self.file.file_system();
        fs.require(Capability::GetLastModified, self.file.name())?;
        fs.adapter().last_modified(self.file.name())
    }

    pub fn set_last_modified(&self, time: SystemTime) -> Result<()> {
        self.file.on_call()?;
        let cap = match self.require_exists()? {
            FileType::Folder => Capability::SetLastModifiedFolder,
            _ => Capability::SetLastModifiedFile,
        };
        let fs = self.file.file_system();
        fs.require(cap, self.file.name())?;
        fs.adapter().set_last_modified(self.file.name(), time)?;
        self.file.handle_changed();
        Ok(())
    }

    pub fn attributes(&self) -> Result<Attributes> {
        self.file.on_call()?;
        self.require_exists()?;
        let fs = self.file.file_system();
        fs.require(Capability::Attributes, self.file.name())?;
        fs.adapter().attributes(self.file.name())
    }

    pub fn reader(&self) -> Result<ContentReader> {
        self.file.on_call()?;
        self.require_file()?;
        let fs = self.file.file_system();
        fs.require(Capability::ReadContent, self.file.name())?;
        let inner = fs.adapter().read(self.file.name())?;

        let thread = thread::current().id();
        self.file.core().add_reader(thread);
        fs.stream_opened();
        trace!("content: reader opened on {}", self.file.name());
        Ok(ContentReader {
            inner,
            file: self.file.clone(),
            thread,
            released: false,
        })
    }

    /// Opens the node's writer, creating the file and its missing ancestors
    /// when it does not exist yet.
    pub fn writer(&self, append: bool) -> Result<ContentWriter> {
        self.file.on_call()?;
        self.writer_inner(append)
    }

    pub(crate) fn writer_inner(&self, append: bool) -> Result<ContentWriter> {
        let current = self.file.type_of()?;
        if current == FileType::Folder {
            return Err(VfsError::TypeMismatch {
                name: self.file.name().clone(),
                expected: FileType::File,
                actual: FileType::Folder,
            });
        }
        let fs = self.file.file_system();
        fs.require(Capability::WriteContent, self.file.name())?;
        if append {
            fs.require(Capability::AppendContent, self.file.name())?;
        }
        if !self.file.core().claim_writer() {
            return Err(VfsError::ContentInUse {
                name: self.file.name().clone(),
            });
        }

        let opened = (|| {
            if current == FileType::Imaginary {
                self.file.create_parent()?;
            }
            fs.adapter().write(self.file.name(), append)
        })();
        let inner = match opened {
            Ok(inner) => inner,
            Err(e) => {
                self.file.core().release_writer();
                return Err(e);
            }
        };

        fs.stream_opened();
        trace!("content: writer opened on {} (append={})", self.file.name(), append);
        Ok(ContentWriter {
            inner: Some(inner),
            file: self.file.clone(),
        })
    }

    /// Whether any reader or the writer is open on this node.
    pub fn is_open(&self) -> bool {
        self.file.is_content_open()
    }

    /// Readers the calling thread has open on this node.
    pub fn open_readers(&self) -> usize {
        self.file.core().open_readers(thread::current().id())
    }
}

impl fmt::Debug for FileContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileContent").field("file", &self.file).finish()
    }
}

pub struct ContentReader {
    inner: Box<dyn Read + Send>,
    file: FileObject,
    thread: ThreadId,
    released: bool,
}

impl ContentReader {
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.file.core().remove_reader(self.thread);
        self.file.file_system().stream_closed();
        trace!("content: reader closed on {}", self.file.name());
    }
}

impl fmt::Debug for ContentReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentReader").field("file", &self.file).finish()
    }
}

impl Read for ContentReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Drop for ContentReader {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct ContentWriter {
    inner: Option<Box<dyn Write + Send>>,
    file: FileObject,
}

impl ContentWriter {
    /// Flushes and commits the written content.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(());
        };
        let flushed = inner.flush();
        drop(inner);
        self.file.core().release_writer();
        self.file.file_system().stream_closed();
        flushed.map_err(|e| VfsError::provider("write", self.file.name(), e))?;
        self.file.handle_content_written();
        trace!("content: writer closed on {}", self.file.name());
        Ok(())
    }
}

impl fmt::Debug for ContentWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentWriter").field("file", &self.file).finish()
    }
}

impl Write for ContentWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(inner) => inner.write(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "writer is closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for ContentWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("content: failed to close writer on {}: {}", self.file.name(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheStrategy, ManagerConfig};
    use crate::error::ErrorKind;
    use crate::manager::FileSystemManager;
    use crate::options::FileSystemOptions;
    use crate::provider::ram::{RamProvider, RamStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (FileSystemManager, Arc<RamStore>) {
        let provider = Arc::new(RamProvider::new());
        let store = provider.store("ram:///");
        let mut manager = FileSystemManager::new(ManagerConfig {
            cache_strategy: CacheStrategy::Manual,
            ..ManagerConfig::default()
        });
        manager.add_provider("ram", provider).unwrap();
        (manager, store)
    }

    #[test]
    fn test_size_and_read() {
        let (m, store) = setup();
        store.insert_file("/f.txt", b"This is a test file.");
        let f = m.resolve_file("ram:///f.txt").unwrap();
        let content = f.content();
        assert_eq!(content.size().unwrap(), 20);
        let mut s = String::new();
        content.reader().unwrap().read_to_string(&mut s).unwrap();
        assert_eq!(s, "This is a test file.");
    }

    #[test]
    fn test_read_folder_or_missing_fails() {
        let (m, store) = setup();
        store.insert_folder("/d");
        let d = m.resolve_file("ram:///d").unwrap();
        assert_eq!(d.content().reader().unwrap_err().kind(), ErrorKind::TypeMismatch);
        let nope = m.resolve_file("ram:///nope").unwrap();
        assert_eq!(nope.content().size().unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_many_readers_tracked_per_thread() {
        let (m, store) = setup();
        store.insert_file("/f", b"abc");
        let f = m.resolve_file("ram:///f").unwrap();
        let content = f.content();
        let r1 = content.reader().unwrap();
        let r2 = content.reader().unwrap();
        assert_eq!(content.open_readers(), 2);
        assert!(content.is_open());
        assert_eq!(f.file_system().open_streams(), 2);

        let f2 = f.clone();
        std::thread::spawn(move || {
            let content = f2.content();
            let _r = content.reader().unwrap();
            assert_eq!(content.open_readers(), 1);
        })
        .join()
        .unwrap();

        r1.close();
        assert_eq!(content.open_readers(), 1);
        drop(r2);
        assert!(!content.is_open());
        assert_eq!(f.file_system().open_streams(), 0);
    }

    #[test]
    fn test_single_writer_slot() {
        let (m, _store) = setup();
        let f = m.resolve_file("ram:///f").unwrap();
        let w = f.content().writer(false).unwrap();
        let err = f.content().writer(false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContentInUse);
        drop(w);
        assert!(f.content().writer(false).is_ok());
    }

    #[test]
    fn test_writer_creates_parents() {
        let (m, store) = setup();
        let f = m.resolve_file("ram:///a/b/c.txt").unwrap();
        let mut w = f.content().writer(false).unwrap();
        w.write_all(b"deep").unwrap();
        w.close().unwrap();
        assert!(store.contains("/a/b"));
        assert_eq!(store.read("/a/b/c.txt"), Some(b"deep".to_vec()));
        assert!(f.is_file().unwrap());
    }

    #[test]
    fn test_writer_on_folder_fails() {
        let (m, store) = setup();
        store.insert_folder("/d");
        let d = m.resolve_file("ram:///d").unwrap();
        assert_eq!(
            d.content().writer(false).unwrap_err().kind(),
            ErrorKind::TypeMismatch
        );
        assert!(!d.is_content_open());
    }

    #[test]
    fn test_read_only_filesystem_rejects_writer() {
        let (m, _store) = setup();
        let opts = FileSystemOptions::new().with(FileSystemOptions::READ_ONLY, "true");
        let f = m.resolve_file_with_options(None, "ram:///f", &opts).unwrap();
        let err = f.content().writer(false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapabilityUnsupported);
    }

    #[test]
    fn test_last_modified_round_trip() {
        let (m, store) = setup();
        store.insert_file("/f", b"x");
        let f = m.resolve_file("ram:///f").unwrap();
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(42);
        f.content().set_last_modified(stamp).unwrap();
        assert_eq!(f.content().last_modified().unwrap(), stamp);
    }

    #[test]
    fn test_attributes() {
        let (m, store) = setup();
        store.insert_file("/f", b"xyz");
        let f = m.resolve_file("ram:///f").unwrap();
        let attrs = f.content().attributes().unwrap();
        assert_eq!(attrs.get("size"), Some(&serde_json::json!(3)));
    }
}
