//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use graftfs_core::adapter::{Adapter, Attributes, ChildEntry, Provider};
use graftfs_core::provider::ram::{RamAdapter, RamProvider, RamStore};
use graftfs_core::{
    CacheStrategy, CapabilitySet, FileSystemManager, FileSystemOptions, FileType, ManagerConfig,
    Name, Result,
};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

pub const FILE1_CONTENT: &str = "This is a test file.\n";

/// A manager with the `ram` scheme registered, plus the store behind
/// `ram:///`.
pub fn ram_manager(strategy: CacheStrategy) -> (FileSystemManager, Arc<RamStore>) {
    let provider = Arc::new(RamProvider::new());
    let store = provider.store("ram:///");
    let mut manager = FileSystemManager::new(ManagerConfig {
        cache_strategy: strategy,
        ..ManagerConfig::default()
    });
    manager
        .add_provider("ram", provider)
        .expect("ram scheme registers");
    (manager, store)
}

/// Populates the standard scenario tree under `base`:
/// `file1.txt` and `dir1/{file2.txt,file3.txt}`.
pub fn scenario_tree(store: &RamStore, base: &str) {
    store.insert_file(&format!("{}/file1.txt", base), FILE1_CONTENT.as_bytes());
    store.insert_file(&format!("{}/dir1/file2.txt", base), b"file two");
    store.insert_file(&format!("{}/dir1/file3.txt", base), b"file three");
}

/// Relative names of `files` below `base`, sorted.
pub fn relative_names(base: &Name, files: &[graftfs_core::FileObject]) -> Vec<String> {
    let mut names: Vec<String> = files
        .iter()
        .map(|f| base.relative_name(f.name()).expect("same root"))
        .collect();
    names.sort();
    names
}

/// RAM-backed adapter that records every delete hook invocation in order.
pub struct RecordingAdapter {
    inner: RamAdapter,
    deletes: Arc<Mutex<Vec<Name>>>,
}

impl Adapter for RecordingAdapter {
    fn capabilities(&self) -> CapabilitySet {
        self.inner.capabilities()
    }

    fn get_type(&self, name: &Name) -> Result<FileType> {
        self.inner.get_type(name)
    }

    fn list_children(&self, name: &Name) -> Result<Vec<String>> {
        self.inner.list_children(name)
    }

    fn list_children_resolved(&self, name: &Name) -> Result<Option<Vec<ChildEntry>>> {
        self.inner.list_children_resolved(name)
    }

    fn read(&self, name: &Name) -> Result<Box<dyn Read + Send>> {
        self.inner.read(name)
    }

    fn write(&self, name: &Name, append: bool) -> Result<Box<dyn Write + Send>> {
        self.inner.write(name, append)
    }

    fn delete(&self, name: &Name) -> Result<()> {
        self.inner.delete(name)?;
        self.deletes.lock().unwrap().push(name.clone());
        Ok(())
    }

    fn create_folder(&self, name: &Name) -> Result<()> {
        self.inner.create_folder(name)
    }

    fn content_size(&self, name: &Name) -> Result<u64> {
        self.inner.content_size(name)
    }

    fn last_modified(&self, name: &Name) -> Result<SystemTime> {
        self.inner.last_modified(name)
    }

    fn attributes(&self, name: &Name) -> Result<Attributes> {
        self.inner.attributes(name)
    }
}

pub struct RecordingProvider {
    pub store: Arc<RamStore>,
    pub deletes: Arc<Mutex<Vec<Name>>>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self {
            store: Arc::new(RamStore::new()),
            deletes: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Provider for RecordingProvider {
    fn create_file_system(
        &self,
        _root: &Name,
        _options: &FileSystemOptions,
    ) -> Result<Arc<dyn Adapter>> {
        Ok(Arc::new(RecordingAdapter {
            inner: RamAdapter::new(Arc::clone(&self.store)),
            deletes: Arc::clone(&self.deletes),
        }))
    }
}
