//! In-memory backing store.
//!
//! Each root gets one [`RamStore`]. The store handle can be shared outside the
//! filesystem, so callers can change the backing store behind the node cache.

use crate::adapter::{Adapter, Attributes, ChildEntry, Provider};
use crate::capability::{Capability, CapabilitySet};
use crate::error::{Result, VfsError};
use crate::name::{self, Name};
use crate::node::FileType;
use crate::options::FileSystemOptions;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;
use tracing::trace;

#[derive(Debug, Clone)]
enum RamEntry {
    File { data: Vec<u8>, modified: SystemTime },
    Folder { modified: SystemTime },
}

impl RamEntry {
    fn file_type(&self) -> FileType {
        match self {
            RamEntry::File { .. } => FileType::File,
            RamEntry::Folder { .. } => FileType::Folder,
        }
    }

    fn modified(&self) -> SystemTime {
        match self {
            RamEntry::File { modified, .. } | RamEntry::Folder { modified } => *modified,
        }
    }

    fn set_modified(&mut self, time: SystemTime) {
        match self {
            RamEntry::File { modified, .. } | RamEntry::Folder { modified } => *modified = time,
        }
    }
}

/// Path-keyed entries of one in-memory root. The root folder always exists.
#[derive(Debug, Default)]
pub struct RamStore {
    entries: RwLock<BTreeMap<String, RamEntry>>,
}

fn normalized(path: &str) -> String {
    name::normalize_path(path).unwrap_or_else(|_| path.to_string())
}

fn is_child_of(parent: &str, path: &str) -> bool {
    let rest = if parent == "/" {
        path.strip_prefix('/')
    } else {
        path.strip_prefix(parent).and_then(|r| r.strip_prefix('/'))
    };
    matches!(rest, Some(r) if !r.is_empty() && !r.contains('/'))
}

fn is_below(parent: &str, path: &str) -> bool {
    if parent == "/" {
        return path != "/";
    }
    path.strip_prefix(parent)
        .is_some_and(|r| r.starts_with('/'))
}

impl RamStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, BTreeMap<String, RamEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, BTreeMap<String, RamEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_parents(entries: &mut BTreeMap<String, RamEntry>, path: &str) {
        let mut prefix = String::new();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        for seg in segments.iter().take(segments.len().saturating_sub(1)) {
            prefix.push('/');
            prefix.push_str(seg);
            entries
                .entry(prefix.clone())
                .or_insert_with(|| RamEntry::Folder {
                    modified: SystemTime::now(),
                });
        }
    }

    /// Stores a file, creating missing parent folders.
    pub fn insert_file(&self, path: &str, data: &[u8]) {
        let path = normalized(path);
        let mut entries = self.write_entries();
        Self::ensure_parents(&mut entries, &path);
        entries.insert(
            path,
            RamEntry::File {
                data: data.to_vec(),
                modified: SystemTime::now(),
            },
        );
    }

    /// Stores a folder, creating missing parent folders.
    pub fn insert_folder(&self, path: &str) {
        let path = normalized(path);
        if path == "/" {
            return;
        }
        let mut entries = self.write_entries();
        Self::ensure_parents(&mut entries, &path);
        entries.entry(path).or_insert_with(|| RamEntry::Folder {
            modified: SystemTime::now(),
        });
    }

    /// Removes `path` and everything below it.
    pub fn remove(&self, path: &str) -> bool {
        let path = normalized(path);
        let mut entries = self.write_entries();
        let existed = entries.remove(&path).is_some();
        entries.retain(|k, _| !is_below(&path, k));
        existed
    }

    pub fn contains(&self, path: &str) -> bool {
        let path = normalized(path);
        path == "/" || self.read_entries().contains_key(&path)
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        match self.read_entries().get(&normalized(path)) {
            Some(RamEntry::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn last_modified(&self, path: &str) -> Option<SystemTime> {
        self.read_entries().get(&normalized(path)).map(RamEntry::modified)
    }

    pub fn set_last_modified(&self, path: &str, time: SystemTime) -> bool {
        match self.write_entries().get_mut(&normalized(path)) {
            Some(entry) => {
                entry.set_modified(time);
                true
            }
            None => false,
        }
    }

    /// Number of entries, the implicit root excluded.
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    fn file_type(&self, path: &str) -> FileType {
        if path == "/" {
            return FileType::Folder;
        }
        self.read_entries()
            .get(path)
            .map(RamEntry::file_type)
            .unwrap_or(FileType::Imaginary)
    }

    fn children(&self, path: &str) -> Vec<ChildEntry> {
        self.read_entries()
            .iter()
            .filter(|(k, _)| is_child_of(path, k))
            .map(|(k, v)| ChildEntry {
                name: k.rsplit('/').next().unwrap_or_default().to_string(),
                file_type: v.file_type(),
            })
            .collect()
    }

    fn commit(&self, path: &str, data: Vec<u8>) {
        let mut entries = self.write_entries();
        Self::ensure_parents(&mut entries, path);
        entries.insert(
            path.to_string(),
            RamEntry::File {
                data,
                modified: SystemTime::now(),
            },
        );
    }
}

/// Buffers writes and commits them to the store on flush and on drop.
struct RamWriter {
    store: Arc<RamStore>,
    path: String,
    buf: Vec<u8>,
    dirty: bool,
}

impl Write for RamWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        self.dirty = true;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.store.commit(&self.path, self.buf.clone());
        self.dirty = false;
        Ok(())
    }
}

impl Drop for RamWriter {
    fn drop(&mut self) {
        if self.dirty {
            self.store.commit(&self.path, std::mem::take(&mut self.buf));
        }
    }
}

pub struct RamAdapter {
    store: Arc<RamStore>,
}

impl RamAdapter {
    pub fn new(store: Arc<RamStore>) -> Self {
        RamAdapter { store }
    }

    fn not_found(name: &Name) -> VfsError {
        VfsError::NotFound { name: name.clone() }
    }
}

impl Adapter for RamAdapter {
    fn capabilities(&self) -> CapabilitySet {
        [
            Capability::ReadContent,
            Capability::WriteContent,
            Capability::AppendContent,
            Capability::Create,
            Capability::Delete,
            Capability::Rename,
            Capability::GetType,
            Capability::ListChildren,
            Capability::GetLastModified,
            Capability::SetLastModifiedFile,
            Capability::SetLastModifiedFolder,
            Capability::Uri,
            Capability::Attributes,
        ]
        .into_iter()
        .collect()
    }

    fn get_type(&self, name: &Name) -> Result<FileType> {
        Ok(self.store.file_type(name.path()))
    }

    fn list_children(&self, name: &Name) -> Result<Vec<String>> {
        Ok(self
            .store
            .children(name.path())
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    fn list_children_resolved(&self, name: &Name) -> Result<Option<Vec<ChildEntry>>> {
        Ok(Some(self.store.children(name.path())))
    }

    fn read(&self, name: &Name) -> Result<Box<dyn Read + Send>> {
        let data = self
            .store
            .read(name.path())
            .ok_or_else(|| Self::not_found(name))?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn write(&self, name: &Name, append: bool) -> Result<Box<dyn Write + Send>> {
        let buf = if append {
            self.store.read(name.path()).unwrap_or_default()
        } else {
            Vec::new()
        };
        trace!("ram: writer on {} (append={})", name, append);
        // dirty from the start so an untouched writer still creates the file
        Ok(Box::new(RamWriter {
            store: Arc::clone(&self.store),
            path: name.path().to_string(),
            buf,
            dirty: true,
        }))
    }

    fn delete(&self, name: &Name) -> Result<()> {
        let path = name.path();
        if !self.store.children(path).is_empty() {
            return Err(VfsError::provider(
                "delete",
                name,
                anyhow::anyhow!("folder is not empty"),
            ));
        }
        if !self.store.remove(path) {
            return Err(Self::not_found(name));
        }
        Ok(())
    }

    fn rename(&self, from: &Name, to: &Name) -> Result<()> {
        let (src, dst) = (from.path(), to.path());
        let mut entries = self.store.write_entries();
        let Some(entry) = entries.remove(src) else {
            return Err(Self::not_found(from));
        };
        let moved: Vec<(String, RamEntry)> = entries
            .iter()
            .filter(|(k, _)| is_below(src, k))
            .map(|(k, v)| (format!("{}{}", dst, &k[src.len()..]), v.clone()))
            .collect();
        entries.retain(|k, _| !is_below(src, k));
        RamStore::ensure_parents(&mut entries, dst);
        entries.insert(dst.to_string(), entry);
        entries.extend(moved);
        Ok(())
    }

    fn create_folder(&self, name: &Name) -> Result<()> {
        self.store.insert_folder(name.path());
        Ok(())
    }

    fn content_size(&self, name: &Name) -> Result<u64> {
        self.store
            .read(name.path())
            .map(|d| d.len() as u64)
            .ok_or_else(|| Self::not_found(name))
    }

    fn last_modified(&self, name: &Name) -> Result<SystemTime> {
        self.store
            .last_modified(name.path())
            .ok_or_else(|| Self::not_found(name))
    }

    fn set_last_modified(&self, name: &Name, time: SystemTime) -> Result<()> {
        if self.store.set_last_modified(name.path(), time) {
            Ok(())
        } else {
            Err(Self::not_found(name))
        }
    }

    fn attributes(&self, name: &Name) -> Result<Attributes> {
        let mut attrs = Attributes::new();
        let file_type = self.store.file_type(name.path());
        attrs.insert("type".into(), serde_json::json!(file_type));
        if let Some(data) = self.store.read(name.path()) {
            attrs.insert("size".into(), serde_json::json!(data.len()));
        }
        Ok(attrs)
    }
}

/// Hands out one store per root URI.
#[derive(Default)]
pub struct RamProvider {
    stores: Mutex<HashMap<String, Arc<RamStore>>>,
}

impl RamProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store behind `root_uri`, created empty on first use.
    pub fn store(&self, root_uri: &str) -> Arc<RamStore> {
        let key = Name::parse(root_uri)
            .map(|n| n.root_uri())
            .unwrap_or_else(|_| root_uri.to_string());
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(stores.entry(key).or_default())
    }
}

impl Provider for RamProvider {
    fn create_file_system(
        &self,
        root: &Name,
        _options: &FileSystemOptions,
    ) -> Result<Arc<dyn Adapter>> {
        Ok(Arc::new(RamAdapter::new(self.store(&root.root_uri()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(uri: &str) -> Name {
        Name::parse(uri).unwrap()
    }

    #[test]
    fn test_insert_creates_parents() {
        let store = RamStore::new();
        store.insert_file("/a/b/c.txt", b"x");
        assert!(store.contains("/a"));
        assert!(store.contains("/a/b"));
        assert_eq!(store.len(), 3);
        assert_eq!(store.file_type("/a/b"), FileType::Folder);
        assert_eq!(store.file_type("/"), FileType::Folder);
        assert_eq!(store.file_type("/zzz"), FileType::Imaginary);
    }

    #[test]
    fn test_children_are_direct_only() {
        let store = RamStore::new();
        store.insert_file("/a/x", b"");
        store.insert_file("/a/y/z", b"");
        store.insert_file("/ab", b"");
        let names: Vec<String> = store.children("/a").into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["x", "y"]);
        let root: Vec<String> = store.children("/").into_iter().map(|c| c.name).collect();
        assert_eq!(root, vec!["a", "ab"]);
    }

    #[test]
    fn test_remove_subtree() {
        let store = RamStore::new();
        store.insert_file("/a/x", b"");
        store.insert_file("/ab", b"");
        assert!(store.remove("/a"));
        assert!(!store.contains("/a/x"));
        assert!(store.contains("/ab"));
    }

    #[test]
    fn test_adapter_delete_refuses_non_empty() {
        let store = Arc::new(RamStore::new());
        store.insert_file("/d/f", b"");
        let adapter = RamAdapter::new(Arc::clone(&store));
        let err = adapter.delete(&name("ram:///d")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Provider);
        adapter.delete(&name("ram:///d/f")).unwrap();
        adapter.delete(&name("ram:///d")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_adapter_rename_moves_subtree() {
        let store = Arc::new(RamStore::new());
        store.insert_file("/src/deep/f", b"1");
        let adapter = RamAdapter::new(Arc::clone(&store));
        adapter
            .rename(&name("ram:///src"), &name("ram:///dst/moved"))
            .unwrap();
        assert_eq!(store.read("/dst/moved/deep/f"), Some(b"1".to_vec()));
        assert!(!store.contains("/src"));
    }

    #[test]
    fn test_writer_commits_on_drop() {
        let store = Arc::new(RamStore::new());
        let adapter = RamAdapter::new(Arc::clone(&store));
        {
            let mut w = adapter.write(&name("ram:///f"), false).unwrap();
            w.write_all(b"abc").unwrap();
        }
        assert_eq!(store.read("/f"), Some(b"abc".to_vec()));
        {
            let mut w = adapter.write(&name("ram:///f"), true).unwrap();
            w.write_all(b"def").unwrap();
            w.flush().unwrap();
        }
        assert_eq!(store.read("/f"), Some(b"abcdef".to_vec()));
    }

    #[test]
    fn test_provider_store_per_root() {
        let provider = RamProvider::new();
        let a = provider.store("ram:///");
        let b = provider.store("ram:///ignored/path");
        let c = provider.store("ram://host/");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
