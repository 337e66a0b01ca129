//! Virtual namespace: a filesystem whose nodes are grafted from other
//! filesystems at named mount points (junctions).
//!
//! A virtual name below a junction mirrors the same relative name below the
//! junction's target. Names outside every junction are placeholders: folders
//! when they lead to a junction, imaginary otherwise.
//!
//! Removing a junction does not clean up placeholder ancestors, and nodes
//! already resolved below it are only re-examined once refreshed.

use crate::adapter::{Adapter, Attributes};
use crate::cache::FilesCache;
use crate::capability::{Capability, CapabilitySet};
use crate::config::CacheStrategy;
use crate::decorator::FileDecorator;
use crate::error::{Result, VfsError};
use crate::file_system::FileSystem;
use crate::name::{Name, NameScope};
use crate::node::{FileObject, FileType};
use crate::options::FileSystemOptions;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;
use tracing::debug;

#[derive(Default)]
struct JunctionTable {
    junctions: RwLock<BTreeMap<Name, FileObject>>,
}

impl JunctionTable {
    /// The deepest junction at or above `name`.
    fn lookup(&self, name: &Name) -> Option<(Name, FileObject)> {
        let junctions = self.junctions.read().unwrap_or_else(PoisonError::into_inner);
        junctions
            .iter()
            .filter(|(j, _)| *j == name || j.is_ancestor_of(name))
            .max_by_key(|(j, _)| j.depth())
            .map(|(j, target)| (j.clone(), target.clone()))
    }

    /// Base names of the next segment towards every junction below `name`.
    fn placeholder_children(&self, name: &Name) -> Vec<String> {
        let junctions = self.junctions.read().unwrap_or_else(PoisonError::into_inner);
        let depth = name.depth();
        let mut children: Vec<String> = junctions
            .keys()
            .filter(|j| name.is_ancestor_of(j))
            .filter_map(|j| j.segments().nth(depth).map(str::to_string))
            .collect();
        children.sort();
        children.dedup();
        children
    }

    fn leads_to_junction(&self, name: &Name) -> bool {
        let junctions = self.junctions.read().unwrap_or_else(PoisonError::into_inner);
        junctions.keys().any(|j| name.is_ancestor_of(j))
    }

    /// Adds a junction unless it would equal, contain or sit inside an
    /// existing one. On conflict the existing junction is returned.
    fn insert(&self, name: Name, target: FileObject) -> std::result::Result<(), Name> {
        let mut junctions = self.junctions.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = junctions
            .keys()
            .find(|j| *j == &name || j.is_ancestor_of(&name) || name.is_ancestor_of(j))
        {
            return Err(existing.clone());
        }
        junctions.insert(name, target);
        Ok(())
    }

    fn remove(&self, name: &Name) -> Option<FileObject> {
        self.junctions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    fn names(&self) -> Vec<Name> {
        self.junctions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

/// Adapter that answers every hook by delegating to the junction target.
struct JunctionAdapter {
    table: Arc<JunctionTable>,
}

impl JunctionAdapter {
    fn target(&self, name: &Name) -> Result<Option<FileObject>> {
        match self.table.lookup(name) {
            Some((junction, target)) => {
                let rel = junction.relative_name(name)?;
                Ok(Some(target.resolve_file(&rel, NameScope::DescendentOrSelf)?))
            }
            None => Ok(None),
        }
    }

    fn require_target(&self, name: &Name) -> Result<FileObject> {
        self.target(name)?.ok_or_else(|| {
            VfsError::name_resolution(name.uri(), "not below any junction")
        })
    }
}

impl Adapter for JunctionAdapter {
    fn capabilities(&self) -> CapabilitySet {
        [
            Capability::Attributes,
            Capability::Create,
            Capability::Delete,
            Capability::GetType,
            Capability::Junctions,
            Capability::GetLastModified,
            Capability::SetLastModifiedFile,
            Capability::SetLastModifiedFolder,
            Capability::ListChildren,
            Capability::ReadContent,
            Capability::WriteContent,
            Capability::AppendContent,
        ]
        .into_iter()
        .collect()
    }

    fn get_type(&self, name: &Name) -> Result<FileType> {
        match self.target(name)? {
            Some(target) => target.get_type(),
            None if name.is_root() || self.table.leads_to_junction(name) => Ok(FileType::Folder),
            None => Ok(FileType::Imaginary),
        }
    }

    fn list_children(&self, name: &Name) -> Result<Vec<String>> {
        match self.target(name)? {
            Some(target) => Ok(target
                .get_children()?
                .iter()
                .map(|c| c.name().base_name().to_string())
                .collect()),
            None => Ok(self.table.placeholder_children(name)),
        }
    }

    fn read(&self, name: &Name) -> Result<Box<dyn Read + Send>> {
        let reader = self.require_target(name)?.content().reader()?;
        Ok(Box::new(reader))
    }

    fn write(&self, name: &Name, append: bool) -> Result<Box<dyn Write + Send>> {
        let writer = self.require_target(name)?.content().writer(append)?;
        Ok(Box::new(writer))
    }

    fn delete(&self, name: &Name) -> Result<()> {
        self.require_target(name)?.delete()?;
        Ok(())
    }

    fn create_folder(&self, name: &Name) -> Result<()> {
        self.require_target(name)?.create_folder()
    }

    fn content_size(&self, name: &Name) -> Result<u64> {
        self.require_target(name)?.content().size()
    }

    fn last_modified(&self, name: &Name) -> Result<SystemTime> {
        self.require_target(name)?.content().last_modified()
    }

    fn set_last_modified(&self, name: &Name, time: SystemTime) -> Result<()> {
        self.require_target(name)?.content().set_last_modified(time)
    }

    fn attributes(&self, name: &Name) -> Result<Attributes> {
        match self.target(name)? {
            Some(target) => target.content().attributes(),
            None => Ok(Attributes::new()),
        }
    }
}

pub struct VirtualFileSystem {
    fs: Arc<FileSystem>,
    table: Arc<JunctionTable>,
}

impl VirtualFileSystem {
    pub(crate) fn new(
        root: Name,
        cache: Arc<dyn FilesCache>,
        strategy: CacheStrategy,
        decorator: Option<Arc<dyn FileDecorator>>,
    ) -> Self {
        let table = Arc::new(JunctionTable::default());
        let adapter = Arc::new(JunctionAdapter {
            table: Arc::clone(&table),
        });
        let fs = FileSystem::new(
            root,
            FileSystemOptions::default(),
            adapter,
            cache,
            strategy,
            decorator,
        );
        // the namespace itself counts as a use until it is dropped
        fs.acquire();
        VirtualFileSystem { fs, table }
    }

    pub fn file_system(&self) -> &Arc<FileSystem> {
        &self.fs
    }

    pub fn root(&self) -> Result<FileObject> {
        self.fs.root()
    }

    /// Resolves `path` (absolute, or relative to the virtual root).
    pub fn resolve_file(&self, path: &str) -> Result<FileObject> {
        let name = self.fs.root_name().resolve(path, NameScope::FileSystem)?;
        self.fs.resolve_file(&name)
    }

    pub fn junctions(&self) -> Vec<Name> {
        self.table.names()
    }

    /// Grafts `target` at `path`. Fails with [`VfsError::NestedJunction`]
    /// when `path` is, contains, or lies inside an existing junction.
    pub fn add_junction(&self, path: &str, target: &FileObject) -> Result<()> {
        let root = self.fs.root_name().clone();
        self.fs.require(Capability::Junctions, &root)?;
        let name = root.resolve(path, NameScope::FileSystem)?;

        if let Err(existing) = self.table.insert(name.clone(), target.clone()) {
            return Err(VfsError::NestedJunction { name, existing });
        }

        // Whatever was cached at or below the mount point was a placeholder.
        if let Some(core) = self.fs.cached_core(&name) {
            self.fs.detach_core(&core);
        }
        self.fs.detach_descendants(&name);

        // Every ancestor up to the root becomes a listable folder.
        let mut child = name.clone();
        while let Some(parent) = child.parent() {
            let node = self.fs.resolve_file(&parent)?;
            node.core().inject_type(FileType::Folder);
            child = parent;
        }

        debug!("junction: {} -> {}", name, target.name());
        Ok(())
    }

    /// Removes the junction at `path`. Returns whether there was one.
    pub fn remove_junction(&self, path: &str) -> Result<bool> {
        let name = self.fs.root_name().resolve(path, NameScope::FileSystem)?;
        let removed = self.table.remove(&name).is_some();
        if removed {
            if let Some(core) = self.fs.cached_core(&name) {
                self.fs.detach_core(&core);
            }
            debug!("junction: removed {}", name);
        }
        Ok(removed)
    }
}

impl Drop for VirtualFileSystem {
    fn drop(&mut self) {
        self.fs.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use crate::error::ErrorKind;
    use crate::manager::FileSystemManager;
    use crate::provider::ram::{RamProvider, RamStore};
    use std::io::Read;

    fn setup(strategy: CacheStrategy) -> (FileSystemManager, Arc<RamStore>) {
        let provider = Arc::new(RamProvider::new());
        let store = provider.store("ram:///");
        store.insert_file("/data/sub/file.txt", b"grafted");
        store.insert_file("/data/top.txt", b"top");
        store.insert_folder("/other");
        let mut m = FileSystemManager::new(ManagerConfig {
            cache_strategy: strategy,
            ..ManagerConfig::default()
        });
        m.add_provider("ram", provider).unwrap();
        (m, store)
    }

    #[test]
    fn test_mount_mirrors_target() {
        let (m, _store) = setup(CacheStrategy::Manual);
        let vfs = m.create_virtual_file_system("vfs:///").unwrap();
        let target = m.resolve_file("ram:///data").unwrap();
        vfs.add_junction("/mnt", &target).unwrap();

        let file = vfs.resolve_file("/mnt/sub/file.txt").unwrap();
        assert_eq!(file.uri(), "vfs:///mnt/sub/file.txt");
        assert_eq!(file.get_type().unwrap(), FileType::File);
        let mut s = String::new();
        file.content().reader().unwrap().read_to_string(&mut s).unwrap();
        assert_eq!(s, "grafted");

        let mnt = vfs.resolve_file("/mnt").unwrap();
        let mut names: Vec<String> = mnt
            .get_children()
            .unwrap()
            .iter()
            .map(|c| c.name().base_name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["sub", "top.txt"]);
    }

    #[test]
    fn test_nested_junction_rejected() {
        let (m, _store) = setup(CacheStrategy::Manual);
        let vfs = m.create_virtual_file_system("vfs:///").unwrap();
        let data = m.resolve_file("ram:///data").unwrap();
        let other = m.resolve_file("ram:///other").unwrap();
        vfs.add_junction("/mnt", &data).unwrap();

        for path in ["/mnt/sub", "/mnt", "/"] {
            let err = vfs.add_junction(path, &other).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NestedJunction, "{}", path);
        }
        vfs.add_junction("/elsewhere", &other).unwrap();
        assert_eq!(vfs.junctions().len(), 2);
    }

    #[test]
    fn test_placeholders_lead_to_mount() {
        let (m, _store) = setup(CacheStrategy::Manual);
        let vfs = m.create_virtual_file_system("vfs:///").unwrap();
        let root = vfs.root().unwrap();
        assert_eq!(root.get_type().unwrap(), FileType::Folder);
        assert!(root.get_children().unwrap().is_empty());

        let deep = vfs.resolve_file("/a/b").unwrap();
        assert_eq!(deep.get_type().unwrap(), FileType::Imaginary);

        let target = m.resolve_file("ram:///data").unwrap();
        vfs.add_junction("/a/b/c", &target).unwrap();

        assert_eq!(deep.get_type().unwrap(), FileType::Folder);
        let a = vfs.resolve_file("/a").unwrap();
        assert!(a.is_folder().unwrap());
        let children: Vec<String> = a
            .get_children()
            .unwrap()
            .iter()
            .map(|c| c.name().base_name().to_string())
            .collect();
        assert_eq!(children, vec!["b"]);
        assert_eq!(root.get_children().unwrap().len(), 1);
        assert!(vfs.resolve_file("/a/zzz").unwrap().get_type().unwrap() == FileType::Imaginary);
    }

    #[test]
    fn test_cached_placeholder_attaches_to_target() {
        let (m, _store) = setup(CacheStrategy::Manual);
        let vfs = m.create_virtual_file_system("vfs:///").unwrap();
        let mnt = vfs.resolve_file("/mnt").unwrap();
        assert_eq!(mnt.get_type().unwrap(), FileType::Imaginary);
        let below = vfs.resolve_file("/mnt/top.txt").unwrap();
        assert_eq!(below.get_type().unwrap(), FileType::Imaginary);

        let target = m.resolve_file("ram:///data").unwrap();
        vfs.add_junction("/mnt", &target).unwrap();
        assert_eq!(mnt.get_type().unwrap(), FileType::Folder);
        assert_eq!(below.get_type().unwrap(), FileType::File);
    }

    #[test]
    fn test_writes_go_to_target() {
        let (m, store) = setup(CacheStrategy::Manual);
        let vfs = m.create_virtual_file_system("vfs:///").unwrap();
        let target = m.resolve_file("ram:///data").unwrap();
        vfs.add_junction("/mnt", &target).unwrap();

        let f = vfs.resolve_file("/mnt/new/dir/written.txt").unwrap();
        let mut w = f.content().writer(false).unwrap();
        w.write_all(b"through").unwrap();
        w.close().unwrap();
        assert_eq!(store.read("/data/new/dir/written.txt"), Some(b"through".to_vec()));
        assert!(f.is_file().unwrap());

        assert!(f.delete().unwrap());
        assert!(!store.contains("/data/new/dir/written.txt"));
    }

    #[test]
    fn test_write_outside_junction_fails() {
        let (m, _store) = setup(CacheStrategy::Manual);
        let vfs = m.create_virtual_file_system("vfs:///").unwrap();
        let f = vfs.resolve_file("/loose.txt").unwrap();
        assert!(f.content().writer(false).is_err());
    }

    #[test]
    fn test_remove_junction() {
        let (m, _store) = setup(CacheStrategy::Manual);
        let vfs = m.create_virtual_file_system("vfs:///").unwrap();
        let target = m.resolve_file("ram:///data").unwrap();
        vfs.add_junction("/mnt", &target).unwrap();
        let mnt = vfs.resolve_file("/mnt").unwrap();
        assert!(mnt.is_folder().unwrap());

        assert!(vfs.remove_junction("/mnt").unwrap());
        assert!(!vfs.remove_junction("/mnt").unwrap());
        assert_eq!(mnt.get_type().unwrap(), FileType::Imaginary);
        assert!(vfs.junctions().is_empty());
    }

    #[test]
    fn test_virtual_file_system_registered_with_manager() {
        let (m, _store) = setup(CacheStrategy::Manual);
        let before = m.file_system_count();
        let vfs = m.create_virtual_file_system("vfs:///").unwrap();
        assert_eq!(m.file_system_count(), before + 1);
        assert!(vfs.file_system().has_capability(Capability::Junctions));
        assert!(!vfs.file_system().has_capability(Capability::Rename));
    }

    #[test]
    fn test_live_namespace_survives_free_unused() {
        let (m, _store) = setup(CacheStrategy::OnResolve);
        let vfs = m.create_virtual_file_system("vfs:///").unwrap();
        let target = m.resolve_file("ram:///data").unwrap();
        vfs.add_junction("/mnt", &target).unwrap();
        drop(target);

        m.free_unused_resources();
        assert!(!vfs.file_system().is_closed());
        let file = vfs.resolve_file("/mnt/top.txt").unwrap();
        assert!(file.is_file().unwrap());
        drop(file);

        let fs = Arc::clone(vfs.file_system());
        drop(vfs);
        assert!(fs.is_releasable());
        assert!(m.free_unused_resources() >= 1);
        assert!(fs.is_closed());
    }
}
