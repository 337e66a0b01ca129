//! Scheme-to-provider routing and the registry of open filesystems.

use crate::adapter::Provider;
use crate::cache::{self, FilesCache};
use crate::config::{CacheStrategy, ManagerConfig};
use crate::decorator::FileDecorator;
use crate::error::{Result, VfsError};
use crate::file_system::FileSystem;
use crate::junction::VirtualFileSystem;
use crate::name::{self, Name, NameScope};
use crate::node::FileObject;
use crate::options::FileSystemOptions;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Clone)]
struct ProviderEntry {
    id: usize,
    provider: Arc<dyn Provider>,
}

/// Identity of a filesystem: which provider opened which root with which
/// options.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FsKey {
    provider: usize,
    root: Name,
    options: FileSystemOptions,
}

#[derive(Default)]
struct Registry {
    file_systems: HashMap<FsKey, Arc<FileSystem>>,
    virtual_systems: Vec<Arc<FileSystem>>,
}

pub struct FileSystemManager {
    config: ManagerConfig,
    cache: Arc<dyn FilesCache>,
    providers: HashMap<String, ProviderEntry>,
    local_provider: Option<ProviderEntry>,
    default_provider: Option<ProviderEntry>,
    next_provider_id: usize,
    decorator: Option<Arc<dyn FileDecorator>>,
    base_file: Option<FileObject>,
    registry: Mutex<Registry>,
}

impl FileSystemManager {
    pub fn new(config: ManagerConfig) -> Self {
        let cache = cache::from_config(&config);
        Self::with_cache(config, cache)
    }

    pub fn with_cache(config: ManagerConfig, cache: Arc<dyn FilesCache>) -> Self {
        debug!(
            "manager: init strategy={} files_cache={:?}",
            config.cache_strategy, config.files_cache
        );
        FileSystemManager {
            config,
            cache,
            providers: HashMap::new(),
            local_provider: None,
            default_provider: None,
            next_provider_id: 0,
            decorator: None,
            base_file: None,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn cache_strategy(&self) -> CacheStrategy {
        self.config.cache_strategy
    }

    pub fn files_cache(&self) -> &Arc<dyn FilesCache> {
        &self.cache
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_entry(&mut self, provider: Arc<dyn Provider>) -> ProviderEntry {
        self.next_provider_id += 1;
        ProviderEntry {
            id: self.next_provider_id,
            provider,
        }
    }

    /// Registers `provider` for `scheme`. A scheme can be registered once.
    pub fn add_provider(&mut self, scheme: &str, provider: Arc<dyn Provider>) -> Result<()> {
        let scheme = scheme.to_ascii_lowercase();
        if self.providers.contains_key(&scheme) {
            return Err(VfsError::configuration(format!(
                "a provider is already registered for scheme {:?}",
                scheme
            )));
        }
        let entry = self.new_entry(provider);
        debug!("manager: registered provider for {}", scheme);
        self.providers.insert(scheme, entry);
        Ok(())
    }

    /// Provider for bare absolute local paths. Also serves the `file` scheme
    /// unless another provider already claimed it.
    pub fn set_local_provider(&mut self, provider: Arc<dyn Provider>) {
        let entry = self.new_entry(provider);
        self.providers
            .entry("file".to_string())
            .or_insert_with(|| entry.clone());
        self.local_provider = Some(entry);
    }

    /// Provider for URIs whose scheme nobody registered.
    pub fn set_default_provider(&mut self, provider: Arc<dyn Provider>) {
        let entry = self.new_entry(provider);
        self.default_provider = Some(entry);
    }

    /// Decorator applied to nodes of filesystems opened after this call.
    pub fn set_decorator(&mut self, decorator: Arc<dyn FileDecorator>) {
        self.decorator = Some(decorator);
    }

    pub fn set_base_file(&mut self, base: Option<FileObject>) {
        self.base_file = base;
    }

    pub fn base_file(&self) -> Option<&FileObject> {
        self.base_file.as_ref()
    }

    pub fn has_provider(&self, scheme: &str) -> bool {
        self.providers.contains_key(&scheme.to_ascii_lowercase())
    }

    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.providers.keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Resolves `uri` against the base file, if one is set.
    pub fn resolve_file(&self, uri: &str) -> Result<FileObject> {
        self.resolve_file_from(self.base_file.as_ref(), uri)
    }

    pub fn resolve_file_from(&self, base: Option<&FileObject>, uri: &str) -> Result<FileObject> {
        self.resolve_file_with_options(base, uri, &FileSystemOptions::default())
    }

    /// Routes `uri`: a registered scheme goes to its provider, an absolute
    /// local path to the local provider, any other scheme to the default
    /// provider, and anything else is resolved relative to `base`.
    pub fn resolve_file_with_options(
        &self,
        base: Option<&FileObject>,
        uri: &str,
        options: &FileSystemOptions,
    ) -> Result<FileObject> {
        let scheme = name::extract_scheme(uri).map(|(s, _)| s.to_ascii_lowercase());

        if let Some(entry) = scheme.as_ref().and_then(|s| self.providers.get(s)) {
            name::check_encoding(uri)?;
            let name = entry.provider.parse_uri(uri)?;
            return self.open(entry, &name, options);
        }

        if name::is_absolute_local(uri) {
            if let Some(local) = &self.local_provider {
                let name = Name::parse_local(uri)?;
                return self.open(local, &name, options);
            }
        }

        if let Some(scheme) = scheme {
            return match &self.default_provider {
                Some(default) => {
                    name::check_encoding(uri)?;
                    let name = default.provider.parse_uri(uri)?;
                    self.open(default, &name, options)
                }
                None => Err(VfsError::name_resolution(
                    uri,
                    format!("no provider registered for scheme {:?}", scheme),
                )),
            };
        }

        let base = base.ok_or_else(|| {
            VfsError::name_resolution(uri, "relative name without a base file")
        })?;
        base.resolve_file(uri, NameScope::FileSystem)
    }

    /// Parses `uri` the way [`resolve_file`](Self::resolve_file) would route
    /// it, without opening anything.
    pub fn resolve_uri(&self, uri: &str) -> Result<Name> {
        let scheme = name::extract_scheme(uri).map(|(s, _)| s.to_ascii_lowercase());
        if let Some(entry) = scheme.as_ref().and_then(|s| self.providers.get(s)) {
            name::check_encoding(uri)?;
            return entry.provider.parse_uri(uri);
        }
        if name::is_absolute_local(uri) && self.local_provider.is_some() {
            return Name::parse_local(uri);
        }
        if scheme.is_some() {
            if let Some(default) = &self.default_provider {
                name::check_encoding(uri)?;
                return default.provider.parse_uri(uri);
            }
            return Name::parse(uri);
        }
        match &self.base_file {
            Some(base) => base.name().resolve(uri, NameScope::FileSystem),
            None => Err(VfsError::name_resolution(
                uri,
                "relative name without a base file",
            )),
        }
    }

    pub fn resolve_name(&self, base: &Name, path: &str, scope: NameScope) -> Result<Name> {
        base.resolve(path, scope)
    }

    fn open(&self, entry: &ProviderEntry, name: &Name, options: &FileSystemOptions) -> Result<FileObject> {
        let fs = self.acquire_file_system(entry, name, options)?;
        let file = fs.resolve_file(name);
        fs.release();
        file
    }

    /// The registered filesystem for `name`'s root, created on demand. The
    /// returned filesystem carries one use, taken under the registry lock so
    /// `free_unused_resources` cannot close it before the caller holds a node.
    fn acquire_file_system(
        &self,
        entry: &ProviderEntry,
        name: &Name,
        options: &FileSystemOptions,
    ) -> Result<Arc<FileSystem>> {
        let key = FsKey {
            provider: entry.id,
            root: name.root(),
            options: options.clone(),
        };
        let mut registry = self.registry();
        if let Some(fs) = registry.file_systems.get(&key) {
            if !fs.is_closed() {
                fs.acquire();
                return Ok(Arc::clone(fs));
            }
        }
        let adapter = entry.provider.create_file_system(&key.root, options)?;
        let fs = FileSystem::new(
            key.root.clone(),
            options.clone(),
            adapter,
            Arc::clone(&self.cache),
            self.config.cache_strategy,
            self.decorator.clone(),
        );
        fs.acquire();
        registry.file_systems.insert(key, Arc::clone(&fs));
        Ok(fs)
    }

    /// Creates an empty virtual namespace rooted at `root_uri`.
    pub fn create_virtual_file_system(&self, root_uri: &str) -> Result<VirtualFileSystem> {
        let root = Name::parse(root_uri)?.root();
        let vfs = VirtualFileSystem::new(
            root,
            Arc::clone(&self.cache),
            self.config.cache_strategy,
            self.decorator.clone(),
        );
        self.registry()
            .virtual_systems
            .push(Arc::clone(vfs.file_system()));
        Ok(vfs)
    }

    /// Open filesystems, virtual ones included.
    pub fn file_system_count(&self) -> usize {
        let registry = self.registry();
        registry.file_systems.len() + registry.virtual_systems.len()
    }

    /// Closes and forgets every filesystem that has no live handle and no
    /// open stream. Returns how many were closed.
    pub fn free_unused_resources(&self) -> usize {
        let mut registry = self.registry();
        let mut freed = Vec::new();
        registry.file_systems.retain(|_, fs| {
            if fs.is_releasable() || fs.is_closed() {
                freed.push(Arc::clone(fs));
                false
            } else {
                true
            }
        });
        registry.virtual_systems.retain(|fs| {
            if fs.is_releasable() || fs.is_closed() {
                freed.push(Arc::clone(fs));
                false
            } else {
                true
            }
        });
        drop(registry);

        for fs in &freed {
            fs.close();
        }
        if !freed.is_empty() {
            debug!("manager: freed {} unused filesystems", freed.len());
        }
        freed.len()
    }

    /// Closes every filesystem and drops all providers.
    pub fn close(&mut self) {
        self.base_file = None;
        let (file_systems, virtual_systems) = {
            let mut registry = self.registry();
            (
                std::mem::take(&mut registry.file_systems),
                std::mem::take(&mut registry.virtual_systems),
            )
        };
        for fs in file_systems.values().chain(virtual_systems.iter()) {
            fs.close();
        }
        self.providers.clear();
        self.local_provider = None;
        self.default_provider = None;
        debug!("manager: closed");
    }
}

impl Drop for FileSystemManager {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::provider::ram::RamProvider;

    fn manager() -> (FileSystemManager, Arc<RamProvider>) {
        let provider = Arc::new(RamProvider::new());
        let mut m = FileSystemManager::new(ManagerConfig::default());
        m.add_provider("ram", provider.clone()).unwrap();
        (m, provider)
    }

    #[test]
    fn test_duplicate_scheme_rejected() {
        let (mut m, provider) = manager();
        let err = m.add_provider("RAM", provider).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(m.has_provider("Ram"));
        assert_eq!(m.schemes(), vec!["ram".to_string()]);
    }

    #[test]
    fn test_same_root_shares_filesystem() {
        let (m, _p) = manager();
        let a = m.resolve_file("ram:///a").unwrap();
        let b = m.resolve_file("ram:///x/y").unwrap();
        assert!(Arc::ptr_eq(a.file_system(), b.file_system()));
        let other = m.resolve_file("ram://host/a").unwrap();
        assert!(!Arc::ptr_eq(a.file_system(), other.file_system()));
        assert_eq!(m.file_system_count(), 2);
    }

    #[test]
    fn test_options_are_part_of_identity() {
        let (m, _p) = manager();
        let plain = m.resolve_file("ram:///a").unwrap();
        let ro = m
            .resolve_file_with_options(
                None,
                "ram:///a",
                &FileSystemOptions::new().with(FileSystemOptions::READ_ONLY, "true"),
            )
            .unwrap();
        assert!(!Arc::ptr_eq(plain.file_system(), ro.file_system()));
    }

    #[test]
    fn test_unknown_scheme() {
        let (m, _p) = manager();
        let err = m.resolve_file("gopher://x/y").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameResolution);
    }

    #[test]
    fn test_default_provider_takes_unknown_scheme() {
        let (mut m, _p) = manager();
        m.set_default_provider(Arc::new(RamProvider::new()));
        let f = m.resolve_file("anything://host/a").unwrap();
        assert_eq!(f.name().scheme(), "anything");
    }

    #[test]
    fn test_relative_needs_base() {
        let (mut m, provider) = manager();
        assert_eq!(
            m.resolve_file("a/b").unwrap_err().kind(),
            ErrorKind::NameResolution
        );
        provider.store("ram:///").insert_folder("/base");
        let base = m.resolve_file("ram:///base").unwrap();
        m.set_base_file(Some(base.clone()));
        let rel = m.resolve_file("sub/../c.txt").unwrap();
        assert_eq!(rel.uri(), "ram:///base/c.txt");
        let up = m.resolve_file_from(Some(&base), "../top").unwrap();
        assert_eq!(up.uri(), "ram:///top");
        assert_eq!(m.resolve_uri("x").unwrap().uri(), "ram:///base/x");
    }

    #[test]
    fn test_bad_escape_rejected() {
        let (m, _p) = manager();
        assert_eq!(
            m.resolve_file("ram:///a%G1").unwrap_err().kind(),
            ErrorKind::NameResolution
        );
    }

    #[test]
    fn test_resolve_name_scopes() {
        let (m, _p) = manager();
        let base = m.resolve_uri("ram:///a").unwrap();
        assert_eq!(
            m.resolve_name(&base, "b", NameScope::Child).unwrap().uri(),
            "ram:///a/b"
        );
        assert!(m.resolve_name(&base, "b/c", NameScope::Child).is_err());
    }

    #[test]
    fn test_free_unused_resources() {
        let (m, _p) = manager();
        let held = m.resolve_file("ram://one/a").unwrap();
        {
            let _dropped = m.resolve_file("ram://two/a").unwrap();
        }
        assert_eq!(m.file_system_count(), 2);
        assert_eq!(m.free_unused_resources(), 1);
        assert_eq!(m.file_system_count(), 1);
        assert!(!held.file_system().is_closed());

        // a freed filesystem is reopened on demand
        let again = m.resolve_file("ram://two/a").unwrap();
        assert!(!again.file_system().is_closed());
    }

    #[test]
    fn test_close_closes_everything() {
        let (mut m, _p) = manager();
        let f = m.resolve_file("ram:///a").unwrap();
        m.close();
        assert!(f.file_system().is_closed());
        assert_eq!(m.file_system_count(), 0);
        assert!(m.schemes().is_empty());
    }

    #[test]
    fn test_resolve_races_free_unused() {
        let (m, _p) = manager();
        std::thread::scope(|scope| {
            let resolver = scope.spawn(|| {
                for i in 0..500 {
                    let uri = format!("ram://host{}/f", i % 4);
                    if let Err(e) = m.resolve_file(&uri) {
                        return Some(e.kind());
                    }
                }
                None
            });
            let freer = scope.spawn(|| {
                for _ in 0..500 {
                    m.free_unused_resources();
                }
            });
            freer.join().unwrap();
            assert_eq!(resolver.join().unwrap(), None);
        });
    }

    #[test]
    fn test_open_leaves_only_handle_uses() {
        let (m, _p) = manager();
        let f = m.resolve_file("ram:///a").unwrap();
        assert_eq!(f.file_system().use_count(), 1);
        drop(f);
        assert_eq!(m.free_unused_resources(), 1);
    }
}
