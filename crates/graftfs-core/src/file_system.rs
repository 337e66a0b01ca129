//! The filesystem container: one backing-store connection, its root, its
//! negotiated capabilities, its listeners and its share of the node cache.

use crate::adapter::Adapter;
use crate::cache::{FilesCache, FsId};
use crate::capability::{Capability, CapabilitySet};
use crate::config::CacheStrategy;
use crate::decorator::{Decoration, FileDecorator};
use crate::error::{Result, VfsError};
use crate::events::{deliver, FileEvent, FileListener, ListenerId, ListenerRegistry};
use crate::name::Name;
use crate::node::{FileObject, FileType, NodeCore};
use crate::options::FileSystemOptions;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace, warn};

static NEXT_FS_ID: AtomicU64 = AtomicU64::new(1);

pub struct FileSystem {
    id: FsId,
    root: Name,
    options: FileSystemOptions,
    adapter: Arc<dyn Adapter>,
    capabilities: CapabilitySet,
    cache: Arc<dyn FilesCache>,
    strategy: CacheStrategy,
    decorator: Option<Arc<dyn FileDecorator>>,
    listeners: Mutex<ListenerRegistry>,
    use_count: AtomicUsize,
    open_streams: AtomicUsize,
    closed: AtomicBool,
}

impl FileSystem {
    pub(crate) fn new(
        root: Name,
        options: FileSystemOptions,
        adapter: Arc<dyn Adapter>,
        cache: Arc<dyn FilesCache>,
        strategy: CacheStrategy,
        decorator: Option<Arc<dyn FileDecorator>>,
    ) -> Arc<Self> {
        let capabilities = CapabilitySet::negotiate(&adapter.capabilities(), &options);
        let id = NEXT_FS_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            "file_system: created {} (id={}, strategy={})",
            root, id, strategy
        );
        Arc::new(FileSystem {
            id,
            root: root.root(),
            options,
            adapter,
            capabilities,
            cache,
            strategy,
            decorator,
            listeners: Mutex::new(ListenerRegistry::new()),
            use_count: AtomicUsize::new(0),
            open_streams: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> FsId {
        self.id
    }

    pub fn root_name(&self) -> &Name {
        &self.root
    }

    pub fn options(&self) -> &FileSystemOptions {
        &self.options
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.contains(cap)
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.strategy
    }

    pub(crate) fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub(crate) fn require(&self, cap: Capability, name: &Name) -> Result<()> {
        if self.capabilities.contains(cap) {
            Ok(())
        } else {
            Err(VfsError::CapabilityUnsupported {
                capability: cap,
                name: name.clone(),
            })
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(VfsError::Closed {
                root: self.root.clone(),
            });
        }
        Ok(())
    }

    pub fn root(self: &Arc<Self>) -> Result<FileObject> {
        let root = self.root.clone();
        self.resolve_file(&root)
    }

    pub fn resolve_file(self: &Arc<Self>, name: &Name) -> Result<FileObject> {
        self.resolve_file_with(name, true)
    }

    /// Returns the node for `name`. Without `use_cache` a fresh node is built
    /// and left out of the shared cache.
    pub fn resolve_file_with(self: &Arc<Self>, name: &Name, use_cache: bool) -> Result<FileObject> {
        self.check_open()?;
        if name.root_uri() != self.root.root_uri() {
            return Err(VfsError::MismatchedFileSystem {
                name: name.clone(),
                root: self.root.clone(),
            });
        }

        let (core, created) = if use_cache {
            self.core_for(name)
        } else {
            (Arc::new(self.new_core(name)), true)
        };
        let mut file = FileObject::new(Arc::clone(self), core);
        if created {
            if let Some(decorator) = &self.decorator {
                file = decorator.decorate(file)?;
            }
        }

        if self.strategy == CacheStrategy::OnResolve {
            file.refresh()?;
            file.attach()?;
        }
        Ok(file)
    }

    fn new_core(&self, name: &Name) -> NodeCore {
        NodeCore::new(name.clone(), Decoration::for_strategy(self.strategy))
    }

    /// Cached core for `name`, creating it on a miss. The flag reports
    /// whether this call created it.
    fn core_for(&self, name: &Name) -> (Arc<NodeCore>, bool) {
        if let Some(core) = self.cache.get(self.id, name) {
            trace!("file_system: cache hit {}", name);
            return (core, false);
        }
        trace!("file_system: cache miss {}", name);
        let fresh = Arc::new(self.new_core(name));
        let core = self.cache.put_if_absent(self.id, Arc::clone(&fresh));
        let created = Arc::ptr_eq(&core, &fresh);
        (core, created)
    }

    pub(crate) fn cached_core(&self, name: &Name) -> Option<Arc<NodeCore>> {
        self.cache.get(self.id, name)
    }

    /// Records a type learnt from a parent's listing on a node nobody has
    /// attached yet.
    pub(crate) fn prime_type(&self, name: &Name, file_type: FileType) -> Result<()> {
        self.check_open()?;
        let (core, _) = self.core_for(name);
        if !core.is_attached() {
            core.inject_type(file_type);
        }
        Ok(())
    }

    pub(crate) fn detach_core(&self, core: &NodeCore) {
        if core.detach() {
            if let Err(e) = self.adapter.detach(core.name()) {
                warn!("file_system: detach of {} failed: {}", core.name(), e);
            }
            trace!("file_system: detached {}", core.name());
        }
    }

    pub(crate) fn notify_children_changed(&self, name: &Name) {
        if let Some(parent) = name.parent() {
            if let Some(core) = self.cache.get(self.id, &parent) {
                core.clear_children();
            }
        }
    }

    pub(crate) fn detach_descendants(&self, name: &Name) {
        for core in self.cache.cached(self.id) {
            if name.is_ancestor_of(core.name()) {
                self.detach_core(&core);
            }
        }
    }

    pub fn cached_nodes(&self) -> usize {
        self.cache.cached(self.id).len()
    }

    pub fn add_listener(&self, name: Name, listener: Arc<dyn FileListener>) -> ListenerId {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(name, listener)
    }

    pub fn remove_listener(&self, name: &Name, id: ListenerId) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name, id)
    }

    pub(crate) fn fire(&self, event: FileEvent) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(event.name());
        if !listeners.is_empty() {
            deliver(&listeners, &event);
        }
    }

    pub(crate) fn acquire(&self) {
        self.use_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self) {
        self.use_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn stream_opened(&self) {
        self.open_streams.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn stream_closed(&self) {
        self.open_streams.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn use_count(&self) -> usize {
        self.use_count.load(Ordering::Acquire)
    }

    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::Acquire)
    }

    pub fn is_releasable(&self) -> bool {
        self.use_count() == 0 && self.open_streams() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Detaches every cached node, drops them from the cache and closes the
    /// adapter. Later resolves fail with [`VfsError::Closed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for core in self.cache.cached(self.id) {
            self.detach_core(&core);
        }
        self.cache.clear(self.id);
        if let Err(e) = self.adapter.close() {
            warn!("file_system: closing {} failed: {}", self.root, e);
        }
        debug!("file_system: closed {} (id={})", self.root, self.id);
    }
}

impl fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystem")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("strategy", &self.strategy)
            .field("use_count", &self.use_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
