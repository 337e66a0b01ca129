//! Process-wide node caches keyed by (filesystem, name).
//!
//! Losing an entry is always safe: type and children are recomputed from the
//! adapter when the node is created again.

use crate::config::{FilesCacheKind, ManagerConfig};
use crate::name::Name;
use crate::node::NodeCore;
use dashmap::DashMap;
use lru::LruCache;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, trace};

pub type FsId = u64;

pub trait FilesCache: Send + Sync {
    fn get(&self, fs: FsId, name: &Name) -> Option<Arc<NodeCore>>;

    /// Inserts `node` unless a node for its name is already cached, and
    /// returns whichever node is cached afterwards.
    fn put_if_absent(&self, fs: FsId, node: Arc<NodeCore>) -> Arc<NodeCore>;

    fn remove(&self, fs: FsId, name: &Name) -> Option<Arc<NodeCore>>;

    fn clear(&self, fs: FsId);

    fn cached(&self, fs: FsId) -> Vec<Arc<NodeCore>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn from_config(config: &ManagerConfig) -> Arc<dyn FilesCache> {
    match config.files_cache {
        FilesCacheKind::Default => Arc::new(DefaultFilesCache::new()),
        FilesCacheKind::Lru => Arc::new(LruFilesCache::new(config.lru_capacity)),
        FilesCacheKind::Weak => Arc::new(WeakFilesCache::new()),
    }
}

#[derive(Default)]
pub struct DefaultFilesCache {
    entries: DashMap<(FsId, Name), Arc<NodeCore>>,
}

impl DefaultFilesCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FilesCache for DefaultFilesCache {
    fn get(&self, fs: FsId, name: &Name) -> Option<Arc<NodeCore>> {
        self.entries
            .get(&(fs, name.clone()))
            .map(|e| Arc::clone(e.value()))
    }

    fn put_if_absent(&self, fs: FsId, node: Arc<NodeCore>) -> Arc<NodeCore> {
        let key = (fs, node.name().clone());
        Arc::clone(self.entries.entry(key).or_insert(node).value())
    }

    fn remove(&self, fs: FsId, name: &Name) -> Option<Arc<NodeCore>> {
        self.entries.remove(&(fs, name.clone())).map(|(_, v)| v)
    }

    fn clear(&self, fs: FsId) {
        self.entries.retain(|(id, _), _| *id != fs);
    }

    fn cached(&self, fs: FsId) -> Vec<Arc<NodeCore>> {
        self.entries
            .iter()
            .filter(|e| e.key().0 == fs)
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

struct LruState {
    per_fs: HashMap<FsId, LruCache<Name, Arc<NodeCore>>>,
    stats: CacheStats,
}

/// Bounded per filesystem. Nodes that are attached, have open content or are
/// still held by a handle are never evicted; when nothing else is left the
/// cache grows past its bound instead.
pub struct LruFilesCache {
    capacity: usize,
    state: Mutex<LruState>,
}

impl LruFilesCache {
    pub fn new(capacity: usize) -> Self {
        LruFilesCache {
            capacity: capacity.max(1),
            state: Mutex::new(LruState {
                per_fs: HashMap::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            size: state.per_fs.values().map(LruCache::len).sum(),
            ..state.stats.clone()
        }
    }

    fn evictable(node: &Arc<NodeCore>) -> bool {
        Arc::strong_count(node) == 1 && !node.is_attached() && !node.is_content_open()
    }

    fn enforce_bound(
        lru: &mut LruCache<Name, Arc<NodeCore>>,
        capacity: usize,
        keep: &Name,
        stats: &mut CacheStats,
    ) {
        while lru.len() > capacity {
            let victim = lru
                .iter()
                .rev()
                .find(|(name, node)| *name != keep && Self::evictable(node))
                .map(|(name, _)| name.clone());
            let Some(victim) = victim else {
                trace!("lru_cache: every entry pinned, growing to {}", lru.len());
                break;
            };
            if let Some(node) = lru.pop(&victim) {
                node.detach();
                stats.evictions += 1;
                debug!("lru_cache: evicted {}", victim);
            }
        }
    }
}

impl FilesCache for LruFilesCache {
    fn get(&self, fs: FsId, name: &Name) -> Option<Arc<NodeCore>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let found = state
            .per_fs
            .get_mut(&fs)
            .and_then(|lru| lru.get(name).cloned());
        if found.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        found
    }

    fn put_if_absent(&self, fs: FsId, node: Arc<NodeCore>) -> Arc<NodeCore> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        let lru = state.per_fs.entry(fs).or_insert_with(LruCache::unbounded);
        if let Some(existing) = lru.get(node.name()) {
            return Arc::clone(existing);
        }
        let name = node.name().clone();
        lru.put(name.clone(), Arc::clone(&node));
        Self::enforce_bound(lru, self.capacity, &name, &mut state.stats);
        node
    }

    fn remove(&self, fs: FsId, name: &Name) -> Option<Arc<NodeCore>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = state.per_fs.get_mut(&fs).and_then(|lru| lru.pop(name));
        if state.per_fs.get(&fs).is_some_and(|lru| lru.is_empty()) {
            state.per_fs.remove(&fs);
        }
        removed
    }

    fn clear(&self, fs: FsId) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.per_fs.remove(&fs);
    }

    fn cached(&self, fs: FsId) -> Vec<Arc<NodeCore>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .per_fs
            .get(&fs)
            .map(|lru| lru.iter().map(|(_, node)| Arc::clone(node)).collect())
            .unwrap_or_default()
    }

    fn len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.per_fs.values().map(LruCache::len).sum()
    }
}

const WEAK_PURGE_INTERVAL: usize = 64;

/// Holds nodes only while some handle does. Dead entries are purged
/// periodically on insert.
#[derive(Default)]
pub struct WeakFilesCache {
    entries: DashMap<(FsId, Name), Weak<NodeCore>>,
    puts: AtomicUsize,
}

impl WeakFilesCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn purge(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            trace!("weak_cache: purged {} dead entries", purged);
        }
        purged
    }
}

impl FilesCache for WeakFilesCache {
    fn get(&self, fs: FsId, name: &Name) -> Option<Arc<NodeCore>> {
        let key = (fs, name.clone());
        let node = self.entries.get(&key).and_then(|w| w.upgrade());
        if node.is_none() {
            self.entries.remove_if(&key, |_, w| w.strong_count() == 0);
        }
        node
    }

    fn put_if_absent(&self, fs: FsId, node: Arc<NodeCore>) -> Arc<NodeCore> {
        if self.puts.fetch_add(1, Ordering::Relaxed) % WEAK_PURGE_INTERVAL == WEAK_PURGE_INTERVAL - 1
        {
            self.purge();
        }
        let key = (fs, node.name().clone());
        let mut entry = self.entries.entry(key).or_insert_with(Weak::new);
        if let Some(existing) = entry.upgrade() {
            return existing;
        }
        *entry = Arc::downgrade(&node);
        node
    }

    fn remove(&self, fs: FsId, name: &Name) -> Option<Arc<NodeCore>> {
        self.entries
            .remove(&(fs, name.clone()))
            .and_then(|(_, w)| w.upgrade())
    }

    fn clear(&self, fs: FsId) {
        self.entries.retain(|(id, _), _| *id != fs);
    }

    fn cached(&self, fs: FsId) -> Vec<Arc<NodeCore>> {
        self.entries
            .iter()
            .filter(|e| e.key().0 == fs)
            .filter_map(|e| e.value().upgrade())
            .collect()
    }

    fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.value().strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decorator::Decoration;

    fn node(uri: &str) -> Arc<NodeCore> {
        Arc::new(NodeCore::new(Name::parse(uri).unwrap(), Decoration::Plain))
    }

    fn name(uri: &str) -> Name {
        Name::parse(uri).unwrap()
    }

    #[test]
    fn test_default_put_if_absent_keeps_first() {
        let cache = DefaultFilesCache::new();
        let first = cache.put_if_absent(1, node("ram:///a"));
        let second = cache.put_if_absent(1, node("ram:///a"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_default_keys_include_filesystem() {
        let cache = DefaultFilesCache::new();
        cache.put_if_absent(1, node("ram:///a"));
        cache.put_if_absent(2, node("ram:///a"));
        assert_eq!(cache.len(), 2);
        cache.clear(1);
        assert!(cache.get(1, &name("ram:///a")).is_none());
        assert!(cache.get(2, &name("ram:///a")).is_some());
        assert_eq!(cache.cached(2).len(), 1);
    }

    #[test]
    fn test_default_remove() {
        let cache = DefaultFilesCache::new();
        cache.put_if_absent(1, node("ram:///a"));
        assert!(cache.remove(1, &name("ram:///a")).is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_evicts_least_recent_free_node() {
        let cache = LruFilesCache::new(2);
        cache.put_if_absent(1, node("ram:///a"));
        cache.put_if_absent(1, node("ram:///b"));
        assert!(cache.get(1, &name("ram:///a")).is_some());
        cache.put_if_absent(1, node("ram:///c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(1, &name("ram:///b")).is_none());
        assert!(cache.get(1, &name("ram:///a")).is_some());
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.size, 2);
    }

    #[test]
    fn test_lru_vetoes_attached_and_held_nodes() {
        let cache = LruFilesCache::new(1);
        let held = cache.put_if_absent(1, node("ram:///held"));
        let attached = cache.put_if_absent(1, node("ram:///attached"));
        attached.inject_type(crate::node::FileType::File);
        drop(attached);
        let open = cache.put_if_absent(1, node("ram:///open"));
        assert!(open.claim_writer());
        drop(open);
        cache.put_if_absent(1, node("ram:///free"));

        // nothing was evictable, so the cache grew
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.stats().evictions, 0);

        drop(held);
        cache.put_if_absent(1, node("ram:///next"));
        assert!(cache.get(1, &name("ram:///held")).is_none());
        assert!(cache.get(1, &name("ram:///attached")).is_some());
        assert!(cache.get(1, &name("ram:///open")).is_some());
    }

    #[test]
    fn test_lru_bound_is_per_filesystem() {
        let cache = LruFilesCache::new(1);
        cache.put_if_absent(1, node("ram:///a"));
        cache.put_if_absent(2, node("ram:///a"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_weak_entry_dies_with_last_handle() {
        let cache = WeakFilesCache::new();
        let a = cache.put_if_absent(1, node("ram:///a"));
        let again = cache.put_if_absent(1, node("ram:///a"));
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(cache.len(), 1);
        drop(a);
        drop(again);
        assert!(cache.get(1, &name("ram:///a")).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_weak_purge() {
        let cache = WeakFilesCache::new();
        for i in 0..10 {
            cache.put_if_absent(1, node(&format!("ram:///n{}", i)));
        }
        assert_eq!(cache.purge(), 10);
    }
}
