//! Consistency policies applied to nodes as they enter the cache.

use crate::config::CacheStrategy;
use crate::error::Result;
use crate::node::FileObject;

/// How handles to a node behave on each call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Decoration {
    #[default]
    Plain,
    /// Refresh the node before every operation.
    RefreshOnCall,
}

impl Decoration {
    pub fn for_strategy(strategy: CacheStrategy) -> Self {
        match strategy {
            CacheStrategy::OnCall => Decoration::RefreshOnCall,
            CacheStrategy::Manual | CacheStrategy::OnResolve => Decoration::Plain,
        }
    }
}

/// Hook run once for every node the filesystem creates, before it is handed
/// out. It may change the node's [`Decoration`], pin objects on it, or return
/// the handle unchanged.
pub trait FileDecorator: Send + Sync {
    fn decorate(&self, file: FileObject) -> Result<FileObject>;
}
