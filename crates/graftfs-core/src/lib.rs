//! GraftFS core: the resolution and caching engine of the virtual filesystem.
//!
//! Callers hand a URI to the [`FileSystemManager`], which routes it to a
//! [`Provider`] by scheme, creates (or reuses) the [`FileSystem`] for the
//! name's root, and returns a cached [`FileObject`] for the name. Junctions
//! graft nodes from any filesystem into a [`VirtualFileSystem`].

pub mod adapter;
pub mod cache;
pub mod capability;
pub mod config;
pub mod content;
pub mod decorator;
pub mod error;
pub mod events;
pub mod file_system;
pub mod junction;
pub mod manager;
pub mod name;
pub mod node;
pub mod options;
pub mod provider;
pub mod selector;

pub use adapter::{Adapter, Attributes, ChildEntry, Provider};
pub use cache::{FilesCache, FsId};
pub use capability::{Capability, CapabilitySet};
pub use config::{CacheStrategy, FilesCacheKind, ManagerConfig};
pub use content::{ContentReader, ContentWriter, FileContent};
pub use decorator::{Decoration, FileDecorator};
pub use error::{ErrorKind, Result, VfsError};
pub use events::{FileEvent, FileListener, ListenerId};
pub use file_system::FileSystem;
pub use junction::VirtualFileSystem;
pub use manager::FileSystemManager;
pub use name::{Name, NameScope};
pub use node::{FileObject, FileType};
pub use options::FileSystemOptions;
pub use selector::{DepthSelector, FileSelectInfo, FileSelector, Selector, TypeSelector};
