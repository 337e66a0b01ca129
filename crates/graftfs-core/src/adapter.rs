//! The hook contract a backing store implements.
//!
//! The core checks the filesystem's capability set before any hook runs, so an
//! adapter only overrides the hooks for the capabilities it declares. The
//! defaults report the capability as unsupported.

use crate::capability::{Capability, CapabilitySet};
use crate::error::{Result, VfsError};
use crate::name::Name;
use crate::node::FileType;
use crate::options::FileSystemOptions;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::SystemTime;

pub type Attributes = BTreeMap<String, serde_json::Value>;

/// A child listing entry that already knows its type, saving one type lookup
/// per child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub name: String,
    pub file_type: FileType,
}

fn unsupported<T>(capability: Capability, name: &Name) -> Result<T> {
    Err(VfsError::CapabilityUnsupported {
        capability,
        name: name.clone(),
    })
}

pub trait Adapter: Send + Sync {
    /// Declared once; the filesystem negotiates its effective set from this.
    fn capabilities(&self) -> CapabilitySet;

    /// Type of the resource behind `name`. Missing resources are reported as
    /// [`FileType::Imaginary`] or a not-found error.
    fn get_type(&self, name: &Name) -> Result<FileType>;

    fn attach(&self, _name: &Name) -> Result<()> {
        Ok(())
    }

    fn detach(&self, _name: &Name) -> Result<()> {
        Ok(())
    }

    /// Base names of the children of a folder.
    fn list_children(&self, name: &Name) -> Result<Vec<String>> {
        unsupported(Capability::ListChildren, name)
    }

    /// Children with their types, when the backing store gets them for free.
    fn list_children_resolved(&self, _name: &Name) -> Result<Option<Vec<ChildEntry>>> {
        Ok(None)
    }

    fn read(&self, name: &Name) -> Result<Box<dyn Read + Send>> {
        unsupported(Capability::ReadContent, name)
    }

    fn write(&self, name: &Name, append: bool) -> Result<Box<dyn Write + Send>> {
        let cap = if append {
            Capability::AppendContent
        } else {
            Capability::WriteContent
        };
        unsupported(cap, name)
    }

    fn delete(&self, name: &Name) -> Result<()> {
        unsupported(Capability::Delete, name)
    }

    fn rename(&self, from: &Name, _to: &Name) -> Result<()> {
        unsupported(Capability::Rename, from)
    }

    fn create_folder(&self, name: &Name) -> Result<()> {
        unsupported(Capability::Create, name)
    }

    fn content_size(&self, name: &Name) -> Result<u64> {
        unsupported(Capability::ReadContent, name)
    }

    fn last_modified(&self, name: &Name) -> Result<SystemTime> {
        unsupported(Capability::GetLastModified, name)
    }

    fn set_last_modified(&self, name: &Name, _time: SystemTime) -> Result<()> {
        unsupported(Capability::SetLastModifiedFile, name)
    }

    fn attributes(&self, _name: &Name) -> Result<Attributes> {
        Ok(Attributes::new())
    }

    /// Releases the backing-store connection.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Creates adapters for the roots of one URI scheme.
pub trait Provider: Send + Sync {
    fn parse_uri(&self, uri: &str) -> Result<Name> {
        Name::parse(uri)
    }

    fn create_file_system(
        &self,
        root: &Name,
        options: &FileSystemOptions,
    ) -> Result<Arc<dyn Adapter>>;
}
