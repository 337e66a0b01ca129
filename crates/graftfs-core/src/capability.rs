use crate::options::FileSystemOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, warn};

/// A feature flag gating which operations a filesystem supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    ReadContent,
    WriteContent,
    AppendContent,
    Create,
    Delete,
    Rename,
    GetType,
    ListChildren,
    GetLastModified,
    SetLastModifiedFile,
    SetLastModifiedFolder,
    RandomAccessRead,
    RandomAccessWrite,
    Uri,
    Attributes,
    Junctions,
}

impl Capability {
    pub const ALL: [Capability; 16] = [
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
        Capability::RandomAccessRead,
        Capability::RandomAccessWrite,
        Capability::Uri,
        Capability::Attributes,
        Capability::Junctions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ReadContent => "read-content",
            Capability::WriteContent => "write-content",
            Capability::AppendContent => "append-content",
            Capability::Create => "create",
            Capability::Delete => "delete",
            Capability::Rename => "rename",
            Capability::GetType => "get-type",
            Capability::ListChildren => "list-children",
            Capability::GetLastModified => "get-last-modified",
            Capability::SetLastModifiedFile => "set-last-modified-file",
            Capability::SetLastModifiedFolder => "set-last-modified-folder",
            Capability::RandomAccessRead => "random-access-read",
            Capability::RandomAccessWrite => "random-access-write",
            Capability::Uri => "uri",
            Capability::Attributes => "attributes",
            Capability::Junctions => "junctions",
        }
    }

    /// Capabilities that mutate the backing store.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Capability::WriteContent
                | Capability::AppendContent
                | Capability::Create
                | Capability::Delete
                | Capability::Rename
                | Capability::SetLastModifiedFile
                | Capability::SetLastModifiedFolder
                | Capability::RandomAccessWrite
        )
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    caps: BTreeSet<Capability>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Capability::ALL.iter().copied().collect()
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.caps.contains(&cap)
    }

    pub fn insert(&mut self, cap: Capability) -> bool {
        self.caps.insert(cap)
    }

    pub fn remove(&mut self, cap: Capability) -> bool {
        self.caps.remove(&cap)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.caps.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.caps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    /// Fixes the effective capability set of a filesystem from what its
    /// adapter declares and the options it was opened with. A `read_only`
    /// filesystem loses every mutating capability.
    pub fn negotiate(declared: &CapabilitySet, options: &FileSystemOptions) -> CapabilitySet {
        let read_only = options
            .get_bool(FileSystemOptions::READ_ONLY)
            .unwrap_or_else(|e| {
                warn!("capability: ignoring bad read_only option: {}", e);
                None
            })
            .unwrap_or(false);

        let negotiated: CapabilitySet = declared
            .iter()
            .filter(|cap| !(read_only && cap.is_write()))
            .collect();

        debug!(
            "capability: negotiated {} of {} declared (read_only={})",
            negotiated.len(),
            declared.len(),
            read_only
        );
        negotiated
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        CapabilitySet {
            caps: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a CapabilitySet {
    type Item = &'a Capability;
    type IntoIter = std::collections::btree_set::Iter<'a, Capability>;

    fn into_iter(self) -> Self::IntoIter {
        self.caps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_kebab_case() {
        assert_eq!(Capability::ListChildren.to_string(), "list-children");
        assert_eq!(Capability::Rename.to_string(), "rename");
    }

    #[test]
    fn test_serde_matches_display() {
        for cap in Capability::ALL {
            let json = serde_json::to_string(&cap).unwrap();
            assert_eq!(json, format!("\"{}\"", cap));
            let back: Capability = serde_json::from_str(&json).unwrap();
            assert_eq!(back, cap);
        }
    }

    #[test]
    fn test_set_from_iter() {
        let set: CapabilitySet = [Capability::GetType, Capability::GetType, Capability::Delete]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(Capability::Delete));
        assert!(!set.contains(Capability::Rename));
    }

    #[test]
    fn test_negotiate_keeps_declared() {
        let declared = CapabilitySet::all();
        let negotiated = CapabilitySet::negotiate(&declared, &FileSystemOptions::default());
        assert_eq!(negotiated, declared);
    }

    #[test]
    fn test_negotiate_read_only_strips_writes() {
        let declared = CapabilitySet::all();
        let opts = FileSystemOptions::default().with(FileSystemOptions::READ_ONLY, "true");
        let negotiated = CapabilitySet::negotiate(&declared, &opts);
        assert!(negotiated.contains(Capability::ReadContent));
        assert!(negotiated.contains(Capability::ListChildren));
        assert!(!negotiated.contains(Capability::WriteContent));
        assert!(!negotiated.contains(Capability::Delete));
        assert!(!negotiated.contains(Capability::Rename));
    }

    #[test]
    fn test_negotiate_bad_read_only_is_ignored() {
        let declared: CapabilitySet = [Capability::Delete].into_iter().collect();
        let opts = FileSystemOptions::default().with(FileSystemOptions::READ_ONLY, "maybe");
        let negotiated = CapabilitySet::negotiate(&declared, &opts);
        assert!(negotiated.contains(Capability::Delete));
    }
}
