use crate::capability::Capability;
use crate::name::Name;
use crate::node::FileType;
use thiserror::Error;

/// Symbolic kind of a [`VfsError`], stable across variants that carry
/// different payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NameResolution,
    MismatchedFileSystem,
    CapabilityUnsupported,
    NotAFolder,
    NotFound,
    Provider,
    Configuration,
    NestedJunction,
    ContentInUse,
    TypeMismatch,
    Closed,
    Io,
}

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("Invalid name {name:?}: {reason}")]
    NameResolution { name: String, reason: String },

    #[error("{name} does not belong to the filesystem rooted at {root}")]
    MismatchedFileSystem { name: Name, root: Name },

    #[error("Capability {capability} is not supported by the filesystem of {name}")]
    CapabilityUnsupported { capability: Capability, name: Name },

    #[error("Not a folder: {name}")]
    NotAFolder { name: Name },

    #[error("Not found: {name}")]
    NotFound { name: Name },

    #[error("Provider failed to {op} {name}: {source}")]
    Provider {
        op: &'static str,
        name: Name,
        #[source]
        source: anyhow::Error,
    },

    #[error("Configuration error: {msg}")]
    Configuration { msg: String },

    #[error("Junction {name} nests with existing junction {existing}")]
    NestedJunction { name: Name, existing: Name },

    #[error("Content of {name} is already open for writing")]
    ContentInUse { name: Name },

    #[error("{name} is a {actual}, expected a {expected}")]
    TypeMismatch {
        name: Name,
        expected: FileType,
        actual: FileType,
    },

    #[error("Filesystem {root} is closed")]
    Closed { root: Name },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VfsError>;

impl VfsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VfsError::NameResolution { .. } => ErrorKind::NameResolution,
            VfsError::MismatchedFileSystem { .. } => ErrorKind::MismatchedFileSystem,
            VfsError::CapabilityUnsupported { .. } => ErrorKind::CapabilityUnsupported,
            VfsError::NotAFolder { .. } => ErrorKind::NotAFolder,
            VfsError::NotFound { .. } => ErrorKind::NotFound,
            VfsError::Provider { .. } => ErrorKind::Provider,
            VfsError::Configuration { .. } => ErrorKind::Configuration,
            VfsError::NestedJunction { .. } => ErrorKind::NestedJunction,
            VfsError::ContentInUse { .. } => ErrorKind::ContentInUse,
            VfsError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            VfsError::Closed { .. } => ErrorKind::Closed,
            VfsError::Io(_) => ErrorKind::Io,
        }
    }

    /// The names this error is about, outermost first.
    pub fn names(&self) -> Vec<&Name> {
        match self {
            VfsError::MismatchedFileSystem { name, root } => vec![name, root],
            VfsError::NestedJunction { name, existing } => vec![name, existing],
            VfsError::CapabilityUnsupported { name, .. }
            | VfsError::NotAFolder { name }
            | VfsError::NotFound { name }
            | VfsError::Provider { name, .. }
            | VfsError::ContentInUse { name }
            | VfsError::TypeMismatch { name, .. } => vec![name],
            VfsError::Closed { root } => vec![root],
            VfsError::NameResolution { .. } | VfsError::Configuration { .. } | VfsError::Io(_) => {
                Vec::new()
            }
        }
    }

    pub fn provider(op: &'static str, name: &Name, source: impl Into<anyhow::Error>) -> Self {
        VfsError::Provider {
            op,
            name: name.clone(),
            source: source.into(),
        }
    }

    pub fn name_resolution(name: impl Into<String>, reason: impl Into<String>) -> Self {
        VfsError::NameResolution {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        VfsError::Configuration { msg: msg.into() }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            VfsError::NotFound { .. } => true,
            VfsError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(uri: &str) -> Name {
        Name::parse(uri).unwrap()
    }

    #[test]
    fn test_not_found_kind() {
        let err = VfsError::NotFound {
            name: name("ram:///a"),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.is_not_found());
    }

    #[test]
    fn test_io_not_found_is_not_found() {
        let err = VfsError::from(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.is_not_found());
    }

    #[test]
    fn test_mismatched_carries_both_names() {
        let err = VfsError::MismatchedFileSystem {
            name: name("ram:///a"),
            root: name("file:///"),
        };
        let names = err.names();
        assert_eq!(names.len(), 2);
        assert_eq!(names[0].uri(), "ram:///a");
        assert_eq!(names[1].uri(), "file:///");
    }

    #[test]
    fn test_provider_wraps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = VfsError::provider("delete", &name("ram:///x"), io);
        assert_eq!(err.kind(), ErrorKind::Provider);
        assert!(err.to_string().contains("disk on fire"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_capability_message_names_capability() {
        let err = VfsError::CapabilityUnsupported {
            capability: Capability::Rename,
            name: name("ram:///x"),
        };
        assert_eq!(err.kind(), ErrorKind::CapabilityUnsupported);
        assert!(err.to_string().contains("rename"));
    }

    #[test]
    fn test_display_messages_non_empty() {
        let errors = [
            VfsError::name_resolution("a/../..", "escapes root"),
            VfsError::NotAFolder {
                name: name("ram:///f"),
            },
            VfsError::configuration("bad strategy"),
            VfsError::ContentInUse {
                name: name("ram:///f"),
            },
            VfsError::TypeMismatch {
                name: name("ram:///f"),
                expected: FileType::Folder,
                actual: FileType::File,
            },
            VfsError::Closed {
                root: name("ram:///"),
            },
        ];
        for err in errors {
            assert!(!err.to_string().is_empty(), "Error display should be non-empty");
        }
    }
}
