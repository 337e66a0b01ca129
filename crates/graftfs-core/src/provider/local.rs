//! Local disk backing store over `std::fs`.

use crate::adapter::{Adapter, Attributes, ChildEntry, Provider};
use crate::capability::{Capability, CapabilitySet};
use crate::error::{Result, VfsError};
use crate::name::Name;
use crate::node::FileType;
use crate::options::FileSystemOptions;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// Serves the `file` scheme and bare absolute local paths.
#[derive(Debug, Default)]
pub struct LocalProvider;

impl LocalProvider {
    pub fn new() -> Self {
        LocalProvider
    }
}

impl Provider for LocalProvider {
    fn create_file_system(
        &self,
        root: &Name,
        _options: &FileSystemOptions,
    ) -> Result<Arc<dyn Adapter>> {
        debug!("local: opening {}", root);
        Ok(Arc::new(LocalAdapter::new()))
    }
}

#[derive(Debug, Default)]
pub struct LocalAdapter;

impl LocalAdapter {
    pub fn new() -> Self {
        LocalAdapter
    }

    /// Maps a name to a disk path. `/C:/x` becomes `C:/x`.
    fn path_of(name: &Name) -> PathBuf {
        let path = name.path();
        let bytes = path.as_bytes();
        let drive = bytes.len() >= 3
            && bytes[1].is_ascii_alphabetic()
            && bytes[2] == b':'
            && (bytes.len() == 3 || bytes[3] == b'/');
        if drive {
            PathBuf::from(&path[1..])
        } else {
            PathBuf::from(path)
        }
    }

    fn map_err(op: &'static str, name: &Name, err: io::Error) -> VfsError {
        if err.kind() == io::ErrorKind::NotFound {
            VfsError::NotFound { name: name.clone() }
        } else {
            VfsError::provider(op, name, err)
        }
    }

    fn type_of_path(path: &PathBuf) -> FileType {
        // fs::metadata follows links; a dangling or self-referential link fails
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => FileType::Folder,
            Ok(_) => FileType::File,
            Err(_) => FileType::Imaginary,
        }
    }
}

impl Adapter for LocalAdapter {
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
            Capability::Uri,
            Capability::Attributes,
        ]
        .into_iter()
        .collect()
    }

    fn get_type(&self, name: &Name) -> Result<FileType> {
        Ok(Self::type_of_path(&Self::path_of(name)))
    }

    fn list_children(&self, name: &Name) -> Result<Vec<String>> {
        let dir = fs::read_dir(Self::path_of(name)).map_err(|e| Self::map_err("list", name, e))?;
        let mut names = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| Self::map_err("list", name, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn list_children_resolved(&self, name: &Name) -> Result<Option<Vec<ChildEntry>>> {
        let dir = fs::read_dir(Self::path_of(name)).map_err(|e| Self::map_err("list", name, e))?;
        let mut children = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| Self::map_err("list", name, e))?;
            children.push(ChildEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                file_type: Self::type_of_path(&entry.path()),
            });
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Some(children))
    }

    fn read(&self, name: &Name) -> Result<Box<dyn Read + Send>> {
        let file = File::open(Self::path_of(name)).map_err(|e| Self::map_err("read", name, e))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn write(&self, name: &Name, append: bool) -> Result<Box<dyn Write + Send>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(Self::path_of(name))
            .map_err(|e| Self::map_err("write", name, e))?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn delete(&self, name: &Name) -> Result<()> {
        let path = Self::path_of(name);
        let result = if path.is_dir() {
            fs::remove_dir(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|e| Self::map_err("delete", name, e))
    }

    fn rename(&self, from: &Name, to: &Name) -> Result<()> {
        fs::rename(Self::path_of(from), Self::path_of(to))
            .map_err(|e| Self::map_err("rename", from, e))
    }

    fn create_folder(&self, name: &Name) -> Result<()> {
        fs::create_dir(Self::path_of(name)).map_err(|e| Self::map_err("create", name, e))
    }

    fn content_size(&self, name: &Name) -> Result<u64> {
        fs::metadata(Self::path_of(name))
            .map(|m| m.len())
            .map_err(|e| Self::map_err("stat", name, e))
    }

    fn last_modified(&self, name: &Name) -> Result<SystemTime> {
        fs::metadata(Self::path_of(name))
            .and_then(|m| m.modified())
            .map_err(|e| Self::map_err("stat", name, e))
    }

    fn set_last_modified(&self, name: &Name, time: SystemTime) -> Result<()> {
        OpenOptions::new()
            .write(true)
            .open(Self::path_of(name))
            .and_then(|f| f.set_modified(time))
            .map_err(|e| Self::map_err("touch", name, e))
    }

    fn attributes(&self, name: &Name) -> Result<Attributes> {
        let meta = fs::metadata(Self::path_of(name)).map_err(|e| Self::map_err("stat", name, e))?;
        let mut attrs = Attributes::new();
        attrs.insert("size".into(), serde_json::json!(meta.len()));
        attrs.insert("readonly".into(), serde_json::json!(meta.permissions().readonly()));
        Ok(attrs)
    }
}
