//! Per-name node state and the [`FileObject`] handle.
//!
//! A [`NodeCore`] is the cached, shareable state for one name in one
//! filesystem. It never points back at its parent or filesystem; handles carry
//! the filesystem and parents are looked up by name through it.
//!
//! Every public operation on a handle first runs the refresh-on-call guard and
//! then an internal `*_inner` routine, so internal calls never refresh twice.

use crate::capability::Capability;
use crate::content::{ContentWriter, FileContent};
use crate::decorator::Decoration;
use crate::error::{Result, VfsError};
use crate::events::{FileEvent, FileListener, ListenerId};
use crate::file_system::FileSystem;
use crate::name::{Name, NameScope};
use crate::selector::{FileSelectInfo, FileSelector, Selector};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileType {
    /// Does not exist (yet).
    Imaginary,
    File,
    Folder,
}

impl FileType {
    pub fn has_children(&self) -> bool {
        matches!(self, FileType::Folder)
    }

    pub fn has_content(&self) -> bool {
        matches!(self, FileType::File)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileType::Imaginary => "imaginary",
            FileType::File => "file",
            FileType::Folder => "folder",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Default)]
struct NodeState {
    attached: bool,
    file_type: Option<FileType>,
    children: Option<Vec<Name>>,
}

#[derive(Debug, Default)]
struct ContentState {
    readers: HashMap<ThreadId, usize>,
    writer_open: bool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cached state of one name. Shared by every handle to that name.
pub struct NodeCore {
    name: Name,
    state: Mutex<NodeState>,
    content: Mutex<ContentState>,
    decoration: Mutex<Decoration>,
    pinned: Mutex<Vec<Arc<dyn Any + Send + Sync>>>,
}

impl NodeCore {
    pub(crate) fn new(name: Name, decoration: Decoration) -> Self {
        NodeCore {
            name,
            state: Mutex::new(NodeState::default()),
            content: Mutex::new(ContentState::default()),
            decoration: Mutex::new(decoration),
            pinned: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.state).attached
    }

    pub fn is_content_open(&self) -> bool {
        let content = lock(&self.content);
        content.writer_open || !content.readers.is_empty()
    }

    pub(crate) fn decoration(&self) -> Decoration {
        *lock(&self.decoration)
    }

    pub(crate) fn set_decoration(&self, decoration: Decoration) {
        *lock(&self.decoration) = decoration;
    }

    /// Marks the node attached. Returns false if it already was.
    fn begin_attach(&self) -> bool {
        let mut state = lock(&self.state);
        if state.attached {
            return false;
        }
        state.attached = true;
        true
    }

    fn abort_attach(&self) {
        lock(&self.state).attached = false;
    }

    /// Drops cached type and children. Returns whether the node was attached.
    pub(crate) fn detach(&self) -> bool {
        let mut state = lock(&self.state);
        let was = state.attached;
        state.attached = false;
        state.file_type = None;
        state.children = None;
        was
    }

    fn cached_type(&self) -> Option<FileType> {
        lock(&self.state).file_type
    }

    fn cache_type(&self, file_type: FileType) {
        let mut state = lock(&self.state);
        if state.attached {
            state.file_type = Some(file_type);
        }
    }

    fn cached_children(&self) -> Option<Vec<Name>> {
        lock(&self.state).children.clone()
    }

    fn cache_children(&self, children: Vec<Name>) {
        let mut state = lock(&self.state);
        if state.attached {
            state.children = Some(children);
        }
    }

    pub(crate) fn clear_children(&self) {
        lock(&self.state).children = None;
    }

    /// Sets a known type without consulting the adapter.
    pub(crate) fn inject_type(&self, file_type: FileType) {
        let mut state = lock(&self.state);
        state.attached = true;
        state.file_type = Some(file_type);
        state.children = None;
    }

    /// Records a type change on an attached node. A detached node keeps
    /// nothing and asks the adapter once it is attached again.
    fn update_type(&self, file_type: FileType) {
        let mut state = lock(&self.state);
        if state.attached {
            state.file_type = Some(file_type);
        }
        state.children = None;
    }

    pub(crate) fn add_reader(&self, thread: ThreadId) {
        *lock(&self.content).readers.entry(thread).or_insert(0) += 1;
    }

    pub(crate) fn remove_reader(&self, thread: ThreadId) {
        let mut content = lock(&self.content);
        if let Some(count) = content.readers.get_mut(&thread) {
            *count -= 1;
            if *count == 0 {
                content.readers.remove(&thread);
            }
        }
    }

    pub(crate) fn claim_writer(&self) -> bool {
        let mut content = lock(&self.content);
        if content.writer_open {
            return false;
        }
        content.writer_open = true;
        true
    }

    pub(crate) fn release_writer(&self) {
        lock(&self.content).writer_open = false;
    }

    pub(crate) fn open_readers(&self, thread: ThreadId) -> usize {
        lock(&self.content).readers.get(&thread).copied().unwrap_or(0)
    }

    fn pin(&self, obj: Arc<dyn Any + Send + Sync>) {
        lock(&self.pinned).push(obj);
    }
}

impl fmt::Debug for NodeCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCore")
            .field("name", &self.name)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Handle to a node. Handles are cheap to clone; every live handle counts
/// towards its filesystem's use count.
pub struct FileObject {
    fs: Arc<FileSystem>,
    core: Arc<NodeCore>,
}

impl FileObject {
    pub(crate) fn new(fs: Arc<FileSystem>, core: Arc<NodeCore>) -> Self {
        fs.acquire();
        FileObject { fs, core }
    }

    pub fn name(&self) -> &Name {
        &self.core.name
    }

    pub fn uri(&self) -> &str {
        self.core.name.uri()
    }

    pub fn file_system(&self) -> &Arc<FileSystem> {
        &self.fs
    }

    pub fn is_attached(&self) -> bool {
        self.core.is_attached()
    }

    pub fn decoration(&self) -> Decoration {
        self.core.decoration()
    }

    /// Changes how every handle to this node behaves from now on.
    pub fn set_decoration(&self, decoration: Decoration) {
        self.core.set_decoration(decoration);
    }

    pub fn is_same_node(&self, other: &FileObject) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    pub(crate) fn core(&self) -> &Arc<NodeCore> {
        &self.core
    }

    /// Keeps `obj` alive for as long as this node stays cached.
    pub fn hold_object(&self, obj: Arc<dyn Any + Send + Sync>) {
        self.core.pin(obj);
    }

    /// Discards cached type and children. Open content streams stay open.
    pub fn refresh(&self) -> Result<()> {
        self.fs.detach_core(&self.core);
        Ok(())
    }

    pub(crate) fn on_call(&self) -> Result<()> {
        if self.core.decoration() == Decoration::RefreshOnCall {
            trace!("node: refresh-on-call {}", self.name());
            self.refresh()?;
        }
        Ok(())
    }

    pub(crate) fn attach(&self) -> Result<()> {
        if !self.core.begin_attach() {
            return Ok(());
        }
        if let Err(e) = self.fs.adapter().attach(self.name()) {
            self.core.abort_attach();
            return Err(e);
        }
        trace!("node: attached {}", self.name());
        Ok(())
    }

    pub fn get_type(&self) -> Result<FileType> {
        self.on_call()?;
        self.type_of()
    }

    pub(crate) fn type_of(&self) -> Result<FileType> {
        self.attach()?;
        if let Some(t) = self.core.cached_type() {
            return Ok(t);
        }
        self.fs.require(Capability::GetType, self.name())?;
        let t = match self.fs.adapter().get_type(self.name()) {
            Ok(t) => t,
            Err(e) if e.is_not_found() => FileType::Imaginary,
            Err(e) => return Err(e),
        };
        self.core.cache_type(t);
        Ok(t)
    }

    pub fn exists(&self) -> Result<bool> {
        Ok(self.get_type()? != FileType::Imaginary)
    }

    pub fn is_file(&self) -> Result<bool> {
        Ok(self.get_type()? == FileType::File)
    }

    pub fn is_folder(&self) -> Result<bool> {
        Ok(self.get_type()? == FileType::Folder)
    }

    pub fn get_parent(&self) -> Result<Option<FileObject>> {
        self.on_call()?;
        self.parent_inner()
    }

    fn parent_inner(&self) -> Result<Option<FileObject>> {
        match self.name().parent() {
            Some(parent) => Ok(Some(self.fs.resolve_file(&parent)?)),
            None => Ok(None),
        }
    }

    pub fn get_children(&self) -> Result<Vec<FileObject>> {
        self.on_call()?;
        self.children_inner()?
            .iter()
            .map(|child| self.fs.resolve_file(child))
            .collect()
    }

    pub fn get_child(&self, base_name: &str) -> Result<Option<FileObject>> {
        self.on_call()?;
        let children = self.children_inner()?;
        match children.iter().find(|c| c.base_name() == base_name) {
            Some(child) => Ok(Some(self.fs.resolve_file(child)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn children_inner(&self) -> Result<Vec<Name>> {
        let t = self.type_of()?;
        if !t.has_children() || !self.fs.has_capability(Capability::ListChildren) {
            return Err(VfsError::NotAFolder {
                name: self.name().clone(),
            });
        }
        if let Some(children) = self.core.cached_children() {
            trace!("node: cached children of {}", self.name());
            return Ok(children);
        }

        let adapter = self.fs.adapter();
        let children = match adapter.list_children_resolved(self.name())? {
            Some(entries) => {
                let mut names = Vec::with_capacity(entries.len());
                for entry in entries {
                    let child = self.name().child(&entry.name)?;
                    self.fs.prime_type(&child, entry.file_type)?;
                    names.push(child);
                }
                names
            }
            None => adapter
                .list_children(self.name())?
                .iter()
                .map(|base| self.name().child(base))
                .collect::<Result<Vec<_>>>()?,
        };
        debug!("node: listed {} children of {}", children.len(), self.name());
        self.core.cache_children(children.clone());
        Ok(children)
    }

    pub fn resolve_file(&self, rel: &str, scope: NameScope) -> Result<FileObject> {
        self.on_call()?;
        self.resolve_inner(rel, scope)
    }

    fn resolve_inner(&self, rel: &str, scope: NameScope) -> Result<FileObject> {
        let name = self.name().resolve(rel, scope)?;
        self.fs.resolve_file(&name)
    }

    /// Creates this folder and any missing ancestors. A no-op on an existing
    /// folder.
    pub fn create_folder(&self) -> Result<()> {
        self.on_call()?;
        self.create_folder_inner()
    }

    pub(crate) fn create_folder_inner(&self) -> Result<()> {
        match self.type_of()? {
            FileType::Folder => return Ok(()),
            FileType::File => {
                return Err(VfsError::TypeMismatch {
                    name: self.name().clone(),
                    expected: FileType::Folder,
                    actual: FileType::File,
                })
            }
            FileType::Imaginary => {}
        }
        self.fs.require(Capability::Create, self.name())?;
        self.create_parent()?;
        self.fs.adapter().create_folder(self.name())?;
        self.handle_create(FileType::Folder);
        Ok(())
    }

    pub(crate) fn create_parent(&self) -> Result<()> {
        if let Some(parent) = self.parent_inner()? {
            parent.create_folder_inner()?;
        }
        Ok(())
    }

    /// Creates an empty file, along with any missing ancestors. A no-op on an
    /// existing file.
    pub fn create_file(&self) -> Result<()> {
        self.on_call()?;
        match self.type_of()? {
            FileType::File => Ok(()),
            FileType::Folder => Err(VfsError::TypeMismatch {
                name: self.name().clone(),
                expected: FileType::File,
                actual: FileType::Folder,
            }),
            FileType::Imaginary => self.writer_inner(false)?.close(),
        }
    }

    /// Deletes this node if it is a file or an empty folder. Returns whether
    /// anything was deleted.
    pub fn delete(&self) -> Result<bool> {
        Ok(self.delete_selected(&Selector::SelectSelf)? > 0)
    }

    pub fn delete_all(&self) -> Result<usize> {
        self.delete_selected(&Selector::SelectAll)
    }

    /// Deletes the selected nodes children-first. A folder that still has
    /// children once its selected descendants are gone is left in place.
    pub fn delete_selected(&self, selector: &dyn FileSelector) -> Result<usize> {
        self.on_call()?;
        self.delete_selected_inner(selector)
    }

    fn delete_selected_inner(&self, selector: &dyn FileSelector) -> Result<usize> {
        let mut deleted = 0;
        for file in self.find_inner(selector, true)? {
            let t = file.type_of()?;
            if t.has_children() && !file.children_inner()?.is_empty() {
                continue;
            }
            if file.delete_self()? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn delete_self(&self) -> Result<bool> {
        if self.type_of()? == FileType::Imaginary {
            return Ok(false);
        }
        self.fs.require(Capability::Delete, self.name())?;
        self.fs.adapter().delete(self.name())?;
        self.handle_delete();
        Ok(true)
    }

    /// Nodes below (and possibly including) this one chosen by `selector`.
    ///
    /// With `depthwise` set, descendants come before their ancestors;
    /// otherwise each node precedes its descendants.
    pub fn find_files(&self, selector: &dyn FileSelector, depthwise: bool) -> Result<Vec<FileObject>> {
        self.on_call()?;
        self.find_inner(selector, depthwise)
    }

    fn find_inner(&self, selector: &dyn FileSelector, depthwise: bool) -> Result<Vec<FileObject>> {
        let mut selected = Vec::new();
        if self.type_of()? != FileType::Imaginary {
            self.traverse(self, selector, depthwise, 0, &mut selected)?;
        }
        Ok(selected)
    }

    fn traverse(
        &self,
        base: &FileObject,
        selector: &dyn FileSelector,
        depthwise: bool,
        depth: usize,
        selected: &mut Vec<FileObject>,
    ) -> Result<()> {
        let info = FileSelectInfo {
            base,
            file: self,
            depth,
        };
        let index = selected.len();

        if self.type_of()?.has_children() && selector.traverse_descendents(&info)? {
            for child in self.children_inner()? {
                let child = self.fs.resolve_file(&child)?;
                child.traverse(base, selector, depthwise, depth + 1, selected)?;
            }
        }

        if selector.include_file(&info)? {
            if depthwise {
                selected.push(self.clone());
            } else {
                selected.insert(index, self.clone());
            }
        }
        Ok(())
    }

    /// Copies the nodes `selector` picks below `source` onto the same relative
    /// paths below this node. A failure stops the copy; whatever was already
    /// copied stays.
    pub fn copy_from(&self, source: &FileObject, selector: &dyn FileSelector) -> Result<()> {
        self.on_call()?;
        self.copy_from_inner(source, selector)
    }

    fn copy_from_inner(&self, source: &FileObject, selector: &dyn FileSelector) -> Result<()> {
        if source.type_of()? == FileType::Imaginary {
            return Err(VfsError::NotFound {
                name: source.name().clone(),
            });
        }
        for src in source.find_inner(selector, false)? {
            let rel = source.name().relative_name(src.name())?;
            let dst = self.resolve_inner(&rel, NameScope::DescendentOrSelf)?;
            let src_type = src.type_of()?;
            let dst_type = dst.type_of()?;
            if dst_type != FileType::Imaginary && dst_type != src_type {
                dst.delete_selected_inner(&Selector::SelectAll)?;
            }
            match src_type {
                FileType::File => copy_content(&src, &dst)?,
                FileType::Folder => dst.create_folder_inner()?,
                FileType::Imaginary => {}
            }
        }
        Ok(())
    }

    /// Whether [`move_to`](Self::move_to) can use a native rename.
    pub fn can_rename_to(&self, dest: &FileObject) -> bool {
        Arc::ptr_eq(&self.fs, &dest.fs) && self.fs.has_capability(Capability::Rename)
    }

    /// Moves this node (and its subtree) to `dest`, replacing whatever is
    /// there. Within one filesystem this is a rename; across filesystems it
    /// is a copy followed by a delete.
    pub fn move_to(&self, dest: &FileObject) -> Result<()> {
        self.on_call()?;
        if self.is_same_node(dest) {
            return Ok(());
        }
        if self.name().is_ancestor_of(dest.name()) {
            return Err(VfsError::name_resolution(
                dest.uri(),
                format!("cannot move {} into its own subtree", self.name()),
            ));
        }
        let src_type = self.type_of()?;
        if src_type == FileType::Imaginary {
            return Err(VfsError::NotFound {
                name: self.name().clone(),
            });
        }
        if dest.type_of()? != FileType::Imaginary {
            dest.delete_selected_inner(&Selector::SelectAll)?;
        }

        if self.can_rename_to(dest) {
            dest.create_parent()?;
            self.fs.adapter().rename(self.name(), dest.name())?;
            debug!("node: renamed {} to {}", self.name(), dest.name());
            self.fs.detach_descendants(dest.name());
            dest.handle_create(src_type);
            self.fs.detach_descendants(self.name());
            self.handle_delete();
        } else {
            dest.copy_from_inner(self, &Selector::SelectAll)?;
            self.delete_selected_inner(&Selector::SelectAll)?;
        }
        Ok(())
    }

    pub fn content(&self) -> FileContent {
        FileContent::new(self.clone())
    }

    pub fn is_content_open(&self) -> bool {
        self.core.is_content_open()
    }

    pub(crate) fn writer_inner(&self, append: bool) -> Result<ContentWriter> {
        FileContent::new(self.clone()).writer_inner(append)
    }

    pub fn add_listener(&self, listener: Arc<dyn FileListener>) -> ListenerId {
        self.fs.add_listener(self.name().clone(), listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.fs.remove_listener(self.name(), id)
    }

    pub(crate) fn handle_create(&self, file_type: FileType) {
        self.core.update_type(file_type);
        self.fs.notify_children_changed(self.name());
        self.fs.fire(FileEvent::Created(self.name().clone()));
    }

    pub(crate) fn handle_delete(&self) {
        self.core.update_type(FileType::Imaginary);
        self.fs.notify_children_changed(self.name());
        self.fs.fire(FileEvent::Deleted(self.name().clone()));
    }

    pub(crate) fn handle_content_written(&self) {
        if self.core.cached_type() == Some(FileType::File) {
            self.fs.fire(FileEvent::Changed(self.name().clone()));
        } else {
            self.handle_create(FileType::File);
        }
    }

    pub(crate) fn handle_changed(&self) {
        self.fs.fire(FileEvent::Changed(self.name().clone()));
    }
}

fn copy_content(src: &FileObject, dst: &FileObject) -> Result<()> {
    let src_content = src.content();
    let dst_content = dst.content();
    let mut reader = src_content.reader()?;
    let mut writer = dst_content.writer(false)?;
    io::copy(&mut reader, &mut writer).map_err(|e| VfsError::provider("copy", dst.name(), e))?;
    writer.close()?;
    reader.close();

    if src.fs.has_capability(Capability::GetLastModified)
        && dst.fs.has_capability(Capability::SetLastModifiedFile)
    {
        dst_content.set_last_modified(src_content.last_modified()?)?;
    }
    Ok(())
}

impl Clone for FileObject {
    fn clone(&self) -> Self {
        FileObject::new(Arc::clone(&self.fs), Arc::clone(&self.core))
    }
}

impl Drop for FileObject {
    fn drop(&mut self) {
        self.fs.release();
    }
}

impl PartialEq for FileObject {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.fs, &other.fs) && self.name() == other.name()
    }
}

impl Eq for FileObject {}

impl fmt::Debug for FileObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileObject")
            .field("name", self.name())
            .field("fs", &self.fs.id())
            .finish()
    }
}

impl fmt::Display for FileObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name().friendly_uri())
    }
}
