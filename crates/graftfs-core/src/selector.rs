//! Selectors drive traversal: for each visited node they decide whether to
//! include it and whether to descend into its children.

use crate::error::Result;
use crate::node::{FileObject, FileType};

/// The node being considered, and where it sits relative to the traversal
/// root.
pub struct FileSelectInfo<'a> {
    pub base: &'a FileObject,
    pub file: &'a FileObject,
    /// 0 for the traversal root.
    pub depth: usize,
}

pub trait FileSelector {
    fn include_file(&self, info: &FileSelectInfo<'_>) -> Result<bool>;
    fn traverse_descendents(&self, info: &FileSelectInfo<'_>) -> Result<bool>;
}

/// Selects nodes whose depth lies in `min..=max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthSelector {
    pub min: usize,
    pub max: usize,
}

impl DepthSelector {
    pub fn new(min: usize, max: usize) -> Self {
        DepthSelector { min, max }
    }
}

impl FileSelector for DepthSelector {
    fn include_file(&self, info: &FileSelectInfo<'_>) -> Result<bool> {
        Ok(info.depth >= self.min && info.depth <= self.max)
    }

    fn traverse_descendents(&self, info: &FileSelectInfo<'_>) -> Result<bool> {
        Ok(info.depth < self.max)
    }
}

/// Selects every node of one type, at any depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeSelector(pub FileType);

impl FileSelector for TypeSelector {
    fn include_file(&self, info: &FileSelectInfo<'_>) -> Result<bool> {
        Ok(info.file.get_type()? == self.0)
    }

    fn traverse_descendents(&self, _info: &FileSelectInfo<'_>) -> Result<bool> {
        Ok(true)
    }
}

/// The stock selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    SelectAll,
    SelectSelf,
    SelectSelfAndChildren,
    SelectChildren,
    ExcludeSelf,
    SelectFiles,
    SelectFolders,
}

impl Selector {
    fn delegate(&self) -> Box<dyn FileSelector> {
        match self {
            Selector::SelectAll => Box::new(DepthSelector::new(0, usize::MAX)),
            Selector::SelectSelf => Box::new(DepthSelector::new(0, 0)),
            Selector::SelectSelfAndChildren => Box::new(DepthSelector::new(0, 1)),
            Selector::SelectChildren => Box::new(DepthSelector::new(1, 1)),
            Selector::ExcludeSelf => Box::new(DepthSelector::new(1, usize::MAX)),
            Selector::SelectFiles => Box::new(TypeSelector(FileType::File)),
            Selector::SelectFolders => Box::new(TypeSelector(FileType::Folder)),
        }
    }
}

impl FileSelector for Selector {
    fn include_file(&self, info: &FileSelectInfo<'_>) -> Result<bool> {
        self.delegate().include_file(info)
    }

    fn traverse_descendents(&self, info: &FileSelectInfo<'_>) -> Result<bool> {
        self.delegate().traverse_descendents(info)
    }
}
