//! Workspace access
//!
//! Filesystem abstraction, workspace folders and open editor buffers. The
//! explorer never touches `std::fs` directly so hosts and tests can swap in
//! their own storage.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{ExplorerError, Result};

/// Scheme used for documents backed by the local filesystem
pub const FILE_SCHEME: &str = "file";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    SymbolicLink,
    Unknown,
}

/// Minimal filesystem surface used by discovery and runs
pub trait FileSystem: Send + Sync {
    /// List a directory as `(name, type)` pairs
    fn read_directory(&self, path: &Path) -> Result<Vec<(String, FileType)>>;

    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()>;
}

/// The local disk
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn read_directory(&self, path: &Path) -> Result<Vec<(String, FileType)>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).map_err(|e| ExplorerError::io(path, e))? {
            let entry = entry.map_err(|e| ExplorerError::io(path, e))?;
            let file_type = match entry.file_type() {
                Ok(t) if t.is_symlink() => FileType::SymbolicLink,
                Ok(t) if t.is_dir() => FileType::Directory,
                Ok(t) if t.is_file() => FileType::File,
                _ => FileType::Unknown,
            };
            entries.push((entry.file_name().to_string_lossy().to_string(), file_type));
        }

        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| ExplorerError::io(path, e))
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        fs::write(path, contents).map_err(|e| ExplorerError::io(path, e))
    }
}

/// In-memory filesystem, cheap to clone and share with a host
///
/// Directories are implied by the files they contain.
#[derive(Debug, Default, Clone)]
pub struct MemoryFileSystem {
    files: Arc<RwLock<BTreeMap<PathBuf, Vec<u8>>>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        if let Ok(mut files) = self.files.write() {
            files.insert(path.into(), contents.into());
        }
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.files
            .write()
            .map(|mut files| files.remove(path).is_some())
            .unwrap_or(false)
    }

    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.read().ok()?.get(path).cloned()
    }
}

impl FileSystem for MemoryFileSystem {
    fn read_directory(&self, path: &Path) -> Result<Vec<(String, FileType)>> {
        let files = self
            .files
            .read()
            .map_err(|_| ExplorerError::io(path, std::io::Error::other("filesystem lock poisoned")))?;

        let mut entries: BTreeMap<String, FileType> = BTreeMap::new();
        for file in files.keys() {
            let Ok(rest) = file.strip_prefix(path) else {
                continue;
            };
            let mut components = rest.components();
            let Some(first) = components.next() else {
                continue;
            };
            let name = first.as_os_str().to_string_lossy().to_string();
            let file_type = if components.next().is_some() {
                FileType::Directory
            } else {
                FileType::File
            };
            entries.entry(name).or_insert(file_type);
        }

        if entries.is_empty() {
            return Err(ExplorerError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such directory"),
            ));
        }
        Ok(entries.into_iter().collect())
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.contents(path).ok_or_else(|| {
            ExplorerError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            )
        })
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.insert(path, contents.to_vec());
        Ok(())
    }
}

/// A text document as seen by the editor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// `file` for addressable documents; editors also hand out virtual ones
    pub scheme: String,
    pub path: PathBuf,
    pub text: String,
    /// Buffer has edits not yet written to disk
    pub dirty: bool,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            scheme: FILE_SCHEME.to_string(),
            path: path.into(),
            text: text.into(),
            dirty: false,
        }
    }

    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    pub fn modified(mut self) -> Self {
        self.dirty = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceFolder {
    pub name: String,
    pub path: PathBuf,
}

impl WorkspaceFolder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Self { name, path }
    }
}

/// Workspace folders, open buffers and the filesystem behind them
pub struct Workspace {
    folders: Vec<WorkspaceFolder>,
    fs: Box<dyn FileSystem>,
    buffers: BTreeMap<PathBuf, Document>,
}

impl Workspace {
    pub fn new(fs: impl FileSystem + 'static, folders: Vec<WorkspaceFolder>) -> Self {
        Self {
            folders,
            fs: Box::new(fs),
            buffers: BTreeMap::new(),
        }
    }

    pub fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    pub fn folders(&self) -> &[WorkspaceFolder] {
        &self.folders
    }

    pub fn add_folder(&mut self, folder: WorkspaceFolder) {
        if !self.folders.iter().any(|f| f.path == folder.path) {
            self.folders.push(folder);
        }
    }

    pub fn remove_folder(&mut self, path: &Path) {
        self.folders.retain(|f| f.path != path);
    }

    /// Innermost workspace folder containing `path`
    pub fn folder_for(&self, path: &Path) -> Option<&WorkspaceFolder> {
        self.folders
            .iter()
            .filter(|f| path.starts_with(&f.path))
            .max_by_key(|f| f.path.components().count())
    }

    /// Track an editor buffer
    pub fn update_buffer(&mut self, doc: Document) {
        self.buffers.insert(doc.path.clone(), doc);
    }

    pub fn close_buffer(&mut self, path: &Path) {
        self.buffers.remove(path);
    }

    pub fn buffer(&self, path: &Path) -> Option<&Document> {
        self.buffers.get(path)
    }

    /// The open buffer for `path`, or the file as it is on disk
    pub fn open_document(&self, path: &Path) -> Result<Document> {
        if let Some(doc) = self.buffers.get(path) {
            return Ok(doc.clone());
        }

        let bytes = self.fs.read_file(path)?;
        Ok(Document::new(path, String::from_utf8_lossy(&bytes).to_string()))
    }

    /// Write an open buffer with pending edits back to disk.
    ///
    /// Returns whether anything was written.
    pub fn save_document(&mut self, path: &Path) -> Result<bool> {
        let Some(doc) = self.buffers.get_mut(path) else {
            return Ok(false);
        };
        if !doc.dirty || doc.scheme != FILE_SCHEME {
            return Ok(false);
        }

        self.fs.write_file(path, doc.text.as_bytes())?;
        doc.dirty = false;
        Ok(true)
    }
}
