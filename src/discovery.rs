//! Test discovery module
//!
//! Materializes modules, workspaces, packages, files and test functions in
//! the tree. Modules are found through go.mod files, packages through the
//! walker and functions through the symbol provider.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{ExplorerError, Result};
use crate::explorer::TestExplorer;
use crate::symbols::{DocumentSymbol, SymbolKind};
use crate::test_model::{ItemKind, NodeId, Range, TestItem, TestKey};
use crate::walker::{is_hidden, is_test_file, walk_packages, walk_workspaces, MODULE_FILE};
use crate::workspace::{Document, FileType, WorkspaceFolder};

static MODULE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^module\s+(?P<name>.*?)(?:\s|//|$)").unwrap());

/// Module path declared by a go.mod file
pub fn parse_module_name(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let caps = MODULE_LINE.captures(line.trim_start())?;
        let name = caps["name"].trim_matches('"');
        (!name.is_empty()).then(|| name.to_string())
    })
}

/// Module path of the go.mod at `path`, or why it has none
pub fn read_module_name(path: &Path, contents: &str) -> Result<String> {
    parse_module_name(contents).ok_or_else(|| ExplorerError::ModuleMetadata {
        path: path.to_path_buf(),
        reason: "no module directive".to_string(),
    })
}

/// `dir` relative to `base`, or the whole path when it is not below it
fn relative_label(dir: &Path, base: &Path) -> String {
    match dir.strip_prefix(base) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.to_string_lossy().to_string(),
        _ => dir.to_string_lossy().to_string(),
    }
}

impl TestExplorer {
    /// Module path declared in `dir`, if `dir` holds a usable go.mod
    fn module_name(&self, dir: &Path) -> Option<String> {
        let path = dir.join(MODULE_FILE);
        let bytes = self.workspace.fs().read_file(&path).ok()?;
        match read_module_name(&path, &String::from_utf8_lossy(&bytes)) {
            Ok(name) => Some(name),
            Err(e) => {
                tracing::debug!("{}, ignoring", e);
                None
            }
        }
    }

    /// Nearest directory at or above `dir` holding a usable go.mod
    fn find_module(&self, dir: &Path) -> Option<(PathBuf, String)> {
        dir.ancestors()
            .find_map(|ancestor| Some((ancestor.to_path_buf(), self.module_name(ancestor)?)))
    }

    fn get_module(&mut self, dir: &Path, name: &str) -> NodeId {
        let root = self.tree.root();
        let mut item = TestItem::new(TestKey::new(dir, ItemKind::Module), name, dir);
        item.can_resolve_children = true;
        item.runnable = true;
        self.tree.get_or_insert(root, item)
    }

    fn get_workspace(&mut self, folder: &WorkspaceFolder) -> NodeId {
        let root = self.tree.root();
        let mut item = TestItem::new(
            TestKey::new(&folder.path, ItemKind::Workspace),
            folder.name.clone(),
            &folder.path,
        );
        item.can_resolve_children = true;
        item.runnable = true;
        self.tree.get_or_insert(root, item)
    }

    /// Node for the package in `dir`.
    ///
    /// A package in the root of a module or workspace folder is that module
    /// or workspace node itself.
    fn get_package(&mut self, dir: &Path) -> NodeId {
        let (parent, label) = if let Some((module_dir, name)) = self.find_module(dir) {
            let module = self.get_module(&module_dir, &name);
            if dir == module_dir {
                return module;
            }
            (module, relative_label(dir, &module_dir))
        } else if let Some(folder) = self.workspace.folder_for(dir).cloned() {
            let workspace = self.get_workspace(&folder);
            if dir == folder.path {
                return workspace;
            }
            (workspace, relative_label(dir, &folder.path))
        } else {
            let label = match self.config.gopath() {
                Some(gopath) => relative_label(dir, &gopath.join("src")),
                None => dir.to_string_lossy().to_string(),
            };
            (self.tree.root(), label)
        };

        let mut item = TestItem::new(TestKey::new(dir, ItemKind::Package), label, dir);
        item.can_resolve_children = true;
        item.runnable = true;
        self.tree.get_or_insert(parent, item)
    }

    fn get_file(&mut self, path: &Path) -> NodeId {
        let dir = path.parent().unwrap_or(path);
        let package = self.get_package(dir);

        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut item = TestItem::new(TestKey::new(path, ItemKind::File), label, path);
        item.can_resolve_children = true;
        item.runnable = true;
        self.tree.get_or_insert(package, item)
    }

    /// Sync a file node with the test functions of `doc`.
    ///
    /// Functions that disappeared are disposed, and a file left without
    /// tests is pruned together with its empty ancestors.
    pub(crate) fn process_document(&mut self, doc: &Document, changed: Option<&[Range]>) -> Result<()> {
        let symbols = self.symbols.provide_symbols(doc)?;

        let file = self.get_file(&doc.path);
        let mut seen = HashSet::new();
        for symbol in &symbols {
            self.process_symbol(&doc.path, file, &mut seen, symbol);
        }

        for child in self.tree.children(file) {
            let Some(item) = self.tree.get(child) else {
                continue;
            };
            if !seen.contains(&item.key) {
                self.tree.dispose(child);
                continue;
            }

            let touched = match (changed, item.range) {
                (Some(changed), Some(range)) => changed.iter().any(|r| range.intersects(r)),
                _ => false,
            };
            if touched {
                self.tree.discard_children(child);
            }
        }

        self.tree.dispose_if_empty(file);
        Ok(())
    }

    fn process_symbol(&mut self, path: &Path, file: NodeId, seen: &mut HashSet<TestKey>, symbol: &DocumentSymbol) {
        // TestMain(*testing.M) sets up the package, it is not a test
        if symbol.name == "TestMain" && symbol.detail.contains("*testing.M)") {
            return;
        }

        if symbol.kind != SymbolKind::Function {
            for child in &symbol.children {
                self.process_symbol(path, file, seen, child);
            }
            return;
        }

        let Some(kind) = ItemKind::from_function_name(&symbol.name) else {
            return;
        };
        let key = TestKey::function(path, kind, &symbol.name);
        seen.insert(key.clone());

        if let Some(existing) = self.tree.child(file, &key) {
            let moved = match self.tree.get_mut(existing) {
                Some(item) if item.range != Some(symbol.range) => {
                    item.range = Some(symbol.range);
                    true
                }
                _ => false,
            };
            if moved {
                self.tree.relocate_children(existing);
            }
            return;
        }

        let mut item = TestItem::new(key, symbol.name.clone(), path);
        item.range = Some(symbol.range);
        item.runnable = true;
        self.tree.get_or_insert(file, item);
    }

    /// Find the modules and workspaces of every folder
    pub(crate) fn resolve_root(&mut self) -> Result<()> {
        let root = self.tree.root();

        // Packages at the root that a folder now covers get rediscovered under it
        for child in self.tree.children(root) {
            let covered = self.tree.get(child).map_or(false, |item| {
                item.kind() == ItemKind::Package && self.workspace.folder_for(&item.uri).is_some()
            });
            if covered {
                self.tree.dispose(child);
            }
        }

        let folders = self.workspace.folders().to_vec();
        for folder in &folders {
            let found = match walk_workspaces(self.workspace.fs(), &folder.path) {
                Ok(found) => found,
                Err(e) => {
                    self.report(&e);
                    continue;
                }
            };

            let modules: Vec<&PathBuf> = found
                .iter()
                .filter(|(_, is_module)| **is_module)
                .map(|(dir, _)| dir)
                .collect();

            // Sources inside a module belong to it, not to the folder
            let needs_workspace = found
                .iter()
                .any(|(dir, is_module)| !is_module && !modules.iter().any(|m| dir.starts_with(m)));

            for dir in &modules {
                match self.module_name(dir) {
                    Some(name) => {
                        self.get_module(dir, &name);
                    }
                    None => tracing::debug!(dir = %dir.display(), "skipping directory without a usable go.mod"),
                }
            }

            if needs_workspace {
                self.get_workspace(folder);
            }
        }
        Ok(())
    }

    /// Create a package node for every directory below `dir` holding tests
    pub(crate) fn resolve_packages(&mut self, dir: &Path) -> Result<()> {
        for package in walk_packages(self.workspace.fs(), dir)? {
            self.get_package(&package);
        }
        Ok(())
    }

    /// Create a file node for every test file directly in `dir`
    pub(crate) fn resolve_files(&mut self, dir: &Path) -> Result<()> {
        for (name, file_type) in self.workspace.fs().read_directory(dir)? {
            if file_type == FileType::File && !is_hidden(&name) && is_test_file(&name) {
                self.get_file(&dir.join(name));
            }
        }
        Ok(())
    }
}
