//! Test explorer
//!
//! [`TestExplorer`] owns the discovery tree together with everything needed
//! to keep it in sync: the workspace, the symbol provider, the test runner
//! and the configuration. Hosts feed it change notifications through the
//! handler methods below. Handler failures never propagate; they go to the
//! error sink.

use std::path::{Path, PathBuf};

use crate::config::ExplorerConfig;
use crate::error::{ExplorerError, Result};
use crate::symbols::SymbolProvider;
use crate::test_model::{ItemKind, NodeId, Range, TestKey, TestTree};
use crate::test_runner::TestRunner;
use crate::walker::is_test_file;
use crate::workspace::{Document, Workspace, WorkspaceFolder, FILE_SCHEME};

/// Label of the tree root
pub const ROOT_LABEL: &str = "Go";

type ErrorSink = Box<dyn FnMut(&ExplorerError)>;

pub struct TestExplorer {
    pub(crate) tree: TestTree,
    pub(crate) workspace: Workspace,
    pub(crate) symbols: Box<dyn SymbolProvider>,
    pub(crate) runner: Box<dyn TestRunner>,
    pub(crate) config: ExplorerConfig,
    on_error: ErrorSink,
}

impl TestExplorer {
    pub fn new(
        workspace: Workspace,
        symbols: impl SymbolProvider + 'static,
        runner: impl TestRunner + 'static,
        config: ExplorerConfig,
    ) -> Self {
        Self {
            tree: TestTree::new(ROOT_LABEL),
            workspace,
            symbols: Box::new(symbols),
            runner: Box::new(runner),
            config,
            on_error: Box::new(|e| tracing::warn!("{}", e)),
        }
    }

    /// Replace the default sink, which logs a warning
    pub fn with_error_sink(mut self, sink: impl FnMut(&ExplorerError) + 'static) -> Self {
        self.on_error = Box::new(sink);
        self
    }

    pub fn tree(&self) -> &TestTree {
        &self.tree
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn workspace_mut(&mut self) -> &mut Workspace {
        &mut self.workspace
    }

    pub fn config(&self) -> &ExplorerConfig {
        &self.config
    }

    pub(crate) fn report(&mut self, err: &ExplorerError) {
        (self.on_error)(err);
    }

    /// A document was opened or edited.
    ///
    /// `changed` holds the edited ranges; sub-tests of functions touching
    /// them are dropped.
    pub fn document_updated(&mut self, doc: Document, changed: Option<&[Range]>) {
        if doc.scheme == FILE_SCHEME {
            self.workspace.update_buffer(doc.clone());
        }
        if let Err(e) = self.update_document(&doc, changed) {
            self.report(&e);
        }
    }

    pub fn file_created(&mut self, path: &Path) {
        self.reload_file(path);
    }

    /// A file changed on disk outside any editor.
    ///
    /// Unlike `document_updated` the text is not kept as an open buffer.
    pub fn file_changed(&mut self, path: &Path) {
        self.reload_file(path);
    }

    fn reload_file(&mut self, path: &Path) {
        let result = self
            .workspace
            .open_document(path)
            .and_then(|doc| self.update_document(&doc, None));
        if let Err(e) = result {
            self.report(&e);
        }
    }

    pub fn file_deleted(&mut self, path: &Path) {
        self.workspace.close_buffer(path);
        if let Some(file) = self.find_file(path) {
            let parent = self.tree.parent(file);
            self.tree.dispose(file);
            if let Some(parent) = parent {
                self.tree.dispose_if_empty(parent);
            }
        }
    }

    pub fn workspace_folders_changed(&mut self, added: Vec<WorkspaceFolder>, removed: &[PathBuf]) {
        for path in removed {
            self.workspace.remove_folder(path);
        }
        let any_added = !added.is_empty();
        for folder in added {
            self.workspace.add_folder(folder);
        }

        let root = self.tree.root();
        for child in self.tree.children(root) {
            let Some(item) = self.tree.get(child) else {
                continue;
            };
            // Packages at the root live outside every folder to begin with
            if item.kind() == ItemKind::Package {
                continue;
            }
            if self.workspace.folder_for(&item.uri).is_none() {
                self.tree.dispose(child);
            }
        }

        if any_added {
            self.resolve_children(root);
        }
    }

    /// Lazily expand a node
    pub fn resolve_children(&mut self, id: NodeId) {
        if let Err(e) = self.try_resolve_children(id) {
            self.report(&e);
        }
    }

    /// Expand every node down to the test functions
    pub fn resolve_all(&mut self) {
        let mut queue = vec![self.tree.root()];
        while let Some(id) = queue.pop() {
            let expandable = self
                .tree
                .get(id)
                .map_or(false, |item| !item.kind().is_function());
            if expandable {
                self.resolve_children(id);
                queue.extend(self.tree.children(id));
            }
        }
    }

    pub(crate) fn try_resolve_children(&mut self, id: NodeId) -> Result<()> {
        let Some(item) = self.tree.get(id) else {
            return Ok(());
        };
        let kind = item.kind();
        let uri = item.uri.clone();

        match kind {
            ItemKind::Root => self.resolve_root(),
            ItemKind::Module | ItemKind::Workspace => {
                self.resolve_packages(&uri)?;
                self.resolve_files(&uri)
            }
            ItemKind::Package => self.resolve_files(&uri),
            ItemKind::File => {
                let doc = self.workspace.open_document(&uri)?;
                self.process_document(&doc, None)
            }
            ItemKind::Test | ItemKind::Benchmark | ItemKind::Example => Ok(()),
        }
    }

    fn update_document(&mut self, doc: &Document, changed: Option<&[Range]>) -> Result<()> {
        let is_test = doc
            .path
            .file_name()
            .map_or(false, |name| is_test_file(&name.to_string_lossy()));
        if !is_test || self.config.is_ignored_scheme(&doc.scheme) {
            return Ok(());
        }
        self.process_document(doc, changed)
    }

    /// Find a file node, descending only into nodes whose resource contains `path`
    fn find_file(&self, path: &Path) -> Option<NodeId> {
        let key = TestKey::new(path, ItemKind::File);
        let mut stack = vec![self.tree.root()];

        while let Some(id) = stack.pop() {
            for child in self.tree.children(id) {
                let Some(item) = self.tree.get(child) else {
                    continue;
                };
                if item.key == key {
                    return Some(child);
                }
                if path.starts_with(&item.uri) {
                    stack.push(child);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{bench_fn, fixture, test_fn, Fixture};
    use std::cell::RefCell;
    use std::rc::Rc;

    const GO_MOD: &str = "module example.com/foo\n\ngo 1.22\n";

    fn labels(explorer: &TestExplorer, id: NodeId) -> Vec<String> {
        explorer
            .tree()
            .children(id)
            .into_iter()
            .filter_map(|c| explorer.tree().get(c).map(|i| i.label.clone()))
            .collect()
    }

    fn file_node(explorer: &TestExplorer, path: &str) -> Option<NodeId> {
        explorer.tree().find(&TestKey::new(path, ItemKind::File))
    }

    #[test]
    fn test_document_updates_track_symbols() {
        let Fixture { fs, symbols, mut explorer, .. } = fixture(&["/ws"]);
        fs.insert("/ws/go.mod", GO_MOD);
        let path = "/ws/pkg/a_test.go";

        symbols.set(path, vec![test_fn("TestA", 2), test_fn("TestB", 6)]);
        explorer.document_updated(Document::new(path, ""), None);
        let file = file_node(&explorer, path).unwrap();
        assert_eq!(labels(&explorer, file), vec!["TestA", "TestB"]);

        symbols.set(path, vec![test_fn("TestB", 2), bench_fn("BenchmarkC", 8)]);
        explorer.document_updated(Document::new(path, "").modified(), None);
        assert_eq!(file_node(&explorer, path), Some(file));
        let mut kids = labels(&explorer, file);
        kids.sort();
        assert_eq!(kids, vec!["BenchmarkC", "TestB"]);

        assert!(explorer.workspace().buffer(Path::new(path)).unwrap().dirty);
    }

    #[test]
    fn test_subtests_survive_untouched_edits() {
        let Fixture { fs, symbols, mut explorer, .. } = fixture(&["/ws"]);
        fs.insert("/ws/go.mod", GO_MOD);
        let path = "/ws/a_test.go";
        symbols.set(path, vec![test_fn("TestA", 2), test_fn("TestB", 10)]);
        explorer.document_updated(Document::new(path, ""), None);

        let key_a = TestKey::function(path, ItemKind::Test, "TestA");
        let key_b = TestKey::function(path, ItemKind::Test, "TestB");
        let a = explorer.tree().find(&key_a).unwrap();
        let b = explorer.tree().find(&key_b).unwrap();
        let sub_a = explorer.tree.get_or_create_subtest(a, "x").unwrap();
        let sub_b = explorer.tree.get_or_create_subtest(b, "y").unwrap();

        let edit = [Range::from_lines(11, 0, 11, 4)];
        explorer.document_updated(Document::new(path, ""), Some(&edit));

        assert!(explorer.tree().contains(sub_a));
        assert!(!explorer.tree().contains(sub_b));
        assert!(!explorer.tree().get(b).unwrap().can_resolve_children);
    }

    #[test]
    fn test_non_test_and_ignored_documents_are_skipped() {
        let Fixture { fs, symbols, mut explorer, .. } = fixture(&["/ws"]);
        fs.insert("/ws/go.mod", GO_MOD);
        symbols.set("/ws/a.go", vec![test_fn("TestA", 2)]);
        symbols.set("/ws/a_test.go", vec![test_fn("TestA", 2)]);

        explorer.document_updated(Document::new("/ws/a.go", ""), None);
        explorer.document_updated(Document::new("/ws/a_test.go", "").with_scheme("git"), None);

        assert!(explorer.tree().is_empty());
        assert!(explorer.workspace().buffer(Path::new("/ws/a_test.go")).is_none());
    }

    #[test]
    fn test_provider_failure_reaches_sink_and_leaves_tree() {
        let Fixture { fs, symbols, explorer, .. } = fixture(&["/ws"]);
        fs.insert("/ws/go.mod", GO_MOD);
        symbols.fail("/ws/a_test.go");

        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = errors.clone();
        let mut explorer = explorer.with_error_sink(move |e| sink.borrow_mut().push(e.to_string()));

        explorer.document_updated(Document::new("/ws/a_test.go", ""), None);
        assert_eq!(errors.borrow().len(), 1);
        assert!(explorer.tree().is_empty());
    }

    #[test]
    fn test_created_and_deleted_files() {
        let Fixture { fs, symbols, mut explorer, .. } = fixture(&["/ws"]);
        fs.insert("/ws/go.mod", GO_MOD);
        fs.insert("/ws/pkg/a_test.go", "package pkg\n");
        symbols.set("/ws/pkg/a_test.go", vec![test_fn("TestA", 2)]);

        explorer.file_created(Path::new("/ws/pkg/a_test.go"));
        let file = file_node(&explorer, "/ws/pkg/a_test.go").unwrap();
        let pkg = explorer.tree().parent(file).unwrap();
        let module = explorer.tree().parent(pkg).unwrap();

        explorer.file_deleted(Path::new("/ws/pkg/a_test.go"));
        assert!(!explorer.tree().contains(file));
        assert!(!explorer.tree().contains(pkg));
        assert!(explorer.tree().contains(module));

        // Unknown files are a no-op
        explorer.file_deleted(Path::new("/ws/other_test.go"));
        assert!(explorer.tree().contains(module));
    }

    #[test]
    fn test_recreated_file_is_read_from_disk() {
        let Fixture { fs, symbols, mut explorer, .. } = fixture(&["/ws"]);
        fs.insert("/ws/go.mod", GO_MOD);
        let path = "/ws/a_test.go";

        symbols.set(path, vec![test_fn("TestOld", 2)]);
        explorer.document_updated(Document::new(path, "func TestOld"), None);
        assert!(explorer.workspace().buffer(Path::new(path)).is_some());

        explorer.file_deleted(Path::new(path));
        assert!(explorer.workspace().buffer(Path::new(path)).is_none());

        fs.insert(path, "func TestNew");
        symbols.set(path, vec![test_fn("TestNew", 2)]);
        explorer.file_created(Path::new(path));

        assert_eq!(symbols.seen_texts(), vec!["func TestOld", "func TestNew"]);
        assert!(explorer
            .tree()
            .find(&TestKey::function(path, ItemKind::Test, "TestNew"))
            .is_some());
        assert!(explorer
            .tree()
            .find(&TestKey::function(path, ItemKind::Test, "TestOld"))
            .is_none());
    }

    #[test]
    fn test_changed_file_does_not_open_a_buffer() {
        let Fixture { fs, symbols, mut explorer, .. } = fixture(&["/ws"]);
        fs.insert("/ws/go.mod", GO_MOD);
        fs.insert("/ws/a_test.go", "func TestA");
        symbols.set("/ws/a_test.go", vec![test_fn("TestA", 2)]);

        explorer.file_changed(Path::new("/ws/a_test.go"));

        assert!(explorer.workspace().buffer(Path::new("/ws/a_test.go")).is_none());
        assert!(explorer
            .tree()
            .find(&TestKey::function("/ws/a_test.go", ItemKind::Test, "TestA"))
            .is_some());
    }

    #[test]
    fn test_created_file_that_cannot_be_read_is_reported() {
        let Fixture { explorer, .. } = fixture(&["/ws"]);
        let errors = Rc::new(RefCell::new(0));
        let sink = errors.clone();
        let mut explorer = explorer.with_error_sink(move |_| *sink.borrow_mut() += 1);

        explorer.file_created(Path::new("/ws/missing_test.go"));
        assert_eq!(*errors.borrow(), 1);
    }

    #[test]
    fn test_resolve_all_reaches_functions_and_prunes_empty_files() {
        let Fixture { fs, symbols, mut explorer, .. } = fixture(&["/ws"]);
        fs.insert("/ws/go.mod", GO_MOD);
        fs.insert("/ws/a/a_test.go", "package a\n");
        fs.insert("/ws/b/b_test.go", "package b\n");
        symbols.set("/ws/a/a_test.go", vec![test_fn("TestA", 2)]);

        explorer.resolve_all();

        let key = TestKey::function("/ws/a/a_test.go", ItemKind::Test, "TestA");
        assert!(explorer.tree().find(&key).is_some());
        assert!(file_node(&explorer, "/ws/b/b_test.go").is_none());
        assert!(explorer
            .tree()
            .find(&TestKey::new("/ws/b", ItemKind::Package))
            .is_none());
    }

    #[test]
    fn test_folder_changes_dispose_and_rediscover() {
        let Fixture { fs, mut explorer, .. } = fixture(&["/a"]);
        fs.insert("/a/go.mod", "module example.com/a\n");
        fs.insert("/b/go.mod", "module example.com/b\n");

        let root = explorer.tree().root();
        explorer.resolve_children(root);
        assert_eq!(labels(&explorer, root), vec!["example.com/a"]);

        explorer.workspace_folders_changed(vec![WorkspaceFolder::new("/b")], &[PathBuf::from("/a")]);
        assert_eq!(labels(&explorer, root), vec!["example.com/b"]);

        explorer.workspace_folders_changed(Vec::new(), &[PathBuf::from("/b")]);
        assert!(explorer.tree().is_empty());
    }
}
