//! Test model definitions
//!
//! Core data structures for the discovery tree: structured item keys, the
//! node arena, source ranges, run states and diagnostic messages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{ExplorerError, Result};

/// Kind of a tree item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// The invisible tree root
    Root,
    /// A directory holding a go.mod file
    Module,
    /// A workspace folder with Go sources outside any module
    Workspace,
    /// A directory with at least one test file
    Package,
    /// A `_test.go` file
    File,
    Test,
    Benchmark,
    Example,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Root => "root",
            ItemKind::Module => "module",
            ItemKind::Workspace => "workspace",
            ItemKind::Package => "package",
            ItemKind::File => "file",
            ItemKind::Test => "test",
            ItemKind::Benchmark => "benchmark",
            ItemKind::Example => "example",
        }
    }

    /// Test, benchmark or example function
    pub fn is_function(&self) -> bool {
        matches!(self, ItemKind::Test | ItemKind::Benchmark | ItemKind::Example)
    }

    /// Kinds that are never pruned when they run out of children
    pub fn is_sticky(&self) -> bool {
        matches!(self, ItemKind::Root | ItemKind::Module | ItemKind::Workspace)
    }

    /// Classify a function by the `go test` naming convention.
    pub fn from_function_name(name: &str) -> Option<Self> {
        if name.starts_with("Test") {
            Some(ItemKind::Test)
        } else if name.starts_with("Benchmark") {
            Some(ItemKind::Benchmark)
        } else if name.starts_with("Example") {
            Some(ItemKind::Example)
        } else {
            None
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = ExplorerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "module" => Ok(ItemKind::Module),
            "workspace" => Ok(ItemKind::Workspace),
            "package" => Ok(ItemKind::Package),
            "file" => Ok(ItemKind::File),
            "test" => Ok(ItemKind::Test),
            "benchmark" => Ok(ItemKind::Benchmark),
            "example" => Ok(ItemKind::Example),
            other => Err(ExplorerError::InvalidId(format!("unknown item kind '{}'", other))),
        }
    }
}

/// Zero-based line/character position
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Source span, end inclusive of its position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn from_lines(start_line: u32, start_char: u32, end_line: u32, end_char: u32) -> Self {
        Self::new(
            Position::new(start_line, start_char),
            Position::new(end_line, end_char),
        )
    }

    /// Whether the two ranges overlap. Touching ranges intersect.
    pub fn intersects(&self, other: &Range) -> bool {
        self.start.max(other.start) <= self.end.min(other.end)
    }
}

/// Structured identity of a tree item
///
/// Encoded as `file://<path>?<kind>[#<function>[/<sub>...]]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestKey {
    /// Directory or file the item belongs to
    pub resource: PathBuf,
    pub kind: ItemKind,
    /// Function name for test/benchmark/example items
    pub name: Option<String>,
    /// Sub-test segments discovered from runner output
    pub subpath: Vec<String>,
}

impl TestKey {
    pub fn new(resource: impl Into<PathBuf>, kind: ItemKind) -> Self {
        Self {
            resource: resource.into(),
            kind,
            name: None,
            subpath: Vec::new(),
        }
    }

    pub fn function(resource: impl Into<PathBuf>, kind: ItemKind, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::new(resource, kind)
        }
    }

    fn root() -> Self {
        Self::new(PathBuf::new(), ItemKind::Root)
    }

    /// Key of a sub-test one level below this one
    pub fn subtest(&self, segment: &str) -> Self {
        let mut key = self.clone();
        key.subpath.push(segment.to_string());
        key
    }

    /// Sub-tests and sub-benchmarks only exist empirically
    pub fn is_dynamic(&self) -> bool {
        !self.subpath.is_empty()
    }

    /// Function name plus sub-path, as used by `go test -run`
    pub fn fragment(&self) -> Option<String> {
        let name = self.name.as_ref()?;
        if self.subpath.is_empty() {
            Some(name.clone())
        } else {
            Some(format!("{}/{}", name, self.subpath.join("/")))
        }
    }
}

impl fmt::Display for TestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == ItemKind::Root {
            return f.write_str("root");
        }
        write!(f, "file://{}?{}", self.resource.to_string_lossy(), self.kind)?;
        if let Some(fragment) = self.fragment() {
            write!(f, "#{}", fragment)?;
        }
        Ok(())
    }
}

impl FromStr for TestKey {
    type Err = ExplorerError;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("file://")
            .ok_or_else(|| ExplorerError::InvalidId(s.to_string()))?;
        let (head, fragment) = match rest.split_once('#') {
            Some((head, fragment)) => (head, Some(fragment)),
            None => (rest, None),
        };
        let (path, kind) = head
            .rsplit_once('?')
            .ok_or_else(|| ExplorerError::InvalidId(s.to_string()))?;

        let mut key = TestKey::new(path, kind.parse()?);
        if let Some(fragment) = fragment.filter(|f| !f.is_empty()) {
            let mut segments = fragment.split('/');
            key.name = segments.next().map(str::to_string);
            key.subpath = segments.map(str::to_string).collect();
        }
        Ok(key)
    }
}

/// Handle to a node in a [`TestTree`]
///
/// Ids of disposed nodes never resolve again, even when the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// A node in the discovery tree
#[derive(Debug, Clone)]
pub struct TestItem {
    pub key: TestKey,
    pub label: String,
    /// Directory or file backing the item (no query or fragment)
    pub uri: PathBuf,
    pub range: Option<Range>,
    pub runnable: bool,
    pub can_resolve_children: bool,
    parent: Option<NodeId>,
    children: BTreeMap<TestKey, NodeId>,
}

impl TestItem {
    pub fn new(key: TestKey, label: impl Into<String>, uri: impl Into<PathBuf>) -> Self {
        Self {
            key,
            label: label.into(),
            uri: uri.into(),
            range: None,
            runnable: false,
            can_resolve_children: false,
            parent: None,
            children: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.key.kind
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.values().copied()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn is_subtest(&self) -> bool {
        self.key.is_dynamic()
    }

    /// Kind name including the empirical sub-test kinds
    pub fn kind_label(&self) -> &'static str {
        match (self.key.kind, self.key.is_dynamic()) {
            (ItemKind::Benchmark, true) => "subbenchmark",
            (_, true) => "subtest",
            (kind, false) => kind.as_str(),
        }
    }

    /// Directory containing the item's resource
    pub fn directory(&self) -> &Path {
        if self.key.kind.is_function() || self.key.kind == ItemKind::File {
            self.uri.parent().unwrap_or(&self.uri)
        } else {
            &self.uri
        }
    }
}

struct Slot {
    generation: u32,
    item: Option<TestItem>,
}

/// Arena-backed discovery tree
pub struct TestTree {
    slots: Vec<Slot>,
    free: Vec<usize>,
    root: NodeId,
}

impl TestTree {
    pub fn new(label: &str) -> Self {
        let mut root = TestItem::new(TestKey::root(), label, PathBuf::new());
        root.can_resolve_children = true;

        Self {
            slots: vec![Slot {
                generation: 0,
                item: Some(root),
            }],
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&TestItem> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.item.as_ref()
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut TestItem> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.item.as_mut()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live nodes, root included
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.item.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.get(self.root).map_or(true, |root| root.children.is_empty())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.get(id)
            .map(|item| item.children().collect())
            .unwrap_or_default()
    }

    /// Look up a direct child by key
    pub fn child(&self, parent: NodeId, key: &TestKey) -> Option<NodeId> {
        self.get(parent)?.children.get(key).copied()
    }

    /// Find the first node with the given key anywhere in the tree
    pub fn find(&self, key: &TestKey) -> Option<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .find(|id| self.get(*id).map_or(false, |item| &item.key == key))
    }

    /// All nodes below `id` in pre-order, `id` excluded
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).into_iter().rev());
        }
        out
    }

    /// Insert `item` under `parent`, or return the child already holding its key
    pub fn get_or_insert(&mut self, parent: NodeId, mut item: TestItem) -> NodeId {
        if let Some(existing) = self.child(parent, &item.key) {
            return existing;
        }

        let key = item.key.clone();
        item.parent = Some(parent);
        item.children.clear();
        let id = self.allocate(item);
        if let Some(parent) = self.get_mut(parent) {
            parent.children.insert(key, id);
        }
        id
    }

    fn allocate(&mut self, item: TestItem) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.item = Some(item);
            return NodeId {
                index: index as u32,
                generation: slot.generation,
            };
        }

        self.slots.push(Slot {
            generation: 0,
            item: Some(item),
        });
        NodeId {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    /// Remove a node and its whole subtree. The root cannot be disposed.
    pub fn dispose(&mut self, id: NodeId) {
        if id == self.root {
            return;
        }
        let Some(item) = self.get(id) else {
            return;
        };

        let key = item.key.clone();
        if let Some(parent) = item.parent {
            if let Some(parent) = self.get_mut(parent) {
                parent.children.remove(&key);
            }
        }

        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let slot = &mut self.slots[next.index as usize];
            if let Some(item) = slot.item.take() {
                stack.extend(item.children.values().copied());
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(next.index as usize);
            }
        }
    }

    /// Dispose `id` if it has no children, then retry with its parent.
    /// Stops at the root and at module/workspace nodes.
    pub fn dispose_if_empty(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(id) = current {
            let Some(item) = self.get(id) else {
                return;
            };
            if item.parent.is_none() || item.key.kind.is_sticky() || !item.children.is_empty() {
                return;
            }

            current = item.parent;
            self.dispose(id);
        }
    }

    /// Drop empirically discovered children of a test or benchmark
    pub fn discard_children(&mut self, id: NodeId) {
        let children = self.children(id);
        if let Some(item) = self.get_mut(id) {
            item.can_resolve_children = false;
        }
        for child in children {
            self.dispose(child);
        }
    }

    /// Copy the item's range onto every descendant
    pub fn relocate_children(&mut self, id: NodeId) {
        let Some(range) = self.get(id).map(|item| item.range) else {
            return;
        };
        for child in self.descendants(id) {
            if let Some(child) = self.get_mut(child) {
                child.range = range;
            }
        }
    }

    /// Find or create the sub-test `name` below `parent`.
    ///
    /// Sub-tests share their parent's resource and range and are not
    /// runnable on their own.
    pub fn get_or_create_subtest(&mut self, parent: NodeId, name: &str) -> Option<NodeId> {
        let item = self.get(parent)?;
        let key = item.key.subtest(name);
        if let Some(existing) = item.children.get(&key) {
            return Some(*existing);
        }

        let mut sub = TestItem::new(key, name, item.uri.clone());
        sub.range = item.range;
        sub.runnable = false;

        if let Some(item) = self.get_mut(parent) {
            item.can_resolve_children = true;
        }
        Some(self.get_or_insert(parent, sub))
    }
}

/// Result state of an item during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Queued,
    Running,
    Passed,
    Failed,
    Skipped,
    Errored,
}

impl RunState {
    pub fn symbol(&self) -> &'static str {
        match self {
            RunState::Queued => "○",
            RunState::Running => "●",
            RunState::Passed => "✓",
            RunState::Failed => "✗",
            RunState::Skipped => "⊘",
            RunState::Errored => "!",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunState::Queued => "queued",
            RunState::Running => "running",
            RunState::Passed => "passed",
            RunState::Failed => "failed",
            RunState::Skipped => "skipped",
            RunState::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Passed | RunState::Failed | RunState::Skipped | RunState::Errored
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Information,
    Hint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub path: PathBuf,
    pub position: Position,
}

/// Diagnostic attached to an item by a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMessage {
    pub message: String,
    pub severity: Severity,
    pub location: Option<Location>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_tree() -> (TestTree, NodeId, NodeId, NodeId) {
        let mut tree = TestTree::new("Go");
        let root = tree.root();

        let mut module = TestItem::new(TestKey::new("/src/mod", ItemKind::Module), "example.com/mod", "/src/mod");
        module.can_resolve_children = true;
        let module = tree.get_or_insert(root, module);

        let pkg = TestItem::new(TestKey::new("/src/mod/pkg", ItemKind::Package), "pkg", "/src/mod/pkg");
        let pkg = tree.get_or_insert(module, pkg);

        let file = TestItem::new(
            TestKey::new("/src/mod/pkg/a_test.go", ItemKind::File),
            "a_test.go",
            "/src/mod/pkg/a_test.go",
        );
        let file = tree.get_or_insert(pkg, file);

        (tree, module, pkg, file)
    }

    #[test]
    fn test_key_encoding() {
        let key = TestKey::function("/src/mod/a_test.go", ItemKind::Test, "TestA")
            .subtest("B")
            .subtest("C");
        let encoded = key.to_string();
        assert_eq!(encoded, "file:///src/mod/a_test.go?test#TestA/B/C");

        let parsed: TestKey = encoded.parse().unwrap();
        assert_eq!(parsed, key);

        let pkg: TestKey = "file:///src/mod/pkg?package".parse().unwrap();
        assert_eq!(pkg.kind, ItemKind::Package);
        assert_eq!(pkg.name, None);
        assert!("/src/mod?module".parse::<TestKey>().is_err());
        assert!("file:///src/mod?bogus".parse::<TestKey>().is_err());
    }

    #[test]
    fn test_function_kind_from_name() {
        assert_eq!(ItemKind::from_function_name("TestFoo"), Some(ItemKind::Test));
        assert_eq!(ItemKind::from_function_name("BenchmarkFoo"), Some(ItemKind::Benchmark));
        assert_eq!(ItemKind::from_function_name("ExampleFoo"), Some(ItemKind::Example));
        assert_eq!(ItemKind::from_function_name("helper"), None);
    }

    #[test]
    fn test_range_intersection() {
        let a = Range::from_lines(1, 0, 5, 1);
        assert!(a.intersects(&Range::from_lines(5, 0, 9, 0)));
        assert!(a.intersects(&Range::from_lines(5, 1, 5, 1)));
        assert!(!a.intersects(&Range::from_lines(6, 0, 9, 0)));
        assert!(!a.intersects(&Range::from_lines(0, 0, 0, 10)));
    }

    #[test]
    fn test_get_or_insert_reuses_key() {
        let (mut tree, _, pkg, file) = file_tree();
        let again = TestItem::new(
            TestKey::new("/src/mod/pkg/a_test.go", ItemKind::File),
            "other",
            "/src/mod/pkg/a_test.go",
        );
        assert_eq!(tree.get_or_insert(pkg, again), file);
        assert_eq!(tree.get(file).unwrap().label, "a_test.go");
    }

    #[test]
    fn test_dispose_prunes_up_to_module() {
        let (mut tree, module, pkg, file) = file_tree();
        let test = TestItem::new(
            TestKey::function("/src/mod/pkg/a_test.go", ItemKind::Test, "TestA"),
            "TestA",
            "/src/mod/pkg/a_test.go",
        );
        let test = tree.get_or_insert(file, test);

        tree.dispose(test);
        tree.dispose_if_empty(file);

        assert!(!tree.contains(file));
        assert!(!tree.contains(pkg));
        assert!(tree.contains(module));
        assert_eq!(tree.children(tree.root()), vec![module]);
    }

    #[test]
    fn test_dispose_if_empty_keeps_nodes_with_children() {
        let (mut tree, _, pkg, file) = file_tree();
        tree.dispose_if_empty(pkg);
        assert!(tree.contains(pkg));
        assert!(tree.contains(file));
    }

    #[test]
    fn test_stale_ids_do_not_resolve() {
        let (mut tree, _, pkg, file) = file_tree();
        tree.dispose(pkg);
        assert!(!tree.contains(file));

        let other = TestItem::new(TestKey::new("/elsewhere", ItemKind::Package), "elsewhere", "/elsewhere");
        let other = tree.get_or_insert(tree.root(), other);
        assert!(tree.contains(other));
        assert!(tree.get(pkg).is_none());
        assert!(tree.get(file).is_none());
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_subtest_chain_is_reused() {
        let (mut tree, _, _, file) = file_tree();
        let mut test = TestItem::new(
            TestKey::function("/src/mod/pkg/a_test.go", ItemKind::Test, "TestA"),
            "TestA",
            "/src/mod/pkg/a_test.go",
        );
        test.range = Some(Range::from_lines(3, 0, 8, 1));
        test.runnable = true;
        let test = tree.get_or_insert(file, test);

        let b = tree.get_or_create_subtest(test, "B").unwrap();
        let c = tree.get_or_create_subtest(b, "C").unwrap();
        assert_eq!(tree.get_or_create_subtest(test, "B"), Some(b));

        let item = tree.get(c).unwrap();
        assert_eq!(item.key.fragment().as_deref(), Some("TestA/B/C"));
        assert_eq!(item.kind_label(), "subtest");
        assert!(!item.runnable);
        assert_eq!(item.range, Some(Range::from_lines(3, 0, 8, 1)));
        assert!(tree.get(test).unwrap().can_resolve_children);
    }

    #[test]
    fn test_relocate_and_discard_children() {
        let (mut tree, _, _, file) = file_tree();
        let mut bench = TestItem::new(
            TestKey::function("/src/mod/pkg/a_test.go", ItemKind::Benchmark, "BenchmarkA"),
            "BenchmarkA",
            "/src/mod/pkg/a_test.go",
        );
        bench.range = Some(Range::from_lines(1, 0, 2, 0));
        let bench = tree.get_or_insert(file, bench);
        let sub = tree.get_or_create_subtest(bench, "small").unwrap();
        assert_eq!(tree.get(sub).unwrap().kind_label(), "subbenchmark");

        tree.get_mut(bench).unwrap().range = Some(Range::from_lines(10, 0, 12, 0));
        tree.relocate_children(bench);
        assert_eq!(tree.get(sub).unwrap().range, Some(Range::from_lines(10, 0, 12, 0)));

        tree.discard_children(bench);
        assert!(!tree.contains(sub));
        assert!(!tree.get(bench).unwrap().can_resolve_children);
        assert!(tree.contains(bench));
    }

    #[test]
    fn test_find_and_directory() {
        let (tree, _, pkg, file) = file_tree();
        let key = TestKey::new("/src/mod/pkg/a_test.go", ItemKind::File);
        assert_eq!(tree.find(&key), Some(file));
        assert_eq!(tree.get(file).unwrap().directory(), Path::new("/src/mod/pkg"));
        assert_eq!(tree.get(pkg).unwrap().directory(), Path::new("/src/mod/pkg"));
    }
}
