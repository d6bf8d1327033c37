//! Shared test fakes

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::config::ExplorerConfig;
use crate::error::{ExplorerError, Result};
use crate::explorer::TestExplorer;
use crate::symbols::{DocumentSymbol, SymbolProvider};
use crate::test_model::Range;
use crate::test_runner::{RunnerInvocation, StreamRecord, TestRunner};
use crate::workspace::{Document, MemoryFileSystem, Workspace, WorkspaceFolder};

pub fn test_fn(name: &str, line: u32) -> DocumentSymbol {
    DocumentSymbol::function(name, "func(t *testing.T)", Range::from_lines(line, 0, line + 2, 1))
}

pub fn bench_fn(name: &str, line: u32) -> DocumentSymbol {
    DocumentSymbol::function(name, "func(b *testing.B)", Range::from_lines(line, 0, line + 2, 1))
}

/// Symbol provider answering from a table, keyed by document path
#[derive(Clone, Default)]
pub struct ScriptedSymbols {
    symbols: Arc<Mutex<HashMap<PathBuf, Vec<DocumentSymbol>>>>,
    failing: Arc<Mutex<HashSet<PathBuf>>>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSymbols {
    pub fn set(&self, path: &str, symbols: Vec<DocumentSymbol>) {
        self.symbols.lock().unwrap().insert(PathBuf::from(path), symbols);
    }

    pub fn fail(&self, path: &str) {
        self.failing.lock().unwrap().insert(PathBuf::from(path));
    }

    /// Text of every document the provider was asked about, in order
    pub fn seen_texts(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl SymbolProvider for ScriptedSymbols {
    fn provide_symbols(&self, doc: &Document) -> Result<Vec<DocumentSymbol>> {
        self.seen.lock().unwrap().push(doc.text.clone());
        if self.failing.lock().unwrap().contains(&doc.path) {
            return Err(ExplorerError::Symbols {
                path: doc.path.clone(),
                message: "scripted failure".to_string(),
            });
        }
        Ok(self
            .symbols
            .lock()
            .unwrap()
            .get(&doc.path)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Clone, Default)]
struct Script {
    lines: Vec<String>,
    exit_code: Option<i32>,
}

/// Runner replaying canned output per (directory, benchmark) pair
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    scripts: Arc<Mutex<HashMap<(PathBuf, bool), Script>>>,
    invocations: Arc<Mutex<Vec<RunnerInvocation>>>,
    missing_binary: Arc<Mutex<bool>>,
}

impl ScriptedRunner {
    pub fn script(&self, dir: &str, benchmark: bool, lines: &[&str]) {
        self.scripts.lock().unwrap().insert(
            (PathBuf::from(dir), benchmark),
            Script {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                exit_code: None,
            },
        );
    }

    pub fn exit_with(&self, dir: &str, benchmark: bool, code: i32) {
        self.scripts
            .lock()
            .unwrap()
            .entry((PathBuf::from(dir), benchmark))
            .or_default()
            .exit_code = Some(code);
    }

    pub fn fail_to_spawn(&self) {
        *self.missing_binary.lock().unwrap() = true;
    }

    pub fn invocations(&self) -> Vec<RunnerInvocation> {
        self.invocations.lock().unwrap().clone()
    }
}

impl TestRunner for ScriptedRunner {
    fn run(&mut self, invocation: &RunnerInvocation, consumer: &mut dyn FnMut(StreamRecord)) -> Result<()> {
        self.invocations.lock().unwrap().push(invocation.clone());

        if *self.missing_binary.lock().unwrap() {
            return Err(ExplorerError::RunnerSpawn {
                dir: invocation.dir.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "go not found"),
            });
        }

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&(invocation.dir.clone(), invocation.benchmark))
            .cloned()
            .unwrap_or_default();
        for line in &script.lines {
            consumer(StreamRecord::parse(line));
        }

        match script.exit_code {
            Some(code) if code != 0 => Err(ExplorerError::RunnerExit {
                dir: invocation.dir.clone(),
                code: Some(code),
            }),
            _ => Ok(()),
        }
    }
}

pub struct Fixture {
    pub fs: MemoryFileSystem,
    pub symbols: ScriptedSymbols,
    pub runner: ScriptedRunner,
    pub explorer: TestExplorer,
}

/// An explorer over an in-memory filesystem with the given folders
pub fn fixture(folders: &[&str]) -> Fixture {
    let fs = MemoryFileSystem::new();
    let symbols = ScriptedSymbols::default();
    let runner = ScriptedRunner::default();
    let config = ExplorerConfig {
        gopath: Some(PathBuf::from("/nonexistent-gopath")),
        ..ExplorerConfig::default()
    };

    let workspace = Workspace::new(
        fs.clone(),
        folders.iter().map(|f| WorkspaceFolder::new(*f)).collect(),
    );
    let explorer = TestExplorer::new(workspace, symbols.clone(), runner.clone(), config);

    Fixture {
        fs,
        symbols,
        runner,
        explorer,
    }
}
