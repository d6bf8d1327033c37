//! gotestx - Go Test Explorer
//!
//! A library for discovering and running Go tests with:
//! - A live test tree of modules, packages, files and test functions
//! - Incremental sync from file and editor buffer changes
//! - Streaming `go test -json` execution with sub-test discovery
//! - Benchmark result capture and `file.go:line` output annotation

pub mod annotate;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod explorer;
pub mod report;
pub mod runner;
pub mod symbols;
pub mod test_model;
pub mod test_run;
pub mod test_runner;
pub mod walker;
pub mod watcher;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use config::ExplorerConfig;
pub use error::{ExplorerError, Result};
pub use explorer::TestExplorer;
pub use runner::RunRequest;
pub use symbols::{DocumentSymbol, GoSymbolProvider, SymbolKind, SymbolProvider};
pub use test_model::{ItemKind, NodeId, Range, RunState, TestItem, TestKey, TestMessage, TestTree};
pub use test_run::{ItemResult, RunEvent, RunSummary, TestRun};
pub use test_runner::{GoTestRunner, RunnerInvocation, StreamRecord, TestRunner};
pub use workspace::{Document, FileSystem, MemoryFileSystem, OsFileSystem, Workspace, WorkspaceFolder};
