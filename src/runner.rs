//! Run coordination
//!
//! Collects the functions a request selects, groups them by package
//! directory and runs each group through the test runner, tests first and
//! benchmarks second.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use crate::annotate::annotate;
use crate::error::ExplorerError;
use crate::events::{consume_benchmark_record, consume_test_event, pass_benchmarks, QueuedFunctions};
use crate::explorer::TestExplorer;
use crate::test_model::{ItemKind, NodeId, RunState};
use crate::test_run::{RunEvent, TestRun};
use crate::test_runner::{RunnerInvocation, StreamRecord};

/// Items to run, and items whose subtrees to leave out
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub include: Vec<NodeId>,
    pub exclude: Vec<NodeId>,
}

impl RunRequest {
    pub fn new(include: Vec<NodeId>) -> Self {
        Self {
            include,
            exclude: Vec::new(),
        }
    }

    pub fn excluding(mut self, exclude: Vec<NodeId>) -> Self {
        self.exclude = exclude;
        self
    }
}

/// Selected functions per package directory, and the files declaring them
#[derive(Default)]
struct Collected {
    functions: BTreeMap<PathBuf, Vec<NodeId>>,
    files: BTreeSet<PathBuf>,
}

impl TestExplorer {
    pub fn run(&mut self, request: &RunRequest) -> TestRun {
        self.execute(request, TestRun::new())
    }

    /// Like [`TestExplorer::run`], publishing progress on `tx` as it happens
    pub fn run_with_events(&mut self, request: &RunRequest, tx: Sender<RunEvent>) -> TestRun {
        self.execute(request, TestRun::new().with_event_sender(tx))
    }

    fn execute(&mut self, request: &RunRequest, mut run: TestRun) -> TestRun {
        let mut collected = Collected::default();
        for &id in &request.include {
            self.collect(id, &request.exclude, &mut collected);
        }

        // go test reads from disk
        for file in &collected.files {
            match self.workspace.save_document(file) {
                Ok(true) => tracing::debug!(file = %file.display(), "saved buffer before run"),
                Ok(false) => {}
                Err(e) => self.report(&e),
            }
        }

        tracing::info!(directories = collected.functions.len(), "starting test run");
        let flags = self.config.test_flags();
        for (dir, items) in &collected.functions {
            self.run_directory(&mut run, dir, items, &flags);
        }

        run.end();
        let summary = run.summary();
        tracing::info!(
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            "test run finished"
        );
        run
    }

    fn is_excluded(&self, id: NodeId, exclude: &[NodeId]) -> bool {
        let mut current = Some(id);
        while let Some(id) = current {
            let Some(parent) = self.tree.parent(id) else {
                return false;
            };
            if exclude.contains(&id) {
                return true;
            }
            current = Some(parent);
        }
        false
    }

    fn collect(&mut self, id: NodeId, exclude: &[NodeId], collected: &mut Collected) {
        if self.is_excluded(id, exclude) {
            return;
        }
        let Some(item) = self.tree.get(id) else {
            return;
        };

        if item.is_subtest() {
            tracing::debug!(test = %item.key, "sub-tests cannot run on their own, skipping");
            return;
        }

        if item.kind().is_function() {
            let dir = item.directory().to_path_buf();
            collected.files.insert(item.uri.clone());
            let group = collected.functions.entry(dir).or_default();
            if !group.contains(&id) {
                group.push(id);
            }
            return;
        }

        if item.child_count() == 0 {
            if let Err(e) = self.try_resolve_children(id) {
                self.report(&e);
            }
        }

        for child in self.tree.children(id) {
            let is_benchmark = self
                .tree
                .get(child)
                .map_or(false, |c| c.kind() == ItemKind::Benchmark);
            if is_benchmark && !self.config.run_benchmarks {
                continue;
            }
            self.collect(child, exclude, collected);
        }
    }

    fn run_directory(&mut self, run: &mut TestRun, dir: &Path, items: &[NodeId], flags: &[String]) {
        let mut tests = QueuedFunctions::new();
        let mut benchmarks = QueuedFunctions::new();

        for &id in items {
            run.set_state(&self.tree, id, RunState::Queued, None);
            self.tree.discard_children(id);

            let Some(item) = self.tree.get(id) else {
                continue;
            };
            let Some(name) = item.key.name.clone() else {
                continue;
            };
            if item.kind() == ItemKind::Benchmark {
                benchmarks.insert(name, id);
            } else {
                tests.insert(name, id);
            }
        }

        if !tests.is_empty() {
            let invocation = RunnerInvocation {
                dir: dir.to_path_buf(),
                functions: tests.keys().cloned().collect(),
                flags: flags.to_vec(),
                benchmark: false,
            };
            let tree = &mut self.tree;
            let result = self.runner.run(&invocation, &mut |record| {
                log_output(run, &record);
                if let StreamRecord::Event(event) = &record {
                    consume_test_event(tree, run, &tests, event);
                }
            });
            if let Err(e) = result {
                self.runner_failed(run, dir, e);
            }
        }

        if !benchmarks.is_empty() {
            let invocation = RunnerInvocation {
                dir: dir.to_path_buf(),
                functions: benchmarks.keys().cloned().collect(),
                flags: flags.to_vec(),
                benchmark: true,
            };
            let mut complete = HashSet::new();
            let tree = &mut self.tree;
            let result = self.runner.run(&invocation, &mut |record| {
                log_output(run, &record);
                consume_benchmark_record(tree, run, &benchmarks, &mut complete, &record);
            });

            // A process that ran to the end reported every failure it had
            let finished = match result {
                Ok(()) => true,
                Err(e) => {
                    let finished = matches!(e, ExplorerError::RunnerExit { .. });
                    self.runner_failed(run, dir, e);
                    finished
                }
            };
            if finished {
                pass_benchmarks(&self.tree, run, &benchmarks, &complete);
            }
        }

        for id in run.take_captured() {
            let Some(item) = self.tree.get(id) else {
                continue;
            };
            let Some(output) = run.record(id).map(|r| r.output.clone()) else {
                continue;
            };
            for message in annotate(&output, &item.uri) {
                run.append_message(&self.tree, id, message);
            }
        }
    }

    fn runner_failed(&mut self, run: &mut TestRun, dir: &Path, err: ExplorerError) {
        tracing::warn!(dir = %dir.display(), "{}", err);
        run.directory_failed(dir.to_path_buf(), err.to_string());
        self.report(&err);
    }
}

fn log_output(run: &mut TestRun, record: &StreamRecord) {
    if let Some(text) = record.display_text() {
        run.append_output(text.trim_end_matches(|c: char| c == '\r' || c == '\n'));
    }
}
