//! Runner output consumption
//!
//! Two grammars: structured test events for test runs, and benchmark result
//! lines for benchmark runs. Names are resolved against the functions queued
//! for the invocation; sub-test segments create nodes on demand.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

use crate::test_model::{Location, NodeId, RunState, Severity, TestMessage, TestTree};
use crate::test_run::TestRun;
use crate::test_runner::{GoTestEvent, StreamRecord, TestAction};

/// Queued top-level items of one invocation, by function name
pub type QueuedFunctions = BTreeMap<String, NodeId>;

// On start:    "BenchmarkFooBar"
// On complete: "BenchmarkFooBar-4    123456    123.4 ns/op    123 B/op    12 allocs/op"
static BENCHMARK_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>Benchmark[/\w]+)(?:-(?P<procs>\d+)\s+(?P<result>.*))?$").unwrap()
});

/// Resolve `TestXxx/Foo/Bar` (or `TestXxx#Foo`) to a node, creating the
/// sub-tests below the queued `TestXxx` as needed.
pub fn resolve_test_name(tree: &mut TestTree, queued: &QueuedFunctions, name: &str) -> Option<NodeId> {
    let mut parts = name.split(|c| c == '/' || c == '#');
    let first = parts.next().filter(|p| !p.is_empty())?;
    let mut id = *queued.get(first)?;

    for part in parts.filter(|p| !p.is_empty()) {
        id = tree.get_or_create_subtest(id, part)?;
    }
    Some(id)
}

/// Lines the runner prints to frame each test
fn is_framing(output: &str) -> bool {
    if output.starts_with("=== RUN") {
        return true;
    }
    let trimmed = output.trim_start();
    trimmed.starts_with("--- PASS: ") || trimmed.starts_with("--- FAIL: ")
}

fn elapsed_ms(event: &GoTestEvent) -> Option<u64> {
    event
        .elapsed
        .map(|seconds| (seconds * 1000.0).round().max(0.0) as u64)
}

/// Apply one record of a test run
pub fn consume_test_event(tree: &mut TestTree, run: &mut TestRun, tests: &QueuedFunctions, event: &GoTestEvent) {
    let Some(name) = event.test.as_deref() else {
        return;
    };
    let Some(id) = resolve_test_name(tree, tests, name) else {
        return;
    };

    match event.action {
        TestAction::Run => run.set_state(tree, id, RunState::Running, None),
        TestAction::Pass => run.set_state(tree, id, RunState::Passed, elapsed_ms(event)),
        TestAction::Fail => run.set_state(tree, id, RunState::Failed, elapsed_ms(event)),
        TestAction::Skip => run.set_state(tree, id, RunState::Skipped, None),
        TestAction::Output => {
            let Some(output) = event.output.as_deref() else {
                return;
            };
            if !is_framing(output) {
                run.capture_output(tree, id, output);
            }
        }
        TestAction::Other => {
            tracing::debug!(test = name, ?event, "ignoring test event");
        }
    }
}

/// Apply one record of a benchmark run.
///
/// `complete` collects benchmarks that reached a terminal state, for
/// [`pass_benchmarks`].
pub fn consume_benchmark_record(
    tree: &mut TestTree,
    run: &mut TestRun,
    benchmarks: &QueuedFunctions,
    complete: &mut HashSet<NodeId>,
    record: &StreamRecord,
) {
    let (action, output) = match record {
        StreamRecord::Event(event) => {
            if let Some(name) = event.test.as_deref() {
                if let Some(id) = resolve_test_name(tree, benchmarks, name) {
                    let terminal = match event.action {
                        TestAction::Fail => Some(RunState::Failed),
                        TestAction::Skip => Some(RunState::Skipped),
                        _ => None,
                    };
                    if let Some(state) = terminal {
                        run.set_state(tree, id, state, None);
                        complete.insert(id);
                        return;
                    }
                }
            }
            (event.action, event.output.as_deref())
        }
        StreamRecord::Text(text) => (TestAction::Output, Some(text.as_str())),
    };

    if action != TestAction::Output {
        return;
    }
    let Some(output) = output else {
        return;
    };
    let Some(caps) = BENCHMARK_LINE.captures(output.trim_end()) else {
        return;
    };
    let Some(id) = resolve_test_name(tree, benchmarks, &caps["name"]) else {
        return;
    };

    match caps.name("result").map(|r| r.as_str().trim()) {
        Some(result) => {
            let location = tree.get(id).map(|item| Location {
                path: item.uri.clone(),
                position: item.range.map(|r| r.start).unwrap_or_default(),
            });
            run.append_message(
                tree,
                id,
                TestMessage {
                    message: result.to_string(),
                    severity: Severity::Information,
                    location,
                },
            );
            run.set_state(tree, id, RunState::Passed, None);
            complete.insert(id);
        }
        None => run.set_state(tree, id, RunState::Running, None),
    }
}

/// Pass every benchmark and sub-benchmark that never reported completion.
///
/// Benchmarks that succeed print results but emit no terminal event, so the
/// end of the batch is the only evidence they passed.
pub fn pass_benchmarks(tree: &TestTree, run: &mut TestRun, benchmarks: &QueuedFunctions, complete: &HashSet<NodeId>) {
    for &root in benchmarks.values() {
        let mut items = vec![root];
        items.extend(tree.descendants(root));
        for id in items {
            if !complete.contains(&id) {
                run.set_state(tree, id, RunState::Passed, None);
            }
        }
    }
}
