//! Run records
//!
//! Ephemeral per-run state: item states, captured output, messages, and the
//! raw runner output log. Observers can follow a run through [`RunEvent`]s.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

use crate::test_model::{NodeId, RunState, TestMessage, TestTree};

/// State recorded for one item during a run
#[derive(Debug, Clone, Default)]
pub struct RunRecord {
    pub state: Option<RunState>,
    pub duration_ms: Option<u64>,
    /// Raw output lines attributed to the item
    pub output: Vec<String>,
    pub messages: Vec<TestMessage>,
}

/// Live notification from a run in progress
#[derive(Debug, Clone)]
pub enum RunEvent {
    StateChanged {
        id: String,
        label: String,
        state: RunState,
        duration_ms: Option<u64>,
    },
    Message {
        id: String,
        message: TestMessage,
    },
    /// Raw runner output
    Output { line: String },
    DirectoryFailed { dir: PathBuf, error: String },
}

/// Failure of one directory group
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryError {
    pub dir: PathBuf,
    pub error: String,
}

/// Final result of one item, as handed to hosts
#[derive(Debug, Clone, Serialize)]
pub struct ItemResult {
    pub id: String,
    pub label: String,
    pub kind: &'static str,
    pub state: Option<RunState>,
    pub duration_ms: Option<u64>,
    pub messages: Vec<TestMessage>,
    pub output: Vec<String>,
}

/// One test run
pub struct TestRun {
    records: HashMap<NodeId, RunRecord>,
    /// Items in the order they were first touched
    order: Vec<NodeId>,
    captured: Vec<NodeId>,
    output: Vec<String>,
    errors: Vec<DirectoryError>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    event_tx: Option<Sender<RunEvent>>,
    labels: HashMap<NodeId, (String, String)>,
}

impl Default for TestRun {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRun {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            order: Vec::new(),
            captured: Vec::new(),
            output: Vec::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            event_tx: None,
            labels: HashMap::new(),
        }
    }

    /// Set the event sender for real-time updates
    pub fn with_event_sender(mut self, tx: Sender<RunEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, event: RunEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn record_mut(&mut self, tree: &TestTree, id: NodeId) -> &mut RunRecord {
        if !self.records.contains_key(&id) {
            self.order.push(id);
            if let Some(item) = tree.get(id) {
                self.labels
                    .insert(id, (item.key.to_string(), item.label.clone()));
            }
        }
        self.records.entry(id).or_default()
    }

    fn describe(&self, id: NodeId) -> (String, String) {
        self.labels.get(&id).cloned().unwrap_or_default()
    }

    pub fn set_state(&mut self, tree: &TestTree, id: NodeId, state: RunState, duration_ms: Option<u64>) {
        let record = self.record_mut(tree, id);
        record.state = Some(state);
        if duration_ms.is_some() {
            record.duration_ms = duration_ms;
        }

        let (id, label) = self.describe(id);
        self.emit(RunEvent::StateChanged {
            id,
            label,
            state,
            duration_ms,
        });
    }

    pub fn append_message(&mut self, tree: &TestTree, id: NodeId, message: TestMessage) {
        self.record_mut(tree, id).messages.push(message.clone());
        let (id, _) = self.describe(id);
        self.emit(RunEvent::Message { id, message });
    }

    /// Attribute a captured output line to an item for later annotation
    pub fn capture_output(&mut self, tree: &TestTree, id: NodeId, line: &str) {
        let record = self.record_mut(tree, id);
        record.output.push(line.to_string());
        if !self.captured.contains(&id) {
            self.captured.push(id);
        }
    }

    /// Items that captured output since the last call, in capture order
    pub fn take_captured(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.captured)
    }

    /// Raw runner output, as shown in an output panel
    pub fn append_output(&mut self, line: &str) {
        self.output.push(line.to_string());
        self.emit(RunEvent::Output {
            line: line.to_string(),
        });
    }

    pub fn directory_failed(&mut self, dir: PathBuf, error: String) {
        self.emit(RunEvent::DirectoryFailed {
            dir: dir.clone(),
            error: error.clone(),
        });
        self.errors.push(DirectoryError { dir, error });
    }

    /// Finish the run and close the event channel
    pub fn end(&mut self) {
        self.finished_at = Some(Utc::now());
        self.event_tx = None;
    }

    pub fn record(&self, id: NodeId) -> Option<&RunRecord> {
        self.records.get(&id)
    }

    pub fn state(&self, id: NodeId) -> Option<RunState> {
        self.records.get(&id)?.state
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn errors(&self) -> &[DirectoryError] {
        &self.errors
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Results for every item the run touched, in first-touched order.
    ///
    /// Items disposed since keep the id and label they had when touched.
    pub fn results(&self, tree: &TestTree) -> Vec<ItemResult> {
        self.order
            .iter()
            .filter_map(|id| {
                let record = self.records.get(id)?;
                let (key, label) = self.describe(*id);
                let kind = tree.get(*id).map(|item| item.kind_label()).unwrap_or("disposed");
                Some(ItemResult {
                    id: key,
                    label,
                    kind,
                    state: record.state,
                    duration_ms: record.duration_ms,
                    messages: record.messages.clone(),
                    output: record.output.clone(),
                })
            })
            .collect()
    }

    /// Count of touched items per state
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for record in self.records.values() {
            match record.state {
                Some(RunState::Passed) => summary.passed += 1,
                Some(RunState::Failed) => summary.failed += 1,
                Some(RunState::Skipped) => summary.skipped += 1,
                Some(RunState::Errored) => summary.errored += 1,
                Some(RunState::Queued) | Some(RunState::Running) => summary.incomplete += 1,
                None => {}
            }
        }
        summary
    }
}

/// Statistics for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
    /// Items that never reached a terminal state
    pub incomplete: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.errored + self.incomplete
    }
}
