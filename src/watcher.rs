//! File watcher keeping the test tree in sync
//!
//! Turns filesystem events into explorer notifications and optionally
//! re-runs the tests of changed files.

use anyhow::Result;
use colored::Colorize;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use crate::explorer::TestExplorer;
use crate::report;
use crate::runner::RunRequest;
use crate::test_model::{ItemKind, TestKey};
use crate::walker::{is_test_file, MODULE_FILE};

const DEBOUNCE_MS: u64 = 300;
const EXCLUDED_DIRS: &[&str] = &[".git", "vendor", "node_modules", "testdata"];

/// What a batch of events did to one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    Created,
    Modified,
    Deleted,
    /// A go.mod appeared, changed or went away
    Module,
}

/// Classify an event for `path`. `exists` is whether the path exists now.
pub fn classify(path: &Path, kind: &EventKind, exists: bool) -> Option<FileChange> {
    if matches!(kind, EventKind::Access(_)) {
        return None;
    }
    let excluded = path.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        EXCLUDED_DIRS.contains(&&*name)
    });
    if excluded {
        return None;
    }

    let name = path.file_name()?.to_string_lossy();
    if name == MODULE_FILE {
        return Some(FileChange::Module);
    }
    if !is_test_file(&name) {
        return None;
    }

    Some(match (exists, kind) {
        (false, _) => FileChange::Deleted,
        (true, EventKind::Create(_)) => FileChange::Created,
        (true, _) => FileChange::Modified,
    })
}

/// Fold a new change into the one already recorded for a path
fn merge(previous: Option<FileChange>, next: FileChange) -> FileChange {
    match (previous, next) {
        // Created then edited within one batch is still new to the tree
        (Some(FileChange::Created), FileChange::Modified) => FileChange::Created,
        (_, next) => next,
    }
}

pub struct ExplorerWatcher<'a> {
    explorer: &'a mut TestExplorer,
    rerun: bool,
}

impl<'a> ExplorerWatcher<'a> {
    pub fn new(explorer: &'a mut TestExplorer, rerun: bool) -> Self {
        Self { explorer, rerun }
    }

    pub fn start(&mut self) -> Result<()> {
        println!("{} Discovering tests...", "🔍".cyan());
        self.explorer.resolve_all();
        println!(
            "{} Found {} function(s)",
            "✓".green(),
            report::function_count(self.explorer.tree())
        );

        let (tx, rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            Config::default(),
        )?;

        let folders: Vec<PathBuf> = self
            .explorer
            .workspace()
            .folders()
            .iter()
            .map(|f| f.path.clone())
            .collect();
        for folder in &folders {
            watcher.watch(folder, RecursiveMode::Recursive)?;
            println!(
                "\n{} {} {}",
                "👀".cyan(),
                "Watching for changes in".bold(),
                folder.display()
            );
        }
        println!("{}", "Press Ctrl+C to stop\n".dimmed());

        self.event_loop(rx);
        Ok(())
    }

    fn event_loop(&mut self, rx: Receiver<Event>) {
        while let Ok(first) = rx.recv() {
            let mut changes: BTreeMap<PathBuf, FileChange> = BTreeMap::new();
            let mut record = |event: Event| {
                for path in event.paths {
                    if let Some(change) = classify(&path, &event.kind, path.exists()) {
                        let merged = merge(changes.get(&path).copied(), change);
                        changes.insert(path, merged);
                    }
                }
            };

            record(first);
            while let Ok(event) = rx.recv_timeout(Duration::from_millis(DEBOUNCE_MS)) {
                record(event);
            }

            if !changes.is_empty() {
                self.apply(changes);
            }
        }
    }

    /// Feed a batch of changes to the explorer
    pub fn apply(&mut self, changes: BTreeMap<PathBuf, FileChange>) {
        let mut rerun = Vec::new();

        for (path, change) in &changes {
            tracing::debug!(path = %path.display(), ?change, "file changed");
            match change {
                FileChange::Created => {
                    self.explorer.file_created(path);
                    rerun.push(path.clone());
                }
                FileChange::Modified => {
                    self.explorer.file_changed(path);
                    rerun.push(path.clone());
                }
                FileChange::Deleted => self.explorer.file_deleted(path),
                FileChange::Module => {
                    let root = self.explorer.tree().root();
                    self.explorer.resolve_children(root);
                }
            }
        }

        let names: Vec<String> = changes
            .keys()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .collect();
        println!(
            "\n{} {} {}",
            "↻".yellow(),
            "Files changed:".bold(),
            names.join(", ").dimmed()
        );
        println!(
            "{} {} function(s)",
            "✓".green(),
            report::function_count(self.explorer.tree())
        );

        if self.rerun && !rerun.is_empty() {
            self.rerun_files(&rerun);
        }

        println!("\n{}", "Watching for changes...".dimmed());
    }

    fn rerun_files(&mut self, files: &[PathBuf]) {
        let include: Vec<_> = files
            .iter()
            .filter_map(|path| self.explorer.tree().find(&TestKey::new(path, ItemKind::File)))
            .collect();
        if include.is_empty() {
            println!("{}", "No tests to run".dimmed());
            return;
        }

        println!("{} Running tests of {} file(s)...\n", "→".blue(), include.len());
        let (tx, rx) = mpsc::channel();
        let printer = thread::spawn(move || {
            for event in rx {
                report::print_event(&event);
            }
        });
        let run = self.explorer.run_with_events(&RunRequest::new(include), tx);
        let _ = printer.join();
        report::print_run(&run, self.explorer.tree());
    }
}
