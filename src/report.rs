//! Terminal rendering of the tree and of run results

use colored::{ColoredString, Colorize};

use crate::test_model::{ItemKind, NodeId, RunState, Severity, TestTree};
use crate::test_run::{ItemResult, RunEvent, TestRun};

/// Every node below the root in display order, with its depth
pub fn tree_lines(tree: &TestTree) -> Vec<(usize, NodeId)> {
    let mut lines = Vec::new();
    let mut stack: Vec<(usize, NodeId)> = tree
        .children(tree.root())
        .into_iter()
        .rev()
        .map(|id| (0, id))
        .collect();

    while let Some((depth, id)) = stack.pop() {
        lines.push((depth, id));
        stack.extend(tree.children(id).into_iter().rev().map(|c| (depth + 1, c)));
    }
    lines
}

/// Test, benchmark and example functions in the tree
pub fn function_count(tree: &TestTree) -> usize {
    tree.descendants(tree.root())
        .into_iter()
        .filter_map(|id| tree.get(id))
        .filter(|item| item.kind().is_function() && !item.is_subtest())
        .count()
}

fn kind_glyph(kind: ItemKind) -> ColoredString {
    match kind {
        ItemKind::Root => "".normal(),
        ItemKind::Module => "📦".normal(),
        ItemKind::Workspace => "🗂".normal(),
        ItemKind::Package => "📁".normal(),
        ItemKind::File => "📄".normal(),
        ItemKind::Test => "●".green(),
        ItemKind::Benchmark => "◆".yellow(),
        ItemKind::Example => "◇".cyan(),
    }
}

pub fn print_tree(tree: &TestTree) {
    let lines = tree_lines(tree);
    if lines.is_empty() {
        println!("  {}", "No Go tests found".dimmed());
        return;
    }

    for (depth, id) in lines {
        let Some(item) = tree.get(id) else {
            continue;
        };
        let label = match item.kind() {
            ItemKind::Module | ItemKind::Workspace => item.label.bold(),
            ItemKind::Package => item.label.cyan(),
            _ => item.label.normal(),
        };
        println!("{}{} {}", "  ".repeat(depth + 1), kind_glyph(item.kind()), label);
    }

    println!("\n{} {} function(s)", "✓".green(), function_count(tree));
}

pub fn colored_state(state: RunState) -> ColoredString {
    let text = format!("{} {}", state.symbol(), state.label());
    match state {
        RunState::Queued => text.dimmed(),
        RunState::Running => text.blue(),
        RunState::Passed => text.green(),
        RunState::Failed => text.red(),
        RunState::Skipped => text.yellow(),
        RunState::Errored => text.red().bold(),
    }
}

fn format_duration(duration_ms: Option<u64>) -> String {
    match duration_ms {
        Some(ms) => format!("({}ms)", ms).dimmed().to_string(),
        None => String::new(),
    }
}

/// Live status line for an event, or nothing for events not worth a line
pub fn print_event(event: &RunEvent) {
    match event {
        RunEvent::StateChanged {
            label,
            state,
            duration_ms,
            ..
        } if state.is_terminal() => {
            println!("  {} {} {}", colored_state(*state), label, format_duration(*duration_ms));
        }
        RunEvent::DirectoryFailed { dir, error } => {
            println!("  {} {} {}", "!".red().bold(), dir.display(), error.dimmed());
        }
        _ => {}
    }
}

fn print_item_messages(result: &ItemResult) {
    for message in &result.messages {
        let text = match message.severity {
            Severity::Error => message.message.red(),
            Severity::Warning => message.message.yellow(),
            Severity::Information | Severity::Hint => message.message.normal(),
        };
        match &message.location {
            Some(location) => println!(
                "      {} {}",
                format!("{}:{}", location.path.display(), location.position.line + 1).dimmed(),
                text
            ),
            None => println!("      {}", text),
        }
    }
}

/// Failures with their messages, then the totals
pub fn print_run(run: &TestRun, tree: &TestTree) {
    let results = run.results(tree);

    let failed: Vec<&ItemResult> = results
        .iter()
        .filter(|r| r.state == Some(RunState::Failed))
        .collect();
    if !failed.is_empty() {
        println!("\n{}", "Failures:".bold());
        for result in failed {
            println!("  {} {}", "✗".red(), result.label.red());
            print_item_messages(result);
        }
    }

    let benchmarks: Vec<&ItemResult> = results
        .iter()
        .filter(|r| r.kind.contains("benchmark") && !r.messages.is_empty())
        .collect();
    if !benchmarks.is_empty() {
        println!("\n{}", "Benchmarks:".bold());
        for result in benchmarks {
            println!("  {} {}", "◆".yellow(), result.label);
            print_item_messages(result);
        }
    }

    let summary = run.summary();
    let elapsed = run
        .finished_at()
        .map(|end| (end - run.started_at()).num_milliseconds())
        .unwrap_or_default();

    println!();
    if summary.failed > 0 || !run.errors().is_empty() {
        println!(
            "{} {} passed, {} failed, {} skipped {}",
            "✗".red(),
            summary.passed.to_string().green(),
            summary.failed.to_string().red(),
            summary.skipped.to_string().yellow(),
            format!("({}ms)", elapsed).dimmed()
        );
    } else {
        println!(
            "{} {} passed, {} skipped {}",
            "✓".green(),
            summary.passed.to_string().green(),
            summary.skipped.to_string().yellow(),
            format!("({}ms)", elapsed).dimmed()
        );
    }
    if summary.incomplete > 0 {
        println!("  {} {} did not finish", "⚠".yellow(), summary.incomplete);
    }
}
