use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use glob::Pattern;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use tracing_subscriber::EnvFilter;

use gotestx::config::CONFIG_FILE;
use gotestx::explorer::ROOT_LABEL;
use gotestx::report;
use gotestx::test_run::{DirectoryError, ItemResult, RunSummary};
use gotestx::watcher::ExplorerWatcher;
use gotestx::{
    ExplorerConfig, GoSymbolProvider, GoTestRunner, ItemKind, NodeId, OsFileSystem, RunRequest, TestExplorer,
    Workspace, WorkspaceFolder,
};

const LOG_ENV: &str = "GOTESTX_LOG";

#[derive(Parser)]
#[command(name = "gotestx")]
#[command(about = "Go test explorer: discover, watch and run Go tests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (default: gotestx.toml in the current directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover everything and print the test tree
    Tree {
        /// Workspace folders (default: current directory)
        folders: Vec<PathBuf>,
    },

    /// Run tests, benchmarks and examples
    Run {
        /// Workspace folders (default: current directory)
        folders: Vec<PathBuf>,

        /// Only run functions whose name matches this glob
        #[arg(short, long)]
        filter: Option<String>,

        /// Skip functions whose name matches this glob
        #[arg(short = 'x', long)]
        exclude: Option<String>,

        /// Include benchmarks
        #[arg(long)]
        benchmarks: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Watch folders and keep the tree in sync
    Watch {
        /// Workspace folders (default: current directory)
        folders: Vec<PathBuf>,

        /// Re-run the tests of changed files
        #[arg(long)]
        run: bool,
    },
}

fn main() {
    init_logging();

    if let Err(e) = run() {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => ExplorerConfig::load(path)
            .with_context(|| format!("Could not load {}", path.display()))?,
        None => {
            let cwd = std::env::current_dir().context("Could not determine the current directory")?;
            ExplorerConfig::discover(&cwd)
                .with_context(|| format!("Could not load {}", cwd.join(CONFIG_FILE).display()))?
        }
    };

    match cli.command {
        Commands::Tree { folders } => cmd_tree(config, &folders),
        Commands::Run {
            folders,
            filter,
            exclude,
            benchmarks,
            json,
        } => cmd_run(config, &folders, filter, exclude, benchmarks, json),
        Commands::Watch { folders, run } => cmd_watch(config, &folders, run),
    }
}

fn workspace_folders(folders: &[PathBuf]) -> Result<Vec<WorkspaceFolder>> {
    let folders = if folders.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        folders.to_vec()
    };

    folders
        .iter()
        .map(|path| {
            std::fs::canonicalize(path)
                .map(WorkspaceFolder::new)
                .with_context(|| format!("Could not find folder: {}", path.display()))
        })
        .collect()
}

fn build_explorer(config: ExplorerConfig, folders: &[PathBuf]) -> Result<TestExplorer> {
    let folders = workspace_folders(folders)?;
    let symbols = GoSymbolProvider::new().context("Failed to set up the Go parser")?;
    let runner = GoTestRunner::new(&config.go);
    let workspace = Workspace::new(OsFileSystem, folders);

    Ok(TestExplorer::new(workspace, symbols, runner, config)
        .with_error_sink(|e| {
            if e.is_runner_error() {
                eprintln!("{} {}", "✗".red(), e);
            } else {
                eprintln!("{} {}", "⚠".yellow(), e);
            }
        }))
}

fn cmd_tree(config: ExplorerConfig, folders: &[PathBuf]) -> Result<()> {
    let mut explorer = build_explorer(config, folders)?;
    explorer.resolve_all();

    println!("\n{} {}\n", "🧪".cyan(), ROOT_LABEL.bold());
    report::print_tree(explorer.tree());
    Ok(())
}

/// Items to run for the given name filters
fn select(explorer: &TestExplorer, filter: Option<&Pattern>, exclude: Option<&Pattern>) -> RunRequest {
    let tree = explorer.tree();
    let root = tree.root();
    let mut include = Vec::new();
    let mut excluded = Vec::new();

    for id in tree.descendants(root) {
        let Some(item) = tree.get(id) else {
            continue;
        };
        if !item.kind().is_function() || item.is_subtest() {
            continue;
        }
        let Some(name) = item.key.name.as_deref() else {
            continue;
        };

        if exclude.map_or(false, |p| p.matches(name)) {
            excluded.push(id);
            continue;
        }
        let wanted = item.kind() != ItemKind::Benchmark || explorer.config().run_benchmarks;
        if wanted && filter.map_or(false, |p| p.matches(name)) {
            include.push(id);
        }
    }

    let include: Vec<NodeId> = if filter.is_some() { include } else { vec![root] };
    RunRequest::new(include).excluding(excluded)
}

#[derive(Serialize)]
struct JsonReport<'a> {
    started_at: String,
    finished_at: Option<String>,
    summary: RunSummary,
    errors: &'a [DirectoryError],
    results: Vec<ItemResult>,
}

fn cmd_run(
    mut config: ExplorerConfig,
    folders: &[PathBuf],
    filter: Option<String>,
    exclude: Option<String>,
    benchmarks: bool,
    json: bool,
) -> Result<()> {
    let filter = filter
        .as_deref()
        .map(Pattern::new)
        .transpose()
        .context("Invalid --filter pattern")?;
    let exclude = exclude
        .as_deref()
        .map(Pattern::new)
        .transpose()
        .context("Invalid --exclude pattern")?;

    config.run_benchmarks |= benchmarks;
    let mut explorer = build_explorer(config, folders)?;
    explorer.resolve_all();

    let request = select(&explorer, filter.as_ref(), exclude.as_ref());
    if request.include.is_empty() {
        anyhow::bail!("No tests match the filter");
    }

    if !json {
        println!("\n{} Running {} ...\n", "→".blue(), describe_request(&explorer, &request).dimmed());
    }

    let (tx, rx) = mpsc::channel();
    let printer = thread::spawn(move || {
        for event in rx {
            if !json {
                report::print_event(&event);
            }
        }
    });
    let run = explorer.run_with_events(&request, tx);
    let _ = printer.join();

    if json {
        let document = JsonReport {
            started_at: run.started_at().to_rfc3339(),
            finished_at: run.finished_at().map(|t| t.to_rfc3339()),
            summary: run.summary(),
            errors: run.errors(),
            results: run.results(explorer.tree()),
        };
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        report::print_run(&run, explorer.tree());
    }

    // Exit with error code if anything failed
    if run.summary().failed > 0 || !run.errors().is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn describe_request(explorer: &TestExplorer, request: &RunRequest) -> String {
    if request.include == [explorer.tree().root()] {
        return "all tests".to_string();
    }
    format!("{} function(s)", request.include.len())
}

fn cmd_watch(config: ExplorerConfig, folders: &[PathBuf], rerun: bool) -> Result<()> {
    let mut explorer = build_explorer(config, folders)?;
    ExplorerWatcher::new(&mut explorer, rerun).start()
}
