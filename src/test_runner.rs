//! Test runner module
//!
//! Executes `go test -json` and streams its output line by line to a
//! consumer as the process produces it.

use serde::Deserialize;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use crate::error::{ExplorerError, Result};

/// Action of a `go test -json` record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestAction {
    Run,
    Pass,
    Fail,
    Skip,
    Output,
    /// pause, cont, bench, start and anything newer toolchains add
    #[serde(other)]
    Other,
}

/// One record of `go test -json` output (`test2json` format)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GoTestEvent {
    pub action: TestAction,
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    /// Seconds
    #[serde(default)]
    pub elapsed: Option<f64>,
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
}

impl GoTestEvent {
    pub fn new(action: TestAction, test: Option<&str>) -> Self {
        Self {
            action,
            test: test.map(str::to_string),
            output: None,
            elapsed: None,
            package: None,
            time: None,
        }
    }

    pub fn with_output(mut self, output: &str) -> Self {
        self.output = Some(output.to_string());
        self
    }

    pub fn with_elapsed(mut self, seconds: f64) -> Self {
        self.elapsed = Some(seconds);
        self
    }
}

/// A line of runner output: a structured record or free text
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRecord {
    Event(GoTestEvent),
    Text(String),
}

impl StreamRecord {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim_start();
        if trimmed.starts_with('{') {
            if let Ok(event) = serde_json::from_str::<GoTestEvent>(trimmed) {
                return StreamRecord::Event(event);
            }
        }
        StreamRecord::Text(line.to_string())
    }

    /// Text to show in an output panel, if any
    pub fn display_text(&self) -> Option<&str> {
        match self {
            StreamRecord::Event(event) => event.output.as_deref(),
            StreamRecord::Text(text) => Some(text),
        }
    }
}

/// Parameters of one runner invocation
#[derive(Debug, Clone)]
pub struct RunnerInvocation {
    /// Package directory the runner works in
    pub dir: PathBuf,
    /// Top-level function names to run
    pub functions: Vec<String>,
    pub flags: Vec<String>,
    pub benchmark: bool,
}

impl RunnerInvocation {
    /// Arguments for `go`, starting with the `test` subcommand
    pub fn go_args(&self) -> Vec<String> {
        let mut args = vec!["test".to_string(), "-json".to_string()];
        args.extend(self.flags.iter().cloned());

        let pattern = format!("^({})$", self.functions.join("|"));
        if self.benchmark {
            args.push("-benchmem".to_string());
            args.push("-run=^$".to_string());
            args.push(format!("-bench={}", pattern));
        } else {
            args.push(format!("-run={}", pattern));
        }
        args
    }
}

/// The external process that executes tests
pub trait TestRunner {
    /// Run to completion, handing every output line to `consumer` as it arrives.
    fn run(&mut self, invocation: &RunnerInvocation, consumer: &mut dyn FnMut(StreamRecord)) -> Result<()>;
}

/// Runs `go test -json` as a child process
pub struct GoTestRunner {
    go: String,
}

impl GoTestRunner {
    pub fn new(go: &str) -> Self {
        Self { go: go.to_string() }
    }
}

impl Default for GoTestRunner {
    fn default() -> Self {
        Self::new("go")
    }
}

impl TestRunner for GoTestRunner {
    fn run(&mut self, invocation: &RunnerInvocation, consumer: &mut dyn FnMut(StreamRecord)) -> Result<()> {
        let dir = invocation.dir.as_path();
        let args = invocation.go_args();
        tracing::debug!(dir = %dir.display(), ?args, "spawning go test");

        let mut child = Command::new(&self.go)
            .args(&args)
            .current_dir(dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExplorerError::RunnerSpawn {
                dir: dir.to_path_buf(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| missing_pipe(dir, "stdout"))?;
        let mut stderr = child.stderr.take().ok_or_else(|| missing_pipe(dir, "stderr"))?;

        // Drain stderr concurrently so a chatty build cannot block stdout
        let stderr_reader = thread::spawn(move || {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text);
            text
        });

        // Lines are read as bytes so stray non-UTF-8 output cannot end the stream
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let mut stream_error = None;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    consumer(StreamRecord::parse(line.trim_end_matches(|c: char| c == '\r' || c == '\n')));
                }
                Err(source) => {
                    stream_error = Some(source);
                    break;
                }
            }
        }

        if let Ok(text) = stderr_reader.join() {
            for line in text.lines() {
                consumer(StreamRecord::Text(line.to_string()));
            }
        }

        if let Some(source) = stream_error {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ExplorerError::RunnerStream {
                dir: dir.to_path_buf(),
                source,
            });
        }

        let status = child.wait().map_err(|source| ExplorerError::RunnerStream {
            dir: dir.to_path_buf(),
            source,
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(ExplorerError::RunnerExit {
                dir: dir.to_path_buf(),
                code: status.code(),
            })
        }
    }
}

fn missing_pipe(dir: &Path, name: &str) -> ExplorerError {
    ExplorerError::RunnerStream {
        dir: dir.to_path_buf(),
        source: std::io::Error::other(format!("failed to capture {}", name)),
    }
}
