//! Test output annotation
//!
//! Turns `file.go:123: message` lines from captured test output into
//! diagnostics at the reported location.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use crate::test_model::{Location, Position, Severity, TestMessage};

static FILE_AND_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?P<file>.*\.go):(?P<line>\d+): ?(?P<message>.*)$").unwrap());

static CONTINUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+(?:(?P<name>[^:\t]+?):\s+)?(?P<message>.*)$").unwrap());

#[derive(Debug, Default)]
struct Pending {
    all: Vec<String>,
    error: Option<Vec<String>>,
}

/// Extract located messages from the output captured for one test.
///
/// `test_file` is the file declaring the test; reported file names are
/// resolved against its directory.
pub fn annotate<S: AsRef<str>>(output: &[S], test_file: &Path) -> Vec<TestMessage> {
    let mut parsed: Vec<(String, Pending)> = Vec::new();
    let mut current: Option<usize> = None;

    for line in output.iter().flat_map(|chunk| chunk.as_ref().lines()) {
        if let Some(caps) = FILE_AND_LINE.captures(line) {
            let location = format!("{}:{}", &caps["file"], &caps["line"]);
            let pending = Pending {
                all: vec![caps["message"].to_string()],
                error: None,
            };

            // A repeated location replaces the message but keeps its slot
            let index = match parsed.iter().position(|(loc, _)| *loc == location) {
                Some(index) => {
                    parsed[index].1 = pending;
                    index
                }
                None => {
                    parsed.push((location, pending));
                    parsed.len() - 1
                }
            };
            current = Some(index);
            continue;
        }

        let Some(index) = current else {
            continue;
        };
        let Some(caps) = CONTINUATION.captures(line) else {
            continue;
        };

        let message = caps["message"].to_string();
        let pending = &mut parsed[index].1;
        pending.all.push(message.clone());

        match caps.name("name").map(|n| n.as_str().trim()) {
            Some("Error") => pending.error = Some(vec![message]),
            Some(_) => {}
            None => {
                if let Some(error) = pending.error.as_mut() {
                    error.push(message);
                }
            }
        }
    }

    let dir = test_file.parent().unwrap_or(test_file);
    parsed
        .into_iter()
        .filter_map(|(location, pending)| {
            let (file, line) = location.rsplit_once(':')?;
            let line: u32 = line.parse().ok()?;

            let text = pending.error.as_ref().unwrap_or(&pending.all).join("\n");
            let message = text
                .trim()
                .lines()
                .next()
                .unwrap_or("")
                .trim_end_matches(|c: char| c == ':' || c.is_whitespace())
                .to_string();

            Some(TestMessage {
                message,
                severity: if pending.error.is_some() {
                    Severity::Error
                } else {
                    Severity::Information
                },
                location: Some(Location {
                    path: dir.join(file),
                    position: Position::new(line.saturating_sub(1), 0),
                }),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_error_line_wins() {
        let output = ["file.go:10: boom\n", "\tError: bad thing\n"];
        let messages = annotate(&output, Path::new("/ws/pkg/file_test.go"));

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message, "bad thing");
        assert_eq!(messages[0].severity, Severity::Error);
        let location = messages[0].location.as_ref().unwrap();
        assert_eq!(location.path, PathBuf::from("/ws/pkg/file.go"));
        assert_eq!(location.position, Position::new(9, 0));
    }

    #[test]
    fn test_single_string_with_embedded_newlines() {
        let output = ["file.go:10: boom\n\tError: bad thing\n"];
        let messages = annotate(&output, Path::new("/ws/pkg/file_test.go"));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message, "bad thing");
    }

    #[test]
    fn test_plain_log_is_informational() {
        let output = [
            "    foo_test.go:42: got 3, want 4\n",
            "        continued detail\n",
            "ok  \texample.com/foo\t0.01s\n",
        ];
        let messages = annotate(&output, Path::new("/ws/foo/foo_test.go"));

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message, "got 3, want 4");
        assert_eq!(messages[0].severity, Severity::Information);
        assert_eq!(
            messages[0].location.as_ref().unwrap().position,
            Position::new(41, 0)
        );
    }

    #[test]
    fn test_testify_style_block() {
        let output = [
            "    calc_test.go:17: \n",
            "        \tError Trace:\tcalc_test.go:17\n",
            "        \tError:      \tNot equal: \n",
            "        \t            \texpected: 1\n",
            "        \tTest:       \tTestCalc\n",
        ];
        let messages = annotate(&output, Path::new("/ws/calc/calc_test.go"));

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].severity, Severity::Error);
        assert_eq!(messages[0].message, "Not equal");
    }

    #[test]
    fn test_multiple_locations_keep_order() {
        let output = [
            "a_test.go:5: first\n",
            "b_test.go:7: second\n",
            "a_test.go:5: replaced\n",
        ];
        let messages = annotate(&output, Path::new("/ws/a_test.go"));

        let texts: Vec<_> = messages.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["replaced", "second"]);
    }

    #[test]
    fn test_lines_before_any_location_are_ignored() {
        let output = ["\tError: orphan\n", "panic: boom\n"];
        assert!(annotate(&output, Path::new("/ws/a_test.go")).is_empty());
    }
}
