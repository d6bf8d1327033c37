//! Breadth-first directory walking
//!
//! The callback steers the walk through [`WalkStop`]. Hidden entries are
//! never reported and every visible subdirectory is queued for the next
//! level, whatever the callback says about the current directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::workspace::{FileSystem, FileType};

pub const MODULE_FILE: &str = "go.mod";
pub const SOURCE_SUFFIX: &str = ".go";
pub const TEST_FILE_SUFFIX: &str = "_test.go";

/// Reasons to stop walking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalkStop {
    /// Keep going
    #[default]
    Continue,
    /// Stop the entire walk
    Abort,
    /// No more callbacks for the current directory
    Current,
    /// Skip the remaining files of the current directory
    Files,
    /// Skip the remaining directories of the current directory
    Directories,
}

pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

pub fn is_test_file(name: &str) -> bool {
    name.ends_with(TEST_FILE_SUFFIX)
}

/// Walk `root` breadth first, calling `visit(dir, name, type)` per entry.
pub fn walk<F>(fs: &dyn FileSystem, root: &Path, mut visit: F) -> Result<()>
where
    F: FnMut(&Path, &str, FileType) -> Result<WalkStop>,
{
    let mut level = vec![root.to_path_buf()];

    while !level.is_empty() {
        let mut next = Vec::new();

        for dir in level {
            let entries: Vec<(String, FileType)> = fs
                .read_directory(&dir)?
                .into_iter()
                .filter(|(name, _)| !is_hidden(name))
                .collect();

            next.extend(
                entries
                    .iter()
                    .filter(|(_, t)| *t == FileType::Directory)
                    .map(|(name, _)| dir.join(name)),
            );

            let mut skip_files = false;
            let mut skip_dirs = false;
            for (name, file_type) in &entries {
                if (skip_files && *file_type == FileType::File)
                    || (skip_dirs && *file_type == FileType::Directory)
                {
                    continue;
                }

                match visit(&dir, name, *file_type)? {
                    WalkStop::Continue => {}
                    WalkStop::Abort => return Ok(()),
                    WalkStop::Current => break,
                    WalkStop::Files => skip_files = true,
                    WalkStop::Directories => skip_dirs = true,
                }

                if skip_files && skip_dirs {
                    break;
                }
            }
        }

        level = next;
    }

    Ok(())
}

/// Find module roots below `root`.
///
/// Maps each directory holding a go.mod to `true`, and each other directory
/// holding Go sources to `false`.
pub fn walk_workspaces(fs: &dyn FileSystem, root: &Path) -> Result<BTreeMap<PathBuf, bool>> {
    let mut found = BTreeMap::new();
    walk(fs, root, |dir, name, file_type| {
        if file_type != FileType::File {
            return Ok(WalkStop::Continue);
        }

        if name == MODULE_FILE {
            found.insert(dir.to_path_buf(), true);
            return Ok(WalkStop::Current);
        }

        if name.ends_with(SOURCE_SUFFIX) {
            found.entry(dir.to_path_buf()).or_insert(false);
        }
        Ok(WalkStop::Continue)
    })?;
    Ok(found)
}

/// Every directory below `root` (inclusive) containing a test file, once each
pub fn walk_packages(fs: &dyn FileSystem, root: &Path) -> Result<Vec<PathBuf>> {
    let mut packages = Vec::new();
    walk(fs, root, |dir, name, file_type| {
        if file_type == FileType::File && is_test_file(name) {
            packages.push(dir.to_path_buf());
            return Ok(WalkStop::Files);
        }
        Ok(WalkStop::Continue)
    })?;
    Ok(packages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::MemoryFileSystem;

    fn sample_fs() -> MemoryFileSystem {
        let fs = MemoryFileSystem::new();
        fs.insert("/ws/go.mod", "module example.com/ws\n");
        fs.insert("/ws/main.go", "package main\n");
        fs.insert("/ws/a/a_test.go", "package a\n");
        fs.insert("/ws/a/b_test.go", "package a\n");
        fs.insert("/ws/a/deep/c_test.go", "package deep\n");
        fs.insert("/ws/nested/go.mod", "module example.com/nested\n");
        fs.insert("/ws/nested/n_test.go", "package nested\n");
        fs.insert("/ws/loose/x.go", "package loose\n");
        fs.insert("/ws/.git/hooks/h_test.go", "package hooks\n");
        fs
    }

    #[test]
    fn test_walk_is_breadth_first_and_skips_hidden() {
        let fs = sample_fs();
        let mut seen = Vec::new();
        walk(&fs, Path::new("/ws"), |dir, name, _| {
            seen.push(dir.join(name));
            Ok(WalkStop::Continue)
        })
        .unwrap();

        let depth = |p: &PathBuf| p.components().count();
        assert!(seen.windows(2).all(|w| depth(&w[0]) <= depth(&w[1])));
        assert!(seen.iter().all(|p| !p.to_string_lossy().contains(".git")));
        assert!(seen.contains(&PathBuf::from("/ws/a/deep/c_test.go")));
    }

    #[test]
    fn test_abort_stops_everything() {
        let fs = sample_fs();
        let mut count = 0;
        walk(&fs, Path::new("/ws"), |_, _, _| {
            count += 1;
            Ok(WalkStop::Abort)
        })
        .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_current_still_descends() {
        let fs = sample_fs();
        let mut seen = Vec::new();
        walk(&fs, Path::new("/ws"), |dir, name, _| {
            seen.push(dir.join(name));
            if dir == Path::new("/ws") {
                return Ok(WalkStop::Current);
            }
            Ok(WalkStop::Continue)
        })
        .unwrap();

        // Only the first entry of /ws was reported, but its subdirectories were walked.
        assert_eq!(seen.iter().filter(|p| p.parent() == Some(Path::new("/ws"))).count(), 1);
        assert!(seen.contains(&PathBuf::from("/ws/nested/n_test.go")));
    }

    #[test]
    fn test_files_and_directories_short_circuit() {
        let fs = MemoryFileSystem::new();
        fs.insert("/r/a.go", "");
        fs.insert("/r/b.go", "");
        fs.insert("/r/c/x.go", "");
        fs.insert("/r/d/y.go", "");

        let mut at_root = Vec::new();
        walk(&fs, Path::new("/r"), |dir, name, file_type| {
            if dir != Path::new("/r") {
                return Ok(WalkStop::Continue);
            }
            at_root.push(name.to_string());
            Ok(match file_type {
                FileType::File => WalkStop::Files,
                _ => WalkStop::Directories,
            })
        })
        .unwrap();

        assert_eq!(at_root, vec!["a.go", "c"]);
    }

    #[test]
    fn test_walk_workspaces_finds_modules() {
        let fs = sample_fs();
        let found = walk_workspaces(&fs, Path::new("/ws")).unwrap();

        assert_eq!(found.get(Path::new("/ws")), Some(&true));
        assert_eq!(found.get(Path::new("/ws/nested")), Some(&true));
        assert_eq!(found.get(Path::new("/ws/loose")), Some(&false));
        assert_eq!(found.get(Path::new("/ws/a")), Some(&false));
    }

    #[test]
    fn test_walk_packages_reports_each_directory_once() {
        let fs = sample_fs();
        let packages = walk_packages(&fs, Path::new("/ws")).unwrap();
        assert_eq!(
            packages,
            vec![
                PathBuf::from("/ws/a"),
                PathBuf::from("/ws/nested"),
                PathBuf::from("/ws/a/deep"),
            ]
        );
    }

    #[test]
    fn test_listing_errors_propagate() {
        let fs = MemoryFileSystem::new();
        assert!(walk_packages(&fs, Path::new("/missing")).is_err());
    }
}
