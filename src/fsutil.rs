// src/fsutil.rs

//! Filesystem primitives: atomic writes, tree copies, gitignore filtering
//!
//! Every persistent write in the workspace goes through the temp + rename
//! discipline so a crash never leaves a partial entry visible.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::Result;

/// Write `content` to `path` atomically (temp file in the same directory,
/// fsync, rename).
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    let tmp = parent.join(format!(
        ".{}.tmp",
        path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
    ));
    let mut file = File::create(&tmp)?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    Ok(())
}

/// Move a path atomically, falling back to copy + fsync + delete when source
/// and destination live on different filesystems (EXDEV).
pub fn move_path_atomic(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            debug!("cross-filesystem move {} -> {}", src.display(), dst.display());
            if src.is_dir() {
                copy_tree(src, dst, &CopyFilter::everything())
                    .map_err(|e| io::Error::other(e.to_string()))?;
                fs::remove_dir_all(src)?;
            } else {
                fs::copy(src, dst)?;
                let file = File::open(dst)?;
                file.sync_all()?;
                drop(file);
                fs::remove_file(src)?;
            }
            // Persist the directory entry too; not all filesystems support this
            if let Some(parent) = dst.parent() {
                if let Ok(dir) = File::open(parent) {
                    let _ = dir.sync_all();
                }
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Path filter applied during tree copies.
///
/// Always excludes `.git`. Optionally honors a set of gitignore patterns
/// read from the source tree.
pub struct CopyFilter {
    patterns: Vec<IgnorePattern>,
    keep_vcs: bool,
}

impl CopyFilter {
    /// Filter that only excludes VCS metadata
    pub fn none() -> Self {
        Self { patterns: Vec::new(), keep_vcs: false }
    }

    /// Filter that copies everything, `.git` included (moving working trees)
    pub fn everything() -> Self {
        Self { patterns: Vec::new(), keep_vcs: true }
    }

    /// Filter honoring the root `.gitignore` of `src`, if present
    pub fn respecting_gitignore(src: &Path) -> Result<Self> {
        let gitignore = src.join(".gitignore");
        if !gitignore.exists() {
            return Ok(Self::none());
        }
        let content = fs::read_to_string(&gitignore)?;
        Ok(Self { patterns: parse_gitignore(&content), keep_vcs: false })
    }

    /// Whether the relative path should be skipped
    pub fn excludes(&self, rel: &Path, is_dir: bool) -> bool {
        if !self.keep_vcs && rel.components().any(|c| c.as_os_str() == ".git") {
            return true;
        }
        let mut excluded = false;
        for pattern in &self.patterns {
            if pattern.matches(rel, is_dir) {
                excluded = !pattern.negated;
            }
        }
        excluded
    }
}

/// One parsed gitignore line
struct IgnorePattern {
    regex: regex::Regex,
    dir_only: bool,
    negated: bool,
}

impl IgnorePattern {
    fn matches(&self, rel: &Path, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        let path = rel.to_string_lossy();
        if self.regex.is_match(&path) {
            return true;
        }
        // A pattern matching a directory matches everything beneath it
        rel.ancestors()
            .skip(1)
            .filter(|a| !a.as_os_str().is_empty())
            .any(|a| self.regex.is_match(&a.to_string_lossy()))
    }
}

/// Translate root-level gitignore lines into anchored regexes.
///
/// Supports the common subset: `*` / `?` globs, trailing `/` for
/// directory-only, leading `/` for root anchoring, `!` negation,
/// `**` path wildcards. Comments and blanks are skipped.
fn parse_gitignore(content: &str) -> Vec<IgnorePattern> {
    let mut patterns = Vec::new();
    for line in content.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (negated, line) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let (dir_only, line) = match line.strip_suffix('/') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let (anchored, line) = match line.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (line.contains('/'), line),
        };

        let mut regex = String::from("^");
        if !anchored {
            regex.push_str("(?:.*/)?");
        }
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        // `**/` or bare `**` spans directories
                        if chars.peek() == Some(&'/') {
                            chars.next();
                            regex.push_str("(?:.*/)?");
                        } else {
                            regex.push_str(".*");
                        }
                    } else {
                        regex.push_str("[^/]*");
                    }
                }
                '?' => regex.push_str("[^/]"),
                c => regex.push_str(&regex::escape(&c.to_string())),
            }
        }
        regex.push('$');

        if let Ok(regex) = regex::Regex::new(&regex) {
            patterns.push(IgnorePattern { regex, dir_only, negated });
        }
    }
    patterns
}

/// Copy a directory tree, applying the filter, preserving file modes.
pub fn copy_tree(src: &Path, dst: &Path, filter: &CopyFilter) -> Result<u64> {
    use std::os::unix::fs::PermissionsExt;

    let mut copied = 0u64;
    fs::create_dir_all(dst)?;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| io::Error::other(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let meta = entry.path().symlink_metadata()?;

        if filter.excludes(rel, meta.is_dir()) {
            continue;
        }
        // Files inside an excluded directory
        if rel.ancestors().skip(1).any(|a| {
            !a.as_os_str().is_empty() && filter.excludes(a, true)
        }) {
            continue;
        }

        let target = dst.join(rel);
        if meta.file_type().is_symlink() {
            let link = fs::read_link(entry.path())?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            std::os::unix::fs::symlink(&link, &target)?;
        } else if meta.is_dir() {
            fs::create_dir_all(&target)?;
            fs::set_permissions(&target, fs::Permissions::from_mode(meta.permissions().mode()))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Stage a tree copy next to `dst` and swap it into place atomically.
///
/// An existing `dst` is replaced only after the staged copy completed.
pub fn replace_tree_atomic(src: &Path, dst: &Path, filter: &CopyFilter) -> Result<()> {
    let parent = dst.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;
    let stage = parent.join(format!(
        ".{}.staging",
        dst.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
    ));
    if stage.exists() {
        fs::remove_dir_all(&stage)?;
    }

    copy_tree(src, &stage, filter)?;

    if dst.exists() {
        let doomed = parent.join(format!(
            ".{}.old",
            dst.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
        ));
        if doomed.exists() {
            fs::remove_dir_all(&doomed)?;
        }
        fs::rename(dst, &doomed)?;
        fs::rename(&stage, dst)?;
        fs::remove_dir_all(&doomed)?;
    } else {
        fs::rename(&stage, dst)?;
    }
    Ok(())
}

/// Total size in bytes of a file or directory tree
pub fn path_size(path: &Path) -> u64 {
    if path.is_file() {
        return path.metadata().map(|m| m.len()).unwrap_or(0);
    }
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Whether a directory exists and contains at least one entry
pub fn dir_non_empty(path: &Path) -> bool {
    path.is_dir()
        && fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deep/file.yaml");
        atomic_write(&path, b"key: value\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "key: value\n");
    }

    #[test]
    fn test_atomic_write_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
    }

    #[test]
    fn test_copy_tree_excludes_git() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join("code.rs"), "fn main() {}").unwrap();
        fs::create_dir(src.path().join(".git")).unwrap();
        fs::write(src.path().join(".git/config"), "[core]").unwrap();

        let target = dst.path().join("out");
        copy_tree(src.path(), &target, &CopyFilter::none()).unwrap();

        assert!(target.join("code.rs").exists());
        assert!(!target.join(".git").exists());
    }

    #[test]
    fn test_gitignore_patterns() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join(".gitignore"), "*.log\nbuild/\n/secrets.txt\n!keep.log\n")
            .unwrap();
        let filter = CopyFilter::respecting_gitignore(src.path()).unwrap();

        assert!(filter.excludes(Path::new("debug.log"), false));
        assert!(filter.excludes(Path::new("sub/debug.log"), false));
        assert!(!filter.excludes(Path::new("keep.log"), false));
        assert!(filter.excludes(Path::new("build"), true));
        assert!(filter.excludes(Path::new("secrets.txt"), false));
        assert!(!filter.excludes(Path::new("sub/secrets.txt"), false));
        assert!(!filter.excludes(Path::new("main.rs"), false));
    }

    #[test]
    fn test_copy_tree_respects_gitignore() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join(".gitignore"), "*.log\nnode_modules/\n").unwrap();
        fs::write(src.path().join("app.js"), "console.log(1)").unwrap();
        fs::write(src.path().join("debug.log"), "noise").unwrap();
        fs::create_dir(src.path().join("node_modules")).unwrap();
        fs::write(src.path().join("node_modules/pkg.js"), "x").unwrap();

        let target = dst.path().join("out");
        let filter = CopyFilter::respecting_gitignore(src.path()).unwrap();
        copy_tree(src.path(), &target, &filter).unwrap();

        assert!(target.join("app.js").exists());
        assert!(!target.join("debug.log").exists());
        assert!(!target.join("node_modules").exists());
    }

    #[test]
    fn test_replace_tree_atomic_swaps() {
        let src = tempfile::tempdir().unwrap();
        let dst_root = tempfile::tempdir().unwrap();
        let dst = dst_root.path().join("component");

        fs::write(src.path().join("v1.txt"), "1").unwrap();
        replace_tree_atomic(src.path(), &dst, &CopyFilter::none()).unwrap();
        assert!(dst.join("v1.txt").exists());

        fs::remove_file(src.path().join("v1.txt")).unwrap();
        fs::write(src.path().join("v2.txt"), "2").unwrap();
        replace_tree_atomic(src.path(), &dst, &CopyFilter::none()).unwrap();
        assert!(dst.join("v2.txt").exists());
        assert!(!dst.join("v1.txt").exists());
    }

    #[test]
    fn test_path_size() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), vec![0u8; 100]).unwrap();
        fs::write(dir.path().join("b"), vec![0u8; 50]).unwrap();
        assert_eq!(path_size(dir.path()), 150);
    }
}
