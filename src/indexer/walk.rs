//! Repository walking.
//!
//! Enumerates indexable source files (extension allow-list) and project
//! documentation files under the index root, pruning configured directories
//! and exclude globs. Paths are returned relative to the root with `/`
//! separators, sorted for deterministic ordering.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use codectx_core::chunk::is_documentation_file;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::config::IndexConfig;

/// A file found under the repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFile {
    /// Root-relative path with `/` separators.
    pub path: String,
    pub abs: PathBuf,
}

/// Files of one repository walk.
#[derive(Debug, Clone, Default)]
pub struct RepoFiles {
    pub sources: Vec<RepoFile>,
    pub docs: Vec<RepoFile>,
    /// Entries the walk could not read, such as dangling symlinks.
    pub skipped: usize,
}

pub fn scan_repository(config: &IndexConfig) -> Result<RepoFiles> {
    let root = &config.root;
    if !root.is_dir() {
        bail!("Index root does not exist: {}", root.display());
    }

    let exclude_set = build_globset(&config.exclude_globs)?;
    let mut files = RepoFiles::default();

    let walker = WalkDir::new(root)
        .follow_links(config.follow_symlinks)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e, &config.skip_dirs));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                warn!(path = %path, error = %e, "skipping unreadable entry");
                files.skipped += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = relative_path(root, entry.path());
        if exclude_set.is_match(&rel) {
            continue;
        }

        let file = RepoFile {
            abs: entry.path().to_path_buf(),
            path: rel,
        };
        if has_allowed_extension(&file.path, &config.extensions) {
            files.sources.push(file);
        } else if is_documentation_file(&file.path) {
            files.docs.push(file);
        }
    }

    files.sources.sort_by(|a, b| a.path.cmp(&b.path));
    files.docs.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Whether a root-relative path would be picked up by [`scan_repository`]
/// as a source file.
pub fn is_indexable(config: &IndexConfig, rel: &str) -> bool {
    if !has_allowed_extension(rel, &config.extensions) {
        return false;
    }
    let mut dirs: Vec<&str> = rel.split('/').collect();
    dirs.pop();
    if dirs.iter().any(|d| config.skip_dirs.iter().any(|s| s == d)) {
        return false;
    }
    match build_globset(&config.exclude_globs) {
        Ok(set) => !set.is_match(rel),
        Err(_) => true,
    }
}

/// Normalize a user-supplied path (absolute or root-relative) to the
/// root-relative `/`-separated form used as index keys.
pub fn normalize_changed_path(root: &Path, path: &str) -> String {
    let p = Path::new(path);
    if p.is_absolute() {
        let canonical_root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        if let Ok(rel) = p.strip_prefix(&canonical_root).or_else(|_| p.strip_prefix(root)) {
            return rel.to_string_lossy().replace('\\', "/");
        }
    }
    path.trim_start_matches("./").replace('\\', "/")
}

/// Last modification time of `path` in unix seconds, 0 when unknown.
pub async fn modified_secs(path: &Path) -> i64 {
    tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn is_skipped_dir(entry: &DirEntry, skip_dirs: &[String]) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| skip_dirs.iter().any(|s| s == name))
}

fn has_allowed_extension(path: &str, extensions: &[String]) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
