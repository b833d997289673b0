//! Recursive directory scanning.
//!
//! Traversal order is whatever `walkdir` yields for the host filesystem: full and
//! deterministic for a static tree, but not sorted. Links are not followed.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io::ErrorKind;
use thiserror::Error;
use walkdir::WalkDir;

use crate::models::{FileCount, FileNameSet};

/// Whole-tree scan failures. Fatal to the current run.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Root directory {0} does not exist")]
    RootNotFound(Utf8PathBuf),

    #[error("Root {0} is not a directory")]
    NotADirectory(Utf8PathBuf),

    #[error("Root directory {path} is not readable: {source}")]
    Unreadable {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory walk failed under {root}: {source}")]
    Walk {
        root: Utf8PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Check that `root` exists, is a directory and can be listed.
pub fn validate_root(root: &Utf8Path) -> Result<(), ScanError> {
    let metadata = fs::metadata(root).map_err(|e| match e.kind() {
        ErrorKind::NotFound => ScanError::RootNotFound(root.to_path_buf()),
        _ => ScanError::Unreadable {
            path: root.to_path_buf(),
            source: e,
        },
    })?;

    if !metadata.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    fs::read_dir(root).map_err(|e| ScanError::Unreadable {
        path: root.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

/// Lazy walk over the files under a root whose base name is in a name set.
///
/// Yields `Err` once for a walk failure that is not a vanished entry; callers
/// are expected to stop there.
pub struct MatchingFiles<'a> {
    root: Utf8PathBuf,
    names: Option<&'a FileNameSet>,
    walker: walkdir::IntoIter,
}

impl MatchingFiles<'_> {
    fn matches(&self, entry: &walkdir::DirEntry) -> bool {
        if entry.file_type().is_dir() {
            return false;
        }
        match self.names {
            None => true,
            Some(names) => entry
                .file_name()
                .to_str()
                .is_some_and(|name| names.contains(name)),
        }
    }
}

impl Iterator for MatchingFiles<'_> {
    type Item = Result<Utf8PathBuf, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    if is_vanished(err.depth(), err.io_error().map(|io| io.kind())) {
                        tracing::warn!("Skipping entry that disappeared during scan: {}", err);
                        continue;
                    }
                    return Some(Err(ScanError::Walk {
                        root: self.root.clone(),
                        source: err,
                    }));
                }
            };

            if !self.matches(&entry) {
                continue;
            }

            match Utf8PathBuf::from_path_buf(entry.into_path()) {
                Ok(path) => return Some(Ok(path)),
                Err(path) => {
                    tracing::warn!("Skipping non UTF-8 path: {}", path.display());
                }
            }
        }
    }
}

/// A walk error below the root caused by an entry removed mid-walk.
///
/// These are skipped; any other walk error aborts the walk.
fn is_vanished(depth: usize, kind: Option<ErrorKind>) -> bool {
    depth > 0 && kind == Some(ErrorKind::NotFound)
}

/// Start a walk over `root`. `names = None` makes every file a candidate.
pub fn matching_files<'a>(
    root: &Utf8Path,
    names: Option<&'a FileNameSet>,
) -> Result<MatchingFiles<'a>, ScanError> {
    validate_root(root)?;

    Ok(MatchingFiles {
        root: root.to_path_buf(),
        names,
        walker: WalkDir::new(root).into_iter(),
    })
}

/// Collect every matching file path in walk order.
pub fn scan(root: &Utf8Path, names: Option<&FileNameSet>) -> Result<Vec<Utf8PathBuf>, ScanError> {
    matching_files(root, names)?.collect()
}

/// Count matches per base name.
///
/// With a name set, every requested name appears in the result, zero if absent.
/// Any walk failure invalidates the counts and is returned instead.
pub fn count_files(root: &Utf8Path, names: Option<&FileNameSet>) -> Result<FileCount, ScanError> {
    let mut counts: FileCount = names
        .map(|set| set.iter().map(|name| (name.clone(), 0)).collect())
        .unwrap_or_default();

    for path in matching_files(root, names)? {
        let path = path?;
        if let Some(name) = path.file_name() {
            *counts.entry(name.to_string()).or_insert(0) += 1;
        }
    }

    tracing::debug!(
        "Counted {} matching files under {}",
        counts.values().sum::<usize>(),
        root
    );

    Ok(counts)
}
