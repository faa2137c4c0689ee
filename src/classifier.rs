//! Raw record classification
//!
//! Turns a batch of filesystem change records into semantic repository
//! events. Git never writes a ref file in place: it writes `<name>.lock`
//! and renames it over `<name>`. A completed lock rename under
//! `refs/heads` or `refs/remotes` is therefore read as branch creation,
//! while lock-file churn on its own (modify/delete of `*.lock`) is noise.

use std::path::{Path, PathBuf};

use crate::events::{BranchRef, ChangeOperation, Classification, RawChangeRecord, RepoEventKind};
use crate::paths::RepositoryPaths;
use crate::signal::CancellationToken;

const LOCK_EXTENSION: &str = "lock";

/// Classify `records` in order. Stops early when `cancel` fires and returns what was gathered so far.
pub fn classify(
    records: &[RawChangeRecord],
    paths: &RepositoryPaths,
    cancel: &CancellationToken,
) -> Classification {
    classify_until(records, paths, || cancel.is_cancelled())
}

/// Same as [`classify`], with `should_stop` consulted before every record.
pub fn classify_until<F>(records: &[RawChangeRecord], paths: &RepositoryPaths, mut should_stop: F) -> Classification
where
    F: FnMut() -> bool,
{
    let mut result = Classification::new();

    for (processed, record) in records.iter().enumerate() {
        if should_stop() {
            tracing::debug!(
                "Classification cancelled after {} of {} records",
                processed,
                records.len()
            );
            break;
        }
        classify_record(record, paths, &mut result);
    }

    result
}

fn classify_record(record: &RawChangeRecord, paths: &RepositoryPaths, result: &mut Classification) {
    let target = record.primary_path();

    if !paths.is_git_internal(&target) {
        if paths.is_ignored(&target) {
            return;
        }
        if result.flag(RepoEventKind::RepositoryChanged) {
            tracing::debug!("Working tree change: {}", target.display());
        }
        return;
    }

    if target == paths.config_file() {
        result.flag(RepoEventKind::ConfigChanged);
    } else if target == paths.head_file() {
        result.flag(RepoEventKind::HeadChanged);
    } else if target == paths.index_file() {
        result.flag(RepoEventKind::IndexChanged);
    } else if let Some(segments) = paths.relative_to_remotes(&target) {
        classify_remote(record, &target, &segments, result);
    } else if let Some(segments) = paths.relative_to_branches(&target) {
        classify_local(record, &target, &segments, paths, result);
    }
}

fn classify_remote(
    record: &RawChangeRecord,
    target: &Path,
    segments: &[String],
    result: &mut Classification,
) {
    let Some((origin, rest)) = segments.split_first() else {
        return;
    };

    match record.operation {
        ChangeOperation::Deleted => {
            if is_lock_file(target) || rest.is_empty() {
                return;
            }
            let branch = BranchRef::remote(origin.as_str(), rest.join("/"));
            tracing::debug!("Remote branch deleted: {}", branch);
            result.push_branch(RepoEventKind::RemoteBranchDeleted, branch);
        }
        ChangeOperation::Renamed => {
            let Some((_, stem)) = completed_lock_rename(record, target) else {
                return;
            };
            let Some((_, parents)) = rest.split_last() else {
                return;
            };
            let mut parts: Vec<&str> = parents.iter().map(String::as_str).collect();
            parts.push(&stem);

            let branch = BranchRef::remote(origin.as_str(), parts.join("/"));
            tracing::debug!("Remote branch created: {}", branch);
            result.push_branch(RepoEventKind::RemoteBranchCreated, branch);
        }
        _ => {}
    }
}

fn classify_local(
    record: &RawChangeRecord,
    target: &Path,
    segments: &[String],
    paths: &RepositoryPaths,
    result: &mut Classification,
) {
    if segments.is_empty() {
        return;
    }

    match record.operation {
        ChangeOperation::Modified => {
            // directories report mtime churn whenever a child ref changes
            if target.is_dir() || is_lock_file(target) {
                return;
            }
            let branch = BranchRef::local(segments.join("/"));
            tracing::debug!("Local branch changed: {}", branch);
            result.push_branch(RepoEventKind::LocalBranchChanged, branch);
        }
        ChangeOperation::Deleted => {
            if is_lock_file(target) {
                return;
            }
            let branch = BranchRef::local(segments.join("/"));
            tracing::debug!("Local branch deleted: {}", branch);
            result.push_branch(RepoEventKind::LocalBranchDeleted, branch);
        }
        ChangeOperation::Renamed => {
            let Some((secondary, _)) = completed_lock_rename(record, target) else {
                return;
            };
            let Some(created) = paths.relative_to_branches(&secondary).filter(|s| !s.is_empty()) else {
                return;
            };
            let branch = BranchRef::local(created.join("/"));
            tracing::debug!("Local branch created: {}", branch);
            result.push_branch(RepoEventKind::LocalBranchCreated, branch);
        }
        ChangeOperation::Created => {}
    }
}

fn is_lock_file(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == LOCK_EXTENSION)
}

/// Recognise `<name>.lock` renamed onto an existing file `<name>`.
/// Returns the rename target and `<name>`.
///
/// Only the `.lock` suffix is stripped; this is deliberately not a stem
/// comparison of both names. `v1.2.lock -> v1.2` is a branch creation, while
/// `main.lock -> main.bak` is not.
fn completed_lock_rename(record: &RawChangeRecord, target: &Path) -> Option<(PathBuf, String)> {
    if !is_lock_file(target) {
        return None;
    }

    let stem = record
        .primary_name
        .strip_suffix(".lock")
        .and_then(|name| Path::new(name).file_name())
        .map(|name| name.to_string_lossy().into_owned())?;

    let secondary = record.secondary_path()?;
    if !secondary.is_file() {
        tracing::debug!(
            "Dropping rename of {}: target {} no longer exists",
            target.display(),
            secondary.display()
        );
        return None;
    }

    let matches = secondary
        .file_name()
        .map_or(false, |name| name.to_string_lossy() == stem.as_str());
    matches.then_some((secondary, stem))
}
