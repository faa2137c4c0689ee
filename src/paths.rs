//! Well-known locations inside a repository used as classification anchors.

use std::path::{Component, Path, PathBuf};

use crate::config::PathsConfig;
use crate::error::{Result, WatchError};

/// Immutable set of absolute anchor paths for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryPaths {
    root: PathBuf,
    git_dir: PathBuf,
    head_file: PathBuf,
    index_file: PathBuf,
    config_file: PathBuf,
    branches_dir: PathBuf,
    remotes_dir: PathBuf,
    ignored_dirs: Vec<PathBuf>,
}

impl RepositoryPaths {
    /// Derive the anchors assuming the git directory sits at `<root>/<git_dir>`.
    pub fn new<P: AsRef<Path>>(root: P, config: &PathsConfig) -> Self {
        let root = root.as_ref().to_path_buf();
        let git_dir = root.join(&config.git_dir);
        Self::with_git_dir(root, git_dir, config)
    }

    /// Like [`RepositoryPaths::new`], but follows a `gitdir: <path>` pointer
    /// file when the git directory entry is a file (linked worktrees, submodules).
    ///
    /// The root is canonicalized first: platform watchers report absolute
    /// paths, and every anchor must be a prefix of what they report.
    pub fn discover<P: AsRef<Path>>(root: P, config: &PathsConfig) -> Result<Self> {
        let root = root.as_ref();
        let root = std::fs::canonicalize(root).map_err(|e| WatchError::InitFailed {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        let candidate = root.join(&config.git_dir);

        if candidate.is_dir() {
            return Ok(Self::with_git_dir(root, candidate, config));
        }

        if candidate.is_file() {
            let git_dir = read_gitdir_pointer(&root, &candidate)?;
            tracing::debug!("Resolved git directory pointer to {}", git_dir.display());
            return Ok(Self::with_git_dir(root, git_dir, config));
        }

        Err(WatchError::InitFailed {
            path: candidate,
            reason: "no git directory found".to_string(),
        })
    }

    fn with_git_dir(root: PathBuf, git_dir: PathBuf, config: &PathsConfig) -> Self {
        let refs = git_dir.join("refs");
        Self {
            head_file: git_dir.join("HEAD"),
            index_file: git_dir.join("index"),
            config_file: git_dir.join("config"),
            branches_dir: refs.join("heads"),
            remotes_dir: refs.join("remotes"),
            ignored_dirs: config.ignored_dirs.iter().map(|d| root.join(d)).collect(),
            git_dir,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn head_file(&self) -> &Path {
        &self.head_file
    }

    pub fn index_file(&self) -> &Path {
        &self.index_file
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn branches_dir(&self) -> &Path {
        &self.branches_dir
    }

    pub fn remotes_dir(&self) -> &Path {
        &self.remotes_dir
    }

    pub fn ignored_dirs(&self) -> &[PathBuf] {
        &self.ignored_dirs
    }

    pub fn is_git_internal(&self, path: &Path) -> bool {
        path.starts_with(&self.git_dir)
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        self.ignored_dirs.iter().any(|dir| path.starts_with(dir))
    }

    /// Segments of `path` below `refs/heads`, or `None` when it is not inside it.
    pub fn relative_to_branches(&self, path: &Path) -> Option<Vec<String>> {
        relative_segments(&self.branches_dir, path)
    }

    /// Segments of `path` below `refs/remotes`, or `None` when it is not inside it.
    pub fn relative_to_remotes(&self, path: &Path) -> Option<Vec<String>> {
        relative_segments(&self.remotes_dir, path)
    }
}

fn relative_segments(base: &Path, path: &Path) -> Option<Vec<String>> {
    let rest = path.strip_prefix(base).ok()?;
    Some(
        rest.components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect(),
    )
}

fn read_gitdir_pointer(root: &Path, pointer: &Path) -> Result<PathBuf> {
    let content = std::fs::read_to_string(pointer).map_err(|e| WatchError::InitFailed {
        path: pointer.to_path_buf(),
        reason: e.to_string(),
    })?;

    let target = content
        .lines()
        .find_map(|line| line.strip_prefix("gitdir:"))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| WatchError::InitFailed {
            path: pointer.to_path_buf(),
            reason: "missing 'gitdir:' entry".to_string(),
        })?;

    let target = PathBuf::from(target);
    let target = if target.is_absolute() {
        target
    } else {
        root.join(target)
    };
    Ok(std::fs::canonicalize(&target).unwrap_or(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_anchor_layout() {
        let paths = RepositoryPaths::new("/repo", &PathsConfig::default());

        assert_eq!(paths.git_dir(), Path::new("/repo/.git"));
        assert_eq!(paths.head_file(), Path::new("/repo/.git/HEAD"));
        assert_eq!(paths.index_file(), Path::new("/repo/.git/index"));
        assert_eq!(paths.config_file(), Path::new("/repo/.git/config"));
        assert_eq!(paths.branches_dir(), Path::new("/repo/.git/refs/heads"));
        assert_eq!(paths.remotes_dir(), Path::new("/repo/.git/refs/remotes"));
        assert!(paths.is_ignored(Path::new("/repo/target/debug/build")));
        assert!(!paths.is_ignored(Path::new("/repo/targets.txt")));
    }

    #[test]
    fn test_relative_segments() {
        let paths = RepositoryPaths::new("/repo", &PathsConfig::default());

        assert_eq!(
            paths.relative_to_branches(Path::new("/repo/.git/refs/heads/feature/login")),
            Some(vec!["feature".to_string(), "login".to_string()])
        );
        assert_eq!(
            paths.relative_to_branches(Path::new("/repo/.git/refs/heads")),
            Some(vec![])
        );
        assert_eq!(paths.relative_to_remotes(Path::new("/repo/.git/HEAD")), None);
    }

    #[test]
    fn test_discover_follows_gitdir_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().join("worktree");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(".git"), "gitdir: ../main/.git/worktrees/wt\n").unwrap();
        let root = root.canonicalize().unwrap();

        let paths = RepositoryPaths::discover(&root, &PathsConfig::default()).unwrap();

        assert_eq!(paths.git_dir(), root.join("../main/.git/worktrees/wt"));
        assert_eq!(paths.head_file(), root.join("../main/.git/worktrees/wt/HEAD"));
    }

    #[test]
    fn test_discover_makes_relative_root_absolute() {
        let temp_dir = tempfile::Builder::new()
            .prefix("paths-relative")
            .tempdir_in(".")
            .expect("Failed to create temp dir");
        let relative = Path::new(".").join(temp_dir.path().file_name().unwrap());
        std::fs::create_dir_all(relative.join(".git")).unwrap();

        let paths = RepositoryPaths::discover(&relative, &PathsConfig::default()).unwrap();
        let root = relative.canonicalize().unwrap();

        assert!(paths.root().is_absolute());
        assert_eq!(paths.head_file(), root.join(".git").join("HEAD"));
        assert!(paths.is_git_internal(&root.join(".git").join("index")));
        assert!(paths.is_ignored(&root.join("target").join("debug")));
    }

    #[test]
    fn test_discover_missing_root_fails() {
        let err = RepositoryPaths::discover("/definitely/not/a/repo", &PathsConfig::default()).unwrap_err();
        assert!(matches!(err, WatchError::InitFailed { .. }));
    }

    #[test]
    fn test_discover_without_git_dir_fails() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let err = RepositoryPaths::discover(temp_dir.path(), &PathsConfig::default()).unwrap_err();
        assert!(matches!(err, WatchError::InitFailed { .. }));
    }
}
