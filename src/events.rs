use std::fmt;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

/// Operation carried by a raw filesystem change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOperation {
    Created,
    Deleted,
    Modified,
    Renamed,
}

/// One filesystem change as reported by a raw event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChangeRecord {
    pub operation: ChangeOperation,
    pub directory: PathBuf,
    pub primary_name: String,
    /// New name for `Renamed` records. May be absolute when the rename crossed directories.
    pub secondary_name: Option<String>,
}

impl RawChangeRecord {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(operation: ChangeOperation, directory: P, name: S) -> Self {
        Self {
            operation,
            directory: directory.into(),
            primary_name: name.into(),
            secondary_name: None,
        }
    }

    pub fn renamed<P: Into<PathBuf>, S: Into<String>>(directory: P, from: S, to: S) -> Self {
        Self {
            operation: ChangeOperation::Renamed,
            directory: directory.into(),
            primary_name: from.into(),
            secondary_name: Some(to.into()),
        }
    }

    /// Build a record from an absolute path, splitting it into directory and file name.
    pub fn from_path(operation: ChangeOperation, path: &Path) -> Self {
        let (directory, name) = split_path(path);
        Self::new(operation, directory, name)
    }

    pub fn primary_path(&self) -> PathBuf {
        self.directory.join(&self.primary_name)
    }

    pub fn secondary_path(&self) -> Option<PathBuf> {
        self.secondary_name.as_ref().map(|name| self.directory.join(name))
    }
}

pub(crate) fn split_path(path: &Path) -> (PathBuf, String) {
    let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    (directory, name)
}

/// The closed set of semantic repository events, in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoEventKind {
    ConfigChanged,
    HeadChanged,
    IndexChanged,
    RepositoryChanged,
    LocalBranchCreated,
    LocalBranchChanged,
    LocalBranchDeleted,
    RemoteBranchCreated,
    RemoteBranchDeleted,
}

impl RepoEventKind {
    pub const ALL: [RepoEventKind; 9] = [
        RepoEventKind::ConfigChanged,
        RepoEventKind::HeadChanged,
        RepoEventKind::IndexChanged,
        RepoEventKind::RepositoryChanged,
        RepoEventKind::LocalBranchCreated,
        RepoEventKind::LocalBranchChanged,
        RepoEventKind::LocalBranchDeleted,
        RepoEventKind::RemoteBranchCreated,
        RepoEventKind::RemoteBranchDeleted,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Singleton kinds carry no payload and fire at most once per poll.
    pub fn is_singleton(self) -> bool {
        matches!(
            self,
            RepoEventKind::ConfigChanged
                | RepoEventKind::HeadChanged
                | RepoEventKind::IndexChanged
                | RepoEventKind::RepositoryChanged
        )
    }
}

impl fmt::Display for RepoEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepoEventKind::ConfigChanged => "config changed",
            RepoEventKind::HeadChanged => "HEAD changed",
            RepoEventKind::IndexChanged => "index changed",
            RepoEventKind::RepositoryChanged => "repository changed",
            RepoEventKind::LocalBranchCreated => "local branch created",
            RepoEventKind::LocalBranchChanged => "local branch changed",
            RepoEventKind::LocalBranchDeleted => "local branch deleted",
            RepoEventKind::RemoteBranchCreated => "remote branch created",
            RepoEventKind::RemoteBranchDeleted => "remote branch deleted",
        };
        f.write_str(name)
    }
}

/// Branch payload. `branch` is slash-joined (`feature/login`); `origin` is set for remote branches only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub branch: String,
}

impl BranchRef {
    pub fn local<S: Into<String>>(branch: S) -> Self {
        Self {
            origin: None,
            branch: branch.into(),
        }
    }

    pub fn remote<O: Into<String>, S: Into<String>>(origin: O, branch: S) -> Self {
        Self {
            origin: Some(origin.into()),
            branch: branch.into(),
        }
    }
}

impl fmt::Display for BranchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(origin) => write!(f, "{}/{}", origin, self.branch),
            None => f.write_str(&self.branch),
        }
    }
}

/// A single semantic notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RepoEvent {
    ConfigChanged,
    HeadChanged,
    IndexChanged,
    RepositoryChanged,
    LocalBranchCreated(BranchRef),
    LocalBranchChanged(BranchRef),
    LocalBranchDeleted(BranchRef),
    RemoteBranchCreated(BranchRef),
    RemoteBranchDeleted(BranchRef),
}

impl RepoEvent {
    pub fn kind(&self) -> RepoEventKind {
        match self {
            RepoEvent::ConfigChanged => RepoEventKind::ConfigChanged,
            RepoEvent::HeadChanged => RepoEventKind::HeadChanged,
            RepoEvent::IndexChanged => RepoEventKind::IndexChanged,
            RepoEvent::RepositoryChanged => RepoEventKind::RepositoryChanged,
            RepoEvent::LocalBranchCreated(_) => RepoEventKind::LocalBranchCreated,
            RepoEvent::LocalBranchChanged(_) => RepoEventKind::LocalBranchChanged,
            RepoEvent::LocalBranchDeleted(_) => RepoEventKind::LocalBranchDeleted,
            RepoEvent::RemoteBranchCreated(_) => RepoEventKind::RemoteBranchCreated,
            RepoEvent::RemoteBranchDeleted(_) => RepoEventKind::RemoteBranchDeleted,
        }
    }

    pub fn branch(&self) -> Option<&BranchRef> {
        match self {
            RepoEvent::LocalBranchCreated(b)
            | RepoEvent::LocalBranchChanged(b)
            | RepoEvent::LocalBranchDeleted(b)
            | RepoEvent::RemoteBranchCreated(b)
            | RepoEvent::RemoteBranchDeleted(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for RepoEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.branch() {
            Some(branch) => write!(f, "{}: {}", self.kind(), branch),
            None => write!(f, "{}", self.kind()),
        }
    }
}

/// Everything one poll observed: singleton flags plus ordered, de-duplicated branch lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub config_changed: bool,
    pub head_changed: bool,
    pub index_changed: bool,
    pub repository_changed: bool,
    pub local_branches_created: Vec<BranchRef>,
    pub local_branches_changed: Vec<BranchRef>,
    pub local_branches_deleted: Vec<BranchRef>,
    pub remote_branches_created: Vec<BranchRef>,
    pub remote_branches_deleted: Vec<BranchRef>,
}

impl Classification {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a singleton kind. Returns false when it was already recorded this poll.
    pub(crate) fn flag(&mut self, kind: RepoEventKind) -> bool {
        let slot = match kind {
            RepoEventKind::ConfigChanged => &mut self.config_changed,
            RepoEventKind::HeadChanged => &mut self.head_changed,
            RepoEventKind::IndexChanged => &mut self.index_changed,
            RepoEventKind::RepositoryChanged => &mut self.repository_changed,
            _ => return false,
        };
        !std::mem::replace(slot, true)
    }

    /// Append a branch payload unless the same branch/origin pair is already listed.
    pub(crate) fn push_branch(&mut self, kind: RepoEventKind, branch: BranchRef) -> bool {
        let list = match kind {
            RepoEventKind::LocalBranchCreated => &mut self.local_branches_created,
            RepoEventKind::LocalBranchChanged => &mut self.local_branches_changed,
            RepoEventKind::LocalBranchDeleted => &mut self.local_branches_deleted,
            RepoEventKind::RemoteBranchCreated => &mut self.remote_branches_created,
            RepoEventKind::RemoteBranchDeleted => &mut self.remote_branches_deleted,
            _ => return false,
        };
        if list.contains(&branch) {
            return false;
        }
        list.push(branch);
        true
    }

    /// Number of notifications this result produces when dispatched.
    pub fn len(&self) -> usize {
        [
            self.config_changed,
            self.head_changed,
            self.index_changed,
            self.repository_changed,
        ]
        .iter()
        .filter(|flag| **flag)
        .count()
            + self.local_branches_created.len()
            + self.local_branches_changed.len()
            + self.local_branches_deleted.len()
            + self.remote_branches_created.len()
            + self.remote_branches_deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into individual events in dispatch order.
    pub fn events(&self) -> Vec<RepoEvent> {
        let mut events = Vec::with_capacity(self.len());

        if self.config_changed {
            events.push(RepoEvent::ConfigChanged);
        }
        if self.head_changed {
            events.push(RepoEvent::HeadChanged);
        }
        if self.index_changed {
            events.push(RepoEvent::IndexChanged);
        }
        if self.repository_changed {
            events.push(RepoEvent::RepositoryChanged);
        }

        events.extend(self.local_branches_created.iter().cloned().map(RepoEvent::LocalBranchCreated));
        events.extend(self.local_branches_changed.iter().cloned().map(RepoEvent::LocalBranchChanged));
        events.extend(self.local_branches_deleted.iter().cloned().map(RepoEvent::LocalBranchDeleted));
        events.extend(self.remote_branches_created.iter().cloned().map(RepoEvent::RemoteBranchCreated));
        events.extend(self.remote_branches_deleted.iter().cloned().map(RepoEvent::RemoteBranchDeleted));

        events
    }
}
