//! Semantic repository events from raw filesystem notifications.
//!
//! A [`RepositoryWatcher`] polls a [`RawEventSource`], runs each batch
//! through the [`classifier`], and fans the resulting [`RepoEvent`]s out
//! through a [`Dispatcher`].

pub mod classifier;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
mod guard;
pub mod paths;
pub mod signal;
pub mod source;
pub mod watcher;

pub use classifier::classify;
pub use config::{PathsConfig, RepoWatchConfig, WatcherConfig};
pub use dispatch::Dispatcher;
pub use error::WatchError;
pub use events::*;
pub use paths::RepositoryPaths;
pub use signal::CancellationToken;
pub use source::{NotifySource, RawEventSource, ScriptedSource};
pub use watcher::{watch_repository, RepositoryWatcher};
