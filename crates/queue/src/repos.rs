//! Read-only view of which repositories are still connected.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Answers whether a repository is still tracked and connected.
///
/// Jobs of repositories for which this returns `false` are deleted without
/// being dispatched.
pub trait RepoRegistry: Send + Sync {
    fn is_connected(&self, repo_path: &Path) -> bool;
}

/// Registry backed by a fixed set of connected repository paths.
#[derive(Debug, Clone, Default)]
pub struct StaticRepoRegistry {
    connected: HashSet<PathBuf>,
}

impl StaticRepoRegistry {
    pub fn new<I, P>(connected: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            connected: connected.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds the registry from `(path, connected)` pairs, keeping only
    /// connected repositories.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (PathBuf, bool)>,
    {
        Self::new(
            entries
                .into_iter()
                .filter_map(|(path, connected)| connected.then_some(path)),
        )
    }
}

impl RepoRegistry for StaticRepoRegistry {
    fn is_connected(&self, repo_path: &Path) -> bool {
        self.connected.contains(repo_path)
    }
}
