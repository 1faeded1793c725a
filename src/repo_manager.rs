//! Discover, create, open, and delete bare-plus-worktree repositories
//! under a root directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};
use crate::git_repo::GitRepo;

const GIT_SUFFIX: &str = ".git";

/// Directory of `<name>.git` repositories. Cheap to clone - just a path.
#[derive(Clone, Debug)]
pub struct RepoManager {
    root: PathBuf,
}

impl RepoManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}{GIT_SUFFIX}"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_dir()
    }

    /// List repository names under the root. Order is stable (sorted).
    pub fn list(&self) -> StoreResult<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|n| n.strip_suffix(GIT_SUFFIX))
                    .map(|n| n.to_string())
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// Idempotent: creates the repository if absent, otherwise just opens it.
    pub fn create(&self, name: &str) -> StoreResult<GitRepo> {
        let path = self.path(name);
        if !path.is_dir() {
            fs::create_dir_all(&path)?;
            GitRepo::init(&path)?;
        }
        GitRepo::open(&path)
    }

    pub fn get(&self, name: &str) -> StoreResult<GitRepo> {
        if !self.exists(name) {
            return Err(StoreError::RepoDoesNotExist(name.to_string()));
        }
        GitRepo::open(&self.path(name))
    }

    /// Recursive delete. Returns whether anything was actually removed.
    pub fn remove(&self, name: &str) -> StoreResult<bool> {
        let path = self.path(name);
        if !path.is_dir() {
            return Ok(false);
        }
        fs::remove_dir_all(&path)?;
        Ok(true)
    }

    /// Remove every repository under the root. Test-only.
    #[cfg(any(test, feature = "test-util"))]
    pub fn remove_all(&self) -> StoreResult<()> {
        for name in self.list()? {
            self.remove(&name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn create_is_idempotent_and_returns_opened_repo() {
        let dir = TempDir::new().unwrap();
        let mgr = RepoManager::new(dir.path());
        assert!(!mgr.exists("r"));

        let repo1 = mgr.create("r").unwrap();
        assert!(mgr.exists("r"));
        let rev1 = repo1.branches().unwrap();
        assert!(rev1.is_empty());

        // Second create on an existing repo is a no-op structurally.
        mgr.create("r").unwrap();
        assert!(mgr.exists("r"));
    }

    #[test]
    fn get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mgr = RepoManager::new(dir.path());
        assert!(matches!(
            mgr.get("nope"),
            Err(StoreError::RepoDoesNotExist(_))
        ));
    }

    #[test]
    fn list_is_sorted_and_strips_suffix() {
        let dir = TempDir::new().unwrap();
        let mgr = RepoManager::new(dir.path());
        mgr.create("zebra").unwrap();
        mgr.create("apple").unwrap();
        assert_eq!(mgr.list().unwrap(), vec!["apple", "zebra"]);
    }

    #[test]
    fn remove_reports_whether_anything_was_deleted() {
        let dir = TempDir::new().unwrap();
        let mgr = RepoManager::new(dir.path());
        mgr.create("r").unwrap();
        assert!(mgr.remove("r").unwrap());
        assert!(!mgr.remove("r").unwrap());
    }

    #[test]
    fn path_is_root_joined_with_git_suffix() {
        let dir = TempDir::new().unwrap();
        let mgr = RepoManager::new(dir.path());
        assert_eq!(mgr.path("foo"), dir.path().join("foo.git"));
    }
}
