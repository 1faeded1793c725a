//! All object-level operations on one repository - branches, commits, file
//! reads, and the transactional multi-file write.
//!
//! Every operation opens its own `git2::Repository` handle and lets it drop
//! at the end of the call: the repository facade owns its object-store
//! handle and must release it on each request boundary. Mutating operations
//! acquire the file lock first.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{BranchType, ErrorCode, IndexAddOption, Repository, StatusOptions};

use crate::accesskey;
use crate::error::{StoreError, StoreResult};
use crate::lock::{self, with_lock};

/// Blobs larger than this fail `get_file` with a typed error rather than
/// being read fully into memory.
pub const MAX_BLOB_SIZE: u64 = 1024 * 1024;

const SERVICE_NAME: &str = "branchvault";
const SERVICE_EMAIL: &str = "branchvault@localhost";
const COMMIT_MESSAGE: &str = "Changes";

/// A value a config key can be set to. git config only distinguishes string
/// and integer types for our purposes; anything else is `BadConfigValue`.
#[derive(Debug, Clone)]
pub enum ConfigValue {
    Str(String),
    Int(i64),
}

impl TryFrom<&serde_json::Value> for ConfigValue {
    type Error = StoreError;

    fn try_from(value: &serde_json::Value) -> StoreResult<Self> {
        match value {
            serde_json::Value::String(s) => Ok(ConfigValue::Str(s.clone())),
            serde_json::Value::Number(n) if n.is_i64() => Ok(ConfigValue::Int(n.as_i64().unwrap())),
            other => Err(StoreError::BadConfigValue(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
}

impl GitRepo {
    /// Create a fresh repository at `path`: a non-bare working tree used the
    /// way a bare repo would be (server-side, never interactively checked
    /// out), with `receive.denycurrentbranch=updateInstead` so a Git push can
    /// update the currently-referenced branch without being rejected, plus a
    /// fresh access key and the `post-receive` hook that makes the
    /// receive-pack report observable to the Git HTTP front-end.
    pub fn init(path: &Path) -> StoreResult<()> {
        let repo = Repository::init(path)?;
        let mut config = repo.config()?;
        config.set_str("lunchbadger.accesskey", &accesskey::generate())?;
        config.set_str("receive.denycurrentbranch", "updateInstead")?;
        install_post_receive_hook(path)?;
        Ok(())
    }

    /// Open an existing repository, validating that it really is one.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Repository::open(path)
            .map_err(|e| StoreError::generic(format!("opening repository {path:?}: {e}")))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        lock::lock_path_for(&self.path)
    }

    fn open_handle(&self) -> StoreResult<Repository> {
        Ok(Repository::open(&self.path)?)
    }

    pub fn branches(&self) -> StoreResult<Vec<String>> {
        let repo = self.open_handle()?;
        let mut names = Vec::new();
        for item in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = item?;
            if let Some(name) = branch.name()? {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn branch_revision(&self, name: &str) -> StoreResult<String> {
        let repo = self.open_handle()?;
        Ok(resolve_branch_tip(&repo, name)?.to_string())
    }

    /// Resolve `revspec` (branch name, commit hash, or any valid Git
    /// revspec), force-creating or force-moving `name` to point at it.
    pub fn upsert_branch(&self, name: &str, revspec: &str) -> StoreResult<String> {
        with_lock(&self.lock_path(), || {
            let repo = self.open_handle()?;
            let commit = repo
                .revparse_single(revspec)
                .and_then(|obj| obj.peel_to_commit())
                .map_err(|_| StoreError::RevisionNotFound(revspec.to_string()))?;
            let refname = format!("refs/heads/{name}");
            repo.reference(&refname, commit.id(), true, "upsert_branch")?;
            Ok(commit.id().to_string())
        })
    }

    /// Delete `name`, detaching HEAD first if it currently points there.
    /// Returns `false` if the branch did not exist.
    pub fn delete_branch(&self, name: &str) -> StoreResult<bool> {
        with_lock(&self.lock_path(), || {
            let repo = self.open_handle()?;
            let refname = format!("refs/heads/{name}");
            if let Ok(head) = repo.head() {
                if head.is_branch() && head.name() == Some(refname.as_str()) {
                    let oid = head.peel_to_commit()?.id();
                    repo.set_head_detached(oid)?;
                }
            }
            match repo.find_branch(name, BranchType::Local) {
                Ok(mut branch) => {
                    branch.delete()?;
                    Ok(true)
                }
                Err(e) if e.code() == ErrorCode::NotFound => Err(StoreError::InvalidBranch(name.to_string())),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Resolve `branch` -> commit -> tree -> entry at `path`; reject
    /// non-blob entries and blobs over [`MAX_BLOB_SIZE`].
    pub fn get_file(&self, branch: &str, path: &str) -> StoreResult<(Vec<u8>, String)> {
        let repo = self.open_handle()?;
        let commit = resolve_branch_commit(&repo, branch)?;
        let tree = commit.tree()?;
        let entry = tree
            .get_path(Path::new(path))
            .map_err(|_| StoreError::FileNotFound(path.to_string()))?;
        let object = entry.to_object(&repo)?;
        let blob = object.as_blob().ok_or(StoreError::NotABlob)?;
        if blob.size() as u64 > MAX_BLOB_SIZE {
            return Err(StoreError::FileTooLarge(MAX_BLOB_SIZE));
        }
        Ok((blob.content().to_vec(), commit.id().to_string()))
    }

    pub fn config_set(&self, entries: &HashMap<String, serde_json::Value>) -> StoreResult<()> {
        with_lock(&self.lock_path(), || {
            let repo = self.open_handle()?;
            let mut config = repo.config()?;
            for (key, value) in entries {
                match ConfigValue::try_from(value)? {
                    ConfigValue::Str(s) => config.set_str(key, &s)?,
                    ConfigValue::Int(i) => config.set_i64(key, i)?,
                }
            }
            Ok(())
        })
    }

    pub fn config_get(&self, name: &str) -> StoreResult<String> {
        let repo = self.open_handle()?;
        let config = repo.config()?;
        match config.get_string(name) {
            Ok(value) => Ok(value),
            Err(e) if e.code() == ErrorCode::NotFound => {
                Err(StoreError::generic(format!("config key not set: {name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The central transactional operation: resolve parent, stage files,
    /// create commit, release lock.
    pub fn update_branch_files(
        &self,
        branch: &str,
        parent_revision: Option<&str>,
        files: &HashMap<String, Vec<u8>>,
    ) -> StoreResult<String> {
        with_lock(&self.lock_path(), || {
            let repo = self.open_handle()?;
            let refname = format!("refs/heads/{branch}");

            // Step 1: open or initialize HEAD.
            let head_commit = match repo.head() {
                Err(e) if e.code() == ErrorCode::UnbornBranch => {
                    repo.set_head(&refname)?;
                    None
                }
                Err(e) => return Err(e.into()),
                Ok(_existing_head) => match repo.find_reference(&refname) {
                    Ok(r) => {
                        let commit = r.peel_to_commit()?;
                        let oid = commit.id();
                        // The working tree and index are shared across every
                        // branch in this non-bare repository; switching which
                        // branch we're about to commit onto must reset both
                        // to that branch's tree first, or leftover files from
                        // whatever was last checked out would get staged into
                        // the new commit.
                        let tree = commit.tree()?;
                        let mut checkout = CheckoutBuilder::new();
                        checkout.force().remove_untracked(true);
                        repo.checkout_tree(tree.as_object(), Some(&mut checkout))?;
                        repo.set_head(&refname)?;
                        Some(oid)
                    }
                    Err(e) if e.code() == ErrorCode::NotFound => {
                        return Err(StoreError::InvalidBranch(branch.to_string()))
                    }
                    Err(e) => return Err(e.into()),
                },
            };

            // Step 2: optimistic concurrency check.
            let parents: Vec<git2::Oid> = match (parent_revision, head_commit) {
                (Some(parent), Some(head)) => {
                    let resolved = repo
                        .revparse_single(parent)
                        .map(|obj| obj.id())
                        .map_err(|_| StoreError::OptimisticConcurrency)?;
                    if resolved != head {
                        return Err(StoreError::OptimisticConcurrency);
                    }
                    vec![head]
                }
                (Some(_), None) => {
                    return Err(StoreError::generic(
                        "parent revision given for a branch with no commits",
                    ))
                }
                (None, Some(_)) => return Err(StoreError::OptimisticConcurrency),
                (None, None) => vec![],
            };

            // Step 3: materialize files.
            let workdir = repo
                .workdir()
                .ok_or_else(|| StoreError::generic("repository has no working tree"))?
                .to_path_buf();
            for (rel_path, content) in files {
                let dest = workdir.join(rel_path);
                if let Some(parent_dir) = dest.parent() {
                    fs::create_dir_all(parent_dir)?;
                }
                fs::write(&dest, content)?;
            }

            // Step 4: detect changes.
            let mut status_opts = StatusOptions::new();
            status_opts.include_untracked(true).recurse_untracked_dirs(true);
            let statuses = repo.statuses(Some(&mut status_opts))?;
            if statuses.is_empty() {
                return Ok(parent_revision
                    .map(|s| s.to_string())
                    .or_else(|| head_commit.map(|h| h.to_string()))
                    .unwrap_or_default());
            }

            // Step 5: stage and commit.
            let mut index = repo.index()?;
            index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
            index.write()?;
            let tree = repo.find_tree(index.write_tree()?)?;
            let signature = git2::Signature::now(SERVICE_NAME, SERVICE_EMAIL)?;
            let parent_commits = parents
                .iter()
                .map(|oid| repo.find_commit(*oid))
                .collect::<Result<Vec<_>, _>>()?;
            let parent_refs: Vec<&git2::Commit> = parent_commits.iter().collect();
            let new_oid = repo.commit(
                Some(&refname),
                &signature,
                &signature,
                COMMIT_MESSAGE,
                &tree,
                &parent_refs,
            )?;
            index.clear()?;

            // Step 6.
            Ok(new_oid.to_string())
        })
    }
}

fn resolve_branch_tip(repo: &Repository, name: &str) -> StoreResult<git2::Oid> {
    let refname = format!("refs/heads/{name}");
    let reference = repo
        .find_reference(&refname)
        .map_err(|_| StoreError::InvalidBranch(name.to_string()))?;
    Ok(reference.peel_to_commit()?.id())
}

fn resolve_branch_commit<'repo>(
    repo: &'repo Repository,
    name: &str,
) -> StoreResult<git2::Commit<'repo>> {
    let refname = format!("refs/heads/{name}");
    let reference = repo
        .find_reference(&refname)
        .map_err(|_| StoreError::InvalidBranch(name.to_string()))?;
    Ok(reference.peel_to_commit()?)
}

fn install_post_receive_hook(repo_path: &Path) -> StoreResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let hooks_dir = repo_path.join(".git").join("hooks");
        fs::create_dir_all(&hooks_dir)?;
        let hook_path = hooks_dir.join("post-receive");
        fs::write(&hook_path, "#!/bin/bash\nexec cat\n")?;
        fs::set_permissions(&hook_path, fs::Permissions::from_mode(0o775))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn new_repo() -> (TempDir, GitRepo) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.git");
        fs::create_dir_all(&path).unwrap();
        GitRepo::init(&path).unwrap();
        let repo = GitRepo::open(&path).unwrap();
        (dir, repo)
    }

    fn files(pairs: &[(&str, &str)]) -> HashMap<String, Vec<u8>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn init_sets_accesskey_and_denycurrentbranch() {
        let (_dir, repo) = new_repo();
        let key = repo.config_get("lunchbadger.accesskey").unwrap();
        assert_eq!(key.len(), 64);
        assert_eq!(
            repo.config_get("receive.denycurrentbranch").unwrap(),
            "updateInstead"
        );
    }

    #[test]
    fn install_post_receive_hook_is_executable_cat() {
        let (_dir, repo) = new_repo();
        let hook = repo.path().join(".git").join("hooks").join("post-receive");
        let contents = fs::read_to_string(&hook).unwrap();
        assert_eq!(contents, "#!/bin/bash\nexec cat\n");
    }

    #[test]
    fn initial_commit_on_unborn_head() {
        let (_dir, repo) = new_repo();
        let rev = repo
            .update_branch_files("dev", None, &files(&[("a", "1")]))
            .unwrap();
        assert_eq!(repo.branch_revision("dev").unwrap(), rev);
        let (content, etag) = repo.get_file("dev", "a").unwrap();
        assert_eq!(content, b"1");
        assert_eq!(etag, rev);
    }

    #[test]
    fn noop_write_returns_parent_unchanged() {
        let (_dir, repo) = new_repo();
        let rev1 = repo
            .update_branch_files("dev", None, &files(&[("a", "1"), ("b", "2")]))
            .unwrap();
        let rev2 = repo
            .update_branch_files("dev", Some(&rev1), &files(&[("a", "1")]))
            .unwrap();
        assert_eq!(rev1, rev2);
    }

    #[test]
    fn changed_write_advances_revision() {
        let (_dir, repo) = new_repo();
        let rev1 = repo
            .update_branch_files("dev", None, &files(&[("a", "1")]))
            .unwrap();
        let rev2 = repo
            .update_branch_files("dev", Some(&rev1), &files(&[("a", "9")]))
            .unwrap();
        assert_ne!(rev1, rev2);
        assert_eq!(repo.get_file("dev", "a").unwrap().0, b"9");
    }

    #[test]
    fn stale_parent_revision_is_rejected_and_repo_unchanged() {
        let (_dir, repo) = new_repo();
        let rev1 = repo
            .update_branch_files("dev", None, &files(&[("a", "1")]))
            .unwrap();
        repo.update_branch_files("dev", Some(&rev1), &files(&[("a", "9")]))
            .unwrap();

        let err = repo
            .update_branch_files("dev", Some(&rev1), &files(&[("a", "x")]))
            .unwrap_err();
        assert!(matches!(err, StoreError::OptimisticConcurrency));
        assert_eq!(repo.get_file("dev", "a").unwrap().0, b"9");
    }

    #[test]
    fn parent_asserted_on_empty_branch_is_an_error() {
        let (_dir, repo) = new_repo();
        let err = repo
            .update_branch_files("dev", Some("deadbeef"), &files(&[("a", "1")]))
            .unwrap_err();
        assert!(matches!(err, StoreError::Generic(_)));
    }

    #[test]
    fn no_parent_asserted_on_nonempty_branch_is_optimistic_concurrency() {
        let (_dir, repo) = new_repo();
        repo.update_branch_files("dev", None, &files(&[("a", "1")]))
            .unwrap();
        let err = repo
            .update_branch_files("dev", None, &files(&[("a", "2")]))
            .unwrap_err();
        assert!(matches!(err, StoreError::OptimisticConcurrency));
    }

    #[test]
    fn update_on_unknown_branch_with_existing_history_is_invalid_branch() {
        let (_dir, repo) = new_repo();
        repo.update_branch_files("dev", None, &files(&[("a", "1")]))
            .unwrap();
        let err = repo
            .update_branch_files("prod", None, &files(&[("a", "1")]))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidBranch(_)));
    }

    #[test]
    fn upsert_branch_creates_and_force_moves() {
        let (_dir, repo) = new_repo();
        let rev1 = repo
            .update_branch_files("dev", None, &files(&[("a", "1")]))
            .unwrap();
        let copy_rev = repo.upsert_branch("copy", "dev").unwrap();
        assert_eq!(copy_rev, rev1);
        assert_eq!(repo.get_file("copy", "a").unwrap().0, b"1");

        let rev2 = repo
            .update_branch_files("dev", Some(&rev1), &files(&[("a", "2")]))
            .unwrap();
        let moved = repo.upsert_branch("copy", "dev").unwrap();
        assert_eq!(moved, rev2);
    }

    #[test]
    fn writing_to_a_second_branch_does_not_carry_over_the_firsts_files() {
        let (_dir, repo) = new_repo();
        let rev1 = repo
            .update_branch_files("dev", None, &files(&[("a", "1"), ("only_on_dev", "x")]))
            .unwrap();
        let copy_rev = repo.upsert_branch("copy", "dev").unwrap();
        assert_eq!(copy_rev, rev1);

        // Diverge "dev" so its working tree now differs from "copy"'s tree.
        repo.update_branch_files(
            "dev",
            Some(&rev1),
            &files(&[("a", "2"), ("only_on_dev", "y"), ("new_on_dev", "z")]),
        )
        .unwrap();

        // Writing to "copy" must not see any of "dev"'s leftover files.
        repo.update_branch_files("copy", Some(&copy_rev), &files(&[("b", "1")]))
            .unwrap();
        assert_eq!(repo.get_file("copy", "a").unwrap().0, b"1");
        assert_eq!(repo.get_file("copy", "only_on_dev").unwrap().0, b"x");
        assert_eq!(repo.get_file("copy", "b").unwrap().0, b"1");
        assert!(matches!(
            repo.get_file("copy", "new_on_dev").unwrap_err(),
            StoreError::FileNotFound(_)
        ));
    }

    #[test]
    fn upsert_branch_unresolvable_revspec_is_revision_not_found() {
        let (_dir, repo) = new_repo();
        let err = repo.upsert_branch("x", "not-a-revision").unwrap_err();
        assert!(matches!(err, StoreError::RevisionNotFound(_)));
    }

    #[test]
    fn delete_branch_reports_existence_and_detaches_head() {
        let (_dir, repo) = new_repo();
        repo.update_branch_files("dev", None, &files(&[("a", "1")]))
            .unwrap();
        assert!(repo.delete_branch("dev").unwrap());
        assert!(matches!(
            repo.delete_branch("dev").unwrap_err(),
            StoreError::InvalidBranch(_)
        ));
    }

    #[test]
    fn get_file_missing_branch_or_path() {
        let (_dir, repo) = new_repo();
        repo.update_branch_files("dev", None, &files(&[("a", "1")]))
            .unwrap();
        assert!(matches!(
            repo.get_file("nope", "a").unwrap_err(),
            StoreError::InvalidBranch(_)
        ));
        assert!(matches!(
            repo.get_file("dev", "missing").unwrap_err(),
            StoreError::FileNotFound(_)
        ));
    }

    #[test]
    fn get_file_over_size_limit_is_rejected() {
        let (_dir, repo) = new_repo();
        let big = vec![0u8; (MAX_BLOB_SIZE + 1) as usize];
        let mut big_files = HashMap::new();
        big_files.insert("big".to_string(), big);
        repo.update_branch_files("dev", None, &big_files).unwrap();
        assert!(matches!(
            repo.get_file("dev", "big").unwrap_err(),
            StoreError::FileTooLarge(_)
        ));
    }

    #[test]
    fn config_set_accepts_strings_and_integers() {
        let (_dir, repo) = new_repo();
        let mut entries = HashMap::new();
        entries.insert("x.str".to_string(), serde_json::json!("hi"));
        entries.insert("x.int".to_string(), serde_json::json!(7));
        repo.config_set(&entries).unwrap();
        assert_eq!(repo.config_get("x.str").unwrap(), "hi");
        assert_eq!(repo.config_get("x.int").unwrap(), "7");
    }

    #[test]
    fn config_set_rejects_unsupported_value_type() {
        let (_dir, repo) = new_repo();
        let mut entries = HashMap::new();
        entries.insert("x.bad".to_string(), serde_json::json!(["a", "b"]));
        let err = repo.config_set(&entries).unwrap_err();
        assert!(matches!(err, StoreError::BadConfigValue(_)));
    }

    #[test]
    fn branches_lists_sorted_names() {
        let (_dir, repo) = new_repo();
        repo.update_branch_files("b", None, &files(&[("a", "1")]))
            .unwrap();
        repo.upsert_branch("a", "b").unwrap();
        assert_eq!(repo.branches().unwrap(), vec!["a", "b"]);
    }
}
