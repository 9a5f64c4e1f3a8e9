//! Git host port: clone/pull/diff/log plus provider review surfaces.
//!
//! The local adapter shells out to the `git` CLI for clone, pull, diff,
//! and log (the porcelain handles shallow clones and credential helpers
//! far better than reimplementing them), and uses `gix` for repository
//! discovery and HEAD reads. Provider surfaces (reviews, check runs)
//! are HTTP calls in production; the in-memory fake records them for
//! tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{LatticeError, LatticeResult};

/// Options for a workspace clone.
#[derive(Debug, Clone)]
pub struct CloneOpts {
    /// Shallow depth; `Some(1)` for pipeline clones.
    pub depth: Option<u32>,
    /// Single branch to fetch.
    pub branch: Option<String>,
}

impl Default for CloneOpts {
    fn default() -> Self {
        Self {
            depth: Some(1),
            branch: None,
        }
    }
}

/// A file touched by a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrFile {
    /// Path relative to the repo root.
    pub path: String,
    /// Change kind: added, modified, removed.
    pub change: String,
}

/// Port over git hosting: local repository operations plus provider
/// review surfaces.
#[async_trait]
pub trait GitHost: Send + Sync {
    /// Clone `url` into `dest`.
    async fn clone_repo(&self, url: &str, dest: &Path, opts: &CloneOpts) -> LatticeResult<()>;

    /// Fast-forward the checkout at `repo` to the remote head.
    async fn pull_latest(&self, repo: &Path) -> LatticeResult<()>;

    /// Paths changed between two commits.
    async fn diff_files(&self, repo: &Path, from: &str, to: &str) -> LatticeResult<Vec<String>>;

    /// Last author per line of a file (signal extraction).
    async fn blame(&self, repo: &Path, file: &str) -> LatticeResult<Vec<String>>;

    /// HEAD commit SHA of the checkout.
    async fn get_latest_sha(&self, repo: &Path) -> LatticeResult<String>;

    /// Branch names in the repository.
    async fn list_branches(&self, repo: &Path) -> LatticeResult<Vec<String>>;

    /// Tracked file paths at HEAD.
    async fn list_files(&self, repo: &Path) -> LatticeResult<Vec<String>>;

    /// Subjects of the most recent commits touching `file`, newest first.
    async fn recent_commit_subjects(
        &self,
        repo: &Path,
        file: &str,
        limit: usize,
    ) -> LatticeResult<Vec<String>>;

    /// Post a review comment on a pull request.
    async fn post_review(&self, pr_number: u64, body: &str) -> LatticeResult<()>;

    /// Create a check run; returns its identifier.
    async fn create_check_run(&self, sha: &str, name: &str) -> LatticeResult<u64>;

    /// Update a check run's conclusion.
    async fn update_check_run(&self, check_id: u64, conclusion: &str) -> LatticeResult<()>;

    /// Files touched by a pull request.
    async fn get_pr_files(&self, pr_number: u64) -> LatticeResult<Vec<PrFile>>;
}

// ---------------------------------------------------------------------------
// Local adapter (git CLI + gix)
// ---------------------------------------------------------------------------

/// Adapter over a locally-available `git` binary and gix for reads.
#[derive(Default)]
pub struct LocalGitHost;

impl LocalGitHost {
    /// Create the adapter.
    pub fn new() -> Self {
        Self
    }

    fn run_git(repo: Option<&Path>, args: &[&str]) -> LatticeResult<String> {
        let mut cmd = Command::new("git");
        if let Some(repo) = repo {
            cmd.current_dir(repo);
        }
        let output = cmd
            .args(args)
            .output()
            .map_err(|e| LatticeError::Internal(format!("git {}: {e}", args.join(" "))))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LatticeError::Internal(format!(
                "git {} failed: {stderr}",
                args.join(" ")
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl GitHost for LocalGitHost {
    async fn clone_repo(&self, url: &str, dest: &Path, opts: &CloneOpts) -> LatticeResult<()> {
        let url = url.to_string();
        let dest = dest.to_path_buf();
        let opts = opts.clone();
        // Clone can take minutes; keep it off the async worker threads.
        tokio::task::spawn_blocking(move || {
            let mut args: Vec<String> = vec!["clone".into()];
            if let Some(depth) = opts.depth {
                args.push(format!("--depth={depth}"));
                args.push("--single-branch".into());
            }
            if let Some(branch) = &opts.branch {
                args.push(format!("--branch={branch}"));
            }
            args.push(url);
            args.push(dest.display().to_string());
            let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
            Self::run_git(None, &arg_refs).map(|_| ())
        })
        .await
        .map_err(|e| LatticeError::Internal(format!("clone task panicked: {e}")))?
    }

    async fn pull_latest(&self, repo: &Path) -> LatticeResult<()> {
        let repo = repo.to_path_buf();
        tokio::task::spawn_blocking(move || {
            Self::run_git(Some(&repo), &["pull", "--ff-only"]).map(|_| ())
        })
        .await
        .map_err(|e| LatticeError::Internal(format!("pull task panicked: {e}")))?
    }

    async fn diff_files(&self, repo: &Path, from: &str, to: &str) -> LatticeResult<Vec<String>> {
        let output = Self::run_git(
            Some(repo),
            &["diff", "--name-only", &format!("{from}..{to}")],
        )?;
        Ok(output.lines().map(str::to_string).collect())
    }

    async fn blame(&self, repo: &Path, file: &str) -> LatticeResult<Vec<String>> {
        let output = Self::run_git(Some(repo), &["blame", "--line-porcelain", file])?;
        Ok(output
            .lines()
            .filter_map(|l| l.strip_prefix("author "))
            .map(str::to_string)
            .collect())
    }

    async fn get_latest_sha(&self, repo: &Path) -> LatticeResult<String> {
        let repo = gix::discover(repo)
            .map_err(|e| LatticeError::Internal(format!("not a git repository: {e}")))?;
        let head = repo
            .head_id()
            .map_err(|e| LatticeError::Internal(format!("unborn HEAD: {e}")))?;
        Ok(head.to_string())
    }

    async fn list_branches(&self, repo: &Path) -> LatticeResult<Vec<String>> {
        let output = Self::run_git(Some(repo), &["branch", "--format=%(refname:short)"])?;
        Ok(output.lines().map(str::to_string).collect())
    }

    async fn list_files(&self, repo: &Path) -> LatticeResult<Vec<String>> {
        let output = Self::run_git(Some(repo), &["ls-files"])?;
        Ok(output.lines().map(str::to_string).collect())
    }

    async fn recent_commit_subjects(
        &self,
        repo: &Path,
        file: &str,
        limit: usize,
    ) -> LatticeResult<Vec<String>> {
        let count = format!("-{limit}");
        let output = Self::run_git(Some(repo), &["log", "--format=%s", &count, "--", file])?;
        Ok(output.lines().map(str::to_string).collect())
    }

    async fn post_review(&self, _pr_number: u64, _body: &str) -> LatticeResult<()> {
        Err(LatticeError::Internal(
            "provider review surface not available on the local adapter".into(),
        ))
    }

    async fn create_check_run(&self, _sha: &str, _name: &str) -> LatticeResult<u64> {
        Err(LatticeError::Internal(
            "provider check surface not available on the local adapter".into(),
        ))
    }

    async fn update_check_run(&self, _check_id: u64, _conclusion: &str) -> LatticeResult<()> {
        Err(LatticeError::Internal(
            "provider check surface not available on the local adapter".into(),
        ))
    }

    async fn get_pr_files(&self, _pr_number: u64) -> LatticeResult<Vec<PrFile>> {
        Err(LatticeError::Internal(
            "provider PR surface not available on the local adapter".into(),
        ))
    }
}

// ---------------------------------------------------------------------------
// In-memory fake
// ---------------------------------------------------------------------------

/// Scripted fake for hermetic tests: serves file trees and diffs from
/// memory and records provider calls.
#[derive(Default)]
pub struct FakeGitHost {
    /// sha -> (path -> content); `clone_repo` materializes `head_sha`.
    trees: RwLock<HashMap<String, HashMap<String, String>>>,
    head: RwLock<String>,
    /// file -> commit subjects, newest first.
    subjects: RwLock<HashMap<String, Vec<String>>>,
    reviews: RwLock<Vec<(u64, String)>>,
    checks: RwLock<Vec<(u64, String)>>,
    pr_files: RwLock<HashMap<u64, Vec<PrFile>>>,
}

impl FakeGitHost {
    /// Create an empty fake.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tree for a SHA.
    pub fn add_tree(&self, sha: &str, files: &[(&str, &str)]) {
        let tree: HashMap<String, String> = files
            .iter()
            .map(|(p, c)| ((*p).to_string(), (*c).to_string()))
            .collect();
        self.trees.write().insert(sha.to_string(), tree);
    }

    /// Point HEAD at a registered SHA.
    pub fn set_head(&self, sha: &str) {
        *self.head.write() = sha.to_string();
    }

    /// Script the recent commit subjects for a file.
    pub fn set_subjects(&self, file: &str, subjects: &[&str]) {
        self.subjects
            .write()
            .insert(file.to_string(), subjects.iter().map(|s| (*s).to_string()).collect());
    }

    /// Script the files of a PR.
    pub fn set_pr_files(&self, pr_number: u64, files: Vec<PrFile>) {
        self.pr_files.write().insert(pr_number, files);
    }

    /// Reviews posted so far (test observability).
    pub fn posted_reviews(&self) -> Vec<(u64, String)> {
        self.reviews.read().clone()
    }

    fn materialize(&self, sha: &str, dest: &Path) -> LatticeResult<()> {
        let trees = self.trees.read();
        let tree = trees
            .get(sha)
            .ok_or_else(|| LatticeError::Internal(format!("unknown sha: {sha}")))?;
        for (path, content) in tree {
            let full = dest.join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(full, content)?;
        }
        Ok(())
    }
}

#[async_trait]
impl GitHost for FakeGitHost {
    async fn clone_repo(&self, _url: &str, dest: &Path, _opts: &CloneOpts) -> LatticeResult<()> {
        let head = self.head.read().clone();
        std::fs::create_dir_all(dest)?;
        self.materialize(&head, dest)
    }

    async fn pull_latest(&self, repo: &Path) -> LatticeResult<()> {
        // Re-materialize HEAD over the existing checkout.
        let head = self.head.read().clone();
        self.materialize(&head, repo)
    }

    async fn diff_files(&self, _repo: &Path, from: &str, to: &str) -> LatticeResult<Vec<String>> {
        let trees = self.trees.read();
        let from_tree = trees.get(from).cloned().unwrap_or_default();
        let to_tree = trees
            .get(to)
            .ok_or_else(|| LatticeError::Internal(format!("unknown sha: {to}")))?;
        let mut changed: Vec<String> = Vec::new();
        for (path, content) in to_tree {
            if from_tree.get(path) != Some(content) {
                changed.push(path.clone());
            }
        }
        for path in from_tree.keys() {
            if !to_tree.contains_key(path) {
                changed.push(path.clone());
            }
        }
        changed.sort();
        Ok(changed)
    }

    async fn blame(&self, _repo: &Path, _file: &str) -> LatticeResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn get_latest_sha(&self, _repo: &Path) -> LatticeResult<String> {
        Ok(self.head.read().clone())
    }

    async fn list_branches(&self, _repo: &Path) -> LatticeResult<Vec<String>> {
        Ok(vec!["main".into()])
    }

    async fn list_files(&self, _repo: &Path) -> LatticeResult<Vec<String>> {
        let head = self.head.read().clone();
        let trees = self.trees.read();
        let mut files: Vec<String> = trees
            .get(&head)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        files.sort();
        Ok(files)
    }

    async fn recent_commit_subjects(
        &self,
        _repo: &Path,
        file: &str,
        limit: usize,
    ) -> LatticeResult<Vec<String>> {
        Ok(self
            .subjects
            .read()
            .get(file)
            .map(|s| s.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn post_review(&self, pr_number: u64, body: &str) -> LatticeResult<()> {
        self.reviews.write().push((pr_number, body.to_string()));
        Ok(())
    }

    async fn create_check_run(&self, sha: &str, name: &str) -> LatticeResult<u64> {
        let mut checks = self.checks.write();
        let id = checks.len() as u64 + 1;
        checks.push((id, format!("{sha}:{name}")));
        Ok(id)
    }

    async fn update_check_run(&self, check_id: u64, conclusion: &str) -> LatticeResult<()> {
        let mut checks = self.checks.write();
        let entry = checks
            .iter_mut()
            .find(|(id, _)| *id == check_id)
            .ok_or_else(|| LatticeError::Internal(format!("unknown check run: {check_id}")))?;
        entry.1 = format!("{}:{conclusion}", entry.1);
        Ok(())
    }

    async fn get_pr_files(&self, pr_number: u64) -> LatticeResult<Vec<PrFile>> {
        Ok(self.pr_files.read().get(&pr_number).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_clone_materializes_head() {
        let git = FakeGitHost::new();
        git.add_tree("sha1", &[("src/a.ts", "export function foo() {}")]);
        git.set_head("sha1");

        let dir = tempfile::tempdir().expect("tmp");
        let dest = dir.path().join("checkout");
        git.clone_repo("https://example.invalid/r.git", &dest, &CloneOpts::default())
            .await
            .expect("clone");

        let content = std::fs::read_to_string(dest.join("src/a.ts")).expect("read");
        assert!(content.contains("foo"));
        assert_eq!(git.get_latest_sha(&dest).await.expect("sha"), "sha1");
    }

    #[tokio::test]
    async fn test_fake_diff_reports_changes_and_deletions() {
        let git = FakeGitHost::new();
        git.add_tree("sha1", &[("a.ts", "1"), ("b.ts", "1"), ("gone.ts", "1")]);
        git.add_tree("sha2", &[("a.ts", "1"), ("b.ts", "2"), ("new.ts", "1")]);

        let diff = git
            .diff_files(Path::new("/nowhere"), "sha1", "sha2")
            .await
            .expect("diff");
        assert_eq!(diff, vec!["b.ts", "gone.ts", "new.ts"]);
    }
}
