//! Stage 1: workspace preparation.
//!
//! Clones (depth 1, single branch) or stages the repository into a
//! tenant-scoped path, scans the tree honoring ignore rules, detects
//! dominant languages and monorepo roots, and records the HEAD SHA.
//!
//! The workspace is a scoped resource: [`WorkspaceHandle`] removes the
//! directory on drop, so every exit path releases it. A safety-net
//! sweep removes orphans older than the configured age for the cases a
//! release can't cover (SIGKILL, power loss).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::IndexingConfig;
use crate::error::{LatticeError, LatticeResult};
use crate::stores::{CloneOpts, GitHost};
use crate::types::{Language, Tenant};

/// One file discovered in the workspace scan.
#[derive(Debug, Clone)]
pub struct WorkspaceFile {
    /// Path relative to the workspace root, forward slashes.
    pub path: String,
    /// Raw file bytes.
    pub bytes: Vec<u8>,
}

/// Outcome of stage 1.
#[derive(Debug)]
pub struct PreparedWorkspace {
    /// Scoped handle; dropping it removes the checkout.
    pub handle: WorkspaceHandle,
    /// Files discovered by the scan.
    pub files: Vec<WorkspaceFile>,
    /// HEAD commit SHA.
    pub head_sha: String,
    /// Dominant language per detected root (`"."` for the repo root).
    pub root_languages: HashMap<String, Language>,
    /// Monorepo roots detected by per-root manifests.
    pub monorepo_roots: Vec<String>,
}

/// Scoped workspace directory; removed on drop.
#[derive(Debug)]
pub struct WorkspaceHandle {
    path: PathBuf,
    released: bool,
}

impl WorkspaceHandle {
    /// The workspace path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the directory on disk (used when handing the path to a
    /// child workflow).
    pub fn leak(mut self) -> PathBuf {
        self.released = true;
        self.path.clone()
    }
}

impl Drop for WorkspaceHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to remove workspace; the orphan sweep will collect it"
                );
            }
        }
    }
}

/// Prepare the workspace for a run: clone, scan, detect.
pub async fn prepare(
    git: &Arc<dyn GitHost>,
    config: &IndexingConfig,
    tenant: &Tenant,
    clone_url: &str,
    branch: Option<&str>,
) -> LatticeResult<PreparedWorkspace> {
    let workspace_path = config
        .workspace_root
        .join(&tenant.org_id)
        .join(&tenant.repo_id);

    // A previous run's leftovers would make the clone fail.
    if workspace_path.exists() {
        std::fs::remove_dir_all(&workspace_path)?;
    }
    if let Some(parent) = workspace_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let handle = WorkspaceHandle {
        path: workspace_path.clone(),
        released: false,
    };

    let opts = CloneOpts {
        depth: Some(1),
        branch: branch.map(String::from),
    };
    git.clone_repo(clone_url, &workspace_path, &opts).await?;

    let head_sha = git.get_latest_sha(&workspace_path).await?;

    let ignore = build_ignore_set(&config.ignore_dirs)?;
    let files = scan_tree(&workspace_path, &ignore)?;
    let root_languages = detect_root_languages(&files);
    let monorepo_roots = detect_monorepo_roots(&files);

    tracing::info!(
        tenant = %tenant,
        files = files.len(),
        head = %head_sha,
        monorepo_roots = monorepo_roots.len(),
        "workspace prepared"
    );

    Ok(PreparedWorkspace {
        handle,
        files,
        head_sha,
        root_languages,
        monorepo_roots,
    })
}

fn build_ignore_set(ignore_dirs: &[String]) -> LatticeResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for dir in ignore_dirs {
        let pattern = format!("**/{dir}/**");
        builder.add(Glob::new(&pattern).map_err(|e| LatticeError::Config {
            details: format!("bad ignore pattern {dir}: {e}"),
        })?);
        let direct = format!("{dir}/**");
        builder.add(Glob::new(&direct).map_err(|e| LatticeError::Config {
            details: format!("bad ignore pattern {dir}: {e}"),
        })?);
    }
    builder.build().map_err(|e| LatticeError::Config {
        details: format!("ignore set: {e}"),
    })
}

/// Walk the workspace tree collecting files, honoring the ignore set.
pub fn scan_tree(root: &Path, ignore: &GlobSet) -> LatticeResult<Vec<WorkspaceFile>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            if ignore.is_match(&rel) {
                continue;
            }
            if path.is_dir() {
                // The globset matches paths under ignored dirs; skip the
                // directory itself by name too so we never descend.
                if path
                    .file_name()
                    .map(|n| n == ".git")
                    .unwrap_or(false)
                {
                    continue;
                }
                stack.push(path);
            } else {
                let bytes = std::fs::read(&path)?;
                files.push(WorkspaceFile { path: rel, bytes });
            }
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Dominant language per workspace root by extension frequency.
fn detect_root_languages(files: &[WorkspaceFile]) -> HashMap<String, Language> {
    let mut counts: HashMap<String, HashMap<Language, usize>> = HashMap::new();
    for file in files {
        let root = file
            .path
            .split('/')
            .next()
            .filter(|_| file.path.contains('/'))
            .unwrap_or(".")
            .to_string();
        let language = Language::from_path(&file.path);
        if language != Language::Unknown {
            *counts.entry(root).or_default().entry(language).or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .filter_map(|(root, langs)| {
            langs
                .into_iter()
                .max_by_key(|(_, count)| *count)
                .map(|(language, _)| (root, language))
        })
        .collect()
}

/// Manifest filenames that mark a monorepo member root.
const ROOT_MANIFESTS: &[&str] = &[
    "package.json",
    "Cargo.toml",
    "go.mod",
    "pyproject.toml",
    "pom.xml",
    "build.gradle",
    "Gemfile",
];

/// Detect monorepo roots: directories below the top level that carry
/// their own manifest.
fn detect_monorepo_roots(files: &[WorkspaceFile]) -> Vec<String> {
    let mut roots: Vec<String> = files
        .iter()
        .filter_map(|file| {
            let (dir, name) = file.path.rsplit_once('/')?;
            ROOT_MANIFESTS.contains(&name).then(|| dir.to_string())
        })
        .collect();
    roots.sort();
    roots.dedup();
    roots
}

/// Safety-net sweep: remove workspaces older than `max_age_hours`.
/// Returns the number removed.
pub fn sweep_orphans(workspace_root: &Path, max_age_hours: u64) -> LatticeResult<usize> {
    if !workspace_root.exists() {
        return Ok(0);
    }
    let cutoff = std::time::SystemTime::now()
        - std::time::Duration::from_secs(max_age_hours * 3600);
    let mut removed = 0;
    for org_entry in std::fs::read_dir(workspace_root)? {
        let org_dir = org_entry?.path();
        if !org_dir.is_dir() {
            continue;
        }
        for repo_entry in std::fs::read_dir(&org_dir)? {
            let repo_dir = repo_entry?.path();
            let modified = repo_dir.metadata().and_then(|m| m.modified());
            if let Ok(modified) = modified {
                if modified < cutoff {
                    if let Err(e) = std::fs::remove_dir_all(&repo_dir) {
                        tracing::warn!(path = %repo_dir.display(), error = %e, "orphan sweep failed");
                    } else {
                        removed += 1;
                    }
                }
            }
        }
    }
    if removed > 0 {
        tracing::info!(removed, "swept orphaned workspaces");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::FakeGitHost;

    fn config_with_root(root: &Path) -> IndexingConfig {
        IndexingConfig {
            workspace_root: root.to_path_buf(),
            ..IndexingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_prepare_scans_and_detects() {
        let git = FakeGitHost::new();
        git.add_tree(
            "sha1",
            &[
                ("src/a.ts", "export function a() {}"),
                ("src/b.ts", "export function b() {}"),
                ("scripts/run.py", "def run():\n    pass\n"),
                ("services/api/package.json", "{}"),
                ("node_modules/dep/index.js", "ignored"),
            ],
        );
        git.set_head("sha1");
        let git: Arc<dyn GitHost> = Arc::new(git);

        let dir = tempfile::tempdir().expect("tmp");
        let config = config_with_root(dir.path());
        let tenant = Tenant::new("o1", "r1");

        let prepared = prepare(&git, &config, &tenant, "https://example.invalid/r.git", None)
            .await
            .expect("prepare");

        assert_eq!(prepared.head_sha, "sha1");
        assert!(
            !prepared.files.iter().any(|f| f.path.contains("node_modules")),
            "ignore rules must exclude artifact dirs"
        );
        assert_eq!(prepared.root_languages.get("src"), Some(&Language::TypeScript));
        assert_eq!(prepared.monorepo_roots, vec!["services/api"]);
    }

    #[tokio::test]
    async fn test_workspace_handle_cleans_up_on_drop() {
        let git = FakeGitHost::new();
        git.add_tree("sha1", &[("a.txt", "x")]);
        git.set_head("sha1");
        let git: Arc<dyn GitHost> = Arc::new(git);

        let dir = tempfile::tempdir().expect("tmp");
        let config = config_with_root(dir.path());
        let tenant = Tenant::new("o1", "r1");

        let prepared = prepare(&git, &config, &tenant, "url", None)
            .await
            .expect("prepare");
        let workspace_path = prepared.handle.path().to_path_buf();
        assert!(workspace_path.exists());

        drop(prepared);
        assert!(!workspace_path.exists(), "drop must release the workspace");
    }

    #[test]
    fn test_sweep_orphans_respects_age() {
        let dir = tempfile::tempdir().expect("tmp");
        let stale = dir.path().join("o1").join("r1");
        std::fs::create_dir_all(&stale).expect("mkdir");

        // Zero-hour cutoff treats everything as stale.
        let removed = sweep_orphans(dir.path(), 0).expect("sweep");
        assert_eq!(removed, 1);
        assert!(!stale.exists());
    }

    #[test]
    fn test_detect_monorepo_roots_dedupes() {
        let files = vec![
            WorkspaceFile {
                path: "services/api/package.json".into(),
                bytes: vec![],
            },
            WorkspaceFile {
                path: "services/api/src/index.ts".into(),
                bytes: vec![],
            },
            WorkspaceFile {
                path: "services/worker/go.mod".into(),
                bytes: vec![],
            },
            WorkspaceFile {
                path: "package.json".into(),
                bytes: vec![],
            },
        ];
        let roots = detect_monorepo_roots(&files);
        assert_eq!(roots, vec!["services/api", "services/worker"]);
    }
}
