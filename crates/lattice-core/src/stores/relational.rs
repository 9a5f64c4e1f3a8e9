//! Relational store port: repo/workspace/snapshot metadata and
//! pipeline-run rows.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection};

use crate::error::{LatticeError, LatticeResult};
use crate::types::{
    GraphSnapshotMeta, Installation, ManifestData, PipelineRun, RepoRecord, RepoStatus, StepState,
    Tenant, UserWorkspace,
};

/// Port over the relational database.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Fetch a repo record.
    async fn get_repo(&self, tenant: &Tenant) -> LatticeResult<Option<RepoRecord>>;

    /// Insert or replace a repo record.
    async fn upsert_repo(&self, repo: &RepoRecord) -> LatticeResult<()>;

    /// Update only the status (and `updated_at`) of a repo.
    async fn update_repo_status(&self, tenant: &Tenant, status: RepoStatus) -> LatticeResult<()>;

    /// Update manifest facts and context documents from ontology discovery.
    async fn update_repo_manifest(
        &self,
        tenant: &Tenant,
        manifest: &ManifestData,
    ) -> LatticeResult<()>;

    /// Record a finalized index: HEAD SHA, index version, and counts.
    async fn record_finalized_index(
        &self,
        tenant: &Tenant,
        sha: &str,
        index_version: &str,
        entity_count: usize,
        edge_count: usize,
    ) -> LatticeResult<()>;

    /// Insert or replace a pipeline run row.
    async fn upsert_pipeline_run(&self, run: &PipelineRun) -> LatticeResult<()>;

    /// Fetch a pipeline run.
    async fn get_pipeline_run(&self, run_id: &str) -> LatticeResult<Option<PipelineRun>>;

    /// Append or update a step record on an existing run.
    async fn append_pipeline_step(&self, run_id: &str, step: &StepState) -> LatticeResult<()>;

    /// Insert or replace the snapshot metadata row for a repo.
    async fn upsert_graph_snapshot_meta(&self, meta: &GraphSnapshotMeta) -> LatticeResult<()>;

    /// Fetch the snapshot metadata row for a repo.
    async fn get_graph_snapshot_meta(
        &self,
        tenant: &Tenant,
    ) -> LatticeResult<Option<GraphSnapshotMeta>>;

    /// Provider installations for an organization.
    async fn get_installations(&self, org_id: &str) -> LatticeResult<Vec<Installation>>;

    /// Register an installation.
    async fn upsert_installation(&self, installation: &Installation) -> LatticeResult<()>;

    /// Create a user workspace record.
    async fn create_workspace(&self, workspace: &UserWorkspace) -> LatticeResult<()>;

    /// Fetch a user workspace.
    async fn get_workspace(&self, workspace_id: &str) -> LatticeResult<Option<UserWorkspace>>;

    /// Record a workspace sync to a SHA.
    async fn update_workspace_sync(&self, workspace_id: &str, sha: &str) -> LatticeResult<()>;
}

// ---------------------------------------------------------------------------
// In-memory fake
// ---------------------------------------------------------------------------

/// Hermetic in-memory relational store used by tests.
#[derive(Default)]
pub struct MemoryRelationalStore {
    repos: RwLock<HashMap<Tenant, RepoRecord>>,
    runs: RwLock<HashMap<String, PipelineRun>>,
    snapshots: RwLock<HashMap<Tenant, GraphSnapshotMeta>>,
    installations: RwLock<Vec<Installation>>,
    workspaces: RwLock<HashMap<String, UserWorkspace>>,
}

impl MemoryRelationalStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelationalStore for MemoryRelationalStore {
    async fn get_repo(&self, tenant: &Tenant) -> LatticeResult<Option<RepoRecord>> {
        Ok(self.repos.read().get(tenant).cloned())
    }

    async fn upsert_repo(&self, repo: &RepoRecord) -> LatticeResult<()> {
        let tenant = Tenant::new(repo.org_id.clone(), repo.repo_id.clone());
        self.repos.write().insert(tenant, repo.clone());
        Ok(())
    }

    async fn update_repo_status(&self, tenant: &Tenant, status: RepoStatus) -> LatticeResult<()> {
        let mut repos = self.repos.write();
        let repo = repos.get_mut(tenant).ok_or_else(|| LatticeError::RepoNotFound {
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
        })?;
        repo.status = status;
        repo.updated_at = Utc::now();
        Ok(())
    }

    async fn update_repo_manifest(
        &self,
        tenant: &Tenant,
        manifest: &ManifestData,
    ) -> LatticeResult<()> {
        let mut repos = self.repos.write();
        let repo = repos.get_mut(tenant).ok_or_else(|| LatticeError::RepoNotFound {
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
        })?;
        repo.manifest_data = manifest.clone();
        repo.updated_at = Utc::now();
        Ok(())
    }

    async fn record_finalized_index(
        &self,
        tenant: &Tenant,
        sha: &str,
        index_version: &str,
        entity_count: usize,
        edge_count: usize,
    ) -> LatticeResult<()> {
        let mut repos = self.repos.write();
        let repo = repos.get_mut(tenant).ok_or_else(|| LatticeError::RepoNotFound {
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
        })?;
        repo.last_indexed_sha = Some(sha.to_string());
        repo.index_version = Some(index_version.to_string());
        repo.entity_count = entity_count;
        repo.edge_count = edge_count;
        repo.updated_at = Utc::now();
        Ok(())
    }

    async fn upsert_pipeline_run(&self, run: &PipelineRun) -> LatticeResult<()> {
        self.runs.write().insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn get_pipeline_run(&self, run_id: &str) -> LatticeResult<Option<PipelineRun>> {
        Ok(self.runs.read().get(run_id).cloned())
    }

    async fn append_pipeline_step(&self, run_id: &str, step: &StepState) -> LatticeResult<()> {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| LatticeError::Internal(format!("run not found: {run_id}")))?;
        if let Some(existing) = run.steps.iter_mut().find(|s| s.step == step.step) {
            *existing = step.clone();
        } else {
            run.steps.push(step.clone());
        }
        Ok(())
    }

    async fn upsert_graph_snapshot_meta(&self, meta: &GraphSnapshotMeta) -> LatticeResult<()> {
        let tenant = Tenant::new(meta.org_id.clone(), meta.repo_id.clone());
        self.snapshots.write().insert(tenant, meta.clone());
        Ok(())
    }

    async fn get_graph_snapshot_meta(
        &self,
        tenant: &Tenant,
    ) -> LatticeResult<Option<GraphSnapshotMeta>> {
        Ok(self.snapshots.read().get(tenant).cloned())
    }

    async fn get_installations(&self, org_id: &str) -> LatticeResult<Vec<Installation>> {
        Ok(self
            .installations
            .read()
            .iter()
            .filter(|i| i.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn upsert_installation(&self, installation: &Installation) -> LatticeResult<()> {
        let mut installations = self.installations.write();
        installations.retain(|i| i.id != installation.id);
        installations.push(installation.clone());
        Ok(())
    }

    async fn create_workspace(&self, workspace: &UserWorkspace) -> LatticeResult<()> {
        self.workspaces
            .write()
            .insert(workspace.id.clone(), workspace.clone());
        Ok(())
    }

    async fn get_workspace(&self, workspace_id: &str) -> LatticeResult<Option<UserWorkspace>> {
        Ok(self.workspaces.read().get(workspace_id).cloned())
    }

    async fn update_workspace_sync(&self, workspace_id: &str, sha: &str) -> LatticeResult<()> {
        let mut workspaces = self.workspaces.write();
        let workspace = workspaces.get_mut(workspace_id).ok_or_else(|| {
            LatticeError::Internal(format!("workspace not found: {workspace_id}"))
        })?;
        workspace.last_synced_sha = Some(sha.to_string());
        workspace.last_synced_at = Some(Utc::now());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SQLite adapter
// ---------------------------------------------------------------------------

/// Relational store adapter over a local SQLite database.
pub struct SqliteRelationalStore {
    conn: Mutex<Connection>,
}

impl SqliteRelationalStore {
    /// Open or create the database at the given path.
    pub fn open(db_path: &std::path::Path) -> LatticeResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Open an in-memory database (tests).
    pub fn open_in_memory() -> LatticeResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> LatticeResult<()> {
        self.conn.lock().execute_batch(
            "CREATE TABLE IF NOT EXISTS repos (
                 org_id  TEXT NOT NULL,
                 repo_id TEXT NOT NULL,
                 doc     TEXT NOT NULL,
                 PRIMARY KEY (org_id, repo_id)
             );
             CREATE TABLE IF NOT EXISTS pipeline_runs (
                 run_id TEXT PRIMARY KEY,
                 org_id TEXT NOT NULL,
                 repo_id TEXT NOT NULL,
                 doc    TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_runs_repo ON pipeline_runs (org_id, repo_id);
             CREATE TABLE IF NOT EXISTS graph_snapshots (
                 org_id  TEXT NOT NULL,
                 repo_id TEXT NOT NULL,
                 doc     TEXT NOT NULL,
                 PRIMARY KEY (org_id, repo_id)
             );
             CREATE TABLE IF NOT EXISTS installations (
                 id     TEXT PRIMARY KEY,
                 org_id TEXT NOT NULL,
                 doc    TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_installations_org ON installations (org_id);
             CREATE TABLE IF NOT EXISTS user_workspaces (
                 id  TEXT PRIMARY KEY,
                 doc TEXT NOT NULL
             );",
        )?;
        Ok(())
    }

    fn load_repo(conn: &Connection, tenant: &Tenant) -> LatticeResult<Option<RepoRecord>> {
        let mut stmt =
            conn.prepare_cached("SELECT doc FROM repos WHERE org_id = ?1 AND repo_id = ?2")?;
        let mut rows = stmt.query(params![tenant.org_id, tenant.repo_id])?;
        match rows.next()? {
            Some(row) => {
                let doc: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&doc)?))
            }
            None => Ok(None),
        }
    }

    fn save_repo(conn: &Connection, repo: &RepoRecord) -> LatticeResult<()> {
        conn.execute(
            "INSERT INTO repos (org_id, repo_id, doc) VALUES (?1, ?2, ?3)
             ON CONFLICT (org_id, repo_id) DO UPDATE SET doc = excluded.doc",
            params![repo.org_id, repo.repo_id, serde_json::to_string(repo)?],
        )?;
        Ok(())
    }

    fn modify_repo(
        &self,
        tenant: &Tenant,
        f: impl FnOnce(&mut RepoRecord),
    ) -> LatticeResult<()> {
        let conn = self.conn.lock();
        let mut repo = Self::load_repo(&conn, tenant)?.ok_or_else(|| LatticeError::RepoNotFound {
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
        })?;
        f(&mut repo);
        repo.updated_at = Utc::now();
        Self::save_repo(&conn, &repo)
    }
}

#[async_trait]
impl RelationalStore for SqliteRelationalStore {
    async fn get_repo(&self, tenant: &Tenant) -> LatticeResult<Option<RepoRecord>> {
        let conn = self.conn.lock();
        Self::load_repo(&conn, tenant)
    }

    async fn upsert_repo(&self, repo: &RepoRecord) -> LatticeResult<()> {
        let conn = self.conn.lock();
        Self::save_repo(&conn, repo)
    }

    async fn update_repo_status(&self, tenant: &Tenant, status: RepoStatus) -> LatticeResult<()> {
        self.modify_repo(tenant, |repo| repo.status = status)
    }

    async fn update_repo_manifest(
        &self,
        tenant: &Tenant,
        manifest: &ManifestData,
    ) -> LatticeResult<()> {
        self.modify_repo(tenant, |repo| repo.manifest_data = manifest.clone())
    }

    async fn record_finalized_index(
        &self,
        tenant: &Tenant,
        sha: &str,
        index_version: &str,
        entity_count: usize,
        edge_count: usize,
    ) -> LatticeResult<()> {
        self.modify_repo(tenant, |repo| {
            repo.last_indexed_sha = Some(sha.to_string());
            repo.index_version = Some(index_version.to_string());
            repo.entity_count = entity_count;
            repo.edge_count = edge_count;
        })
    }

    async fn upsert_pipeline_run(&self, run: &PipelineRun) -> LatticeResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO pipeline_runs (run_id, org_id, repo_id, doc) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (run_id) DO UPDATE SET doc = excluded.doc",
            params![
                run.run_id,
                run.org_id,
                run.repo_id,
                serde_json::to_string(run)?
            ],
        )?;
        Ok(())
    }

    async fn get_pipeline_run(&self, run_id: &str) -> LatticeResult<Option<PipelineRun>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT doc FROM pipeline_runs WHERE run_id = ?1")?;
        let mut rows = stmt.query(params![run_id])?;
        match rows.next()? {
            Some(row) => {
                let doc: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&doc)?))
            }
            None => Ok(None),
        }
    }

    async fn append_pipeline_step(&self, run_id: &str, step: &StepState) -> LatticeResult<()> {
        let mut run = self
            .get_pipeline_run(run_id)
            .await?
            .ok_or_else(|| LatticeError::Internal(format!("run not found: {run_id}")))?;
        if let Some(existing) = run.steps.iter_mut().find(|s| s.step == step.step) {
            *existing = step.clone();
        } else {
            run.steps.push(step.clone());
        }
        self.upsert_pipeline_run(&run).await
    }

    async fn upsert_graph_snapshot_meta(&self, meta: &GraphSnapshotMeta) -> LatticeResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO graph_snapshots (org_id, repo_id, doc) VALUES (?1, ?2, ?3)
             ON CONFLICT (org_id, repo_id) DO UPDATE SET doc = excluded.doc",
            params![meta.org_id, meta.repo_id, serde_json::to_string(meta)?],
        )?;
        Ok(())
    }

    async fn get_graph_snapshot_meta(
        &self,
        tenant: &Tenant,
    ) -> LatticeResult<Option<GraphSnapshotMeta>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT doc FROM graph_snapshots WHERE org_id = ?1 AND repo_id = ?2")?;
        let mut rows = stmt.query(params![tenant.org_id, tenant.repo_id])?;
        match rows.next()? {
            Some(row) => {
                let doc: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&doc)?))
            }
            None => Ok(None),
        }
    }

    async fn get_installations(&self, org_id: &str) -> LatticeResult<Vec<Installation>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT doc FROM installations WHERE org_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![org_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for doc in rows {
            out.push(serde_json::from_str(&doc?)?);
        }
        Ok(out)
    }

    async fn upsert_installation(&self, installation: &Installation) -> LatticeResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO installations (id, org_id, doc) VALUES (?1, ?2, ?3)
             ON CONFLICT (id) DO UPDATE SET org_id = excluded.org_id, doc = excluded.doc",
            params![
                installation.id,
                installation.org_id,
                serde_json::to_string(installation)?
            ],
        )?;
        Ok(())
    }

    async fn create_workspace(&self, workspace: &UserWorkspace) -> LatticeResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO user_workspaces (id, doc) VALUES (?1, ?2)
             ON CONFLICT (id) DO UPDATE SET doc = excluded.doc",
            params![workspace.id, serde_json::to_string(workspace)?],
        )?;
        Ok(())
    }

    async fn get_workspace(&self, workspace_id: &str) -> LatticeResult<Option<UserWorkspace>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT doc FROM user_workspaces WHERE id = ?1")?;
        let mut rows = stmt.query(params![workspace_id])?;
        match rows.next()? {
            Some(row) => {
                let doc: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&doc)?))
            }
            None => Ok(None),
        }
    }

    async fn update_workspace_sync(&self, workspace_id: &str, sha: &str) -> LatticeResult<()> {
        let mut workspace = self.get_workspace(workspace_id).await?.ok_or_else(|| {
            LatticeError::Internal(format!("workspace not found: {workspace_id}"))
        })?;
        workspace.last_synced_sha = Some(sha.to_string());
        workspace.last_synced_at = Some(Utc::now());
        self.create_workspace(&workspace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PipelineStep;

    fn repo(tenant: &Tenant) -> RepoRecord {
        RepoRecord {
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
            provider: "github".into(),
            clone_url: Some("https://example.invalid/repo.git".into()),
            default_branch: "main".into(),
            last_indexed_sha: None,
            index_version: None,
            status: RepoStatus::Pending,
            entity_count: 0,
            edge_count: 0,
            manifest_data: ManifestData::default(),
            context_documents: vec![],
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_status_update_requires_existing_repo() {
        let store = MemoryRelationalStore::new();
        let tenant = Tenant::new("o", "r");
        let err = store
            .update_repo_status(&tenant, RepoStatus::Indexing)
            .await
            .expect_err("should fail");
        assert!(matches!(err, LatticeError::RepoNotFound { .. }));

        store.upsert_repo(&repo(&tenant)).await.expect("create");
        store
            .update_repo_status(&tenant, RepoStatus::Indexing)
            .await
            .expect("update");
        let fetched = store.get_repo(&tenant).await.expect("get").expect("some");
        assert_eq!(fetched.status, RepoStatus::Indexing);
    }

    #[tokio::test]
    async fn test_pipeline_step_bookkeeping() {
        let store = MemoryRelationalStore::new();
        let run = PipelineRun {
            run_id: "run-1".into(),
            index_version: "v1".into(),
            org_id: "o".into(),
            repo_id: "r".into(),
            steps: vec![],
            total_entities: 0,
            total_edges: 0,
            started_at: Utc::now(),
            finished_at: None,
        };
        store.upsert_pipeline_run(&run).await.expect("insert");

        let started = StepState {
            step: PipelineStep::Prepare,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        };
        store
            .append_pipeline_step("run-1", &started)
            .await
            .expect("start");

        let completed = StepState {
            completed_at: Some(Utc::now()),
            ..started
        };
        store
            .append_pipeline_step("run-1", &completed)
            .await
            .expect("complete");

        let fetched = store
            .get_pipeline_run("run-1")
            .await
            .expect("get")
            .expect("some");
        assert_eq!(fetched.steps.len(), 1, "start then complete updates in place");
        assert!(fetched.steps[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_workspace_sync_roundtrip() {
        let store = MemoryRelationalStore::new();
        store
            .create_workspace(&UserWorkspace {
                id: "ws-1".into(),
                org_id: "o".into(),
                user_id: "u".into(),
                repo_id: "r".into(),
                branch: "main".into(),
                last_synced_sha: None,
                last_synced_at: None,
            })
            .await
            .expect("create");

        store
            .update_workspace_sync("ws-1", "abc123")
            .await
            .expect("sync");
        let workspace = store
            .get_workspace("ws-1")
            .await
            .expect("get")
            .expect("some");
        assert_eq!(workspace.last_synced_sha.as_deref(), Some("abc123"));
        assert!(workspace.last_synced_at.is_some());

        assert!(store
            .update_workspace_sync("missing", "x")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_sqlite_repo_roundtrip() {
        let store = SqliteRelationalStore::open_in_memory().expect("open");
        let tenant = Tenant::new("o", "r");
        store.upsert_repo(&repo(&tenant)).await.expect("create");
        store
            .record_finalized_index(&tenant, "abc123", "v1", 10, 20)
            .await
            .expect("finalize");

        let fetched = store.get_repo(&tenant).await.expect("get").expect("some");
        assert_eq!(fetched.last_indexed_sha.as_deref(), Some("abc123"));
        assert_eq!(fetched.entity_count, 10);
        assert_eq!(fetched.edge_count, 20);
    }
}
