//! SQLite-backed graph store adapter.
//!
//! Documents are stored as JSON with extracted columns for every
//! secondary index the read paths need. SQLite runs in WAL mode; the
//! single connection is serialized behind a mutex (one writer at a time
//! is a SQLite constraint anyway).

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::error::{LatticeError, LatticeResult};
use crate::types::{
    CodeEdge, CodeEntity, DomainOntology, EdgeKind, HealthReport, IndexEvent, Justification,
    LedgerEntry, LedgerStatus, Pattern, Rule, Tenant, WorkingSnapshot, valid_to_infinity,
};

use super::graph::GraphStore;

/// Graph store adapter over a local SQLite database.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

impl SqliteGraphStore {
    /// Open or create the database at the given path.
    pub fn open(db_path: &Path) -> LatticeResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "cache_size", "-64000")?;

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
        self.conn.lock().execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }

    fn rows_to_docs<T: serde::de::DeserializeOwned>(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> LatticeResult<Vec<T>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for doc in rows {
            out.push(serde_json::from_str(&doc?)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn bootstrap_schema(&self) -> LatticeResult<()> {
        self.ensure_schema()
    }

    async fn health_check(&self) -> LatticeResult<()> {
        let conn = self.conn.lock();
        let ok: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if ok == "ok" {
            Ok(())
        } else {
            Err(LatticeError::StoreWrite {
                details: format!("integrity check failed: {ok}"),
            })
        }
    }

    async fn bulk_upsert_entities(
        &self,
        tenant: &Tenant,
        entities: &[CodeEntity],
    ) -> LatticeResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO entities (org_id, repo_id, key, file_path, kind, name, index_version, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (org_id, repo_id, key) DO UPDATE SET
                     file_path = excluded.file_path,
                     kind = excluded.kind,
                     name = excluded.name,
                     index_version = excluded.index_version,
                     doc = excluded.doc",
            )?;
            for entity in entities {
                stmt.execute(params![
                    tenant.org_id,
                    tenant.repo_id,
                    entity.key,
                    entity.file_path,
                    entity.kind.as_str(),
                    entity.name,
                    entity.index_version,
                    serde_json::to_string(entity)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(entities.len())
    }

    async fn bulk_upsert_edges(&self, tenant: &Tenant, edges: &[CodeEdge]) -> LatticeResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO edges (org_id, repo_id, key, from_key, to_key, kind, index_version, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (org_id, repo_id, key) DO UPDATE SET
                     index_version = excluded.index_version,
                     doc = excluded.doc",
            )?;
            for edge in edges {
                stmt.execute(params![
                    tenant.org_id,
                    tenant.repo_id,
                    edge.key,
                    edge.from_key,
                    edge.to_key,
                    edge.kind.as_str(),
                    edge.index_version,
                    serde_json::to_string(edge)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(edges.len())
    }

    async fn get_entity(&self, tenant: &Tenant, key: &str) -> LatticeResult<Option<CodeEntity>> {
        let conn = self.conn.lock();
        let mut rows: Vec<CodeEntity> = Self::rows_to_docs(
            &conn,
            "SELECT doc FROM entities WHERE org_id = ?1 AND repo_id = ?2 AND key = ?3",
            &[&tenant.org_id, &tenant.repo_id, &key],
        )?;
        Ok(rows.pop())
    }

    async fn get_entities_by_keys(
        &self,
        tenant: &Tenant,
        keys: &[String],
    ) -> LatticeResult<Vec<CodeEntity>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entity) = self.get_entity(tenant, key).await? {
                out.push(entity);
            }
        }
        Ok(out)
    }

    async fn get_entities_by_file(
        &self,
        tenant: &Tenant,
        file_path: &str,
    ) -> LatticeResult<Vec<CodeEntity>> {
        let conn = self.conn.lock();
        let mut rows: Vec<CodeEntity> = Self::rows_to_docs(
            &conn,
            "SELECT doc FROM entities WHERE org_id = ?1 AND repo_id = ?2 AND file_path = ?3",
            &[&tenant.org_id, &tenant.repo_id, &file_path],
        )?;
        rows.sort_by_key(|e| e.start_line);
        Ok(rows)
    }

    async fn search_entities(
        &self,
        tenant: &Tenant,
        name_query: &str,
        limit: usize,
    ) -> LatticeResult<Vec<CodeEntity>> {
        let conn = self.conn.lock();
        let pattern = format!("%{name_query}%");
        let limit = limit as i64;
        Self::rows_to_docs(
            &conn,
            "SELECT doc FROM entities
             WHERE org_id = ?1 AND repo_id = ?2 AND name LIKE ?3
             ORDER BY name LIMIT ?4",
            &[&tenant.org_id, &tenant.repo_id, &pattern, &limit],
        )
    }

    async fn get_all_entities(&self, tenant: &Tenant) -> LatticeResult<Vec<CodeEntity>> {
        let conn = self.conn.lock();
        Self::rows_to_docs(
            &conn,
            "SELECT doc FROM entities WHERE org_id = ?1 AND repo_id = ?2 ORDER BY key",
            &[&tenant.org_id, &tenant.repo_id],
        )
    }

    async fn list_files(&self, tenant: &Tenant) -> LatticeResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT file_path FROM entities
             WHERE org_id = ?1 AND repo_id = ?2 ORDER BY file_path",
        )?;
        let rows = stmt.query_map(params![tenant.org_id, tenant.repo_id], |row| row.get(0))?;
        let mut out = Vec::new();
        for path in rows {
            out.push(path?);
        }
        Ok(out)
    }

    async fn get_callers_of(&self, tenant: &Tenant, key: &str) -> LatticeResult<Vec<CodeEntity>> {
        let conn = self.conn.lock();
        Self::rows_to_docs(
            &conn,
            "SELECT e.doc FROM edges d
             JOIN entities e ON e.org_id = d.org_id AND e.repo_id = d.repo_id AND e.key = d.from_key
             WHERE d.org_id = ?1 AND d.repo_id = ?2 AND d.to_key = ?3 AND d.kind = 'calls'
             ORDER BY e.key",
            &[&tenant.org_id, &tenant.repo_id, &key],
        )
    }

    async fn get_callees_of(&self, tenant: &Tenant, key: &str) -> LatticeResult<Vec<CodeEntity>> {
        let conn = self.conn.lock();
        Self::rows_to_docs(
            &conn,
            "SELECT e.doc FROM edges d
             JOIN entities e ON e.org_id = d.org_id AND e.repo_id = d.repo_id AND e.key = d.to_key
             WHERE d.org_id = ?1 AND d.repo_id = ?2 AND d.from_key = ?3 AND d.kind = 'calls'
             ORDER BY e.key",
            &[&tenant.org_id, &tenant.repo_id, &key],
        )
    }

    async fn get_subgraph(
        &self,
        tenant: &Tenant,
        roots: &[String],
        hops: usize,
        max_entities: usize,
    ) -> LatticeResult<Vec<CodeEntity>> {
        // BFS in application code; the hop counts are small (<= 2) and the
        // entity budget tight (<= 50), so per-hop queries stay cheap.
        let mut seen: HashSet<String> = roots.iter().cloned().collect();
        let mut queue: VecDeque<(String, usize)> = roots.iter().map(|k| (k.clone(), 0)).collect();

        while let Some((key, depth)) = queue.pop_front() {
            if depth >= hops || seen.len() >= max_entities {
                continue;
            }
            let neighbors: Vec<String> = {
                let conn = self.conn.lock();
                let mut stmt = conn.prepare_cached(
                    "SELECT from_key, to_key FROM edges
                     WHERE org_id = ?1 AND repo_id = ?2
                       AND (from_key = ?3 OR to_key = ?3)
                       AND kind IN ('calls', 'references', 'emits', 'listens_to')",
                )?;
                let rows = stmt.query_map(params![tenant.org_id, tenant.repo_id, key], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                let mut out = Vec::new();
                for row in rows {
                    let (from, to) = row?;
                    out.push(if from == key { to } else { from });
                }
                out
            };
            for neighbor in neighbors {
                if seen.len() >= max_entities {
                    break;
                }
                if seen.insert(neighbor.clone()) {
                    queue.push_back((neighbor, depth + 1));
                }
            }
        }

        let keys: Vec<String> = seen.into_iter().collect();
        let mut out = self.get_entities_by_keys(tenant, &keys).await?;
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    async fn get_all_edges(&self, tenant: &Tenant) -> LatticeResult<Vec<CodeEdge>> {
        let conn = self.conn.lock();
        Self::rows_to_docs(
            &conn,
            "SELECT doc FROM edges WHERE org_id = ?1 AND repo_id = ?2 ORDER BY key",
            &[&tenant.org_id, &tenant.repo_id],
        )
    }

    async fn get_edges_page(
        &self,
        tenant: &Tenant,
        offset: usize,
        limit: usize,
    ) -> LatticeResult<Vec<CodeEdge>> {
        let conn = self.conn.lock();
        let offset = offset as i64;
        let limit = limit as i64;
        Self::rows_to_docs(
            &conn,
            "SELECT doc FROM edges WHERE org_id = ?1 AND repo_id = ?2
             ORDER BY key LIMIT ?3 OFFSET ?4",
            &[&tenant.org_id, &tenant.repo_id, &limit, &offset],
        )
    }

    async fn delete_by_index_version(
        &self,
        tenant: &Tenant,
        keep_version: &str,
    ) -> LatticeResult<(usize, usize)> {
        let conn = self.conn.lock();
        let entities = conn.execute(
            "DELETE FROM entities WHERE org_id = ?1 AND repo_id = ?2 AND index_version != ?3",
            params![tenant.org_id, tenant.repo_id, keep_version],
        )?;
        let edges = conn.execute(
            "DELETE FROM edges WHERE org_id = ?1 AND repo_id = ?2 AND index_version != ?3",
            params![tenant.org_id, tenant.repo_id, keep_version],
        )?;
        Ok((entities, edges))
    }

    async fn delete_entities_by_file(
        &self,
        tenant: &Tenant,
        file_path: &str,
    ) -> LatticeResult<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "DELETE FROM entities WHERE org_id = ?1 AND repo_id = ?2 AND file_path = ?3",
            params![tenant.org_id, tenant.repo_id, file_path],
        )?)
    }

    async fn delete_edges_referencing(
        &self,
        tenant: &Tenant,
        keys: &[String],
    ) -> LatticeResult<usize> {
        let conn = self.conn.lock();
        let mut deleted = 0;
        for key in keys {
            deleted += conn.execute(
                "DELETE FROM edges WHERE org_id = ?1 AND repo_id = ?2
                 AND (from_key = ?3 OR to_key = ?3)",
                params![tenant.org_id, tenant.repo_id, key],
            )?;
        }
        Ok(deleted)
    }

    async fn count_entities_by_kind(
        &self,
        tenant: &Tenant,
    ) -> LatticeResult<BTreeMap<String, usize>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT kind, COUNT(*) FROM entities
             WHERE org_id = ?1 AND repo_id = ?2 GROUP BY kind",
        )?;
        let rows = stmt.query_map(params![tenant.org_id, tenant.repo_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let (kind, count) = row?;
            counts.insert(kind, count as usize);
        }
        Ok(counts)
    }

    async fn bulk_upsert_justifications(
        &self,
        tenant: &Tenant,
        justifications: &[Justification],
    ) -> LatticeResult<usize> {
        let sentinel = valid_to_infinity().to_rfc3339();
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut close = tx.prepare_cached(
                "UPDATE justifications SET valid_to = ?4,
                     doc = json_set(doc, '$.valid_to', ?4)
                 WHERE org_id = ?1 AND repo_id = ?2 AND entity_id = ?3 AND valid_to = ?5",
            )?;
            let mut insert = tx.prepare_cached(
                "INSERT INTO justifications (org_id, repo_id, entity_id, valid_from, valid_to, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for row in justifications {
                close.execute(params![
                    tenant.org_id,
                    tenant.repo_id,
                    row.entity_id,
                    now,
                    sentinel
                ])?;
                insert.execute(params![
                    tenant.org_id,
                    tenant.repo_id,
                    row.entity_id,
                    row.valid_from.to_rfc3339(),
                    row.valid_to.to_rfc3339(),
                    serde_json::to_string(row)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(justifications.len())
    }

    async fn get_justification(
        &self,
        tenant: &Tenant,
        entity_key: &str,
    ) -> LatticeResult<Option<Justification>> {
        let sentinel = valid_to_infinity().to_rfc3339();
        let conn = self.conn.lock();
        let mut rows: Vec<Justification> = Self::rows_to_docs(
            &conn,
            "SELECT doc FROM justifications
             WHERE org_id = ?1 AND repo_id = ?2 AND entity_id = ?3 AND valid_to = ?4",
            &[&tenant.org_id, &tenant.repo_id, &entity_key, &sentinel],
        )?;
        Ok(rows.pop())
    }

    async fn get_current_justifications(
        &self,
        tenant: &Tenant,
    ) -> LatticeResult<Vec<Justification>> {
        let sentinel = valid_to_infinity().to_rfc3339();
        let conn = self.conn.lock();
        Self::rows_to_docs(
            &conn,
            "SELECT doc FROM justifications
             WHERE org_id = ?1 AND repo_id = ?2 AND valid_to = ?3",
            &[&tenant.org_id, &tenant.repo_id, &sentinel],
        )
    }

    async fn append_ledger_entry(&self, tenant: &Tenant, entry: &LedgerEntry) -> LatticeResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ledger_entries (org_id, repo_id, id, branch, status, doc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                tenant.org_id,
                tenant.repo_id,
                entry.id,
                entry.branch,
                serde_json::to_string(&entry.status)?,
                serde_json::to_string(entry)?,
            ],
        )?;
        Ok(())
    }

    async fn update_ledger_entry_status(
        &self,
        tenant: &Tenant,
        entry_id: &str,
        status: LedgerStatus,
    ) -> LatticeResult<()> {
        let current = {
            let conn = self.conn.lock();
            let mut rows: Vec<LedgerEntry> = Self::rows_to_docs(
                &conn,
                "SELECT doc FROM ledger_entries
                 WHERE org_id = ?1 AND repo_id = ?2 AND id = ?3",
                &[&tenant.org_id, &tenant.repo_id, &entry_id],
            )?;
            rows.pop().ok_or_else(|| {
                LatticeError::Internal(format!("ledger entry not found: {entry_id}"))
            })?
        };

        if !current.status.can_transition_to(status) {
            return Err(LatticeError::Conflict {
                reason: format!(
                    "illegal ledger transition {:?} -> {:?} for {entry_id}",
                    current.status, status
                ),
            });
        }

        let mut updated = current;
        updated.status = status;
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE ledger_entries SET status = ?4, doc = ?5
             WHERE org_id = ?1 AND repo_id = ?2 AND id = ?3",
            params![
                tenant.org_id,
                tenant.repo_id,
                entry_id,
                serde_json::to_string(&status)?,
                serde_json::to_string(&updated)?,
            ],
        )?;
        Ok(())
    }

    async fn list_ledger_entries(
        &self,
        tenant: &Tenant,
        branch: Option<&str>,
    ) -> LatticeResult<Vec<LedgerEntry>> {
        let conn = self.conn.lock();
        match branch {
            Some(branch) => Self::rows_to_docs(
                &conn,
                "SELECT doc FROM ledger_entries
                 WHERE org_id = ?1 AND repo_id = ?2 AND branch = ?3 ORDER BY id",
                &[&tenant.org_id, &tenant.repo_id, &branch],
            ),
            None => Self::rows_to_docs(
                &conn,
                "SELECT doc FROM ledger_entries
                 WHERE org_id = ?1 AND repo_id = ?2 ORDER BY id",
                &[&tenant.org_id, &tenant.repo_id],
            ),
        }
    }

    async fn reparent_ledger_entries(
        &self,
        tenant: &Tenant,
        source_branch: &str,
        target_branch: &str,
    ) -> LatticeResult<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "UPDATE ledger_entries
             SET branch = ?4, doc = json_set(doc, '$.branch', ?4)
             WHERE org_id = ?1 AND repo_id = ?2 AND branch = ?3",
            params![tenant.org_id, tenant.repo_id, source_branch, target_branch],
        )?)
    }

    async fn append_working_snapshot(
        &self,
        tenant: &Tenant,
        snapshot: &WorkingSnapshot,
    ) -> LatticeResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO working_snapshots (org_id, repo_id, id, doc) VALUES (?1, ?2, ?3, ?4)",
            params![
                tenant.org_id,
                tenant.repo_id,
                snapshot.id,
                serde_json::to_string(snapshot)?
            ],
        )?;
        Ok(())
    }

    async fn upsert_pattern(&self, tenant: &Tenant, pattern: &Pattern) -> LatticeResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO patterns (org_id, repo_id, id, doc) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (org_id, repo_id, id) DO UPDATE SET doc = excluded.doc",
            params![
                tenant.org_id,
                tenant.repo_id,
                pattern.id,
                serde_json::to_string(pattern)?
            ],
        )?;
        Ok(())
    }

    async fn list_patterns(&self, tenant: &Tenant) -> LatticeResult<Vec<Pattern>> {
        let conn = self.conn.lock();
        Self::rows_to_docs(
            &conn,
            "SELECT doc FROM patterns WHERE org_id = ?1 AND repo_id = ?2 ORDER BY id",
            &[&tenant.org_id, &tenant.repo_id],
        )
    }

    async fn upsert_rule(&self, rule: &Rule) -> LatticeResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO rules (org_id, repo_id, id, status, priority, doc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (org_id, id) DO UPDATE SET
                 repo_id = excluded.repo_id,
                 status = excluded.status,
                 priority = excluded.priority,
                 doc = excluded.doc",
            params![
                rule.org_id,
                rule.repo_id,
                rule.id,
                serde_json::to_string(&rule.status)?,
                rule.priority,
                serde_json::to_string(rule)?,
            ],
        )?;
        Ok(())
    }

    async fn list_active_rules(&self, tenant: &Tenant) -> LatticeResult<Vec<Rule>> {
        let conn = self.conn.lock();
        let status = serde_json::to_string(&crate::types::RuleStatus::Active)?;
        let mut rules: Vec<Rule> = Self::rows_to_docs(
            &conn,
            "SELECT doc FROM rules
             WHERE org_id = ?1 AND status = ?2 AND (repo_id IS NULL OR repo_id = ?3)",
            &[&tenant.org_id, &status, &tenant.repo_id],
        )?;
        rules.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.repo_id.is_some().cmp(&a.repo_id.is_some()))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(rules)
    }

    async fn upsert_domain_ontology(
        &self,
        tenant: &Tenant,
        ontology: &DomainOntology,
    ) -> LatticeResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ontologies (org_id, repo_id, doc) VALUES (?1, ?2, ?3)
             ON CONFLICT (org_id, repo_id) DO UPDATE SET doc = excluded.doc",
            params![
                tenant.org_id,
                tenant.repo_id,
                serde_json::to_string(ontology)?
            ],
        )?;
        Ok(())
    }

    async fn get_domain_ontology(&self, tenant: &Tenant) -> LatticeResult<Option<DomainOntology>> {
        let conn = self.conn.lock();
        let mut rows: Vec<DomainOntology> = Self::rows_to_docs(
            &conn,
            "SELECT doc FROM ontologies WHERE org_id = ?1 AND repo_id = ?2",
            &[&tenant.org_id, &tenant.repo_id],
        )?;
        Ok(rows.pop())
    }

    async fn store_health_report(
        &self,
        tenant: &Tenant,
        report: &HealthReport,
    ) -> LatticeResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO health_reports (org_id, repo_id, index_version, generated_at, doc)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                tenant.org_id,
                tenant.repo_id,
                report.index_version,
                report.generated_at.to_rfc3339(),
                serde_json::to_string(report)?,
            ],
        )?;
        Ok(())
    }

    async fn append_index_event(&self, event: &IndexEvent) -> LatticeResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO index_events (org_id, repo_id, ts, doc) VALUES (?1, ?2, ?3, ?4)",
            params![
                event.org_id,
                event.repo_id,
                event.ts.to_rfc3339(),
                serde_json::to_string(event)?
            ],
        )?;
        Ok(())
    }

    async fn delete_repo_data(&self, tenant: &Tenant) -> LatticeResult<()> {
        let conn = self.conn.lock();
        for table in [
            "entities",
            "edges",
            "justifications",
            "ledger_entries",
            "working_snapshots",
            "patterns",
            "ontologies",
            "health_reports",
            "index_events",
        ] {
            conn.execute(
                &format!("DELETE FROM {table} WHERE org_id = ?1 AND repo_id = ?2"),
                params![tenant.org_id, tenant.repo_id],
            )?;
        }
        Ok(())
    }
}
