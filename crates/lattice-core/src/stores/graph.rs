//! Graph store port: documents and typed edges with secondary indexes.
//!
//! The production deployment fronts a document/graph database; tests and
//! hermetic pipeline runs use [`MemoryGraphStore`]. Both uphold the
//! tenant-isolation invariant: every operation takes the tenant scope
//! first and only ever touches rows carrying that `(org_id, repo_id)`.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::LatticeResult;
use crate::types::{
    CodeEdge, CodeEntity, DomainOntology, EdgeKind, HealthReport, IndexEvent, Justification,
    LedgerEntry, LedgerStatus, Pattern, Rule, RuleStatus, Tenant, WorkingSnapshot,
    valid_to_infinity,
};

/// Port over the graph database. All bulk writes are idempotent by
/// deterministic key; all reads filter by tenant first.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create collections and the persistent secondary indexes on
    /// `(org_id, repo_id)` (entities also `(org_id, repo_id, file_path)`).
    async fn bootstrap_schema(&self) -> LatticeResult<()>;

    /// Cheap readiness probe used before starting a pipeline run.
    async fn health_check(&self) -> LatticeResult<()>;

    /// Upsert a batch of entities. Returns the number written.
    async fn bulk_upsert_entities(
        &self,
        tenant: &Tenant,
        entities: &[CodeEntity],
    ) -> LatticeResult<usize>;

    /// Upsert a batch of edges. Returns the number written.
    async fn bulk_upsert_edges(&self, tenant: &Tenant, edges: &[CodeEdge]) -> LatticeResult<usize>;

    /// Fetch one entity by key.
    async fn get_entity(&self, tenant: &Tenant, key: &str) -> LatticeResult<Option<CodeEntity>>;

    /// Fetch entities by key, preserving only those that exist.
    async fn get_entities_by_keys(
        &self,
        tenant: &Tenant,
        keys: &[String],
    ) -> LatticeResult<Vec<CodeEntity>>;

    /// All entities declared in one file.
    async fn get_entities_by_file(
        &self,
        tenant: &Tenant,
        file_path: &str,
    ) -> LatticeResult<Vec<CodeEntity>>;

    /// Name-prefix search over entities.
    async fn search_entities(
        &self,
        tenant: &Tenant,
        name_query: &str,
        limit: usize,
    ) -> LatticeResult<Vec<CodeEntity>>;

    /// Every entity in the repo (analytics, export).
    async fn get_all_entities(&self, tenant: &Tenant) -> LatticeResult<Vec<CodeEntity>>;

    /// Distinct file paths with at least one entity.
    async fn list_files(&self, tenant: &Tenant) -> LatticeResult<Vec<String>>;

    /// Entities with a `calls` edge into the given entity.
    async fn get_callers_of(&self, tenant: &Tenant, key: &str) -> LatticeResult<Vec<CodeEntity>>;

    /// Entities the given entity has a `calls` edge to.
    async fn get_callees_of(&self, tenant: &Tenant, key: &str) -> LatticeResult<Vec<CodeEntity>>;

    /// BFS neighborhood over semantic edges from `roots`, bounded by
    /// `hops` and `max_entities`.
    async fn get_subgraph(
        &self,
        tenant: &Tenant,
        roots: &[String],
        hops: usize,
        max_entities: usize,
    ) -> LatticeResult<Vec<CodeEntity>>;

    /// Every edge in the repo.
    async fn get_all_edges(&self, tenant: &Tenant) -> LatticeResult<Vec<CodeEdge>>;

    /// One page of edges, ordered by key.
    async fn get_edges_page(
        &self,
        tenant: &Tenant,
        offset: usize,
        limit: usize,
    ) -> LatticeResult<Vec<CodeEdge>>;

    /// Shadow swap: delete every entity and edge whose `index_version`
    /// differs from `keep_version`. Returns `(entities, edges)` deleted.
    async fn delete_by_index_version(
        &self,
        tenant: &Tenant,
        keep_version: &str,
    ) -> LatticeResult<(usize, usize)>;

    /// Delete all entities for a removed file. Returns the count.
    async fn delete_entities_by_file(
        &self,
        tenant: &Tenant,
        file_path: &str,
    ) -> LatticeResult<usize>;

    /// Delete edges whose endpoints include any of `keys`. Returns the count.
    async fn delete_edges_referencing(
        &self,
        tenant: &Tenant,
        keys: &[String],
    ) -> LatticeResult<usize>;

    /// Entity counts grouped by kind (finalization verification).
    async fn count_entities_by_kind(
        &self,
        tenant: &Tenant,
    ) -> LatticeResult<BTreeMap<String, usize>>;

    /// Bi-temporal justification write: for each row, close the entity's
    /// current row (`valid_to = now`) and insert the new one with
    /// `valid_to` at the far-future sentinel.
    async fn bulk_upsert_justifications(
        &self,
        tenant: &Tenant,
        justifications: &[Justification],
    ) -> LatticeResult<usize>;

    /// Current-valid justification for an entity.
    async fn get_justification(
        &self,
        tenant: &Tenant,
        entity_key: &str,
    ) -> LatticeResult<Option<Justification>>;

    /// All current-valid justifications in the repo.
    async fn get_current_justifications(
        &self,
        tenant: &Tenant,
    ) -> LatticeResult<Vec<Justification>>;

    /// Append a ledger entry. Entries are never deleted.
    async fn append_ledger_entry(&self, tenant: &Tenant, entry: &LedgerEntry) -> LatticeResult<()>;

    /// Advance a ledger entry through its state machine.
    async fn update_ledger_entry_status(
        &self,
        tenant: &Tenant,
        entry_id: &str,
        status: LedgerStatus,
    ) -> LatticeResult<()>;

    /// Ledger entries, optionally filtered by branch.
    async fn list_ledger_entries(
        &self,
        tenant: &Tenant,
        branch: Option<&str>,
    ) -> LatticeResult<Vec<LedgerEntry>>;

    /// Reparent all entries on `source_branch` onto `target_branch`
    /// (PR merge). Returns the number reparented.
    async fn reparent_ledger_entries(
        &self,
        tenant: &Tenant,
        source_branch: &str,
        target_branch: &str,
    ) -> LatticeResult<usize>;

    /// Append a working snapshot blob.
    async fn append_working_snapshot(
        &self,
        tenant: &Tenant,
        snapshot: &WorkingSnapshot,
    ) -> LatticeResult<()>;

    /// Upsert a detected pattern.
    async fn upsert_pattern(&self, tenant: &Tenant, pattern: &Pattern) -> LatticeResult<()>;

    /// All patterns for the repo.
    async fn list_patterns(&self, tenant: &Tenant) -> LatticeResult<Vec<Pattern>>;

    /// Upsert a rule (repo- or org-scoped).
    async fn upsert_rule(&self, rule: &Rule) -> LatticeResult<()>;

    /// Active rules visible to the repo: its own plus org-scoped ones,
    /// higher priority first, repo scope before org scope on ties.
    async fn list_active_rules(&self, tenant: &Tenant) -> LatticeResult<Vec<Rule>>;

    /// Replace the repo's current ontology.
    async fn upsert_domain_ontology(
        &self,
        tenant: &Tenant,
        ontology: &DomainOntology,
    ) -> LatticeResult<()>;

    /// Current ontology, if discovered.
    async fn get_domain_ontology(&self, tenant: &Tenant) -> LatticeResult<Option<DomainOntology>>;

    /// Append a health report (reports are never mutated in place).
    async fn store_health_report(&self, tenant: &Tenant, report: &HealthReport) -> LatticeResult<()>;

    /// Append to the `index_events` feed (90-day TTL at the store).
    async fn append_index_event(&self, event: &IndexEvent) -> LatticeResult<()>;

    /// Cascade-delete everything the repo owns.
    async fn delete_repo_data(&self, tenant: &Tenant) -> LatticeResult<()>;
}

// ---------------------------------------------------------------------------
// In-memory fake
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RepoData {
    entities: HashMap<String, CodeEntity>,
    edges: HashMap<String, CodeEdge>,
    justifications: Vec<Justification>,
    ledger: Vec<LedgerEntry>,
    working_snapshots: Vec<WorkingSnapshot>,
    patterns: HashMap<String, Pattern>,
    ontology: Option<DomainOntology>,
    health_reports: Vec<HealthReport>,
}

/// Hermetic in-memory graph store used by tests and local pipeline runs.
#[derive(Default)]
pub struct MemoryGraphStore {
    repos: RwLock<HashMap<Tenant, RepoData>>,
    /// Rules are org-level documents; repo scoping lives on the row.
    rules: RwLock<HashMap<String, Rule>>,
    events: RwLock<Vec<IndexEvent>>,
}

impl MemoryGraphStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_repo<R>(&self, tenant: &Tenant, f: impl FnOnce(&RepoData) -> R) -> R {
        let repos = self.repos.read();
        match repos.get(tenant) {
            Some(data) => f(data),
            None => f(&RepoData::default()),
        }
    }

    fn with_repo_mut<R>(&self, tenant: &Tenant, f: impl FnOnce(&mut RepoData) -> R) -> R {
        let mut repos = self.repos.write();
        f(repos.entry(tenant.clone()).or_default())
    }

    /// Number of index events recorded (test observability).
    pub fn index_event_count(&self) -> usize {
        self.events.read().len()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn bootstrap_schema(&self) -> LatticeResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> LatticeResult<()> {
        Ok(())
    }

    async fn bulk_upsert_entities(
        &self,
        tenant: &Tenant,
        entities: &[CodeEntity],
    ) -> LatticeResult<usize> {
        self.with_repo_mut(tenant, |data| {
            for entity in entities {
                data.entities.insert(entity.key.clone(), entity.clone());
            }
        });
        Ok(entities.len())
    }

    async fn bulk_upsert_edges(&self, tenant: &Tenant, edges: &[CodeEdge]) -> LatticeResult<usize> {
        self.with_repo_mut(tenant, |data| {
            for edge in edges {
                data.edges.insert(edge.key.clone(), edge.clone());
            }
        });
        Ok(edges.len())
    }

    async fn get_entity(&self, tenant: &Tenant, key: &str) -> LatticeResult<Option<CodeEntity>> {
        Ok(self.with_repo(tenant, |data| data.entities.get(key).cloned()))
    }

    async fn get_entities_by_keys(
        &self,
        tenant: &Tenant,
        keys: &[String],
    ) -> LatticeResult<Vec<CodeEntity>> {
        Ok(self.with_repo(tenant, |data| {
            keys.iter()
                .filter_map(|k| data.entities.get(k).cloned())
                .collect()
        }))
    }

    async fn get_entities_by_file(
        &self,
        tenant: &Tenant,
        file_path: &str,
    ) -> LatticeResult<Vec<CodeEntity>> {
        Ok(self.with_repo(tenant, |data| {
            let mut out: Vec<CodeEntity> = data
                .entities
                .values()
                .filter(|e| e.file_path == file_path)
                .cloned()
                .collect();
            out.sort_by_key(|e| e.start_line);
            out
        }))
    }

    async fn search_entities(
        &self,
        tenant: &Tenant,
        name_query: &str,
        limit: usize,
    ) -> LatticeResult<Vec<CodeEntity>> {
        Ok(self.with_repo(tenant, |data| {
            let mut out: Vec<CodeEntity> = data
                .entities
                .values()
                .filter(|e| e.name.contains(name_query))
                .cloned()
                .collect();
            out.sort_by(|a, b| a.name.cmp(&b.name));
            out.truncate(limit);
            out
        }))
    }

    async fn get_all_entities(&self, tenant: &Tenant) -> LatticeResult<Vec<CodeEntity>> {
        Ok(self.with_repo(tenant, |data| {
            let mut out: Vec<CodeEntity> = data.entities.values().cloned().collect();
            out.sort_by(|a, b| a.key.cmp(&b.key));
            out
        }))
    }

    async fn list_files(&self, tenant: &Tenant) -> LatticeResult<Vec<String>> {
        Ok(self.with_repo(tenant, |data| {
            let mut files: Vec<String> = data
                .entities
                .values()
                .map(|e| e.file_path.clone())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            files.sort();
            files
        }))
    }

    async fn get_callers_of(&self, tenant: &Tenant, key: &str) -> LatticeResult<Vec<CodeEntity>> {
        Ok(self.with_repo(tenant, |data| {
            let mut out: Vec<CodeEntity> = data
                .edges
                .values()
                .filter(|e| e.kind == EdgeKind::Calls && e.to_key == key)
                .filter_map(|e| data.entities.get(&e.from_key).cloned())
                .collect();
            out.sort_by(|a, b| a.key.cmp(&b.key));
            out.dedup_by(|a, b| a.key == b.key);
            out
        }))
    }

    async fn get_callees_of(&self, tenant: &Tenant, key: &str) -> LatticeResult<Vec<CodeEntity>> {
        Ok(self.with_repo(tenant, |data| {
            let mut out: Vec<CodeEntity> = data
                .edges
                .values()
                .filter(|e| e.kind == EdgeKind::Calls && e.from_key == key)
                .filter_map(|e| data.entities.get(&e.to_key).cloned())
                .collect();
            out.sort_by(|a, b| a.key.cmp(&b.key));
            out.dedup_by(|a, b| a.key == b.key);
            out
        }))
    }

    async fn get_subgraph(
        &self,
        tenant: &Tenant,
        roots: &[String],
        hops: usize,
        max_entities: usize,
    ) -> LatticeResult<Vec<CodeEntity>> {
        Ok(self.with_repo(tenant, |data| {
            let mut seen: HashSet<String> = roots.iter().cloned().collect();
            let mut queue: VecDeque<(String, usize)> =
                roots.iter().map(|k| (k.clone(), 0)).collect();

            while let Some((key, depth)) = queue.pop_front() {
                if depth >= hops || seen.len() >= max_entities {
                    continue;
                }
                for edge in data.edges.values() {
                    if !edge.kind.is_semantic_dependency() {
                        continue;
                    }
                    let neighbor = if edge.from_key == key {
                        &edge.to_key
                    } else if edge.to_key == key {
                        &edge.from_key
                    } else {
                        continue;
                    };
                    if seen.len() >= max_entities {
                        break;
                    }
                    if seen.insert(neighbor.clone()) {
                        queue.push_back((neighbor.clone(), depth + 1));
                    }
                }
            }

            let mut out: Vec<CodeEntity> = seen
                .iter()
                .filter_map(|k| data.entities.get(k).cloned())
                .collect();
            out.sort_by(|a, b| a.key.cmp(&b.key));
            out
        }))
    }

    async fn get_all_edges(&self, tenant: &Tenant) -> LatticeResult<Vec<CodeEdge>> {
        Ok(self.with_repo(tenant, |data| {
            let mut out: Vec<CodeEdge> = data.edges.values().cloned().collect();
            out.sort_by(|a, b| a.key.cmp(&b.key));
            out
        }))
    }

    async fn get_edges_page(
        &self,
        tenant: &Tenant,
        offset: usize,
        limit: usize,
    ) -> LatticeResult<Vec<CodeEdge>> {
        let all = self.get_all_edges(tenant).await?;
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    async fn delete_by_index_version(
        &self,
        tenant: &Tenant,
        keep_version: &str,
    ) -> LatticeResult<(usize, usize)> {
        Ok(self.with_repo_mut(tenant, |data| {
            let entities_before = data.entities.len();
            data.entities.retain(|_, e| e.index_version == keep_version);
            let edges_before = data.edges.len();
            data.edges.retain(|_, e| e.index_version == keep_version);
            (
                entities_before - data.entities.len(),
                edges_before - data.edges.len(),
            )
        }))
    }

    async fn delete_entities_by_file(
        &self,
        tenant: &Tenant,
        file_path: &str,
    ) -> LatticeResult<usize> {
        Ok(self.with_repo_mut(tenant, |data| {
            let before = data.entities.len();
            data.entities.retain(|_, e| e.file_path != file_path);
            before - data.entities.len()
        }))
    }

    async fn delete_edges_referencing(
        &self,
        tenant: &Tenant,
        keys: &[String],
    ) -> LatticeResult<usize> {
        let key_set: HashSet<&String> = keys.iter().collect();
        Ok(self.with_repo_mut(tenant, |data| {
            let before = data.edges.len();
            data.edges
                .retain(|_, e| !key_set.contains(&e.from_key) && !key_set.contains(&e.to_key));
            before - data.edges.len()
        }))
    }

    async fn count_entities_by_kind(
        &self,
        tenant: &Tenant,
    ) -> LatticeResult<BTreeMap<String, usize>> {
        Ok(self.with_repo(tenant, |data| {
            let mut counts = BTreeMap::new();
            for entity in data.entities.values() {
                *counts.entry(entity.kind.as_str().to_string()).or_insert(0) += 1;
            }
            counts
        }))
    }

    async fn bulk_upsert_justifications(
        &self,
        tenant: &Tenant,
        justifications: &[Justification],
    ) -> LatticeResult<usize> {
        let now = Utc::now();
        self.with_repo_mut(tenant, |data| {
            for new_row in justifications {
                for existing in data
                    .justifications
                    .iter_mut()
                    .filter(|j| j.entity_id == new_row.entity_id && j.is_current())
                {
                    existing.valid_to = now;
                }
                data.justifications.push(new_row.clone());
            }
        });
        Ok(justifications.len())
    }

    async fn get_justification(
        &self,
        tenant: &Tenant,
        entity_key: &str,
    ) -> LatticeResult<Option<Justification>> {
        Ok(self.with_repo(tenant, |data| {
            data.justifications
                .iter()
                .find(|j| j.entity_id == entity_key && j.is_current())
                .cloned()
        }))
    }

    async fn get_current_justifications(
        &self,
        tenant: &Tenant,
    ) -> LatticeResult<Vec<Justification>> {
        Ok(self.with_repo(tenant, |data| {
            data.justifications
                .iter()
                .filter(|j| j.is_current())
                .cloned()
                .collect()
        }))
    }

    async fn append_ledger_entry(&self, tenant: &Tenant, entry: &LedgerEntry) -> LatticeResult<()> {
        self.with_repo_mut(tenant, |data| data.ledger.push(entry.clone()));
        Ok(())
    }

    async fn update_ledger_entry_status(
        &self,
        tenant: &Tenant,
        entry_id: &str,
        status: LedgerStatus,
    ) -> LatticeResult<()> {
        self.with_repo_mut(tenant, |data| {
            if let Some(entry) = data.ledger.iter_mut().find(|e| e.id == entry_id) {
                if entry.status.can_transition_to(status) {
                    entry.status = status;
                    Ok(())
                } else {
                    Err(crate::error::LatticeError::Conflict {
                        reason: format!(
                            "illegal ledger transition {:?} -> {:?} for {entry_id}",
                            entry.status, status
                        ),
                    })
                }
            } else {
                Err(crate::error::LatticeError::Internal(format!(
                    "ledger entry not found: {entry_id}"
                )))
            }
        })
    }

    async fn list_ledger_entries(
        &self,
        tenant: &Tenant,
        branch: Option<&str>,
    ) -> LatticeResult<Vec<LedgerEntry>> {
        Ok(self.with_repo(tenant, |data| {
            data.ledger
                .iter()
                .filter(|e| branch.map_or(true, |b| e.branch == b))
                .cloned()
                .collect()
        }))
    }

    async fn reparent_ledger_entries(
        &self,
        tenant: &Tenant,
        source_branch: &str,
        target_branch: &str,
    ) -> LatticeResult<usize> {
        Ok(self.with_repo_mut(tenant, |data| {
            let mut moved = 0;
            for entry in data
                .ledger
                .iter_mut()
                .filter(|e| e.branch == source_branch)
            {
                entry.branch = target_branch.to_string();
                moved += 1;
            }
            moved
        }))
    }

    async fn append_working_snapshot(
        &self,
        tenant: &Tenant,
        snapshot: &WorkingSnapshot,
    ) -> LatticeResult<()> {
        self.with_repo_mut(tenant, |data| data.working_snapshots.push(snapshot.clone()));
        Ok(())
    }

    async fn upsert_pattern(&self, tenant: &Tenant, pattern: &Pattern) -> LatticeResult<()> {
        self.with_repo_mut(tenant, |data| {
            data.patterns.insert(pattern.id.clone(), pattern.clone());
        });
        Ok(())
    }

    async fn list_patterns(&self, tenant: &Tenant) -> LatticeResult<Vec<Pattern>> {
        Ok(self.with_repo(tenant, |data| {
            let mut out: Vec<Pattern> = data.patterns.values().cloned().collect();
            out.sort_by(|a, b| a.id.cmp(&b.id));
            out
        }))
    }

    async fn upsert_rule(&self, rule: &Rule) -> LatticeResult<()> {
        self.rules.write().insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn list_active_rules(&self, tenant: &Tenant) -> LatticeResult<Vec<Rule>> {
        let rules = self.rules.read();
        let mut out: Vec<Rule> = rules
            .values()
            .filter(|r| r.status == RuleStatus::Active)
            .filter(|r| r.org_id == tenant.org_id)
            .filter(|r| r.repo_id.as_deref().map_or(true, |rid| rid == tenant.repo_id))
            .cloned()
            .collect();
        // Higher priority first; repo scope beats org scope on ties.
        out.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.repo_id.is_some().cmp(&a.repo_id.is_some()))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(out)
    }

    async fn upsert_domain_ontology(
        &self,
        tenant: &Tenant,
        ontology: &DomainOntology,
    ) -> LatticeResult<()> {
        self.with_repo_mut(tenant, |data| data.ontology = Some(ontology.clone()));
        Ok(())
    }

    async fn get_domain_ontology(&self, tenant: &Tenant) -> LatticeResult<Option<DomainOntology>> {
        Ok(self.with_repo(tenant, |data| data.ontology.clone()))
    }

    async fn store_health_report(
        &self,
        tenant: &Tenant,
        report: &HealthReport,
    ) -> LatticeResult<()> {
        self.with_repo_mut(tenant, |data| data.health_reports.push(report.clone()));
        Ok(())
    }

    async fn append_index_event(&self, event: &IndexEvent) -> LatticeResult<()> {
        self.events.write().push(event.clone());
        Ok(())
    }

    async fn delete_repo_data(&self, tenant: &Tenant) -> LatticeResult<()> {
        self.repos.write().remove(tenant);
        Ok(())
    }
}
