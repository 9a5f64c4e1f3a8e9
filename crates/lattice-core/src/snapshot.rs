//! Snapshot exporter: chunked binary serialization with integrity
//! checksum and upload.
//!
//! Entities are compacted (tenant fields dropped, bodies capped at 50
//! lines, signatures at 200 chars), edges paged out of the store, and
//! the envelope serialized as MessagePack. Repos above the chunk
//! threshold serialize in batches of 1000 with each batch buffer freed
//! before the next. The artifact is committed only after the metadata
//! row transitions to `available` with the checksum stored; a readback
//! mismatch marks the snapshot `failed` and never advertises it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SnapshotConfig;
use crate::error::{LatticeError, LatticeResult};
use crate::keys;
use crate::stores::{CacheStore, GraphStore, ObjectStore, RelationalStore};
use crate::types::{
    CodeEdge, CodeEntity, GraphSnapshotMeta, Pattern, Rule, SnapshotStatus, Tenant,
};

/// Envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;
/// Body cap in the compact entity record, in lines.
const COMPACT_BODY_LINES: usize = 50;
/// Signature cap, in chars.
const COMPACT_SIGNATURE_CHARS: usize = 200;
/// Exemplars per exported pattern.
const COMPACT_PATTERN_EXEMPLARS: usize = 5;
/// Snippet cap for pattern evidence, in chars.
const COMPACT_SNIPPET_CHARS: usize = 200;
/// TTL for the snapshot-ready cache notification.
const SYNC_NOTIFY_TTL_SECS: u64 = 3600;

/// Compact entity record in the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactEntity {
    /// Entity key.
    pub key: String,
    /// Kind string.
    pub kind: String,
    /// Short name.
    pub name: String,
    /// File path.
    pub file_path: String,
    /// Signature, capped at 200 chars.
    pub signature: String,
    /// Starting line.
    pub start_line: u32,
    /// Body, capped at 50 lines.
    pub body: String,
}

impl CompactEntity {
    fn from_entity(entity: &CodeEntity) -> Self {
        Self {
            key: entity.key.clone(),
            kind: entity.kind.as_str().to_string(),
            name: entity.name.clone(),
            file_path: entity.file_path.clone(),
            signature: entity.signature.chars().take(COMPACT_SIGNATURE_CHARS).collect(),
            start_line: entity.start_line,
            body: entity
                .body
                .lines()
                .take(COMPACT_BODY_LINES)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Compact edge record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactEdge {
    /// Source key.
    pub from_key: String,
    /// Target key.
    pub to_key: String,
    /// Edge kind string.
    pub edge_kind: String,
}

/// Compact pattern record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactPattern {
    /// Pattern ID.
    pub id: String,
    /// Pattern name.
    pub name: String,
    /// Description, capped.
    pub description: String,
    /// Up to 5 exemplar keys.
    pub exemplars: Vec<String>,
}

/// The snapshot envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    /// Format version (= 1).
    pub version: u8,
    /// Repository identifier.
    pub repo_id: String,
    /// Organization identifier.
    pub org_id: String,
    /// Compact entities.
    pub entities: Vec<CompactEntity>,
    /// Compact edges.
    pub edges: Vec<CompactEdge>,
    /// Active rules (at most 200).
    pub rules: Vec<Rule>,
    /// Patterns with capped evidence.
    pub patterns: Vec<CompactPattern>,
    /// Generation timestamp.
    pub generated_at: DateTime<Utc>,
}

/// Serialize the envelope to MessagePack. Above the chunk threshold,
/// entities serialize in batches of `chunk_size`, each buffer freed
/// before the next, with `heartbeat` invoked per chunk.
pub fn serialize_envelope(
    envelope: &SnapshotEnvelope,
    config: &SnapshotConfig,
    heartbeat: &(dyn Fn(usize) + Send + Sync),
) -> LatticeResult<Vec<u8>> {
    if envelope.entities.len() <= config.chunk_threshold {
        heartbeat(1);
        return rmp_serde::to_vec_named(envelope)
            .map_err(|e| LatticeError::Serialization(e.to_string()));
    }

    // Chunked path: the envelope is written as a header followed by
    // entity chunks, then the remaining sections, concatenated as
    // MessagePack values. Deserialization walks the same sequence.
    let mut output = Vec::new();

    let header = ChunkedHeader {
        version: envelope.version,
        repo_id: envelope.repo_id.clone(),
        org_id: envelope.org_id.clone(),
        entity_chunks: envelope.entities.len().div_ceil(config.chunk_size),
        generated_at: envelope.generated_at,
    };
    output.extend(
        rmp_serde::to_vec_named(&header).map_err(|e| LatticeError::Serialization(e.to_string()))?,
    );

    for (index, chunk) in envelope.entities.chunks(config.chunk_size).enumerate() {
        // Each chunk buffer is dropped at the end of the iteration.
        let chunk_bytes = rmp_serde::to_vec_named(&chunk.to_vec())
            .map_err(|e| LatticeError::Serialization(e.to_string()))?;
        output.extend(chunk_bytes);
        heartbeat(index + 1);
    }

    let tail = ChunkedTail {
        edges: envelope.edges.clone(),
        rules: envelope.rules.clone(),
        patterns: envelope.patterns.clone(),
    };
    output.extend(
        rmp_serde::to_vec_named(&tail).map_err(|e| LatticeError::Serialization(e.to_string()))?,
    );

    Ok(output)
}

/// Deserialize bytes produced by [`serialize_envelope`].
pub fn deserialize_envelope(bytes: &[u8]) -> LatticeResult<SnapshotEnvelope> {
    // Try the single-document form first.
    if let Ok(envelope) = rmp_serde::from_slice::<SnapshotEnvelope>(bytes) {
        return Ok(envelope);
    }

    // Chunked form: header, N entity chunks, tail.
    let mut cursor = std::io::Cursor::new(bytes);
    let header: ChunkedHeader = rmp_serde::from_read(&mut cursor)
        .map_err(|e| LatticeError::Serialization(format!("chunked header: {e}")))?;
    let mut entities = Vec::new();
    for _ in 0..header.entity_chunks {
        let chunk: Vec<CompactEntity> = rmp_serde::from_read(&mut cursor)
            .map_err(|e| LatticeError::Serialization(format!("entity chunk: {e}")))?;
        entities.extend(chunk);
    }
    let tail: ChunkedTail = rmp_serde::from_read(&mut cursor)
        .map_err(|e| LatticeError::Serialization(format!("chunked tail: {e}")))?;

    Ok(SnapshotEnvelope {
        version: header.version,
        repo_id: header.repo_id,
        org_id: header.org_id,
        entities,
        edges: tail.edges,
        rules: tail.rules,
        patterns: tail.patterns,
        generated_at: header.generated_at,
    })
}

#[derive(Serialize, Deserialize)]
struct ChunkedHeader {
    version: u8,
    repo_id: String,
    org_id: String,
    entity_chunks: usize,
    generated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct ChunkedTail {
    edges: Vec<CompactEdge>,
    rules: Vec<Rule>,
    patterns: Vec<CompactPattern>,
}

/// Export, upload, verify, and advertise a snapshot.
pub async fn run_snapshot_export(
    graph: &Arc<dyn GraphStore>,
    relational: &Arc<dyn RelationalStore>,
    objects: &Arc<dyn ObjectStore>,
    cache: &Arc<dyn CacheStore>,
    config: &SnapshotConfig,
    tenant: &Tenant,
    heartbeat: &(dyn Fn(usize) + Send + Sync),
) -> LatticeResult<GraphSnapshotMeta> {
    let generated_at = Utc::now();

    // Mark generating before any heavy work.
    let mut meta = GraphSnapshotMeta {
        org_id: tenant.org_id.clone(),
        repo_id: tenant.repo_id.clone(),
        checksum: String::new(),
        size_bytes: 0,
        entity_count: 0,
        edge_count: 0,
        generated_at,
        status: SnapshotStatus::Generating,
    };
    relational.upsert_graph_snapshot_meta(&meta).await?;

    let entities: Vec<CompactEntity> = graph
        .get_all_entities(tenant)
        .await?
        .iter()
        .map(CompactEntity::from_entity)
        .collect();

    // Edges page out of the store up to the hard cap.
    let mut edges: Vec<CompactEdge> = Vec::new();
    let mut offset = 0;
    loop {
        let page = graph.get_edges_page(tenant, offset, config.edge_page).await?;
        if page.is_empty() {
            break;
        }
        offset += page.len();
        edges.extend(page.iter().map(|edge: &CodeEdge| CompactEdge {
            from_key: edge.from_key.clone(),
            to_key: edge.to_key.clone(),
            edge_kind: edge.kind.as_str().to_string(),
        }));
        if edges.len() >= config.edge_cap {
            edges.truncate(config.edge_cap);
            tracing::warn!(cap = config.edge_cap, "edge export hit the hard cap");
            break;
        }
    }

    let mut rules = graph.list_active_rules(tenant).await?;
    rules.truncate(config.max_rules);

    let patterns: Vec<CompactPattern> = graph
        .list_patterns(tenant)
        .await?
        .iter()
        .filter(|p: &&Pattern| p.confirmed || p.occurrences > 0)
        .map(|p| CompactPattern {
            id: p.id.clone(),
            name: p.name.clone(),
            description: p.description.chars().take(COMPACT_SNIPPET_CHARS).collect(),
            exemplars: p
                .exemplars
                .iter()
                .take(COMPACT_PATTERN_EXEMPLARS)
                .cloned()
                .collect(),
        })
        .collect();

    let envelope = SnapshotEnvelope {
        version: ENVELOPE_VERSION,
        repo_id: tenant.repo_id.clone(),
        org_id: tenant.org_id.clone(),
        entities,
        edges,
        rules,
        patterns,
        generated_at,
    };

    let bytes = serialize_envelope(&envelope, config, heartbeat)?;
    let checksum = keys::sha256_hex(&bytes);

    let path = format!("{}/{}.msgpack", tenant.org_id, tenant.repo_id);
    objects.upload(&path, &bytes).await?;

    // Verify the stored bytes before advertising.
    let readback = objects.download(&path).await?;
    let readback_checksum = keys::sha256_hex(&readback);
    if readback_checksum != checksum {
        meta.status = SnapshotStatus::Failed;
        relational.upsert_graph_snapshot_meta(&meta).await?;
        return Err(LatticeError::ChecksumMismatch {
            expected: checksum,
            actual: readback_checksum,
        });
    }

    meta.checksum = checksum;
    meta.size_bytes = bytes.len() as u64;
    meta.entity_count = envelope.entities.len();
    meta.edge_count = envelope.edges.len();
    meta.status = SnapshotStatus::Available;
    relational.upsert_graph_snapshot_meta(&meta).await?;

    // Notify consumers; the message carries the checksum so pollers can
    // skip unchanged snapshots.
    let channel = format!("graph-sync:{}:{}", tenant.org_id, tenant.repo_id);
    cache.publish(&channel, &meta.checksum).await?;
    cache
        .set(
            &channel,
            &meta.checksum,
            std::time::Duration::from_secs(SYNC_NOTIFY_TTL_SECS),
        )
        .await?;

    tracing::info!(
        tenant = %tenant,
        bytes = meta.size_bytes,
        entities = meta.entity_count,
        edges = meta.edge_count,
        "snapshot exported"
    );

    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{
        MemoryCacheStore, MemoryGraphStore, MemoryObjectStore, MemoryRelationalStore,
    };
    use crate::types::{EntityKind, Language};

    fn entity(tenant: &Tenant, name: &str) -> CodeEntity {
        CodeEntity {
            key: keys::entity_key(&tenant.repo_id, "a.ts", EntityKind::Function, name, name),
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
            kind: EntityKind::Function,
            name: name.into(),
            file_path: "a.ts".into(),
            start_line: 1,
            end_line: 100,
            signature: "s".repeat(500),
            body: (0..120).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n"),
            documentation: None,
            language: Language::TypeScript,
            index_version: "v1".into(),
            fan_in: None,
            fan_out: None,
            risk_level: None,
            community_id: None,
            community_label: None,
            pagerank: None,
            pagerank_percentile: None,
            original_kind: None,
            quarantine_error: None,
        }
    }

    fn sample_envelope(entity_count: usize) -> SnapshotEnvelope {
        let tenant = Tenant::new("o", "r");
        SnapshotEnvelope {
            version: ENVELOPE_VERSION,
            repo_id: "r".into(),
            org_id: "o".into(),
            entities: (0..entity_count)
                .map(|i| CompactEntity::from_entity(&entity(&tenant, &format!("fn{i}"))))
                .collect(),
            edges: vec![CompactEdge {
                from_key: "a".into(),
                to_key: "b".into(),
                edge_kind: "calls".into(),
            }],
            rules: vec![],
            patterns: vec![],
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_compaction_caps() {
        let tenant = Tenant::new("o", "r");
        let compact = CompactEntity::from_entity(&entity(&tenant, "big"));
        assert_eq!(compact.signature.chars().count(), 200);
        assert_eq!(compact.body.lines().count(), 50);
    }

    #[test]
    fn test_roundtrip_single_document() {
        let envelope = sample_envelope(10);
        let bytes =
            serialize_envelope(&envelope, &SnapshotConfig::default(), &|_| {}).expect("ser");
        let decoded = deserialize_envelope(&bytes).expect("de");
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_roundtrip_chunked() {
        let config = SnapshotConfig {
            chunk_threshold: 5,
            chunk_size: 3,
            ..SnapshotConfig::default()
        };
        let envelope = sample_envelope(10);
        let heartbeats = std::sync::atomic::AtomicUsize::new(0);
        let bytes = serialize_envelope(&envelope, &config, &|_| {
            heartbeats.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        })
        .expect("ser");
        assert_eq!(
            heartbeats.load(std::sync::atomic::Ordering::Relaxed),
            4,
            "10 entities in chunks of 3 = 4 heartbeats"
        );
        let decoded = deserialize_envelope(&bytes).expect("de");
        assert_eq!(decoded, envelope);
    }

    #[tokio::test]
    async fn test_export_checksum_matches_uploaded_bytes() {
        let graph: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(MemoryRelationalStore::new());
        let objects: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
        let tenant = Tenant::new("o1", "r1");

        graph
            .bulk_upsert_entities(
                &tenant,
                &[entity(&tenant, "foo"), entity(&tenant, "bar")],
            )
            .await
            .expect("entities");

        let meta = run_snapshot_export(
            &graph,
            &relational,
            &objects,
            &cache,
            &SnapshotConfig::default(),
            &tenant,
            &|_| {},
        )
        .await
        .expect("export");

        assert_eq!(meta.status, SnapshotStatus::Available);
        assert_eq!(meta.entity_count, 2);

        // Invariant: SHA-256 of uploaded bytes equals the stored checksum.
        let bytes = objects.download("o1/r1.msgpack").await.expect("download");
        assert_eq!(keys::sha256_hex(&bytes), meta.checksum);
        assert_eq!(bytes.len() as u64, meta.size_bytes);

        // Round trip: the envelope carries the stored entities.
        let decoded = deserialize_envelope(&bytes).expect("decode");
        assert_eq!(decoded.entities.len(), meta.entity_count);
        assert_eq!(decoded.edges.len(), meta.edge_count);
        assert!(decoded.entities.iter().any(|e| e.name == "foo"));

        // The metadata row is queryable and available.
        let stored = relational
            .get_graph_snapshot_meta(&tenant)
            .await
            .expect("meta")
            .expect("some");
        assert_eq!(stored.checksum, meta.checksum);

        // The sync channel carries the checksum.
        let advertised = cache.get("graph-sync:o1:r1").await.expect("cache");
        assert_eq!(advertised.as_deref(), Some(meta.checksum.as_str()));
    }
}
