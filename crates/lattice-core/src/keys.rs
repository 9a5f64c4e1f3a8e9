//! Deterministic key derivation for entities and edges.
//!
//! Keys are the idempotency backbone of the pipeline: two index runs over
//! the same bytes produce identical key sets, so bulk upserts converge and
//! the shadow swap can delete by `index_version` without coordination.

use sha2::{Digest, Sha256};

use crate::types::{EdgeKind, EntityKind};

/// Length of every derived key, in hex characters.
pub const KEY_HEX_LEN: usize = 16;

/// Derive the key for a code entity.
///
/// The hash covers `(repo_id, file_path, kind, name, signature)` joined
/// with a NUL separator so no field concatenation can collide with
/// another field split.
pub fn entity_key(
    repo_id: &str,
    file_path: &str,
    kind: EntityKind,
    name: &str,
    signature: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repo_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(file_path.as_bytes());
    hasher.update([0u8]);
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(signature.as_bytes());
    truncate_hex(hasher.finalize().as_slice())
}

/// Derive the key for a file entity (kind fixed, no signature).
pub fn file_entity_key(repo_id: &str, file_path: &str) -> String {
    entity_key(repo_id, file_path, EntityKind::File, file_path, "")
}

/// Derive the key for an edge from `(from_key, to_key, edge_kind)`.
pub fn edge_key(from_key: &str, to_key: &str, kind: EdgeKind) -> String {
    let mut hasher = Sha256::new();
    hasher.update(from_key.as_bytes());
    hasher.update([0u8]);
    hasher.update(to_key.as_bytes());
    hasher.update([0u8]);
    hasher.update(kind.as_str().as_bytes());
    truncate_hex(hasher.finalize().as_slice())
}

/// SHA-256 hex digest of an entity body, for staleness detection and
/// bi-temporal `body_hash` stamping.
pub fn body_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

/// Full SHA-256 hex digest of arbitrary bytes (snapshot checksums).
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn truncate_hex(digest: &[u8]) -> String {
    // 8 bytes -> 16 hex chars.
    hex::encode(&digest[..KEY_HEX_LEN / 2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_key_is_deterministic() {
        let a = entity_key("repo", "src/a.ts", EntityKind::Function, "foo", "foo(x: number)");
        let b = entity_key("repo", "src/a.ts", EntityKind::Function, "foo", "foo(x: number)");
        assert_eq!(a, b);
        assert_eq!(a.len(), KEY_HEX_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_entity_key_varies_by_every_field() {
        let base = entity_key("repo", "src/a.ts", EntityKind::Function, "foo", "sig");
        assert_ne!(base, entity_key("other", "src/a.ts", EntityKind::Function, "foo", "sig"));
        assert_ne!(base, entity_key("repo", "src/b.ts", EntityKind::Function, "foo", "sig"));
        assert_ne!(base, entity_key("repo", "src/a.ts", EntityKind::Method, "foo", "sig"));
        assert_ne!(base, entity_key("repo", "src/a.ts", EntityKind::Function, "bar", "sig"));
        assert_ne!(base, entity_key("repo", "src/a.ts", EntityKind::Function, "foo", "other"));
    }

    #[test]
    fn test_separator_prevents_field_bleed() {
        // "ab" + "c" must not collide with "a" + "bc".
        let a = entity_key("r", "ab", EntityKind::Function, "c", "");
        let b = entity_key("r", "a", EntityKind::Function, "bc", "");
        assert_ne!(a, b);
    }

    #[test]
    fn test_edge_key_varies_by_kind() {
        let calls = edge_key("aaaa", "bbbb", EdgeKind::Calls);
        let refs = edge_key("aaaa", "bbbb", EdgeKind::References);
        assert_ne!(calls, refs);
        assert_eq!(calls.len(), KEY_HEX_LEN);
    }

    #[test]
    fn test_body_hash_is_full_sha256() {
        let h = body_hash("fn main() {}");
        assert_eq!(h.len(), 64);
        assert_eq!(h, body_hash("fn main() {}"));
        assert_ne!(h, body_hash("fn main() { }"));
    }
}
