//! Opaque, typed-prefix identifiers.
//!
//! Every entity id in this system is a plain string of the form
//! `<prefix>_<hex>`. The prefix makes ids self-describing in logs and in
//! the relational schema without needing a lookup; the hex suffix is
//! either random (collections, documents minted fresh, sync jobs) or a
//! deterministic hash (chunk point ids, content hashes).

use std::fmt;
use uuid::Uuid;

/// Generates a new random id with the given prefix.
pub fn new_id(prefix: &str) -> String {
    let bytes: [u8; 16] = rand::random();
    format!("{prefix}_{}", hex::encode(bytes))
}

pub fn collection_id() -> String {
    new_id("col")
}

pub fn document_id(content: &[u8]) -> String {
    // Content-addressed: the document id is derived from its content hash so
    // that re-ingesting identical bytes under a different key never collides
    // with, and re-ingesting changed bytes under the same key never reuses,
    // an existing document id.
    format!("doc_{}", content_hash(content))
}

pub fn job_id(doc_id: &str) -> String {
    format!("job_{doc_id}")
}

/// `H(content)`: the content hash used both as `Document.contentHash` and as
/// the random-looking suffix of a freshly minted document id.
pub fn content_hash(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

/// `pointId = f(docId, chunkIndex)`.
///
/// Deterministic and stable across restarts and processes: the same
/// `(docId, chunkIndex)` pair always yields the same point id, which is the
/// join key the vector store uses to agree with the relational store.
pub fn point_id(doc_id: &str, chunk_index: u32) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(doc_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(&chunk_index.to_le_bytes());
    format!("pt_{}", hasher.finalize().to_hex())
}

/// Fixed namespace for `point_uuid`; arbitrary but stable across restarts.
const POINT_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x3f, 0x1a, 0x6e, 0x2c, 0x9b, 0x44, 0x4c, 0x5d, 0x8f, 0x02, 0x1d, 0x7a, 0xe3, 0x6b, 0x90, 0xc4,
]);

/// The Qdrant-facing form of a point id: Qdrant only accepts an unsigned
/// integer or a UUID string, so `point_id`'s `pt_<hex>` join key can't be
/// used directly as a point id on the wire. `point_id` is already a
/// deterministic function of `(docId, chunkIndex)`, so hashing it again
/// into a v5 UUID keeps the same determinism without re-deriving from the
/// original pair.
pub fn point_uuid(point_id: &str) -> Uuid {
    Uuid::new_v5(&POINT_ID_NAMESPACE, point_id.as_bytes())
}

/// A thin, comparable wrapper for cases where a bare `String` id would be
/// too easy to confuse with other stringly-typed fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new(prefix: &str) -> Self {
        Self(new_id(prefix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn prefix(&self) -> Option<&str> {
        self.0.split('_').next()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

mod hex {
    pub fn encode(bytes: [u8; 16]) -> String {
        let mut out = String::with_capacity(32);
        for b in bytes {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_id_is_deterministic() {
        let a = point_id("doc_abc", 3);
        let b = point_id("doc_abc", 3);
        assert_eq!(a, b);
    }

    #[test]
    fn point_id_varies_by_index_and_doc() {
        let a = point_id("doc_abc", 0);
        let b = point_id("doc_abc", 1);
        let c = point_id("doc_xyz", 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn document_id_is_content_addressed() {
        let a = document_id(b"hello");
        let b = document_id(b"hello");
        let c = document_id(b"world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("doc_"));
    }

    #[test]
    fn collection_ids_are_unique() {
        let a = collection_id();
        let b = collection_id();
        assert_ne!(a, b);
        assert!(a.starts_with("col_"));
    }

    #[test]
    fn point_uuid_is_deterministic_and_varies() {
        let p1 = point_id("doc_abc", 3);
        let p2 = point_id("doc_abc", 4);
        let a = point_uuid(&p1);
        let b = point_uuid(&p1);
        assert_eq!(a, b);
        assert_ne!(a, point_uuid(&p2));
        assert_eq!(a.get_version_num(), 5);
    }
}
