//! Evidence record and session index types.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ids::now_ms;

/// One artifact attached to an evidence record (a file diff, a captured
/// stdout blob, a structured judgment — whatever the operation produced).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Content-hashed, write-once record of one atomic pipeline operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub evidence_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    pub operation_type: String,
    pub timestamp: i64,
    pub atomic_operation: bool,
    pub aggregated: bool,
    pub artifacts: Vec<Artifact>,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_logs: Option<String>,
    #[serde(default)]
    pub raw_evidence_refs: Vec<String>,
}

/// `sha256` of the concatenated artifact contents, in order.
pub fn compute_hash(artifacts: &[Artifact]) -> String {
    let mut hasher = Sha256::new();
    for artifact in artifacts {
        hasher.update(artifact.content.as_bytes());
    }
    hex::encode(hasher.finalize())
}

impl EvidenceRecord {
    pub fn new(
        evidence_id: String,
        session_id: impl Into<String>,
        operation_id: Option<String>,
        operation_type: impl Into<String>,
        artifacts: Vec<Artifact>,
        raw_evidence_refs: Vec<String>,
    ) -> Self {
        let hash = compute_hash(&artifacts);
        Self {
            evidence_id,
            session_id: session_id.into(),
            operation_id,
            operation_type: operation_type.into(),
            timestamp: now_ms(),
            atomic_operation: true,
            aggregated: false,
            artifacts,
            hash,
            raw_logs: None,
            raw_evidence_refs,
        }
    }

    /// Recompute the hash from the current artifacts and compare to the
    /// stored value.
    pub fn hash_matches(&self) -> bool {
        compute_hash(&self.artifacts) == self.hash
    }
}

/// One line of a finalized session's manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceIndexEntry {
    pub evidence_id: String,
    pub operation_type: String,
    pub timestamp: i64,
    pub hash: String,
}

/// Per-session manifest, itself hashed for tamper detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceIndex {
    pub session_id: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<i64>,
    pub evidence_items: Vec<EvidenceIndexEntry>,
    pub total_items: usize,
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}
