//! `EvidenceStore`: atomic per-operation evidence, hash-anchored index, and
//! raw-log integrity.
//!
//! Grounded on `coordinator/persistence.rs`'s `EventStore` (async
//! `tokio::fs` append/read pattern), adapted from one shared JSONL file to
//! one file per evidence record, per the filesystem layout this spec
//! defines.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::ids::now_ms;

use super::record::{EvidenceIndex, EvidenceIndexEntry, EvidenceRecord};

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

/// Inventory of a finalized (or in-progress) session: recorded evidence
/// versus operations that were registered but never got evidence.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct EvidenceInventory {
    pub recorded: usize,
    pub missing_operations: Vec<String>,
}

struct SessionState {
    insertion_order: Vec<String>,
    registered_operations: HashSet<String>,
}

pub struct EvidenceStore {
    base: PathBuf,
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl EvidenceStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            base: state_dir.into().join("evidence"),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base.join(session_id)
    }

    fn raw_logs_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("raw_logs")
    }

    fn evidence_file(&self, session_id: &str, evidence_id: &str) -> PathBuf {
        self.session_dir(session_id).join(format!("{evidence_id}.json"))
    }

    fn index_file(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("evidence_index.json")
    }

    fn index_hash_file(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("evidence_index.sha256")
    }

    fn report_file(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("report.json")
    }

    pub async fn initialize(&self, session_id: &str) -> StoreResult<()> {
        debug!(%session_id, "EvidenceStore::initialize");
        fs::create_dir_all(self.raw_logs_dir(session_id)).await?;
        let mut sessions = self.sessions.lock().await;
        sessions.entry(session_id.to_string()).or_insert_with(|| SessionState {
            insertion_order: Vec::new(),
            registered_operations: HashSet::new(),
        });
        Ok(())
    }

    /// Record one atomic evidence item. Fails closed on `atomic_operation ==
    /// false` or `aggregated == true`, and refuses to overwrite an existing
    /// record (evidence is write-once).
    pub async fn record_evidence(&self, record: &EvidenceRecord) -> StoreResult<()> {
        if !record.atomic_operation || record.aggregated {
            return Err(StoreError::EvidenceCollection(
                "evidence must have atomic_operation=true and aggregated=false".into(),
            ));
        }
        self.initialize(&record.session_id).await?;

        let path = self.evidence_file(&record.session_id, &record.evidence_id);
        if path.exists() {
            return Err(StoreError::EvidenceCollection(format!(
                "evidence {} already recorded (write-once)",
                record.evidence_id
            )));
        }

        let bytes = serde_json::to_vec_pretty(record)?;
        fs::write(&path, &bytes).await?;

        let mut sessions = self.sessions.lock().await;
        if let Some(state) = sessions.get_mut(&record.session_id) {
            state.insertion_order.push(record.evidence_id.clone());
        }
        debug!(evidence_id = %record.evidence_id, "EvidenceStore::record_evidence: written");
        Ok(())
    }

    pub async fn get_evidence(&self, session_id: &str, evidence_id: &str) -> StoreResult<Option<EvidenceRecord>> {
        let path = self.evidence_file(session_id, evidence_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub async fn list_evidence(&self, session_id: &str) -> StoreResult<Vec<EvidenceRecord>> {
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_evidence = path.extension().map(|e| e == "json").unwrap_or(false)
                && path.file_name().map(|n| n != "evidence_index.json" && n != "report.json").unwrap_or(false);
            if is_evidence {
                let content = fs::read_to_string(&path).await?;
                out.push(serde_json::from_str(&content)?);
            }
        }
        out.sort_by_key(|r: &EvidenceRecord| r.timestamp);
        Ok(out)
    }

    /// Recompute the hash and compare to the stored value.
    pub async fn verify_evidence(&self, session_id: &str, evidence_id: &str) -> StoreResult<()> {
        let record = self
            .get_evidence(session_id, evidence_id)
            .await?
            .ok_or_else(|| StoreError::EvidenceCollection(format!("evidence {evidence_id} not found")))?;
        if record.hash_matches() {
            Ok(())
        } else {
            Err(StoreError::HashMismatch {
                expected: record.hash.clone(),
                computed: super::record::compute_hash(&record.artifacts),
            })
        }
    }

    pub async fn store_raw_log(&self, session_id: &str, executor_id: &str, content: &str) -> StoreResult<PathBuf> {
        self.initialize(session_id).await?;
        let path = self.raw_logs_dir(session_id).join(format!("{executor_id}-{}.log", now_ms()));
        let mut file = fs::File::create(&path).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(path)
    }

    pub async fn verify_raw_logs(&self, session_id: &str, evidence_id: &str) -> StoreResult<()> {
        let record = self
            .get_evidence(session_id, evidence_id)
            .await?
            .ok_or_else(|| StoreError::EvidenceCollection(format!("evidence {evidence_id} not found")))?;
        for raw_ref in &record.raw_evidence_refs {
            if !Path::new(raw_ref).exists() {
                return Err(StoreError::RawLogMissing(raw_ref.clone()));
            }
        }
        Ok(())
    }

    pub async fn register_operation(&self, session_id: &str, operation_id: &str) -> StoreResult<()> {
        self.initialize(session_id).await?;
        let mut sessions = self.sessions.lock().await;
        if let Some(state) = sessions.get_mut(session_id) {
            state.registered_operations.insert(operation_id.to_string());
        }
        Ok(())
    }

    /// Operations registered for this session that have no corresponding
    /// recorded evidence. A non-empty list prevents an overall-COMPLETE
    /// verdict.
    pub async fn evidence_inventory(&self, session_id: &str) -> StoreResult<EvidenceInventory> {
        let recorded = self.list_evidence(session_id).await?;
        let recorded_ops: HashSet<String> = recorded.iter().filter_map(|r| r.operation_id.clone()).collect();

        let sessions = self.sessions.lock().await;
        let missing = sessions
            .get(session_id)
            .map(|state| {
                state
                    .registered_operations
                    .iter()
                    .filter(|op| !recorded_ops.contains(*op))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(EvidenceInventory {
            recorded: recorded.len(),
            missing_operations: missing,
        })
    }

    /// Write `evidence_index.json`, `evidence_index.sha256` (hashing only
    /// the index file's bytes), and `report.json`.
    pub async fn finalize_session(&self, session_id: &str) -> StoreResult<EvidenceIndex> {
        debug!(%session_id, "EvidenceStore::finalize_session");
        let order = {
            let sessions = self.sessions.lock().await;
            sessions.get(session_id).map(|s| s.insertion_order.clone()).unwrap_or_default()
        };

        let mut items = Vec::with_capacity(order.len());
        for evidence_id in &order {
            if let Some(record) = self.get_evidence(session_id, evidence_id).await? {
                items.push(EvidenceIndexEntry {
                    evidence_id: record.evidence_id,
                    operation_type: record.operation_type,
                    timestamp: record.timestamp,
                    hash: record.hash,
                });
            }
        }

        let index = EvidenceIndex {
            session_id: session_id.to_string(),
            created_at: now_ms(),
            finalized_at: Some(now_ms()),
            total_items: items.len(),
            evidence_items: items,
        };

        let index_bytes = serde_json::to_vec_pretty(&index)?;
        fs::write(self.index_file(session_id), &index_bytes).await?;

        let digest = sha256_hex(&index_bytes);
        fs::write(self.index_hash_file(session_id), &digest).await?;

        let inventory = self.evidence_inventory(session_id).await?;
        let report = serde_json::json!({
            "session_id": session_id,
            "finalized_at": index.finalized_at,
            "total_items": index.total_items,
            "missing_operations": inventory.missing_operations,
            "complete": inventory.missing_operations.is_empty(),
        });
        fs::write(self.report_file(session_id), serde_json::to_vec_pretty(&report)?).await?;

        info!(%session_id, total = index.total_items, "EvidenceStore::finalize_session: finalized");
        Ok(index)
    }

    /// Re-read the index file, recompute `sha256`, and compare to the
    /// stored digest. Any divergence is tamper.
    pub async fn verify_session_integrity(&self, session_id: &str) -> StoreResult<()> {
        let index_path = self.index_file(session_id);
        let hash_path = self.index_hash_file(session_id);
        if !index_path.exists() || !hash_path.exists() {
            return Err(StoreError::IndexCorruption(format!("session {session_id} was never finalized")));
        }

        let index_bytes = fs::read(&index_path).await?;
        let stored_digest = fs::read_to_string(&hash_path).await?;
        let computed_digest = sha256_hex(&index_bytes);

        if stored_digest.trim() == computed_digest {
            Ok(())
        } else {
            warn!(%session_id, "EvidenceStore::verify_session_integrity: hash mismatch detected");
            Err(StoreError::HashMismatch {
                expected: stored_digest.trim().to_string(),
                computed: computed_digest,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::record::Artifact;
    use tempfile::tempdir;

    fn record(session: &str, id: &str, op: Option<&str>) -> EvidenceRecord {
        EvidenceRecord::new(
            id.to_string(),
            session,
            op.map(|s| s.to_string()),
            "file_write",
            vec![Artifact {
                content: format!("content-{id}"),
                label: None,
            }],
            vec![],
        )
    }

    #[tokio::test]
    async fn test_record_then_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = EvidenceStore::new(dir.path());
        let rec = record("s1", "ev-1", None);
        store.record_evidence(&rec).await.unwrap();

        let fetched = store.get_evidence("s1", "ev-1").await.unwrap().unwrap();
        assert_eq!(fetched.hash, rec.hash);
    }

    #[tokio::test]
    async fn test_record_rejects_non_atomic() {
        let dir = tempdir().unwrap();
        let store = EvidenceStore::new(dir.path());
        let mut rec = record("s1", "ev-1", None);
        rec.atomic_operation = false;
        assert!(store.record_evidence(&rec).await.is_err());
    }

    #[tokio::test]
    async fn test_record_rejects_duplicate() {
        let dir = tempdir().unwrap();
        let store = EvidenceStore::new(dir.path());
        let rec = record("s1", "ev-1", None);
        store.record_evidence(&rec).await.unwrap();
        assert!(store.record_evidence(&rec).await.is_err());
    }

    #[tokio::test]
    async fn test_verify_evidence_passes_untouched() {
        let dir = tempdir().unwrap();
        let store = EvidenceStore::new(dir.path());
        let rec = record("s1", "ev-1", None);
        store.record_evidence(&rec).await.unwrap();
        assert!(store.verify_evidence("s1", "ev-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_finalize_then_verify_integrity() {
        let dir = tempdir().unwrap();
        let store = EvidenceStore::new(dir.path());
        store.record_evidence(&record("s1", "ev-1", None)).await.unwrap();
        store.record_evidence(&record("s1", "ev-2", None)).await.unwrap();

        let index = store.finalize_session("s1").await.unwrap();
        assert_eq!(index.total_items, 2);
        assert!(store.verify_session_integrity("s1").await.is_ok());
    }

    #[tokio::test]
    async fn test_tamper_detected_after_finalize() {
        let dir = tempdir().unwrap();
        let store = EvidenceStore::new(dir.path());
        store.record_evidence(&record("s1", "ev-1", None)).await.unwrap();
        store.finalize_session("s1").await.unwrap();

        // flip a byte in the finalized index
        let index_path = dir.path().join("evidence").join("s1").join("evidence_index.json");
        let mut bytes = std::fs::read(&index_path).unwrap();
        bytes[0] ^= 0xFF;
        std::fs::write(&index_path, bytes).unwrap();

        let result = store.verify_session_integrity("s1").await;
        assert!(matches!(result, Err(StoreError::HashMismatch { .. })));
    }

    #[tokio::test]
    async fn test_evidence_inventory_reports_missing_operations() {
        let dir = tempdir().unwrap();
        let store = EvidenceStore::new(dir.path());
        store.register_operation("s1", "op-a").await.unwrap();
        store.register_operation("s1", "op-b").await.unwrap();
        store.record_evidence(&record("s1", "ev-1", Some("op-a"))).await.unwrap();

        let inventory = store.evidence_inventory("s1").await.unwrap();
        assert_eq!(inventory.missing_operations, vec!["op-b".to_string()]);
    }

    #[tokio::test]
    async fn test_verify_raw_logs_missing_path() {
        let dir = tempdir().unwrap();
        let store = EvidenceStore::new(dir.path());
        let mut rec = record("s1", "ev-1", None);
        rec.raw_evidence_refs = vec!["/nonexistent/path.log".to_string()];
        store.record_evidence(&rec).await.unwrap();

        let result = store.verify_raw_logs("s1", "ev-1").await;
        assert!(matches!(result, Err(StoreError::RawLogMissing(_))));
    }

    #[tokio::test]
    async fn test_store_raw_log_writes_file() {
        let dir = tempdir().unwrap();
        let store = EvidenceStore::new(dir.path());
        let path = store.store_raw_log("s1", "exec-1", "log output").await.unwrap();
        assert!(path.exists());
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "log output");
    }
}
