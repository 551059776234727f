//! MerkleEngine (§4.4): artifact materialization and fingerprint lookup.
//!
//! Each materialized artifact is wrapped in an `ArtifactEnvelope` carrying
//! its own fingerprint and its parents' fingerprints at the moment it was
//! built — the same envelope-plus-hash shape as the teacher's
//! `WorkUnitManifest::canonical_hash_hex`, generalized from a single
//! canonical hash to a chain that can be walked for staleness (`core::chain_validator`).

use crate::core::canonical::{canonical_bytes, fingerprint};
use crate::core::dag::Dag;
use crate::core::error::CalypsoError;
use crate::core::session_paths::SessionPaths;
use crate::core::time::now_iso8601;
use crate::core::vfs::Vfs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const FINGERPRINT_KEY: &str = "_fingerprint";
pub const PARENT_FINGERPRINTS_KEY: &str = "_parent_fingerprints";
pub const TIMESTAMP_KEY: &str = "_timestamp";
pub const SKIP_SENTINEL_KEY: &str = "_skipped";

/// On-disk shape of a materialized artifact: the stage's own payload plus
/// Merkle provenance fields, all siblings at the top level of one JSON object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEnvelope {
    #[serde(rename = "stage")]
    pub stage: String,
    #[serde(rename = "_fingerprint")]
    pub fingerprint: String,
    #[serde(rename = "_parent_fingerprints")]
    pub parent_fingerprints: BTreeMap<String, String>,
    #[serde(rename = "_timestamp")]
    pub timestamp: String,
    #[serde(default, rename = "_skipped")]
    pub skipped: bool,
    #[serde(flatten)]
    pub payload: Value,
}

impl ArtifactEnvelope {
    pub fn to_json(&self) -> Result<Value, CalypsoError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(value: Value) -> Result<ArtifactEnvelope, CalypsoError> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Fingerprints of a stage's declared parents (primary + secondary),
/// gathered from their latest materialized artifacts.
fn gather_parent_fingerprints(
    vfs: &Vfs,
    paths: &SessionPaths,
    dag: &Dag,
    stage_id: &str,
) -> Result<BTreeMap<String, String>, CalypsoError> {
    let stage = dag
        .stage(stage_id)
        .ok_or_else(|| CalypsoError::NotFound(format!("stage '{stage_id}'")))?;
    let mut out = BTreeMap::new();
    for parent_id in &stage.previous {
        if let Some(fp) = latest_fingerprint_get(vfs, paths, dag, parent_id)? {
            out.insert(parent_id.clone(), fp);
        }
    }
    Ok(out)
}

/// §4.4 `artifact_materialize`: canonicalize the payload, fingerprint it
/// against its parents' current fingerprints, write the envelope to the
/// stage's artifact file, and return the fingerprint.
pub fn artifact_materialize(
    vfs: &Vfs,
    paths: &SessionPaths,
    dag: &Dag,
    stage_id: &str,
    payload: Value,
) -> Result<String, CalypsoError> {
    let parent_fingerprints = gather_parent_fingerprints(vfs, paths, dag, stage_id)?;
    let fp = fingerprint(stage_id, &payload, &parent_fingerprints);
    let envelope = ArtifactEnvelope {
        stage: stage_id.to_string(),
        fingerprint: fp.clone(),
        parent_fingerprints,
        timestamp: now_iso8601(),
        skipped: false,
        payload,
    };
    let artifact_path = paths.artifact_file(stage_id)?;
    vfs.write_file(&artifact_path, &canonical_bytes(&envelope.to_json()?))?;
    Ok(fp)
}

/// §4.4 `skipSentinel_materialize`: record that an optional stage was
/// skipped, without running its handler. The sentinel still carries a
/// fingerprint so downstream chain validation has something to compare.
pub fn skip_sentinel_materialize(
    vfs: &Vfs,
    paths: &SessionPaths,
    dag: &Dag,
    stage_id: &str,
) -> Result<String, CalypsoError> {
    let payload = serde_json::json!({ "reason": "skipped" });
    let parent_fingerprints = gather_parent_fingerprints(vfs, paths, dag, stage_id)?;
    let fp = fingerprint(stage_id, &payload, &parent_fingerprints);
    let envelope = ArtifactEnvelope {
        stage: stage_id.to_string(),
        fingerprint: fp.clone(),
        parent_fingerprints,
        timestamp: now_iso8601(),
        skipped: true,
        payload,
    };
    let artifact_path = paths.artifact_file(stage_id)?;
    vfs.write_file(&artifact_path, &canonical_bytes(&envelope.to_json()?))?;
    Ok(fp)
}

/// §4.4 `latestFingerprint_get`: recursively walk the session subtree,
/// collect every `.json` file whose parsed envelope's `stage` matches the
/// target (following `completes_with` to its fingerprint target), and
/// return the fingerprint of the one with the maximum ISO-8601
/// `_timestamp` — history can outlive a single canonical artifact path,
/// e.g. sibling timestamped snapshots kept alongside it. Returns `None` if
/// the stage has never been materialized anywhere in the tree.
pub fn latest_fingerprint_get(
    vfs: &Vfs,
    paths: &SessionPaths,
    dag: &Dag,
    stage_id: &str,
) -> Result<Option<String>, CalypsoError> {
    let stage = dag
        .stage(stage_id)
        .ok_or_else(|| CalypsoError::NotFound(format!("stage '{stage_id}'")))?;
    let target_id = stage.fingerprint_target_id();

    let mut best: Option<(String, String)> = None;
    for candidate_path in vfs.find_json_files(paths.root_rel())? {
        let Ok(bytes) = vfs.read_file(&candidate_path) else {
            continue;
        };
        let Ok(raw) = serde_json::from_slice::<Value>(&bytes) else {
            continue;
        };
        let Ok(envelope) = ArtifactEnvelope::from_json(raw) else {
            continue;
        };
        if envelope.stage != target_id {
            continue;
        }
        let is_newer = match &best {
            Some((best_ts, _)) => envelope.timestamp > *best_ts,
            None => true,
        };
        if is_newer {
            best = Some((envelope.timestamp, envelope.fingerprint));
        }
    }
    Ok(best.map(|(_, fp)| fp))
}

/// Load a stage's full envelope, if materialized.
pub fn load_envelope(
    vfs: &Vfs,
    paths: &SessionPaths,
    stage_id: &str,
) -> Result<Option<ArtifactEnvelope>, CalypsoError> {
    let artifact_path = paths.artifact_file(stage_id)?;
    if !vfs.exists(&artifact_path) {
        return Ok(None);
    }
    let raw: Value = serde_json::from_slice(&vfs.read_file(&artifact_path)?)?;
    Ok(Some(ArtifactEnvelope::from_json(raw)?))
}
