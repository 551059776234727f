//! Chain validator (§4.4): staleness detection with transitive propagation.
//!
//! Direct drift checks (does a completed stage's recorded parent fingerprint
//! still match that parent's current fingerprint?) are independent per stage
//! and farmed out with `rayon`, the same fan-out pattern the teacher uses in
//! `state_commit`'s scope-record hashing. Propagation itself is inherently
//! sequential — a stage built on a now-stale parent is stale regardless of
//! whether its own recorded hash still matches — so that pass walks the
//! DAG's topological order once, after the parallel phase completes.

use crate::core::dag::Dag;
use crate::core::error::CalypsoError;
use crate::core::merkle::{latest_fingerprint_get, load_envelope};
use crate::core::session_paths::SessionPaths;
use crate::core::vfs::Vfs;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

/// Why a stage was flagged stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// The recorded fingerprint for `parent_id` no longer matches its
    /// current latest fingerprint.
    Drifted { parent_id: String },
    /// A parent (`via`) is itself stale, so this stage's base is invalid
    /// even though its own recorded hashes still match.
    Transitive { via: String },
}

#[derive(Debug, Default)]
pub struct StalenessReport {
    pub stale: HashMap<String, StaleReason>,
}

impl StalenessReport {
    pub fn is_stale(&self, stage_id: &str) -> bool {
        self.stale.contains_key(stage_id)
    }

    pub fn reason(&self, stage_id: &str) -> Option<&StaleReason> {
        self.stale.get(stage_id)
    }
}

/// A completed stage's parent-fingerprint drift, computed independently of
/// every other stage (no transitive reasoning yet).
struct DirectCheck {
    stage_id: String,
    drifted_parent: Option<String>,
}

fn direct_check(
    vfs: &Vfs,
    paths: &SessionPaths,
    dag: &Dag,
    stage_id: &str,
) -> Result<DirectCheck, CalypsoError> {
    let envelope = match load_envelope(vfs, paths, stage_id)? {
        Some(e) => e,
        None => {
            return Ok(DirectCheck {
                stage_id: stage_id.to_string(),
                drifted_parent: None,
            })
        }
    };
    let stage = dag
        .stage(stage_id)
        .ok_or_else(|| CalypsoError::NotFound(format!("stage '{stage_id}'")))?;
    for parent_id in &stage.previous {
        let recorded = envelope.parent_fingerprints.get(parent_id);
        let current = latest_fingerprint_get(vfs, paths, dag, parent_id)?;
        let drifted = match (recorded, &current) {
            (Some(r), Some(c)) => r != c,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if drifted {
            return Ok(DirectCheck {
                stage_id: stage_id.to_string(),
                drifted_parent: Some(parent_id.clone()),
            });
        }
    }
    Ok(DirectCheck {
        stage_id: stage_id.to_string(),
        drifted_parent: None,
    })
}

/// §4.4 `chain_validate`: flag every completed stage whose recorded chain
/// has drifted, directly or transitively, from the session's current state.
pub fn chain_validate(
    vfs: &Vfs,
    paths: &SessionPaths,
    dag: &Dag,
    completed: &HashSet<String>,
) -> Result<StalenessReport, CalypsoError> {
    let completed_ids: Vec<&String> = dag
        .topo_order()
        .iter()
        .filter(|id| completed.contains(*id))
        .collect();

    let direct: Vec<DirectCheck> = completed_ids
        .par_iter()
        .map(|id| direct_check(vfs, paths, dag, id))
        .collect::<Result<Vec<_>, CalypsoError>>()?;

    let direct_by_id: HashMap<String, Option<String>> = direct
        .into_iter()
        .map(|c| (c.stage_id, c.drifted_parent))
        .collect();

    let mut report = StalenessReport::default();
    for id in dag.topo_order() {
        if !completed.contains(id) {
            continue;
        }
        let stage = dag.stage(id).unwrap();
        if let Some(via) = stage
            .previous
            .iter()
            .find(|parent_id| report.stale.contains_key(parent_id.as_str()))
        {
            report
                .stale
                .insert(id.clone(), StaleReason::Transitive { via: via.clone() });
            continue;
        }
        if let Some(Some(parent_id)) = direct_by_id.get(id) {
            report.stale.insert(
                id.clone(),
                StaleReason::Drifted {
                    parent_id: parent_id.clone(),
                },
            );
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::merkle::artifact_materialize;

    const MANIFEST: &str = r#"
[[stage]]
id = "search"
previous = []
produces = ["search.json"]

[[stage]]
id = "gather"
previous = ["search"]
produces = ["gather.json"]

[[stage]]
id = "harmonize"
previous = ["gather"]
produces = ["harmonize.json"]
"#;

    fn setup() -> (tempfile::TempDir, Vfs) {
        let dir = tempfile::tempdir().unwrap();
        let (vfs, _rx) = Vfs::new(dir.path()).unwrap();
        (dir, vfs)
    }

    #[test]
    fn freshly_built_chain_has_no_staleness() {
        let dag = Dag::from_manifest_str(MANIFEST).unwrap();
        let paths = SessionPaths::new(&dag, "provenance");
        let (_dir, vfs) = setup();
        artifact_materialize(&vfs, &paths, &dag, "search", serde_json::json!({"q": 1})).unwrap();
        artifact_materialize(&vfs, &paths, &dag, "gather", serde_json::json!({"n": 1})).unwrap();
        let completed: HashSet<String> = ["search", "gather"].iter().map(|s| s.to_string()).collect();
        let report = chain_validate(&vfs, &paths, &dag, &completed).unwrap();
        assert!(!report.is_stale("gather"));
    }

    #[test]
    fn rerunning_parent_flags_child_stale() {
        let dag = Dag::from_manifest_str(MANIFEST).unwrap();
        let paths = SessionPaths::new(&dag, "provenance");
        let (_dir, vfs) = setup();
        artifact_materialize(&vfs, &paths, &dag, "search", serde_json::json!({"q": 1})).unwrap();
        artifact_materialize(&vfs, &paths, &dag, "gather", serde_json::json!({"n": 1})).unwrap();
        artifact_materialize(&vfs, &paths, &dag, "search", serde_json::json!({"q": 2})).unwrap();
        let completed: HashSet<String> = ["search", "gather"].iter().map(|s| s.to_string()).collect();
        let report = chain_validate(&vfs, &paths, &dag, &completed).unwrap();
        assert!(report.is_stale("gather"));
        assert!(matches!(report.reason("gather"), Some(StaleReason::Drifted { .. })));
    }

    #[test]
    fn staleness_propagates_transitively() {
        let dag = Dag::from_manifest_str(MANIFEST).unwrap();
        let paths = SessionPaths::new(&dag, "provenance");
        let (_dir, vfs) = setup();
        artifact_materialize(&vfs, &paths, &dag, "search", serde_json::json!({"q": 1})).unwrap();
        artifact_materialize(&vfs, &paths, &dag, "gather", serde_json::json!({"n": 1})).unwrap();
        artifact_materialize(&vfs, &paths, &dag, "harmonize", serde_json::json!({"h": 1}))
            .unwrap();
        artifact_materialize(&vfs, &paths, &dag, "search", serde_json::json!({"q": 2})).unwrap();
        let completed: HashSet<String> = ["search", "gather", "harmonize"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let report = chain_validate(&vfs, &paths, &dag, &completed).unwrap();
        assert!(report.is_stale("gather"));
        assert!(report.is_stale("harmonize"));
        assert!(matches!(
            report.reason("harmonize"),
            Some(StaleReason::Transitive { .. })
        ));
    }
}
