//! Session path resolution (§4.3): the topology-mirroring directory layout
//! that nests each stage's working directory inside its *primary* parent's,
//! walking the chain back to the DAG root. A join stage's secondary parents
//! contribute to readiness (§4.1) but never to its path.

use crate::core::dag::Dag;
use crate::core::error::CalypsoError;

/// Guards against a manifest that slipped past `Dag`'s own cycle check
/// (e.g. a `completes_with` loop) from hanging path resolution.
const MAX_CHAIN_DEPTH: usize = 256;

pub struct SessionPaths<'a> {
    dag: &'a Dag,
    root_rel: String,
}

impl<'a> SessionPaths<'a> {
    pub fn new(dag: &'a Dag, root_rel: impl Into<String>) -> Self {
        SessionPaths {
            dag,
            root_rel: root_rel.into(),
        }
    }

    /// The chain of stage ids from the DAG root down to `stage_id`,
    /// following only `previous[0]` (the primary parent) at each step.
    pub fn nesting_chain(&self, stage_id: &str) -> Result<Vec<String>, CalypsoError> {
        let mut chain = Vec::new();
        let mut current = stage_id.to_string();
        loop {
            let stage = self
                .dag
                .stage(&current)
                .ok_or_else(|| CalypsoError::NotFound(format!("stage '{current}'")))?;
            chain.push(current.clone());
            match stage.primary_parent() {
                Some(parent) => current = parent.to_string(),
                None => break,
            }
            if chain.len() > MAX_CHAIN_DEPTH {
                return Err(CalypsoError::PathError(format!(
                    "primary-parent chain for '{stage_id}' exceeded {MAX_CHAIN_DEPTH} hops"
                )));
            }
        }
        chain.reverse();
        Ok(chain)
    }

    /// VFS-relative directory a stage's artifacts live under, e.g.
    /// `provenance/search/gather/harmonize/meta` for a linear chain.
    pub fn data_dir(&self, stage_id: &str) -> Result<String, CalypsoError> {
        let chain = self.nesting_chain(stage_id)?;
        Ok(format!("{}/{}/meta", self.root_rel, chain.join("/")))
    }

    /// Canonical artifact file path for a stage: `dataDir/<produces[0]>`, or
    /// `dataDir/<stageId>.json` when the stage declares no outputs.
    pub fn artifact_file(&self, stage_id: &str) -> Result<String, CalypsoError> {
        let stage = self
            .dag
            .stage(stage_id)
            .ok_or_else(|| CalypsoError::NotFound(format!("stage '{stage_id}'")))?;
        let data_dir = self.data_dir(stage_id)?;
        let filename = stage
            .produces
            .first()
            .cloned()
            .unwrap_or_else(|| format!("{stage_id}.json"));
        Ok(format!("{data_dir}/{filename}"))
    }

    /// Path of the `latest` viewport symlink, maintained by `WorkflowSession`
    /// to always point at the current stage's data directory (§6).
    pub fn viewport_link(&self) -> String {
        format!("{}/latest", self.root_rel)
    }

    /// The session tree's own root, for callers that need to walk the whole
    /// subtree (`latestFingerprint_get`'s recursive scan) rather than one
    /// stage's directory.
    pub fn root_rel(&self) -> &str {
        &self.root_rel
    }
}
