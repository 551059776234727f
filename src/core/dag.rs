//! DAG definition & resolver (§4.1) and the command index (§4.2).
//!
//! A manifest is TOML (mirrors the teacher's `proofs.toml`/`ProofConfig`
//! loader shape in spirit, generalized from "flat list of executable
//! checks" to "a graph of stages"). Parsing is fail-closed: any of the
//! `ManifestError` conditions in §4.1 aborts the load.

use crate::core::error::CalypsoError;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

/// A stage's skip-warning escalation, graded by `transition_check`.
#[derive(Debug, Clone, Deserialize)]
pub struct SkipWarning {
    pub short: String,
    #[serde(default)]
    pub reason: String,
    pub max_warnings: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct StageSource {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    phase: String,
    #[serde(default)]
    previous: Vec<String>,
    #[serde(default)]
    commands: Vec<String>,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    skip_warning: Option<SkipWarning>,
    #[serde(default)]
    produces: Vec<String>,
    #[serde(default)]
    handler: String,
    #[serde(default)]
    structural: bool,
    #[serde(default)]
    completes_with: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ManifestHeader {
    #[serde(default)]
    name: String,
    #[serde(default)]
    persona: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ManifestSource {
    #[serde(default)]
    manifest: ManifestHeader,
    #[serde(rename = "stage", default)]
    stages: Vec<StageSource>,
}

impl Default for ManifestHeader {
    fn default() -> Self {
        ManifestHeader {
            name: "workflow".to_string(),
            persona: "operator".to_string(),
            description: String::new(),
        }
    }
}

/// A DAG node: a workflow stage.
#[derive(Debug, Clone)]
pub struct Stage {
    pub id: String,
    pub name: String,
    pub phase: String,
    /// `previous[0]` is the primary parent used for path nesting (§4.3).
    pub previous: Vec<String>,
    pub commands: Vec<String>,
    pub optional: bool,
    pub skip_warning: Option<SkipWarning>,
    /// `produces[0]` is the canonical artifact name.
    pub produces: Vec<String>,
    pub handler: String,
    /// Structural stages auto-execute on entry; no user command needed.
    pub structural: bool,
    pub completes_with: Option<String>,
}

impl Stage {
    pub fn primary_parent(&self) -> Option<&str> {
        self.previous.first().map(String::as_str)
    }

    /// The stage whose artifact stands in for this one's completion
    /// (§4.4 `latestFingerprint_get`).
    pub fn fingerprint_target_id(&self) -> &str {
        self.completes_with.as_deref().unwrap_or(&self.id)
    }
}

/// Parsed, validated workflow manifest: nodes, edges, topological order.
pub struct Dag {
    pub name: String,
    pub persona: String,
    pub description: String,
    stages: HashMap<String, Stage>,
    topo_order: Vec<String>,
    roots: Vec<String>,
    terminals: Vec<String>,
    command_index: FxHashMap<String, String>,
}

/// Per-stage readiness, as returned by `dag_resolve` (§4.1).
#[derive(Debug, Clone)]
pub struct Readiness {
    pub pending_parents: Vec<String>,
    pub ready: bool,
}

/// Read-model derived from completed/stale sets (§3 "Workflow position").
#[derive(Debug, Clone)]
pub struct WorkflowPosition {
    pub completed_stages: Vec<String>,
    pub stale_stages: Vec<String>,
    pub current_stage: Option<String>,
    pub available_commands: Vec<String>,
    pub progress_completed: usize,
    pub progress_total: usize,
    pub is_complete: bool,
}

impl Dag {
    pub fn from_manifest_str(source: &str) -> Result<Dag, CalypsoError> {
        let parsed: ManifestSource = toml::from_str(source)?;
        Self::from_source(parsed)
    }

    fn from_source(parsed: ManifestSource) -> Result<Dag, CalypsoError> {
        let mut stages: HashMap<String, Stage> = HashMap::new();
        for s in parsed.stages {
            if stages.contains_key(&s.id) {
                return Err(CalypsoError::ManifestError(format!(
                    "duplicate stage id: {}",
                    s.id
                )));
            }
            if s.optional && s.skip_warning.is_some() {
                return Err(CalypsoError::ManifestError(format!(
                    "stage '{}' declares both optional=true and skip_warning",
                    s.id
                )));
            }
            if !s.produces.is_empty() && s.produces[0].trim().is_empty() {
                return Err(CalypsoError::ManifestError(format!(
                    "stage '{}' is missing its canonical produces[0] entry",
                    s.id
                )));
            }
            let name = if s.name.is_empty() {
                s.id.clone()
            } else {
                s.name.clone()
            };
            stages.insert(
                s.id.clone(),
                Stage {
                    id: s.id,
                    name,
                    phase: s.phase,
                    previous: s.previous,
                    commands: s.commands,
                    optional: s.optional,
                    skip_warning: s.skip_warning,
                    produces: s.produces,
                    handler: s.handler,
                    structural: s.structural,
                    completes_with: s.completes_with,
                },
            );
        }

        for stage in stages.values() {
            for parent in &stage.previous {
                if !stages.contains_key(parent) {
                    return Err(CalypsoError::ManifestError(format!(
                        "stage '{}' references unknown parent '{}'",
                        stage.id, parent
                    )));
                }
            }
        }

        let topo_order = topological_sort(&stages)?;

        let mut has_children: HashSet<&str> = HashSet::new();
        for stage in stages.values() {
            for parent in &stage.previous {
                has_children.insert(parent.as_str());
            }
        }
        let mut roots: Vec<String> = stages
            .values()
            .filter(|s| s.previous.is_empty())
            .map(|s| s.id.clone())
            .collect();
        roots.sort();
        let mut terminals: Vec<String> = stages
            .values()
            .filter(|s| !has_children.contains(s.id.as_str()))
            .map(|s| s.id.clone())
            .collect();
        terminals.sort();

        let command_index = build_command_index(&stages, &roots);

        Ok(Dag {
            name: parsed.manifest.name,
            persona: parsed.manifest.persona,
            description: parsed.manifest.description,
            stages,
            topo_order,
            roots,
            terminals,
            command_index,
        })
    }

    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.get(id)
    }

    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.values()
    }

    pub fn topo_order(&self) -> &[String] {
        &self.topo_order
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn terminals(&self) -> &[String] {
        &self.terminals
    }

    pub fn root_id(&self) -> Option<&str> {
        self.roots.first().map(String::as_str)
    }

    /// §4.1 `dag_resolve`.
    pub fn dag_resolve(&self, completed: &HashSet<String>) -> HashMap<String, Readiness> {
        let mut out = HashMap::new();
        for id in &self.topo_order {
            let stage = &self.stages[id];
            if completed.contains(id) {
                out.insert(
                    id.clone(),
                    Readiness {
                        pending_parents: Vec::new(),
                        ready: true,
                    },
                );
                continue;
            }
            let pending: Vec<String> = stage
                .previous
                .iter()
                .filter(|p| !completed.contains(*p))
                .cloned()
                .collect();
            let ready = pending.is_empty();
            out.insert(
                id.clone(),
                Readiness {
                    pending_parents: pending,
                    ready,
                },
            );
        }
        out
    }

    /// §4.1 `position_resolve`.
    pub fn position_resolve(
        &self,
        completed: &HashSet<String>,
        stale: &HashSet<String>,
    ) -> WorkflowPosition {
        let readiness = self.dag_resolve(completed);

        let completed_stages: Vec<String> = self
            .topo_order
            .iter()
            .filter(|id| completed.contains(*id))
            .cloned()
            .collect();

        let mut stale_stages: Vec<String> = self
            .topo_order
            .iter()
            .filter(|id| stale.contains(*id))
            .cloned()
            .collect();
        stale_stages.sort();

        let current_stage = self.topo_order.iter().find(|id| {
            readiness[*id].ready && !completed.contains(*id)
        });

        let mut available_commands: Vec<String> = Vec::new();
        if let Some(cur) = current_stage {
            available_commands.extend(self.stages[cur].commands.clone());
        }
        for id in &self.topo_order {
            if Some(id) == current_stage {
                continue;
            }
            let r = &readiness[id];
            let stage = &self.stages[id];
            if r.ready && !completed.contains(id) && !stage.structural {
                for cmd in &stage.commands {
                    if !available_commands.contains(cmd) {
                        available_commands.push(cmd.clone());
                    }
                }
            }
        }

        let is_complete = self.terminals.iter().all(|id| {
            let stage = &self.stages[id];
            stage.optional || (completed.contains(id) && !stale.contains(id))
        });

        WorkflowPosition {
            completed_stages,
            stale_stages,
            current_stage: current_stage.cloned(),
            available_commands,
            progress_completed: completed.len(),
            progress_total: self.stages.len(),
            is_complete,
        }
    }

    /// §4.2 `stage_forCommand`.
    pub fn stage_for_command(&self, input: &str) -> Option<&str> {
        let trimmed = input.trim();
        if let Some(id) = self.command_index.get(trimmed) {
            return Some(id.as_str());
        }
        let first_token = trimmed.split_whitespace().next()?;
        self.command_index.get(first_token).map(String::as_str)
    }

    /// §4.2 `commandDeclared_isExplicit`.
    pub fn command_declared_is_explicit(&self, input: &str) -> bool {
        let trimmed = input.trim();
        self.stages
            .values()
            .any(|s| s.commands.iter().any(|c| c == trimmed))
    }
}

fn topological_sort(stages: &HashMap<String, Stage>) -> Result<Vec<String>, CalypsoError> {
    let mut ids: Vec<&String> = stages.keys().collect();
    ids.sort();

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for id in &ids {
        in_degree.entry(id.as_str()).or_insert(0);
    }
    for id in &ids {
        let stage = &stages[*id];
        *in_degree.entry(id.as_str()).or_insert(0) += stage.previous.len();
        for parent in &stage.previous {
            children.entry(parent.as_str()).or_default().push(id.as_str());
        }
    }

    let mut ready: std::collections::BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(ids.len());
    while let Some(&next) = ready.iter().next() {
        ready.remove(next);
        order.push(next.to_string());
        if let Some(kids) = children.get(next) {
            let mut kids_sorted = kids.clone();
            kids_sorted.sort();
            for kid in kids_sorted {
                let deg = in_degree.get_mut(kid).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    ready.insert(kid);
                }
            }
        }
    }

    if order.len() != ids.len() {
        return Err(CalypsoError::ManifestError(
            "manifest contains a cycle".to_string(),
        ));
    }
    Ok(order)
}

/// §4.2 four-pass command index construction, iterating stages in
/// id-sorted order so the resulting index is independent of manifest
/// declaration order (property test #10).
fn build_command_index(
    stages: &HashMap<String, Stage>,
    roots: &[String],
) -> FxHashMap<String, String> {
    let mut ids: Vec<&String> = stages.keys().collect();
    ids.sort();

    let mut index: FxHashMap<String, String> = FxHashMap::default();

    // Pass 1: multi-word phrases, exact match.
    for id in &ids {
        let stage = &stages[*id];
        for cmd in &stage.commands {
            if cmd.contains(' ') {
                index.entry(cmd.clone()).or_insert_with(|| stage.id.clone());
            }
        }
    }

    // Pass 2: single-word phrases where the verb equals the stage id.
    for id in &ids {
        let stage = &stages[*id];
        for cmd in &stage.commands {
            if !cmd.contains(' ') && cmd == &stage.id {
                index.insert(cmd.clone(), stage.id.clone());
            }
        }
    }

    // Pass 3: workflow-reserved overrides — the root stage's own command
    // phrases always win, even over a multi-word phrase owned elsewhere.
    if let Some(root_id) = roots.first() {
        if let Some(root) = stages.get(root_id) {
            for cmd in &root.commands {
                index.insert(cmd.clone(), root.id.clone());
            }
        }
    }

    // Pass 4: fall back to indexing remaining single-word base verbs to
    // their declaring stage, unless shadowed by another stage's multi-word
    // phrase sharing the same base verb.
    let mut multiword_base_owner: HashMap<String, String> = HashMap::new();
    for id in &ids {
        let stage = &stages[*id];
        for cmd in &stage.commands {
            if cmd.contains(' ') {
                if let Some(base) = cmd.split_whitespace().next() {
                    multiword_base_owner
                        .entry(base.to_string())
                        .or_insert_with(|| stage.id.clone());
                }
            }
        }
    }
    for id in &ids {
        let stage = &stages[*id];
        for cmd in &stage.commands {
            if cmd.contains(' ') || index.contains_key(cmd) {
                continue;
            }
            if let Some(owner) = multiword_base_owner.get(cmd) {
                if owner != &stage.id {
                    continue;
                }
            }
            index.insert(cmd.clone(), stage.id.clone());
        }
    }

    index
}
