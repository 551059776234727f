//! `WorkflowAdapter` (§5 "transition_check", §7): the immutable DAG plus the
//! one piece of session-scoped mutable state the DAG itself doesn't carry —
//! per-stage skip-warning counters. Everything else here is a pure function
//! of `(completed, stale)`.

use crate::core::dag::{Dag, WorkflowPosition};
use crate::core::error::CalypsoError;
use std::collections::{HashMap, HashSet};

pub struct WorkflowAdapter {
    dag: Dag,
    skip_counts: HashMap<String, u32>,
}

impl WorkflowAdapter {
    pub fn new(dag: Dag) -> Self {
        WorkflowAdapter {
            dag,
            skip_counts: HashMap::new(),
        }
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn position_resolve(
        &self,
        completed: &HashSet<String>,
        stale: &HashSet<String>,
    ) -> WorkflowPosition {
        self.dag.position_resolve(completed, stale)
    }

    pub fn stage_for_command(&self, input: &str) -> Option<&str> {
        self.dag.stage_for_command(input)
    }

    /// §5/§7 `transition_check`: may `target_stage_id` run right now, given
    /// what's completed and what's gone stale?
    ///
    /// Checked in order: hard block (a required parent never ran), stale
    /// block (a parent ran but has since drifted), then soft skip-warning
    /// blocks for any optional, ready, uncompleted stage the caller would be
    /// bypassing by jumping straight to `target_stage_id`. Skip counters are
    /// per stage and exhaust after `max_warnings`, after which the jump is
    /// silently allowed.
    pub fn transition_check(
        &mut self,
        target_stage_id: &str,
        completed: &HashSet<String>,
        stale: &HashSet<String>,
    ) -> Result<(), CalypsoError> {
        let stage = self
            .dag
            .stage(target_stage_id)
            .ok_or_else(|| CalypsoError::NotFound(format!("stage '{target_stage_id}'")))?;

        for parent_id in &stage.previous {
            let parent = self
                .dag
                .stage(parent_id)
                .ok_or_else(|| CalypsoError::NotFound(format!("stage '{parent_id}'")))?;
            if !completed.contains(parent_id) && !parent.optional && parent.skip_warning.is_none()
            {
                return Err(CalypsoError::PreconditionError {
                    stage_id: target_stage_id.to_string(),
                    parent_id: parent_id.clone(),
                });
            }
        }

        for parent_id in &stage.previous {
            if stale.contains(parent_id) {
                return Err(CalypsoError::StalenessError {
                    stage_id: target_stage_id.to_string(),
                    parent_id: parent_id.clone(),
                });
            }
        }

        let readiness = self.dag.dag_resolve(completed);
        let mut skipped_ids: Vec<&String> = self
            .dag
            .topo_order()
            .iter()
            .filter(|id| {
                id.as_str() != target_stage_id
                    && !completed.contains(*id)
                    && readiness[*id].ready
                    && self.dag.stage(id).is_some_and(|s| s.skip_warning.is_some())
            })
            .collect();
        skipped_ids.sort();

        for id in skipped_ids {
            let stage = self.dag.stage(id).unwrap();
            let warning = stage.skip_warning.as_ref().unwrap();
            let tier = self.skip_counts.entry(id.clone()).or_insert(0);
            *tier += 1;
            if *tier <= warning.max_warnings {
                return Err(CalypsoError::SkipWarning {
                    short: warning.short.clone(),
                    reason: warning.reason.clone(),
                    tier: *tier,
                    max_warnings: warning.max_warnings,
                });
            }
        }

        Ok(())
    }
}
