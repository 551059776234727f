//! `WorkflowSession` (§6): Check-Then-Crawl reconciliation, strict
//! stage-locked command resolution, and the phase-jump confirmation
//! protocol, all bound to one on-disk session tree.

use crate::core::chain_validator::chain_validate;
use crate::core::dag::WorkflowPosition;
use crate::core::error::CalypsoError;
use crate::core::session_paths::SessionPaths;
use crate::core::vfs::Vfs;
use crate::core::workflow_adapter::WorkflowAdapter;
use std::collections::HashSet;

/// A phase-jump command the user issued but hasn't yet confirmed.
#[derive(Debug, Clone)]
struct PendingJump {
    target_stage_id: String,
    command: String,
}

/// The outcome of resolving one line of user input against the session's
/// current position.
#[derive(Debug, Clone)]
pub enum CommandResolution {
    /// The command resolves to a stage that may execute right now.
    Execute { stage_id: String },
    /// The command would jump across phases; re-issue the returned token to
    /// confirm, or issue any other command to cancel the jump.
    ConfirmationPending {
        target_stage_id: String,
        confirm_token: String,
    },
    /// The command resolves to a stage that is blocked right now.
    Blocked(CalypsoError),
}

/// Literal confirmation token format from §6: `CONFIRM_JUMP:<id>|<command>`.
pub fn confirmation_token(target_stage_id: &str, command: &str) -> String {
    format!("CONFIRM_JUMP:{target_stage_id}|{command}")
}

/// `{workflowId, sessionId}` identity stamped into `session.json` (§3). Not
/// the source of truth — `sync()` still recomputes position from disk — just
/// a projection external tools can read without knowing the DAG shape.
#[derive(Debug, Clone)]
struct SessionIdentity {
    workflow_id: String,
    session_id: String,
}

pub struct WorkflowSession {
    vfs: Vfs,
    adapter: WorkflowAdapter,
    completed: HashSet<String>,
    stale: HashSet<String>,
    pending_confirmation: Option<PendingJump>,
    root_rel: String,
    identity: Option<SessionIdentity>,
}

impl WorkflowSession {
    pub fn new(vfs: Vfs, adapter: WorkflowAdapter, root_rel: impl Into<String>) -> Self {
        WorkflowSession {
            vfs,
            adapter,
            completed: HashSet::new(),
            stale: HashSet::new(),
            pending_confirmation: None,
            root_rel: root_rel.into(),
            identity: None,
        }
    }

    /// Stamp this session with the identity `session.json` reports. Without
    /// it, `sync()` never writes `session.json` at all.
    pub fn with_identity(mut self, workflow_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        self.identity = Some(SessionIdentity {
            workflow_id: workflow_id.into(),
            session_id: session_id.into(),
        });
        self
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    pub fn adapter(&self) -> &WorkflowAdapter {
        &self.adapter
    }

    pub fn completed(&self) -> &HashSet<String> {
        &self.completed
    }

    pub fn stale(&self) -> &HashSet<String> {
        &self.stale
    }

    pub fn paths(&self) -> SessionPaths<'_> {
        SessionPaths::new(self.adapter.dag(), self.root_rel.clone())
    }

    pub fn position(&self) -> WorkflowPosition {
        self.adapter.position_resolve(&self.completed, &self.stale)
    }

    /// §6 Check-Then-Crawl: re-derive `completed`/`stale` from what is
    /// actually materialized on disk, then point the viewport symlink at
    /// whatever the recomputed position says is current. Idempotent and
    /// safe to call before every command resolution.
    pub fn sync(&mut self) -> Result<(), CalypsoError> {
        let stage_ids: Vec<String> = self.adapter.dag().topo_order().to_vec();
        let mut completed = HashSet::new();
        {
            let paths = self.paths();
            for id in &stage_ids {
                let artifact_path = paths.artifact_file(id)?;
                if self.vfs.exists(&artifact_path) {
                    completed.insert(id.clone());
                }
            }
        }

        let stale_report = {
            let paths = self.paths();
            chain_validate(&self.vfs, &paths, self.adapter.dag(), &completed)?
        };
        self.stale = stale_report.stale.keys().cloned().collect();
        self.completed = completed;

        let position = self.position();
        if let Some(cur) = &position.current_stage {
            let paths = self.paths();
            let data_dir = paths.data_dir(cur)?;
            self.vfs.create_dir_all(&data_dir)?;
            self.vfs.symlink(&paths.viewport_link(), &data_dir)?;
        }

        if let Some(identity) = &self.identity {
            let summary = serde_json::json!({
                "workflowId": identity.workflow_id,
                "sessionId": identity.session_id,
                "activeStageId": position.current_stage,
                "updatedAt": crate::core::time::now_iso8601(),
            });
            self.vfs
                .write_file("session.json", &serde_json::to_vec_pretty(&summary)?)?;
        }
        Ok(())
    }

    /// §6 strict-lock `resolveCommand`, with phase-jump confirmation.
    pub fn resolve_command(&mut self, input: &str) -> CommandResolution {
        if let Some(pending) = self.pending_confirmation.take() {
            let expected = confirmation_token(&pending.target_stage_id, &pending.command);
            if input.trim() == expected {
                return self.attempt_transition(&pending.target_stage_id);
            }
            // Any other input cancels the pending jump and falls through to
            // resolving `input` fresh.
        }

        let Some(stage_id) = self.adapter.stage_for_command(input).map(str::to_string) else {
            return CommandResolution::Blocked(CalypsoError::NotFound(format!(
                "no stage declares command '{input}'"
            )));
        };

        let position = self.position();

        if let Some(cur) = &position.current_stage {
            if cur != &stage_id {
                self.pending_confirmation = Some(PendingJump {
                    target_stage_id: stage_id.clone(),
                    command: input.to_string(),
                });
                return CommandResolution::ConfirmationPending {
                    confirm_token: confirmation_token(&stage_id, input),
                    target_stage_id: stage_id,
                };
            }
        }

        self.attempt_transition(&stage_id)
    }

    fn attempt_transition(&mut self, stage_id: &str) -> CommandResolution {
        match self
            .adapter
            .transition_check(stage_id, &self.completed, &self.stale)
        {
            Ok(()) => CommandResolution::Execute {
                stage_id: stage_id.to_string(),
            },
            Err(e) => CommandResolution::Blocked(e),
        }
    }

    /// Record that `stage_id` just materialized an artifact, then re-sync.
    pub fn mark_completed(&mut self, stage_id: &str) -> Result<(), CalypsoError> {
        self.completed.insert(stage_id.to_string());
        self.stale.remove(stage_id);
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dag::Dag;
    use crate::core::merkle::artifact_materialize;

    const MANIFEST: &str = r#"
[[stage]]
id = "search"
phase = "discovery"
previous = []
commands = ["search"]
produces = ["search.json"]

[[stage]]
id = "gather"
phase = "discovery"
previous = ["search"]
commands = ["gather"]
produces = ["gather.json"]

[[stage]]
id = "code"
phase = "build"
previous = ["gather"]
commands = ["code"]
produces = ["code.json"]
"#;

    fn setup() -> (tempfile::TempDir, WorkflowSession) {
        let dir = tempfile::tempdir().unwrap();
        let (vfs, _rx) = Vfs::new(dir.path()).unwrap();
        let adapter = WorkflowAdapter::new(Dag::from_manifest_str(MANIFEST).unwrap());
        let session = WorkflowSession::new(vfs, adapter, "provenance");
        (dir, session)
    }

    #[test]
    fn sync_rebuilds_completed_from_disk() {
        let (_dir, mut session) = setup();
        session.sync().unwrap();
        let paths = session.paths();
        artifact_materialize(
            session.vfs(),
            &paths,
            session.adapter().dag(),
            "search",
            serde_json::json!({"q": 1}),
        )
        .unwrap();
        session.sync().unwrap();
        assert!(session.completed().contains("search"));
    }

    #[test]
    fn sync_writes_session_json_only_when_identity_is_set() {
        let (_dir, mut session) = setup();
        session.sync().unwrap();
        assert!(!session.vfs().exists("session.json"));

        let mut identified = WorkflowSession::new(
            Vfs::new(tempfile::tempdir().unwrap().into_path()).unwrap().0,
            WorkflowAdapter::new(Dag::from_manifest_str(MANIFEST).unwrap()),
            "provenance",
        )
        .with_identity("linear", "s-1");
        identified.sync().unwrap();
        assert!(identified.vfs().exists("session.json"));
        let raw = identified.vfs().read_to_string("session.json").unwrap();
        assert!(raw.contains("\"workflowId\": \"linear\""));
        assert!(raw.contains("\"sessionId\": \"s-1\""));
    }

    #[test]
    fn same_phase_command_executes_without_confirmation() {
        let (_dir, mut session) = setup();
        session.sync().unwrap();
        match session.resolve_command("search") {
            CommandResolution::Execute { stage_id } => assert_eq!(stage_id, "search"),
            other => panic!("expected Execute, got {other:?}"),
        }
    }

    #[test]
    fn cross_phase_jump_requires_confirmation_then_executes() {
        let (_dir, mut session) = setup();
        session.sync().unwrap();
        let paths = session.paths();
        artifact_materialize(
            session.vfs(),
            &paths,
            session.adapter().dag(),
            "search",
            serde_json::json!({"q": 1}),
        )
        .unwrap();
        session.mark_completed("search").unwrap();
        artifact_materialize(
            session.vfs(),
            &session.paths(),
            session.adapter().dag(),
            "gather",
            serde_json::json!({"n": 1}),
        )
        .unwrap();
        session.mark_completed("gather").unwrap();

        let pending = session.resolve_command("code");
        let token = match pending {
            CommandResolution::ConfirmationPending { confirm_token, target_stage_id } => {
                assert_eq!(target_stage_id, "code");
                confirm_token
            }
            other => panic!("expected ConfirmationPending, got {other:?}"),
        };

        match session.resolve_command(&token) {
            CommandResolution::Execute { stage_id } => assert_eq!(stage_id, "code"),
            other => panic!("expected Execute after confirmation, got {other:?}"),
        }
    }

    #[test]
    fn unrelated_input_cancels_pending_confirmation() {
        let (_dir, mut session) = setup();
        session.sync().unwrap();
        artifact_materialize(
            session.vfs(),
            &session.paths(),
            session.adapter().dag(),
            "search",
            serde_json::json!({"q": 1}),
        )
        .unwrap();
        session.mark_completed("search").unwrap();
        artifact_materialize(
            session.vfs(),
            &session.paths(),
            session.adapter().dag(),
            "gather",
            serde_json::json!({"n": 1}),
        )
        .unwrap();
        session.mark_completed("gather").unwrap();

        let _ = session.resolve_command("code");
        // Re-issuing "gather" should cancel the pending jump and resolve normally.
        match session.resolve_command("gather") {
            CommandResolution::Execute { stage_id } => assert_eq!(stage_id, "gather"),
            other => panic!("expected Execute, got {other:?}"),
        }
    }
}
