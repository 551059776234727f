//! `Kernel::command_execute` (§5): the single entry point every external
//! interface — CLI, REPL, script runtime — drives a workflow session
//! through. Tokenize, realign the session to disk, try shell builtins,
//! consult the (advisory-only) intent oracle, dispatch through the DAG,
//! check the transition, run the stage handler, materialize the artifact,
//! re-sync, and recurse into any structural stage that just became ready.

use crate::core::error::CalypsoError;
use crate::core::session_paths::SessionPaths;
use crate::core::telemetry::TelemetryBus;
use crate::core::workflow_session::{CommandResolution, WorkflowSession};
use crate::plugins::{HandlerContext, Registry};
use serde_json::Value;

/// Guards against a manifest of entirely-structural stages chaining forever.
const MAX_AUTO_EXECUTE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    Error,
    Blocked,
    Conversational,
}

#[derive(Debug, Clone)]
pub struct CalypsoResponse {
    pub status: StatusCode,
    pub message: String,
    pub stage_id: Option<String>,
    pub suggestion: Option<String>,
    pub data: Option<Value>,
}

impl CalypsoResponse {
    fn ok(stage_id: impl Into<String>, message: impl Into<String>, data: Value) -> Self {
        CalypsoResponse {
            status: StatusCode::Ok,
            message: message.into(),
            stage_id: Some(stage_id.into()),
            suggestion: None,
            data: Some(data),
        }
    }

    fn conversational(message: impl Into<String>, stage_id: Option<String>, suggestion: Option<String>) -> Self {
        CalypsoResponse {
            status: StatusCode::Conversational,
            message: message.into(),
            stage_id,
            suggestion,
            data: None,
        }
    }

    fn from_error(stage_id: Option<String>, err: &CalypsoError) -> Self {
        let status = match err {
            CalypsoError::SkipWarning { .. } => StatusCode::Blocked,
            CalypsoError::PreconditionError { .. } | CalypsoError::StalenessError { .. } => {
                StatusCode::Blocked
            }
            _ => StatusCode::Error,
        };
        CalypsoResponse {
            status,
            message: err.to_string(),
            stage_id,
            suggestion: err.suggestion(),
            data: None,
        }
    }
}

/// Advisory-only intent classification: its result never gates execution,
/// it only annotates telemetry. A failing oracle must never block a command.
pub trait IntentOracle: Send + Sync {
    fn classify(&self, input: &str) -> Result<String, anyhow::Error>;
}

/// A shell-level builtin (e.g. `help`, `status`) handled before the command
/// ever reaches workflow dispatch. Returns `None` to decline the input.
pub trait ShellBuiltin: Send + Sync {
    fn try_handle(&self, input: &str, session: &mut WorkflowSession) -> Option<CalypsoResponse>;
}

pub struct Kernel {
    pub telemetry: TelemetryBus,
    builtins: Vec<Box<dyn ShellBuiltin>>,
    oracle: Option<Box<dyn IntentOracle>>,
    registry: Registry,
}

impl Kernel {
    pub fn new(registry: Registry) -> Self {
        Kernel {
            telemetry: TelemetryBus::new(),
            builtins: Vec::new(),
            oracle: None,
            registry,
        }
    }

    pub fn with_builtin(mut self, builtin: Box<dyn ShellBuiltin>) -> Self {
        self.builtins.push(builtin);
        self
    }

    pub fn with_oracle(mut self, oracle: Box<dyn IntentOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// §5 `command_execute`.
    pub fn command_execute(
        &self,
        session: &mut WorkflowSession,
        raw_input: &str,
    ) -> Result<CalypsoResponse, CalypsoError> {
        self.command_execute_inner(session, raw_input, 0)
    }

    fn command_execute_inner(
        &self,
        session: &mut WorkflowSession,
        raw_input: &str,
        depth: usize,
    ) -> Result<CalypsoResponse, CalypsoError> {
        let input = raw_input.trim();
        session.sync()?;

        for builtin in &self.builtins {
            if let Some(response) = builtin.try_handle(input, session) {
                return Ok(response);
            }
        }

        if let Some(oracle) = &self.oracle {
            let phase = session
                .position()
                .current_stage
                .clone()
                .unwrap_or_else(|| "unassigned".to_string());
            match oracle.classify(input) {
                Ok(guess) => {
                    self.telemetry.log(&phase, "debug", format!("intent guess: {guess}"))?;
                }
                Err(e) => {
                    self.telemetry
                        .log(&phase, "warn", format!("oracle unavailable: {e}"))?;
                }
            }
        }

        match session.resolve_command(input) {
            CommandResolution::Execute { stage_id } => {
                self.execute_stage(session, &stage_id, input, depth)
            }
            CommandResolution::ConfirmationPending {
                target_stage_id,
                confirm_token,
            } => Ok(CalypsoResponse::conversational(
                format!(
                    "'{input}' jumps into a different phase at stage '{target_stage_id}'; \
                     re-issue '{confirm_token}' to confirm, or enter any other command to cancel."
                ),
                Some(target_stage_id),
                Some(confirm_token),
            )),
            CommandResolution::Blocked(err) => {
                let stage_id = session.adapter().stage_for_command(input).map(str::to_string);
                Ok(CalypsoResponse::from_error(stage_id, &err))
            }
        }
    }

    fn execute_stage(
        &self,
        session: &mut WorkflowSession,
        stage_id: &str,
        input: &str,
        depth: usize,
    ) -> Result<CalypsoResponse, CalypsoError> {
        let handler_name = session
            .adapter()
            .dag()
            .stage(stage_id)
            .ok_or_else(|| CalypsoError::NotFound(format!("stage '{stage_id}'")))?
            .handler
            .clone();
        let handler = self.registry.get(&handler_name).ok_or_else(|| {
            CalypsoError::NotFound(format!("handler '{handler_name}' for stage '{stage_id}'"))
        })?;

        let phase = session
            .adapter()
            .dag()
            .stage(stage_id)
            .map(|s| s.phase.clone())
            .unwrap_or_default();
        self.telemetry.frame_open(&phase, stage_id)?;

        let result = {
            let paths: SessionPaths = session.paths();
            let ctx = HandlerContext {
                stage_id,
                vfs: session.vfs(),
                paths: &paths,
                input,
            };
            handler.run(&ctx)
        };

        let plugin_result = match result {
            Ok(r) => r,
            Err(source) => {
                self.telemetry.frame_close(&phase, stage_id)?;
                return Err(CalypsoError::HandlerError {
                    stage_id: stage_id.to_string(),
                    source,
                });
            }
        };

        for message in &plugin_result.messages {
            self.telemetry.status(&phase, message.clone())?;
        }

        let paths = session.paths();
        let fp = crate::core::merkle::artifact_materialize(
            session.vfs(),
            &paths,
            session.adapter().dag(),
            stage_id,
            plugin_result.payload.clone(),
        )?;
        session.mark_completed(stage_id)?;
        self.telemetry.frame_close(&phase, stage_id)?;

        let position = session.position();
        self.telemetry
            .progress(&phase, position.progress_completed, position.progress_total)?;

        let mut response = CalypsoResponse::ok(
            stage_id,
            plugin_result
                .messages
                .last()
                .cloned()
                .unwrap_or_else(|| format!("{stage_id} complete")),
            serde_json::json!({ "fingerprint": fp }),
        );

        if let Some(next) = &position.current_stage {
            if depth < MAX_AUTO_EXECUTE_DEPTH {
                if let Some(next_stage) = session.adapter().dag().stage(next) {
                    if next_stage.structural {
                        let auto = self.command_execute_inner(
                            session,
                            &next_stage.commands.first().cloned().unwrap_or_default(),
                            depth + 1,
                        )?;
                        response = auto;
                    }
                }
            }
        }

        Ok(response)
    }
}
