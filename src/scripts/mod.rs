//! Script runtime (§4.7): a fixed sequence of commands replayed through the
//! same `Kernel::command_execute` entry point a human types into, so a
//! script can never observe or cause behavior a human session couldn't.
//! Contract-level only — no branching, no variable substitution beyond what
//! a `Step`'s literal command string already carries.

use crate::core::error::CalypsoError;
use crate::core::kernel::{CalypsoResponse, Kernel, StatusCode};
use crate::core::workflow_session::WorkflowSession;

/// One command the script will submit, in order.
#[derive(Debug, Clone)]
pub struct Step {
    pub command: String,
}

impl Step {
    pub fn new(command: impl Into<String>) -> Self {
        Step {
            command: command.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Script {
    pub steps: Vec<Step>,
}

impl Script {
    pub fn new(steps: Vec<Step>) -> Self {
        Script { steps }
    }
}

/// Replays a `Script` against one session, auto-confirming any phase jump a
/// step's command triggers (a script author who wrote the jump already
/// intends it — there is no one to ask).
pub struct ScriptRunner<'a> {
    kernel: &'a Kernel,
}

impl<'a> ScriptRunner<'a> {
    pub fn new(kernel: &'a Kernel) -> Self {
        ScriptRunner { kernel }
    }

    pub fn run(
        &self,
        session: &mut WorkflowSession,
        script: &Script,
    ) -> Result<Vec<CalypsoResponse>, CalypsoError> {
        let mut responses = Vec::with_capacity(script.steps.len());
        for step in &script.steps {
            let response = self.kernel.command_execute(session, &step.command)?;
            if response.status == StatusCode::Conversational {
                if let Some(token) = &response.suggestion {
                    let confirmed = self.kernel.command_execute(session, token)?;
                    responses.push(confirmed);
                    continue;
                }
            }
            responses.push(response);
        }
        Ok(responses)
    }
}
