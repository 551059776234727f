//! Plugin host (§4.5): the seam between a stage's declared `handler` name
//! and the code that actually produces its effect. Generalizes the
//! teacher's `WorkflowCli` subcommand dispatch (`plugins/workflow.rs`) from
//! "one hardcoded subcommand per workflow action" to "any stage handler
//! registered by name".

pub mod generic;

use crate::core::session_paths::SessionPaths;
use crate::core::vfs::Vfs;
use serde_json::Value;
use std::collections::HashMap;

/// Everything a stage handler needs to do its work and nothing else — no
/// access to the session's command-resolution state, only to storage.
pub struct HandlerContext<'a> {
    pub stage_id: &'a str,
    pub vfs: &'a Vfs,
    pub paths: &'a SessionPaths<'a>,
    pub input: &'a str,
}

/// A handler's output: the JSON payload to fingerprint and materialize,
/// plus human-readable progress lines for the telemetry bus.
pub struct PluginResult {
    pub payload: Value,
    pub messages: Vec<String>,
}

impl PluginResult {
    pub fn new(payload: Value) -> Self {
        PluginResult {
            payload,
            messages: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }
}

/// A stage effect producer, looked up by the manifest's `handler` field.
pub trait StageHandler: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, ctx: &HandlerContext) -> Result<PluginResult, anyhow::Error>;
}

/// Name-addressed table of registered handlers.
#[derive(Default)]
pub struct Registry {
    handlers: HashMap<String, Box<dyn StageHandler>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Box<dyn StageHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<&dyn StageHandler> {
        self.handlers.get(name).map(Box::as_ref)
    }
}
