//! Built-in stage handlers: a generic key=value capture handler for
//! ordinary stages, and a structural handler for stages that auto-execute
//! with no user-supplied content (§4.5 "structural stages").
//!
//! The key=value parsing mirrors the teacher's `WorkflowCli` argument
//! handling in `plugins/workflow.rs`, generalized from one fixed subcommand
//! shape to an arbitrary stage's free-form command tail; quoted-value
//! support is grounded on the precompiled-`Regex` style of
//! `core::gatekeeper::secret_patterns`.

use crate::plugins::{HandlerContext, PluginResult, StageHandler};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// `key="quoted value"` | `key=bare_value` | a bare token, tried in that
/// order left to right.
fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"([A-Za-z0-9_-]+)="([^"]*)"|([A-Za-z0-9_-]+)=(\S+)|(\S+)"#)
            .expect("token_pattern is a valid regex")
    })
}

/// Parses `key=value` pairs out of a command's argument tail into a JSON
/// object; anything that isn't `key=value` is collected under `"note"`.
pub struct GenericHandler {
    name: String,
}

impl GenericHandler {
    pub fn new(name: impl Into<String>) -> Self {
        GenericHandler { name: name.into() }
    }
}

impl StageHandler for GenericHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: &HandlerContext) -> Result<PluginResult, anyhow::Error> {
        let mut fields = Map::new();
        let mut notes = Vec::new();
        let tail = ctx.input.split_once(char::is_whitespace).map_or("", |(_, rest)| rest);
        for caps in token_pattern().captures_iter(tail) {
            if let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) {
                fields.insert(key.as_str().to_string(), Value::String(value.as_str().to_string()));
            } else if let (Some(key), Some(value)) = (caps.get(3), caps.get(4)) {
                fields.insert(key.as_str().to_string(), Value::String(value.as_str().to_string()));
            } else if let Some(bare) = caps.get(5) {
                notes.push(bare.as_str().to_string());
            }
        }
        if !notes.is_empty() {
            fields.insert("note".to_string(), Value::String(notes.join(" ")));
        }
        let payload = Value::Object(fields);
        Ok(PluginResult::new(payload)
            .with_message(format!("{} materialized", ctx.stage_id)))
    }
}

/// No-op handler for structural stages: it produces a fixed empty marker
/// so the stage has a real fingerprint without pretending to do work a
/// human command drove.
pub struct StructuralHandler {
    name: String,
}

impl StructuralHandler {
    pub fn new(name: impl Into<String>) -> Self {
        StructuralHandler { name: name.into() }
    }
}

impl StageHandler for StructuralHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: &HandlerContext) -> Result<PluginResult, anyhow::Error> {
        Ok(PluginResult::new(serde_json::json!({ "structural": true }))
            .with_message(format!("{} auto-executed", ctx.stage_id)))
    }
}
