//! Calypso Workflow Kernel: a manifest-driven DAG execution engine that
//! binds interactive command sessions to a content-addressed,
//! topology-mirroring session tree on a virtual filesystem.
//!
//! A workflow is declared once as a TOML manifest (`core::dag`) and driven
//! thereafter through a single synchronous entry point,
//! `core::kernel::Kernel::command_execute`, shared by every external
//! surface this crate exposes: the `calypso` CLI (`run`, `repl`), scripted
//! replay (`scripts::ScriptRunner`), and any host embedding the library
//! directly.

mod cli;
pub mod core;
pub mod plugins;
pub mod scripts;

use crate::cli::{
    BootCli, ChainCommand, Cli, Command, ManifestCommand, RunCli, SessionCommand, SessionTarget,
};
use crate::core::chain_validator::{chain_validate, StaleReason};
use crate::core::config::load_config;
use crate::core::dag::Dag;
use crate::core::kernel::{CalypsoResponse, Kernel, StatusCode};
use crate::core::output::compact_line;
use crate::core::session::SessionRoot;
use crate::core::shell_builtin::DefaultShellBuiltin;
use crate::core::telemetry::{BootStatus, TelemetryBus};
use crate::core::vfs::Vfs;
use crate::core::workflow_adapter::WorkflowAdapter;
use crate::core::workflow_session::WorkflowSession;
use crate::plugins::generic::{GenericHandler, StructuralHandler};
use crate::plugins::Registry;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use std::fs;
use std::path::Path;

const DEFAULT_MANIFEST: &str = include_str!("../resources/default_manifest.toml");

/// Parse `std::env::args` and dispatch to the matching subcommand. The sole
/// entry point `src/main.rs` calls.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match &cli.command {
        Command::Manifest(m) => match &m.command {
            ManifestCommand::Validate { path } => cmd_manifest_validate(path, cli.json),
        },
        Command::Session(s) => match &s.command {
            SessionCommand::Init => cmd_session_init(&s.target),
            SessionCommand::Status => cmd_session_status(&s.target, cli.json),
            SessionCommand::Reset => cmd_session_reset(&s.target),
        },
        Command::Run(r) => cmd_run(r, cli.json),
        Command::Repl(target) => cmd_repl(target, cli.json),
        Command::Chain(c) => match &c.command {
            ChainCommand::Validate(target) => cmd_chain_validate(target, cli.json),
        },
        Command::Boot(b) => cmd_boot(b, cli.json),
    }
}

fn cmd_manifest_validate(path: &Path, as_json: bool) -> anyhow::Result<()> {
    let source =
        fs::read_to_string(path).with_context(|| format!("reading manifest at {}", path.display()))?;
    let dag = Dag::from_manifest_str(&source)?;
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "ok": true,
                "name": dag.name,
                "stages": dag.stages().count(),
                "root": dag.root_id(),
                "terminals": dag.terminals(),
            }))?
        );
    } else {
        println!(
            "{} manifest '{}': {} stages, root={:?}, terminals={:?}",
            "OK".green(),
            dag.name,
            dag.stages().count(),
            dag.root_id(),
            dag.terminals()
        );
    }
    Ok(())
}

/// Resolve a session's manifest, VFS, and adapter, then Check-Then-Crawl
/// it in sync with whatever already exists on disk.
fn open_session(target: &SessionTarget) -> anyhow::Result<WorkflowSession> {
    let config = load_config(&target.project)?;
    let manifest_path = target.project.join(&config.manifest_path);
    let source = fs::read_to_string(&manifest_path)
        .with_context(|| format!("reading manifest at {}", manifest_path.display()))?;
    let dag = Dag::from_manifest_str(&source)?;
    let workflow_id = dag.name.clone();

    let session_root = SessionRoot::new(
        target.project.join(".calypso").join("sessions"),
        &target.user,
        &config.persona,
        &target.session_id,
    );
    let (vfs, _events) = Vfs::new(session_root.root())?;
    let adapter = WorkflowAdapter::new(dag);
    let mut session = WorkflowSession::new(vfs, adapter, session_root.provenance_root())
        .with_identity(workflow_id, target.session_id.clone());
    session.sync()?;
    Ok(session)
}

fn cmd_session_init(target: &SessionTarget) -> anyhow::Result<()> {
    let manifest_dir = target.project.join(".calypso");
    let manifest_path = manifest_dir.join("workflow.toml");
    if !manifest_path.exists() {
        fs::create_dir_all(&manifest_dir)?;
        fs::write(&manifest_path, DEFAULT_MANIFEST)?;
        println!("seeded default manifest at {}", manifest_path.display());
    }
    let session = open_session(target)?;
    println!(
        "{} session '{}' ready at {}",
        "OK".green(),
        target.session_id,
        session.vfs().root().display()
    );
    Ok(())
}

fn cmd_session_status(target: &SessionTarget, as_json: bool) -> anyhow::Result<()> {
    let session = open_session(target)?;
    let position = session.position();
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "workflowId": session.adapter().dag().name,
                "sessionId": target.session_id,
                "currentStage": position.current_stage,
                "completedStages": position.completed_stages,
                "staleStages": position.stale_stages,
                "availableCommands": position.available_commands,
                "isComplete": position.is_complete,
            }))?
        );
    } else {
        println!(
            "session '{}' — stage: {}",
            target.session_id,
            position.current_stage.as_deref().unwrap_or("<complete>")
        );
        println!("completed: {}", position.completed_stages.join(", "));
        if !position.stale_stages.is_empty() {
            println!("{}: {}", "stale".yellow(), position.stale_stages.join(", "));
        }
        println!("available commands: {}", position.available_commands.join(", "));
    }
    Ok(())
}

fn cmd_session_reset(target: &SessionTarget) -> anyhow::Result<()> {
    let config = load_config(&target.project)?;
    let session_root = SessionRoot::new(
        target.project.join(".calypso").join("sessions"),
        &target.user,
        &config.persona,
        &target.session_id,
    );
    if session_root.root().exists() {
        fs::remove_dir_all(session_root.root())?;
    }
    println!("{} session '{}' reset", "OK".green(), target.session_id);
    Ok(())
}

/// Register a `GenericHandler` (or `StructuralHandler`, for `structural`
/// stages) per distinct handler name a manifest declares.
fn build_registry(dag: &Dag) -> Registry {
    let mut registry = Registry::new();
    for stage in dag.stages() {
        if stage.handler.is_empty() || registry.get(&stage.handler).is_some() {
            continue;
        }
        if stage.structural {
            registry.register(Box::new(StructuralHandler::new(stage.handler.clone())));
        } else {
            registry.register(Box::new(GenericHandler::new(stage.handler.clone())));
        }
    }
    registry
}

fn print_response(response: &CalypsoResponse, as_json: bool) {
    if as_json {
        let value = serde_json::json!({
            "status": format!("{:?}", response.status),
            "message": response.message,
            "stageId": response.stage_id,
            "suggestion": response.suggestion,
            "data": response.data,
        });
        println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
        return;
    }
    let label = match response.status {
        StatusCode::Ok => "OK".green(),
        StatusCode::Error => "ERROR".red(),
        StatusCode::Blocked => "BLOCKED".yellow(),
        StatusCode::Conversational => "...".cyan(),
    };
    println!("{label} {}", compact_line(&response.message, 200));
    if let Some(suggestion) = &response.suggestion {
        println!("  suggestion: {suggestion}");
    }
}

fn cmd_run(run: &RunCli, as_json: bool) -> anyhow::Result<()> {
    let mut session = open_session(&run.target)?;
    let kernel = Kernel::new(build_registry(session.adapter().dag()))
        .with_builtin(Box::new(DefaultShellBuiltin::new()));
    let input = run.command.join(" ");
    let response = kernel.command_execute(&mut session, &input)?;
    print_response(&response, as_json);
    Ok(())
}

fn cmd_repl(target: &SessionTarget, as_json: bool) -> anyhow::Result<()> {
    use std::io::BufRead;

    let mut session = open_session(target)?;
    let kernel = Kernel::new(build_registry(session.adapter().dag()))
        .with_builtin(Box::new(DefaultShellBuiltin::new()));
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }
        let response = kernel.command_execute(&mut session, input)?;
        print_response(&response, as_json);
    }
    Ok(())
}

fn cmd_chain_validate(target: &SessionTarget, as_json: bool) -> anyhow::Result<()> {
    let session = open_session(target)?;
    let paths = session.paths();
    let report = chain_validate(
        session.vfs(),
        &paths,
        session.adapter().dag(),
        session.completed(),
    )?;

    let mut entries: Vec<(String, String)> = Vec::new();
    for id in session.adapter().dag().topo_order() {
        if let Some(reason) = report.reason(id) {
            let reason_str = match reason {
                StaleReason::Drifted { parent_id } => format!("drifted from '{parent_id}'"),
                StaleReason::Transitive { via } => format!("transitively stale via '{via}'"),
            };
            entries.push((id.clone(), reason_str));
        }
    }

    if as_json {
        let value: Vec<_> = entries
            .iter()
            .map(|(id, reason)| serde_json::json!({"stage": id, "reason": reason}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if entries.is_empty() {
        println!("{} no stale stages", "OK".green());
    } else {
        for (id, reason) in &entries {
            println!("{} {id}: {reason}", "STALE".yellow());
        }
    }
    Ok(())
}

/// §8 scenario 6: publish a fixed boot sequence on a single `"boot"` phase,
/// ending in exactly one `BootStatus::Done` event.
fn boot_sequence(bus: &TelemetryBus, dag: &Dag) -> anyhow::Result<()> {
    bus.boot_log("boot", "starting calypso kernel", BootStatus::Wait)?;
    bus.boot_log(
        "boot",
        format!("manifest '{}' loaded: {} stages", dag.name, dag.stages().count()),
        BootStatus::Ok,
    )?;
    bus.boot_log("boot", "verifying topology", BootStatus::Wait)?;
    bus.boot_log(
        "boot",
        format!("topological order: {}", dag.topo_order().join(" -> ")),
        BootStatus::Ok,
    )?;
    bus.boot_log("boot", "kernel ready", BootStatus::Done)?;
    Ok(())
}

fn cmd_boot(boot: &BootCli, as_json: bool) -> anyhow::Result<()> {
    let source = match &boot.project {
        Some(root) => {
            let config = load_config(root)?;
            fs::read_to_string(root.join(&config.manifest_path))?
        }
        None => DEFAULT_MANIFEST.to_string(),
    };
    let dag = Dag::from_manifest_str(&source)?;

    let bus = TelemetryBus::new();
    let rx = bus.subscribe();
    boot_sequence(&bus, &dag)?;

    let records: Vec<_> = rx.try_iter().collect();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for record in &records {
            println!("[{}] seq={} {:?}", record.phase, record.seq, record.event);
        }
    }
    Ok(())
}
