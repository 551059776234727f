//! End-to-end scenarios driving `Kernel::command_execute` directly against a
//! `Vfs` rooted in a `tempfile::TempDir`, mirroring the teacher's style of
//! exercising the library straight through its public API rather than
//! shelling out to the CLI.
//!
//! All six scenarios share one linear-chain manifest:
//! `search -> gather -> harmonize -> code -> train`, with `search` and
//! `harmonize` each owning a second command phrase (`add`, `approve`) so a
//! stage can be re-driven without advancing the workflow.

use calypso_kernel::core::chain_validator::StaleReason;
use calypso_kernel::core::dag::Dag;
use calypso_kernel::core::kernel::{Kernel, StatusCode};
use calypso_kernel::core::session_paths::SessionPaths;
use calypso_kernel::core::telemetry::{BootStatus, TelemetryBus, TelemetryEvent};
use calypso_kernel::core::vfs::Vfs;
use calypso_kernel::core::workflow_adapter::WorkflowAdapter;
use calypso_kernel::core::workflow_session::WorkflowSession;
use calypso_kernel::plugins::generic::GenericHandler;
use calypso_kernel::plugins::Registry;

const MANIFEST: &str = r#"
[manifest]
name = "research"
persona = "operator"

[[stage]]
id = "search"
phase = "discovery"
previous = []
commands = ["search", "add"]
produces = ["search.json"]
handler = "search"

[[stage]]
id = "gather"
phase = "discovery"
previous = ["search"]
commands = ["gather"]
produces = ["gather.json"]
handler = "gather"

[[stage]]
id = "harmonize"
phase = "build"
previous = ["gather"]
commands = ["harmonize", "approve"]
produces = ["harmonize.json"]
handler = "harmonize"

[[stage]]
id = "code"
phase = "build"
previous = ["harmonize"]
commands = ["code"]
produces = ["code.json"]
handler = "code"

[[stage]]
id = "train"
phase = "delivery"
previous = ["code"]
commands = ["train"]
produces = ["train.json"]
handler = "train"
"#;

fn new_session(dir: &std::path::Path) -> WorkflowSession {
    let (vfs, _rx) = Vfs::new(dir).unwrap();
    let adapter = WorkflowAdapter::new(Dag::from_manifest_str(MANIFEST).unwrap());
    WorkflowSession::new(vfs, adapter, "provenance")
}

fn new_kernel() -> Kernel {
    let mut registry = Registry::new();
    for id in ["search", "gather", "harmonize", "code", "train"] {
        registry.register(Box::new(GenericHandler::new(id)));
    }
    Kernel::new(registry)
}

/// Scenario 1: `search histology` -> `add ds-006` -> `gather` -> `harmonize`
/// -> `approve`. `add`/`approve` re-drive `search`/`harmonize` without
/// advancing the chain, so only three stages actually complete.
#[test]
fn scenario_1_linear_chain_advances_to_code() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = new_kernel();
    let mut session = new_session(dir.path());

    for input in ["search histology", "add ds-006", "gather", "harmonize", "approve"] {
        let response = kernel.command_execute(&mut session, input).unwrap();
        assert_eq!(response.status, StatusCode::Ok, "input '{input}' was not OK: {response:?}");
    }

    assert!(session
        .vfs()
        .exists("provenance/search/gather/harmonize/meta/harmonize.json"));
    assert_eq!(session.position().current_stage.as_deref(), Some("code"));

    // The viewport symlink tracks the *current* (next-actionable) stage, not
    // the most recently completed one — by the time "approve" returns,
    // that's "code".
    let paths = session.paths();
    let viewport = session.vfs().resolve_through_links("provenance/latest").unwrap();
    let code_dir = session.vfs().resolve(&paths.data_dir("code").unwrap()).unwrap();
    assert_eq!(viewport, code_dir);
}

/// Scenario 2: issuing `harmonize` before its chain has run is blocked on its
/// nearest unmet precondition.
#[test]
fn scenario_2_precondition_blocks_out_of_order_stage() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = new_kernel();
    let mut session = new_session(dir.path());

    let response = kernel.command_execute(&mut session, "harmonize").unwrap();
    assert_eq!(response.status, StatusCode::Blocked);
    assert!(response.message.to_lowercase().contains("precondition"));
    assert!(response.message.contains("gather"));
    assert_eq!(response.suggestion.as_deref(), Some("run gather"));
}

/// Scenario 3: re-materializing `search` after `gather`/`harmonize` have run
/// drifts their recorded fingerprints, and the drift blocks the next stage
/// in the chain.
#[test]
fn scenario_3_rerunning_a_parent_stales_its_descendants() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = new_kernel();
    let mut session = new_session(dir.path());

    for input in ["search histology", "gather", "harmonize"] {
        kernel.command_execute(&mut session, input).unwrap();
    }
    assert!(session.stale().is_empty());

    kernel.command_execute(&mut session, "search a different query").unwrap();
    assert!(session.stale().contains("gather"));
    assert!(session.stale().contains("harmonize"));

    let response = kernel.command_execute(&mut session, "code").unwrap();
    assert_eq!(response.status, StatusCode::Blocked);
    assert!(response.message.to_lowercase().contains("stale"));
    assert_eq!(response.suggestion.as_deref(), Some("re-run harmonize"));
}

/// Scenario 4: issuing a command from a stage in a different phase than the
/// session's current stage requires confirmation; confirming re-resolves
/// the same command rather than silently executing it — so a jump onto a
/// stage whose own preconditions aren't met is still blocked after confirming.
#[test]
fn scenario_4_phase_jump_requires_confirmation() {
    use calypso_kernel::core::workflow_session::CommandResolution;

    let dir = tempfile::tempdir().unwrap();
    let kernel = new_kernel();
    let mut session = new_session(dir.path());

    for input in ["search histology", "gather"] {
        kernel.command_execute(&mut session, input).unwrap();
    }
    // current_stage is now "harmonize"; jumping straight to "train" targets a
    // different stage than the one the session is locked onto.
    assert_eq!(session.position().current_stage.as_deref(), Some("harmonize"));

    let resolution = session.resolve_command("train");
    let token = match resolution {
        CommandResolution::ConfirmationPending { confirm_token, target_stage_id } => {
            assert_eq!(target_stage_id, "train");
            confirm_token
        }
        other => panic!("expected ConfirmationPending, got {other:?}"),
    };

    // Confirming re-resolves "train" for real; its immediate parent "code"
    // was never run, so it's still blocked — confirmation clears the phase
    // lock, it doesn't waive the DAG's own preconditions.
    let response = kernel.command_execute(&mut session, &token).unwrap();
    assert_eq!(response.status, StatusCode::Blocked);
    assert!(response.message.contains("code"));
}

/// Scenario 5: independent sessions under distinct roots never share
/// artifacts or fingerprints.
#[test]
fn scenario_5_parallel_sessions_are_isolated() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let kernel = new_kernel();
    let mut session_a = new_session(dir_a.path());
    let mut session_b = new_session(dir_b.path());

    for input in ["search histology", "gather"] {
        kernel.command_execute(&mut session_a, input).unwrap();
        kernel.command_execute(&mut session_b, "search something else entirely").unwrap();
    }

    assert!(session_a.vfs().exists("provenance/search/meta/search.json"));
    assert!(!session_b.vfs().exists("provenance/search/gather/meta/gather.json"));

    let paths_a = session_a.paths();
    let paths_b = session_b.paths();
    let envelope_a =
        calypso_kernel::core::merkle::load_envelope(session_a.vfs(), &paths_a, "search")
            .unwrap()
            .unwrap();
    let envelope_b =
        calypso_kernel::core::merkle::load_envelope(session_b.vfs(), &paths_b, "search")
            .unwrap()
            .unwrap();
    assert_ne!(envelope_a.fingerprint, envelope_b.fingerprint);
}

/// Scenario 6: a fixed boot sequence on one phase ends in exactly one
/// `Done` status and a gapless `1,2,3,...` `seq` run.
#[test]
fn scenario_6_boot_sequence_ends_in_exactly_one_done() {
    let bus = TelemetryBus::new();
    let rx = bus.subscribe();

    bus.boot_log("boot", "starting calypso kernel", BootStatus::Wait).unwrap();
    bus.boot_log("boot", "manifest loaded", BootStatus::Ok).unwrap();
    bus.boot_log("boot", "verifying topology", BootStatus::Wait).unwrap();
    bus.boot_log("boot", "topology verified", BootStatus::Ok).unwrap();
    bus.boot_log("boot", "kernel ready", BootStatus::Done).unwrap();

    let records: Vec<_> = rx.try_iter().collect();
    assert_eq!(records.len(), 5);

    let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);

    let done_count = records
        .iter()
        .filter(|r| matches!(r.event, TelemetryEvent::BootLog { status: BootStatus::Done, .. }))
        .count();
    assert_eq!(done_count, 1);
    assert!(matches!(
        records.last().unwrap().event,
        TelemetryEvent::BootLog { status: BootStatus::Done, .. }
    ));
}

/// Property 8 (staleness propagation), exercised end-to-end through the
/// kernel rather than `chain_validate` directly: mutating a root parent
/// marks every completed descendant stale, with the immediate parent of
/// "train" reported as the reason once "train" itself has run.
#[test]
fn staleness_propagates_through_the_full_materialized_chain() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = new_kernel();
    let mut session = new_session(dir.path());

    for input in ["search histology", "gather", "harmonize", "code", "train"] {
        let response = kernel.command_execute(&mut session, input).unwrap();
        assert_eq!(response.status, StatusCode::Ok);
    }
    assert!(session.position().is_complete);

    kernel.command_execute(&mut session, "search a fresh query").unwrap();
    for descendant in ["gather", "harmonize", "code", "train"] {
        assert!(session.stale().contains(descendant), "{descendant} should be stale");
    }

    let paths: SessionPaths = session.paths();
    let report = calypso_kernel::core::chain_validator::chain_validate(
        session.vfs(),
        &paths,
        session.adapter().dag(),
        session.completed(),
    )
    .unwrap();
    assert!(matches!(report.reason("train"), Some(StaleReason::Transitive { .. })));
}
