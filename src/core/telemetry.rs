//! Telemetry Bus (§4.6): a publish/subscribe fan-out plus an append-only
//! JSONL audit trail, generalized from the teacher's `DbBroker` "Thin Waist"
//! pattern — one serialized place every subsystem reports through, so the
//! audit log and any live subscribers see the same ordered event stream.

use crate::core::error::CalypsoError;
use crate::core::time::{new_event_id, now_iso8601};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

/// A boot-log line's status, per §6 `boot_log {..., status}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BootStatus {
    Wait,
    Ok,
    Fail,
    Done,
}

/// The event kinds the kernel reports over the bus. Tagged so the JSONL
/// audit log carries a `"type"` discriminator per line.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    BootLog { message: String, status: BootStatus },
    Status { message: String },
    Log { level: String, message: String },
    Progress { completed: usize, total: usize },
    FrameOpen { frame: String },
    FrameClose { frame: String },
    PhaseStart { phase: String },
}

/// One published event, with its per-phase sequence number and envelope
/// metadata attached.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    pub ts: String,
    pub event_id: String,
    pub phase: String,
    pub seq: u64,
    #[serde(flatten)]
    pub event: TelemetryEvent,
}

/// Publish/subscribe bus with an optional JSONL sink. `seq` is strictly
/// increasing per phase (§4.6 invariant) — two phases run their own counters.
pub struct TelemetryBus {
    subscribers: Mutex<Vec<Sender<TelemetryRecord>>>,
    seq_by_phase: Mutex<HashMap<String, u64>>,
    audit_log: Mutex<Option<File>>,
}

impl TelemetryBus {
    pub fn new() -> Self {
        TelemetryBus {
            subscribers: Mutex::new(Vec::new()),
            seq_by_phase: Mutex::new(HashMap::new()),
            audit_log: Mutex::new(None),
        }
    }

    /// Append every published record as a JSONL line to `path`, creating or
    /// truncating it fresh for this session.
    pub fn with_audit_log(self, path: impl AsRef<Path>) -> Result<Self, CalypsoError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        *self.audit_log.lock().unwrap() = Some(file);
        Ok(self)
    }

    /// Register a new subscriber; returns the receiving end of its channel.
    pub fn subscribe(&self) -> Receiver<TelemetryRecord> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Publish an event on `phase`, bumping that phase's sequence counter,
    /// fanning it out to every live subscriber, and appending it to the
    /// audit log if one is attached.
    pub fn publish(&self, phase: &str, event: TelemetryEvent) -> Result<TelemetryRecord, CalypsoError> {
        let seq = {
            let mut seqs = self.seq_by_phase.lock().unwrap();
            let counter = seqs.entry(phase.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        let record = TelemetryRecord {
            ts: now_iso8601(),
            event_id: new_event_id(),
            phase: phase.to_string(),
            seq,
            event,
        };

        {
            let mut subs = self.subscribers.lock().unwrap();
            subs.retain(|tx| tx.send(record.clone()).is_ok());
        }

        if let Some(file) = self.audit_log.lock().unwrap().as_mut() {
            let mut line = serde_json::to_string(&record)?;
            line.push('\n');
            file.write_all(line.as_bytes())?;
        }

        Ok(record)
    }

    pub fn boot_log(
        &self,
        phase: &str,
        message: impl Into<String>,
        status: BootStatus,
    ) -> Result<TelemetryRecord, CalypsoError> {
        self.publish(
            phase,
            TelemetryEvent::BootLog {
                message: message.into(),
                status,
            },
        )
    }

    pub fn status(&self, phase: &str, message: impl Into<String>) -> Result<TelemetryRecord, CalypsoError> {
        self.publish(phase, TelemetryEvent::Status { message: message.into() })
    }

    pub fn log(&self, phase: &str, level: impl Into<String>, message: impl Into<String>) -> Result<TelemetryRecord, CalypsoError> {
        self.publish(
            phase,
            TelemetryEvent::Log {
                level: level.into(),
                message: message.into(),
            },
        )
    }

    pub fn progress(&self, phase: &str, completed: usize, total: usize) -> Result<TelemetryRecord, CalypsoError> {
        self.publish(phase, TelemetryEvent::Progress { completed, total })
    }

    pub fn frame_open(&self, phase: &str, frame: impl Into<String>) -> Result<TelemetryRecord, CalypsoError> {
        self.publish(phase, TelemetryEvent::FrameOpen { frame: frame.into() })
    }

    pub fn frame_close(&self, phase: &str, frame: impl Into<String>) -> Result<TelemetryRecord, CalypsoError> {
        self.publish(phase, TelemetryEvent::FrameClose { frame: frame.into() })
    }

    pub fn phase_start(&self, phase: &str) -> Result<TelemetryRecord, CalypsoError> {
        self.publish(phase, TelemetryEvent::PhaseStart { phase: phase.to_string() })
    }
}

impl Default for TelemetryBus {
    fn default() -> Self {
        Self::new()
    }
}
