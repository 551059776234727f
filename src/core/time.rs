//! Shared timestamp/event helpers for deterministic envelopes.
//!
//! Timestamps are real ISO-8601 UTC strings (millisecond precision) rather
//! than epoch-seconds: `latestFingerprint_get` (see `core::merkle`) picks the
//! latest artifact for a stage by plain string comparison of `timestamp`,
//! which only works if the format is itself lexicographically ordered.

use serde_json::Value as JsonValue;
use std::time::{SystemTime, UNIX_EPOCH};
use ulid::Ulid;

/// Civil-from-days conversion (Howard Hinnant's algorithm) — avoids pulling
/// in a date/time crate for a conversion this small and this load-bearing.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

/// Returns the current instant as an ISO-8601 UTC timestamp with millisecond
/// precision, e.g. `2026-07-26T14:03:05.123Z`.
pub fn now_iso8601() -> String {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format_iso8601(dur.as_secs() as i64, dur.subsec_millis())
}

fn format_iso8601(epoch_secs: i64, millis: u32) -> String {
    let days = epoch_secs.div_euclid(86_400);
    let secs_of_day = epoch_secs.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    let hour = secs_of_day / 3600;
    let minute = (secs_of_day % 3600) / 60;
    let second = secs_of_day % 60;
    format!(
        "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millis:03}Z"
    )
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Standard command response envelope shape used across CLI surfaces.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut base = serde_json::json!({
        "envelope_version": "1.0.0",
        "ts": now_iso8601(),
        "event_id": new_event_id(),
        "cmd": cmd,
        "status": status
    });
    if let (Some(base_obj), Some(extra_obj)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso8601_format_is_well_formed() {
        let ts = now_iso8601();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2026-07-26T14:03:05.123Z".len());
    }

    #[test]
    fn iso8601_known_epoch_round_trips() {
        // 2021-01-01T00:00:00.000Z
        assert_eq!(format_iso8601(1_609_459_200, 0), "2021-01-01T00:00:00.000Z");
    }

    #[test]
    fn iso8601_is_lexicographically_ordered_across_seconds() {
        let a = format_iso8601(1_700_000_000, 500);
        let b = format_iso8601(1_700_000_001, 100);
        assert!(a < b);
    }

    #[test]
    fn new_event_id_is_unique_and_valid_ulid() {
        let id1 = new_event_id();
        let id2 = new_event_id();
        assert_ne!(id1, id2);
        assert!(Ulid::from_string(&id1).is_ok());
    }

    #[test]
    fn command_envelope_merges_extra_fields() {
        let extra = serde_json::json!({"key": "value", "count": 42});
        let envelope = command_envelope("test", "ok", extra);
        assert_eq!(envelope["cmd"], "test");
        assert_eq!(envelope["status"], "ok");
        assert_eq!(envelope["key"], "value");
        assert_eq!(envelope["count"], 42);
        assert_eq!(envelope["envelope_version"], "1.0.0");
    }
}
