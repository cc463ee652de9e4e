//! tg-audit
//!
//! Audit event model and hash chain.
//!
//! Storage lives in `tg-db`: both processes append to one `audit_events`
//! table, and the store seals each event inside the same transaction that
//! reads the previous row's hash. This crate only knows how to build, seal,
//! hash, verify and export events.

use anyhow::{Context, Result};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    OrderRejected,
    OrderValidated,
    OrderSubmitted,
    OrderPartialFailure,
    SubmitFailed,
    FillRecorded,
    TradeClosed,
    CircuitBreakerTriggered,
    CircuitBreakerReset,
    EmergencyStopSet,
    EmergencyStopCleared,
    ProcessTerminated,
    FlattenSubmitted,
    FlattenFailed,
    BrokerUnavailable,
    HeartbeatStale,
    SessionStarted,
}

impl AuditEventType {
    pub const ALL: [AuditEventType; 17] = [
        AuditEventType::OrderRejected,
        AuditEventType::OrderValidated,
        AuditEventType::OrderSubmitted,
        AuditEventType::OrderPartialFailure,
        AuditEventType::SubmitFailed,
        AuditEventType::FillRecorded,
        AuditEventType::TradeClosed,
        AuditEventType::CircuitBreakerTriggered,
        AuditEventType::CircuitBreakerReset,
        AuditEventType::EmergencyStopSet,
        AuditEventType::EmergencyStopCleared,
        AuditEventType::ProcessTerminated,
        AuditEventType::FlattenSubmitted,
        AuditEventType::FlattenFailed,
        AuditEventType::BrokerUnavailable,
        AuditEventType::HeartbeatStale,
        AuditEventType::SessionStarted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::OrderRejected => "ORDER_REJECTED",
            AuditEventType::OrderValidated => "ORDER_VALIDATED",
            AuditEventType::OrderSubmitted => "ORDER_SUBMITTED",
            AuditEventType::OrderPartialFailure => "ORDER_PARTIAL_FAILURE",
            AuditEventType::SubmitFailed => "SUBMIT_FAILED",
            AuditEventType::FillRecorded => "FILL_RECORDED",
            AuditEventType::TradeClosed => "TRADE_CLOSED",
            AuditEventType::CircuitBreakerTriggered => "CIRCUIT_BREAKER_TRIGGERED",
            AuditEventType::CircuitBreakerReset => "CIRCUIT_BREAKER_RESET",
            AuditEventType::EmergencyStopSet => "EMERGENCY_STOP_SET",
            AuditEventType::EmergencyStopCleared => "EMERGENCY_STOP_CLEARED",
            AuditEventType::ProcessTerminated => "PROCESS_TERMINATED",
            AuditEventType::FlattenSubmitted => "FLATTEN_SUBMITTED",
            AuditEventType::FlattenFailed => "FLATTEN_FAILED",
            AuditEventType::BrokerUnavailable => "BROKER_UNAVAILABLE",
            AuditEventType::HeartbeatStale => "HEARTBEAT_STALE",
            AuditEventType::SessionStarted => "SESSION_STARTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// Safety triggers: never auto-cleared, always paged.
    pub fn is_safety_trigger(&self) -> bool {
        matches!(
            self,
            AuditEventType::CircuitBreakerTriggered
                | AuditEventType::EmergencyStopSet
                | AuditEventType::ProcessTerminated
                | AuditEventType::FlattenFailed
                | AuditEventType::OrderPartialFailure
        )
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// An event not yet placed in the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEvent {
    pub ts_utc: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub trade_id: Option<String>,
    /// Who acted: a process client id, or `operator:<name>`.
    pub actor: String,
    pub payload: Value,
}

impl NewAuditEvent {
    pub fn new(
        ts_utc: DateTime<Utc>,
        event_type: AuditEventType,
        actor: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            ts_utc,
            event_type,
            trade_id: None,
            actor: actor.into(),
            payload,
        }
    }

    pub fn with_trade_id(mut self, trade_id: impl Into<String>) -> Self {
        self.trade_id = Some(trade_id.into());
        self
    }

    /// Place the event at `seq` after `hash_prev` and compute its own hash.
    ///
    /// The timestamp is truncated to microseconds so the hash survives a
    /// round trip through storage.
    pub fn seal(self, seq: i64, hash_prev: Option<String>) -> Result<AuditEvent> {
        let event_id = derive_event_id(hash_prev.as_deref(), &self.payload, seq)?;
        let mut ev = AuditEvent {
            seq,
            event_id,
            ts_utc: self.ts_utc.trunc_subsecs(6),
            event_type: self.event_type,
            trade_id: self.trade_id,
            actor: self.actor,
            payload: self.payload,
            hash_prev,
            hash_self: String::new(),
        };
        ev.hash_self = compute_event_hash(&ev)?;
        Ok(ev)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub seq: i64,
    pub event_id: Uuid,
    pub ts_utc: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub trade_id: Option<String>,
    pub actor: String,
    pub payload: Value,
    pub hash_prev: Option<String>,
    pub hash_self: String,
}

/// Namespace for event ids. Fixed forever: changing it changes every id.
const EVENT_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x5d, 0x1e, 0x8a, 0x42, 0x27, 0xc3, 0x4b, 0x0e, 0x9f, 0x61, 0x3a, 0xd4, 0x70, 0x12, 0xbe, 0x95,
]);

/// Event id from chain position and content. No RNG, so a replayed append of
/// the same event at the same position produces the same id.
fn derive_event_id(hash_prev: Option<&str>, payload: &Value, seq: i64) -> Result<Uuid> {
    let canonical_payload = canonical_json(payload)?;
    let name = format!("{}|{}|{}", hash_prev.unwrap_or(""), seq, canonical_payload);
    Ok(Uuid::new_v5(&EVENT_ID_NAMESPACE, name.as_bytes()))
}

/// Canonicalize by sorting keys recursively and emitting compact JSON.
pub fn canonical_json<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit value failed")?;
    serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// SHA-256 over the canonical JSON of the event with `hash_self` blanked.
pub fn compute_event_hash(ev: &AuditEvent) -> Result<String> {
    let mut clone = ev.clone();
    clone.hash_self = String::new();

    let canonical = canonical_json(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { events: usize },
    Broken { seq: i64, reason: String },
}

impl VerifyResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResult::Valid { .. })
    }
}

/// Verify a complete, seq-ordered event log.
///
/// Detects edited content (hash_self mismatch), removed or reordered rows
/// (hash_prev mismatch or seq gap) and a rewritten head (first row with a
/// non-null hash_prev).
pub fn verify_events(events: &[AuditEvent]) -> Result<VerifyResult> {
    let mut prev: Option<&AuditEvent> = None;

    for ev in events {
        let expected_prev = prev.map(|p| p.hash_self.clone());
        if ev.hash_prev != expected_prev {
            return Ok(VerifyResult::Broken {
                seq: ev.seq,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    expected_prev, ev.hash_prev
                ),
            });
        }
        if let Some(p) = prev {
            if ev.seq != p.seq + 1 {
                return Ok(VerifyResult::Broken {
                    seq: ev.seq,
                    reason: format!("seq gap: {} follows {}", ev.seq, p.seq),
                });
            }
        }

        let recomputed = compute_event_hash(ev)?;
        if ev.hash_self != recomputed {
            return Ok(VerifyResult::Broken {
                seq: ev.seq,
                reason: format!(
                    "hash_self mismatch: claimed {}, recomputed {}",
                    ev.hash_self, recomputed
                ),
            });
        }

        prev = Some(ev);
    }

    Ok(VerifyResult::Valid {
        events: events.len(),
    })
}

// ---------------------------------------------------------------------------
// JSONL export
// ---------------------------------------------------------------------------

/// Write events as JSON Lines (one canonical event per line). Overwrites `path`.
pub fn export_jsonl(events: &[AuditEvent], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
    }
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("open audit export {:?}", path))?;
    for ev in events {
        let line = canonical_json(ev)?;
        f.write_all(line.as_bytes())
            .context("write audit line failed")?;
        f.write_all(b"\n").context("write newline failed")?;
    }
    f.sync_all().context("fsync audit export failed")?;
    Ok(())
}

/// Parse and verify a JSONL export.
pub fn verify_jsonl_str(content: &str) -> Result<VerifyResult> {
    let mut events = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let ev: AuditEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("parse audit event at line {}", i + 1))?;
        events.push(ev);
    }
    verify_events(&events)
}

pub fn verify_jsonl(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit export {:?}", path.as_ref()))?;
    verify_jsonl_str(&content)
}
