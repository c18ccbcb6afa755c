use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// One tool invocation, as it will appear on the diagnostic stream.
#[derive(Clone, Debug)]
pub struct AuditEvent {
    pub tool: String,
    pub user: String,
    pub timestamp: DateTime<Utc>,
    pub params: Map<String, Value>,
}

impl AuditEvent {
    /// Wire shape: `{"type", "user", "timestamp", "stance"|"params"}`.
    /// `summon` keeps its historical `stance` key; every other tool uses `params`.
    pub fn to_value(&self) -> Value {
        let params_key = if self.tool == "summon" { "stance" } else { "params" };
        let mut object = Map::new();
        object.insert("type".to_string(), Value::String(self.tool.clone()));
        object.insert("user".to_string(), Value::String(self.user.clone()));
        object.insert(
            "timestamp".to_string(),
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        object.insert(params_key.to_string(), Value::Object(self.params.clone()));
        Value::Object(object)
    }
}

/// Narrow side-effect boundary for audit logging, so runtime dispatch stays
/// pure and testable without capturing real output streams.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Emits one JSON object per invocation to stderr, the process's diagnostic
/// stream, leaving stdout free for transport payloads.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &AuditEvent) {
        eprintln!("{}", event.to_value());
    }
}

/// Collects events in memory instead of emitting them. Test sink.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
