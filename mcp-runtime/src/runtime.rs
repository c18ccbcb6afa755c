use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use thiserror::Error;

use summon_core::session::SessionContext;

use crate::audit::{AuditEvent, AuditSink};
use crate::tools::{RegistryProfile, TextResult, ToolCall, ToolRegistry};

#[derive(Debug, Error)]
pub enum InvokeError {
    /// `invoke` was called before `init` populated the registry.
    #[error("runtime is not initialized")]
    NotInitialized,
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),
    #[error("Invalid parameters for '{tool}': {message}")]
    InvalidParameters { tool: String, message: String },
}

/// The stateful object bound to one session (or none, for the anonymous
/// variant). Owns its tool registry, injects the bound session context into
/// every invocation's audit record, and is discarded when the owning
/// connection ends — never reused across sessions.
///
/// Two states: `Uninitialized` (no registry) and `Ready`; `init` transitions
/// once and `invoke` is only valid afterwards.
pub struct AgentRuntime {
    session: Option<SessionContext>,
    registry: Option<ToolRegistry>,
    audit: Arc<dyn AuditSink>,
}

impl AgentRuntime {
    pub fn new(session: Option<SessionContext>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            session,
            registry: None,
            audit,
        }
    }

    /// Populate the tool registry. The first call wins; later calls are no-ops.
    pub fn init(&mut self, profile: RegistryProfile) {
        if self.registry.is_none() {
            self.registry = Some(ToolRegistry::for_profile(profile));
        }
    }

    pub fn is_ready(&self) -> bool {
        self.registry.is_some()
    }

    pub fn session(&self) -> Option<&SessionContext> {
        self.session.as_ref()
    }

    pub fn registry(&self) -> Option<&ToolRegistry> {
        self.registry.as_ref()
    }

    /// The identity recorded in audit records.
    pub fn user(&self) -> &str {
        self.session
            .as_ref()
            .map(|session| session.login.as_str())
            .unwrap_or("anonymous")
    }

    /// Dispatch one tool invocation. Unknown names and schema violations are
    /// rejected before any handler runs and emit no audit record; a
    /// successful invocation emits exactly one.
    pub fn invoke(
        &self,
        tool_name: &str,
        params: &Map<String, Value>,
    ) -> Result<TextResult, InvokeError> {
        let registry = self.registry.as_ref().ok_or(InvokeError::NotInitialized)?;
        let descriptor = registry
            .get(tool_name)
            .ok_or_else(|| InvokeError::UnknownTool(tool_name.to_string()))?;

        let call =
            ToolCall::parse(descriptor, params).map_err(|message| InvokeError::InvalidParameters {
                tool: tool_name.to_string(),
                message,
            })?;

        let text = call.render();
        self.audit.record(&AuditEvent {
            tool: descriptor.name.to_string(),
            user: self.user().to_string(),
            timestamp: Utc::now(),
            params: params.clone(),
        });

        Ok(TextResult::text(text))
    }
}
