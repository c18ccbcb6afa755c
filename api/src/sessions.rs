use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use summon_core::session::SessionContext;
use summon_mcp_runtime::audit::AuditSink;
use summon_mcp_runtime::runtime::AgentRuntime;
use summon_mcp_runtime::server::McpServer;
use summon_mcp_runtime::tools::RegistryProfile;

/// Where a session's responses go. This is the polymorphic half of the
/// transport-adapter capability: the legacy SSE adapter streams responses
/// out of band (message submission returns 202), the streamable adapter
/// returns them on the delivering request. Everything else about session
/// binding is shared.
pub enum OutboundRoute {
    EventStream(mpsc::Sender<Value>),
    RequestReply,
}

struct InboundMessage {
    payload: Value,
    reply: oneshot::Sender<Vec<Value>>,
}

#[derive(Clone)]
struct SessionEntry {
    login: Option<String>,
    inbound: mpsc::Sender<InboundMessage>,
}

#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub id: String,
    pub login: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliverError {
    #[error("unknown session")]
    UnknownSession,
    #[error("session closed")]
    SessionClosed,
}

/// Binds logical connections to agent runtimes.
///
/// Each open session spawns exactly one worker task that owns the session's
/// `AgentRuntime` and drains an inbound queue in arrival order — messages on
/// one connection are handled by one instance, in order, never interleaved
/// with another session's state. The runtime is dropped when the session
/// closes (explicit close, or the event-stream receiver going away).
pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
    audit: Arc<dyn AuditSink>,
}

impl SessionManager {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            audit,
        }
    }

    /// Open a session: construct and initialize its runtime, spawn its
    /// worker, and register it under a fresh id.
    pub fn open(
        &self,
        context: Option<SessionContext>,
        profile: RegistryProfile,
        outbound: OutboundRoute,
    ) -> SessionInfo {
        let id = Uuid::now_v7().to_string();
        let login = context.as_ref().map(|c| c.login.clone());

        let mut runtime = AgentRuntime::new(context, self.audit.clone());
        runtime.init(profile);
        let server = McpServer::new(runtime);

        let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(64);
        let sessions = self.sessions.clone();
        let worker_id = id.clone();

        tokio::spawn(async move {
            while let Some(message) = inbound_rx.recv().await {
                let responses = server.handle_incoming_message(message.payload).await;
                match &outbound {
                    OutboundRoute::EventStream(events) => {
                        let mut receiver_gone = false;
                        for response in responses {
                            if events.send(response).await.is_err() {
                                receiver_gone = true;
                                break;
                            }
                        }
                        let _ = message.reply.send(Vec::new());
                        if receiver_gone {
                            break;
                        }
                    }
                    OutboundRoute::RequestReply => {
                        let _ = message.reply.send(responses);
                    }
                }
            }
            let mut sessions = sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.remove(&worker_id);
        });

        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(
            id.clone(),
            SessionEntry {
                login: login.clone(),
                inbound: inbound_tx,
            },
        );

        SessionInfo { id, login }
    }

    pub fn info(&self, session_id: &str) -> Option<SessionInfo> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).map(|entry| SessionInfo {
            id: session_id.to_string(),
            login: entry.login.clone(),
        })
    }

    /// Queue one inbound payload for the session's worker and wait for its
    /// reply. Queueing order is arrival order.
    pub async fn deliver(
        &self,
        session_id: &str,
        payload: Value,
    ) -> Result<Vec<Value>, DeliverError> {
        let inbound = {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions
                .get(session_id)
                .map(|entry| entry.inbound.clone())
                .ok_or(DeliverError::UnknownSession)?
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        inbound
            .send(InboundMessage {
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| DeliverError::SessionClosed)?;
        reply_rx.await.map_err(|_| DeliverError::SessionClosed)
    }

    /// Tear a session down. The worker exits once queued messages drain.
    pub fn close(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    use summon_core::session::SessionContext;
    use summon_mcp_runtime::audit::MemoryAuditSink;
    use summon_mcp_runtime::tools::RegistryProfile;

    use super::{DeliverError, OutboundRoute, SessionManager};

    fn tools_call(id: u64, who: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {
                "name": "summon",
                "arguments": { "who": who, "where": "here", "doing": "testing" }
            }
        })
    }

    #[tokio::test]
    async fn request_reply_sessions_answer_in_arrival_order() {
        let manager = SessionManager::new(Arc::new(MemoryAuditSink::new()));
        let session = manager.open(
            Some(SessionContext::new("octocat", "", "", "gho_x")),
            RegistryProfile::Authenticated,
            OutboundRoute::RequestReply,
        );

        for id in 1..=3u64 {
            let responses = manager
                .deliver(&session.id, tools_call(id, "voice"))
                .await
                .expect("deliver succeeds");
            assert_eq!(responses.len(), 1);
            assert_eq!(responses[0]["id"], id);
        }
    }

    #[tokio::test]
    async fn event_stream_sessions_push_responses_out_of_band() {
        let manager = SessionManager::new(Arc::new(MemoryAuditSink::new()));
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let session = manager.open(
            None,
            RegistryProfile::Anonymous,
            OutboundRoute::EventStream(events_tx),
        );

        let direct = manager
            .deliver(&session.id, json!({ "jsonrpc": "2.0", "id": 9, "method": "ping" }))
            .await
            .expect("deliver succeeds");
        assert!(direct.is_empty());

        let streamed = events_rx.recv().await.expect("a response is streamed");
        assert_eq!(streamed["id"], 9);
    }

    #[tokio::test]
    async fn delivery_to_an_unknown_session_is_an_error() {
        let manager = SessionManager::new(Arc::new(MemoryAuditSink::new()));
        let err = manager
            .deliver("no-such-session", json!({}))
            .await
            .expect_err("unknown session must fail");
        assert_eq!(err, DeliverError::UnknownSession);
    }

    #[tokio::test]
    async fn closed_sessions_are_forgotten() {
        let manager = SessionManager::new(Arc::new(MemoryAuditSink::new()));
        let session = manager.open(None, RegistryProfile::Anonymous, OutboundRoute::RequestReply);

        assert!(manager.info(&session.id).is_some());
        assert!(manager.close(&session.id));
        assert!(manager.info(&session.id).is_none());
        assert!(!manager.close(&session.id));
    }

    #[tokio::test]
    async fn concurrent_sessions_never_observe_each_others_context() {
        let sink = Arc::new(MemoryAuditSink::new());
        let manager = SessionManager::new(sink.clone());

        let alpha = manager.open(
            Some(SessionContext::new("alpha", "", "", "gho_a")),
            RegistryProfile::Authenticated,
            OutboundRoute::RequestReply,
        );
        let beta = manager.open(
            Some(SessionContext::new("beta", "", "", "gho_b")),
            RegistryProfile::Authenticated,
            OutboundRoute::RequestReply,
        );

        manager
            .deliver(&alpha.id, tools_call(1, "first voice"))
            .await
            .expect("deliver succeeds");
        manager
            .deliver(&beta.id, tools_call(2, "second voice"))
            .await
            .expect("deliver succeeds");

        let events = sink.events();
        assert_eq!(events.len(), 2);
        let users: Vec<&str> = events.iter().map(|e| e.user.as_str()).collect();
        assert!(users.contains(&"alpha"));
        assert!(users.contains(&"beta"));
        for event in &events {
            if event.user == "alpha" {
                assert_eq!(event.params["who"], "first voice");
            } else {
                assert_eq!(event.params["who"], "second voice");
            }
        }
    }
}
