use std::sync::Arc;

use serde_json::{Map, Value, json};
use tokio::io::{self, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

use crate::audit::StderrAuditSink;
use crate::runtime::{AgentRuntime, InvokeError};
use crate::tools::RegistryProfile;

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "Summon: Weight-Space Navigation";

/// JSON-RPC 2.0 message handling for one agent runtime. One instance per
/// logical connection; the transport layer guarantees messages arrive here
/// in order.
pub struct McpServer {
    runtime: AgentRuntime,
}

impl McpServer {
    pub fn new(runtime: AgentRuntime) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    /// Handle one inbound payload (single request or batch). Notifications
    /// produce no response entry.
    pub async fn handle_incoming_message(&self, incoming: Value) -> Vec<Value> {
        let mut responses = Vec::new();

        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            for item in batch {
                if let Some(response) = self.handle_single_message(item.clone()).await {
                    responses.push(response);
                }
            }
            return responses;
        }

        if let Some(response) = self.handle_single_message(incoming).await {
            responses.push(response);
        }
        responses
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // Most likely a client response; this server issues no outbound requests.
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        if let Some(id) = obj.get("id").cloned() {
            let result = self.handle_request(method, params).await;
            Some(match result {
                Ok(payload) => success_response(id, payload),
                Err(err) => error_response(id, err),
            })
        } else {
            self.handle_notification(method, params).await;
            None
        }
    }

    async fn handle_notification(&self, method: &str, _params: Value) {
        if matches!(
            method,
            "notifications/initialized" | "notifications/cancelled"
        ) {
            return;
        }
        // Unknown notifications are intentionally ignored.
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list_payload()),
            "tools/call" => self.handle_tools_call(params),
            "resources/list" => Ok(json!({ "resources": [] })),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": {
                    "listChanged": false
                },
                "resources": {
                    "listChanged": false
                },
                "prompts": {
                    "listChanged": false
                }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    fn tools_list_payload(&self) -> Value {
        let tools: Vec<Value> = self
            .runtime
            .registry()
            .map(|registry| {
                registry
                    .descriptors()
                    .iter()
                    .map(|tool| {
                        json!({
                            "name": tool.name,
                            "description": tool.description,
                            "inputSchema": tool.input_schema(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        json!({ "tools": tools })
    }

    fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let arguments = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        let result = self.runtime.invoke(name, &arguments).map_err(|err| match err {
            InvokeError::NotInitialized => RpcError::internal("runtime is not initialized"),
            InvokeError::UnknownTool(_) | InvokeError::InvalidParameters { .. } => {
                RpcError::invalid_params(err.to_string())
            }
        })?;

        serde_json::to_value(&result)
            .map_err(|err| RpcError::internal(format!("Failed to serialize tool result: {err}")))
    }

    /// Serve MCP over stdin/stdout with Content-Length framed JSON.
    pub async fn serve_stdio(&self) -> Result<(), String> {
        let stdin = io::stdin();
        let mut reader = BufReader::new(stdin);
        let mut stdout = io::stdout();

        loop {
            let incoming = read_framed_json(&mut reader)
                .await
                .map_err(|e| format!("Failed to read MCP message: {e}"))?;
            let Some(incoming) = incoming else {
                break;
            };

            let responses = self.handle_incoming_message(incoming).await;
            for response in responses {
                write_framed_json(&mut stdout, &response)
                    .await
                    .map_err(|e| format!("Failed to write MCP response: {e}"))?;
            }
        }

        Ok(())
    }
}

/// Entry point for the stdio deployment: the anonymous tool set, audit to
/// stderr. Returns a process exit code.
pub async fn serve_anonymous_stdio() -> i32 {
    let mut runtime = AgentRuntime::new(None, Arc::new(StderrAuditSink));
    runtime.init(RegistryProfile::Anonymous);
    let server = McpServer::new(runtime);

    match server.serve_stdio().await {
        Ok(()) => 0,
        Err(err) => {
            let payload = json!({
                "error": "mcp_server_error",
                "message": err,
            });
            eprintln!("{}", to_pretty_json(&payload));
            1
        }
    }
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

impl RpcError {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    let mut payload = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    });
    if let Some(data) = error.data {
        payload["error"]["data"] = data;
    }
    payload
}

fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

async fn read_framed_json(
    reader: &mut BufReader<tokio::io::Stdin>,
) -> Result<Option<Value>, std::io::Error> {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            if content_length.is_none() {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Unexpected EOF while reading MCP headers",
            ));
        }

        if line == "\r\n" {
            break;
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.to_ascii_lowercase().starts_with("content-length:") {
            let raw_len = line
                .split_once(':')
                .map(|(_, right)| right.trim())
                .unwrap_or_default();
            let parsed = raw_len.parse::<usize>().map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "Invalid Content-Length header",
                )
            })?;
            content_length = Some(parsed);
        }
    }

    let content_length = content_length.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Missing Content-Length header",
        )
    })?;
    let mut payload = vec![0_u8; content_length];
    reader.read_exact(&mut payload).await?;

    let json: Value = serde_json::from_slice(&payload).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Invalid JSON payload: {e}"),
        )
    })?;
    Ok(Some(json))
}

async fn write_framed_json(
    writer: &mut tokio::io::Stdout,
    value: &Value,
) -> Result<(), std::io::Error> {
    let body = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    let header = format!(
        "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
        body.len()
    );
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{Value, json};

    use super::McpServer;
    use crate::audit::MemoryAuditSink;
    use crate::runtime::AgentRuntime;
    use crate::tools::RegistryProfile;

    fn server(profile: RegistryProfile) -> (McpServer, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        let mut runtime = AgentRuntime::new(None, sink.clone());
        runtime.init(profile);
        (McpServer::new(runtime), sink)
    }

    #[tokio::test]
    async fn initialize_reports_protocol_and_server_info() {
        let (server, _sink) = server(RegistryProfile::Anonymous);
        let responses = server
            .handle_incoming_message(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {}
            }))
            .await;

        assert_eq!(responses.len(), 1);
        let result = &responses[0]["result"];
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "Summon: Weight-Space Navigation");
    }

    #[tokio::test]
    async fn tools_list_exposes_the_profile_tool_set() {
        let (server, _sink) = server(RegistryProfile::Anonymous);
        let responses = server
            .handle_incoming_message(json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/list"
            }))
            .await;

        let tools = responses[0]["result"]["tools"]
            .as_array()
            .expect("tools is an array");
        let names: Vec<&str> = tools
            .iter()
            .filter_map(|tool| tool["name"].as_str())
            .collect();
        assert_eq!(names, vec!["summon", "become", "ritual", "alter_state"]);
        assert_eq!(
            tools[0]["inputSchema"]["required"],
            json!(["who", "where", "lens"])
        );
    }

    #[tokio::test]
    async fn tools_call_returns_text_content() {
        let (server, sink) = server(RegistryProfile::Anonymous);
        let responses = server
            .handle_incoming_message(json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": {
                    "name": "become",
                    "arguments": {
                        "name": "Ada Lovelace",
                        "lens": "formal verification",
                        "environment": "compiler review"
                    }
                }
            }))
            .await;

        assert_eq!(
            responses[0]["result"]["content"],
            json!([{
                "type": "text",
                "text": "You are now Ada Lovelace seeing through formal verification in compiler review"
            }])
        );
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_jsonrpc_error_with_no_audit() {
        let (server, sink) = server(RegistryProfile::Anonymous);
        let responses = server
            .handle_incoming_message(json!({
                "jsonrpc": "2.0",
                "id": 4,
                "method": "tools/call",
                "params": { "name": "transmute", "arguments": {} }
            }))
            .await;

        assert_eq!(responses[0]["error"]["code"], -32602);
        assert!(
            responses[0]["error"]["message"]
                .as_str()
                .expect("message is a string")
                .contains("transmute")
        );
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let (server, _sink) = server(RegistryProfile::Anonymous);
        let responses = server
            .handle_incoming_message(json!({
                "jsonrpc": "2.0",
                "id": 5,
                "method": "tools/uninstall"
            }))
            .await;
        assert_eq!(responses[0]["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn notifications_produce_no_response() {
        let (server, _sink) = server(RegistryProfile::Anonymous);
        let responses = server
            .handle_incoming_message(json!({
                "jsonrpc": "2.0",
                "method": "notifications/initialized"
            }))
            .await;
        assert!(responses.is_empty());
    }

    #[tokio::test]
    async fn batches_are_answered_in_order() {
        let (server, _sink) = server(RegistryProfile::Anonymous);
        let responses = server
            .handle_incoming_message(json!([
                { "jsonrpc": "2.0", "id": 1, "method": "ping" },
                { "jsonrpc": "2.0", "method": "notifications/initialized" },
                { "jsonrpc": "2.0", "id": 2, "method": "tools/list" }
            ]))
            .await;

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[1]["id"], 2);
    }

    #[tokio::test]
    async fn empty_batch_and_bad_envelope_are_invalid_requests() {
        let (server, _sink) = server(RegistryProfile::Anonymous);

        let responses = server.handle_incoming_message(json!([])).await;
        assert_eq!(responses[0]["error"]["code"], -32600);

        let responses = server
            .handle_incoming_message(json!({ "jsonrpc": "1.0", "id": 1, "method": "ping" }))
            .await;
        assert_eq!(responses[0]["error"]["code"], -32600);

        let responses = server.handle_incoming_message(Value::Null).await;
        assert_eq!(responses[0]["error"]["code"], -32600);
    }
}
