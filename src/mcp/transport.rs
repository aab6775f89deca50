//! MCP transports: JSON-RPC 2.0 over HTTP POST and over a child's stdio.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};

use super::error::McpError;
use super::types::*;

/// MCP protocol version we support
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A live session with one tool server.
#[async_trait]
pub trait McpConnection: Send + Sync {
    /// Perform the `initialize` handshake.
    async fn initialize(&self) -> Result<InitializeResult, McpError>;

    async fn list_tools(&self) -> Result<Vec<McpToolDescriptor>, McpError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError>;

    fn is_alive(&self) -> bool;

    async fn close(&self);
}

/// Opens connections for registry entries.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open and initialize a connection.
    async fn connect(&self, config: &McpServerConfig) -> Result<Arc<dyn McpConnection>, McpError>;
}

fn initialize_params() -> Value {
    json!(InitializeParams {
        protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        capabilities: json!({}),
        client_info: ClientInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    })
}

fn into_result(response: JsonRpcResponse) -> Result<Value, McpError> {
    if let Some(error) = response.error {
        return Err(McpError::Rpc {
            code: error.code,
            message: error.message,
        });
    }
    response
        .result
        .ok_or_else(|| McpError::Protocol("No result in response".to_string()))
}

fn tool_call_params(name: &str, arguments: Value) -> Value {
    json!({
        "name": name,
        "arguments": arguments,
    })
}

/// Connector for the real HTTP and stdio transports.
pub struct TransportConnector {
    client: reqwest::Client,
}

impl TransportConnector {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for TransportConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for TransportConnector {
    async fn connect(&self, config: &McpServerConfig) -> Result<Arc<dyn McpConnection>, McpError> {
        let connection: Arc<dyn McpConnection> = match &config.transport {
            McpTransport::Http { endpoint } => {
                Arc::new(HttpConnection::new(self.client.clone(), endpoint))
            }
            McpTransport::Stdio { command, args, env } => {
                Arc::new(StdioConnection::spawn(&config.id, command, args, env)?)
            }
        };

        match connection.initialize().await {
            Ok(init) => {
                tracing::debug!(
                    server = %config.id,
                    protocol = %init.protocol_version,
                    server_name = ?init.server_info.as_ref().map(|s| s.name.as_str()),
                    "MCP handshake complete"
                );
                Ok(connection)
            }
            Err(e) => {
                connection.close().await;
                Err(e)
            }
        }
    }
}

// ==================== HTTP ====================

pub struct HttpConnection {
    client: reqwest::Client,
    endpoint: String,
    request_id: AtomicU64,
}

impl HttpConnection {
    pub fn new(client: reqwest::Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            request_id: AtomicU64::new(1),
        }
    }

    async fn send_jsonrpc(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let request = JsonRpcRequest::new(
            self.request_id.fetch_add(1, Ordering::SeqCst),
            method,
            params,
        );

        let response = self.client.post(&self.endpoint).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(McpError::Transport(format!("HTTP {}", response.status())));
        }

        let json_response: JsonRpcResponse = response.json().await?;
        into_result(json_response)
    }
}

#[async_trait]
impl McpConnection for HttpConnection {
    async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let result = self.send_jsonrpc("initialize", Some(initialize_params())).await?;
        let init: InitializeResult = serde_json::from_value(result)?;

        // Some servers require the notification; none reply to it.
        let _ = self
            .client
            .post(&self.endpoint)
            .json(&JsonRpcNotification::new("notifications/initialized"))
            .send()
            .await;

        Ok(init)
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDescriptor>, McpError> {
        let result = self.send_jsonrpc("tools/list", None).await?;
        let tools: McpToolsResponse = serde_json::from_value(result)?;
        Ok(tools.tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let result = self
            .send_jsonrpc("tools/call", Some(tool_call_params(name, arguments)))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    fn is_alive(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

// ==================== Stdio ====================

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Newline-delimited JSON-RPC over a spawned server process.
pub struct StdioConnection {
    server_id: String,
    stdin: Mutex<ChildStdin>,
    child: Mutex<Option<Child>>,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    request_id: AtomicU64,
}

impl StdioConnection {
    pub fn spawn(
        server_id: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Transport(format!("Failed to spawn '{}': {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("Failed to capture server stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("Failed to capture server stdout".to_string()))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        {
            let pending = Arc::clone(&pending);
            let alive = Arc::clone(&alive);
            let server = server_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JsonRpcResponse>(line) {
                        Ok(response) => {
                            let Some(id) = response.id else {
                                // server-initiated notification
                                continue;
                            };
                            if let Some(tx) = pending.lock().await.remove(&id) {
                                let _ = tx.send(response);
                            }
                        }
                        Err(e) => {
                            tracing::debug!(server = %server, "Ignoring non-JSON-RPC line: {}", e);
                        }
                    }
                }
                alive.store(false, Ordering::SeqCst);
                // Dropping the senders wakes every waiter with an error.
                pending.lock().await.clear();
                tracing::info!(server = %server, "MCP stdio server closed its output");
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let server = server_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "stderr: {}", line);
                }
            });
        }

        Ok(Self {
            server_id: server_id.to_string(),
            stdin: Mutex::new(stdin),
            child: Mutex::new(Some(child)),
            pending,
            alive,
            request_id: AtomicU64::new(1),
        })
    }

    async fn write_line(&self, payload: &impl serde::Serialize) -> Result<(), McpError> {
        let mut line = serde_json::to_vec(payload)?;
        line.push(b'\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(&line)
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))
    }

    async fn send_jsonrpc(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if !self.is_alive() {
            return Err(McpError::NotConnected(self.server_id.clone()));
        }

        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.write_line(&JsonRpcRequest::new(id, method, params)).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => into_result(response),
            Ok(Err(_)) => Err(McpError::Transport(format!(
                "server {} exited before replying to {}",
                self.server_id, method
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::Transport(format!(
                    "{} timed out after {:?}",
                    method, REQUEST_TIMEOUT
                )))
            }
        }
    }
}

#[async_trait]
impl McpConnection for StdioConnection {
    async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let result = self.send_jsonrpc("initialize", Some(initialize_params())).await?;
        let init: InitializeResult = serde_json::from_value(result)?;
        self.write_line(&JsonRpcNotification::new("notifications/initialized"))
            .await?;
        Ok(init)
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDescriptor>, McpError> {
        let result = self.send_jsonrpc("tools/list", None).await?;
        let tools: McpToolsResponse = serde_json::from_value(result)?;
        Ok(tools.tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let result = self
            .send_jsonrpc("tools/call", Some(tool_call_params(name, arguments)))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(server = %self.server_id, "Failed to kill MCP server: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal MCP server written in POSIX shell: answers initialize,
    /// tools/list and tools/call with canned responses keyed by request id.
    const FAKE_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"initialize"'*) printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","serverInfo":{"name":"fake"}}}\n' "$id" ;;
    *'"tools/list"'*) printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"tools/call"'*) printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id" ;;
    *) printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"method not found"}}\n' "$id" ;;
  esac
done
"#;

    #[tokio::test]
    async fn test_stdio_round_trip() {
        let config = McpServerConfig::stdio(
            "fake",
            "sh",
            vec!["-c".to_string(), FAKE_SERVER.to_string()],
        );
        let connection = TransportConnector::new().connect(&config).await.unwrap();
        assert!(connection.is_alive());

        let tools = connection.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");

        let result = connection.call_tool("echo", json!({})).await.unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text_content(), "pong");

        connection.close().await;
        assert!(!connection.is_alive());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_transport_error() {
        let config = McpServerConfig::stdio("missing", "/nonexistent/mcp-server-binary", vec![]);
        let err = TransportConnector::new().connect(&config).await.err().unwrap();
        assert!(matches!(err, McpError::Transport(_)));
    }

    #[tokio::test]
    async fn test_http_connection_refused() {
        let config = McpServerConfig::http("down", "http://127.0.0.1:9");
        let err = TransportConnector::new().connect(&config).await.err().unwrap();
        assert!(matches!(err, McpError::Transport(_)));
    }
}
