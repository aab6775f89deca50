//! MCP runtime manager - connections, tool discovery and dispatch.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::config::McpConfig;

use super::config::load_server_registry;
use super::error::McpError;
use super::schema::Shape;
use super::transport::{Connector, McpConnection, TransportConnector};
use super::types::*;

/// Runtime manager for a set of MCP servers.
///
/// Servers keep registry order; tool dispatch goes to the first connected
/// server (in that order) that advertises the tool.
pub struct McpManager {
    config: McpConfig,
    connector: Arc<dyn Connector>,
    /// Registered servers, in registry order
    servers: RwLock<Vec<McpServerState>>,
    /// Live connections keyed by server id
    connections: RwLock<HashMap<String, Arc<dyn McpConnection>>>,
    /// Last discovered tools per server id
    tools: RwLock<HashMap<String, Vec<McpToolDescriptor>>>,
    /// One connect in flight per server id
    connect_gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl McpManager {
    pub fn new(config: McpConfig) -> Self {
        Self::with_connector(config, Arc::new(TransportConnector::new()))
    }

    pub fn with_connector(config: McpConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            servers: RwLock::new(Vec::new()),
            connections: RwLock::new(HashMap::new()),
            tools: RwLock::new(HashMap::new()),
            connect_gates: Mutex::new(HashMap::new()),
        }
    }

    /// Load the server registry from disk, replacing any current servers.
    ///
    /// Returns the number of servers registered.
    pub async fn load_servers(&self, path: &Path) -> Result<usize, McpError> {
        let configs = load_server_registry(path).await?;
        let count = configs.len();
        self.set_servers(configs).await;
        tracing::info!(path = %path.display(), count, "Loaded MCP server registry");
        Ok(count)
    }

    /// Replace the registered servers. Existing connections are closed.
    pub async fn set_servers(&self, configs: Vec<McpServerConfig>) {
        self.disconnect_all().await;
        *self.servers.write().await = configs.into_iter().map(McpServerState::from_config).collect();
    }

    pub async fn list_servers(&self) -> Vec<McpServerState> {
        self.servers.read().await.clone()
    }

    async fn update_state(&self, id: &str, f: impl FnOnce(&mut McpServerState)) {
        let mut servers = self.servers.write().await;
        if let Some(state) = servers.iter_mut().find(|s| s.config.id == id) {
            f(state);
        }
    }

    /// Connect to one server, retrying with a fixed delay.
    ///
    /// Returns the existing connection if one is live. Disabled servers fail
    /// immediately without entering the retry loop.
    pub async fn connect_to_server(&self, id: &str) -> Result<Arc<dyn McpConnection>, McpError> {
        if let Some(connection) = self.live_connection(id).await {
            return Ok(connection);
        }

        let gate = Arc::clone(self.connect_gates.lock().await.entry(id.to_string()).or_default());
        let _connecting = gate.lock().await;
        // a concurrent caller may have connected while we waited
        if let Some(connection) = self.live_connection(id).await {
            return Ok(connection);
        }

        let config = self
            .servers
            .read()
            .await
            .iter()
            .find(|s| s.config.id == id)
            .map(|s| s.config.clone())
            .ok_or_else(|| McpError::UnknownServer(id.to_string()))?;

        if !config.enabled {
            return Err(McpError::ServerDisabled(id.to_string()));
        }

        let attempts = self.config.connect_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.connector.connect(&config).await {
                Ok(connection) => {
                    self.connections
                        .write()
                        .await
                        .insert(id.to_string(), Arc::clone(&connection));
                    self.update_state(id, |s| {
                        s.status = McpStatus::Connected;
                        s.error = None;
                        s.last_connected_at = Some(chrono::Utc::now());
                    })
                    .await;
                    tracing::info!(server = %id, attempt, "Connected to MCP server");
                    return Ok(connection);
                }
                Err(e) => {
                    tracing::warn!(server = %id, attempt, attempts, "MCP connect attempt failed: {}", e);
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        let message = last_error.clone();
        self.update_state(id, |s| {
            s.status = McpStatus::Error;
            s.error = Some(message);
        })
        .await;

        Err(McpError::ConnectionFailed {
            server: id.to_string(),
            attempts,
            last_error,
        })
    }

    async fn live_connection(&self, id: &str) -> Option<Arc<dyn McpConnection>> {
        self.connections
            .read()
            .await
            .get(id)
            .filter(|c| c.is_alive())
            .cloned()
    }

    /// Connect to every enabled server concurrently.
    ///
    /// Returns the ids that connected. Failures are logged and excluded.
    pub async fn connect_to_all_servers(&self) -> Vec<String> {
        let ids: Vec<String> = self
            .servers
            .read()
            .await
            .iter()
            .filter(|s| s.config.enabled)
            .map(|s| s.config.id.clone())
            .collect();

        let results = futures::future::join_all(ids.iter().map(|id| self.connect_to_server(id))).await;

        ids.into_iter()
            .zip(results)
            .filter_map(|(id, result)| match result {
                Ok(_) => Some(id),
                Err(e) => {
                    tracing::error!(server = %id, "Skipping MCP server: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Union of tools across connected servers, in registry order.
    ///
    /// When two servers expose the same name, the first one wins.
    pub async fn discover_tools(&self) -> Vec<DiscoveredTool> {
        let order: Vec<String> = self.servers.read().await.iter().map(|s| s.config.id.clone()).collect();
        let connections = self.connections.read().await.clone();

        let mut seen = HashSet::new();
        let mut discovered = Vec::new();

        for id in order {
            let Some(connection) = connections.get(&id).filter(|c| c.is_alive()) else {
                continue;
            };
            match connection.list_tools().await {
                Ok(tools) => {
                    tracing::debug!(server = %id, count = tools.len(), "Discovered MCP tools");
                    for tool in &tools {
                        if seen.insert(tool.name.clone()) {
                            discovered.push(DiscoveredTool {
                                server_id: id.clone(),
                                descriptor: tool.clone(),
                            });
                        } else {
                            tracing::debug!(server = %id, tool = %tool.name, "Tool shadowed by earlier server");
                        }
                    }
                    self.tools.write().await.insert(id, tools);
                }
                Err(e) => {
                    tracing::warn!(server = %id, "Tool discovery failed: {}", e);
                }
            }
        }

        discovered
    }

    /// First connected server (in registry order) advertising `name`.
    pub async fn find_tool(&self, name: &str) -> Option<DiscoveredTool> {
        let servers = self.servers.read().await;
        let connections = self.connections.read().await;
        let tools = self.tools.read().await;

        servers
            .iter()
            .filter(|s| connections.get(&s.config.id).is_some_and(|c| c.is_alive()))
            .find_map(|s| {
                tools
                    .get(&s.config.id)
                    .and_then(|list| list.iter().find(|t| t.name == name))
                    .map(|descriptor| DiscoveredTool {
                        server_id: s.config.id.clone(),
                        descriptor: descriptor.clone(),
                    })
            })
    }

    /// Invoke a tool on the first server that advertises it.
    ///
    /// An unknown tool or arguments that do not fit the tool's input schema
    /// yield `ToolCallResult { is_error: true }`. Transport failures are errors.
    pub async fn invoke_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let Some(tool) = self.find_tool(name).await else {
            tracing::warn!(tool = %name, "No connected MCP server provides tool");
            return Ok(ToolCallResult::error(format!(
                "Tool '{}' not found on any connected MCP server",
                name
            )));
        };

        if let Err(violations) = Shape::compile(&tool.descriptor.input_schema).validate(&arguments) {
            return Ok(ToolCallResult::error(format!(
                "Invalid arguments for tool '{}': {}",
                name,
                violations.join("; ")
            )));
        }

        let connection = self
            .connections
            .read()
            .await
            .get(&tool.server_id)
            .cloned()
            .ok_or_else(|| McpError::NotConnected(tool.server_id.clone()))?;

        tracing::debug!(server = %tool.server_id, tool = %name, "Invoking MCP tool");

        match connection.call_tool(name, arguments).await {
            Ok(result) => {
                let is_error = result.is_error;
                self.update_state(&tool.server_id, |s| {
                    if is_error {
                        s.tool_errors += 1;
                    } else {
                        s.tool_calls += 1;
                    }
                })
                .await;
                Ok(result)
            }
            Err(e) => {
                self.update_state(&tool.server_id, |s| s.tool_errors += 1).await;
                Err(e)
            }
        }
    }

    /// Close every live connection.
    pub async fn disconnect_all(&self) {
        let connections: Vec<(String, Arc<dyn McpConnection>)> =
            self.connections.write().await.drain().collect();
        for (id, connection) in connections {
            connection.close().await;
            self.update_state(&id, |s| {
                if s.status == McpStatus::Connected {
                    s.status = McpStatus::Disconnected;
                }
            })
            .await;
        }
        self.tools.write().await.clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;
    use std::time::{Duration, Instant};

    /// In-memory tool server.
    pub struct FakeServer {
        pub tools: Vec<McpToolDescriptor>,
        /// Connection attempts to fail before succeeding
        pub fail_connects: AtomicU32,
        pub connects: AtomicUsize,
        pub calls: StdMutex<Vec<(String, Value)>>,
        pub reply: StdMutex<ToolCallResult>,
        /// Simulated handshake latency
        pub connect_delay: StdMutex<Duration>,
        /// Files written on every tool call
        pub side_effects: StdMutex<Vec<(PathBuf, String)>>,
    }

    impl FakeServer {
        pub fn new(tools: Vec<McpToolDescriptor>) -> Arc<Self> {
            Arc::new(Self {
                tools,
                fail_connects: AtomicU32::new(0),
                connects: AtomicUsize::new(0),
                calls: StdMutex::new(Vec::new()),
                reply: StdMutex::new(ToolCallResult::text("ok")),
                connect_delay: StdMutex::new(Duration::ZERO),
                side_effects: StdMutex::new(Vec::new()),
            })
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    struct FakeConnection {
        server: Arc<FakeServer>,
    }

    #[async_trait]
    impl McpConnection for FakeConnection {
        async fn initialize(&self) -> Result<InitializeResult, McpError> {
            Ok(InitializeResult {
                protocol_version: "2024-11-05".to_string(),
                server_info: None,
            })
        }

        async fn list_tools(&self) -> Result<Vec<McpToolDescriptor>, McpError> {
            Ok(self.server.tools.clone())
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
            self.server
                .calls
                .lock()
                .unwrap()
                .push((name.to_string(), arguments));
            let writes = self.server.side_effects.lock().unwrap().clone();
            for (path, contents) in writes {
                std::fs::write(path, contents).unwrap();
            }
            Ok(self.server.reply.lock().unwrap().clone())
        }

        fn is_alive(&self) -> bool {
            true
        }

        async fn close(&self) {}
    }

    #[derive(Default)]
    pub struct FakeConnector {
        pub servers: HashMap<String, Arc<FakeServer>>,
    }

    impl FakeConnector {
        pub fn with(mut self, id: &str, server: Arc<FakeServer>) -> Self {
            self.servers.insert(id.to_string(), server);
            self
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, config: &McpServerConfig) -> Result<Arc<dyn McpConnection>, McpError> {
            let server = self
                .servers
                .get(&config.id)
                .cloned()
                .ok_or_else(|| McpError::Transport("connection refused".to_string()))?;
            server.connects.fetch_add(1, Ordering::SeqCst);
            let delay = *server.connect_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let remaining = server.fail_connects.load(Ordering::SeqCst);
            if remaining > 0 {
                server.fail_connects.store(remaining - 1, Ordering::SeqCst);
                return Err(McpError::Transport("connection refused".to_string()));
            }
            Ok(Arc::new(FakeConnection { server }))
        }
    }

    pub fn fast_config() -> McpConfig {
        McpConfig {
            config_path: None,
            connect_attempts: 3,
            retry_delay: Duration::from_millis(10),
        }
    }

    fn manager(connector: FakeConnector, config: McpConfig) -> McpManager {
        McpManager::with_connector(config, Arc::new(connector))
    }

    #[tokio::test]
    async fn test_disabled_server_rejected_without_delay() {
        let server = FakeServer::new(vec![]);
        let config = McpConfig {
            retry_delay: Duration::from_secs(5),
            ..fast_config()
        };
        let mgr = manager(FakeConnector::default().with("off", Arc::clone(&server)), config);
        mgr.set_servers(vec![McpServerConfig::http("off", "http://x").disabled()]).await;

        let start = Instant::now();
        let err = mgr.connect_to_server("off").await.err().unwrap();
        assert!(matches!(err, McpError::ServerDisabled(_)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(server.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_server() {
        let mgr = manager(FakeConnector::default(), fast_config());
        let err = mgr.connect_to_server("ghost").await.err().unwrap();
        assert!(matches!(err, McpError::UnknownServer(_)));
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let server = FakeServer::new(vec![]);
        server.fail_connects.store(2, Ordering::SeqCst);
        let mgr = manager(FakeConnector::default().with("flaky", Arc::clone(&server)), fast_config());
        mgr.set_servers(vec![McpServerConfig::http("flaky", "http://x")]).await;

        assert!(mgr.connect_to_server("flaky").await.is_ok());
        assert_eq!(server.connects.load(Ordering::SeqCst), 3);
        assert_eq!(mgr.list_servers().await[0].status, McpStatus::Connected);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let server = FakeServer::new(vec![]);
        server.fail_connects.store(10, Ordering::SeqCst);
        let mgr = manager(FakeConnector::default().with("dead", Arc::clone(&server)), fast_config());
        mgr.set_servers(vec![McpServerConfig::http("dead", "http://x")]).await;

        match mgr.connect_to_server("dead").await.err().unwrap() {
            McpError::ConnectionFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(server.connects.load(Ordering::SeqCst), 3);
        assert_eq!(mgr.list_servers().await[0].status, McpStatus::Error);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let server = FakeServer::new(vec![]);
        let mgr = manager(FakeConnector::default().with("a", Arc::clone(&server)), fast_config());
        mgr.set_servers(vec![McpServerConfig::http("a", "http://x")]).await;
        mgr.connect_to_server("a").await.unwrap();
        mgr.connect_to_server("a").await.unwrap();
        assert_eq!(server.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_connection() {
        let server = FakeServer::new(vec![]);
        *server.connect_delay.lock().unwrap() = Duration::from_millis(50);
        let mgr = manager(FakeConnector::default().with("slow", Arc::clone(&server)), fast_config());
        mgr.set_servers(vec![McpServerConfig::http("slow", "http://x")]).await;

        let (a, b) = tokio::join!(mgr.connect_to_server("slow"), mgr.connect_to_server("slow"));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(server.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_all_excludes_failures() {
        let good = FakeServer::new(vec![]);
        let mgr = manager(FakeConnector::default().with("good", good), fast_config());
        mgr.set_servers(vec![
            McpServerConfig::http("good", "http://x"),
            McpServerConfig::http("missing", "http://y"),
            McpServerConfig::http("off", "http://z").disabled(),
        ])
        .await;
        assert_eq!(mgr.connect_to_all_servers().await, vec!["good".to_string()]);
    }

    #[tokio::test]
    async fn test_discovery_union_and_first_server_dispatch() {
        let first = FakeServer::new(vec![
            McpToolDescriptor::new("shared", "", json!({})),
            McpToolDescriptor::new("alpha", "", json!({})),
        ]);
        let second = FakeServer::new(vec![
            McpToolDescriptor::new("shared", "", json!({})),
            McpToolDescriptor::new("beta", "", json!({})),
        ]);
        let mgr = manager(
            FakeConnector::default()
                .with("one", Arc::clone(&first))
                .with("two", Arc::clone(&second)),
            fast_config(),
        );
        mgr.set_servers(vec![
            McpServerConfig::http("one", "http://x"),
            McpServerConfig::http("two", "http://y"),
        ])
        .await;
        mgr.connect_to_all_servers().await;

        let names: Vec<String> = mgr
            .discover_tools()
            .await
            .into_iter()
            .map(|t| format!("{}:{}", t.server_id, t.descriptor.name))
            .collect();
        assert_eq!(names, vec!["one:shared", "one:alpha", "two:beta"]);

        mgr.invoke_tool("shared", json!({})).await.unwrap();
        mgr.invoke_tool("beta", json!({"x": 1})).await.unwrap();
        assert_eq!(first.call_count(), 1);
        assert_eq!(second.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_structured_error() {
        let mgr = manager(FakeConnector::default(), fast_config());
        let result = mgr.invoke_tool("nope", json!({})).await.unwrap();
        assert!(result.is_error);
        assert!(result.text_content().contains("nope"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_not_sent() {
        let server = FakeServer::new(vec![McpToolDescriptor::new(
            "write_file",
            "",
            json!({"type": "object", "required": ["path"]}),
        )]);
        let mgr = manager(FakeConnector::default().with("fs", Arc::clone(&server)), fast_config());
        mgr.set_servers(vec![McpServerConfig::http("fs", "http://x")]).await;
        mgr.connect_to_all_servers().await;
        mgr.discover_tools().await;

        let result = mgr.invoke_tool("write_file", json!({})).await.unwrap();
        assert!(result.is_error);
        assert_eq!(server.call_count(), 0);

        let ok = mgr.invoke_tool("write_file", json!({"path": "a"})).await.unwrap();
        assert!(!ok.is_error);
        assert_eq!(mgr.list_servers().await[0].tool_calls, 1);
    }

    #[tokio::test]
    async fn test_load_servers_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        tokio::fs::write(
            &path,
            r#"{"servers":[{"id":"a","transport":{"http":{"endpoint":"http://x"}},"enabled":false}]}"#,
        )
        .await
        .unwrap();
        let mgr = manager(FakeConnector::default(), fast_config());
        assert_eq!(mgr.load_servers(&path).await.unwrap(), 1);
        assert_eq!(mgr.list_servers().await[0].status, McpStatus::Disabled);
    }
}
