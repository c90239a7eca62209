//! MCP (Model Context Protocol) tool servers.
//!
//! This module connects to stdio MCP servers for the agent with:
//! - Lazy connection pooling, reused across agent submissions
//! - Tool discovery via `tools/list`
//! - Configurable timeouts per-server and globally
//! - A [`ToolManager`] implementation over the pool

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use crate::llm_client::ToolManager;
use crate::models::Tool;

// === Configuration Types ===

/// Full MCP configuration from mcp.json
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct McpConfig {
    #[serde(default)]
    pub timeouts: McpTimeouts,
    #[serde(default, alias = "mcpServers")]
    pub servers: BTreeMap<String, McpServerConfig>,
}

/// Global timeout configuration
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[allow(clippy::struct_field_names)]
pub struct McpTimeouts {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_execute_timeout")]
    pub execute_timeout: u64,
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_execute_timeout() -> u64 {
    60
}

impl Default for McpTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            execute_timeout: default_execute_timeout(),
        }
    }
}

/// Configuration for a single MCP server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub connect_timeout: Option<u64>,
    #[serde(default)]
    pub execute_timeout: Option<u64>,
    #[serde(default)]
    pub disabled: bool,
}

impl McpServerConfig {
    pub fn effective_connect_timeout(&self, global: &McpTimeouts) -> u64 {
        self.connect_timeout.unwrap_or(global.connect_timeout)
    }

    pub fn effective_execute_timeout(&self, global: &McpTimeouts) -> u64 {
        self.execute_timeout.unwrap_or(global.execute_timeout)
    }
}

impl McpConfig {
    /// Load from a JSON file. A missing file means no servers.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read MCP config: {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse MCP config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every enabled server has something to run.
    pub fn validate(&self) -> Result<()> {
        for (name, server) in self.enabled_servers() {
            if server.command.trim().is_empty() {
                anyhow::bail!("MCP server '{name}' has an empty command");
            }
        }
        if self.timeouts.connect_timeout == 0 || self.timeouts.execute_timeout == 0 {
            anyhow::bail!("MCP timeouts must be at least 1 second");
        }
        Ok(())
    }

    pub fn enabled_servers(&self) -> impl Iterator<Item = (&String, &McpServerConfig)> {
        self.servers.iter().filter(|(_, server)| !server.disabled)
    }
}

// === MCP Tool Definition ===

/// Tool discovered from an MCP server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

// === Connection State ===

/// State of an MCP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Ready,
    Disconnected,
}

// === McpConnection - Async Connection Management ===

/// Manages a single async connection to an MCP server
pub struct McpConnection {
    name: String,
    _child: Child,
    stdin: ChildStdin,
    reader: tokio::io::BufReader<ChildStdout>,
    tools: Vec<McpTool>,
    request_id: AtomicU64,
    state: ConnectionState,
    config: McpServerConfig,
}

impl McpConnection {
    /// Connect to an MCP server and initialize it
    pub async fn connect(
        name: String,
        config: McpServerConfig,
        global_timeouts: &McpTimeouts,
    ) -> Result<Self> {
        let connect_timeout_secs = config.effective_connect_timeout(global_timeouts);

        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn MCP server '{name}'"))?;

        let stdin = child.stdin.take().context("Failed to get MCP stdin")?;
        let stdout = child.stdout.take().context("Failed to get MCP stdout")?;

        let mut conn = Self {
            name: name.clone(),
            _child: child,
            stdin,
            reader: tokio::io::BufReader::new(stdout),
            tools: Vec::new(),
            request_id: AtomicU64::new(1),
            state: ConnectionState::Connecting,
            config,
        };

        tokio::time::timeout(Duration::from_secs(connect_timeout_secs), conn.initialize())
            .await
            .with_context(|| format!("MCP server '{name}' initialization timed out"))??;

        tokio::time::timeout(
            Duration::from_secs(connect_timeout_secs),
            conn.discover_tools(),
        )
        .await
        .with_context(|| format!("MCP server '{name}' tool discovery timed out"))??;

        conn.state = ConnectionState::Ready;
        tracing::info!(server = %name, tools = conn.tools.len(), "MCP server connected");
        Ok(conn)
    }

    async fn initialize(&mut self) -> Result<()> {
        let init_id = self.next_id();
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": init_id,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "clientInfo": {
                    "name": "chatterm",
                    "version": env!("CARGO_PKG_VERSION")
                },
                "capabilities": { "tools": {} }
            }
        }))
        .await?;

        self.recv(init_id).await?;

        // Notification: no id, no response.
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }))
        .await?;

        Ok(())
    }

    async fn discover_tools(&mut self) -> Result<()> {
        let list_id = self.next_id();
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": list_id,
            "method": "tools/list",
            "params": {}
        }))
        .await?;

        let response = self.recv(list_id).await?;

        if let Some(tools) = response.get("result").and_then(|result| result.get("tools")) {
            self.tools = serde_json::from_value(tools.clone()).with_context(|| {
                format!("Failed to parse tools from MCP server '{}'", self.name)
            })?;
        }

        Ok(())
    }

    /// Call a tool on this MCP server
    pub async fn call_tool(
        &mut self,
        tool_name: &str,
        arguments: Value,
        timeout_secs: u64,
    ) -> Result<Value> {
        if self.state != ConnectionState::Ready {
            anyhow::bail!(
                "Failed to call MCP tool: connection '{}' is not ready",
                self.name
            );
        }

        let call_id = self.next_id();
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": call_id,
            "method": "tools/call",
            "params": {
                "name": tool_name,
                "arguments": arguments
            }
        }))
        .await?;

        let response = tokio::time::timeout(Duration::from_secs(timeout_secs), self.recv(call_id))
            .await
            .with_context(|| {
                format!(
                    "MCP tool '{}' on server '{}' timed out after {}s",
                    tool_name, self.name, timeout_secs
                )
            })??;

        if let Some(error) = response.get("error") {
            return Err(anyhow::anyhow!(
                "MCP error: {}",
                serde_json::to_string_pretty(error)?
            ));
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    pub fn tools(&self) -> &[McpTool] {
        &self.tools
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn send(&mut self, msg: Value) -> Result<()> {
        let line = serde_json::to_string(&msg)? + "\n";
        let written = async {
            self.stdin.write_all(line.as_bytes()).await?;
            self.stdin.flush().await
        }
        .await;
        if let Err(err) = written {
            self.state = ConnectionState::Disconnected;
            return Err(err)
                .with_context(|| format!("Failed to write to MCP server '{}'", self.name));
        }
        Ok(())
    }

    async fn recv(&mut self, expected_id: u64) -> Result<Value> {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes = self.reader.read_line(&mut line).await?;
            if bytes == 0 {
                self.state = ConnectionState::Disconnected;
                anyhow::bail!(
                    "Failed to read MCP response: server '{}' closed connection",
                    self.name
                );
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                if value.get("id").and_then(Value::as_u64) == Some(expected_id) {
                    return Ok(value);
                }
                // Skip notifications (no id) and responses with different ids
            }
        }
    }
}

// === McpPool - Connection Pool Management ===

/// Pool of MCP connections for reuse
pub struct McpPool {
    connections: HashMap<String, McpConnection>,
    config: McpConfig,
    /// Advertised tool name -> (server, tool name on that server)
    routes: HashMap<String, (String, String)>,
}

impl McpPool {
    pub fn new(config: McpConfig) -> Self {
        Self {
            connections: HashMap::new(),
            config,
            routes: HashMap::new(),
        }
    }

    /// Create a pool from a configuration file path
    pub fn from_config_path(path: &Path) -> Result<Self> {
        Ok(Self::new(McpConfig::load(path)?))
    }

    /// Get or create a connection to a server
    pub async fn get_or_connect(&mut self, server_name: &str) -> Result<&mut McpConnection> {
        let is_ready = self
            .connections
            .get(server_name)
            .is_some_and(McpConnection::is_ready);
        if !is_ready {
            self.connections.remove(server_name);

            let server_config = self
                .config
                .servers
                .get(server_name)
                .ok_or_else(|| anyhow::anyhow!("Failed to find MCP server: {server_name}"))?
                .clone();

            if server_config.disabled {
                anyhow::bail!("Failed to connect MCP server '{server_name}': server is disabled");
            }

            let connection = McpConnection::connect(
                server_name.to_string(),
                server_config,
                &self.config.timeouts,
            )
            .await?;
            self.connections.insert(server_name.to_string(), connection);
        }

        self.connections
            .get_mut(server_name)
            .ok_or_else(|| anyhow::anyhow!("Failed to store MCP connection for {server_name}"))
    }

    /// Connect to all enabled servers, returning errors for failed connections
    pub async fn connect_all(&mut self) -> Vec<(String, anyhow::Error)> {
        let mut errors = Vec::new();
        let names: Vec<String> = self
            .config
            .enabled_servers()
            .map(|(name, _)| name.clone())
            .collect();

        for name in names {
            if let Err(e) = self.get_or_connect(&name).await {
                tracing::warn!(server = %name, "MCP connect failed: {e:#}");
                errors.push((name, e));
            }
        }

        errors
    }

    /// Tools from every connected server. A tool keeps its own name unless
    /// another server already claimed it, in which case it is prefixed with
    /// its server name.
    pub fn api_tools(&mut self) -> Vec<Tool> {
        let mut servers: Vec<&String> = self.connections.keys().collect();
        servers.sort();

        let mut routes = HashMap::new();
        let mut tools = Vec::new();
        for server in servers {
            let Some(conn) = self.connections.get(server) else {
                continue;
            };
            for tool in conn.tools() {
                let name = if routes.contains_key(&tool.name) {
                    format!("{server}_{}", tool.name)
                } else {
                    tool.name.clone()
                };
                routes.insert(name.clone(), (server.clone(), tool.name.clone()));
                tools.push(Tool {
                    name,
                    description: tool.description.clone().unwrap_or_default(),
                    input_schema: tool.input_schema.clone(),
                });
            }
        }
        self.routes = routes;
        tools
    }

    /// Call a tool by the name advertised from [`McpPool::api_tools`].
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value> {
        let (server_name, tool_name) = self
            .routes
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: {name}"))?;
        let global_timeouts = self.config.timeouts;
        let conn = self.get_or_connect(&server_name).await?;
        let timeout = conn.config().effective_execute_timeout(&global_timeouts);
        conn.call_tool(&tool_name, arguments, timeout).await
    }

    pub fn connected_servers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .connections
            .iter()
            .filter(|(_, c)| c.is_ready())
            .map(|(n, _)| n.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn config(&self) -> &McpConfig {
        &self.config
    }
}

// === ToolManager ===

/// [`ToolManager`] backed by a shared [`McpPool`].
pub struct McpToolManager {
    pool: Mutex<McpPool>,
}

impl McpToolManager {
    pub fn new(config: McpConfig) -> Self {
        Self {
            pool: Mutex::new(McpPool::new(config)),
        }
    }
}

#[async_trait]
impl ToolManager for McpToolManager {
    async fn connect(&self) -> Result<()> {
        let mut pool = self.pool.lock().await;
        let enabled = pool.config().enabled_servers().count();
        let errors = pool.connect_all().await;
        if enabled > 0 && errors.len() == enabled {
            let detail = errors
                .iter()
                .map(|(name, err)| format!("{name}: {err:#}"))
                .collect::<Vec<_>>()
                .join("; ");
            anyhow::bail!("Failed to connect any MCP server ({detail})");
        }
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        Ok(self.pool.lock().await.api_tools())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String> {
        let result = self.pool.lock().await.call_tool(name, arguments).await?;
        Ok(format_tool_result(&result))
    }
}

// === Helper Functions ===

/// Format MCP tool result for display
pub fn format_tool_result(result: &Value) -> String {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let content = result
        .get("content")
        .and_then(|v| v.as_array())
        .map_or_else(
            || serde_json::to_string_pretty(result).unwrap_or_default(),
            |arr| {
                arr.iter()
                    .filter_map(|item| match item.get("type")?.as_str()? {
                        "text" => item.get("text")?.as_str().map(String::from),
                        other => Some(format!("[{other} content]")),
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            },
        );

    if is_error {
        format!("Error: {content}")
    } else {
        content
    }
}

// === Unit Tests ===
