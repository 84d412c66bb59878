//! MCP tool host.
//!
//! Owns one [`SqlStore`] and serves the fixed tool catalog over a
//! [`McpTransport`]. Requests are handled strictly one at a time, so
//! responses leave in the order requests arrived and the store never sees
//! two statements at once.

use serde_json::Value;

use sqlrelay_store::SqlStore;

use crate::error::McpError;
use crate::tools::{catalog, HostTool};
use crate::transport::McpTransport;
use crate::types::*;

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "mysql-auto";

/// MCP server exposing a SQL store as tools.
pub struct ToolHost<S> {
    store: S,
    catalog: Vec<ToolDescriptor>,
    server_name: String,
    server_version: String,
    initialized: bool,
}

impl<S: SqlStore> ToolHost<S> {
    /// Create a host that takes ownership of `store`.
    pub fn new(store: S) -> Self {
        Self {
            store,
            catalog: catalog(),
            server_name: SERVER_NAME.to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            initialized: false,
        }
    }

    /// Whether a client has completed `initialize`.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Give the store back, e.g. to close it.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Run the server loop, reading from and writing to the transport.
    ///
    /// Processes JSON-RPC messages until the transport is closed.
    pub async fn run<T: McpTransport>(&mut self, transport: &mut T) -> Result<(), McpError> {
        tracing::info!(server = %self.server_name, "MCP server starting");

        while let Some(line) = transport.receive().await? {
            tracing::debug!(message = %line, "Received message");

            if let Some(response) = self.handle_line(&line).await {
                let json = serde_json::to_string(&response)?;
                tracing::debug!(response = %json, "Sending response");
                transport.send(&json).await?;
            }
        }

        tracing::info!("Transport closed, shutting down");
        Ok(())
    }

    /// Handle one raw line. Returns the response to send, if any.
    ///
    /// - not JSON: parse error with a `null` id
    /// - no `id`: notification, never answered (malformed ones are dropped)
    /// - `id` but not a valid request: invalid-request error echoing the id
    pub async fn handle_line(&mut self, line: &str) -> Option<JsonRpcResponse> {
        let raw: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse JSON");
                let err = McpError::JsonParse(e).to_rpc_error();
                return Some(JsonRpcResponse::failure(RpcId::Null, err));
            }
        };

        let id = match raw.get("id") {
            Some(id) => serde_json::from_value::<RpcId>(id.clone()).unwrap_or(RpcId::Null),
            None => {
                match serde_json::from_value::<JsonRpcNotification>(raw) {
                    Ok(notif) => self.handle_notification(&notif),
                    Err(e) => tracing::warn!(error = %e, "Dropping malformed message without id"),
                }
                return None;
            }
        };

        match serde_json::from_value::<JsonRpcRequest>(raw) {
            Ok(request) => Some(self.handle_request(&request).await),
            Err(e) => {
                tracing::warn!(error = %e, id = %id, "Failed to parse JSON-RPC request");
                let err = McpError::InvalidRequest(e.to_string()).to_rpc_error();
                Some(JsonRpcResponse::failure(id, err))
            }
        }
    }

    /// Handle a single JSON-RPC request and produce a response.
    pub async fn handle_request(&mut self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();

        let outcome = match Method::from_name(&request.method) {
            Method::Initialize => self.handle_initialize(&request.params),
            Method::Ping => Ok(Value::Object(Default::default())),
            Method::ToolsList => self.handle_list_tools(),
            Method::ToolsCall => self.handle_call_tool(&request.params).await,
            Method::Unknown(method) => {
                tracing::warn!(method = %method, "Unknown method");
                Err(McpError::MethodNotFound(method))
            }
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => JsonRpcResponse::failure(id, err.to_rpc_error()),
        }
    }

    fn handle_notification(&mut self, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" => {
                tracing::info!("Client confirmed initialization");
            }
            "notifications/cancelled" => {
                // Requests run to completion; there is nothing to cancel.
                tracing::debug!("Client cancelled a request");
            }
            method => {
                tracing::debug!(method = %method, "Unknown notification, ignoring");
            }
        }
    }

    fn handle_initialize(&mut self, params: &Option<Value>) -> Result<Value, McpError> {
        match params
            .clone()
            .map(serde_json::from_value::<InitializeParams>)
        {
            Some(Ok(p)) => tracing::info!(
                client = %p.client_info.name,
                protocol = %p.protocol_version,
                "Handling initialize"
            ),
            _ => tracing::info!("Handling initialize"),
        }
        self.initialized = true;

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: ServerInfo {
                name: self.server_name.clone(),
                version: Some(self.server_version.clone()),
            },
        };

        Ok(serde_json::to_value(result)?)
    }

    fn handle_list_tools(&self) -> Result<Value, McpError> {
        tracing::debug!("Handling tools/list");
        let result = ListToolsResult {
            tools: self.catalog.clone(),
        };
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_call_tool(&mut self, params: &Option<Value>) -> Result<Value, McpError> {
        let params = params
            .as_ref()
            .ok_or_else(|| McpError::InvalidParams("missing params".to_string()))?;

        let call_params: CallToolParams = serde_json::from_value(params.clone())
            .map_err(|e| McpError::InvalidParams(e.to_string()))?;

        tracing::debug!(tool = %call_params.name, "Handling tools/call");

        let tool = HostTool::from_name(&call_params.name)?;
        let result = match tool.execute(&call_params.arguments, &mut self.store).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(tool = %call_params.name, error = %err, "Tool call failed");
                return Err(err);
            }
        };

        Ok(serde_json::to_value(result)?)
    }
}
