/// MCP Server Implementation
///
/// This module contains the transport-agnostic MCP dispatcher:
/// - `ProtocolSession`: per-client protocol state (initialized flag, negotiated
///   version, UI capability)
/// - `MCPServer`: request validation and method routing for `initialize`,
///   `tools/*`, `resources/*`, `ping` and notifications
///
/// Transports own one session per client and pass it into every call. The
/// server itself holds no per-client state, so the stdio and HTTP transports
/// share a single instance.

use futures_util::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::core::capability::CapabilityDetector;
use crate::core::convert::convert;
use crate::core::error::RpcError;
use crate::core::manager::ToolManager;
use crate::core::protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult, MCPRequest,
    MCPResponse, MCP_PROTOCOL_VERSION, ReadResourceParams, ServerCapabilities, Tool, is_valid_id,
    is_valid_method,
};
use crate::core::registry::ToolContext;
use crate::core::resources;

/// Server name as reported in MCP initialize responses
pub const SERVER_NAME: &str = "veracode-mcp-server";
/// Server version string as reported in MCP initialize responses
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Guidance text returned to the client in `initialize`.
const INSTRUCTIONS: &str = include_str!("instructions.md");

/// Protocol state for one connected client.
///
/// Starts uninitialized with UI support off. The first successful `initialize`
/// moves it to initialized permanently.
#[derive(Debug, Default)]
pub struct ProtocolSession {
    initialized: AtomicBool,
    client_supports_ui: AtomicBool,
    protocol_version: RwLock<Option<String>>,
}

impl ProtocolSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn client_supports_ui(&self) -> bool {
        self.client_supports_ui.load(Ordering::Acquire)
    }

    /// Negotiated protocol version, once initialized.
    pub fn protocol_version(&self) -> Option<String> {
        self.protocol_version
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn complete_handshake(&self, version: String, supports_ui: bool) {
        *self.protocol_version.write().unwrap_or_else(|e| e.into_inner()) = Some(version);
        self.client_supports_ui.store(supports_ui, Ordering::Release);
        self.initialized.store(true, Ordering::Release);
    }
}

/// Picks the client's requested version when it is not older than ours.
/// Versions are date strings, so lexical order is chronological.
pub fn negotiate_version(requested: &str) -> String {
    if requested >= MCP_PROTOCOL_VERSION {
        requested.to_string()
    } else {
        MCP_PROTOCOL_VERSION.to_string()
    }
}

/// JSON-RPC method router shared by all transports.
pub struct MCPServer {
    tools: ToolManager,
    detector: CapabilityDetector,
    capabilities: ServerCapabilities,
    /// Total requests dispatched, for the metrics endpoint
    requests: AtomicU64,
}

impl MCPServer {
    pub fn new(tools: ToolManager, detector: CapabilityDetector) -> Self {
        Self {
            tools,
            detector,
            capabilities: ServerCapabilities::default(),
            requests: AtomicU64::new(0),
        }
    }

    pub fn tools(&self) -> &ToolManager {
        &self.tools
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Handles one raw JSON-RPC message straight from the wire.
    ///
    /// Returns `None` when no response must be sent (notifications). Bytes
    /// that are not valid UTF-8 are a parse error like any other malformed
    /// JSON. A panic anywhere in dispatch is converted into an internal error
    /// addressed to the request id, so one bad request never takes down the
    /// transport.
    pub async fn handle_bytes(&self, session: &ProtocolSession, message: &[u8]) -> Option<MCPResponse> {
        let value: Value = match serde_json::from_slice(message) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "received invalid JSON");
                return Some(MCPResponse::failure(None, RpcError::parse_error(format!("Parse error: {e}"))));
            }
        };

        let request: MCPRequest = match serde_json::from_value(value.clone()) {
            Ok(request) => request,
            Err(e) => {
                let id = value.get("id").cloned().filter(is_valid_id);
                tracing::warn!(error = %e, "received malformed JSON-RPC request");
                return Some(MCPResponse::failure(id, RpcError::invalid_request(format!("Invalid request: {e}"))));
            }
        };

        let id = request.id.clone().filter(is_valid_id);
        match AssertUnwindSafe(self.handle_request(session, request)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                tracing::error!(panic = %panic_message(&*panic), "request dispatch panicked");
                Some(MCPResponse::failure(id, RpcError::internal("Internal error while handling request")))
            }
        }
    }

    /// Validates and routes a parsed request.
    pub async fn handle_request(&self, session: &ProtocolSession, request: MCPRequest) -> Option<MCPResponse> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        // The id is checked first: a rejected id is never echoed back.
        if let Some(id) = &request.id {
            if !is_valid_id(id) {
                tracing::warn!("rejecting request with invalid id");
                return Some(MCPResponse::failure(None, RpcError::invalid_request("Invalid request id")));
            }
        }

        // The method name goes into logs, so nothing is logged before this check.
        if !is_valid_method(&request.method) {
            tracing::warn!("rejecting request with invalid method name");
            return Some(MCPResponse::failure(
                request.id,
                RpcError::invalid_request("Invalid method name"),
            ));
        }

        if request.jsonrpc != "2.0" {
            tracing::debug!(method = %request.method, jsonrpc = ?request.jsonrpc, "request without a 2.0 version marker");
        }

        if request.is_notification() {
            self.handle_notification(&request.method);
            return None;
        }

        let Some(id) = request.id else {
            tracing::warn!(method = %request.method, "rejecting request without id");
            return Some(MCPResponse::failure(
                None,
                RpcError::invalid_request("Request id is required"),
            ));
        };

        tracing::debug!(method = %request.method, id = %id, "handling request");

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(session, request.params),
            "tools/list" => self.handle_tools_list(session),
            "tools/call" => self.handle_tools_call(session, request.params).await,
            "resources/list" => Ok(json!({ "resources": resources::list() })),
            "resources/read" => self.handle_resources_read(request.params),
            "ping" => Ok(json!({})),
            method => Err(RpcError::method_not_found(method)),
        };

        Some(match result {
            Ok(result) => MCPResponse::success(Some(id), result),
            Err(error) => {
                tracing::debug!(method = %request.method, code = error.code, message = %error.message, "request failed");
                MCPResponse::failure(Some(id), error)
            }
        })
    }

    fn handle_notification(&self, method: &str) {
        match method {
            "notifications/initialized" => tracing::info!("client finished initialization"),
            "notifications/cancelled" => tracing::debug!("client cancelled a request"),
            other => tracing::debug!(method = %other, "ignoring notification"),
        }
    }

    /// Handle MCP initialize method.
    ///
    /// Marks the session initialized, runs UI capability detection once and
    /// caches the answer, and negotiates the protocol version.
    fn handle_initialize(&self, session: &ProtocolSession, params: Option<Value>) -> Result<Value, RpcError> {
        let params: InitializeParams = parse_params(params, "initialize")?;

        tracing::info!(
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            protocol_version = %params.protocol_version,
            "client initializing"
        );

        if session.is_initialized() {
            tracing::info!("client re-initializing an initialized session");
        }

        let supports_ui = self.detector.detect(&params.capabilities);
        let version = negotiate_version(&params.protocol_version);
        session.complete_handshake(version.clone(), supports_ui);

        tracing::info!(protocol_version = %version, ui = supports_ui, "session initialized");

        to_result(&InitializeResult {
            protocol_version: version,
            capabilities: self.capabilities.clone(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
            instructions: INSTRUCTIONS.to_string(),
        })
    }

    /// Handle MCP tools/list method.
    ///
    /// UI sessions additionally get `_meta` resource links on the tools that
    /// have an interactive view. Other sessions never see them.
    fn handle_tools_list(&self, session: &ProtocolSession) -> Result<Value, RpcError> {
        let supports_ui = session.client_supports_ui();
        let tools: Vec<Tool> = self
            .tools
            .definitions()
            .protocol_tools()
            .into_iter()
            .map(|mut tool| {
                if supports_ui {
                    if let Some(uri) = resources::ui_resource_uri(&tool.name) {
                        tool.meta = Some(resources::tool_ui_meta(&uri));
                    }
                }
                tool
            })
            .collect();

        tracing::debug!(count = tools.len(), ui = supports_ui, "listing tools");
        Ok(json!({ "tools": tools }))
    }

    /// Handle MCP tools/call method.
    ///
    /// Only malformed params are protocol errors. Unknown tools, invalid
    /// arguments and handler failures all come back as `isError` results.
    async fn handle_tools_call(&self, session: &ProtocolSession, params: Option<Value>) -> Result<Value, RpcError> {
        let params: CallToolParams = parse_params(params, "tool call")?;
        let result = self.call_tool(session, params).await;
        to_result(&result)
    }

    pub async fn call_tool(&self, session: &ProtocolSession, params: CallToolParams) -> CallToolResult {
        let CallToolParams { name, arguments } = params;

        let Some(handler) = self.tools.handler(&name) else {
            let available = self.tools.available_tool_names();
            tracing::warn!(tool = ?name, ?available, "unknown tool requested");
            return CallToolResult::error(format!(
                "Unknown tool: {name}. Available tools: [{}]",
                available.join(", ")
            ));
        };

        let arguments = arguments.unwrap_or_default();
        if let Err(e) = self.tools.validate_arguments(&name, &arguments) {
            tracing::info!(tool = %name, error = %e, "tool arguments rejected");
            return CallToolResult::error(e.to_string());
        }

        let context = ToolContext {
            tool_name: name.clone(),
            client_supports_ui: session.client_supports_ui(),
        };

        tracing::info!(tool = %name, ui = context.client_supports_ui, "calling tool");

        // The handler is invoked inside the guarded future so a panic while
        // building the future is caught too.
        let outcome = AssertUnwindSafe(async move { handler(context, arguments).await })
            .catch_unwind()
            .await;

        let mut result = match outcome {
            Ok(Ok(output)) => convert(output),
            Ok(Err(e)) => {
                tracing::warn!(tool = %name, error = %e, "tool execution failed");
                CallToolResult::error(format!("Tool execution error: {e}"))
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                tracing::error!(tool = %name, panic = %message, "tool handler panicked");
                CallToolResult::error(format!("Tool execution error: tool panicked: {message}"))
            }
        };

        if result.structured_content.is_some() && !self.structured_content_allowed(session) {
            tracing::debug!(tool = %name, "dropping structuredContent for non-UI client");
            result.structured_content = None;
        }

        tracing::debug!(
            tool = %name,
            is_error = result.is_error,
            blocks = result.content.len(),
            structured = result.structured_content.is_some(),
            "tool call completed"
        );
        result
    }

    fn structured_content_allowed(&self, session: &ProtocolSession) -> bool {
        session.client_supports_ui() || self.detector.is_forced()
    }

    fn handle_resources_read(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let params: ReadResourceParams = parse_params(params, "read resource")?;
        let contents = resources::read(&params.uri).ok_or_else(|| {
            tracing::warn!(uri = ?params.uri, "resource not found");
            RpcError::internal(format!("resource not found: {}", params.uri))
        })?;
        Ok(json!({ "contents": [contents] }))
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>, what: &str) -> Result<T, RpcError> {
    let params = params.ok_or_else(|| RpcError::internal(format!("invalid {what} params: missing params")))?;
    serde_json::from_value(params).map_err(|e| RpcError::internal(format!("invalid {what} params: {e}")))
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::internal(format!("failed to encode result: {e}")))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
