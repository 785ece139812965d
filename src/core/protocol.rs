/// Protocol Types
///
/// JSON-RPC 2.0 envelope structures and the subset of MCP message types this
/// server speaks. Field names follow the MCP wire format (camelCase, `_meta`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::RpcError;

/// MCP protocol version this server implements. Also the minimum version a
/// client may negotiate.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// MIME type identifying an MCP Apps UI resource.
pub const UI_MIME_TYPE: &str = "text/html;profile=mcp-app";

/// Client capability extension key announcing MCP Apps UI support.
pub const UI_EXTENSION_KEY: &str = "io.modelcontextprotocol/ui";

/// Longest string request id accepted.
const MAX_STRING_ID_LEN: usize = 64;

/// JSON-RPC 2.0 request structure for MCP protocol.
///
/// All MCP requests follow the JSON-RPC 2.0 specification. The jsonrpc field
/// should be "2.0", id is optional (None for notifications), method specifies
/// the MCP method to call, and params contains method-specific parameters.
#[derive(Deserialize, Debug, Clone)]
pub struct MCPRequest {
    /// JSON-RPC version identifier. Not enforced.
    #[serde(default)]
    pub jsonrpc: String,
    /// Request ID for correlating responses. JSON null and absent both map to None.
    #[serde(default)]
    pub id: Option<Value>,
    /// MCP method name (e.g., "initialize", "tools/list", "tools/call")
    pub method: String,
    /// Method-specific parameters as JSON value
    #[serde(default)]
    pub params: Option<Value>,
}

impl MCPRequest {
    /// Whether the method is fire-and-forget (`notifications/...`).
    pub fn is_notification(&self) -> bool {
        self.method.starts_with("notifications/")
    }
}

/// JSON-RPC 2.0 response structure for MCP protocol.
///
/// Responses always include jsonrpc "2.0" and the request id (null when the
/// request id could not be trusted), and exactly one of result or error.
#[derive(Serialize, Debug, Clone)]
pub struct MCPResponse {
    /// JSON-RPC version identifier, always "2.0"
    pub jsonrpc: String,
    /// Request ID from the original request
    pub id: Option<Value>,
    /// Response result, present when request succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error information, present when request failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl MCPResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Checks that a method name contains only ASCII letters, digits and forward
/// slashes. Method names are logged, so control characters must never get
/// through.
pub fn is_valid_method(method: &str) -> bool {
    method.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'/')
}

/// Checks a request id: a JSON number, or a string of 1 to 64 printable ASCII
/// characters. Null and every other JSON type are rejected.
pub fn is_valid_id(id: &Value) -> bool {
    match id {
        Value::Number(_) => true,
        Value::String(s) => {
            !s.is_empty()
                && s.len() <= MAX_STRING_ID_LEN
                && s.bytes().all(|b| (0x20..=0x7e).contains(&b))
        }
        _ => false,
    }
}

/// Client or server identity exchanged during initialize.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Implementation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Capabilities announced by the client. Only `extensions` is inspected.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    #[serde(default)]
    pub client_info: Implementation,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    pub list_changed: bool,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    pub subscribe: bool,
    pub list_changed: bool,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptsCapability {
    pub list_changed: bool,
}

/// Static capability set advertised by the server.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
    pub resources: ResourcesCapability,
    pub prompts: PromptsCapability,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub instructions: String,
}

/// MCP tool descriptor as returned by `tools/list`.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Unique tool identifier (e.g., "pipeline-scan")
    pub name: String,
    /// Human-readable description of what the tool does
    pub description: String,
    /// JSON Schema defining the tool's input parameters
    pub input_schema: Value,
    /// UI hints; only present for UI-capable sessions
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Map<String, Value>>,
}

/// One block of tool output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Base64-encoded binary payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            mime_type: None,
            data: None,
        }
    }
}

/// Canonical `tools/call` result envelope.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<ContentBlock>,
    pub is_error: bool,
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Map<String, Value>>,
}

impl CallToolResult {
    /// Single text block, `isError: true`.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(message)],
            is_error: true,
            ..Self::default()
        }
    }

    /// Single text block, `isError: false`.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            ..Self::default()
        }
    }
}

/// Resource descriptor as returned by `resources/list`.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ReadResourceParams {
    pub uri: String,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_validation() {
        assert!(is_valid_method("tools/call"));
        assert!(is_valid_method("notifications/initialized"));
        assert!(!is_valid_method("tools/call\r\nINFO forged"));
        assert!(!is_valid_method("tools_call"));
        assert!(!is_valid_method("tools/call "));
        assert!(!is_valid_method("tools/call\u{b2}"));
        assert!(!is_valid_method("tools/\u{216b}"));
        assert!(!is_valid_method("r\u{e9}sum\u{e9}"));
    }

    #[test]
    fn test_id_validation() {
        assert!(is_valid_id(&json!(1)));
        assert!(is_valid_id(&json!(-3.5)));
        assert!(is_valid_id(&json!("req-1")));
        assert!(is_valid_id(&json!("a".repeat(64))));

        assert!(!is_valid_id(&json!(null)));
        assert!(!is_valid_id(&json!("")));
        assert!(!is_valid_id(&json!("a".repeat(65))));
        assert!(!is_valid_id(&json!("caf\u{e9}")));
        assert!(!is_valid_id(&json!("tab\there")));
        assert!(!is_valid_id(&json!(true)));
        assert!(!is_valid_id(&json!({"nested": 1})));
        assert!(!is_valid_id(&json!([1])));
    }

    #[test]
    fn test_null_and_absent_id_both_deserialize_to_none() {
        let with_null: MCPRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": null, "method": "ping"})).unwrap();
        let absent: MCPRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "ping"})).unwrap();
        assert!(with_null.id.is_none());
        assert!(absent.id.is_none());
    }

    #[test]
    fn test_response_serializes_null_id() {
        let resp = MCPResponse::failure(None, RpcError::invalid_request("bad id"));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["id"], Value::Null);
        assert!(json.get("result").is_none());
        assert_eq!(json["error"]["code"], -32600);
    }

    #[test]
    fn test_call_tool_result_wire_shape() {
        let mut result = CallToolResult::text("hello");
        result.structured_content = Some(Map::new());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["content"][0], json!({"type": "text", "text": "hello"}));
        assert_eq!(json["isError"], false);
        assert_eq!(json["structuredContent"], json!({}));
        assert!(json.get("_meta").is_none());
    }
}
