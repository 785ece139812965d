/// Result Conversion
///
/// Tool handlers return a `ToolOutput`, a closed set of legal result shapes.
/// `convert` normalizes every shape into the canonical `CallToolResult`
/// envelope. The `Raw` variant keeps the loose map conventions older tools
/// rely on (`error`, `content`, `structuredContent`, `text` keys) so those
/// tools can still return plain JSON.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::protocol::{CallToolResult, ContentBlock};

/// Every shape a tool handler may return.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// A ready-made envelope, passed through unchanged.
    Envelope(CallToolResult),
    /// A business failure shown to the client as `isError: true` text.
    Error(String),
    /// Plain content blocks.
    Content(Vec<ContentBlock>),
    /// Content blocks plus a structured payload for UI-capable clients.
    Structured {
        content: Vec<ContentBlock>,
        structured: Value,
        meta: Option<Value>,
    },
    /// Untyped JSON, interpreted by its keys.
    Raw(Value),
}

impl ToolOutput {
    /// Single text block.
    pub fn text(text: impl Into<String>) -> Self {
        ToolOutput::Content(vec![ContentBlock::text(text)])
    }

    pub fn error(message: impl Into<String>) -> Self {
        ToolOutput::Error(message.into())
    }

    /// Content plus a typed payload. The payload is serialized to a generic
    /// JSON value here; a value that cannot be serialized turns the whole
    /// output into an error.
    pub fn structured<T: Serialize>(content: Vec<ContentBlock>, payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(structured) => ToolOutput::Structured {
                content,
                structured,
                meta: None,
            },
            Err(e) => ToolOutput::error(format!("failed to serialize structured content: {e}")),
        }
    }
}

impl From<CallToolResult> for ToolOutput {
    fn from(result: CallToolResult) -> Self {
        ToolOutput::Envelope(result)
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        ToolOutput::Raw(value)
    }
}

/// Normalizes a handler result into the wire envelope.
pub fn convert(output: ToolOutput) -> CallToolResult {
    match output {
        ToolOutput::Envelope(result) => result,
        ToolOutput::Error(message) => CallToolResult::error(message),
        ToolOutput::Content(content) => CallToolResult {
            content,
            ..CallToolResult::default()
        },
        ToolOutput::Structured {
            content,
            structured,
            meta,
        } => CallToolResult {
            content,
            is_error: false,
            meta,
            structured_content: structured_map(structured),
        },
        ToolOutput::Raw(value) => convert_raw(value),
    }
}

/// Interprets untyped output. Key priority: `error`, then `content` and
/// `structuredContent`, then `text`, then the whole value as JSON text.
fn convert_raw(value: Value) -> CallToolResult {
    let mut map = match value {
        Value::Object(map) => map,
        other => return serialized(&other),
    };

    if let Some(error) = map.get("error") {
        return CallToolResult::error(stringify(error));
    }

    let has_content = map.contains_key("content");
    let has_structured = map.contains_key("structuredContent");
    if has_content || has_structured {
        let content = match map.remove("content") {
            Some(Value::Array(blocks)) => blocks.into_iter().filter_map(content_block).collect(),
            Some(other) => {
                tracing::warn!(kind = json_kind(&other), "ignoring non-array content in tool result");
                Vec::new()
            }
            None => Vec::new(),
        };
        return CallToolResult {
            content,
            is_error: false,
            meta: map.remove("meta").or_else(|| map.remove("_meta")),
            structured_content: map.remove("structuredContent").and_then(structured_map),
        };
    }

    if let Some(Value::String(text)) = map.get("text") {
        return CallToolResult::text(text.clone());
    }

    serialized(&Value::Object(map))
}

/// Accepts `{type, text}` blocks as well as richer `{type, mimeType, data}`
/// blocks. A block without a type is treated as text.
fn content_block(entry: Value) -> Option<ContentBlock> {
    let Value::Object(block) = entry else {
        tracing::warn!("ignoring non-object content block in tool result");
        return None;
    };

    let field = |key: &str| block.get(key).and_then(Value::as_str).map(str::to_string);

    Some(ContentBlock {
        kind: field("type").unwrap_or_else(|| "text".to_string()),
        text: field("text"),
        mime_type: field("mimeType"),
        data: field("data"),
    })
}

/// Structured content must be a JSON object on the wire.
fn structured_map(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        Value::Null => None,
        other => {
            tracing::warn!(kind = json_kind(&other), "dropping non-object structuredContent");
            None
        }
    }
}

fn serialized(value: &Value) -> CallToolResult {
    match serde_json::to_string(value) {
        Ok(text) => CallToolResult::text(text),
        Err(e) => CallToolResult::error(format!("failed to serialize tool result: {e}")),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
