/// Tool Schema Registry
///
/// Parses the tool schema document (the `tools.json` format) into immutable
/// tool definitions and converts them into MCP tool descriptors for
/// `tools/list`. Definitions are loaded once at startup and only read after
/// that.

use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::HashSet;

use crate::core::error::SchemaError;
use crate::core::protocol::Tool;

/// Declared parameter type.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    /// Any type this server does not map (emitted without a `type` key).
    #[serde(other)]
    Other,
}

/// Optional numeric bounds declared for a parameter.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ValidationRules {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParamDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub allowed_values: Vec<String>,
    #[serde(default)]
    pub validation: Option<ValidationRules>,
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub params: Vec<ParamDefinition>,
}

impl ToolDefinition {
    /// Builds the MCP tool descriptor.
    ///
    /// Required parameters are listed in declaration order. Integer and number
    /// parameters are both advertised as `number`, carrying their bounds as
    /// `minimum`/`maximum`. UI metadata is never attached here; the dispatcher
    /// adds it per session.
    pub fn to_protocol_tool(&self) -> Tool {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.params {
            properties.insert(param.name.clone(), param_schema(param));
            if param.is_required {
                required.push(Value::String(param.name.clone()));
            }
        }

        let mut input_schema = Map::new();
        input_schema.insert("type".to_string(), json!("object"));
        input_schema.insert("properties".to_string(), Value::Object(properties));
        if !required.is_empty() {
            input_schema.insert("required".to_string(), Value::Array(required));
        }

        Tool {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: Value::Object(input_schema),
            meta: None,
        }
    }
}

fn param_schema(param: &ParamDefinition) -> Value {
    let mut schema = Map::new();
    schema.insert("description".to_string(), json!(param.description));

    match param.param_type {
        ParamType::String => {
            schema.insert("type".to_string(), json!("string"));
            if !param.allowed_values.is_empty() {
                schema.insert("enum".to_string(), json!(param.allowed_values));
            }
        }
        ParamType::Number | ParamType::Integer => {
            schema.insert("type".to_string(), json!("number"));
            if let Some(rules) = &param.validation {
                if let Some(min) = rules.min {
                    schema.insert("minimum".to_string(), json!(min));
                }
                if let Some(max) = rules.max {
                    schema.insert("maximum".to_string(), json!(max));
                }
            }
        }
        ParamType::Boolean => {
            schema.insert("type".to_string(), json!("boolean"));
        }
        ParamType::Array => {
            schema.insert("type".to_string(), json!("array"));
            let mut items = Map::new();
            if let Some(item_type) = &param.item_type {
                items.insert("type".to_string(), json!(item_type));
            }
            if !param.allowed_values.is_empty() {
                items.insert("enum".to_string(), json!(param.allowed_values));
            }
            schema.insert("items".to_string(), Value::Object(items));
        }
        ParamType::Other => {}
    }

    Value::Object(schema)
}

#[derive(Deserialize)]
struct SchemaDocument {
    #[serde(default)]
    tools: Vec<ToolDefinition>,
}

/// Collection of all tool definitions, in document order.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl ToolRegistry {
    /// Parses a schema document. Fails on malformed JSON or duplicate names.
    pub fn load(schema: &[u8]) -> Result<Self, SchemaError> {
        let document: SchemaDocument = serde_json::from_slice(schema)?;

        let mut seen = HashSet::new();
        for tool in &document.tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(SchemaError::DuplicateTool(tool.name.clone()));
            }
            tracing::debug!(tool = %tool.name, category = %tool.category, params = tool.params.len(), "tool definition");
        }

        Ok(Self {
            tools: document.tools,
        })
    }

    /// Finds a definition by name. Misses are expected and are not errors.
    pub fn get_by_name(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// All definitions as MCP tool descriptors, in document order.
    pub fn protocol_tools(&self) -> Vec<Tool> {
        self.tools.iter().map(ToolDefinition::to_protocol_tool).collect()
    }
}
