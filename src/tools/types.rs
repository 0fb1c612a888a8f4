// Tool descriptors as advertised by `tools/list`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{MatrixError, Result};

/// Schema key naming the field that free text should land in
pub const DEFAULT_INPUT_HINT: &str = "x-default-input";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolDescriptor {
    pub fn new(name: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            input_schema,
        }
    }

    pub fn properties(&self) -> Option<&Map<String, Value>> {
        schema_properties(&self.input_schema)
    }

    pub fn required(&self) -> Vec<&str> {
        schema_required(&self.input_schema)
    }
}

pub fn schema_properties(schema: &Value) -> Option<&Map<String, Value>> {
    schema.get("properties").and_then(Value::as_object)
}

pub fn schema_required(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Field named by `x-default-input`, either as a schema-level string or as
/// `true` on one property
pub fn schema_default_input(schema: &Value) -> Option<String> {
    let properties = schema_properties(schema)?;
    if let Some(name) = schema.get(DEFAULT_INPUT_HINT).and_then(Value::as_str) {
        if properties.contains_key(name) {
            return Some(name.to_string());
        }
    }
    properties
        .iter()
        .find(|(_, prop)| prop.get(DEFAULT_INPUT_HINT).and_then(Value::as_bool) == Some(true))
        .map(|(name, _)| name.clone())
}

/// Exact name, else a unique case-insensitive match
pub fn find_tool<'a>(tools: &'a [ToolDescriptor], name: &str) -> Result<&'a ToolDescriptor> {
    if let Some(tool) = tools.iter().find(|t| t.name == name) {
        return Ok(tool);
    }

    let folded: Vec<_> = tools
        .iter()
        .filter(|t| t.name.eq_ignore_ascii_case(name))
        .collect();
    match folded.as_slice() {
        [only] => Ok(*only),
        _ => Err(MatrixError::UnknownTool {
            tool: name.to_string(),
            available: tools.iter().map(|t| t.name.clone()).collect(),
        }),
    }
}
