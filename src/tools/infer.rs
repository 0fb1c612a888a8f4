// Argument inference
//
// Turns free text, a file path, or key=value pairs into a tools/call
// payload using the tool's input schema. Raw JSON passes through untouched.

use serde_json::{Map, Number, Value};

use super::types::{find_tool, schema_default_input, schema_properties, schema_required, ToolDescriptor};
use crate::errors::{MatrixError, Result};

/// Field names free text lands in, in order of preference
const TEXT_FIELDS: &[&str] = &[
    "query", "prompt", "input", "text", "question", "message", "q", "content",
];

/// Field names a file path lands in, in order of preference
const PATH_FIELDS: &[&str] = &[
    "path",
    "file_path",
    "filepath",
    "file",
    "filename",
    "input_path",
    "document",
];

/// What the caller handed us
#[derive(Debug, Clone, Default)]
pub struct CallInput {
    pub text: Option<String>,
    pub kv: Vec<(String, String)>,
    pub path: Option<String>,
    /// Full JSON payload; skips inference
    pub raw_args: Option<String>,
}

impl CallInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.kv.is_empty() && self.path.is_none() && self.raw_args.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl FieldKind {
    fn of(property: &Value) -> Self {
        let declared = match property.get("type") {
            Some(Value::String(t)) => Some(t.as_str()),
            // ["string", "null"]
            Some(Value::Array(types)) => types
                .iter()
                .filter_map(Value::as_str)
                .find(|t| *t != "null"),
            _ => None,
        };
        match declared {
            Some("string") => FieldKind::String,
            Some("integer") => FieldKind::Integer,
            Some("number") => FieldKind::Number,
            Some("boolean") => FieldKind::Boolean,
            Some("array") => FieldKind::Array,
            Some("object") => FieldKind::Object,
            _ => FieldKind::Any,
        }
    }

    fn takes_text(self) -> bool {
        matches!(self, FieldKind::String | FieldKind::Any)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// Input schema classified once per call
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaShape {
    /// No properties at all
    NoInput,
    /// Exactly one property, a required string
    SingleRequiredString(String),
    Fields {
        fields: Vec<FieldSpec>,
        hint: Option<String>,
    },
}

impl SchemaShape {
    pub fn classify(schema: &Value) -> Self {
        let properties = match schema_properties(schema) {
            Some(props) if !props.is_empty() => props,
            _ => return SchemaShape::NoInput,
        };
        let required = schema_required(schema);

        let fields: Vec<FieldSpec> = properties
            .iter()
            .map(|(name, prop)| FieldSpec {
                name: name.clone(),
                kind: FieldKind::of(prop),
                required: required.contains(&name.as_str()),
            })
            .collect();

        if let [only] = fields.as_slice() {
            if only.required && only.kind == FieldKind::String {
                return SchemaShape::SingleRequiredString(only.name.clone());
            }
        }

        SchemaShape::Fields {
            fields,
            hint: schema_default_input(schema),
        }
    }

    fn field(&self, name: &str) -> Option<FieldKind> {
        match self {
            SchemaShape::NoInput => None,
            SchemaShape::SingleRequiredString(only) => (only == name).then_some(FieldKind::String),
            SchemaShape::Fields { fields, .. } => {
                fields.iter().find(|f| f.name == name).map(|f| f.kind)
            }
        }
    }

    /// Where free text goes
    fn text_field(&self) -> std::result::Result<String, String> {
        let (fields, hint) = match self {
            SchemaShape::NoInput => return Err("the tool takes no input".to_string()),
            SchemaShape::SingleRequiredString(only) => return Ok(only.clone()),
            SchemaShape::Fields { fields, hint } => (fields, hint),
        };

        if let Some(hint) = hint {
            return Ok(hint.clone());
        }
        if let Some(preferred) = preferred_field(fields, TEXT_FIELDS) {
            return Ok(preferred);
        }

        let required_strings: Vec<_> = fields
            .iter()
            .filter(|f| f.required && f.kind == FieldKind::String)
            .collect();
        if let [only] = required_strings.as_slice() {
            return Ok(only.name.clone());
        }

        let strings: Vec<_> = fields
            .iter()
            .filter(|f| f.kind == FieldKind::String)
            .collect();
        match strings.as_slice() {
            [only] => Ok(only.name.clone()),
            [] => Err("no string field to put the text in".to_string()),
            many => Err(format!(
                "{} string fields ({}) and none is marked as the default input",
                many.len(),
                many.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(", ")
            )),
        }
    }

    /// Where a file path goes
    fn path_field(&self) -> std::result::Result<String, String> {
        if let SchemaShape::Fields { fields, .. } = self {
            if let Some(preferred) = preferred_field(fields, PATH_FIELDS) {
                return Ok(preferred);
            }
        }
        self.text_field()
    }
}

fn preferred_field(fields: &[FieldSpec], preference: &[&str]) -> Option<String> {
    preference.iter().find_map(|wanted| {
        fields
            .iter()
            .find(|f| f.name == *wanted && f.kind.takes_text())
            .map(|f| f.name.clone())
    })
}

/// Build the `arguments` object for one call
pub fn infer(schema: &Value, input: &CallInput) -> Result<Value> {
    if let Some(raw) = &input.raw_args {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| MatrixError::InvalidArguments(format!("--args is not valid JSON: {}", e)))?;
        if !value.is_object() {
            return Err(MatrixError::InvalidArguments(
                "--args must be a JSON object".to_string(),
            ));
        }
        return Ok(value);
    }

    let shape = SchemaShape::classify(schema);
    let mut payload = Map::new();

    for (key, raw) in &input.kv {
        let kind = shape.field(key).unwrap_or(FieldKind::String);
        payload.insert(key.clone(), coerce(key, raw, kind)?);
    }

    if let Some(path) = &input.path {
        let field = shape.path_field().map_err(|detail| MatrixError::AmbiguousInput {
            strategy: "path".to_string(),
            detail,
        })?;
        payload
            .entry(field)
            .or_insert_with(|| Value::String(path.clone()));
    }

    if let Some(text) = &input.text {
        let field = shape.text_field().map_err(|detail| MatrixError::AmbiguousInput {
            strategy: "text".to_string(),
            detail,
        })?;
        payload
            .entry(field)
            .or_insert_with(|| Value::String(text.clone()));
    }

    Ok(Value::Object(payload))
}

fn coerce(key: &str, raw: &str, kind: FieldKind) -> Result<Value> {
    let bad = |expected: &str| {
        MatrixError::InvalidArguments(format!("'{}' expects {}, got '{}'", key, expected, raw))
    };

    match kind {
        FieldKind::String | FieldKind::Any => Ok(Value::String(raw.to_string())),
        FieldKind::Integer => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| bad("an integer")),
        FieldKind::Number => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| bad("a number")),
        FieldKind::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(bad("a boolean")),
        },
        FieldKind::Array if raw.trim_start().starts_with('[') => {
            serde_json::from_str::<Value>(raw).map_err(|_| bad("a JSON array"))
        }
        FieldKind::Array => Ok(Value::Array(
            raw.split(',')
                .map(|item| Value::String(item.trim().to_string()))
                .collect(),
        )),
        FieldKind::Object => match serde_json::from_str::<Value>(raw) {
            Ok(value @ Value::Object(_)) => Ok(value),
            _ => Err(bad("a JSON object")),
        },
    }
}

/// Pick the tool for a one-shot task and build its arguments
///
/// An explicit tool wins. Otherwise a server with a single tool gets it, and
/// a server with several must have exactly one tool whose schema can take
/// the input. When several accept it, the tools the runner descriptor
/// declares (`hints`) break the tie.
pub fn plan_call(
    tools: &[ToolDescriptor],
    tool: Option<&str>,
    hints: &[String],
    input: &CallInput,
) -> Result<(String, Value)> {
    if let Some(name) = tool {
        let chosen = find_tool(tools, name)?;
        return Ok((chosen.name.clone(), infer(&chosen.input_schema, input)?));
    }

    match tools {
        [] => Err(MatrixError::UnknownTool {
            tool: "<any>".to_string(),
            available: Vec::new(),
        }),
        [only] => Ok((only.name.clone(), infer(&only.input_schema, input)?)),
        many => {
            let mut accepting: Vec<(String, Value)> = many
                .iter()
                .filter(|t| !matches!(SchemaShape::classify(&t.input_schema), SchemaShape::NoInput))
                .filter_map(|t| {
                    infer(&t.input_schema, input)
                        .ok()
                        .map(|args| (t.name.clone(), args))
                })
                .collect();

            if accepting.len() > 1 {
                let hinted: Vec<(String, Value)> = accepting
                    .iter()
                    .filter(|(name, _)| hints.iter().any(|h| h.eq_ignore_ascii_case(name)))
                    .cloned()
                    .collect();
                if hinted.len() == 1 {
                    accepting = hinted;
                }
            }

            match <[_; 1]>::try_from(accepting) {
                Ok([chosen]) => Ok(chosen),
                Err(accepting) => Err(MatrixError::AmbiguousInput {
                    strategy: "tool selection".to_string(),
                    detail: if accepting.is_empty() {
                        format!("none of {} tools accepts this input", many.len())
                    } else {
                        format!(
                            "{} tools accept this input ({}); name one with --tool",
                            accepting.len(),
                            accepting
                                .iter()
                                .map(|(name, _)| name.as_str())
                                .collect::<Vec<_>>()
                                .join(", ")
                        )
                    },
                }),
            }
        }
    }
}
