//! Tool schema translation per backend dialect
//!
//! Pure functions; every rule is a table below.

use serde_json::{json, Map, Value};

use crate::types::{empty_object_schema, ProviderKind, ToolDescriptor};

/// Keys the Gemini function-declaration schema accepts
const GEMINI_KEYS: [&str; 6] = ["type", "properties", "required", "description", "items", "enum"];

/// Type names Gemini understands
const GEMINI_TYPES: [&str; 6] = ["object", "string", "number", "integer", "boolean", "array"];

/// Annotation keys dropped for OpenAPI-compatible backends
const STRIPPED_KEYS: [&str; 3] = ["$schema", "$id", "$comment"];

/// Schema flavor a backend accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaDialect {
    /// Restricted OpenAPI subset with a closed type set
    Gemini,
    /// JSON Schema as published, minus annotations (Ollama, OpenAI, Anthropic)
    OpenApiCompatible,
}

impl SchemaDialect {
    pub fn for_provider(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Gemini => SchemaDialect::Gemini,
            _ => SchemaDialect::OpenApiCompatible,
        }
    }
}

/// Translate a tool input schema into `dialect`
///
/// Anything that is not a non-empty JSON object becomes
/// `{"type":"object","properties":{}}`.
pub fn translate_schema(schema: &Value, dialect: SchemaDialect) -> Value {
    let Some(object) = schema.as_object().filter(|o| !o.is_empty()) else {
        return empty_object_schema();
    };

    match dialect {
        SchemaDialect::Gemini => gemini_root(object),
        SchemaDialect::OpenApiCompatible => openapi_root(object),
    }
}

fn gemini_type(value: Option<&Value>) -> &'static str {
    let name = match value {
        Some(Value::String(s)) => Some(s.to_lowercase()),
        // ["string", "null"] style unions: first non-null member
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_lowercase)
            .find(|s| s != "null"),
        _ => None,
    };

    name.and_then(|n| GEMINI_TYPES.iter().copied().find(|t| *t == n))
        .unwrap_or("object")
}

/// Function parameters must be an object with properties
fn gemini_root(schema: &Map<String, Value>) -> Value {
    let mut cleaned = gemini_object(schema);
    cleaned.insert("type".to_string(), json!("object"));
    cleaned.remove("items");
    cleaned.remove("enum");
    cleaned
        .entry("properties")
        .or_insert_with(|| json!({}));
    Value::Object(cleaned)
}

/// Translate a nested schema; anything but an object becomes a bare object
fn gemini_subschema(value: &Value) -> Value {
    match value {
        Value::Object(schema) => Value::Object(gemini_object(schema)),
        _ => json!({ "type": "object" }),
    }
}

fn gemini_object(schema: &Map<String, Value>) -> Map<String, Value> {
    let mut cleaned = Map::new();

    for key in GEMINI_KEYS {
        let Some(value) = schema.get(key) else {
            continue;
        };
        let translated = match (key, value) {
            ("type", _) => continue,
            ("properties", Value::Object(props)) => Value::Object(
                props
                    .iter()
                    .map(|(name, prop)| (name.clone(), gemini_subschema(prop)))
                    .collect(),
            ),
            // Tuple form: Gemini takes a single item schema
            ("items", Value::Array(items)) => items
                .iter()
                .find(|item| item.is_object())
                .map(gemini_subschema)
                .unwrap_or_else(|| json!({ "type": "object" })),
            ("items", items) => gemini_subschema(items),
            ("required" | "enum", Value::Array(_)) => value.clone(),
            ("description", Value::String(_)) => value.clone(),
            _ => continue,
        };
        cleaned.insert(key.to_string(), translated);
    }

    cleaned.insert(
        "type".to_string(),
        Value::String(gemini_type(schema.get("type")).to_string()),
    );
    cleaned
}

fn openapi_root(schema: &Map<String, Value>) -> Value {
    let mut cleaned: Map<String, Value> = schema
        .iter()
        .filter(|(k, _)| !STRIPPED_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if cleaned.get("type").and_then(Value::as_str) != Some("object") {
        cleaned.insert("type".to_string(), json!("object"));
    }
    if !cleaned.contains_key("properties") {
        cleaned.insert("properties".to_string(), json!({}));
    }

    Value::Object(cleaned)
}

/// `{name, description, parameters}` declaration for one tool
pub fn to_function_declaration(tool: &ToolDescriptor, dialect: SchemaDialect) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": translate_schema(&tool.input_schema, dialect),
    })
}
