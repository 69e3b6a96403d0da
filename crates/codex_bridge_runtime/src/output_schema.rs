use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tempfile::TempDir;

use crate::errors::CodexError;

pub const OUTPUT_SCHEMA_FILE_NAME: &str = "schema.json";
const JSON_PRIMITIVE_TYPES: [&str; 4] = ["string", "number", "integer", "boolean"];

/// Output schema staged on disk for one turn.
///
/// The staging directory is released by `cleanup` or on drop, whichever comes
/// first. Release failures are logged and never surface to the caller.
#[derive(Debug, Default)]
pub struct OutputSchemaFile {
    path: Option<PathBuf>,
    dir: Option<TempDir>,
}

impl OutputSchemaFile {
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_staged(&self) -> bool {
        self.dir.is_some()
    }

    /// Remove the staging directory. Idempotent.
    /// Side effects: filesystem removal. Complexity: O(1) files.
    pub fn cleanup(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let dir_path = dir.path().to_path_buf();
        if let Err(err) = dir.close() {
            tracing::warn!(
                path = %dir_path.display(),
                error = %err,
                "failed to remove output schema directory"
            );
        }
    }
}

impl Drop for OutputSchemaFile {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Write `schema` to `<fresh temp dir>/schema.json`.
/// `None` stages nothing and returns an empty handle.
/// Side effects: creates one directory and one file.
/// Allocation: serialized schema bytes. Complexity: O(schema size).
pub fn create_output_schema_file(schema: Option<&Value>) -> Result<OutputSchemaFile, CodexError> {
    let Some(schema) = schema else {
        return Ok(OutputSchemaFile::default());
    };
    if !schema.is_object() {
        return Err(CodexError::InvalidOutputSchema(
            "output_schema must be a plain JSON object".to_owned(),
        ));
    }

    let dir = tempfile::Builder::new()
        .prefix("codex-output-schema-")
        .tempdir()
        .map_err(|err| CodexError::Io(format!("failed to create schema directory: {err}")))?;
    let path = dir.path().join(OUTPUT_SCHEMA_FILE_NAME);
    // From here on the directory is owned by `staged`, so any early return removes it.
    let mut staged = OutputSchemaFile {
        path: None,
        dir: Some(dir),
    };

    let bytes = serde_json::to_vec(schema)
        .map_err(|err| CodexError::Internal(format!("failed to encode output schema: {err}")))?;
    std::fs::write(&path, bytes)
        .map_err(|err| CodexError::Io(format!("failed to write output schema: {err}")))?;

    staged.path = Some(path);
    Ok(staged)
}

/// Turn a user-facing schema option into the strict object schema the CLI expects.
///
/// Accepts either a raw JSON object schema or a descriptor:
/// `{title?, description?, properties: [{name, description?, schema}], required?}`
/// where each property schema is a primitive (`string|number|integer|boolean`,
/// optional string `enum`) or an `array` of those.
pub fn resolve_output_schema(option: &Value) -> Result<Value, CodexError> {
    let Some(object) = option.as_object() else {
        return Err(invalid("Codex output schema must be a JSON schema or descriptor."));
    };

    if looks_like_descriptor(object) {
        validate_descriptor(object)?;
        return Ok(build_descriptor_schema(object));
    }

    if let Some(kind) = object.get("type") {
        if kind != "object" {
            return Err(invalid(
                "Codex output schema must be a JSON object schema with type \"object\".",
            ));
        }
    }
    let mut schema = object.clone();
    schema
        .entry("type")
        .or_insert_with(|| Value::from("object"));
    schema
        .entry("properties")
        .or_insert_with(|| Value::Object(Map::new()));
    make_strict(&mut schema, "")?;
    Ok(Value::Object(schema))
}

/// Close every object schema in place: `additionalProperties: false` and
/// `required` listing every declared property. Recurses through
/// `properties`, `items`, `anyOf`, `allOf`, `$defs` and `definitions`.
/// Complexity: O(n), n = schema nodes.
fn make_strict(schema: &mut Map<String, Value>, path: &str) -> Result<(), CodexError> {
    let is_object = schema.get("type").and_then(Value::as_str) == Some("object")
        || schema.contains_key("properties");
    if is_object {
        match schema.get("additionalProperties") {
            None => {
                schema.insert("additionalProperties".to_owned(), Value::Bool(false));
            }
            Some(Value::Bool(false)) => {}
            Some(_) => {
                return Err(invalid(format!(
                    "Codex output schema object at \"{}\" must not allow additionalProperties.",
                    display_path(path)
                )))
            }
        }
    }

    if let Some(Value::Object(properties)) = schema.get_mut("properties") {
        let names: Vec<Value> = properties.keys().cloned().map(Value::from).collect();
        for (name, property) in properties.iter_mut() {
            strict_child(property, &format!("{path}/properties/{name}"))?;
        }
        schema.insert("required".to_owned(), Value::Array(names));
    }

    if let Some(items) = schema.get_mut("items") {
        strict_child(items, &format!("{path}/items"))?;
    }
    for key in ["anyOf", "allOf"] {
        if let Some(Value::Array(variants)) = schema.get_mut(key) {
            for (index, variant) in variants.iter_mut().enumerate() {
                strict_child(variant, &format!("{path}/{key}/{index}"))?;
            }
        }
    }
    for key in ["$defs", "definitions"] {
        if let Some(Value::Object(defs)) = schema.get_mut(key) {
            for (name, def) in defs.iter_mut() {
                strict_child(def, &format!("{path}/{key}/{name}"))?;
            }
        }
    }

    if schema.get("default") == Some(&Value::Null) {
        schema.remove("default");
    }
    Ok(())
}

fn strict_child(value: &mut Value, path: &str) -> Result<(), CodexError> {
    match value {
        Value::Object(child) => make_strict(child, path),
        _ => Ok(()),
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

fn looks_like_descriptor(option: &Map<String, Value>) -> bool {
    let Some(Value::Array(properties)) = option.get("properties") else {
        return false;
    };
    properties
        .iter()
        .all(|item| item.as_object().is_some_and(|prop| prop.contains_key("name")))
}

fn validate_descriptor(option: &Map<String, Value>) -> Result<(), CodexError> {
    let properties = match option.get("properties") {
        Some(Value::Array(properties)) if !properties.is_empty() => properties,
        _ => {
            return Err(invalid(
                "Codex output schema descriptor must include properties.",
            ))
        }
    };

    let mut seen = HashSet::with_capacity(properties.len());
    for prop in properties {
        let name = prop
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| invalid("Codex output schema properties must include non-empty names."))?;
        if !seen.insert(name) {
            return Err(invalid(format!(
                "Duplicate property name \"{name}\" in output_schema."
            )));
        }
        if !is_valid_field(prop.get("schema")) {
            return Err(invalid(format!(
                "Invalid schema for output property \"{name}\"."
            )));
        }
    }

    if let Some(required) = option.get("required") {
        let names = required
            .as_array()
            .and_then(|items| items.iter().map(Value::as_str).collect::<Option<Vec<_>>>())
            .ok_or_else(|| invalid("output_schema.required must be a list of strings."))?;
        if let Some(missing) = names.into_iter().find(|name| !seen.contains(name)) {
            return Err(invalid(format!(
                "Required property \"{missing}\" must also be defined in \"properties\"."
            )));
        }
    }

    Ok(())
}

fn is_valid_field(field: Option<&Value>) -> bool {
    let Some(field) = field.and_then(Value::as_object) else {
        return false;
    };
    match field.get("type").and_then(Value::as_str) {
        Some(kind) if JSON_PRIMITIVE_TYPES.contains(&kind) => match field.get("enum") {
            None => true,
            Some(Value::Array(values)) => values.iter().all(Value::is_string),
            Some(_) => false,
        },
        Some("array") => is_valid_field(field.get("items")),
        _ => false,
    }
}

/// Allocation: one Map per property. Complexity: O(p), p = property count.
fn build_descriptor_schema(descriptor: &Map<String, Value>) -> Value {
    let mut properties = Map::new();
    let declared = descriptor
        .get("properties")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for prop in declared {
        let Some(name) = prop.get("name").and_then(Value::as_str) else {
            continue;
        };
        let mut field = build_field(prop.get("schema"));
        if let Some(description) = non_empty_str(prop.get("description")) {
            field.insert("description".to_owned(), Value::from(description));
        }
        properties.insert(name.to_owned(), Value::Object(field));
    }

    let mut schema = Map::new();
    schema.insert("type".to_owned(), Value::from("object"));
    schema.insert("additionalProperties".to_owned(), Value::Bool(false));
    schema.insert("properties".to_owned(), Value::Object(properties));
    schema.insert(
        "required".to_owned(),
        descriptor
            .get("required")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new())),
    );
    for key in ["title", "description"] {
        if let Some(text) = non_empty_str(descriptor.get(key)) {
            schema.insert(key.to_owned(), Value::from(text));
        }
    }
    Value::Object(schema)
}

fn build_field(field: Option<&Value>) -> Map<String, Value> {
    let mut out = Map::new();
    let Some(field) = field.and_then(Value::as_object) else {
        return out;
    };
    let kind = field.get("type").cloned().unwrap_or(Value::Null);
    let is_array = kind == "array";
    out.insert("type".to_owned(), kind);
    if is_array {
        out.insert(
            "items".to_owned(),
            Value::Object(build_field(field.get("items"))),
        );
    }
    if let Some(description) = non_empty_str(field.get("description")) {
        out.insert("description".to_owned(), Value::from(description));
    }
    if !is_array {
        if let Some(values) = field.get("enum") {
            out.insert("enum".to_owned(), values.clone());
        }
    }
    out
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|text| !text.is_empty())
}

fn invalid(message: impl Into<String>) -> CodexError {
    CodexError::InvalidOutputSchema(message.into())
}
