use include_dir::{Dir, include_dir};
use jsonschema::Validator;
use serde_json::{Map, Value};

static SCHEMA_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/src/core/functions/schemas");

/// Nesting limit for `$ref` chains; deeper chains are treated as cycles.
const MAX_REF_DEPTH: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Schema asset `{0}` not found")]
    Missing(String),

    #[error("Schema asset `{path}` is not valid JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Schema asset `{0}` must be a JSON object")]
    NotAnObject(String),

    #[error("Schema reference chain starting at `{0}` is too deep")]
    ReferenceCycle(String),

    #[error("Schema for {function} does not compile: {message}")]
    Compile { function: String, message: String },
}

/// Asset key for a function name, e.g. `$add` -> `json/add.json`.
pub fn asset_key(function: &str) -> String {
    format!("json/{}.json", function.trim_start_matches('$'))
}

/// Loads an asset and inlines its `$ref` entries.
///
/// A node carrying `$ref` is replaced by the referenced document, with the
/// node's own keys laid over it.
pub fn resolve_asset(path: &str) -> Result<Value, SchemaError> {
    resolve_asset_at(path, 0)
}

fn resolve_asset_at(path: &str, depth: usize) -> Result<Value, SchemaError> {
    if depth > MAX_REF_DEPTH {
        return Err(SchemaError::ReferenceCycle(path.to_string()));
    }
    let file = SCHEMA_DIR
        .get_file(path)
        .ok_or_else(|| SchemaError::Missing(path.to_string()))?;
    let raw: Value = serde_json::from_slice(file.contents()).map_err(|source| SchemaError::Parse {
        path: path.to_string(),
        source,
    })?;
    resolve_refs(raw, depth)
}

fn resolve_refs(value: Value, depth: usize) -> Result<Value, SchemaError> {
    match value {
        Value::Object(map) => resolve_object(map, depth),
        Value::Array(items) => items
            .into_iter()
            .map(|item| resolve_refs(item, depth))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other),
    }
}

fn resolve_object(mut map: Map<String, Value>, depth: usize) -> Result<Value, SchemaError> {
    let Some(Value::String(reference)) = map.remove("$ref") else {
        let mut out = Map::with_capacity(map.len());
        for (key, value) in map {
            out.insert(key, resolve_refs(value, depth)?);
        }
        return Ok(Value::Object(out));
    };

    let Value::Object(mut base) = resolve_asset_at(&reference, depth + 1)? else {
        return Err(SchemaError::NotAnObject(reference));
    };
    for (key, value) in map {
        base.insert(key, resolve_refs(value, depth)?);
    }
    Ok(Value::Object(base))
}

/// A compiled argument schema plus the help metadata stored alongside it.
pub struct FunctionSchema {
    name: String,
    document: Value,
    validator: Validator,
}

impl FunctionSchema {
    pub fn load(function: &str) -> Result<Self, SchemaError> {
        let path = asset_key(function);
        let document = resolve_asset(&path)?;
        if !document.is_object() {
            return Err(SchemaError::NotAnObject(path));
        }
        let validator =
            jsonschema::validator_for(&document).map_err(|e| SchemaError::Compile {
                function: function.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            name: function.to_string(),
            document,
            validator,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Every violation, in validator order.
    pub fn violations(&self, payload: &Value) -> Vec<String> {
        self.validator
            .iter_errors(payload)
            .map(|e| e.to_string())
            .collect()
    }

    pub fn title(&self) -> &str {
        self.text("title").unwrap_or(&self.name)
    }

    pub fn description(&self) -> &str {
        self.text("description").unwrap_or("No description available")
    }

    pub fn group(&self) -> &str {
        self.text("group").unwrap_or("Other")
    }

    pub fn returns(&self) -> Option<&Map<String, Value>> {
        self.document.get("return").and_then(Value::as_object)
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.document.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn references_are_inlined_with_local_overrides() {
        let push = resolve_asset("json/push.json").unwrap();
        let series = &push["properties"]["series"];

        assert!(series.get("$ref").is_none());
        assert_eq!(series["type"], "string");
        assert_eq!(series["pattern"], "^[A-Za-z_][A-Za-z0-9_]*$");
        assert_eq!(series["description"], "The series to append to");
    }

    #[test]
    fn nested_references_inside_arrays_resolve() {
        let aggregate = resolve_asset("json/aggregate.json").unwrap();
        let period = &aggregate["properties"]["period"];
        assert_eq!(period["oneOf"].as_array().unwrap().len(), 2);
        assert_eq!(aggregate["properties"]["op"]["enum"][0], "sum");
    }

    #[test]
    fn missing_asset_is_reported() {
        assert!(matches!(
            FunctionSchema::load("$nope"),
            Err(SchemaError::Missing(path)) if path == "json/nope.json"
        ));
    }

    #[test]
    fn violations_list_every_problem() {
        let schema = FunctionSchema::load("$add").unwrap();
        assert!(schema.violations(&json!({"left": 1, "right": 2})).is_empty());

        let problems = schema.violations(&json!({"left": "one", "extra": true}));
        assert!(problems.len() >= 3, "unexpected violations: {:?}", problems);
    }

    #[test]
    fn help_metadata_is_exposed() {
        let schema = FunctionSchema::load("$pick").unwrap();
        assert_eq!(schema.title(), "$pick");
        assert_eq!(schema.group(), "Objects");
        assert!(schema.returns().is_some());
    }
}
