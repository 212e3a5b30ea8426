mod builtins;
pub mod help;
pub mod schemas;

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::core::series::{AggregationContext, StoreError};

pub use schemas::{FunctionSchema, SchemaError};

/// Keys starting with this prefix mark a function call.
pub const FUNCTION_PREFIX: char = '$';

/// Receives the already evaluated argument.
pub type Handler = fn(&mut AggregationContext, Value) -> Result<Value, FunctionError>;

#[derive(Debug, thiserror::Error)]
pub enum FunctionError {
    #[error("Function calls must contain a single property.")]
    MultipleCalls,

    #[error("Function `{0}` not found.")]
    NotFound(String),

    #[error("In expression {{{function}: {payload}}}: {}", .violations.join(" - "))]
    Validation {
        function: String,
        payload: String,
        violations: Vec<String>,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("Invalid arguments for {function}: {source}")]
    Arguments {
        function: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

struct Function {
    handler: Handler,
    schema: FunctionSchema,
}

/// The table of `$`-functions available to expressions.
pub struct FunctionRegistry {
    functions: BTreeMap<String, Function>,
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Result<Self, SchemaError> {
        let mut registry = Self::empty();
        builtins::register_all(&mut registry)?;
        Ok(registry)
    }

    /// Registers `handler` under `name`, compiling the schema bundled for it.
    pub fn register(&mut self, name: &str, handler: Handler) -> Result<(), SchemaError> {
        let schema = FunctionSchema::load(name)?;
        self.functions
            .insert(name.to_string(), Function { handler, schema });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn schema(&self, name: &str) -> Option<&FunctionSchema> {
        self.functions.get(name).map(|f| &f.schema)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &FunctionSchema> {
        self.functions.values().map(|f| &f.schema)
    }

    /// Evaluates an expression tree into a new tree.
    ///
    /// Arguments are evaluated before their call, so calls compose. The
    /// first failing call aborts the whole evaluation.
    pub fn evaluate(
        &self,
        ctx: &mut AggregationContext,
        value: &Value,
    ) -> Result<Value, FunctionError> {
        match value {
            Value::Object(map) => match function_call(map)? {
                Some((name, argument)) => {
                    let argument = self.evaluate(ctx, argument)?;
                    self.invoke(ctx, name, argument)
                }
                None => {
                    let mut out = Map::with_capacity(map.len());
                    for (key, child) in map {
                        out.insert(key.clone(), self.evaluate(ctx, child)?);
                    }
                    Ok(Value::Object(out))
                }
            },
            Value::Array(items) => items
                .iter()
                .map(|item| self.evaluate(ctx, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            scalar => Ok(scalar.clone()),
        }
    }

    fn invoke(
        &self,
        ctx: &mut AggregationContext,
        name: &str,
        argument: Value,
    ) -> Result<Value, FunctionError> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| FunctionError::NotFound(name.to_string()))?;

        let violations = function.schema.violations(&argument);
        if !violations.is_empty() {
            return Err(FunctionError::Validation {
                function: name.to_string(),
                payload: serde_json::to_string(&argument)?,
                violations,
            });
        }

        (function.handler)(ctx, argument)
    }
}

/// Splits a call object into its name and argument.
///
/// `None` means the object is structural. A `$` key next to any other key is
/// rejected before anything is evaluated.
fn function_call(map: &Map<String, Value>) -> Result<Option<(&str, &Value)>, FunctionError> {
    let mut calls = map.iter().filter(|(key, _)| key.starts_with(FUNCTION_PREFIX));
    let Some((name, argument)) = calls.next() else {
        return Ok(None);
    };
    if calls.next().is_some() || map.len() > 1 {
        return Err(FunctionError::MultipleCalls);
    }
    Ok(Some((name.as_str(), argument)))
}
