mod arithmetic;
mod pick;
mod series;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::{FunctionError, FunctionRegistry, SchemaError};

pub(super) fn register_all(registry: &mut FunctionRegistry) -> Result<(), SchemaError> {
    registry.register("$add", arithmetic::add)?;
    registry.register("$pick", pick::pick)?;
    registry.register("$push", series::push)?;
    registry.register("$pop", series::pop)?;
    registry.register("$last", series::last)?;
    registry.register("$compute", series::compute)?;
    registry.register("$aggregate", series::aggregate)?;
    Ok(())
}

fn parse_args<T: DeserializeOwned>(function: &'static str, argument: Value) -> Result<T, FunctionError> {
    serde_json::from_value(argument).map_err(|source| FunctionError::Arguments { function, source })
}

/// Distinguishes an explicit `null` from an absent key.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
