use serde::Deserialize;
use serde_json::Value;

use super::{parse_args, present};
use crate::core::functions::FunctionError;
use crate::core::series::AggregationContext;

#[derive(Deserialize)]
struct PickArgs {
    prop: String,
    from: Value,
    #[serde(default, deserialize_with = "present")]
    default: Option<Value>,
}

fn property(value: &Value, prop: &str) -> Option<Value> {
    value.as_object().and_then(|map| map.get(prop)).cloned()
}

pub(super) fn pick(_ctx: &mut AggregationContext, argument: Value) -> Result<Value, FunctionError> {
    let PickArgs { prop, from, default } = parse_args("$pick", argument)?;

    match &from {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                property(item, &prop).or_else(|| default.clone()).ok_or_else(|| {
                    FunctionError::Invalid(format!(
                        "Property `{}` not found at index {}, and no default value defined.",
                        prop, index
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => property(other, &prop).or(default).ok_or_else(|| {
            FunctionError::Invalid(format!(
                "Property `{}` not found in {}, and no default value defined.",
                prop, other
            ))
        }),
    }
}
