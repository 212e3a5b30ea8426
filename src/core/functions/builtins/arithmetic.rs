use serde::Deserialize;
use serde_json::{Number, Value};

use super::parse_args;
use crate::core::functions::FunctionError;
use crate::core::series::AggregationContext;

#[derive(Deserialize)]
struct Operands {
    left: Number,
    right: Number,
}

/// Integer operands stay integers unless the sum overflows.
pub(super) fn add(_ctx: &mut AggregationContext, argument: Value) -> Result<Value, FunctionError> {
    let Operands { left, right } = parse_args("$add", argument)?;

    if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64())
        && let Some(sum) = l.checked_add(r)
    {
        return Ok(Value::from(sum));
    }

    let sum = left.as_f64().unwrap_or_default() + right.as_f64().unwrap_or_default();
    Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(|| FunctionError::Invalid(format!("$add produced a non-finite result ({sum})")))
}
