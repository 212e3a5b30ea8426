use serde::Deserialize;
use serde_json::{Value, json};

use super::{parse_args, present};
use crate::core::functions::FunctionError;
use crate::core::series::{AggregationContext, Reduction, Series, StoreError, Ttl, unix_now};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum Period {
    Range { from: Option<f64>, to: Option<f64> },
    Trailing(f64),
}

impl Period {
    /// Inclusive `(start, end)` bounds, relative to `now`.
    fn bounds(self, now: i64) -> (Option<i64>, Option<i64>) {
        match self {
            Period::Range { from, to } => (from.map(|f| f as i64), to.map(|t| t as i64)),
            Period::Trailing(seconds) => (Some(now.saturating_sub(seconds as i64)), Some(now)),
        }
    }
}

#[derive(Deserialize)]
struct PushArgs {
    series: String,
    value: f64,
    ts: Option<f64>,
    ttl: Option<i64>,
}

pub(super) fn push(ctx: &mut AggregationContext, argument: Value) -> Result<Value, FunctionError> {
    let args: PushArgs = parse_args("$push", argument)?;
    let series = Series::get_or_create(ctx, &args.series, args.ttl.map(Ttl::from_seconds))?;
    series.push(ctx, args.ts.map(|ts| ts as i64), args.value)?;
    Ok(Value::Null)
}

#[derive(Deserialize)]
struct PopArgs {
    series: String,
    #[serde(default = "default_true")]
    delete: bool,
}

pub(super) fn pop(ctx: &mut AggregationContext, argument: Value) -> Result<Value, FunctionError> {
    let args: PopArgs = parse_args("$pop", argument)?;
    let series = Series::get_or_create(ctx, &args.series, None)?;
    match series.pop(ctx, args.delete) {
        Ok(point) => Ok(serde_json::to_value(point)?),
        Err(StoreError::NotFound(_)) => Ok(json!({})),
        Err(e) => Err(e.into()),
    }
}

#[derive(Deserialize)]
struct LastArgs {
    series: String,
    #[serde(default, deserialize_with = "present")]
    default: Option<Value>,
}

pub(super) fn last(ctx: &mut AggregationContext, argument: Value) -> Result<Value, FunctionError> {
    let args: LastArgs = parse_args("$last", argument)?;
    let series = Series::get_or_create(ctx, &args.series, None)?;
    match series.last(ctx) {
        Ok(point) => Ok(serde_json::to_value(point)?),
        Err(StoreError::NotFound(_)) => Ok(args.default.unwrap_or_else(|| json!({}))),
        Err(e) => Err(e.into()),
    }
}

#[derive(Deserialize)]
struct ComputeArgs {
    series: String,
    op: Reduction,
    period: Option<Period>,
    #[serde(default, deserialize_with = "present")]
    default: Option<Value>,
}

pub(super) fn compute(ctx: &mut AggregationContext, argument: Value) -> Result<Value, FunctionError> {
    let args: ComputeArgs = parse_args("$compute", argument)?;
    let series = Series::get_or_create(ctx, &args.series, None)?;
    let (start, end) = args
        .period
        .map_or((None, None), |period| period.bounds(unix_now()));

    match series.compute(ctx, args.op, start, end) {
        Ok(value) => Ok(json!(value)),
        Err(StoreError::NotFound(name)) => args.default.ok_or_else(|| {
            FunctionError::Invalid(format!(
                "$compute: no points in series `{}` for {}, and no default value defined.",
                name, args.op
            ))
        }),
        Err(e) => Err(e.into()),
    }
}

#[derive(Deserialize)]
struct AggregateArgs {
    series: String,
    op: Reduction,
    interval: f64,
    count: f64,
    period: Option<Period>,
}

/// An explicit range moves the window to end at `to`; any period also drops
/// points before its start.
pub(super) fn aggregate(
    ctx: &mut AggregationContext,
    argument: Value,
) -> Result<Value, FunctionError> {
    let args: AggregateArgs = parse_args("$aggregate", argument)?;
    let series = Series::get_or_create(ctx, &args.series, None)?;

    let now = unix_now();
    let (not_before, reference) = match args.period {
        Some(period) => {
            let (start, end) = period.bounds(now);
            (start, end.unwrap_or(now))
        }
        None => (None, now),
    };

    let buckets = series.aggregate_at(
        ctx,
        args.op,
        args.interval as i64,
        args.count as i64,
        reference,
        not_before,
    )?;
    Ok(serde_json::to_value(buckets)?)
}
