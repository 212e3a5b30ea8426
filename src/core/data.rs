use std::sync::Arc;

use serde_json::Value;

use crate::core::functions::{FunctionError, FunctionRegistry};
use crate::core::series::{AggregationContext, SeriesStore};

/// The series store and function table, shared by every job.
pub struct DataLayer {
    store: Arc<SeriesStore>,
    functions: Arc<FunctionRegistry>,
}

impl DataLayer {
    pub fn new(store: Arc<SeriesStore>, functions: Arc<FunctionRegistry>) -> Self {
        Self { store, functions }
    }

    pub fn store(&self) -> &Arc<SeriesStore> {
        &self.store
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Runs `work` as one transaction: every write lands, or none does.
    pub fn with_context<T, F>(&self, work: F) -> Result<T, FunctionError>
    where
        F: FnOnce(&mut AggregationContext, &FunctionRegistry) -> Result<T, FunctionError>,
    {
        let mut ctx = self.store.context()?;
        ctx.begin()?;
        match work(&mut ctx, &self.functions) {
            Ok(value) => {
                ctx.close()?;
                Ok(value)
            }
            Err(e) => {
                ctx.set_error();
                ctx.debug(format!("Evaluation failed: {}", e));
                Err(e)
            }
        }
    }

    pub fn evaluate(&self, expression: &Value) -> Result<Value, FunctionError> {
        self.with_context(|ctx, functions| functions.evaluate(ctx, expression))
    }
}
