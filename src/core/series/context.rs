use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::Connection;

use super::{SeriesStore, StoreError, Ttl};

const LOG_PREFIX: &str = "Data Manager -> ";

/// A scoped unit of work against the store.
///
/// Releasing the context (drop or [`AggregationContext::close`]) commits an
/// open transaction, or rolls it back if [`AggregationContext::set_error`] was
/// called. Series created inside a transaction become visible to other
/// contexts' cache only once it commits.
pub struct AggregationContext {
    store: Arc<SeriesStore>,
    conn: Connection,
    in_transaction: bool,
    has_error: bool,
    pending: HashMap<String, Ttl>,
}

impl AggregationContext {
    pub(crate) fn new(store: Arc<SeriesStore>, conn: Connection) -> Self {
        Self {
            store,
            conn,
            in_transaction: false,
            has_error: false,
            pending: HashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<SeriesStore> {
        &self.store
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn begin(&mut self) -> Result<(), StoreError> {
        if self.in_transaction {
            return Ok(());
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.in_transaction = true;
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn set_error(&mut self) {
        self.has_error = true;
    }

    pub fn has_error(&self) -> bool {
        self.has_error
    }

    pub fn log(&self, message: impl AsRef<str>) {
        self.store
            .events()
            .log(format!("{}{}", LOG_PREFIX, message.as_ref()));
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.store
            .events()
            .debug(format!("{}{}", LOG_PREFIX, message.as_ref()));
    }

    pub(crate) fn known_ttl(&self, name: &str) -> Option<Ttl> {
        self.pending
            .get(name)
            .copied()
            .or_else(|| self.store.cached_ttl(name))
    }

    pub(crate) fn record_series(&mut self, name: &str, ttl: Ttl) {
        if self.in_transaction {
            self.pending.insert(name.to_string(), ttl);
        } else {
            self.store.remember([(name.to_string(), ttl)]);
        }
    }

    /// Releases the context and reports a failed commit to the caller.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;

        if self.has_error {
            self.pending.clear();
            self.debug("Rolling back transaction");
            self.conn.execute_batch("ROLLBACK")?;
            return Ok(());
        }

        match self.conn.execute_batch("COMMIT") {
            Ok(()) => {
                self.store.remember(self.pending.drain());
                Ok(())
            }
            Err(e) => {
                self.pending.clear();
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e.into())
            }
        }
    }
}

impl Drop for AggregationContext {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            self.store
                .events()
                .error(format!("{}Unable to release context: {}", LOG_PREFIX, e));
        }
    }
}
