mod context;
mod handle;
pub mod types;

pub use context::AggregationContext;
pub use handle::Series;
pub use types::{Bucket, NO_EXPIRY, Point, Reduction, StoreError, Ttl};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use regex::Regex;
use rusqlite::Connection;

use crate::logging::EventSender;

static SERIES_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("series name pattern"));

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on the buckets a single aggregation may return.
pub const MAX_BUCKETS: i64 = 10_000;

pub fn validate_series_name(name: &str) -> Result<(), StoreError> {
    if SERIES_NAME.is_match(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub(crate) fn table_name(series: &str) -> String {
    format!("series_{}", series)
}

/// The embedded store of named numeric series.
///
/// Every unit of work opens its own connection through [`SeriesStore::context`];
/// SQLite's file locking serializes concurrent writers. The only state shared
/// between contexts is the name to TTL cache.
pub struct SeriesStore {
    path: PathBuf,
    default_ttl: Ttl,
    events: EventSender,
    known: Mutex<HashMap<String, Ttl>>,
}

impl SeriesStore {
    pub fn open(
        path: impl AsRef<Path>,
        default_ttl: Ttl,
        events: EventSender,
    ) -> Result<Arc<Self>, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Directory {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let store = Self {
            path,
            default_ttl,
            events,
            known: Mutex::new(HashMap::new()),
        };

        let conn = store.connect()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS telemetry_metadata (
                name TEXT PRIMARY KEY,
                ttl INTEGER NOT NULL
            )",
            [],
        )?;
        store
            .events
            .debug(format!("Data Manager -> Using {}", store.path.display()));

        Ok(Arc::new(store))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn default_ttl(&self) -> Ttl {
        self.default_ttl
    }

    pub(crate) fn events(&self) -> &EventSender {
        &self.events
    }

    pub(crate) fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Ok(conn)
    }

    /// Opens a fresh unit of work. The connection lives as long as the context.
    pub fn context(self: &Arc<Self>) -> Result<AggregationContext, StoreError> {
        let conn = self.connect()?;
        Ok(AggregationContext::new(Arc::clone(self), conn))
    }

    pub(crate) fn cached_ttl(&self, name: &str) -> Option<Ttl> {
        self.known
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .copied()
    }

    pub(crate) fn remember<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, Ttl)>,
    {
        let mut known = self
            .known
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        known.extend(entries);
    }
}
