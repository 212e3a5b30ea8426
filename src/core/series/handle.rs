use rusqlite::{OptionalExtension, params};

use super::{
    AggregationContext, Bucket, MAX_BUCKETS, Point, Reduction, StoreError, Ttl, table_name,
    unix_now, validate_series_name,
};

/// Handle to one named series. Cheap to clone; all I/O goes through a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    name: String,
    table: String,
    ttl: Ttl,
}

impl Series {
    /// Resolves `name`, creating its table and metadata row on first use.
    ///
    /// `ttl_hint` only matters when the series is first created; `None`
    /// inherits the store default. Later calls load the persisted TTL.
    pub fn get_or_create(
        ctx: &mut AggregationContext,
        name: &str,
        ttl_hint: Option<Ttl>,
    ) -> Result<Self, StoreError> {
        validate_series_name(name)?;
        let table = table_name(name);

        if let Some(ttl) = ctx.known_ttl(name) {
            return Ok(Self {
                name: name.to_string(),
                table,
                ttl,
            });
        }

        let conn = ctx.conn();
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (ts INTEGER NOT NULL, value REAL NOT NULL);
             CREATE INDEX IF NOT EXISTS {table}_ts ON {table}(ts);"
        ))?;

        let hint = ttl_hint.unwrap_or_else(|| ctx.store().default_ttl());
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO telemetry_metadata (name, ttl) VALUES (?1, ?2)",
            params![name, hint.to_sql()],
        )?;
        let persisted: i64 = conn.query_row(
            "SELECT ttl FROM telemetry_metadata WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        let ttl = Ttl::from_seconds(persisted);

        if inserted > 0 {
            ctx.debug(format!("Created series {} (ttl {})", name, persisted));
        }
        ctx.record_series(name, ttl);

        Ok(Self {
            name: name.to_string(),
            table,
            ttl,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Ttl {
        self.ttl
    }

    /// Appends a point at `ts`, or now. Points past the TTL are dropped.
    pub fn push(
        &self,
        ctx: &AggregationContext,
        ts: Option<i64>,
        value: f64,
    ) -> Result<(), StoreError> {
        let now = unix_now();
        let ts = ts.unwrap_or(now);
        ctx.conn().execute(
            &format!("INSERT INTO {} (ts, value) VALUES (?1, ?2)", self.table),
            params![ts, value],
        )?;

        if let Ttl::Seconds(ttl) = self.ttl {
            let horizon = now.saturating_sub(ttl as i64);
            let expired = ctx.conn().execute(
                &format!("DELETE FROM {} WHERE ts < ?1", self.table),
                params![horizon],
            )?;
            if expired > 0 {
                ctx.debug(format!("Expired {} points from {}", expired, self.name));
            }
        }
        Ok(())
    }

    /// Most recent point by timestamp; later insertions win ties.
    pub fn last(&self, ctx: &AggregationContext) -> Result<Point, StoreError> {
        self.latest(ctx).map(|(_, point)| point)
    }

    pub fn pop(&self, ctx: &AggregationContext, delete: bool) -> Result<Point, StoreError> {
        let (rowid, point) = self.latest(ctx)?;
        if delete {
            ctx.conn().execute(
                &format!("DELETE FROM {} WHERE rowid = ?1", self.table),
                params![rowid],
            )?;
        }
        Ok(point)
    }

    fn latest(&self, ctx: &AggregationContext) -> Result<(i64, Point), StoreError> {
        ctx.conn()
            .query_row(
                &format!(
                    "SELECT rowid, ts, value FROM {} ORDER BY ts DESC, rowid DESC LIMIT 1",
                    self.table
                ),
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        Point {
                            ts: row.get(1)?,
                            value: row.get(2)?,
                        },
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(self.name.clone()))
    }

    /// Reduces the points with `start <= ts <= end`.
    ///
    /// Sum and count are 0 over an empty range; the other reductions report
    /// [`StoreError::NotFound`].
    pub fn compute(
        &self,
        ctx: &AggregationContext,
        op: Reduction,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<f64, StoreError> {
        let start = start.unwrap_or(0);
        let end = end.unwrap_or_else(unix_now);
        let value: Option<f64> = ctx.conn().query_row(
            &format!(
                "SELECT {} FROM {} WHERE ts >= ?1 AND ts <= ?2",
                op.sql_expr(),
                self.table
            ),
            params![start, end],
            |row| row.get(0),
        )?;
        value.ok_or_else(|| StoreError::NotFound(self.name.clone()))
    }

    pub fn aggregate(
        &self,
        ctx: &AggregationContext,
        op: Reduction,
        interval: i64,
        count: i64,
    ) -> Result<Vec<Bucket>, StoreError> {
        self.aggregate_at(ctx, op, interval, count, unix_now(), None)
    }

    /// Buckets the `count` intervals ending at `now`.
    ///
    /// The window starts at `floor((now - interval * count) / interval) * interval`
    /// and always yields `count` entries; empty buckets carry 0. Points before
    /// `not_before` are ignored.
    pub fn aggregate_at(
        &self,
        ctx: &AggregationContext,
        op: Reduction,
        interval: i64,
        count: i64,
        now: i64,
        not_before: Option<i64>,
    ) -> Result<Vec<Bucket>, StoreError> {
        let invalid = || StoreError::InvalidWindow { interval, count };
        if interval <= 0 || count <= 0 || count > MAX_BUCKETS {
            return Err(invalid());
        }

        let span = interval.checked_mul(count).ok_or_else(invalid)?;
        let start = now
            .checked_sub(span)
            .and_then(|from| from.div_euclid(interval).checked_mul(interval))
            .ok_or_else(invalid)?;
        let end = start.checked_add(span).ok_or_else(invalid)?;
        let lower = not_before.map_or(start, |nb| nb.max(start));

        // start + i * interval never exceeds end, so these cannot overflow.
        let mut buckets: Vec<Bucket> = (0..count)
            .map(|i| Bucket {
                ts: start + i * interval,
                value: 0.0,
            })
            .collect();

        let mut stmt = ctx.conn().prepare(&format!(
            "SELECT (ts - ?1) / ?2 AS bucket, {} FROM {}
             WHERE ts >= ?3 AND ts < ?4
             GROUP BY bucket",
            op.sql_expr(),
            self.table
        ))?;
        let rows = stmt.query_map(params![start, interval, lower, end], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Option<f64>>(1)?))
        })?;

        for row in rows {
            let (index, value) = row?;
            if let Some(bucket) = usize::try_from(index)
                .ok()
                .and_then(|i| buckets.get_mut(i))
            {
                bucket.value = value.unwrap_or(0.0);
            }
        }

        Ok(buckets)
    }
}
