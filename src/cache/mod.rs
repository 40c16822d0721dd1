use crate::errors::{AppError, AppResult};
use crate::models::CacheEntry;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const SCHEMA_SQL: &str = include_str!("schema.sql");

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3_600);

/// Cache keys are the trimmed, lower-cased instruction.
pub fn normalize_instruction(instruction: &str) -> String {
    instruction.trim().to_lowercase()
}

/// Durable instruction -> (script, output) map with expiry.
///
/// Every operation is a single SQL statement, so concurrent callers never see a
/// half-written entry and overlapping upserts for one key resolve to the last
/// write.
#[derive(Debug)]
pub struct CacheStore {
    conn: Mutex<Connection>,
    ttl: Duration,
}

impl CacheStore {
    pub fn new(path: &Path, ttl: Duration) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
            ttl,
        })
    }

    pub fn lookup(&self, key: &str) -> AppResult<Option<(String, String)>> {
        Ok(self
            .entry_at(key, Utc::now())?
            .map(|entry| (entry.generated_script, entry.output)))
    }

    pub fn upsert(&self, key: &str, generated_script: &str, output: Option<&str>) -> AppResult<()> {
        self.upsert_at(key, generated_script, output, Utc::now())
    }

    pub fn purge_expired(&self) -> AppResult<usize> {
        self.purge_expired_at(Utc::now())
    }

    pub fn clear(&self) -> AppResult<usize> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM command_cache", [])?;
        Ok(removed)
    }

    pub fn len(&self) -> AppResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM command_cache", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn is_empty(&self) -> AppResult<bool> {
        Ok(self.len()? == 0)
    }

    fn entry_at(&self, key: &str, now: DateTime<Utc>) -> AppResult<Option<CacheEntry>> {
        let key = normalize_instruction(key);
        let cutoff = self.cutoff(now);
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT generated_script, output, timestamp FROM command_cache
                 WHERE key = ?1 AND timestamp >= ?2",
                params![key, cutoff],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(generated_script, output, timestamp)| CacheEntry {
            key,
            generated_script,
            output,
            created_at: parse_millis(timestamp),
        }))
    }

    fn upsert_at(
        &self,
        key: &str,
        generated_script: &str,
        output: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let key = normalize_instruction(key);
        if key.is_empty() {
            return Err(AppError::Internal("cache key cannot be empty".to_string()));
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO command_cache (key, generated_script, output, timestamp)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
               generated_script = excluded.generated_script,
               output = excluded.output,
               timestamp = excluded.timestamp",
            params![key, generated_script, output.unwrap_or_default(), now.timestamp_millis()],
        )?;
        Ok(())
    }

    fn purge_expired_at(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let cutoff = self.cutoff(now);
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM command_cache WHERE timestamp < ?1", params![cutoff])?;
        if removed > 0 {
            tracing::debug!(removed, "purged expired cache entries");
        }
        Ok(removed)
    }

    fn cutoff(&self, now: DateTime<Utc>) -> i64 {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        now.timestamp_millis().saturating_sub(ttl_ms)
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("cache mutex poisoned".to_string()))
    }
}

fn parse_millis(raw: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(raw).single().unwrap_or_else(Utc::now)
}
