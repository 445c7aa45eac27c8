//! Rekon persistence: SQLite store for Persisted State Records.
//! One row per write; the latest three per resource address are kept.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use metrics::{counter, histogram};
use rekon_core::StateRecord;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const KEEP_PER_ADDRESS: usize = 3;

/// A state record as stored: attributes are kept as JSON so one table serves
/// every resource kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Declaration address, e.g. `aws_batch_job_queue.main`.
    pub address: String,
    pub kind: String,
    pub ts: i64,
    pub json: String,
}

impl StoredRecord {
    pub fn encode<D: Serialize>(address: &str, kind: &str, record: &StateRecord<D>) -> Result<Self> {
        let json = serde_json::to_string(record).with_context(|| format!("encoding state for {}", address))?;
        Ok(Self { address: address.to_string(), kind: kind.to_string(), ts: now_ts(), json })
    }

    pub fn decode<D: DeserializeOwned>(&self) -> Result<StateRecord<D>> {
        serde_json::from_str(&self.json).with_context(|| format!("decoding state for {} ({})", self.address, self.kind))
    }
}

pub trait StateStore {
    fn put(&self, row: StoredRecord) -> Result<()>;
    fn latest(&self, address: &str) -> Result<Option<StoredRecord>>;
    /// Newest first, at most `limit` rows (default 3).
    fn history(&self, address: &str, limit: Option<usize>) -> Result<Vec<StoredRecord>>;
    fn addresses(&self) -> Result<Vec<String>>;
    /// Drop every row for `address`; returns how many were removed.
    fn forget(&self, address: &str) -> Result<usize>;
}

/// Store the outcome of a pass: bound records are appended, an absent record
/// removes the address.
pub fn commit<D: Serialize>(store: &dyn StateStore, address: &str, kind: &str, record: &StateRecord<D>) -> Result<()> {
    if record.is_bound() {
        store.put(StoredRecord::encode(address, kind, record)?)
    } else {
        let removed = store.forget(address)?;
        debug!(address, removed, "state cleared");
        Ok(())
    }
}

/// Typed read of the newest record for `address`.
pub fn load<D: DeserializeOwned>(store: &dyn StateStore, address: &str) -> Result<StateRecord<D>> {
    match store.latest(address)? {
        Some(row) => row.decode(),
        None => Ok(StateRecord::absent()),
    }
}

/// SQLite-backed store. Synchronous; passes are dominated by remote calls.
pub struct SqliteStateStore {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteStateStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("REKON_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS state_records (
                address TEXT NOT NULL,
                kind    TEXT NOT NULL,
                ts      INTEGER NOT NULL,
                record  TEXT NOT NULL
            )",
            [],
        )
        .context("creating state_records table")?;
        db.execute("CREATE INDEX IF NOT EXISTS idx_state_records_address_ts ON state_records(address, ts DESC)", [])
            .ok();
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(path, "state store opened");
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> { self.db.lock().unwrap_or_else(|e| e.into_inner()) }
}

impl StateStore for SqliteStateStore {
    fn put(&self, row: StoredRecord) -> Result<()> {
        let started = std::time::Instant::now();
        let mut db = self.conn();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO state_records(address, kind, ts, record) VALUES (?1, ?2, ?3, ?4)",
            (&row.address, &row.kind, row.ts, &row.json),
        )
        .with_context(|| format!("writing state for {}", row.address))?;
        tx.execute(
            "DELETE FROM state_records
             WHERE address = ?1
               AND rowid NOT IN (
                   SELECT rowid FROM state_records WHERE address = ?1 ORDER BY ts DESC, rowid DESC LIMIT ?2
               )",
            (&row.address, KEEP_PER_ADDRESS as i64),
        )?;
        tx.commit()?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }

    fn latest(&self, address: &str) -> Result<Option<StoredRecord>> {
        Ok(self.history(address, Some(1))?.into_iter().next())
    }

    fn history(&self, address: &str, limit: Option<usize>) -> Result<Vec<StoredRecord>> {
        let started = std::time::Instant::now();
        let cap = limit.unwrap_or(KEEP_PER_ADDRESS);
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT kind, ts, record FROM state_records WHERE address = ?1 ORDER BY ts DESC, rowid DESC LIMIT ?2",
        )?;
        let mut rows = stmt.query((address, cap as i64))?;
        let mut out: Vec<StoredRecord> = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(StoredRecord { address: address.to_string(), kind: row.get(0)?, ts: row.get(1)?, json: row.get(2)? });
        }
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn addresses(&self) -> Result<Vec<String>> {
        let db = self.conn();
        let mut stmt = db.prepare("SELECT DISTINCT address FROM state_records ORDER BY address")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn forget(&self, address: &str) -> Result<usize> {
        let db = self.conn();
        let n = db
            .execute("DELETE FROM state_records WHERE address = ?1", [address])
            .with_context(|| format!("forgetting state for {}", address))?;
        Ok(n)
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".rekon");
        let _ = std::fs::create_dir_all(&p);
        p.push("rekon.db");
        return p.to_string_lossy().to_string();
    }
    "rekon.db".to_string()
}

/// Seconds since epoch.
pub fn now_ts() -> i64 {
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    now.as_secs() as i64
}
