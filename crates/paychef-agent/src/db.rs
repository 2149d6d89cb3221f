//! SQLite persistence for the session key, run history and schedule.
//!
//! Opened once at startup. With no `--db-path` the same schema lives in an
//! in-memory connection so the rest of the agent does not care.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use paychef_core::{
    history::HistoryBackend, store::CredentialBackend, CredentialStatus, DelegatedCredential,
    PayrollError, RunRecord,
};

use crate::schedule::ScheduleConfig;

// ============================================================================
// Schema
// ============================================================================

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS session_credential (
    id             INTEGER PRIMARY KEY CHECK (id = 1),
    address        TEXT    NOT NULL,
    secret         TEXT    NOT NULL,
    whitelist      TEXT    NOT NULL,
    spending_limit INTEGER NOT NULL,
    total_spent    INTEGER NOT NULL,
    created_at     INTEGER NOT NULL,
    expires_at     INTEGER NOT NULL,
    status         TEXT    NOT NULL,
    revoked_at     INTEGER
);

CREATE TABLE IF NOT EXISTS payroll_runs (
    seq    INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT    NOT NULL UNIQUE,
    ts     INTEGER NOT NULL,
    body   TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS payroll_schedule (
    id           INTEGER PRIMARY KEY CHECK (id = 1),
    day_of_month INTEGER NOT NULL,
    hour         INTEGER NOT NULL,
    minute       INTEGER NOT NULL,
    enabled      INTEGER NOT NULL,
    created_at   INTEGER NOT NULL
);

PRAGMA journal_mode = WAL;
PRAGMA synchronous  = NORMAL;
";

fn store_err(e: impl std::fmt::Display) -> PayrollError {
    PayrollError::Store(e.to_string())
}

pub struct Db(Mutex<rusqlite::Connection>);

impl Db {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| anyhow::anyhow!("SQLite open failed: {e}"))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| anyhow::anyhow!("SQLite open failed: {e}"))?;
        Self::init(conn)
    }

    fn init(conn: rusqlite::Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| anyhow::anyhow!("SQLite schema init failed: {e}"))?;
        Ok(Db(Mutex::new(conn)))
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------------
    // Schedule
    // ------------------------------------------------------------------------

    pub fn load_schedule(&self) -> Result<Option<ScheduleConfig>, PayrollError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT day_of_month, hour, minute, enabled, created_at
                 FROM payroll_schedule WHERE id = 1",
            )
            .map_err(store_err)?;
        let mut rows = stmt
            .query_map([], |row| {
                Ok(ScheduleConfig {
                    day_of_month: row.get(0)?,
                    hour:         row.get(1)?,
                    minute:       row.get(2)?,
                    enabled:      row.get::<_, i64>(3)? != 0,
                    created_at:   row.get::<_, i64>(4)? as u64,
                })
            })
            .map_err(store_err)?;
        rows.next().transpose().map_err(store_err)
    }

    pub fn save_schedule(&self, schedule: &ScheduleConfig) -> Result<(), PayrollError> {
        self.conn()
            .execute(
                "INSERT INTO payroll_schedule (id, day_of_month, hour, minute, enabled, created_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     day_of_month = excluded.day_of_month,
                     hour         = excluded.hour,
                     minute       = excluded.minute,
                     enabled      = excluded.enabled,
                     created_at   = excluded.created_at",
                rusqlite::params![
                    schedule.day_of_month,
                    schedule.hour,
                    schedule.minute,
                    schedule.enabled as i64,
                    schedule.created_at as i64,
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }
}

// ============================================================================
// Session credential
// ============================================================================

fn parse_status(s: &str) -> rusqlite::Result<CredentialStatus> {
    match s {
        "active" => Ok(CredentialStatus::Active),
        "revoked" => Ok(CredentialStatus::Revoked),
        other => Err(rusqlite::Error::InvalidColumnType(
            8,
            format!("status={other}"),
            rusqlite::types::Type::Text,
        )),
    }
}

impl CredentialBackend for Db {
    fn load(&self) -> Result<Option<DelegatedCredential>, PayrollError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT address, secret, whitelist, spending_limit, total_spent,
                        created_at, expires_at, status, revoked_at
                 FROM session_credential WHERE id = 1",
            )
            .map_err(store_err)?;
        let mut rows = stmt
            .query_map([], |row| {
                let whitelist: String = row.get(2)?;
                let status: String = row.get(7)?;
                Ok((
                    DelegatedCredential {
                        address:        row.get(0)?,
                        secret:         row.get(1)?,
                        whitelist:      Default::default(),
                        spending_limit: row.get::<_, i64>(3)? as u64,
                        total_spent:    row.get::<_, i64>(4)? as u64,
                        created_at:     row.get::<_, i64>(5)? as u64,
                        expires_at:     row.get::<_, i64>(6)? as u64,
                        status:         parse_status(&status)?,
                        revoked_at:     row.get::<_, Option<i64>>(8)?.map(|v| v as u64),
                    },
                    whitelist,
                ))
            })
            .map_err(store_err)?;

        match rows.next().transpose().map_err(store_err)? {
            None => Ok(None),
            Some((mut cred, whitelist)) => {
                cred.whitelist = serde_json::from_str(&whitelist)
                    .map_err(|e| store_err(format!("corrupt whitelist: {e}")))?;
                Ok(Some(cred))
            }
        }
    }

    fn save(&self, cred: &DelegatedCredential) -> Result<(), PayrollError> {
        let whitelist = serde_json::to_string(&cred.whitelist).map_err(store_err)?;
        self.conn()
            .execute(
                "INSERT INTO session_credential
                     (id, address, secret, whitelist, spending_limit, total_spent,
                      created_at, expires_at, status, revoked_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                     address        = excluded.address,
                     secret         = excluded.secret,
                     whitelist      = excluded.whitelist,
                     spending_limit = excluded.spending_limit,
                     total_spent    = excluded.total_spent,
                     created_at     = excluded.created_at,
                     expires_at     = excluded.expires_at,
                     status         = excluded.status,
                     revoked_at     = excluded.revoked_at",
                rusqlite::params![
                    cred.address,
                    cred.secret,
                    whitelist,
                    cred.spending_limit as i64,
                    cred.total_spent    as i64,
                    cred.created_at     as i64,
                    cred.expires_at     as i64,
                    cred.status.to_string(),
                    cred.revoked_at.map(|v| v as i64),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }
}

// ============================================================================
// Run history
// ============================================================================

impl HistoryBackend for Db {
    fn load_recent(&self, limit: usize) -> Result<Vec<RunRecord>, PayrollError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT body FROM payroll_runs ORDER BY seq DESC LIMIT ?1")
            .map_err(store_err)?;
        let rows = stmt
            .query_map(rusqlite::params![limit as i64], |row| row.get::<_, String>(0))
            .map_err(store_err)?;

        let mut out = Vec::new();
        for body in rows {
            let body = body.map_err(store_err)?;
            match serde_json::from_str::<RunRecord>(&body) {
                Ok(record) => out.push(record),
                Err(e) => tracing::warn!("Skipping unreadable payroll run row: {e}"),
            }
        }
        Ok(out)
    }

    fn append(&self, record: &RunRecord, keep: usize) -> Result<(), PayrollError> {
        let body = serde_json::to_string(record).map_err(store_err)?;
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(store_err)?;
        tx.execute(
            "INSERT INTO payroll_runs (run_id, ts, body) VALUES (?1, ?2, ?3)",
            rusqlite::params![record.run_id, record.timestamp as i64, body],
        )
        .map_err(store_err)?;
        tx.execute(
            "DELETE FROM payroll_runs WHERE seq NOT IN
                 (SELECT seq FROM payroll_runs ORDER BY seq DESC LIMIT ?1)",
            rusqlite::params![keep as i64],
        )
        .map_err(store_err)?;
        tx.commit().map_err(store_err)
    }
}
