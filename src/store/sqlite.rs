//! SQLite backend.
//!
//! Invocations and error aggregates get real columns so the hot queries can
//! use indexes. History tables keep the serialized record in a `body` column
//! next to the few columns that are filtered or pruned on.
//!
//! Timestamps are stored as `INTEGER` (i64). Values above `i64::MAX` are
//! rejected on write. Query bounds past that range are clamped. The
//! autoincrement `seq` column breaks timestamp ties in insertion order.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use serde::de::DeserializeOwned;

use crate::error::{Result, ToolwatchError};
use crate::metrics::classify::{ErrorPattern, ErrorType, ExampleRing};
use crate::patterns::{AntiPattern, DiscoveredPattern};
use crate::strategy::types::{FallbackChain, Feedback, OptimizationSuggestion, SelfHealingAction};
use crate::types::{InvocationContext, InvocationRecord};

use super::{HistoryStore, InvocationStore, PruneReport};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS invocations (
    seq                   INTEGER PRIMARY KEY AUTOINCREMENT,
    id                    TEXT NOT NULL UNIQUE,
    tool_id               TEXT NOT NULL,
    tool_name             TEXT NOT NULL,
    server_id             TEXT NOT NULL,
    server_name           TEXT NOT NULL,
    timestamp             INTEGER NOT NULL,
    duration_ms           INTEGER NOT NULL,
    success               INTEGER NOT NULL,
    error                 TEXT,
    params                TEXT NOT NULL,
    result                TEXT NOT NULL,
    session_id            TEXT,
    user_id               TEXT,
    task_type             TEXT,
    parent_invocation_id  TEXT
);
CREATE INDEX IF NOT EXISTS idx_invocations_tool ON invocations(tool_id, timestamp, seq);
CREATE INDEX IF NOT EXISTS idx_invocations_session ON invocations(session_id, timestamp, seq);
CREATE INDEX IF NOT EXISTS idx_invocations_timestamp ON invocations(timestamp);

CREATE TABLE IF NOT EXISTS error_patterns (
    tool_id     TEXT NOT NULL,
    error_type  TEXT NOT NULL,
    count       INTEGER NOT NULL,
    first_seen  INTEGER NOT NULL,
    last_seen   INTEGER NOT NULL,
    examples    TEXT NOT NULL,
    PRIMARY KEY (tool_id, error_type)
);

CREATE TABLE IF NOT EXISTS patterns (
    id         TEXT PRIMARY KEY,
    last_seen  INTEGER NOT NULL,
    body       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS anti_patterns (
    id         TEXT PRIMARY KEY,
    last_seen  INTEGER NOT NULL,
    body       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS healing_actions (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,
    tool_id    TEXT NOT NULL,
    timestamp  INTEGER NOT NULL,
    body       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_healing_tool ON healing_actions(tool_id, seq);

CREATE TABLE IF NOT EXISTS suggestions (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    id          TEXT NOT NULL UNIQUE,
    tool_id     TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    body        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_suggestions_tool ON suggestions(tool_id, seq);

CREATE TABLE IF NOT EXISTS feedback (
    seq            INTEGER PRIMARY KEY AUTOINCREMENT,
    id             TEXT NOT NULL UNIQUE,
    invocation_id  TEXT NOT NULL,
    timestamp      INTEGER NOT NULL,
    body           TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_feedback_invocation ON feedback(invocation_id, seq);

CREATE TABLE IF NOT EXISTS fallback_chains (
    tool_id     TEXT PRIMARY KEY,
    created_at  INTEGER NOT NULL,
    body        TEXT NOT NULL
);
";

const INVOCATION_COLUMNS: &str = "id, tool_id, tool_name, server_id, server_name, timestamp, \
     duration_ms, success, error, params, result, session_id, user_id, task_type, \
     parent_invocation_id";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        tracing::info!(
            target: "toolwatch::store",
            path = %path.as_ref().display(),
            "Opened SQLite store"
        );
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ToolwatchError::Internal("sqlite connection lock poisoned".into()))
    }

    fn query_invocations<P: Params>(&self, filter: &str, params: P) -> Result<Vec<InvocationRecord>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {INVOCATION_COLUMNS} FROM invocations {filter}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params, row_to_invocation)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn query_bodies<T: DeserializeOwned, P: Params>(&self, sql: &str, params: P) -> Result<Vec<T>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for body in rows {
            out.push(serde_json::from_str(&body?)?);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Checked `u64 -> i64` for stored values.
fn sql_int(field: &str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| {
        ToolwatchError::Validation(format!("{field} {value} is out of range for storage"))
    })
}

/// Saturating `u64 -> i64` for query bounds; nothing stored lies beyond it.
fn sql_bound(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn u64_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_invocation(row: &Row<'_>) -> rusqlite::Result<InvocationRecord> {
    Ok(InvocationRecord {
        id: row.get(0)?,
        tool_id: row.get(1)?,
        tool_name: row.get(2)?,
        server_id: row.get(3)?,
        server_name: row.get(4)?,
        timestamp: u64_column(row, 5)?,
        duration_ms: u64_column(row, 6)?,
        success: row.get::<_, i64>(7)? != 0,
        error: row.get(8)?,
        params: json_column(row, 9)?,
        result: json_column(row, 10)?,
        context: InvocationContext {
            session_id: row.get(11)?,
            user_id: row.get(12)?,
            task_type: row.get(13)?,
            parent_invocation_id: row.get(14)?,
        },
    })
}

fn row_to_error_pattern(row: &Row<'_>) -> rusqlite::Result<ErrorPattern> {
    let raw_type: String = row.get(1)?;
    let error_type = ErrorType::parse(&raw_type).unwrap_or(ErrorType::UnknownError);
    let raw_examples: String = row.get(5)?;
    let examples: Vec<String> = serde_json::from_str(&raw_examples)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
    Ok(ErrorPattern {
        tool_id: row.get(0)?,
        error_type,
        count: u64_column(row, 2)?,
        first_seen: u64_column(row, 3)?,
        last_seen: u64_column(row, 4)?,
        examples: ExampleRing::from(examples),
    })
}

const ERROR_PATTERN_COLUMNS: &str = "tool_id, error_type, count, first_seen, last_seen, examples";

// ---------------------------------------------------------------------------
// InvocationStore
// ---------------------------------------------------------------------------

impl InvocationStore for SqliteStore {
    fn append(&self, r: &InvocationRecord) -> Result<()> {
        let timestamp = sql_int("timestamp", r.timestamp)?;
        let duration_ms = sql_int("duration_ms", r.duration_ms)?;
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO invocations ({INVOCATION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                r.id,
                r.tool_id,
                r.tool_name,
                r.server_id,
                r.server_name,
                timestamp,
                duration_ms,
                r.success as i64,
                r.error,
                serde_json::to_string(&r.params)?,
                serde_json::to_string(&r.result)?,
                r.context.session_id,
                r.context.user_id,
                r.context.task_type,
                r.context.parent_invocation_id,
            ],
        )?;
        Ok(())
    }

    fn get_invocation(&self, id: &str) -> Result<Option<InvocationRecord>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {INVOCATION_COLUMNS} FROM invocations WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], row_to_invocation).optional()?)
    }

    fn invocations_for_tool(&self, tool_id: &str) -> Result<Vec<InvocationRecord>> {
        self.query_invocations("WHERE tool_id = ?1 ORDER BY timestamp, seq", params![tool_id])
    }

    fn recent_invocations_for_tool(&self, tool_id: &str, limit: usize) -> Result<Vec<InvocationRecord>> {
        self.query_invocations(
            "WHERE tool_id = ?1 ORDER BY timestamp DESC, seq DESC LIMIT ?2",
            params![tool_id, sql_bound(limit as u64)],
        )
    }

    fn invocations_for_session(&self, session_id: &str) -> Result<Vec<InvocationRecord>> {
        self.query_invocations("WHERE session_id = ?1 ORDER BY timestamp, seq", params![session_id])
    }

    fn invocations_since(&self, since_ms: u64) -> Result<Vec<InvocationRecord>> {
        self.query_invocations("WHERE timestamp >= ?1 ORDER BY timestamp, seq", params![sql_bound(since_ms)])
    }

    fn all_invocations(&self) -> Result<Vec<InvocationRecord>> {
        self.query_invocations("ORDER BY timestamp, seq", [])
    }

    fn tool_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT tool_id FROM invocations ORDER BY tool_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn delete_invocations_before(&self, cutoff_ms: u64) -> Result<usize> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM invocations WHERE timestamp < ?1", params![sql_bound(cutoff_ms)])?)
    }

    fn record_error(
        &self,
        tool_id: &str,
        error_type: ErrorType,
        invocation_id: &str,
        at_ms: u64,
    ) -> Result<()> {
        sql_int("timestamp", at_ms)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let existing = tx
            .query_row(
                &format!(
                    "SELECT {ERROR_PATTERN_COLUMNS} FROM error_patterns
                     WHERE tool_id = ?1 AND error_type = ?2"
                ),
                params![tool_id, error_type.as_str()],
                row_to_error_pattern,
            )
            .optional()?;
        let mut pattern = existing.unwrap_or_else(|| ErrorPattern::new(tool_id, error_type, at_ms));
        pattern.observe(invocation_id, at_ms);
        let examples: Vec<String> = pattern.examples.iter().map(str::to_string).collect();
        tx.execute(
            "INSERT OR REPLACE INTO error_patterns
             (tool_id, error_type, count, first_seen, last_seen, examples)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                tool_id,
                error_type.as_str(),
                sql_int("count", pattern.count)?,
                sql_int("first_seen", pattern.first_seen)?,
                sql_int("last_seen", pattern.last_seen)?,
                serde_json::to_string(&examples)?,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn error_patterns_for_tool(&self, tool_id: &str) -> Result<Vec<ErrorPattern>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ERROR_PATTERN_COLUMNS} FROM error_patterns WHERE tool_id = ?1"
        ))?;
        let rows = stmt.query_map(params![tool_id], row_to_error_pattern)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn all_error_patterns(&self) -> Result<Vec<ErrorPattern>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ERROR_PATTERN_COLUMNS} FROM error_patterns ORDER BY tool_id, error_type"
        ))?;
        let rows = stmt.query_map([], row_to_error_pattern)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn delete_error_patterns_before(&self, cutoff_ms: u64) -> Result<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "DELETE FROM error_patterns WHERE last_seen < ?1",
            params![sql_bound(cutoff_ms)],
        )?)
    }
}

// ---------------------------------------------------------------------------
// HistoryStore
// ---------------------------------------------------------------------------

impl HistoryStore for SqliteStore {
    fn upsert_pattern(&self, p: &DiscoveredPattern) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO patterns (id, last_seen, body) VALUES (?1, ?2, ?3)",
            params![p.id, sql_int("last_seen", p.last_seen)?, serde_json::to_string(p)?],
        )?;
        Ok(())
    }

    fn get_pattern(&self, id: &str) -> Result<Option<DiscoveredPattern>> {
        Ok(self
            .query_bodies("SELECT body FROM patterns WHERE id = ?1", params![id])?
            .into_iter()
            .next())
    }

    fn list_patterns(&self) -> Result<Vec<DiscoveredPattern>> {
        self.query_bodies("SELECT body FROM patterns ORDER BY id", [])
    }

    fn upsert_anti_pattern(&self, a: &AntiPattern) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO anti_patterns (id, last_seen, body) VALUES (?1, ?2, ?3)",
            params![a.id, sql_int("last_seen", a.last_seen)?, serde_json::to_string(a)?],
        )?;
        Ok(())
    }

    fn list_anti_patterns(&self) -> Result<Vec<AntiPattern>> {
        self.query_bodies("SELECT body FROM anti_patterns ORDER BY id", [])
    }

    fn insert_healing_action(&self, a: &SelfHealingAction) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO healing_actions (id, tool_id, timestamp, body) VALUES (?1, ?2, ?3, ?4)",
            params![a.id, a.tool_id, sql_int("timestamp", a.timestamp)?, serde_json::to_string(a)?],
        )?;
        Ok(())
    }

    fn list_healing_actions(&self, tool_id: Option<&str>) -> Result<Vec<SelfHealingAction>> {
        match tool_id {
            Some(id) => self.query_bodies(
                "SELECT body FROM healing_actions WHERE tool_id = ?1 ORDER BY seq",
                params![id],
            ),
            None => self.query_bodies("SELECT body FROM healing_actions ORDER BY seq", []),
        }
    }

    fn insert_suggestion(&self, s: &OptimizationSuggestion) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO suggestions (id, tool_id, created_at, body) VALUES (?1, ?2, ?3, ?4)",
            params![s.id, s.tool_id, sql_int("created_at", s.created_at)?, serde_json::to_string(s)?],
        )?;
        Ok(())
    }

    fn list_suggestions(&self, tool_id: Option<&str>) -> Result<Vec<OptimizationSuggestion>> {
        match tool_id {
            Some(id) => self.query_bodies(
                "SELECT body FROM suggestions WHERE tool_id = ?1 ORDER BY seq",
                params![id],
            ),
            None => self.query_bodies("SELECT body FROM suggestions ORDER BY seq", []),
        }
    }

    fn insert_feedback(&self, f: &Feedback) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO feedback (id, invocation_id, timestamp, body) VALUES (?1, ?2, ?3, ?4)",
            params![f.id, f.invocation_id, sql_int("timestamp", f.timestamp)?, serde_json::to_string(f)?],
        )?;
        Ok(())
    }

    fn list_feedback(&self, invocation_id: Option<&str>) -> Result<Vec<Feedback>> {
        match invocation_id {
            Some(id) => self.query_bodies(
                "SELECT body FROM feedback WHERE invocation_id = ?1 ORDER BY seq",
                params![id],
            ),
            None => self.query_bodies("SELECT body FROM feedback ORDER BY seq", []),
        }
    }

    fn set_fallback_chain(&self, chain: &FallbackChain) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO fallback_chains (tool_id, created_at, body) VALUES (?1, ?2, ?3)",
            params![chain.tool_id, sql_int("created_at", chain.created_at)?, serde_json::to_string(chain)?],
        )?;
        Ok(())
    }

    fn get_fallback_chain(&self, tool_id: &str) -> Result<Option<FallbackChain>> {
        Ok(self
            .query_bodies("SELECT body FROM fallback_chains WHERE tool_id = ?1", params![tool_id])?
            .into_iter()
            .next())
    }

    fn list_fallback_chains(&self) -> Result<Vec<FallbackChain>> {
        self.query_bodies("SELECT body FROM fallback_chains ORDER BY tool_id", [])
    }

    fn prune_history(&self, cutoff_ms: u64) -> Result<PruneReport> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let cutoff = sql_bound(cutoff_ms);
        let report = PruneReport {
            patterns: tx.execute("DELETE FROM patterns WHERE last_seen < ?1", params![cutoff])?,
            anti_patterns: tx.execute("DELETE FROM anti_patterns WHERE last_seen < ?1", params![cutoff])?,
            healing_actions: tx.execute("DELETE FROM healing_actions WHERE timestamp < ?1", params![cutoff])?,
            suggestions: tx.execute("DELETE FROM suggestions WHERE created_at < ?1", params![cutoff])?,
            feedback: tx.execute("DELETE FROM feedback WHERE timestamp < ?1", params![cutoff])?,
        };
        tx.commit()?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_round_trip_preserves_context_and_payloads() {
        let s = SqliteStore::open_in_memory().unwrap();
        let mut r = InvocationRecord::failure("search", 42, "timeout")
            .with_session("s1")
            .with_server("srv", "Server");
        r.params = serde_json::json!({"q": "rust"});
        s.append(&r).unwrap();
        let back = s.get_invocation(&r.id).unwrap().unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_duplicate_id_is_database_error() {
        let s = SqliteStore::open_in_memory().unwrap();
        let r = InvocationRecord::success("t", 1);
        s.append(&r).unwrap();
        assert!(matches!(s.append(&r), Err(ToolwatchError::Database(_))));
    }

    #[test]
    fn test_equal_timestamps_keep_insertion_order() {
        let s = SqliteStore::open_in_memory().unwrap();
        let ids: Vec<String> = (0..5)
            .map(|_| {
                let r = InvocationRecord::success("t", 1).with_timestamp(7);
                s.append(&r).unwrap();
                r.id
            })
            .collect();
        let got: Vec<String> = s.invocations_for_tool("t").unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(got, ids);
    }

    #[test]
    fn test_record_error_upserts_in_place() {
        let s = SqliteStore::open_in_memory().unwrap();
        for i in 0..12u64 {
            s.record_error("t", ErrorType::RateLimit, &format!("i{i}"), 100 + i).unwrap();
        }
        let p = s.error_patterns_for_tool("t").unwrap();
        assert_eq!(p.len(), 1);
        assert_eq!(p[0].count, 12);
        assert_eq!(p[0].first_seen, 100);
        assert_eq!(p[0].last_seen, 111);
        assert_eq!(p[0].examples.len(), crate::metrics::classify::EXAMPLE_CAPACITY);
        assert!(p[0].examples.contains("i11"));
    }
}
