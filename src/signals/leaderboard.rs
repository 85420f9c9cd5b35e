//! Database-backed ranked leaderboard
//!
//! Bounded top-K store of trader significance scores (`1 - p`).
//!
//! - WAL mode for concurrent reads during writes
//! - One connection behind a lock; every public call is atomic
//! - `record` upserts and evicts in a single transaction, so an eviction
//!   pass can never drop a concurrent upsert
//! - Equal scores rank by upsert sequence (earlier first)

use crate::models::LeaderboardEntry;
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex; // Faster than std::sync::Mutex
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS leaderboard (
    user TEXT PRIMARY KEY,
    score REAL NOT NULL,
    seq INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_leaderboard_rank
    ON leaderboard(score DESC, seq ASC);
"#;

/// Shared ORDER BY for every ranked read.
const RANK_ORDER: &str = "score DESC, seq ASC";

pub struct DbLeaderboard {
    conn: Mutex<Connection>,
}

impl DbLeaderboard {
    /// Open (or create) the leaderboard at `db_path`. `:memory:` is accepted.
    pub fn new(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open leaderboard database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize leaderboard schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if db_path != ":memory:" && journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM leaderboard", [], |row| row.get(0))
            .unwrap_or(0);
        info!("🏆 Leaderboard opened at {} ({} traders)", db_path, count);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn upsert_in(conn: &Connection, user: &str, score: f64) -> Result<()> {
        let seq: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM leaderboard",
            [],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO leaderboard (user, score, seq, updated_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(user) DO UPDATE SET \
                score=excluded.score, seq=excluded.seq, updated_at=excluded.updated_at",
            params![user, score, seq, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn evict_in(conn: &Connection, keep: usize) -> Result<usize> {
        let deleted = conn.execute(
            &format!(
                "DELETE FROM leaderboard WHERE user NOT IN \
                 (SELECT user FROM leaderboard ORDER BY {} LIMIT ?1)",
                RANK_ORDER
            ),
            params![keep as i64],
        )?;
        Ok(deleted)
    }

    /// Set or replace a trader's score. Last write wins.
    pub fn upsert(&self, user: &str, score: f64) -> Result<()> {
        let conn = self.conn.lock();
        Self::upsert_in(&conn, user, score)
            .with_context(|| format!("Failed to upsert score for {}", user))
    }

    /// Remove everything below the top `keep` entries. Returns rows removed.
    pub fn evict_beyond(&self, keep: usize) -> Result<usize> {
        let conn = self.conn.lock();
        Self::evict_in(&conn, keep).context("Failed to evict leaderboard tail")
    }

    /// Upsert then evict beyond `keep`, atomically.
    pub fn record(&self, user: &str, score: f64, keep: usize) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .context("Failed to begin leaderboard transaction")?;

        Self::upsert_in(&tx, user, score)
            .with_context(|| format!("Failed to upsert score for {}", user))?;
        let evicted = Self::evict_in(&tx, keep).context("Failed to evict leaderboard tail")?;

        tx.commit().context("Failed to commit leaderboard update")?;

        if evicted > 0 {
            debug!("🧹 Evicted {} traders beyond top {}", evicted, keep);
        }
        Ok(evicted)
    }

    /// Entries by descending score, with absolute 1-based ranks.
    ///
    /// An offset SQLite cannot address is past any possible end: empty.
    pub fn range(&self, offset: usize, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        let Ok(sql_offset) = i64::try_from(offset) else {
            return Ok(Vec::new());
        };
        let sql_limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT user, score FROM leaderboard ORDER BY {} LIMIT ?1 OFFSET ?2",
            RANK_ORDER
        ))?;

        let rows = stmt.query_map(params![sql_limit, sql_offset], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut entries = Vec::with_capacity(limit.min(1024));
        for (i, row) in rows.enumerate() {
            let (user, prob) = row?;
            let rank = (sql_offset as u64)
                .checked_add(i as u64 + 1)
                .context("Leaderboard rank out of range")?;
            entries.push(LeaderboardEntry { rank, user, prob });
        }
        Ok(entries)
    }

    /// Rank and score of a single trader.
    pub fn rank_of(&self, user: &str) -> Result<Option<LeaderboardEntry>> {
        let conn = self.conn.lock();
        let entry = conn
            .query_row(
                "SELECT t.score, \
                    (SELECT COUNT(*) FROM leaderboard o \
                     WHERE o.score > t.score OR (o.score = t.score AND o.seq < t.seq)) \
                 FROM leaderboard t WHERE t.user = ?1",
                [user],
                |row| Ok((row.get::<_, f64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?
            .map(|(prob, ahead)| LeaderboardEntry {
                rank: ahead as u64 + 1,
                user: user.to_string(),
                prob,
            });
        Ok(entry)
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM leaderboard", [], |row| row.get(0))
            .context("Failed to count leaderboard entries")?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
