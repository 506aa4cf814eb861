//! Relational store for the observer (`observer.db`).
//!
//! One connection, opened once and serialized behind a mutex: every write
//! path in the process goes through here, which is what makes the vote
//! uniqueness constraint and the single alive→dying transition enforceable.
//! Calls are short and contain no network I/O.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;

use vivarium_core::{
    ActivityEvent, BootstrapMode, DeathCause, EventKind, LifeState, OracleKind, OracleMessage,
    RoundStatus, VoteChoice, VoteRejection,
};

/// Hourly vote rate limit window, across all rounds.
const VOTE_COOLDOWN_S: i64 = 3600;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("store poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One vote round row.
#[derive(Debug, Clone)]
pub struct RoundRow {
    pub id: i64,
    pub life_number: u64,
    pub opened_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub live: u64,
    pub die: u64,
    pub status: RoundStatus,
}

/// One closed life, for history and fragment generation.
#[derive(Debug, Clone)]
pub struct LifeRow {
    pub life_number: u64,
    pub born_at: DateTime<Utc>,
    pub died_at: Option<DateTime<Utc>>,
    pub death_cause: Option<DeathCause>,
    pub bootstrap_mode: Option<BootstrapMode>,
    pub model: Option<String>,
    pub name: Option<String>,
    pub summary: Option<String>,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS lives (
                life_number INTEGER PRIMARY KEY,
                born_at TEXT NOT NULL,
                died_at TEXT NULL,
                death_cause TEXT NULL,
                bootstrap_mode TEXT NULL,
                model TEXT NULL,
                name TEXT NULL,
                icon TEXT NULL,
                pronoun TEXT NULL,
                summary TEXT NULL
            );

            CREATE TABLE IF NOT EXISTS life_state (
                id INTEGER PRIMARY KEY CHECK(id = 1),
                life_number INTEGER NOT NULL DEFAULT 0,
                is_alive INTEGER NOT NULL DEFAULT 0,
                born_at TEXT NULL,
                last_seen TEXT NULL,
                bootstrap_mode TEXT NULL,
                model TEXT NULL
            );

            INSERT OR IGNORE INTO life_state (id, life_number, is_alive)
            VALUES (1, 0, 0);

            CREATE TABLE IF NOT EXISTS vote_rounds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                life_number INTEGER NOT NULL,
                opened_at TEXT NOT NULL,
                closes_at TEXT NOT NULL,
                live_count INTEGER NOT NULL DEFAULT 0,
                die_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'open'
                    CHECK(status IN ('open', 'closed_survived', 'closed_died'))
            );

            CREATE TABLE IF NOT EXISTS votes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                round_id INTEGER NOT NULL REFERENCES vote_rounds(id),
                voter_fingerprint TEXT NOT NULL,
                choice TEXT NOT NULL CHECK(choice IN ('live', 'die')),
                cast_at TEXT NOT NULL,
                UNIQUE(round_id, voter_fingerprint)
            );

            CREATE INDEX IF NOT EXISTS idx_votes_fingerprint_cast
                ON votes(voter_fingerprint, cast_at);

            CREATE TABLE IF NOT EXISTS activity (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                life_number INTEGER NOT NULL,
                ts TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS oracle_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                text TEXT NOT NULL,
                delivered_at TEXT NOT NULL,
                acknowledged_at TEXT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // ------------------------------------------------------------------
    // Life state (singleton)
    // ------------------------------------------------------------------

    pub fn life_state(&self) -> StoreResult<LifeState> {
        let conn = self.lock()?;
        let state = conn.query_row(
            "SELECT life_number, is_alive, born_at, last_seen, bootstrap_mode, model
             FROM life_state WHERE id = 1",
            [],
            |row| {
                Ok(LifeState {
                    life_number: row.get::<_, i64>(0)? as u64,
                    is_alive: row.get::<_, i64>(1)? != 0,
                    born_at: parse_ts(row.get::<_, Option<String>>(2)?),
                    last_seen: parse_ts(row.get::<_, Option<String>>(3)?),
                    bootstrap_mode: row
                        .get::<_, Option<String>>(4)?
                        .as_deref()
                        .and_then(BootstrapMode::parse),
                    model: row.get(5)?,
                })
            },
        )?;
        Ok(state)
    }

    pub fn touch_last_seen(&self, model: Option<&str>) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE life_state SET last_seen = ?1, model = COALESCE(?2, model) WHERE id = 1",
            params![now_str(), model],
        )?;
        Ok(())
    }

    /// Allocate the next life number: max(lives) + 1, never reused.
    pub fn allocate_life_number(&self) -> StoreResult<u64> {
        let conn = self.lock()?;
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(life_number), 0) FROM lives",
            [],
            |row| row.get(0),
        )?;
        let state_max: i64 = conn.query_row(
            "SELECT life_number FROM life_state WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok((max.max(state_max) as u64) + 1)
    }

    /// Record a new life and flip the singleton to alive.
    pub fn record_birth(
        &self,
        life_number: u64,
        born_at: DateTime<Utc>,
        bootstrap: BootstrapMode,
        model: &str,
    ) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO lives (life_number, born_at, bootstrap_mode, model)
             VALUES (?1, ?2, ?3, ?4)",
            params![life_number as i64, ts_str(born_at), bootstrap.as_str(), model],
        )?;
        conn.execute(
            "UPDATE life_state SET life_number = ?1, is_alive = 1, born_at = ?2,
                 bootstrap_mode = ?3, model = ?4, last_seen = ?2
             WHERE id = 1",
            params![life_number as i64, ts_str(born_at), bootstrap.as_str(), model],
        )?;
        Ok(())
    }

    /// Identity reported by the agent after its naming sequence.
    pub fn record_identity(
        &self,
        life_number: u64,
        name: &str,
        icon: &str,
        pronoun: &str,
    ) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE lives SET name = ?2, icon = ?3, pronoun = ?4 WHERE life_number = ?1",
            params![life_number as i64, name, icon, pronoun],
        )?;
        Ok(())
    }

    /// Close the life row and flip the singleton to dead. `cause` is always a
    /// live cause here; legacy values only ever come out of old rows.
    pub fn record_death(
        &self,
        life_number: u64,
        died_at: DateTime<Utc>,
        cause: DeathCause,
        summary: &str,
    ) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE lives SET died_at = ?2, death_cause = ?3, summary = ?4
             WHERE life_number = ?1 AND died_at IS NULL",
            params![life_number as i64, ts_str(died_at), cause.as_str(), summary],
        )?;
        conn.execute("UPDATE life_state SET is_alive = 0 WHERE id = 1", [])?;
        Ok(())
    }

    /// Death cause of the most recently closed life, for trauma prompts.
    pub fn prior_death_cause(&self) -> StoreResult<Option<DeathCause>> {
        let conn = self.lock()?;
        let cause: Option<String> = conn
            .query_row(
                "SELECT death_cause FROM lives WHERE died_at IS NOT NULL
                 ORDER BY life_number DESC LIMIT 1",
                [],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(cause.as_deref().and_then(DeathCause::parse))
    }

    pub fn death_count(&self) -> StoreResult<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM lives WHERE died_at IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn life_history(&self, limit: usize) -> StoreResult<Vec<LifeRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT life_number, born_at, died_at, death_cause, bootstrap_mode, model, name, summary
             FROM lives ORDER BY life_number DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(LifeRow {
                    life_number: row.get::<_, i64>(0)? as u64,
                    born_at: parse_ts(Some(row.get::<_, String>(1)?)).unwrap_or_else(Utc::now),
                    died_at: parse_ts(row.get::<_, Option<String>>(2)?),
                    death_cause: row
                        .get::<_, Option<String>>(3)?
                        .as_deref()
                        .and_then(DeathCause::parse),
                    bootstrap_mode: row
                        .get::<_, Option<String>>(4)?
                        .as_deref()
                        .and_then(BootstrapMode::parse),
                    model: row.get(5)?,
                    name: row.get(6)?,
                    summary: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Vote rounds
    // ------------------------------------------------------------------

    pub fn open_round(
        &self,
        life_number: u64,
        opened_at: DateTime<Utc>,
        closes_at: DateTime<Utc>,
    ) -> StoreResult<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO vote_rounds (life_number, opened_at, closes_at, status)
             VALUES (?1, ?2, ?3, 'open')",
            params![life_number as i64, ts_str(opened_at), ts_str(closes_at)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn current_open_round(&self) -> StoreResult<Option<RoundRow>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, life_number, opened_at, closes_at, live_count, die_count, status
                 FROM vote_rounds WHERE status = 'open' ORDER BY id DESC LIMIT 1",
                [],
                map_round,
            )
            .optional()?;
        Ok(row)
    }

    /// Open rounds whose deadline has passed.
    pub fn due_open_rounds(&self, now: DateTime<Utc>) -> StoreResult<Vec<RoundRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, life_number, opened_at, closes_at, live_count, die_count, status
             FROM vote_rounds WHERE status = 'open' AND closes_at <= ?1",
        )?;
        let rows = stmt
            .query_map(params![ts_str(now)], map_round)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Transition a round out of `open` exactly once. Returns false when the
    /// round was already closed by a concurrent path.
    pub fn close_round(&self, round_id: i64, status: RoundStatus) -> StoreResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE vote_rounds SET status = ?2 WHERE id = ?1 AND status = 'open'",
            params![round_id, status.as_str()],
        )?;
        Ok(changed > 0)
    }

    /// Close every open round (death cleanup). Non-vote closures survive.
    pub fn close_all_open_rounds(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE vote_rounds SET status = 'closed_survived' WHERE status = 'open'",
            [],
        )?;
        Ok(())
    }

    /// Insert a ballot. The `(round_id, fingerprint)` uniqueness and the
    /// hourly cooldown across rounds are both enforced here, inside the lock,
    /// so concurrent submissions linearize.
    pub fn cast_vote(
        &self,
        round_id: i64,
        fingerprint: &str,
        choice: VoteChoice,
        now: DateTime<Utc>,
    ) -> StoreResult<Result<(u64, u64), VoteRejection>> {
        let conn = self.lock()?;

        // Hourly rate limit over accepted votes, across all rounds. Checked
        // before the per-round constraint so a same-round duplicate inside
        // the window still reads as the more specific "duplicate".
        let last_in_round: Option<String> = conn
            .query_row(
                "SELECT cast_at FROM votes WHERE round_id = ?1 AND voter_fingerprint = ?2",
                params![round_id, fingerprint],
                |row| row.get(0),
            )
            .optional()?;
        if last_in_round.is_some() {
            return Ok(Err(VoteRejection::Duplicate));
        }

        let last_any: Option<String> = conn
            .query_row(
                "SELECT MAX(cast_at) FROM votes WHERE voter_fingerprint = ?1",
                params![fingerprint],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        if let Some(last) = last_any.and_then(|raw| parse_ts(Some(raw))) {
            let elapsed = (now - last).num_seconds();
            if elapsed < VOTE_COOLDOWN_S {
                return Ok(Err(VoteRejection::Cooldown {
                    retry_after_s: (VOTE_COOLDOWN_S - elapsed).max(0) as u64,
                }));
            }
        }

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO votes (round_id, voter_fingerprint, choice, cast_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![round_id, fingerprint, choice.as_str(), ts_str(now)],
        )?;
        if inserted == 0 {
            return Ok(Err(VoteRejection::Duplicate));
        }

        // Refresh the denormalized counters from the ballots.
        conn.execute(
            "UPDATE vote_rounds SET
                live_count = (SELECT COUNT(*) FROM votes WHERE round_id = ?1 AND choice = 'live'),
                die_count = (SELECT COUNT(*) FROM votes WHERE round_id = ?1 AND choice = 'die')
             WHERE id = ?1",
            params![round_id],
        )?;
        let (live, die): (i64, i64) = conn.query_row(
            "SELECT live_count, die_count FROM vote_rounds WHERE id = ?1",
            params![round_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(Ok((live as u64, die as u64)))
    }

    /// God-mode counter override for the open round.
    pub fn adjust_votes(&self, round_id: i64, live: u64, die: u64) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE vote_rounds SET live_count = ?2, die_count = ?3 WHERE id = ?1",
            params![round_id, live as i64, die as i64],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Activity timeline
    // ------------------------------------------------------------------

    /// Append one event; returns the full row with its monotonic `seq`.
    pub fn append_activity(
        &self,
        life_number: u64,
        kind: EventKind,
        payload: &str,
    ) -> StoreResult<ActivityEvent> {
        let conn = self.lock()?;
        let ts = Utc::now();
        conn.execute(
            "INSERT INTO activity (life_number, ts, kind, payload) VALUES (?1, ?2, ?3, ?4)",
            params![life_number as i64, ts_str(ts), kind.as_str(), payload],
        )?;
        Ok(ActivityEvent {
            seq: conn.last_insert_rowid() as u64,
            life_number,
            ts,
            kind,
            payload: payload.to_string(),
        })
    }

    pub fn recent_activity(&self, limit: usize) -> StoreResult<Vec<ActivityEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT seq, life_number, ts, kind, payload FROM activity
             ORDER BY seq DESC LIMIT ?1",
        )?;
        let mut rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(ActivityEvent {
                    seq: row.get::<_, i64>(0)? as u64,
                    life_number: row.get::<_, i64>(1)? as u64,
                    ts: parse_ts(Some(row.get::<_, String>(2)?)).unwrap_or_else(Utc::now),
                    kind: EventKind::parse(&row.get::<_, String>(3)?)
                        .unwrap_or(EventKind::Error),
                    payload: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.reverse();
        Ok(rows)
    }

    /// Think payloads from lives before `life_number`, for fragment seeding.
    pub fn past_thoughts(&self, life_number: u64, limit: usize) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM activity
             WHERE kind = 'think' AND life_number < ?1
             ORDER BY RANDOM() LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![life_number as i64, limit as i64], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    /// Most recent think payloads of one life, for the death summary.
    pub fn recent_thoughts_of_life(&self, life_number: u64, limit: usize) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM activity
             WHERE kind = 'think' AND life_number = ?1
             ORDER BY seq DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![life_number as i64, limit as i64], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Oracle messages
    // ------------------------------------------------------------------

    pub fn record_oracle(&self, kind: OracleKind, text: &str) -> StoreResult<u64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO oracle_messages (kind, text, delivered_at) VALUES (?1, ?2, ?3)",
            params![kind.as_str(), text, now_str()],
        )?;
        Ok(conn.last_insert_rowid() as u64)
    }

    pub fn acknowledge_oracle(&self, id: u64) -> StoreResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE oracle_messages SET acknowledged_at = ?2
             WHERE id = ?1 AND acknowledged_at IS NULL",
            params![id as i64, now_str()],
        )?;
        Ok(changed > 0)
    }

    pub fn pending_oracle(&self) -> StoreResult<Option<OracleMessage>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, kind, text, delivered_at, acknowledged_at FROM oracle_messages
                 WHERE acknowledged_at IS NULL ORDER BY id ASC LIMIT 1",
                [],
                |row| {
                    Ok(OracleMessage {
                        id: row.get::<_, i64>(0)? as u64,
                        kind: OracleKind::parse(&row.get::<_, String>(1)?)
                            .unwrap_or(OracleKind::Oracle),
                        text: row.get(2)?,
                        delivered_at: parse_ts(Some(row.get::<_, String>(3)?))
                            .unwrap_or_else(Utc::now),
                        acknowledged_at: parse_ts(row.get::<_, Option<String>>(4)?),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

fn map_round(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoundRow> {
    Ok(RoundRow {
        id: row.get(0)?,
        life_number: row.get::<_, i64>(1)? as u64,
        opened_at: parse_ts(Some(row.get::<_, String>(2)?)).unwrap_or_else(Utc::now),
        closes_at: parse_ts(Some(row.get::<_, String>(3)?)).unwrap_or_else(Utc::now),
        live: row.get::<_, i64>(4)? as u64,
        die: row.get::<_, i64>(5)? as u64,
        status: RoundStatus::parse(&row.get::<_, String>(6)?).unwrap_or(RoundStatus::Open),
    })
}

fn ts_str(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn now_str() -> String {
    ts_str(Utc::now())
}

fn parse_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn genesis_state_is_life_zero_dead() {
        let store = Store::open_in_memory().unwrap();
        let state = store.life_state().unwrap();
        assert_eq!(state.life_number, 0);
        assert!(!state.is_alive);
    }

    #[test]
    fn life_numbers_are_monotonic() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.allocate_life_number().unwrap(), 1);
        store
            .record_birth(1, Utc::now(), BootstrapMode::BasicFacts, "m")
            .unwrap();
        store
            .record_death(1, Utc::now(), DeathCause::Manual, "")
            .unwrap();
        assert_eq!(store.allocate_life_number().unwrap(), 2);
    }

    #[test]
    fn death_closes_life_exactly_once() {
        let store = Store::open_in_memory().unwrap();
        let born = Utc::now();
        store
            .record_birth(1, born, BootstrapMode::BasicFacts, "m")
            .unwrap();
        store
            .record_death(1, born + Duration::seconds(5), DeathCause::Bankruptcy, "s")
            .unwrap();
        // Second death does not overwrite the first cause.
        store
            .record_death(1, born + Duration::seconds(9), DeathCause::Manual, "s2")
            .unwrap();
        let lives = store.life_history(10).unwrap();
        assert_eq!(lives.len(), 1);
        assert_eq!(lives[0].death_cause, Some(DeathCause::Bankruptcy));
        assert!(lives[0].died_at.unwrap() >= lives[0].born_at);
    }

    #[test]
    fn duplicate_vote_in_round_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let round = store.open_round(1, now, now + Duration::hours(1)).unwrap();
        let first = store.cast_vote(round, "fp-a", VoteChoice::Live, now).unwrap();
        assert_eq!(first.unwrap(), (1, 0));
        let dup = store
            .cast_vote(round, "fp-a", VoteChoice::Die, now + Duration::minutes(10))
            .unwrap();
        assert_eq!(dup.unwrap_err(), VoteRejection::Duplicate);
    }

    #[test]
    fn hourly_cooldown_spans_rounds() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let r1 = store.open_round(1, now, now + Duration::hours(1)).unwrap();
        store.cast_vote(r1, "fp-a", VoteChoice::Live, now).unwrap().unwrap();
        store.close_round(r1, RoundStatus::ClosedSurvived).unwrap();

        let r2 = store
            .open_round(1, now + Duration::minutes(30), now + Duration::minutes(90))
            .unwrap();
        let again = store
            .cast_vote(r2, "fp-a", VoteChoice::Live, now + Duration::minutes(30))
            .unwrap();
        match again.unwrap_err() {
            VoteRejection::Cooldown { retry_after_s } => {
                assert!(retry_after_s > 0 && retry_after_s <= 3600);
            }
            other => panic!("expected cooldown, got {other:?}"),
        }

        // After 61 minutes the same fingerprint is accepted on the new round.
        let later = store
            .cast_vote(r2, "fp-a", VoteChoice::Live, now + Duration::minutes(61))
            .unwrap();
        assert!(later.is_ok());
    }

    #[test]
    fn round_closes_exactly_once() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let round = store.open_round(1, now, now).unwrap();
        assert!(store.close_round(round, RoundStatus::ClosedDied).unwrap());
        assert!(!store.close_round(round, RoundStatus::ClosedSurvived).unwrap());
    }

    #[test]
    fn activity_seq_is_monotonic() {
        let store = Store::open_in_memory().unwrap();
        let a = store.append_activity(1, EventKind::Think, "first").unwrap();
        let b = store.append_activity(1, EventKind::Act, "second").unwrap();
        assert!(b.seq > a.seq);
        let recent = store.recent_activity(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].payload, "first");
    }

    #[test]
    fn oracle_ack_is_single_shot() {
        let store = Store::open_in_memory().unwrap();
        let id = store.record_oracle(OracleKind::Whisper, "be kind").unwrap();
        assert_eq!(store.pending_oracle().unwrap().unwrap().id, id);
        assert!(store.acknowledge_oracle(id).unwrap());
        assert!(!store.acknowledge_oracle(id).unwrap());
        assert!(store.pending_oracle().unwrap().is_none());
    }

    #[test]
    fn legacy_death_cause_reads_back() {
        let store = Store::open_in_memory().unwrap();
        store
            .record_birth(1, Utc::now(), BootstrapMode::BasicFacts, "m")
            .unwrap();
        {
            let conn = store.lock().unwrap();
            conn.execute(
                "UPDATE lives SET died_at = ?1, death_cause = 'token_exhaustion' WHERE life_number = 1",
                params![now_str()],
            )
            .unwrap();
        }
        let history = store.life_history(1).unwrap();
        assert_eq!(history[0].death_cause, Some(DeathCause::TokenExhaustion));
        assert!(history[0].death_cause.unwrap().is_legacy());
    }
}
