//! SQLite-backed persistent ledger storage.
//!
//! Implements [`LedgerStore`] on top of a single SQLite database. Every
//! multi-row mutation runs inside one immediate transaction, so a commit is
//! all-or-nothing: block row, reward rows, balance credits, and boost
//! expiries land together or not at all.
//!
//! Block numbering is claimed *inside* the commit transaction from
//! `MAX(number)`, with the primary key on `blocks.number` as a backstop: a
//! cycle that outlived its watchdog and commits late either claims a fresh
//! number or fails cleanly with [`StorageError::DuplicateBlock`]. No
//! in-memory counter is ever trusted for numbering.
//!
//! On first open, the schema is created automatically.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, TransactionBehavior};

use ember_core::constants::{INITIAL_DIFFICULTY, PAUSE_FLAG_KEY};
use ember_core::error::StorageError;
use ember_core::reward::BlockPlan;
use ember_core::traits::LedgerStore;
use ember_core::types::{Block, BlockReward, BoostKind, BoostModifier, MinerSnapshot, Participant};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS participants (
    id         INTEGER PRIMARY KEY,
    name       TEXT NOT NULL UNIQUE,
    balance    REAL NOT NULL DEFAULT 0 CHECK (balance >= 0),
    hashrate   REAL NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS rigs (
    id             INTEGER PRIMARY KEY,
    participant_id INTEGER NOT NULL REFERENCES participants(id),
    unit_hashrate  REAL NOT NULL,
    quantity       INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS blocks (
    number         INTEGER PRIMARY KEY,
    reward         REAL NOT NULL,
    total_hashrate REAL NOT NULL,
    miner_count    INTEGER NOT NULL,
    difficulty     REAL NOT NULL DEFAULT 1.0,
    minted_at      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS block_rewards (
    block_number     INTEGER NOT NULL REFERENCES blocks(number),
    participant_id   INTEGER NOT NULL REFERENCES participants(id),
    boosted_hashrate REAL NOT NULL,
    share_percent    REAL NOT NULL,
    reward           REAL NOT NULL,
    PRIMARY KEY (block_number, participant_id)
);

CREATE TABLE IF NOT EXISTS boosts (
    id             INTEGER PRIMARY KEY,
    participant_id INTEGER NOT NULL REFERENCES participants(id),
    kind           TEXT NOT NULL CHECK (kind IN ('hashrate', 'luck')),
    percent        REAL NOT NULL,
    activated_at   INTEGER NOT NULL,
    expires_at     INTEGER NOT NULL,
    active         INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rigs_participant ON rigs(participant_id);
CREATE INDEX IF NOT EXISTS idx_boosts_live ON boosts(participant_id, active, expires_at);
";

/// SQLite-backed ledger store.
///
/// The connection lives behind a mutex; callers block briefly the way the
/// rest of the engine blocks on storage. Safe to share across threads.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the ledger database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StorageError::backend)?;
            }
        }
        let conn = Connection::open(path).map_err(StorageError::backend)?;
        Self::bootstrap(conn)
    }

    /// In-memory ledger, used by tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(StorageError::backend)?;
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Connection) -> Result<Self, StorageError> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(StorageError::backend)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(StorageError::backend)?;
        conn.execute_batch(SCHEMA).map_err(StorageError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // --- Writes made by the out-of-scope admin/shop flows -------------

    /// Register a new participant. Returns its id.
    pub fn create_participant(&self, name: &str) -> Result<i64, StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO participants (name) VALUES (?1)",
            params![name],
        )
        .map_err(StorageError::backend)?;
        Ok(conn.last_insert_rowid())
    }

    /// Give a participant a rig. The cached hashrate is NOT updated here;
    /// that is the reconciliation pass's job.
    pub fn add_rig(
        &self,
        participant_id: i64,
        unit_hashrate: f64,
        quantity: i64,
    ) -> Result<i64, StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO rigs (participant_id, unit_hashrate, quantity) VALUES (?1, ?2, ?3)",
            params![participant_id, unit_hashrate, quantity],
        )
        .map_err(StorageError::backend)?;
        Ok(conn.last_insert_rowid())
    }

    /// Grant a time-boxed boost to a participant. Returns the boost id.
    pub fn grant_boost(
        &self,
        participant_id: i64,
        kind: BoostKind,
        percent: f64,
        activated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<i64, StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO boosts (participant_id, kind, percent, activated_at, expires_at, active)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)",
            params![
                participant_id,
                kind.as_str(),
                percent,
                activated_at.timestamp(),
                expires_at.timestamp()
            ],
        )
        .map_err(StorageError::backend)?;
        Ok(conn.last_insert_rowid())
    }

    /// Overwrite a participant's cached hashrate (admin drift injection).
    pub fn set_cached_hashrate(&self, participant_id: i64, hashrate: f64) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE participants SET hashrate = ?1 WHERE id = ?2",
            params![hashrate, participant_id],
        )
        .map_err(StorageError::backend)?;
        Ok(())
    }

    /// Set or clear the persisted pause flag.
    pub fn set_mining_paused(&self, paused: bool) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![PAUSE_FLAG_KEY, if paused { "1" } else { "0" }],
        )
        .map_err(StorageError::backend)?;
        Ok(())
    }

    // --- Reads for the admin layer and tests ---------------------------

    /// Fetch a participant by id.
    pub fn participant(&self, id: i64) -> Result<Option<Participant>, StorageError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, balance, hashrate FROM participants WHERE id = ?1",
            params![id],
            |row| {
                Ok(Participant {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    balance: row.get(2)?,
                    hashrate: row.get(3)?,
                })
            },
        )
        .map(Some)
        .or_else(swallow_not_found)
    }

    /// Fetch a block by number.
    pub fn block(&self, number: u64) -> Result<Option<Block>, StorageError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT number, reward, total_hashrate, miner_count, difficulty, minted_at
             FROM blocks WHERE number = ?1",
            params![number as i64],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )
        .map(Some)
        .or_else(swallow_not_found)?
        .map(block_from_row)
        .transpose()
    }

    /// Number of blocks ever minted.
    pub fn block_count(&self) -> Result<u64, StorageError> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(StorageError::backend)
    }

    /// All reward rows for a block, ordered by participant.
    pub fn rewards_for_block(&self, number: u64) -> Result<Vec<BlockReward>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT block_number, participant_id, boosted_hashrate, share_percent, reward
                 FROM block_rewards WHERE block_number = ?1 ORDER BY participant_id",
            )
            .map_err(StorageError::backend)?;
        let rows = stmt
            .query_map(params![number as i64], |row| {
                Ok(BlockReward {
                    block_number: row.get::<_, i64>(0)? as u64,
                    participant_id: row.get(1)?,
                    boosted_hashrate: row.get(2)?,
                    share_percent: row.get(3)?,
                    reward: row.get(4)?,
                })
            })
            .map_err(StorageError::backend)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::backend)
    }

    /// All boosts belonging to a participant, newest first.
    pub fn participant_boosts(&self, participant_id: i64) -> Result<Vec<BoostModifier>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, participant_id, kind, percent, activated_at, expires_at, active
                 FROM boosts WHERE participant_id = ?1 ORDER BY id DESC",
            )
            .map_err(StorageError::backend)?;
        let rows = stmt
            .query_map(params![participant_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, bool>(6)?,
                ))
            })
            .map_err(StorageError::backend)?;

        let mut boosts = Vec::new();
        for row in rows {
            let (id, participant_id, kind, percent, activated_at, expires_at, active) =
                row.map_err(StorageError::backend)?;
            boosts.push(BoostModifier {
                id,
                participant_id,
                kind: kind.parse().map_err(|detail| StorageError::Corrupt {
                    entity: "boost",
                    detail,
                })?,
                percent,
                activated_at: timestamp(activated_at, "boost")?,
                expires_at: timestamp(expires_at, "boost")?,
                active,
            });
        }
        Ok(boosts)
    }
}

impl LedgerStore for SqliteStore {
    fn last_block_number(&self) -> Result<u64, StorageError> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COALESCE(MAX(number), 0) FROM blocks", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as u64)
        .map_err(StorageError::backend)
    }

    fn mining_paused(&self) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![PAUSE_FLAG_KEY],
            |row| row.get::<_, String>(0),
        )
        .map(Some)
        .or_else(swallow_not_found)
        .map(|value| matches!(value.as_deref(), Some("1") | Some("true")))
    }

    fn snapshot_active_miners(&self, now: DateTime<Utc>) -> Result<Vec<MinerSnapshot>, StorageError> {
        // One statement, one consistent view: boost states cannot change
        // between rows of the same query.
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT p.id,
                        p.hashrate,
                        COALESCE(SUM(CASE WHEN b.kind = 'hashrate' THEN b.percent END), 0),
                        COALESCE(SUM(CASE WHEN b.kind = 'luck' THEN b.percent END), 0)
                 FROM participants p
                 LEFT JOIN boosts b
                   ON b.participant_id = p.id
                  AND b.active = 1
                  AND b.expires_at > ?1
                 WHERE p.hashrate > 0
                 GROUP BY p.id
                 ORDER BY p.id",
            )
            .map_err(StorageError::backend)?;
        let rows = stmt
            .query_map(params![now.timestamp()], |row| {
                Ok(MinerSnapshot {
                    participant_id: row.get(0)?,
                    hashrate: row.get(1)?,
                    hashrate_boost_percent: row.get(2)?,
                    luck_boost_percent: row.get(3)?,
                })
            })
            .map_err(StorageError::backend)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::backend)
    }

    fn commit_block(&self, plan: &BlockPlan, now: DateTime<Utc>) -> Result<Block, StorageError> {
        let mut conn = self.conn.lock();
        // Immediate transaction: take the write lock up front so the number
        // claimed below is ours until commit or rollback.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::backend)?;

        let next = tx
            .query_row("SELECT COALESCE(MAX(number), 0) FROM blocks", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(StorageError::backend)? as u64
            + 1;

        tx.execute(
            "INSERT INTO blocks (number, reward, total_hashrate, miner_count, difficulty, minted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                next as i64,
                plan.block_reward,
                plan.total_hashrate,
                plan.miner_count() as i64,
                INITIAL_DIFFICULTY,
                now.timestamp()
            ],
        )
        .map_err(|e| constraint_as_duplicate(e, next))?;

        {
            let mut insert_reward = tx
                .prepare(
                    "INSERT INTO block_rewards
                         (block_number, participant_id, boosted_hashrate, share_percent, reward)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(StorageError::backend)?;
            let mut credit_balance = tx
                .prepare("UPDATE participants SET balance = balance + ?1 WHERE id = ?2")
                .map_err(StorageError::backend)?;

            for share in &plan.shares {
                insert_reward
                    .execute(params![
                        next as i64,
                        share.participant_id,
                        share.boosted_hashrate,
                        share.share_percent(),
                        share.reward
                    ])
                    .map_err(StorageError::backend)?;
                credit_balance
                    .execute(params![share.reward, share.participant_id])
                    .map_err(StorageError::backend)?;
            }
        }

        // Commit-time now governs expiry, whatever the snapshot saw earlier.
        tx.execute(
            "UPDATE boosts SET active = 0 WHERE active = 1 AND expires_at <= ?1",
            params![now.timestamp()],
        )
        .map_err(StorageError::backend)?;

        tx.commit().map_err(StorageError::backend)?;

        Ok(Block {
            number: next,
            reward: plan.block_reward,
            total_hashrate: plan.total_hashrate,
            miner_count: plan.miner_count(),
            difficulty: INITIAL_DIFFICULTY,
            minted_at: now,
        })
    }

    fn reconcile_hashrate(&self) -> Result<u64, StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(StorageError::backend)?;

        let rows: Vec<(i64, f64, f64)> = {
            let mut stmt = tx
                .prepare(
                    "SELECT p.id,
                            p.hashrate,
                            COALESCE(SUM(r.unit_hashrate * r.quantity), 0)
                     FROM participants p
                     LEFT JOIN rigs r ON r.participant_id = p.id
                     GROUP BY p.id",
                )
                .map_err(StorageError::backend)?;
            let mapped = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                    ))
                })
                .map_err(StorageError::backend)?;
            mapped
                .collect::<Result<Vec<_>, _>>()
                .map_err(StorageError::backend)?
        };

        let mut corrected = 0u64;
        {
            let mut update = tx
                .prepare("UPDATE participants SET hashrate = ?1 WHERE id = ?2")
                .map_err(StorageError::backend)?;
            for (id, cached, actual) in rows {
                if cached != actual {
                    update
                        .execute(params![actual, id])
                        .map_err(StorageError::backend)?;
                    corrected += 1;
                }
            }
        }

        tx.commit().map_err(StorageError::backend)?;
        Ok(corrected)
    }
}

/// Map "no rows" to `None`; pass other driver errors through.
fn swallow_not_found<T>(err: rusqlite::Error) -> Result<Option<T>, StorageError> {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(StorageError::backend(other)),
    }
}

/// A constraint violation on the block insert means the claimed number was
/// already minted (a late commit lost the race).
fn constraint_as_duplicate(err: rusqlite::Error, number: u64) -> StorageError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            StorageError::DuplicateBlock(number)
        }
        _ => StorageError::backend(err),
    }
}

fn timestamp(secs: i64, entity: &'static str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp(secs, 0).ok_or(StorageError::Corrupt {
        entity,
        detail: format!("timestamp out of range: {secs}"),
    })
}

fn block_from_row(
    (number, reward, total_hashrate, miner_count, difficulty, minted_at): (i64, f64, f64, i64, f64, i64),
) -> Result<Block, StorageError> {
    Ok(Block {
        number: number as u64,
        reward,
        total_hashrate,
        miner_count: miner_count as u32,
        difficulty,
        minted_at: timestamp(minted_at, "block")?,
    })
}
