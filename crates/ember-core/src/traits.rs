//! Trait interface between the engine and its storage backend.
//!
//! [`LedgerStore`] is the contract the scheduler drives a production cycle
//! through. The production implementation is the SQLite-backed store in
//! ember-engine; tests substitute in-memory or failing doubles.

use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::reward::BlockPlan;
use crate::types::{Block, MinerSnapshot};

/// Transactional access to the mining ledger.
///
/// All methods are synchronous storage calls; the scheduler runs them off
/// the async runtime's worker threads. Implementations must be safe to call
/// from multiple threads; the reconciliation pass may run concurrently
/// with a production cycle.
pub trait LedgerStore: Send + Sync {
    /// Highest block number ever committed, or 0 for a fresh ledger.
    ///
    /// This durable value, not any in-memory counter, is the source of
    /// truth for block numbering across restarts.
    fn last_block_number(&self) -> Result<u64, StorageError>;

    /// Whether the persisted `mining_paused` flag is set.
    ///
    /// Checked once per cycle; a set flag skips production without stopping
    /// the scheduler.
    fn mining_paused(&self) -> Result<bool, StorageError>;

    /// One consistent read of every participant with cached hashrate > 0,
    /// with live boost percentages at `now` summed per kind.
    fn snapshot_active_miners(&self, now: DateTime<Utc>) -> Result<Vec<MinerSnapshot>, StorageError>;

    /// Atomically mint the next block from a computed plan.
    ///
    /// In one transaction: claims the next block number from the durable
    /// sequence, inserts the block row, inserts one reward row per miner,
    /// credits each miner's balance, and deactivates boosts whose expiry has
    /// passed as of `now`. On any failure nothing is observable: no block
    /// without rewards, no rewards without balance credit.
    ///
    /// `now` is the transaction's logical commit time; it governs boost
    /// expiry regardless of what the earlier snapshot saw.
    fn commit_block(&self, plan: &BlockPlan, now: DateTime<Utc>) -> Result<Block, StorageError>;

    /// Recompute every participant's cached hashrate from their rigs,
    /// writing back only rows that disagree. Returns the number of
    /// corrected participants.
    ///
    /// Idempotent: a second consecutive run performs zero writes. Never
    /// part of the per-block hot path.
    fn reconcile_hashrate(&self) -> Result<u64, StorageError>;
}
