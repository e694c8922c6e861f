//! Error types for the Embermine engine.
//!
//! Pause skips and empty-network skips are cycle *outcomes*, not errors;
//! only genuine storage trouble surfaces here. Nothing in this taxonomy
//! propagates past the scheduler boundary; failures are cycle-local and
//! visible through logs and the health monitor.

use std::fmt;

use thiserror::Error;

/// Failure from the storage backend.
///
/// The backend crate is kept out of ember-core, so driver errors arrive as
/// strings (mirroring how aggregate storage errors are wrapped elsewhere in
/// the workspace).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Any error reported by the underlying database driver.
    #[error("storage backend: {0}")]
    Backend(String),
    /// The claimed block number was already minted by another commit.
    ///
    /// Raised when the unique constraint on the block sequence rejects an
    /// insert, typically a cycle that outlived its watchdog committing
    /// after a newer cycle already took the number.
    #[error("block {0} already minted")]
    DuplicateBlock(u64),
    /// A stored row failed to decode into its domain type.
    #[error("corrupt {entity} row: {detail}")]
    Corrupt {
        entity: &'static str,
        detail: String,
    },
}

impl StorageError {
    /// Wrap a driver error message.
    pub fn backend(err: impl fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// The phase of a production cycle in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// Reading the last persisted block number.
    Sequence,
    /// Checking the persisted pause flag.
    PauseCheck,
    /// The grouped active-miner read.
    Snapshot,
    /// The atomic block/reward/balance/boost commit.
    Commit,
}

impl CyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequence => "sequence",
            Self::PauseCheck => "pause check",
            Self::Snapshot => "snapshot",
            Self::Commit => "commit",
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed production cycle.
///
/// Tagged with the block number the cycle was attempting so operators can
/// line log entries up with the block sequence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CycleError {
    #[error("{} failed during {phase}: {source}", attempt_label(.attempted_block))]
    Storage {
        phase: CyclePhase,
        /// `None` while the sequence read itself is what failed; the cycle
        /// never learned which number it was attempting.
        attempted_block: Option<u64>,
        source: StorageError,
    },
    /// The spawned cycle task panicked. Counted as a failure like any other.
    #[error("cycle task panicked: {0}")]
    Panicked(String),
}

impl CycleError {
    /// Tag a storage error with its phase and the block being attempted.
    pub fn storage(
        phase: CyclePhase,
        attempted_block: Option<u64>,
        source: StorageError,
    ) -> Self {
        Self::Storage {
            phase,
            attempted_block,
            source,
        }
    }
}

fn attempt_label(attempted: &Option<u64>) -> String {
    match attempted {
        Some(n) => format!("cycle for block {n}"),
        None => "cycle".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_message_includes_phase_and_block() {
        let err = CycleError::storage(
            CyclePhase::Commit,
            Some(42),
            StorageError::Backend("disk full".into()),
        );
        let msg = err.to_string();
        assert!(msg.contains("block 42"), "{msg}");
        assert!(msg.contains("commit"), "{msg}");
        assert!(msg.contains("disk full"), "{msg}");
    }

    #[test]
    fn sequence_failure_names_no_block() {
        // The sequence read is what tells the cycle its number; when that
        // read fails there is no number to report.
        let err = CycleError::storage(
            CyclePhase::Sequence,
            None,
            StorageError::Backend("disk full".into()),
        );
        let msg = err.to_string();
        assert!(!msg.contains("block"), "{msg}");
        assert!(msg.contains("sequence"), "{msg}");
    }

    #[test]
    fn duplicate_block_names_the_number() {
        assert_eq!(
            StorageError::DuplicateBlock(7).to_string(),
            "block 7 already minted"
        );
    }

    #[test]
    fn phases_have_distinct_labels() {
        let labels = [
            CyclePhase::Sequence,
            CyclePhase::PauseCheck,
            CyclePhase::Snapshot,
            CyclePhase::Commit,
        ]
        .map(|p| p.as_str());
        for (i, a) in labels.iter().enumerate() {
            for b in &labels[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
