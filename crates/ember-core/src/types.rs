//! Domain types for the Embermine ledger.
//!
//! All monetary values are in cinders (CS, f64). Hashrate is a dimensionless
//! f64 rate; a participant's cached `hashrate` is eventually consistent with
//! the sum of their rig contributions (see
//! [`LedgerStore::reconcile_hashrate`](crate::traits::LedgerStore::reconcile_hashrate)).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A player of the idle game, as the engine sees them.
///
/// The engine only ever mutates `balance` (the committer) and `hashrate`
/// (the reconciliation pass). Participants are never deleted during normal
/// operation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Participant {
    pub id: i64,
    pub name: String,
    /// Balance in cinders. Non-negative by invariant; the engine only credits.
    pub balance: f64,
    /// Cached total hashrate, ground-truthed by the participant's rigs.
    pub hashrate: f64,
}

/// A mining rig owned by exactly one participant.
///
/// `unit_hashrate * quantity` is the rig's contribution to the owner's
/// cached hashrate.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OwnedRig {
    pub id: i64,
    pub participant_id: i64,
    pub unit_hashrate: f64,
    pub quantity: i64,
}

impl OwnedRig {
    /// Total hashrate this rig contributes to its owner.
    pub fn contribution(&self) -> f64 {
        self.unit_hashrate * self.quantity as f64
    }
}

/// One reward-distribution event.
///
/// Block numbers form a gapless sequence starting at 1. A block is created
/// exactly once per successful production cycle and never mutated.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Block {
    pub number: u64,
    /// Nominal reward split across miners, in cinders.
    pub reward: f64,
    /// Total boosted network hashrate observed at mint time.
    pub total_hashrate: f64,
    /// Number of participants rewarded by this block.
    pub miner_count: u32,
    /// Reserved multiplier, always 1.0 today.
    pub difficulty: f64,
    pub minted_at: DateTime<Utc>,
}

/// One participant's slice of one block.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BlockReward {
    pub block_number: u64,
    pub participant_id: i64,
    /// The participant's hashrate after hashrate boosts, at mint time.
    pub boosted_hashrate: f64,
    /// Share of network hashrate, recorded as a percentage for audit.
    pub share_percent: f64,
    /// Cinders credited to the participant's balance.
    pub reward: f64,
}

/// The two kinds of time-boxed percentage boosts.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BoostKind {
    /// Multiplies effective hashrate before shares are computed.
    Hashrate,
    /// Inflates the computed reward after shares are computed.
    Luck,
}

impl BoostKind {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hashrate => "hashrate",
            Self::Luck => "luck",
        }
    }
}

impl fmt::Display for BoostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BoostKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hashrate" => Ok(Self::Hashrate),
            "luck" => Ok(Self::Luck),
            other => Err(format!("unknown boost kind: {other}")),
        }
    }
}

/// A time-boxed percentage modifier on a participant.
///
/// Created by an external purchase/grant flow; read by the snapshot; flipped
/// inactive by the committer once `expires_at` has passed as of commit time.
/// Once observed as expired by a commit it is never counted active again.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BoostModifier {
    pub id: i64,
    pub participant_id: i64,
    pub kind: BoostKind,
    /// Magnitude in percent (e.g. 50.0 for +50%).
    pub percent: f64,
    pub activated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
}

impl BoostModifier {
    /// Whether this boost should count at the given instant.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at > now
    }
}

/// One row of the active-miner snapshot.
///
/// Produced by a single consistent read: every participant with cached
/// hashrate > 0, with live boost percentages summed per kind (simultaneous
/// boosts of the same kind stack additively).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MinerSnapshot {
    pub participant_id: i64,
    /// Raw cached hashrate, before boosts.
    pub hashrate: f64,
    /// Sum of live hashrate-boost percentages.
    pub hashrate_boost_percent: f64,
    /// Sum of live luck-boost percentages.
    pub luck_boost_percent: f64,
}

impl MinerSnapshot {
    /// Snapshot row with no boosts, mainly for tests.
    pub fn unboosted(participant_id: i64, hashrate: f64) -> Self {
        Self {
            participant_id,
            hashrate,
            hashrate_boost_percent: 0.0,
            luck_boost_percent: 0.0,
        }
    }
}
