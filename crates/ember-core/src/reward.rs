//! Pure reward math over an active-miner snapshot.
//!
//! Given the snapshot rows, [`plan_block`] computes each miner's boosted
//! hashrate, network share, and final reward:
//!
//! 1. `boosted = raw * (1 + hashrate_boost_percent / 100)`
//! 2. `network_total = Σ boosted`
//! 3. `share = boosted / network_total`
//! 4. `reward = BLOCK_REWARD * share * (1 + luck_boost_percent / 100)`
//!
//! An empty network (`network_total == 0`) yields `None`, a normal outcome
//! meaning no block should be minted, not an error. With no luck boosts the
//! rewards sum to the nominal block reward within
//! [`REWARD_EPSILON`](crate::constants::REWARD_EPSILON) relative error; luck
//! boosts deliberately push the sum above it.

use crate::types::MinerSnapshot;

/// One miner's computed slice of a block, before it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardShare {
    pub participant_id: i64,
    /// Hashrate after hashrate boosts.
    pub boosted_hashrate: f64,
    /// Fraction of network hashrate, in (0, 1].
    pub share: f64,
    /// Final reward in cinders, luck boosts applied.
    pub reward: f64,
}

impl RewardShare {
    /// Share as a percentage, the form recorded for audit.
    pub fn share_percent(&self) -> f64 {
        self.share * 100.0
    }
}

/// A fully computed block, ready for the transactional committer.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockPlan {
    /// Nominal reward being split, in cinders.
    pub block_reward: f64,
    /// Total boosted network hashrate.
    pub total_hashrate: f64,
    /// One entry per rewarded miner, in snapshot order.
    pub shares: Vec<RewardShare>,
}

impl BlockPlan {
    /// Number of miners rewarded by this plan.
    pub fn miner_count(&self) -> u32 {
        self.shares.len() as u32
    }

    /// Sum of final rewards, in cinders.
    ///
    /// Equals `block_reward` (within epsilon) when no luck boosts were
    /// active; may exceed it otherwise.
    pub fn distributed_total(&self) -> f64 {
        self.shares.iter().map(|s| s.reward).sum()
    }
}

/// Compute the reward split for one block.
///
/// Returns `None` when no participant has nonzero boosted hashrate; the
/// cycle should skip block production entirely. Rows whose share rounds to
/// zero are still emitted as long as their boosted hashrate is nonzero, so
/// the per-block rows always account for the full network total.
pub fn plan_block(snapshot: &[MinerSnapshot], block_reward: f64) -> Option<BlockPlan> {
    let mut boosted: Vec<(i64, f64, f64)> = Vec::with_capacity(snapshot.len());
    let mut total_hashrate = 0.0_f64;

    for row in snapshot {
        let rate = row.hashrate * (1.0 + row.hashrate_boost_percent / 100.0);
        if rate <= 0.0 {
            continue;
        }
        total_hashrate += rate;
        boosted.push((row.participant_id, rate, row.luck_boost_percent));
    }

    if total_hashrate <= 0.0 {
        return None;
    }

    let shares = boosted
        .into_iter()
        .map(|(participant_id, rate, luck_percent)| {
            let share = rate / total_hashrate;
            let nominal = block_reward * share;
            RewardShare {
                participant_id,
                boosted_hashrate: rate,
                share,
                reward: nominal * (1.0 + luck_percent / 100.0),
            }
        })
        .collect();

    Some(BlockPlan {
        block_reward,
        total_hashrate,
        shares,
    })
}
