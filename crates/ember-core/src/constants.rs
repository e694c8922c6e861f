//! Engine constants. All monetary values are in cinders (CS).

/// Nominal reward minted per block, in cinders.
///
/// The full amount is split across active miners in proportion to boosted
/// hashrate. Luck boosts can push the distributed total above this figure.
pub const BLOCK_REWARD: f64 = 100_000.0;

/// Default wall-clock interval between production cycles, in seconds.
pub const DEFAULT_CYCLE_INTERVAL_SECS: u64 = 300;

/// Default watchdog timeout for a single cycle, in seconds.
///
/// Must be strictly less than the cycle interval so a stuck cycle releases
/// the guard before the next tick arrives.
pub const DEFAULT_CYCLE_TIMEOUT_SECS: u64 = 240;

/// Consecutive cycle failures at which the health status flips to degraded.
pub const DEGRADED_FAILURE_THRESHOLD: u32 = 3;

/// Default consecutive-failure count worth external alerting.
///
/// Crossing this threshold logs at `error` level; the scheduler keeps
/// running (alert-only policy).
pub const DEFAULT_ALERT_FAILURE_THRESHOLD: u32 = 5;

/// How long the engine may go without a successful cycle before the health
/// status degrades, in seconds.
pub const STALENESS_WINDOW_SECS: i64 = 900;

/// Relative tolerance for reward-conservation checks.
///
/// With no luck boosts active, the sum of a block's rewards must equal the
/// nominal block reward within this relative epsilon. f64 accumulation
/// across realistic miner counts stays well inside it.
pub const REWARD_EPSILON: f64 = 1e-6;

/// Reserved difficulty multiplier recorded on every block.
///
/// Currently always 1.0; persisted so a future difficulty mechanic does not
/// need a schema migration.
pub const INITIAL_DIFFICULTY: f64 = 1.0;

/// Key of the persisted pause flag checked once per cycle.
pub const PAUSE_FLAG_KEY: &str = "mining_paused";
