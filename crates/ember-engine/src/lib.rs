//! # ember-engine
//! The Embermine production engine: SQLite-backed ledger storage, the
//! block-production scheduler with its concurrency guard and watchdog, and
//! the passive health monitor.

pub mod config;
pub mod health;
pub mod scheduler;
pub mod storage;

pub use config::EngineConfig;
pub use health::{HealthMonitor, HealthReport, HealthStatus};
pub use scheduler::{CycleOutcome, Scheduler};
pub use storage::SqliteStore;
