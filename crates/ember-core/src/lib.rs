//! # ember-core
//! Foundation types, reward math, and the storage trait for Embermine.

pub mod constants;
pub mod error;
pub mod reward;
pub mod traits;
pub mod types;
