//! CLI command implementations.

pub mod backup;
pub mod migrate;
pub mod seed;
pub mod user;
