//! Estoque Core - Shared types library.
//!
//! This crate provides the types used across all Estoque components:
//! - `server` - HTTP API for products, lotes and their audit history
//! - `cli` - Command-line tools for migrations, users, seeding and backups
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access, no HTTP.
//! The optional `postgres` feature adds `sqlx` encoding for ids and enums.
//!
//! # Modules
//!
//! - [`types`] - Type-safe IDs, units, products/lotes and history records

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
