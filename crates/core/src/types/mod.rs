//! Core types for the inventory backend.
//!
//! This module provides type-safe wrappers for the domain concepts shared by
//! the server and the CLI.

pub mod history;
pub mod id;
pub mod inventory;
pub mod unit;

pub use history::*;
pub use id::*;
pub use inventory::*;
pub use unit::{Unit, UnitParseError};
