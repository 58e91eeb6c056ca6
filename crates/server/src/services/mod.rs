//! Business logic services.
//!
//! # Services
//!
//! - `auth` - Password login and bearer tokens
//! - `history` - Audit records and batch-grouped history views
//! - `inventory` - Product and lote mutations with their audit trail

pub mod auth;
pub mod history;
pub mod inventory;

pub use auth::{AuthError, AuthService, LoginResponse, TokenIssuer};
pub use history::{AuditContext, HistoryError, HistoryService};
pub use inventory::{InventoryError, LoteService, ProductService};
