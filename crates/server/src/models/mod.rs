//! Store-facing input and output models.
//!
//! The public resource shapes (`Product`, `Lote`, history records) live in
//! `estoque-core`; these types describe what the stores accept and the
//! before/after state they hand back for auditing.

pub mod inventory;
pub mod user;

pub use inventory::{
    LoteMutation, LotePatch, NewLote, NewProduct, ProductPatch, ProductRemoval, ProductTotals,
    ProductUpdate, QUANTITY_SCALE, max_quantity,
};
pub use user::{User, UserCredentials};
