//! Stratus Core
//!
//! Resource model, provider trait and the reconciliation machinery shared by
//! every Stratus provider: bounded retries, status polling, composite
//! identifiers and per-object locks.

pub mod composite_id;
pub mod config;
pub mod error;
pub mod lock;
pub mod provider;
pub mod reconcile;
pub mod resource;
pub mod result_file;
pub mod retry;
pub mod schema;

#[doc(hidden)]
pub mod __private {
    pub use serde;
}
