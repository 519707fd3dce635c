//! Migration pipeline - batch jobs that move HOA records out of the
//! spreadsheet-style source API into PostgreSQL
//!
//! Stage 1 (`fetch` + `stage`) captures raw source tables verbatim.
//! Stage 2 (`transform` + `write`) normalizes staged records into target
//! entities, resolving cross-table links through the `identity` map.
//! The staging table and the identity map are the only coupling between
//! stages, which is what makes every stage safe to re-run.

pub mod fetch;
pub mod identity;
pub mod stage;
pub mod transform;
pub mod types;
pub mod utils;
pub mod write;

pub use types::*;
