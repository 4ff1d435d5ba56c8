//! Item model shared by every repository.
//!
//! # Responsibility
//! - Define the base document shape (`ItemHeader`) and the `Item` contract.
//! - Describe optional capabilities the engine reacts to at runtime.
//!
//! # Invariants
//! - Every stored item carries `id`, `type` and, once written, `_etag`.

pub mod item;
