//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the store capability set identity reconciliation runs against.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Soft-deleted contacts are invisible to every query.
//! - Repository APIs return semantic errors (`NotFound`, `Conflict`) in
//!   addition to DB transport errors.

pub mod contact_repo;
pub mod memory_repo;
