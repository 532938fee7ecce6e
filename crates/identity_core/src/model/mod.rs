//! Domain model for identity reconciliation.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//!
//! # Invariants
//! - Every contact is identified by a store-assigned `ContactId`.
//! - Deletion is represented by soft-delete tombstones, not hard delete.

pub mod contact;
