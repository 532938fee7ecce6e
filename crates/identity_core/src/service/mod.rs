//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into the `identify` use-case.
//! - Keep graph reduction logic pure and separate from persistence.

pub mod identity_service;
pub mod reconcile;
