//! Core identity reconciliation for contact submissions.
//! This crate is the single source of truth for identity graph invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::ResolverConfig;
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::contact::{Contact, ContactId, LinkPrecedence, NewContact};
pub use repo::contact_repo::{
    ContactRepository, ContactStore, RepoError, RepoResult, SqliteContactRepository,
    SqliteContactStore,
};
pub use repo::memory_repo::InMemoryContactStore;
pub use service::identity_service::{
    IdentifyError, IdentifyRequest, IdentifyResponse, IdentityService,
};
pub use service::reconcile::{ConsolidatedContact, ReconcileError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
