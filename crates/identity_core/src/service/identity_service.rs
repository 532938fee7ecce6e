//! Identity reconciliation use-case service.
//!
//! # Responsibility
//! - Validate `identify` input before any store access.
//! - Run match, expand, elect, normalize, gap-detect and re-fetch inside one
//!   store transaction.
//! - Retry the whole transaction on transient store conflicts, bounded by
//!   `ResolverConfig::max_attempts`.
//!
//! # Invariants
//! - After a successful call the touched graph is a flat star whose primary
//!   is its oldest active contact.
//! - Re-submitting an identical request writes nothing.
//! - Log events carry counts and ids only, never emails or phone numbers.

use crate::config::ResolverConfig;
use crate::model::contact::{ContactId, NewContact};
use crate::repo::contact_repo::{ContactRepository, ContactStore, RepoError};
use crate::service::reconcile::{
    collect_graph_keys, consolidate, elect_primary, needs_new_contact, plan_link_updates,
    ConsolidatedContact, ReconcileError,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;

const MISSING_FIELDS_MESSAGE: &str = "At least one of email or phoneNumber must be provided";

/// `identify` input. Empty strings count as not supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl IdentifyRequest {
    pub fn new(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
        }
    }

    /// Whether neither identifying field was supplied.
    pub fn is_empty(&self) -> bool {
        self.supplied_email().is_none() && self.supplied_phone_number().is_none()
    }

    fn supplied_email(&self) -> Option<&str> {
        self.email.as_deref().filter(|value| !value.is_empty())
    }

    fn supplied_phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref().filter(|value| !value.is_empty())
    }
}

/// `identify` output envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: ConsolidatedContact,
}

/// Failures surfaced by [`IdentityService::identify`].
#[derive(Debug, Error)]
pub enum IdentifyError {
    /// Neither identifying field was supplied. Client error.
    #[error("{0}")]
    Validation(String),
    /// The store kept reporting conflicts until the retry bound ran out.
    #[error("store conflict persisted after {attempts} attempts: {source}")]
    TransientStore {
        attempts: u32,
        #[source]
        source: RepoError,
    },
    /// A graph invariant did not hold after normalization.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),
    /// Non-transient persistence failure.
    #[error(transparent)]
    Store(#[from] RepoError),
}

impl From<ReconcileError> for IdentifyError {
    fn from(value: ReconcileError) -> Self {
        Self::InternalInconsistency(value.to_string())
    }
}

impl IdentifyError {
    /// Validation failure for a request carrying neither field.
    pub fn missing_fields() -> Self {
        Self::Validation(MISSING_FIELDS_MESSAGE.to_string())
    }

    /// Whether the caller, not the service, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// HTTP-equivalent status for adapters.
    pub fn status_code(&self) -> u16 {
        if self.is_client_error() {
            400
        } else {
            500
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::TransientStore { .. } => "store_conflict_exhausted",
            Self::InternalInconsistency(_) => "internal_inconsistency",
            Self::Store(_) => "store_failed",
        }
    }
}

/// What one successful transaction did, for logging.
#[derive(Debug)]
struct ReconcileOutcome {
    contact: ConsolidatedContact,
    matched: usize,
    gathered: usize,
    relinked: usize,
    created: Option<ContactId>,
}

/// Identity resolver over an injected store handle.
pub struct IdentityService<S: ContactStore> {
    store: S,
    config: ResolverConfig,
}

impl<S: ContactStore> IdentityService<S> {
    /// Creates a service with default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, ResolverConfig::default())
    }

    pub fn with_config(store: S, config: ResolverConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> ResolverConfig {
        self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Releases the store handle, e.g. to close it at shutdown.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Resolves the identity graph for one submission.
    ///
    /// # Contract
    /// - Fails with `Validation` before touching the store when neither field
    ///   is supplied.
    /// - Creates a primary when nothing matches, otherwise merges every
    ///   touched graph under its oldest contact.
    /// - Inserts a secondary only for a new pair of partly known values.
    ///
    /// # Errors
    /// - `TransientStore` once `max_attempts` transactions hit conflicts.
    /// - `InternalInconsistency` when the final graph has no primary.
    /// - `Store` for any other persistence failure.
    pub fn identify(
        &mut self,
        request: &IdentifyRequest,
    ) -> Result<IdentifyResponse, IdentifyError> {
        let started_at = Instant::now();
        let email = request.supplied_email();
        let phone_number = request.supplied_phone_number();

        if request.is_empty() {
            warn!("event=identify module=service status=error error_code=validation_failed");
            return Err(IdentifyError::missing_fields());
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = self
                .store
                .run_in_transaction(|repo| reconcile_in_tx(repo, email, phone_number));

            match result {
                Ok(outcome) => {
                    info!(
                        "event=identify module=service status=ok primary_id={} matched={} gathered={} relinked={} created_id={} attempt={} duration_ms={}",
                        outcome.contact.primary_contact_id,
                        outcome.matched,
                        outcome.gathered,
                        outcome.relinked,
                        outcome
                            .created
                            .map_or_else(|| "none".to_string(), |id| id.to_string()),
                        attempt,
                        started_at.elapsed().as_millis()
                    );
                    return Ok(IdentifyResponse {
                        contact: outcome.contact,
                    });
                }
                Err(IdentifyError::Store(err)) if err.is_transient() => {
                    if attempt >= max_attempts {
                        let err = IdentifyError::TransientStore {
                            attempts: attempt,
                            source: err,
                        };
                        log_failure(&err, attempt, started_at);
                        return Err(err);
                    }
                    warn!(
                        "event=identify module=service status=retry attempt={} max_attempts={} error={}",
                        attempt, max_attempts, err
                    );
                    attempt += 1;
                }
                Err(err) => {
                    log_failure(&err, attempt, started_at);
                    return Err(err);
                }
            }
        }
    }
}

fn log_failure(err: &IdentifyError, attempt: u32, started_at: Instant) {
    error!(
        "event=identify module=service status=error error_code={} attempt={} duration_ms={} error={}",
        err.error_code(),
        attempt,
        started_at.elapsed().as_millis(),
        err
    );
}

fn reconcile_in_tx(
    repo: &dyn ContactRepository,
    email: Option<&str>,
    phone_number: Option<&str>,
) -> Result<ReconcileOutcome, IdentifyError> {
    let matched = repo.find_active_by_email_or_phone(email, phone_number)?;

    if matched.is_empty() {
        let created = repo.insert_contact(&NewContact::primary(
            email.map(str::to_string),
            phone_number.map(str::to_string),
        ))?;
        return Ok(ReconcileOutcome {
            contact: consolidate(std::slice::from_ref(&created))?,
            matched: 0,
            gathered: 0,
            relinked: 0,
            created: Some(created.id),
        });
    }

    let keys = collect_graph_keys(&matched);
    let gathered = repo.find_active_by_ids_or_linked_ids(&keys.ids, &keys.primary_ids)?;
    let primary_id = elect_primary(&gathered)
        .map(|contact| contact.id)
        .ok_or_else(|| {
            IdentifyError::InternalInconsistency(format!(
                "graph expansion of {} matched contacts returned no rows",
                matched.len()
            ))
        })?;

    let updates = plan_link_updates(&gathered, primary_id);
    for update in &updates {
        repo.update_link(update.id, update.link_precedence, update.linked_id)?;
    }

    let created = if needs_new_contact(&gathered, email, phone_number) {
        let contact = repo.insert_contact(&NewContact::secondary(
            email.map(str::to_string),
            phone_number.map(str::to_string),
            primary_id,
        ))?;
        Some(contact.id)
    } else {
        None
    };

    let graph = repo.find_active_by_primary_or_linked(primary_id)?;
    Ok(ReconcileOutcome {
        contact: consolidate(&graph)?,
        matched: matched.len(),
        gathered: gathered.len(),
        relinked: updates.len(),
        created,
    })
}
