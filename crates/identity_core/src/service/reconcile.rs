//! Store-independent identity graph reduction.
//!
//! # Responsibility
//! - Elect the primary of a (possibly merged) identity graph.
//! - Plan the link rewrites that flatten the graph into a star.
//! - Decide whether a submission adds a new field combination.
//! - Shape one graph into the consolidated response view.
//!
//! # Invariants
//! - All functions are pure over already loaded contacts.
//! - Input slices are expected in ascending `created_at` order; ties keep
//!   slice order.

use crate::model::contact::{Contact, ContactId, LinkPrecedence};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Consolidated identity view returned to callers.
///
/// Serialized with the camelCase field names of the `/identify` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedContact {
    pub primary_contact_id: ContactId,
    /// Primary's email first, then secondaries' by seniority, deduplicated.
    pub emails: Vec<String>,
    /// Primary's phone number first, then secondaries' by seniority, deduplicated.
    pub phone_numbers: Vec<String>,
    /// Non-primary contact ids by seniority.
    pub secondary_contact_ids: Vec<ContactId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("no primary contact among {contacts} graph contacts")]
    MissingPrimary { contacts: usize },
}

/// One precedence rewrite required to flatten a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkUpdate {
    pub id: ContactId,
    pub link_precedence: LinkPrecedence,
    pub linked_id: Option<ContactId>,
}

/// Lookup keys for expanding matched contacts to their whole graphs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphKeys {
    /// Matched contact ids plus every root id reached from them.
    pub ids: BTreeSet<ContactId>,
    /// Root ids whose secondaries belong to the graph.
    pub primary_ids: BTreeSet<ContactId>,
}

/// Collects the ids needed to load every graph touched by `matched`.
///
/// A matched primary contributes its own id as root, a matched secondary
/// contributes the primary it links to.
pub fn collect_graph_keys(matched: &[Contact]) -> GraphKeys {
    let mut keys = GraphKeys::default();
    for contact in matched {
        keys.ids.insert(contact.id);
        if contact.is_primary() {
            keys.primary_ids.insert(contact.id);
        }
        if let Some(linked_id) = contact.linked_id {
            keys.primary_ids.insert(linked_id);
        }
    }
    keys.ids.extend(keys.primary_ids.iter().copied());
    keys
}

/// Returns the most senior contact. The first one wins on equal `created_at`.
pub fn elect_primary(contacts: &[Contact]) -> Option<&Contact> {
    contacts.iter().reduce(|oldest, current| {
        if current.created_at < oldest.created_at {
            current
        } else {
            oldest
        }
    })
}

/// Returns the rewrites that make `primary_id` the only primary and link
/// every other contact directly to it. Contacts already in place are skipped.
pub fn plan_link_updates(contacts: &[Contact], primary_id: ContactId) -> Vec<LinkUpdate> {
    contacts
        .iter()
        .filter_map(|contact| {
            let (link_precedence, linked_id) = if contact.id == primary_id {
                (LinkPrecedence::Primary, None)
            } else {
                (LinkPrecedence::Secondary, Some(primary_id))
            };
            (!contact.has_link(link_precedence, linked_id)).then_some(LinkUpdate {
                id: contact.id,
                link_precedence,
                linked_id,
            })
        })
        .collect()
}

/// Decides whether a submission must be recorded as a new secondary row.
///
/// True only when both fields are supplied, the exact pair is not stored yet
/// and at least one of the two values is already part of the graph.
pub fn needs_new_contact(
    contacts: &[Contact],
    email: Option<&str>,
    phone_number: Option<&str>,
) -> bool {
    let (Some(email), Some(phone_number)) = (email, phone_number) else {
        return false;
    };

    if contacts
        .iter()
        .any(|contact| contact.has_pair(email, phone_number))
    {
        return false;
    }

    contacts.iter().any(|contact| {
        contact.email.as_deref() == Some(email)
            || contact.phone_number.as_deref() == Some(phone_number)
    })
}

/// Shapes one flat graph into its consolidated view.
///
/// # Errors
/// - [`ReconcileError::MissingPrimary`] when no contact is flagged primary.
pub fn consolidate(contacts: &[Contact]) -> Result<ConsolidatedContact, ReconcileError> {
    let primary = contacts
        .iter()
        .find(|contact| contact.is_primary())
        .ok_or(ReconcileError::MissingPrimary {
            contacts: contacts.len(),
        })?;

    let mut secondaries: Vec<&Contact> = contacts
        .iter()
        .filter(|contact| contact.id != primary.id)
        .collect();
    secondaries.sort_by_key(|contact| contact.created_at);

    let mut emails = Vec::new();
    let mut phone_numbers = Vec::new();
    for contact in std::iter::once(primary).chain(secondaries.iter().copied()) {
        push_unique(&mut emails, contact.email.as_deref());
        push_unique(&mut phone_numbers, contact.phone_number.as_deref());
    }

    Ok(ConsolidatedContact {
        primary_contact_id: primary.id,
        emails,
        phone_numbers,
        secondary_contact_ids: secondaries.iter().map(|contact| contact.id).collect(),
    })
}

fn push_unique(values: &mut Vec<String>, candidate: Option<&str>) {
    if let Some(value) = candidate {
        if !values.iter().any(|existing| existing == value) {
            values.push(value.to_string());
        }
    }
}
