//! Contact domain model.
//!
//! # Responsibility
//! - Define the single stored entity used by identity reconciliation.
//! - Provide lifecycle helpers for link precedence and soft-delete state.
//!
//! # Invariants
//! - `id` is assigned by the store and never reused.
//! - A primary has `linked_id == None`; a secondary always has `Some(primary)`.
//! - `deleted_at` is the source of truth for tombstone state.

use serde::{Deserialize, Serialize};

/// Store-assigned contact identifier, monotonic in insertion order.
pub type ContactId = i64;

/// Position of a contact inside its identity graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPrecedence {
    /// Canonical, oldest contact of a graph.
    Primary,
    /// Contact merged into a primary's graph.
    Secondary,
}

impl LinkPrecedence {
    /// Stable storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    /// Parses the storage representation produced by [`LinkPrecedence::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

/// Persisted contact row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    /// Primary this contact links to. `None` for primaries.
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
    /// Unix epoch milliseconds. Decides seniority inside a graph.
    pub created_at: i64,
    /// Unix epoch milliseconds.
    pub updated_at: i64,
    /// Soft delete tombstone. Deleted contacts never take part in matching.
    pub deleted_at: Option<i64>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Returns whether this contact is visible to matching and output.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Returns whether this contact already sits at the requested position.
    ///
    /// Used to skip no-op writes during precedence normalization.
    pub fn has_link(&self, precedence: LinkPrecedence, linked_id: Option<ContactId>) -> bool {
        self.link_precedence == precedence && self.linked_id == linked_id
    }

    /// Returns whether this contact carries exactly the given field pair.
    pub fn has_pair(&self, email: &str, phone_number: &str) -> bool {
        self.email.as_deref() == Some(email) && self.phone_number.as_deref() == Some(phone_number)
    }
}

/// Insert payload. The store assigns `id`, `created_at` and `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub link_precedence: LinkPrecedence,
    pub linked_id: Option<ContactId>,
}

impl NewContact {
    /// Builds a fresh primary with no link.
    pub fn primary(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
            link_precedence: LinkPrecedence::Primary,
            linked_id: None,
        }
    }

    /// Builds a secondary linked to `primary_id`.
    pub fn secondary(
        email: Option<String>,
        phone_number: Option<String>,
        primary_id: ContactId,
    ) -> Self {
        Self {
            email,
            phone_number,
            link_precedence: LinkPrecedence::Secondary,
            linked_id: Some(primary_id),
        }
    }
}
