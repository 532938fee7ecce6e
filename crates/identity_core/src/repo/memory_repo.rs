//! In-memory contact store.
//!
//! # Responsibility
//! - Provide a database-free `ContactStore` for service tests and embedding.
//! - Mirror SQLite query ordering and transaction rollback semantics.
//!
//! # Invariants
//! - Work runs against a snapshot; the snapshot replaces committed state only
//!   when the transaction body returns `Ok`.
//! - `created_at`/`updated_at` come from a logical millisecond clock that
//!   advances on every write, so insertion order equals seniority order.

use crate::model::contact::{Contact, ContactId, LinkPrecedence, NewContact};
use crate::repo::contact_repo::{ContactRepository, ContactStore, RepoError, RepoResult};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;

const DEFAULT_CLOCK_START_MS: i64 = 1_700_000_000_000;

/// Transactional in-memory store.
#[derive(Debug, Clone)]
pub struct InMemoryContactStore {
    contacts: Vec<Contact>,
    next_id: ContactId,
    clock_ms: i64,
    pending_conflicts: u32,
    transactions_started: u32,
}

impl Default for InMemoryContactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryContactStore {
    pub fn new() -> Self {
        Self {
            contacts: Vec::new(),
            next_id: 1,
            clock_ms: DEFAULT_CLOCK_START_MS,
            pending_conflicts: 0,
            transactions_started: 0,
        }
    }

    /// Seeds the store with existing rows, e.g. fixtures with chosen timestamps.
    ///
    /// Later inserts get ids and timestamps strictly greater than any seeded value.
    pub fn with_contacts(contacts: Vec<Contact>) -> Self {
        let next_id = contacts.iter().map(|c| c.id).max().unwrap_or(0) + 1;
        let clock_ms = contacts
            .iter()
            .map(|c| c.created_at.max(c.updated_at))
            .max()
            .map_or(DEFAULT_CLOCK_START_MS, |latest| latest + 1);
        Self {
            contacts,
            next_id,
            clock_ms,
            pending_conflicts: 0,
            transactions_started: 0,
        }
    }

    /// Makes the next `count` transactions fail with [`RepoError::Conflict`]
    /// before running any work.
    pub fn fail_next_transactions(&mut self, count: u32) {
        self.pending_conflicts = count;
    }

    /// All committed rows, including soft-deleted ones, in insertion order.
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// Number of transactions begun so far, including failed ones.
    pub fn transactions_started(&self) -> u32 {
        self.transactions_started
    }
}

impl ContactStore for InMemoryContactStore {
    fn run_in_transaction<T, E, F>(&mut self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn ContactRepository) -> Result<T, E>,
        E: From<RepoError>,
    {
        self.transactions_started += 1;
        if self.pending_conflicts > 0 {
            self.pending_conflicts -= 1;
            return Err(RepoError::Conflict("injected in-memory conflict".to_string()).into());
        }

        let tx = InMemoryTransaction {
            contacts: RefCell::new(self.contacts.clone()),
            next_id: Cell::new(self.next_id),
            clock_ms: Cell::new(self.clock_ms),
        };
        let value = work(&tx)?;

        self.contacts = tx.contacts.into_inner();
        self.next_id = tx.next_id.get();
        self.clock_ms = tx.clock_ms.get();
        Ok(value)
    }
}

struct InMemoryTransaction {
    contacts: RefCell<Vec<Contact>>,
    next_id: Cell<ContactId>,
    clock_ms: Cell<i64>,
}

impl InMemoryTransaction {
    fn tick(&self) -> i64 {
        let now = self.clock_ms.get();
        self.clock_ms.set(now + 1);
        now
    }

    fn select(&self, predicate: impl Fn(&Contact) -> bool) -> Vec<Contact> {
        let mut selected: Vec<Contact> = self
            .contacts
            .borrow()
            .iter()
            .filter(|contact| contact.is_active() && predicate(contact))
            .cloned()
            .collect();
        selected.sort_by_key(|contact| (contact.created_at, contact.id));
        selected
    }
}

impl ContactRepository for InMemoryTransaction {
    fn find_active_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>> {
        if email.is_none() && phone_number.is_none() {
            return Ok(Vec::new());
        }
        Ok(self.select(|contact| {
            (email.is_some() && contact.email.as_deref() == email)
                || (phone_number.is_some() && contact.phone_number.as_deref() == phone_number)
        }))
    }

    fn find_active_by_ids_or_linked_ids(
        &self,
        ids: &BTreeSet<ContactId>,
        linked_ids: &BTreeSet<ContactId>,
    ) -> RepoResult<Vec<Contact>> {
        Ok(self.select(|contact| {
            ids.contains(&contact.id)
                || contact
                    .linked_id
                    .is_some_and(|linked_id| linked_ids.contains(&linked_id))
        }))
    }

    fn find_active_by_primary_or_linked(
        &self,
        primary_id: ContactId,
    ) -> RepoResult<Vec<Contact>> {
        Ok(self.select(|contact| contact.id == primary_id || contact.linked_id == Some(primary_id)))
    }

    fn insert_contact(&self, contact: &NewContact) -> RepoResult<Contact> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let now = self.tick();
        let created = Contact {
            id,
            email: contact.email.clone(),
            phone_number: contact.phone_number.clone(),
            linked_id: contact.linked_id,
            link_precedence: contact.link_precedence,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.contacts.borrow_mut().push(created.clone());
        Ok(created)
    }

    fn update_link(
        &self,
        id: ContactId,
        link_precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> RepoResult<()> {
        let now = self.tick();
        let mut contacts = self.contacts.borrow_mut();
        let contact = contacts
            .iter_mut()
            .find(|contact| contact.id == id)
            .ok_or(RepoError::NotFound(id))?;
        contact.link_precedence = link_precedence;
        contact.linked_id = linked_id;
        contact.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryContactStore;
    use crate::model::contact::NewContact;
    use crate::repo::contact_repo::{ContactStore, RepoError};

    #[test]
    fn failed_transaction_discards_writes() {
        let mut store = InMemoryContactStore::new();
        let result = store.run_in_transaction(|repo| -> Result<(), RepoError> {
            repo.insert_contact(&NewContact::primary(Some("a@x.com".to_string()), None))?;
            Err(RepoError::InvalidData("abort".to_string()))
        });

        assert!(result.is_err());
        assert!(store.contacts().is_empty());
    }

    #[test]
    fn injected_conflicts_fail_before_work_runs() {
        let mut store = InMemoryContactStore::new();
        store.fail_next_transactions(1);

        let first = store.run_in_transaction(|_| -> Result<(), RepoError> { Ok(()) });
        assert!(matches!(first, Err(RepoError::Conflict(_))));
        let second = store.run_in_transaction(|_| -> Result<(), RepoError> { Ok(()) });
        assert!(second.is_ok());
        assert_eq!(store.transactions_started(), 2);
    }

    #[test]
    fn inserts_get_increasing_ids_and_timestamps() {
        let mut store = InMemoryContactStore::new();
        let (first, second) = store
            .run_in_transaction(|repo| -> Result<_, RepoError> {
                let first = repo.insert_contact(&NewContact::primary(None, Some("1".into())))?;
                let second = repo.insert_contact(&NewContact::primary(None, Some("2".into())))?;
                Ok((first, second))
            })
            .unwrap();

        assert!(second.id > first.id);
        assert!(second.created_at > first.created_at);
    }
}
