//! Contact repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide the predicate queries and writes identity reconciliation needs.
//! - Compose them inside one atomic transaction per call.
//! - Keep SQL details inside core persistence boundary.
//!
//! # Invariants
//! - Every `find_*` query excludes soft-deleted rows and returns contacts in
//!   ascending `created_at` order, ties broken by ascending `id`.
//! - Read paths reject invalid persisted state instead of masking it.
//! - SQLite transactions start with `BEGIN IMMEDIATE`, so two concurrent
//!   transactions never both read before either writes.

use crate::db::{open_db, open_db_in_memory, DbError, NOW_MS_SQL};
use crate::model::contact::{Contact, ContactId, LinkPrecedence, NewContact};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, Row, TransactionBehavior};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

const CONTACT_SELECT_SQL: &str = "SELECT
    id,
    email,
    phone_number,
    linked_id,
    link_precedence,
    created_at,
    updated_at,
    deleted_at
FROM contacts";

const CONTACT_ORDER_SQL: &str = " ORDER BY created_at ASC, id ASC";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for contact persistence and query operations.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("contact not found: {0}")]
    NotFound(ContactId),
    #[error("invalid persisted contact data: {0}")]
    InvalidData(String),
    /// The store aborted the transaction because of a concurrent writer.
    #[error("transaction conflict: {0}")]
    Conflict(String),
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl RepoError {
    /// Returns whether retrying the whole transaction may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::Db(DbError::Sqlite(err)) => matches!(
                err.sqlite_error_code(),
                Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }
}

/// Query and write primitives used by identity reconciliation.
pub trait ContactRepository {
    /// Active contacts whose email or phone equals one of the supplied values.
    ///
    /// Absent values contribute no condition; with neither supplied the
    /// result is empty.
    fn find_active_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>>;
    /// Active contacts whose id is in `ids` or whose `linked_id` is in `linked_ids`.
    fn find_active_by_ids_or_linked_ids(
        &self,
        ids: &BTreeSet<ContactId>,
        linked_ids: &BTreeSet<ContactId>,
    ) -> RepoResult<Vec<Contact>>;
    /// Active contacts that are `primary_id` itself or link to it.
    fn find_active_by_primary_or_linked(&self, primary_id: ContactId)
        -> RepoResult<Vec<Contact>>;
    /// Inserts one contact and returns it with store-assigned fields.
    fn insert_contact(&self, contact: &NewContact) -> RepoResult<Contact>;
    /// Rewrites the link position of one contact.
    fn update_link(
        &self,
        id: ContactId,
        link_precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> RepoResult<()>;
}

/// Store handle able to run repository work atomically.
pub trait ContactStore {
    /// Runs `work` inside one transaction.
    ///
    /// The transaction commits only when `work` returns `Ok`; any `Err`
    /// discards every write made inside it.
    fn run_in_transaction<T, E, F>(&mut self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn ContactRepository) -> Result<T, E>,
        E: From<RepoError>;
}

/// SQLite-backed contact repository over a borrowed connection or transaction.
pub struct SqliteContactRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteContactRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn get_contact(&self, id: ContactId) -> RepoResult<Option<Contact>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CONTACT_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_contact_row(row)?));
        }
        Ok(None)
    }

    fn query_contacts(&self, sql: &str, bind_values: Vec<Value>) -> RepoResult<Vec<Contact>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut contacts = Vec::new();
        while let Some(row) = rows.next()? {
            contacts.push(parse_contact_row(row)?);
        }
        Ok(contacts)
    }
}

impl ContactRepository for SqliteContactRepository<'_> {
    fn find_active_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>> {
        let mut conditions = Vec::new();
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(email) = email {
            conditions.push("email = ?");
            bind_values.push(Value::Text(email.to_string()));
        }
        if let Some(phone_number) = phone_number {
            conditions.push("phone_number = ?");
            bind_values.push(Value::Text(phone_number.to_string()));
        }
        if conditions.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "{CONTACT_SELECT_SQL} WHERE deleted_at IS NULL AND ({}){CONTACT_ORDER_SQL};",
            conditions.join(" OR ")
        );
        self.query_contacts(&sql, bind_values)
    }

    fn find_active_by_ids_or_linked_ids(
        &self,
        ids: &BTreeSet<ContactId>,
        linked_ids: &BTreeSet<ContactId>,
    ) -> RepoResult<Vec<Contact>> {
        let mut conditions = Vec::new();
        let mut bind_values: Vec<Value> = Vec::new();

        if !ids.is_empty() {
            conditions.push(format!("id IN ({})", placeholders(ids.len())));
            bind_values.extend(ids.iter().map(|id| Value::Integer(*id)));
        }
        if !linked_ids.is_empty() {
            conditions.push(format!("linked_id IN ({})", placeholders(linked_ids.len())));
            bind_values.extend(linked_ids.iter().map(|id| Value::Integer(*id)));
        }
        if conditions.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "{CONTACT_SELECT_SQL} WHERE deleted_at IS NULL AND ({}){CONTACT_ORDER_SQL};",
            conditions.join(" OR ")
        );
        self.query_contacts(&sql, bind_values)
    }

    fn find_active_by_primary_or_linked(
        &self,
        primary_id: ContactId,
    ) -> RepoResult<Vec<Contact>> {
        let sql = format!(
            "{CONTACT_SELECT_SQL}
             WHERE deleted_at IS NULL
               AND (id = ?1 OR linked_id = ?1){CONTACT_ORDER_SQL};"
        );
        self.query_contacts(&sql, vec![Value::Integer(primary_id)])
    }

    fn insert_contact(&self, contact: &NewContact) -> RepoResult<Contact> {
        self.conn.execute(
            "INSERT INTO contacts (
                email,
                phone_number,
                linked_id,
                link_precedence
            ) VALUES (?1, ?2, ?3, ?4);",
            params![
                contact.email.as_deref(),
                contact.phone_number.as_deref(),
                contact.linked_id,
                contact.link_precedence.as_str(),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        self.get_contact(id)?.ok_or(RepoError::NotFound(id))
    }

    fn update_link(
        &self,
        id: ContactId,
        link_precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE contacts
                 SET
                    link_precedence = ?1,
                    linked_id = ?2,
                    updated_at = {NOW_MS_SQL}
                 WHERE id = ?3;"
            ),
            params![link_precedence.as_str(), linked_id, id],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        Ok(())
    }
}

/// Owned SQLite store handle.
///
/// Opened once at process start and passed to the services that need it;
/// [`SqliteContactStore::close`] releases the connection explicitly.
pub struct SqliteContactStore {
    conn: Connection,
}

impl SqliteContactStore {
    /// Opens (creating when missing) and migrates a database file.
    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        Ok(Self {
            conn: open_db(path)?,
        })
    }

    /// Opens a private migrated in-memory database.
    pub fn open_in_memory() -> RepoResult<Self> {
        Ok(Self {
            conn: open_db_in_memory()?,
        })
    }

    /// Wraps an already migrated connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Borrows the underlying connection for read-only inspection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Closes the connection, surfacing any error SQLite reports on close.
    pub fn close(self) -> RepoResult<()> {
        self.conn.close().map_err(|(_, err)| RepoError::from(err))
    }
}

impl ContactStore for SqliteContactStore {
    fn run_in_transaction<T, E, F>(&mut self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn ContactRepository) -> Result<T, E>,
        E: From<RepoError>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(RepoError::from)?;
        // Dropping `tx` on the error path rolls back.
        let value = work(&SqliteContactRepository::new(&tx))?;
        tx.commit().map_err(RepoError::from)?;
        Ok(value)
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn parse_contact_row(row: &Row<'_>) -> RepoResult<Contact> {
    let id: ContactId = row.get("id")?;

    let precedence_text: String = row.get("link_precedence")?;
    let link_precedence = LinkPrecedence::parse(&precedence_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid link precedence `{precedence_text}` in contacts.link_precedence for id {id}"
        ))
    })?;

    let linked_id: Option<ContactId> = row.get("linked_id")?;
    match (link_precedence, linked_id) {
        (LinkPrecedence::Primary, Some(target)) => {
            return Err(RepoError::InvalidData(format!(
                "primary contact {id} links to {target}"
            )));
        }
        (LinkPrecedence::Secondary, None) => {
            return Err(RepoError::InvalidData(format!(
                "secondary contact {id} has no linked_id"
            )));
        }
        _ => {}
    }

    Ok(Contact {
        id,
        email: row.get("email")?,
        phone_number: row.get("phone_number")?,
        linked_id,
        link_precedence,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    })
}
