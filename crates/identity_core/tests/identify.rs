use identity_core::{
    Contact, ConsolidatedContact, IdentifyError, IdentifyRequest, IdentityService,
    InMemoryContactStore, LinkPrecedence, SqliteContactStore,
};
use rusqlite::params;

fn sqlite_service() -> IdentityService<SqliteContactStore> {
    IdentityService::new(SqliteContactStore::open_in_memory().unwrap())
}

fn identify<S: identity_core::ContactStore>(
    service: &mut IdentityService<S>,
    email: Option<&str>,
    phone: Option<&str>,
) -> ConsolidatedContact {
    service
        .identify(&IdentifyRequest::new(email, phone))
        .unwrap()
        .contact
}

fn row_count(service: &IdentityService<SqliteContactStore>) -> i64 {
    service
        .store()
        .connection()
        .query_row("SELECT COUNT(*) FROM contacts;", [], |row| row.get(0))
        .unwrap()
}

fn set_created_at(service: &IdentityService<SqliteContactStore>, id: i64, created_at: i64) {
    service
        .store()
        .connection()
        .execute(
            "UPDATE contacts SET created_at = ?1 WHERE id = ?2;",
            params![created_at, id],
        )
        .unwrap();
}

fn link_of(service: &IdentityService<SqliteContactStore>, id: i64) -> (String, Option<i64>) {
    service
        .store()
        .connection()
        .query_row(
            "SELECT link_precedence, linked_id FROM contacts WHERE id = ?1;",
            [id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap()
}

#[test]
fn new_identity_on_empty_store_creates_one_primary() {
    let mut service = sqlite_service();

    let contact = identify(&mut service, Some("a@x.com"), Some("111"));

    assert_eq!(contact.emails, vec!["a@x.com"]);
    assert_eq!(contact.phone_numbers, vec!["111"]);
    assert!(contact.secondary_contact_ids.is_empty());
    assert_eq!(row_count(&service), 1);
    assert_eq!(
        link_of(&service, contact.primary_contact_id),
        ("primary".to_string(), None)
    );
}

#[test]
fn new_field_combination_extends_graph_with_secondary() {
    let mut service = sqlite_service();
    let first = identify(&mut service, Some("a@x.com"), Some("111"));

    let extended = identify(&mut service, Some("a@x.com"), Some("222"));

    assert_eq!(extended.primary_contact_id, first.primary_contact_id);
    assert_eq!(extended.emails, vec!["a@x.com"]);
    assert_eq!(extended.phone_numbers, vec!["111", "222"]);
    assert_eq!(extended.secondary_contact_ids.len(), 1);
    let secondary_id = extended.secondary_contact_ids[0];
    assert_eq!(
        link_of(&service, secondary_id),
        ("secondary".to_string(), Some(first.primary_contact_id))
    );
    assert_eq!(row_count(&service), 2);
}

#[test]
fn identical_resubmission_is_idempotent() {
    let mut service = sqlite_service();
    identify(&mut service, Some("a@x.com"), Some("111"));
    let first = identify(&mut service, Some("a@x.com"), Some("222"));
    let rows_before = row_count(&service);

    let second = identify(&mut service, Some("a@x.com"), Some("222"));

    assert_eq!(second, first);
    assert_eq!(row_count(&service), rows_before);
}

#[test]
fn single_field_submission_returns_graph_without_writes() {
    let mut service = sqlite_service();
    let first = identify(&mut service, Some("a@x.com"), Some("111"));
    identify(&mut service, Some("b@y.com"), Some("111"));

    let by_phone = identify(&mut service, None, Some("111"));
    let by_secondary_email = identify(&mut service, Some("b@y.com"), None);

    assert_eq!(by_phone.primary_contact_id, first.primary_contact_id);
    assert_eq!(by_phone.emails, vec!["a@x.com", "b@y.com"]);
    assert_eq!(by_secondary_email, by_phone);
    assert_eq!(row_count(&service), 2);
}

#[test]
fn bridging_submission_merges_graphs_under_older_primary() {
    let mut service = sqlite_service();
    let p1 = identify(&mut service, Some("a@x.com"), Some("111")).primary_contact_id;
    let p2 = identify(&mut service, Some("b@y.com"), Some("222")).primary_contact_id;
    set_created_at(&service, p1, 1_000);
    set_created_at(&service, p2, 2_000);

    let merged = identify(&mut service, Some("a@x.com"), Some("222"));

    assert_eq!(merged.primary_contact_id, p1);
    assert_eq!(merged.emails, vec!["a@x.com", "b@y.com"]);
    assert_eq!(merged.phone_numbers, vec!["111", "222"]);
    assert_eq!(merged.secondary_contact_ids[0], p2);
    assert_eq!(link_of(&service, p2), ("secondary".to_string(), Some(p1)));
}

#[test]
fn bridging_pair_is_recorded_as_new_secondary() {
    // Both values are known but never appeared together, so the gap rule
    // stores the pair even though it only joins two existing graphs.
    let mut service = sqlite_service();
    let p1 = identify(&mut service, Some("a@x.com"), Some("111")).primary_contact_id;
    let p2 = identify(&mut service, Some("b@y.com"), Some("222")).primary_contact_id;
    set_created_at(&service, p1, 1_000);
    set_created_at(&service, p2, 2_000);

    let merged = identify(&mut service, Some("a@x.com"), Some("222"));

    assert_eq!(row_count(&service), 3);
    assert_eq!(merged.secondary_contact_ids.len(), 2);
    let bridge_id = merged.secondary_contact_ids[1];
    assert_eq!(link_of(&service, bridge_id), ("secondary".to_string(), Some(p1)));

    let again = identify(&mut service, Some("a@x.com"), Some("222"));
    assert_eq!(again, merged);
    assert_eq!(row_count(&service), 3);
}

#[test]
fn merge_elects_older_graph_even_when_matched_second() {
    let mut service = sqlite_service();
    let p1 = identify(&mut service, Some("a@x.com"), Some("111")).primary_contact_id;
    let p2 = identify(&mut service, Some("b@y.com"), Some("222")).primary_contact_id;
    set_created_at(&service, p1, 2_000);
    set_created_at(&service, p2, 1_000);

    let merged = identify(&mut service, Some("a@x.com"), Some("222"));

    assert_eq!(merged.primary_contact_id, p2);
    assert_eq!(merged.emails, vec!["b@y.com", "a@x.com"]);
    assert_eq!(merged.phone_numbers, vec!["222", "111"]);
    assert_eq!(link_of(&service, p1), ("secondary".to_string(), Some(p2)));
}

#[test]
fn merge_relinks_secondaries_of_demoted_primary() {
    let mut service = sqlite_service();
    let p1 = identify(&mut service, Some("a@x.com"), Some("111")).primary_contact_id;
    let p2 = identify(&mut service, Some("b@y.com"), Some("222")).primary_contact_id;
    let graph_b = identify(&mut service, Some("c@z.com"), Some("222"));
    let s2 = graph_b.secondary_contact_ids[0];
    set_created_at(&service, p1, 1_000);
    set_created_at(&service, p2, 2_000);
    set_created_at(&service, s2, 3_000);

    let merged = identify(&mut service, Some("b@y.com"), Some("111"));

    assert_eq!(merged.primary_contact_id, p1);
    assert_eq!(link_of(&service, p2), ("secondary".to_string(), Some(p1)));
    assert_eq!(link_of(&service, s2), ("secondary".to_string(), Some(p1)));
    assert_eq!(merged.emails, vec!["a@x.com", "b@y.com", "c@z.com"]);
    assert_eq!(merged.phone_numbers, vec!["111", "222"]);
    assert_eq!(&merged.secondary_contact_ids[..2], &[p2, s2]);

    let via_old_secondary = identify(&mut service, Some("c@z.com"), None);
    assert_eq!(via_old_secondary, merged);
}

#[test]
fn missing_fields_fail_validation_without_store_access() {
    let mut service = sqlite_service();

    for request in [
        IdentifyRequest::default(),
        IdentifyRequest::new(Some(""), Some("")),
    ] {
        let err = service.identify(&request).unwrap_err();
        assert!(matches!(err, IdentifyError::Validation(_)));
        assert!(err.is_client_error());
        assert_eq!(err.status_code(), 400);
    }
    assert_eq!(row_count(&service), 0);
}

#[test]
fn values_are_deduplicated_with_primary_first() {
    let mut service = sqlite_service();
    let primary = identify(&mut service, Some("a@x.com"), Some("111")).primary_contact_id;
    identify(&mut service, Some("b@y.com"), Some("111"));
    identify(&mut service, Some("a@x.com"), Some("222"));
    identify(&mut service, Some("b@y.com"), Some("222"));
    let contact = identify(&mut service, Some("c@z.com"), Some("222"));

    assert_eq!(contact.primary_contact_id, primary);
    assert_eq!(contact.emails, vec!["a@x.com", "b@y.com", "c@z.com"]);
    assert_eq!(contact.phone_numbers, vec!["111", "222"]);
    assert_eq!(contact.secondary_contact_ids.len(), 4);
    let mut sorted = contact.secondary_contact_ids.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, contact.secondary_contact_ids);
}

#[test]
fn soft_deleted_contacts_never_match() {
    let mut service = sqlite_service();
    let deleted = identify(&mut service, Some("a@x.com"), Some("111")).primary_contact_id;
    service
        .store()
        .connection()
        .execute(
            "UPDATE contacts SET deleted_at = 1 WHERE id = ?1;",
            [deleted],
        )
        .unwrap();

    let fresh = identify(&mut service, Some("a@x.com"), None);

    assert_ne!(fresh.primary_contact_id, deleted);
    assert_eq!(fresh.emails, vec!["a@x.com"]);
    assert!(fresh.phone_numbers.is_empty());
    assert!(fresh.secondary_contact_ids.is_empty());
}

#[test]
fn soft_deleted_secondary_is_left_out_of_graph_output() {
    let mut service = sqlite_service();
    let primary = identify(&mut service, Some("a@x.com"), Some("111")).primary_contact_id;
    let extended = identify(&mut service, Some("a@x.com"), Some("222"));
    assert_eq!(extended.secondary_contact_ids.len(), 1);
    let secondary = extended.secondary_contact_ids[0];
    service
        .store()
        .connection()
        .execute(
            "UPDATE contacts SET deleted_at = 1 WHERE id = ?1;",
            [secondary],
        )
        .unwrap();

    let contact = identify(&mut service, Some("a@x.com"), None);

    assert_eq!(contact.primary_contact_id, primary);
    assert_eq!(contact.emails, vec!["a@x.com"]);
    assert_eq!(contact.phone_numbers, vec!["111"]);
    assert!(contact.secondary_contact_ids.is_empty());
}

#[test]
fn response_serializes_to_identify_envelope() {
    let mut service = sqlite_service();
    let response = service
        .identify(&IdentifyRequest::new(Some("a@x.com"), Some("111")))
        .unwrap();

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "contact": {
                "primaryContactId": response.contact.primary_contact_id,
                "emails": ["a@x.com"],
                "phoneNumbers": ["111"],
                "secondaryContactIds": [],
            }
        })
    );
}

#[test]
fn in_memory_store_gives_same_results_as_sqlite() {
    let mut sqlite = sqlite_service();
    let mut memory = IdentityService::new(InMemoryContactStore::new());
    let submissions = [
        (Some("a@x.com"), Some("111")),
        (Some("b@y.com"), Some("222")),
        (None, Some("111")),
        (Some("a@x.com"), Some("222")),
        (Some("c@z.com"), None),
        (Some("b@y.com"), Some("333")),
    ];

    for (email, phone) in submissions {
        let from_sqlite = identify(&mut sqlite, email, phone);
        let from_memory = identify(&mut memory, email, phone);
        assert_eq!(from_sqlite, from_memory, "diverged on {email:?}/{phone:?}");
    }
}

#[test]
fn seeded_graphs_stay_independent() {
    let contact = |id: i64, phone: &str, linked_id: Option<i64>, created_at: i64| Contact {
        id,
        email: None,
        phone_number: Some(phone.to_string()),
        linked_id,
        link_precedence: if linked_id.is_some() {
            LinkPrecedence::Secondary
        } else {
            LinkPrecedence::Primary
        },
        created_at,
        updated_at: created_at,
        deleted_at: None,
    };
    let store = InMemoryContactStore::with_contacts(vec![
        contact(1, "111", None, 10),
        contact(2, "222", Some(1), 20),
        contact(3, "333", None, 30),
    ]);
    let mut service = IdentityService::new(store);

    let merged = identify(&mut service, None, Some("111"));
    assert_eq!(merged.secondary_contact_ids, vec![2]);

    let separate = identify(&mut service, None, Some("333"));
    assert_eq!(separate.primary_contact_id, 3);

    let store = service.into_store();
    let primaries: Vec<i64> = store
        .contacts()
        .iter()
        .filter(|contact| contact.is_primary())
        .map(|contact| contact.id)
        .collect();
    assert_eq!(primaries, vec![1, 3]);
}
