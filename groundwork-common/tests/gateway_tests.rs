//! Integration tests for the persistence gateway
//!
//! Each test runs against a fresh in-memory SQLite database with the schema
//! derived from a small customer/order/post/tag model.

use chrono::NaiveDate;
use groundwork_common::db::gateway::{Criteria, SortDirection};
use groundwork_common::db::PersistenceGateway;
use groundwork_common::{
    AssociationDefinition, EntityDefinition, EntityRegistry, Error, FieldDefinition, FieldType,
    FieldValue,
};
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;

/// Test helper: registry with customers, orders, posts and tags
fn registry() -> Arc<EntityRegistry> {
    let definitions = vec![
        EntityDefinition::new("Customer")
            .field(FieldDefinition::new("name", FieldType::String).not_null())
            .field(FieldDefinition::new("email", FieldType::String).unique())
            .field(FieldDefinition::new("active", FieldType::Boolean))
            .association(AssociationDefinition::one_to_many("orders", "Order", "customer"))
            .archivable()
            .custom_query("activeNamed", "active = 1 AND name LIKE ?"),
        EntityDefinition::new("Order")
            .field(FieldDefinition::new("reference", FieldType::String))
            .field(FieldDefinition::new("total", FieldType::Float))
            .field(FieldDefinition::new("placedAt", FieldType::DateTime))
            .association(
                AssociationDefinition::many_to_one("customer", "Customer").inversed_by("orders"),
            ),
        EntityDefinition::new("Post")
            .field(FieldDefinition::new("title", FieldType::String))
            .association(AssociationDefinition::many_to_many("tags", "Tag").inversed_by("posts")),
        EntityDefinition::new("Tag")
            .field(FieldDefinition::new("label", FieldType::String).unique())
            .association(AssociationDefinition::many_to_many("posts", "Post").mapped_by("tags")),
    ];
    Arc::new(EntityRegistry::from_definitions(definitions).unwrap())
}

/// Test helper: gateway over an in-memory database with the schema created
async fn setup_gateway() -> PersistenceGateway {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let gateway = PersistenceGateway::new(pool, registry());
    gateway.sync_schema().await.unwrap();
    gateway
}

fn criteria(value: serde_json::Value) -> Criteria {
    value.as_object().cloned().unwrap()
}

fn text(value: &str) -> FieldValue {
    FieldValue::String(value.to_string())
}

// =============================================================================
// Persist and find
// =============================================================================

#[tokio::test]
async fn test_persist_assigns_id_and_round_trips_values() {
    let gateway = setup_gateway().await;
    let mut session = gateway.session();

    let placed = NaiveDate::from_ymd_opt(2024, 2, 29)
        .unwrap()
        .and_hms_opt(13, 45, 0)
        .unwrap();
    let mut order = gateway.registry().instantiate("Order").unwrap();
    order.set("reference", text("A-1"));
    order.set("total", FieldValue::Float(19.5));
    order.set("placedAt", FieldValue::DateTime(placed));

    session.persist(&mut order, true).await.unwrap();
    let id = order.id().expect("id assigned");

    let loaded = session.repository("Order").unwrap().find(id).await.unwrap().unwrap();
    assert_eq!(loaded.get("reference"), &text("A-1"));
    assert_eq!(loaded.get("total"), &FieldValue::Float(19.5));
    assert_eq!(loaded.get("placedAt"), &FieldValue::DateTime(placed));
    assert_eq!(loaded.linked_id("customer"), None);
}

#[tokio::test]
async fn test_persist_with_known_id_replaces_row() {
    let gateway = setup_gateway().await;
    let mut session = gateway.session();

    let mut first = gateway.registry().instantiate("Customer").unwrap();
    first.set_id(Some(10));
    first.set("name", text("Ada"));
    session.persist(&mut first, false).await.unwrap();

    let mut second = gateway.registry().instantiate("Customer").unwrap();
    second.set_id(Some(10));
    second.set("name", text("Ada Lovelace"));
    session.persist(&mut second, true).await.unwrap();

    let mut repo = session.repository("Customer").unwrap();
    assert_eq!(repo.count_by(&Criteria::new()).await.unwrap(), 1);
    let loaded = repo.find(10).await.unwrap().unwrap();
    assert_eq!(loaded.get("name"), &text("Ada Lovelace"));
    // Unset archive flag falls back to the column default
    assert_eq!(loaded.get("isArchive"), &FieldValue::Boolean(false));
}

#[tokio::test]
async fn test_persist_upserts_on_unique_field() {
    let gateway = setup_gateway().await;
    let mut session = gateway.session();

    let mut first = gateway.registry().instantiate("Customer").unwrap();
    first.set("name", text("Grace"));
    first.set("email", text("grace@example.com"));
    session.persist(&mut first, false).await.unwrap();

    let mut second = gateway.registry().instantiate("Customer").unwrap();
    second.set("name", text("Grace Hopper"));
    second.set("email", text("grace@example.com"));
    session.persist(&mut second, true).await.unwrap();

    assert_eq!(first.id(), second.id());
    let all = session.repository("Customer").unwrap().find_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].get("name"), &text("Grace Hopper"));
}

#[tokio::test]
async fn test_upsert_on_unique_field_added_by_schema_sync() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::query("CREATE TABLE customer (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)")
        .execute(&pool)
        .await
        .unwrap();
    let gateway = PersistenceGateway::new(pool, registry());
    gateway.sync_schema().await.unwrap();

    let mut session = gateway.session();
    for name in ["Grace", "Grace Hopper"] {
        let mut customer = gateway.registry().instantiate("Customer").unwrap();
        customer.set("name", text(name));
        customer.set("email", text("grace@example.com"));
        session.persist(&mut customer, true).await.unwrap();
    }

    let all = session.repository("Customer").unwrap().find_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].get("name"), &text("Grace Hopper"));
}

// =============================================================================
// Associations
// =============================================================================

#[tokio::test]
async fn test_one_to_many_loaded_from_owning_side() {
    let gateway = setup_gateway().await;
    let mut session = gateway.session();

    let mut customer = gateway.registry().instantiate("Customer").unwrap();
    customer.set("name", text("Ada"));
    session.persist(&mut customer, false).await.unwrap();

    for reference in ["A-1", "A-2"] {
        let mut order = gateway.registry().instantiate("Order").unwrap();
        order.set("reference", text(reference));
        order.set_link("customer", customer.id());
        session.persist(&mut order, false).await.unwrap();
    }
    session.flush().await.unwrap();

    let loaded = session
        .repository("Customer")
        .unwrap()
        .find(customer.id().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.linked_ids("orders").len(), 2);

    let orders = session
        .repository("Order")
        .unwrap()
        .find_by(&criteria(json!({"customer": customer.id()})), &[], None, None)
        .await
        .unwrap();
    assert_eq!(orders.len(), 2);
}

#[tokio::test]
async fn test_many_to_many_join_rows_and_inverse_side() {
    let gateway = setup_gateway().await;
    let mut session = gateway.session();

    let mut rust = gateway.registry().instantiate("Tag").unwrap();
    rust.set("label", text("rust"));
    session.persist(&mut rust, false).await.unwrap();
    let mut sql = gateway.registry().instantiate("Tag").unwrap();
    sql.set("label", text("sql"));
    session.persist(&mut sql, false).await.unwrap();

    let mut post = gateway.registry().instantiate("Post").unwrap();
    post.set("title", text("Hello"));
    post.add_link("tags", rust.id().unwrap());
    post.add_link("tags", sql.id().unwrap());
    session.persist(&mut post, true).await.unwrap();

    let tag = session
        .repository("Tag")
        .unwrap()
        .find(sql.id().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tag.linked_ids("posts"), &[post.id().unwrap()]);

    // Rewriting the owning side replaces the join rows
    post.set_links("tags", vec![rust.id().unwrap()]);
    session.persist(&mut post, true).await.unwrap();

    let tag = session
        .repository("Tag")
        .unwrap()
        .find(sql.id().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(tag.linked_ids("posts").is_empty());
}

// =============================================================================
// Criteria
// =============================================================================

#[tokio::test]
async fn test_criteria_coercion_arrays_and_nulls() {
    let gateway = setup_gateway().await;
    let mut session = gateway.session();

    for (name, archived, email) in [
        ("Ada", false, Some("ada@example.com")),
        ("Grace", true, None),
        ("Edsger", false, None),
    ] {
        let mut customer = gateway.registry().instantiate("Customer").unwrap();
        customer.set("name", text(name));
        customer.set("isArchive", FieldValue::Boolean(archived));
        if let Some(email) = email {
            customer.set("email", text(email));
        }
        session.persist(&mut customer, false).await.unwrap();
    }

    let mut repo = session.repository("Customer").unwrap();

    let live = repo
        .find_by(&criteria(json!({"isArchive": 0})), &[], None, None)
        .await
        .unwrap();
    assert_eq!(live.len(), 2);

    let named = repo
        .find_by(&criteria(json!({"name": ["Ada", "Grace"]})), &[], None, None)
        .await
        .unwrap();
    assert_eq!(named.len(), 2);

    let without_email = repo
        .count_by(&criteria(json!({"email": null})))
        .await
        .unwrap();
    assert_eq!(without_email, 2);

    let nothing = repo.find_by(&criteria(json!({"name": []})), &[], None, None).await.unwrap();
    assert!(nothing.is_empty());

    let unknown = repo.find_by(&criteria(json!({"nickname": "x"})), &[], None, None).await;
    assert!(matches!(unknown, Err(Error::InvalidField(_))));

    let collection = repo.find_by(&criteria(json!({"orders": 1})), &[], None, None).await;
    assert!(matches!(collection, Err(Error::UnsupportedOperation(_))));
}

#[tokio::test]
async fn test_order_limit_offset() {
    let gateway = setup_gateway().await;
    let mut session = gateway.session();

    for name in ["Charlie", "Alice", "Bob", "Dave"] {
        let mut customer = gateway.registry().instantiate("Customer").unwrap();
        customer.set("name", text(name));
        session.persist(&mut customer, false).await.unwrap();
    }

    let mut repo = session.repository("Customer").unwrap();
    let order = vec![("name".to_string(), SortDirection::Asc)];
    let page = repo
        .find_by(&Criteria::new(), &order, Some(2), Some(1))
        .await
        .unwrap();

    let names: Vec<&FieldValue> = page.iter().map(|c| c.get("name")).collect();
    assert_eq!(names, vec![&text("Bob"), &text("Charlie")]);
}

#[tokio::test]
async fn test_custom_query() {
    let gateway = setup_gateway().await;
    let mut session = gateway.session();

    for (name, active) in [("Ada", true), ("Adam", false), ("Grace", true)] {
        let mut customer = gateway.registry().instantiate("Customer").unwrap();
        customer.set("name", text(name));
        customer.set("active", FieldValue::Boolean(active));
        session.persist(&mut customer, false).await.unwrap();
    }

    let mut repo = session.repository("Customer").unwrap();
    let found = repo.custom("activeNamed", &[json!("Ad%")]).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("name"), &text("Ada"));

    let missing = repo.custom("nope", &[]).await;
    assert!(matches!(missing, Err(Error::NotFound(_))));
}

// =============================================================================
// Unit of work
// =============================================================================

#[tokio::test]
async fn test_rollback_discards_staged_work() {
    let gateway = setup_gateway().await;

    let mut session = gateway.session();
    let mut customer = gateway.registry().instantiate("Customer").unwrap();
    customer.set("name", text("Ada"));
    session.persist(&mut customer, false).await.unwrap();
    session.rollback().await.unwrap();

    let mut session = gateway.session();
    let count = session
        .repository("Customer")
        .unwrap()
        .count_by(&Criteria::new())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_flush_makes_work_visible_to_new_sessions() {
    let gateway = setup_gateway().await;

    let mut session = gateway.session();
    let mut customer = gateway.registry().instantiate("Customer").unwrap();
    customer.set("name", text("Ada"));
    session.persist(&mut customer, true).await.unwrap();
    drop(session);

    let mut session = gateway.session();
    let count = session
        .repository("Customer")
        .unwrap()
        .count_by(&Criteria::new())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_remove_clears_links() {
    let gateway = setup_gateway().await;
    let mut session = gateway.session();

    let mut customer = gateway.registry().instantiate("Customer").unwrap();
    customer.set("name", text("Ada"));
    session.persist(&mut customer, false).await.unwrap();

    let mut order = gateway.registry().instantiate("Order").unwrap();
    order.set_link("customer", customer.id());
    session.persist(&mut order, false).await.unwrap();

    session.remove(&customer).await.unwrap();

    assert!(session
        .repository("Customer")
        .unwrap()
        .find(customer.id().unwrap())
        .await
        .unwrap()
        .is_none());
    let order = session
        .repository("Order")
        .unwrap()
        .find(order.id().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.linked_id("customer"), None);
}

#[tokio::test]
async fn test_purge_tables_resets_sequence() {
    let gateway = setup_gateway().await;
    let mut session = gateway.session();

    for name in ["Ada", "Grace"] {
        let mut customer = gateway.registry().instantiate("Customer").unwrap();
        customer.set("name", text(name));
        session.persist(&mut customer, false).await.unwrap();
    }
    session.flush().await.unwrap();

    session
        .purge_tables(&["customer".to_string(), "missing_table".to_string()])
        .await
        .unwrap();

    let mut customer = gateway.registry().instantiate("Customer").unwrap();
    customer.set("name", text("Edsger"));
    session.persist(&mut customer, true).await.unwrap();
    assert_eq!(customer.id(), Some(1));

    let invalid = session.purge_tables(&["customer; DROP TABLE x".to_string()]).await;
    assert!(matches!(invalid, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn test_unknown_type_is_not_found() {
    let gateway = setup_gateway().await;
    let mut session = gateway.session();

    assert!(matches!(session.repository("Invoice"), Err(Error::NotFound(_))));
    assert!(matches!(gateway.class_metadata("Invoice"), Err(Error::NotFound(_))));
}
