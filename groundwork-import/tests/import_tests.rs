//! Integration tests for the CSV importer
//!
//! Tests cover:
//! - Idempotent re-import
//! - Parent before child ordering and back-reference wiring
//! - Cell coercion and UTF-8 repair
//! - Malformed CSV handling
//! - --drop-tables purge

use groundwork_common::config::ServiceNode;
use groundwork_common::db::gateway::Criteria;
use groundwork_common::db::PersistenceGateway;
use groundwork_common::{
    AssociationDefinition, Entity, EntityDefinition, EntityRegistry, Error, FieldDefinition,
    FieldType, FieldValue,
};
use groundwork_import::CsvImporter;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Test helper: customers with orders, posts with tags
fn registry() -> Arc<EntityRegistry> {
    let definitions = vec![
        EntityDefinition::new("Customer")
            .field(FieldDefinition::new("name", FieldType::String))
            .field(FieldDefinition::new("email", FieldType::String).unique())
            .field(FieldDefinition::new("active", FieldType::Boolean))
            .association(AssociationDefinition::one_to_many("orders", "Order", "customer")),
        EntityDefinition::new("Order")
            .field(FieldDefinition::new("reference", FieldType::String))
            .field(FieldDefinition::new("total", FieldType::Float))
            .field(FieldDefinition::new("placedOn", FieldType::Date))
            .association(
                AssociationDefinition::many_to_one("customer", "Customer").inversed_by("orders"),
            ),
        EntityDefinition::new("Post")
            .field(FieldDefinition::new("title", FieldType::String))
            .association(AssociationDefinition::many_to_many("tags", "Tag").inversed_by("posts")),
        EntityDefinition::new("Tag")
            .field(FieldDefinition::new("label", FieldType::String))
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

fn services(names: &[&str]) -> Vec<ServiceNode> {
    names.iter().map(|n| ServiceNode::Name(n.to_string())).collect()
}

fn write_csv(dir: &Path, file: &str, contents: impl AsRef<[u8]>) {
    std::fs::write(dir.join(file), contents).unwrap();
}

async fn all(gateway: &PersistenceGateway, entity: &str) -> Vec<Entity> {
    let mut session = gateway.session();
    let found = session
        .repository(entity)
        .unwrap()
        .find_all()
        .await
        .unwrap();
    session.rollback().await.unwrap();
    found
}

async fn count(gateway: &PersistenceGateway, entity: &str) -> i64 {
    let mut session = gateway.session();
    let total = session
        .repository(entity)
        .unwrap()
        .count_by(&Criteria::new())
        .await
        .unwrap();
    session.rollback().await.unwrap();
    total
}

// =============================================================================
// Import runs
// =============================================================================

#[tokio::test]
async fn test_reimport_of_two_row_file_yields_two_rows() {
    let dir = TempDir::new().unwrap();
    write_csv(
        dir.path(),
        "customer.csv",
        "\u{FEFF}id,name,email,active\n1,Ada,ada@example.com,true\n2,Grace,grace@example.com,0\n",
    );
    let gateway = setup_gateway().await;
    let importer = CsvImporter::new(gateway.clone(), dir.path(), services(&["customer"]));

    let first = importer.run(false).await.unwrap();
    assert_eq!(first.rows(), 2);
    let second = importer.run(false).await.unwrap();
    assert_eq!(second.rows(), 2);

    let customers = all(&gateway, "Customer").await;
    assert_eq!(customers.len(), 2);
    assert_eq!(customers[0].get("name"), &FieldValue::String("Ada".to_string()));
    assert_eq!(customers[0].get("active"), &FieldValue::Boolean(true));
    assert_eq!(customers[1].get("active"), &FieldValue::Boolean(false));
}

#[tokio::test]
async fn test_children_follow_parents_and_link_back() {
    let dir = TempDir::new().unwrap();
    write_csv(dir.path(), "order.csv", "id,reference,customer\n10,A-1,1\n11,A-2,1\n12,G-1,2\n");
    write_csv(dir.path(), "Customer.CSV", "id,name\n1,Ada\n2,Grace\n");
    let gateway = setup_gateway().await;

    let report = CsvImporter::new(gateway.clone(), dir.path(), services(&["customer"]))
        .run(false)
        .await
        .unwrap();

    let order: Vec<&str> = report.files.iter().map(|f| f.service.as_str()).collect();
    assert_eq!(order, vec!["customer", "order"]);
    assert_eq!(report.files[1].entity, "Order");
    assert_eq!(report.files[1].rows, 3);
    assert_eq!(report.files[1].links, 3);

    let orders = all(&gateway, "Order").await;
    let customers: Vec<Option<i64>> = orders.iter().map(|o| o.linked_id("customer")).collect();
    assert_eq!(customers, vec![Some(1), Some(1), Some(2)]);

    let customers = all(&gateway, "Customer").await;
    assert_eq!(customers[0].linked_ids("orders"), &[10, 11]);
}

#[tokio::test]
async fn test_many_to_many_back_reference_updates_owning_parent() {
    let dir = TempDir::new().unwrap();
    write_csv(dir.path(), "post.csv", "id,title\n1,Intro\n2,Deep dive\n");
    write_csv(dir.path(), "tag.csv", "id,label,posts\n5,rust,1|2\n6,sql,2\n7,draft,\n");
    let gateway = setup_gateway().await;

    let report = CsvImporter::new(gateway.clone(), dir.path(), services(&["post"]))
        .run(false)
        .await
        .unwrap();
    assert_eq!(report.files[1].links, 3);

    let posts = all(&gateway, "Post").await;
    assert_eq!(posts[0].linked_ids("tags"), &[5]);
    assert_eq!(posts[1].linked_ids("tags"), &[5, 6]);

    let tags = all(&gateway, "Tag").await;
    assert_eq!(tags[0].linked_ids("posts"), &[1, 2]);
    assert!(tags[2].linked_ids("posts").is_empty());
}

#[tokio::test]
async fn test_parents_flushed_in_earlier_batches_are_wired() {
    let dir = TempDir::new().unwrap();
    let mut posts = String::from("id,title\n");
    for id in 1..=30 {
        posts.push_str(&format!("{},Post {}\n", id, id));
    }
    write_csv(dir.path(), "post.csv", posts);
    write_csv(dir.path(), "tag.csv", "id,label,posts\n5,rust,1|30\n6,sql,30\n");
    let gateway = setup_gateway().await;

    let report = CsvImporter::new(gateway.clone(), dir.path(), services(&["post"]))
        .run(false)
        .await
        .unwrap();
    assert_eq!(report.files[0].rows, 30);
    assert_eq!(report.files[1].links, 3);

    let posts = all(&gateway, "Post").await;
    assert_eq!(posts[0].linked_ids("tags"), &[5]);
    assert!(posts[1].linked_ids("tags").is_empty());
    assert_eq!(posts[29].linked_ids("tags"), &[5, 6]);
}

#[tokio::test]
async fn test_inverse_parent_links_count_the_stored_reference() {
    let dir = TempDir::new().unwrap();
    write_csv(dir.path(), "customer.csv", "id,name\n1,Ada\n2,Grace\n");
    write_csv(dir.path(), "order.csv", "id,reference,customer\n10,A-1,1|2\n11,X-1,9\n");
    let gateway = setup_gateway().await;

    let report = CsvImporter::new(gateway.clone(), dir.path(), services(&["customer"]))
        .run(false)
        .await
        .unwrap();
    // Order 10 stores customer 1 only; customer 9 was never imported
    assert_eq!(report.files[1].links, 1);

    let customers = all(&gateway, "Customer").await;
    assert_eq!(customers[0].linked_ids("orders"), &[10]);
    assert!(customers[1].linked_ids("orders").is_empty());
}

#[tokio::test]
async fn test_cells_are_coerced_and_repaired() {
    let dir = TempDir::new().unwrap();
    let mut contents = b"id,Reference,placed_on,total,notes\n".to_vec();
    contents.extend_from_slice(b"1,A-1,not a date,12.5,ignored\n");
    contents.extend_from_slice(b"2,caf\xe9,2024-01-31,many,\n");
    write_csv(dir.path(), "order.csv", contents);
    let gateway = setup_gateway().await;

    CsvImporter::new(gateway.clone(), dir.path(), services(&["order"]))
        .run(false)
        .await
        .unwrap();

    let orders = all(&gateway, "Order").await;
    assert_eq!(orders[0].get("placedOn"), &FieldValue::Null);
    assert_eq!(orders[0].get("total"), &FieldValue::Float(12.5));
    assert_eq!(
        orders[1].get("reference"),
        &FieldValue::String("caf\u{FFFD}".to_string())
    );
    assert_eq!(orders[1].get("total"), &FieldValue::Null);
    assert_eq!(
        orders[1].get("placedOn"),
        &FieldValue::parse_text("2024-01-31", FieldType::Date).unwrap()
    );
}

#[tokio::test]
async fn test_rows_are_flushed_in_batches() {
    let dir = TempDir::new().unwrap();
    let mut contents = String::from("name,email\n");
    for i in 0..60 {
        contents.push_str(&format!("Customer {},c{}@example.com\n", i, i));
    }
    write_csv(dir.path(), "customer.csv", contents);
    let gateway = setup_gateway().await;
    let importer = CsvImporter::new(gateway.clone(), dir.path(), services(&["customer"]));

    importer.run(false).await.unwrap();
    // Unique email makes the second run update in place
    importer.run(false).await.unwrap();

    assert_eq!(count(&gateway, "Customer").await, 60);
}

#[tokio::test]
async fn test_missing_service_file_is_skipped() {
    let dir = TempDir::new().unwrap();
    write_csv(dir.path(), "tag.csv", "label\nrust\n");
    let gateway = setup_gateway().await;

    let report = CsvImporter::new(gateway.clone(), dir.path(), services(&["customer", "tag"]))
        .run(false)
        .await
        .unwrap();

    assert_eq!(report.files.len(), 1);
    assert_eq!(report.files[0].service, "tag");
    assert_eq!(count(&gateway, "Customer").await, 0);
}

#[tokio::test]
async fn test_drop_tables_purges_before_import() {
    let dir = TempDir::new().unwrap();
    write_csv(dir.path(), "tag.csv", "label\nrust\n");
    let gateway = setup_gateway().await;
    let importer = CsvImporter::new(gateway.clone(), dir.path(), services(&["tag"]))
        .with_purge_tables(vec!["tag".to_string()]);

    importer.run(false).await.unwrap();
    importer.run(false).await.unwrap();
    assert_eq!(count(&gateway, "Tag").await, 2);

    let report = importer.run(true).await.unwrap();
    assert_eq!(report.purged, vec!["tag"]);
    let tags = all(&gateway, "Tag").await;
    assert_eq!(tags.len(), 1);
    // Sequence reset
    assert_eq!(tags[0].id(), Some(1));
}

// =============================================================================
// Malformed input
// =============================================================================

#[tokio::test]
async fn test_duplicate_header_is_format_error() {
    let dir = TempDir::new().unwrap();
    write_csv(dir.path(), "tag.csv", "label,Label\nrust,sql\n");
    let gateway = setup_gateway().await;

    let result = CsvImporter::new(gateway.clone(), dir.path(), services(&["tag"]))
        .run(false)
        .await;
    assert!(matches!(result, Err(Error::Format(_))));
}

#[tokio::test]
async fn test_ragged_row_aborts_file() {
    let dir = TempDir::new().unwrap();
    write_csv(dir.path(), "tag.csv", "id,label\n1,rust\n2,sql,extra\n");
    let gateway = setup_gateway().await;

    let result = CsvImporter::new(gateway.clone(), dir.path(), services(&["tag"]))
        .run(false)
        .await;
    match result {
        Err(Error::Format(message)) => assert!(message.contains("row 3")),
        other => panic!("Expected format error, got {:?}", other.map(|r| r.rows())),
    }
    // The unflushed first row is rolled back
    assert_eq!(count(&gateway, "Tag").await, 0);
}

#[tokio::test]
async fn test_plan_is_available_without_importing() {
    let dir = TempDir::new().unwrap();
    write_csv(dir.path(), "customer.csv", "id\n");
    write_csv(dir.path(), "order.csv", "id\n");
    let gateway = setup_gateway().await;

    let plan = CsvImporter::new(gateway, dir.path(), services(&["order", "customer"]))
        .plan()
        .unwrap();
    assert_eq!(plan.services(), vec!["order", "customer"]);
    assert_eq!(plan.links.len(), 1);
    assert_eq!(plan.links[0].child_property, "customer");
}
