//! Join Propagation Tests
//!
//! Cross-store flows as a collection runtime drives them:
//! - foreign inserts/deletes splice attachments and move aggregates by delta
//! - snapshots rebuild attachments and reseed aggregate state
//! - referenced copies are refreshed after the source record changes

use std::collections::HashMap;

use serde_json::{json, Value};
use store_compiler::aggregates::{AggregateRegistry, AggregateStates};
use store_compiler::compiler::JoinContext;
use store_compiler::observability::MemoryLogger;
use store_compiler::{Descriptor, StoreRegistry};

// =============================================================================
// Helper Functions
// =============================================================================

fn registry() -> StoreRegistry {
    let mut registry = StoreRegistry::default();
    registry
        .register(
            "orders",
            &Descriptor::from_json(&json!({ "id": ["int", "<<idOrder>>"], "amount": ["number"] })).unwrap(),
        )
        .unwrap();
    registry
        .register(
            "customers",
            &Descriptor::from_json(&json!({
                "id": ["int", "<<idCustomer>>"],
                "orders": ["array", "@orders"],
                "orderCount": ["int", "count", "orders.amount"],
                "lifetime": ["number", "sum", "@orders.amount"]
            }))
            .unwrap(),
        )
        .unwrap();
    registry
}

// =============================================================================
// Delta Tests
// =============================================================================

/// Inserts and deletes keep the attachment and both aggregates in sync.
#[test]
fn test_insert_then_delete() {
    let registry = registry();
    let customers = registry.get("customers").unwrap();
    assert_eq!(registry.dependents_of("orders").collect::<Vec<_>>(), vec!["customers"]);

    let aggregates = AggregateRegistry::default();
    let logger = MemoryLogger::new();
    let mut states = AggregateStates::new();
    let mut customer = customers.default_value.clone();
    customer["id"] = json!(1);

    let mut ctx = JoinContext {
        registry: &aggregates,
        constants: &Value::Null,
        logger: &logger,
        states: &mut states,
    };
    for (id, amount) in [("a", 10), ("b", 25), ("c", 5)] {
        assert!(customers.join_insert("orders", &mut customer, &json!({ "_id": id, "amount": amount }), &mut ctx));
    }
    assert_eq!(customer["orderCount"], json!(3));
    assert_eq!(customer["lifetime"], json!(40));

    customers.join_delete("orders", &mut customer, &json!({ "_id": "b", "amount": 25 }), &mut ctx);
    assert_eq!(customer["orders"].as_array().unwrap().len(), 2);
    assert_eq!(customer["orderCount"], json!(2));
    assert_eq!(customer["lifetime"], json!(15));

    assert!(!customers.join_insert("invoices", &mut customer, &json!({}), &mut ctx));
    assert!(logger.warnings().is_empty());
}

/// A full recompute agrees with the incrementally maintained local aggregate.
#[test]
fn test_recompute_matches_deltas() {
    let registry = registry();
    let customers = registry.get("customers").unwrap();
    let aggregates = AggregateRegistry::default();
    let logger = MemoryLogger::new();
    let mut states = AggregateStates::new();
    let mut customer = json!({ "id": 1, "orders": [] });

    let mut ctx = JoinContext {
        registry: &aggregates,
        constants: &Value::Null,
        logger: &logger,
        states: &mut states,
    };
    customers.join_insert("orders", &mut customer, &json!({ "_id": 1, "amount": 3 }), &mut ctx);
    customers.join_insert("orders", &mut customer, &json!({ "_id": 2, "amount": 4 }), &mut ctx);
    let incremental = customer["orderCount"].clone();

    customers.aggregate(&mut customer, &aggregates, &Value::Null, &logger);
    assert_eq!(customer["orderCount"], incremental);
}

/// An aggregate in an enclosing scope follows attachments of every element.
#[test]
fn test_enclosing_aggregate_follows_nested_attachment() {
    let mut registry = registry();
    let shops = registry
        .register(
            "shops",
            &Descriptor::from_json(&json!({
                "id": ["int", "<<idShop>>"],
                "carts": ["array", {
                    "id": ["int", "<<idCart>>"],
                    "orders": ["array", "@orders"],
                    "subtotal": ["number", "sum", "orders.amount"]
                }],
                "total": ["number", "sum", "carts.orders.amount"]
            }))
            .unwrap(),
        )
        .unwrap();

    let aggregates = AggregateRegistry::default();
    let logger = MemoryLogger::new();
    let mut states = AggregateStates::new();
    let mut shop = json!({ "id": 1, "carts": [{ "id": 1, "orders": [] }, { "id": 2, "orders": [] }], "total": 0 });

    let mut ctx = JoinContext {
        registry: &aggregates,
        constants: &Value::Null,
        logger: &logger,
        states: &mut states,
    };
    shops.join_insert("orders", &mut shop, &json!({ "_id": 1, "amount": 7 }), &mut ctx);
    assert_eq!(shop["carts"][0]["subtotal"], json!(7));
    assert_eq!(shop["carts"][1]["subtotal"], json!(7));
    assert_eq!(shop["total"], json!(14));

    shops.join_insert("orders", &mut shop, &json!({ "_id": 2, "amount": 3 }), &mut ctx);
    assert_eq!(shop["total"], json!(20));

    shops.join_delete("orders", &mut shop, &json!({ "_id": 1, "amount": 7 }), &mut ctx);
    assert_eq!(shop["carts"][0]["subtotal"], json!(3));
    assert_eq!(shop["total"], json!(6));

    let incremental = shop["total"].clone();
    shops.aggregate(&mut shop, &aggregates, &Value::Null, &logger);
    assert_eq!(shop["total"], incremental);
}

// =============================================================================
// Snapshot Tests
// =============================================================================

/// `set` rebuilds from the snapshot and later deltas start from it.
#[test]
fn test_snapshot_then_delta() {
    let registry = registry();
    let customers = registry.get("customers").unwrap();
    let aggregates = AggregateRegistry::default();
    let logger = MemoryLogger::new();
    let mut states = AggregateStates::new();
    let mut customer = json!({ "id": 1, "orders": [{ "_id": "stale", "amount": 99 }] });

    let mut snapshot = HashMap::new();
    snapshot.insert(
        "orders".to_string(),
        vec![json!({ "_id": "x", "amount": 1 }), json!({ "_id": "y", "amount": 2 })],
    );
    let mut ctx = JoinContext {
        registry: &aggregates,
        constants: &Value::Null,
        logger: &logger,
        states: &mut states,
    };
    customers.join_set(&mut customer, &snapshot, &mut ctx);
    assert_eq!(customer["orders"].as_array().unwrap().len(), 2);
    assert_eq!(customer["orderCount"], json!(2));
    assert_eq!(customer["lifetime"], json!(3));

    customers.join_insert("orders", &mut customer, &json!({ "_id": "z", "amount": 7 }), &mut ctx);
    assert_eq!(customer["orderCount"], json!(3));
    assert_eq!(customer["lifetime"], json!(10));
    assert_eq!(states["/lifetime"].value, json!(10));
}

// =============================================================================
// Reference Tests
// =============================================================================

/// Referenced copies are found by key and refreshed in place.
#[test]
fn test_reference_refresh() {
    let mut registry = StoreRegistry::default();
    let products = registry
        .register(
            "products",
            &Descriptor::from_json(&json!({ "sku": ["string", "<<sku>>"], "label": ["string"] })).unwrap(),
        )
        .unwrap();
    let carts = registry
        .register(
            "carts",
            &Descriptor::from_json(&json!({
                "id": ["int", "<<idCart>>"],
                "items": ["array", "ref", "@products", { "sku": ["string", "<<itemSku>>"], "label": ["string"] }]
            }))
            .unwrap(),
        )
        .unwrap();

    let key_fn = |record: &Value| products.get_primary_key(record);
    let mut cart = json!({
        "id": 1,
        "items": [{ "sku": "p1", "label": "Tea" }, { "sku": "p2", "label": "Milk" }]
    });
    assert_eq!(
        carts.referenced_keys("products", Some(&key_fn), &cart),
        vec![json!("p1"), json!("p2")]
    );

    let references = carts.references("products").unwrap();
    let updated = references.update(Some(&key_fn), &json!({ "sku": "p2", "label": "Oat milk" }), &mut cart);
    assert_eq!(updated, 1);
    assert_eq!(cart["items"][1]["label"], json!("Oat milk"));
    assert_eq!(cart["items"][0]["label"], json!("Tea"));
}
