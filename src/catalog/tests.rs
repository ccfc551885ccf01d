use std::sync::Arc;

use serde_json::{json, Value};

use super::builtin::{interpolate, render_query, LAST_START};
use super::*;
use crate::operation::OperationDefinition;
use crate::pipeline::{PipelineExecutor, Registry};
use crate::store::{MemoryStore, Query, StoreHandle};

#[test]
fn test_action_ref_forms() {
    let bare: ActionRef = serde_yaml::from_str("stream").unwrap();
    assert_eq!(bare, ActionRef::new("stream"));
    assert_eq!(bare.params(), json!({}));

    let spec: ActionRef =
        serde_yaml::from_str("use: upsert\nwith: { collection: users, key: id }").unwrap();
    assert_eq!(spec.name(), "upsert");
    assert_eq!(spec.params(), json!({"collection": "users", "key": "id"}));
}

#[test]
fn test_unknown_action() {
    let catalog = ActionCatalog::with_builtins();
    let err = match catalog.load(&ActionRef::new("teleport")) {
        Err(err) => err,
        Ok(_) => panic!("expected an unknown action"),
    };
    assert_eq!(err.to_string(), "unknown load action 'teleport'");

    // names are scoped per phase kind
    assert!(catalog.extract(&ActionRef::new("upsert")).is_err());
}

#[test]
fn test_invalid_params() {
    let catalog = ActionCatalog::with_builtins();
    let err = match catalog.load(&ActionRef::with("upsert", json!({"collection": "users"}))) {
        Err(err) => err,
        Ok(_) => panic!("expected invalid parameters"),
    };
    assert!(matches!(err, CatalogError::InvalidParams { kind: "load", .. }));
    assert!(err.to_string().contains("key"));
}

#[test]
fn test_custom_registration() {
    let mut catalog = ActionCatalog::new();
    catalog.register_transform("identity", |_| {
        Ok(Arc::new(crate::operation::transform_fn(|_, _, record| Ok(record)))
            as Arc<dyn crate::operation::TransformAction>)
    });
    assert!(catalog.transform(&ActionRef::new("identity")).is_ok());
    assert!(catalog.transform(&ActionRef::new("select")).is_err());
}

#[test]
fn test_interpolate_keeps_types() {
    let registry = Registry::new();
    registry.set("since", 42);
    registry.set("table", "users");

    assert_eq!(interpolate(&json!("{{since}}"), &registry), json!(42));
    assert_eq!(interpolate(&json!("{{ table }}"), &registry), json!("users"));
    assert_eq!(
        interpolate(&json!("from {{table}} after {{since}}"), &registry),
        json!("from users after 42")
    );
    assert_eq!(interpolate(&json!("{{missing}}"), &registry), Value::Null);
    assert_eq!(
        interpolate(&json!({"nested": ["{{since}}", 1]}), &registry),
        json!({"nested": [42, 1]})
    );
    assert_eq!(
        interpolate(&json!("{{started_at}}"), &registry),
        json!(registry.started_at().to_rfc3339())
    );
}

#[test]
fn test_render_query_leaves_sql_text() {
    let registry = Registry::new();
    registry.set("since", "2024-01-01");
    let query = Query::Sql {
        text: "select * from t where changed > $1 -- {{since}}".to_string(),
        values: vec![json!("{{since}}")],
    };
    let Query::Sql { text, values } = render_query(&query, &registry) else {
        panic!("expected sql");
    };
    assert!(text.ends_with("{{since}}"));
    assert_eq!(values, vec![json!("2024-01-01")]);
}

#[test]
fn test_select_and_watermark() {
    let catalog = ActionCatalog::with_builtins();
    let registry = Registry::new();
    let store = StoreHandle::memory("src", MemoryStore::new());

    let select = catalog
        .transform(&ActionRef::with(
            "select",
            json!({"fields": {"id": "series", "city": "address.city", "first": "tags.0"}}),
        ))
        .unwrap();
    let out = select
        .transform(
            &store,
            &registry,
            json!({"series": 7, "address": {"city": "Lyon"}, "tags": ["a", "b"], "noise": 1}),
        )
        .unwrap();
    assert_eq!(out, json!({"id": 7, "city": "Lyon", "first": "a"}));

    let watermark = catalog
        .transform(&ActionRef::with(
            "watermark",
            json!({"field": "changed", "key": "last_change"}),
        ))
        .unwrap();
    for changed in ["2024-03-01", "2024-05-01", "2024-04-01"] {
        watermark
            .transform(&store, &registry, json!({"changed": changed}))
            .unwrap();
    }
    assert_eq!(registry.get("last_change"), Some(json!("2024-05-01")));
}

#[tokio::test]
async fn test_builtins_run_a_full_operation() {
    let catalog = ActionCatalog::with_builtins();
    let src = MemoryStore::new().with_collection(
        "events",
        vec![
            json!({"id": 1, "changed": 10}),
            json!({"id": 2, "changed": 30}),
            json!({"id": 3, "changed": 20}),
        ],
    );
    let dst = MemoryStore::new().with_collection("state", vec![json!({"id": "sync", "since": 5})]);

    let definition = OperationDefinition::builder()
        .name("events")
        .store(StoreHandle::memory("src", src))
        .store(StoreHandle::memory("dst", dst.clone()))
        .into_raw();
    let mut raw = definition;
    raw.init = Some(vec![(
        "dst".to_string(),
        catalog
            .lifecycle(&ActionRef::with(
                "restore",
                json!({"collection": "state", "id": "sync", "keys": ["since"]}),
            ))
            .unwrap()
            .into(),
    )]);
    raw.extract = Some(vec![(
        "src".to_string(),
        catalog
            .extract(&ActionRef::with(
                "stream",
                json!({"query": {"collection": "events"}, "concurrency": 2}),
            ))
            .unwrap()
            .into(),
    )]);
    raw.transform = Some(vec![(
        "src".to_string(),
        catalog
            .transform(&ActionRef::with(
                "watermark",
                json!({"field": "changed", "key": "since"}),
            ))
            .unwrap()
            .into(),
    )]);
    raw.load = Some(vec![(
        "dst".to_string(),
        catalog
            .load(&ActionRef::with(
                "upsert",
                json!({"collection": "events", "key": "id"}),
            ))
            .unwrap()
            .into(),
    )]);
    raw.exit = Some(vec![(
        "dst".to_string(),
        catalog
            .lifecycle(&ActionRef::with(
                "persist",
                json!({"collection": "state", "id": "sync", "keys": ["since"]}),
            ))
            .unwrap()
            .into(),
    )]);

    let executor = PipelineExecutor::new(OperationDefinition::new(raw).unwrap());
    let report = executor.run().await.unwrap();
    executor.close().await.unwrap();

    assert_eq!(report.writes(), 3);
    assert_eq!(dst.documents("events").len(), 3);
    let state = dst.documents("state");
    assert_eq!(state.len(), 1);
    assert_eq!(state[0]["since"], json!(30));
    assert!(state[0][LAST_START].is_string());
}
