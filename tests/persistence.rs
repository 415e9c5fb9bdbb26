//! Persistence and recovery tests for the reference registry.
//!
//! These verify that registry state survives a write-to-disk and reload cycle,
//! that unusable snapshots fall back to a fresh session, and that the session
//! store only keeps committed turns.

use std::collections::HashMap;

use serde_json::json;

use refreg::error::{RegistryError, SnapshotError};
use refreg::record::Action;
use refreg::reference::{EntityRef, EntityType, StorageId};
use refreg::registry::RefRegistry;
use refreg::schema::{RegistryConfig, TableSchema};
use refreg::session::SessionStore;
use refreg::snapshot::SNAPSHOT_VERSION;
use refreg::translate::Row;

const CONFIG: &str = r#"
window_turns = 3
placeholder_label = "(pending lookup)"

[tables.recipes]
entity_type = "recipe"
label_column = "title"

[tables.meal_plans]
entity_type = "meal"
foreign_keys = { recipe_id = "recipes" }
"#;

fn config_file(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("registry.toml");
    std::fs::write(&path, CONFIG).unwrap();
    path
}

fn rows(value: serde_json::Value) -> Vec<Row> {
    serde_json::from_value(value).unwrap()
}

#[test]
fn registry_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = RegistryConfig::load(&config_file(dir.path())).unwrap();
    let snapshot_path = dir.path().join("session.refreg");

    // First process: read, generate, link, then persist.
    {
        let mut reg = RefRegistry::new(config.clone());
        reg.set_turn(1);
        reg.translate_read(rows(json!([{ "id": 41, "title": "Shakshuka" }])), "recipes")
            .unwrap();
        reg.translate_read(
            rows(json!([{ "id": "plan-1", "name": "Sunday", "recipe_id": 42 }])),
            "meal_plans",
        )
        .unwrap();
        reg.register_generated(
            &EntityType::new("recipe").unwrap(),
            "Miso Soup",
            json!({ "title": "Miso Soup", "steps": ["dashi", "miso"] }),
        )
        .unwrap();
        std::fs::write(&snapshot_path, reg.serialize().unwrap()).unwrap();
    }

    // Second process: reload and keep going.
    {
        let bytes = std::fs::read(&snapshot_path).unwrap();
        let mut reg = RefRegistry::deserialize(&bytes, config).unwrap();
        assert_eq!(reg.turn(), 1);
        assert_eq!(reg.len(), 4);

        // Integer keys come back as their decimal form.
        assert_eq!(reg.resolve_str("recipe_1").unwrap(), &StorageId::from("41"));

        let linked = EntityRef::parse("recipe_2").unwrap();
        assert_eq!(reg.get(&linked).unwrap().label, "(pending lookup)");
        assert_eq!(reg.enrichment_tasks().len(), 1);
        assert_eq!(reg.pending_lookups()[0].label_column, "title");

        let draft = EntityRef::parse("gen_recipe_1").unwrap();
        assert_eq!(
            reg.get_artifact(&draft).unwrap().content["steps"][1],
            json!("miso")
        );

        let report = reg.enrich(&HashMap::from([(
            (EntityType::new("recipe").unwrap(), StorageId::from("42")),
            "Dal".to_string(),
        )]));
        assert_eq!(report.labeled, vec![linked.clone()]);

        let next = reg
            .register(
                StorageId::from("43"),
                &EntityType::new("recipe").unwrap(),
                "Pho",
                Action::Read,
            )
            .unwrap();
        assert_eq!(next.to_string(), "recipe_3");
    }
}

#[test]
fn version_mismatch_falls_back_to_fresh() {
    let config = RegistryConfig::default()
        .with_table("recipes", TableSchema::new(EntityType::new("recipe").unwrap()));
    let mut reg = RefRegistry::new(config.clone());
    reg.register(
        StorageId::from("abc"),
        &EntityType::new("recipe").unwrap(),
        "Thai Curry",
        Action::Read,
    )
    .unwrap();
    let mut bytes = reg.serialize().unwrap();
    bytes[8..12].copy_from_slice(&(SNAPSHOT_VERSION + 1).to_le_bytes());

    let err = RefRegistry::deserialize(&bytes, config.clone()).unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Snapshot(SnapshotError::VersionMismatch { .. })
    ));

    let fresh = RefRegistry::restore_or_fresh(Some(&bytes), config);
    assert!(fresh.is_empty());
    assert_eq!(fresh.turn(), 0);
}

#[test]
fn session_store_commits_per_turn() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = RegistryConfig::load(&config_file(dir.path())).unwrap();
    let store = SessionStore::new(config.clone());

    let mut turn1 = store.begin_turn("alice", 1);
    turn1
        .translate_read(rows(json!([{ "id": "r-1", "title": "Ramen" }])), "recipes")
        .unwrap();
    store.commit_turn("alice", &turn1).unwrap();

    // Turn 2 fails halfway and never commits.
    let mut turn2 = store.begin_turn("alice", 2);
    turn2
        .translate_read(rows(json!([{ "id": "r-2", "title": "Udon" }])), "recipes")
        .unwrap();
    drop(turn2);

    let retry = store.begin_turn("alice", 2);
    assert_eq!(retry.len(), 1);
    assert!(retry
        .resolve_storage(&EntityType::new("recipe").unwrap(), &StorageId::from("r-2"))
        .is_none());

    // Durable handoff: write the committed snapshot out and load it elsewhere.
    let path = dir.path().join("alice.refreg");
    std::fs::write(&path, store.snapshot("alice").unwrap()).unwrap();
    let other = SessionStore::new(config);
    other.load("alice", std::fs::read(&path).unwrap());
    let resumed = other.begin_turn("alice", 3);
    assert_eq!(resumed.resolve_str("recipe_1").unwrap(), &StorageId::from("r-1"));
    assert_eq!(resumed.turn(), 3);

    assert!(store.end_session("alice"));
    assert!(store.snapshot("alice").is_none());
}
