use attrium_import::{AttriumConfig, ImportConfig, ImportError};
use attrium_storage::MemoryAuditLog;
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[test]
fn empty_config_uses_defaults() {
    let config = AttriumConfig::from_toml_str("").unwrap();
    assert_eq!(config, AttriumConfig::default());
    assert_eq!(config.audit.actor, "system");
    assert_eq!(config.import, ImportConfig::default());
    assert_eq!(config.storage.path, None);
}

#[test]
fn full_config_parses() {
    let config = AttriumConfig::from_toml_str(
        r#"
        [storage]
        path = "data/attrium.db"

        [audit]
        actor = "importer"

        [import]
        delimiter = ";"
        list_separator = ","
        workers = 4
        stage_chunk_size = 50

        [[entity_types]]
        name = "product"
        natural_key = "sku"

        [[entity_types]]
        name = "customer"
        "#,
    )
    .unwrap();

    assert_eq!(config.storage.path.as_deref(), Some(std::path::Path::new("data/attrium.db")));
    assert_eq!(config.audit.actor, "importer");
    assert_eq!(config.import.delimiter, ';');
    assert_eq!(config.import.workers, 4);

    let catalog = config.catalog();
    assert_eq!(catalog.get("product").unwrap().natural_key, "sku");
    assert_eq!(catalog.get("customer").unwrap().natural_key, "key");
}

#[test]
fn invalid_values_are_rejected() {
    for toml in [
        "[import]\nworkers = 0",
        "[import]\nstage_chunk_size = 0",
        "[import]\ndelimiter = \"|\"",
        "[import]\ndelimiter = \"é\"",
        "[[entity_types]]\nname = \"\"",
        "[[entity_types]]\nname = \"attribute\"\nnatural_key = \"slug\"",
        "[import]\nworkers = \"many\"",
    ] {
        assert!(
            matches!(AttriumConfig::from_toml_str(toml), Err(ImportError::Config(_))),
            "accepted {toml:?}"
        );
    }
}

#[test]
fn load_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("attrium.toml");
    std::fs::write(&path, "[audit]\nactor = \"ops\"\n").unwrap();

    let config = AttriumConfig::load(&path).unwrap();
    assert_eq!(config.audit.actor, "ops");
    assert!(matches!(
        AttriumConfig::load(&dir.path().join("missing.toml")),
        Err(ImportError::Io(_))
    ));
}

#[test]
fn open_stores_uses_actor_and_sqlite_path() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AttriumConfig::default();
    config.storage.path = Some(dir.path().join("db").join("attrium.db"));
    config.audit.actor = "ops".to_string();

    let stores = config.open_stores(Arc::new(MemoryAuditLog::new())).unwrap();
    assert_eq!(stores.actor(), "ops");
    assert!(dir.path().join("db").join("attrium.db").exists());
}
