// Copyright 2024 Nona Team.
//
// Tests for KeyValueStore

use nona_store::{open_database, KeyValueStore, StoreConfig};
use tempfile::NamedTempFile;

async fn create_test_db(path: &NamedTempFile) -> sea_orm::DatabaseConnection {
    open_database(&StoreConfig {
        db_path: path.path().to_path_buf(),
    })
    .await
    .expect("Failed to open database")
}

#[tokio::test]
async fn test_set_and_get() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = KeyValueStore::new(create_test_db(&temp_file).await);

    store.set("theme", "dark").await.expect("Failed to set value");

    assert_eq!(store.get("theme").await.unwrap(), Some("dark".to_string()));
    assert_eq!(store.get("missing").await.unwrap(), None);
}

#[tokio::test]
async fn test_overwrite_keeps_single_entry() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = KeyValueStore::new(create_test_db(&temp_file).await);

    store.set("theme", "dark").await.unwrap();
    store.set("theme", "light").await.unwrap();

    assert_eq!(store.get("theme").await.unwrap(), Some("light".to_string()));
    assert_eq!(store.keys().await.unwrap(), vec!["theme".to_string()]);
}

#[tokio::test]
async fn test_delete_and_exists() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = KeyValueStore::new(create_test_db(&temp_file).await);

    store.set("a", "1").await.unwrap();
    assert!(store.exists("a").await.unwrap());

    assert!(store.delete("a").await.unwrap());
    assert!(!store.delete("a").await.unwrap());
    assert!(!store.exists("a").await.unwrap());
}

#[tokio::test]
async fn test_values_survive_reopen() {
    let temp_file = NamedTempFile::new().unwrap();
    {
        let store = KeyValueStore::new(create_test_db(&temp_file).await);
        store.set("username", "BraveOwl7").await.unwrap();
    }

    let store = KeyValueStore::new(create_test_db(&temp_file).await);
    assert_eq!(
        store.get("username").await.unwrap(),
        Some("BraveOwl7".to_string())
    );
}
