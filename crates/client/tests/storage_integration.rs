//! File storage tests: encrypted and plaintext round-trips, TTLs, key
//! derivation, and on-disk hygiene.

use std::time::Duration;

use chrono::Utc;
use riptide_client::{FileStorage, StorageError, TokenRecord, TokenStorage};

fn record(access: &str) -> TokenRecord {
    TokenRecord {
        access_token: access.to_string(),
        refresh_token: Some("rt".to_string()),
        expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        token_type: "Bearer".to_string(),
        scope: Some("read".to_string()),
    }
}

#[tokio::test]
async fn encrypted_roundtrip_survives_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tokens.json");

    let storage = FileStorage::new(&path);
    storage.set("oauth2_app", record("tok-1"), None).await.unwrap();
    drop(storage);

    // Same path derives the same key.
    let reopened = FileStorage::new(&path);
    let restored = reopened.get("oauth2_app").await.unwrap().unwrap();
    assert_eq!(restored.access_token, "tok-1");
    assert_eq!(restored.scope.as_deref(), Some("read"));
}

#[tokio::test]
async fn plaintext_mode_writes_readable_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tokens.json");

    let storage = FileStorage::plaintext(&path);
    storage.set("oauth2_app", record("tok-plain"), None).await.unwrap();

    let raw = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(raw.contains("tok-plain"));

    let restored = storage.get("oauth2_app").await.unwrap().unwrap();
    assert_eq!(restored.access_token, "tok-plain");
}

#[tokio::test]
async fn multiple_keys_share_one_document() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path().join("tokens.json"));

    storage.set("oauth2_a", record("tok-a"), None).await.unwrap();
    storage.set("oauth2_b", record("tok-b"), None).await.unwrap();

    assert_eq!(storage.get("oauth2_a").await.unwrap().unwrap().access_token, "tok-a");
    assert_eq!(storage.get("oauth2_b").await.unwrap().unwrap().access_token, "tok-b");

    storage.clear("oauth2_a").await.unwrap();
    assert!(storage.get("oauth2_a").await.unwrap().is_none());
    assert!(storage.get("oauth2_b").await.unwrap().is_some());
}

#[tokio::test]
async fn ttl_expires_entries_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tokens.json");

    let storage = FileStorage::new(&path);
    storage
        .set("short", record("tok"), Some(Duration::ZERO))
        .await
        .unwrap();
    storage
        .set("long", record("tok"), Some(Duration::from_secs(3600)))
        .await
        .unwrap();

    let reopened = FileStorage::new(&path);
    assert!(reopened.get("short").await.unwrap().is_none());
    assert!(reopened.get("long").await.unwrap().is_some());
}

#[tokio::test]
async fn concurrent_sets_on_distinct_keys_all_persist() {
    let dir = tempfile::tempdir().unwrap();
    let storage = std::sync::Arc::new(FileStorage::new(dir.path().join("tokens.json")));

    let keys = ["key_a", "key_b", "key_c", "key_d"];
    let writes = keys.map(|key| {
        let storage = std::sync::Arc::clone(&storage);
        tokio::spawn(async move { storage.set(key, record(key), None).await })
    });
    for handle in writes {
        handle.await.unwrap().unwrap();
    }

    for key in keys {
        let stored = storage.get(key).await.unwrap();
        assert_eq!(stored.unwrap().access_token, key, "{key} lost by a concurrent write");
    }
}

#[tokio::test]
async fn expired_entries_are_pruned_on_the_next_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tokens.json");
    let storage = FileStorage::new(&path);

    storage
        .set("short", record("tok"), Some(Duration::ZERO))
        .await
        .unwrap();
    storage.set("live", record("tok"), None).await.unwrap();

    let raw = tokio::fs::read_to_string(&path).await.unwrap();
    let doc: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&raw).unwrap();
    assert!(!doc.contains_key("short"));
    assert!(!doc.contains_key("short_expires"));
    assert!(doc.contains_key("live"));
}

#[tokio::test]
async fn overwriting_without_ttl_drops_the_old_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path().join("tokens.json"));

    storage
        .set("k", record("tok"), Some(Duration::ZERO))
        .await
        .unwrap();
    assert!(storage.get("k").await.unwrap().is_none());

    storage.set("k", record("tok2"), None).await.unwrap();
    assert_eq!(storage.get("k").await.unwrap().unwrap().access_token, "tok2");
}

#[cfg(unix)]
#[tokio::test]
async fn document_and_directory_are_private() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let parent = dir.path().join("riptide");
    let path = parent.join("tokens.json");

    let storage = FileStorage::new(&path);
    storage.set("k", record("tok"), None).await.unwrap();

    let file_mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode();
    assert_eq!(file_mode & 0o777, 0o600);

    let dir_mode = tokio::fs::metadata(&parent).await.unwrap().permissions().mode();
    assert_eq!(dir_mode & 0o777, 0o700);
}

#[tokio::test]
async fn passphrase_roundtrip_and_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tokens.json");

    let storage = FileStorage::with_passphrase(&path, "correct horse").unwrap();
    storage.set("k", record("tok-secret"), None).await.unwrap();

    let same = FileStorage::with_passphrase(&path, "correct horse").unwrap();
    assert_eq!(same.get("k").await.unwrap().unwrap().access_token, "tok-secret");

    let wrong = FileStorage::with_passphrase(&path, "battery staple").unwrap();
    let err = wrong.get("k").await.unwrap_err();
    assert!(matches!(err, StorageError::Decrypt { ref key } if key == "k"));
}

#[tokio::test]
async fn path_derived_key_does_not_open_foreign_documents() {
    let dir = tempfile::tempdir().unwrap();
    let original = dir.path().join("tokens.json");
    let moved = dir.path().join("moved.json");

    let storage = FileStorage::new(&original);
    storage.set("k", record("tok"), None).await.unwrap();
    tokio::fs::copy(&original, &moved).await.unwrap();

    // The moved file decrypts under a different derived key.
    let foreign = FileStorage::new(&moved);
    let err = foreign.get("k").await.unwrap_err();
    assert!(matches!(err, StorageError::Decrypt { .. }));
}
