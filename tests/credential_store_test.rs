//! Integration tests for the credential store laws.
//!
//! Covers the round-trip, purge-on-read, and expiry-margin behavior the
//! session layer depends on for silent restarts.

use chrono::{Duration, Utc};
use tempfile::TempDir;

use minekeeper::store::{
    CredentialRecord, CredentialStore, FileCredentialStore, MIN_SESSION_TOKEN_LEN, Profile,
};

mod common;

use common::usable_record;

fn store(tmp: &TempDir) -> FileCredentialStore {
    FileCredentialStore::new(tmp.path().join("credentials"))
}

// ============================================================================
// Round-Trip Law
// ============================================================================

/// `put` then `get` returns a record equal in all fields except `updated_at`.
#[tokio::test]
async fn put_then_get_round_trips_except_updated_at() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp);

    let record = CredentialRecord {
        expires_at: Some(Utc::now() + Duration::days(200)),
        ..usable_record("alice")
    };
    store.put("alice", &record).await.unwrap();

    let loaded = store.get("alice").await.unwrap().unwrap();
    assert_eq!(loaded.access_token, record.access_token);
    assert_eq!(loaded.refresh_token, record.refresh_token);
    assert_eq!(loaded.session_token, record.session_token);
    assert_eq!(loaded.expires_at, record.expires_at);
    assert_eq!(loaded.profile, record.profile);
    // `updated_at` is stamped by the store, not round-tripped.
    assert!(loaded.updated_at >= record.updated_at);
}

/// Upsert semantics: the last `put` wins.
#[tokio::test]
async fn second_put_overwrites_the_first() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp);

    store.put("alice", &usable_record("alice")).await.unwrap();

    let mut rotated = usable_record("alice");
    rotated.session_token = "rotated-0123456789abcdef0123456789abcdef".to_string();
    store.put("alice", &rotated).await.unwrap();

    let loaded = store.get("alice").await.unwrap().unwrap();
    assert_eq!(loaded.session_token, rotated.session_token);
}

#[tokio::test]
async fn accounts_do_not_interfere() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp);

    let alice_record = usable_record("alice");
    let bob_record = usable_record("bob");
    let (a, b) = tokio::join!(
        store.put("alice", &alice_record),
        store.put("bob", &bob_record),
    );
    a.unwrap();
    b.unwrap();

    assert!(store.is_usable("alice").await.unwrap());
    store.delete("alice").await.unwrap();
    assert!(store.get("alice").await.unwrap().is_none());
    assert_eq!(
        store.get("bob").await.unwrap().unwrap().profile.display_name,
        "bob"
    );
}

// ============================================================================
// Purge-on-Read
// ============================================================================

#[tokio::test]
async fn empty_token_is_purged() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp);

    let mut record = usable_record("alice");
    record.session_token = String::new();
    store.put("alice", &record).await.unwrap();

    assert!(!store.is_usable("alice").await.unwrap());
    assert!(store.get("alice").await.unwrap().is_none());
}

#[tokio::test]
async fn placeholder_token_is_purged() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp);

    let mut record = usable_record("alice");
    record.session_token = "undefined".to_string();
    store.put("alice", &record).await.unwrap();

    assert!(!store.is_usable("alice").await.unwrap());
    assert!(store.get("alice").await.unwrap().is_none());
}

#[tokio::test]
async fn short_token_is_purged() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp);

    let mut record = usable_record("alice");
    record.session_token = "x".repeat(MIN_SESSION_TOKEN_LEN - 1);
    store.put("alice", &record).await.unwrap();

    assert!(!store.is_usable("alice").await.unwrap());
    assert!(store.get("alice").await.unwrap().is_none());
}

// ============================================================================
// Expiry Margin
// ============================================================================

#[tokio::test]
async fn non_expiring_record_is_usable_and_kept() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp);

    store.put("alice", &usable_record("alice")).await.unwrap();

    assert!(store.is_usable("alice").await.unwrap());
    assert!(store.get("alice").await.unwrap().is_some());
}

#[tokio::test]
async fn record_expiring_well_in_the_future_is_usable() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp);

    let record = CredentialRecord {
        expires_at: Some(Utc::now() + Duration::minutes(10)),
        ..usable_record("alice")
    };
    store.put("alice", &record).await.unwrap();

    assert!(store.is_usable("alice").await.unwrap());
    assert!(store.get("alice").await.unwrap().is_some());
}

#[tokio::test]
async fn record_inside_expiry_margin_is_purged() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp);

    // Ten minutes of lifetime with six already elapsed: four remain, which
    // is inside the five-minute margin.
    let record = CredentialRecord {
        expires_at: Some(Utc::now() + Duration::minutes(4)),
        ..usable_record("alice")
    };
    store.put("alice", &record).await.unwrap();

    assert!(!store.is_usable("alice").await.unwrap());
    assert!(store.get("alice").await.unwrap().is_none());
}

#[tokio::test]
async fn expired_record_is_purged() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp);

    let record = CredentialRecord {
        expires_at: Some(Utc::now() - Duration::minutes(1)),
        ..usable_record("alice")
    };
    store.put("alice", &record).await.unwrap();

    assert!(!store.is_usable("alice").await.unwrap());
    assert!(store.get("alice").await.unwrap().is_none());
}

// ============================================================================
// Degradation
// ============================================================================

#[tokio::test]
async fn malformed_profile_degrades_instead_of_failing() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp);
    store.put("alice", &usable_record("alice")).await.unwrap();

    let path = tmp.path().join("credentials/alice.json");
    let mut doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    doc["profile"] = serde_json::json!(["not", "a", "profile"]);
    std::fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

    let loaded = store.get("alice").await.unwrap().unwrap();
    assert_eq!(loaded.profile, Profile::minimal("alice"));
}
