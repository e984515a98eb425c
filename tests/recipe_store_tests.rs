// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Recipe store behavior over in-memory backends.

mod common;

use chrono::Utc;
use common::TestEnv;
use recipe_sync::cache::{LocalCache, SqliteCache};
use recipe_sync::db::DocumentStore;
use recipe_sync::error::AppError;
use recipe_sync::models::{NewRecipe, RecipePatch, RecipeRecord, StoredTimestamp};
use recipe_sync::services::recipes::cache_key;
use recipe_sync::services::ConnectivityMonitor;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn record(owner: &str, title: &str, created_at: StoredTimestamp) -> RecipeRecord {
    RecipeRecord {
        title: title.to_string(),
        ingredients: "x".to_string(),
        instructions: "y".to_string(),
        created_at,
        tags: vec![],
        user_id: owner.to_string(),
        is_favorite: false,
        image_url: None,
    }
}

#[tokio::test]
async fn test_soup_scenario_across_users() {
    let env = TestEnv::new().await;
    let _binding = env.store.bind_session();

    // User A creates a recipe.
    env.sign_in("u1").await;
    env.wait_for_recipes(|_| env.store.is_subscribed()).await;
    let soup = env
        .store
        .create(NewRecipe::new("Soup", "water,salt", "boil"))
        .await
        .unwrap();

    let recipes = env.wait_for_recipes(|r| r.len() == 1).await;
    assert_eq!(recipes[0].user_id, "u1");
    assert!(!recipes[0].is_favorite);

    // Toggle favorite, locally and remotely.
    env.store.toggle_favorite(&soup.id).await.unwrap();
    let recipes = env.wait_for_recipes(|r| r.len() == 1 && r[0].is_favorite).await;
    assert!(recipes[0].is_favorite);
    let remote = env.db.get("u1", &soup.id).await.unwrap().unwrap();
    assert!(remote.record.is_favorite);

    // Logout empties the list.
    env.sign_out().await;
    env.wait_for_recipes(|r| r.is_empty()).await;
    assert_eq!(env.store.owner(), None);

    // User B never sees A's recipe.
    env.sign_in("u2").await;
    env.wait_for_recipes(|_| env.store.owner().as_deref() == Some("u2") && !env.store.is_loading())
        .await;
    assert!(env.store.recipes().iter().all(|r| r.title != "Soup"));
    assert!(env.store.fetch_once().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_snapshots_are_owner_filtered_and_ordered() {
    let env = TestEnv::new().await;
    let now = Utc::now();
    env.db.insert_raw(
        "old",
        record("u1", "Old", StoredTimestamp::server(now - chrono::Duration::days(2))),
    );
    env.db.insert_raw(
        "new",
        record("u1", "New", StoredTimestamp::server(now - chrono::Duration::hours(1))),
    );
    env.db.insert_raw("foreign", record("u2", "Foreign", StoredTimestamp::server(now)));
    env.db.insert_raw("undated", record("u1", "Undated", StoredTimestamp::Absent));

    env.sign_in("u1").await;
    assert!(env.store.start_subscription().await);

    let recipes = env.wait_for_recipes(|r| r.len() == 3).await;
    let titles: Vec<&str> = recipes.iter().map(|r| r.title.as_str()).collect();
    // A missing timestamp normalizes to "now", so it sorts first.
    assert_eq!(titles, vec!["Undated", "New", "Old"]);
    assert!(recipes.iter().all(|r| r.user_id == "u1"));
    assert!(recipes.windows(2).all(|w| w[0].created_at >= w[1].created_at));
}

#[tokio::test]
async fn test_create_then_fetch_round_trip() {
    let env = TestEnv::new().await;
    env.sign_in("u1").await;

    let before = Utc::now();
    let mut new = NewRecipe::new("Pasta", "noodles", "cook");
    new.tags = vec!["Pasta".to_string(), "Schnell".to_string()];
    let created = env.store.create(new).await.unwrap();

    let fetched = env.store.fetch_once().await.unwrap();
    let found = fetched.iter().find(|r| r.id == created.id).unwrap();
    assert_eq!(found.title, "Pasta");
    assert_eq!(found.ingredients, "noodles");
    assert_eq!(found.instructions, "cook");
    assert_eq!(found.tags, vec!["Pasta", "Schnell"]);
    assert!(found.created_at >= before - chrono::Duration::milliseconds(1));
}

#[tokio::test]
async fn test_fetch_once_leaves_state_alone() {
    let env = TestEnv::new().await;
    env.sign_in("u1").await;
    env.db.insert_raw("a", record("u1", "A", StoredTimestamp::server(Utc::now())));

    let fetched = env.store.fetch_once().await.unwrap();
    assert_eq!(fetched.len(), 1);
    assert!(env.store.recipes().is_empty());
    assert!(!env.store.is_subscribed());
}

#[tokio::test]
async fn test_field_deletion_removes_image() {
    let env = TestEnv::new().await;
    env.sign_in("u1").await;
    let mut with_image = record("u1", "Cake", StoredTimestamp::server(Utc::now()));
    with_image.image_url = Some("https://example.com/cake.jpg".to_string());
    env.db.insert_raw("cake", with_image);

    env.store.start_subscription().await;
    env.wait_for_recipes(|r| r.len() == 1 && r[0].image_url.is_some()).await;

    env.store
        .update("cake", RecipePatch::remove_image())
        .await
        .unwrap();

    let raw = env.db.raw("cake").unwrap();
    assert!(raw.get("imageUrl").is_none(), "field must be gone, got {raw}");
    assert_eq!(raw["title"], json!("Cake"));
    let recipes = env.wait_for_recipes(|r| r.len() == 1 && r[0].image_url.is_none()).await;
    assert_eq!(recipes[0].title, "Cake");
}

#[tokio::test]
async fn test_partial_update_only_touches_changed_fields() {
    let env = TestEnv::new().await;
    env.sign_in("u1").await;
    env.db.insert_raw("r", record("u1", "Before", StoredTimestamp::server(Utc::now())));

    let patch = RecipePatch {
        title: Some("After".to_string()),
        ..RecipePatch::default()
    };
    env.store.update("r", patch).await.unwrap();

    let raw = env.db.raw("r").unwrap();
    assert_eq!(raw["title"], json!("After"));
    assert_eq!(raw["ingredients"], json!("x"));
}

#[tokio::test]
async fn test_clear_is_idempotent() {
    let env = TestEnv::new().await;
    env.sign_in("u1").await;
    env.store.create(NewRecipe::new("Soup", "water", "boil")).await.unwrap();
    env.store.start_subscription().await;
    env.wait_for_recipes(|r| r.len() == 1).await;

    env.store.clear();
    env.store.clear();
    assert!(env.store.recipes().is_empty());
    assert!(!env.store.is_loading());
    assert!(!env.store.is_subscribed());
}

#[tokio::test]
async fn test_clear_blocks_in_flight_snapshots() {
    let env = TestEnv::new().await;
    env.sign_in("u1").await;
    env.store.start_subscription().await;
    env.wait_for_recipes(|_| !env.store.is_loading()).await;

    env.store.clear();
    // Remote changes after logout must not reach the cleared state.
    env.db
        .add("u1", NewRecipe::new("Late", "x", "y"))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(env.store.recipes().is_empty());
}

#[tokio::test]
async fn test_write_failure_propagates_without_local_change() {
    let env = TestEnv::new().await;
    env.sign_in("u1").await;
    env.store.start_subscription().await;
    env.wait_for_recipes(|_| !env.store.is_loading()).await;

    env.db.set_offline(true);
    let err = env
        .store
        .create(NewRecipe::new("Soup", "water", "boil"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Network(_)));
    assert!(env.store.recipes().is_empty());

    // The failed snapshot keeps the last known list and records the error.
    env.wait_for_recipes(|_| env.store.last_error().is_some()).await;
    assert!(!env.store.is_loading());
}

#[tokio::test]
async fn test_delete_removes_image_best_effort() {
    let env = TestEnv::new().await;
    env.sign_in("u1").await;

    let path = "recipes/u1/cake.jpg";
    env.blobs.insert(path, vec![0xff]);
    let mut with_image = record("u1", "Cake", StoredTimestamp::server(Utc::now()));
    with_image.image_url = Some(format!(
        "https://firebasestorage.googleapis.com/v0/b/test-bucket/o/{}?alt=media&token=t",
        urlencoding::encode(path)
    ));
    env.db.insert_raw("cake", with_image);
    let mut missing_blob = record("u1", "Pie", StoredTimestamp::server(Utc::now()));
    missing_blob.image_url = Some("https://example.com/not-a-storage-url.jpg".to_string());
    env.db.insert_raw("pie", missing_blob);

    env.store.delete("cake").await.unwrap();
    assert!(!env.blobs.contains(path));
    assert!(env.db.raw("cake").is_none());

    // An undecodable image URL does not stop the document delete.
    env.store.delete("pie").await.unwrap();
    assert!(env.db.raw("pie").is_none());
}

#[tokio::test]
async fn test_offline_start_seeds_from_durable_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    let cache = Arc::new(SqliteCache::open(&path).unwrap());
    let first = TestEnv::with_cache(cache).await;
    first.sign_in("u1").await;
    first.store.start_subscription().await;
    first.store.create(NewRecipe::new("Soup", "water", "boil")).await.unwrap();
    first.wait_for_recipes(|r| r.len() == 1).await;

    // Wait for the write-through to land.
    let reopened = Arc::new(SqliteCache::open(&path).unwrap());
    let mut stored = None;
    for _ in 0..50 {
        stored = reopened.get(&cache_key("u1")).await.unwrap();
        if stored.as_ref().and_then(|v| v.as_array()).map(Vec::len) == Some(1) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(stored.is_some());

    // New session, remote unreachable: the cached list is shown.
    let second = TestEnv::with_cache(reopened).await;
    second.db.set_offline(true);
    second.sign_in("u1").await;
    second.store.start_subscription().await;
    let recipes = second.wait_for_recipes(|r| r.len() == 1).await;
    assert_eq!(recipes[0].title, "Soup");
}

#[tokio::test]
async fn test_unauthenticated_create_fails() {
    let env = TestEnv::new().await;
    let err = env
        .store
        .create(NewRecipe::new("Soup", "water", "boil"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthenticated));
    assert!(env.db.is_empty());
}

#[tokio::test]
async fn test_logout_clears_state_before_returning() {
    let env = TestEnv::new().await;
    let _binding = env.store.bind_session();

    env.sign_in("u1").await;
    env.wait_for_recipes(|_| env.store.is_subscribed()).await;
    env.store
        .create(NewRecipe::new("Soup", "water,salt", "boil"))
        .await
        .unwrap();
    env.wait_for_recipes(|r| r.len() == 1).await;

    // No waiting: the previous user's data is gone once logout resolves.
    env.session.logout().await.unwrap();
    assert!(env.store.recipes().is_empty());
    assert_eq!(env.store.owner(), None);
    assert!(!env.store.is_subscribed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_leave_one_live_subscription() {
    let env = TestEnv::new().await;
    env.sign_in("u1").await;

    let starts: Vec<_> = (0..8)
        .map(|_| {
            let store = env.store.clone();
            tokio::spawn(async move { store.start_subscription().await })
        })
        .collect();
    for start in starts {
        start.await.unwrap();
    }

    // The surviving listener belongs to the current epoch, so it delivers.
    env.db
        .add("u1", NewRecipe::new("Soup", "water", "boil"))
        .await
        .unwrap();
    let recipes = env
        .wait_for_recipes(|r| r.len() == 1 && !env.store.is_loading())
        .await;
    assert_eq!(recipes[0].title, "Soup");
    assert!(env.store.is_subscribed());
}

#[tokio::test]
async fn test_reconnect_resubscribes_and_converges() {
    let env = TestEnv::new().await;
    let monitor = ConnectivityMonitor::new(true);
    let _resync = env.store.watch_connectivity(&monitor);

    // The listener cannot open while the remote is unreachable.
    env.sign_in("u1").await;
    env.db.set_offline(true);
    monitor.set_online(false);
    env.store.start_subscription().await;
    env.wait_for_recipes(|_| env.store.last_error().is_some())
        .await;

    // Changed by another device while this one was offline.
    env.db.insert_raw(
        "late",
        record("u1", "Late", StoredTimestamp::server(Utc::now())),
    );
    env.db.set_offline(false);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(env.store.recipes().is_empty());

    monitor.set_online(true);
    let recipes = env
        .wait_for_recipes(|r| r.len() == 1 && env.store.last_error().is_none())
        .await;
    assert_eq!(recipes[0].title, "Late");
    assert!(env.store.is_subscribed());
    assert!(!env.store.is_loading());
}
