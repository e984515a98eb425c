// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - sync and business logic layer.

pub mod connectivity;
pub mod recipes;
pub mod storage;
pub mod subscription;
pub mod tags;

pub use connectivity::ConnectivityMonitor;
pub use recipes::RecipeStore;
pub use storage::{BlobStore, FirebaseStorage, MemoryBlobStore, StorageRef, StorageRefError};
pub use subscription::{SnapshotSink, SubscriptionEvent, SubscriptionManager};
pub use tags::TagStore;
