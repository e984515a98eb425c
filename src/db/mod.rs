//! Remote document store layer.
//!
//! [`DocumentStore`] is the seam between the reconciliation store and the
//! remote source of truth. Every operation is scoped to an owner UID; a
//! document owned by someone else is reported as not found.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryDocumentStore;

use crate::error::Result;
use crate::models::{NewRecipe, RecipeDocument, RecipePatch};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// Collection names as constants.
pub mod collections {
    pub const RECIPES: &str = "recipes";
}

/// Stored field names used in queries.
pub mod fields {
    pub const OWNER: &str = "userId";
    pub const CREATED_AT: &str = "createdAt";
}

/// Lazy, non-restartable sequence of full owner-filtered snapshots,
/// ordered by `createdAt` descending. Dropping it cancels the channel.
pub type SnapshotStream = BoxStream<'static, Result<Vec<RecipeDocument>>>;

/// Remote document store operations on the `recipes` collection.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// One-shot read of every recipe owned by `owner`, newest first.
    async fn query_owned(&self, owner: &str) -> Result<Vec<RecipeDocument>>;

    /// Read a single recipe if it exists and belongs to `owner`.
    async fn get(&self, owner: &str, id: &str) -> Result<Option<RecipeDocument>>;

    /// Create a recipe. The store assigns the ID and a server timestamp,
    /// sets the owner and `isFavorite = false`.
    async fn add(&self, owner: &str, recipe: NewRecipe) -> Result<RecipeDocument>;

    /// Partial update; `FieldUpdate::Delete` removes the stored field.
    async fn update(&self, owner: &str, id: &str, patch: &RecipePatch) -> Result<()>;

    /// Delete a recipe document.
    async fn delete(&self, owner: &str, id: &str) -> Result<()>;

    /// Open a live snapshot stream for `owner`.
    async fn watch(&self, owner: &str) -> Result<SnapshotStream>;
}
