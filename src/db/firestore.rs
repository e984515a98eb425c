// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed recipe operations.
//!
//! Provides:
//! - Owner-filtered, `createdAt`-ordered queries
//! - Creates with server-assigned timestamps
//! - Partial updates via update masks (a masked field missing from the
//!   written object is deleted)
//! - Live snapshots driven by a Firestore listener

use crate::db::{collections, fields, DocumentStore, SnapshotStream};
use crate::error::{AppError, Result};
use crate::models::{NewRecipe, RecipeDocument, RecipePatch, RecipeRecord, StoredTimestamp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio_stream::wrappers::WatchStream;

/// Listener target ID for the recipes query. Each watch owns its listener.
const RECIPES_TARGET_ID: u32 = 17;

/// Recipe document as the Firestore serializer sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirestoreRecipe {
    #[serde(
        alias = "_firestore_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    doc_id: Option<String>,
    title: String,
    ingredients: String,
    instructions: String,
    #[serde(default, with = "created_at_field")]
    created_at: StoredTimestamp,
    #[serde(default)]
    tags: Vec<String>,
    user_id: String,
    #[serde(default)]
    is_favorite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
}

/// `createdAt` as it may be found in a stored document.
#[derive(Deserialize)]
#[serde(untagged)]
enum RemoteCreatedAt {
    /// Firestore timestamp values surface as RFC3339 strings, as do
    /// dates written as plain strings.
    Date(DateTime<Utc>),
    SecondsPair {
        seconds: i64,
        #[serde(default)]
        nanoseconds: u32,
    },
    /// Anything else is treated as missing rather than failing the read.
    Unreadable(serde::de::IgnoredAny),
}

impl From<RemoteCreatedAt> for StoredTimestamp {
    fn from(value: RemoteCreatedAt) -> Self {
        match value {
            RemoteCreatedAt::Date(date) => StoredTimestamp::server(date),
            RemoteCreatedAt::SecondsPair {
                seconds,
                nanoseconds,
            } => StoredTimestamp::SecondsPair {
                seconds,
                nanoseconds,
            },
            RemoteCreatedAt::Unreadable(_) => StoredTimestamp::Absent,
        }
    }
}

/// Writes `createdAt` as a Firestore timestamp, reads any stored shape.
mod created_at_field {
    use super::*;

    pub fn serialize<S>(
        value: &StoredTimestamp,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let date = match value {
            StoredTimestamp::Absent => None,
            other => Some(other.normalize(Utc::now())),
        };
        firestore::serialize_as_optional_timestamp::serialize(&date, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<StoredTimestamp, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<RemoteCreatedAt>::deserialize(deserializer)?
            .map(StoredTimestamp::from)
            .unwrap_or_default())
    }
}

impl FirestoreRecipe {
    fn from_record(record: RecipeRecord) -> Self {
        Self {
            doc_id: None,
            title: record.title,
            ingredients: record.ingredients,
            instructions: record.instructions,
            created_at: record.created_at,
            tags: record.tags,
            user_id: record.user_id,
            is_favorite: record.is_favorite,
            image_url: record.image_url,
        }
    }

    fn into_document(self, id: &str) -> RecipeDocument {
        RecipeDocument {
            id: self.doc_id.unwrap_or_else(|| id.to_string()),
            record: RecipeRecord {
                title: self.title,
                ingredients: self.ingredients,
                instructions: self.instructions,
                created_at: self.created_at,
                tags: self.tags,
                user_id: self.user_id,
                is_favorite: self.is_favorite,
                image_url: self.image_url,
            },
        }
    }
}

fn db_err(e: impl std::fmt::Display) -> AppError {
    AppError::Database(e.to_string())
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a disconnected client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    async fn read(&self, id: &str) -> Result<Option<FirestoreRecipe>> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::RECIPES)
            .obj()
            .one(id)
            .await
            .map_err(db_err)
    }
}

#[async_trait]
impl DocumentStore for FirestoreDb {
    async fn query_owned(&self, owner: &str) -> Result<Vec<RecipeDocument>> {
        let docs: Vec<FirestoreRecipe> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::RECIPES)
            .filter(|q| q.for_all([q.field(fields::OWNER).eq(owner)]))
            .order_by([(
                fields::CREATED_AT,
                firestore::FirestoreQueryDirection::Descending,
            )])
            .obj()
            .query()
            .await
            .map_err(db_err)?;

        Ok(docs
            .into_iter()
            .filter_map(|doc| {
                let id = doc.doc_id.clone()?;
                Some(doc.into_document(&id))
            })
            .collect())
    }

    async fn get(&self, owner: &str, id: &str) -> Result<Option<RecipeDocument>> {
        Ok(self
            .read(id)
            .await?
            .filter(|doc| doc.user_id == owner)
            .map(|doc| doc.into_document(id)))
    }

    async fn add(&self, owner: &str, recipe: NewRecipe) -> Result<RecipeDocument> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let record = FirestoreRecipe::from_record(recipe.into_record(owner, StoredTimestamp::Absent));

        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::RECIPES)
            .document_id(&id)
            .object(&record)
            .transforms(|t| {
                t.fields([t
                    .field(fields::CREATED_AT)
                    .server_value(firestore::FirestoreTransformServerValue::RequestTime)])
            })
            .execute()
            .await
            .map_err(db_err)?;

        tracing::debug!(recipe_id = %id, owner, "Recipe document created");

        // Read back to pick up the server-assigned timestamp.
        self.get(owner, &id)
            .await?
            .ok_or_else(|| AppError::Database(format!("recipe {id} missing after create")))
    }

    async fn update(&self, owner: &str, id: &str, patch: &RecipePatch) -> Result<()> {
        let current = self
            .read(id)
            .await?
            .filter(|doc| doc.user_id == owner)
            .ok_or_else(|| AppError::NotFound(format!("recipe {id}")))?;

        let mut document = current.into_document(id);
        patch.apply_to_record(&mut document.record);
        let updated = FirestoreRecipe::from_record(document.record);

        // Only masked fields are written; a masked field absent from the
        // object (e.g. a deleted imageUrl) is removed from the document.
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .fields(patch.field_paths())
            .in_col(collections::RECIPES)
            .document_id(id)
            .object(&updated)
            .execute()
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete(&self, owner: &str, id: &str) -> Result<()> {
        match self.read(id).await? {
            Some(doc) if doc.user_id != owner => {
                return Err(AppError::NotFound(format!("recipe {id}")));
            }
            None => return Ok(()),
            Some(_) => {}
        }

        self.get_client()?
            .fluent()
            .delete()
            .from(collections::RECIPES)
            .document_id(id)
            .execute()
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn watch(&self, owner: &str) -> Result<SnapshotStream> {
        let client = self.get_client()?;

        let mut listener = client
            .create_listener(firestore::FirestoreMemListenStateStorage::new())
            .await
            .map_err(db_err)?;

        client
            .fluent()
            .select()
            .from(collections::RECIPES)
            .filter(|q| q.for_all([q.field(fields::OWNER).eq(owner)]))
            .listen()
            .add_target(
                firestore::FirestoreListenerTarget::new(RECIPES_TARGET_ID),
                &mut listener,
            )
            .map_err(db_err)?;

        // Listener events are deltas; each one triggers a full re-query so
        // consumers always receive complete, ordered snapshots. Bursts of
        // events coalesce in the watch channel.
        let (changed_tx, changed_rx) = tokio::sync::watch::channel(0u64);
        let notify = changed_tx.clone();
        listener
            .start(move |_event| {
                let notify = notify.clone();
                async move {
                    notify.send_modify(|rev| *rev += 1);
                    Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
                }
            })
            .await
            .map_err(db_err)?;

        // Shut the listener down once the snapshot stream is dropped.
        let owner_for_log = owner.to_string();
        tokio::spawn(async move {
            changed_tx.closed().await;
            if let Err(e) = listener.shutdown().await {
                tracing::warn!(error = %e, owner = %owner_for_log, "Listener shutdown failed");
            }
        });

        let db = self.clone();
        let owner = owner.to_string();
        let stream = WatchStream::new(changed_rx).then(move |_| {
            let db = db.clone();
            let owner = owner.clone();
            async move { db.query_owned(&owner).await }
        });
        Ok(stream.boxed())
    }
}
