// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Recipe model: stored document shape, in-memory shape, and mutation payloads.

use crate::error::AppError;
use crate::models::timestamp::StoredTimestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Recipe document body as stored remotely (and in the local cache).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeRecord {
    pub title: String,
    pub ingredients: String,
    pub instructions: String,
    #[serde(default)]
    pub created_at: StoredTimestamp,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Owner. Written by the store from the authenticated caller.
    pub user_id: String,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// A stored document: remote ID plus body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeDocument {
    pub id: String,
    #[serde(flatten)]
    pub record: RecipeRecord,
}

/// Recipe as held in memory, with `created_at` normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: String,
    pub title: String,
    pub ingredients: String,
    pub instructions: String,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub user_id: String,
    pub is_favorite: bool,
    pub image_url: Option<String>,
}

impl Recipe {
    /// Build the in-memory recipe from a stored document.
    ///
    /// `now` is only consulted when the stored document has no `createdAt`.
    pub fn from_document(doc: RecipeDocument, now: DateTime<Utc>) -> Self {
        let RecipeDocument { id, record } = doc;
        Self {
            id,
            created_at: record.created_at.normalize(now),
            title: record.title,
            ingredients: record.ingredients,
            instructions: record.instructions,
            tags: record.tags,
            user_id: record.user_id,
            is_favorite: record.is_favorite,
            image_url: record.image_url,
        }
    }

    /// Stored form of an already-normalized recipe.
    pub fn to_document(&self) -> RecipeDocument {
        RecipeDocument {
            id: self.id.clone(),
            record: RecipeRecord {
                title: self.title.clone(),
                ingredients: self.ingredients.clone(),
                instructions: self.instructions.clone(),
                created_at: StoredTimestamp::Native(self.created_at),
                tags: self.tags.clone(),
                user_id: self.user_id.clone(),
                is_favorite: self.is_favorite,
                image_url: self.image_url.clone(),
            },
        }
    }
}

/// Normalize a snapshot and put it in canonical listing order.
pub fn normalize_snapshot(docs: Vec<RecipeDocument>, now: DateTime<Utc>) -> Vec<Recipe> {
    let mut recipes: Vec<Recipe> = docs
        .into_iter()
        .map(|doc| Recipe::from_document(doc, now))
        .collect();
    sort_newest_first(&mut recipes);
    recipes
}

/// Order by `created_at` descending (newest first). Stable for equal times.
pub fn sort_newest_first(recipes: &mut [Recipe]) {
    recipes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

/// Creation payload. Owner, ID, timestamp and favorite flag are assigned
/// by the store.
#[derive(Debug, Clone, Default, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecipe {
    #[validate(custom(function = "not_blank"))]
    pub title: String,
    #[validate(custom(function = "not_blank"))]
    pub ingredients: String,
    #[validate(custom(function = "not_blank"))]
    pub instructions: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl NewRecipe {
    pub fn new(
        title: impl Into<String>,
        ingredients: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            ingredients: ingredients.into(),
            instructions: instructions.into(),
            ..Default::default()
        }
    }

    pub fn check(&self) -> Result<(), AppError> {
        self.validate()
            .map_err(|e| AppError::Validation(e.to_string()))
    }

    /// Stored body for this payload, owned by `owner`.
    pub fn into_record(self, owner: &str, created_at: StoredTimestamp) -> RecipeRecord {
        RecipeRecord {
            title: self.title,
            ingredients: self.ingredients,
            instructions: self.instructions,
            created_at,
            tags: self.tags,
            user_id: owner.to_string(),
            is_favorite: false,
            image_url: self.image_url,
        }
    }
}

/// Three-state field for partial updates.
///
/// `Keep` leaves the stored field untouched, `Delete` removes the field from
/// the stored document entirely (it does not store an empty value).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldUpdate<T> {
    #[default]
    Keep,
    Set(T),
    Delete,
}

impl<T> FieldUpdate<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, FieldUpdate::Keep)
    }

    fn apply(self, slot: &mut Option<T>) {
        match self {
            FieldUpdate::Keep => {}
            FieldUpdate::Set(value) => *slot = Some(value),
            FieldUpdate::Delete => *slot = None,
        }
    }
}

/// Partial update: only the fields that changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecipePatch {
    pub title: Option<String>,
    pub ingredients: Option<String>,
    pub instructions: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_favorite: Option<bool>,
    pub image_url: FieldUpdate<String>,
}

impl RecipePatch {
    pub fn favorite(is_favorite: bool) -> Self {
        Self {
            is_favorite: Some(is_favorite),
            ..Default::default()
        }
    }

    pub fn remove_image() -> Self {
        Self {
            image_url: FieldUpdate::Delete,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.field_paths().is_empty()
    }

    /// Stored field names this patch touches (including deleted ones).
    pub fn field_paths(&self) -> Vec<&'static str> {
        let mut paths = Vec::new();
        if self.title.is_some() {
            paths.push("title");
        }
        if self.ingredients.is_some() {
            paths.push("ingredients");
        }
        if self.instructions.is_some() {
            paths.push("instructions");
        }
        if self.tags.is_some() {
            paths.push("tags");
        }
        if self.is_favorite.is_some() {
            paths.push("isFavorite");
        }
        if !self.image_url.is_keep() {
            paths.push("imageUrl");
        }
        paths
    }

    /// Text fields that are set must not be blank.
    pub fn check(&self) -> Result<(), AppError> {
        for (name, value) in [
            ("title", &self.title),
            ("ingredients", &self.ingredients),
            ("instructions", &self.instructions),
        ] {
            if value.as_deref().is_some_and(|v| not_blank(v).is_err()) {
                return Err(AppError::Validation(format!("{name} must not be blank")));
            }
        }
        Ok(())
    }

    /// Apply to a stored document body.
    pub fn apply_to_record(&self, record: &mut RecipeRecord) {
        let patch = self.clone();
        if let Some(v) = patch.title {
            record.title = v;
        }
        if let Some(v) = patch.ingredients {
            record.ingredients = v;
        }
        if let Some(v) = patch.instructions {
            record.instructions = v;
        }
        if let Some(v) = patch.tags {
            record.tags = v;
        }
        if let Some(v) = patch.is_favorite {
            record.is_favorite = v;
        }
        patch.image_url.apply(&mut record.image_url);
    }

    /// Apply to an in-memory recipe; mirrors [`RecipePatch::apply_to_record`].
    pub fn apply_to(&self, recipe: &mut Recipe) {
        let patch = self.clone();
        if let Some(v) = patch.title {
            recipe.title = v;
        }
        if let Some(v) = patch.ingredients {
            recipe.ingredients = v;
        }
        if let Some(v) = patch.instructions {
            recipe.instructions = v;
        }
        if let Some(v) = patch.tags {
            recipe.tags = v;
        }
        if let Some(v) = patch.is_favorite {
            recipe.is_favorite = v;
        }
        patch.image_url.apply(&mut recipe.image_url);
    }
}
