// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Tag catalogue offered when editing a recipe.

use crate::cache::LocalCache;
use crate::error::{AppError, Result};
use parking_lot::RwLock;
use std::sync::Arc;

/// Cache key of the stored catalogue.
pub const TAGS_KEY: &str = "recipe_tags";

pub const DEFAULT_TAGS: &[&str] = &[
    "Vegan",
    "Vegetarisch",
    "Schnell",
    "Pasta",
    "Herzhaft",
    "Süß",
    "Low Carb",
];

fn defaults() -> Vec<String> {
    DEFAULT_TAGS.iter().map(|t| t.to_string()).collect()
}

/// User-editable list of tags, persisted in the local cache.
#[derive(Clone)]
pub struct TagStore {
    cache: Arc<dyn LocalCache>,
    tags: Arc<RwLock<Vec<String>>>,
}

impl TagStore {
    /// Load the stored catalogue; missing or unreadable values give the defaults.
    pub async fn load(cache: Arc<dyn LocalCache>) -> Self {
        let tags = match cache.get(TAGS_KEY).await {
            Ok(Some(value)) => serde_json::from_value::<Vec<String>>(value).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Stored tags unreadable, using defaults");
                defaults()
            }),
            Ok(None) => defaults(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read stored tags");
                defaults()
            }
        };
        Self {
            cache,
            tags: Arc::new(RwLock::new(tags)),
        }
    }

    pub fn tags(&self) -> Vec<String> {
        self.tags.read().clone()
    }

    /// Add a tag. Blank or duplicate tags are ignored; returns whether it was added.
    pub async fn add(&self, tag: &str) -> Result<bool> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Ok(false);
        }
        {
            let mut tags = self.tags.write();
            if tags.iter().any(|t| t == tag) {
                return Ok(false);
            }
            tags.push(tag.to_string());
        }
        self.save().await?;
        Ok(true)
    }

    pub async fn remove(&self, tag: &str) -> Result<()> {
        self.tags.write().retain(|t| t != tag);
        self.save().await
    }

    pub async fn reset_to_defaults(&self) -> Result<()> {
        *self.tags.write() = defaults();
        self.save().await
    }

    async fn save(&self) -> Result<()> {
        let value = serde_json::to_value(self.tags())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("tag encode failed: {e}")))?;
        self.cache.put(TAGS_KEY, value).await
    }
}
