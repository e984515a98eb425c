// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod identity;
pub mod recipe;
pub mod timestamp;

pub use identity::{AuthProvider, Identity};
pub use recipe::{
    normalize_snapshot, sort_newest_first, FieldUpdate, NewRecipe, Recipe, RecipeDocument,
    RecipePatch, RecipeRecord,
};
pub use timestamp::{ServerTimestamp, StoredTimestamp};
