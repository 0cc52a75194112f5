//! Model support: collection naming, a timestamped base model and object-id helpers.

use bson::{DateTime, oid::ObjectId};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    context::Context,
    error::MgoResult,
    hooks::{BeforeInsert, BeforeUpdate, BeforeUpsert, Hooks},
};

/// A type stored in a known collection.
///
/// Usually derived:
///
/// ```ignore
/// #[derive(Model)]
/// #[model(collection = "users")]
/// struct User { /* ... */ }
/// ```
pub trait Model {
    fn collection_name() -> &'static str;
}

/// Identifier and timestamps maintained by hooks.
///
/// - BeforeInsert assigns a fresh identifier and sets both timestamps.
/// - BeforeUpdate (and therefore BeforeReplace) refreshes `updated_at`.
/// - BeforeUpsert fills in a missing identifier or creation time and refreshes `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime,
}

impl Default for BaseModel {
    fn default() -> Self {
        Self {
            id: nil_object_id(),
            created_at: DateTime::from_millis(0),
            updated_at: DateTime::from_millis(0),
        }
    }
}

fn now() -> DateTime {
    DateTime::from_chrono(Utc::now())
}

impl BeforeInsert for BaseModel {
    fn before_insert(&mut self, _ctx: &Context) -> MgoResult<()> {
        let now = now();
        self.id = new_object_id();
        self.created_at = now;
        self.updated_at = now;
        Ok(())
    }
}

impl BeforeUpdate for BaseModel {
    fn before_update(&mut self, _ctx: &Context) -> MgoResult<()> {
        self.updated_at = now();
        Ok(())
    }
}

impl BeforeUpsert for BaseModel {
    fn before_upsert(&mut self, _ctx: &Context) -> MgoResult<()> {
        let now = now();
        if is_nil_object_id(&self.id) {
            self.id = new_object_id();
        }
        if self.created_at.timestamp_millis() == 0 {
            self.created_at = now;
        }
        self.updated_at = now;
        Ok(())
    }
}

impl Hooks for BaseModel {
    fn as_before_insert(&mut self) -> Option<&mut dyn BeforeInsert> {
        Some(self)
    }

    fn as_before_update(&mut self) -> Option<&mut dyn BeforeUpdate> {
        Some(self)
    }

    fn as_before_upsert(&mut self) -> Option<&mut dyn BeforeUpsert> {
        Some(self)
    }
}

pub fn new_object_id() -> ObjectId {
    ObjectId::new()
}

/// The all-zero object id.
pub fn nil_object_id() -> ObjectId {
    ObjectId::from_bytes([0; 12])
}

/// Parses a hex object id, falling back to a fresh id when `hex` is not valid.
pub fn object_id_from_hex_or_new(hex: &str) -> ObjectId {
    ObjectId::parse_str(hex).unwrap_or_else(|_| ObjectId::new())
}

pub fn is_nil_object_id(id: &ObjectId) -> bool {
    *id == nil_object_id()
}
