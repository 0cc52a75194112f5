//! Convenient re-exports of commonly used types from mgolayer.
//!
//! ```ignore
//! use mgolayer::prelude::*;
//! ```
//!
//! This provides access to:
//! - Client, database and collection handles
//! - Query, cursor, aggregate and bulk builders
//! - Hook traits and the derive macros
//! - Option types, configuration and error types

pub use mgolayer_core::{
    aggregate::Aggregate,
    bulk::Bulk,
    client::Client,
    collection::{Collection, id_filter},
    config::{Config, Credential, ReadMode, ReadPref},
    context::Context,
    cursor::Cursor,
    database::Database,
    driver::{Driver, DriverBuilder},
    error::{MgoError, MgoResult},
    hooks::{
        AfterInsert, AfterQuery, AfterRemove, AfterUpdate, AfterUpsert, BeforeInsert, BeforeQuery,
        BeforeRemove, BeforeUpdate, BeforeUpsert, Hooks,
    },
    model::{BaseModel, Model, new_object_id},
    options::{
        AggregateOptions, FindOptions, InsertManyOptions, InsertOneOptions, RemoveOptions,
        ReplaceOptions, SessionOptions, TransactionOptions, UpdateOptions, UpsertOptions,
    },
    query::{Change, Query},
    registry::HookRegistry,
    results::{BulkResult, DeleteResult, InsertManyResult, InsertOneResult, UpdateResult},
    session::Session,
};
pub use mgolayer_macros::{Hooks, Model};

pub use bson::{Bson, Document, doc, oid::ObjectId};
pub use serde::{Deserialize, Serialize};
