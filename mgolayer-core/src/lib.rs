//! A fluent, hook-aware operation layer over document database drivers.
//!
//! This crate is the core of the mgolayer project and provides:
//!
//! - **Driver abstraction** ([`driver`]) - The storage seam every operation goes through
//! - **Client, database and collection handles** ([`client`], [`database`], [`collection`]) - CRUD entry points
//! - **Query building** ([`query`]) - Immutable query specs and terminal read/modify operations
//! - **Cursors** ([`cursor`]) - Lazy iteration with deferred error inspection
//! - **Bulk writes** ([`bulk`]) - Batched heterogeneous writes in one round trip
//! - **Sessions and transactions** ([`session`]) - Transaction coordination with retry signalling
//! - **Lifecycle hooks** ([`hooks`]) - Capability-based Before/After callbacks on payloads
//! - **Options** ([`options`]) - Per-operation overrides and their resolution
//! - **Lifecycle registry** ([`registry`]) - On-connected and on-opened callbacks
//! - **Configuration** ([`config`]) - Connection settings and credential validation
//! - **Models** ([`model`]) - Collection naming and a timestamped base model
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use mgolayer::prelude::*;
//!
//! #[derive(Debug, Serialize, Deserialize, Model, Hooks)]
//! #[model(collection = "users")]
//! #[hooks(before_insert)]
//! pub struct User {
//!     #[serde(rename = "_id")]
//!     pub id: ObjectId,
//!     pub name: String,
//! }
//!
//! impl BeforeInsert for User {
//!     fn before_insert(&mut self, _ctx: &Context) -> MgoResult<()> {
//!         self.id = new_object_id();
//!         Ok(())
//!     }
//! }
//!
//! let users = client.database("app").model_collection::<User>();
//! users.insert_one(&ctx, &mut user, None).await?;
//! let found: User = users.find(&ctx, doc! { "name": "Ann" }, None).one().await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as mgolayer_core;

pub mod aggregate;
pub mod bulk;
pub mod client;
pub mod collection;
pub mod config;
pub mod context;
pub mod cursor;
pub mod database;
pub mod driver;
pub mod error;
pub mod hooks;
pub mod model;
pub mod options;
pub mod query;
pub mod registry;
pub mod results;
pub mod session;
