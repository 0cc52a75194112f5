//! Main mgolayer crate providing a fluent, hook-aware operation layer over document databases.
//!
//! This crate is the primary entry point for users of mgolayer. It re-exports the core types
//! and the derive macros, and gives access to the available drivers.
//!
//! # Features
//!
//! - **Fluent queries** - Chain sort, projection, skip, limit and hint, then finish with `one`, `all`, `count` and friends
//! - **Lifecycle hooks** - Payloads opt into Before/After callbacks around inserts, updates, upserts, removals and queries
//! - **Transactions** - Callback-scoped transactions with automatic retry of transient failures
//! - **Multiple drivers** - An in-memory driver for tests and a MongoDB driver behind the `mongodb` feature
//!
//! # Quick Start
//!
//! ```ignore
//! use mgolayer::{prelude::*, memory::InMemoryDriver};
//!
//! #[derive(Debug, Serialize, Deserialize, Model, Hooks)]
//! #[model(collection = "users")]
//! pub struct User {
//!     #[serde(flatten)]
//!     #[hooks(delegate)]
//!     pub base: BaseModel,
//!     pub name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> MgoResult<()> {
//!     let driver = InMemoryDriver::builder().build().await?;
//!     let client = Client::connect(driver, Config::new("mem://local"), Default::default()).await?;
//!     let users = client.database("app").model_collection::<User>();
//!     let ctx = Context::background();
//!
//!     let mut user = User { base: BaseModel::default(), name: "Alice".into() };
//!     users.insert_one(&ctx, &mut user, None).await?;
//!
//!     let found: User = users
//!         .find(&ctx, doc! { "name": "Alice" }, None)
//!         .sort(&["-createdAt"])
//!         .one()
//!         .await?;
//!     println!("{found:?}");
//!
//!     client
//!         .do_transaction(&ctx, |tx| {
//!             let users = users.clone();
//!             async move {
//!                 users.remove_all(&tx, doc! { "name": "Alice" }, None).await?;
//!                 Ok::<_, MgoError>(())
//!             }
//!         }, None)
//!         .await?;
//!
//!     client.close().await
//! }
//! ```
//!
//! # Drivers
//!
//! - [`memory`] - In-memory driver for development and testing
//! - `mongodb` - MongoDB driver (requires the `mongodb` feature)
//!
//! Other stores plug in by implementing [`driver::Driver`] and [`driver::DriverBuilder`]. Both
//! traits are async; [`async_trait`] is re-exported for writing the impls.

#[allow(unused_extern_crates)]
extern crate self as mgolayer;

pub mod prelude;

pub use mgolayer_core::{
    aggregate, bulk, client, collection, config, context, cursor, database, driver, error, hooks,
    model, options, query, registry, results, session,
};
pub use mgolayer_macros::{Hooks, Model};

pub use async_trait::async_trait;
pub use bson;

/// In-memory driver implementation.
pub mod memory {
    pub use mgolayer_memory::{InMemoryDriver, InMemoryDriverBuilder, MemoryCursor, MemorySession};
}

/// MongoDB driver implementation.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use mgolayer_mongodb::{MongoDriver, MongoDriverBuilder, MongoSession, options::client_options};
}
