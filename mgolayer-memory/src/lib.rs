//! In-memory driver for mgolayer.
//!
//! This crate provides a thread-safe, in-memory implementation of the `Driver` trait. It is
//! meant for tests and local development: no server is needed and every clone of a driver
//! shares the same data.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//! - **Query operators** - Equality, comparison, membership and logical combinators on dotted paths
//! - **Update operators** - `$set`, `$unset`, `$inc` and `$setOnInsert`, with upserts
//! - **Sessions** - Snapshot transactions that restore the store on abort
//! - **Aggregation** - `$match`, `$sort`, `$skip`, `$limit`, `$project` and `$count` stages
//!
//! # Quick Start
//!
//! ```ignore
//! use mgolayer::{prelude::*, memory::InMemoryDriver};
//!
//! #[tokio::main]
//! async fn main() -> MgoResult<()> {
//!     let driver = InMemoryDriver::builder().build().await?;
//!     let client = Client::connect(driver, Config::new("mem://local"), Default::default()).await?;
//!
//!     let users = client.database("app").collection("users");
//!     users.insert_one(&Context::background(), &mut doc! { "name": "Alice" }, None).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as mgolayer_memory;

pub mod evaluator;
pub mod session;
pub mod store;
pub mod update;

pub use session::{MemoryCursor, MemorySession};
pub use store::{InMemoryDriver, InMemoryDriverBuilder};
