//! MongoDB driver for mgolayer.
//!
//! This crate implements the `Driver` trait on top of the official `mongodb` crate.
//!
//! To use this driver, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! mgolayer = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Configuration mapping** - Pool sizes, timeouts, credentials and read preference come from [`Config`](mgolayer_core::config::Config)
//! - **Sessions and transactions** - Operations run inside the session carried by the call's context
//! - **Error fidelity** - Server codes and error labels survive the conversion
//! - **Bulk writes** - Batches are sent with the client-level bulk write command
//!
//! # Example
//!
//! ```ignore
//! use mgolayer::{prelude::*, mongodb::MongoDriverBuilder};
//!
//! #[tokio::main]
//! async fn main() -> MgoResult<()> {
//!     let config = Config::new("mongodb://localhost:27017");
//!     let driver = MongoDriverBuilder::new(config.clone()).build().await?;
//!     let client = Client::connect(driver, config, Default::default()).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as mgolayer_mongodb;

pub mod error;
pub mod options;
pub mod session;
pub mod store;

pub use session::MongoSession;
pub use store::{MongoDriver, MongoDriverBuilder};
