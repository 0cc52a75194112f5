//! Aggregation pipelines.

use bson::Document;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    collection::Collection,
    context::Context,
    cursor::Cursor,
    driver::{AggregateSettings, Driver},
    error::{MgoError, MgoResult},
};

/// A prepared aggregation over one collection.
#[derive(Debug)]
pub struct Aggregate<'c, D> {
    collection: &'c Collection<D>,
    ctx: Context,
    pipeline: Vec<Document>,
    settings: AggregateSettings,
}

impl<'c, D: Driver> Aggregate<'c, D> {
    pub(crate) fn new(
        collection: &'c Collection<D>,
        ctx: Context,
        pipeline: Vec<Document>,
        settings: AggregateSettings,
    ) -> Self {
        Self {
            collection,
            ctx,
            pipeline,
            settings,
        }
    }

    pub fn pipeline(&self) -> &[Document] {
        &self.pipeline
    }

    /// Runs the pipeline and decodes every output document.
    pub async fn all<T: DeserializeOwned>(self) -> MgoResult<Vec<T>> {
        self.iter().await.all().await
    }

    /// Runs the pipeline and decodes the first output document.
    ///
    /// # Errors
    ///
    /// Returns [`MgoError::NoSuchDocuments`] if the pipeline produced nothing.
    pub async fn one<T: DeserializeOwned>(self) -> MgoResult<T> {
        let mut cursor = self.iter().await;
        let first = cursor.next::<T>().await;
        if let Some(err) = cursor.err() {
            return Err(err.clone());
        }
        cursor.close().await?;

        first.ok_or(MgoError::NoSuchDocuments)
    }

    /// Runs the pipeline and returns a cursor over its output.
    pub async fn iter(self) -> Cursor {
        let ns = self.collection.namespace();
        debug!(collection = %ns, stages = self.pipeline.len(), "aggregate");
        let opened = self
            .ctx
            .bound(self.collection.driver().aggregate(
                &self.ctx,
                ns,
                self.pipeline,
                self.settings,
            ))
            .await;

        Cursor::new(self.ctx, opened)
    }
}
