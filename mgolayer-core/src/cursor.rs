//! Lazy iteration over a server-side result stream.

use bson::de::deserialize_from_document;
use serde::de::DeserializeOwned;

use crate::{
    context::Context,
    driver::DriverCursor,
    error::{MgoError, MgoResult},
};

/// A typed view over a driver cursor.
///
/// [`Cursor::next`] follows "keep iterating, inspect the error at the end": it yields `None`
/// both on exhaustion and on failure, and the failure is kept for [`Cursor::err`].
///
/// A cursor whose initial request failed never touches the driver again. Every call reports
/// the original error.
///
/// # Examples
///
/// ```ignore
/// let mut cursor = users.find(&ctx, doc! { "active": true }, None).cursor().await;
/// while let Some(user) = cursor.next::<User>().await {
///     println!("{}", user.name);
/// }
/// if let Some(err) = cursor.err() {
///     return Err(err.clone());
/// }
/// cursor.close().await?;
/// ```
#[derive(Debug)]
pub struct Cursor {
    ctx: Context,
    inner: Option<Box<dyn DriverCursor>>,
    failed: Option<MgoError>,
    err: Option<MgoError>,
}

impl Cursor {
    pub(crate) fn new(ctx: Context, opened: MgoResult<Box<dyn DriverCursor>>) -> Self {
        match opened {
            Ok(inner) => Self {
                ctx,
                inner: Some(inner),
                failed: None,
                err: None,
            },
            Err(err) => Self {
                ctx,
                inner: None,
                failed: Some(err),
                err: None,
            },
        }
    }

    /// Decodes the next document into `T`.
    ///
    /// Returns `None` when the stream is exhausted, the cursor is closed, or fetching or
    /// decoding failed. Check [`Cursor::err`] to tell these apart.
    pub async fn next<T: DeserializeOwned>(&mut self) -> Option<T> {
        if let Some(failed) = &self.failed {
            self.err = Some(failed.clone());
            return None;
        }

        let inner = self.inner.as_mut()?;
        match self.ctx.bound(inner.next_document()).await {
            Ok(Some(document)) => match deserialize_from_document(document) {
                Ok(value) => Some(value),
                Err(err) => {
                    self.err = Some(err.into());
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                self.err = Some(err);
                None
            }
        }
    }

    /// The error that ended iteration, if any.
    pub fn err(&self) -> Option<&MgoError> {
        self.err.as_ref().or(self.failed.as_ref())
    }

    /// Drains the remaining documents into a vector and closes the cursor.
    ///
    /// # Errors
    ///
    /// Returns the first fetch or decode failure.
    pub async fn all<T: DeserializeOwned>(&mut self) -> MgoResult<Vec<T>> {
        if let Some(failed) = &self.failed {
            return Err(failed.clone());
        }

        let mut values = Vec::new();
        if let Some(inner) = self.inner.as_mut() {
            while let Some(document) = self.ctx.bound(inner.next_document()).await? {
                values.push(deserialize_from_document(document)?);
            }
        }

        self.close().await?;
        Ok(values)
    }

    /// Releases the underlying stream. Safe to call repeatedly.
    pub async fn close(&mut self) -> MgoResult<()> {
        if let Some(failed) = &self.failed {
            return Err(failed.clone());
        }

        match self.inner.take() {
            Some(mut inner) => inner.close().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use bson::{Document, doc};
    use serde::Deserialize;

    use super::*;

    #[derive(Debug)]
    struct Scripted(VecDeque<Document>);

    #[async_trait]
    impl DriverCursor for Scripted {
        async fn next_document(&mut self) -> MgoResult<Option<Document>> {
            Ok(self.0.pop_front())
        }

        async fn close(&mut self) -> MgoResult<()> {
            Ok(())
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        n: i32,
    }

    fn cursor(docs: Vec<Document>) -> Cursor {
        Cursor::new(Context::background(), Ok(Box::new(Scripted(docs.into()))))
    }

    #[tokio::test]
    async fn decode_failure_stops_iteration_and_is_kept() {
        let mut cursor = cursor(vec![doc! { "n": 1 }, doc! { "n": "two" }, doc! { "n": 3 }]);

        assert_eq!(cursor.next::<Item>().await, Some(Item { n: 1 }));
        assert_eq!(cursor.next::<Item>().await, None);
        assert!(matches!(cursor.err(), Some(MgoError::Serialization(_))));
    }

    #[tokio::test]
    async fn exhaustion_leaves_no_error() {
        let mut cursor = cursor(vec![doc! { "n": 1 }]);

        assert!(cursor.next::<Item>().await.is_some());
        assert!(cursor.next::<Item>().await.is_none());
        assert!(cursor.err().is_none());
        cursor.close().await.unwrap();
        cursor.close().await.unwrap();
    }

    #[tokio::test]
    async fn all_drains_remaining() {
        let mut cursor = cursor(vec![doc! { "n": 1 }, doc! { "n": 2 }, doc! { "n": 3 }]);
        let _ = cursor.next::<Item>().await;

        let rest: Vec<Item> = cursor.all().await.unwrap();

        assert_eq!(rest, vec![Item { n: 2 }, Item { n: 3 }]);
        assert!(cursor.next::<Item>().await.is_none());
    }

    #[tokio::test]
    async fn failed_open_fails_every_call() {
        let mut cursor = Cursor::new(Context::background(), Err(MgoError::Timeout));

        assert!(cursor.next::<Item>().await.is_none());
        assert!(matches!(cursor.err(), Some(MgoError::Timeout)));
        assert!(matches!(cursor.all::<Item>().await, Err(MgoError::Timeout)));
        assert!(matches!(cursor.close().await, Err(MgoError::Timeout)));
    }
}
