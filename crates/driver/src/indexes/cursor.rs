//! Lazy cursor over `listIndexes` results

use doccontrol_core::error::{Error, Result};
use doccontrol_core::executor::{with_cancellation, CommandExecutor};
use doccontrol_core::index::IndexDescriptor;
use doccontrol_core::namespace::CollectionNamespace;
use doccontrol_core::server::CommandTarget;
use futures::Stream;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Finite, forward-only sequence of index descriptors
///
/// Holds the current batch locally and fetches the next one with `getMore`
/// once it is drained. Ordering is whatever the server returns.
pub struct IndexCursor {
    executor: Arc<dyn CommandExecutor>,
    namespace: CollectionNamespace,
    buffer: VecDeque<Value>,
    cursor_id: i64,
    batch_size: u32,
}

impl IndexCursor {
    pub(crate) fn new(
        executor: Arc<dyn CommandExecutor>,
        namespace: CollectionNamespace,
        first_batch: Vec<Value>,
        cursor_id: i64,
        batch_size: u32,
    ) -> Self {
        Self {
            executor,
            namespace,
            buffer: first_batch.into(),
            cursor_id,
            batch_size,
        }
    }

    /// A cursor with nothing to yield
    pub(crate) fn empty(
        executor: Arc<dyn CommandExecutor>,
        namespace: CollectionNamespace,
    ) -> Self {
        Self::new(executor, namespace, Vec::new(), 0, 1)
    }

    /// Parses the `cursor` sub-document of a `listIndexes` or `getMore` reply
    pub(crate) fn parse_batch(reply: &Value, batch_field: &str) -> Result<(i64, Vec<Value>)> {
        let cursor = reply
            .get("cursor")
            .ok_or_else(|| Error::serialization("Reply is missing 'cursor'"))?;
        let id = cursor
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::serialization("Cursor reply is missing 'id'"))?;
        let batch = cursor
            .get(batch_field)
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                Error::serialization(format!("Cursor reply is missing '{batch_field}'"))
            })?;
        Ok((id, batch))
    }

    pub fn namespace(&self) -> &CollectionNamespace {
        &self.namespace
    }

    /// True once every batch has been fetched and yielded
    pub fn is_exhausted(&self) -> bool {
        self.buffer.is_empty() && self.cursor_id == 0
    }

    /// Next descriptor, fetching another batch if needed
    pub async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<IndexDescriptor>> {
        loop {
            if let Some(doc) = self.buffer.pop_front() {
                return IndexDescriptor::from_document(doc, &self.namespace).map(Some);
            }
            if self.cursor_id == 0 {
                return Ok(None);
            }
            self.get_more(cancel).await?;
        }
    }

    /// Drain the cursor into a vector
    pub async fn try_collect(mut self, cancel: &CancellationToken) -> Result<Vec<IndexDescriptor>> {
        let mut indexes = Vec::with_capacity(self.buffer.len());
        while let Some(index) = self.next(cancel).await? {
            indexes.push(index);
        }
        Ok(indexes)
    }

    /// Adapt the cursor into a [`Stream`]
    pub fn into_stream(
        self,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<IndexDescriptor>> + Send {
        futures::stream::try_unfold((self, cancel), |(mut cursor, cancel)| async move {
            let next = cursor.next(&cancel).await?;
            Ok::<_, Error>(next.map(|index| (index, (cursor, cancel))))
        })
    }

    /// Release the server-side cursor if batches remain unfetched
    pub async fn close(mut self, cancel: &CancellationToken) -> Result<()> {
        self.buffer.clear();
        if self.cursor_id == 0 {
            return Ok(());
        }

        let command = json!({
            "killCursors": self.namespace.collection(),
            "cursors": [self.cursor_id],
        });
        let cursor_id = std::mem::take(&mut self.cursor_id);
        debug!("Closing index cursor {} on {}", cursor_id, self.namespace);
        self.run(command, cancel).await?;
        Ok(())
    }

    async fn get_more(&mut self, cancel: &CancellationToken) -> Result<()> {
        let command = json!({
            "getMore": self.cursor_id,
            "collection": self.namespace.collection(),
            "batchSize": self.batch_size,
        });
        debug!(
            "Fetching next index batch for {} (cursor {})",
            self.namespace, self.cursor_id
        );

        let reply = self.run(command, cancel).await?;
        let (id, batch) = Self::parse_batch(&reply, "nextBatch")?;
        self.cursor_id = id;
        self.buffer.extend(batch);
        Ok(())
    }

    async fn run(&self, command: Value, cancel: &CancellationToken) -> Result<Value> {
        with_cancellation(
            cancel,
            self.executor.execute(
                self.namespace.database(),
                command,
                &CommandTarget::Primary,
                cancel,
            ),
        )
        .await
    }
}

impl std::fmt::Debug for IndexCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexCursor")
            .field("namespace", &self.namespace)
            .field("buffered", &self.buffer.len())
            .field("cursor_id", &self.cursor_id)
            .finish()
    }
}
