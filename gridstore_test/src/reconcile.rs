//! Bulk writes against a table: service-size chunks, bounded concurrency,
//! and resubmission of whatever the service reports as unprocessed.

use std::num::NonZeroU32;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt, stream};
use gridstore_client::TableClient;
use gridstore_types::{Item, MAX_BATCH_ITEMS, TableDefinition, WriteRequest};
use tracing::debug;

use crate::error::{FixtureError, Result};

/// Maximum number of batch writes in flight at once.
pub(crate) const MAX_IN_FLIGHT_BATCHES: usize = 10;

/// Governs resubmission of unprocessed write entries.
///
/// After retry round `n` the reconciler sleeps `base_delay * 2^n` before
/// resubmitting. `max_attempts` bounds the number of rounds; `None` keeps
/// retrying until the residue drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_attempts: Option<NonZeroU32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        // shift capped so the doubling cannot overflow
        self.base_delay.saturating_mul(1u32 << attempt.min(20))
    }
}

/// Put every item into the table.
pub(crate) async fn put_all(
    table: &TableClient,
    items: Vec<Item>,
    policy: &RetryPolicy,
) -> Result<()> {
    let requests = items.into_iter().map(WriteRequest::put).collect();
    send_all(table, requests, policy).await
}

/// Scan the table and delete everything it returns.
///
/// Scans are strongly consistent, and deletes carry only the key
/// attributes of each scanned item. Deletes flush in service-size chunks
/// as the scan progresses, with a final partial chunk at the end.
pub(crate) async fn delete_all(
    table: &TableClient,
    definition: &TableDefinition,
    policy: &RetryPolicy,
) -> Result<()> {
    let scan = table.scan().consistent_read(true).into_stream();
    futures::pin_mut!(scan);

    let mut buffer = Vec::with_capacity(MAX_BATCH_ITEMS);
    while let Some(item) = scan.try_next().await? {
        buffer.push(WriteRequest::delete(definition.key_of(&item)?));
        if buffer.len() == MAX_BATCH_ITEMS {
            send_all(table, std::mem::take(&mut buffer), policy).await?;
        }
    }
    send_all(table, buffer, policy).await
}

/// Write every request, resubmitting unprocessed residue until none
/// remains or the policy's retry rounds run out.
pub(crate) async fn send_all(
    table: &TableClient,
    requests: Vec<WriteRequest>,
    policy: &RetryPolicy,
) -> Result<()> {
    let mut pending = requests;
    let mut attempt = 0u32;
    loop {
        if pending.is_empty() {
            return Ok(());
        }

        let unprocessed = send_chunked(table, pending).await?;
        if unprocessed.is_empty() {
            return Ok(());
        }

        attempt += 1;
        if let Some(max) = policy.max_attempts {
            if attempt > max.get() {
                return Err(FixtureError::RetriesExhausted {
                    remaining: unprocessed.len(),
                    attempts: max.get(),
                });
            }
        }

        let delay = policy.delay(attempt);
        debug!(
            remaining = unprocessed.len(),
            attempt,
            ?delay,
            "backing off before resubmitting unprocessed entries"
        );
        tokio::time::sleep(delay).await;
        pending = unprocessed;
    }
}

/// Issue one round of writes, chunked to the service's batch limit with up
/// to [`MAX_IN_FLIGHT_BATCHES`] chunks in flight, and collect whatever
/// comes back unprocessed.
async fn send_chunked(
    table: &TableClient,
    requests: Vec<WriteRequest>,
) -> Result<Vec<WriteRequest>> {
    let unprocessed: Vec<Vec<WriteRequest>> = stream::iter(chunked(requests))
        .map(|chunk| table.batch_write(chunk))
        .buffer_unordered(MAX_IN_FLIGHT_BATCHES)
        .try_collect()
        .await?;

    Ok(unprocessed.into_iter().flatten().collect())
}

fn chunked(requests: Vec<WriteRequest>) -> Vec<Vec<WriteRequest>> {
    let mut chunks = Vec::with_capacity(requests.len().div_ceil(MAX_BATCH_ITEMS));
    let mut rest = requests;
    while rest.len() > MAX_BATCH_ITEMS {
        let tail = rest.split_off(MAX_BATCH_ITEMS);
        chunks.push(rest);
        rest = tail;
    }
    if !rest.is_empty() {
        chunks.push(rest);
    }
    chunks
}
