//! Streaming Scan
//!
//! A lazy, forward-only sequence fed by a background producer through a
//! bounded channel. The producer suspends while the channel holds
//! `buffer_size` unread rows, so peak memory does not grow with the
//! collection.

use std::fmt;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::error::{RepoError, Result};
use crate::models::Entity;
use crate::query::with_deadline;
use crate::store::{EntityStore, ScanRequest};

// == Entity Stream ==
/// Single-pass stream of entities with bounded read-ahead.
///
/// Not restartable: a second pass needs a new call. Dropping the stream stops
/// the producer and releases its cursor. If the caller's cancellation token
/// fires, the stream yields one `Cancelled` error and then ends.
pub struct EntityStream<T> {
    rx: mpsc::Receiver<Result<T>>,
    stop: CancellationToken,
    _producer: DropGuard,
    peak_buffered: Arc<AtomicUsize>,
    buffer_size: usize,
    done: bool,
}

impl<T: Entity> EntityStream<T> {
    /// Starts a producer over `store` and returns the consuming end.
    pub(crate) fn open<S>(
        store: Arc<S>,
        buffer_size: NonZeroUsize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Self
    where
        S: EntityStore<T> + ?Sized + 'static,
    {
        let buffer_size = buffer_size.get();
        let (tx, rx) = mpsc::channel(buffer_size);
        let stop = cancel.child_token();
        let peak_buffered = Arc::new(AtomicUsize::new(0));

        tokio::spawn(produce(
            store,
            buffer_size,
            timeout,
            stop.clone(),
            tx,
            Arc::clone(&peak_buffered),
        ));

        Self {
            rx,
            _producer: stop.clone().drop_guard(),
            stop,
            peak_buffered,
            buffer_size,
            done: false,
        }
    }
}

impl<T> EntityStream<T> {
    /// Capacity of the read-ahead buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Highest number of unread rows the buffer has held so far.
    pub fn peak_buffered(&self) -> usize {
        self.peak_buffered.load(Ordering::SeqCst)
    }
}

impl<T> fmt::Debug for EntityStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStream")
            .field("buffer_size", &self.buffer_size)
            .field("peak_buffered", &self.peak_buffered())
            .field("done", &self.done)
            .finish()
    }
}

impl<T> Stream for EntityStream<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if this.stop.is_cancelled() {
            this.done = true;
            this.rx.close();
            return Poll::Ready(Some(Err(RepoError::Cancelled(
                "stream cancelled".to_string(),
            ))));
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(None) if this.stop.is_cancelled() => {
                this.done = true;
                Poll::Ready(Some(Err(RepoError::Cancelled(
                    "stream cancelled".to_string(),
                ))))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

/// Producer side: pages through the store and feeds the channel.
///
/// Slots are reserved before each fetch and a page never asks for more rows
/// than were reserved, so rows buffered plus rows in hand stay within
/// `buffer_size`.
async fn produce<T, S>(
    store: Arc<S>,
    buffer_size: usize,
    timeout: Duration,
    stop: CancellationToken,
    tx: mpsc::Sender<Result<T>>,
    peak_buffered: Arc<AtomicUsize>,
) where
    T: Entity,
    S: EntityStore<T> + ?Sized,
{
    let mut cursor: Option<T::Id> = None;
    let mut produced = 0usize;

    loop {
        // Sole sender: free capacity only grows until the reservation lands
        let wanted = tx.capacity().clamp(1, buffer_size);
        let mut permits = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                debug!(produced, "stream producer stopped");
                return;
            }
            reserved = tx.reserve_many(wanted) => match reserved {
                Ok(permits) => permits,
                Err(_) => {
                    debug!(produced, "stream consumer went away");
                    return;
                }
            }
        };

        let request = ScanRequest::page(wanted).after(cursor.take());
        let fetch = async { store.scan(request).await.map_err(RepoError::from) };
        let page: Vec<T> = match with_deadline(&stop, timeout, fetch).await {
            Ok(page) => page,
            Err(_) if stop.is_cancelled() => {
                debug!(produced, "stream producer stopped");
                return;
            }
            Err(err) => {
                warn!(error = %err, produced, "stream producer failed");
                if let Some(permit) = permits.next() {
                    permit.send(Err(err));
                }
                return;
            }
        };

        let exhausted = page.len() < wanted;
        cursor = page.last().map(|entity| entity.id().clone());

        // Unused permits go back to the channel with the iterator
        for (permit, entity) in permits.zip(page) {
            permit.send(Ok(entity));
            produced += 1;
        }

        let unread = buffer_size.saturating_sub(tx.capacity());
        peak_buffered.fetch_max(unread, Ordering::SeqCst);

        if exhausted {
            debug!(produced, "stream exhausted");
            return;
        }
    }
}
