// ── Reactive entity streams ──
//
// Subscription types for consuming state changes from the EntityStore.

mod filter;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use hass_api::HassState;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

pub use filter::EventFilter;

/// A subscription to the entity-state collection.
///
/// Provides both point-in-time snapshot access and reactive change
/// notification via [`changed`](Self::changed) or by converting into a
/// `Stream`.
pub struct EntityStream {
    current: Arc<Vec<Arc<HassState>>>,
    receiver: watch::Receiver<Arc<Vec<Arc<HassState>>>>,
}

impl EntityStream {
    pub(crate) fn new(receiver: watch::Receiver<Arc<Vec<Arc<HassState>>>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The snapshot captured at creation time.
    pub fn current(&self) -> &Arc<Vec<Arc<HassState>>> {
        &self.current
    }

    /// The latest snapshot (may have changed since creation).
    pub fn latest(&self) -> Arc<Vec<Arc<HassState>>> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new snapshot.
    /// Returns `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<Vec<Arc<HassState>>>> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> EntityWatchStream {
        EntityWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
///
/// Yields a new snapshot each time the underlying collection mutates.
pub struct EntityWatchStream {
    inner: WatchStream<Arc<Vec<Arc<HassState>>>>,
}

impl Stream for EntityWatchStream {
    type Item = Arc<Vec<Arc<HassState>>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
