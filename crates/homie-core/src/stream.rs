// ── Device tree snapshot streams ──
//
// Push-based access to the tree for consumers that prefer awaiting over
// registering callbacks.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::store::DeviceTree;

/// A subscription to the device tree of one environment.
///
/// Holds the snapshot seen at creation time and lets the caller wait for
/// the next one, or turn the subscription into a `Stream`.
pub struct DeviceTreeStream {
    current: DeviceTree,
    receiver: watch::Receiver<DeviceTree>,
}

impl DeviceTreeStream {
    pub(crate) fn new(mut receiver: watch::Receiver<DeviceTree>) -> Self {
        let current = receiver.borrow_and_update().clone();
        Self { current, receiver }
    }

    /// The snapshot captured at creation or at the last `changed()`.
    pub fn current(&self) -> &DeviceTree {
        &self.current
    }

    /// The latest snapshot (may have changed since creation).
    pub fn latest(&self) -> DeviceTree {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new snapshot.
    /// Returns `None` once the owning manager has been dropped.
    pub async fn changed(&mut self) -> Option<DeviceTree> {
        self.receiver.changed().await.ok()?;
        let snapshot = self.receiver.borrow_and_update().clone();
        self.current = snapshot.clone();
        Some(snapshot)
    }

    /// Convert into a `Stream`. The first item is the current snapshot.
    pub fn into_stream(self) -> DeviceTreeWatchStream {
        DeviceTreeWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct DeviceTreeWatchStream {
    inner: WatchStream<DeviceTree>,
}

impl Stream for DeviceTreeWatchStream {
    type Item = DeviceTree;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
