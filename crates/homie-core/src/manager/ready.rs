// ── Device readiness ──

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{self, BoxFuture, Shared};
use tokio::sync::oneshot;
use tracing::debug;

use super::listeners::ListenerHandle;
use super::{DeviceSubscription, EnvironmentManager, ManagerInner, lock};

/// Resolves once a device has loaded its first `$description`.
///
/// Clones share one underlying wait. If the manager is disposed before the
/// device becomes ready, the future never resolves; bound it with
/// [`EnvironmentManager::ready_timeout`] where that matters.
#[derive(Clone)]
#[must_use = "futures do nothing unless awaited"]
pub struct DeviceReady {
    inner: Shared<BoxFuture<'static, ()>>,
}

impl DeviceReady {
    fn resolved() -> Self {
        Self {
            inner: future::ready(()).boxed().shared(),
        }
    }

    fn waiting(done: oneshot::Receiver<()>) -> Self {
        let wait = async move {
            if done.await.is_err() {
                future::pending::<()>().await;
            }
        };
        Self {
            inner: wait.boxed().shared(),
        }
    }

    /// `true` once the wait has completed.
    pub fn is_ready(&self) -> bool {
        self.inner.peek().is_some()
    }
}

impl Future for DeviceReady {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl std::fmt::Debug for DeviceReady {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceReady")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Resources held while waiting. Released all at once on completion.
struct Waiter {
    listener: ListenerHandle,
    subscription: DeviceSubscription,
    done: oneshot::Sender<()>,
}

type WaiterSlot = Arc<Mutex<Option<Waiter>>>;

fn complete(slot: &WaiterSlot) {
    let waiter = lock(slot).take();
    if let Some(Waiter {
        listener,
        subscription,
        done,
    }) = waiter
    {
        drop(listener);
        drop(subscription);
        let _ = done.send(());
    }
}

impl EnvironmentManager {
    /// Wait until `device_id` has loaded its initial description.
    ///
    /// Resolves immediately for a device that is already ready. Otherwise
    /// keeps a device subscription and a change listener alive until the
    /// description arrives, then releases both. Concurrent callers get
    /// clones of the same future.
    pub fn device_ready(&self, device_id: &str) -> DeviceReady {
        let mut memo = lock(&self.inner.ready);
        if let Some(existing) = memo.get(device_id) {
            return existing.clone();
        }

        let ready = self.start_ready_wait(device_id);
        memo.insert(device_id.to_owned(), ready.clone());
        ready
    }

    fn start_ready_wait(&self, device_id: &str) -> DeviceReady {
        if self.snapshot().is_device_ready(device_id) {
            return DeviceReady::resolved();
        }

        debug!(device_id, "waiting for device description");
        let (done, wait) = oneshot::channel();
        let slot: WaiterSlot = Arc::new(Mutex::new(None));

        let subscription = self.subscribe_to_device(device_id);
        let listener = self.add_listener(ready_check(
            Arc::downgrade(&self.inner),
            Arc::clone(&slot),
            device_id.to_owned(),
        ));

        *lock(&slot) = Some(Waiter {
            listener,
            subscription,
            done,
        });

        // The description may have landed between the first check and the
        // listener going live.
        if self.snapshot().is_device_ready(device_id) {
            complete(&slot);
        }

        DeviceReady::waiting(wait)
    }
}

fn ready_check(
    inner: Weak<ManagerInner>,
    slot: WaiterSlot,
    device_id: String,
) -> impl Fn() + Send + Sync + 'static {
    move || {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.tree.borrow().is_device_ready(&device_id) {
            debug!(device_id = %device_id, "device ready");
            complete(&slot);
        }
    }
}
