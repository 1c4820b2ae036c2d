//! Graceful shutdown coordination.
//!
//! Ctrl+C flips a shared [`ShutdownCoordinator`]. The export loop checks it
//! between bins and during the pause before a download, so an interrupted
//! run stops on a bin boundary; a partially written artifact is caught as
//! invalid on the next run.

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

static GLOBAL_SHUTDOWN: OnceCell<SharedShutdown> = OnceCell::new();

/// Register the process-wide shutdown handle; later calls are ignored.
pub fn set_global_shutdown(handle: SharedShutdown) {
    let _ = GLOBAL_SHUTDOWN.set(handle);
}

/// Retrieve the registered process-wide shutdown handle, if any.
pub fn get_global_shutdown() -> Option<SharedShutdown> {
    GLOBAL_SHUTDOWN.get().cloned()
}

/// Coordinates graceful shutdown across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown. Wakes every waiter exactly once.
    pub fn request_shutdown(&self) {
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a request in between is not lost
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}
