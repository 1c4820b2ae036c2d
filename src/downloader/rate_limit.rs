//! Fixed-delay pacing between downloads
//!
//! Exports are already strictly sequential; the throttle only adds a fixed
//! pause before every download after the first so a long run does not keep
//! the server busy back to back.

use crate::shutdown::SharedShutdown;
use std::time::Duration;
use tracing::debug;

/// Delay inserted between consecutive downloads
#[derive(Debug, Clone)]
pub struct Throttle {
    delay: Duration,
    primed: bool,
}

impl Throttle {
    /// Pause `delay` between downloads
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            primed: false,
        }
    }

    /// No pause at all
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Configured pause
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Wait before the next download
    ///
    /// The first call returns immediately. Returns `false` when shutdown was
    /// requested during the pause.
    pub async fn wait(&mut self, shutdown: Option<&SharedShutdown>) -> bool {
        if !std::mem::replace(&mut self.primed, true) || self.delay.is_zero() {
            return true;
        }

        debug!(delay_ms = self.delay.as_millis(), "Pausing before next download");
        match shutdown {
            Some(shutdown) => {
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => true,
                    _ = shutdown.wait_for_shutdown() => false,
                }
            }
            None => {
                tokio::time::sleep(self.delay).await;
                true
            }
        }
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::disabled()
    }
}
