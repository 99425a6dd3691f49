//! Periodic expiry of pending verification codes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::verification::VerificationService;

/// How often stale codes are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Moves users whose code expired back to the email step.
pub struct CodeSweeper {
    service: Arc<VerificationService>,
    period: Duration,
    shutdown: watch::Receiver<bool>,
}

impl CodeSweeper {
    pub fn new(service: Arc<VerificationService>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            service,
            period: SWEEP_INTERVAL,
            shutdown,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Runs until the shutdown flag flips to `true` or its sender is dropped.
    pub async fn run(mut self) {
        let mut ticker = interval(self.period);
        debug!(period_secs = self.period.as_secs(), "Starting code sweeper");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Code sweeper stopped");
    }

    /// One pass. Returns how many users were moved.
    pub async fn sweep_once(&self) -> usize {
        match self.service.expire_stale_codes(Utc::now()).await {
            Ok(0) => 0,
            Ok(n) => {
                info!(expired = n, "Expired stale verification codes");
                n
            }
            Err(e) => {
                warn!(error = %e, "Code sweep failed");
                0
            }
        }
    }
}
