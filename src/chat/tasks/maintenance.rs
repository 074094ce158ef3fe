//! Periodic maintenance of chat state.
//!
//! Purges long-running tasks past their maximum age, drops optimistic
//! messages that never got confirmed and forgets streaming marks left by
//! tabs that went away mid-reply.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::chat::core::clock::Clock;
use crate::chat::core::config::TimingConfig;
use crate::chat::core::shutdown::Shutdown;
use crate::chat::store::state::ChatState;

/// Configuration for the maintenance worker.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Interval between runs.
    pub interval: Duration,
    /// Whether the worker runs at all.
    pub enabled: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self::from_timing(&TimingConfig::default())
    }
}

impl MaintenanceConfig {
    /// Enabled worker running every `sweep_interval_ms`.
    #[must_use]
    pub const fn from_timing(timing: &TimingConfig) -> Self {
        Self {
            interval: timing.sweep_interval(),
            enabled: true,
        }
    }
}

/// Statistics from a maintenance run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceStats {
    /// Long-running tasks purged for age.
    pub tasks_purged: usize,
    /// Optimistic messages dropped as confirmed or expired.
    pub optimistic_dropped: usize,
    /// Remote streaming marks expired for age.
    pub remote_marks_expired: usize,
    /// Whether optimistic cleanup was skipped by its throttle.
    pub throttled: bool,
}

/// Background worker sweeping one tab's state.
pub struct MaintenanceWorker {
    state: Arc<RwLock<ChatState>>,
    clock: Clock,
    config: MaintenanceConfig,
    shutdown: Arc<Shutdown>,
}

impl MaintenanceWorker {
    /// Create a worker with its own shutdown signal.
    #[must_use]
    pub fn new(state: Arc<RwLock<ChatState>>, clock: Clock, config: MaintenanceConfig) -> Self {
        Self {
            state,
            clock,
            config,
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    /// Stop when `shutdown` triggers instead of the worker's own signal.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Arc<Shutdown>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Spawn the worker as a tokio task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("Chat maintenance is disabled");
            return;
        }

        let interval = self.config.interval;
        info!(?interval, "Starting chat maintenance worker");

        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    let stats = self.run_once().await;
                    if stats.tasks_purged > 0
                        || stats.optimistic_dropped > 0
                        || stats.remote_marks_expired > 0
                    {
                        info!(
                            tasks = stats.tasks_purged,
                            optimistic = stats.optimistic_dropped,
                            remote_marks = stats.remote_marks_expired,
                            "Maintenance completed"
                        );
                    } else {
                        debug!(
                            throttled = stats.throttled,
                            "Maintenance completed with nothing to remove"
                        );
                    }
                }
                () = self.shutdown.wait() => {
                    info!("Chat maintenance worker shutting down");
                    break;
                }
            }
        }
    }

    /// Run a single maintenance cycle.
    pub async fn run_once(&self) -> MaintenanceStats {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let max_age = state.timing().task_max_age();
        let tasks_purged = state.tasks_mut().sweep(now, max_age);
        let remote_marks_expired = state.expire_remote_streaming(now, max_age);
        let cleanup = state.cleanup_stale_optimistic(now);
        MaintenanceStats {
            tasks_purged,
            optimistic_dropped: cleanup.unwrap_or(0),
            remote_marks_expired,
            throttled: cleanup.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::chat::core::config::ChatConfig;
    use crate::chat::core::ids::{ConversationId, MessageId};
    use crate::chat::core::message::Message;

    fn shared_state() -> Arc<RwLock<ChatState>> {
        Arc::new(RwLock::new(ChatState::new(&ChatConfig::default()).unwrap()))
    }

    #[test]
    fn default_config_follows_timing() {
        let config = MaintenanceConfig::default();
        assert_eq!(config.interval, Duration::from_secs(60));
        assert!(config.enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn run_once_purges_old_tasks_and_stale_messages() {
        let clock = Clock::new();
        let state = shared_state();
        let conversation = ConversationId::durable("c-1");
        {
            let mut guard = state.write().await;
            let now = clock.now();
            guard.add_optimistic_message(Message::optimistic_user(conversation.clone(), "hi", now));
            guard
                .tasks_mut()
                .promote(conversation.clone(), MessageId::durable("m-1"), "hi", None, now);
        }

        let worker =
            MaintenanceWorker::new(Arc::clone(&state), clock, MaintenanceConfig::default());
        tokio::time::advance(Duration::from_secs(31)).await;
        let stats = worker.run_once().await;
        assert_eq!(stats.optimistic_dropped, 1);
        assert_eq!(stats.tasks_purged, 0);

        tokio::time::advance(Duration::from_secs(300)).await;
        let stats = worker.run_once().await;
        assert_eq!(stats.tasks_purged, 1);
        assert!(state.read().await.tasks().tasks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_loop() {
        let shutdown = Arc::new(Shutdown::new());
        let config = MaintenanceConfig {
            interval: Duration::from_secs(1),
            enabled: true,
        };
        let handle = MaintenanceWorker::new(shared_state(), Clock::new(), config)
            .with_shutdown(Arc::clone(&shutdown))
            .spawn();
        tokio::time::sleep(Duration::from_secs(3)).await;
        shutdown.trigger();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run_once_expires_marks_from_vanished_tabs() {
        let clock = Clock::new();
        let state = shared_state();
        let conversation = ConversationId::durable("c-9");
        state
            .write()
            .await
            .set_remote_streaming(conversation.clone(), true, clock.now());

        let worker =
            MaintenanceWorker::new(Arc::clone(&state), clock, MaintenanceConfig::default());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(worker.run_once().await.remote_marks_expired, 0);
        assert!(state.read().await.is_streaming_elsewhere(&conversation));

        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(worker.run_once().await.remote_marks_expired, 1);
        assert!(!state.read().await.is_streaming_elsewhere(&conversation));
    }

    #[tokio::test]
    async fn disabled_worker_returns_immediately() {
        let config = MaintenanceConfig {
            interval: Duration::from_secs(1),
            enabled: false,
        };
        let handle = MaintenanceWorker::new(shared_state(), Clock::new(), config).spawn();
        handle.await.unwrap();
    }
}
