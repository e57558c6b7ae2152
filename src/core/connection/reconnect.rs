use crate::core::connection::manager::{ConnectionManager, LoopTicket};
use crate::domain::config::GlobalConfig;
use crate::domain::connection::ConnectionConfig;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fixed-delay, bounded retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Pause before every attempt. Constant, not exponential.
    pub delay: Duration,
    /// Consecutive failures after which the loop gives up
    pub max_retry: u32,
}

impl ReconnectPolicy {
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(2000);
    pub const DEFAULT_MAX_RETRY: u32 = 10;

    pub fn new(delay: Duration, max_retry: u32) -> Self {
        Self { delay, max_retry }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DELAY, Self::DEFAULT_MAX_RETRY)
    }
}

impl From<&GlobalConfig> for ReconnectPolicy {
    fn from(global: &GlobalConfig) -> Self {
        Self::new(global.reconnect_delay(), global.max_retry)
    }
}

/// Body of the reconnect task for one key.
///
/// Cancellation is observed before the backoff, during it, and right after
/// it. A cancelled loop publishes nothing and leaves the registry alone.
///
/// Boxed because the loop and the stream task it ends up spawning refer to
/// each other.
pub(crate) fn run(
    manager: ConnectionManager,
    config: ConnectionConfig,
    ticket: LoopTicket,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(run_loop(manager, config, ticket))
}

async fn run_loop(manager: ConnectionManager, config: ConnectionConfig, ticket: LoopTicket) {
    let key = config.key.clone();
    let policy = manager.policy();
    let cancel = ticket.cancel.clone();

    loop {
        if cancel.is_cancelled() {
            debug!("Reconnect loop for '{}' cancelled", key);
            return;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Reconnect loop for '{}' cancelled during backoff", key);
                return;
            }
            _ = tokio::time::sleep(policy.delay) => {}
        }

        if cancel.is_cancelled() {
            debug!("Reconnect loop for '{}' cancelled after backoff", key);
            return;
        }

        let attempts = manager.retry_count(&key).await.unwrap_or(0);
        if attempts >= policy.max_retry {
            warn!("Giving up on '{}' after {} reconnect attempts", key, attempts);
            manager.finish_exhausted(&ticket).await;
            return;
        }

        debug!("Reconnect attempt {} for '{}'", attempts + 1, key);
        match manager.retry_open(&config, &ticket).await {
            Ok(Some(opened)) => {
                if manager.register(config.clone(), opened, Some(&ticket)).await {
                    info!("Reconnected '{}' on {}", key, config.path);
                }
                return;
            }
            Ok(None) => {
                debug!("Reconnect loop for '{}' superseded", key);
                return;
            }
            Err(e) => {
                debug!("Reconnect attempt for '{}' failed: {}", key, e);
                if !manager.record_failed_attempt(&ticket).await {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay, Duration::from_secs(2));
        assert_eq!(policy.max_retry, 10);
    }

    #[test]
    fn test_policy_from_global_config() {
        let global = GlobalConfig { reconnect_delay_ms: 1500, max_retry: 4, ..GlobalConfig::default() };
        let policy = ReconnectPolicy::from(&global);
        assert_eq!(policy.delay, Duration::from_millis(1500));
        assert_eq!(policy.max_retry, 4);
    }
}
