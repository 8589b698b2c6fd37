/*!
 * # Rate Limiting Module for Authentication
 *
 * In-memory brute-force protection for credential checks. Entries are keyed by
 * (client IP, limit type); every failed attempt is recorded and the key is
 * locked once the configured number of failures is reached inside the window.
 */

use crate::errors::ServiceError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Rate limit configuration
#[derive(Clone, Debug)]
pub struct AuthRateLimitConfig {
    pub login_max_attempts: u32,
    pub login_window: Duration,
    pub login_lockout_duration: Duration,
    pub pin_max_attempts: u32,
    pub pin_window: Duration,
    pub pin_lockout_duration: Duration,
    pub password_reset_max: u32,
    pub password_reset_window: Duration,
    pub cleanup_interval: Duration,
}

impl Default for AuthRateLimitConfig {
    fn default() -> Self {
        Self {
            login_max_attempts: 10,
            login_window: Duration::from_secs(60 * 5),
            login_lockout_duration: Duration::from_secs(60 * 15),
            pin_max_attempts: 5,
            pin_window: Duration::from_secs(60 * 5),
            pin_lockout_duration: Duration::from_secs(60 * 15),
            password_reset_max: 5,
            password_reset_window: Duration::from_secs(60 * 60),
            cleanup_interval: Duration::from_secs(60 * 10),
        }
    }
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    failures: u32,
    first_failure: Instant,
    locked_until: Option<Instant>,
}

impl RateLimitEntry {
    fn new() -> Self {
        Self {
            failures: 0,
            first_failure: Instant::now(),
            locked_until: None,
        }
    }

    fn is_locked(&self) -> bool {
        self.locked_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    fn lock_expired(&self) -> bool {
        self.locked_until
            .map(|until| Instant::now() >= until)
            .unwrap_or(false)
    }

    fn lock(&mut self, duration: Duration) {
        self.locked_until = Some(Instant::now() + duration);
    }

    fn remaining_lockout(&self) -> Duration {
        self.locked_until
            .map(|until| until.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    fn window_elapsed(&self, window: Duration) -> bool {
        Instant::now().duration_since(self.first_failure) > window
    }
}

/// Rate limit type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitType {
    Login,
    Pin,
    PasswordReset,
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    max_attempts: u32,
    window: Duration,
    lockout: Duration,
}

/// Auth rate limiter for preventing brute force attacks
#[derive(Clone)]
pub struct AuthRateLimiter {
    config: AuthRateLimitConfig,
    limits: Arc<Mutex<HashMap<(String, RateLimitType), RateLimitEntry>>>,
}

impl AuthRateLimiter {
    pub fn new(config: AuthRateLimitConfig) -> Self {
        Self {
            config,
            limits: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn limits_for(&self, limit_type: RateLimitType) -> Limits {
        match limit_type {
            RateLimitType::Login => Limits {
                max_attempts: self.config.login_max_attempts,
                window: self.config.login_window,
                lockout: self.config.login_lockout_duration,
            },
            RateLimitType::Pin => Limits {
                max_attempts: self.config.pin_max_attempts,
                window: self.config.pin_window,
                lockout: self.config.pin_lockout_duration,
            },
            RateLimitType::PasswordReset => Limits {
                max_attempts: self.config.password_reset_max,
                window: self.config.password_reset_window,
                lockout: self.config.password_reset_window,
            },
        }
    }

    /// Fails while the key is locked out. Expired locks and elapsed windows
    /// start the key over.
    pub async fn check(&self, key: &str, limit_type: RateLimitType) -> Result<(), RateLimitError> {
        let limits = self.limits_for(limit_type);
        let mut entries = self.limits.lock().await;
        let entry_key = (key.to_string(), limit_type);

        let Some(entry) = entries.get(&entry_key) else {
            return Ok(());
        };

        if entry.is_locked() {
            return Err(RateLimitError::Locked {
                limit_type,
                retry_after: entry.remaining_lockout().as_secs().max(1),
            });
        }

        if entry.lock_expired() || entry.window_elapsed(limits.window) {
            entries.remove(&entry_key);
        }

        Ok(())
    }

    /// Records a failed attempt. Returns the lockout once the failure budget of
    /// the window is spent.
    pub async fn record_failure(
        &self,
        key: &str,
        limit_type: RateLimitType,
    ) -> Result<(), RateLimitError> {
        let limits = self.limits_for(limit_type);
        let mut entries = self.limits.lock().await;
        let entry = entries
            .entry((key.to_string(), limit_type))
            .or_insert_with(RateLimitEntry::new);

        // Attempts already in flight when the lock landed neither count nor
        // extend it.
        if entry.is_locked() {
            return Err(RateLimitError::Locked {
                limit_type,
                retry_after: entry.remaining_lockout().as_secs().max(1),
            });
        }

        if entry.lock_expired() || entry.window_elapsed(limits.window) {
            *entry = RateLimitEntry::new();
        }

        entry.failures += 1;
        debug!(key, ?limit_type, failures = entry.failures, "Recorded failed attempt");

        if entry.failures >= limits.max_attempts {
            entry.lock(limits.lockout);
            warn!(key, ?limit_type, lockout_secs = limits.lockout.as_secs(), "Key locked out");
            return Err(RateLimitError::Locked {
                limit_type,
                retry_after: limits.lockout.as_secs().max(1),
            });
        }

        Ok(())
    }

    /// Record a successful attempt (resets the counter)
    pub async fn record_success(&self, key: &str, limit_type: RateLimitType) {
        let mut entries = self.limits.lock().await;
        entries.remove(&(key.to_string(), limit_type));
    }

    /// Number of failures currently counted for a key.
    pub async fn failures(&self, key: &str, limit_type: RateLimitType) -> u32 {
        let entries = self.limits.lock().await;
        entries
            .get(&(key.to_string(), limit_type))
            .map(|e| e.failures)
            .unwrap_or(0)
    }

    /// Drops entries whose window and lockout are both over.
    pub async fn cleanup(&self) {
        let mut entries = self.limits.lock().await;
        let before = entries.len();
        entries.retain(|&(_, limit_type), entry| {
            let limits = self.limits_for(limit_type);
            entry.is_locked() || !entry.window_elapsed(limits.window)
        });
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Pruned stale rate limit entries");
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.config.cleanup_interval
    }
}

impl Default for AuthRateLimiter {
    fn default() -> Self {
        Self::new(AuthRateLimitConfig::default())
    }
}

/// Rate limit error
#[derive(Debug, thiserror::Error, Serialize)]
pub enum RateLimitError {
    #[error("Too many failed attempts. Please try again in {retry_after} seconds.")]
    Locked {
        limit_type: RateLimitType,
        retry_after: u64,
    },
}

impl RateLimitError {
    pub fn retry_after(&self) -> u64 {
        match self {
            Self::Locked { retry_after, .. } => *retry_after,
        }
    }
}

impl From<RateLimitError> for ServiceError {
    fn from(err: RateLimitError) -> Self {
        ServiceError::RateLimited {
            retry_after: err.retry_after(),
        }
    }
}

/// Background task to clean up old rate limit entries
pub async fn cleanup_rate_limits(rate_limiter: Arc<AuthRateLimiter>) {
    let interval = rate_limiter.cleanup_interval();
    loop {
        sleep(interval).await;
        rate_limiter.cleanup().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn limiter(max: u32) -> AuthRateLimiter {
        AuthRateLimiter::new(AuthRateLimitConfig {
            pin_max_attempts: max,
            pin_window: Duration::from_secs(60),
            pin_lockout_duration: Duration::from_secs(120),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn locks_after_max_failures() {
        let limiter = limiter(3);
        for _ in 0..2 {
            limiter.check("10.0.0.1", RateLimitType::Pin).await.unwrap();
            limiter
                .record_failure("10.0.0.1", RateLimitType::Pin)
                .await
                .unwrap();
        }
        limiter.check("10.0.0.1", RateLimitType::Pin).await.unwrap();
        let err = limiter
            .record_failure("10.0.0.1", RateLimitType::Pin)
            .await
            .unwrap_err();
        assert_eq!(err.retry_after(), 120);

        assert_matches!(
            limiter.check("10.0.0.1", RateLimitType::Pin).await,
            Err(RateLimitError::Locked { limit_type: RateLimitType::Pin, .. })
        );
    }

    #[tokio::test]
    async fn keys_and_types_are_isolated() {
        let limiter = limiter(1);
        assert!(limiter
            .record_failure("10.0.0.1", RateLimitType::Pin)
            .await
            .is_err());

        assert!(limiter.check("10.0.0.2", RateLimitType::Pin).await.is_ok());
        assert!(limiter.check("10.0.0.1", RateLimitType::Login).await.is_ok());
        assert!(limiter.check("10.0.0.1", RateLimitType::Pin).await.is_err());
    }

    #[tokio::test]
    async fn success_resets_counter() {
        let limiter = limiter(3);
        limiter
            .record_failure("ip", RateLimitType::Pin)
            .await
            .unwrap();
        limiter
            .record_failure("ip", RateLimitType::Pin)
            .await
            .unwrap();
        limiter.record_success("ip", RateLimitType::Pin).await;
        assert_eq!(limiter.failures("ip", RateLimitType::Pin).await, 0);
    }

    #[tokio::test]
    async fn lock_expires() {
        let limiter = AuthRateLimiter::new(AuthRateLimitConfig {
            pin_max_attempts: 1,
            pin_window: Duration::from_secs(60),
            pin_lockout_duration: Duration::from_millis(50),
            ..Default::default()
        });
        assert!(limiter
            .record_failure("ip", RateLimitType::Pin)
            .await
            .is_err());
        assert!(limiter.check("ip", RateLimitType::Pin).await.is_err());

        sleep(Duration::from_millis(80)).await;

        assert!(limiter.check("ip", RateLimitType::Pin).await.is_ok());
        assert_eq!(limiter.failures("ip", RateLimitType::Pin).await, 0);
    }

    #[tokio::test]
    async fn failures_while_locked_do_not_extend_the_lock() {
        let limiter = AuthRateLimiter::new(AuthRateLimitConfig {
            pin_max_attempts: 2,
            pin_window: Duration::from_secs(60),
            pin_lockout_duration: Duration::from_millis(100),
            ..Default::default()
        });
        limiter
            .record_failure("ip", RateLimitType::Pin)
            .await
            .unwrap();
        assert!(limiter
            .record_failure("ip", RateLimitType::Pin)
            .await
            .is_err());

        sleep(Duration::from_millis(60)).await;
        assert_matches!(
            limiter.record_failure("ip", RateLimitType::Pin).await,
            Err(RateLimitError::Locked { .. })
        );
        assert_eq!(limiter.failures("ip", RateLimitType::Pin).await, 2);

        sleep(Duration::from_millis(70)).await;
        assert!(limiter.check("ip", RateLimitType::Pin).await.is_ok());
    }

    #[test]
    fn converts_to_service_error() {
        let err: ServiceError = RateLimitError::Locked {
            limit_type: RateLimitType::Pin,
            retry_after: 30,
        }
        .into();
        assert_matches!(err, ServiceError::RateLimited { retry_after: 30 });
    }
}
