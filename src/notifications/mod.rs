use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, instrument};

/// What a delivered message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OtpCode,
    MagicLink,
    PasswordReset,
}

/// A message addressed to one user. `secret` is the code, link or token the
/// user has to present back; it is never logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    pub kind: NotificationKind,
    pub subject: String,
    pub secret: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(recipient: impl Into<String>, kind: NotificationKind, secret: String) -> Self {
        let subject = match kind {
            NotificationKind::OtpCode => "Your sign-in code",
            NotificationKind::MagicLink => "Your sign-in link",
            NotificationKind::PasswordReset => "Reset your password",
        };
        Self {
            recipient: recipient.into(),
            kind,
            subject: subject.to_string(),
            secret,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Delivers one-time codes, links and reset tokens.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), NotificationError>;
}

/// Writes a redacted line per message to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    #[instrument(skip_all, fields(kind = ?notification.kind))]
    async fn send(&self, notification: Notification) -> Result<(), NotificationError> {
        info!(
            recipient = %redact_email(&notification.recipient),
            subject = %notification.subject,
            "Notification dispatched"
        );
        Ok(())
    }
}

/// Keeps every message in memory so callers can read the secret back.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<RwLock<Vec<Notification>>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }

    /// Most recent message of `kind` sent to `recipient`.
    pub async fn last_for(&self, recipient: &str, kind: NotificationKind) -> Option<Notification> {
        self.sent
            .read()
            .await
            .iter()
            .rev()
            .find(|n| n.kind == kind && n.recipient.eq_ignore_ascii_case(recipient))
            .cloned()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotificationError> {
        self.sent.write().await.push(notification);
        Ok(())
    }
}

/// `jane.doe@example.com` becomes `j***@example.com`.
pub fn redact_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{}***@{}", first, domain)
        }
        None => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_notifier_returns_latest_per_kind() {
        let notifier = InMemoryNotifier::new();
        notifier
            .send(Notification::new("a@example.com", NotificationKind::OtpCode, "111111".into()))
            .await
            .unwrap();
        notifier
            .send(Notification::new("a@example.com", NotificationKind::OtpCode, "222222".into()))
            .await
            .unwrap();
        notifier
            .send(Notification::new("a@example.com", NotificationKind::MagicLink, "tok".into()))
            .await
            .unwrap();

        let latest = notifier
            .last_for("A@example.com", NotificationKind::OtpCode)
            .await
            .unwrap();
        assert_eq!(latest.secret, "222222");
        assert_eq!(notifier.sent().await.len(), 3);
        assert!(notifier
            .last_for("b@example.com", NotificationKind::OtpCode)
            .await
            .is_none());
    }

    #[test]
    fn emails_are_redacted() {
        assert_eq!(redact_email("jane.doe@example.com"), "j***@example.com");
        assert_eq!(redact_email("not-an-email"), "***");
    }

    #[tokio::test]
    async fn log_notifier_accepts_messages() {
        let result = LogNotifier
            .send(Notification::new("x@example.com", NotificationKind::PasswordReset, "t".into()))
            .await;
        assert!(result.is_ok());
    }
}
