//! Notification delivery transports.
//!
//! The workflow treats delivery as best-effort: a transport failure is
//! reported to the caller, logged there, and never propagated into the
//! decision path. Three transports cover the deployment spectrum: an HTTP
//! webhook for real installations, a noop for installations that only keep
//! the persisted notification rows, and an in-memory recorder for tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use stagegate_core::config::NotificationsConfig;
use stagegate_core::domain::notification::Notification;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport misconfigured: {0}")]
    Misconfigured(String),
    #[error("delivery request failed: {0}")]
    Request(String),
    #[error("webhook endpoint returned status {status}")]
    Status { status: u16 },
}

/// Delivery seam between the fan-out service and the outside world.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), TransportError>;

    fn name(&self) -> &'static str;
}

/// Builds the transport the configuration asks for: webhook when
/// notifications are enabled, noop otherwise.
pub fn transport_from_config(
    config: &NotificationsConfig,
) -> Result<Arc<dyn NotificationTransport>, TransportError> {
    if config.enabled {
        Ok(Arc::new(WebhookTransport::from_config(config)?))
    } else {
        Ok(Arc::new(NoopTransport))
    }
}

/// POSTs each notification as JSON to a configured endpoint, optionally with
/// a bearer token.
pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
    auth_token: Option<SecretString>,
}

impl WebhookTransport {
    pub fn from_config(config: &NotificationsConfig) -> Result<Self, TransportError> {
        let url = config
            .webhook_url
            .clone()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                TransportError::Misconfigured(
                    "notifications.webhook_url is not set".to_string(),
                )
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| TransportError::Request(error.to_string()))?;

        Ok(Self { client, url, auth_token: config.auth_token.clone() })
    }
}

#[async_trait]
impl NotificationTransport for WebhookTransport {
    async fn deliver(&self, notification: &Notification) -> Result<(), TransportError> {
        let mut request = self.client.post(&self.url).json(notification);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|error| TransportError::Request(error.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Status { status: response.status().as_u16() });
        }

        debug!(
            event_name = "notification.delivered",
            notification_id = %notification.id.as_str(),
            recipient = %notification.recipient,
            "webhook delivery succeeded"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Accepts everything and delivers nothing. Used when notifications are
/// disabled; the persisted rows remain the only record.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTransport;

#[async_trait]
impl NotificationTransport for NoopTransport {
    async fn deliver(&self, notification: &Notification) -> Result<(), TransportError> {
        debug!(
            event_name = "notification.skipped",
            notification_id = %notification.id.as_str(),
            recipient = %notification.recipient,
            "notification transport disabled"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

#[derive(Default)]
struct InMemoryState {
    delivered: Vec<Notification>,
    failure: Option<String>,
}

/// Test transport: records deliveries and, when primed, fails every attempt
/// so callers can exercise the swallow-and-log path.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent `deliver` fails with `message` until cleared.
    pub async fn fail_with(&self, message: impl Into<String>) {
        self.state.lock().await.failure = Some(message.into());
    }

    pub async fn clear_failure(&self) {
        self.state.lock().await.failure = None;
    }

    pub async fn delivered(&self) -> Vec<Notification> {
        self.state.lock().await.delivered.clone()
    }
}

#[async_trait]
impl NotificationTransport for InMemoryTransport {
    async fn deliver(&self, notification: &Notification) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if let Some(message) = &state.failure {
            return Err(TransportError::Request(message.clone()));
        }
        state.delivered.push(notification.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use stagegate_core::config::NotificationsConfig;
    use stagegate_core::domain::notification::{Notification, NotificationKind};
    use stagegate_core::domain::user::UserId;

    use super::{
        transport_from_config, InMemoryTransport, NotificationTransport, TransportError,
        WebhookTransport,
    };

    fn notification(recipient: &str) -> Notification {
        Notification::new(
            UserId(recipient.to_string()),
            UserId("client-cy".to_string()),
            NotificationKind::DecisionMade,
            None,
            None,
            "Your approval request was approved".to_string(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn in_memory_transport_records_deliveries_in_order() {
        let transport = InMemoryTransport::new();

        transport.deliver(&notification("pm-ana")).await.expect("first delivery");
        transport.deliver(&notification("dev-bo")).await.expect("second delivery");

        let delivered = transport.delivered().await;
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].recipient, UserId("pm-ana".to_string()));
        assert_eq!(delivered[1].recipient, UserId("dev-bo".to_string()));
    }

    #[tokio::test]
    async fn primed_failure_rejects_until_cleared() {
        let transport = InMemoryTransport::new();
        transport.fail_with("endpoint unreachable").await;

        let error = transport.deliver(&notification("pm-ana")).await.expect_err("must fail");
        assert!(matches!(error, TransportError::Request(_)));
        assert!(transport.delivered().await.is_empty());

        transport.clear_failure().await;
        transport.deliver(&notification("pm-ana")).await.expect("delivery after clear");
        assert_eq!(transport.delivered().await.len(), 1);
    }

    #[test]
    fn webhook_requires_a_url() {
        let config = NotificationsConfig {
            enabled: true,
            webhook_url: None,
            auth_token: None,
            timeout_secs: 10,
        };

        let error = WebhookTransport::from_config(&config).err().expect("missing url");
        assert!(matches!(error, TransportError::Misconfigured(_)));
    }

    #[test]
    fn factory_returns_noop_when_disabled() {
        let config = NotificationsConfig {
            enabled: false,
            webhook_url: None,
            auth_token: None,
            timeout_secs: 10,
        };

        let transport = transport_from_config(&config).expect("factory");
        assert_eq!(transport.name(), "noop");
    }

    #[test]
    fn factory_returns_webhook_when_enabled() {
        let config = NotificationsConfig {
            enabled: true,
            webhook_url: Some("https://hooks.example.com/stagegate".to_string()),
            auth_token: None,
            timeout_secs: 10,
        };

        let transport = transport_from_config(&config).expect("factory");
        assert_eq!(transport.name(), "webhook");
    }
}
