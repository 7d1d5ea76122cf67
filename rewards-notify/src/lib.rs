//! Best-effort webhook notifications on reconstruction failure.
//!
//! A single generic webhook POST in place of a vendor SDK: the configured
//! target can be given either as a full webhook URL or as an explicit
//! id/token pair, and a failed delivery is logged, never propagated to the
//! caller that triggered it.

pub mod error;

use serde::Serialize;

pub use error::{NotifyError, Result};

const WEBHOOK_URL_PREFIX: &str = "https://discord.com/api/webhooks/";

/// Mirrors the two ways a webhook target can be supplied: a full URL, or an
/// id/token pair already split out.
#[derive(Clone, Debug, Default)]
pub struct NotifierConfig {
    pub webhook_url: Option<String>,
    pub webhook_id: Option<String>,
    pub webhook_token: Option<String>,
}

/// Resolves a [`NotifierConfig`] into the `id`/`token` pair a webhook POST
/// needs, accepting either a full URL or explicit fields and rejecting a
/// config that supplies neither (or a malformed URL).
fn resolve(config: &NotifierConfig) -> Result<(String, String)> {
    if let Some(url) = &config.webhook_url {
        let rest = url.strip_prefix(WEBHOOK_URL_PREFIX).ok_or_else(|| {
            NotifyError::InvalidConfiguration(format!("not a recognized webhook url: {url}"))
        })?;
        let mut parts = rest.trim_end_matches('/').splitn(2, '/');
        let id = parts.next().filter(|s| !s.is_empty());
        let token = parts.next().filter(|s| !s.is_empty());
        return match (id, token) {
            (Some(id), Some(token)) => Ok((id.to_string(), token.to_string())),
            _ => Err(NotifyError::InvalidConfiguration(format!(
                "webhook url is missing id or token: {url}"
            ))),
        };
    }

    match (&config.webhook_id, &config.webhook_token) {
        (Some(id), Some(token)) if !id.is_empty() && !token.is_empty() => {
            Ok((id.clone(), token.clone()))
        }
        _ => Err(NotifyError::InvalidConfiguration(
            "neither webhook_url nor webhook_id/webhook_token were provided".to_string(),
        )),
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
}

/// A validated webhook target, ready to send messages to.
pub struct Notifier {
    client: reqwest::Client,
    endpoint: String,
}

impl Notifier {
    /// Validates `config` and resolves it to a concrete webhook endpoint.
    pub fn new(config: &NotifierConfig) -> Result<Self> {
        let (id, token) = resolve(config)?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: format!("{WEBHOOK_URL_PREFIX}{id}/{token}"),
        })
    }

    /// Sends `message` to the webhook, returning the delivery error (if any)
    /// to the caller. Most callers want [`notify`] instead.
    pub async fn send(&self, message: &str) -> Result<()> {
        self.client
            .post(&self.endpoint)
            .json(&WebhookPayload { content: message })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Best-effort delivery: a missing notifier is a silent no-op, and a
/// delivery failure is logged rather than returned — nothing upstream of a
/// notification should fail because a webhook is down.
pub async fn notify(notifier: Option<&Notifier>, message: &str) {
    let Some(notifier) = notifier else {
        return;
    };
    if let Err(err) = notifier.send(message).await {
        tracing::warn!(error = %err, "failed to deliver webhook notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_id_and_token_from_full_url() {
        let config = NotifierConfig {
            webhook_url: Some(
                "https://discord.com/api/webhooks/123456789/abcDEF-token".to_string(),
            ),
            ..Default::default()
        };
        let (id, token) = resolve(&config).unwrap();
        assert_eq!(id, "123456789");
        assert_eq!(token, "abcDEF-token");
    }

    #[test]
    fn resolves_id_and_token_from_explicit_fields() {
        let config = NotifierConfig {
            webhook_id: Some("1".to_string()),
            webhook_token: Some("t".to_string()),
            ..Default::default()
        };
        let (id, token) = resolve(&config).unwrap();
        assert_eq!(id, "1");
        assert_eq!(token, "t");
    }

    #[test]
    fn rejects_url_missing_token() {
        let config = NotifierConfig {
            webhook_url: Some("https://discord.com/api/webhooks/123456789".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            resolve(&config),
            Err(NotifyError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_empty_configuration() {
        assert!(matches!(
            resolve(&NotifierConfig::default()),
            Err(NotifyError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn notify_is_a_silent_noop_without_a_notifier() {
        notify(None, "hello").await;
    }
}
