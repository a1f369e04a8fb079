//! Outbound webhook delivery: builds the signed/authenticated request,
//! POSTs it, and classifies the response into the three-way
//! success/retriable/permanent-failure outcome the Webhook worker acts on.
//! Subscription storage and management are external collaborators
//! ("subscriber-facing... CLI front-ends"); only the lookup contract lives
//! here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_RESPONSE_BODY_CHARS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethod {
    None,
    Bearer { token: String },
    Basic { username: String, password: String },
    Custom { header: String, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub endpoint: String,
    pub active: bool,
    pub auth: AuthMethod,
}

#[derive(Debug, Error)]
pub enum SubscriptionLookupError {
    #[error("lookup backend error: {0}")]
    Backend(String),
}

/// Resolves a `subscriptionId` to its delivery endpoint + auth. Backed by
/// whatever subscriber-management system owns the data (out of scope here).
#[async_trait]
pub trait SubscriptionRegistry: Send + Sync {
    async fn find(&self, subscription_id: &str) -> Result<Option<Subscription>, SubscriptionLookupError>;
}

/// The subscription id stamped on outbound `WebhookMessage`s by the
/// Analysis worker when no multi-subscriber registry is configured.
pub const DEFAULT_SUBSCRIPTION_ID: &str = "default";

/// A single-subscriber registry backed by `Config::webhook_endpoint`, for
/// deployments that have not wired up a separate subscriber-management
/// system (dashboards and CLI front-ends are out of scope, but the pipeline
/// still needs one endpoint to deliver to by default).
pub struct SingleEndpointRegistry {
    subscription: Option<Subscription>,
}

impl SingleEndpointRegistry {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            subscription: endpoint.map(|endpoint| Subscription {
                id: DEFAULT_SUBSCRIPTION_ID.to_string(),
                endpoint,
                active: true,
                auth: AuthMethod::None,
            }),
        }
    }
}

#[async_trait]
impl SubscriptionRegistry for SingleEndpointRegistry {
    async fn find(&self, subscription_id: &str) -> Result<Option<Subscription>, SubscriptionLookupError> {
        Ok(self
            .subscription
            .as_ref()
            .filter(|s| s.id == subscription_id)
            .cloned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    Retriable,
    PermanentFailure,
}

pub fn classify_status(status: u16) -> DeliveryOutcome {
    if (200..300).contains(&status) {
        DeliveryOutcome::Success
    } else if status >= 500 || status == 429 {
        DeliveryOutcome::Retriable
    } else {
        DeliveryOutcome::PermanentFailure
    }
}

pub fn truncate_response_body(body: &str) -> String {
    if body.chars().count() <= MAX_RESPONSE_BODY_CHARS {
        body.to_string()
    } else {
        body.chars().take(MAX_RESPONSE_BODY_CHARS).collect()
    }
}

#[derive(Debug)]
pub struct DeliveryAttempt {
    pub outcome: DeliveryOutcome,
    pub status_code: Option<i64>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub delivery_time_ms: i64,
}

pub struct WebhookClient {
    client: reqwest::Client,
}

impl Default for WebhookClient {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// POST `notification` to the subscription's endpoint with the
    /// appropriate auth headers, classify the response, and return an
    /// attempt record ready to persist as a `WebhookDelivery` row. Never
    /// returns an `Err`: transport failures are folded into `Retriable`.
    pub async fn deliver(
        &self,
        subscription: &Subscription,
        notification: &serde_json::Value,
        attempt_number: u32,
    ) -> DeliveryAttempt {
        let start = std::time::Instant::now();

        let mut request = self
            .client
            .post(&subscription.endpoint)
            .header("Content-Type", "application/json")
            .header("User-Agent", "gazette-pipeline-webhook/1.0")
            .header("X-Webhook-Attempt", attempt_number.to_string())
            .header("X-Webhook-Subscription-Id", &subscription.id)
            .json(notification);

        request = match &subscription.auth {
            AuthMethod::None => request,
            AuthMethod::Bearer { token } => request.bearer_auth(token),
            AuthMethod::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            AuthMethod::Custom { header, value } => request.header(header.as_str(), value.as_str()),
        };

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let outcome = classify_status(status);
                let body = response.text().await.unwrap_or_default();
                DeliveryAttempt {
                    outcome,
                    status_code: Some(status as i64),
                    response_body: Some(truncate_response_body(&body)),
                    error_message: None,
                    delivery_time_ms: start.elapsed().as_millis() as i64,
                }
            }
            Err(err) => DeliveryAttempt {
                outcome: DeliveryOutcome::Retriable,
                status_code: None,
                response_body: None,
                error_message: Some(err.to_string()),
                delivery_time_ms: start.elapsed().as_millis() as i64,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_2xx_as_success() {
        assert_eq!(classify_status(204), DeliveryOutcome::Success);
    }

    #[test]
    fn classifies_5xx_and_429_as_retriable() {
        assert_eq!(classify_status(503), DeliveryOutcome::Retriable);
        assert_eq!(classify_status(429), DeliveryOutcome::Retriable);
    }

    #[test]
    fn classifies_other_non_2xx_as_permanent() {
        assert_eq!(classify_status(404), DeliveryOutcome::PermanentFailure);
    }

    #[test]
    fn truncates_long_response_bodies() {
        let body = "x".repeat(2000);
        assert_eq!(truncate_response_body(&body).len(), MAX_RESPONSE_BODY_CHARS);
    }

    #[test]
    fn short_response_bodies_are_untouched() {
        assert_eq!(truncate_response_body("ok"), "ok");
    }

    #[tokio::test]
    async fn single_endpoint_registry_resolves_the_default_id_only() {
        let registry = SingleEndpointRegistry::new(Some("https://hooks.example/gazette".to_string()));
        assert!(registry.find(DEFAULT_SUBSCRIPTION_ID).await.unwrap().is_some());
        assert!(registry.find("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn single_endpoint_registry_is_empty_without_a_configured_endpoint() {
        let registry = SingleEndpointRegistry::new(None);
        assert!(registry.find(DEFAULT_SUBSCRIPTION_ID).await.unwrap().is_none());
    }
}
