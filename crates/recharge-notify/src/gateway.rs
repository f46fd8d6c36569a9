//! Outbound SMS gateways.
//!
//! Each gateway is an HTTPS endpoint taking a JSON body under a bearer
//! token. The token is passed through as configured. [`Failover`] tries
//! the primary gateway and falls back to the secondary on error.

use std::future::Future;
use std::time::Duration;

use recharge_types::Msisdn;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{NotifyError, Result};

/// An outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsMessage {
    pub to: Msisdn,
    pub body: String,
    pub correlation_id: String,
}

/// Which gateway accepted a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub gateway: String,
}

/// Sends SMS messages.
pub trait SmsGateway: Send + Sync {
    fn name(&self) -> &str;

    fn send(&self, message: &SmsMessage) -> impl Future<Output = Result<Delivery>> + Send;
}

/// Connection settings for one HTTPS gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Label used in logs and delivery records.
    pub name: String,
    /// Full URL of the send endpoint.
    pub endpoint: String,
    /// Bearer token, sent verbatim.
    #[serde(default)]
    pub bearer_token: String,
    /// Sender id shown on the handset.
    #[serde(default)]
    pub sender_id: String,
}

/// JSON body posted to a gateway.
#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    from: &'a str,
    message: &'a str,
    reference: &'a str,
}

/// A bearer-token JSON gateway.
pub struct HttpGateway {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl HttpGateway {
    /// Build a gateway whose every request is bounded by `timeout`.
    pub fn new(config: GatewayConfig, timeout: Duration) -> Result<Self> {
        if config.endpoint.is_empty() {
            return Err(NotifyError::Config(format!(
                "gateway {:?} has no endpoint",
                config.name
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Config(e.to_string()))?;
        Ok(Self { config, client })
    }
}

impl SmsGateway for HttpGateway {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn send(&self, message: &SmsMessage) -> Result<Delivery> {
        let body = SendRequest {
            to: message.to.as_str(),
            from: &self.config.sender_id,
            message: &message.body,
            reference: &message.correlation_id,
        };
        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.bearer_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Gateway {
                gateway: self.config.name.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Gateway {
                gateway: self.config.name.clone(),
                reason: format!("HTTP {status}"),
            });
        }
        Ok(Delivery {
            gateway: self.config.name.clone(),
        })
    }
}

/// Primary gateway with an optional fallback.
pub struct Failover<G> {
    primary: G,
    fallback: Option<G>,
}

impl<G: SmsGateway> Failover<G> {
    pub fn new(primary: G, fallback: Option<G>) -> Self {
        Self { primary, fallback }
    }
}

impl<G: SmsGateway> SmsGateway for Failover<G> {
    fn name(&self) -> &str {
        self.primary.name()
    }

    async fn send(&self, message: &SmsMessage) -> Result<Delivery> {
        match self.primary.send(message).await {
            Ok(delivery) => Ok(delivery),
            Err(primary_err) => {
                let Some(fallback) = &self.fallback else {
                    return Err(primary_err);
                };
                warn!(
                    primary = self.primary.name(),
                    fallback = fallback.name(),
                    error = %primary_err,
                    "primary SMS gateway failed, using fallback"
                );
                fallback.send(message).await
            }
        }
    }
}
