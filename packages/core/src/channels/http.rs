//! HTTP gateway adapters for the push and email providers.
//!
//! Both adapters speak plain JSON to an internal gateway service that wraps
//! the vendor SDKs (FCM/APNs, transactional mail). Transient failures get
//! one retry with a small random jitter before the error is reported back
//! to the dispatcher.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::Serialize;

use crate::channels::{EmailProvider, PushBatchReport, PushPayload, PushProvider};
use crate::error::ChannelError;

/// Jitter window for the single retry, in milliseconds.
const RETRY_JITTER_MS: std::ops::Range<u64> = 100..400;

fn retry_delay() -> Duration {
    let ms = rand::thread_rng().gen_range(RETRY_JITTER_MS);
    Duration::from_millis(ms)
}

/// Push gateway client. POSTs device batches to `{base_url}/push/batch`.
#[derive(Clone)]
pub struct HttpPushGateway {
    base_url: String,
    api_key: Option<String>,
    http: Client,
}

#[derive(Serialize)]
struct PushBatchRequest<'a> {
    tokens: &'a [String],
    #[serde(flatten)]
    payload: &'a PushPayload,
}

#[derive(Serialize)]
struct PushSingleRequest<'a> {
    token: &'a str,
    #[serde(flatten)]
    payload: &'a PushPayload,
}

#[derive(serde::Deserialize)]
struct PushSingleResponse {
    delivered: bool,
}

impl HttpPushGateway {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            base_url,
            api_key,
            http: Client::new(),
        }
    }

    async fn post_json<B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<reqwest::Response, ChannelError> {
        let mut request = self.http.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ChannelError::network(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if status.as_u16() == 429 {
            Err(ChannelError::RateLimitExceeded)
        } else if status.is_server_error() {
            Err(ChannelError::ServiceUnavailable)
        } else {
            Err(ChannelError::rejected(format!(
                "push gateway returned HTTP {}",
                status
            )))
        }
    }

    /// POST with one retry on transient failure (network error or 5xx).
    async fn post_with_retry<B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<reqwest::Response, ChannelError> {
        match self.post_json(url, body).await {
            Ok(response) => Ok(response),
            Err(ChannelError::Network { .. }) | Err(ChannelError::ServiceUnavailable) => {
                tokio::time::sleep(retry_delay()).await;
                self.post_json(url, body).await
            }
            Err(other) => Err(other),
        }
    }
}

#[async_trait]
impl PushProvider for HttpPushGateway {
    async fn send_to_device(
        &self,
        token: &str,
        payload: &PushPayload,
    ) -> Result<bool, ChannelError> {
        let url = format!("{}/push", self.base_url);
        let response = self
            .post_with_retry(&url, &PushSingleRequest { token, payload })
            .await?;

        let parsed: PushSingleResponse = response
            .json()
            .await
            .map_err(|err| ChannelError::rejected(format!("bad gateway response: {}", err)))?;

        Ok(parsed.delivered)
    }

    async fn send_to_many(
        &self,
        tokens: &[String],
        payload: &PushPayload,
    ) -> Result<PushBatchReport, ChannelError> {
        if tokens.is_empty() {
            return Ok(PushBatchReport::default());
        }

        let url = format!("{}/push/batch", self.base_url);
        let response = self
            .post_with_retry(&url, &PushBatchRequest { tokens, payload })
            .await?;

        let report: PushBatchReport = response
            .json()
            .await
            .map_err(|err| ChannelError::rejected(format!("bad gateway response: {}", err)))?;

        Ok(report)
    }

    fn provider_name(&self) -> &str {
        "http-push-gateway"
    }
}

/// Email gateway client. POSTs rendered messages to `{base_url}/send`.
#[derive(Clone)]
pub struct HttpEmailGateway {
    base_url: String,
    http: Client,
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    action_url: Option<&'a str>,
}

impl HttpEmailGateway {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            http: Client::new(),
        }
    }
}

#[async_trait]
impl EmailProvider for HttpEmailGateway {
    async fn send_notification_email(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
        action_url: Option<&str>,
    ) -> Result<(), ChannelError> {
        let url = format!("{}/send", self.base_url);
        let request = EmailRequest {
            to: recipient,
            subject,
            body,
            action_url,
        };

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|err| ChannelError::network(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() {
            Err(ChannelError::ServiceUnavailable)
        } else {
            Err(ChannelError::rejected(format!(
                "email gateway returned HTTP {}",
                status
            )))
        }
    }

    fn provider_name(&self) -> &str {
        "http-email-gateway"
    }
}
