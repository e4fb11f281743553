//! Channel provider interfaces.
//!
//! The dispatcher talks to every external delivery mechanism through the
//! narrow traits below, so the core stays testable without a live push
//! gateway, mail service, or realtime hub. HTTP-backed implementations
//! live in [`http`]; recording test doubles live in [`mock`].

pub mod http;
pub mod mock;

use async_trait::async_trait;

use crate::error::ChannelError;

/// Payload handed to the push provider.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub action_url: Option<String>,
    pub image_url: Option<String>,
}

/// Outcome of a multi-device push send.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct PushBatchReport {
    pub success_count: u32,
    pub failure_count: u32,
    /// Tokens the provider reported as permanently invalid. The dispatcher
    /// removes these from the user's preference record.
    pub invalid_tokens: Vec<String>,
}

/// Push delivery provider (FCM / APNs behind a gateway).
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Send to a single device. Returns whether the provider accepted it.
    async fn send_to_device(
        &self,
        token: &str,
        payload: &PushPayload,
    ) -> Result<bool, ChannelError>;

    /// Send to many devices at once.
    async fn send_to_many(
        &self,
        tokens: &[String],
        payload: &PushPayload,
    ) -> Result<PushBatchReport, ChannelError>;

    fn provider_name(&self) -> &str;
}

/// Email delivery provider.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_notification_email(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
        action_url: Option<&str>,
    ) -> Result<(), ChannelError>;

    fn provider_name(&self) -> &str;
}

/// In-app/realtime transport.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Deliver a payload to a connected user. `Ok(false)` means the user is
    /// not currently reachable; that is not an error.
    async fn send_to_user(
        &self,
        user_id: &str,
        payload: &serde_json::Value,
    ) -> Result<bool, ChannelError>;

    fn transport_name(&self) -> &str;
}

/// Feature-vector similarity, provided by the external AI component.
/// Vectors are opaque arrays of numbers; the result is in [0, 1].
pub trait FeatureSimilarity: Send + Sync {
    fn similarity(&self, a: &[f32], b: &[f32]) -> f64;
}

/// Cosine similarity over raw feature vectors, clamped to [0, 1].
///
/// The default when no external scoring component is wired in.
pub struct CosineSimilarity;

impl FeatureSimilarity for CosineSimilarity {
    fn similarity(&self, a: &[f32], b: &[f32]) -> f64 {
        if a.is_empty() || b.is_empty() || a.len() != b.len() {
            return 0.0;
        }

        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;
        for (x, y) in a.iter().zip(b.iter()) {
            dot += f64::from(*x) * f64::from(*y);
            norm_a += f64::from(*x) * f64::from(*x);
            norm_b += f64::from(*y) * f64::from(*y);
        }

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
    }
}
