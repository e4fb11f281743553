//! Recording test doubles for the channel providers.
//!
//! Used by the unit tests in this crate and by the integration tests under
//! `tests/`. Each mock records what it was asked to send and can be
//! scripted to fail or to report invalid tokens.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::channels::{
    EmailProvider, FeatureSimilarity, PushBatchReport, PushPayload, PushProvider,
    RealtimeTransport,
};
use crate::error::ChannelError;

/// Recorded push send: the tokens targeted and the payload title.
#[derive(Debug, Clone)]
pub struct RecordedPush {
    pub tokens: Vec<String>,
    pub title: String,
}

#[derive(Default)]
pub struct MockPushProvider {
    pub sent: Mutex<Vec<RecordedPush>>,
    invalid_tokens: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl MockPushProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent batch send reports these tokens as invalid.
    pub fn with_invalid_tokens(self, tokens: Vec<String>) -> Self {
        *self.invalid_tokens.lock().unwrap() = tokens;
        self
    }

    pub fn with_failure(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl PushProvider for MockPushProvider {
    async fn send_to_device(
        &self,
        token: &str,
        payload: &PushPayload,
    ) -> Result<bool, ChannelError> {
        let report = self
            .send_to_many(std::slice::from_ref(&token.to_string()), payload)
            .await?;
        Ok(report.success_count > 0)
    }

    async fn send_to_many(
        &self,
        tokens: &[String],
        payload: &PushPayload,
    ) -> Result<PushBatchReport, ChannelError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChannelError::ServiceUnavailable);
        }

        self.sent.lock().unwrap().push(RecordedPush {
            tokens: tokens.to_vec(),
            title: payload.title.clone(),
        });

        let invalid: Vec<String> = self
            .invalid_tokens
            .lock()
            .unwrap()
            .iter()
            .filter(|t| tokens.contains(t))
            .cloned()
            .collect();
        let failure_count = invalid.len() as u32;

        Ok(PushBatchReport {
            success_count: tokens.len() as u32 - failure_count,
            failure_count,
            invalid_tokens: invalid,
        })
    }

    fn provider_name(&self) -> &str {
        "mock-push"
    }
}

/// Recorded email send.
#[derive(Debug, Clone)]
pub struct RecordedEmail {
    pub recipient: String,
    pub subject: String,
}

#[derive(Default)]
pub struct MockEmailProvider {
    pub sent: Mutex<Vec<RecordedEmail>>,
    fail: AtomicBool,
}

impl MockEmailProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl EmailProvider for MockEmailProvider {
    async fn send_notification_email(
        &self,
        recipient: &str,
        subject: &str,
        _body: &str,
        _action_url: Option<&str>,
    ) -> Result<(), ChannelError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChannelError::ServiceUnavailable);
        }
        self.sent.lock().unwrap().push(RecordedEmail {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
        });
        Ok(())
    }

    fn provider_name(&self) -> &str {
        "mock-email"
    }
}

#[derive(Default)]
pub struct MockRealtimeTransport {
    pub delivered: Mutex<Vec<(String, serde_json::Value)>>,
    unreachable: AtomicBool,
}

impl MockRealtimeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subsequent sends report the user as not connected (`Ok(false)`).
    pub fn with_unreachable_users(self) -> Self {
        self.unreachable.store(true, Ordering::SeqCst);
        self
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl RealtimeTransport for MockRealtimeTransport {
    async fn send_to_user(
        &self,
        user_id: &str,
        payload: &serde_json::Value,
    ) -> Result<bool, ChannelError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.delivered
            .lock()
            .unwrap()
            .push((user_id.to_string(), payload.clone()));
        Ok(true)
    }

    fn transport_name(&self) -> &str {
        "mock-realtime"
    }
}

/// Similarity function returning a fixed score regardless of input.
pub struct FixedSimilarity(pub f64);

impl FeatureSimilarity for FixedSimilarity {
    fn similarity(&self, _a: &[f32], _b: &[f32]) -> f64 {
        self.0
    }
}
