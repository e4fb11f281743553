//! Notification dispatcher.
//!
//! The single entry point for sending anything to a user. A send walks:
//! validate, load (or lazily create) the preference record, evaluate
//! channels, persist the record, then fan out to push / email / in-app
//! concurrently. Channel failures are captured per channel; one provider
//! being down never loses the notification record.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::channels::{EmailProvider, PushPayload, PushProvider, RealtimeTransport};
use crate::error::CoreError;
use crate::metrics::AppMetrics;
use crate::prefs::evaluate_channels;
use crate::repository::{NewNotification, Repository};
use crate::types::{
    ChannelState, ChannelStates, ChannelToggles, Notification, NotificationStatus,
    NotificationType, Priority,
};

/// Batch fan-out group size. Groups run sequentially; members of a group
/// run concurrently.
const BATCH_GROUP_SIZE: usize = 10;

/// Unread-count cache lifetime.
const UNREAD_CACHE_TTL: Duration = Duration::from_secs(30);

/// One send request, immediate or scheduled.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub user_id: String,
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub data: serde_json::Value,
    pub action_url: Option<String>,
    pub image_url: Option<String>,
    /// In the future: persist as scheduled and dispatch later. In the past
    /// or absent: dispatch now.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Narrowing mask over the evaluated channels. A caller can switch
    /// channels off with this, never force one on past the preferences.
    pub channel_override: Option<ChannelToggles>,
    pub pet_id: Option<String>,
    pub reminder_offset: Option<i64>,
}

impl SendRequest {
    pub fn new(
        user_id: impl Into<String>,
        kind: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
            title: title.into(),
            message: message.into(),
            priority: Priority::Normal,
            data: serde_json::Value::Null,
            action_url: None,
            image_url: None,
            scheduled_at: None,
            expires_at: None,
            channel_override: None,
            pet_id: None,
            reminder_offset: None,
        }
    }
}

/// Result of one send: the persisted record id, the final status, the
/// per-channel states, and any channel errors that were swallowed.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub notification_id: i64,
    pub status: NotificationStatus,
    pub channels: ChannelStates,
    pub channel_errors: Vec<String>,
}

/// Result of a batch fan-out. `outcomes` is in request order; a failing
/// entry occupies its slot instead of aborting the rest.
#[derive(Debug)]
pub struct BatchOutcome {
    pub outcomes: Vec<Result<SendOutcome, CoreError>>,
}

impl BatchOutcome {
    pub fn sent_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, Ok(out) if out.status == NotificationStatus::Sent))
            .count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.len() - self.sent_count()
    }
}

pub struct NotificationDispatcher {
    repo: Arc<Repository>,
    push: Arc<dyn PushProvider>,
    email: Arc<dyn EmailProvider>,
    realtime: Arc<dyn RealtimeTransport>,
    metrics: AppMetrics,
    unread_cache: TtlCache<String, i64>,
}

impl NotificationDispatcher {
    pub fn new(
        repo: Arc<Repository>,
        push: Arc<dyn PushProvider>,
        email: Arc<dyn EmailProvider>,
        realtime: Arc<dyn RealtimeTransport>,
        metrics: AppMetrics,
    ) -> Self {
        Self {
            repo,
            push,
            email,
            realtime,
            metrics,
            unread_cache: TtlCache::new(UNREAD_CACHE_TTL),
        }
    }

    /// Send one notification, or persist it as scheduled when
    /// `scheduled_at` lies in the future.
    pub async fn send(&self, request: SendRequest) -> Result<SendOutcome, CoreError> {
        validate_request(&request)?;

        let now = Utc::now();
        let mask = request.channel_override.unwrap_or_else(ChannelToggles::all);

        // Future sends are persisted with the mask as the enabled flags;
        // preferences are evaluated when the scheduler promotes them.
        if let Some(at) = request.scheduled_at {
            if at > now {
                let record = build_record(&request, mask, NotificationStatus::Scheduled);
                let id = self.repo.insert_notification(&record).await?;
                debug!(notification_id = id, scheduled_at = %at, "notification scheduled");
                return Ok(SendOutcome {
                    notification_id: id,
                    status: NotificationStatus::Scheduled,
                    channels: record.channels,
                    channel_errors: Vec::new(),
                });
            }
        }

        let record = build_record(&request, mask, NotificationStatus::Pending);
        let id = self.repo.insert_notification(&record).await?;
        let stored = self
            .repo
            .get_notification(id)
            .await?
            .ok_or_else(|| CoreError::internal("notification vanished after insert"))?;

        self.dispatch_record(&stored).await
    }

    /// Dispatch a persisted record: evaluate preferences now, intersect
    /// with the record's enabled flags, fan out, persist the outcome.
    pub async fn dispatch_record(
        &self,
        notification: &Notification,
    ) -> Result<SendOutcome, CoreError> {
        let timer = self.metrics.dispatch_duration.start_timer();
        let now = Utc::now();

        let pref = self
            .repo
            .get_or_create_preferences(&notification.user_id)
            .await?;

        let evaluated =
            evaluate_channels(&pref, notification.kind, notification.priority, now);
        let toggles = ChannelToggles {
            push: evaluated.push && notification.channels.push.enabled,
            email: evaluated.email && notification.channels.email.enabled,
            in_app: evaluated.in_app && notification.channels.in_app.enabled,
        };

        let mut errors: Vec<String> = Vec::new();

        let payload = PushPayload {
            title: notification.title.clone(),
            body: notification.message.clone(),
            data: notification.data.clone(),
            action_url: notification.action_url.clone(),
            image_url: notification.image_url.clone(),
        };
        let tokens = pref.all_push_tokens();

        let (push_result, email_result, realtime_result) = tokio::join!(
            self.send_push(toggles.push, &notification.user_id, &tokens, &payload),
            self.send_email(toggles.email, notification),
            self.send_in_app(toggles.in_app, notification),
        );

        let push_sent = match push_result {
            ChannelResult::Sent => true,
            ChannelResult::Skipped | ChannelResult::Unreachable => false,
            ChannelResult::Failed(err) => {
                self.metrics.channel_failures.with_label_values(&["push"]).inc();
                errors.push(format!("push: {}", err));
                false
            }
        };
        let email_sent = match email_result {
            ChannelResult::Sent => true,
            ChannelResult::Skipped | ChannelResult::Unreachable => false,
            ChannelResult::Failed(err) => {
                self.metrics.channel_failures.with_label_values(&["email"]).inc();
                errors.push(format!("email: {}", err));
                false
            }
        };
        let in_app_sent = match realtime_result {
            ChannelResult::Sent => true,
            ChannelResult::Skipped | ChannelResult::Unreachable => false,
            ChannelResult::Failed(err) => {
                self.metrics.channel_failures.with_label_values(&["in_app"]).inc();
                errors.push(format!("in_app: {}", err));
                false
            }
        };

        let sent_at = |sent: bool| if sent { Some(now) } else { None };
        let channels = ChannelStates {
            push: ChannelState { enabled: toggles.push, sent: push_sent, sent_at: sent_at(push_sent) },
            email: ChannelState { enabled: toggles.email, sent: email_sent, sent_at: sent_at(email_sent) },
            in_app: ChannelState { enabled: toggles.in_app, sent: in_app_sent, sent_at: sent_at(in_app_sent) },
        };

        let status = if channels.any_sent() {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Failed
        };
        let record_sent_at = if status == NotificationStatus::Sent {
            Some(now)
        } else {
            None
        };

        self.repo
            .update_dispatch_result(notification.id, &channels, status, record_sent_at)
            .await?;
        self.unread_cache.invalidate(&notification.user_id).await;

        let outcome_label = if status == NotificationStatus::Sent { "sent" } else { "failed" };
        self.metrics
            .notifications_dispatched
            .with_label_values(&[outcome_label])
            .inc();
        timer.observe_duration();

        if !errors.is_empty() {
            warn!(
                notification_id = notification.id,
                user_id = %notification.user_id,
                errors = ?errors,
                "dispatch completed with channel failures"
            );
        } else {
            debug!(
                notification_id = notification.id,
                user_id = %notification.user_id,
                status = status.as_str(),
                "dispatch completed"
            );
        }

        Ok(SendOutcome {
            notification_id: notification.id,
            status,
            channels,
            channel_errors: errors,
        })
    }

    async fn send_push(
        &self,
        enabled: bool,
        user_id: &str,
        tokens: &[String],
        payload: &PushPayload,
    ) -> ChannelResult {
        if !enabled {
            return ChannelResult::Skipped;
        }
        match self.push.send_to_many(tokens, payload).await {
            Ok(report) => {
                if !report.invalid_tokens.is_empty() {
                    // Provider says these device tokens are dead. Prune them
                    // so the next send does not retry them.
                    if let Err(err) = self
                        .repo
                        .remove_push_tokens(user_id, &report.invalid_tokens)
                        .await
                    {
                        warn!(user_id = %user_id, error = %err, "failed to prune invalid tokens");
                    }
                }
                if report.success_count > 0 {
                    ChannelResult::Sent
                } else {
                    ChannelResult::Failed("no device accepted the push".to_string())
                }
            }
            Err(err) => ChannelResult::Failed(err.to_string()),
        }
    }

    async fn send_email(&self, enabled: bool, notification: &Notification) -> ChannelResult {
        if !enabled {
            return ChannelResult::Skipped;
        }
        let recipient = match self.repo.get_user(&notification.user_id).await {
            Ok(Some(user)) => match user.email {
                Some(email) => email,
                None => return ChannelResult::Failed("user has no email address".to_string()),
            },
            Ok(None) => return ChannelResult::Failed("user record not found".to_string()),
            Err(err) => return ChannelResult::Failed(err.to_string()),
        };

        match self
            .email
            .send_notification_email(
                &recipient,
                &notification.title,
                &notification.message,
                notification.action_url.as_deref(),
            )
            .await
        {
            Ok(()) => ChannelResult::Sent,
            Err(err) => ChannelResult::Failed(err.to_string()),
        }
    }

    async fn send_in_app(&self, enabled: bool, notification: &Notification) -> ChannelResult {
        if !enabled {
            return ChannelResult::Skipped;
        }
        let payload = serde_json::json!({
            "id": notification.id,
            "type": notification.kind.as_str(),
            "title": notification.title,
            "message": notification.message,
            "priority": notification.priority.as_str(),
            "data": notification.data,
            "action_url": notification.action_url,
            "created_at": notification.created_at.to_rfc3339(),
        });

        // `Ok(false)` means the user has no live connection: the channel
        // did not deliver, but that is not a transport failure. The stored
        // record stays queryable through the read side either way.
        match self
            .realtime
            .send_to_user(&notification.user_id, &payload)
            .await
        {
            Ok(true) => ChannelResult::Sent,
            Ok(false) => ChannelResult::Unreachable,
            Err(err) => ChannelResult::Failed(err.to_string()),
        }
    }

    /// Fan a batch out in groups of [`BATCH_GROUP_SIZE`]. Outcomes come
    /// back in request order; one failing entry never aborts the rest.
    pub async fn send_batch(self: Arc<Self>, requests: Vec<SendRequest>) -> BatchOutcome {
        let total = requests.len();
        let mut slots: Vec<Option<Result<SendOutcome, CoreError>>> =
            (0..total).map(|_| None).collect();

        let mut remaining = requests.into_iter().enumerate().peekable();
        while remaining.peek().is_some() {
            let mut set = JoinSet::new();
            for (index, request) in remaining.by_ref().take(BATCH_GROUP_SIZE) {
                let dispatcher = Arc::clone(&self);
                set.spawn(async move { (index, dispatcher.send(request).await) });
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((index, result)) => slots[index] = Some(result),
                    Err(err) => {
                        warn!(error = %err, "batch send task panicked");
                    }
                }
            }
        }

        BatchOutcome {
            outcomes: slots
                .into_iter()
                .map(|slot| {
                    slot.unwrap_or_else(|| Err(CoreError::internal("batch send task panicked")))
                })
                .collect(),
        }
    }

    // ---- read-side operations ----

    /// Mark one notification read. Only the owner may, and only from the
    /// sent or delivered state.
    pub async fn mark_as_read(&self, id: i64, user_id: &str) -> Result<(), CoreError> {
        let changed = self.repo.mark_as_read(id, user_id, Utc::now()).await?;
        if changed {
            self.unread_cache.invalidate(&user_id.to_string()).await;
            return Ok(());
        }

        match self.repo.get_notification(id).await? {
            Some(existing) if existing.user_id == user_id => Err(CoreError::validation(
                format!("notification {} is not in a readable state", id),
            )),
            Some(_) => Err(CoreError::unauthorized(
                "notification belongs to another user",
            )),
            None => Err(CoreError::not_found(format!("notification {}", id))),
        }
    }

    /// Unread count for a user's badge, served from a short-lived cache.
    pub async fn unread_count(&self, user_id: &str) -> Result<i64, CoreError> {
        let key = user_id.to_string();
        if let Some(count) = self.unread_cache.get(&key).await {
            return Ok(count);
        }
        let count = self.repo.unread_count(user_id).await?;
        self.unread_cache.insert(key, count).await;
        Ok(count)
    }

    /// Drop stale unread-count entries. Run from the scheduler's cleanup
    /// tick.
    pub async fn purge_unread_cache(&self) {
        self.unread_cache.purge_expired().await;
    }

    pub async fn user_notifications(
        &self,
        user_id: &str,
        page: i64,
        limit: i64,
    ) -> Result<(Vec<Notification>, i64), CoreError> {
        self.repo.list_user_notifications(user_id, page, limit).await
    }
}

enum ChannelResult {
    Sent,
    Skipped,
    /// The channel ran but found nobody to deliver to (offline user).
    Unreachable,
    Failed(String),
}

fn validate_request(request: &SendRequest) -> Result<(), CoreError> {
    if request.user_id.trim().is_empty() {
        return Err(CoreError::validation("user_id must not be empty"));
    }
    if request.title.trim().is_empty() {
        return Err(CoreError::validation("title must not be empty"));
    }
    if request.message.trim().is_empty() {
        return Err(CoreError::validation("message must not be empty"));
    }
    if let (Some(scheduled), Some(expires)) = (request.scheduled_at, request.expires_at) {
        if expires <= scheduled {
            return Err(CoreError::validation(
                "expires_at must lie after scheduled_at",
            ));
        }
    }
    Ok(())
}

fn build_record(
    request: &SendRequest,
    mask: ChannelToggles,
    status: NotificationStatus,
) -> NewNotification {
    let state = |enabled: bool| ChannelState {
        enabled,
        sent: false,
        sent_at: None,
    };
    NewNotification {
        user_id: request.user_id.clone(),
        kind: request.kind,
        title: request.title.clone(),
        message: request.message.clone(),
        priority: request.priority,
        data: request.data.clone(),
        action_url: request.action_url.clone(),
        image_url: request.image_url.clone(),
        channels: ChannelStates {
            push: state(mask.push),
            email: state(mask.email),
            in_app: state(mask.in_app),
        },
        status,
        scheduled_at: request.scheduled_at,
        expires_at: request.expires_at,
        pet_id: request.pet_id.clone(),
        reminder_offset: request.reminder_offset,
    }
}
