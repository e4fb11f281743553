//! Core domain types shared across the dispatcher and the background engines.
//!
//! Every notification type, priority, and status is a closed enum; ad hoc
//! string variants are rejected at the boundary (`FromStr` fails) rather
//! than leaking into persistence.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// One delivery mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    Push,
    Email,
    InApp,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Push => "push",
            ChannelKind::Email => "email",
            ChannelKind::InApp => "in_app",
        }
    }
}

/// Closed set of notification types the engines may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationType {
    MatchFound,
    MatchConfirmed,
    MatchRejected,
    ProximityAlert,
    SearchReminder,
    PetStatusUpdate,
    System,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::MatchFound => "match_found",
            NotificationType::MatchConfirmed => "match_confirmed",
            NotificationType::MatchRejected => "match_rejected",
            NotificationType::ProximityAlert => "proximity_alert",
            NotificationType::SearchReminder => "search_reminder",
            NotificationType::PetStatusUpdate => "pet_status_update",
            NotificationType::System => "system",
        }
    }

    /// Built-in per-type channel defaults, used when a user's preference
    /// record has no entry for the type.
    pub fn default_channels(&self) -> ChannelToggles {
        match self {
            NotificationType::MatchFound => ChannelToggles::all(),
            NotificationType::MatchConfirmed => ChannelToggles::all(),
            NotificationType::MatchRejected => ChannelToggles {
                push: true,
                email: false,
                in_app: true,
            },
            NotificationType::ProximityAlert => ChannelToggles {
                push: true,
                email: false,
                in_app: true,
            },
            NotificationType::SearchReminder => ChannelToggles::all(),
            NotificationType::PetStatusUpdate => ChannelToggles {
                push: true,
                email: false,
                in_app: true,
            },
            NotificationType::System => ChannelToggles {
                push: false,
                email: false,
                in_app: true,
            },
        }
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "match_found" => Ok(NotificationType::MatchFound),
            "match_confirmed" => Ok(NotificationType::MatchConfirmed),
            "match_rejected" => Ok(NotificationType::MatchRejected),
            "proximity_alert" => Ok(NotificationType::ProximityAlert),
            "search_reminder" => Ok(NotificationType::SearchReminder),
            "pet_status_update" => Ok(NotificationType::PetStatusUpdate),
            "system" => Ok(NotificationType::System),
            other => Err(format!("unknown notification type: {}", other)),
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery priority. `Urgent` bypasses quiet hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Notification lifecycle. Transitions are monotonic except for the
/// Scheduler's `Scheduled -> Pending` re-entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationStatus {
    Pending,
    Scheduled,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Scheduled => "scheduled",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Read => "read",
            NotificationStatus::Failed => "failed",
        }
    }
}

impl FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NotificationStatus::Pending),
            "scheduled" => Ok(NotificationStatus::Scheduled),
            "sent" => Ok(NotificationStatus::Sent),
            "delivered" => Ok(NotificationStatus::Delivered),
            "read" => Ok(NotificationStatus::Read),
            "failed" => Ok(NotificationStatus::Failed),
            other => Err(format!("unknown notification status: {}", other)),
        }
    }
}

/// Per-channel sub-state stored on every notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelState {
    pub enabled: bool,
    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
}

/// The three channel sub-states of a notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelStates {
    pub push: ChannelState,
    pub email: ChannelState,
    pub in_app: ChannelState,
}

impl ChannelStates {
    /// True when at least one channel reported a successful send.
    pub fn any_sent(&self) -> bool {
        self.push.sent || self.email.sent || self.in_app.sent
    }
}

/// A single notification record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: String,
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    /// Opaque key-value payload attached by the producing engine.
    pub data: serde_json::Value,
    pub action_url: Option<String>,
    pub image_url: Option<String>,
    pub channels: ChannelStates,
    pub status: NotificationStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Reminder tag: the pet this notification is about, when applicable.
    pub pet_id: Option<String>,
    /// Reminder tag: day offset since the pet report. Unique per
    /// (user, type, pet, offset), enforced by the database.
    pub reminder_offset: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Per-type channel toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelToggles {
    pub push: bool,
    pub email: bool,
    pub in_app: bool,
}

impl ChannelToggles {
    pub fn all() -> Self {
        Self {
            push: true,
            email: true,
            in_app: true,
        }
    }

    pub fn none() -> Self {
        Self {
            push: false,
            email: false,
            in_app: false,
        }
    }
}

/// A user-configured local-time window during which push is suppressed
/// except for urgent priority. The window may wrap midnight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuietHours {
    pub enabled: bool,
    pub start: NaiveTime,
    pub end: NaiveTime,
    /// Fixed UTC offset of the user's local time, e.g. "+08:00".
    pub utc_offset: String,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start: NaiveTime::from_hms_opt(22, 0, 0).expect("valid time"),
            end: NaiveTime::from_hms_opt(8, 0, 0).expect("valid time"),
            utc_offset: "+00:00".to_string(),
        }
    }
}

/// Delivery frequency mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrequencyMode {
    Instant,
    DailyDigest,
}

impl FrequencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrequencyMode::Instant => "instant",
            FrequencyMode::DailyDigest => "daily_digest",
        }
    }
}

impl FromStr for FrequencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instant" => Ok(FrequencyMode::Instant),
            "daily_digest" => Ok(FrequencyMode::DailyDigest),
            other => Err(format!("unknown frequency mode: {}", other)),
        }
    }
}

/// One preference record per user. Created lazily on first dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub user_id: String,
    /// Global master switches.
    pub push_enabled: bool,
    pub email_enabled: bool,
    pub quiet_hours: QuietHours,
    pub frequency: FrequencyMode,
    /// Per-type channel map. Missing entries fall back to
    /// [`NotificationType::default_channels`].
    pub type_channels: HashMap<NotificationType, ChannelToggles>,
    /// Device token lists, one per push sub-protocol.
    pub fcm_tokens: Vec<String>,
    pub apns_tokens: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreference {
    /// Default preference record for a user seen for the first time.
    pub fn default_for(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            push_enabled: true,
            email_enabled: true,
            quiet_hours: QuietHours::default(),
            frequency: FrequencyMode::Instant,
            type_channels: HashMap::new(),
            fcm_tokens: Vec::new(),
            apns_tokens: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Union of all device tokens across sub-protocols.
    pub fn all_push_tokens(&self) -> Vec<String> {
        let mut tokens = self.fcm_tokens.clone();
        tokens.extend(self.apns_tokens.iter().cloned());
        tokens
    }
}

/// A `(longitude, latitude)` point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub longitude: f64,
    pub latitude: f64,
}

/// Report status of a pet (external entity, consumed read-only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PetStatus {
    Lost,
    Found,
    Resolved,
}

impl PetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PetStatus::Lost => "lost",
            PetStatus::Found => "found",
            PetStatus::Resolved => "resolved",
        }
    }

    /// The status a matching candidate must have. Only meaningful for
    /// `Lost` and `Found`.
    pub fn opposite(&self) -> Option<PetStatus> {
        match self {
            PetStatus::Lost => Some(PetStatus::Found),
            PetStatus::Found => Some(PetStatus::Lost),
            PetStatus::Resolved => None,
        }
    }
}

impl FromStr for PetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lost" => Ok(PetStatus::Lost),
            "found" => Ok(PetStatus::Found),
            "resolved" => Ok(PetStatus::Resolved),
            other => Err(format!("unknown pet status: {}", other)),
        }
    }
}

/// Candidate pet record as seen by the engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pet {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub status: PetStatus,
    pub feature_vector: Option<Vec<f32>>,
    pub location: Option<Coordinates>,
    pub created_at: DateTime<Utc>,
}

/// Coarse bucketing of a similarity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    /// `high` iff score >= 0.85, `medium` iff 0.70 <= score < 0.85,
    /// otherwise `low`.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.85 {
            ConfidenceTier::High
        } else if score >= 0.70 {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::Low => "low",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::High => "high",
        }
    }
}

impl FromStr for ConfidenceTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(ConfidenceTier::Low),
            "medium" => Ok(ConfidenceTier::Medium),
            "high" => Ok(ConfidenceTier::High),
            other => Err(format!("unknown confidence tier: {}", other)),
        }
    }
}

/// Match lifecycle: pending until a participant confirms or rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Confirmed => "confirmed",
            MatchStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for MatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MatchStatus::Pending),
            "confirmed" => Ok(MatchStatus::Confirmed),
            "rejected" => Ok(MatchStatus::Rejected),
            other => Err(format!("unknown match status: {}", other)),
        }
    }
}

/// A candidate pairing between a lost and a found pet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PetMatch {
    pub id: i64,
    pub lost_pet_id: String,
    pub found_pet_id: String,
    pub similarity: f64,
    pub confidence: ConfidenceTier,
    pub status: MatchStatus,
    pub notes: Option<String>,
    pub confirmed_by: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A named circular watch area around a pet's last-seen location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeofenceArea {
    pub id: i64,
    pub pet_id: String,
    pub owner_id: String,
    pub name: String,
    pub center: Coordinates,
    pub radius_km: f64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn confidence_tier_boundaries() {
        assert_eq!(ConfidenceTier::from_score(0.85), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(0.9), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(0.8499), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_score(0.70), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_score(0.6999), ConfidenceTier::Low);
        assert_eq!(ConfidenceTier::from_score(0.0), ConfidenceTier::Low);
    }

    proptest! {
        #[test]
        fn confidence_tier_is_total_and_consistent(score in 0.0_f64..=1.0) {
            let tier = ConfidenceTier::from_score(score);
            match tier {
                ConfidenceTier::High => prop_assert!(score >= 0.85),
                ConfidenceTier::Medium => prop_assert!(score >= 0.70 && score < 0.85),
                ConfidenceTier::Low => prop_assert!(score < 0.70),
            }
        }
    }

    #[test]
    fn notification_type_round_trips_through_str() {
        for kind in [
            NotificationType::MatchFound,
            NotificationType::MatchConfirmed,
            NotificationType::MatchRejected,
            NotificationType::ProximityAlert,
            NotificationType::SearchReminder,
            NotificationType::PetStatusUpdate,
            NotificationType::System,
        ] {
            assert_eq!(kind.as_str().parse::<NotificationType>(), Ok(kind));
        }
    }

    #[test]
    fn unknown_notification_type_is_rejected() {
        assert!("price_drop".parse::<NotificationType>().is_err());
    }

    #[test]
    fn pet_status_opposite() {
        assert_eq!(PetStatus::Lost.opposite(), Some(PetStatus::Found));
        assert_eq!(PetStatus::Found.opposite(), Some(PetStatus::Lost));
        assert_eq!(PetStatus::Resolved.opposite(), None);
    }

    #[test]
    fn all_push_tokens_unions_both_protocols() {
        let mut pref = NotificationPreference::default_for("u1");
        pref.fcm_tokens = vec!["f1".into(), "f2".into()];
        pref.apns_tokens = vec!["a1".into()];
        assert_eq!(pref.all_push_tokens(), vec!["f1", "f2", "a1"]);
    }

    #[test]
    fn urgent_outranks_other_priorities() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }
}
