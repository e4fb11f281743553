//! Preference evaluator: pure decision logic for channel selection.
//!
//! Given a user's preference record, a notification type, and a priority,
//! decides which channels may fire. This function never fails: the worst
//! outcome is "no channels enabled". Absence of a preference record is the
//! dispatcher's problem (it creates a default record first).

use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};

use crate::types::{
    ChannelToggles, NotificationPreference, NotificationType, Priority, QuietHours,
};

/// Evaluate which channels fire for one notification.
///
/// Rules, applied in order:
/// 1. Both global switches off refuses push and email (in-app is decided
///    independently by the per-type map).
/// 2. Quiet hours suppress the push channel unless priority is urgent.
/// 3. The per-type channel map is consulted; a missing entry falls back to
///    the built-in defaults for that type.
/// 4. Push additionally requires at least one registered device token.
pub fn evaluate_channels(
    pref: &NotificationPreference,
    kind: NotificationType,
    priority: Priority,
    now: DateTime<Utc>,
) -> ChannelToggles {
    let type_toggles = pref
        .type_channels
        .get(&kind)
        .copied()
        .unwrap_or_else(|| kind.default_channels());

    let quiet_suppressed =
        priority != Priority::Urgent && in_quiet_hours(&pref.quiet_hours, now);

    let push = pref.push_enabled
        && type_toggles.push
        && !quiet_suppressed
        && !pref.all_push_tokens().is_empty();

    let email = pref.email_enabled && type_toggles.email;

    let in_app = type_toggles.in_app;

    ChannelToggles { push, email, in_app }
}

/// True when `now`, converted to the user's local time, falls inside the
/// configured quiet window. A window with `start > end` wraps midnight:
/// `[start, 24:00) ∪ [00:00, end]`.
pub fn in_quiet_hours(quiet: &QuietHours, now: DateTime<Utc>) -> bool {
    if !quiet.enabled {
        return false;
    }

    // An unparseable offset degrades to UTC rather than failing the send.
    let offset = FixedOffset::from_str(&quiet.utc_offset)
        .unwrap_or_else(|_| FixedOffset::east_opt(0).expect("zero offset"));
    let local_time = now.with_timezone(&offset).time();

    if quiet.start <= quiet.end {
        local_time >= quiet.start && local_time <= quiet.end
    } else {
        local_time >= quiet.start || local_time <= quiet.end
    }
}
