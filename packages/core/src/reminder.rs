//! Elapsed-time search reminders.
//!
//! Owners of unresolved reports get a reminder at fixed day offsets after
//! the report was created. The database's unique reminder tag
//! (user, type, pet, offset) guarantees each offset fires at most once per
//! pet, no matter how often the scan runs.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::dispatch::{NotificationDispatcher, SendRequest};
use crate::error::CoreError;
use crate::metrics::AppMetrics;
use crate::repository::Repository;
use crate::types::{NotificationType, Pet, PetStatus, Priority};

/// Day offsets at which reminders fire, unless overridden.
const DEFAULT_REMINDER_OFFSETS: [i64; 5] = [1, 3, 7, 14, 30];

/// Outcome of one reminder sweep.
#[derive(Debug, Default)]
pub struct ReminderTickReport {
    pub scanned: usize,
    pub sent: usize,
    pub skipped_existing: usize,
}

pub struct ReminderEngine {
    repo: Arc<Repository>,
    dispatcher: Arc<NotificationDispatcher>,
    metrics: AppMetrics,
    offsets: Vec<i64>,
}

impl ReminderEngine {
    pub fn new(
        repo: Arc<Repository>,
        dispatcher: Arc<NotificationDispatcher>,
        metrics: AppMetrics,
    ) -> Self {
        Self {
            repo,
            dispatcher,
            metrics,
            offsets: DEFAULT_REMINDER_OFFSETS.to_vec(),
        }
    }

    /// Replace the default day offsets. Values must be positive and are
    /// deduplicated and sorted.
    pub fn with_offsets(mut self, offsets: Vec<i64>) -> Self {
        let mut offsets: Vec<i64> = offsets.into_iter().filter(|d| *d > 0).collect();
        offsets.sort_unstable();
        offsets.dedup();
        if !offsets.is_empty() {
            self.offsets = offsets;
        }
        self
    }

    /// One sweep across every offset. For offset `d`, the eligible pets
    /// are the unresolved ones whose report age lies in `(d, d+1]` days:
    /// the day-`d` reminder goes out once at least `d` full days have
    /// elapsed, so "it has been 1 day" is literally true when it arrives.
    /// A one-day window means an hourly scan hits each pet several times;
    /// the unique tag deduplicates.
    pub async fn tick_once(&self) -> Result<ReminderTickReport, CoreError> {
        let now = Utc::now();
        let mut report = ReminderTickReport::default();

        for &offset in &self.offsets {
            let end = now - Duration::days(offset);
            let start = end - Duration::days(1);
            let pets = self.repo.find_unresolved_created_between(start, end).await?;
            report.scanned += pets.len();

            for pet in pets {
                match self.send_reminder(&pet, offset).await {
                    Ok(()) => report.sent += 1,
                    Err(err) if err.is_conflict() => report.skipped_existing += 1,
                    Err(err) => {
                        warn!(pet_id = %pet.id, offset, error = %err, "reminder failed");
                    }
                }
            }
        }

        if report.sent > 0 {
            info!(
                sent = report.sent,
                skipped = report.skipped_existing,
                "reminder sweep complete"
            );
        } else {
            debug!(scanned = report.scanned, "reminder sweep complete");
        }
        Ok(report)
    }

    async fn send_reminder(&self, pet: &Pet, offset: i64) -> Result<(), CoreError> {
        let (title, message, actions) = reminder_copy(pet, offset);

        let mut request = SendRequest::new(
            &pet.owner_id,
            NotificationType::SearchReminder,
            title,
            message,
        );
        request.priority = if offset == 1 { Priority::High } else { Priority::Normal };
        request.data = serde_json::json!({
            "pet_id": pet.id,
            "days_elapsed": offset,
            "suggested_actions": actions,
        });
        request.action_url = Some(format!("/pets/{}", pet.id));
        request.pet_id = Some(pet.id.clone());
        request.reminder_offset = Some(offset);

        self.dispatcher.send(request).await?;
        self.metrics.reminders_sent.inc();
        Ok(())
    }
}

/// Title, message, and suggested actions for one reminder. The tone
/// shifts with elapsed time: urgent on day one, encouraging through the
/// first week, supportive after that.
fn reminder_copy(pet: &Pet, offset: i64) -> (String, String, Vec<&'static str>) {
    let verb = match pet.status {
        PetStatus::Found => "was found",
        _ => "went missing",
    };

    if offset == 1 {
        (
            format!("Keep searching for {}", pet.name),
            format!(
                "It has been 1 day since {} {}. The first hours matter most — \
                 search nearby streets and ask neighbors now.",
                pet.name, verb
            ),
            vec!["search_nearby", "post_flyers", "check_matches"],
        )
    } else if offset <= 7 {
        (
            format!("Day {} — don't give up on {}", offset, pet.name),
            format!(
                "It has been {} days since {} {}. Many pets are reunited within \
                 the first week. Check nearby shelters and review new match suggestions.",
                offset, pet.name, verb
            ),
            vec!["visit_shelters", "check_matches", "expand_search_area"],
        )
    } else {
        (
            format!("Still looking for {}?", pet.name),
            format!(
                "It has been {} days since {} {}. Reunions still happen after \
                 weeks — keep the report up to date and widen your watch area.",
                offset, pet.name, verb
            ),
            vec!["update_report", "widen_geofence", "check_matches"],
        )
    }
}
