//! Statistics shaping over the repository's aggregation queries.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;

use crate::error::CoreError;
use crate::repository::{CountRow, Repository};

/// One day's notification volume.
#[derive(Debug, Clone, Serialize)]
pub struct DailyCount {
    pub date: String,
    pub count: i64,
}

/// Notification volumes, globally or for one user.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationStatistics {
    pub total: i64,
    pub by_type: HashMap<String, i64>,
    pub by_status: HashMap<String, i64>,
    pub by_priority: HashMap<String, i64>,
    /// Daily buckets for the trailing seven days, oldest first. Days with
    /// no notifications are absent.
    pub last_seven_days: Vec<DailyCount>,
}

/// Match funnel counters.
#[derive(Debug, Clone, Serialize)]
pub struct MatchStatistics {
    pub total: i64,
    pub pending: i64,
    pub confirmed: i64,
    pub rejected: i64,
    pub by_confidence: HashMap<String, i64>,
    pub average_similarity: Option<f64>,
    /// Share of resolved matches that were confirmed. `None` until at
    /// least one match has been resolved.
    pub confirmation_rate: Option<f64>,
}

pub struct StatisticsService {
    repo: Arc<Repository>,
}

fn into_map(rows: Vec<CountRow>) -> HashMap<String, i64> {
    rows.into_iter().map(|r| (r.label, r.count)).collect()
}

impl StatisticsService {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Notification statistics, scoped to one user when `user_id` is set.
    pub async fn notification_statistics(
        &self,
        user_id: Option<&str>,
    ) -> Result<NotificationStatistics, CoreError> {
        let by_type = into_map(self.repo.counts_by_kind(user_id).await?);
        let by_status = into_map(self.repo.counts_by_status(user_id).await?);
        let by_priority = into_map(self.repo.counts_by_priority(user_id).await?);
        let total = by_status.values().sum();

        let since = Utc::now() - Duration::days(7);
        let last_seven_days = self
            .repo
            .daily_counts(since, user_id)
            .await?
            .into_iter()
            .map(|r| DailyCount { date: r.label, count: r.count })
            .collect();

        Ok(NotificationStatistics {
            total,
            by_type,
            by_status,
            by_priority,
            last_seven_days,
        })
    }

    pub async fn match_statistics(&self) -> Result<MatchStatistics, CoreError> {
        let by_status = into_map(self.repo.match_counts_by_status().await?);
        let by_confidence = into_map(self.repo.match_counts_by_confidence().await?);
        let average_similarity = self.repo.average_match_similarity().await?;

        let pending = by_status.get("pending").copied().unwrap_or(0);
        let confirmed = by_status.get("confirmed").copied().unwrap_or(0);
        let rejected = by_status.get("rejected").copied().unwrap_or(0);
        let total = pending + confirmed + rejected;

        let resolved = confirmed + rejected;
        let confirmation_rate = if resolved > 0 {
            Some(confirmed as f64 / resolved as f64)
        } else {
            None
        };

        Ok(MatchStatistics {
            total,
            pending,
            confirmed,
            rejected,
            by_confidence,
            average_similarity,
            confirmation_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::db::create_pool;
    use crate::repository::NewNotification;
    use crate::types::{
        ChannelStates, ConfidenceTier, MatchStatus, NotificationStatus, NotificationType,
        Priority,
    };

    async fn service() -> (StatisticsService, Arc<Repository>) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let repo = Arc::new(Repository::new(pool));
        (StatisticsService::new(Arc::clone(&repo)), repo)
    }

    fn notification(user: &str, kind: NotificationType) -> NewNotification {
        NewNotification {
            user_id: user.into(),
            kind,
            title: "t".into(),
            message: "m".into(),
            priority: Priority::Normal,
            data: serde_json::Value::Null,
            action_url: None,
            image_url: None,
            channels: ChannelStates::default(),
            status: NotificationStatus::Pending,
            scheduled_at: None,
            expires_at: None,
            pet_id: None,
            reminder_offset: None,
        }
    }

    #[tokio::test]
    async fn notification_statistics_bucket_by_type_and_status() {
        let (service, repo) = service().await;
        repo.insert_notification(&notification("u1", NotificationType::MatchFound))
            .await
            .unwrap();
        repo.insert_notification(&notification("u1", NotificationType::MatchFound))
            .await
            .unwrap();
        let id = repo
            .insert_notification(&notification("u1", NotificationType::System))
            .await
            .unwrap();
        repo.set_notification_status(id, NotificationStatus::Sent).await.unwrap();
        repo.insert_notification(&notification("u2", NotificationType::System))
            .await
            .unwrap();

        let stats = service.notification_statistics(Some("u1")).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_type.get("match_found"), Some(&2));
        assert_eq!(stats.by_type.get("system"), Some(&1));
        assert_eq!(stats.by_status.get("pending"), Some(&2));
        assert_eq!(stats.by_status.get("sent"), Some(&1));
        assert_eq!(stats.last_seven_days.len(), 1);
        assert_eq!(stats.last_seven_days[0].count, 3);

        let global = service.notification_statistics(None).await.unwrap();
        assert_eq!(global.total, 4);
    }

    #[tokio::test]
    async fn match_statistics_compute_the_funnel() {
        let (service, repo) = service().await;
        let m1 = repo
            .insert_match("l1", "f1", 0.9, ConfidenceTier::High, None)
            .await
            .unwrap();
        let m2 = repo
            .insert_match("l2", "f2", 0.75, ConfidenceTier::Medium, None)
            .await
            .unwrap();
        repo.insert_match("l3", "f3", 0.72, ConfidenceTier::Medium, None)
            .await
            .unwrap();
        repo.update_match_status(m1.id, MatchStatus::Confirmed, "u1", Utc::now(), None)
            .await
            .unwrap();
        repo.update_match_status(m2.id, MatchStatus::Rejected, "u2", Utc::now(), None)
            .await
            .unwrap();

        let stats = service.match_statistics().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.confirmed, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.by_confidence.get("medium"), Some(&2));
        assert_eq!(stats.confirmation_rate, Some(0.5));
        let avg = stats.average_similarity.unwrap();
        assert!((avg - 0.79).abs() < 0.01);
    }

    #[tokio::test]
    async fn empty_database_yields_empty_statistics() {
        let (service, _) = service().await;
        let n = service.notification_statistics(None).await.unwrap();
        assert_eq!(n.total, 0);
        assert!(n.last_seven_days.is_empty());

        let m = service.match_statistics().await.unwrap();
        assert_eq!(m.total, 0);
        assert_eq!(m.confirmation_rate, None);
    }
}
