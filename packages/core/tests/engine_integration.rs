//! End-to-end tests over the full stack: repository, dispatcher, and the
//! background engines, wired exactly as `main` wires them but with
//! recording channel mocks and an in-memory database.

use std::sync::Arc;

use chrono::{Duration, Utc};

use lostpaws_notifier::channels::mock::{
    FixedSimilarity, MockEmailProvider, MockPushProvider, MockRealtimeTransport,
};
use lostpaws_notifier::db::create_pool;
use lostpaws_notifier::dispatch::{NotificationDispatcher, SendRequest};
use lostpaws_notifier::error::CoreError;
use lostpaws_notifier::geofence::GeofenceEngine;
use lostpaws_notifier::matching::MatchingEngine;
use lostpaws_notifier::metrics::AppMetrics;
use lostpaws_notifier::reminder::ReminderEngine;
use lostpaws_notifier::repository::Repository;
use lostpaws_notifier::scheduler::{expire_once, promote_scheduled_once};
use lostpaws_notifier::stats::StatisticsService;
use lostpaws_notifier::types::{
    Coordinates, MatchStatus, NotificationPreference, NotificationStatus, NotificationType,
    Pet, PetStatus, Priority,
};

struct Stack {
    repo: Arc<Repository>,
    dispatcher: Arc<NotificationDispatcher>,
    matching: Arc<MatchingEngine>,
    geofence: Arc<GeofenceEngine>,
    reminder: Arc<ReminderEngine>,
    stats: StatisticsService,
    metrics: AppMetrics,
    push: Arc<MockPushProvider>,
    email: Arc<MockEmailProvider>,
    realtime: Arc<MockRealtimeTransport>,
}

async fn stack(similarity: f64) -> Stack {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    let repo = Arc::new(Repository::new(pool));
    let metrics = AppMetrics::new().unwrap();

    let push = Arc::new(MockPushProvider::new());
    let email = Arc::new(MockEmailProvider::new());
    let realtime = Arc::new(MockRealtimeTransport::new());

    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::clone(&repo),
        push.clone(),
        email.clone(),
        realtime.clone(),
        metrics.clone(),
    ));
    let matching = Arc::new(MatchingEngine::new(
        Arc::clone(&repo),
        Arc::clone(&dispatcher),
        Arc::new(FixedSimilarity(similarity)),
        metrics.clone(),
    ));
    let geofence = Arc::new(GeofenceEngine::new(
        Arc::clone(&repo),
        Arc::clone(&dispatcher),
        metrics.clone(),
    ));
    let reminder = Arc::new(ReminderEngine::new(
        Arc::clone(&repo),
        Arc::clone(&dispatcher),
        metrics.clone(),
    ));
    let stats = StatisticsService::new(Arc::clone(&repo));

    Stack {
        repo,
        dispatcher,
        matching,
        geofence,
        reminder,
        stats,
        metrics,
        push,
        email,
        realtime,
    }
}

async fn seed_user(s: &Stack, user_id: &str, tokens: Vec<String>) {
    s.repo
        .insert_user(user_id, Some(&format!("{}@example.com", user_id)), user_id)
        .await
        .unwrap();
    let mut pref = NotificationPreference::default_for(user_id);
    pref.fcm_tokens = tokens;
    s.repo.upsert_preferences(&pref).await.unwrap();
}

async fn seed_pet(
    s: &Stack,
    id: &str,
    owner: &str,
    status: PetStatus,
    vector: Option<Vec<f32>>,
    location: Option<Coordinates>,
    hours_ago: i64,
) {
    s.repo
        .insert_pet(&Pet {
            id: id.to_string(),
            owner_id: owner.to_string(),
            name: format!("pet-{}", id),
            status,
            feature_vector: vector,
            location,
            created_at: Utc::now() - Duration::hours(hours_ago),
        })
        .await
        .unwrap();
}

fn taipei() -> Coordinates {
    Coordinates { longitude: 121.56, latitude: 25.03 }
}

fn km_east(base: Coordinates, km: f64) -> Coordinates {
    Coordinates { longitude: base.longitude + km / 101.0, latitude: base.latitude }
}

#[tokio::test]
async fn scheduled_notification_waits_for_promotion() {
    let s = stack(0.0).await;
    seed_user(&s, "alice", vec!["tok".into()]).await;

    let mut request = SendRequest::new(
        "alice",
        NotificationType::System,
        "Later",
        "This arrives when due",
    );
    request.scheduled_at = Some(Utc::now() + Duration::milliseconds(50));
    let outcome = s.dispatcher.send(request).await.unwrap();
    assert_eq!(outcome.status, NotificationStatus::Scheduled);
    assert_eq!(s.realtime.delivered_count(), 0);

    // Not due yet: nothing promoted... after the due time it goes out.
    tokio::time::sleep(std::time::Duration::from_millis(80)).await;
    let promoted = promote_scheduled_once(&s.repo, &s.dispatcher, &s.metrics)
        .await
        .unwrap();
    assert_eq!(promoted, 1);
    assert_eq!(s.realtime.delivered_count(), 1);

    let record = s
        .repo
        .get_notification(outcome.notification_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, NotificationStatus::Sent);
}

#[tokio::test]
async fn expired_scheduled_notification_is_dropped_not_sent() {
    let s = stack(0.0).await;
    seed_user(&s, "alice", vec![]).await;

    let mut request = SendRequest::new(
        "alice",
        NotificationType::System,
        "Flash sale",
        "Only valid this hour",
    );
    request.scheduled_at = Some(Utc::now() + Duration::milliseconds(10));
    request.expires_at = Some(Utc::now() + Duration::milliseconds(30));
    let outcome = s.dispatcher.send(request).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    assert_eq!(
        promote_scheduled_once(&s.repo, &s.dispatcher, &s.metrics)
            .await
            .unwrap(),
        0
    );
    assert_eq!(expire_once(&s.repo, &s.metrics).await.unwrap(), 1);
    assert!(s
        .repo
        .get_notification(outcome.notification_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn automatic_matching_notifies_both_owners_once() {
    let s = stack(0.9).await;
    seed_user(&s, "alice", vec!["tok-a".into()]).await;
    seed_user(&s, "bob", vec!["tok-b".into()]).await;
    seed_pet(&s, "rex", "alice", PetStatus::Lost, Some(vec![1.0, 0.0]), None, 5).await;
    seed_pet(&s, "stray", "bob", PetStatus::Found, Some(vec![1.0, 0.1]), None, 2).await;

    let report = s.matching.run_automatic_matching().await.unwrap();
    assert_eq!(report.created, 1);

    // Both owners got a high-priority match notification on every channel.
    let (alice_items, _) = s.repo.list_user_notifications("alice", 1, 10).await.unwrap();
    let (bob_items, _) = s.repo.list_user_notifications("bob", 1, 10).await.unwrap();
    assert_eq!(alice_items.len(), 1);
    assert_eq!(bob_items.len(), 1);
    assert_eq!(alice_items[0].kind, NotificationType::MatchFound);
    assert_eq!(alice_items[0].priority, Priority::High);
    assert_eq!(s.push.sent_count(), 2);
    assert_eq!(s.email.sent_count(), 2);

    // A second sweep is a no-op: the pair is already matched.
    let second = s.matching.run_automatic_matching().await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(s.push.sent_count(), 2);
}

#[tokio::test]
async fn confirming_a_match_resolves_pets_and_stops_reminders() {
    let s = stack(0.9).await;
    seed_user(&s, "alice", vec![]).await;
    seed_user(&s, "bob", vec![]).await;
    // 30 hours old: would be eligible for the day-1 reminder.
    seed_pet(&s, "rex", "alice", PetStatus::Lost, Some(vec![1.0]), None, 30).await;
    seed_pet(&s, "stray", "bob", PetStatus::Found, Some(vec![1.0]), None, 2).await;

    let created = s.matching.create_match("rex", "stray", 0.9, None).await.unwrap();
    let updated = s
        .matching
        .update_match_status(created.id, "alice", MatchStatus::Confirmed, None)
        .await
        .unwrap();
    assert_eq!(updated.status, MatchStatus::Confirmed);

    // Both reports are resolved, so the reminder sweep finds nothing.
    let report = s.reminder.tick_once().await.unwrap();
    assert_eq!(report.scanned, 0);
    assert_eq!(report.sent, 0);
}

#[tokio::test]
async fn geofence_alert_reaches_the_watcher() {
    let s = stack(0.0).await;
    seed_user(&s, "alice", vec!["tok".into()]).await;
    seed_user(&s, "bob", vec![]).await;
    seed_pet(&s, "rex", "alice", PetStatus::Lost, None, Some(taipei()), 5).await;
    seed_pet(&s, "inside", "bob", PetStatus::Found, None, Some(km_east(taipei(), 2.0)), 1).await;
    seed_pet(&s, "outside", "bob", PetStatus::Found, None, Some(km_east(taipei(), 30.0)), 1).await;

    s.geofence
        .create_geofence("rex", "alice", "home", taipei(), 5.0)
        .await
        .unwrap();

    let report = s.geofence.tick_once().await.unwrap();
    assert_eq!(report.alerts_sent, 1);

    let (items, _) = s.repo.list_user_notifications("alice", 1, 10).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].kind, NotificationType::ProximityAlert);
    assert_eq!(items[0].data["candidate_count"], 1);

    // Same candidate does not alert twice.
    assert_eq!(s.geofence.tick_once().await.unwrap().alerts_sent, 0);
}

#[tokio::test]
async fn reminder_sweep_tags_each_offset_once() {
    let s = stack(0.0).await;
    seed_user(&s, "alice", vec![]).await;
    seed_pet(&s, "day1", "alice", PetStatus::Lost, None, None, 30).await;
    seed_pet(&s, "day3", "alice", PetStatus::Lost, None, None, 80).await;

    let first = s.reminder.tick_once().await.unwrap();
    assert_eq!(first.sent, 2);
    let second = s.reminder.tick_once().await.unwrap();
    assert_eq!(second.sent, 0);
    assert_eq!(second.skipped_existing, 2);

    let (items, _) = s.repo.list_user_notifications("alice", 1, 10).await.unwrap();
    let mut offsets: Vec<i64> = items.iter().filter_map(|n| n.reminder_offset).collect();
    offsets.sort_unstable();
    assert_eq!(offsets, vec![1, 3]);
}

#[tokio::test]
async fn batch_send_preserves_every_outcome() {
    let s = stack(0.0).await;
    seed_user(&s, "alice", vec![]).await;
    seed_user(&s, "bob", vec![]).await;

    let mut requests = Vec::new();
    for i in 0..12 {
        let user = if i % 2 == 0 { "alice" } else { "bob" };
        requests.push(SendRequest::new(
            user,
            NotificationType::System,
            format!("update {}", i),
            "m",
        ));
    }
    // One bad entry in the middle.
    requests[5] = SendRequest::new("", NotificationType::System, "x", "m");

    let batch = s.dispatcher.clone().send_batch(requests).await;
    assert_eq!(batch.outcomes.len(), 12);
    assert!(matches!(batch.outcomes[5], Err(CoreError::Validation { .. })));
    assert_eq!(batch.sent_count(), 11);
    assert_eq!(batch.failure_count(), 1);
}

#[tokio::test]
async fn quiet_hours_suppress_push_but_urgent_breaks_through() {
    let s = stack(0.0).await;
    s.repo
        .insert_user("alice", Some("alice@example.com"), "alice")
        .await
        .unwrap();
    let mut pref = NotificationPreference::default_for("alice");
    pref.fcm_tokens = vec!["tok".into()];
    // Quiet window covering the whole day, so the test holds at any hour.
    pref.quiet_hours.enabled = true;
    pref.quiet_hours.start = chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap();
    pref.quiet_hours.end = chrono::NaiveTime::from_hms_opt(23, 59, 59).unwrap();
    s.repo.upsert_preferences(&pref).await.unwrap();

    let normal = SendRequest::new(
        "alice",
        NotificationType::ProximityAlert,
        "Nearby report",
        "Check it out",
    );
    let outcome = s.dispatcher.send(normal).await.unwrap();
    assert!(!outcome.channels.push.enabled);
    assert!(outcome.channels.in_app.sent);
    assert_eq!(s.push.sent_count(), 0);

    let mut urgent = SendRequest::new(
        "alice",
        NotificationType::ProximityAlert,
        "Right next to you",
        "Go now",
    );
    urgent.priority = Priority::Urgent;
    let outcome = s.dispatcher.send(urgent).await.unwrap();
    assert!(outcome.channels.push.sent);
    assert_eq!(s.push.sent_count(), 1);
}

#[tokio::test]
async fn statistics_reflect_engine_activity() {
    let s = stack(0.9).await;
    seed_user(&s, "alice", vec![]).await;
    seed_user(&s, "bob", vec![]).await;
    seed_pet(&s, "rex", "alice", PetStatus::Lost, Some(vec![1.0]), None, 5).await;
    seed_pet(&s, "stray", "bob", PetStatus::Found, Some(vec![1.0]), None, 2).await;

    s.matching.run_automatic_matching().await.unwrap();

    let notif_stats = s.stats.notification_statistics(None).await.unwrap();
    assert_eq!(notif_stats.by_type.get("match_found"), Some(&2));

    let match_stats = s.stats.match_statistics().await.unwrap();
    assert_eq!(match_stats.total, 1);
    assert_eq!(match_stats.pending, 1);
    assert_eq!(match_stats.by_confidence.get("high"), Some(&1));
}

#[tokio::test]
async fn read_flow_updates_the_unread_badge() {
    let s = stack(0.0).await;
    seed_user(&s, "alice", vec![]).await;

    let mut ids = Vec::new();
    for i in 0..3 {
        let request = SendRequest::new(
            "alice",
            NotificationType::System,
            format!("n{}", i),
            "m",
        );
        ids.push(s.dispatcher.send(request).await.unwrap().notification_id);
    }
    assert_eq!(s.dispatcher.unread_count("alice").await.unwrap(), 3);

    s.dispatcher.mark_as_read(ids[0], "alice").await.unwrap();
    assert_eq!(s.dispatcher.unread_count("alice").await.unwrap(), 2);

    // Pagination shows all three, newest first.
    let (page, total) = s.dispatcher.user_notifications("alice", 1, 2).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(total, 3);
}
