//! Similarity matching engine.
//!
//! Pairs lost pets with found reports using feature-vector similarity,
//! creates match records, and notifies both owners. The similarity
//! function itself is pluggable (see [`crate::channels::FeatureSimilarity`]);
//! the engine owns candidate filtering, thresholds, and the match
//! lifecycle.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::channels::FeatureSimilarity;
use crate::dispatch::{NotificationDispatcher, SendRequest};
use crate::error::CoreError;
use crate::geo::haversine_km;
use crate::metrics::AppMetrics;
use crate::repository::Repository;
use crate::types::{
    ConfidenceTier, MatchStatus, NotificationType, Pet, PetMatch, PetStatus, Priority,
};

/// Tunable thresholds. Adjustable at runtime through `set_config`.
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Candidates below this similarity are not surfaced at all.
    pub min_similarity: f64,
    /// Candidates farther than this are dropped when both reports carry a
    /// location. Reports without a location are never distance-filtered.
    pub max_distance_km: f64,
    /// Candidate window: only reports from the last N days are considered.
    pub max_days: i64,
    /// Automatic matching creates a record only at or above this score.
    pub auto_min_similarity: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.7,
            max_distance_km: 50.0,
            max_days: 30,
            auto_min_similarity: 0.8,
        }
    }
}

/// One candidate pairing surfaced to a user, best first.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub pet: Pet,
    pub similarity: f64,
    pub confidence: ConfidenceTier,
    /// Distance between the two reports, when both carry a location.
    pub distance_km: Option<f64>,
}

/// Outcome of one automatic matching sweep.
#[derive(Debug, Default)]
pub struct AutoMatchReport {
    pub scanned: usize,
    pub created: usize,
    pub skipped_existing: usize,
    pub errors: Vec<String>,
}

pub struct MatchingEngine {
    repo: Arc<Repository>,
    dispatcher: Arc<NotificationDispatcher>,
    similarity: Arc<dyn FeatureSimilarity>,
    metrics: AppMetrics,
    config: RwLock<MatchingConfig>,
}

impl MatchingEngine {
    pub fn new(
        repo: Arc<Repository>,
        dispatcher: Arc<NotificationDispatcher>,
        similarity: Arc<dyn FeatureSimilarity>,
        metrics: AppMetrics,
    ) -> Self {
        Self {
            repo,
            dispatcher,
            similarity,
            metrics,
            config: RwLock::new(MatchingConfig::default()),
        }
    }

    pub async fn config(&self) -> MatchingConfig {
        self.config.read().await.clone()
    }

    pub async fn set_config(&self, config: MatchingConfig) -> Result<(), CoreError> {
        if !(0.0..=1.0).contains(&config.min_similarity)
            || !(0.0..=1.0).contains(&config.auto_min_similarity)
        {
            return Err(CoreError::validation(
                "similarity thresholds must lie in [0, 1]",
            ));
        }
        if config.max_distance_km <= 0.0 || config.max_days <= 0 {
            return Err(CoreError::validation(
                "max_distance_km and max_days must be positive",
            ));
        }
        *self.config.write().await = config;
        Ok(())
    }

    /// Score and rank opposite-status candidates for one pet.
    ///
    /// Results are sorted by similarity descending; equal scores put the
    /// more recent report first.
    pub async fn find_potential_matches(
        &self,
        pet_id: &str,
    ) -> Result<Vec<MatchCandidate>, CoreError> {
        let config = self.config().await;
        let pet = self
            .repo
            .get_pet(pet_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("pet {}", pet_id)))?;

        let Some(target_status) = pet.status.opposite() else {
            return Err(CoreError::validation(format!(
                "pet {} is resolved; nothing to match",
                pet_id
            )));
        };
        let Some(vector) = pet.feature_vector.as_deref() else {
            return Err(CoreError::validation(format!(
                "pet {} has no feature vector",
                pet_id
            )));
        };

        let since = Utc::now() - Duration::days(config.max_days);
        let candidates = self
            .repo
            .find_candidates(target_status, &pet.owner_id, since)
            .await?;

        let mut scored: Vec<MatchCandidate> = Vec::new();
        for candidate in candidates {
            let Some(candidate_vector) = candidate.feature_vector.as_deref() else {
                continue;
            };
            // A pair that already has a match record is settled; do not
            // surface it again.
            if self.repo.match_exists_for_pair(&pet.id, &candidate.id).await? {
                continue;
            }
            let score = self.similarity.similarity(vector, candidate_vector);
            if score < config.min_similarity {
                continue;
            }

            let distance_km = match (pet.location, candidate.location) {
                (Some(a), Some(b)) => Some(haversine_km(a, b)),
                _ => None,
            };
            if let Some(d) = distance_km {
                if d > config.max_distance_km {
                    continue;
                }
            }

            scored.push(MatchCandidate {
                confidence: ConfidenceTier::from_score(score),
                similarity: score,
                distance_km,
                pet: candidate,
            });
        }

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.pet.created_at.cmp(&a.pet.created_at))
        });

        debug!(pet_id, candidates = scored.len(), "matching scan complete");
        Ok(scored)
    }

    /// Create a match record between a lost and a found pet and notify
    /// both owners. A duplicate pair surfaces as `Conflict`.
    pub async fn create_match(
        &self,
        lost_pet_id: &str,
        found_pet_id: &str,
        similarity: f64,
        notes: Option<&str>,
    ) -> Result<PetMatch, CoreError> {
        if !(0.0..=1.0).contains(&similarity) {
            return Err(CoreError::validation("similarity must lie in [0, 1]"));
        }

        let lost = self
            .repo
            .get_pet(lost_pet_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("pet {}", lost_pet_id)))?;
        let found = self
            .repo
            .get_pet(found_pet_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("pet {}", found_pet_id)))?;

        if lost.status != PetStatus::Lost {
            return Err(CoreError::validation(format!(
                "pet {} is not reported lost",
                lost_pet_id
            )));
        }
        if found.status != PetStatus::Found {
            return Err(CoreError::validation(format!(
                "pet {} is not reported found",
                found_pet_id
            )));
        }
        if lost.owner_id == found.owner_id {
            return Err(CoreError::validation(
                "both reports belong to the same user",
            ));
        }

        let confidence = ConfidenceTier::from_score(similarity);
        let created = self
            .repo
            .insert_match(lost_pet_id, found_pet_id, similarity, confidence, notes)
            .await?;

        self.metrics
            .matches_created
            .with_label_values(&[confidence.as_str()])
            .inc();
        info!(
            match_id = created.id,
            lost_pet_id,
            found_pet_id,
            similarity,
            confidence = confidence.as_str(),
            "match created"
        );

        let data = serde_json::json!({
            "match_id": created.id,
            "lost_pet_id": lost_pet_id,
            "found_pet_id": found_pet_id,
            "similarity": similarity,
            "confidence": confidence.as_str(),
        });
        self.notify(
            &lost.owner_id,
            NotificationType::MatchFound,
            format!("Possible match for {}", lost.name),
            format!(
                "A found pet looks similar to {} ({}% similarity). Take a look.",
                lost.name,
                (similarity * 100.0).round() as i64
            ),
            created.id,
            data.clone(),
        )
        .await;
        self.notify(
            &found.owner_id,
            NotificationType::MatchFound,
            "Your found report may have a match".to_string(),
            format!(
                "The pet you reported found resembles a lost pet ({}% similarity).",
                (similarity * 100.0).round() as i64
            ),
            created.id,
            data,
        )
        .await;

        Ok(created)
    }

    /// Confirm or reject a pending match. Only a participant (owner of
    /// either pet) may resolve it, and only once.
    pub async fn update_match_status(
        &self,
        match_id: i64,
        user_id: &str,
        new_status: MatchStatus,
        notes: Option<&str>,
    ) -> Result<PetMatch, CoreError> {
        if new_status == MatchStatus::Pending {
            return Err(CoreError::validation(
                "a match cannot be moved back to pending",
            ));
        }

        let existing = self
            .repo
            .get_match(match_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("match {}", match_id)))?;
        if existing.status != MatchStatus::Pending {
            return Err(CoreError::conflict(format!(
                "match {} is already {}",
                match_id,
                existing.status.as_str()
            )));
        }

        let lost = self
            .repo
            .get_pet(&existing.lost_pet_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("pet {}", existing.lost_pet_id)))?;
        let found = self
            .repo
            .get_pet(&existing.found_pet_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("pet {}", existing.found_pet_id)))?;

        if lost.owner_id != user_id && found.owner_id != user_id {
            return Err(CoreError::unauthorized(
                "only a participant may resolve a match",
            ));
        }

        let now = Utc::now();
        let changed = self
            .repo
            .update_match_status(match_id, new_status, user_id, now, notes)
            .await?;
        if !changed {
            // Lost a race with the other participant.
            return Err(CoreError::conflict(format!(
                "match {} was resolved concurrently",
                match_id
            )));
        }

        if new_status == MatchStatus::Confirmed {
            // A confirmed match closes both reports.
            self.repo.set_pet_status(&lost.id, PetStatus::Resolved).await?;
            self.repo.set_pet_status(&found.id, PetStatus::Resolved).await?;
            info!(match_id, "match confirmed; both reports resolved");
        }

        // Tell the participant who did not act.
        let other_owner = if lost.owner_id == user_id {
            &found.owner_id
        } else {
            &lost.owner_id
        };
        let (kind, title, message) = match new_status {
            MatchStatus::Confirmed => (
                NotificationType::MatchConfirmed,
                "Match confirmed".to_string(),
                format!("The match between {} and {} was confirmed.", lost.name, found.name),
            ),
            _ => (
                NotificationType::MatchRejected,
                "Match rejected".to_string(),
                format!(
                    "The suggested match between {} and {} was rejected.",
                    lost.name, found.name
                ),
            ),
        };
        let data = serde_json::json!({
            "match_id": match_id,
            "status": new_status.as_str(),
        });
        self.notify(other_owner, kind, title, message, match_id, data).await;

        self.repo
            .get_match(match_id)
            .await?
            .ok_or_else(|| CoreError::internal("match vanished after update"))
    }

    /// Matches involving any of the user's pets, newest first.
    pub async fn matches_for_user(&self, user_id: &str) -> Result<Vec<PetMatch>, CoreError> {
        self.repo.list_matches_for_user(user_id).await
    }

    /// Run matching for a user's unresolved pets: all of them, or one
    /// when `pet_id` is given. Returns the candidates per pet without
    /// creating records.
    pub async fn trigger_for_user(
        &self,
        user_id: &str,
        pet_id: Option<&str>,
    ) -> Result<Vec<(Pet, Vec<MatchCandidate>)>, CoreError> {
        let pets = self.repo.find_unresolved_by_owner(user_id).await?;
        let mut results = Vec::with_capacity(pets.len());
        for pet in pets {
            if let Some(wanted) = pet_id {
                if pet.id != wanted {
                    continue;
                }
            }
            if pet.feature_vector.is_none() {
                continue;
            }
            let candidates = self.find_potential_matches(&pet.id).await?;
            results.push((pet, candidates));
        }
        Ok(results)
    }

    /// One automatic sweep: for every recent lost pet, create a match with
    /// its best candidate when the score clears the automatic threshold.
    ///
    /// Per-pet failures are collected, never fatal to the sweep.
    pub async fn run_automatic_matching(&self) -> Result<AutoMatchReport, CoreError> {
        let config = self.config().await;
        let since = Utc::now() - Duration::days(config.max_days);
        let lost_pets = self.repo.find_lost_with_vectors_since(since).await?;

        let mut report = AutoMatchReport {
            scanned: lost_pets.len(),
            ..AutoMatchReport::default()
        };

        for pet in lost_pets {
            let candidates = match self.find_potential_matches(&pet.id).await {
                Ok(candidates) => candidates,
                Err(err) => {
                    report.errors.push(format!("pet {}: {}", pet.id, err));
                    continue;
                }
            };
            let Some(best) = candidates
                .into_iter()
                .find(|c| c.similarity >= config.auto_min_similarity)
            else {
                continue;
            };

            match self
                .create_match(&pet.id, &best.pet.id, best.similarity, None)
                .await
            {
                Ok(_) => report.created += 1,
                Err(err) if err.is_conflict() => report.skipped_existing += 1,
                Err(err) => report.errors.push(format!("pet {}: {}", pet.id, err)),
            }
        }

        if report.created > 0 || !report.errors.is_empty() {
            info!(
                scanned = report.scanned,
                created = report.created,
                skipped = report.skipped_existing,
                errors = report.errors.len(),
                "automatic matching sweep complete"
            );
        }
        Ok(report)
    }

    async fn notify(
        &self,
        user_id: &str,
        kind: NotificationType,
        title: String,
        message: String,
        match_id: i64,
        data: serde_json::Value,
    ) {
        let mut request = SendRequest::new(user_id, kind, title, message);
        request.priority = Priority::High;
        request.data = data;
        request.action_url = Some(format!("/matches/{}", match_id));

        // A notification failure never fails the match operation.
        if let Err(err) = self.dispatcher.send(request).await {
            warn!(user_id = %user_id, match_id, error = %err, "match notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    use crate::channels::mock::{
        FixedSimilarity, MockEmailProvider, MockPushProvider, MockRealtimeTransport,
    };
    use crate::channels::CosineSimilarity;
    use crate::db::create_pool;
    use crate::types::Coordinates;

    struct Harness {
        engine: MatchingEngine,
        repo: Arc<Repository>,
        realtime: Arc<MockRealtimeTransport>,
    }

    async fn harness(similarity: Arc<dyn FeatureSimilarity>) -> Harness {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let repo = Arc::new(Repository::new(pool));
        let realtime = Arc::new(MockRealtimeTransport::new());
        let metrics = AppMetrics::new().unwrap();
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::clone(&repo),
            Arc::new(MockPushProvider::new()),
            Arc::new(MockEmailProvider::new()),
            realtime.clone(),
            metrics.clone(),
        ));
        let engine = MatchingEngine::new(Arc::clone(&repo), dispatcher, similarity, metrics);
        Harness { engine, repo, realtime }
    }

    async fn seed_pet(
        h: &Harness,
        id: &str,
        owner: &str,
        status: PetStatus,
        vector: Option<Vec<f32>>,
        location: Option<Coordinates>,
        days_ago: i64,
    ) {
        h.repo
            .insert_pet(&Pet {
                id: id.to_string(),
                owner_id: owner.to_string(),
                name: format!("pet-{}", id),
                status,
                feature_vector: vector,
                location,
                created_at: Utc::now() - ChronoDuration::days(days_ago),
            })
            .await
            .unwrap();
        h.repo.insert_user(owner, Some("o@example.com"), owner).await.unwrap();
    }

    fn near_taipei(offset: f64) -> Coordinates {
        Coordinates { longitude: 121.56 + offset, latitude: 25.03 }
    }

    #[tokio::test]
    async fn candidates_are_scored_filtered_and_sorted() {
        let h = harness(Arc::new(CosineSimilarity)).await;
        seed_pet(&h, "lost", "alice", PetStatus::Lost, Some(vec![1.0, 0.0]), None, 1).await;
        // Near-identical vector: high score.
        seed_pet(&h, "good", "bob", PetStatus::Found, Some(vec![0.99, 0.05]), None, 2).await;
        // Orthogonal vector: filtered by min_similarity.
        seed_pet(&h, "bad", "bob", PetStatus::Found, Some(vec![0.0, 1.0]), None, 2).await;

        let candidates = h.engine.find_potential_matches("lost").await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].pet.id, "good");
        assert!(candidates[0].similarity > 0.9);
        assert_eq!(candidates[0].confidence, ConfidenceTier::High);
    }

    #[tokio::test]
    async fn equal_scores_put_the_newer_report_first() {
        let h = harness(Arc::new(FixedSimilarity(0.9))).await;
        seed_pet(&h, "lost", "alice", PetStatus::Lost, Some(vec![1.0]), None, 1).await;
        seed_pet(&h, "older", "bob", PetStatus::Found, Some(vec![1.0]), None, 10).await;
        seed_pet(&h, "newer", "bob", PetStatus::Found, Some(vec![1.0]), None, 2).await;

        let candidates = h.engine.find_potential_matches("lost").await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].pet.id, "newer");
        assert_eq!(candidates[1].pet.id, "older");
    }

    #[tokio::test]
    async fn distance_filter_drops_far_candidates_but_not_unlocated_ones() {
        let h = harness(Arc::new(FixedSimilarity(0.9))).await;
        seed_pet(
            &h, "lost", "alice", PetStatus::Lost,
            Some(vec![1.0]), Some(near_taipei(0.0)), 1,
        ).await;
        // ~1 degree of longitude at this latitude is ~100 km: outside 50 km.
        seed_pet(
            &h, "far", "bob", PetStatus::Found,
            Some(vec![1.0]), Some(near_taipei(1.0)), 1,
        ).await;
        seed_pet(
            &h, "near", "bob", PetStatus::Found,
            Some(vec![1.0]), Some(near_taipei(0.01)), 1,
        ).await;
        seed_pet(&h, "unlocated", "bob", PetStatus::Found, Some(vec![1.0]), None, 1).await;

        let candidates = h.engine.find_potential_matches("lost").await.unwrap();
        let ids: Vec<&str> = candidates.iter().map(|c| c.pet.id.as_str()).collect();
        assert!(ids.contains(&"near"));
        assert!(ids.contains(&"unlocated"));
        assert!(!ids.contains(&"far"));
    }

    #[tokio::test]
    async fn same_owner_candidates_are_excluded() {
        let h = harness(Arc::new(FixedSimilarity(0.9))).await;
        seed_pet(&h, "lost", "alice", PetStatus::Lost, Some(vec![1.0]), None, 1).await;
        seed_pet(&h, "own", "alice", PetStatus::Found, Some(vec![1.0]), None, 1).await;

        let candidates = h.engine.find_potential_matches("lost").await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn resolved_pet_cannot_be_matched() {
        let h = harness(Arc::new(FixedSimilarity(0.9))).await;
        seed_pet(&h, "done", "alice", PetStatus::Resolved, Some(vec![1.0]), None, 1).await;
        let err = h.engine.find_potential_matches("done").await.unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn create_match_notifies_both_owners() {
        let h = harness(Arc::new(FixedSimilarity(0.9))).await;
        seed_pet(&h, "l1", "alice", PetStatus::Lost, Some(vec![1.0]), None, 1).await;
        seed_pet(&h, "f1", "bob", PetStatus::Found, Some(vec![1.0]), None, 1).await;

        let created = h.engine.create_match("l1", "f1", 0.9, None).await.unwrap();
        assert_eq!(created.confidence, ConfidenceTier::High);
        assert_eq!(created.status, MatchStatus::Pending);

        // One in-app delivery per owner.
        let delivered = h.realtime.delivered.lock().unwrap();
        let users: Vec<&str> = delivered.iter().map(|(u, _)| u.as_str()).collect();
        assert!(users.contains(&"alice"));
        assert!(users.contains(&"bob"));
    }

    #[tokio::test]
    async fn duplicate_match_is_a_conflict() {
        let h = harness(Arc::new(FixedSimilarity(0.9))).await;
        seed_pet(&h, "l1", "alice", PetStatus::Lost, Some(vec![1.0]), None, 1).await;
        seed_pet(&h, "f1", "bob", PetStatus::Found, Some(vec![1.0]), None, 1).await;

        h.engine.create_match("l1", "f1", 0.9, None).await.unwrap();
        let err = h.engine.create_match("l1", "f1", 0.85, None).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn wrong_statuses_are_rejected() {
        let h = harness(Arc::new(FixedSimilarity(0.9))).await;
        seed_pet(&h, "l1", "alice", PetStatus::Lost, Some(vec![1.0]), None, 1).await;
        seed_pet(&h, "l2", "bob", PetStatus::Lost, Some(vec![1.0]), None, 1).await;

        let err = h.engine.create_match("l1", "l2", 0.9, None).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn confirm_resolves_both_pets_and_notifies_the_other_owner() {
        let h = harness(Arc::new(FixedSimilarity(0.9))).await;
        seed_pet(&h, "l1", "alice", PetStatus::Lost, Some(vec![1.0]), None, 1).await;
        seed_pet(&h, "f1", "bob", PetStatus::Found, Some(vec![1.0]), None, 1).await;
        let created = h.engine.create_match("l1", "f1", 0.9, None).await.unwrap();

        let updated = h
            .engine
            .update_match_status(created.id, "alice", MatchStatus::Confirmed, None)
            .await
            .unwrap();
        assert_eq!(updated.status, MatchStatus::Confirmed);
        assert_eq!(updated.confirmed_by.as_deref(), Some("alice"));

        let lost = h.repo.get_pet("l1").await.unwrap().unwrap();
        let found = h.repo.get_pet("f1").await.unwrap().unwrap();
        assert_eq!(lost.status, PetStatus::Resolved);
        assert_eq!(found.status, PetStatus::Resolved);
    }

    #[tokio::test]
    async fn only_participants_may_resolve() {
        let h = harness(Arc::new(FixedSimilarity(0.9))).await;
        seed_pet(&h, "l1", "alice", PetStatus::Lost, Some(vec![1.0]), None, 1).await;
        seed_pet(&h, "f1", "bob", PetStatus::Found, Some(vec![1.0]), None, 1).await;
        let created = h.engine.create_match("l1", "f1", 0.9, None).await.unwrap();

        let err = h
            .engine
            .update_match_status(created.id, "carol", MatchStatus::Rejected, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn resolving_twice_is_a_conflict() {
        let h = harness(Arc::new(FixedSimilarity(0.9))).await;
        seed_pet(&h, "l1", "alice", PetStatus::Lost, Some(vec![1.0]), None, 1).await;
        seed_pet(&h, "f1", "bob", PetStatus::Found, Some(vec![1.0]), None, 1).await;
        let created = h.engine.create_match("l1", "f1", 0.9, None).await.unwrap();

        h.engine
            .update_match_status(created.id, "alice", MatchStatus::Rejected, None)
            .await
            .unwrap();
        let err = h
            .engine
            .update_match_status(created.id, "bob", MatchStatus::Confirmed, None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn automatic_sweep_creates_only_above_threshold_and_once() {
        let h = harness(Arc::new(FixedSimilarity(0.82))).await;
        seed_pet(&h, "l1", "alice", PetStatus::Lost, Some(vec![1.0]), None, 1).await;
        seed_pet(&h, "f1", "bob", PetStatus::Found, Some(vec![1.0]), None, 1).await;

        let first = h.engine.run_automatic_matching().await.unwrap();
        assert_eq!(first.scanned, 1);
        assert_eq!(first.created, 1);

        // The pair is settled: the second sweep surfaces no candidate.
        let second = h.engine.run_automatic_matching().await.unwrap();
        assert_eq!(second.created, 0);
        assert!(second.errors.is_empty());
        assert!(h.repo.match_exists_for_pair("l1", "f1").await.unwrap());
    }

    #[tokio::test]
    async fn already_matched_pairs_are_not_surfaced_again() {
        let h = harness(Arc::new(FixedSimilarity(0.9))).await;
        seed_pet(&h, "l1", "alice", PetStatus::Lost, Some(vec![1.0]), None, 1).await;
        seed_pet(&h, "f1", "bob", PetStatus::Found, Some(vec![1.0]), None, 1).await;
        seed_pet(&h, "f2", "bob", PetStatus::Found, Some(vec![1.0]), None, 1).await;

        h.engine.create_match("l1", "f1", 0.9, None).await.unwrap();
        let candidates = h.engine.find_potential_matches("l1").await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].pet.id, "f2");
    }

    #[tokio::test]
    async fn automatic_sweep_respects_the_auto_threshold() {
        let h = harness(Arc::new(FixedSimilarity(0.75))).await;
        seed_pet(&h, "l1", "alice", PetStatus::Lost, Some(vec![1.0]), None, 1).await;
        seed_pet(&h, "f1", "bob", PetStatus::Found, Some(vec![1.0]), None, 1).await;

        // 0.75 clears min_similarity but not auto_min_similarity.
        let report = h.engine.run_automatic_matching().await.unwrap();
        assert_eq!(report.created, 0);
        assert!(!h.repo.match_exists_for_pair("l1", "f1").await.unwrap());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let h = harness(Arc::new(FixedSimilarity(0.9))).await;
        let err = h
            .engine
            .set_config(MatchingConfig {
                min_similarity: 1.5,
                ..MatchingConfig::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }
}
