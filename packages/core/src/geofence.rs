//! Geofence proximity engine.
//!
//! Users draw a circular watch area around a lost pet's last-seen point.
//! Each scan looks at reports of the opposite status from the last 24
//! hours and raises one proximity alert per area when new candidates fall
//! inside the circle.
//!
//! The alerted-pair set is process-local: after a restart an already
//! alerted candidate may alert once more.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::dispatch::{NotificationDispatcher, SendRequest};
use crate::error::CoreError;
use crate::geo::{haversine_km, within_radius};
use crate::metrics::AppMetrics;
use crate::repository::Repository;
use crate::types::{
    Coordinates, GeofenceArea, NotificationType, Pet, PetStatus, Priority,
};

/// Tunable scan parameters. Adjustable at runtime through `set_config`.
#[derive(Debug, Clone)]
pub struct GeofenceConfig {
    /// Candidate reports older than this are not considered by a scan.
    pub scan_window_hours: i64,
    /// Upper bound on a watch area's radius.
    pub max_radius_km: f64,
    /// At most this many candidate summaries ride along in the alert
    /// payload.
    pub max_candidates_in_payload: usize,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            scan_window_hours: 24,
            max_radius_km: 100.0,
            max_candidates_in_payload: 3,
        }
    }
}

/// Outcome of one proximity scan.
#[derive(Debug, Default)]
pub struct GeofenceTickReport {
    pub scanned_areas: usize,
    pub deactivated: usize,
    pub alerts_sent: usize,
}

pub struct GeofenceEngine {
    repo: Arc<Repository>,
    dispatcher: Arc<NotificationDispatcher>,
    metrics: AppMetrics,
    /// Active areas by pet id, hydrated from the database at startup.
    areas: RwLock<HashMap<String, GeofenceArea>>,
    /// (area pet id, candidate pet id) pairs already alerted.
    alerted: RwLock<HashSet<(String, String)>>,
    config: RwLock<GeofenceConfig>,
}

impl GeofenceEngine {
    pub fn new(
        repo: Arc<Repository>,
        dispatcher: Arc<NotificationDispatcher>,
        metrics: AppMetrics,
    ) -> Self {
        Self {
            repo,
            dispatcher,
            metrics,
            areas: RwLock::new(HashMap::new()),
            alerted: RwLock::new(HashSet::new()),
            config: RwLock::new(GeofenceConfig::default()),
        }
    }

    pub async fn config(&self) -> GeofenceConfig {
        self.config.read().await.clone()
    }

    pub async fn set_config(&self, config: GeofenceConfig) -> Result<(), CoreError> {
        if config.scan_window_hours <= 0 || config.max_radius_km <= 0.0 {
            return Err(CoreError::validation(
                "scan_window_hours and max_radius_km must be positive",
            ));
        }
        *self.config.write().await = config;
        Ok(())
    }

    /// Load every active area from the database. Called once at startup.
    pub async fn hydrate(&self) -> Result<usize, CoreError> {
        let active = self.repo.list_active_geofences().await?;
        let count = active.len();
        let mut areas = self.areas.write().await;
        areas.clear();
        for area in active {
            areas.insert(area.pet_id.clone(), area);
        }
        info!(areas = count, "geofence areas hydrated");
        Ok(count)
    }

    /// Create a watch area around a pet the user owns. One area per pet; a
    /// second one surfaces as `Conflict`.
    pub async fn create_geofence(
        &self,
        pet_id: &str,
        user_id: &str,
        name: &str,
        center: Coordinates,
        radius_km: f64,
    ) -> Result<GeofenceArea, CoreError> {
        let max_radius_km = self.config().await.max_radius_km;
        if !(0.0..=max_radius_km).contains(&radius_km) || radius_km == 0.0 {
            return Err(CoreError::validation(format!(
                "radius must lie in (0, {}] km",
                max_radius_km
            )));
        }
        if !(-90.0..=90.0).contains(&center.latitude)
            || !(-180.0..=180.0).contains(&center.longitude)
        {
            return Err(CoreError::validation("center coordinates out of range"));
        }

        let pet = self
            .repo
            .get_pet(pet_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("pet {}", pet_id)))?;
        if pet.owner_id != user_id {
            return Err(CoreError::unauthorized(
                "only the pet's owner may create a watch area",
            ));
        }
        if pet.status == PetStatus::Resolved {
            return Err(CoreError::validation(format!(
                "pet {} is resolved; nothing to watch",
                pet_id
            )));
        }

        let area = self
            .repo
            .insert_geofence(pet_id, user_id, name, center, radius_km)
            .await?;
        self.areas
            .write()
            .await
            .insert(area.pet_id.clone(), area.clone());
        info!(pet_id, radius_km, "geofence created");
        Ok(area)
    }

    /// Remove a watch area. Owner only.
    pub async fn remove_geofence(&self, pet_id: &str, user_id: &str) -> Result<(), CoreError> {
        let owner_id = match self.areas.read().await.get(pet_id) {
            Some(area) => area.owner_id.clone(),
            None => {
                let areas = self.repo.list_user_geofences(user_id).await?;
                match areas.into_iter().find(|a| a.pet_id == pet_id) {
                    Some(area) => area.owner_id,
                    None => {
                        return Err(CoreError::not_found(format!(
                            "geofence for pet {}",
                            pet_id
                        )))
                    }
                }
            }
        };
        if owner_id != user_id {
            return Err(CoreError::unauthorized(
                "only the owner may remove a watch area",
            ));
        }

        self.repo.delete_geofence(pet_id).await?;
        self.areas.write().await.remove(pet_id);
        Ok(())
    }

    pub async fn user_geofences(&self, user_id: &str) -> Result<Vec<GeofenceArea>, CoreError> {
        self.repo.list_user_geofences(user_id).await
    }

    /// One proximity scan across every active area.
    pub async fn tick_once(&self) -> Result<GeofenceTickReport, CoreError> {
        let config = self.config().await;
        let now = Utc::now();
        let since = now - Duration::hours(config.scan_window_hours);

        let snapshot: Vec<GeofenceArea> =
            self.areas.read().await.values().cloned().collect();
        let mut report = GeofenceTickReport {
            scanned_areas: snapshot.len(),
            ..GeofenceTickReport::default()
        };

        for area in snapshot {
            // Pet resolved or deleted: the watch area has done its job.
            let Some(pet) = self.repo.get_pet(&area.pet_id).await? else {
                self.deactivate(&area.pet_id).await?;
                report.deactivated += 1;
                continue;
            };
            if pet.status == PetStatus::Resolved {
                self.deactivate(&area.pet_id).await?;
                report.deactivated += 1;
                continue;
            }
            let Some(target_status) = pet.status.opposite() else {
                continue;
            };

            let candidates = self
                .repo
                .find_located_by_status_since(target_status, since)
                .await?;

            let mut fresh: Vec<(Pet, f64)> = Vec::new();
            {
                let alerted = self.alerted.read().await;
                for candidate in candidates {
                    if candidate.owner_id == pet.owner_id {
                        continue;
                    }
                    let Some(location) = candidate.location else { continue };
                    if !within_radius(area.center, location, area.radius_km) {
                        continue;
                    }
                    let key = (area.pet_id.clone(), candidate.id.clone());
                    if alerted.contains(&key) {
                        continue;
                    }
                    let distance = haversine_km(area.center, location);
                    fresh.push((candidate, distance));
                }
            }

            if fresh.is_empty() {
                continue;
            }
            fresh.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            {
                let mut alerted = self.alerted.write().await;
                for (candidate, _) in &fresh {
                    alerted.insert((area.pet_id.clone(), candidate.id.clone()));
                }
            }

            let closest = &fresh[0];
            let summaries: Vec<serde_json::Value> = fresh
                .iter()
                .take(config.max_candidates_in_payload)
                .map(|(candidate, distance)| {
                    serde_json::json!({
                        "pet_id": candidate.id,
                        "status": candidate.status.as_str(),
                        "distance_km": (distance * 100.0).round() / 100.0,
                    })
                })
                .collect();

            let mut request = SendRequest::new(
                &area.owner_id,
                NotificationType::ProximityAlert,
                format!("Activity near {}", area.name),
                format!(
                    "{} recent {} report(s) inside your {} km watch area, the closest {:.1} km away.",
                    fresh.len(),
                    target_status.as_str(),
                    area.radius_km,
                    closest.1
                ),
            );
            request.priority = Priority::High;
            request.data = serde_json::json!({
                "geofence_pet_id": area.pet_id,
                "candidate_count": fresh.len(),
                "closest_distance_km": (closest.1 * 100.0).round() / 100.0,
                "candidates": summaries,
            });
            request.action_url = Some(format!("/pets/{}/nearby", area.pet_id));

            match self.dispatcher.send(request).await {
                Ok(_) => {
                    self.metrics.geofence_alerts.inc();
                    report.alerts_sent += 1;
                }
                Err(err) => {
                    warn!(pet_id = %area.pet_id, error = %err, "proximity alert failed");
                }
            }
        }

        debug!(
            scanned = report.scanned_areas,
            deactivated = report.deactivated,
            alerts = report.alerts_sent,
            "geofence scan complete"
        );
        Ok(report)
    }

    async fn deactivate(&self, pet_id: &str) -> Result<(), CoreError> {
        self.repo.set_geofence_active(pet_id, false).await?;
        self.areas.write().await.remove(pet_id);
        info!(pet_id, "geofence deactivated");
        Ok(())
    }
}
