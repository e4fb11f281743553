//! Database repository for notifications, preferences, matches, geofences.
//!
//! All SQLite read/write logic lives here. The dispatcher persists
//! notification records and dispatch results, the scheduler promotes and
//! expires them, and the background engines query candidate pets through
//! the read-only pet accessors. Timestamps are stored as RFC 3339 strings.
//!
//! Unique-constraint violations (duplicate match pair, duplicate reminder
//! tag, duplicate geofence) surface as [`CoreError::Conflict`], the
//! expected "already exists" signal, not a bug.

use std::collections::HashMap;

use chrono::{DateTime, NaiveTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::CoreError;
use crate::types::{
    ChannelState, ChannelStates, ChannelToggles, ConfidenceTier, Coordinates, FrequencyMode,
    GeofenceArea, MatchStatus, Notification, NotificationPreference, NotificationStatus,
    NotificationType, Pet, PetMatch, PetStatus, Priority, QuietHours,
};

/// Insert shape for a new notification record.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: String,
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub data: serde_json::Value,
    pub action_url: Option<String>,
    pub image_url: Option<String>,
    pub channels: ChannelStates,
    pub status: NotificationStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub pet_id: Option<String>,
    pub reminder_offset: Option<i64>,
}

/// Minimal user record (owned by the surrounding platform, read-only here).
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub email: Option<String>,
    pub display_name: String,
}

/// A `(label, count)` aggregation row.
#[derive(Debug, Clone)]
pub struct CountRow {
    pub label: String,
    pub count: i64,
}

/// Repository for all persisted engine state.
pub struct Repository {
    pool: SqlitePool,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed"))
}

fn parse_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn opt_ts(value: &Option<DateTime<Utc>>) -> Option<String> {
    value.as_ref().map(ts)
}

fn row_to_notification(row: &SqliteRow) -> Option<Notification> {
    let kind: String = row.try_get("kind").ok()?;
    let priority: String = row.try_get("priority").ok()?;
    let status: String = row.try_get("status").ok()?;
    let data: String = row.try_get("data").ok()?;

    let channel = |prefix: &str| -> Option<ChannelState> {
        let enabled: i64 = row.try_get(format!("{}_enabled", prefix).as_str()).ok()?;
        let sent: i64 = row.try_get(format!("{}_sent", prefix).as_str()).ok()?;
        let sent_at: Option<String> = row.try_get(format!("{}_sent_at", prefix).as_str()).ok()?;
        Some(ChannelState {
            enabled: enabled != 0,
            sent: sent != 0,
            sent_at: parse_ts(sent_at),
        })
    };

    Some(Notification {
        id: row.try_get("id").ok()?,
        user_id: row.try_get("user_id").ok()?,
        kind: kind.parse().ok()?,
        title: row.try_get("title").ok()?,
        message: row.try_get("message").ok()?,
        priority: priority.parse().ok()?,
        data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
        action_url: row.try_get("action_url").ok()?,
        image_url: row.try_get("image_url").ok()?,
        channels: ChannelStates {
            push: channel("push")?,
            email: channel("email")?,
            in_app: channel("in_app")?,
        },
        status: status.parse().ok()?,
        scheduled_at: parse_ts(row.try_get("scheduled_at").ok()?),
        sent_at: parse_ts(row.try_get("sent_at").ok()?),
        read_at: parse_ts(row.try_get("read_at").ok()?),
        expires_at: parse_ts(row.try_get("expires_at").ok()?),
        pet_id: row.try_get("pet_id").ok()?,
        reminder_offset: row.try_get("reminder_offset").ok()?,
        created_at: parse_ts(row.try_get("created_at").ok()?)?,
    })
}

fn row_to_match(row: &SqliteRow) -> Option<PetMatch> {
    let confidence: String = row.try_get("confidence").ok()?;
    let status: String = row.try_get("status").ok()?;

    Some(PetMatch {
        id: row.try_get("id").ok()?,
        lost_pet_id: row.try_get("lost_pet_id").ok()?,
        found_pet_id: row.try_get("found_pet_id").ok()?,
        similarity: row.try_get("similarity").ok()?,
        confidence: confidence.parse().ok()?,
        status: status.parse().ok()?,
        notes: row.try_get("notes").ok()?,
        confirmed_by: row.try_get("confirmed_by").ok()?,
        confirmed_at: parse_ts(row.try_get("confirmed_at").ok()?),
        created_at: parse_ts(row.try_get("created_at").ok()?)?,
    })
}

fn row_to_geofence(row: &SqliteRow) -> Option<GeofenceArea> {
    let active: i64 = row.try_get("active").ok()?;
    Some(GeofenceArea {
        id: row.try_get("id").ok()?,
        pet_id: row.try_get("pet_id").ok()?,
        owner_id: row.try_get("owner_id").ok()?,
        name: row.try_get("name").ok()?,
        center: Coordinates {
            longitude: row.try_get("longitude").ok()?,
            latitude: row.try_get("latitude").ok()?,
        },
        radius_km: row.try_get("radius_km").ok()?,
        active: active != 0,
        created_at: parse_ts(row.try_get("created_at").ok()?)?,
    })
}

fn row_to_pet(row: &SqliteRow) -> Option<Pet> {
    let status: String = row.try_get("status").ok()?;
    let vector: Option<String> = row.try_get("feature_vector").ok()?;
    let longitude: Option<f64> = row.try_get("longitude").ok()?;
    let latitude: Option<f64> = row.try_get("latitude").ok()?;

    let location = match (longitude, latitude) {
        (Some(longitude), Some(latitude)) => Some(Coordinates { longitude, latitude }),
        _ => None,
    };

    Some(Pet {
        id: row.try_get("id").ok()?,
        owner_id: row.try_get("owner_id").ok()?,
        name: row.try_get("name").ok()?,
        status: status.parse().ok()?,
        feature_vector: vector.and_then(|v| serde_json::from_str(&v).ok()),
        location,
        created_at: parse_ts(row.try_get("created_at").ok()?)?,
    })
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ---- Notifications ----

    /// Insert a new notification. A duplicate reminder tag
    /// (user, type, pet, offset) surfaces as `Conflict`.
    pub async fn insert_notification(
        &self,
        new: &NewNotification,
    ) -> Result<i64, CoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO notifications
             (user_id, kind, title, message, priority, data, action_url, image_url,
              push_enabled, email_enabled, in_app_enabled,
              status, scheduled_at, expires_at, pet_id, reminder_offset, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&new.user_id)
        .bind(new.kind.as_str())
        .bind(&new.title)
        .bind(&new.message)
        .bind(new.priority.as_str())
        .bind(new.data.to_string())
        .bind(&new.action_url)
        .bind(&new.image_url)
        .bind(new.channels.push.enabled as i64)
        .bind(new.channels.email.enabled as i64)
        .bind(new.channels.in_app.enabled as i64)
        .bind(new.status.as_str())
        .bind(opt_ts(&new.scheduled_at))
        .bind(opt_ts(&new.expires_at))
        .bind(&new.pet_id)
        .bind(new.reminder_offset)
        .bind(ts(&now))
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(err) if is_unique_violation(&err) => Err(CoreError::conflict(format!(
                "reminder already sent for pet {:?} at offset {:?}",
                new.pet_id, new.reminder_offset
            ))),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_notification(&self, id: i64) -> Result<Option<Notification>, CoreError> {
        let row = sqlx::query("SELECT * FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().and_then(row_to_notification))
    }

    /// Persist the per-channel outcomes and the aggregated status of one
    /// dispatch attempt.
    pub async fn update_dispatch_result(
        &self,
        id: i64,
        channels: &ChannelStates,
        status: NotificationStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE notifications SET
               push_enabled = ?, push_sent = ?, push_sent_at = ?,
               email_enabled = ?, email_sent = ?, email_sent_at = ?,
               in_app_enabled = ?, in_app_sent = ?, in_app_sent_at = ?,
               status = ?, sent_at = ?
             WHERE id = ?",
        )
        .bind(channels.push.enabled as i64)
        .bind(channels.push.sent as i64)
        .bind(opt_ts(&channels.push.sent_at))
        .bind(channels.email.enabled as i64)
        .bind(channels.email.sent as i64)
        .bind(opt_ts(&channels.email.sent_at))
        .bind(channels.in_app.enabled as i64)
        .bind(channels.in_app.sent as i64)
        .bind(opt_ts(&channels.in_app.sent_at))
        .bind(status.as_str())
        .bind(opt_ts(&sent_at))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_notification_status(
        &self,
        id: i64,
        status: NotificationStatus,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query("UPDATE notifications SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark as read. Only `sent`/`delivered` notifications owned by
    /// `user_id` transition; returns whether a row changed.
    pub async fn mark_as_read(
        &self,
        id: i64,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "UPDATE notifications SET status = 'read', read_at = ?
             WHERE id = ? AND user_id = ? AND status IN ('sent', 'delivered')",
        )
        .bind(ts(&now))
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<i64, CoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM notifications
             WHERE user_id = ? AND status IN ('sent', 'delivered') AND read_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("cnt").unwrap_or(0))
    }

    /// Page of a user's notifications, newest first. `page` is 1-based;
    /// `limit` is clamped to 100.
    pub async fn list_user_notifications(
        &self,
        user_id: &str,
        page: i64,
        limit: i64,
    ) -> Result<(Vec<Notification>, i64), CoreError> {
        let limit = limit.clamp(1, 100);
        let offset = (page.max(1) - 1) * limit;

        let rows = sqlx::query(
            "SELECT * FROM notifications WHERE user_id = ?
             ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total_row = sqlx::query("SELECT COUNT(*) AS cnt FROM notifications WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = total_row.try_get("cnt").unwrap_or(0);

        let items = rows.iter().filter_map(row_to_notification).collect();
        Ok((items, total))
    }

    /// Scheduled notifications due at `now` and not expired, oldest first.
    pub async fn due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>, CoreError> {
        let now_str = ts(&now);
        let rows = sqlx::query(
            "SELECT * FROM notifications
             WHERE status = 'scheduled' AND scheduled_at <= ?
               AND (expires_at IS NULL OR expires_at > ?)
             ORDER BY scheduled_at ASC LIMIT ?",
        )
        .bind(&now_str)
        .bind(&now_str)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().filter_map(row_to_notification).collect())
    }

    /// Delete never-sent notifications whose expiry has passed. Returns the
    /// number of rows deleted.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, CoreError> {
        let result = sqlx::query(
            "DELETE FROM notifications
             WHERE expires_at IS NOT NULL AND expires_at < ?
               AND status IN ('scheduled', 'pending')",
        )
        .bind(ts(&now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ---- Notification statistics ----

    async fn counts_grouped_by(
        &self,
        column: &str,
        user_id: Option<&str>,
    ) -> Result<Vec<CountRow>, CoreError> {
        // `column` comes from a fixed internal set, never from user input.
        let sql = match user_id {
            Some(_) => format!(
                "SELECT {col} AS label, COUNT(*) AS cnt FROM notifications
                 WHERE user_id = ? GROUP BY {col}",
                col = column
            ),
            None => format!(
                "SELECT {col} AS label, COUNT(*) AS cnt FROM notifications GROUP BY {col}",
                col = column
            ),
        };

        let rows = {
            let mut q = sqlx::query(&sql);
            if let Some(uid) = user_id {
                q = q.bind(uid);
            }
            q.fetch_all(&self.pool).await?
        };

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Some(CountRow {
                    label: row.try_get("label").ok()?,
                    count: row.try_get("cnt").ok()?,
                })
            })
            .collect())
    }

    pub async fn counts_by_kind(&self, user_id: Option<&str>) -> Result<Vec<CountRow>, CoreError> {
        self.counts_grouped_by("kind", user_id).await
    }

    pub async fn counts_by_status(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<CountRow>, CoreError> {
        self.counts_grouped_by("status", user_id).await
    }

    pub async fn counts_by_priority(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<CountRow>, CoreError> {
        self.counts_grouped_by("priority", user_id).await
    }

    /// Daily creation counts since `since`, as (YYYY-MM-DD, count) rows.
    pub async fn daily_counts(
        &self,
        since: DateTime<Utc>,
        user_id: Option<&str>,
    ) -> Result<Vec<CountRow>, CoreError> {
        let sql = match user_id {
            Some(_) => {
                "SELECT substr(created_at, 1, 10) AS label, COUNT(*) AS cnt
                 FROM notifications WHERE created_at >= ? AND user_id = ?
                 GROUP BY label ORDER BY label ASC"
            }
            None => {
                "SELECT substr(created_at, 1, 10) AS label, COUNT(*) AS cnt
                 FROM notifications WHERE created_at >= ?
                 GROUP BY label ORDER BY label ASC"
            }
        };

        let rows = {
            let mut q = sqlx::query(sql).bind(ts(&since));
            if let Some(uid) = user_id {
                q = q.bind(uid);
            }
            q.fetch_all(&self.pool).await?
        };

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Some(CountRow {
                    label: row.try_get("label").ok()?,
                    count: row.try_get("cnt").ok()?,
                })
            })
            .collect())
    }

    // ---- Preferences ----

    pub async fn get_preferences(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationPreference>, CoreError> {
        let row = sqlx::query("SELECT * FROM notification_preferences WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let push_enabled: i64 = row.try_get("push_enabled").unwrap_or(1);
        let email_enabled: i64 = row.try_get("email_enabled").unwrap_or(1);
        let quiet_enabled: i64 = row.try_get("quiet_enabled").unwrap_or(0);
        let quiet_start: String = row.try_get("quiet_start").unwrap_or_else(|_| "22:00".into());
        let quiet_end: String = row.try_get("quiet_end").unwrap_or_else(|_| "08:00".into());
        let quiet_utc_offset: String = row
            .try_get("quiet_utc_offset")
            .unwrap_or_else(|_| "+00:00".into());
        let frequency: String = row.try_get("frequency").unwrap_or_else(|_| "instant".into());
        let type_channels: String = row.try_get("type_channels").unwrap_or_else(|_| "{}".into());
        let fcm_tokens: String = row.try_get("fcm_tokens").unwrap_or_else(|_| "[]".into());
        let apns_tokens: String = row.try_get("apns_tokens").unwrap_or_else(|_| "[]".into());
        let updated_at: Option<String> = row.try_get("updated_at").ok();

        let defaults = QuietHours::default();
        let quiet = QuietHours {
            enabled: quiet_enabled != 0,
            start: NaiveTime::parse_from_str(&quiet_start, "%H:%M").unwrap_or(defaults.start),
            end: NaiveTime::parse_from_str(&quiet_end, "%H:%M").unwrap_or(defaults.end),
            utc_offset: quiet_utc_offset,
        };

        let type_channels: HashMap<NotificationType, ChannelToggles> =
            serde_json::from_str(&type_channels).unwrap_or_default();

        Ok(Some(NotificationPreference {
            user_id: user_id.to_string(),
            push_enabled: push_enabled != 0,
            email_enabled: email_enabled != 0,
            quiet_hours: quiet,
            frequency: frequency.parse().unwrap_or(FrequencyMode::Instant),
            type_channels,
            fcm_tokens: serde_json::from_str(&fcm_tokens).unwrap_or_default(),
            apns_tokens: serde_json::from_str(&apns_tokens).unwrap_or_default(),
            updated_at: parse_ts(updated_at).unwrap_or_else(Utc::now),
        }))
    }

    pub async fn upsert_preferences(
        &self,
        pref: &NotificationPreference,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO notification_preferences
             (user_id, push_enabled, email_enabled,
              quiet_enabled, quiet_start, quiet_end, quiet_utc_offset,
              frequency, type_channels, fcm_tokens, apns_tokens, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&pref.user_id)
        .bind(pref.push_enabled as i64)
        .bind(pref.email_enabled as i64)
        .bind(pref.quiet_hours.enabled as i64)
        .bind(pref.quiet_hours.start.format("%H:%M").to_string())
        .bind(pref.quiet_hours.end.format("%H:%M").to_string())
        .bind(&pref.quiet_hours.utc_offset)
        .bind(pref.frequency.as_str())
        .bind(serde_json::to_string(&pref.type_channels).unwrap_or_else(|_| "{}".into()))
        .bind(serde_json::to_string(&pref.fcm_tokens).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&pref.apns_tokens).unwrap_or_else(|_| "[]".into()))
        .bind(ts(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load the user's preference record, creating the default lazily.
    pub async fn get_or_create_preferences(
        &self,
        user_id: &str,
    ) -> Result<NotificationPreference, CoreError> {
        if let Some(pref) = self.get_preferences(user_id).await? {
            return Ok(pref);
        }
        let pref = NotificationPreference::default_for(user_id);
        self.upsert_preferences(&pref).await?;
        Ok(pref)
    }

    /// Remove permanently-invalid device tokens from both token lists.
    /// Idempotent: removing tokens that are already gone is a no-op.
    pub async fn remove_push_tokens(
        &self,
        user_id: &str,
        invalid: &[String],
    ) -> Result<(), CoreError> {
        if invalid.is_empty() {
            return Ok(());
        }
        let Some(mut pref) = self.get_preferences(user_id).await? else {
            return Ok(());
        };
        pref.fcm_tokens.retain(|t| !invalid.contains(t));
        pref.apns_tokens.retain(|t| !invalid.contains(t));
        self.upsert_preferences(&pref).await
    }

    // ---- Matches ----

    /// Insert a match. A duplicate (lost, found) pair surfaces as
    /// `Conflict`.
    pub async fn insert_match(
        &self,
        lost_pet_id: &str,
        found_pet_id: &str,
        similarity: f64,
        confidence: ConfidenceTier,
        notes: Option<&str>,
    ) -> Result<PetMatch, CoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO matches
             (lost_pet_id, found_pet_id, similarity, confidence, status, notes, created_at)
             VALUES (?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(lost_pet_id)
        .bind(found_pet_id)
        .bind(similarity)
        .bind(confidence.as_str())
        .bind(notes)
        .bind(ts(&now))
        .execute(&self.pool)
        .await;

        let id = match result {
            Ok(done) => done.last_insert_rowid(),
            Err(err) if is_unique_violation(&err) => {
                return Err(CoreError::conflict(format!(
                    "match already exists for pets {} and {}",
                    lost_pet_id, found_pet_id
                )))
            }
            Err(err) => return Err(err.into()),
        };

        Ok(PetMatch {
            id,
            lost_pet_id: lost_pet_id.to_string(),
            found_pet_id: found_pet_id.to_string(),
            similarity,
            confidence,
            status: MatchStatus::Pending,
            notes: notes.map(str::to_string),
            confirmed_by: None,
            confirmed_at: None,
            created_at: now,
        })
    }

    /// Does a match exist for the pair, in either direction?
    pub async fn match_exists_for_pair(&self, a: &str, b: &str) -> Result<bool, CoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM matches
             WHERE (lost_pet_id = ? AND found_pet_id = ?)
                OR (lost_pet_id = ? AND found_pet_id = ?)",
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.try_get("cnt").unwrap_or(0);
        Ok(count > 0)
    }

    pub async fn get_match(&self, id: i64) -> Result<Option<PetMatch>, CoreError> {
        let row = sqlx::query("SELECT * FROM matches WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().and_then(row_to_match))
    }

    pub async fn update_match_status(
        &self,
        id: i64,
        status: MatchStatus,
        confirmed_by: &str,
        confirmed_at: DateTime<Utc>,
        notes: Option<&str>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "UPDATE matches SET status = ?, confirmed_by = ?, confirmed_at = ?,
                 notes = COALESCE(?, notes)
             WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(confirmed_by)
        .bind(ts(&confirmed_at))
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Matches in which the user participates as either owner, newest first.
    pub async fn list_matches_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<PetMatch>, CoreError> {
        let rows = sqlx::query(
            "SELECT m.* FROM matches m
             WHERE m.lost_pet_id IN (SELECT id FROM pets WHERE owner_id = ?)
                OR m.found_pet_id IN (SELECT id FROM pets WHERE owner_id = ?)
             ORDER BY m.created_at DESC",
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().filter_map(row_to_match).collect())
    }

    pub async fn match_counts_by_status(&self) -> Result<Vec<CountRow>, CoreError> {
        let rows = sqlx::query(
            "SELECT status AS label, COUNT(*) AS cnt FROM matches GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Some(CountRow {
                    label: row.try_get("label").ok()?,
                    count: row.try_get("cnt").ok()?,
                })
            })
            .collect())
    }

    pub async fn match_counts_by_confidence(&self) -> Result<Vec<CountRow>, CoreError> {
        let rows = sqlx::query(
            "SELECT confidence AS label, COUNT(*) AS cnt FROM matches GROUP BY confidence",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Some(CountRow {
                    label: row.try_get("label").ok()?,
                    count: row.try_get("cnt").ok()?,
                })
            })
            .collect())
    }

    pub async fn average_match_similarity(&self) -> Result<Option<f64>, CoreError> {
        let row = sqlx::query("SELECT AVG(similarity) AS avg_sim FROM matches")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("avg_sim").ok())
    }

    // ---- Geofences ----

    /// Insert a geofence. A second area for the same pet surfaces as
    /// `Conflict`.
    pub async fn insert_geofence(
        &self,
        pet_id: &str,
        owner_id: &str,
        name: &str,
        center: Coordinates,
        radius_km: f64,
    ) -> Result<GeofenceArea, CoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO geofences
             (pet_id, owner_id, name, longitude, latitude, radius_km, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(pet_id)
        .bind(owner_id)
        .bind(name)
        .bind(center.longitude)
        .bind(center.latitude)
        .bind(radius_km)
        .bind(ts(&now))
        .execute(&self.pool)
        .await;

        let id = match result {
            Ok(done) => done.last_insert_rowid(),
            Err(err) if is_unique_violation(&err) => {
                return Err(CoreError::conflict(format!(
                    "geofence already exists for pet {}",
                    pet_id
                )))
            }
            Err(err) => return Err(err.into()),
        };

        Ok(GeofenceArea {
            id,
            pet_id: pet_id.to_string(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            center,
            radius_km,
            active: true,
            created_at: now,
        })
    }

    pub async fn delete_geofence(&self, pet_id: &str) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM geofences WHERE pet_id = ?")
            .bind(pet_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_geofence_active(
        &self,
        pet_id: &str,
        active: bool,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query("UPDATE geofences SET active = ? WHERE pet_id = ?")
            .bind(active as i64)
            .bind(pet_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_active_geofences(&self) -> Result<Vec<GeofenceArea>, CoreError> {
        let rows = sqlx::query("SELECT * FROM geofences WHERE active = 1 ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().filter_map(row_to_geofence).collect())
    }

    pub async fn list_user_geofences(
        &self,
        owner_id: &str,
    ) -> Result<Vec<GeofenceArea>, CoreError> {
        let rows = sqlx::query("SELECT * FROM geofences WHERE owner_id = ? ORDER BY id ASC")
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().filter_map(row_to_geofence).collect())
    }

    // ---- Pets (read-mostly; inserts exist for the surrounding platform
    // ---- and the tests) ----

    pub async fn insert_pet(&self, pet: &Pet) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO pets
             (id, owner_id, name, status, feature_vector, longitude, latitude, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&pet.id)
        .bind(&pet.owner_id)
        .bind(&pet.name)
        .bind(pet.status.as_str())
        .bind(
            pet.feature_vector
                .as_ref()
                .map(|v| serde_json::to_string(v).unwrap_or_else(|_| "[]".into())),
        )
        .bind(pet.location.map(|c| c.longitude))
        .bind(pet.location.map(|c| c.latitude))
        .bind(ts(&pet.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_pet_status(&self, id: &str, status: PetStatus) -> Result<bool, CoreError> {
        let result = sqlx::query("UPDATE pets SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_pet(&self, id: &str) -> Result<Option<Pet>, CoreError> {
        let row = sqlx::query("SELECT * FROM pets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().and_then(row_to_pet))
    }

    /// Match candidates: pets with `status`, a feature vector, another
    /// owner, created at or after `since`.
    pub async fn find_candidates(
        &self,
        status: PetStatus,
        exclude_owner: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Pet>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM pets
             WHERE status = ? AND owner_id != ? AND created_at >= ?
               AND feature_vector IS NOT NULL
             ORDER BY created_at DESC",
        )
        .bind(status.as_str())
        .bind(exclude_owner)
        .bind(ts(&since))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().filter_map(row_to_pet).collect())
    }

    /// Geofence candidates: pets with `status`, a location, created at or
    /// after `since`.
    pub async fn find_located_by_status_since(
        &self,
        status: PetStatus,
        since: DateTime<Utc>,
    ) -> Result<Vec<Pet>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM pets
             WHERE status = ? AND created_at >= ?
               AND longitude IS NOT NULL AND latitude IS NOT NULL
             ORDER BY created_at DESC",
        )
        .bind(status.as_str())
        .bind(ts(&since))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().filter_map(row_to_pet).collect())
    }

    /// Auto-matching sources: lost pets with feature vectors reported at or
    /// after `since`.
    pub async fn find_lost_with_vectors_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Pet>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM pets
             WHERE status = 'lost' AND created_at >= ?
               AND feature_vector IS NOT NULL
             ORDER BY created_at ASC",
        )
        .bind(ts(&since))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().filter_map(row_to_pet).collect())
    }

    /// Unresolved pets reported by one owner.
    pub async fn find_unresolved_by_owner(
        &self,
        owner_id: &str,
    ) -> Result<Vec<Pet>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM pets
             WHERE owner_id = ? AND status != 'resolved'
             ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().filter_map(row_to_pet).collect())
    }

    /// Reminder targets: unresolved pets created within `[start, end)`.
    pub async fn find_unresolved_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Pet>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM pets
             WHERE status != 'resolved' AND created_at >= ? AND created_at < ?
             ORDER BY created_at ASC",
        )
        .bind(ts(&start))
        .bind(ts(&end))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().filter_map(row_to_pet).collect())
    }

    // ---- Users (read-only) ----

    pub async fn get_user(&self, id: &str) -> Result<Option<UserRecord>, CoreError> {
        let row = sqlx::query("SELECT id, email, display_name FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| UserRecord {
            id: row.try_get("id").unwrap_or_default(),
            email: row.try_get::<Option<String>, _>("email").ok().flatten(),
            display_name: row.try_get("display_name").unwrap_or_default(),
        }))
    }

    pub async fn insert_user(
        &self,
        id: &str,
        email: Option<&str>,
        display_name: &str,
    ) -> Result<(), CoreError> {
        sqlx::query("INSERT OR REPLACE INTO users (id, email, display_name) VALUES (?, ?, ?)")
            .bind(id)
            .bind(email)
            .bind(display_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
