//! SQLite pool creation and schema migration.
//!
//! `create_pool` connects (creating the database file if missing), then
//! applies the idempotent schema. The duplicate guards the engines rely on
//! are declared here as unique constraints: one match per ordered pet pair,
//! one active geofence per pet, and one reminder per (user, pet, offset).

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Connect to `url` and apply the schema.
///
/// In-memory databases are pinned to a single connection: every pooled
/// connection would otherwise see its own empty database.
pub async fn create_pool(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

    let in_memory = url.contains(":memory:");
    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        // An in-memory database lives and dies with its connection.
        .min_connections(if in_memory { 1 } else { 0 })
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Apply the schema. Safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            priority TEXT NOT NULL,
            data TEXT NOT NULL DEFAULT '{}',
            action_url TEXT,
            image_url TEXT,
            push_enabled INTEGER NOT NULL DEFAULT 0,
            push_sent INTEGER NOT NULL DEFAULT 0,
            push_sent_at TEXT,
            email_enabled INTEGER NOT NULL DEFAULT 0,
            email_sent INTEGER NOT NULL DEFAULT 0,
            email_sent_at TEXT,
            in_app_enabled INTEGER NOT NULL DEFAULT 0,
            in_app_sent INTEGER NOT NULL DEFAULT 0,
            in_app_sent_at TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            scheduled_at TEXT,
            sent_at TEXT,
            read_at TEXT,
            expires_at TEXT,
            pet_id TEXT,
            reminder_offset INTEGER,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    // One reminder per (user, type, pet, offset). Partial index so ordinary
    // notifications are unconstrained.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_notifications_reminder_tag
         ON notifications (user_id, kind, pet_id, reminder_offset)
         WHERE reminder_offset IS NOT NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_notifications_user_created
         ON notifications (user_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_notifications_status_scheduled
         ON notifications (status, scheduled_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS notification_preferences (
            user_id TEXT PRIMARY KEY,
            push_enabled INTEGER NOT NULL DEFAULT 1,
            email_enabled INTEGER NOT NULL DEFAULT 1,
            quiet_enabled INTEGER NOT NULL DEFAULT 0,
            quiet_start TEXT NOT NULL DEFAULT '22:00',
            quiet_end TEXT NOT NULL DEFAULT '08:00',
            quiet_utc_offset TEXT NOT NULL DEFAULT '+00:00',
            frequency TEXT NOT NULL DEFAULT 'instant',
            type_channels TEXT NOT NULL DEFAULT '{}',
            fcm_tokens TEXT NOT NULL DEFAULT '[]',
            apns_tokens TEXT NOT NULL DEFAULT '[]',
            updated_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS matches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            lost_pet_id TEXT NOT NULL,
            found_pet_id TEXT NOT NULL,
            similarity REAL NOT NULL,
            confidence TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            notes TEXT,
            confirmed_by TEXT,
            confirmed_at TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (lost_pet_id, found_pet_id)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS geofences (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pet_id TEXT NOT NULL UNIQUE,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            longitude REAL NOT NULL,
            latitude REAL NOT NULL,
            radius_km REAL NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    // Pets and users are owned by the surrounding platform; the engines
    // read them and the tests seed them.
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS pets (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            feature_vector TEXT,
            longitude REAL,
            latitude REAL,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT,
            display_name TEXT NOT NULL DEFAULT ''
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}
