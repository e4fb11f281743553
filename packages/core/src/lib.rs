//! Notification dispatch and matching engine for the LostPaws platform.
//!
//! The crate is organised around one dispatcher and three background
//! engines:
//!
//! - [`dispatch`]: preference-aware multi-channel delivery (push, email,
//!   in-app), immediate or scheduled, single or batched.
//! - [`matching`]: pairs lost and found reports by feature-vector
//!   similarity and manages the match lifecycle.
//! - [`geofence`]: proximity alerts for reports inside a user's watch
//!   area.
//! - [`reminder`]: elapsed-time search reminders for unresolved reports.
//!
//! [`scheduler`] drives the engines on intervals; [`repository`] is the
//! single persistence layer underneath all of them.

pub mod api;
pub mod cache;
pub mod channels;
pub mod cli;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod geo;
pub mod geofence;
pub mod logging;
pub mod matching;
pub mod metrics;
pub mod prefs;
pub mod reminder;
pub mod repository;
pub mod scheduler;
pub mod stats;
pub mod types;

pub use error::{ChannelError, CoreError};
