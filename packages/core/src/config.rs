//! Environment-driven configuration.

use std::env;
use std::time::Duration;

use crate::scheduler::SchedulerIntervals;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub push_gateway_url: String,
    pub push_gateway_api_key: Option<String>,
    pub email_gateway_url: String,
    pub bind_address: String,
    pub promote_interval_secs: u64,
    pub expire_interval_secs: u64,
    pub matching_interval_secs: u64,
    pub geofence_interval_secs: u64,
    pub reminder_interval_secs: u64,
}

fn required(name: &str) -> Result<String, String> {
    env::var(name).map_err(|_| format!("{} must be set", name))
}

fn optional_u64(name: &str, default: u64) -> Result<u64, String> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| format!("{} must be a positive integer, got '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            push_gateway_url: required("PUSH_GATEWAY_URL")?,
            push_gateway_api_key: env::var("PUSH_GATEWAY_API_KEY").ok(),
            email_gateway_url: required("EMAIL_GATEWAY_URL")?,
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            promote_interval_secs: optional_u64("PROMOTE_INTERVAL_SECS", 60)?,
            expire_interval_secs: optional_u64("EXPIRE_INTERVAL_SECS", 3600)?,
            matching_interval_secs: optional_u64("MATCHING_INTERVAL_SECS", 900)?,
            geofence_interval_secs: optional_u64("GEOFENCE_INTERVAL_SECS", 900)?,
            reminder_interval_secs: optional_u64("REMINDER_INTERVAL_SECS", 3600)?,
        })
    }

    pub fn intervals(&self) -> SchedulerIntervals {
        SchedulerIntervals {
            promote: Duration::from_secs(self.promote_interval_secs),
            expire: Duration::from_secs(self.expire_interval_secs),
            matching: Duration::from_secs(self.matching_interval_secs),
            geofence: Duration::from_secs(self.geofence_interval_secs),
            reminder: Duration::from_secs(self.reminder_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_variable_is_an_error() {
        // Runs in-process: pick a name no other test sets.
        std::env::remove_var("DATABASE_URL_FOR_THIS_TEST");
        assert!(required("DATABASE_URL_FOR_THIS_TEST").is_err());
    }

    #[test]
    fn optional_u64_falls_back_and_validates() {
        std::env::remove_var("SOME_UNSET_INTERVAL");
        assert_eq!(optional_u64("SOME_UNSET_INTERVAL", 42).unwrap(), 42);

        std::env::set_var("SOME_BAD_INTERVAL", "not-a-number");
        assert!(optional_u64("SOME_BAD_INTERVAL", 42).is_err());
        std::env::remove_var("SOME_BAD_INTERVAL");
    }
}
