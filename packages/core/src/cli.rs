//! Command-line overrides over the environment configuration.

use clap::Parser;

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(
    name = "lostpaws-notifier",
    about = "Notification dispatch and matching engine for the LostPaws platform"
)]
pub struct Cli {
    /// SQLite database URL (overrides DATABASE_URL).
    #[arg(long)]
    pub database_url: Option<String>,

    /// Push gateway base URL (overrides PUSH_GATEWAY_URL).
    #[arg(long)]
    pub push_gateway_url: Option<String>,

    /// Email gateway base URL (overrides EMAIL_GATEWAY_URL).
    #[arg(long)]
    pub email_gateway_url: Option<String>,

    /// HTTP bind address for the health and metrics endpoints.
    #[arg(long)]
    pub bind_address: Option<String>,

    /// Seconds between scheduled-notification promotion ticks.
    #[arg(long)]
    pub promote_interval_secs: Option<u64>,
}

impl Cli {
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(url) = &self.database_url {
            config.database_url = url.clone();
        }
        if let Some(url) = &self.push_gateway_url {
            config.push_gateway_url = url.clone();
        }
        if let Some(url) = &self.email_gateway_url {
            config.email_gateway_url = url.clone();
        }
        if let Some(addr) = &self.bind_address {
            config.bind_address = addr.clone();
        }
        if let Some(secs) = self.promote_interval_secs {
            config.promote_interval_secs = secs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".into(),
            push_gateway_url: "http://push".into(),
            push_gateway_api_key: None,
            email_gateway_url: "http://email".into(),
            bind_address: "0.0.0.0:8080".into(),
            promote_interval_secs: 60,
            expire_interval_secs: 3600,
            matching_interval_secs: 900,
            geofence_interval_secs: 900,
            reminder_interval_secs: 3600,
        }
    }

    #[test]
    fn flags_override_only_what_was_given() {
        let cli = Cli::parse_from([
            "lostpaws-notifier",
            "--bind-address",
            "127.0.0.1:9999",
            "--promote-interval-secs",
            "5",
        ]);
        let mut config = base_config();
        cli.apply_to(&mut config);

        assert_eq!(config.bind_address, "127.0.0.1:9999");
        assert_eq!(config.promote_interval_secs, 5);
        assert_eq!(config.database_url, "sqlite::memory:");
    }
}
