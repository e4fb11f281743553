//! Prometheus metrics for the dispatcher and the background engines.

use prometheus::{
    CounterVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};

#[derive(Clone)]
pub struct AppMetrics {
    pub registry: Registry,

    /// Notifications dispatched, labelled by outcome (`sent` / `failed`).
    pub notifications_dispatched: IntCounterVec,
    /// Per-channel delivery failures, labelled by channel.
    pub channel_failures: IntCounterVec,
    /// Scheduled notifications promoted to dispatch.
    pub scheduled_promoted: IntCounter,
    /// Expired notifications cleaned up.
    pub notifications_expired: IntCounter,
    /// Matches created, labelled by confidence tier.
    pub matches_created: CounterVec,
    /// Proximity alerts emitted by the geofence engine.
    pub geofence_alerts: IntCounter,
    /// Search reminders emitted.
    pub reminders_sent: IntCounter,
    /// End-to-end dispatch latency in seconds.
    pub dispatch_duration: Histogram,
}

impl AppMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let notifications_dispatched = IntCounterVec::new(
            Opts::new(
                "notifications_dispatched_total",
                "Notifications dispatched, by outcome",
            ),
            &["outcome"],
        )?;
        let channel_failures = IntCounterVec::new(
            Opts::new(
                "channel_failures_total",
                "Per-channel delivery failures",
            ),
            &["channel"],
        )?;
        let scheduled_promoted = IntCounter::new(
            "scheduled_promoted_total",
            "Scheduled notifications promoted to dispatch",
        )?;
        let notifications_expired = IntCounter::new(
            "notifications_expired_total",
            "Expired notifications deleted before sending",
        )?;
        let matches_created = CounterVec::new(
            Opts::new("matches_created_total", "Matches created, by confidence"),
            &["confidence"],
        )?;
        let geofence_alerts = IntCounter::new(
            "geofence_alerts_total",
            "Proximity alerts emitted",
        )?;
        let reminders_sent = IntCounter::new(
            "reminders_sent_total",
            "Search reminders emitted",
        )?;
        let dispatch_duration = Histogram::with_opts(HistogramOpts::new(
            "dispatch_duration_seconds",
            "End-to-end notification dispatch latency",
        ))?;

        registry.register(Box::new(notifications_dispatched.clone()))?;
        registry.register(Box::new(channel_failures.clone()))?;
        registry.register(Box::new(scheduled_promoted.clone()))?;
        registry.register(Box::new(notifications_expired.clone()))?;
        registry.register(Box::new(matches_created.clone()))?;
        registry.register(Box::new(geofence_alerts.clone()))?;
        registry.register(Box::new(reminders_sent.clone()))?;
        registry.register(Box::new(dispatch_duration.clone()))?;

        Ok(Self {
            registry,
            notifications_dispatched,
            channel_failures,
            scheduled_promoted,
            notifications_expired,
            matches_created,
            geofence_alerts,
            reminders_sent,
            dispatch_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_without_collision() {
        let metrics = AppMetrics::new().unwrap();
        metrics
            .notifications_dispatched
            .with_label_values(&["sent"])
            .inc();
        metrics.channel_failures.with_label_values(&["push"]).inc();
        metrics.scheduled_promoted.inc();

        let families = metrics.registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "notifications_dispatched_total"));
    }
}
