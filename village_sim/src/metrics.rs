use chrono::{DateTime, Utc};

use crate::ambient::DistributionReport;
use crate::dispatch::DispatchReport;

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct EngineMetrics {
    pub ticks: u64,
    pub events_inserted: u64,
    pub duplicate_events: u64,
    pub failed_events: u64,
    pub event_retries: u64,
    pub render_jobs: u64,
    pub render_job_failures: u64,
    pub ambient_cycles: u64,
    pub ambient_deliveries: u64,
    pub ambient_seen: u64,
    pub reactions: u64,
    pub cooldown_skips: u64,
}

impl EngineMetrics {
    pub fn record_dispatch(&mut self, report: DispatchReport) {
        self.render_jobs += report.enqueued as u64;
        self.render_job_failures += report.failed as u64;
    }

    pub fn record_distribution(&mut self, report: DistributionReport) {
        self.ambient_cycles += 1;
        self.ambient_deliveries += report.deliveries as u64;
        self.ambient_seen += report.visible as u64;
        self.reactions += report.reactions as u64;
        self.cooldown_skips += report.cooldown_skips as u64;
        self.render_job_failures += report.queue_failures as u64;
    }

    pub fn log_heartbeat(&self, tick: u64, sim_time: DateTime<Utc>) {
        tracing::info!(
            target: "village::engine",
            tick,
            sim_time = %sim_time.to_rfc3339(),
            ticks = self.ticks,
            events_inserted = self.events_inserted,
            duplicate_events = self.duplicate_events,
            failed_events = self.failed_events,
            event_retries = self.event_retries,
            render_jobs = self.render_jobs,
            ambient_deliveries = self.ambient_deliveries,
            reactions = self.reactions,
            cooldown_skips = self.cooldown_skips,
            "engine.heartbeat"
        );
    }
}
