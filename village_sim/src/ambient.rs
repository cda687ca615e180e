//! Ambient fan-out: decides, once per (ambient event, actor) pair, whether the
//! actor noticed the fact, records what they saw and queues their reaction.
//!
//! Each pair is its own atomic step. A crash mid-batch leaves the decided
//! pairs recorded and the rest pending, so the next cycle resumes without
//! re-deciding anything.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use village_schema::{
    clamp01, AmbientEvent, Event, JsonMap, PromptContext, RenderJob, AMBIENT_SEEN_EVENT_PREFIX,
    AMBIENT_SEEN_EVENT_TYPE,
};

use crate::appraisal::AppraisalTable;
use crate::catalog::{ActorProfile, Catalog};
use crate::cooldown::CooldownLedger;
use crate::hashing::is_visible;
use crate::queue::RenderQueue;
use crate::settings::AmbientSettings;
use crate::store::{self, SqliteStore, StoreError};

pub const SEEN_SEVERITY_FACTOR: f64 = 0.3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributionReport {
    pub ambient_events: usize,
    pub deliveries: usize,
    pub visible: usize,
    pub already_delivered: usize,
    pub reactions: usize,
    pub ignored: usize,
    pub cooldown_skips: usize,
    pub queue_failures: usize,
}

pub fn seen_event_id(ambient_id: &str, actor_id: &str) -> String {
    format!("{AMBIENT_SEEN_EVENT_PREFIX}{ambient_id}_{actor_id}")
}

/// Internal event recording that `actor_id` noticed `ambient`.
pub fn seen_event(ambient: &AmbientEvent, actor_id: &str, now: DateTime<Utc>) -> Event {
    let mut payload = JsonMap::new();
    payload.insert("ambient_event_id".into(), Value::from(ambient.id.as_str()));
    payload.insert("topic".into(), Value::from(ambient.topic.as_str()));
    payload.insert("intensity".into(), Value::from(ambient.intensity));
    payload.insert("sentiment".into(), Value::from(ambient.sentiment));
    payload.insert("summary".into(), Value::from(ambient.summary()));
    payload.insert("facts".into(), ambient.facts());
    Event {
        id: seen_event_id(&ambient.id, actor_id),
        sim_time: now,
        place_id: None,
        kind: AMBIENT_SEEN_EVENT_TYPE.to_string(),
        actors: vec![actor_id.to_string()],
        targets: Vec::new(),
        publicness: 0.0,
        severity: clamp01(ambient.intensity * SEEN_SEVERITY_FACTOR),
        payload,
    }
}

#[derive(Debug)]
pub struct AmbientDistributor {
    catalog: Arc<Catalog>,
    appraisal: Arc<AppraisalTable>,
    settings: AmbientSettings,
    cooldowns: CooldownLedger,
}

impl AmbientDistributor {
    pub fn new(
        catalog: Arc<Catalog>,
        appraisal: Arc<AppraisalTable>,
        settings: AmbientSettings,
        cooldowns: CooldownLedger,
    ) -> Self {
        Self {
            catalog,
            appraisal,
            settings,
            cooldowns,
        }
    }

    pub fn settings(&self) -> AmbientSettings {
        self.settings
    }

    pub fn cooldowns(&self) -> &CooldownLedger {
        &self.cooldowns
    }

    /// Runs one distribution cycle over the oldest pending ambient events.
    pub fn distribute<Q>(
        &mut self,
        store: &mut SqliteStore,
        queue: &mut Q,
        now: DateTime<Utc>,
    ) -> Result<DistributionReport, StoreError>
    where
        Q: RenderQueue + ?Sized,
    {
        let mut report = DistributionReport::default();
        let catalog = Arc::clone(&self.catalog);
        let actors = catalog.actors();
        if actors.is_empty() {
            return Ok(report);
        }

        let roster: Vec<&str> = actors.iter().map(|actor| actor.id.as_str()).collect();
        let pending =
            store::pending_ambient_events(store.conn(), now, &roster, self.settings.batch_size)?;
        for ambient in &pending {
            report.ambient_events += 1;
            for actor in actors {
                self.deliver(store, queue, ambient, actor, now, &mut report)?;
            }
        }

        if report.ambient_events > 0 {
            tracing::info!(
                target: "village::ambient",
                ambient_events = report.ambient_events,
                deliveries = report.deliveries,
                visible = report.visible,
                reactions = report.reactions,
                cooldown_skips = report.cooldown_skips,
                "ambient.distributed"
            );
        }
        Ok(report)
    }

    fn deliver<Q>(
        &mut self,
        store: &mut SqliteStore,
        queue: &mut Q,
        ambient: &AmbientEvent,
        actor: &ActorProfile,
        now: DateTime<Utc>,
        report: &mut DistributionReport,
    ) -> Result<(), StoreError>
    where
        Q: RenderQueue + ?Sized,
    {
        if store::delivery_exists(store.conn(), &ambient.id, &actor.id)? {
            report.already_delivered += 1;
            return Ok(());
        }

        if !is_visible(&ambient.id, &actor.id, self.settings.visibility_pct) {
            store::record_delivery(store.conn(), &ambient.id, &actor.id, now)?;
            report.deliveries += 1;
            return Ok(());
        }

        let seen = seen_event(ambient, &actor.id, now);
        let tx = store.transaction()?;
        store::insert_event(&tx, &seen)?;
        store::record_delivery(&tx, &ambient.id, &actor.id, now)?;
        tx.commit()?;
        report.deliveries += 1;
        report.visible += 1;

        let appraisal = self
            .appraisal
            .appraise_actor(&ambient.topic, &actor.archetypes);
        let Some((channel, draft)) = appraisal.reaction() else {
            report.ignored += 1;
            return Ok(());
        };

        if !self.cooldowns.is_clear(&actor.id, channel, now) {
            report.cooldown_skips += 1;
            tracing::debug!(
                target: "village::ambient",
                actor = %actor.id,
                %channel,
                ambient = %ambient.id,
                "reaction.skipped=cooldown"
            );
            return Ok(());
        }

        let job = RenderJob {
            channel,
            author_id: actor.id.clone(),
            source_event_id: seen.id.clone(),
            prompt_context: PromptContext {
                summary: format!("Reaction to {}: {}", ambient.topic, ambient.summary()),
                impact: ambient.intensity,
                sim_time: now,
                draft: Some(draft.to_string()),
                ambient_topic: Some(ambient.topic.clone()),
                ambient_payload: Some(ambient.payload.clone()),
                event: seen,
            },
        };
        if let Err(err) = queue.push(&job) {
            report.queue_failures += 1;
            tracing::warn!(
                target: "village::ambient",
                actor = %actor.id,
                ambient = %ambient.id,
                error = %err,
                "reaction.enqueue_failed"
            );
            return Ok(());
        }
        report.reactions += 1;
        tracing::debug!(
            target: "village::ambient",
            actor = %actor.id,
            %channel,
            topic = %ambient.topic,
            "reaction.enqueued"
        );

        if let Err(err) = self.cooldowns.commit(store.conn(), &actor.id, channel, now) {
            tracing::warn!(
                target: "village::ambient",
                actor = %actor.id,
                %channel,
                error = %err,
                "cooldown.persist_failed"
            );
        }
        Ok(())
    }
}
