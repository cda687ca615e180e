//! Forwards committed events to the render queue, one job per default
//! channel whose threshold the impact reaches.

use chrono::{DateTime, Utc};
use village_schema::{Channel, Event, PromptContext, RenderJob};

use crate::catalog::EventTypeDef;
use crate::queue::RenderQueue;
use crate::settings::ChannelThresholds;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub enqueued: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    thresholds: ChannelThresholds,
    news_author_id: String,
}

impl Dispatcher {
    pub fn new(thresholds: ChannelThresholds, news_author_id: impl Into<String>) -> Self {
        Self {
            thresholds,
            news_author_id: news_author_id.into(),
        }
    }

    pub fn author_for(&self, event: &Event, channel: Channel) -> String {
        match (channel, event.primary_actor()) {
            (Channel::News, _) | (_, None) => self.news_author_id.clone(),
            (_, Some(actor)) => actor.to_string(),
        }
    }

    pub fn plan(
        &self,
        event: &Event,
        sim_time: DateTime<Utc>,
        impact: f64,
        def: Option<&EventTypeDef>,
    ) -> Vec<RenderJob> {
        let Some(def) = def else {
            return Vec::new();
        };
        def.default_channels()
            .iter()
            .copied()
            .filter(|channel| impact >= self.thresholds.for_channel(*channel))
            .map(|channel| RenderJob {
                channel,
                author_id: self.author_for(event, channel),
                source_event_id: event.id.clone(),
                prompt_context: PromptContext {
                    event: event.clone(),
                    impact,
                    sim_time,
                    summary: format!("{} at {}", event.kind, event.place_label()),
                    draft: None,
                    ambient_topic: None,
                    ambient_payload: None,
                },
            })
            .collect()
    }

    /// Pushes the planned jobs. Must only be called after the event's
    /// transaction committed.
    pub fn dispatch<Q>(
        &self,
        queue: &mut Q,
        event: &Event,
        sim_time: DateTime<Utc>,
        impact: f64,
        def: Option<&EventTypeDef>,
    ) -> DispatchReport
    where
        Q: RenderQueue + ?Sized,
    {
        let mut report = DispatchReport::default();
        for job in self.plan(event, sim_time, impact, def) {
            match queue.push(&job) {
                Ok(()) => {
                    report.enqueued += 1;
                    tracing::debug!(
                        target: "village::engine",
                        event_id = %event.id,
                        channel = %job.channel,
                        author = %job.author_id,
                        impact,
                        "render_job.enqueued"
                    );
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        target: "village::engine",
                        event_id = %event.id,
                        channel = %job.channel,
                        error = %err,
                        "render_job.enqueue_failed"
                    );
                }
            }
        }
        report
    }
}
