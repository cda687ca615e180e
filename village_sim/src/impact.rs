//! Impact scoring.
//!
//! An event's impact is a weighted sum of five components, each in `[0, 1]`.
//! Only novelty touches the store (one count query); the rest is computed
//! from the event, the catalog profiles and the event type's effect rule.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use village_schema::{clamp01, Event};

use crate::catalog::{Catalog, EventTypeDef, ImpactWeights};
use crate::store::{self, StoreError};

pub const NOVELTY_WINDOW_HOURS: i64 = 24;
pub const DEFAULT_STATUS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpactBreakdown {
    pub novelty: f64,
    pub conflict: f64,
    pub publicness: f64,
    pub status_of_people: f64,
    pub cascade_potential: f64,
}

impl ImpactBreakdown {
    pub fn combine(&self, weights: &ImpactWeights) -> f64 {
        clamp01(
            weights.novelty * self.novelty
                + weights.conflict * self.conflict
                + weights.publicness * self.publicness
                + weights.status_of_people * self.status_of_people
                + weights.cascade_potential * self.cascade_potential,
        )
    }
}

/// Spread potential from the type's declared effects; zero without a rule.
pub fn cascade_potential(event: &Event, def: Option<&EventTypeDef>) -> f64 {
    let Some(rule) = def.and_then(|def| def.effects.as_ref()) else {
        return 0.0;
    };
    let severity = clamp01(event.severity);
    let reputation = clamp01(rule.reputation_delta.abs() * 5.0);
    clamp01(
        0.2 * severity
            + 0.15 * rule.relationship_deltas.len() as f64
            + 0.1 * reputation
            + 0.05 * event.targets.len() as f64,
    )
}

#[derive(Debug, Clone)]
pub struct ImpactScorer {
    catalog: Arc<Catalog>,
    weights: ImpactWeights,
}

impl ImpactScorer {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        let weights = catalog.impact_weights();
        Self { catalog, weights }
    }

    pub fn weights(&self) -> ImpactWeights {
        self.weights
    }

    /// Mean catalog status of the involved actors, `0.5` when none declares one.
    pub fn status_of_people(&self, event: &Event) -> f64 {
        let statuses: Vec<f64> = event
            .involved()
            .into_iter()
            .filter_map(|id| self.catalog.actor(id))
            .filter_map(|actor| actor.status())
            .collect();
        if statuses.is_empty() {
            return DEFAULT_STATUS;
        }
        clamp01(statuses.iter().sum::<f64>() / statuses.len() as f64)
    }

    pub fn breakdown(
        &self,
        conn: &Connection,
        event: &Event,
        now: DateTime<Utc>,
        def: Option<&EventTypeDef>,
    ) -> Result<ImpactBreakdown, StoreError> {
        let recent = store::count_events_of_type_between(
            conn,
            &event.kind,
            now - Duration::hours(NOVELTY_WINDOW_HOURS),
            now,
        )?;
        Ok(ImpactBreakdown {
            novelty: clamp01(1.0 / (1.0 + recent as f64)),
            conflict: clamp01(event.severity),
            publicness: clamp01(event.publicness),
            status_of_people: self.status_of_people(event),
            cascade_potential: cascade_potential(event, def),
        })
    }

    pub fn score(
        &self,
        conn: &Connection,
        event: &Event,
        now: DateTime<Utc>,
        def: Option<&EventTypeDef>,
    ) -> Result<f64, StoreError> {
        Ok(self.breakdown(conn, event, now, def)?.combine(&self.weights))
    }
}
