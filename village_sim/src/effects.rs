//! State changes caused by an event: memories for everyone involved and
//! relationship deltas from each actor towards each target.
//!
//! Runs inside the event's insert transaction; any error aborts the unit.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use village_schema::Event;

use crate::catalog::{EffectRule, EventTypeDef, RelationshipDelta};
use crate::store::{self, MemoryRecord, ScoreIncrements, StoreError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectSummary {
    pub memories: usize,
    pub edges_updated: usize,
}

pub fn memory_summary(event: &Event) -> String {
    format!("{} @ {}", event.kind, event.place_label())
}

pub fn apply_effects(
    conn: &Connection,
    event: &Event,
    now: DateTime<Utc>,
    def: Option<&EventTypeDef>,
) -> Result<EffectSummary, StoreError> {
    let Some(rule) = def.and_then(|def| def.effects.as_ref()) else {
        return Ok(EffectSummary::default());
    };

    let mut summary = EffectSummary::default();
    let text = memory_summary(event);
    let importance = rule.memory_importance();
    for actor_id in event.involved() {
        store::insert_memory(
            conn,
            &MemoryRecord {
                actor_id: actor_id.to_string(),
                event_id: event.id.clone(),
                importance,
                summary: text.clone(),
                created_at: now,
            },
        )?;
        summary.memories += 1;
    }

    if rule.relationship_deltas.is_empty() || event.actors.is_empty() || event.targets.is_empty() {
        return Ok(summary);
    }

    let increments = total_increments(rule);
    for actor in &event.actors {
        for target in &event.targets {
            if actor == target {
                continue;
            }
            store::ensure_relationship(conn, actor, target)?;
            let mut grievances = store::load_relationship(conn, actor, target)?
                .map(|edge| edge.grievances)
                .unwrap_or_default();
            apply_grievances(&mut grievances, &rule.relationship_deltas);
            store::update_relationship(conn, actor, target, increments, &grievances, now)?;
            summary.edges_updated += 1;
        }
    }
    Ok(summary)
}

fn total_increments(rule: &EffectRule) -> ScoreIncrements {
    rule.relationship_deltas
        .iter()
        .fold(ScoreIncrements::default(), |acc, delta| ScoreIncrements {
            trust: acc.trust + delta.trust,
            respect: acc.respect + delta.respect,
            affection: acc.affection + delta.affection,
            jealousy: acc.jealousy + delta.jealousy,
            fear: acc.fear + delta.fear,
        })
}

/// Deltas apply in order: append the grievance, then soften pops the newest.
fn apply_grievances(grievances: &mut Vec<String>, deltas: &[RelationshipDelta]) {
    for delta in deltas {
        if let Some(grievance) = delta.grievance.as_deref().filter(|g| !g.is_empty()) {
            grievances.push(grievance.to_string());
        }
        if delta.grievance_soften {
            grievances.pop();
        }
    }
}
