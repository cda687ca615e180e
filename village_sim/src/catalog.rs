//! Static world catalog: places, actors, relationship seeds, event type
//! definitions, impact weights and the day-one seed scenario.
//!
//! Loaded once at startup and shared read-only as an `Arc<Catalog>`.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use village_schema::{clamp01, Channel, Event, JsonMap};

use crate::config::{load_with_env_path, ConfigMetadata};
use crate::hashing::content_id;
use crate::seed_time::normalize_seed_timestamp;

pub const BUILTIN_CATALOG: &str = include_str!("data/catalog.json");

/// Relationship seeds addressed to this id are broadcast markers, not edges.
pub const BROADCAST_ACTOR_ID: &str = "npc_all";

const DEFAULT_MEMORY_IMPORTANCE: f64 = 0.1;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Catalog {
    places: Vec<Place>,
    npc_profiles: Vec<ActorProfile>,
    relationship_init: RelationshipInit,
    event_types: EventTypeList,
    impact_scoring: ImpactScoringConfig,
    day1_seed_scenario: SeedScenario,
    #[serde(skip)]
    event_type_index: HashMap<String, usize>,
    #[serde(skip)]
    actor_index: HashMap<String, usize>,
}

impl Catalog {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            Catalog::from_json_str(BUILTIN_CATALOG).expect("builtin catalog should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let mut catalog: Catalog = serde_json::from_str(json)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let contents = fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    fn validate(&mut self) -> Result<(), CatalogError> {
        let mut places = HashSet::new();
        for place in &self.places {
            if !places.insert(place.id.as_str()) {
                return Err(CatalogError::Duplicate {
                    kind: "place",
                    id: place.id.clone(),
                });
            }
        }

        self.actor_index.clear();
        for (idx, actor) in self.npc_profiles.iter().enumerate() {
            if self.actor_index.insert(actor.id.clone(), idx).is_some() {
                return Err(CatalogError::Duplicate {
                    kind: "actor",
                    id: actor.id.clone(),
                });
            }
        }

        self.event_type_index.clear();
        for (idx, def) in self.event_types.items.iter().enumerate() {
            if self.event_type_index.insert(def.kind.clone(), idx).is_some() {
                return Err(CatalogError::Duplicate {
                    kind: "event type",
                    id: def.kind.clone(),
                });
            }
        }

        self.impact_scoring.weights = self.impact_scoring.weights.non_negative();
        Ok(())
    }

    pub fn places(&self) -> &[Place] {
        &self.places
    }

    /// Actors in catalog order; this order drives routine selection and
    /// ambient fan-out.
    pub fn actors(&self) -> &[ActorProfile] {
        &self.npc_profiles
    }

    pub fn actor(&self, id: &str) -> Option<&ActorProfile> {
        self.actor_index
            .get(id)
            .and_then(|idx| self.npc_profiles.get(*idx))
    }

    pub fn relationship_seeds(&self) -> &[RelationshipSeed] {
        &self.relationship_init.edges
    }

    pub fn event_types(&self) -> &[EventTypeDef] {
        &self.event_types.items
    }

    pub fn event_type(&self, kind: &str) -> Option<&EventTypeDef> {
        self.event_type_index
            .get(kind)
            .and_then(|idx| self.event_types.items.get(*idx))
    }

    pub fn impact_weights(&self) -> ImpactWeights {
        self.impact_scoring.weights
    }

    pub fn seed_scenario(&self) -> &SeedScenario {
        &self.day1_seed_scenario
    }

    /// Day-one events with normalized timestamps, in chronological order.
    ///
    /// Seeds with an unreadable timestamp are placed at midnight of the base
    /// date; ties keep authored order.
    pub fn seed_events(&self) -> Vec<Event> {
        let base = self.day1_seed_scenario.base_date;
        let mut events: Vec<Event> = self
            .day1_seed_scenario
            .events
            .iter()
            .map(|seed| seed.to_event(base))
            .collect();
        events.sort_by_key(|event| event.sim_time);
        events
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read catalog from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("duplicate {kind} id {id}")]
    Duplicate { kind: &'static str, id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub archetypes: Vec<String>,
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
    #[serde(default)]
    pub goals_seed: Vec<GoalSeed>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Starting goal of an actor, written to the `goals` table when the catalog
/// is seeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalSeed {
    #[serde(default = "default_goal_horizon")]
    pub horizon: String,
    #[serde(default = "default_goal_priority")]
    pub priority: f64,
    #[serde(default = "default_goal")]
    pub goal: Value,
}

fn default_goal_horizon() -> String {
    "short".to_string()
}

fn default_goal_priority() -> f64 {
    0.5
}

fn default_goal() -> Value {
    Value::Object(serde_json::Map::new())
}

impl ActorProfile {
    pub fn status(&self) -> Option<f64> {
        self.values.get("status").copied().filter(|v| v.is_finite())
    }

}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RelationshipInit {
    edges: Vec<RelationshipSeed>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RelationshipSeed {
    #[serde(rename = "from")]
    pub from_actor: String,
    #[serde(rename = "to")]
    pub to_actor: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub trust: i64,
    #[serde(default)]
    pub respect: i64,
    #[serde(default)]
    pub affection: i64,
    #[serde(default)]
    pub jealousy: i64,
    #[serde(default)]
    pub fear: i64,
    #[serde(default)]
    pub grievances: Vec<String>,
    #[serde(default)]
    pub debts: Vec<Value>,
}

impl RelationshipSeed {
    pub fn is_broadcast(&self) -> bool {
        self.to_actor == BROADCAST_ACTOR_ID
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct EventTypeList {
    items: Vec<EventTypeDef>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventTypeDef {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// `None` means the type declares no state effects at all.
    #[serde(default)]
    pub effects: Option<EffectRule>,
    #[serde(default)]
    pub render: RenderRule,
}

impl EventTypeDef {
    pub fn default_channels(&self) -> &[Channel] {
        &self.render.default_channels
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderRule {
    pub default_channels: Vec<Channel>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EffectRule {
    pub memory_importance_base: f64,
    pub relationship_deltas: Vec<RelationshipDelta>,
    pub reputation_delta: f64,
}

impl Default for EffectRule {
    fn default() -> Self {
        Self {
            memory_importance_base: DEFAULT_MEMORY_IMPORTANCE,
            relationship_deltas: Vec::new(),
            reputation_delta: 0.0,
        }
    }
}

impl EffectRule {
    pub fn memory_importance(&self) -> f64 {
        clamp01(self.memory_importance_base)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelationshipDelta {
    pub trust: i64,
    pub respect: i64,
    pub affection: i64,
    pub jealousy: i64,
    pub fear: i64,
    pub grievance: Option<String>,
    pub grievance_soften: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
struct ImpactScoringConfig {
    weights: ImpactWeights,
}

/// Weights of the five impact components. They need not sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactWeights {
    pub novelty: f64,
    pub conflict: f64,
    pub publicness: f64,
    pub status_of_people: f64,
    pub cascade_potential: f64,
}

impl Default for ImpactWeights {
    fn default() -> Self {
        Self {
            novelty: 0.30,
            conflict: 0.25,
            publicness: 0.20,
            status_of_people: 0.15,
            cascade_potential: 0.10,
        }
    }
}

impl ImpactWeights {
    fn non_negative(self) -> Self {
        let floor = |w: f64| if w.is_finite() { w.max(0.0) } else { 0.0 };
        Self {
            novelty: floor(self.novelty),
            conflict: floor(self.conflict),
            publicness: floor(self.publicness),
            status_of_people: floor(self.status_of_people),
            cascade_potential: floor(self.cascade_potential),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeedScenario {
    pub base_date: NaiveDate,
    pub events: Vec<SeedEvent>,
}

impl Default for SeedScenario {
    fn default() -> Self {
        Self {
            base_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap_or(NaiveDate::MIN),
            events: Vec::new(),
        }
    }
}

/// Authored day-one event. Field names tolerate the typos found in older
/// scenario files (`e` for `type`, `seveity` for `severity`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeedEvent {
    pub id: Option<String>,
    #[serde(alias = "ts")]
    pub ts_local: Option<String>,
    #[serde(rename = "type", alias = "e")]
    pub kind: String,
    pub place_id: Option<String>,
    pub actors: Vec<String>,
    pub targets: Vec<String>,
    pub publicness: f64,
    #[serde(alias = "seveity")]
    pub severity: f64,
    pub payload: JsonMap,
}

impl SeedEvent {
    pub fn sim_time(&self, base_date: NaiveDate) -> DateTime<Utc> {
        let parsed = self
            .ts_local
            .as_deref()
            .and_then(|raw| normalize_seed_timestamp(raw, base_date));
        match parsed {
            Some(ts) => ts,
            None => {
                tracing::warn!(
                    target: "village::config",
                    seed_id = self.id.as_deref().unwrap_or("-"),
                    ts_local = self.ts_local.as_deref().unwrap_or(""),
                    "seed_event.timestamp_unreadable"
                );
                base_date.and_time(NaiveTime::default()).and_utc()
            }
        }
    }

    pub fn to_event(&self, base_date: NaiveDate) -> Event {
        let sim_time = self.sim_time(base_date);
        let id = match &self.id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => self.content_addressed_id(sim_time),
        };
        Event {
            id,
            sim_time,
            place_id: self.place_id.clone(),
            kind: self.kind.clone(),
            actors: self.actors.clone(),
            targets: self.targets.clone(),
            publicness: self.publicness,
            severity: self.severity,
            payload: self.payload.clone(),
        }
        .normalized()
    }

    fn content_addressed_id(&self, sim_time: DateTime<Utc>) -> String {
        let canonical = serde_json::json!({
            "sim_time": sim_time.timestamp_millis(),
            "type": self.kind,
            "place_id": self.place_id,
            "actors": self.actors,
            "targets": self.targets,
            "payload": self.payload,
        });
        content_id("evt_seed", canonical.to_string().as_bytes())
    }
}

pub fn load_catalog_from_env() -> (Arc<Catalog>, ConfigMetadata) {
    load_with_env_path("CATALOG_PATH", "catalog", Catalog::builtin, Catalog::from_file)
}
