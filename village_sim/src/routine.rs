//! Routine event generation.
//!
//! Every `interval_ticks` ticks one actor (round-robin over the catalog)
//! performs an everyday activity. All randomness comes from the caller's RNG
//! and draws happen in a fixed order, so a run is fully determined by the
//! seed and the catalog.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use rand::{seq::SliceRandom, Rng};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use village_schema::{clamp01, Event, JsonMap, ROUTINE_EVENT_PREFIX};

use crate::catalog::{Catalog, Place};
use crate::config::{load_with_env_path, ConfigMetadata};

pub const BUILTIN_ROUTINE_TEMPLATES: &str = include_str!("data/routine_templates.json");

pub const ROUTINE_SOURCE: &str = "routine_injector";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutineTemplates {
    pub interval_ticks: u64,
    pub templates: Vec<RoutineTemplate>,
}

impl Default for RoutineTemplates {
    fn default() -> Self {
        Self {
            interval_ticks: 10,
            templates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutineTemplate {
    #[serde(rename = "type")]
    pub kind: String,
    /// Case-insensitive substrings matched against place types.
    #[serde(default)]
    pub place_types: Vec<String>,
    #[serde(default)]
    pub publicness: f64,
    #[serde(default)]
    pub severity: f64,
    #[serde(default)]
    pub payload_fields: Vec<PayloadField>,
    /// Chance that a second actor joins as the target.
    #[serde(default)]
    pub target_chance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayloadField {
    pub key: String,
    #[serde(default)]
    pub options: Vec<String>,
}

impl RoutineTemplates {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            RoutineTemplates::from_json_str(BUILTIN_ROUTINE_TEMPLATES)
                .expect("builtin routine templates should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, RoutineConfigError> {
        let templates: RoutineTemplates = serde_json::from_str(json)?;
        if templates.interval_ticks == 0 {
            return Err(RoutineConfigError::ZeroInterval);
        }
        for template in &templates.templates {
            if !(0.0..=1.0).contains(&template.target_chance) {
                return Err(RoutineConfigError::TargetChance {
                    kind: template.kind.clone(),
                    value: template.target_chance,
                });
            }
        }
        Ok(templates)
    }

    pub fn from_file(path: &Path) -> Result<Self, RoutineConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| RoutineConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }
}

#[derive(Debug, Error)]
pub enum RoutineConfigError {
    #[error("failed to parse routine templates: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read routine templates from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("routine interval must be at least one tick")]
    ZeroInterval,
    #[error("target_chance {value} of template {kind} is outside [0, 1]")]
    TargetChance { kind: String, value: f64 },
}

pub fn load_routine_templates_from_env() -> (Arc<RoutineTemplates>, ConfigMetadata) {
    load_with_env_path(
        "ROUTINE_CONFIG_PATH",
        "routine_templates",
        RoutineTemplates::builtin,
        RoutineTemplates::from_file,
    )
}

pub fn routine_event_id(tick: u64, actor_id: &str) -> String {
    format!("{ROUTINE_EVENT_PREFIX}{tick}_{actor_id}")
}

/// Tick index encoded in a routine event id, if `id` is one.
pub fn parse_routine_tick(id: &str) -> Option<u64> {
    let rest = id.strip_prefix(ROUTINE_EVENT_PREFIX)?;
    let (tick, actor) = rest.split_once('_')?;
    if actor.is_empty() {
        return None;
    }
    tick.parse().ok()
}

#[derive(Debug, Clone)]
pub struct RoutineGenerator {
    catalog: Arc<Catalog>,
    templates: Arc<RoutineTemplates>,
}

impl RoutineGenerator {
    pub fn new(catalog: Arc<Catalog>, templates: Arc<RoutineTemplates>) -> Self {
        Self { catalog, templates }
    }

    pub fn interval_ticks(&self) -> u64 {
        self.templates.interval_ticks.max(1)
    }

    pub fn maybe_generate<R: Rng + ?Sized>(
        &self,
        tick: u64,
        sim_time: DateTime<Utc>,
        rng: &mut R,
    ) -> Option<Event> {
        let interval = self.interval_ticks();
        if tick == 0 || tick % interval != 0 {
            return None;
        }
        let actors = self.catalog.actors();
        let places = self.catalog.places();
        if actors.is_empty() || places.is_empty() {
            return None;
        }

        let actor = &actors[((tick / interval) % actors.len() as u64) as usize];
        let template = self.templates.templates.choose(rng)?;
        let place = choose_place(places, &template.place_types, rng)?;

        let mut payload = JsonMap::new();
        payload.insert("source".into(), Value::from(ROUTINE_SOURCE));
        for field in &template.payload_fields {
            if let Some(option) = field.options.choose(rng) {
                payload.insert(field.key.clone(), Value::from(option.as_str()));
            }
        }
        payload.insert("tick".into(), Value::from(tick));

        let mut targets = Vec::new();
        if template.target_chance > 0.0 && rng.gen::<f64>() < template.target_chance {
            let others: Vec<&str> = actors
                .iter()
                .filter(|other| other.id != actor.id)
                .map(|other| other.id.as_str())
                .collect();
            if let Some(other) = others.choose(rng) {
                targets.push((*other).to_string());
            }
        }

        Some(
            Event {
                id: routine_event_id(tick, &actor.id),
                sim_time,
                place_id: Some(place.id.clone()),
                kind: template.kind.clone(),
                actors: vec![actor.id.clone()],
                targets,
                publicness: clamp01(template.publicness),
                severity: clamp01(template.severity),
                payload,
            }
            .normalized(),
        )
    }

    /// Advances `rng` through every draw the ticks `1..resume_tick` would have
    /// made, so a resumed run continues the same random sequence.
    pub fn fast_forward<R: Rng + ?Sized>(&self, resume_tick: u64, rng: &mut R) -> usize {
        let interval = self.interval_ticks();
        let mut replayed = 0;
        let mut tick = interval;
        while tick < resume_tick {
            if self.maybe_generate(tick, DateTime::<Utc>::default(), rng).is_some() {
                replayed += 1;
            }
            tick += interval;
        }
        replayed
    }
}

fn choose_place<'a, R: Rng + ?Sized>(
    places: &'a [Place],
    wanted: &[String],
    rng: &mut R,
) -> Option<&'a Place> {
    let matching: Vec<&Place> = places
        .iter()
        .filter(|place| {
            let kind = place.kind.to_lowercase();
            wanted
                .iter()
                .any(|needle| kind.contains(&needle.to_lowercase()))
        })
        .collect();
    if matching.is_empty() {
        places.choose(rng)
    } else {
        matching.choose(rng).copied()
    }
}
