#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use village_schema::{AmbientEvent, JsonMap};
use village_sim::store::SqliteStore;
use village_sim::{
    AppraisalTable, Catalog, ChannelQueue, Engine, EngineSettings, RoutineTemplates, WorldConfig,
};

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 2, 6, 0, 0).unwrap()
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        start_time: Some(start_time()),
        ..EngineSettings::default()
    }
}

pub fn engine_with(world: WorldConfig, store: SqliteStore) -> Engine<ChannelQueue> {
    Engine::new(settings(), world, store, ChannelQueue::new()).expect("engine")
}

/// Builtin world on a fresh in-memory store, bootstrapped.
pub fn builtin_engine() -> Engine<ChannelQueue> {
    let mut engine = engine_with(
        WorldConfig::builtin(),
        SqliteStore::open_in_memory().expect("store"),
    );
    engine.bootstrap().expect("bootstrap");
    engine
}

/// A world with `actors` archetype-less villagers, one cafe, and a single
/// event type `X` that raises trust by five.
pub fn synthetic_world(actors: usize) -> WorldConfig {
    let profiles: Vec<_> = (0..actors)
        .map(|n| json!({ "id": format!("npc_{n:04}"), "name": format!("Villager {n}") }))
        .collect();
    let catalog = json!({
        "places": [{ "id": "place_cafe", "name": "Cafe", "type": "cafe" }],
        "npc_profiles": profiles,
        "event_types": {
            "items": [{
                "type": "X",
                "effects": { "relationship_deltas": [{ "trust": 5 }] },
                "render": { "default_channels": ["FEED"] }
            }]
        }
    });
    WorldConfig {
        catalog: Arc::new(Catalog::from_json_str(&catalog.to_string()).expect("catalog")),
        appraisal: AppraisalTable::builtin(),
        routines: RoutineTemplates::builtin(),
    }
}

pub fn ambient(id: &str, topic: &str, intensity: f64) -> AmbientEvent {
    let created_at = Utc.with_ymd_and_hms(2024, 6, 1, 5, 0, 0).unwrap();
    AmbientEvent {
        id: id.to_string(),
        sim_date: created_at.date_naive(),
        kind: "weather".into(),
        topic: topic.to_string(),
        intensity,
        sentiment: 0.0,
        confidence: 1.0,
        expires_at: None,
        created_at,
        payload: JsonMap::new(),
    }
}
