mod common;

use village_schema::Event;
use village_sim::store::{self, SqliteStore};
use village_sim::{ChannelQueue, Engine, TickReport, WorldConfig};

fn routine_events(engine: &Engine<ChannelQueue>, reports: &[TickReport]) -> Vec<(u64, Event)> {
    reports
        .iter()
        .filter_map(|report| {
            let id = report.routine_event.as_ref()?;
            let event = store::load_event(engine.store().conn(), id)
                .expect("load")
                .expect("routine event stored");
            Some((report.tick, event))
        })
        .collect()
}

fn run_with_seed(seed: u64, ticks: u64) -> Vec<(u64, Event)> {
    let mut settings = common::settings();
    settings.seed = seed;
    let mut engine = Engine::new(
        settings,
        WorldConfig::builtin(),
        SqliteStore::open_in_memory().expect("store"),
        ChannelQueue::new(),
    )
    .expect("engine");
    engine.bootstrap().expect("bootstrap");
    let reports = engine.run_ticks(ticks);
    routine_events(&engine, &reports)
}

#[test]
fn same_seed_produces_same_routine_events() {
    let first = run_with_seed(1337, 200);
    let second = run_with_seed(1337, 200);
    assert_eq!(first.len(), 20);
    assert_eq!(first, second);
}

#[test]
fn different_seeds_diverge() {
    let first = run_with_seed(1337, 300);
    let other = run_with_seed(7, 300);
    let payloads = |events: &[(u64, Event)]| -> Vec<_> {
        events
            .iter()
            .map(|(_, event)| (event.kind.clone(), event.place_id.clone(), event.payload.clone()))
            .collect()
    };
    assert_ne!(payloads(&first), payloads(&other));
}

#[test]
fn resumed_run_matches_uninterrupted_run() {
    let mut uninterrupted = common::builtin_engine();
    let reports = uninterrupted.run_ticks(130);
    let expected: Vec<(u64, Event)> = routine_events(&uninterrupted, &reports)
        .into_iter()
        .filter(|(tick, _)| *tick > 60)
        .collect();

    let mut first_half = common::builtin_engine();
    first_half.run_ticks(65);
    let (store, _) = first_half.into_parts();

    let mut resumed = common::engine_with(WorldConfig::builtin(), store);
    let bootstrap = resumed.bootstrap().expect("bootstrap");
    assert!(!bootstrap.catalog_seeded);
    assert_eq!(bootstrap.seed_events_injected, 0);
    assert_eq!(bootstrap.resume_tick, 61);
    assert_eq!(bootstrap.replayed_routine_events, 6);

    let reports = resumed.run_ticks(70);
    let actual = routine_events(&resumed, &reports);

    assert_eq!(actual.len(), 7);
    assert_eq!(actual, expected);
}
