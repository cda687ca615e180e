mod common;

use chrono::Duration;
use village_sim::queue::{JobStatus, SqliteJobQueue};
use village_sim::store::{self, SqliteStore};
use village_sim::{Engine, ProcessOutcome, WorldConfig};
use village_schema::{Channel, Event, JsonMap};

#[test]
fn cooldowns_and_clock_survive_a_restart() {
    let mut engine = common::engine_with(
        common::synthetic_world(50),
        SqliteStore::open_in_memory().expect("store"),
    );
    engine.bootstrap().expect("bootstrap");
    store::insert_ambient_event(
        engine.store().conn(),
        &common::ambient("amb_sun", "weather_sunny", 0.7),
    )
    .unwrap();
    engine.run_ticks(45);
    let posted = engine.cooldowns().len();
    let sim_time = engine.sim_time();
    let (store, queue) = engine.into_parts();
    drop(queue);

    let mut restarted = common::engine_with(common::synthetic_world(50), store);
    assert_eq!(restarted.cooldowns().len(), posted);
    let report = restarted.bootstrap().expect("bootstrap");
    assert!(!report.catalog_seeded);
    assert_eq!(report.resume_tick, 41);
    // Tick 40 produced the latest event; the clock resumes one step later.
    assert_eq!(report.sim_time, sim_time - Duration::seconds(5));
}

#[test]
fn missing_ambient_table_does_not_stop_the_loop() {
    let mut engine = common::builtin_engine();
    engine
        .store()
        .conn()
        .execute_batch("DROP TABLE ambient_events")
        .unwrap();

    let reports = engine.run_ticks(60);
    assert_eq!(reports.len(), 60);
    assert!(reports.iter().all(|report| report.ambient.is_none()));
    assert_eq!(
        reports.iter().filter(|r| r.routine_event.is_some()).count(),
        6
    );
    assert_eq!(engine.metrics().failed_events, 0);
}

#[test]
fn durable_queue_receives_committed_jobs() {
    let mut engine = Engine::new(
        common::settings(),
        WorldConfig::builtin(),
        SqliteStore::open_in_memory().expect("store"),
        SqliteJobQueue::open_in_memory().expect("queue"),
    )
    .expect("engine");

    let argument = Event {
        id: "evt_dock_row".into(),
        sim_time: common::start_time(),
        place_id: Some("place_boat_dock".into()),
        kind: "ARGUMENT".into(),
        actors: vec!["npc_elsa".into()],
        targets: vec!["npc_bertil".into()],
        publicness: 1.0,
        severity: 1.0,
        payload: JsonMap::new(),
    };
    let outcome = engine.process_event(&argument).expect("process");
    let ProcessOutcome::Inserted { dispatched, .. } = outcome else {
        panic!("expected insert");
    };
    assert!(dispatched.enqueued >= 2);

    let queue = engine.queue_mut();
    assert_eq!(queue.queued_len().unwrap(), dispatched.enqueued as u64);
    let claimed = queue.claim_next().unwrap().expect("job");
    assert_eq!(claimed.job.channel, Channel::Feed);
    assert_eq!(claimed.job.author_id, "npc_elsa");
    assert_eq!(claimed.job.source_event_id, "evt_dock_row");
    assert_eq!(queue.status(claimed.seq).unwrap(), Some(JobStatus::Processing));

    queue.mark_done(claimed.seq).unwrap();
    assert_eq!(queue.status(claimed.seq).unwrap(), Some(JobStatus::Done));
    assert_eq!(
        queue.queued_len().unwrap(),
        dispatched.enqueued as u64 - 1
    );
}
