use chrono::{TimeZone, Utc};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use village_schema::{AmbientEvent, JsonMap};
use village_sim::store::{self, SqliteStore};
use village_sim::{ChannelQueue, Engine, EngineSettings, WorldConfig};

fn engine() -> Engine<ChannelQueue> {
    let settings = EngineSettings {
        start_time: Some(Utc.with_ymd_and_hms(2024, 6, 2, 6, 0, 0).unwrap()),
        ..EngineSettings::default()
    };
    let mut engine = Engine::new(
        settings,
        WorldConfig::builtin(),
        SqliteStore::open_in_memory().unwrap(),
        ChannelQueue::new(),
    )
    .unwrap();
    engine.bootstrap().unwrap();
    engine
}

fn bench_ticks(c: &mut Criterion) {
    let mut group = c.benchmark_group("ticks");

    for ticks in [10u64, 100, 300] {
        group.bench_with_input(BenchmarkId::new("run", ticks), &ticks, |b, &ticks| {
            b.iter_batched(
                engine,
                |mut engine| {
                    engine.run_ticks(ticks);
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_ambient(c: &mut Criterion) {
    let mut group = c.benchmark_group("ambient");

    for batch in [1usize, 10] {
        group.bench_with_input(BenchmarkId::new("fan_out", batch), &batch, |b, &batch| {
            b.iter_batched(
                || {
                    let engine = engine();
                    let created_at = Utc.with_ymd_and_hms(2024, 6, 1, 5, 0, 0).unwrap();
                    for n in 0..batch {
                        let ambient = AmbientEvent {
                            id: format!("amb_bench_{n}"),
                            sim_date: created_at.date_naive(),
                            kind: "weather".into(),
                            topic: "weather_rain".into(),
                            intensity: 0.6,
                            sentiment: -0.2,
                            confidence: 1.0,
                            expires_at: None,
                            created_at,
                            payload: JsonMap::new(),
                        };
                        store::insert_ambient_event(engine.store().conn(), &ambient).unwrap();
                    }
                    engine
                },
                |mut engine| {
                    engine.run_ticks(30);
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(tick_benches, bench_ticks, bench_ambient);
criterion_main!(tick_benches);
