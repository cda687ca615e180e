//! The tick loop.
//!
//! One tick runs at a time. Each event is inserted, applied and scored in a
//! single transaction; its render jobs are pushed only after that
//! transaction commits. Every `ambient.every_ticks` ticks the ambient
//! distributor runs over the pending ambient records.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use village_schema::Event;

use crate::ambient::{AmbientDistributor, DistributionReport};
use crate::appraisal::{load_appraisal_table_from_env, AppraisalTable};
use crate::catalog::{load_catalog_from_env, Catalog, EventTypeDef};
use crate::cooldown::{CooldownLedger, CooldownPolicy};
use crate::dispatch::{DispatchReport, Dispatcher};
use crate::effects::{apply_effects, EffectSummary};
use crate::impact::ImpactScorer;
use crate::metrics::EngineMetrics;
use crate::queue::RenderQueue;
use crate::routine::{load_routine_templates_from_env, RoutineGenerator, RoutineTemplates};
use crate::settings::EngineSettings;
use crate::store::{self, SqliteStore, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Store(err) => err.is_transient(),
        }
    }
}

/// Read-only world definition shared by every component.
#[derive(Debug, Clone)]
pub struct WorldConfig {
    pub catalog: Arc<Catalog>,
    pub appraisal: Arc<AppraisalTable>,
    pub routines: Arc<RoutineTemplates>,
}

impl WorldConfig {
    pub fn builtin() -> Self {
        Self {
            catalog: Catalog::builtin(),
            appraisal: AppraisalTable::builtin(),
            routines: RoutineTemplates::builtin(),
        }
    }

    pub fn from_env() -> Self {
        let (catalog, _) = load_catalog_from_env();
        let (appraisal, _) = load_appraisal_table_from_env();
        let (routines, _) = load_routine_templates_from_env();
        Self {
            catalog,
            appraisal,
            routines,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProcessOutcome {
    Inserted {
        impact: f64,
        effects: EffectSummary,
        dispatched: DispatchReport,
    },
    Duplicate,
}

impl ProcessOutcome {
    pub fn impact(&self) -> Option<f64> {
        match self {
            ProcessOutcome::Inserted { impact, .. } => Some(*impact),
            ProcessOutcome::Duplicate => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub sim_time: DateTime<Utc>,
    pub routine_event: Option<String>,
    pub outcome: Option<ProcessOutcome>,
    pub ambient: Option<DistributionReport>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapReport {
    pub catalog_seeded: bool,
    pub seed_events_injected: usize,
    pub resume_tick: u64,
    pub replayed_routine_events: usize,
    pub sim_time: DateTime<Utc>,
}

pub struct Engine<Q: RenderQueue> {
    settings: EngineSettings,
    catalog: Arc<Catalog>,
    store: SqliteStore,
    queue: Q,
    scorer: ImpactScorer,
    dispatcher: Dispatcher,
    routine: RoutineGenerator,
    ambient: AmbientDistributor,
    rng: ChaCha8Rng,
    tick: u64,
    sim_time: DateTime<Utc>,
    metrics: EngineMetrics,
}

impl<Q: RenderQueue> Engine<Q> {
    /// Wires the components; persisted cooldowns are restored from `store`.
    pub fn new(
        settings: EngineSettings,
        world: WorldConfig,
        store: SqliteStore,
        queue: Q,
    ) -> Result<Self, EngineError> {
        let settings = settings.sanitized();
        let cooldowns = CooldownLedger::restore(store.conn(), CooldownPolicy::default())?;
        let WorldConfig {
            catalog,
            appraisal,
            routines,
        } = world;

        Ok(Self {
            scorer: ImpactScorer::new(Arc::clone(&catalog)),
            dispatcher: Dispatcher::new(settings.thresholds, settings.news_author_id.clone()),
            routine: RoutineGenerator::new(Arc::clone(&catalog), routines),
            ambient: AmbientDistributor::new(
                Arc::clone(&catalog),
                appraisal,
                settings.ambient,
                cooldowns,
            ),
            rng: ChaCha8Rng::seed_from_u64(settings.seed),
            tick: 1,
            sim_time: settings.start_time.unwrap_or_else(Utc::now),
            metrics: EngineMetrics::default(),
            catalog,
            store,
            queue,
            settings,
        })
    }

    /// Startup sequence: seed the catalog and the day-one events into an
    /// empty store, then recover the clock and the RNG position.
    pub fn bootstrap(&mut self) -> Result<BootstrapReport, EngineError> {
        let catalog_seeded = self.seed_catalog_if_empty()?;
        let seed_events_injected = self.inject_seed_events()?;
        let replayed_routine_events = self.recover_clock()?;
        tracing::info!(
            target: "village::engine",
            sim_time = %self.sim_time.to_rfc3339(),
            seed = self.settings.seed,
            tick_ms = self.settings.tick_ms,
            resume_tick = self.tick,
            replayed_routine_events,
            "clock.started"
        );
        Ok(BootstrapReport {
            catalog_seeded,
            seed_events_injected,
            resume_tick: self.tick,
            replayed_routine_events,
            sim_time: self.sim_time,
        })
    }

    pub fn seed_catalog_if_empty(&mut self) -> Result<bool, EngineError> {
        if store::entity_count(self.store.conn())? > 0 {
            return Ok(false);
        }
        let catalog = Arc::clone(&self.catalog);
        let tx = self.store.transaction()?;
        for place in catalog.places() {
            store::insert_place(&tx, place)?;
        }
        let mut goals = 0usize;
        for actor in catalog.actors() {
            store::insert_actor(&tx, actor)?;
            for goal in &actor.goals_seed {
                store::insert_goal(&tx, &actor.id, goal)?;
                goals += 1;
            }
        }
        let mut edges = 0usize;
        for seed in catalog.relationship_seeds() {
            if seed.is_broadcast() {
                continue;
            }
            if store::insert_relationship_seed(&tx, seed)? {
                edges += 1;
            }
        }
        tx.commit().map_err(StoreError::from)?;
        tracing::info!(
            target: "village::engine",
            actors = catalog.actors().len(),
            places = catalog.places().len(),
            edges,
            goals,
            "catalog.seeded"
        );
        Ok(true)
    }

    /// Runs the day-one scenario through the normal pipeline, but only into
    /// a store that holds no events yet.
    pub fn inject_seed_events(&mut self) -> Result<usize, EngineError> {
        if store::event_count(self.store.conn())? > 0 {
            tracing::info!(target: "village::engine", "seed_events.skipped=events_present");
            return Ok(0);
        }
        let mut injected = 0;
        for event in self.catalog.seed_events() {
            if let ProcessOutcome::Inserted { impact, .. } = self.process_event(&event)? {
                injected += 1;
                tracing::info!(
                    target: "village::engine",
                    event_id = %event.id,
                    kind = %event.kind,
                    impact,
                    "seed_event.injected"
                );
            }
        }
        Ok(injected)
    }

    /// Restores tick and sim time from the latest routine event and
    /// fast-forwards the RNG to the resume tick. Without routine events the
    /// clock starts at tick 1 after the latest non-ambient event. Returns the
    /// number of replayed routine events.
    pub fn recover_clock(&mut self) -> Result<usize, EngineError> {
        let conn = self.store.conn();
        let (tick, sim_time) = match store::latest_routine_event(conn)? {
            Some((tick, at)) => (tick + 1, at + self.tick_step()),
            None => match store::latest_event_time(conn)? {
                Some(latest) => (1, latest + self.tick_step()),
                None => (1, self.settings.start_time.unwrap_or_else(Utc::now)),
            },
        };
        self.tick = tick;
        self.sim_time = sim_time;
        self.rng = ChaCha8Rng::seed_from_u64(self.settings.seed);
        Ok(self.routine.fast_forward(self.tick, &mut self.rng))
    }

    /// Inserts, applies and scores `event` as one unit (retried on transient
    /// store errors), then dispatches it.
    pub fn process_event(&mut self, event: &Event) -> Result<ProcessOutcome, EngineError> {
        let event = event.clone().normalized();
        let catalog = Arc::clone(&self.catalog);
        let def = catalog.event_type(&event.kind);
        if def.is_none() {
            tracing::debug!(
                target: "village::engine",
                event_id = %event.id,
                kind = %event.kind,
                "event_type.unknown"
            );
        }

        let attempts = self.settings.event_retry_attempts.max(1);
        let mut attempt = 1;
        let committed = loop {
            match self.commit_event(&event, def) {
                Ok(result) => break result,
                Err(err) if err.is_transient() && attempt < attempts => {
                    self.metrics.event_retries += 1;
                    tracing::warn!(
                        target: "village::engine",
                        event_id = %event.id,
                        attempt,
                        error = %err,
                        "event.retry"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        };

        let Some((impact, effects)) = committed else {
            self.metrics.duplicate_events += 1;
            tracing::debug!(target: "village::engine", event_id = %event.id, "event.duplicate");
            return Ok(ProcessOutcome::Duplicate);
        };

        self.metrics.events_inserted += 1;
        let dispatched =
            self.dispatcher
                .dispatch(&mut self.queue, &event, event.sim_time, impact, def);
        self.metrics.record_dispatch(dispatched);
        Ok(ProcessOutcome::Inserted {
            impact,
            effects,
            dispatched,
        })
    }

    fn commit_event(
        &mut self,
        event: &Event,
        def: Option<&EventTypeDef>,
    ) -> Result<Option<(f64, EffectSummary)>, StoreError> {
        let tx = self.store.transaction()?;
        if !store::insert_event(&tx, event)? {
            return Ok(None);
        }
        let effects = apply_effects(&tx, event, event.sim_time, def)?;
        let impact = self.scorer.score(&tx, event, event.sim_time, def)?;
        tx.commit()?;
        Ok(Some((impact, effects)))
    }

    pub fn tick_once(&mut self) -> TickReport {
        let tick = self.tick;
        let now = self.sim_time;
        let mut report = TickReport {
            tick,
            sim_time: now,
            routine_event: None,
            outcome: None,
            ambient: None,
        };

        if tick > 0 {
            if let Some(event) = self.routine.maybe_generate(tick, now, &mut self.rng) {
                report.routine_event = Some(event.id.clone());
                match self.process_event(&event) {
                    Ok(outcome) => {
                        if let Some(impact) = outcome.impact() {
                            tracing::info!(
                                target: "village::engine",
                                event_id = %event.id,
                                kind = %event.kind,
                                impact,
                                "routine_event.injected"
                            );
                        }
                        report.outcome = Some(outcome);
                    }
                    Err(err) => {
                        self.metrics.failed_events += 1;
                        tracing::warn!(
                            target: "village::engine",
                            event_id = %event.id,
                            error = %err,
                            "routine_event.failed"
                        );
                    }
                }
            }
        }

        if tick > 0 && tick % self.settings.ambient.every_ticks == 0 {
            match self.ambient.distribute(&mut self.store, &mut self.queue, now) {
                Ok(distribution) => {
                    self.metrics.record_distribution(distribution);
                    report.ambient = Some(distribution);
                }
                Err(StoreError::MissingTable(table)) => {
                    tracing::info!(
                        target: "village::ambient",
                        %table,
                        "ambient.skipped=missing_table"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        target: "village::ambient",
                        error = %err,
                        "ambient.failed"
                    );
                }
            }
        }

        self.metrics.ticks += 1;
        if tick % self.settings.heartbeat_ticks == 0 {
            self.metrics.log_heartbeat(tick, now);
        }

        self.tick += 1;
        self.sim_time = now + self.tick_step();
        report
    }

    /// Runs `ticks` ticks back to back without sleeping.
    pub fn run_ticks(&mut self, ticks: u64) -> Vec<TickReport> {
        (0..ticks).map(|_| self.tick_once()).collect()
    }

    /// Runs the paced loop: one tick per `tick_ms` of wall time, forever or
    /// until `max_ticks` ticks have run.
    pub fn run(&mut self, max_ticks: Option<u64>) {
        let ticker = crossbeam_channel::tick(std::time::Duration::from_millis(self.settings.tick_ms));
        let mut remaining = max_ticks;
        while remaining != Some(0) {
            self.tick_once();
            remaining = remaining.map(|n| n - 1);
            if remaining == Some(0) || ticker.recv().is_err() {
                break;
            }
        }
        tracing::info!(
            target: "village::engine",
            tick = self.tick,
            sim_time = %self.sim_time.to_rfc3339(),
            "engine.stopped"
        );
    }

    fn tick_step(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.settings.tick_ms).unwrap_or(i64::MAX).max(1))
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn sim_time(&self) -> DateTime<Utc> {
        self.sim_time
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SqliteStore {
        &mut self.store
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut Q {
        &mut self.queue
    }

    pub fn cooldowns(&self) -> &CooldownLedger {
        self.ambient.cooldowns()
    }

    /// Hands back the store and queue, e.g. to restart on the same state.
    pub fn into_parts(self) -> (SqliteStore, Q) {
        (self.store, self.queue)
    }
}
