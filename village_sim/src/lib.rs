//! Village social simulation engine.
//!
//! Events flow through a single pipeline per tick: they are stored once,
//! applied to memories and relationships, scored for impact, and forwarded
//! to the render queue on every channel whose threshold they clear. Ambient
//! world events are fanned out to the villagers on a slower cadence.

pub mod ambient;
pub mod appraisal;
pub mod catalog;
pub mod config;
pub mod cooldown;
pub mod dispatch;
pub mod effects;
pub mod engine;
pub mod hashing;
pub mod impact;
pub mod metrics;
pub mod queue;
pub mod routine;
pub mod seed_time;
pub mod settings;
pub mod store;

pub use ambient::{AmbientDistributor, DistributionReport};
pub use appraisal::{Appraisal, AppraisalTable};
pub use catalog::{Catalog, CatalogError, EventTypeDef, ImpactWeights};
pub use config::ConfigMetadata;
pub use cooldown::{CooldownLedger, CooldownPolicy};
pub use dispatch::{DispatchReport, Dispatcher};
pub use effects::{apply_effects, EffectSummary};
pub use engine::{
    BootstrapReport, Engine, EngineError, ProcessOutcome, TickReport, WorldConfig,
};
pub use impact::{ImpactBreakdown, ImpactScorer};
pub use metrics::EngineMetrics;
pub use queue::{ChannelQueue, QueueError, RenderQueue, SqliteJobQueue};
pub use routine::{RoutineGenerator, RoutineTemplates};
pub use settings::{AmbientSettings, ChannelThresholds, EngineSettings};
pub use store::{SqliteStore, StoreError};
