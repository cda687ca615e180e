use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use village_schema::AmbientEvent;
use village_sim::queue::{ChannelQueue, RenderQueue, SqliteJobQueue};
use village_sim::store::{self, SqliteStore};
use village_sim::{Engine, EngineSettings, WorldConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless village simulation server", long_about = None)]
struct Args {
    /// SQLite database holding the world state (overrides DATABASE_PATH)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Durable render job queue; jobs are logged and dropped when unset
    /// (overrides QUEUE_PATH)
    #[arg(long)]
    queue: Option<PathBuf>,

    /// RNG seed (overrides SIM_SEED)
    #[arg(long)]
    seed: Option<u64>,

    /// Wall-clock milliseconds per tick, also the sim-time step (overrides SIM_TICK_MS)
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Stop after this many ticks instead of running forever
    #[arg(long)]
    ticks: Option<u64>,

    /// JSON array of ambient events to import before the loop starts
    #[arg(long = "import-ambient")]
    import_ambient: Option<PathBuf>,
}

impl Args {
    fn apply(&self, mut settings: EngineSettings) -> EngineSettings {
        if let Some(path) = &self.database {
            settings.database_path = path.clone();
        }
        if let Some(path) = &self.queue {
            settings.queue_path = Some(path.clone());
        }
        if let Some(seed) = self.seed {
            settings.seed = seed;
        }
        if let Some(tick_ms) = self.tick_ms {
            settings.tick_ms = tick_ms;
        }
        settings.sanitized()
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let settings = args.apply(EngineSettings::from_env());
    let world = WorldConfig::from_env();

    let store = SqliteStore::open(&settings.database_path).with_context(|| {
        format!(
            "Failed to open database at {}",
            settings.database_path.display()
        )
    })?;
    if let Some(path) = &args.import_ambient {
        import_ambient_events(&store, path)?;
    }

    let queue: Box<dyn RenderQueue> = match &settings.queue_path {
        Some(path) => Box::new(
            SqliteJobQueue::open(path)
                .with_context(|| format!("Failed to open job queue at {}", path.display()))?,
        ),
        None => Box::new(spawn_log_sink()),
    };

    info!(
        database = %settings.database_path.display(),
        seed = settings.seed,
        tick_ms = settings.tick_ms,
        "Village server ready"
    );

    let mut engine = Engine::new(settings, world, store, queue)?;
    engine.bootstrap()?;
    engine.run(args.ticks);
    Ok(())
}

fn import_ambient_events(store: &SqliteStore, path: &Path) -> Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read ambient events at {}", path.display()))?;
    let events: Vec<AmbientEvent> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse ambient events at {}", path.display()))?;
    let mut imported = 0usize;
    for event in events {
        if store::insert_ambient_event(store.conn(), &event.normalized())? {
            imported += 1;
        }
    }
    info!(
        target: "village::ambient",
        path = %path.display(),
        imported,
        "ambient.imported"
    );
    Ok(())
}

/// In-process queue whose jobs are consumed by a logging thread.
fn spawn_log_sink() -> ChannelQueue {
    let queue = ChannelQueue::new();
    let receiver = queue.receiver();
    thread::spawn(move || {
        for job in receiver.iter() {
            match serde_json::to_string(&job.prompt_context) {
                Ok(context) => info!(
                    target: "village::render",
                    channel = %job.channel,
                    author = %job.author_id,
                    source_event_id = %job.source_event_id,
                    %context,
                    "render_job.received"
                ),
                Err(err) => warn!(
                    target: "village::render",
                    source_event_id = %job.source_event_id,
                    error = %err,
                    "render_job.unreadable"
                ),
            }
        }
    });
    queue
}
