//! Render job queues.
//!
//! The engine only needs [`RenderQueue::push`]. [`ChannelQueue`] hands jobs to
//! an in-process consumer; [`SqliteJobQueue`] is a durable FIFO that an
//! out-of-process content generator drains with `claim_next` and
//! `mark_done` / `mark_failed`.

use std::path::Path;

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use village_schema::RenderJob;

use crate::store::{to_ms, StoreError};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("render queue is disconnected")]
    Disconnected,
    #[error("render queue storage error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to encode render job: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for QueueError {
    fn from(err: rusqlite::Error) -> Self {
        QueueError::Store(StoreError::from(err))
    }
}

pub trait RenderQueue {
    fn push(&mut self, job: &RenderJob) -> Result<(), QueueError>;
}

impl<Q: RenderQueue + ?Sized> RenderQueue for Box<Q> {
    fn push(&mut self, job: &RenderJob) -> Result<(), QueueError> {
        (**self).push(job)
    }
}

/// Unbounded in-process FIFO.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    sender: Sender<RenderJob>,
    receiver: Receiver<RenderJob>,
}

impl Default for ChannelQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Consumer handle; clones share the same FIFO.
    pub fn receiver(&self) -> Receiver<RenderJob> {
        self.receiver.clone()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Removes and returns every queued job in FIFO order.
    pub fn drain(&self) -> Vec<RenderJob> {
        let mut jobs = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(job) => jobs.push(job),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        jobs
    }
}

impl RenderQueue for ChannelQueue {
    fn push(&mut self, job: &RenderJob) -> Result<(), QueueError> {
        self.sender
            .send(job.clone())
            .map_err(|_| QueueError::Disconnected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    pub seq: i64,
    pub job: RenderJob,
}

/// Durable FIFO over a `render_jobs` table.
#[derive(Debug)]
pub struct SqliteJobQueue {
    conn: Connection,
}

impl SqliteJobQueue {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_millis(250))?;
        let queue = Self { conn };
        queue.migrate()?;
        Ok(queue)
    }

    pub fn open_in_memory() -> Result<Self, QueueError> {
        let queue = Self {
            conn: Connection::open_in_memory()?,
        };
        queue.migrate()?;
        Ok(queue)
    }

    fn migrate(&self) -> Result<(), QueueError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS render_jobs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                channel TEXT NOT NULL,
                author_id TEXT NOT NULL,
                source_event_id TEXT NOT NULL,
                job TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                error TEXT,
                enqueued_ms INTEGER NOT NULL,
                updated_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_render_jobs_status ON render_jobs(status, seq);
            ",
        )?;
        Ok(())
    }

    /// Oldest queued job, marked as processing.
    pub fn claim_next(&mut self) -> Result<Option<ClaimedJob>, QueueError> {
        let tx = self.conn.transaction()?;
        let row: Option<(i64, String)> = tx
            .query_row(
                "SELECT seq, job FROM render_jobs WHERE status = ?1 ORDER BY seq ASC LIMIT 1",
                params![JobStatus::Queued.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((seq, raw)) = row else {
            return Ok(None);
        };
        tx.execute(
            "UPDATE render_jobs SET status = ?2, updated_ms = ?3 WHERE seq = ?1",
            params![seq, JobStatus::Processing.as_str(), to_ms(Utc::now())],
        )?;
        tx.commit()?;
        Ok(Some(ClaimedJob {
            seq,
            job: serde_json::from_str(&raw)?,
        }))
    }

    pub fn mark_done(&mut self, seq: i64) -> Result<(), QueueError> {
        self.set_status(seq, JobStatus::Done, None)
    }

    pub fn mark_failed(&mut self, seq: i64, error: &str) -> Result<(), QueueError> {
        self.set_status(seq, JobStatus::Failed, Some(error))
    }

    pub fn status(&self, seq: i64) -> Result<Option<JobStatus>, QueueError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM render_jobs WHERE seq = ?1",
                params![seq],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.as_deref().and_then(JobStatus::parse))
    }

    pub fn queued_len(&self) -> Result<u64, QueueError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM render_jobs WHERE status = ?1",
            params![JobStatus::Queued.as_str()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    fn set_status(
        &mut self,
        seq: i64,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), QueueError> {
        self.conn.execute(
            "UPDATE render_jobs SET status = ?2, error = ?3, updated_ms = ?4 WHERE seq = ?1",
            params![seq, status.as_str(), error, to_ms(Utc::now())],
        )?;
        Ok(())
    }

    fn enqueue_at(&mut self, job: &RenderJob, at: DateTime<Utc>) -> Result<(), QueueError> {
        self.conn.execute(
            "INSERT INTO render_jobs
                (channel, author_id, source_event_id, job, status, enqueued_ms, updated_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                job.channel.as_str(),
                job.author_id,
                job.source_event_id,
                serde_json::to_string(job)?,
                JobStatus::Queued.as_str(),
                to_ms(at),
            ],
        )?;
        Ok(())
    }
}

impl RenderQueue for SqliteJobQueue {
    fn push(&mut self, job: &RenderJob) -> Result<(), QueueError> {
        self.enqueue_at(job, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use village_schema::{Channel, Event, JsonMap, PromptContext};

    fn job(source: &str, channel: Channel) -> RenderJob {
        let sim_time = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        RenderJob {
            channel,
            author_id: "npc_a".into(),
            source_event_id: source.into(),
            prompt_context: PromptContext {
                event: Event {
                    id: source.into(),
                    sim_time,
                    place_id: None,
                    kind: "SMALL_TALK".into(),
                    actors: vec!["npc_a".into()],
                    targets: Vec::new(),
                    publicness: 0.5,
                    severity: 0.0,
                    payload: JsonMap::new(),
                },
                impact: 0.7,
                sim_time,
                summary: "SMALL_TALK at unknown".into(),
                draft: None,
                ambient_topic: None,
                ambient_payload: None,
            },
        }
    }

    #[test]
    fn channel_queue_is_fifo() {
        let mut queue = ChannelQueue::new();
        queue.push(&job("evt_1", Channel::Feed)).unwrap();
        queue.push(&job("evt_2", Channel::Chat)).unwrap();
        assert_eq!(queue.len(), 2);
        let drained: Vec<String> = queue
            .drain()
            .into_iter()
            .map(|j| j.source_event_id)
            .collect();
        assert_eq!(drained, vec!["evt_1", "evt_2"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn boxed_queue_forwards() {
        let inner = ChannelQueue::new();
        let mut boxed: Box<dyn RenderQueue> = Box::new(inner.clone());
        boxed.push(&job("evt_1", Channel::News)).unwrap();
        assert_eq!(inner.receiver().try_recv().unwrap().channel, Channel::News);
    }

    #[test]
    fn sqlite_queue_claims_in_order() {
        let mut queue = SqliteJobQueue::open_in_memory().unwrap();
        queue.push(&job("evt_1", Channel::Feed)).unwrap();
        queue.push(&job("evt_2", Channel::Chat)).unwrap();
        assert_eq!(queue.queued_len().unwrap(), 2);

        let first = queue.claim_next().unwrap().expect("first job");
        assert_eq!(first.job, job("evt_1", Channel::Feed));
        assert_eq!(queue.status(first.seq).unwrap(), Some(JobStatus::Processing));
        queue.mark_done(first.seq).unwrap();
        assert_eq!(queue.status(first.seq).unwrap(), Some(JobStatus::Done));

        let second = queue.claim_next().unwrap().expect("second job");
        assert_eq!(second.job.source_event_id, "evt_2");
        queue.mark_failed(second.seq, "generator offline").unwrap();
        assert_eq!(queue.status(second.seq).unwrap(), Some(JobStatus::Failed));

        assert!(queue.claim_next().unwrap().is_none());
        assert_eq!(queue.queued_len().unwrap(), 0);
    }
}
