//! Upload progress tracking and subscriber fan-out
//!
//! One in-memory job per upload id. Updates are totally ordered per job
//! (every mutation happens under the job's map entry) and fan out to
//! subscribers over bounded channels; a subscriber that cannot keep up is
//! dropped so the pipeline never blocks on delivery. Terminal jobs linger
//! for a TTL so late clients can read the outcome, then evict.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, ProgressErrorKind, Result};

/// Per-subscriber queue depth before the subscriber is considered slow
const SUBSCRIBER_QUEUE: usize = 64;

/// Upload lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Received,
    Extracting,
    Chunking,
    Enriching,
    Indexing,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Extracting => "extracting",
            Self::Chunking => "chunking",
            Self::Enriching => "enriching",
            Self::Indexing => "indexing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One progress frame, as serialized onto the WebSocket
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub upload_id: Uuid,
    pub status: UploadStatus,
    pub progress_percent: u8,
    pub current_chunk: usize,
    pub total_chunks: usize,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Partial update applied by the pipeline
#[derive(Debug, Default)]
pub struct ProgressUpdate {
    pub status: Option<UploadStatus>,
    pub current_chunk: Option<usize>,
    pub total_chunks: Option<usize>,
    pub message: Option<String>,
    /// Explicit percent; recomputed from chunk counts when absent
    pub progress_percent: Option<u8>,
}

struct UploadJob {
    status: UploadStatus,
    current_chunk: usize,
    total_chunks: usize,
    progress_percent: u8,
    message: String,
    last_update: DateTime<Utc>,
    result: Option<Value>,
    error: Option<String>,
    subscribers: Vec<mpsc::Sender<ProgressEvent>>,
}

impl UploadJob {
    fn event(&self, upload_id: Uuid) -> ProgressEvent {
        ProgressEvent {
            upload_id,
            status: self.status,
            progress_percent: self.progress_percent,
            current_chunk: self.current_chunk,
            total_chunks: self.total_chunks,
            message: self.message.clone(),
            timestamp: self.last_update,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }

    fn fan_out(&mut self, event: &ProgressEvent) {
        self.subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    upload_id = %event.upload_id,
                    reason = ProgressErrorKind::Slow.as_str(),
                    "dropping slow progress subscriber"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

/// In-memory map of upload jobs with subscriber fan-out.
pub struct ProgressTracker {
    jobs: Arc<DashMap<Uuid, UploadJob>>,
    /// Ids that finished and were evicted; distinguishes Evicted from Unknown
    evicted: Arc<DashMap<Uuid, DateTime<Utc>>>,
    ttl: Duration,
}

impl ProgressTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            evicted: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Register a new upload in state `received`.
    pub fn create(&self, upload_id: Uuid) -> Result<()> {
        let now = Utc::now();
        let job = UploadJob {
            status: UploadStatus::Received,
            current_chunk: 0,
            total_chunks: 0,
            progress_percent: 0,
            message: "Upload received".to_string(),
            last_update: now,
            result: None,
            error: None,
            subscribers: Vec::new(),
        };
        match self.jobs.entry(upload_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::internal(format!(
                "upload {upload_id} already exists"
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(job);
                Ok(())
            }
        }
    }

    /// Apply a partial update and deliver the event to subscribers.
    /// Rejected once the job is terminal; percent never goes backwards.
    pub fn update(&self, upload_id: Uuid, update: ProgressUpdate) -> Result<ProgressEvent> {
        let mut entry = self
            .jobs
            .get_mut(&upload_id)
            .ok_or_else(|| self.unknown(upload_id))?;
        let job = entry.value_mut();
        if job.status.is_terminal() {
            return Err(Error::internal(format!(
                "upload {upload_id} already reached a terminal state"
            )));
        }

        if let Some(status) = update.status {
            job.status = status;
        }
        if let Some(total) = update.total_chunks {
            job.total_chunks = total;
        }
        if let Some(current) = update.current_chunk {
            job.current_chunk = current;
        }
        let computed = update.progress_percent.unwrap_or_else(|| {
            if job.total_chunks == 0 {
                job.progress_percent
            } else {
                ((job.current_chunk * 100) / job.total_chunks).min(100) as u8
            }
        });
        job.progress_percent = job.progress_percent.max(computed);
        if let Some(message) = update.message {
            job.message = message;
        } else {
            job.message = format!(
                "Processing chunk {}/{}",
                job.current_chunk, job.total_chunks
            );
        }
        job.last_update = Utc::now();

        let event = job.event(upload_id);
        job.fan_out(&event);
        Ok(event)
    }

    /// Atomic transition to `completed`/`failed`, final delivery, and TTL
    /// eviction. Subscribers are released after the final event.
    pub fn finish(
        &self,
        upload_id: Uuid,
        status: UploadStatus,
        message: impl Into<String>,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<ProgressEvent> {
        debug_assert!(status.is_terminal());
        let event = {
            let mut entry = self
                .jobs
                .get_mut(&upload_id)
                .ok_or_else(|| self.unknown(upload_id))?;
            let job = entry.value_mut();
            if job.status.is_terminal() {
                return Err(Error::internal(format!(
                    "upload {upload_id} already reached a terminal state"
                )));
            }

            job.status = status;
            if status == UploadStatus::Completed {
                job.progress_percent = 100;
                job.current_chunk = job.total_chunks;
            }
            job.message = message.into();
            job.result = result;
            job.error = error;
            job.last_update = Utc::now();

            let event = job.event(upload_id);
            job.fan_out(&event);
            // Closing the channels tells subscribers the stream is over.
            job.subscribers.clear();
            event
        };

        let jobs = Arc::clone(&self.jobs);
        let evicted = Arc::clone(&self.evicted);
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            jobs.remove(&upload_id);
            evicted.insert(upload_id, Utc::now());
        });

        Ok(event)
    }

    /// Subscribe to a job's event stream. The latest known state is
    /// replayed immediately; a terminal job yields that single frame and
    /// then closes.
    pub fn subscribe(&self, upload_id: Uuid) -> Result<mpsc::Receiver<ProgressEvent>> {
        let mut entry = self
            .jobs
            .get_mut(&upload_id)
            .ok_or_else(|| self.unknown(upload_id))?;
        let job = entry.value_mut();

        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let snapshot = job.event(upload_id);
        // Capacity is fresh; the snapshot cannot fail to enqueue.
        let _ = tx.try_send(snapshot);
        if !job.status.is_terminal() {
            job.subscribers.push(tx);
        }
        Ok(rx)
    }

    /// Current state of a job, for the polling endpoint.
    pub fn snapshot(&self, upload_id: Uuid) -> Result<ProgressEvent> {
        self.jobs
            .get(&upload_id)
            .map(|job| job.event(upload_id))
            .ok_or_else(|| self.unknown(upload_id))
    }

    /// Number of uploads that have not reached a terminal state.
    pub fn active_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|entry| !entry.value().status.is_terminal())
            .count()
    }

    fn unknown(&self, upload_id: Uuid) -> Error {
        if self.evicted.contains_key(&upload_id) {
            Error::progress(
                ProgressErrorKind::Evicted,
                format!("upload {upload_id} expired"),
            )
        } else {
            Error::progress(
                ProgressErrorKind::Unknown,
                format!("unknown upload id {upload_id}"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ProgressTracker {
        ProgressTracker::new(Duration::from_secs(300))
    }

    fn drain(rx: &mut mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn subscribers_see_updates_in_issue_order() {
        let tracker = tracker();
        let id = Uuid::new_v4();
        tracker.create(id).unwrap();
        let mut rx = tracker.subscribe(id).unwrap();

        for (i, status) in [UploadStatus::Chunking, UploadStatus::Enriching, UploadStatus::Indexing]
            .into_iter()
            .enumerate()
        {
            tracker
                .update(
                    id,
                    ProgressUpdate {
                        status: Some(status),
                        current_chunk: Some(i),
                        total_chunks: Some(10),
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        tracker
            .finish(id, UploadStatus::Completed, "done", None, None)
            .unwrap();

        let events = drain(&mut rx);
        let statuses: Vec<UploadStatus> = events.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                UploadStatus::Received,
                UploadStatus::Chunking,
                UploadStatus::Enriching,
                UploadStatus::Indexing,
                UploadStatus::Completed,
            ]
        );
        // The channel closes after the terminal event.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn percent_is_monotonic_non_decreasing() {
        let tracker = tracker();
        let id = Uuid::new_v4();
        tracker.create(id).unwrap();
        let mut rx = tracker.subscribe(id).unwrap();

        tracker
            .update(
                id,
                ProgressUpdate {
                    progress_percent: Some(50),
                    ..Default::default()
                },
            )
            .unwrap();
        // A lower explicit percent must not move the job backwards.
        tracker
            .update(
                id,
                ProgressUpdate {
                    progress_percent: Some(20),
                    ..Default::default()
                },
            )
            .unwrap();

        let events = drain(&mut rx);
        let percents: Vec<u8> = events.iter().map(|e| e.progress_percent).collect();
        assert_eq!(percents, vec![0, 50, 50]);
    }

    #[tokio::test]
    async fn late_subscriber_gets_current_snapshot_then_new_events() {
        let tracker = tracker();
        let id = Uuid::new_v4();
        tracker.create(id).unwrap();
        tracker
            .update(
                id,
                ProgressUpdate {
                    status: Some(UploadStatus::Enriching),
                    current_chunk: Some(4),
                    total_chunks: Some(8),
                    ..Default::default()
                },
            )
            .unwrap();

        let mut rx = tracker.subscribe(id).unwrap();
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.status, UploadStatus::Enriching);
        assert_eq!(snapshot.current_chunk, 4);

        tracker
            .update(
                id,
                ProgressUpdate {
                    current_chunk: Some(5),
                    ..Default::default()
                },
            )
            .unwrap();
        let next = rx.recv().await.unwrap();
        assert_eq!(next.current_chunk, 5);
    }

    #[tokio::test]
    async fn subscribing_to_finished_job_yields_terminal_frame_and_closes() {
        let tracker = tracker();
        let id = Uuid::new_v4();
        tracker.create(id).unwrap();
        tracker
            .finish(id, UploadStatus::Failed, "boom", None, Some("boom".to_string()))
            .unwrap();

        let mut rx = tracker.subscribe(id).unwrap();
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.status, UploadStatus::Failed);
        assert_eq!(frame.error.as_deref(), Some("boom"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_jobs_are_evicted_after_the_ttl() {
        let tracker = ProgressTracker::new(Duration::from_secs(300));
        let id = Uuid::new_v4();
        tracker.create(id).unwrap();
        tracker
            .finish(id, UploadStatus::Completed, "done", None, None)
            .unwrap();

        // Still visible within the TTL.
        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(tracker.snapshot(id).is_ok());

        tokio::time::sleep(Duration::from_secs(2)).await;
        // Let the eviction task run.
        tokio::task::yield_now().await;
        match tracker.subscribe(id) {
            Err(Error::Progress { kind, .. }) => assert_eq!(kind, ProgressErrorKind::Evicted),
            other => panic!("expected eviction, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_id_is_distinguished_from_evicted() {
        let tracker = tracker();
        match tracker.subscribe(Uuid::nil()) {
            Err(Error::Progress { kind, .. }) => assert_eq!(kind, ProgressErrorKind::Unknown),
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_updates_after_terminal() {
        let tracker = tracker();
        let id = Uuid::new_v4();
        tracker.create(id).unwrap();
        tracker
            .finish(id, UploadStatus::Completed, "done", None, None)
            .unwrap();
        assert!(tracker
            .update(id, ProgressUpdate::default())
            .is_err());
        assert!(tracker
            .finish(id, UploadStatus::Failed, "again", None, None)
            .is_err());
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_without_blocking() {
        let tracker = tracker();
        let id = Uuid::new_v4();
        tracker.create(id).unwrap();
        let mut rx = tracker.subscribe(id).unwrap();

        // Overflow the bounded queue without draining it.
        for i in 0..(SUBSCRIBER_QUEUE + 16) {
            tracker
                .update(
                    id,
                    ProgressUpdate {
                        current_chunk: Some(i),
                        total_chunks: Some(SUBSCRIBER_QUEUE + 16),
                        ..Default::default()
                    },
                )
                .unwrap();
        }

        // The subscriber got a prefix of the log, then was cut off.
        let events = drain(&mut rx);
        assert!(events.len() <= SUBSCRIBER_QUEUE + 1);
        assert!(rx.recv().await.is_none());

        // The job itself is unaffected.
        assert!(tracker.snapshot(id).is_ok());
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let tracker = tracker();
        let id = Uuid::new_v4();
        tracker.create(id).unwrap();
        assert!(tracker.create(id).is_err());
    }
}
