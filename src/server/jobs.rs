use crate::protocol::SessionId;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{Mutex, watch};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("The camera is already recording")]
    Busy,

    #[error("Unknown recording session")]
    NotFound,

    #[error("The recording is still in progress")]
    StillRecording,

    #[error("Recording failed: {0}")]
    CaptureFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
enum JobPhase {
    Recording,
    Recorded(PathBuf),
    CaptureFailed(String),
}

struct Job {
    phase: JobPhase,
    recording_tx: watch::Sender<bool>,
    video_id: Option<String>,
}

#[derive(Default)]
struct Jobs {
    by_id: HashMap<SessionId, Job>,
    order: VecDeque<SessionId>,
}

/// Recording jobs known to the relay, keyed by session
///
/// Holds at most `max_jobs` entries; the oldest finished job is evicted when
/// a new one would exceed the bound, together with its clip on disk. Only one
/// job may be recording at a time since there is a single camera.
pub struct JobTable {
    jobs: Mutex<Jobs>,
    max_jobs: usize,
}

impl JobTable {
    pub fn new(max_jobs: usize) -> Self {
        Self {
            jobs: Mutex::new(Jobs::default()),
            max_jobs: max_jobs.max(1),
        }
    }

    /// Register a new recording job
    pub async fn begin(&self) -> Result<(SessionId, DateTime<Utc>), JobError> {
        let mut jobs = self.jobs.lock().await;

        if jobs.by_id.values().any(|job| job.phase == JobPhase::Recording) {
            return Err(JobError::Busy);
        }

        let mut stale_clips = Vec::new();
        while jobs.order.len() >= self.max_jobs {
            let Some(oldest) = jobs.order.pop_front() else {
                break;
            };
            if let Some(Job {
                phase: JobPhase::Recorded(clip),
                ..
            }) = jobs.by_id.remove(&oldest)
            {
                stale_clips.push(clip);
            }
            tracing::debug!("Evicted job {}", oldest);
        }

        let session = SessionId::new();
        let (recording_tx, _) = watch::channel(true);
        jobs.by_id.insert(
            session,
            Job {
                phase: JobPhase::Recording,
                recording_tx,
                video_id: None,
            },
        );
        jobs.order.push_back(session);
        drop(jobs);

        for clip in stale_clips {
            remove_clip(&clip).await;
        }

        Ok((session, Utc::now()))
    }

    /// Record the outcome of a capture and wake any waiting status requests
    pub async fn finish(&self, session: SessionId, outcome: Result<PathBuf, String>) {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.by_id.get_mut(&session) else {
            tracing::debug!("Capture for evicted job {} finished", session);
            return;
        };

        job.phase = match outcome {
            Ok(clip) => JobPhase::Recorded(clip),
            Err(e) => JobPhase::CaptureFailed(e),
        };
        job.recording_tx.send_replace(false);
    }

    /// Recording flag of `session`, notified when the capture ends
    pub async fn watch_recording(&self, session: SessionId) -> Result<watch::Receiver<bool>, JobError> {
        let jobs = self.jobs.lock().await;
        jobs.by_id
            .get(&session)
            .map(|job| job.recording_tx.subscribe())
            .ok_or(JobError::NotFound)
    }

    /// Clip captured for `session`
    pub async fn clip(&self, session: SessionId) -> Result<PathBuf, JobError> {
        let jobs = self.jobs.lock().await;
        match jobs.by_id.get(&session).map(|job| &job.phase) {
            None => Err(JobError::NotFound),
            Some(JobPhase::Recording) => Err(JobError::StillRecording),
            Some(JobPhase::Recorded(clip)) => Ok(clip.clone()),
            Some(JobPhase::CaptureFailed(e)) => Err(JobError::CaptureFailed(e.clone())),
        }
    }

    pub async fn set_video_id(&self, session: SessionId, video_id: String) {
        if let Some(job) = self.jobs.lock().await.by_id.get_mut(&session) {
            job.video_id = Some(video_id);
        }
    }

    /// Whether any known job produced `video_id`
    pub async fn has_video(&self, video_id: &str) -> bool {
        self.jobs
            .lock()
            .await
            .by_id
            .values()
            .any(|job| job.video_id.as_deref() == Some(video_id))
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.by_id.len()
    }
}

async fn remove_clip(clip: &Path) {
    match tokio::fs::remove_file(clip).await {
        Ok(()) => tracing::debug!("Removed clip {:?}", clip),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove clip {:?}: {}", clip, e),
    }
}
