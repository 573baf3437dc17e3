//! Stage workflows of the remediation pipeline.
//!
//! Every trigger function follows the same discipline:
//!
//! 1. claim the entity with a compare-and-set inside a [`WriteTx`](crate::store::WriteTx),
//! 2. call the content generator with no transaction held,
//! 3. write every effect of the stage in one transaction,
//! 4. emit follow-up events only after that commit.
//!
//! A guard that finds the entity already advanced is not an error: the
//! trigger returns [`StageOutcome::Skipped`] or [`StageOutcome::NoOp`].

mod analysis;
mod practice;
mod quiz;
mod video;

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::{Dispatcher, PipelineEvent};
use crate::error::{PipelineError, Result};
use crate::model::{GrowthCounter, VideoJobId, VideoJobStatus};
use crate::store::{repo, Store};
use crate::tracker::{ProgressPolicy, SkillProgressTracker};
use crate::traits::{ContentGenerator, UploadSource};

const INTERRUPTED_UPLOAD: &str = "analysis was interrupted before it finished";
const INTERRUPTED_JOB: &str = "lesson generation was interrupted before it finished";

/// Tuning knobs for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum stage tasks the dispatcher runs at once.
    pub parallelism: usize,
    /// Size of the practice batch generated per watched lesson.
    pub practice_question_count: usize,
    /// Analysis or generation runs allowed per upload and per video job.
    pub max_attempts: u32,
    /// Seconds an upload may stay `processing` or a job `generating` before
    /// [`Pipeline::recover`] treats the run as interrupted.
    pub stall_timeout_secs: u64,
    pub progress_policy: ProgressPolicy,
}

impl PipelineConfig {
    /// Reject settings the stages cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(PipelineError::InvalidInput(
                "parallelism must be greater than zero".into(),
            ));
        }
        if self.practice_question_count == 0 {
            return Err(PipelineError::InvalidInput(
                "practice_question_count must be greater than zero".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(PipelineError::InvalidInput(
                "max_attempts must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            practice_question_count: 3,
            max_attempts: 3,
            stall_timeout_secs: 900,
            progress_policy: ProgressPolicy::Permissive,
        }
    }
}

/// Result of a trigger function that succeeded.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    /// The trigger advanced the entity.
    Applied(T),
    /// A guard found the work already done; `current` is the existing state.
    Skipped { reason: String, current: T },
    /// Nothing to do and nothing to return.
    NoOp(String),
}

impl<T> StageOutcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, StageOutcome::Applied(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            StageOutcome::Applied(value) | StageOutcome::Skipped { current: value, .. } => {
                Some(value)
            }
            StageOutcome::NoOp(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            StageOutcome::Applied(value) | StageOutcome::Skipped { current: value, .. } => {
                Some(value)
            }
            StageOutcome::NoOp(_) => None,
        }
    }

    /// Short label for logs and CLI output.
    pub fn label(&self) -> &str {
        match self {
            StageOutcome::Applied(_) => "applied",
            StageOutcome::Skipped { reason, .. } | StageOutcome::NoOp(reason) => reason,
        }
    }

    pub(crate) fn skipped(reason: impl Into<String>, current: T) -> Self {
        StageOutcome::Skipped {
            reason: reason.into(),
            current,
        }
    }
}

/// Outcome of grading a quiz submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuizResult {
    pub correct: usize,
    pub incorrect: usize,
    /// Answers whose question identifier was malformed, unknown, or repeated.
    pub skipped: usize,
    /// Jobs created by this submission, in answer order.
    pub videos_queued: Vec<VideoJobId>,
}

/// Outcome of grading a practice batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PracticeResult {
    pub correct: usize,
    pub incorrect: usize,
    pub mastered: bool,
    /// The learner's counter after grading.
    pub growth: GrowthCounter,
}

struct Inner {
    store: Store,
    generator: Arc<dyn ContentGenerator>,
    source: Arc<dyn UploadSource>,
    tracker: SkillProgressTracker,
    config: PipelineConfig,
    events: mpsc::UnboundedSender<PipelineEvent>,
}

/// Handle to the pipeline: storage, collaborators, and the event queue.
/// Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    /// Build a pipeline and the dispatcher that runs its events.
    pub fn new(
        store: Store,
        generator: Arc<dyn ContentGenerator>,
        source: Arc<dyn UploadSource>,
        config: PipelineConfig,
    ) -> (Pipeline, Dispatcher) {
        let (events, receiver) = mpsc::unbounded_channel();
        let pipeline = Pipeline {
            inner: Arc::new(Inner {
                store,
                generator,
                source,
                tracker: SkillProgressTracker::new(config.progress_policy),
                config,
                events,
            }),
        };
        let dispatcher = Dispatcher::new(pipeline.clone(), receiver);
        (pipeline, dispatcher)
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn tracker(&self) -> &SkillProgressTracker {
        &self.inner.tracker
    }

    pub(crate) fn generator(&self) -> &dyn ContentGenerator {
        self.inner.generator.as_ref()
    }

    pub(crate) fn source(&self) -> &dyn UploadSource {
        self.inner.source.as_ref()
    }

    /// Queue a follow-up event. Only called after the emitting stage commits.
    pub(crate) fn emit(&self, event: PipelineEvent) {
        debug!(?event, "event queued");
        if self.inner.events.send(event).is_err() {
            warn!(?event, "dispatcher is gone, event dropped");
        }
    }

    /// Run the stage an event triggers.
    pub async fn handle(&self, event: PipelineEvent) -> Result<()> {
        match event {
            PipelineEvent::UploadReceived(upload) => {
                self.analyze_upload(upload).await?;
            }
            PipelineEvent::AnalysisCompleted(upload) => {
                self.generate_quiz(upload).await?;
            }
            PipelineEvent::VideoQueued(job) => {
                self.deliver_video(job).await?;
            }
            PipelineEvent::LessonWatched(lesson) => {
                self.generate_practice(lesson).await?;
            }
        }
        Ok(())
    }

    /// Re-dispatch work left behind in storage: uploads awaiting analysis or
    /// a quiz, queued video jobs, and watched lessons without practice.
    /// Returns the number of events queued.
    ///
    /// Uploads stuck in `processing` and jobs stuck in `generating` for
    /// longer than `stall_timeout_secs` lost their run (the process died or
    /// the task was cancelled). They move to `error` first, so the operator
    /// can retry or requeue them.
    pub async fn recover(&self) -> Result<usize> {
        self.fail_stalled().await?;

        let mut events = Vec::new();
        {
            let mut conn = self.store().read().await?;
            for upload in
                repo::uploads_with_status(&mut conn, crate::model::UploadStatus::Uploaded).await?
            {
                events.push(PipelineEvent::UploadReceived(upload.id));
            }
            for upload in repo::uploads_awaiting_quiz(&mut conn).await? {
                events.push(PipelineEvent::AnalysisCompleted(upload));
            }
            for job in repo::video_jobs_with_status(&mut conn, VideoJobStatus::Queued).await? {
                events.push(PipelineEvent::VideoQueued(job.id));
            }
            for lesson in repo::lessons_awaiting_practice(&mut conn).await? {
                events.push(PipelineEvent::LessonWatched(lesson));
            }
        }

        let count = events.len();
        for event in events {
            self.emit(event);
        }
        if count > 0 {
            info!(count, "recovered pending work");
        }
        Ok(count)
    }

    async fn fail_stalled(&self) -> Result<()> {
        let now = Utc::now();
        let timeout = TimeDelta::try_seconds(
            i64::try_from(self.config().stall_timeout_secs).unwrap_or(i64::MAX),
        )
        .unwrap_or(TimeDelta::MAX);
        let Some(cutoff) = now.checked_sub_signed(timeout) else {
            return Ok(());
        };

        let mut tx = self.store().write().await?;
        let uploads =
            repo::fail_stalled_uploads(tx.conn(), cutoff, INTERRUPTED_UPLOAD, now).await?;
        let jobs = repo::fail_stalled_video_jobs(tx.conn(), cutoff, INTERRUPTED_JOB).await?;
        tx.commit().await?;

        for upload in uploads {
            warn!(%upload, "analysis run interrupted; upload moved to error");
        }
        for job in jobs {
            warn!(%job, "lesson generation interrupted; job moved to error");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_sized_settings_are_rejected() {
        let empty_batch = PipelineConfig {
            practice_question_count: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            empty_batch.validate(),
            Err(PipelineError::InvalidInput(msg)) if msg.contains("practice_question_count")
        ));

        let no_workers = PipelineConfig {
            parallelism: 0,
            ..PipelineConfig::default()
        };
        assert!(no_workers.validate().is_err());
    }
}
