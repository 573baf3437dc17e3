//! Event dispatch for the pipeline.
//!
//! Stages never call each other directly. A stage that finishes emits a
//! [`PipelineEvent`] after its commit; the [`Dispatcher`] runs each event as
//! its own tokio task, bounded by a semaphore, so a failure downstream never
//! unwinds an upstream commit.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, Instrument};
use uuid::Uuid;

use crate::model::{LessonId, UploadId, VideoJobId};
use crate::pipeline::Pipeline;

/// A unit of work for the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    /// An upload is ready for analysis.
    UploadReceived(UploadId),
    /// Analysis completed with at least one missed skill.
    AnalysisCompleted(UploadId),
    /// A video job entered `queued`.
    VideoQueued(VideoJobId),
    /// A learner watched a lesson.
    LessonWatched(LessonId),
}

impl PipelineEvent {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineEvent::UploadReceived(_) => "analysis",
            PipelineEvent::AnalysisCompleted(_) => "quiz",
            PipelineEvent::VideoQueued(_) => "video",
            PipelineEvent::LessonWatched(_) => "practice",
        }
    }
}

/// Counts from a [`Dispatcher::drain`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub processed: usize,
    pub failed: usize,
}

/// Runs queued pipeline events.
pub struct Dispatcher {
    pipeline: Pipeline,
    events: mpsc::UnboundedReceiver<PipelineEvent>,
    semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    pub(crate) fn new(pipeline: Pipeline, events: mpsc::UnboundedReceiver<PipelineEvent>) -> Self {
        let semaphore = Arc::new(Semaphore::new(pipeline.config().parallelism.max(1)));
        Self {
            pipeline,
            events,
            semaphore,
        }
    }

    /// Process events until none are queued or in flight, including events
    /// emitted by the tasks themselves.
    pub async fn drain(&mut self) -> DrainReport {
        let mut report = DrainReport::default();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while let Ok(event) = self.events.try_recv() {
                in_flight.push(self.spawn(event));
            }
            match in_flight.next().await {
                Some(Ok(true)) => report.processed += 1,
                Some(Ok(false)) => {
                    report.processed += 1;
                    report.failed += 1;
                }
                Some(Err(e)) => {
                    error!(error = %e, "stage task panicked");
                    report.processed += 1;
                    report.failed += 1;
                }
                None => break,
            }
        }

        debug!(processed = report.processed, failed = report.failed, "queue drained");
        report
    }

    /// Serve events until the process stops.
    pub async fn run(mut self) {
        info!(
            parallelism = self.pipeline.config().parallelism,
            "dispatcher started"
        );
        while let Some(event) = self.events.recv().await {
            // Completion is observed through logs only.
            drop(self.spawn(event));
        }
    }

    /// Run one event in its own task. The task resolves to `true` when the
    /// stage succeeded.
    fn spawn(&self, event: PipelineEvent) -> JoinHandle<bool> {
        let pipeline = self.pipeline.clone();
        let semaphore = Arc::clone(&self.semaphore);
        let span = tracing::info_span!("stage", task = %Uuid::new_v4(), stage = event.stage());

        tokio::spawn(
            async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    error!("dispatcher semaphore closed");
                    return false;
                };
                debug!(?event, "stage started");
                match pipeline.handle(event).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!(?event, kind = ?e.kind(), error = %e, "stage failed");
                        false
                    }
                }
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProgressStatus, SkillDescriptor, UploadStatus, UserId};
    use crate::testing::{pipeline, FakeGenerator};

    #[tokio::test]
    async fn drain_runs_follow_up_events() {
        let generator = FakeGenerator::new(vec![SkillDescriptor::new("Linear Equations", "Math")]);
        let (pipeline, mut dispatcher) = pipeline(generator).await;
        let upload = pipeline
            .register_upload(UserId(1), "Bluebook Test 1", "raw")
            .await
            .unwrap();

        let report = dispatcher.drain().await;
        // Analysis, then quiz generation.
        assert_eq!(report, DrainReport { processed: 2, failed: 0 });
        assert_eq!(
            pipeline.upload(upload.id).await.unwrap().status,
            UploadStatus::Complete
        );
        assert!(pipeline.quiz_for_upload(upload.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_stages_are_counted() {
        let generator = FakeGenerator::new(vec![]).with_failing_classification();
        let (pipeline, mut dispatcher) = pipeline(generator).await;
        pipeline.register_upload(UserId(1), "t", "raw").await.unwrap();

        let report = dispatcher.drain().await;
        assert_eq!(report, DrainReport { processed: 1, failed: 1 });
    }

    #[tokio::test]
    async fn drain_on_empty_queue_returns_immediately() {
        let (_pipeline, mut dispatcher) = pipeline(FakeGenerator::new(vec![])).await;
        assert_eq!(dispatcher.drain().await, DrainReport::default());
    }

    #[tokio::test]
    async fn recover_requeues_stored_work() {
        let generator = FakeGenerator::new(vec![SkillDescriptor::new("Linear Equations", "Math")]);
        let (pipeline, mut dispatcher) = pipeline(generator).await;
        let upload = pipeline.register_upload(UserId(1), "t", "raw").await.unwrap();

        // Simulate a restart: the queued event is lost.
        while dispatcher.events.try_recv().is_ok() {}

        assert_eq!(pipeline.recover().await.unwrap(), 1);
        dispatcher.drain().await;

        let summary = pipeline.progress_summary(UserId(1)).await.unwrap();
        assert_eq!(summary.entries[0].status, ProgressStatus::Missed);
        assert!(pipeline.quiz_for_upload(upload.id).await.unwrap().is_some());
    }
}
