//! Lesson delivery for queued video jobs, operator requeue, and the
//! learner's "watched" confirmation.

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use super::{Pipeline, StageOutcome};
use crate::engine::PipelineEvent;
use crate::error::{GenerationError, PipelineError, Result};
use crate::model::{
    Lesson, LessonId, ProgressStatus, Skill, UserId, VideoJob, VideoJobId, VideoJobStatus,
};
use crate::store::repo;

impl Pipeline {
    /// Generate the lesson for a queued job: queued → generating → delivered.
    ///
    /// Delivery does not touch skill progress; that moves when the learner
    /// marks the lesson watched.
    #[instrument(skip_all, fields(job = %job_id))]
    pub async fn deliver_video(&self, job_id: VideoJobId) -> Result<StageOutcome<Lesson>> {
        let (job, skill) = {
            let now = Utc::now();
            let mut tx = self.store().write().await?;
            let job = repo::get_video_job(tx.conn(), job_id)
                .await?
                .ok_or_else(|| PipelineError::not_found("video job", job_id))?;

            if job.status != VideoJobStatus::Queued {
                if let Some(lesson) = repo::lesson_for_job(tx.conn(), job_id).await? {
                    return Ok(StageOutcome::skipped("video job already delivered", lesson));
                }
                debug!(status = %job.status, "video job not queued");
                return Ok(StageOutcome::NoOp(format!("video job is {}", job.status)));
            }

            let skill = repo::get_skill(tx.conn(), job.skill_id)
                .await?
                .ok_or_else(|| PipelineError::not_found("skill", job.skill_id))?;
            if !repo::transition_video_job(
                tx.conn(),
                job_id,
                VideoJobStatus::Queued,
                VideoJobStatus::Generating,
                now,
            )
            .await?
            {
                return Ok(StageOutcome::NoOp("video job was claimed concurrently".into()));
            }
            tx.commit().await?;
            (job, skill)
        };
        info!(skill = %skill.name, "generating lesson");

        let script = match self.lesson_script(&skill).await {
            Ok(script) => script,
            Err(err) => {
                self.record_video_failure(job_id, &err).await;
                return Err(err);
            }
        };

        match self.record_delivery(&job, &script).await {
            Ok(Some(lesson)) => {
                info!(lesson = %lesson.id, "lesson delivered");
                Ok(StageOutcome::Applied(lesson))
            }
            Ok(None) => Ok(StageOutcome::NoOp(
                "video job left generating while the lesson was written".into(),
            )),
            Err(err) => {
                self.record_video_failure(job_id, &err).await;
                Err(err)
            }
        }
    }

    async fn lesson_script(&self, skill: &Skill) -> Result<String> {
        let script = self
            .generator()
            .generate_lesson_script(&skill.descriptor())
            .await?;
        let script = script.trim();
        if script.is_empty() {
            return Err(GenerationError::Malformed("lesson script is empty".into()).into());
        }
        Ok(script.to_string())
    }

    async fn record_delivery(&self, job: &VideoJob, script: &str) -> Result<Option<Lesson>> {
        let now = Utc::now();
        let mut tx = self.store().write().await?;
        if !repo::transition_video_job(
            tx.conn(),
            job.id,
            VideoJobStatus::Generating,
            VideoJobStatus::Delivered,
            now,
        )
        .await?
        {
            return Ok(None);
        }
        let lesson = repo::insert_lesson(tx.conn(), job.skill_id, job.id, script, now).await?;
        tx.commit().await?;
        Ok(Some(lesson))
    }

    async fn record_video_failure(&self, id: VideoJobId, err: &PipelineError) {
        error!(job = %id, error = %err, "lesson generation failed");
        let message = err.to_string();
        let result = async {
            let mut tx = self.store().write().await?;
            repo::fail_video_job(tx.conn(), id, &message).await?;
            tx.commit().await
        }
        .await;
        if let Err(e) = result {
            error!(job = %id, error = %e, "could not record lesson failure");
        }
    }

    /// Operator re-trigger of a job in `error`: error → queued.
    pub async fn requeue_video_job(&self, job_id: VideoJobId) -> Result<StageOutcome<VideoJob>> {
        let max_attempts = self.config().max_attempts;
        let mut tx = self.store().write().await?;
        let job = repo::get_video_job(tx.conn(), job_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("video job", job_id))?;

        if job.status != VideoJobStatus::Error {
            return Err(PipelineError::NotRetryable {
                entity: "video job",
                id: job_id.into(),
                status: job.status.to_string(),
            });
        }
        if job.attempts >= i64::from(max_attempts) {
            return Err(PipelineError::RetryLimitReached {
                entity: "video job",
                id: job_id.into(),
                max_attempts,
            });
        }
        if let Some(active) = repo::active_video_job(tx.conn(), job.user_id, job.skill_id).await? {
            return Err(PipelineError::NotRetryable {
                entity: "video job",
                id: job_id.into(),
                status: format!("superseded by active job {}", active.id),
            });
        }

        if !repo::transition_video_job(
            tx.conn(),
            job_id,
            VideoJobStatus::Error,
            VideoJobStatus::Queued,
            Utc::now(),
        )
        .await?
        {
            return Ok(StageOutcome::skipped("video job was requeued concurrently", job));
        }
        let job = repo::get_video_job(tx.conn(), job_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("video job", job_id))?;
        tx.commit().await?;

        info!(job = %job_id, attempts = job.attempts, "video job requeued");
        self.emit(PipelineEvent::VideoQueued(job_id));
        Ok(StageOutcome::Applied(job))
    }

    /// Record that the learner watched a lesson and queue its practice set.
    /// Watching twice is a no-op that returns the lesson unchanged.
    #[instrument(skip_all, fields(lesson = %lesson_id, %user))]
    pub async fn mark_lesson_watched(
        &self,
        lesson_id: LessonId,
        user: UserId,
    ) -> Result<StageOutcome<Lesson>> {
        let now = Utc::now();
        let mut tx = self.store().write().await?;
        let lesson = repo::get_lesson(tx.conn(), lesson_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("lesson", lesson_id))?;
        let job = repo::get_video_job(tx.conn(), lesson.job_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("video job", lesson.job_id))?;
        if job.user_id != user {
            return Err(PipelineError::Forbidden {
                entity: "lesson",
                id: lesson_id.into(),
                user,
            });
        }

        if !repo::mark_lesson_watched(tx.conn(), lesson_id, now).await? {
            warn!("lesson already watched");
            return Ok(StageOutcome::skipped("lesson already watched", lesson));
        }
        self.tracker()
            .upsert(tx.conn(), user, lesson.skill_id, ProgressStatus::VideoWatched, now)
            .await?;
        let lesson = repo::get_lesson(tx.conn(), lesson_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("lesson", lesson_id))?;
        tx.commit().await?;

        info!("lesson watched");
        self.emit(PipelineEvent::LessonWatched(lesson_id));
        Ok(StageOutcome::Applied(lesson))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::task::JoinSet;

    use crate::model::{Answers, SkillDescriptor};
    use crate::pipeline::PipelineConfig;
    use crate::testing::{analyzed_upload, pipeline, pipeline_with, FakeGenerator};

    async fn queued_job(pipeline: &Pipeline) -> VideoJobId {
        let upload = analyzed_upload(pipeline, UserId(1)).await;
        let quiz = pipeline
            .generate_quiz(upload)
            .await
            .unwrap()
            .into_value()
            .unwrap();
        let view = pipeline.quiz_view(quiz.id, UserId(1)).await.unwrap();
        let answers: Answers = [(view.questions[0].question_id, "D")].into_iter().collect();
        let result = pipeline.grade_quiz(quiz.id, UserId(1), &answers).await.unwrap();
        result.videos_queued[0]
    }

    fn one_skill() -> Vec<SkillDescriptor> {
        vec![SkillDescriptor::new("Linear Equations", "Math")]
    }

    #[tokio::test]
    async fn delivery_produces_one_lesson() {
        let (pipeline, _dispatcher) = pipeline(FakeGenerator::new(one_skill())).await;
        let job = queued_job(&pipeline).await;

        let lesson = pipeline
            .deliver_video(job)
            .await
            .unwrap()
            .into_value()
            .unwrap();
        assert!(lesson.script.contains("Linear Equations"));
        assert!(lesson.watched_at.is_none());

        let replay = pipeline.deliver_video(job).await.unwrap();
        assert_eq!(replay.value(), Some(&lesson));

        let jobs = pipeline.video_jobs_for_user(UserId(1)).await.unwrap();
        assert_eq!(jobs[0].status, VideoJobStatus::Delivered);
        assert!(jobs[0].delivered_at.is_some());

        // Delivery leaves progress where grading put it.
        let summary = pipeline.progress_summary(UserId(1)).await.unwrap();
        assert_eq!(summary.entries[0].status, ProgressStatus::VideoQueued);
    }

    #[tokio::test]
    async fn failed_generation_is_terminal_until_requeued() {
        let generator = FakeGenerator::new(one_skill()).with_failing_lessons();
        let (pipeline, _dispatcher) = pipeline(generator).await;
        let job = queued_job(&pipeline).await;

        assert!(pipeline.deliver_video(job).await.is_err());
        let stored = pipeline.video_job(job).await.unwrap();
        assert_eq!(stored.status, VideoJobStatus::Error);
        assert_eq!(stored.attempts, 1);

        // No automatic retry: a second delivery trigger is a no-op.
        assert!(matches!(
            pipeline.deliver_video(job).await.unwrap(),
            StageOutcome::NoOp(_)
        ));

        let requeued = pipeline.requeue_video_job(job).await.unwrap();
        assert_eq!(requeued.value().unwrap().status, VideoJobStatus::Queued);
    }

    #[tokio::test]
    async fn requeue_is_limited_by_attempts() {
        let generator = FakeGenerator::new(one_skill()).with_failing_lessons();
        let (pipeline, _dispatcher) = pipeline(generator).await;
        let job = queued_job(&pipeline).await;

        for _ in 0..2 {
            assert!(pipeline.deliver_video(job).await.is_err());
            pipeline.requeue_video_job(job).await.unwrap();
        }
        assert!(pipeline.deliver_video(job).await.is_err());

        let err = pipeline.requeue_video_job(job).await.unwrap_err();
        assert!(matches!(err, PipelineError::RetryLimitReached { .. }));
    }

    #[tokio::test]
    async fn requeue_requires_error_status() {
        let (pipeline, _dispatcher) = pipeline(FakeGenerator::new(one_skill())).await;
        let job = queued_job(&pipeline).await;

        let err = pipeline.requeue_video_job(job).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotRetryable { .. }));
    }

    #[tokio::test]
    async fn watching_is_recorded_once() {
        let (pipeline, _dispatcher) = pipeline(FakeGenerator::new(one_skill())).await;
        let job = queued_job(&pipeline).await;
        let lesson = pipeline
            .deliver_video(job)
            .await
            .unwrap()
            .into_value()
            .unwrap();

        let err = pipeline
            .mark_lesson_watched(lesson.id, UserId(2))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Forbidden { .. }));

        let watched = pipeline
            .mark_lesson_watched(lesson.id, UserId(1))
            .await
            .unwrap();
        assert!(watched.is_applied());
        let first = watched.into_value().unwrap().watched_at;
        assert!(first.is_some());

        let again = pipeline
            .mark_lesson_watched(lesson.id, UserId(1))
            .await
            .unwrap();
        assert!(!again.is_applied());
        assert_eq!(again.into_value().unwrap().watched_at, first);

        let summary = pipeline.progress_summary(UserId(1)).await.unwrap();
        assert_eq!(summary.entries[0].status, ProgressStatus::VideoWatched);
    }

    #[tokio::test]
    async fn interrupted_delivery_is_released_by_recover() {
        let generator = Arc::new(FakeGenerator::new(one_skill()).with_hanging_lesson());
        let config = PipelineConfig {
            stall_timeout_secs: 0,
            ..PipelineConfig::default()
        };
        let (pipeline, _dispatcher) = pipeline_with(generator.clone(), config).await;
        let job = queued_job(&pipeline).await;

        let task = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.deliver_video(job).await }
        });
        while generator.lesson_calls() == 0 {
            tokio::task::yield_now().await;
        }
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(
            pipeline.video_job(job).await.unwrap().status,
            VideoJobStatus::Generating
        );

        pipeline.recover().await.unwrap();
        let stored = pipeline.video_job(job).await.unwrap();
        assert_eq!(stored.status, VideoJobStatus::Error);
        assert_eq!(stored.attempts, 1);
        assert!(stored.last_error.unwrap().contains("interrupted"));

        // The pair is free again: requeue and deliver.
        assert!(pipeline.requeue_video_job(job).await.unwrap().is_applied());
        let lesson = pipeline.deliver_video(job).await.unwrap();
        assert!(lesson.is_applied());
        assert_eq!(pipeline.video_job(job).await.unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn recover_leaves_recent_claims_alone() {
        let generator = Arc::new(FakeGenerator::new(one_skill()).with_hanging_lesson());
        let (pipeline, _dispatcher) =
            pipeline_with(generator.clone(), PipelineConfig::default()).await;
        let job = queued_job(&pipeline).await;

        let task = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.deliver_video(job).await }
        });
        while generator.lesson_calls() == 0 {
            tokio::task::yield_now().await;
        }

        pipeline.recover().await.unwrap();
        assert_eq!(
            pipeline.video_job(job).await.unwrap().status,
            VideoJobStatus::Generating
        );
        task.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deliveries_generate_once() {
        let generator = Arc::new(FakeGenerator::new(one_skill()));
        let (pipeline, _dispatcher) =
            pipeline_with(generator.clone(), PipelineConfig::default()).await;
        let job = queued_job(&pipeline).await;

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let pipeline = pipeline.clone();
            tasks.spawn(async move { pipeline.deliver_video(job).await });
        }
        let mut applied = 0;
        while let Some(outcome) = tasks.join_next().await {
            if outcome.unwrap().unwrap().is_applied() {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(generator.lesson_calls(), 1);
        assert_eq!(pipeline.lessons_for_user(UserId(1)).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_watch_confirmations_apply_once() {
        let (pipeline, _dispatcher) = pipeline(FakeGenerator::new(one_skill())).await;
        let job = queued_job(&pipeline).await;
        let lesson = pipeline
            .deliver_video(job)
            .await
            .unwrap()
            .into_value()
            .unwrap()
            .id;

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let pipeline = pipeline.clone();
            tasks.spawn(async move { pipeline.mark_lesson_watched(lesson, UserId(1)).await });
        }
        let mut watched_at = Vec::new();
        let mut applied = 0;
        while let Some(outcome) = tasks.join_next().await {
            let outcome = outcome.unwrap().unwrap();
            if outcome.is_applied() {
                applied += 1;
            }
            watched_at.push(outcome.into_value().unwrap().watched_at);
        }

        assert_eq!(applied, 1);
        assert!(watched_at.iter().all(|at| at.is_some() && *at == watched_at[0]));
        let summary = pipeline.progress_summary(UserId(1)).await.unwrap();
        assert_eq!(summary.entries[0].status, ProgressStatus::VideoWatched);
    }
}
