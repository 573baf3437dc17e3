//! Quiz generation from missed skills and one-shot grading.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use super::{Pipeline, QuizResult, StageOutcome};
use crate::engine::PipelineEvent;
use crate::error::{PipelineError, Result};
use crate::model::{
    normalize_option_key, Answers, GeneratedQuestion, ProgressStatus, QuestionId, Quiz, QuizId,
    Skill, UploadId, UploadStatus, UserId,
};
use crate::store::repo;

impl Pipeline {
    /// Create the quiz for a completed upload: one question per distinct
    /// missed skill, all persisted or none.
    #[instrument(skip_all, fields(upload = %upload_id))]
    pub async fn generate_quiz(&self, upload_id: UploadId) -> Result<StageOutcome<Quiz>> {
        let (upload, skills) = {
            let mut conn = self.store().read().await?;
            let upload = repo::get_upload(&mut conn, upload_id)
                .await?
                .ok_or_else(|| PipelineError::not_found("upload", upload_id))?;

            if let Some(existing) = repo::quiz_for_upload(&mut conn, upload_id).await? {
                debug!(quiz = %existing.id, "quiz already exists");
                return Ok(StageOutcome::skipped("upload already has a quiz", existing));
            }
            if upload.status != UploadStatus::Complete {
                return Ok(StageOutcome::NoOp(format!("upload is {}", upload.status)));
            }

            let skills = repo::missed_skills_for_upload(&mut conn, upload_id).await?;
            (upload, skills)
        };

        if skills.is_empty() {
            info!("no missed skills, no quiz created");
            return Ok(StageOutcome::NoOp("no missed skills".into()));
        }

        let questions = self.generate_questions(&skills).await?;

        let now = Utc::now();
        let mut tx = self.store().write().await?;
        if let Some(existing) = repo::quiz_for_upload(tx.conn(), upload_id).await? {
            return Ok(StageOutcome::skipped("upload already has a quiz", existing));
        }
        let quiz = repo::insert_quiz(tx.conn(), upload.user_id, upload_id, now).await?;
        for (skill, question) in skills.iter().zip(&questions) {
            repo::insert_quiz_question(tx.conn(), quiz.id, skill.id, question, now).await?;
        }
        tx.commit().await?;

        info!(quiz = %quiz.id, questions = questions.len(), "quiz created");
        Ok(StageOutcome::Applied(quiz))
    }

    async fn generate_questions(&self, skills: &[Skill]) -> Result<Vec<GeneratedQuestion>> {
        let mut questions = Vec::with_capacity(skills.len());
        for skill in skills {
            debug!(skill = %skill.name, "generating quiz question");
            let question = self
                .generator()
                .generate_question(&skill.descriptor())
                .await
                .and_then(GeneratedQuestion::validate)
                .map_err(|e| {
                    error!(skill = %skill.name, error = %e, "quiz question generation failed");
                    PipelineError::Generation(e)
                })?;
            questions.push(question);
        }
        Ok(questions)
    }

    /// Grade the single accepted submission of a quiz.
    ///
    /// Answers keyed by an identifier that is malformed, repeated, or not part
    /// of this quiz are skipped. Each incorrect answer queues a lesson unless
    /// one is already active for the skill.
    #[instrument(skip_all, fields(quiz = %quiz_id, %user))]
    pub async fn grade_quiz(
        &self,
        quiz_id: QuizId,
        user: UserId,
        answers: &Answers,
    ) -> Result<QuizResult> {
        if answers.is_empty() {
            return Err(PipelineError::InvalidInput("no answers submitted".into()));
        }

        let now = Utc::now();
        let mut tx = self.store().write().await?;
        let quiz = repo::get_quiz(tx.conn(), quiz_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("quiz", quiz_id))?;
        if quiz.user_id != user {
            return Err(PipelineError::Forbidden {
                entity: "quiz",
                id: quiz_id.into(),
                user,
            });
        }
        if !repo::complete_quiz(tx.conn(), quiz_id, now).await? {
            warn!("quiz already submitted");
            return Err(PipelineError::AlreadySubmitted(quiz_id));
        }

        let mut result = QuizResult::default();
        let mut seen = HashSet::new();

        for (key, selected) in answers.iter() {
            let Ok(question_id) = key.parse::<QuestionId>() else {
                warn!(key, "malformed question identifier skipped");
                result.skipped += 1;
                continue;
            };
            if !seen.insert(question_id) {
                warn!(question = %question_id, "repeated answer skipped");
                result.skipped += 1;
                continue;
            }
            let Some(question) = repo::get_quiz_question(tx.conn(), question_id, quiz_id).await?
            else {
                warn!(question = %question_id, "question not in this quiz, skipped");
                result.skipped += 1;
                continue;
            };

            let selected = normalize_option_key(selected);
            let is_correct = selected == normalize_option_key(&question.correct_option);
            let attempt =
                repo::insert_quiz_attempt(tx.conn(), user, question.id, &selected, is_correct, now)
                    .await?;

            if is_correct {
                result.correct += 1;
                self.tracker()
                    .upsert(tx.conn(), user, question.skill_id, ProgressStatus::QuizCorrect, now)
                    .await?;
                continue;
            }

            result.incorrect += 1;
            self.tracker()
                .upsert(tx.conn(), user, question.skill_id, ProgressStatus::VideoQueued, now)
                .await?;
            match repo::active_video_job(tx.conn(), user, question.skill_id).await? {
                Some(active) => {
                    debug!(job = %active.id, skill = %question.skill_id, "lesson already in flight");
                }
                None => {
                    let job = repo::insert_video_job(
                        tx.conn(),
                        user,
                        question.skill_id,
                        Some(attempt),
                        now,
                    )
                    .await?;
                    result.videos_queued.push(job);
                }
            }
        }

        tx.commit().await?;
        info!(
            correct = result.correct,
            incorrect = result.incorrect,
            skipped = result.skipped,
            "quiz graded"
        );

        for job in &result.videos_queued {
            self.emit(PipelineEvent::VideoQueued(*job));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SkillDescriptor, VideoJobStatus};
    use crate::testing::{
        analyzed_upload, fail_inserts_after, pipeline, restore_inserts, FakeGenerator,
    };

    fn skills() -> Vec<SkillDescriptor> {
        vec![
            SkillDescriptor::new("Linear Equations", "Math"),
            SkillDescriptor::new("Comma Usage", "Reading & Writing"),
        ]
    }

    #[tokio::test]
    async fn quiz_has_one_question_per_missed_skill() {
        let (pipeline, _dispatcher) = pipeline(FakeGenerator::new(skills())).await;
        let upload = analyzed_upload(&pipeline, UserId(1)).await;

        let quiz = pipeline
            .generate_quiz(upload)
            .await
            .unwrap()
            .into_value()
            .unwrap();

        let view = pipeline.quiz_view(quiz.id, UserId(1)).await.unwrap();
        assert_eq!(view.questions.len(), 2);
        assert!(pipeline.generate_quiz(upload).await.unwrap().value() == Some(&quiz));
    }

    #[tokio::test]
    async fn failed_generation_persists_nothing() {
        let generator = FakeGenerator::new(skills()).with_failing_question_after(1);
        let (pipeline, _dispatcher) = pipeline(generator).await;
        let upload = analyzed_upload(&pipeline, UserId(1)).await;

        assert!(pipeline.generate_quiz(upload).await.is_err());
        assert!(pipeline.quiz_for_upload(upload).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn grading_branches_on_correctness() {
        let (pipeline, _dispatcher) = pipeline(FakeGenerator::new(skills())).await;
        let upload = analyzed_upload(&pipeline, UserId(1)).await;
        let quiz = pipeline
            .generate_quiz(upload)
            .await
            .unwrap()
            .into_value()
            .unwrap();
        let view = pipeline.quiz_view(quiz.id, UserId(1)).await.unwrap();

        let answers: Answers = [
            (view.questions[0].question_id.to_string(), "a".to_string()),
            (view.questions[1].question_id.to_string(), "C".to_string()),
            ("not-a-number".to_string(), "A".to_string()),
            ("9999".to_string(), "A".to_string()),
        ]
        .into_iter()
        .collect();

        let result = pipeline.grade_quiz(quiz.id, UserId(1), &answers).await.unwrap();
        assert_eq!(result.correct, 1);
        assert_eq!(result.incorrect, 1);
        assert_eq!(result.skipped, 2);
        assert_eq!(result.videos_queued.len(), 1);

        let jobs = pipeline.video_jobs_for_user(UserId(1)).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, VideoJobStatus::Queued);
        assert!(jobs[0].quiz_attempt_id.is_some());

        let err = pipeline
            .grade_quiz(quiz.id, UserId(1), &answers)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::AlreadySubmitted(_)));
    }

    #[tokio::test]
    async fn grading_checks_owner_and_input() {
        let (pipeline, _dispatcher) = pipeline(FakeGenerator::new(skills())).await;
        let upload = analyzed_upload(&pipeline, UserId(1)).await;
        let quiz = pipeline
            .generate_quiz(upload)
            .await
            .unwrap()
            .into_value()
            .unwrap();

        let err = pipeline
            .grade_quiz(quiz.id, UserId(1), &Answers::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));

        let answers: Answers = [("1", "A")].into_iter().collect();
        let err = pipeline
            .grade_quiz(quiz.id, UserId(2), &answers)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Forbidden { .. }));

        // Rejected submissions leave the quiz open.
        assert!(pipeline.quiz_view(quiz.id, UserId(1)).await.unwrap().completed_at.is_none());
    }

    #[tokio::test]
    async fn failed_grading_write_rolls_back_the_submission() {
        let (pipeline, _dispatcher) = pipeline(FakeGenerator::new(skills())).await;
        let upload = analyzed_upload(&pipeline, UserId(1)).await;
        let quiz = pipeline
            .generate_quiz(upload)
            .await
            .unwrap()
            .into_value()
            .unwrap();
        let view = pipeline.quiz_view(quiz.id, UserId(1)).await.unwrap();
        let answers: Answers = [
            (view.questions[0].question_id, "A"),
            (view.questions[1].question_id, "C"),
        ]
        .into_iter()
        .collect();

        // The incorrect answer's video job cannot be written.
        fail_inserts_after(&pipeline, "video_jobs", 0).await;
        let err = pipeline
            .grade_quiz(quiz.id, UserId(1), &answers)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Storage);

        {
            let mut conn = pipeline.store().read().await.unwrap();
            assert_eq!(repo::count_quiz_attempts(&mut conn, quiz.id).await.unwrap(), 0);
        }
        assert!(pipeline.video_jobs_for_user(UserId(1)).await.unwrap().is_empty());
        assert!(pipeline.quiz_view(quiz.id, UserId(1)).await.unwrap().completed_at.is_none());
        let summary = pipeline.progress_summary(UserId(1)).await.unwrap();
        assert!(summary
            .entries
            .iter()
            .all(|entry| entry.status == ProgressStatus::Missed));

        // Once storage recovers the same submission goes through.
        restore_inserts(&pipeline, "video_jobs").await;
        let result = pipeline.grade_quiz(quiz.id, UserId(1), &answers).await.unwrap();
        assert_eq!(result.correct, 1);
        assert_eq!(result.videos_queued.len(), 1);
        let mut conn = pipeline.store().read().await.unwrap();
        assert_eq!(repo::count_quiz_attempts(&mut conn, quiz.id).await.unwrap(), 2);
    }
}
