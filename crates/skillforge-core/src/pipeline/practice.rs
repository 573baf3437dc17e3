//! Post-lesson practice: one batch per watched lesson, graded as a set.

use chrono::Utc;
use tracing::{debug, info, instrument};

use super::{Pipeline, PracticeResult, StageOutcome};
use crate::error::{GenerationError, PipelineError, Result};
use crate::model::{
    normalize_option_key, Answers, GeneratedQuestion, GrowthCounter, LessonId, PracticeQuestion,
    ProgressStatus, UserId,
};
use crate::store::repo;

impl Pipeline {
    /// Generate the practice batch of a watched lesson, all or nothing.
    #[instrument(skip_all, fields(lesson = %lesson_id))]
    pub async fn generate_practice(
        &self,
        lesson_id: LessonId,
    ) -> Result<StageOutcome<Vec<PracticeQuestion>>> {
        let skill = {
            let mut conn = self.store().read().await?;
            let lesson = repo::get_lesson(&mut conn, lesson_id)
                .await?
                .ok_or_else(|| PipelineError::not_found("lesson", lesson_id))?;

            let existing = repo::practice_questions_for_lesson(&mut conn, lesson_id).await?;
            if !existing.is_empty() {
                debug!("practice already generated");
                return Ok(StageOutcome::skipped("lesson already has practice", existing));
            }
            if lesson.watched_at.is_none() {
                return Ok(StageOutcome::NoOp("lesson not watched yet".into()));
            }

            repo::get_skill(&mut conn, lesson.skill_id)
                .await?
                .ok_or_else(|| PipelineError::not_found("skill", lesson.skill_id))?
        };

        let count = self.config().practice_question_count;
        if count == 0 {
            return Err(PipelineError::InvalidInput(
                "practice_question_count must be greater than zero".into(),
            ));
        }
        let batch = self
            .generator()
            .generate_practice_batch(&skill.descriptor(), count)
            .await?;
        if batch.len() != count {
            return Err(GenerationError::Malformed(format!(
                "expected {count} practice questions, got {}",
                batch.len()
            ))
            .into());
        }
        let batch = batch
            .into_iter()
            .map(GeneratedQuestion::validate)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let now = Utc::now();
        let mut tx = self.store().write().await?;
        let existing = repo::practice_questions_for_lesson(tx.conn(), lesson_id).await?;
        if !existing.is_empty() {
            return Ok(StageOutcome::skipped("lesson already has practice", existing));
        }
        for question in &batch {
            repo::insert_practice_question(tx.conn(), lesson_id, skill.id, question, now).await?;
        }
        let questions = repo::practice_questions_for_lesson(tx.conn(), lesson_id).await?;
        tx.commit().await?;

        info!(skill = %skill.name, questions = questions.len(), "practice generated");
        Ok(StageOutcome::Applied(questions))
    }

    /// Grade a complete practice submission for a lesson.
    ///
    /// Every assigned question must be answered. An all-correct batch masters
    /// the skill and grows the learner's counter by one.
    #[instrument(skip_all, fields(lesson = %lesson_id, %user))]
    pub async fn grade_practice(
        &self,
        lesson_id: LessonId,
        user: UserId,
        answers: &Answers,
    ) -> Result<PracticeResult> {
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

        let skill = lesson.skill_id;
        if self.tracker().get(tx.conn(), user, skill).await? == Some(ProgressStatus::Mastered) {
            return Err(PipelineError::AlreadyMastered { user, skill });
        }

        let questions = repo::practice_questions_for_lesson(tx.conn(), lesson_id).await?;
        if questions.is_empty() {
            return Err(PipelineError::NoPracticeQuestions(lesson_id));
        }
        if answers.len() != questions.len() {
            return Err(PipelineError::AnswerCountMismatch {
                expected: questions.len(),
                received: answers.len(),
            });
        }
        let graded = questions
            .iter()
            .map(|question| {
                let selected = answers
                    .get(&question.id.to_string())
                    .map(normalize_option_key)
                    .ok_or(PipelineError::MissingAnswer(question.id))?;
                let is_correct = selected == normalize_option_key(&question.correct_option);
                Ok((question.id, selected, is_correct))
            })
            .collect::<Result<Vec<_>>>()?;

        for (question, selected, is_correct) in &graded {
            repo::insert_practice_attempt(tx.conn(), user, *question, selected, *is_correct, now)
                .await?;
        }

        let correct = graded.iter().filter(|(_, _, is_correct)| *is_correct).count();
        let mastered = correct == graded.len();
        let growth = if mastered {
            self.tracker()
                .upsert(tx.conn(), user, skill, ProgressStatus::Mastered, now)
                .await?;
            repo::increment_growth(tx.conn(), user, now).await?
        } else {
            self.tracker()
                .upsert(tx.conn(), user, skill, ProgressStatus::PracticeFailed, now)
                .await?;
            repo::get_growth(tx.conn(), user)
                .await?
                .unwrap_or_else(|| GrowthCounter::empty(user))
        };
        tx.commit().await?;

        info!(correct, total = graded.len(), mastered, growth = growth.count, "practice graded");
        Ok(PracticeResult {
            correct,
            incorrect: graded.len() - correct,
            mastered,
            growth,
        })
    }
}
