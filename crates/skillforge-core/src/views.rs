//! Read accessors for transports.
//!
//! Learner-facing views never carry the correct option key.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::model::{
    GrowthCounter, Lesson, LessonId, OptionMap, ProgressStatus, Quiz, QuizId, Upload, UploadId,
    UserId, VideoJob, VideoJobId,
};
use crate::pipeline::Pipeline;
use crate::store::repo;

pub use crate::store::repo::ProgressEntry;

/// A question as shown to the learner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionView {
    pub question_id: i64,
    pub skill: String,
    pub text: String,
    pub options: OptionMap,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuizView {
    pub quiz_id: QuizId,
    pub upload_id: UploadId,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub questions: Vec<QuestionView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PracticeView {
    pub lesson_id: LessonId,
    pub skill: String,
    /// The learner's current progress on the lesson's skill.
    pub status: Option<ProgressStatus>,
    pub questions: Vec<QuestionView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSummary {
    pub user_id: UserId,
    pub entries: Vec<ProgressEntry>,
    pub counts: BTreeMap<ProgressStatus, usize>,
}

impl Pipeline {
    pub async fn quiz_view(&self, quiz_id: QuizId, user: UserId) -> Result<QuizView> {
        let mut conn = self.store().read().await?;
        let quiz = repo::get_quiz(&mut conn, quiz_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("quiz", quiz_id))?;
        if quiz.user_id != user {
            return Err(PipelineError::Forbidden {
                entity: "quiz",
                id: quiz_id.into(),
                user,
            });
        }

        let mut questions = Vec::new();
        for question in repo::questions_for_quiz(&mut conn, quiz_id).await? {
            questions.push(QuestionView {
                question_id: question.id.into(),
                skill: skill_name(&mut conn, question.skill_id).await?,
                text: question.text,
                options: question.options.0,
            });
        }

        Ok(QuizView {
            quiz_id: quiz.id,
            upload_id: quiz.upload_id,
            created_at: quiz.created_at,
            completed_at: quiz.completed_at,
            questions,
        })
    }

    pub async fn practice_view(&self, lesson_id: LessonId, user: UserId) -> Result<PracticeView> {
        let mut conn = self.store().read().await?;
        let lesson = repo::get_lesson(&mut conn, lesson_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("lesson", lesson_id))?;
        let job = repo::get_video_job(&mut conn, lesson.job_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("video job", lesson.job_id))?;
        if job.user_id != user {
            return Err(PipelineError::Forbidden {
                entity: "lesson",
                id: lesson_id.into(),
                user,
            });
        }

        let skill = skill_name(&mut conn, lesson.skill_id).await?;
        let status = self.tracker().get(&mut conn, user, lesson.skill_id).await?;
        let questions = repo::practice_questions_for_lesson(&mut conn, lesson_id)
            .await?
            .into_iter()
            .map(|question| QuestionView {
                question_id: question.id.into(),
                skill: skill.clone(),
                text: question.text,
                options: question.options.0,
            })
            .collect();

        Ok(PracticeView {
            lesson_id,
            skill,
            status,
            questions,
        })
    }

    /// Every tracked skill of a user plus counts per status.
    pub async fn progress_summary(&self, user: UserId) -> Result<ProgressSummary> {
        let mut conn = self.store().read().await?;
        let entries = self.tracker().list(&mut conn, user).await?;
        let mut counts = BTreeMap::new();
        for entry in &entries {
            *counts.entry(entry.status).or_insert(0) += 1;
        }
        Ok(ProgressSummary {
            user_id: user,
            entries,
            counts,
        })
    }

    /// The user's growth counter, zero-valued if it never grew.
    pub async fn growth(&self, user: UserId) -> Result<GrowthCounter> {
        let mut conn = self.store().read().await?;
        Ok(repo::get_growth(&mut conn, user)
            .await?
            .unwrap_or_else(|| GrowthCounter::empty(user)))
    }

    pub async fn upload(&self, id: UploadId) -> Result<Upload> {
        let mut conn = self.store().read().await?;
        repo::get_upload(&mut conn, id)
            .await?
            .ok_or_else(|| PipelineError::not_found("upload", id))
    }

    pub async fn uploads_for_user(&self, user: UserId) -> Result<Vec<Upload>> {
        let mut conn = self.store().read().await?;
        Ok(repo::uploads_for_user(&mut conn, user).await?)
    }

    pub async fn quiz_for_upload(&self, upload: UploadId) -> Result<Option<Quiz>> {
        let mut conn = self.store().read().await?;
        Ok(repo::quiz_for_upload(&mut conn, upload).await?)
    }

    pub async fn video_job(&self, id: VideoJobId) -> Result<VideoJob> {
        let mut conn = self.store().read().await?;
        repo::get_video_job(&mut conn, id)
            .await?
            .ok_or_else(|| PipelineError::not_found("video job", id))
    }

    pub async fn video_jobs_for_user(&self, user: UserId) -> Result<Vec<VideoJob>> {
        let mut conn = self.store().read().await?;
        Ok(repo::video_jobs_for_user(&mut conn, user).await?)
    }

    pub async fn lesson(&self, id: LessonId) -> Result<Lesson> {
        let mut conn = self.store().read().await?;
        repo::get_lesson(&mut conn, id)
            .await?
            .ok_or_else(|| PipelineError::not_found("lesson", id))
    }

    pub async fn lesson_for_job(&self, job: VideoJobId) -> Result<Option<Lesson>> {
        let mut conn = self.store().read().await?;
        Ok(repo::lesson_for_job(&mut conn, job).await?)
    }

    pub async fn lessons_for_user(&self, user: UserId) -> Result<Vec<Lesson>> {
        let mut conn = self.store().read().await?;
        Ok(repo::lessons_for_user(&mut conn, user).await?)
    }
}

async fn skill_name(conn: &mut sqlx::SqliteConnection, id: crate::model::SkillId) -> Result<String> {
    repo::get_skill(conn, id)
        .await?
        .map(|skill| skill.name)
        .ok_or_else(|| PipelineError::not_found("skill", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SkillDescriptor;
    use crate::testing::{analyzed_upload, pipeline, FakeGenerator};

    #[tokio::test]
    async fn quiz_view_hides_correct_keys() {
        let generator = FakeGenerator::new(vec![SkillDescriptor::new("Linear Equations", "Math")]);
        let (pipeline, _dispatcher) = pipeline(generator).await;
        let upload = analyzed_upload(&pipeline, UserId(1)).await;
        let quiz = pipeline
            .generate_quiz(upload)
            .await
            .unwrap()
            .into_value()
            .unwrap();

        let view = pipeline.quiz_view(quiz.id, UserId(1)).await.unwrap();
        let json = serde_json::to_value(&view).unwrap();
        assert!(!json.to_string().contains("correct"));
        assert_eq!(view.questions[0].skill, "Linear Equations");
        assert_eq!(view.questions[0].options.len(), 4);

        let err = pipeline.quiz_view(quiz.id, UserId(2)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn summary_counts_by_status() {
        let generator = FakeGenerator::new(vec![
            SkillDescriptor::new("Linear Equations", "Math"),
            SkillDescriptor::new("Comma Usage", "Reading & Writing"),
        ]);
        let (pipeline, _dispatcher) = pipeline(generator).await;
        analyzed_upload(&pipeline, UserId(1)).await;

        let summary = pipeline.progress_summary(UserId(1)).await.unwrap();
        assert_eq!(summary.entries.len(), 2);
        assert_eq!(summary.counts.get(&ProgressStatus::Missed), Some(&2));
        // Entries are ordered by skill name.
        assert_eq!(summary.entries[0].skill_name, "Comma Usage");
    }

    #[tokio::test]
    async fn growth_defaults_to_zero() {
        let (pipeline, _dispatcher) = pipeline(FakeGenerator::new(vec![])).await;
        let growth = pipeline.growth(UserId(9)).await.unwrap();
        assert_eq!(growth.count, 0);
        assert!(growth.last_growth_at.is_none());
    }

    #[tokio::test]
    async fn missing_entities_are_not_found() {
        let (pipeline, _dispatcher) = pipeline(FakeGenerator::new(vec![])).await;
        assert!(matches!(
            pipeline.upload(UploadId(42)).await.unwrap_err(),
            PipelineError::NotFound { entity: "upload", id: 42 }
        ));
        assert!(pipeline.quiz_for_upload(UploadId(42)).await.unwrap().is_none());
    }
}
