//! Test doubles shared by the unit tests of this crate.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::Dispatcher;
use crate::error::GenerationError;
use crate::model::{GeneratedQuestion, SkillDescriptor, UploadId, UserId};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::store::Store;
use crate::traits::{ContentGenerator, InlineUploadSource};

/// Deterministic generator. Every question's correct option is "A".
#[derive(Default)]
pub(crate) struct FakeGenerator {
    skills: Vec<SkillDescriptor>,
    malformed_classification: bool,
    failing_classification: bool,
    fail_question_after: Option<u32>,
    failing_lessons: bool,
    hang_next_classification: AtomicBool,
    hang_next_lesson: AtomicBool,
    questions: AtomicU32,
    lessons: AtomicU32,
}

impl FakeGenerator {
    pub fn new(skills: Vec<SkillDescriptor>) -> Self {
        Self {
            skills,
            ..Self::default()
        }
    }

    pub fn with_malformed_classification(mut self) -> Self {
        self.malformed_classification = true;
        self
    }

    pub fn with_failing_classification(mut self) -> Self {
        self.failing_classification = true;
        self
    }

    /// Succeed for the first `n` questions, then fail.
    pub fn with_failing_question_after(mut self, n: u32) -> Self {
        self.fail_question_after = Some(n);
        self
    }

    pub fn with_failing_lessons(mut self) -> Self {
        self.failing_lessons = true;
        self
    }

    /// The first classification never returns.
    pub fn with_hanging_classification(self) -> Self {
        self.hang_next_classification.store(true, Ordering::SeqCst);
        self
    }

    /// The first lesson script never returns.
    pub fn with_hanging_lesson(self) -> Self {
        self.hang_next_lesson.store(true, Ordering::SeqCst);
        self
    }

    /// Lesson scripts requested so far.
    pub fn lesson_calls(&self) -> u32 {
        self.lessons.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerator for FakeGenerator {
    fn name(&self) -> &str {
        "fake"
    }

    async fn classify_skills(
        &self,
        _content: &str,
    ) -> Result<Vec<SkillDescriptor>, GenerationError> {
        if self.hang_next_classification.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.malformed_classification {
            return Err(GenerationError::Malformed("not a skill list".into()));
        }
        if self.failing_classification {
            return Err(GenerationError::ApiError {
                status: 503,
                message: "service unavailable".into(),
            });
        }
        Ok(self.skills.clone())
    }

    async fn generate_question(
        &self,
        skill: &SkillDescriptor,
    ) -> Result<GeneratedQuestion, GenerationError> {
        let served = self.questions.fetch_add(1, Ordering::SeqCst);
        if self.fail_question_after.is_some_and(|n| served >= n) {
            return Err(GenerationError::Timeout(30));
        }
        Ok(GeneratedQuestion {
            text: format!("Which statement about {} holds?", skill.name),
            options: ["A", "B", "C", "D"]
                .into_iter()
                .map(|key| (key.to_string(), format!("Choice {key}")))
                .collect(),
            correct_option: "A".into(),
        })
    }

    async fn generate_lesson_script(
        &self,
        skill: &SkillDescriptor,
    ) -> Result<String, GenerationError> {
        self.lessons.fetch_add(1, Ordering::SeqCst);
        if self.hang_next_lesson.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing_lessons {
            return Err(GenerationError::NetworkError("connection reset".into()));
        }
        Ok(format!("Lesson on {} ({})", skill.name, skill.category))
    }
}

/// A pipeline over an in-memory store whose content references are the
/// upload content itself.
pub(crate) async fn pipeline(generator: FakeGenerator) -> (Pipeline, Dispatcher) {
    pipeline_with(Arc::new(generator), PipelineConfig::default()).await
}

/// Like [`pipeline`], keeping a handle on the generator and taking a config.
pub(crate) async fn pipeline_with(
    generator: Arc<FakeGenerator>,
    config: PipelineConfig,
) -> (Pipeline, Dispatcher) {
    let store = Store::in_memory().await.unwrap();
    Pipeline::new(store, generator, Arc::new(InlineUploadSource), config)
}

/// Make the next `INSERT` into `table` fail once `table` already holds
/// `rows` rows, so a stage dies halfway through its writes.
pub(crate) async fn fail_inserts_after(pipeline: &Pipeline, table: &str, rows: u32) {
    sqlx::query(&format!(
        "CREATE TRIGGER fail_{table}_insert BEFORE INSERT ON {table} \
         WHEN (SELECT COUNT(*) FROM {table}) >= {rows} \
         BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END"
    ))
    .execute(pipeline.store().pool())
    .await
    .unwrap();
}

/// Remove the trigger installed by [`fail_inserts_after`].
pub(crate) async fn restore_inserts(pipeline: &Pipeline, table: &str) {
    sqlx::query(&format!("DROP TRIGGER fail_{table}_insert"))
        .execute(pipeline.store().pool())
        .await
        .unwrap();
}

/// Register and analyze an upload for `user`.
pub(crate) async fn analyzed_upload(pipeline: &Pipeline, user: UserId) -> UploadId {
    let upload = pipeline
        .register_upload(user, "Bluebook Test 1", "raw results")
        .await
        .unwrap();
    pipeline.analyze_upload(upload.id).await.unwrap();
    upload.id
}
