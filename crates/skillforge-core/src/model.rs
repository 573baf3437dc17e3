//! Core data model types for skillforge.
//!
//! These are the persisted entities of the remediation pipeline, their status
//! enums, and the payloads exchanged with the content generator.

use std::collections::BTreeMap;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use crate::error::{GenerationError, PipelineError};

macro_rules! entity_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(
                Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
                sqlx::Type,
            )]
            #[serde(transparent)]
            #[sqlx(transparent)]
            pub struct $name(pub i64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl FromStr for $name {
                type Err = ParseIntError;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    s.trim().parse().map(Self)
                }
            }

            impl From<$name> for i64 {
                fn from(id: $name) -> i64 {
                    id.0
                }
            }
        )*
    };
}

entity_id!(
    /// A learner. Users are owned by the surrounding system; the pipeline
    /// only stores their identifier.
    UserId,
    SkillId,
    UploadId,
    QuizId,
    QuestionId,
    AttemptId,
    VideoJobId,
    LessonId,
    PracticeQuestionId,
    PracticeAttemptId,
);

/// Multiple-choice options keyed by option letter ("A" → text).
pub type OptionMap = BTreeMap<String, String>;

/// Number of options every generated question must carry.
pub const OPTIONS_PER_QUESTION: usize = 4;

/// Category given to classified skills that arrive without one.
pub const DEFAULT_CATEGORY: &str = "Uncategorized";

/// Normalize a submitted or stored option key for comparison.
pub fn normalize_option_key(raw: &str) -> String {
    raw.trim().to_uppercase()
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Processing status of an [`Upload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploaded,
    Processing,
    Complete,
    Error,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploaded => "uploaded",
            UploadStatus::Processing => "processing",
            UploadStatus::Complete => "complete",
            UploadStatus::Error => "error",
        }
    }

    /// Whether upload analysis may start from this status.
    pub fn accepts_analysis(&self) -> bool {
        matches!(self, UploadStatus::Uploaded | UploadStatus::Error)
    }
}

/// Remediation stage of one learner for one skill.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ProgressStatus {
    Missed,
    QuizCorrect,
    VideoQueued,
    VideoWatched,
    PracticeFailed,
    Mastered,
}

impl ProgressStatus {
    pub const ALL: [ProgressStatus; 6] = [
        ProgressStatus::Missed,
        ProgressStatus::QuizCorrect,
        ProgressStatus::VideoQueued,
        ProgressStatus::VideoWatched,
        ProgressStatus::PracticeFailed,
        ProgressStatus::Mastered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Missed => "missed",
            ProgressStatus::QuizCorrect => "quiz_correct",
            ProgressStatus::VideoQueued => "video_queued",
            ProgressStatus::VideoWatched => "video_watched",
            ProgressStatus::PracticeFailed => "practice_failed",
            ProgressStatus::Mastered => "mastered",
        }
    }
}

/// Status of a [`VideoJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum VideoJobStatus {
    Queued,
    Generating,
    Delivered,
    Error,
}

impl VideoJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoJobStatus::Queued => "queued",
            VideoJobStatus::Generating => "generating",
            VideoJobStatus::Delivered => "delivered",
            VideoJobStatus::Error => "error",
        }
    }

    /// Queued and generating jobs are active; at most one may exist per
    /// (user, skill).
    pub fn is_active(&self) -> bool {
        matches!(self, VideoJobStatus::Queued | VideoJobStatus::Generating)
    }
}

macro_rules! display_as_str {
    ($($name:ident),*) => {
        $(
            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )*
    };
}

display_as_str!(UploadStatus, ProgressStatus, VideoJobStatus);

impl FromStr for ProgressStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProgressStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown progress status: '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A learner's submitted test result awaiting or done with analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Upload {
    pub id: UploadId,
    pub user_id: UserId,
    /// Identifier of the practice test the result belongs to.
    pub test_identifier: String,
    /// Opaque reference resolved by the [`UploadSource`](crate::traits::UploadSource).
    pub content_ref: String,
    pub status: UploadStatus,
    /// Number of analysis runs started for this upload.
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named, categorized competency. The name is the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Skill {
    pub id: SkillId,
    pub name: String,
    pub category: String,
}

impl Skill {
    pub fn descriptor(&self) -> SkillDescriptor {
        SkillDescriptor {
            name: self.name.clone(),
            category: self.category.clone(),
        }
    }
}

/// The remediation stage of one user for one skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SkillProgress {
    pub user_id: UserId,
    pub skill_id: SkillId,
    pub status: ProgressStatus,
    pub last_updated: DateTime<Utc>,
}

/// Append-only record of a skill flagged on an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MissedSkillRecord {
    pub id: i64,
    pub user_id: UserId,
    pub upload_id: UploadId,
    pub skill_id: SkillId,
    pub identified_at: DateTime<Utc>,
}

/// A personalized quiz, created at most once per upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Quiz {
    pub id: QuizId,
    pub user_id: UserId,
    pub upload_id: UploadId,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, by the first accepted grading pass.
    pub completed_at: Option<DateTime<Utc>>,
}

/// One multiple-choice question of a quiz. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct QuizQuestion {
    pub id: QuestionId,
    pub quiz_id: QuizId,
    pub skill_id: SkillId,
    pub text: String,
    pub options: Json<OptionMap>,
    pub correct_option: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct QuizAttempt {
    pub id: AttemptId,
    pub user_id: UserId,
    pub question_id: QuestionId,
    pub submitted_answer: String,
    pub is_correct: bool,
    pub attempted_at: DateTime<Utc>,
}

/// A queued request for a remediation lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct VideoJob {
    pub id: VideoJobId,
    pub user_id: UserId,
    pub skill_id: SkillId,
    /// The incorrect quiz attempt that queued this job.
    pub quiz_attempt_id: Option<AttemptId>,
    pub status: VideoJobStatus,
    /// Number of generation runs started for this job.
    pub attempts: i64,
    pub last_error: Option<String>,
    pub queued_at: DateTime<Utc>,
    /// Start of the latest generation run.
    pub claimed_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// The artifact produced by a delivered video job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Lesson {
    pub id: LessonId,
    pub skill_id: SkillId,
    pub job_id: VideoJobId,
    pub script: String,
    pub generated_at: DateTime<Utc>,
    /// Set exactly once, when the learner confirms viewing.
    pub watched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PracticeQuestion {
    pub id: PracticeQuestionId,
    pub lesson_id: LessonId,
    pub skill_id: SkillId,
    pub text: String,
    pub options: Json<OptionMap>,
    pub correct_option: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PracticeAttempt {
    pub id: PracticeAttemptId,
    pub user_id: UserId,
    pub question_id: PracticeQuestionId,
    pub submitted_answer: String,
    pub is_correct: bool,
    pub attempted_at: DateTime<Utc>,
}

/// Per-user reward metric, incremented once per mastered practice batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct GrowthCounter {
    pub user_id: UserId,
    pub count: i64,
    pub last_growth_at: Option<DateTime<Utc>>,
}

impl GrowthCounter {
    /// The state of a counter that has never grown.
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            count: 0,
            last_growth_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Content generator payloads
// ---------------------------------------------------------------------------

/// A skill as reported by, or described to, the content generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillDescriptor {
    pub name: String,
    #[serde(default)]
    pub category: String,
}

impl SkillDescriptor {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
        }
    }
}

/// A multiple-choice question produced by the content generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    pub text: String,
    pub options: OptionMap,
    pub correct_option: String,
}

impl GeneratedQuestion {
    /// Normalize option keys and check the question shape: non-empty text,
    /// exactly four options, and a correct key present among them.
    pub fn validate(self) -> Result<Self, GenerationError> {
        let text = self.text.trim().to_string();
        if text.is_empty() {
            return Err(GenerationError::Malformed("question text is empty".into()));
        }

        let options: OptionMap = self
            .options
            .into_iter()
            .map(|(key, value)| (normalize_option_key(&key), value.trim().to_string()))
            .filter(|(key, _)| !key.is_empty())
            .collect();
        if options.len() != OPTIONS_PER_QUESTION {
            return Err(GenerationError::Malformed(format!(
                "expected {OPTIONS_PER_QUESTION} options, got {}",
                options.len()
            )));
        }

        let correct_option = normalize_option_key(&self.correct_option);
        if !options.contains_key(&correct_option) {
            return Err(GenerationError::Malformed(format!(
                "correct option '{correct_option}' is not one of the options"
            )));
        }

        Ok(Self {
            text,
            options,
            correct_option,
        })
    }
}

// ---------------------------------------------------------------------------
// Submissions
// ---------------------------------------------------------------------------

/// A learner's answers: question identifier → selected option key.
///
/// Keys are kept as submitted (trimmed) so that malformed identifiers can be
/// reported and skipped by the grader rather than rejected up front.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Answers(BTreeMap<String, String>);

impl Answers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, question: impl ToString, selected: impl Into<String>) {
        self.0
            .insert(question.to_string().trim().to_string(), selected.into());
    }

    /// Parse a JSON object of answers. String, number, and boolean values are
    /// accepted and stringified.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, PipelineError> {
        let object = value.as_object().ok_or_else(|| {
            PipelineError::InvalidInput("answers must be a JSON object".into())
        })?;

        let mut answers = Answers::new();
        for (key, selected) in object {
            let selected = match selected {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                other => {
                    return Err(PipelineError::InvalidInput(format!(
                        "answer for '{key}' must be a string, got {other}"
                    )))
                }
            };
            answers.insert(key, selected);
        }
        Ok(answers)
    }

    pub fn get(&self, question: &str) -> Option<&str> {
        self.0.get(question.trim()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: ToString, V: Into<String>> FromIterator<(K, V)> for Answers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut answers = Answers::new();
        for (question, selected) in iter {
            answers.insert(question, selected);
        }
        answers
    }
}
