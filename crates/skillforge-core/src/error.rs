//! Pipeline error types.
//!
//! `GenerationError` represents failures of the content generator. It lives
//! in `skillforge-core` so stages can classify provider failures (for
//! example, falling back on a malformed classification) without string
//! matching. `PipelineError` is what every trigger function returns.

use thiserror::Error;

use crate::model::{LessonId, PracticeQuestionId, QuizId, SkillId, UserId};

/// Errors that can occur when asking the content generator for content.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The API returned a 429 rate limit response.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Authentication failed (invalid API key).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The requested model was not found.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The API returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    NetworkError(String),

    /// The provider answered, but the content is empty or does not have the
    /// expected shape.
    #[error("malformed content: {0}")]
    Malformed(String),
}

impl GenerationError {
    /// Returns `true` if retrying the same request cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            GenerationError::AuthenticationFailed(_) | GenerationError::ModelNotFound(_)
        )
    }

    /// Returns the retry-after delay in milliseconds, if applicable.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            GenerationError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// Coarse classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed trigger input. Nothing was mutated.
    Validation,
    /// A collaborator (content generator or upload source) failed. The owning
    /// entity was moved to its `error` status where it has one.
    Generation,
    /// A commit or query failed. The triggering unit was rolled back.
    Storage,
}

/// Errors returned by pipeline trigger functions and read accessors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{entity} {id} does not belong to user {user}")]
    Forbidden {
        entity: &'static str,
        id: i64,
        user: UserId,
    },

    #[error("quiz {0} already submitted")]
    AlreadySubmitted(QuizId),

    #[error("skill {skill} already mastered by user {user}")]
    AlreadyMastered { user: UserId, skill: SkillId },

    #[error("expected {expected} answers, received {received}")]
    AnswerCountMismatch { expected: usize, received: usize },

    #[error("missing answer for practice question {0}")]
    MissingAnswer(PracticeQuestionId),

    #[error("no practice questions found for lesson {0}")]
    NoPracticeQuestions(LessonId),

    #[error("{entity} {id} cannot be retried from status '{status}'")]
    NotRetryable {
        entity: &'static str,
        id: i64,
        status: String,
    },

    #[error("{entity} {id} reached the limit of {max_attempts} attempts")]
    RetryLimitReached {
        entity: &'static str,
        id: i64,
        max_attempts: u32,
    },

    #[error("upload content unavailable: {0}")]
    Source(String),

    #[error("content generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl PipelineError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<i64>) -> Self {
        PipelineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Generation(_) | PipelineError::Source(_) => ErrorKind::Generation,
            PipelineError::Storage(_) => ErrorKind::Storage,
            _ => ErrorKind::Validation,
        }
    }
}

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_generation_errors() {
        assert!(GenerationError::AuthenticationFailed("bad key".into()).is_permanent());
        assert!(GenerationError::ModelNotFound("gpt-x".into()).is_permanent());
        assert!(!GenerationError::Timeout(30).is_permanent());
        assert!(!GenerationError::Malformed("empty".into()).is_permanent());
    }

    #[test]
    fn retry_after_only_for_rate_limits() {
        let limited = GenerationError::RateLimited {
            retry_after_ms: 5000,
        };
        assert_eq!(limited.retry_after_ms(), Some(5000));
        assert_eq!(GenerationError::NetworkError("reset".into()).retry_after_ms(), None);
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            PipelineError::AlreadySubmitted(QuizId(1)).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            PipelineError::from(GenerationError::Timeout(5)).kind(),
            ErrorKind::Generation
        );
        assert_eq!(
            PipelineError::Source("missing file".into()).kind(),
            ErrorKind::Generation
        );
        assert_eq!(
            PipelineError::from(sqlx::Error::RowNotFound).kind(),
            ErrorKind::Storage
        );
    }

    #[test]
    fn not_found_message() {
        let err = PipelineError::not_found("quiz", QuizId(7));
        assert_eq!(err.to_string(), "quiz 7 not found");
    }
}
