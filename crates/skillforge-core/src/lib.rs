//! skillforge-core: Remediation pipeline, entity store, and stage workflows.
//!
//! This crate defines the data model, the collaborator traits, the SQLite
//! entity store, and the per-entity state machines that carry a learner from
//! an uploaded test result to a mastered skill.

pub mod engine;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod store;
pub mod tracker;
pub mod traits;
pub mod views;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{Dispatcher, DrainReport, PipelineEvent};
pub use error::{ErrorKind, GenerationError, PipelineError, Result};
pub use pipeline::{Pipeline, PipelineConfig, PracticeResult, QuizResult, StageOutcome};
pub use store::Store;
pub use tracker::{ProgressPolicy, SkillProgressTracker};
