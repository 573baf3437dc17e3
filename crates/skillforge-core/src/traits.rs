//! Collaborator traits consumed by the pipeline.
//!
//! The content generator is implemented by the `skillforge-providers` crate;
//! the upload source is implemented by whichever transport owns file
//! handling (the CLI reads from the filesystem).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::GenerationError;
use crate::model::{GeneratedQuestion, SkillDescriptor};

// ---------------------------------------------------------------------------
// Content generator
// ---------------------------------------------------------------------------

/// External service that synthesizes skill classifications, questions, and
/// lesson scripts. Calls may be slow and may fail; they have no side effects
/// on pipeline state.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Human-readable generator name (e.g. "openai").
    fn name(&self) -> &str;

    /// Classify the skills a learner missed in a raw test result.
    async fn classify_skills(&self, content: &str)
        -> Result<Vec<SkillDescriptor>, GenerationError>;

    /// Synthesize one original multiple-choice question for a skill.
    async fn generate_question(
        &self,
        skill: &SkillDescriptor,
    ) -> Result<GeneratedQuestion, GenerationError>;

    /// Write a lesson script explaining a skill.
    async fn generate_lesson_script(
        &self,
        skill: &SkillDescriptor,
    ) -> Result<String, GenerationError>;

    /// Produce `count` practice questions for a skill.
    ///
    /// The default asks for one question per slot, tagging each request with
    /// its slot so providers vary the content.
    async fn generate_practice_batch(
        &self,
        skill: &SkillDescriptor,
        count: usize,
    ) -> Result<Vec<GeneratedQuestion>, GenerationError> {
        let mut batch = Vec::with_capacity(count);
        for slot in 1..=count {
            let variant = SkillDescriptor {
                name: format!("{} (practice question {slot} of {count})", skill.name),
                category: skill.category.clone(),
            };
            batch.push(self.generate_question(&variant).await?);
        }
        Ok(batch)
    }
}

// ---------------------------------------------------------------------------
// Upload source
// ---------------------------------------------------------------------------

/// Resolves an upload's content reference to its raw text.
#[async_trait]
pub trait UploadSource: Send + Sync {
    async fn fetch(&self, content_ref: &str) -> anyhow::Result<String>;
}

/// Upload source whose content references are the content itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineUploadSource;

#[async_trait]
impl UploadSource for InlineUploadSource {
    async fn fetch(&self, content_ref: &str) -> anyhow::Result<String> {
        Ok(content_ref.to_string())
    }
}

/// In-memory upload source keyed by content reference.
#[derive(Debug, Default)]
pub struct MemoryUploadSource {
    contents: RwLock<HashMap<String, String>>,
}

impl MemoryUploadSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, content_ref: impl Into<String>, content: impl Into<String>) {
        if let Ok(mut contents) = self.contents.write() {
            contents.insert(content_ref.into(), content.into());
        }
    }

    pub fn remove(&self, content_ref: &str) {
        if let Ok(mut contents) = self.contents.write() {
            contents.remove(content_ref);
        }
    }
}

#[async_trait]
impl UploadSource for MemoryUploadSource {
    async fn fetch(&self, content_ref: &str) -> anyhow::Result<String> {
        let contents = self
            .contents
            .read()
            .map_err(|_| anyhow::anyhow!("upload source lock poisoned"))?;
        contents
            .get(content_ref)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no content stored for '{content_ref}'"))
    }
}
