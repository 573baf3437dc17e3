//! Offline, deterministic content generator.
//!
//! Used for local runs without an API key and by the scenario tests. Every
//! generated question has "A" as its correct option.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use skillforge_core::model::{GeneratedQuestion, SkillDescriptor};
use skillforge_core::traits::ContentGenerator;
use skillforge_core::GenerationError;

/// The option every scripted question marks as correct.
pub const SCRIPTED_CORRECT_OPTION: &str = "A";

/// A generator that answers from configuration instead of a model.
///
/// Classification returns the configured skills, or, when none are
/// configured, parses the upload content: one skill per non-empty line as
/// `name | category`, with `#` starting a comment line.
#[derive(Default)]
pub struct ScriptedGenerator {
    skills: Vec<SkillDescriptor>,
    malformed_classification: bool,
    fail_question_after: Option<u32>,
    failing_lessons: bool,
    classify_calls: AtomicU32,
    question_calls: AtomicU32,
    lesson_calls: AtomicU32,
    last_skill: Mutex<Option<SkillDescriptor>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always classify these skills, whatever the content.
    pub fn with_skills(skills: Vec<SkillDescriptor>) -> Self {
        Self {
            skills,
            ..Self::default()
        }
    }

    pub fn with_malformed_classification(mut self) -> Self {
        self.malformed_classification = true;
        self
    }

    /// Succeed for the first `n` question requests, then time out.
    pub fn with_failing_question_after(mut self, n: u32) -> Self {
        self.fail_question_after = Some(n);
        self
    }

    pub fn with_failing_lessons(mut self) -> Self {
        self.failing_lessons = true;
        self
    }

    pub fn classify_calls(&self) -> u32 {
        self.classify_calls.load(Ordering::Relaxed)
    }

    pub fn question_calls(&self) -> u32 {
        self.question_calls.load(Ordering::Relaxed)
    }

    pub fn lesson_calls(&self) -> u32 {
        self.lesson_calls.load(Ordering::Relaxed)
    }

    /// The skill of the most recent question or lesson request.
    pub fn last_skill(&self) -> Option<SkillDescriptor> {
        self.last_skill.lock().ok().and_then(|last| last.clone())
    }

    fn remember(&self, skill: &SkillDescriptor) {
        if let Ok(mut last) = self.last_skill.lock() {
            *last = Some(skill.clone());
        }
    }
}

/// Parse `name | category` lines.
pub fn parse_skill_lines(content: &str) -> Vec<SkillDescriptor> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| match line.split_once('|') {
            Some((name, category)) => SkillDescriptor::new(name.trim(), category.trim()),
            None => SkillDescriptor::new(line, ""),
        })
        .collect()
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn classify_skills(
        &self,
        content: &str,
    ) -> Result<Vec<SkillDescriptor>, GenerationError> {
        self.classify_calls.fetch_add(1, Ordering::Relaxed);
        if self.malformed_classification {
            return Err(GenerationError::Malformed(
                "scripted classification is malformed".into(),
            ));
        }
        if self.skills.is_empty() {
            Ok(parse_skill_lines(content))
        } else {
            Ok(self.skills.clone())
        }
    }

    async fn generate_question(
        &self,
        skill: &SkillDescriptor,
    ) -> Result<GeneratedQuestion, GenerationError> {
        let served = self.question_calls.fetch_add(1, Ordering::SeqCst);
        self.remember(skill);
        if self.fail_question_after.is_some_and(|n| served >= n) {
            return Err(GenerationError::Timeout(30));
        }

        Ok(GeneratedQuestion {
            text: format!("Which statement about {} is accurate?", skill.name),
            options: [
                ("A", format!("The accurate statement about {}", skill.name)),
                ("B", "A common misconception".to_string()),
                ("C", "An unrelated rule".to_string()),
                ("D", "None of the above".to_string()),
            ]
            .into_iter()
            .map(|(key, text)| (key.to_string(), text))
            .collect(),
            correct_option: SCRIPTED_CORRECT_OPTION.to_string(),
        })
    }

    async fn generate_lesson_script(
        &self,
        skill: &SkillDescriptor,
    ) -> Result<String, GenerationError> {
        self.lesson_calls.fetch_add(1, Ordering::Relaxed);
        self.remember(skill);
        if self.failing_lessons {
            return Err(GenerationError::NetworkError("scripted lesson failure".into()));
        }

        Ok(format!(
            "Introduction: why {name} matters in {category}.\n\
             Core concept: how {name} works.\n\
             Examples: two worked problems.\n\
             Common mistakes: what to watch for.\n\
             Summary: the key takeaways for {name}.",
            name = skill.name,
            category = skill.category,
        ))
    }
}
