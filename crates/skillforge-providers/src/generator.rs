//! Content generator backed by a chat-completion model.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use skillforge_core::model::{GeneratedQuestion, OptionMap, SkillDescriptor};
use skillforge_core::traits::ContentGenerator;
use skillforge_core::GenerationError;

use crate::client::{ChatClient, ChatRequest};
use crate::extract::extract_json;

const CLASSIFY_SYSTEM_PROMPT: &str =
    "You are an education expert specializing in SAT test analysis.";
const QUESTION_SYSTEM_PROMPT: &str = "You are an expert SAT question creator.";
const LESSON_SYSTEM_PROMPT: &str = "You are an expert educational content creator.";

const DEFAULT_MAX_TOKENS: u32 = 2048;

/// [`ContentGenerator`] that prompts a chat model and parses its JSON.
pub struct LlmContentGenerator {
    client: Arc<dyn ChatClient>,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl LlmContentGenerator {
    pub fn new(client: Arc<dyn ChatClient>, model: impl Into<String>, temperature: f64) -> Self {
        Self {
            client,
            model: model.into(),
            temperature,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    async fn ask(
        &self,
        system_prompt: &str,
        prompt: String,
        json_mode: bool,
    ) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: self.model.clone(),
            system_prompt: system_prompt.to_string(),
            prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            json_mode,
        };
        let response = self.client.complete(&request).await?;
        debug!(
            provider = self.client.name(),
            model = %response.model,
            latency_ms = response.latency_ms,
            tokens = response.usage.total_tokens,
            "generator call finished"
        );
        if response.content.trim().is_empty() {
            return Err(GenerationError::Malformed("empty response".into()));
        }
        Ok(response.content)
    }
}

fn classify_prompt(content: &str) -> String {
    format!(
        r#"Analyze the following test results and identify which specific skills or concepts the student is struggling with.
For each missed question, identify the specific skill (e.g., 'Linear Equations', 'Comma Usage', 'Tone Analysis').

Group similar skills together and provide a clean list of unique skills with appropriate categories.
Use categories like 'Math', 'Reading & Writing', etc.

Respond with a JSON object of the form:
{{"skills": [{{"name": "Linear Equations", "category": "Math"}}, {{"name": "Comma Usage", "category": "Reading & Writing"}}]}}

Here is the student's test result:
{content}"#
    )
}

fn question_prompt(skill: &SkillDescriptor) -> String {
    format!(
        r#"Create an original SAT-style question that tests a student's understanding of {name} ({category}).

Requirements:
1. The question must be original, not copied or paraphrased from any existing SAT question
2. It should test the same underlying concept with unique content
3. Format it as a multiple-choice question with options A, B, C, and D
4. Mark exactly one option as correct

Respond with a JSON object:
{{"question_text": "...", "options": {{"A": "...", "B": "...", "C": "...", "D": "..."}}, "correct_option": "A"}}"#,
        name = skill.name,
        category = skill.category,
    )
}

fn lesson_prompt(skill: &SkillDescriptor) -> String {
    format!(
        r#"Create a script for a 5-minute educational video explaining the concept of {name} ({category}).

Requirements:
1. The content must be original and concept-based
2. Do not reference or reuse specific College Board content or questions
3. Write in a conversational, engaging style suitable for high school students
4. Include directions for any helpful visual aids or demonstrations

Structure the script with these sections:
- Introduction (hook and relevance)
- Core concept explanation
- Examples (2-3 clear examples)
- Common mistakes to avoid
- Summary and key takeaways"#,
        name = skill.name,
        category = skill.category,
    )
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassificationPayload {
    Wrapped { skills: Vec<SkillDescriptor> },
    Bare(Vec<SkillDescriptor>),
}

#[derive(Deserialize)]
struct QuestionPayload {
    #[serde(alias = "question_text")]
    text: String,
    options: OptionMap,
    #[serde(alias = "correct_answer", alias = "answer")]
    correct_option: String,
}

/// Parse a classification response: `{"skills": [...]}` or a bare array.
pub fn parse_classification(content: &str) -> Result<Vec<SkillDescriptor>, GenerationError> {
    let json = extract_json(content);
    match serde_json::from_str::<ClassificationPayload>(&json) {
        Ok(ClassificationPayload::Wrapped { skills }) | Ok(ClassificationPayload::Bare(skills)) => {
            Ok(skills)
        }
        Err(e) => Err(GenerationError::Malformed(format!(
            "unrecognized skill classification: {e}"
        ))),
    }
}

/// Parse and validate a question response.
pub fn parse_question(content: &str) -> Result<GeneratedQuestion, GenerationError> {
    let json = extract_json(content);
    let payload: QuestionPayload = serde_json::from_str(&json)
        .map_err(|e| GenerationError::Malformed(format!("unrecognized question: {e}")))?;
    GeneratedQuestion {
        text: payload.text,
        options: payload.options,
        correct_option: payload.correct_option,
    }
    .validate()
}

#[async_trait]
impl ContentGenerator for LlmContentGenerator {
    fn name(&self) -> &str {
        self.client.name()
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn classify_skills(
        &self,
        content: &str,
    ) -> Result<Vec<SkillDescriptor>, GenerationError> {
        let response = self
            .ask(CLASSIFY_SYSTEM_PROMPT, classify_prompt(content), true)
            .await?;
        parse_classification(&response)
    }

    #[instrument(skip_all, fields(model = %self.model, skill = %skill.name))]
    async fn generate_question(
        &self,
        skill: &SkillDescriptor,
    ) -> Result<GeneratedQuestion, GenerationError> {
        let response = self
            .ask(QUESTION_SYSTEM_PROMPT, question_prompt(skill), true)
            .await?;
        parse_question(&response)
    }

    #[instrument(skip_all, fields(model = %self.model, skill = %skill.name))]
    async fn generate_lesson_script(
        &self,
        skill: &SkillDescriptor,
    ) -> Result<String, GenerationError> {
        let response = self
            .ask(LESSON_SYSTEM_PROMPT, lesson_prompt(skill), false)
            .await?;
        Ok(response.trim().to_string())
    }
}
