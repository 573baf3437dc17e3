//! Configuration loading and generator factory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use skillforge_core::model::SkillDescriptor;
use skillforge_core::traits::ContentGenerator;
use skillforge_core::{PipelineConfig, ProgressPolicy};

use crate::generator::LlmContentGenerator;
use crate::ollama::OllamaClient;
use crate::openai::OpenAiClient;
use crate::scripted::ScriptedGenerator;

/// Configuration for a single content provider.
///
/// Note: Custom Debug impl masks API keys to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    OpenAI {
        api_key: String,
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        org_id: Option<String>,
    },
    Ollama {
        #[serde(default = "default_ollama_url")]
        base_url: String,
    },
    /// Offline generator; see [`ScriptedGenerator`].
    Scripted {
        #[serde(default)]
        skills: Vec<SkillDescriptor>,
    },
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderConfig::OpenAI {
                api_key: _,
                base_url,
                org_id,
            } => f
                .debug_struct("OpenAI")
                .field("api_key", &"***")
                .field("base_url", base_url)
                .field("org_id", org_id)
                .finish(),
            ProviderConfig::Ollama { base_url } => f
                .debug_struct("Ollama")
                .field("base_url", base_url)
                .finish(),
            ProviderConfig::Scripted { skills } => f
                .debug_struct("Scripted")
                .field("skills", &skills.len())
                .finish(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

/// Top-level skillforge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillforgeConfig {
    /// Provider configurations keyed by name.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Provider used for every generation call.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_temperature")]
    pub default_temperature: f64,
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Max concurrent stage tasks.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_practice_question_count")]
    pub practice_question_count: usize,
    /// Runs allowed per upload and per video job before retries are refused.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Seconds before `skillforge worker` treats a running stage as interrupted.
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
    #[serde(default)]
    pub progress_policy: ProgressPolicy,
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4.1-mini".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_database_path() -> PathBuf {
    PathBuf::from("./skillforge.db")
}
fn default_parallelism() -> usize {
    4
}
fn default_practice_question_count() -> usize {
    3
}
fn default_max_attempts() -> u32 {
    3
}
fn default_stall_timeout_secs() -> u64 {
    900
}

impl Default for SkillforgeConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            database_path: default_database_path(),
            parallelism: default_parallelism(),
            practice_question_count: default_practice_question_count(),
            max_attempts: default_max_attempts(),
            stall_timeout_secs: default_stall_timeout_secs(),
            progress_policy: ProgressPolicy::default(),
        }
    }
}

impl SkillforgeConfig {
    /// Pipeline tuning derived from this configuration, rejecting values
    /// the stages cannot run with.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let config = PipelineConfig {
            parallelism: self.parallelism,
            practice_question_count: self.practice_question_count,
            max_attempts: self.max_attempts,
            stall_timeout_secs: self.stall_timeout_secs,
            progress_policy: self.progress_policy,
        };
        config.validate().context("invalid pipeline settings")?;
        Ok(config)
    }

    /// Build the generator of the named provider, or of the default one.
    ///
    /// `scripted` is always available, even when not configured.
    pub fn generator(&self, provider: Option<&str>) -> Result<Arc<dyn ContentGenerator>> {
        let name = provider.unwrap_or(&self.default_provider);
        match self.providers.get(name) {
            Some(config) => create_generator(config, &self.default_model, self.default_temperature),
            None if name == "scripted" => Ok(Arc::new(ScriptedGenerator::new())),
            None => anyhow::bail!(
                "provider '{name}' is not configured (run `skillforge init` or add [providers.{name}])"
            ),
        }
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

/// Resolve env vars in a provider config.
fn resolve_provider_config(config: &ProviderConfig) -> ProviderConfig {
    match config {
        ProviderConfig::OpenAI {
            api_key,
            base_url,
            org_id,
        } => ProviderConfig::OpenAI {
            api_key: resolve_env_vars(api_key),
            base_url: base_url.as_ref().map(|u| resolve_env_vars(u)),
            org_id: org_id.as_ref().map(|o| resolve_env_vars(o)),
        },
        ProviderConfig::Ollama { base_url } => ProviderConfig::Ollama {
            base_url: resolve_env_vars(base_url),
        },
        ProviderConfig::Scripted { skills } => ProviderConfig::Scripted {
            skills: skills.clone(),
        },
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `skillforge.toml` in the current directory
/// 2. `~/.config/skillforge/config.toml`
///
/// Environment variable overrides: `SKILLFORGE_OPENAI_KEY`, `SKILLFORGE_DATABASE`.
pub fn load_config() -> Result<SkillforgeConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<SkillforgeConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("skillforge.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<SkillforgeConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => SkillforgeConfig::default(),
    };

    // Apply env var overrides
    if let Ok(key) = std::env::var("SKILLFORGE_OPENAI_KEY") {
        let entry = config
            .providers
            .entry("openai".into())
            .or_insert(ProviderConfig::OpenAI {
                api_key: String::new(),
                base_url: None,
                org_id: None,
            });
        if let ProviderConfig::OpenAI { api_key, .. } = entry {
            *api_key = key;
        }
    }
    if let Ok(database) = std::env::var("SKILLFORGE_DATABASE") {
        if !database.is_empty() {
            config.database_path = PathBuf::from(database);
        }
    }

    config.providers = config
        .providers
        .iter()
        .map(|(k, v)| (k.clone(), resolve_provider_config(v)))
        .collect();

    config.pipeline_config()?;

    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("skillforge"))
}

/// Create a content generator from its provider configuration.
pub fn create_generator(
    config: &ProviderConfig,
    model: &str,
    temperature: f64,
) -> Result<Arc<dyn ContentGenerator>> {
    match config {
        ProviderConfig::OpenAI {
            api_key,
            base_url,
            org_id,
        } => {
            anyhow::ensure!(
                !api_key.is_empty(),
                "OpenAI API key is empty (set SKILLFORGE_OPENAI_KEY)"
            );
            let client = OpenAiClient::new(api_key, base_url.clone(), org_id.clone())?;
            Ok(Arc::new(LlmContentGenerator::new(
                Arc::new(client),
                model,
                temperature,
            )))
        }
        ProviderConfig::Ollama { base_url } => {
            let client = OllamaClient::new(base_url)?;
            Ok(Arc::new(LlmContentGenerator::new(
                Arc::new(client),
                model,
                temperature,
            )))
        }
        ProviderConfig::Scripted { skills } => {
            Ok(Arc::new(ScriptedGenerator::with_skills(skills.clone())))
        }
    }
}
