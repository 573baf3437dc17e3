//! skillforge-providers: content generator implementations.
//!
//! Implements the `ContentGenerator` trait over chat-completion models
//! (OpenAI, Ollama) and offline via a scripted generator, plus the TOML
//! configuration that selects between them.

pub mod client;
pub mod config;
pub mod extract;
pub mod generator;
pub mod ollama;
pub mod openai;
pub mod scripted;

pub use client::{ChatClient, ChatRequest, ChatResponse, TokenUsage};
pub use config::{create_generator, load_config, load_config_from, ProviderConfig, SkillforgeConfig};
pub use generator::LlmContentGenerator;
pub use scripted::ScriptedGenerator;
