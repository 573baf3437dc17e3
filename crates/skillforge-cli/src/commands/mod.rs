//! Subcommand implementations and the state they share.

pub mod init;
pub mod lesson;
pub mod practice;
pub mod progress;
pub mod quiz;
pub mod upload;
pub mod video;
pub mod worker;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use skillforge_core::traits::UploadSource;
use skillforge_core::{Dispatcher, DrainReport, Pipeline, StageOutcome, Store};
use skillforge_providers::{load_config_from, SkillforgeConfig};

use crate::GlobalArgs;

/// Upload source whose content references are file paths.
pub struct FsUploadSource;

#[async_trait]
impl UploadSource for FsUploadSource {
    async fn fetch(&self, content_ref: &str) -> anyhow::Result<String> {
        tokio::fs::read_to_string(content_ref)
            .await
            .with_context(|| format!("failed to read upload {content_ref}"))
    }
}

/// An opened pipeline plus the dispatcher that runs its follow-up stages.
pub struct Session {
    pub config: SkillforgeConfig,
    pub pipeline: Pipeline,
    dispatcher: Dispatcher,
    json: bool,
}

impl Session {
    pub async fn open(global: &GlobalArgs) -> Result<Self> {
        let config = load_config_from(global.config.as_deref())?;
        let database = global
            .db
            .clone()
            .unwrap_or_else(|| config.database_path.clone());
        let store = Store::open(&database)
            .await
            .with_context(|| format!("failed to open database {}", database.display()))?;
        let generator = config.generator(global.provider.as_deref())?;
        debug!(generator = generator.name(), db = %database.display(), "session opened");

        let (pipeline, dispatcher) = Pipeline::new(
            store,
            generator,
            std::sync::Arc::new(FsUploadSource),
            config.pipeline_config()?,
        );
        Ok(Self {
            config,
            pipeline,
            dispatcher,
            json: global.json,
        })
    }

    /// Run every follow-up stage queued so far, and the ones they queue.
    pub async fn settle(&mut self) -> DrainReport {
        let report = self.dispatcher.drain().await;
        if report.failed > 0 {
            warn!(
                failed = report.failed,
                "some follow-up stages failed; see `skillforge worker` to retry"
            );
        }
        report
    }

    /// Print `value` as pretty JSON when `--json` was given, otherwise run `text`.
    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            text(value);
        }
        Ok(())
    }
}

/// Absolute path of an upload file, checked for readability.
pub fn content_ref(file: &Path) -> Result<PathBuf> {
    let path = std::fs::canonicalize(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    anyhow::ensure!(path.is_file(), "{} is not a file", path.display());
    Ok(path)
}

/// One-line description of a trigger result.
pub fn describe<T>(outcome: &StageOutcome<T>, applied: &str) -> String {
    match outcome {
        StageOutcome::Applied(_) => applied.to_string(),
        StageOutcome::Skipped { reason, .. } => format!("skipped: {reason}"),
        StageOutcome::NoOp(reason) => format!("nothing to do: {reason}"),
    }
}

/// Parse the `--answers` argument: a JSON object of question id to option.
pub fn parse_answers(raw: &str) -> Result<skillforge_core::model::Answers> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("--answers must be a JSON object")?;
    Ok(skillforge_core::model::Answers::from_json(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_from_argument() {
        let answers = parse_answers(r#"{"12": "b", "13": "D"}"#).unwrap();
        assert_eq!(answers.len(), 2);
        assert_eq!(answers.get("12"), Some("b"));
        assert!(parse_answers("B").is_err());
        assert!(parse_answers("[1]").is_err());
    }

    #[test]
    fn describe_outcomes() {
        assert_eq!(describe(&StageOutcome::Applied(1), "done"), "done");
        assert_eq!(
            describe(&StageOutcome::<i32>::NoOp("no skills".into()), "done"),
            "nothing to do: no skills"
        );
    }

    #[tokio::test]
    async fn fs_source_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.txt");
        std::fs::write(&path, "Slope | Math").unwrap();

        let content = FsUploadSource
            .fetch(path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(content, "Slope | Math");
        assert!(FsUploadSource.fetch("/nonexistent/upload.txt").await.is_err());
    }
}
