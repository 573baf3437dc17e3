//! Upload intake and analysis: uploaded → processing → complete | error.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use super::{Pipeline, StageOutcome};
use crate::engine::PipelineEvent;
use crate::error::{GenerationError, PipelineError, Result};
use crate::model::{
    ProgressStatus, SkillDescriptor, Upload, UploadId, UploadStatus, UserId, DEFAULT_CATEGORY,
};
use crate::store::repo;

impl Pipeline {
    /// Record an uploaded test result and queue it for analysis.
    pub async fn register_upload(
        &self,
        user: UserId,
        test_identifier: &str,
        content_ref: &str,
    ) -> Result<Upload> {
        let upload = self
            .insert_upload(user, test_identifier, content_ref, UploadStatus::Uploaded)
            .await?;
        self.emit(PipelineEvent::UploadReceived(upload.id));
        Ok(upload)
    }

    /// Record an upload whose content has not arrived yet. Complete it with
    /// [`mark_uploaded`](Self::mark_uploaded).
    pub async fn reserve_upload(
        &self,
        user: UserId,
        test_identifier: &str,
        content_ref: &str,
    ) -> Result<Upload> {
        self.insert_upload(user, test_identifier, content_ref, UploadStatus::Pending)
            .await
    }

    async fn insert_upload(
        &self,
        user: UserId,
        test_identifier: &str,
        content_ref: &str,
        status: UploadStatus,
    ) -> Result<Upload> {
        let test_identifier = test_identifier.trim();
        let content_ref = content_ref.trim();
        if test_identifier.is_empty() {
            return Err(PipelineError::InvalidInput(
                "test identifier must not be empty".into(),
            ));
        }
        if content_ref.is_empty() {
            return Err(PipelineError::InvalidInput(
                "content reference must not be empty".into(),
            ));
        }

        let mut tx = self.store().write().await?;
        let upload =
            repo::insert_upload(tx.conn(), user, test_identifier, content_ref, status, Utc::now())
                .await?;
        tx.commit().await?;

        info!(upload = %upload.id, %user, test = test_identifier, status = %status, "upload registered");
        Ok(upload)
    }

    /// Move a pending upload to `uploaded` and queue it for analysis.
    pub async fn mark_uploaded(&self, id: UploadId) -> Result<StageOutcome<Upload>> {
        let mut tx = self.store().write().await?;
        let upload = repo::get_upload(tx.conn(), id)
            .await?
            .ok_or_else(|| PipelineError::not_found("upload", id))?;

        if !repo::transition_upload(
            tx.conn(),
            id,
            UploadStatus::Pending,
            UploadStatus::Uploaded,
            Utc::now(),
        )
        .await?
        {
            return Ok(StageOutcome::skipped(
                format!("upload is already {}", upload.status),
                upload,
            ));
        }

        let upload = repo::get_upload(tx.conn(), id)
            .await?
            .ok_or_else(|| PipelineError::not_found("upload", id))?;
        tx.commit().await?;

        self.emit(PipelineEvent::UploadReceived(id));
        Ok(StageOutcome::Applied(upload))
    }

    /// Classify the skills missed on an upload.
    ///
    /// Runs from `uploaded`, or from `error` while the upload has attempts
    /// left. Any other status is a replay and is skipped.
    #[instrument(skip_all, fields(upload = %id))]
    pub async fn analyze_upload(&self, id: UploadId) -> Result<StageOutcome<Upload>> {
        let max_attempts = self.config().max_attempts;

        // Claim.
        let upload = {
            let mut tx = self.store().write().await?;
            let upload = repo::get_upload(tx.conn(), id)
                .await?
                .ok_or_else(|| PipelineError::not_found("upload", id))?;

            if !upload.status.accepts_analysis() {
                warn!(status = %upload.status, "analysis replay skipped");
                return Ok(StageOutcome::skipped(
                    format!("upload is {}", upload.status),
                    upload,
                ));
            }
            if upload.status == UploadStatus::Error && attempts_exhausted(upload.attempts, max_attempts)
            {
                return Err(PipelineError::RetryLimitReached {
                    entity: "upload",
                    id: id.into(),
                    max_attempts,
                });
            }
            if !repo::start_upload_processing(tx.conn(), id, upload.status, Utc::now()).await? {
                return Ok(StageOutcome::skipped("upload was claimed concurrently", upload));
            }
            tx.commit().await?;
            upload
        };
        info!(attempt = upload.attempts + 1, "analysis started");

        let content = match self.source().fetch(&upload.content_ref).await {
            Ok(content) => content,
            Err(e) => {
                let err = PipelineError::Source(format!("{e:#}"));
                self.record_upload_failure(id, &err).await;
                return Err(err);
            }
        };

        let classified = match self.generator().classify_skills(&content).await {
            Ok(skills) => skills,
            Err(GenerationError::Malformed(reason)) => {
                warn!(%reason, "classification malformed, continuing with no skills");
                Vec::new()
            }
            Err(e) => {
                let err = PipelineError::Generation(e);
                self.record_upload_failure(id, &err).await;
                return Err(err);
            }
        };
        let skills = normalize_classification(classified);

        match self.record_analysis(&upload, &skills).await {
            Ok(Some(upload)) => {
                info!(skills = skills.len(), "analysis complete");
                if !skills.is_empty() {
                    self.emit(PipelineEvent::AnalysisCompleted(id));
                }
                Ok(StageOutcome::Applied(upload))
            }
            Ok(None) => Ok(StageOutcome::NoOp(
                "upload left processing while analysis ran".into(),
            )),
            Err(err) => {
                self.record_upload_failure(id, &err).await;
                Err(err)
            }
        }
    }

    /// Operator re-trigger of an upload in `error`.
    pub async fn retry_upload(&self, id: UploadId) -> Result<StageOutcome<Upload>> {
        let upload = {
            let mut conn = self.store().read().await?;
            repo::get_upload(&mut conn, id)
                .await?
                .ok_or_else(|| PipelineError::not_found("upload", id))?
        };

        if upload.status != UploadStatus::Error {
            return Err(PipelineError::NotRetryable {
                entity: "upload",
                id: id.into(),
                status: upload.status.to_string(),
            });
        }

        info!(upload = %id, attempts = upload.attempts, "retrying upload analysis");
        self.analyze_upload(id).await
    }

    /// Write every effect of a successful classification in one transaction.
    /// Returns `None` if the upload is no longer `processing`.
    async fn record_analysis(
        &self,
        upload: &Upload,
        skills: &[SkillDescriptor],
    ) -> Result<Option<Upload>> {
        let now = Utc::now();
        let mut tx = self.store().write().await?;

        if !repo::transition_upload(
            tx.conn(),
            upload.id,
            UploadStatus::Processing,
            UploadStatus::Complete,
            now,
        )
        .await?
        {
            return Ok(None);
        }

        for descriptor in skills {
            let skill =
                repo::find_or_create_skill(tx.conn(), &descriptor.name, &descriptor.category)
                    .await?;
            repo::insert_missed_skill(tx.conn(), upload.user_id, upload.id, skill.id, now).await?;
            self.tracker()
                .upsert(tx.conn(), upload.user_id, skill.id, ProgressStatus::Missed, now)
                .await?;
        }

        let updated = repo::get_upload(tx.conn(), upload.id)
            .await?
            .ok_or_else(|| PipelineError::not_found("upload", upload.id))?;
        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn record_upload_failure(&self, id: UploadId, err: &PipelineError) {
        error!(upload = %id, error = %err, "analysis failed");
        let message = err.to_string();
        let result = async {
            let mut tx = self.store().write().await?;
            repo::fail_upload(tx.conn(), id, &message, Utc::now()).await?;
            tx.commit().await
        }
        .await;
        if let Err(e) = result {
            error!(upload = %id, error = %e, "could not record analysis failure");
        }
    }
}

fn attempts_exhausted(attempts: i64, max_attempts: u32) -> bool {
    attempts >= i64::from(max_attempts)
}

/// Drop blank names, default blank categories, and keep the first entry per
/// name.
fn normalize_classification(classified: Vec<SkillDescriptor>) -> Vec<SkillDescriptor> {
    let mut seen = HashSet::new();
    let mut skills = Vec::with_capacity(classified.len());

    for descriptor in classified {
        let name = descriptor.name.trim();
        if name.is_empty() {
            warn!("classified skill with empty name skipped");
            continue;
        }
        if !seen.insert(name.to_string()) {
            continue;
        }
        let category = match descriptor.category.trim() {
            "" => DEFAULT_CATEGORY,
            category => category,
        };
        skills.push(SkillDescriptor::new(name, category));
    }

    skills
}
