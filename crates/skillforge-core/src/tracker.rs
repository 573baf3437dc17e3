//! The per (user, skill) progress state every stage reads and writes.
//!
//! All progress writes go through [`SkillProgressTracker::upsert`] so the
//! overwrite policy lives in one place. Callers pass the connection of their
//! own write transaction; the tracker never opens one itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{ProgressStatus, SkillId, UserId};
use crate::store::repo::{self, ProgressEntry};

/// How progress writes treat a pair that is already `mastered`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPolicy {
    /// Every write overwrites. Leaving `mastered` is logged.
    #[default]
    Permissive,
    /// A `mastered` pair only changes on a fresh miss.
    KeepMastered,
}

#[derive(Debug, Clone, Default)]
pub struct SkillProgressTracker {
    policy: ProgressPolicy,
}

impl SkillProgressTracker {
    pub fn new(policy: ProgressPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ProgressPolicy {
        self.policy
    }

    /// Current status of a pair, or `None` when it is untracked.
    pub async fn get(
        &self,
        conn: &mut SqliteConnection,
        user: UserId,
        skill: SkillId,
    ) -> Result<Option<ProgressStatus>> {
        Ok(repo::get_progress(conn, user, skill)
            .await?
            .map(|progress| progress.status))
    }

    /// Write `status` for a pair, creating the row if absent. Returns the
    /// status in effect afterwards.
    pub async fn upsert(
        &self,
        conn: &mut SqliteConnection,
        user: UserId,
        skill: SkillId,
        status: ProgressStatus,
        now: DateTime<Utc>,
    ) -> Result<ProgressStatus> {
        let current = self.get(conn, user, skill).await?;

        if current == Some(ProgressStatus::Mastered) && status != ProgressStatus::Mastered {
            match self.policy {
                ProgressPolicy::KeepMastered if status != ProgressStatus::Missed => {
                    debug!(%user, %skill, requested = %status, "keeping mastered progress");
                    return Ok(ProgressStatus::Mastered);
                }
                _ => {
                    warn!(%user, %skill, new_status = %status, "progress leaves mastered");
                }
            }
        }

        repo::upsert_progress(conn, user, skill, status, now).await?;
        debug!(%user, %skill, %status, "progress updated");
        Ok(status)
    }

    /// Every tracked pair of a user, with skill names.
    pub async fn list(
        &self,
        conn: &mut SqliteConnection,
        user: UserId,
    ) -> Result<Vec<ProgressEntry>> {
        Ok(repo::progress_for_user(conn, user).await?)
    }
}
