//! Backup scheduling gate.
//!
//! An external cron source calls [`BackupScheduler::consider_run`] on an
//! interval. The gate decides whether an export is due and, if so, claims the
//! period by writing `last_backup_at = now` *before* the export starts. A
//! second trigger that reads the fresh timestamp declines to run, even while the
//! first export is still in progress or after it failed. A failed export
//! therefore uses up its period; the next attempt waits for the next one.
//!
//! The claim is a compare-and-swap against the value read during the decision,
//! so two triggers racing through the same read can not both proceed when the
//! settings store supports a conditional write.

use crate::export::{iso_timestamp, ExportArtifact};
use crate::settings::{self, BackupFrequency, Setting, SettingKey, SettingsStore};
use crate::{Result, StorageError};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Frequency is `none`.
    ManualOnly,
    /// The configured interval has not elapsed yet.
    TooSoon { remaining: Duration },
    /// Another trigger claimed this period between our read and our write.
    AlreadyClaimed,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ManualOnly => f.write_str("manual only"),
            SkipReason::TooSoon { remaining } => {
                let mins = remaining.num_minutes().max(0);
                write!(f, "too soon: next backup due in {}h {}m", mins / 60, mins % 60)
            }
            SkipReason::AlreadyClaimed => f.write_str("already started by another trigger"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Skipped(SkipReason),
    Completed {
        file_name: String,
        timestamp: DateTime<Utc>,
    },
}

/// Body returned by the trigger endpoint for a non-error outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TriggerResponse {
    #[serde(rename_all = "camelCase")]
    Skipped {
        success: bool,
        skipped: bool,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        success: bool,
        file_name: String,
        timestamp: String,
    },
}

impl From<&TriggerOutcome> for TriggerResponse {
    fn from(outcome: &TriggerOutcome) -> Self {
        match outcome {
            TriggerOutcome::Skipped(reason) => TriggerResponse::Skipped {
                success: true,
                skipped: true,
                reason: reason.to_string(),
            },
            TriggerOutcome::Completed {
                file_name,
                timestamp,
            } => TriggerResponse::Completed {
                success: true,
                file_name: file_name.clone(),
                timestamp: iso_timestamp(timestamp),
            },
        }
    }
}

pub struct BackupScheduler {
    settings: Arc<dyn SettingsStore>,
    secret: String,
}

impl BackupScheduler {
    pub fn new(settings: Arc<dyn SettingsStore>, secret: impl Into<String>) -> Self {
        Self {
            settings,
            secret: secret.into(),
        }
    }

    /// An empty configured secret rejects every caller.
    pub fn authorize(&self, presented: Option<&str>) -> Result<()> {
        match presented {
            Some(token) if !self.secret.is_empty() && token == self.secret => Ok(()),
            _ => Err(StorageError::Unauthorized("invalid trigger secret".into())),
        }
    }

    pub async fn consider_run<F, Fut>(
        &self,
        presented: Option<&str>,
        export: F,
    ) -> Result<TriggerOutcome>
    where
        F: FnOnce(DateTime<Utc>) -> Fut,
        Fut: Future<Output = Result<ExportArtifact>>,
    {
        self.consider_run_at(presented, Utc::now(), export).await
    }

    pub async fn consider_run_at<F, Fut>(
        &self,
        presented: Option<&str>,
        now: DateTime<Utc>,
        export: F,
    ) -> Result<TriggerOutcome>
    where
        F: FnOnce(DateTime<Utc>) -> Fut,
        Fut: Future<Output = Result<ExportArtifact>>,
    {
        self.authorize(presented)?;

        let frequency = settings::backup_frequency(self.settings.as_ref()).await?;
        if frequency == BackupFrequency::None {
            tracing::debug!("Backup frequency is manual, skipping");
            return Ok(TriggerOutcome::Skipped(SkipReason::ManualOnly));
        }

        let raw_last = self.settings.get_raw(SettingKey::LastBackupAt).await?;
        let last = raw_last.as_deref().and_then(|raw| {
            match Setting::decode(SettingKey::LastBackupAt, raw) {
                Ok(Setting::LastBackupAt(ts)) => Some(ts),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring unreadable last_backup_at");
                    None
                }
            }
        });

        if let Some(remaining) = remaining_wait(frequency, last, now) {
            tracing::debug!(remaining_secs = remaining.num_seconds(), "Backup not due yet");
            return Ok(TriggerOutcome::Skipped(SkipReason::TooSoon { remaining }));
        }

        // Claim the period before doing any work.
        let claim = Setting::LastBackupAt(now).encode()?;
        let claimed = self
            .settings
            .compare_and_swap_raw(SettingKey::LastBackupAt, raw_last.as_deref(), &claim)
            .await?;
        if !claimed {
            tracing::warn!("Backup period was claimed concurrently, skipping");
            return Ok(TriggerOutcome::Skipped(SkipReason::AlreadyClaimed));
        }

        tracing::info!(
            frequency = ?frequency,
            at = %iso_timestamp(&now),
            "Scheduled backup starting"
        );
        match export(now).await {
            Ok(artifact) => {
                tracing::info!(
                    file = %artifact.file_name,
                    bytes = artifact.size,
                    "Scheduled backup finished"
                );
                Ok(TriggerOutcome::Completed {
                    file_name: artifact.file_name,
                    timestamp: artifact.timestamp,
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "Scheduled backup failed; period stays claimed");
                Err(e)
            }
        }
    }
}

/// Time left before the next run is due, or `None` if it is due now.
pub fn remaining_wait(
    frequency: BackupFrequency,
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let interval = frequency.interval()?;
    let last = last?;
    let elapsed = now - last;
    if elapsed < interval {
        Some(interval - elapsed)
    } else {
        None
    }
}
