//! Runs the scheduling gate from the HTTP trigger and from the optional in-process cron tick.

use crate::state::AppState;
use crm_storage::export::{export_streaming_to_dir, ExportManifest};
use crm_storage::scheduler::TriggerOutcome;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

/// Ask the gate whether a backup is due and run the streaming export if so.
pub async fn trigger_backup(
    state: &AppState,
    secret: Option<&str>,
) -> crm_storage::Result<TriggerOutcome> {
    let config = &state.config;
    state
        .scheduler
        .consider_run(secret, |now| async move {
            let manifest = ExportManifest::at(
                now,
                config.export_schema_version.clone(),
                config.streaming_tables.clone(),
            );
            export_streaming_to_dir(
                &state.scanner,
                &manifest,
                &config.backups_dir,
                config.export_page_size,
                None,
                state.audit.as_ref(),
            )
            .await
        })
        .await
}

pub struct BackupTicker {
    scheduler: Mutex<JobScheduler>,
    state: Arc<AppState>,
}

impl BackupTicker {
    pub async fn new(state: Arc<AppState>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            state,
        })
    }

    /// Register the tick. Each tick behaves exactly like an external trigger call.
    pub async fn schedule(&self, cron_expression: &str) -> anyhow::Result<()> {
        let state = self.state.clone();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                let secret = state.config.cron_secret.clone();
                match trigger_backup(&state, Some(&secret)).await {
                    Ok(TriggerOutcome::Skipped(reason)) => {
                        tracing::debug!(reason = %reason, "Scheduled backup tick skipped");
                    }
                    Ok(TriggerOutcome::Completed { file_name, .. }) => {
                        tracing::info!(file = %file_name, "Scheduled backup completed");
                    }
                    Err(e) => tracing::error!(error = %e, "Scheduled backup failed"),
                }
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(cron = %cron_expression, "Backup tick scheduled");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}
