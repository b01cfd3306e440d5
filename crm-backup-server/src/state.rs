use crate::config::AppConfig;
use crate::db::connection::DbPool;
use crate::models::audit_log::SqliteAuditSink;
use crate::models::settings::SqliteSettingsStore;
use crate::services::table_scanner::SqliteTableScanner;
use crm_storage::audit::AuditSink;
use crm_storage::files::FileManager;
use crm_storage::local::LocalStorage;
use crm_storage::quota::StorageQuotaMonitor;
use crm_storage::remote::ObjectStore;
use crm_storage::scheduler::BackupScheduler;
use crm_storage::settings::SettingsStore;
use std::sync::Arc;
use std::time::Duration;

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub audit: Arc<dyn AuditSink>,
    pub scanner: SqliteTableScanner,
    pub scheduler: BackupScheduler,
    pub quota: StorageQuotaMonitor,
    pub files: FileManager,
}

impl AppState {
    /// `remote` is `None` when no object store is configured.
    pub fn new(db: DbPool, config: AppConfig, remote: Option<Arc<dyn ObjectStore>>) -> Self {
        let settings: Arc<dyn SettingsStore> = Arc::new(SqliteSettingsStore::new(db.clone()));
        let audit: Arc<dyn AuditSink> = Arc::new(SqliteAuditSink::new(db.clone()));
        let local = LocalStorage::new(&config.local_storage_root);

        Self {
            scanner: SqliteTableScanner::new(db.clone()),
            scheduler: BackupScheduler::new(settings.clone(), config.cron_secret.clone()),
            quota: StorageQuotaMonitor::new(remote.clone(), local.clone(), settings, audit.clone()),
            files: FileManager::new(remote, local, audit.clone())
                .with_default_url_expiry(Duration::from_secs(config.presign_default_secs)),
            audit,
            db,
            config,
        }
    }
}
