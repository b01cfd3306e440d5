use crm_storage::export::{DEFAULT_PAGE_SIZE, DEFAULT_SCHEMA_VERSION};
use crm_storage::remote::s3::S3Config;
use std::path::{Component, Path, PathBuf};

/// CRM tables exported when no explicit list is configured.
const DEFAULT_TABLES: &[&str] = &[
    "users",
    "roles",
    "departments",
    "clients",
    "orders",
    "audit_logs",
    "inventory_items",
    "tasks",
];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_path: PathBuf,
    /// Served publicly under `/local-storage`.
    pub local_storage_root: PathBuf,
    /// Full database dumps. Must not sit under `local_storage_root`.
    pub backups_dir: PathBuf,
    /// Empty means the HTTP trigger rejects every caller.
    pub cron_secret: String,
    pub backup_tick_cron: Option<String>,
    pub export_page_size: u64,
    pub export_schema_version: String,
    pub streaming_tables: Vec<String>,
    pub snapshot_tables: Vec<String>,
    pub s3: Option<S3Config>,
    pub presign_default_secs: u64,
    pub log_level: String,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    var(name).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn table_list(name: &str) -> Vec<String> {
    match var(name) {
        Some(raw) => parse_table_list(&raw),
        None => DEFAULT_TABLES.iter().map(|t| t.to_string()).collect(),
    }
}

fn parse_table_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let local_storage_root =
            PathBuf::from(var("LOCAL_STORAGE_ROOT").unwrap_or_else(|| "./local-storage".into()));
        let backups_dir =
            PathBuf::from(var("BACKUPS_DIR").unwrap_or_else(|| "./data/backups".into()));

        let s3 = var("S3_BUCKET").map(|bucket| S3Config {
            bucket,
            region: var("S3_REGION").unwrap_or_else(|| "us-east-1".into()),
            endpoint: var("S3_ENDPOINT"),
            access_key_id: var("S3_ACCESS_KEY_ID"),
            secret_access_key: var("S3_SECRET_ACCESS_KEY"),
            force_path_style: parsed("S3_FORCE_PATH_STYLE", false),
        });

        Self {
            port: parsed("PORT", 3000),
            database_path: PathBuf::from(
                var("DATABASE_PATH").unwrap_or_else(|| "./data/crm.db".into()),
            ),
            local_storage_root,
            backups_dir,
            cron_secret: var("CRON_SECRET").unwrap_or_default(),
            backup_tick_cron: var("BACKUP_TICK_CRON"),
            export_page_size: parsed("EXPORT_PAGE_SIZE", DEFAULT_PAGE_SIZE),
            export_schema_version: var("EXPORT_SCHEMA_VERSION")
                .unwrap_or_else(|| DEFAULT_SCHEMA_VERSION.into()),
            streaming_tables: table_list("STREAMING_TABLES"),
            snapshot_tables: table_list("SNAPSHOT_TABLES"),
            s3,
            presign_default_secs: parsed("PRESIGN_DEFAULT_SECS", 3600),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".into()),
        }
    }

    /// Reject a backups directory that the static file route would expose.
    pub fn validate(&self) -> anyhow::Result<()> {
        if lexical(&self.backups_dir).starts_with(lexical(&self.local_storage_root)) {
            anyhow::bail!(
                "BACKUPS_DIR ({}) must not be inside LOCAL_STORAGE_ROOT ({})",
                self.backups_dir.display(),
                self.local_storage_root.display()
            );
        }
        Ok(())
    }
}

fn lexical(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
