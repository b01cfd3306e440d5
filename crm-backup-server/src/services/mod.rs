pub mod backup_scheduler;
pub mod table_scanner;
