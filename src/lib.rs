//! # dbacker
//!
//! Scheduled backup and restore of data services into pluggable stores.
//!
//! ## Features
//!
//! - **Services**: MySQL, PostgreSQL, Gitea, Consul and plain directory tarballs
//! - **Stores**: Local directory or S3 compatible bucket
//! - **Compression**: XZ (LZMA) streamed straight from the dump tool
//! - **Retention**: Keeps the N most recent backups
//! - **Scheduling**: Cron expressions with a random start delay and graceful shutdown
//!
//! ## Quick Start
//!
//! ```no_run
//! use dbacker::backup::app_config::AppConfig;
//! use dbacker::backup::scheduler::shutdown_signal;
//!
//! # async fn run() -> dbacker::backup::result_error::result::Result<()> {
//! let config = AppConfig::from_file("config.yml")?.validated()?;
//! config
//!     .backup_scheduler()?
//!     .run(config.backup_job(), shutdown_signal())
//!     .await
//! # }
//! ```

pub mod backup;
