use clap::{Args, CommandFactory, FromArgMatches, Parser, Subcommand};
use dbacker::backup::app_config::{AppConfig, Overrides};
use dbacker::backup::result_error::result::Result;
use dbacker::backup::scheduler::shutdown_signal;
use dbacker::backup::version::BuildInfo;
use std::path::PathBuf;
use std::process::exit;
use tracing::{error, info};

/// Run backups from various services to S3-like storage
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Location of config file
    #[arg(short, long, env = "CONFIG_FILE")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ScheduleArgs {
    /// Cron expression or descriptor like @daily, `none` runs once right away
    #[arg(long, env = "SCHEDULE")]
    schedule: Option<String>,
    /// Upper bound in seconds of the random delay before each scheduled run
    #[arg(long, env = "SCHEDULE_RANDOM_DELAY", allow_negative_numbers = true)]
    random_delay: Option<i64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up the service into the store
    Backup {
        #[command(flatten)]
        schedule: ScheduleArgs,
        /// Number of backups to keep, 0 keeps all
        #[arg(long, env = "MAX_BACKUPS")]
        max_backups: Option<usize>,
    },
    /// Restore the service from the store
    Restore {
        #[command(flatten)]
        schedule: ScheduleArgs,
        /// Artifact to restore instead of the latest one
        #[arg(long, env = "RESTORE_FILE")]
        restore_file: Option<String>,
    },
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::from_file(&cli.config)?;
    match cli.command {
        Command::Backup {
            schedule,
            max_backups,
        } => {
            let config = config
                .with_backup_overrides(Overrides {
                    schedule: schedule.schedule,
                    random_delay: schedule.random_delay,
                    max_backups,
                    restore_file: None,
                })
                .validated()?;
            config
                .backup_scheduler()?
                .run(config.backup_job(), shutdown_signal())
                .await
        }
        Command::Restore {
            schedule,
            restore_file,
        } => {
            let config = config
                .with_restore_overrides(Overrides {
                    schedule: schedule.schedule,
                    random_delay: schedule.random_delay,
                    max_backups: None,
                    restore_file,
                })
                .validated()?;
            config
                .restore_scheduler()?
                .run(config.restore_job(), shutdown_signal())
                .await
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let build_info = BuildInfo::get();
    let matches = Cli::command()
        .long_version(build_info.report().as_str())
        .get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    info!("Starting dBacker, {build_info}");
    if let Err(e) = run(cli).await {
        error!("Unrecoverable error: {e}");
        exit(1);
    }
    info!("Shutdown complete");
}
