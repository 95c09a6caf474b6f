use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithFnName, WithMsg};
use crate::backup::scheduler::{Schedule, Scheduler};
use crate::backup::service::ServiceConfig;
use crate::backup::store::StoreConfig;
use crate::backup::task::{backup_task, restore_task};
use crate::backup::validate::{validate_dir_exist_or_created, validate_schedule_str};
use function_name::named;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;
use validator::Validate;

fn default_save_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_random_delay() -> i64 {
    1
}

fn default_backup_schedule() -> String {
    "@daily".to_string()
}

fn default_restore_schedule() -> String {
    "none".to_string()
}

fn default_max_backups() -> usize {
    5
}

#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Where artifacts are produced and restored artifacts are downloaded to
    #[serde(default = "default_save_dir")]
    #[validate(custom(function = validate_dir_exist_or_created))]
    pub save_dir: PathBuf,
    /// Upper bound in seconds of the random delay before each scheduled run
    #[serde(default = "default_random_delay")]
    pub random_delay: i64,
    #[serde(default)]
    #[validate(nested)]
    pub backup: BackupConfig,
    #[serde(default)]
    #[validate(nested)]
    pub restore: RestoreConfig,
    #[validate(nested)]
    pub service: ServiceConfig,
    #[validate(nested)]
    pub store: StoreConfig,
}

#[derive(Clone, Serialize, Deserialize, Debug, Validate)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    #[serde(default = "default_backup_schedule")]
    #[validate(custom(function = validate_schedule_str))]
    pub schedule: String,
    /// Number of backups kept in the store, `0` keeps all of them
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            schedule: default_backup_schedule(),
            max_backups: default_max_backups(),
        }
    }
}

#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate)]
#[serde(deny_unknown_fields)]
pub struct RestoreConfig {
    #[serde(default = "default_restore_schedule")]
    #[validate(custom(function = validate_schedule_str))]
    pub schedule: String,
    /// Restore this artifact instead of the latest one
    pub restore_file: Option<String>,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            schedule: default_restore_schedule(),
            restore_file: None,
        }
    }
}

/// Command line values taking precedence over the config file.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub schedule: Option<String>,
    pub random_delay: Option<i64>,
    pub max_backups: Option<usize>,
    pub restore_file: Option<String>,
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(Error::from)
            .with_msg(format!("Cannot open config file {:?}", path))?;
        serde_yml::from_reader(file)
            .map_err(Error::from)
            .with_msg(format!("Parse YAML config failed: {:?}", path))
    }

    pub fn with_backup_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(schedule) = overrides.schedule {
            self.backup.schedule = schedule;
        }
        if let Some(max_backups) = overrides.max_backups {
            self.backup.max_backups = max_backups;
        }
        if let Some(random_delay) = overrides.random_delay {
            self.random_delay = random_delay;
        }
        self
    }

    pub fn with_restore_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(schedule) = overrides.schedule {
            self.restore.schedule = schedule;
        }
        if overrides.restore_file.is_some() {
            self.restore.restore_file = overrides.restore_file;
        }
        if let Some(random_delay) = overrides.random_delay {
            self.random_delay = random_delay;
        }
        self
    }

    pub fn validated(self) -> Result<Self> {
        self.validate()
            .map_err(Error::from)
            .and_then(|_| self.store.check_namespace(&self.service.artifact_prefix()?))
            .with_msg("Config validation failed")?;
        Ok(self)
    }

    #[named]
    pub fn backup_job(&self) -> impl Fn() -> Result<()> + Send + Sync + 'static {
        let service = self.service.clone();
        let store = self.store.clone();
        let save_dir = self.save_dir.clone();
        let keep_count = self.backup.max_backups;
        move || {
            info!("Starting {} backup to {} store", service.name(), store.name());
            let mut opened = store
                .open(&save_dir, &service.artifact_prefix()?)
                .with_fn_name(function_path!())?;
            backup_task(&service, &mut opened, &save_dir, keep_count)
        }
    }

    #[named]
    pub fn restore_job(&self) -> impl Fn() -> Result<()> + Send + Sync + 'static {
        let service = self.service.clone();
        let store = self.store.clone();
        let save_dir = self.save_dir.clone();
        let restore_file = self.restore.restore_file.clone();
        move || {
            info!("Starting {} restore from {} store", service.name(), store.name());
            let mut opened = store
                .open(&save_dir, &service.artifact_prefix()?)
                .with_fn_name(function_path!())?;
            restore_task(&service, &mut opened, restore_file.as_deref())
        }
    }

    pub fn backup_scheduler(&self) -> Result<Scheduler> {
        Ok(Scheduler::new(
            self.backup.schedule.parse::<Schedule>()?,
            self.random_delay,
        ))
    }

    pub fn restore_scheduler(&self) -> Result<Scheduler> {
        Ok(Scheduler::new(
            self.restore.schedule.parse::<Schedule>()?,
            self.random_delay,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(yaml: &str) -> AppConfig {
        serde_yml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(
            "service:\n  type: consul\nstore:\n  type: filesystem\n  prefix: consul-backup\n",
        );
        assert_eq!(config.save_dir, PathBuf::from("/tmp"));
        assert_eq!(config.random_delay, 1);
        assert_eq!(config.backup.schedule, "@daily");
        assert_eq!(config.backup.max_backups, 5);
        assert_eq!(config.restore.schedule, "none");
        assert_eq!(config.restore.restore_file, None);
    }

    #[test]
    fn test_overrides_win() {
        let config = parse(
            "random_delay: 30\nbackup:\n  schedule: \"@hourly\"\nservice:\n  type: consul\nstore:\n  type: filesystem\n  prefix: consul-backup\n",
        );
        let backup = config.clone().with_backup_overrides(Overrides {
            schedule: Some("none".into()),
            max_backups: Some(2),
            ..Default::default()
        });
        assert_eq!(backup.backup.schedule, "none");
        assert_eq!(backup.backup.max_backups, 2);
        assert_eq!(backup.random_delay, 30);

        let restore = config.with_restore_overrides(Overrides {
            restore_file: Some("consul-backup-20240101000000.snap".into()),
            random_delay: Some(0),
            ..Default::default()
        });
        assert_eq!(
            restore.restore.restore_file.as_deref(),
            Some("consul-backup-20240101000000.snap")
        );
        assert_eq!(restore.random_delay, 0);
    }

    #[test]
    fn test_validation() {
        let dir = tempdir().unwrap();
        let yaml = format!(
            "save_dir: {}\nbackup:\n  schedule: \"not a cron\"\nservice:\n  type: consul\nstore:\n  type: filesystem\n  prefix: consul-backup\n",
            dir.path().join("nested").display()
        );
        let config = parse(&yaml);
        assert!(config.clone().validated().is_err());
        assert!(dir.path().join("nested").is_dir());

        let fixed = config.with_backup_overrides(Overrides {
            schedule: Some("0 3 * * *".into()),
            ..Default::default()
        });
        let fixed = fixed.validated().unwrap();
        assert!(fixed.backup_scheduler().is_ok());
    }

    #[test]
    fn test_store_prefix_must_cover_artifacts() {
        let dir = tempdir().unwrap();
        let yaml = |prefix: &str| {
            format!(
                "save_dir: {}\nservice:\n  type: mysql\n  host: db\nstore:\n  type: filesystem\n{prefix}",
                dir.path().display()
            )
        };
        let err = parse(&yaml("  prefix: backup\n")).validated().unwrap_err();
        assert!(matches!(err.root(), Error::OutsideNamespace { .. }));
        assert!(parse(&yaml("  prefix: mysql\n")).validated().is_ok());
        assert!(parse(&yaml("")).validated().is_ok());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let res = serde_yml::from_str::<AppConfig>(
            "retention: 3\nservice:\n  type: consul\nstore:\n  type: filesystem\n  prefix: x\n",
        );
        assert!(res.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_backup_then_restore_job() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("site");
        std::fs::create_dir(&data).unwrap();
        std::fs::write(data.join("index.html"), "<h1>hi</h1>").unwrap();
        let save_dir = dir.path().join("save");
        let store_dir = dir.path().join("store");

        let yaml = format!(
            "save_dir: {save}\nservice:\n  type: tarball\n  path: {data}\nstore:\n  type: filesystem\n  path: {store}\n  prefix: site-backup\n",
            save = save_dir.display(),
            data = data.display(),
            store = store_dir.display(),
        );
        let config = parse(&yaml).validated().unwrap();

        config.backup_job()().unwrap();
        config.backup_job()().unwrap();
        assert_eq!(std::fs::read_dir(&store_dir).unwrap().count(), 2);

        std::fs::write(data.join("index.html"), "defaced").unwrap();
        config.restore_job()().unwrap();
        assert_eq!(
            std::fs::read_to_string(data.join("index.html")).unwrap(),
            "<h1>hi</h1>"
        );
    }
}
