use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::WithMsg;
use crate::backup::retention::{latest, ItemWithDateTime, RetentionPolicy};
use crate::backup::store::{ensure_in_namespace, in_namespace, is_plain_name, Store};
use crate::backup::validate::validate_valid_archive_base_name;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use validator::Validate;

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct FilesystemStoreConfig {
    /// Directory holding the artifacts, the save directory when unset
    pub path: Option<PathBuf>,
    /// Only files starting with this prefix belong to the store, the service's artifact
    /// prefix when unset
    #[validate(length(min = 1), custom(function = validate_valid_archive_base_name))]
    pub prefix: Option<String>,
}

impl FilesystemStoreConfig {
    /// The configured prefix must cover every name starting with `artifact_prefix`.
    pub fn check_namespace(&self, artifact_prefix: &str) -> Result<()> {
        match &self.prefix {
            Some(prefix) => ensure_in_namespace(artifact_prefix, prefix),
            None => Ok(()),
        }
    }

    pub fn open(&self, save_dir: &Path, artifact_prefix: &str) -> Result<FilesystemStore> {
        self.check_namespace(artifact_prefix)?;
        let dir = self.path.as_deref().unwrap_or(save_dir).to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(Error::from)
            .with_msg(format!("Cannot create store directory {:?}", dir))?;
        let prefix = self.prefix.as_deref().unwrap_or(artifact_prefix);
        Ok(FilesystemStore::new(dir, prefix.to_string()))
    }
}

/// Artifacts kept as plain files in one directory. Recency is the file's modification time.
#[derive(Debug)]
pub struct FilesystemStore {
    dir: PathBuf,
    prefix: String,
    last_stored: Option<String>,
}

impl FilesystemStore {
    pub fn new(dir: PathBuf, prefix: String) -> Self {
        Self {
            dir,
            prefix,
            last_stored: None,
        }
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        if !is_plain_name(name) {
            return Err(Error::ArtifactNotFound(name.to_string()));
        }
        Ok(self.dir.join(name))
    }

    fn list(&self) -> Result<Vec<ItemWithDateTime<String>>> {
        let mut items = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !in_namespace(&name, &self.prefix) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            items.push((name, metadata.modified()?).into());
        }
        Ok(items)
    }
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }

    // Crossing filesystems
    std::fs::copy(from, to)
        .map_err(Error::from)
        .with_msg(format!("Cannot copy {:?} to {:?}", from, to))?;
    std::fs::remove_file(from)
        .map_err(Error::from)
        .with_msg(format!("Cannot remove {:?} after copying it", from))
}

impl Store for FilesystemStore {
    fn store(&mut self, local_path: &Path, name: &str) -> Result<()> {
        ensure_in_namespace(name, &self.prefix)?;
        let target = self.path_of(name)?;
        let in_place = match (local_path.canonicalize(), target.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if !in_place {
            move_file(local_path, &target)?;
        }
        info!("Stored {:?}", target);
        self.last_stored = Some(name.to_string());
        Ok(())
    }

    fn retrieve(&mut self, name: &str) -> Result<PathBuf> {
        let path = self.path_of(name)?;
        if !path.is_file() {
            return Err(Error::ArtifactNotFound(path.display().to_string()));
        }
        Ok(path)
    }

    fn find_latest_backup(&mut self) -> Result<String> {
        latest(self.list()?).ok_or_else(|| {
            Error::NoBackups(format!("{:?} with prefix {:?}", self.dir, self.prefix))
        })
    }

    fn remove_older_backups(&mut self, keep_count: usize) -> Result<()> {
        let policy = RetentionPolicy::new(keep_count);
        if policy.is_disabled() {
            debug!("Retention disabled, keeping all backups");
            return Ok(());
        }

        let errors = policy
            .get_delete(self.list()?, self.last_stored.as_ref())
            .into_iter()
            .filter_map(|name| {
                let path = self.dir.join(&name);
                info!("Removing old backup {:?}", path);
                std::fs::remove_file(&path)
                    .map_err(Error::from)
                    .with_msg(format!("Cannot remove old backup {:?}", path))
                    .err()
            })
            .collect();
        convert_error_vec(errors)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;
    use std::time::{Duration, SystemTime};
    use tempfile::{tempdir, TempDir};

    fn write_aged(dir: &Path, name: &str, age_secs: u64) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, name).unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
        path
    }

    fn store_in(dir: &TempDir) -> FilesystemStore {
        FilesystemStore::new(dir.path().to_path_buf(), "db-backup".into())
    }

    fn names(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .sorted()
            .collect()
    }

    #[test]
    fn test_store_moves_and_retrieves() {
        let dir = tempdir().unwrap();
        let work = tempdir().unwrap();
        let local = work.path().join("db-backup-1.sql");
        std::fs::write(&local, b"dump contents").unwrap();

        let mut store = store_in(&dir);
        store.store(&local, "db-backup-1.sql").unwrap();
        assert!(!local.exists());

        let path = store.retrieve("db-backup-1.sql").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"dump contents");
    }

    #[test]
    fn test_store_in_place_and_overwrite() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);
        let local = dir.path().join("db-backup-1.sql");
        std::fs::write(&local, b"first").unwrap();
        store.store(&local, "db-backup-1.sql").unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), b"first");

        let work = tempdir().unwrap();
        let newer = work.path().join("db-backup-1.sql");
        std::fs::write(&newer, b"second").unwrap();
        store.store(&newer, "db-backup-1.sql").unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), b"second");
    }

    #[test]
    fn test_retrieve_missing() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);
        assert!(matches!(
            store.retrieve("db-backup-404.sql").unwrap_err(),
            Error::ArtifactNotFound(_)
        ));
        assert!(store.retrieve("../escape").unwrap_err().is_not_found());
    }

    #[test]
    fn test_find_latest_by_mtime() {
        let dir = tempdir().unwrap();
        write_aged(dir.path(), "db-backup-b.sql", 10);
        write_aged(dir.path(), "db-backup-a.sql", 5);
        write_aged(dir.path(), "db-backup-c.sql", 60);
        write_aged(dir.path(), "other-file.sql", 0);
        write_aged(dir.path(), ".db-backup-hidden.sql", 0);
        write_aged(dir.path(), "db-backup-d.sql.tmp", 0);

        let mut store = store_in(&dir);
        assert_eq!(store.find_latest_backup().unwrap(), "db-backup-a.sql");
    }

    #[test]
    fn test_no_backups() {
        let dir = tempdir().unwrap();
        write_aged(dir.path(), "unrelated.txt", 0);
        let err = store_in(&dir).find_latest_backup().unwrap_err();
        assert!(matches!(err, Error::NoBackups(_)));
    }

    #[test]
    fn test_remove_older_backups() {
        let dir = tempdir().unwrap();
        for (i, age) in [50, 40, 30, 20, 10].into_iter().enumerate() {
            write_aged(dir.path(), &format!("db-backup-{i}.sql"), age);
        }
        write_aged(dir.path(), "unrelated.txt", 100);

        let mut store = store_in(&dir);
        store.remove_older_backups(0).unwrap();
        assert_eq!(names(dir.path()).len(), 6);

        store.remove_older_backups(2).unwrap();
        assert_eq!(
            names(dir.path()),
            vec!["db-backup-3.sql", "db-backup-4.sql", "unrelated.txt"]
        );

        store.remove_older_backups(2).unwrap();
        assert_eq!(names(dir.path()).len(), 3);
    }

    #[test]
    fn test_store_rejects_name_outside_prefix() {
        let dir = tempdir().unwrap();
        let work = tempdir().unwrap();
        let mut store = FilesystemStore::new(dir.path().to_path_buf(), "backup".into());
        for i in 0..3 {
            let local = write_aged(work.path(), &format!("mysql-backup-{i}.sql"), 0);
            let err = store
                .store(&local, &format!("mysql-backup-{i}.sql"))
                .unwrap_err();
            assert!(matches!(err, Error::OutsideNamespace { .. }));
            assert!(local.exists());
        }
        assert!(names(dir.path()).is_empty());
    }

    #[test]
    fn test_config_prefix_defaults_to_artifact_prefix() {
        let dir = tempdir().unwrap();
        let work = tempdir().unwrap();
        let config = FilesystemStoreConfig {
            path: None,
            prefix: None,
        };
        let mut store = config.open(dir.path(), "mysql-backup").unwrap();
        for (i, age) in [30, 20, 10].into_iter().enumerate() {
            let name = format!("mysql-backup-{i}.sql");
            let local = write_aged(work.path(), &name, age);
            store.store(&local, &name).unwrap();
        }
        store.remove_older_backups(1).unwrap();
        assert_eq!(names(dir.path()), vec!["mysql-backup-2.sql"]);
        assert_eq!(store.find_latest_backup().unwrap(), "mysql-backup-2.sql");

        let mismatched = FilesystemStoreConfig {
            path: None,
            prefix: Some("backup".into()),
        };
        assert!(matches!(
            mismatched.open(dir.path(), "mysql-backup").unwrap_err(),
            Error::OutsideNamespace { .. }
        ));
        let shorter = FilesystemStoreConfig {
            path: None,
            prefix: Some("mysql".into()),
        };
        assert!(shorter.open(dir.path(), "mysql-backup").is_ok());
    }

    #[test]
    fn test_just_stored_survives_retention() {
        let dir = tempdir().unwrap();
        write_aged(dir.path(), "db-backup-0.sql", 5);
        write_aged(dir.path(), "db-backup-1.sql", 1);
        let work = tempdir().unwrap();
        let local = write_aged(work.path(), "db-backup-2.sql", 3600);

        let mut store = store_in(&dir);
        store.store(&local, "db-backup-2.sql").unwrap();
        store.remove_older_backups(1).unwrap();
        assert_eq!(names(dir.path()), vec!["db-backup-2.sql"]);
    }
}
