//! Backup and restore tasks binding one [`Service`] to one [`Store`].
//!
//! Steps run strictly one after another. The first failure aborts the task and comes
//! back wrapped in [`Error::Step`] naming the step.

use crate::backup::artifact::base_name;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::service::Service;
use crate::backup::store::Store;
use derive_more::Display;
use std::path::Path;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Hash)]
pub enum TaskStep {
    #[display("service backup")]
    ServiceBackup,
    #[display("store upload")]
    StoreUpload,
    #[display("retention")]
    Retention,
    #[display("finding latest backup")]
    FindLatest,
    #[display("retrieving backup")]
    Retrieve,
    #[display("service restore")]
    ServiceRestore,
    #[display("closing store")]
    Close,
}

trait InStep<T> {
    fn in_step(self, step: TaskStep) -> Result<T>;
}

impl<T> InStep<T> for Result<T> {
    fn in_step(self, step: TaskStep) -> Result<T> {
        self.map_err(|e| Error::step(step, e))
    }
}

pub fn backup_task<S, T>(service: &S, store: &mut T, save_dir: &Path, keep_count: usize) -> Result<()>
where
    S: Service + ?Sized,
    T: Store + ?Sized,
{
    let artifact = service
        .backup(save_dir)
        .in_step(TaskStep::ServiceBackup)?;
    info!("Backup written to {:?}", artifact);

    let name = base_name(&artifact).ok_or_else(|| {
        Error::step(
            TaskStep::StoreUpload,
            Error::ArtifactNotFound(artifact.display().to_string()),
        )
    })?;
    store
        .store(&artifact, &name)
        .in_step(TaskStep::StoreUpload)?;

    store
        .remove_older_backups(keep_count)
        .in_step(TaskStep::Retention)?;
    info!("Backup {name} done");
    Ok(())
}

/// Restores `restore_file` when given, the store's latest backup otherwise. The store
/// is closed whatever the outcome.
pub fn restore_task<S, T>(service: &S, store: &mut T, restore_file: Option<&str>) -> Result<()>
where
    S: Service + ?Sized,
    T: Store + ?Sized,
{
    let res = restore_from_store(service, store, restore_file);
    let closed = store.close().in_step(TaskStep::Close);
    match (res, closed) {
        (Ok(()), closed) => closed,
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_error)) => {
            warn!("{close_error}");
            Err(e)
        }
    }
}

fn restore_from_store<S, T>(service: &S, store: &mut T, restore_file: Option<&str>) -> Result<()>
where
    S: Service + ?Sized,
    T: Store + ?Sized,
{
    let name = match restore_file {
        Some(name) => name.to_string(),
        None => store.find_latest_backup().in_step(TaskStep::FindLatest)?,
    };
    info!("Restoring backup {name}");

    let path = store.retrieve(&name).in_step(TaskStep::Retrieve)?;
    service.restore(&path).in_step(TaskStep::ServiceRestore)?;
    info!("Restore of {name} done");
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Debug, PartialEq)]
    pub enum Call {
        Backup,
        Restore(PathBuf),
        Store(PathBuf, String),
        Retrieve(String),
        FindLatest,
        RemoveOlder(usize),
        Close,
    }

    pub type CallLog = Arc<Mutex<Vec<Call>>>;

    #[derive(Default)]
    pub struct MockService {
        pub calls: CallLog,
        pub fail_backup: bool,
        pub fail_restore: bool,
    }

    impl Service for MockService {
        fn backup(&self, save_dir: &Path) -> Result<PathBuf> {
            self.calls.lock().unwrap().push(Call::Backup);
            if self.fail_backup {
                return Err(Error::Exit {
                    program: "mysqldump".into(),
                    code: Some(2),
                });
            }
            Ok(save_dir.join("mock-backup-20240101020000.sql"))
        }

        fn restore(&self, artifact_path: &Path) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Restore(artifact_path.to_path_buf()));
            if self.fail_restore {
                return Err(Error::unsupported("mock restore"));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MockStore {
        pub calls: CallLog,
        pub stored: Vec<String>,
        pub fail_store: bool,
        pub fail_retention: bool,
        pub fail_close: bool,
    }

    impl Store for MockStore {
        fn store(&mut self, local_path: &Path, name: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Store(local_path.to_path_buf(), name.to_string()));
            if self.fail_store {
                return Err(Error::unsupported("mock upload"));
            }
            self.stored.push(name.to_string());
            Ok(())
        }

        fn retrieve(&mut self, name: &str) -> Result<PathBuf> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Retrieve(name.to_string()));
            if !self.stored.iter().any(|s| s == name) {
                return Err(Error::ArtifactNotFound(name.to_string()));
            }
            Ok(PathBuf::from("/restore").join(name))
        }

        fn find_latest_backup(&mut self) -> Result<String> {
            self.calls.lock().unwrap().push(Call::FindLatest);
            self.stored
                .last()
                .cloned()
                .ok_or_else(|| Error::NoBackups("mock".into()))
        }

        fn remove_older_backups(&mut self, keep_count: usize) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::RemoveOlder(keep_count));
            if self.fail_retention {
                return Err(Error::unsupported("mock retention"));
            }
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Close);
            if self.fail_close {
                return Err(Error::unsupported("mock close"));
            }
            Ok(())
        }
    }

    fn calls(log: &CallLog) -> Vec<Call> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn test_backup_runs_steps_in_order() {
        let log = CallLog::default();
        let service = MockService {
            calls: log.clone(),
            ..Default::default()
        };
        let mut store = MockStore {
            calls: log.clone(),
            ..Default::default()
        };

        backup_task(&service, &mut store, Path::new("/backups"), 3).unwrap();
        assert_eq!(
            calls(&log),
            vec![
                Call::Backup,
                Call::Store(
                    PathBuf::from("/backups/mock-backup-20240101020000.sql"),
                    "mock-backup-20240101020000.sql".into()
                ),
                Call::RemoveOlder(3),
            ]
        );
    }

    #[test]
    fn test_backup_failure_skips_store() {
        let log = CallLog::default();
        let service = MockService {
            calls: log.clone(),
            fail_backup: true,
            ..Default::default()
        };
        let mut store = MockStore {
            calls: log.clone(),
            ..Default::default()
        };

        let err = backup_task(&service, &mut store, Path::new("/backups"), 3).unwrap_err();
        assert_eq!(err.failed_step(), Some(TaskStep::ServiceBackup));
        assert_eq!(err.exit_code(), Some(2));
        assert_eq!(calls(&log), vec![Call::Backup]);
    }

    #[test]
    fn test_upload_failure_skips_retention() {
        let log = CallLog::default();
        let service = MockService {
            calls: log.clone(),
            ..Default::default()
        };
        let mut store = MockStore {
            calls: log.clone(),
            fail_store: true,
            ..Default::default()
        };

        let err = backup_task(&service, &mut store, Path::new("/backups"), 3).unwrap_err();
        assert_eq!(err.failed_step(), Some(TaskStep::StoreUpload));
        assert!(!calls(&log).contains(&Call::RemoveOlder(3)));
    }

    #[test]
    fn test_retention_failure_keeps_upload() {
        let log = CallLog::default();
        let service = MockService {
            calls: log.clone(),
            ..Default::default()
        };
        let mut store = MockStore {
            calls: log.clone(),
            fail_retention: true,
            ..Default::default()
        };

        let err = backup_task(&service, &mut store, Path::new("/backups"), 3).unwrap_err();
        assert_eq!(err.failed_step(), Some(TaskStep::Retention));
        assert!(err.to_string().starts_with("retention failed"));
        assert_eq!(store.stored, vec!["mock-backup-20240101020000.sql"]);
    }

    #[test]
    fn test_restore_latest() {
        let log = CallLog::default();
        let service = MockService {
            calls: log.clone(),
            ..Default::default()
        };
        let mut store = MockStore {
            calls: log.clone(),
            stored: vec!["mock-1".into(), "mock-2".into()],
            ..Default::default()
        };

        restore_task(&service, &mut store, None).unwrap();
        assert_eq!(
            calls(&log),
            vec![
                Call::FindLatest,
                Call::Retrieve("mock-2".into()),
                Call::Restore(PathBuf::from("/restore/mock-2")),
                Call::Close,
            ]
        );
    }

    #[test]
    fn test_restore_pinned_name_skips_lookup() {
        let log = CallLog::default();
        let service = MockService {
            calls: log.clone(),
            ..Default::default()
        };
        let mut store = MockStore {
            calls: log.clone(),
            stored: vec!["mock-1".into(), "mock-2".into()],
            ..Default::default()
        };

        restore_task(&service, &mut store, Some("mock-1")).unwrap();
        let calls = calls(&log);
        assert!(!calls.contains(&Call::FindLatest));
        assert_eq!(calls[0], Call::Retrieve("mock-1".into()));
    }

    #[test]
    fn test_restore_failure_still_closes() {
        let log = CallLog::default();
        let service = MockService {
            calls: log.clone(),
            fail_restore: true,
            ..Default::default()
        };
        let mut store = MockStore {
            calls: log.clone(),
            stored: vec!["mock-1".into()],
            fail_close: true,
            ..Default::default()
        };

        let err = restore_task(&service, &mut store, None).unwrap_err();
        assert_eq!(err.failed_step(), Some(TaskStep::ServiceRestore));
        assert_eq!(calls(&log).last(), Some(&Call::Close));
    }

    #[test]
    fn test_restore_missing_artifact() {
        let mut store = MockStore::default();
        let err = restore_task(&MockService::default(), &mut store, Some("absent")).unwrap_err();
        assert_eq!(err.failed_step(), Some(TaskStep::Retrieve));
        assert!(err.is_not_found());

        let err = restore_task(&MockService::default(), &mut MockStore::default(), None)
            .unwrap_err();
        assert_eq!(err.failed_step(), Some(TaskStep::FindLatest));
    }

    #[test]
    fn test_close_failure_after_success_is_reported() {
        let mut store = MockStore {
            stored: vec!["mock-1".into()],
            fail_close: true,
            ..Default::default()
        };
        let err = restore_task(&MockService::default(), &mut store, None).unwrap_err();
        assert_eq!(err.failed_step(), Some(TaskStep::Close));
    }
}
