pub mod filesystem;
pub mod object;

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithDebugObjectAndFnName;
use derive_more::From;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::result;
use validator::{Validate, ValidationErrors};

/// Persistence backend for artifacts.
///
/// A value is opened for one task run and closed at its end, so implementations may
/// keep per-run state such as the name they just stored or files they downloaded.
pub trait Store {
    /// Puts the artifact at `local_path` into the backend under `name`, replacing any
    /// artifact already stored under that name.
    fn store(&mut self, local_path: &Path, name: &str) -> Result<()>;

    /// Makes the named artifact available as a local file and returns its path.
    fn retrieve(&mut self, name: &str) -> Result<PathBuf>;

    fn find_latest_backup(&mut self) -> Result<String>;

    /// Deletes all but the `keep_count` most recent artifacts. `0` disables pruning.
    fn remove_older_backups(&mut self, keep_count: usize) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

#[derive(Clone, From, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum StoreConfig {
    Filesystem(filesystem::FilesystemStoreConfig),
    S3(object::S3StoreConfig),
}

impl Validate for StoreConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            StoreConfig::Filesystem(inner) => inner.validate(),
            StoreConfig::S3(inner) => inner.validate(),
        }
    }
}

impl StoreConfig {
    pub fn name(&self) -> &'static str {
        match self {
            StoreConfig::Filesystem(_) => "filesystem",
            StoreConfig::S3(_) => "s3",
        }
    }

    /// Fails with [`Error::OutsideNamespace`] when artifacts named `<artifact_prefix>-...`
    /// would be invisible to listing and retention.
    pub fn check_namespace(&self, artifact_prefix: &str) -> Result<()> {
        match self {
            StoreConfig::Filesystem(inner) => inner.check_namespace(artifact_prefix),
            StoreConfig::S3(_) => Ok(()),
        }
    }

    /// Opens a store for one task run. `save_dir` is where artifacts are produced and
    /// `artifact_prefix` is the leading part of every artifact name the store manages.
    pub fn open(&self, save_dir: &Path, artifact_prefix: &str) -> Result<StoreBackend> {
        match self {
            StoreConfig::Filesystem(inner) => inner
                .open(save_dir, artifact_prefix)
                .map(StoreBackend::from),
            StoreConfig::S3(inner) => inner
                .open(save_dir, artifact_prefix)
                .map(StoreBackend::from),
        }
        .with_debug_object_and_fn_name(self.clone(), "open")
    }
}

#[derive(From, Debug)]
pub enum StoreBackend {
    Filesystem(filesystem::FilesystemStore),
    Object(object::ObjectStoreBackend),
}

impl Store for StoreBackend {
    fn store(&mut self, local_path: &Path, name: &str) -> Result<()> {
        match self {
            StoreBackend::Filesystem(inner) => inner.store(local_path, name),
            StoreBackend::Object(inner) => inner.store(local_path, name),
        }
    }

    fn retrieve(&mut self, name: &str) -> Result<PathBuf> {
        match self {
            StoreBackend::Filesystem(inner) => inner.retrieve(name),
            StoreBackend::Object(inner) => inner.retrieve(name),
        }
    }

    fn find_latest_backup(&mut self) -> Result<String> {
        match self {
            StoreBackend::Filesystem(inner) => inner.find_latest_backup(),
            StoreBackend::Object(inner) => inner.find_latest_backup(),
        }
    }

    fn remove_older_backups(&mut self, keep_count: usize) -> Result<()> {
        match self {
            StoreBackend::Filesystem(inner) => inner.remove_older_backups(keep_count),
            StoreBackend::Object(inner) => inner.remove_older_backups(keep_count),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            StoreBackend::Filesystem(inner) => inner.close(),
            StoreBackend::Object(inner) => inner.close(),
        }
    }
}

/// Rejects names that would escape the store's directory or key prefix.
pub(crate) fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
}

/// Whether `name` is one of the artifacts managed under `prefix`. Hidden and in-progress
/// `.tmp` files never are.
pub(crate) fn in_namespace(name: &str, prefix: &str) -> bool {
    name.starts_with(prefix) && !name.starts_with('.') && !name.ends_with(".tmp")
}

pub(crate) fn ensure_in_namespace(name: &str, prefix: &str) -> Result<()> {
    if in_namespace(name, prefix) {
        Ok(())
    } else {
        Err(Error::OutsideNamespace {
            name: name.to_string(),
            prefix: prefix.to_string(),
        })
    }
}
