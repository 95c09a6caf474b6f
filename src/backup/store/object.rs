use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::WithMsg;
use crate::backup::retention::{latest, ItemWithDateTime, RetentionPolicy};
use crate::backup::service::tmp_path;
use crate::backup::store::{ensure_in_namespace, in_namespace, is_plain_name, Store};
use object_store::aws::AmazonS3Builder;
use object_store::buffered::{BufReader, BufWriter};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use validator::Validate;

/// S3 compatible bucket, credentials come from the usual `AWS_*` environment variables.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct S3StoreConfig {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    #[validate(length(min = 1))]
    pub bucket: String,
    /// Key prefix the artifacts are stored under
    pub prefix: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    /// Keep the local artifact after uploading it
    #[serde(default)]
    pub keep_file: bool,
}

impl S3StoreConfig {
    pub fn open(&self, save_dir: &Path, artifact_prefix: &str) -> Result<ObjectStoreBackend> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&self.bucket)
            .with_virtual_hosted_style_request(!self.force_path_style);
        if let Some(region) = &self.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &self.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        let store = builder
            .build()
            .map_err(Error::from)
            .with_msg(format!("Cannot connect to bucket {:?}", self.bucket))?;

        let handle = Handle::try_current().map_err(|e| Error::Io(std::io::Error::other(e)))?;
        Ok(ObjectStoreBackend::new(
            Arc::new(store),
            self.prefix.as_deref(),
            artifact_prefix,
            save_dir.to_path_buf(),
            self.keep_file,
            handle,
        ))
    }
}

/// Artifacts kept in an [`ObjectStore`]. Recency is the object's last modified time.
///
/// Only objects whose file name starts with `name_prefix` are artifacts, anything else
/// sharing the key prefix is left alone. Retrieved artifacts are downloaded into a
/// hidden scratch directory under `save_dir` that lives until [`Store::close`].
///
/// Calls block on `handle`, so methods must run outside of async contexts, e.g. from
/// `spawn_blocking`.
#[derive(Debug)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    prefix: Option<ObjectPath>,
    name_prefix: String,
    save_dir: PathBuf,
    scratch: Option<TempDir>,
    keep_file: bool,
    handle: Handle,
    downloaded: Vec<PathBuf>,
    last_stored: Option<String>,
}

impl ObjectStoreBackend {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        prefix: Option<&str>,
        name_prefix: &str,
        save_dir: PathBuf,
        keep_file: bool,
        handle: Handle,
    ) -> Self {
        Self {
            store,
            prefix: prefix
                .map(|p| p.trim_matches('/'))
                .filter(|p| !p.is_empty())
                .map(ObjectPath::from),
            name_prefix: name_prefix.to_string(),
            save_dir,
            scratch: None,
            keep_file,
            handle,
            downloaded: Vec::new(),
            last_stored: None,
        }
    }

    fn location(&self, name: &str) -> Result<ObjectPath> {
        if !is_plain_name(name) {
            return Err(Error::ArtifactNotFound(name.to_string()));
        }
        Ok(match &self.prefix {
            Some(prefix) => prefix.child(name),
            None => ObjectPath::from(name),
        })
    }

    fn list(&self) -> Result<Vec<ItemWithDateTime<String>>> {
        let listed = self
            .handle
            .block_on(self.store.list_with_delimiter(self.prefix.as_ref()))?;
        Ok(listed
            .objects
            .into_iter()
            .filter_map(|meta| {
                let name = meta.location.filename()?.to_string();
                in_namespace(&name, &self.name_prefix)
                    .then(|| ItemWithDateTime::from((name, meta.last_modified)))
            })
            .collect())
    }

    fn scratch_dir(&mut self) -> Result<PathBuf> {
        if let Some(scratch) = &self.scratch {
            return Ok(scratch.path().to_path_buf());
        }
        let scratch = tempfile::Builder::new()
            .prefix(".dbacker-download-")
            .tempdir_in(&self.save_dir)
            .map_err(Error::from)
            .with_msg(format!("Cannot create download directory in {:?}", self.save_dir))?;
        let path = scratch.path().to_path_buf();
        self.scratch = Some(scratch);
        Ok(path)
    }

    async fn upload(&self, local_path: &Path, location: ObjectPath) -> Result<()> {
        let mut file = tokio::fs::File::open(local_path).await?;
        let mut writer = BufWriter::new(self.store.clone(), location);
        let copied = async {
            tokio::io::copy(&mut file, &mut writer).await?;
            writer.shutdown().await
        }
        .await;

        if let Err(e) = copied {
            let mut error = Error::from(e);
            if let Err(e2) = writer.abort().await {
                error = error.chain(Error::from(e2).with_msg("Abort upload failed"));
            }
            return Err(error);
        }
        Ok(())
    }

    async fn download(&self, meta: &ObjectMeta, target: &Path) -> Result<()> {
        let tmp = tmp_path(target);
        let res = async {
            let mut reader = BufReader::new(self.store.clone(), meta);
            let mut file = tokio::fs::File::create(&tmp).await?;
            tokio::io::copy(&mut reader, &mut file).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, target).await
        }
        .await;

        if let Err(e) = res {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

impl Store for ObjectStoreBackend {
    fn store(&mut self, local_path: &Path, name: &str) -> Result<()> {
        ensure_in_namespace(name, &self.name_prefix)?;
        let location = self.location(name)?;
        info!("Uploading {:?} to {}", local_path, location);
        self.handle
            .block_on(self.upload(local_path, location.clone()))
            .with_msg(format!("Cannot upload {:?} to {}", local_path, location))?;
        self.last_stored = Some(name.to_string());

        if !self.keep_file {
            if let Err(e) = std::fs::remove_file(local_path) {
                warn!("Cannot remove uploaded file {:?}: {}", local_path, e);
            }
        }
        Ok(())
    }

    fn retrieve(&mut self, name: &str) -> Result<PathBuf> {
        let location = self.location(name)?;
        let meta = match self.handle.block_on(self.store.head(&location)) {
            Ok(meta) => meta,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(Error::ArtifactNotFound(location.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let target = self.scratch_dir()?.join(name);
        info!("Downloading {} to {:?}", location, target);
        self.handle
            .block_on(self.download(&meta, &target))
            .with_msg(format!("Cannot download {}", location))?;
        self.downloaded.push(target.clone());
        Ok(target)
    }

    fn find_latest_backup(&mut self) -> Result<String> {
        latest(self.list()?).ok_or_else(|| {
            Error::NoBackups(match &self.prefix {
                Some(prefix) => format!("{} under {}", self.store, prefix),
                None => self.store.to_string(),
            })
        })
    }

    fn remove_older_backups(&mut self, keep_count: usize) -> Result<()> {
        let policy = RetentionPolicy::new(keep_count);
        if policy.is_disabled() {
            debug!("Retention disabled, keeping all backups");
            return Ok(());
        }

        let mut errors = Vec::new();
        for name in policy.get_delete(self.list()?, self.last_stored.as_ref()) {
            let location = self.location(&name)?;
            info!("Removing old backup {}", location);
            if let Err(e) = self.handle.block_on(self.store.delete(&location)) {
                errors.push(Error::from(e).with_msg(format!("Cannot remove {}", location)));
            }
        }
        convert_error_vec(errors)
    }

    fn close(&mut self) -> Result<()> {
        let mut errors: Vec<Error> = self
            .downloaded
            .drain(..)
            .filter_map(|path| match std::fs::remove_file(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Some(
                    Error::from(e).with_msg(format!("Cannot remove downloaded file {:?}", path)),
                ),
                _ => None,
            })
            .collect();
        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            if let Err(e) = scratch.close() {
                errors.push(
                    Error::from(e).with_msg(format!("Cannot remove download directory {:?}", path)),
                );
            }
        }
        convert_error_vec(errors)
    }
}
