pub mod consul;
pub mod database;
pub mod gitea;
pub mod mysql;
pub mod postgres;
pub mod tarball;

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use derive_more::From;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::result;
use validator::{Validate, ValidationErrors};

/// A data system that can be dumped into an artifact and restored from one.
pub trait Service {
    /// Produces one new artifact under `save_dir` and returns its path. A failed backup
    /// never leaves a file at the path it would have returned.
    fn backup(&self, save_dir: &Path) -> Result<PathBuf>;

    /// Feeds the artifact at `artifact_path` back into the data system.
    fn restore(&self, artifact_path: &Path) -> Result<()>;
}

#[derive(Clone, From, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ServiceConfig {
    Mysql(mysql::MysqlConfig),
    Postgres(postgres::PostgresConfig),
    Gitea(gitea::GiteaConfig),
    Consul(consul::ConsulConfig),
    Tarball(tarball::TarballConfig),
}

impl ServiceConfig {
    pub fn name(&self) -> &'static str {
        match self {
            ServiceConfig::Mysql(_) => "mysql",
            ServiceConfig::Postgres(_) => "postgres",
            ServiceConfig::Gitea(_) => "gitea",
            ServiceConfig::Consul(_) => "consul",
            ServiceConfig::Tarball(_) => "tarball",
        }
    }

    /// Leading part of every artifact name this service produces.
    pub fn artifact_prefix(&self) -> Result<String> {
        Ok(match self {
            ServiceConfig::Mysql(_) => mysql::ARTIFACT_PREFIX.to_string(),
            ServiceConfig::Postgres(_) => postgres::ARTIFACT_PREFIX.to_string(),
            ServiceConfig::Gitea(_) => gitea::ARTIFACT_PREFIX.to_string(),
            ServiceConfig::Consul(_) => consul::ARTIFACT_PREFIX.to_string(),
            ServiceConfig::Tarball(inner) => inner.prefix()?,
        })
    }
}

impl Validate for ServiceConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            ServiceConfig::Mysql(inner) => inner.validate(),
            ServiceConfig::Postgres(inner) => inner.validate(),
            ServiceConfig::Gitea(inner) => inner.validate(),
            ServiceConfig::Consul(inner) => inner.validate(),
            ServiceConfig::Tarball(inner) => inner.validate(),
        }
    }
}

impl Service for ServiceConfig {
    fn backup(&self, save_dir: &Path) -> Result<PathBuf> {
        match self {
            ServiceConfig::Mysql(inner) => inner.backup(save_dir),
            ServiceConfig::Postgres(inner) => inner.backup(save_dir),
            ServiceConfig::Gitea(inner) => inner.backup(save_dir),
            ServiceConfig::Consul(inner) => inner.backup(save_dir),
            ServiceConfig::Tarball(inner) => inner.backup(save_dir),
        }
        .with_debug_object_and_fn_name(self.clone(), "backup")
    }

    fn restore(&self, artifact_path: &Path) -> Result<()> {
        match self {
            ServiceConfig::Mysql(inner) => inner.restore(artifact_path),
            ServiceConfig::Postgres(inner) => inner.restore(artifact_path),
            ServiceConfig::Gitea(inner) => inner.restore(artifact_path),
            ServiceConfig::Consul(inner) => inner.restore(artifact_path),
            ServiceConfig::Tarball(inner) => inner.restore(artifact_path),
        }
        .with_debug_object_and_fn_name(self.clone(), "restore")
    }
}

/// Fails with [`Error::ArtifactNotFound`] unless `path` is a readable file.
pub fn ensure_artifact(path: &Path) -> Result<()> {
    match std::fs::File::open(path) {
        Ok(_) if path.is_file() => Ok(()),
        Ok(_) => Err(Error::ArtifactNotFound(path.display().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::ArtifactNotFound(path.display().to_string()))
        }
        Err(e) => Err(Error::from(e)).with_msg(format!("Cannot read artifact {:?}", path)),
    }
}

/// Lets `produce` write the artifact at a sibling `.tmp` path and moves it into place
/// only once it succeeded. Whatever was left at the temp path is removed on failure.
pub fn produce_artifact<F>(path: PathBuf, produce: F) -> Result<PathBuf>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let tmp = tmp_path(&path);
    let res = produce(&tmp).and_then(|_| std::fs::rename(&tmp, &path).map_err(Error::from));
    match res {
        Ok(()) => Ok(path),
        Err(mut e) => {
            if tmp.exists() {
                if let Err(e2) = std::fs::remove_file(&tmp) {
                    e = e.chain(Error::from(e2).with_msg(format!("Delete tmp file {:?} failed", tmp)));
                }
            }
            Err(e)
        }
    }
}

pub fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Current environment with `extra` appended, for tools that need an added variable.
pub fn env_with<I, K, V>(extra: I) -> Vec<(OsString, OsString)>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<OsString>,
    V: Into<OsString>,
{
    std::env::vars_os()
        .chain(extra.into_iter().map(|(k, v)| (k.into(), v.into())))
        .collect()
}

#[cfg(all(test, unix))]
pub(crate) mod test_util {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Writes an executable shell script standing in for an external tool.
    pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        file.sync_all().unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_produce_artifact_moves_into_place() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("consul-backup-1.snap");
        let path = produce_artifact(target.clone(), |tmp| {
            std::fs::write(tmp, b"snapshot").map_err(Error::from)
        })
        .unwrap();
        assert_eq!(path, target);
        assert_eq!(std::fs::read(&target).unwrap(), b"snapshot");
        assert!(!tmp_path(&target).exists());
    }

    #[test]
    fn test_produce_artifact_cleans_up_partial_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("mysql-backup-1.sql");
        let err = produce_artifact(target.clone(), |tmp| {
            std::fs::write(tmp, b"half a dump")?;
            Err(Error::Exit {
                program: "mysqldump".into(),
                code: Some(2),
            })
        })
        .unwrap_err();
        assert_eq!(err.exit_code(), Some(2));
        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_ensure_artifact() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("dump.sql");
        std::fs::write(&file, b"SELECT 1;").unwrap();
        assert!(ensure_artifact(&file).is_ok());

        let missing = ensure_artifact(&dir.path().join("missing.sql")).unwrap_err();
        assert!(matches!(missing, Error::ArtifactNotFound(_)));
        assert!(matches!(
            ensure_artifact(dir.path()).unwrap_err(),
            Error::ArtifactNotFound(_)
        ));
    }

    #[test]
    fn test_service_config_deserialization() {
        let config: ServiceConfig = serde_yml::from_str(
            "type: tarball\npath: /srv/data\ncompress:\n  compressor_type: xz\n",
        )
        .unwrap();
        assert_eq!(config.name(), "tarball");
        assert!(config.validate().is_ok());

        let config: ServiceConfig =
            serde_yml::from_str("type: mysql\nhost: db\npassword: secret\n").unwrap();
        assert_eq!(config.name(), "mysql");
        assert!(!format!("{config:?}").contains("secret"));
    }

    #[test]
    fn test_artifact_prefix() {
        let prefix = |yaml: &str| {
            serde_yml::from_str::<ServiceConfig>(yaml)
                .unwrap()
                .artifact_prefix()
                .unwrap()
        };
        assert_eq!(prefix("type: mysql\nhost: db\n"), "mysql-backup");
        assert_eq!(prefix("type: consul\n"), "consul-backup");
        assert_eq!(prefix("type: gitea\n"), "gitea-dump");
        assert_eq!(prefix("type: tarball\npath: /srv/www\n"), "www-backup");
        assert_eq!(
            prefix("type: tarball\npath: /srv/www\nname: site\n"),
            "site-backup"
        );
    }
}
