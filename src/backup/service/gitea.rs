use crate::backup::artifact::generate_path;
use crate::backup::command::{CmdConfig, Identity};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::service::{env_with, produce_artifact, Service};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use validator::Validate;

static DEFAULT_BIN: &str = "/app/gitea/gitea";
static DEFAULT_DATA_PATH: &str = "/data";
static DEFAULT_ID: u32 = 1000;
pub static ARTIFACT_PREFIX: &str = "gitea-dump";

#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GiteaConfig {
    /// Path of gitea's app.ini
    pub config_path: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
    pub bin: Option<PathBuf>,
    /// The dump runs as this user, 1000 by default
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl GiteaConfig {
    fn bin(&self) -> &Path {
        self.bin.as_deref().unwrap_or(Path::new(DEFAULT_BIN))
    }

    fn data_path(&self) -> &Path {
        self.data_path
            .as_deref()
            .unwrap_or(Path::new(DEFAULT_DATA_PATH))
    }

    pub fn identity(&self) -> Identity {
        Identity {
            uid: self.uid.unwrap_or(DEFAULT_ID),
            gid: self.gid.unwrap_or(DEFAULT_ID),
        }
    }

    pub fn dump_args(&self, save_dir: &Path, file: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "dump".into(),
            "--skip-log".into(),
            "--tempdir".into(),
            save_dir.into(),
            "--type".into(),
            "zip".into(),
            "--file".into(),
            file.into(),
        ];
        if let Some(config) = &self.config_path {
            args.push("--config".into());
            args.push(config.into());
        }
        args
    }
}

impl Service for GiteaConfig {
    fn backup(&self, save_dir: &Path) -> Result<PathBuf> {
        let path = generate_path(save_dir, ARTIFACT_PREFIX, Some("zip"));
        let env = env_with([
            ("USER", OsString::from("git")),
            ("HOME", self.data_path().join("git").into_os_string()),
        ]);

        produce_artifact(path, |tmp| {
            CmdConfig::builder()
                .env(env)
                .identity(self.identity())
                .work_dir(save_dir)
                .build()
                .run(self.bin(), &self.dump_args(save_dir, tmp))
        })
        .with_msg(format!("Couldn't execute {:?}", self.bin()))
    }

    fn restore(&self, _artifact_path: &Path) -> Result<()> {
        Err(Error::unsupported("gitea restore"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_args() {
        let config = GiteaConfig {
            config_path: Some("/data/gitea/conf/app.ini".into()),
            ..Default::default()
        };
        let args: Vec<String> = config
            .dump_args(Path::new("/backups"), Path::new("/backups/gitea-dump-1.zip.tmp"))
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            vec![
                "dump", "--skip-log", "--tempdir", "/backups", "--type", "zip", "--file",
                "/backups/gitea-dump-1.zip.tmp", "--config", "/data/gitea/conf/app.ini"
            ]
        );
    }

    #[test]
    fn test_default_identity() {
        assert_eq!(GiteaConfig::default().identity(), Identity { uid: 1000, gid: 1000 });
    }

    #[test]
    fn test_restore_is_unsupported() {
        let err = GiteaConfig::default()
            .restore(Path::new("/backups/gitea-dump-1.zip"))
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
