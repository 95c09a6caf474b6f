use crate::backup::artifact::generate_path;
use crate::backup::command::CmdConfig;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::service::{ensure_artifact, produce_artifact, Service};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use validator::Validate;

static DEFAULT_BIN: &str = "/bin/consul";
pub static ARTIFACT_PREFIX: &str = "consul-backup";

#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ConsulConfig {
    pub bin: Option<PathBuf>,
}

impl ConsulConfig {
    fn bin(&self) -> &Path {
        self.bin.as_deref().unwrap_or(Path::new(DEFAULT_BIN))
    }
}

impl Service for ConsulConfig {
    fn backup(&self, save_dir: &Path) -> Result<PathBuf> {
        let path = generate_path(save_dir, ARTIFACT_PREFIX, Some("snap"));
        produce_artifact(path, |tmp| {
            CmdConfig::default().run(
                self.bin(),
                &[OsStr::new("snapshot"), OsStr::new("save"), tmp.as_os_str()],
            )
        })
        .with_msg(format!("Couldn't execute {:?}", self.bin()))
    }

    fn restore(&self, artifact_path: &Path) -> Result<()> {
        ensure_artifact(artifact_path)?;
        CmdConfig::default()
            .run(
                self.bin(),
                &[OsStr::new("snapshot"), OsStr::new("restore"), artifact_path.as_os_str()],
            )
            .with_msg("Couldn't execute consul restore")
    }
}
