use crate::backup::artifact::generate_path;
use crate::backup::command::CmdConfig;
use crate::backup::compress::{open_artifact, CompressorBuilder};
use crate::backup::file_ext::with_file_ext;
use crate::backup::finish::Finish;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::service::database::DatabaseConfig;
use crate::backup::service::{ensure_artifact, produce_artifact, Service};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};
use validator::Validate;

static DEFAULT_DUMP_BIN: &str = "/usr/bin/mysqldump";
static DEFAULT_RESTORE_BIN: &str = "/usr/bin/mysql";
static PASSWORD_ARG: &str = "-p";
pub static ARTIFACT_PREFIX: &str = "mysql-backup";

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct MysqlConfig {
    #[serde(flatten)]
    #[validate(nested)]
    pub database: DatabaseConfig,
    pub dump_bin: Option<PathBuf>,
    pub restore_bin: Option<PathBuf>,
}

impl From<DatabaseConfig> for MysqlConfig {
    fn from(database: DatabaseConfig) -> Self {
        Self {
            database,
            dump_bin: None,
            restore_bin: None,
        }
    }
}

impl MysqlConfig {
    fn dump_bin(&self) -> &Path {
        self.dump_bin.as_deref().unwrap_or(Path::new(DEFAULT_DUMP_BIN))
    }

    fn restore_bin(&self) -> &Path {
        self.restore_bin
            .as_deref()
            .unwrap_or(Path::new(DEFAULT_RESTORE_BIN))
    }

    fn base_args(&self) -> Result<Vec<OsString>> {
        let db = &self.database;
        let mut args: Vec<OsString> = vec!["-h".into(), db.host().into()];
        if let Some(port) = db.port() {
            args.push("-P".into());
            args.push(port.to_string().into());
        }
        if let Some(user) = db.user() {
            args.push("-u".into());
            args.push(user.into());
        }
        if let Some(password) = db.resolve_password()? {
            if !password.inner().is_empty() {
                args.push(format!("{PASSWORD_ARG}{}", password.inner()).into());
            }
        }
        args.extend(db.extra_options().map(OsString::from));
        Ok(args)
    }

    /// Arguments for `mysqldump`; `result_file` is set when the tool writes the file itself.
    pub fn backup_args(&self, result_file: Option<&Path>) -> Result<Vec<OsString>> {
        let mut args = self.base_args()?;
        match self.database.name() {
            Some(name) => {
                args.push("-B".into());
                args.push(name.into());
            }
            None => args.push("--all-databases".into()),
        }
        if let Some(file) = result_file {
            args.push("-r".into());
            args.push(file.into());
        }
        Ok(args)
    }

    pub fn restore_args(&self) -> Result<Vec<OsString>> {
        let mut args = self.base_args()?;
        if let Some(name) = self.database.name() {
            args.push("-D".into());
            args.push(name.into());
        }
        Ok(args)
    }
}

impl Service for MysqlConfig {
    fn backup(&self, save_dir: &Path) -> Result<PathBuf> {
        let compress = self.database.compress();
        let path = generate_path(
            save_dir,
            ARTIFACT_PREFIX,
            Some(&with_file_ext("sql", compress)),
        );

        produce_artifact(path, |tmp| {
            if !compress.is_enabled() {
                return CmdConfig::builder()
                    .censor_arg(PASSWORD_ARG)
                    .build()
                    .run(self.dump_bin(), &self.backup_args(Some(tmp))?);
            }

            let mut writer = compress.build_compressor(BufWriter::new(File::create(tmp)?))?;
            CmdConfig::builder()
                .censor_arg(PASSWORD_ARG)
                .output(&mut writer)
                .build()
                .run(self.dump_bin(), &self.backup_args(None)?)?;
            writer
                .finish()?
                .into_inner()
                .map_err(IntoInnerError::into_error)?
                .sync_all()?;
            Ok(())
        })
        .with_msg(format!("Couldn't execute {:?}", self.dump_bin()))
    }

    fn restore(&self, artifact_path: &Path) -> Result<()> {
        ensure_artifact(artifact_path)?;
        let mut input = open_artifact(artifact_path)?;
        let res = CmdConfig::builder()
            .censor_arg(PASSWORD_ARG)
            .input(&mut input)
            .build()
            .run(self.restore_bin(), &self.restore_args()?);
        self.database
            .tolerate_restore_failure(res)
            .with_msg(format!("Couldn't execute {:?}", self.restore_bin()))
    }
}
