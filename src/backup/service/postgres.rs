use crate::backup::artifact::generate_path;
use crate::backup::command::CmdConfig;
use crate::backup::compress::{open_artifact, CompressorBuilder};
use crate::backup::file_ext::with_file_ext;
use crate::backup::finish::Finish;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::service::database::DatabaseConfig;
use crate::backup::service::{ensure_artifact, env_with, produce_artifact, Service};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};
use validator::Validate;

static DEFAULT_DUMP_BIN: &str = "/usr/bin/pg_dump";
static DEFAULT_DUMP_ALL_BIN: &str = "/usr/bin/pg_dumpall";
static DEFAULT_RESTORE_BIN: &str = "/usr/bin/pg_restore";
static DEFAULT_PSQL_BIN: &str = "/usr/bin/psql";
static CUSTOM_FORMAT_EXT: &str = "dump";
static MAINTENANCE_DB: &str = "postgres";
pub static ARTIFACT_PREFIX: &str = "postgres-backup";

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct PostgresConfig {
    #[serde(flatten)]
    #[validate(nested)]
    pub database: DatabaseConfig,
    /// Use pg_dump's custom format (always compressed), needs a database name
    #[serde(default)]
    pub custom: bool,
    /// Drop database objects before restoring them
    #[serde(default)]
    pub drop: bool,
    /// Role owning the restored objects
    pub owner: Option<String>,
    pub bin_dir: Option<PathBuf>,
}

impl From<DatabaseConfig> for PostgresConfig {
    fn from(database: DatabaseConfig) -> Self {
        Self {
            database,
            custom: false,
            drop: false,
            owner: None,
            bin_dir: None,
        }
    }
}

impl PostgresConfig {
    fn bin(&self, default: &str) -> PathBuf {
        let default = Path::new(default);
        match (&self.bin_dir, default.file_name()) {
            (Some(dir), Some(name)) => dir.join(name),
            _ => default.to_path_buf(),
        }
    }

    fn uses_custom_format(&self) -> bool {
        self.custom && self.database.name().is_some()
    }

    fn env(&self) -> Result<Vec<(OsString, OsString)>> {
        let password = self.database.resolve_password()?;
        Ok(env_with(
            password
                .iter()
                .map(|p| ("PGPASSWORD", p.inner().as_str())),
        ))
    }

    fn base_args(&self) -> Vec<OsString> {
        let db = &self.database;
        let mut args: Vec<OsString> = vec!["-h".into(), db.host().into()];
        if let Some(port) = db.port() {
            args.push("-p".into());
            args.push(port.to_string().into());
        }
        if let Some(user) = db.user() {
            args.push("-U".into());
            args.push(user.into());
        }
        args.extend(db.extra_options().map(OsString::from));
        args
    }

    /// Program and arguments producing the dump; `output_file` is set when the tool
    /// writes the file itself rather than to stdout.
    pub fn backup_command(&self, output_file: Option<&Path>) -> (PathBuf, Vec<OsString>) {
        let mut args = self.base_args();
        if self.uses_custom_format() {
            args.push("-Fc".into());
        }
        if let Some(file) = output_file {
            args.push("-f".into());
            args.push(file.into());
        }
        match self.database.name() {
            Some(name) => {
                args.push(name.into());
                (self.bin(DEFAULT_DUMP_BIN), args)
            }
            None => (self.bin(DEFAULT_DUMP_ALL_BIN), args),
        }
    }

    /// Program and arguments restoring `artifact_path`. Custom format archives are passed
    /// by path, plain SQL is expected on stdin.
    pub fn restore_command(&self, artifact_path: &Path) -> (PathBuf, Vec<OsString>, bool) {
        let mut args = self.base_args();
        let target = self.database.name().as_deref().unwrap_or(MAINTENANCE_DB);
        let is_custom = artifact_path
            .extension()
            .is_some_and(|ext| ext == CUSTOM_FORMAT_EXT);

        if is_custom {
            if self.drop {
                args.push("--clean".into());
                args.push("--if-exists".into());
            }
            if let Some(owner) = &self.owner {
                args.push("--no-owner".into());
                args.push(format!("--role={owner}").into());
            }
            args.push("-d".into());
            args.push(target.into());
            args.push(artifact_path.into());
            (self.bin(DEFAULT_RESTORE_BIN), args, false)
        } else {
            args.push("-d".into());
            args.push(target.into());
            (self.bin(DEFAULT_PSQL_BIN), args, true)
        }
    }

    fn file_ext(&self) -> String {
        if self.uses_custom_format() {
            CUSTOM_FORMAT_EXT.to_string()
        } else {
            with_file_ext("sql", self.database.compress())
        }
    }
}

impl Service for PostgresConfig {
    fn backup(&self, save_dir: &Path) -> Result<PathBuf> {
        let compress = self.database.compress();
        let path = generate_path(save_dir, ARTIFACT_PREFIX, Some(&self.file_ext()));
        let env = self.env()?;

        produce_artifact(path, |tmp| {
            if self.uses_custom_format() || !compress.is_enabled() {
                let (program, args) = self.backup_command(Some(tmp));
                return CmdConfig::builder().env(env).build().run(&program, &args);
            }

            let (program, args) = self.backup_command(None);
            let mut writer = compress.build_compressor(BufWriter::new(File::create(tmp)?))?;
            CmdConfig::builder()
                .env(env)
                .output(&mut writer)
                .build()
                .run(&program, &args)?;
            writer
                .finish()?
                .into_inner()
                .map_err(IntoInnerError::into_error)?
                .sync_all()?;
            Ok(())
        })
        .with_msg("Postgres dump failed")
    }

    fn restore(&self, artifact_path: &Path) -> Result<()> {
        ensure_artifact(artifact_path)?;
        let (program, args, uses_stdin) = self.restore_command(artifact_path);
        let env = self.env()?;

        let res = if uses_stdin {
            let mut input = open_artifact(artifact_path)?;
            CmdConfig::builder()
                .env(env)
                .input(&mut input)
                .build()
                .run(&program, &args)
        } else {
            CmdConfig::builder().env(env).build().run(&program, &args)
        };
        self.database
            .tolerate_restore_failure(res)
            .with_msg(format!("Couldn't execute {:?}", program))
    }
}
