use crate::backup::compress::CompressorConfig;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::warn;
use validator::Validate;

/// Connection and dump options shared by the SQL database services
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate, Getters)]
#[getset(get = "pub")]
pub struct DatabaseConfig {
    #[validate(length(min = 1))]
    host: String,
    port: Option<u16>,
    user: Option<String>,
    #[validate(nested)]
    password: Option<RedactedString>,
    /// First line of this file is used as the password, takes precedence over `password`
    password_file: Option<PathBuf>,
    /// Database to dump, all databases when unset
    name: Option<String>,
    /// Extra whitespace separated arguments passed to the tool
    options: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    compress: CompressorConfig,
    /// Treat a failing restore tool as success
    #[serde(default)]
    ignore_exit_code: bool,
}

impl DatabaseConfig {
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_user<S: Into<String>>(mut self, user: S) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_password<S: Into<String>>(mut self, password: S) -> Self {
        self.password = Some(RedactedString::builder().inner(password).build());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_options<S: Into<String>>(mut self, options: S) -> Self {
        self.options = Some(options.into());
        self
    }

    pub fn with_compress(mut self, compress: CompressorConfig) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_ignore_exit_code(mut self, ignore_exit_code: bool) -> Self {
        self.ignore_exit_code = ignore_exit_code;
        self
    }

    /// Resolves the password, reading `password_file` when configured.
    pub fn resolve_password(&self) -> Result<Option<RedactedString>> {
        match &self.password_file {
            Some(path) => read_password_file(path),
            None => Ok(self.password.clone()),
        }
    }

    pub fn extra_options(&self) -> impl Iterator<Item = &str> {
        self.options.as_deref().into_iter().flat_map(str::split_whitespace)
    }

    /// Maps a failed restore to success when the operator asked to ignore exit codes.
    pub fn tolerate_restore_failure(&self, res: Result<()>) -> Result<()> {
        match res {
            Err(e) if self.ignore_exit_code && e.is_exit() => {
                tracing::info!("Ignored exit code of restore process: {e}");
                Ok(())
            }
            res => res,
        }
    }
}

fn read_password_file(path: &Path) -> Result<Option<RedactedString>> {
    let file = std::fs::File::open(path)
        .map_err(Error::from)
        .with_msg(format!("Cannot open password file {:?}", path))?;
    match BufReader::new(file).lines().next() {
        Some(line) => Ok(Some(RedactedString::builder().inner(line?).build())),
        None => {
            warn!("Using empty password file {:?}", path);
            Ok(None)
        }
    }
}
