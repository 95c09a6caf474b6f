use crate::backup::artifact::generate_path;
use crate::backup::compress::{open_artifact, CompressorBuilder, CompressorConfig};
use crate::backup::file_ext::with_file_ext;
use crate::backup::finish::Finish;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::WithMsg;
use crate::backup::service::{ensure_artifact, produce_artifact, Service};
use crate::backup::validate::validate_valid_archive_base_name;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::io::{BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};
use validator::Validate;

/// Archives a directory tree into a tarball
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct TarballConfig {
    pub path: PathBuf,
    /// Artifact prefix, the directory's name when unset
    #[validate(custom(function = validate_valid_archive_base_name))]
    pub name: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub compress: CompressorConfig,
}

impl TarballConfig {
    fn dir_name(&self) -> Result<&std::ffi::OsStr> {
        self.path.file_name().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{:?} has no directory name", self.path),
            ))
        })
    }

    pub fn prefix(&self) -> Result<String> {
        let base = match &self.name {
            Some(name) => name.clone(),
            None => self.dir_name()?.to_string_lossy().into_owned(),
        };
        Ok(format!("{base}-backup"))
    }

    fn write_tarball(&self, out: &Path) -> Result<()> {
        let writer = self
            .compress
            .build_compressor(BufWriter::new(File::create(out)?))?;
        let mut builder = tar::Builder::new(BufWriter::new(writer));
        builder.follow_symlinks(false);
        builder.append_dir_all(self.dir_name()?, &self.path)?;

        builder
            .into_inner()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?
            .finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?
            .sync_all()?;
        Ok(())
    }
}

/// Empties `dir` without removing it. A missing directory counts as empty.
fn remove_directory_contents(dir: &Path) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let errors = entries
        .map(|entry| -> Result<()> {
            let path = entry?.path();
            let removed = if path.is_dir() && !path.is_symlink() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            removed
                .map_err(Error::from)
                .with_msg(format!("Cannot remove {:?}", path))
        })
        .filter_map(|res| res.err())
        .collect();
    convert_error_vec(errors)
}

impl Service for TarballConfig {
    fn backup(&self, save_dir: &Path) -> Result<PathBuf> {
        let path = generate_path(
            save_dir,
            &self.prefix()?,
            Some(&with_file_ext("tar", &self.compress)),
        );
        produce_artifact(path, |tmp| self.write_tarball(tmp))
            .with_msg(format!("Cannot create tarball of {:?}", self.path))
    }

    fn restore(&self, artifact_path: &Path) -> Result<()> {
        ensure_artifact(artifact_path)?;
        remove_directory_contents(&self.path)
            .with_msg("Failed to empty directory contents before restoring")?;

        let parent = self.path.parent().unwrap_or(Path::new("/"));
        tar::Archive::new(open_artifact(artifact_path)?)
            .unpack(parent)
            .map_err(Error::from)
            .with_msg(format!("Cannot unpack backup {:?}", artifact_path))
    }
}
