//! Execution of external dump/restore tools.
//!
//! Streams are wired straight through OS pipes, so multi-gigabyte dumps never sit in
//! memory. Secrets passed as arguments are masked before the command line is logged.

use crate::backup::redacted::REDACTED;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use bon::Builder;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::io;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// User and group a child process is switched to before it executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

/// How a single external program is run. Every unset field is inherited from the
/// current process.
#[derive(Builder)]
pub struct CmdConfig<'a> {
    /// Receives the child's stdout, e.g. a compressor writing the artifact.
    output: Option<&'a mut dyn Write>,
    /// Fed to the child's stdin from a helper thread.
    input: Option<&'a mut (dyn Read + Send)>,
    /// Replaces the whole environment of the child.
    env: Option<Vec<(OsString, OsString)>>,
    identity: Option<Identity>,
    #[builder(into)]
    work_dir: Option<PathBuf>,
    /// Arguments starting with this prefix have the rest of their value masked in logs.
    #[builder(into)]
    censor_arg: Option<String>,
}

impl Default for CmdConfig<'_> {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CmdConfig<'_> {
    pub fn redacted_command_line<P: AsRef<Path>, S: AsRef<OsStr>>(
        &self,
        program: P,
        args: &[S],
    ) -> String {
        std::iter::once(program.as_ref().to_string_lossy().into_owned())
            .chain(
                args.iter()
                    .map(|arg| redact_arg(&arg.as_ref().to_string_lossy(), self.censor_arg.as_deref())),
            )
            .join(" ")
    }

    /// Runs `program` to completion.
    ///
    /// A non-zero exit is reported as [`Error::Exit`] so callers can decide whether the
    /// code is tolerable. It only takes precedence over broken pipes, which follow from
    /// the child dying early. Any other failure reading `input` or writing `output` is an
    /// [`Error::Stream`], since the child's exit is then a consequence of it.
    pub fn run<P: AsRef<Path>, S: AsRef<OsStr>>(self, program: P, args: &[S]) -> Result<()> {
        let program = program.as_ref();
        let program_name = program.display().to_string();
        tracing::info!("Running {}", self.redacted_command_line(program, args));

        let CmdConfig {
            output,
            input,
            env,
            identity,
            work_dir,
            ..
        } = self;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::inherit() })
            .stdout(if output.is_some() { Stdio::piped() } else { Stdio::inherit() })
            .stderr(Stdio::inherit());
        if let Some(env) = env {
            command.env_clear().envs(env);
        }
        if let Some(dir) = work_dir {
            command.current_dir(dir);
        }
        if let Some(identity) = identity {
            apply_identity(&mut command, identity)?;
        }

        let mut child = command.spawn().map_err(|source| Error::Spawn {
            program: program_name.clone(),
            source,
        })?;
        let child_stdin = child.stdin.take();
        let child_stdout = child.stdout.take();

        let streamed = std::thread::scope(|scope| {
            let feeder = match (input, child_stdin) {
                (Some(input), Some(mut stdin)) => Some(scope.spawn(move || {
                    // stdin is closed when dropped here so the child sees EOF
                    io::copy(input, &mut stdin).map(|_| ())
                })),
                _ => None,
            };
            let drained = match (output, child_stdout) {
                (Some(output), Some(mut stdout)) => {
                    io::copy(&mut stdout, output).and_then(|_| output.flush())
                }
                _ => Ok(()),
            };
            let fed = match feeder {
                Some(handle) => handle
                    .join()
                    .unwrap_or_else(|_| Err(io::Error::other("stdin feeder panicked"))),
                None => Ok(()),
            };
            own_stream_error(drained, fed)
        });

        let status = child.wait().map_err(|source| Error::Stream {
            program: program_name.clone(),
            source,
        })?;
        let streamed = match streamed {
            Err(source) if !is_broken_pipe(&source) => {
                return Err(Error::Stream {
                    program: program_name,
                    source,
                })
            }
            streamed => streamed,
        };
        if !status.success() {
            return Err(Error::Exit {
                program: program_name,
                code: status.code(),
            });
        }
        streamed.map_err(|source| Error::Stream {
            program: program_name,
            source,
        })
    }
}

fn is_broken_pipe(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::BrokenPipe
}

/// Prefers an error of our side of the pipes over a broken pipe caused by the child.
fn own_stream_error(drained: io::Result<()>, fed: io::Result<()>) -> io::Result<()> {
    match (drained, fed) {
        (Err(e), _) if !is_broken_pipe(&e) => Err(e),
        (_, Err(e)) if !is_broken_pipe(&e) => Err(e),
        (drained, fed) => drained.and(fed),
    }
}

fn redact_arg(arg: &str, censor_prefix: Option<&str>) -> String {
    match censor_prefix {
        Some(prefix) if !prefix.is_empty() && arg.starts_with(prefix) => {
            format!("{prefix}{REDACTED}")
        }
        _ => arg.to_string(),
    }
}

#[cfg(unix)]
fn apply_identity(command: &mut Command, identity: Identity) -> Result<()> {
    use std::os::unix::process::CommandExt;
    command.uid(identity.uid).gid(identity.gid);
    Ok(())
}

#[cfg(not(unix))]
fn apply_identity(_command: &mut Command, _identity: Identity) -> Result<()> {
    Err(Error::unsupported("running a command as another user on this platform"))
}
