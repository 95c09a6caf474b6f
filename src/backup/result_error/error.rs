use crate::backup::result_error::{WithDebugObjectAndFnName, WithFnName, WithMsg};
use crate::backup::task::TaskStep;
use itertools::Itertools;
use std::fmt::Debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    LiblzmaStream(#[from] liblzma::stream::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error("{program} exited with {}", describe_exit_code(.code))]
    Exit { program: String, code: Option<i32> },
    #[error("cannot start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("stream i/o with {program} failed: {source}")]
    Stream {
        program: String,
        source: std::io::Error,
    },
    #[error("{0} is not implemented")]
    Unsupported(String),
    #[error("artifact {0:?} not found")]
    ArtifactNotFound(String),
    #[error("no backups found in {0}")]
    NoBackups(String),
    #[error("artifact name {name:?} does not start with the store prefix {prefix:?}")]
    OutsideNamespace { name: String, prefix: String },
    #[error("invalid cron expression {expr:?}: {reason}")]
    InvalidCron { expr: String, reason: String },
    #[error("{} failed:\n{}", step, indent::indent_all_with("  ", error.to_string()))]
    Step { step: TaskStep, error: Box<Error> },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { fn_name: String, error: Box<Error> },
    #[error("{:?} {} failed:\n{}", obj_debug, fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithDebugObjAndFnName {
        error: Box<Error>,
        obj_debug: Box<dyn Debug + Send>,
        fn_name: String,
    },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

fn describe_exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl<S: Into<String>, O: Debug + Send + 'static> WithDebugObjectAndFnName<S, O> for Error {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithDebugObjAndFnName {
            error: Box::new(self),
            obj_debug: Box::new(obj),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl<S: Into<String>> WithFnName<S> for Error {
    fn with_fn_name(self, fn_name: S) -> Self {
        Self::WithFnName {
            fn_name: fn_name.into(),
            error: Box::new(self),
        }
    }
}

impl Error {
    pub fn step(step: TaskStep, error: Error) -> Self {
        Self::Step {
            step,
            error: Box::new(error),
        }
    }

    pub fn unsupported<S: Into<String>>(what: S) -> Self {
        Self::Unsupported(what.into())
    }

    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    /// Strips context wrappers down to the error that actually happened.
    pub fn root(&self) -> &Error {
        match self {
            Error::Step { error, .. }
            | Error::WithMsg { error, .. }
            | Error::WithFnName { error, .. }
            | Error::WithDebugObjAndFnName { error, .. } => error.root(),
            e => e,
        }
    }

    /// Exit code of the failed subprocess, if this error is a non-zero exit.
    pub fn exit_code(&self) -> Option<i32> {
        match self.root() {
            Error::Exit { code, .. } => *code,
            _ => None,
        }
    }

    pub fn is_exit(&self) -> bool {
        matches!(self.root(), Error::Exit { .. })
    }

    pub fn is_not_found(&self) -> bool {
        match self.root() {
            Error::ArtifactNotFound(_) | Error::NoBackups(_) => true,
            Error::ObjectStore(object_store::Error::NotFound { .. }) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Outermost orchestrator step this error was raised from.
    pub fn failed_step(&self) -> Option<TaskStep> {
        match self {
            Error::Step { step, .. } => Some(*step),
            Error::WithMsg { error, .. }
            | Error::WithFnName { error, .. }
            | Error::WithDebugObjAndFnName { error, .. } => error.failed_step(),
            _ => None,
        }
    }
}
