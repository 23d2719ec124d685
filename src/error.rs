//! Errors surfaced by invocations of the container engine.

use std::io;

/// Outcome of a failed engine invocation.
///
/// Exit codes are mapped once, in [`EngineError::from_exit`], so call sites
/// can match on the meaning instead of re-interpreting raw statuses.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to invoke {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    /// Exit status 1: the container or image does not exist.
    #[error("no such container or image")]
    NotFound { stderr: String },

    /// Exit status 2: the container is running, or the image is in use.
    #[error("container is running or image has dependents")]
    Busy { stderr: String },

    /// Exit status 125: an error in the engine itself.
    #[error("internal engine error")]
    Internal { stderr: String },

    /// Exit status 126: the contained command cannot be invoked.
    #[error("command cannot be invoked")]
    CannotInvoke { stderr: String },

    /// Exit status 127: the contained command cannot be found.
    #[error("command not found")]
    CommandNotFound { stderr: String },

    #[error("exited with status {code}")]
    Exit { code: i32, stderr: String },

    #[error("terminated by a signal")]
    Signaled { stderr: String },

    #[error("failed to decode engine output: {0}")]
    Decode(#[from] serde_json::Error),
}

impl EngineError {
    /// Maps a process exit status to its semantic error.
    ///
    /// `None` means the process did not exit normally (killed by a signal).
    pub fn from_exit(code: Option<i32>, stderr: String) -> Self {
        match code {
            Some(1) => Self::NotFound { stderr },
            Some(2) => Self::Busy { stderr },
            Some(125) => Self::Internal { stderr },
            Some(126) => Self::CannotInvoke { stderr },
            Some(127) => Self::CommandNotFound { stderr },
            Some(code) => Self::Exit { code, stderr },
            None => Self::Signaled { stderr },
        }
    }

    /// Captured standard error of the failed invocation, if any.
    pub fn stderr(&self) -> &str {
        match self {
            Self::NotFound { stderr }
            | Self::Busy { stderr }
            | Self::Internal { stderr }
            | Self::CannotInvoke { stderr }
            | Self::CommandNotFound { stderr }
            | Self::Exit { stderr, .. }
            | Self::Signaled { stderr } => stderr,
            Self::Spawn { .. } | Self::Decode(_) => "",
        }
    }

    /// Exit status the engine reported, if it exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NotFound { .. } => Some(1),
            Self::Busy { .. } => Some(2),
            Self::Internal { .. } => Some(125),
            Self::CannotInvoke { .. } => Some(126),
            Self::CommandNotFound { .. } => Some(127),
            Self::Exit { code, .. } => Some(*code),
            Self::Signaled { .. } | Self::Spawn { .. } | Self::Decode(_) => None,
        }
    }
}
