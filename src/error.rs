use std::io;

use thiserror::Error;

use crate::process::ExitOutcome;

pub type Result<T> = std::result::Result<T, LaunchError>;

/// Every way a single launch attempt can fail. None of them are retried.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("invalid invocation: {0}")]
    Invocation(String),

    #[error("required parameter `{0}` is not set")]
    MissingParameter(&'static str),

    #[error("parameter `{0}` contains an interior nul byte")]
    InvalidParameter(&'static str),

    #[error("unable to map the child stack: {0}")]
    StackAllocation(#[source] io::Error),

    #[error("{0} namespaces are not supported by this kernel")]
    NamespaceUnsupported(&'static str),

    #[error("unable to clone() into new namespaces: {source}{hint}")]
    IsolationCreation {
        #[source]
        source: io::Error,
        hint: String,
    },

    #[error("waitpid({pid}) failed: {source}")]
    Wait {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("payload terminated with {0}")]
    PayloadExit(ExitOutcome),
}
