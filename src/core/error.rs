//! Error types shared by the hosting core

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the hosting core
pub type HostResult<T> = Result<T, HostError>;

/// Errors produced while locating the runtime, creating applications or
/// watching the offline marker
#[derive(Debug, Error)]
pub enum HostError {
    #[error("out of memory")]
    OutOfMemory,

    /// Sticky for the remaining lifetime of the process
    #[error("loading the request handler failed earlier in this process; not retrying")]
    RuntimeLoadPreviouslyFailed,

    #[error("request handler could not be located by any discovery path")]
    RequestHandlerNotFound,

    #[error("request handler does not export '{symbol}'")]
    EntryPointMissing { symbol: String },

    #[error("request handler entry points have not been resolved")]
    InvalidFunctionState,

    #[error("hosting runtime unavailable: {0}")]
    HostfxrUnavailable(String),

    #[error("native search directory query exited with code {exit_code}")]
    SearchDirectories { exit_code: i32 },

    #[error("request handler not present in any native search directory")]
    NotFoundInSearchPaths,

    #[error("failed to load library {path}: {reason}")]
    LibraryLoad { path: PathBuf, reason: String },

    #[error("CreateApplication failed with code {code:#010x}")]
    CreateApplication { code: i32 },

    #[error("CreateRequestHandler failed with code {code:#010x}")]
    CreateRequestHandler { code: i32 },

    #[error("application is offline; not creating it")]
    ApplicationOffline,

    #[error("buffer grew past {limit} elements without fitting the result")]
    BufferLimit { limit: usize },

    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// Whether the error comes from the process-wide sticky resolution state
    pub fn is_sticky(&self) -> bool {
        matches!(self, Self::RuntimeLoadPreviouslyFailed)
    }
}
