//! Error types for the CI triage engine.

use thiserror::Error;

/// Errors that can escape the public surface of this crate.
///
/// Most internal fallibility is carried as `anyhow::Result` with
/// `.context(...)` at I/O boundaries; this enum is the typed surface for
/// errors that must be surfaced immediately (configuration) or that the
/// Tool Dispatcher needs to render distinctly rather than just as free text.
#[derive(Debug, Error)]
pub enum CiWatchError {
    /// Missing or invalid configuration (e.g. no Buildkite token).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// HTTP transport failure: timeout, network error, non-2xx status.
    #[error("transport error calling {context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    /// A non-2xx response whose body didn't even carry a `reqwest::Error`.
    #[error("transport error calling {context}: HTTP {status}")]
    HttpStatus { context: String, status: u16 },

    /// Unexpected response payload shape.
    #[error("failed to parse response from {context}: {source}")]
    Parse {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// A best-effort collaborator (issue search, ownership, blame) is
    /// unavailable. Never surfaced to the Tool Dispatcher as a hard error —
    /// callers match on this variant and degrade gracefully.
    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),
}

impl CiWatchError {
    pub fn transport(context: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source,
        }
    }

    pub fn http_status(context: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            context: context.into(),
            status,
        }
    }

    pub fn parse(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Parse {
            context: context.into(),
            source,
        }
    }
}
