//! Error types for the harness.

use crate::backend::BackendKind;
use thiserror::Error;

/// Harness result type.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Harness errors.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// The container provider could not bring up a reachable instance.
    #[error("Failed to provision {backend}: {source}")]
    Provision {
        backend: BackendKind,
        #[source]
        source: anyhow::Error,
    },

    /// The readiness attempt budget ran out.
    #[error("{backend} did not become ready after {attempts} attempts")]
    ReadinessTimeout { backend: BackendKind, attempts: u32 },

    /// A readiness probe hit an error that retrying cannot fix.
    #[error("Readiness check for {backend} failed on attempt {attempt}: {source}")]
    ReadinessFailed {
        backend: BackendKind,
        attempt: u32,
        #[source]
        source: sqlx::Error,
    },

    /// Init script could not be found by the loader.
    #[error("Init script not found: {0}")]
    ScriptNotFound(String),

    /// A statement of an init script failed; later statements were not run.
    #[error("Init script {script} failed at statement {index} ({statement}): {source}")]
    ScriptExecution {
        script: String,
        index: usize,
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    /// No controller is registered for the requested backend.
    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    /// The switchable pool was used before the first switch.
    #[error("No connection pool configured. Call switch_to() first.")]
    NotConfigured,

    /// A connection from a superseded pool generation was presented.
    #[error("Connection belongs to pool generation {held}, current generation is {current}")]
    StaleGeneration { held: u64, current: u64 },

    /// Invalid controller state transition.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (script files, sockets)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed endpoint URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Caller-supplied test logic returned an error.
    #[error("Test logic failed: {0}")]
    TestLogic(#[source] anyhow::Error),

    /// Any failure of a single backend run, tagged with the backend name.
    #[error("{backend} test failed: {source}")]
    BackendFailed {
        backend: &'static str,
        #[source]
        source: Box<HarnessError>,
    },
}

impl HarnessError {
    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Wrap an error with the display name of the backend it came from.
    pub fn backend_failed(backend: BackendKind, source: HarnessError) -> Self {
        Self::BackendFailed {
            backend: backend.display_name(),
            source: Box::new(source),
        }
    }

    /// The innermost error, looking through [`HarnessError::BackendFailed`].
    pub fn root(&self) -> &HarnessError {
        match self {
            Self::BackendFailed { source, .. } => source.root(),
            other => other,
        }
    }
}
