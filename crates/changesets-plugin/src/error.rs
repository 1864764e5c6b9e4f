//! Plugin host error types.

/// Errors produced while fetching, verifying, compiling or running a plugin.
///
/// Causes from foreign error types are captured as strings so the same
/// result can be handed to every caller waiting on a shared load.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// The plugin source uses a scheme other than `file://` or `https://`.
    #[error("unsupported scheme: {uri}")]
    UnsupportedScheme {
        /// The offending URI.
        uri: String,
    },

    /// Reading the plugin source failed.
    #[error("failed to fetch {uri}: {cause}")]
    FetchFailed {
        /// The URI being fetched.
        uri: String,
        /// Underlying I/O or network error.
        cause: String,
    },

    /// The fetched bytes do not hash to the expected digest.
    #[error("invalid checksum: expected {expected}, got {actual}")]
    IntegrityMismatch {
        /// Expected SHA-256 digest.
        expected: String,
        /// Digest of the bytes actually read.
        actual: String,
    },

    /// The plugin descriptor cannot be used as configured.
    #[error("invalid plugin descriptor: {0}")]
    InvalidDescriptor(String),

    /// Reading or writing the artifact cache failed.
    #[error("artifact cache error at {path}: {cause}")]
    Cache {
        /// Cache path involved.
        path: String,
        /// Underlying I/O error.
        cause: String,
    },

    /// The host environment could not be inspected.
    #[error("{context}: {cause}")]
    Environment {
        /// What was being looked up.
        context: String,
        /// Underlying I/O error.
        cause: String,
    },

    /// The WASM binary could not be compiled.
    #[error("compile module: {0}")]
    CompileFailed(String),

    /// The compiled module could not be instantiated in the sandbox.
    #[error("sandbox instantiation failed: {0}")]
    SandboxInstantiationFailed(String),

    /// The plugin exited non-zero and explained itself on stderr.
    ///
    /// The message is exactly the captured stderr text.
    #[error("{stderr}")]
    PluginExecutionFailed {
        /// Exit code reported by the module.
        exit_code: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// The plugin failed without writing anything to stderr.
    #[error("call: plugin exited with code {exit_code}: {cause}")]
    PluginCrashed {
        /// Exit code reported by the module, or 1 for a trap.
        exit_code: i32,
        /// The raw execution failure.
        cause: String,
    },

    /// The plugin ran to completion but reported a non-zero status.
    #[error("{message}")]
    Rejected {
        /// Status code from the response.
        code: i32,
        /// Status message from the response.
        message: String,
    },

    /// The plugin's stdout could not be decoded as the expected response.
    #[error("malformed plugin response: {0}")]
    MalformedResponse(String),

    /// The request could not be encoded.
    #[error("failed to encode request: {0}")]
    Serialization(String),

    /// The caller cancelled the operation or its deadline passed.
    #[error("operation cancelled")]
    Cancelled,

    /// The in-flight load this call was waiting on was abandoned.
    #[error("plugin load abandoned: {0}")]
    Coordinator(String),

    /// The requested operation is not supported by the plugin protocol.
    #[error("unimplemented: {0}")]
    Unimplemented(String),
}

impl HostError {
    pub(crate) fn fetch(uri: &str, cause: impl std::fmt::Display) -> Self {
        Self::FetchFailed {
            uri: uri.to_string(),
            cause: cause.to_string(),
        }
    }

    pub(crate) fn cache(path: &std::path::Path, cause: impl std::fmt::Display) -> Self {
        Self::Cache {
            path: path.display().to_string(),
            cause: cause.to_string(),
        }
    }

    pub(crate) fn working_dir(cause: impl std::fmt::Display) -> Self {
        Self::Environment {
            context: "cannot determine working directory".to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Result alias used throughout the plugin host.
pub type Result<T, E = HostError> = std::result::Result<T, E>;
