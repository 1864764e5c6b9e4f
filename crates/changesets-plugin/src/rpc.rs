//! The plugin RPC facade.
//!
//! [`Invoke`] is the whole contract the rest of the tool depends on: one
//! synchronous unary call, and a streaming entry point that always fails.
//! [`PluginHost`] implements it by running a WASM plugin once per call.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::{default_cache_root, ArtifactCache};
use crate::cancel::CancelToken;
use crate::coordinator::CompileCoordinator;
use crate::descriptor::PluginDescriptor;
use crate::error::{HostError, Result};
use crate::fetch::{file_uri, Fetch, SourceFetcher, DEFAULT_MAX_DOWNLOAD_BYTES};
use crate::protocol;
use crate::runtime::{CompiledPlugin, ExecutionOutcome, Mount, RuntimeConfig};
use crate::verify;

/// A unary request/response channel to a plugin.
pub trait Invoke {
    /// Send raw request bytes to `method` and return the raw response bytes.
    fn call(&self, method: &str, request: &[u8], cancel: &CancelToken) -> Result<Vec<u8>>;

    /// Open a streaming call. Plugins only speak unary calls, so this always fails.
    fn stream(&self, method: &str) -> Result<Infallible> {
        Err(HostError::Unimplemented(format!(
            "streaming call to {method} is not supported"
        )))
    }

    /// Encode `request`, call `method` and decode the response.
    fn invoke<Req, Resp>(&self, method: &str, request: &Req, cancel: &CancelToken) -> Result<Resp>
    where
        Self: Sized,
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let request = protocol::encode(request)?;
        let response = self.call(method, &request, cancel)?;
        protocol::decode(&response)
    }
}

/// Settings shared by every call a [`PluginHost`] makes.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Root of the artifact cache.
    pub cache_root: PathBuf,
    /// Directory the versioned file path is relative to.
    pub working_dir: PathBuf,
    /// Largest plugin binary accepted from a source.
    pub max_download_bytes: u64,
    /// Sandbox limits.
    pub runtime: RuntimeConfig,
}

impl HostConfig {
    /// Defaults: `~/.cache/changesets` and the current directory.
    pub fn new() -> Result<Self> {
        let working_dir = std::env::current_dir().map_err(HostError::working_dir)?;
        Ok(Self {
            cache_root: default_cache_root()?,
            working_dir,
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            runtime: RuntimeConfig::default(),
        })
    }

    /// Use a different cache root.
    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    /// Resolve the versioned file against a different directory.
    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = working_dir.into();
        self
    }

    /// Use different sandbox limits.
    pub fn with_runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }
}

/// Process-wide coordinator so concurrent hosts share in-flight loads.
fn shared_coordinator() -> Arc<CompileCoordinator<CompiledPlugin>> {
    static SHARED: OnceLock<Arc<CompileCoordinator<CompiledPlugin>>> = OnceLock::new();
    Arc::clone(SHARED.get_or_init(Arc::default))
}

/// Runs one plugin, described by a [`PluginDescriptor`], behind [`Invoke`].
///
/// Every call resolves the expected digest, loads the plugin (deduplicated
/// per digest across concurrent calls, cached on disk across runs) and runs
/// it in a fresh sandbox instance. `PluginHost` is `Send + Sync`.
///
/// # Example
///
/// ```ignore
/// use changesets_plugin::{CancelToken, HostConfig, PluginHost, VersionClient};
///
/// let host = PluginHost::new(descriptor, HostConfig::new()?);
/// let client = VersionClient::for_host(host);
/// let version = client.get_version(&CancelToken::new())?;
/// ```
pub struct PluginHost {
    descriptor: PluginDescriptor,
    config: HostConfig,
    cache: ArtifactCache,
    fetcher: Arc<dyn Fetch>,
    coordinator: Arc<CompileCoordinator<CompiledPlugin>>,
}

impl PluginHost {
    /// Create a host using the default fetcher and the process-wide coordinator.
    pub fn new(descriptor: PluginDescriptor, config: HostConfig) -> Self {
        let fetcher = Arc::new(SourceFetcher::with_limit(config.max_download_bytes));
        Self {
            cache: ArtifactCache::new(&config.cache_root),
            descriptor,
            config,
            fetcher,
            coordinator: shared_coordinator(),
        }
    }

    /// Replace the fetcher used for plugin sources and cache reads.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetch>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Use a private coordinator instead of the process-wide one.
    pub fn with_coordinator(mut self, coordinator: Arc<CompileCoordinator<CompiledPlugin>>) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// The plugin this host runs.
    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// The artifact cache this host reads and writes.
    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Resolve, fetch, verify and compile the plugin.
    pub fn load(&self, cancel: &CancelToken) -> Result<CompiledPlugin> {
        cancel.check()?;
        let digest = verify::resolve_expected_digest(&self.descriptor, self.fetcher.as_ref(), cancel)?;
        self.coordinator
            .load(&digest, cancel, || self.load_verified(&digest, cancel))
    }

    fn load_verified(&self, digest: &str, cancel: &CancelToken) -> Result<CompiledPlugin> {
        let plugin_path = self.cache.plugin_path(digest);
        let cached = ArtifactCache::has(&plugin_path);

        // A cached entry replaces the source, but is verified all the same.
        let uri = if cached {
            tracing::debug!(path = %plugin_path.display(), "loading plugin from cache");
            file_uri(&plugin_path)
        } else {
            self.descriptor.url.clone()
        };

        let artifact = self.fetcher.fetch(&uri, cancel)?;
        verify::verify(&artifact.digest, digest)?;

        if !cached {
            tracing::debug!(path = %plugin_path.display(), "plugin not cached, caching now");
            ArtifactCache::write(&plugin_path, &artifact.bytes)?;
        }

        cancel.check()?;
        CompiledPlugin::compile(digest, &artifact.bytes, &self.cache)
    }
}

impl Invoke for PluginHost {
    fn call(&self, method: &str, request: &[u8], cancel: &CancelToken) -> Result<Vec<u8>> {
        let mount = Mount::resolve(
            self.config.runtime.mount_policy,
            &self.config.working_dir,
            &self.descriptor.versioned_file,
        )?;
        let plugin = self.load(cancel)?;
        let outcome = plugin.run(
            &self.descriptor.name,
            method,
            request,
            &mount,
            &self.config.runtime,
            cancel,
        )?;
        classify(outcome)
    }
}

/// Turn a finished run into the response bytes or an error.
///
/// Exit code 0 is success whatever the plugin wrote to stderr. Otherwise
/// stderr, when present, is the error message.
pub fn classify(outcome: ExecutionOutcome) -> Result<Vec<u8>> {
    if outcome.exit_code == 0 {
        if !outcome.stderr.is_empty() {
            tracing::debug!(stderr = %outcome.stderr, "plugin wrote to stderr");
        }
        return Ok(outcome.stdout);
    }

    if outcome.stderr.is_empty() {
        Err(HostError::PluginCrashed {
            exit_code: outcome.exit_code,
            cause: outcome
                .trap
                .unwrap_or_else(|| format!("exit status {}", outcome.exit_code)),
        })
    } else {
        Err(HostError::PluginExecutionFailed {
            exit_code: outcome.exit_code,
            stderr: outcome.stderr,
        })
    }
}
