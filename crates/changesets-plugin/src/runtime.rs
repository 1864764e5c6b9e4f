//! WASM sandbox for version plugins.
//!
//! This module provides the wasmtime-based executor that runs a plugin
//! once per call.
//!
//! # Security / Sandboxing
//!
//! Each call gets a fresh instance with only these capabilities:
//!
//! - **Arguments**: `plugin.wasm <Method>`
//! - **Standard streams**: stdin holds the request, stdout and stderr are
//!   captured in memory (no terminal access)
//! - **Filesystem**: one preopened directory, see [`MountPolicy`]
//! - **No network access** and **no environment variables**
//! - **Memory limits**: configurable max memory (default 256MB)
//! - **Execution limits**: fuel budget plus epoch-based cancellation
//!
//! Only WASI preview1 imports are linked; a module importing anything else
//! is rejected at load time.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use wasmtime::{
    Config, Engine, Linker, Module, Store, StoreLimits, StoreLimitsBuilder, UpdateDeadline,
};
use wasmtime_wasi::p1::WasiP1Ctx;
use wasmtime_wasi::p2::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::{DirPerms, FilePerms, I32Exit, WasiCtxBuilder};

use crate::cache::ArtifactCache;
use crate::cancel::CancelToken;
use crate::error::{HostError, Result};

/// `argv[0]` seen by every plugin.
const PROGRAM_NAME: &str = "plugin.wasm";

/// The only import module plugins may use.
const WASI_MODULE: &str = "wasi_snapshot_preview1";

/// How often the epoch ticker wakes to check for cancellation.
const EPOCH_TICK: Duration = Duration::from_millis(10);

/// Which part of the host filesystem a plugin can see.
///
/// WASI preview1 grants filesystem access per directory, so the narrowest
/// view available is the directory containing the versioned file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MountPolicy {
    /// Preopen only the directory containing the versioned file, under the
    /// same relative path it has in the working directory.
    #[default]
    TargetDirectory,
    /// Preopen the whole working directory as `.`.
    WorkingDirectory,
}

/// Configuration for the plugin sandbox.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Maximum linear memory in bytes (default: 256MB).
    pub max_memory: usize,
    /// Fuel available to one call (default: 1 billion instructions).
    pub max_fuel: u64,
    /// Capacity of each of the stdout and stderr buffers (default: 1MB).
    pub max_output_bytes: usize,
    /// Filesystem view granted to plugins.
    pub mount_policy: MountPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_memory: 256 * 1024 * 1024, // 256MB
            max_fuel: 1_000_000_000,
            max_output_bytes: 1024 * 1024, // 1MB
            mount_policy: MountPolicy::default(),
        }
    }
}

/// A host directory exposed to the plugin and the path it appears under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Directory on the host.
    pub host: PathBuf,
    /// Path the guest uses to reach it.
    pub guest: String,
}

impl Mount {
    /// Work out the preopened directory for a plugin managing `target`.
    pub fn resolve(policy: MountPolicy, working_dir: &Path, target: &str) -> Result<Self> {
        match policy {
            MountPolicy::WorkingDirectory => Ok(Self {
                host: working_dir.to_path_buf(),
                guest: ".".to_string(),
            }),
            MountPolicy::TargetDirectory => {
                let path = Path::new(target);
                let mut parts = Vec::new();
                for component in path.components() {
                    match component {
                        Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                        Component::CurDir => {}
                        _ => {
                            return Err(HostError::InvalidDescriptor(format!(
                                "versioned file '{target}' must be a relative path inside the working directory"
                            )))
                        }
                    }
                }
                // The last component is the file itself.
                if parts.pop().is_none() {
                    return Err(HostError::InvalidDescriptor(
                        "versioned file path is empty".to_string(),
                    ));
                }

                if parts.is_empty() {
                    Ok(Self {
                        host: working_dir.to_path_buf(),
                        guest: ".".to_string(),
                    })
                } else {
                    Ok(Self {
                        host: parts.iter().fold(working_dir.to_path_buf(), |p, c| p.join(c)),
                        guest: parts.join("/"),
                    })
                }
            }
        }
    }
}

/// What a finished plugin run left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Exit code; 0 when `_start` returned normally, 1 for a trap.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error, lossily decoded.
    pub stderr: String,
    /// The trap message when the module did not exit cleanly.
    pub trap: Option<String>,
}

/// Per-instance store data.
struct SandboxState {
    wasi: WasiP1Ctx,
    limits: StoreLimits,
}

/// A compiled plugin ready to be instantiated.
///
/// Cloning is cheap; the engine and module are reference counted.
#[derive(Clone)]
pub struct CompiledPlugin {
    engine: Engine,
    module: Module,
}

impl CompiledPlugin {
    /// Compile verified plugin bytes, reusing a precompiled artifact when possible.
    pub fn compile(digest: &str, bytes: &[u8], cache: &ArtifactCache) -> Result<Self> {
        let engine = new_engine()?;
        let compiled_path = cache.compiled_path(digest, &engine_fingerprint(&engine));

        let module = match load_precompiled(&engine, &compiled_path) {
            Some(module) => {
                tracing::debug!(path = %compiled_path.display(), "loaded precompiled plugin");
                module
            }
            None => {
                let module =
                    Module::new(&engine, bytes).map_err(|e| HostError::CompileFailed(format!("{e:#}")))?;
                match module.serialize() {
                    Ok(artifact) => {
                        // An entry still on disk here was rejected by the engine.
                        let stored = if ArtifactCache::has(&compiled_path) {
                            tracing::debug!(path = %compiled_path.display(), "replacing unusable precompiled plugin");
                            ArtifactCache::replace(&compiled_path, &artifact)
                        } else {
                            ArtifactCache::write(&compiled_path, &artifact)
                        };
                        if let Err(e) = stored {
                            tracing::warn!(error = %e, "failed to cache compiled plugin");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to serialize compiled plugin"),
                }
                module
            }
        };

        validate_plugin_module(&module)?;
        Ok(Self { engine, module })
    }

    /// Compile plugin bytes without touching any cache.
    pub fn compile_uncached(bytes: &[u8]) -> Result<Self> {
        let engine = new_engine()?;
        let module =
            Module::new(&engine, bytes).map_err(|e| HostError::CompileFailed(format!("{e:#}")))?;
        validate_plugin_module(&module)?;
        Ok(Self { engine, module })
    }

    /// Instantiate the plugin once and run it to completion.
    ///
    /// Blocks until the module exits, traps, runs out of fuel or is
    /// cancelled. The instance and its store are dropped before returning.
    pub fn run(
        &self,
        plugin_name: &str,
        method: &str,
        request: &[u8],
        mount: &Mount,
        config: &RuntimeConfig,
        cancel: &CancelToken,
    ) -> Result<ExecutionOutcome> {
        cancel.check()?;
        let _span = tracing::debug_span!("plugin", name = plugin_name, method).entered();

        let stdout = MemoryOutputPipe::new(config.max_output_bytes);
        let stderr = MemoryOutputPipe::new(config.max_output_bytes);

        let mut wasi_builder = WasiCtxBuilder::new();
        wasi_builder
            .args(&[PROGRAM_NAME, method])
            .stdin(MemoryInputPipe::new(request.to_vec()))
            .stdout(stdout.clone())
            .stderr(stderr.clone());
        wasi_builder
            .preopened_dir(&mount.host, &mount.guest, DirPerms::all(), FilePerms::all())
            .map_err(|e| {
                HostError::SandboxInstantiationFailed(format!(
                    "failed to mount {}: {e}",
                    mount.host.display()
                ))
            })?;

        let state = SandboxState {
            wasi: wasi_builder.build_p1(),
            limits: StoreLimitsBuilder::new()
                .memory_size(config.max_memory)
                .build(),
        };
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limits);
        store
            .set_fuel(config.max_fuel)
            .map_err(|e| HostError::SandboxInstantiationFailed(e.to_string()))?;

        let token = cancel.clone();
        store.set_epoch_deadline(1);
        store.epoch_deadline_callback(move |_| {
            if token.is_cancelled() {
                Err(wasmtime::Error::msg("plugin call cancelled"))
            } else {
                Ok(UpdateDeadline::Continue(1))
            }
        });

        let mut linker: Linker<SandboxState> = Linker::new(&self.engine);
        wasmtime_wasi::p1::add_to_linker_sync(&mut linker, |state: &mut SandboxState| {
            &mut state.wasi
        })
        .map_err(|e| HostError::SandboxInstantiationFailed(e.to_string()))?;

        let instance = linker
            .instantiate(&mut store, &self.module)
            .map_err(|e| HostError::SandboxInstantiationFailed(format!("{e:#}")))?;
        let start = instance
            .get_typed_func::<(), ()>(&mut store, "_start")
            .map_err(|e| HostError::SandboxInstantiationFailed(format!("no _start entry point: {e}")))?;

        let result = with_epoch_ticker(&self.engine, || start.call(&mut store, ()));

        let (exit_code, trap) = match result {
            Ok(()) => (0, None),
            Err(e) => {
                if let Some(exit) = e.downcast_ref::<I32Exit>() {
                    (exit.0, None)
                } else if cancel.is_cancelled() {
                    return Err(HostError::Cancelled);
                } else {
                    (1, Some(format!("{e:#}")))
                }
            }
        };
        drop(store);

        let outcome = ExecutionOutcome {
            exit_code,
            stdout: stdout.contents().to_vec(),
            stderr: String::from_utf8_lossy(&stderr.contents()).into_owned(),
            trap,
        };
        tracing::debug!(
            exit_code,
            stdout_len = outcome.stdout.len(),
            stderr_len = outcome.stderr.len(),
            "plugin finished"
        );
        Ok(outcome)
    }
}

/// Run `f` while a scoped thread advances the engine epoch every [`EPOCH_TICK`].
///
/// The ticker is stopped when `f` returns or unwinds.
fn with_epoch_ticker<R>(engine: &Engine, f: impl FnOnce() -> R) -> R {
    let finished = AtomicBool::new(false);
    std::thread::scope(|s| {
        let ticker = s.spawn(|| {
            while !finished.load(Ordering::Acquire) {
                std::thread::park_timeout(EPOCH_TICK);
                engine.increment_epoch();
            }
        });
        let _stop = StopTicker {
            finished: &finished,
            ticker: ticker.thread(),
        };
        f()
    })
}

/// Stops the epoch ticker on drop.
struct StopTicker<'a> {
    finished: &'a AtomicBool,
    ticker: &'a std::thread::Thread,
}

impl Drop for StopTicker<'_> {
    fn drop(&mut self) {
        self.finished.store(true, Ordering::Release);
        self.ticker.unpark();
    }
}

fn new_engine() -> Result<Engine> {
    let mut engine_config = Config::new();
    engine_config.consume_fuel(true);
    engine_config.epoch_interruption(true);
    Engine::new(&engine_config).map_err(|e| HostError::CompileFailed(e.to_string()))
}

/// Identifies engines whose precompiled artifacts are interchangeable.
fn engine_fingerprint(engine: &Engine) -> String {
    let mut hasher = DefaultHasher::new();
    engine.precompile_compatibility_hash().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Load a precompiled module written by an earlier run, if usable.
#[allow(unsafe_code)] // Module::deserialize_file is unsafe but we load our own compiled code
fn load_precompiled(engine: &Engine, path: &Path) -> Option<Module> {
    if !ArtifactCache::has(path) {
        return None;
    }
    // SAFETY: the artifact was produced by `Module::serialize` on this host
    // for an engine with the same compatibility fingerprint, and cache
    // entries are only ever created by an atomic rename.
    match unsafe { Module::deserialize_file(engine, path) } {
        Ok(module) => Some(module),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "ignoring unusable precompiled plugin");
            None
        }
    }
}

/// Check that a module only needs what the sandbox provides.
///
/// Plugins are WASI preview1 commands: every import must come from
/// `wasi_snapshot_preview1` and `_start` must be exported.
pub fn validate_plugin_module(module: &Module) -> Result<()> {
    if let Some(import) = module.imports().find(|i| i.module() != WASI_MODULE) {
        return Err(HostError::CompileFailed(format!(
            "plugin has forbidden import: {}::{}",
            import.module(),
            import.name()
        )));
    }

    if !module.exports().any(|e| e.name() == "_start") {
        return Err(HostError::CompileFailed(
            "plugin must export '_start'".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(wat: &str) -> Result<CompiledPlugin> {
        CompiledPlugin::compile_uncached(&wat::parse_str(wat).expect("valid wat"))
    }

    fn mount(dir: &Path) -> Mount {
        Mount::resolve(MountPolicy::WorkingDirectory, dir, "VERSION").unwrap()
    }

    fn run(plugin: &CompiledPlugin, method: &str, request: &[u8]) -> Result<ExecutionOutcome> {
        let dir = tempfile::tempdir().unwrap();
        plugin.run(
            "test",
            method,
            request,
            &mount(dir.path()),
            &RuntimeConfig::default(),
            &CancelToken::new(),
        )
    }

    /// Copies stdin to stdout, one read.
    const ECHO: &str = r#"
        (module
            (import "wasi_snapshot_preview1" "fd_read"
                (func $fd_read (param i32 i32 i32 i32) (result i32)))
            (import "wasi_snapshot_preview1" "fd_write"
                (func $fd_write (param i32 i32 i32 i32) (result i32)))
            (memory (export "memory") 1)
            (func (export "_start")
                ;; iovec at 0: buf=64, len=1024
                (i32.store (i32.const 0) (i32.const 64))
                (i32.store (i32.const 4) (i32.const 1024))
                (drop (call $fd_read (i32.const 0) (i32.const 0) (i32.const 1) (i32.const 8)))
                ;; write back the number of bytes read
                (i32.store (i32.const 4) (i32.load (i32.const 8)))
                (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 12)))
            )
        )
    "#;

    #[test]
    fn test_stdin_reaches_stdout() {
        let plugin = compile(ECHO).unwrap();
        let outcome = run(&plugin, "GetVersion", b"hello plugin").unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout, b"hello plugin");
        assert!(outcome.stderr.is_empty());
        assert!(outcome.trap.is_none());
    }

    #[test]
    fn test_proc_exit_code_is_reported() {
        let plugin = compile(
            r#"
            (module
                (import "wasi_snapshot_preview1" "proc_exit" (func $exit (param i32)))
                (memory (export "memory") 1)
                (func (export "_start") (call $exit (i32.const 3)))
            )
            "#,
        )
        .unwrap();
        let outcome = run(&plugin, "GetVersion", b"").unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert!(outcome.trap.is_none());
    }

    #[test]
    fn test_trap_is_exit_code_one() {
        let plugin = compile(
            r#"
            (module
                (memory (export "memory") 1)
                (func (export "_start") unreachable)
            )
            "#,
        )
        .unwrap();
        let outcome = run(&plugin, "GetVersion", b"").unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert!(outcome.trap.is_some());
    }

    #[test]
    fn test_infinite_loop_runs_out_of_fuel() {
        let plugin = compile(
            r#"
            (module
                (memory (export "memory") 1)
                (func (export "_start") (loop $l (br $l)))
            )
            "#,
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig {
            max_fuel: 100_000,
            ..RuntimeConfig::default()
        };
        let outcome = plugin
            .run("test", "GetVersion", b"", &mount(dir.path()), &config, &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert!(outcome.trap.is_some());
    }

    #[test]
    fn test_cancellation_interrupts_running_plugin() {
        let plugin = compile(
            r#"
            (module
                (memory (export "memory") 1)
                (func (export "_start") (loop $l (br $l)))
            )
            "#,
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig {
            max_fuel: 1 << 40,
            ..RuntimeConfig::default()
        };
        let cancel = CancelToken::with_timeout(Duration::from_millis(100));
        let err = plugin
            .run("test", "GetVersion", b"", &mount(dir.path()), &config, &cancel)
            .unwrap_err();
        assert_eq!(err, HostError::Cancelled);
    }

    #[test]
    fn test_epoch_ticker_stops_promptly() {
        let engine = new_engine().unwrap();
        let started = std::time::Instant::now();
        for i in 0..20 {
            assert_eq!(with_epoch_ticker(&engine, || i), i);
        }
        // Twenty full ticks would take at least 200ms.
        assert!(started.elapsed() < Duration::from_millis(150), "{:?}", started.elapsed());
    }

    #[test]
    fn test_epoch_ticker_stops_on_panic() {
        let engine = new_engine().unwrap();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            with_epoch_ticker::<()>(&engine, || panic!("plugin host bug"));
        }));
        assert!(outcome.is_err());
    }

    #[test]
    fn test_forbidden_import_rejected() {
        let err = compile(
            r#"
            (module
                (import "env" "some_func" (func $some_func))
                (func (export "_start"))
            )
            "#,
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("forbidden import"), "{err}");
        assert!(err.to_string().contains("env::some_func"), "{err}");
    }

    #[test]
    fn test_missing_start_rejected() {
        let err = compile(r#"(module (memory (export "memory") 1))"#).err().unwrap();
        assert!(err.to_string().contains("_start"), "{err}");
    }

    #[test]
    fn test_invalid_bytes_fail_to_compile() {
        let err = CompiledPlugin::compile_uncached(b"not wasm").err().unwrap();
        assert!(matches!(err, HostError::CompileFailed(_)));
    }

    #[test]
    fn test_compile_writes_precompiled_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path());
        let bytes = wat::parse_str(ECHO).unwrap();

        CompiledPlugin::compile("abc", &bytes, &cache).unwrap();
        let written: Vec<_> = std::fs::read_dir(dir.path().join("wasmtime"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(written.len(), 1);
        assert!(written[0].starts_with("abc-") && written[0].ends_with(".cwasm"));

        // Second compile loads the artifact and still runs.
        let plugin = CompiledPlugin::compile("abc", &bytes, &cache).unwrap();
        let outcome = run(&plugin, "GetVersion", b"again").unwrap();
        assert_eq!(outcome.stdout, b"again");
    }

    #[test]
    fn test_unusable_precompiled_artifact_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path());
        let bytes = wat::parse_str(ECHO).unwrap();
        let engine = new_engine().unwrap();
        let compiled_path = cache.compiled_path("abc", &engine_fingerprint(&engine));

        std::fs::create_dir_all(compiled_path.parent().unwrap()).unwrap();
        std::fs::write(&compiled_path, b"not a precompiled module").unwrap();
        assert!(load_precompiled(&engine, &compiled_path).is_none());

        let plugin = CompiledPlugin::compile("abc", &bytes, &cache).unwrap();
        assert_eq!(run(&plugin, "GetVersion", b"first").unwrap().stdout, b"first");
        assert!(load_precompiled(&engine, &compiled_path).is_some());

        let plugin = CompiledPlugin::compile("abc", &bytes, &cache).unwrap();
        assert_eq!(run(&plugin, "GetVersion", b"second").unwrap().stdout, b"second");
    }

    #[test]
    fn test_mount_target_directory() {
        let root = Path::new("/work");
        assert_eq!(
            Mount::resolve(MountPolicy::TargetDirectory, root, "pyproject.toml").unwrap(),
            Mount {
                host: root.to_path_buf(),
                guest: ".".to_string()
            }
        );
        assert_eq!(
            Mount::resolve(MountPolicy::TargetDirectory, root, "./pkg/sub/Cargo.toml").unwrap(),
            Mount {
                host: root.join("pkg").join("sub"),
                guest: "pkg/sub".to_string()
            }
        );
    }

    #[test]
    fn test_mount_rejects_escaping_paths() {
        let root = Path::new("/work");
        for target in ["../VERSION", "/etc/passwd", "pkg/../../VERSION", ""] {
            assert!(
                matches!(
                    Mount::resolve(MountPolicy::TargetDirectory, root, target),
                    Err(HostError::InvalidDescriptor(_))
                ),
                "{target} should be rejected"
            );
        }
    }

    #[test]
    fn test_mount_working_directory_allows_anything() {
        let mount = Mount::resolve(MountPolicy::WorkingDirectory, Path::new("/work"), "../x").unwrap();
        assert_eq!(mount.guest, ".");
    }

    #[test]
    fn test_runtime_config_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_memory, 256 * 1024 * 1024); // 256MB
        assert_eq!(config.mount_policy, MountPolicy::TargetDirectory);
    }
}
