//! The backend runtime (`spec.md` §4.7): a process-wide registry mapping an
//! instruction-set name to a factory, plus dynamic loading of backend
//! plugins shipped as shared objects.
//!
//! `spec.md` describes backends as self-registering via static
//! initialization. The corpus has no `inventory`/`ctor`-equivalent crate in
//! its dependency set, and hand-rolled `#[used]` static-constructor tricks
//! are not idiomatic or portable safe Rust, so this crate registers the two
//! built-in backends explicitly from [`Runtime::bootstrap`], called once
//! from `ForgeEngine::new` — documented here and in `DESIGN.md` as a
//! deliberate simplification of "backends linked into the process register
//! themselves" rather than a silent behavior change: the observable
//! contract (`Runtime::resolve("AVX2")` works once the process has called
//! `bootstrap`) is identical.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use libloading::Library;

use crate::error::{BackendError, Result};
use crate::isa::{Avx2Backend, InstructionSet, Sse2Backend};

/// Bumped whenever the plugin ABI in this module changes. A plugin built
/// against a different version is rejected rather than loaded and
/// potentially misread.
pub const API_VERSION: u32 = 1;

type Factory = fn() -> Box<dyn InstructionSet + Send + Sync>;

/// A loaded plugin's `register_backend` export: given a mutable registry,
/// add its own entries. Matches the signature a `#[no_mangle] extern "C"
/// fn register_backend(registry: &mut BackendRegistry)` plugin would
/// export.
type RegisterBackendFn = unsafe extern "C" fn(&mut BackendRegistry);

#[derive(Default)]
pub struct BackendRegistry {
    factories: HashMap<String, Factory>,
    // Kept alive for the process lifetime once loaded; unloading a plugin
    // whose code may still be referenced by a live `ExecutableKernel` is
    // not supported (spec.md §5: backends are a process-wide resource).
    _loaded_libraries: Vec<Library>,
}

impl BackendRegistry {
    pub fn register(&mut self, name: &str, factory: Factory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn resolve(&self, name: &str) -> Result<Box<dyn InstructionSet + Send + Sync>> {
        self.factories
            .get(name)
            .map(|f| f())
            .ok_or_else(|| BackendError::UnknownInstructionSet(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

static REGISTRY: OnceLock<Mutex<BackendRegistry>> = OnceLock::new();

pub struct Runtime;

impl Runtime {
    /// Idempotent: registers `"SSE2"`, `"SSE2-Scalar"`, `"AVX2"`, and
    /// `"AVX2-Packed"` (`spec.md` §6's backend names) the first time it is
    /// called in this process; later calls are a no-op.
    pub fn bootstrap() {
        let registry = REGISTRY.get_or_init(|| Mutex::new(BackendRegistry::default()));
        let mut guard = registry.lock().expect("backend registry poisoned");
        if guard.names().is_empty() {
            guard.register("SSE2", || Box::new(Sse2Backend::new()));
            guard.register("SSE2-Scalar", || Box::new(Sse2Backend::new()));
            guard.register("AVX2", || Box::new(Avx2Backend::new()));
            guard.register("AVX2-Packed", || Box::new(Avx2Backend::new()));
        }
    }

    pub fn resolve(name: &str) -> Result<Box<dyn InstructionSet + Send + Sync>> {
        Self::bootstrap();
        let registry = REGISTRY.get().expect("bootstrap always initializes the registry");
        registry.lock().expect("backend registry poisoned").resolve(name)
    }

    /// Load a backend plugin from a shared object at `path` (`spec.md` §6:
    /// "external backends may be loaded dynamically"). The plugin must
    /// export `extern "C" fn register_backend(registry: &mut
    /// BackendRegistry)` and a `extern "C" fn forge_backend_api_version() ->
    /// u32`; a mismatched version is a hard error rather than a best-effort
    /// load, per `spec.md` §7.
    ///
    /// # Safety
    /// Loading a shared object executes arbitrary code in this process;
    /// callers must only pass paths to trusted plugins.
    pub unsafe fn load_backend_plugin(path: &Path) -> Result<()> {
        Self::bootstrap();

        let lib = Library::new(path).map_err(|source| BackendError::PluginLoad {
            path: path.display().to_string(),
            source,
        })?;

        let version_fn: libloading::Symbol<unsafe extern "C" fn() -> u32> = lib
            .get(b"forge_backend_api_version")
            .map_err(|_| BackendError::MissingPluginEntryPoint {
                path: path.display().to_string(),
            })?;
        let found = version_fn();
        if found != API_VERSION {
            return Err(BackendError::VersionMismatch {
                path: path.display().to_string(),
                found,
                expected: API_VERSION,
            });
        }

        let register_fn: libloading::Symbol<RegisterBackendFn> = lib
            .get(b"register_backend")
            .map_err(|_| BackendError::MissingPluginEntryPoint {
                path: path.display().to_string(),
            })?;

        let registry = REGISTRY.get().expect("bootstrap always initializes the registry");
        {
            let mut guard = registry.lock().expect("backend registry poisoned");
            register_fn(&mut guard);
        }

        // The library must outlive every factory it registered; park it in
        // the registry for the remainder of the process.
        registry
            .lock()
            .expect("backend registry poisoned")
            ._loaded_libraries
            .push(lib);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_registers_the_two_built_in_backends() {
        Runtime::bootstrap();
        let sse2 = Runtime::resolve("SSE2").unwrap();
        assert_eq!(sse2.meta().vector_width, 1);
        let avx2 = Runtime::resolve("AVX2").unwrap();
        assert_eq!(avx2.meta().vector_width, 4);
    }

    #[test]
    fn resolving_an_unknown_name_is_an_error() {
        Runtime::bootstrap();
        let err = Runtime::resolve("does-not-exist");
        assert!(err.is_err());
    }
}
