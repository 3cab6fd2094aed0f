//! Registry and per-task resolution of user aggregate functions.
//!
//! The registry is built once at job submission and shared read-only
//! across tasks. Each task owns a [`FunctionResolver`] that runs a
//! module's init hook exactly once and caches resolved handles for the
//! task's lifetime. Resolution failures are fatal: a missing user function
//! is a configuration error, not a transient fault.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use tracing::debug;

use crate::error::{AggregateError, Result};
use crate::functions::{AggregateFunction, ErasedFunction, FunctionHandle, FunctionRef};

/// One registered module: an optional one-time init hook plus a symbol
/// table of aggregate functions.
#[derive(Default)]
pub struct ModuleDef {
    init: Option<Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>>,
    symbols: AHashMap<String, Arc<dyn FunctionHandle>>,
}

impl ModuleDef {
    /// Install the module init hook, run once per task before any symbol
    /// of this module is used.
    pub fn on_init<I>(&mut self, init: I) -> &mut Self
    where
        I: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.init = Some(Box::new(init));
        self
    }

    /// Register an aggregate function under a symbol name.
    pub fn function<F>(&mut self, symbol: impl Into<String>, func: F) -> &mut Self
    where
        F: AggregateFunction + 'static,
    {
        self.symbols
            .insert(symbol.into(), Arc::new(ErasedFunction::new(func)));
        self
    }
}

impl std::fmt::Debug for ModuleDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDef")
            .field("has_init", &self.init.is_some())
            .field("symbols", &self.symbols.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Registry of user aggregate modules, keyed by module name.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    modules: AHashMap<String, ModuleDef>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the module with the given name, for registration.
    pub fn module(&mut self, name: impl Into<String>) -> &mut ModuleDef {
        self.modules.entry(name.into()).or_default()
    }
}

/// Per-task resolver over a shared [`FunctionRegistry`].
///
/// Tracks which modules have been initialized so repeat resolutions are
/// idempotent, and caches handles per [`FunctionRef`] for the task's
/// lifetime.
pub struct FunctionResolver {
    registry: Arc<FunctionRegistry>,
    initialized: AHashSet<String>,
    cache: AHashMap<FunctionRef, Arc<dyn FunctionHandle>>,
}

impl FunctionResolver {
    /// Create a resolver for one task instance.
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self {
            registry,
            initialized: AHashSet::new(),
            cache: AHashMap::new(),
        }
    }

    /// Resolve a function reference into a callable handle.
    ///
    /// Runs the module init hook on first use of the module within this
    /// task. Errors are fatal for the task; the host owns retry policy.
    pub fn resolve(&mut self, func_ref: &FunctionRef) -> Result<Arc<dyn FunctionHandle>> {
        if let Some(handle) = self.cache.get(func_ref) {
            return Ok(Arc::clone(handle));
        }

        let module = self.registry.modules.get(&func_ref.module).ok_or_else(|| {
            AggregateError::Resolution {
                module: func_ref.module.clone(),
                symbol: func_ref.symbol.clone(),
                reason: "unknown module".into(),
            }
        })?;

        if !self.initialized.contains(&func_ref.module) {
            if let Some(init) = &module.init {
                init().map_err(|e| AggregateError::Resolution {
                    module: func_ref.module.clone(),
                    symbol: func_ref.symbol.clone(),
                    reason: format!("module init failed: {e}"),
                })?;
            }
            self.initialized.insert(func_ref.module.clone());
            debug!(module = %func_ref.module, "initialized aggregate module");
        }

        let handle = module.symbols.get(&func_ref.symbol).ok_or_else(|| {
            AggregateError::Resolution {
                module: func_ref.module.clone(),
                symbol: func_ref.symbol.clone(),
                reason: "undefined symbol".into(),
            }
        })?;

        debug!(func = %func_ref, "resolved aggregate function");
        self.cache.insert(func_ref.clone(), Arc::clone(handle));
        Ok(Arc::clone(handle))
    }
}

impl std::fmt::Debug for FunctionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionResolver")
            .field("initialized", &self.initialized)
            .field("cached", &self.cache.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Count;

    impl AggregateFunction for Count {
        type Input = i64;
        type Element = i64;
        type Acc = u64;

        fn seed(&self) -> u64 {
            0
        }
        fn prepare(&self, input: i64) -> anyhow::Result<Vec<i64>> {
            Ok(vec![input])
        }
        fn reduce(&self, elements: Vec<i64>, acc: u64) -> anyhow::Result<u64> {
            Ok(acc + elements.len() as u64)
        }
        fn combine(&self, partial: u64, acc: u64) -> anyhow::Result<u64> {
            Ok(partial + acc)
        }
    }

    fn registry_with_counter(init_calls: Arc<AtomicUsize>) -> Arc<FunctionRegistry> {
        let mut registry = FunctionRegistry::new();
        registry
            .module("stats")
            .on_init(move || {
                init_calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .function("count", Count);
        Arc::new(registry)
    }

    #[test]
    fn test_resolve_known_symbol() {
        let registry = registry_with_counter(Arc::new(AtomicUsize::new(0)));
        let mut resolver = FunctionResolver::new(registry);

        resolver
            .resolve(&FunctionRef::new("stats", "count"))
            .unwrap();
    }

    #[test]
    fn test_module_init_runs_exactly_once() {
        let init_calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with_counter(Arc::clone(&init_calls));
        let mut resolver = FunctionResolver::new(registry);

        let func_ref = FunctionRef::new("stats", "count");
        let first = resolver.resolve(&func_ref).unwrap();
        let second = resolver.resolve(&func_ref).unwrap();

        assert_eq!(init_calls.load(Ordering::SeqCst), 1);
        // Cached resolution returns the same handle.
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_separate_tasks_init_separately() {
        let init_calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with_counter(Arc::clone(&init_calls));

        let func_ref = FunctionRef::new("stats", "count");
        FunctionResolver::new(Arc::clone(&registry))
            .resolve(&func_ref)
            .unwrap();
        FunctionResolver::new(registry).resolve(&func_ref).unwrap();

        // One init per task instance.
        assert_eq!(init_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_module() {
        let registry = registry_with_counter(Arc::new(AtomicUsize::new(0)));
        let mut resolver = FunctionResolver::new(registry);

        let err = resolver
            .resolve(&FunctionRef::new("nope", "count"))
            .unwrap_err();
        assert!(matches!(err, AggregateError::Resolution { .. }));
    }

    #[test]
    fn test_undefined_symbol() {
        let registry = registry_with_counter(Arc::new(AtomicUsize::new(0)));
        let mut resolver = FunctionResolver::new(registry);

        let err = resolver
            .resolve(&FunctionRef::new("stats", "median"))
            .unwrap_err();
        assert!(matches!(err, AggregateError::Resolution { .. }));
    }

    #[test]
    fn test_failed_init_is_resolution_error() {
        let mut registry = FunctionRegistry::new();
        registry
            .module("broken")
            .on_init(|| Err(anyhow::anyhow!("native lib missing")))
            .function("count", Count);
        let mut resolver = FunctionResolver::new(Arc::new(registry));

        let err = resolver
            .resolve(&FunctionRef::new("broken", "count"))
            .unwrap_err();
        match err {
            AggregateError::Resolution { reason, .. } => {
                assert!(reason.contains("init failed"))
            }
            other => panic!("expected Resolution, got {other:?}"),
        }
    }
}
