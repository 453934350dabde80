//! Module boundary: how `import "path" as name` finds its exports.

use std::collections::HashMap;
use std::sync::RwLock;

use indexmap::IndexMap;

use super::value::Value;

/// Resolves an import path to the module's exported bindings.
///
/// Loaders are shared with spawned tasks, so they must be thread safe.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, path: &str) -> Result<IndexMap<String, Value>, String>;
}

/// Loader backed by modules registered up front.
#[derive(Default)]
pub struct StaticLoader {
    modules: RwLock<HashMap<String, IndexMap<String, Value>>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: impl Into<String>, exports: IndexMap<String, Value>) {
        if let Ok(mut modules) = self.modules.write() {
            modules.insert(path.into(), exports);
        }
    }

    pub fn with_module(self, path: impl Into<String>, exports: IndexMap<String, Value>) -> Self {
        self.register(path, exports);
        self
    }
}

impl ModuleLoader for StaticLoader {
    fn load(&self, path: &str) -> Result<IndexMap<String, Value>, String> {
        let modules = self
            .modules
            .read()
            .map_err(|_| "module registry lock poisoned".to_string())?;
        modules
            .get(path)
            .cloned()
            .ok_or_else(|| format!("module '{}' not found", path))
    }
}
