use crate::config::ModuleConfig;
use crate::types::ModuleName;
use std::collections::HashSet;

/// Source of module gating facts, usually static configuration.
pub trait ModuleRegistry: Send + Sync {
    /// Returns whether modules are gated per principal at all.
    fn gating_enabled(&self) -> bool;

    /// Returns whether a module is open to everyone.
    fn is_public(&self, module: &ModuleName) -> bool;
}

/// Registry backed by a fixed set of public modules.
#[derive(Debug, Clone, Default)]
pub struct StaticModuleRegistry {
    gating_enabled: bool,
    public: HashSet<ModuleName>,
}

impl StaticModuleRegistry {
    /// Creates a registry with gating disabled and no public modules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables per-principal module gating.
    pub fn gating_enabled(mut self, on: bool) -> Self {
        self.gating_enabled = on;
        self
    }

    /// Marks a module as public.
    pub fn public_module(mut self, module: ModuleName) -> Self {
        self.public.insert(module);
        self
    }
}

impl From<&ModuleConfig> for StaticModuleRegistry {
    fn from(config: &ModuleConfig) -> Self {
        Self {
            gating_enabled: config.gating_enabled,
            public: config.public.iter().cloned().collect(),
        }
    }
}

impl ModuleRegistry for StaticModuleRegistry {
    fn gating_enabled(&self) -> bool {
        self.gating_enabled
    }

    fn is_public(&self, module: &ModuleName) -> bool {
        self.public.contains(module)
    }
}
