//! In-memory binding catalog
//!
//! The resolver a host builds up front from its own metadata. Modules hold
//! classes by name; base classes are looked up within the same module.

use std::collections::HashMap;
use std::sync::Arc;

use super::binding::{BindingResolver, ClassBinding, ModuleBinding};
use crate::error::BindingError;

#[derive(Debug, Default)]
struct ModuleEntry {
    binding: Arc<ModuleBinding>,
    classes: HashMap<String, Arc<ClassBinding>>,
}

/// Resolver backed by bindings registered up front
#[derive(Debug, Default)]
pub struct BindingCatalog {
    modules: HashMap<String, ModuleEntry>,
}

impl BindingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a module's own hooks
    pub fn module(mut self, binding: ModuleBinding) -> Self {
        let entry = self.modules.entry(binding.name.clone()).or_default();
        entry.binding = Arc::new(binding);
        self
    }

    /// Register a class; the module is created bare if unknown
    pub fn class(mut self, module: &str, binding: ClassBinding) -> Self {
        let entry = self
            .modules
            .entry(module.to_string())
            .or_insert_with(|| ModuleEntry {
                binding: Arc::new(ModuleBinding::new(module)),
                classes: HashMap::new(),
            });
        entry.classes.insert(binding.name.clone(), Arc::new(binding));
        self
    }

    pub fn module_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn class_count(&self) -> usize {
        self.modules.values().map(|m| m.classes.len()).sum()
    }
}

impl BindingResolver for BindingCatalog {
    fn resolve_module(&self, module: &str) -> Result<Arc<ModuleBinding>, BindingError> {
        self.modules
            .get(module)
            .map(|entry| entry.binding.clone())
            .ok_or_else(|| BindingError::UnknownModule(module.to_string()))
    }

    fn resolve_class(&self, module: &str, class: &str) -> Result<Arc<ClassBinding>, BindingError> {
        let entry = self
            .modules
            .get(module)
            .ok_or_else(|| BindingError::UnknownModule(module.to_string()))?;
        entry
            .classes
            .get(class)
            .cloned()
            .ok_or_else(|| BindingError::UnknownClass {
                module: module.to_string(),
                class: class.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::binding::TestInstance;

    #[derive(Default)]
    struct Fixture;

    impl TestInstance for Fixture {}

    #[test]
    fn test_catalog_resolution() {
        let catalog = BindingCatalog::new()
            .module(ModuleBinding::new("core"))
            .class(
                "core",
                ClassBinding::builder::<Fixture>("Calc")
                    .default_constructor()
                    .build(),
            )
            .class(
                "extra",
                ClassBinding::builder::<Fixture>("Other").build(),
            );

        assert_eq!(catalog.module_names(), vec!["core", "extra"]);
        assert_eq!(catalog.class_count(), 2);
        assert_eq!(catalog.resolve_class("core", "Calc").unwrap().name, "Calc");
        assert_eq!(catalog.resolve_module("extra").unwrap().name, "extra");

        assert_eq!(
            catalog.resolve_class("core", "Missing").unwrap_err(),
            BindingError::UnknownClass {
                module: "core".into(),
                class: "Missing".into()
            }
        );
        assert!(matches!(
            catalog.resolve_module("nope"),
            Err(BindingError::UnknownModule(_))
        ));
    }
}
