//! # Module Declarations
//!
//! Which store modules take part in synchronization is declared up front
//! instead of being discovered by inspecting the host store:
//!
//! ```toml
//! [modules.todos]
//! broadcast = true
//! mutations = ["pushTodo", "removeTodo"]
//!
//! [modules.session]
//! broadcast = false
//! ```
//!
//! Every module with `broadcast = true` gets its own channel named after the
//! module. Its `mutations` become the channel's allow-list.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::mutation::{qualify, validate_segment};

// =============================================================================
// Module Declaration
// =============================================================================

/// Declared capabilities of one store module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDeclaration {
    /// Whether this module's mutations are shared with peers.
    #[serde(default)]
    pub broadcast: bool,

    /// Unqualified mutation names, in declaration order.
    #[serde(default)]
    pub mutations: Vec<String>,
}

impl ModuleDeclaration {
    /// Declares a module whose mutations are broadcast to peers.
    pub fn broadcast<I, S>(mutations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ModuleDeclaration {
            broadcast: true,
            mutations: mutations.into_iter().map(Into::into).collect(),
        }
    }

    /// Declares a module that stays local to each instance.
    pub fn local<I, S>(mutations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ModuleDeclaration {
            broadcast: false,
            mutations: mutations.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the mutation names qualified with `namespace`.
    pub fn qualified_mutations(&self, namespace: &str) -> Vec<String> {
        self.mutations
            .iter()
            .map(|name| qualify(namespace, name))
            .collect()
    }
}

// =============================================================================
// Module Catalog
// =============================================================================

/// Ordered set of module declarations keyed by module name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleCatalog {
    modules: BTreeMap<String, ModuleDeclaration>,
}

impl ModuleCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a declaration, builder style.
    pub fn with_module(mut self, name: impl Into<String>, declaration: ModuleDeclaration) -> Self {
        self.insert(name, declaration);
        self
    }

    /// Adds or replaces a declaration.
    pub fn insert(&mut self, name: impl Into<String>, declaration: ModuleDeclaration) {
        self.modules.insert(name.into(), declaration);
    }

    /// Looks up a declaration.
    pub fn get(&self, name: &str) -> Option<&ModuleDeclaration> {
        self.modules.get(name)
    }

    /// Returns true if a module with this name is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Iterates over all declarations in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModuleDeclaration)> {
        self.modules.iter().map(|(name, decl)| (name.as_str(), decl))
    }

    /// Iterates over declarations marked for broadcast.
    pub fn broadcast_modules(&self) -> impl Iterator<Item = (&str, &ModuleDeclaration)> {
        self.iter().filter(|(_, decl)| decl.broadcast)
    }

    /// Number of declared modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns true if nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Validates every module and mutation name.
    pub fn validate(&self) -> CoreResult<()> {
        for (name, declaration) in self.iter() {
            validate_segment("module", name)?;
            for mutation in &declaration.mutations {
                validate_segment("mutation", mutation)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ModuleCatalog {
        ModuleCatalog::new()
            .with_module("todos", ModuleDeclaration::broadcast(["pushTodo", "removeTodo"]))
            .with_module("session", ModuleDeclaration::local(["login"]))
    }

    #[test]
    fn test_broadcast_modules() {
        let catalog = catalog();
        let names: Vec<&str> = catalog.broadcast_modules().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["todos"]);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_qualified_mutations_keep_order() {
        let decl = ModuleDeclaration::broadcast(["pushTodo", "removeTodo"]);
        assert_eq!(
            decl.qualified_mutations("todos"),
            vec!["todos/pushTodo", "todos/removeTodo"]
        );
    }

    #[test]
    fn test_validate() {
        assert!(catalog().validate().is_ok());

        let bad_module = ModuleCatalog::new().with_module("a/b", ModuleDeclaration::default());
        assert!(bad_module.validate().is_err());

        let bad_mutation =
            ModuleCatalog::new().with_module("todos", ModuleDeclaration::broadcast(["x/y"]));
        assert!(bad_mutation.validate().is_err());
    }

    #[test]
    fn test_deserialize_map_shape() {
        let catalog: ModuleCatalog = serde_json::from_value(serde_json::json!({
            "todos": { "broadcast": true, "mutations": ["pushTodo"] },
            "session": {}
        }))
        .unwrap();

        let todos = catalog.get("todos").unwrap();
        assert!(todos.broadcast);
        assert_eq!(todos.mutations, vec!["pushTodo"]);
        assert!(!catalog.get("session").unwrap().broadcast);
    }
}
