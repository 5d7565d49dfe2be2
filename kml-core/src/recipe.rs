//! The sandbox build recipe (§6): an external collaborator describing how
//! to build a service's base image. The orchestrator and sandbox manager
//! treat its contents opaquely — they pass `dockerfile()` straight through
//! to the provider and fall back to the other accessors only when the
//! caller's configuration doesn't override them.

use std::collections::BTreeMap;

pub trait BuildRecipe: Send + Sync {
    fn dockerfile(&self) -> String;
    fn default_install(&self) -> Vec<String>;
    fn default_processes(&self) -> BTreeMap<String, String>;
    fn default_port(&self) -> u16;
}

/// The built-in recipe: a generic Rails-shaped runtime image. Kept as the
/// zero-configuration default; callers needing another stack supply their
/// own [`BuildRecipe`].
pub struct RailsRuntimeRecipe;

impl BuildRecipe for RailsRuntimeRecipe {
    fn dockerfile(&self) -> String {
        include_str!("../assets/rails_runtime.dockerfile").to_string()
    }

    fn default_install(&self) -> Vec<String> {
        vec!["bundle install".to_string()]
    }

    fn default_processes(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("web".to_string(), "bin/rails s -b 0.0.0.0 -p 3000".to_string())])
    }

    fn default_port(&self) -> u16 {
        3000
    }
}
