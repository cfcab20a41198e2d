// SPDX-License-Identifier: MIT

//! Step-kind registry: explicit, compile-time registration in place of a
//! directory scan + runtime introspection (`spec.md` §9 "Dynamic step
//! discovery").

use crate::connection::ConnectionSpec;
use crate::options::OptionSpec;
use indexmap::IndexMap;
use std::collections::HashMap;

/// Declarative metadata for one step kind: its options and connections.
/// Deliberately does not include `declare_runs` — that is a behavior,
/// supplied by the engine's own per-kind registry once options and parent
/// runs are available.
#[derive(Debug, Clone)]
pub struct StepKindDescriptor {
    pub name: &'static str,
    pub options: Vec<OptionSpec>,
    pub connections: Vec<ConnectionSpec>,
}

/// Capability set a step kind must implement to describe itself to the
/// registry (`spec.md` §9: `{ declare_options, declare_connections,
/// declare_runs, require_tools }`, minus the execution-time half).
pub trait StepKind: Send + Sync {
    fn describe(&self) -> StepKindDescriptor;
}

/// Maps registered step-kind names to their descriptors.
///
/// Registering a kind and constructing its descriptor are independent: a
/// `StepKind` implementation can exist in the binary without ever being
/// passed to [`StepRegistry::register`], which is how a retired kind is kept
/// around for documentation without being selectable from configuration.
#[derive(Default)]
pub struct StepRegistry {
    kinds: HashMap<String, StepKindDescriptor>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: &dyn StepKind) {
        let descriptor = kind.describe();
        self.kinds.insert(descriptor.name.to_string(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&StepKindDescriptor> {
        self.kinds.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.kinds.keys().map(String::as_str).collect()
    }
}

impl StepKindDescriptor {
    /// Build the `IndexMap` shape [`crate::options::resolve_options`] expects.
    pub fn option_specs(&self) -> IndexMap<String, OptionSpec> {
        self.options
            .iter()
            .map(|o| (o.key.clone(), o.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionType;

    struct Dummy;

    impl StepKind for Dummy {
        fn describe(&self) -> StepKindDescriptor {
            StepKindDescriptor {
                name: "dummy",
                options: vec![OptionSpec::new("width", vec![OptionType::Int]).expect("spec")],
                connections: vec![ConnectionSpec::new("out/result").expect("spec")],
            }
        }
    }

    #[test]
    fn register_then_lookup() {
        let mut registry = StepRegistry::new();
        registry.register(&Dummy);
        assert!(registry.contains("dummy"));
        assert_eq!(registry.get("dummy").expect("present").name, "dummy");
    }

    #[test]
    fn unregistered_kind_can_still_be_described() {
        let descriptor = Dummy.describe();
        assert_eq!(descriptor.name, "dummy");
        let registry = StepRegistry::new();
        assert!(!registry.contains("dummy"));
    }
}
