use std::collections::{BTreeMap, HashMap, HashSet};

use crate::ssa::NameMap;
use crate::tensor::Tensor;

/// Named tensors available to the executor: weights, constants and any
/// tensor fed before a run.
#[derive(Clone, Debug, Default)]
pub struct Workspace {
    blobs: BTreeMap<String, Tensor>,
}

impl Workspace {
    pub fn new() -> Self {
        Workspace::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.blobs.insert(name.into(), tensor)
    }

    pub fn remove(&mut self, name: &str) -> Option<Tensor> {
        self.blobs.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.blobs.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.blobs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.blobs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

/// Read-only view of a workspace under SSA names: blobs that were renamed are
/// visible only under their SSA alias.
pub struct MappedWorkspace<'a> {
    base: &'a Workspace,
    aliases: HashMap<String, String>,
    hidden: HashSet<String>,
}

impl<'a> MappedWorkspace<'a> {
    pub fn new(base: &'a Workspace, names: &NameMap) -> Self {
        let mut aliases = HashMap::new();
        let mut hidden = HashSet::new();
        for (original, ssa) in names.forward_pairs() {
            if base.has(original) {
                aliases.insert(ssa.to_string(), original.to_string());
                hidden.insert(original.to_string());
            }
        }
        MappedWorkspace {
            base,
            aliases,
            hidden,
        }
    }

    pub fn get(&self, name: &str) -> Option<&'a Tensor> {
        if let Some(original) = self.aliases.get(name) {
            return self.base.get(original);
        }
        if self.hidden.contains(name) {
            return None;
        }
        self.base.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .base
            .names()
            .filter(|name| !self.hidden.contains(*name))
            .map(str::to_string)
            .chain(self.aliases.keys().cloned())
            .collect();
        names.sort();
        names
    }

    /// Copies the visible blobs into a fresh workspace that can be mutated
    /// without touching the caller's.
    pub fn isolate(&self) -> Workspace {
        let mut local = Workspace::new();
        for name in self.names() {
            if let Some(tensor) = self.get(&name) {
                local.insert(name, tensor.clone());
            }
        }
        local
    }
}
