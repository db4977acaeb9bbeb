use std::collections::{HashMap, HashSet};

use crate::graph::{Argument, Graph, Node};
use crate::workspace::Workspace;

/// Argument stamped on every node with its position in the input graph.
pub const NET_POS: &str = "net_pos";

/// Bidirectional record of the renames done by [`ssa_rewrite`].
///
/// `reverse` covers every renamed value. `forward` only covers
/// workspace-resident external inputs, the names callers address by their
/// original spelling (shape hints, input lists, weights).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NameMap {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

impl NameMap {
    pub fn forward(&self, original: &str) -> Option<&str> {
        self.forward.get(original).map(String::as_str)
    }

    pub fn reverse(&self, ssa: &str) -> Option<&str> {
        self.reverse.get(ssa).map(String::as_str)
    }

    pub fn to_ssa<'n>(&'n self, name: &'n str) -> &'n str {
        self.forward(name).unwrap_or(name)
    }

    pub fn to_original<'n>(&'n self, name: &'n str) -> &'n str {
        self.reverse(name).unwrap_or(name)
    }

    pub fn forward_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.forward.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    fn record_input(&mut self, original: &str, ssa: &str) {
        self.forward.insert(original.to_string(), ssa.to_string());
        self.reverse.insert(ssa.to_string(), original.to_string());
    }

    fn record_version(&mut self, original: &str, ssa: &str) {
        self.reverse.insert(ssa.to_string(), original.to_string());
    }
}

pub struct SsaRewrite {
    pub graph: Graph,
    pub names: NameMap,
}

struct VersionNamer {
    used: HashSet<String>,
    versions: HashMap<String, usize>,
}

impl VersionNamer {
    fn new(graph: &Graph) -> Self {
        let mut used: HashSet<String> = HashSet::new();
        used.extend(graph.external_inputs.iter().cloned());
        used.extend(graph.external_outputs.iter().cloned());
        for node in &graph.nodes {
            used.extend(node.inputs.iter().cloned());
            used.extend(node.outputs.iter().cloned());
        }
        VersionNamer {
            used,
            versions: HashMap::new(),
        }
    }

    fn fresh(&mut self, base: &str) -> String {
        loop {
            let version = self.versions.entry(base.to_string()).or_insert(0);
            *version += 1;
            let candidate = format!("{}_{}", base, version);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

/// Rewrites `graph` so that every value has exactly one definition.
///
/// A value defined once keeps its name. For a value defined several times,
/// one definition keeps the original spelling: an unbound external input if
/// there is one, otherwise the last definition when the value is an external
/// output, otherwise the first. Every other definition gets `<name>_<k>`.
/// Nodes are stamped with their position under [`NET_POS`].
pub fn ssa_rewrite(graph: &Graph, workspace: &Workspace) -> SsaRewrite {
    let mut definitions: HashMap<&str, usize> = HashMap::new();
    let mut seen_inputs = HashSet::new();
    for input in &graph.external_inputs {
        if seen_inputs.insert(input.as_str()) {
            *definitions.entry(input.as_str()).or_default() += 1;
        }
    }
    for node in &graph.nodes {
        for output in node.outputs.iter().filter(|o| !o.is_empty()) {
            *definitions.entry(output.as_str()).or_default() += 1;
        }
    }
    let external_outputs: HashSet<&str> =
        graph.external_outputs.iter().map(String::as_str).collect();

    let mut remaining = definitions.clone();
    let mut namer = VersionNamer::new(graph);
    let mut names = NameMap::default();
    let mut current: HashMap<String, String> = HashMap::new();
    let mut claimed: HashSet<String> = HashSet::new();
    let mut rewritten = graph.clone();

    for (slot, input) in graph.external_inputs.iter().enumerate() {
        if let Some(name) = current.get(input) {
            rewritten.external_inputs[slot] = name.clone();
            continue;
        }
        if let Some(left) = remaining.get_mut(input.as_str()) {
            *left -= 1;
        }
        let name = if definitions[input.as_str()] > 1 && workspace.has(input) {
            let ssa = namer.fresh(input);
            names.record_input(input, &ssa);
            ssa
        } else {
            claimed.insert(input.clone());
            input.clone()
        };
        current.insert(input.clone(), name.clone());
        rewritten.external_inputs[slot] = name;
    }

    for node in rewritten.nodes.iter_mut() {
        for input in node.inputs.iter_mut() {
            if let Some(name) = current.get(input.as_str()) {
                *input = name.clone();
            }
        }
        for output in node.outputs.iter_mut() {
            if output.is_empty() {
                continue;
            }
            let original = output.clone();
            let defs = definitions[original.as_str()];
            let left = remaining
                .get_mut(original.as_str())
                .map(|left| {
                    *left -= 1;
                    *left
                })
                .unwrap_or(0);
            let keep = defs == 1
                || (!claimed.contains(&original)
                    && (!external_outputs.contains(original.as_str()) || left == 0));
            let name = if keep {
                claimed.insert(original.clone());
                original.clone()
            } else {
                let ssa = namer.fresh(&original);
                names.record_version(&original, &ssa);
                ssa
            };
            *output = name.clone();
            current.insert(original, name);
        }
    }

    rewritten.external_outputs = graph
        .external_outputs
        .iter()
        .map(|o| current.get(o).cloned().unwrap_or_else(|| o.clone()))
        .collect();

    annotate_positions(&mut rewritten);

    SsaRewrite {
        graph: rewritten,
        names,
    }
}

pub fn annotate_positions(graph: &mut Graph) {
    for (idx, node) in graph.nodes.iter_mut().enumerate() {
        node.set_arg(NET_POS, Argument::Int(idx as i64));
    }
}

/// Position recorded by [`annotate_positions`], or -1 when absent.
pub fn position_of(node: &Node) -> i64 {
    node.int_arg(NET_POS).unwrap_or(-1)
}
