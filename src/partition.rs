use std::collections::{HashMap, HashSet};

use crate::error::OffloadError;
use crate::graph::{Graph, Node};
use crate::strategy::OffloadStrategy;
use crate::tensor::Tensor;

/// A maximal run of consecutive supported nodes, with its boundary.
#[derive(Clone, Debug)]
pub struct Partition {
    pub nodes: Vec<Node>,
    pub positions: Vec<usize>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    consumed_outside: HashSet<String>,
}

impl Partition {
    fn from_positions(
        graph: &Graph,
        positions: Vec<usize>,
        consumers: &HashMap<&str, Vec<usize>>,
        external_outputs: &HashSet<&str>,
    ) -> Self {
        let members: HashSet<usize> = positions.iter().copied().collect();

        let mut produced: HashSet<&str> = HashSet::new();
        let mut seen_inputs: HashSet<&str> = HashSet::new();
        let mut inputs = Vec::new();
        for &idx in &positions {
            let node = &graph.nodes[idx];
            for input in &node.inputs {
                if input.is_empty() || produced.contains(input.as_str()) {
                    continue;
                }
                if seen_inputs.insert(input.as_str()) {
                    inputs.push(input.clone());
                }
            }
            for output in &node.outputs {
                produced.insert(output.as_str());
            }
        }

        let mut outputs = Vec::new();
        let mut consumed_outside = HashSet::new();
        let mut seen_outputs: HashSet<&str> = HashSet::new();
        for &idx in &positions {
            for output in &graph.nodes[idx].outputs {
                if output.is_empty() || !seen_outputs.insert(output.as_str()) {
                    continue;
                }
                let outside = consumers
                    .get(output.as_str())
                    .map(|users| users.iter().any(|user| !members.contains(user)))
                    .unwrap_or(false);
                if outside {
                    consumed_outside.insert(output.clone());
                }
                if outside || external_outputs.contains(output.as_str()) {
                    outputs.push(output.clone());
                }
            }
        }

        Partition {
            nodes: positions.iter().map(|&idx| graph.nodes[idx].clone()).collect(),
            positions,
            inputs,
            outputs,
            consumed_outside,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_consumed_outside(&self, name: &str) -> bool {
        self.consumed_outside.contains(name)
    }
}

pub struct CutResult {
    pub graph: Graph,
    pub partitions: usize,
    pub materialized: Vec<(String, Tensor)>,
}

struct Cutter<'g> {
    graph: &'g Graph,
    consumers: HashMap<&'g str, Vec<usize>>,
    external_outputs: HashSet<&'g str>,
    pending: Vec<usize>,
    nodes: Vec<Node>,
    dropped: HashSet<String>,
    materialized: Vec<(String, Tensor)>,
    partitions: usize,
}

impl<'g> Cutter<'g> {
    fn new(graph: &'g Graph) -> Self {
        let mut consumers: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, node) in graph.nodes.iter().enumerate() {
            for input in node.inputs.iter().filter(|i| !i.is_empty()) {
                consumers.entry(input.as_str()).or_default().push(idx);
            }
        }
        Cutter {
            graph,
            consumers,
            external_outputs: graph.external_outputs.iter().map(String::as_str).collect(),
            pending: Vec::new(),
            nodes: Vec::with_capacity(graph.nodes.len()),
            dropped: HashSet::new(),
            materialized: Vec::new(),
            partitions: 0,
        }
    }

    fn flush(&mut self, strategy: &mut dyn OffloadStrategy) -> Result<(), OffloadError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let positions = std::mem::take(&mut self.pending);
        let partition = Partition::from_positions(
            self.graph,
            positions,
            &self.consumers,
            &self.external_outputs,
        );
        log::debug!(
            "partition #{}: {} node(s) at {:?}, inputs {:?}, outputs {:?}",
            self.partitions,
            partition.len(),
            partition.positions,
            partition.inputs,
            partition.outputs
        );
        let packaged = strategy.package(&partition)?;
        self.nodes.push(packaged.node);
        self.dropped.extend(packaged.dropped_outputs);
        self.materialized.extend(packaged.materialized);
        self.partitions += 1;
        Ok(())
    }

    fn finish(self) -> CutResult {
        let graph = Graph {
            name: self.graph.name.clone(),
            nodes: self.nodes,
            external_inputs: self.graph.external_inputs.clone(),
            external_outputs: self
                .graph
                .external_outputs
                .iter()
                .filter(|o| !self.dropped.contains(*o))
                .cloned()
                .collect(),
            device: self.graph.device.clone(),
            args: self.graph.args.clone(),
        };
        CutResult {
            graph,
            partitions: self.partitions,
            materialized: self.materialized,
        }
    }
}

/// Replaces every maximal run of supported nodes with the single node the
/// strategy packages it into. Unsupported nodes are kept unchanged and in
/// place; `graph` itself is not modified.
///
/// Packaging failures abort the cut. Retrying with the offending position
/// blacklisted is left to the caller.
pub fn cut(graph: &Graph, strategy: &mut dyn OffloadStrategy) -> Result<CutResult, OffloadError> {
    let mut cutter = Cutter::new(graph);
    for (idx, node) in graph.nodes.iter().enumerate() {
        if strategy.supports(node).is_supported() {
            cutter.pending.push(idx);
            continue;
        }
        cutter.flush(strategy)?;
        cutter.nodes.push(node.clone());
    }
    cutter.flush(strategy)?;
    log::info!(
        "cut {} partition(s) out of {} node(s)",
        cutter.partitions,
        graph.nodes.len()
    );
    Ok(cutter.finish())
}
