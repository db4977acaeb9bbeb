use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::backend::{BackendHandles, BackendStatus};
use crate::error::OffloadError;
use crate::fingerprint::Fingerprint;
use crate::graph::{Argument, Node};
use crate::partition::Partition;
use crate::shapes::ShapeMap;
use crate::ssa::{position_of, NameMap};
use crate::tensor::{Tensor, TensorShape};

/// Node type of the emitted "run on backend" node.
pub const OFFLOAD_OP_TYPE: &str = "Offload";

pub const ARG_MODEL: &str = "model";
pub const ARG_INITIALIZERS: &str = "initializers";
pub const ARG_INPUT_NAMES: &str = "input_names";
pub const ARG_OUTPUT_NAMES: &str = "output_names";
pub const ARG_OUTPUT_SHAPE_HINT: &str = "output_shape_hint";
pub const ARG_USE_ONNX: &str = "use_onnx";
pub const ARG_BACKEND_ID: &str = "backend_id";
pub const ARG_MODEL_ID: &str = "model_id";
pub const ARG_SEQ_ID: &str = "seq_id";

pub const INPUT_SHAPE_INFO: &str = "input_shape_info";
pub const OUTPUT_SHAPE_INFO: &str = "output_shape_info";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Support {
    Supported,
    Unsupported,
}

impl Support {
    pub fn is_supported(self) -> bool {
        self == Support::Supported
    }
}

#[derive(Debug)]
pub struct PackagedPartition {
    pub node: Node,
    pub dropped_outputs: Vec<String>,
    pub materialized: Vec<(String, Tensor)>,
}

/// The capability a backend mode provides to the cutter: a per-node verdict
/// and the packaging of a finished partition into one replacement node.
pub trait OffloadStrategy {
    fn supports(&mut self, node: &Node) -> Support;

    fn package(&mut self, partition: &Partition) -> Result<PackagedPartition, OffloadError>;
}

pub struct PassContext<'a> {
    pub shapes: &'a ShapeMap,
    pub weights: &'a HashSet<String>,
    pub blacklist: &'a HashSet<i64>,
    pub names: &'a NameMap,
    pub backends: &'a BackendHandles,
    pub backend_index: usize,
    pub use_onnx: bool,
    pub model_id: &'a str,
    pub debug_dir: Option<&'a Path>,
    /// Names a synthesized constant must not take.
    pub reserved_names: &'a HashSet<String>,
}

impl PassContext<'_> {
    pub fn is_blacklisted(&self, node: &Node) -> bool {
        self.blacklist.contains(&position_of(node))
    }

    pub fn shape(&self, name: &str) -> Option<&TensorShape> {
        self.shapes.get(name).map(|info| &info.shape)
    }
}

/// The secondary "split info" output of a two-output Concat.
pub fn split_info_output(node: &Node) -> Option<&str> {
    if node.op_type == "Concat" && node.outputs.len() == 2 {
        Some(node.outputs[1].as_str())
    } else {
        None
    }
}

/// Splits the partition's boundary outputs into the ones the sub-model
/// exposes and the Concat split-info outputs nobody outside reads.
pub fn exposed_outputs(partition: &Partition) -> (Vec<String>, Vec<String>) {
    let split_infos: HashSet<&str> = partition.nodes.iter().filter_map(split_info_output).collect();
    let mut kept = Vec::new();
    let mut dropped = Vec::new();
    for output in &partition.outputs {
        if split_infos.contains(output.as_str()) && !partition.is_consumed_outside(output) {
            dropped.push(output.clone());
        } else {
            kept.push(output.clone());
        }
    }
    (kept, dropped)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct WeightResolution {
    pub initializers: Vec<String>,
    pub inputs: Vec<String>,
}

/// Decides which of the partition's inputs are weights. `extra_weights` are
/// constants synthesized during export and are always initializers.
pub fn resolve_weights(
    partition: &Partition,
    weights: &HashSet<String>,
    extra_weights: &[String],
) -> WeightResolution {
    let mut resolution = WeightResolution::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for extra in extra_weights {
        if seen.insert(extra.as_str()) {
            resolution.inputs.push(extra.clone());
        }
        if !resolution.initializers.contains(extra) {
            resolution.initializers.push(extra.clone());
        }
    }

    let boundary: HashSet<&str> = partition.inputs.iter().map(String::as_str).collect();
    for node in &partition.nodes {
        for input in &node.inputs {
            if input.is_empty() || !seen.insert(input.as_str()) {
                continue;
            }
            if weights.contains(input) {
                log::debug!("Add weights: {}", input);
                resolution.inputs.push(input.clone());
                resolution.initializers.push(input.clone());
            } else if boundary.contains(input.as_str()) {
                log::debug!("Adding boundary input: {}", input);
                resolution.inputs.push(input.clone());
            }
        }
    }
    resolution
}

pub fn output_hints(
    outputs: &[String],
    shape_of: impl Fn(&str) -> Option<TensorShape>,
) -> Result<Vec<TensorShape>, OffloadError> {
    outputs
        .iter()
        .map(|o| shape_of(o).ok_or_else(|| OffloadError::missing_shape(o.clone())))
        .collect()
}

pub struct ReplacementBuilder {
    model_id: String,
    backend_index: usize,
    use_onnx: bool,
    next_seq: usize,
}

pub struct Replacement<'p> {
    pub payload: Vec<u8>,
    pub partition: &'p Partition,
    pub outputs: &'p [String],
    pub output_hints: &'p [TensorShape],
    pub resolution: &'p WeightResolution,
    pub extra_weights: &'p [String],
}

impl ReplacementBuilder {
    pub fn new(cx: &PassContext<'_>) -> Self {
        ReplacementBuilder {
            model_id: cx.model_id.to_string(),
            backend_index: cx.backend_index,
            use_onnx: cx.use_onnx,
            next_seq: 0,
        }
    }

    pub fn peek_seq(&self) -> usize {
        self.next_seq
    }

    pub fn build(&mut self, replacement: Replacement<'_>, names: &NameMap) -> Node {
        let seq = self.next_seq;
        self.next_seq += 1;

        let initializer_set: HashSet<&str> = replacement
            .resolution
            .initializers
            .iter()
            .map(String::as_str)
            .collect();
        let extra: HashSet<&str> = replacement.extra_weights.iter().map(String::as_str).collect();

        let mut node = Node::new(OFFLOAD_OP_TYPE, Vec::<String>::new(), Vec::<String>::new())
            .with_name(format!("{}_offload_{}", self.model_id, seq));

        let mut pairs = Vec::with_capacity(initializer_set.len() * 2);
        for name in &replacement.resolution.initializers {
            pairs.push(name.clone());
            pairs.push(names.to_original(name).to_string());
        }

        let mut input_names = Vec::new();
        for input in &replacement.partition.inputs {
            if !initializer_set.contains(input.as_str()) {
                node.inputs.push(input.clone());
                input_names.push(input.clone());
            }
        }
        for weight in &replacement.resolution.initializers {
            if !extra.contains(weight.as_str()) {
                node.inputs.push(weight.clone());
            }
        }

        node.outputs = replacement.outputs.to_vec();

        node.set_arg(ARG_MODEL, Argument::Bytes(replacement.payload));
        node.set_arg(ARG_INITIALIZERS, Argument::Strings(pairs));
        node.set_arg(ARG_INPUT_NAMES, Argument::Strings(input_names));
        node.set_arg(ARG_OUTPUT_NAMES, Argument::Strings(replacement.outputs.to_vec()));
        for (idx, hint) in replacement.output_hints.iter().enumerate() {
            let mut ints = Vec::with_capacity(hint.dims.len() + 1);
            ints.push(hint.data_type.backend_code());
            ints.extend_from_slice(&hint.dims);
            node.set_arg(format!("{}_{}", ARG_OUTPUT_SHAPE_HINT, idx), Argument::Ints(ints));
        }
        node.set_arg(ARG_USE_ONNX, Argument::Int(i64::from(self.use_onnx)));
        node.set_arg(ARG_BACKEND_ID, Argument::Int(self.backend_index as i64));
        node.set_arg(ARG_MODEL_ID, Argument::Str(self.model_id.clone()));
        node.set_arg(ARG_SEQ_ID, Argument::Int(seq as i64));
        node
    }
}

#[derive(Default)]
pub struct ProbeCache {
    verdicts: HashMap<Fingerprint, BackendStatus>,
}

impl ProbeCache {
    pub fn check(&mut self, backends: &BackendHandles, index: usize, model: &[u8]) -> BackendStatus {
        let key = Fingerprint::probe(index, model);
        if let Some(status) = self.verdicts.get(&key) {
            log::debug!("probe {} answered from cache", key);
            return *status;
        }
        let status = backends.check(index, model);
        self.verdicts.insert(key, status);
        status
    }
}

/// Writes a packaged sub-model's text form when a debug directory is set.
pub fn dump_debug(dir: Option<&Path>, file_name: &str, text: impl FnOnce() -> String) {
    let Some(dir) = dir else {
        return;
    };
    let path = dir.join(file_name);
    if let Err(err) = fs::write(&path, text()) {
        log::warn!("failed to write debug dump {}: {}", path.display(), err);
    }
}
