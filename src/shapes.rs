use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::OffloadError;
use crate::graph::{Argument, Graph, Node};
use crate::ssa::NameMap;
use crate::tensor::{DataType, ShapeInfo, TensorShape};
use crate::workspace::{MappedWorkspace, Workspace};

pub type ShapeMap = HashMap<String, ShapeInfo>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundShapeSpec {
    pub max_batch_size: i64,
    pub max_seq_size: i64,
}

impl Default for BoundShapeSpec {
    fn default() -> Self {
        BoundShapeSpec {
            max_batch_size: 1,
            max_seq_size: 1,
        }
    }
}

/// Bound shape inference. Given the seeded entries, returns shapes for as
/// many of the remaining values as it can; values it cannot resolve are
/// simply left out.
pub trait ShapeInferencer {
    fn infer(
        &self,
        graph: &Graph,
        seeded: &ShapeMap,
        spec: &BoundShapeSpec,
    ) -> Result<ShapeMap, OffloadError>;
}

pub trait GraphRunner {
    fn run_once(&self, graph: &Graph, workspace: &mut Workspace) -> Result<(), OffloadError>;
}

const SHAPE_PRESERVING: &[&str] = &[
    "Relu", "Sigmoid", "Tanh", "Exp", "Log", "Sqrt", "Abs", "Neg", "Identity", "Softmax",
    "Dropout", "LayerNorm", "SpatialBN",
];

const ELEMENTWISE: &[&str] = &["Add", "Sub", "Mul", "Div", "Sum"];

/// Forward inferencer for a small set of operators with fixed shape rules.
/// Outputs of any other operator, or whose inputs are unknown, are left out.
/// Batch-sized (`-1`) leading dims of seeded entries are bound to
/// `max_batch_size`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PropagatingInferencer;

impl ShapeInferencer for PropagatingInferencer {
    fn infer(
        &self,
        graph: &Graph,
        seeded: &ShapeMap,
        spec: &BoundShapeSpec,
    ) -> Result<ShapeMap, OffloadError> {
        let mut known: HashMap<String, TensorShape> = seeded
            .iter()
            .map(|(name, info)| (name.clone(), bind_batch(&info.shape, spec)))
            .collect();
        let mut inferred = ShapeMap::new();
        for node in &graph.nodes {
            let Some(shapes) = output_shapes(node, &known) else {
                log::debug!("no shape rule applies to {}", node.label());
                continue;
            };
            for (output, shape) in node.outputs.iter().zip(shapes) {
                if output.is_empty() || known.contains_key(output) {
                    continue;
                }
                known.insert(output.clone(), shape.clone());
                inferred.insert(output.clone(), ShapeInfo::constant(shape));
            }
        }
        Ok(inferred)
    }
}

fn output_shapes(node: &Node, known: &HashMap<String, TensorShape>) -> Option<Vec<TensorShape>> {
    let inputs = node
        .inputs
        .iter()
        .map(|i| known.get(i).cloned())
        .collect::<Option<Vec<_>>>()?;
    let first = inputs.first()?.clone();
    let op = node.op_type.as_str();

    if SHAPE_PRESERVING.contains(&op) {
        return Some(vec![first]);
    }
    if ELEMENTWISE.contains(&op) {
        return inputs.iter().all(|s| *s == first).then(|| vec![first]);
    }
    match op {
        "FC" => {
            let weight = inputs.get(1)?;
            let rows = *first.dims.first()?;
            let cols = *weight.dims.first()?;
            Some(vec![TensorShape::new(first.data_type, vec![rows, cols])])
        }
        "Concat" => {
            let sizes = concat_sizes(node, &inputs)?;
            let mut dims = first.dims.clone();
            let axis = concat_axis(node, &first)?;
            let total: i64 = sizes.iter().sum();
            if add_axis(node) {
                dims.insert(axis, total);
            } else {
                dims[axis] = total;
            }
            Some(vec![
                TensorShape::new(first.data_type, dims),
                TensorShape::new(DataType::Int32, vec![sizes.len() as i64]),
            ])
        }
        "Reshape" if node.inputs.len() == 1 => {
            let target = node.arg("shape").and_then(Argument::as_ints)?;
            let dims = resolve_reshape(&first.dims, target)?;
            Some(vec![
                TensorShape::new(first.data_type, dims),
                TensorShape::new(DataType::Int64, vec![first.dims.len() as i64]),
            ])
        }
        _ => None,
    }
}

fn add_axis(node: &Node) -> bool {
    node.int_arg("add_axis").unwrap_or(0) != 0
}

fn concat_axis(node: &Node, first: &TensorShape) -> Option<usize> {
    let nhwc = node.arg("order").and_then(Argument::as_str) == Some("NHWC");
    let axis = node.int_arg("axis").unwrap_or(if nhwc { 3 } else { 1 });
    let rank = first.dims.len() as i64 + i64::from(add_axis(node));
    let axis = if axis < 0 { axis + rank } else { axis };
    if (0..rank).contains(&axis) && (add_axis(node) || axis < first.dims.len() as i64) {
        usize::try_from(axis).ok()
    } else {
        None
    }
}

/// Extent each input contributes along the Concat axis, which is also the
/// content of its split-info output.
pub(crate) fn concat_sizes(node: &Node, inputs: &[TensorShape]) -> Option<Vec<i64>> {
    let first = inputs.first()?;
    let axis = concat_axis(node, first)?;
    inputs
        .iter()
        .map(|shape| {
            if shape.dims.len() != first.dims.len() {
                None
            } else if add_axis(node) {
                Some(1)
            } else {
                shape.dims.get(axis).copied()
            }
        })
        .collect()
}

fn resolve_reshape(input: &[i64], target: &[i64]) -> Option<Vec<i64>> {
    let numel: i64 = input.iter().product();
    let mut dims = Vec::with_capacity(target.len());
    let mut infer_at = None;
    for (idx, &d) in target.iter().enumerate() {
        match d {
            0 => dims.push(*input.get(idx)?),
            -1 if infer_at.is_none() => {
                infer_at = Some(idx);
                dims.push(1);
            }
            d if d > 0 => dims.push(d),
            _ => return None,
        }
    }
    let known: i64 = dims.iter().product();
    match infer_at {
        Some(idx) if known > 0 && numel % known == 0 => dims[idx] = numel / known,
        Some(_) => return None,
        None if known != numel => return None,
        None => {}
    }
    Some(dims)
}

fn bind_batch(shape: &TensorShape, spec: &BoundShapeSpec) -> TensorShape {
    let mut bound = shape.clone();
    if let Some(first) = bound.dims.first_mut() {
        if *first < 0 {
            *first = spec.max_batch_size;
        }
    }
    bound
}

pub enum ShapeSource<'a> {
    Infer {
        inferencer: &'a dyn ShapeInferencer,
        spec: &'a BoundShapeSpec,
    },
    Execute(&'a dyn GraphRunner),
}

/// Builds the per-pass shape catalog.
///
/// With [`ShapeSource::Infer`] the map is seeded from the workspace, then the
/// caller's hints, then inference results; an existing entry is never
/// replaced. With [`ShapeSource::Execute`] the graph is run once in an isolated
/// copy of the workspace and concrete shapes are read back. All entries are
/// marked constant. Names without a shape are absent.
pub fn build_shape_map(
    workspace: &MappedWorkspace<'_>,
    graph: &Graph,
    hints: &HashMap<String, TensorShape>,
    source: ShapeSource<'_>,
) -> Result<ShapeMap, OffloadError> {
    let mut shapes = ShapeMap::new();
    match source {
        ShapeSource::Infer { inferencer, spec } => {
            for name in workspace.names() {
                if let Some(tensor) = workspace.get(&name) {
                    let shape = tensor.shape();
                    if !shape.is_unknown() {
                        shapes.insert(name, ShapeInfo::constant(shape));
                    }
                }
            }
            for (name, shape) in hints {
                shapes
                    .entry(name.clone())
                    .or_insert_with(|| ShapeInfo::constant(shape.clone()));
            }
            let inferred = inferencer.infer(graph, &shapes, spec)?;
            for (name, info) in inferred {
                shapes
                    .entry(name)
                    .or_insert_with(|| ShapeInfo::constant(info.shape));
            }
        }
        ShapeSource::Execute(runner) => {
            let mut local = workspace.isolate();
            runner.run_once(graph, &mut local)?;
            for name in local.names() {
                if let Some(tensor) = local.get(name) {
                    let shape = tensor.shape();
                    if !shape.is_unknown() {
                        shapes.insert(name.to_string(), ShapeInfo::constant(shape));
                    }
                }
            }
        }
    }
    log::debug!("shape catalog resolved {} value(s)", shapes.len());
    Ok(shapes)
}

pub fn remap_hints(
    hints: &HashMap<String, TensorShape>,
    names: &NameMap,
) -> HashMap<String, TensorShape> {
    hints
        .iter()
        .map(|(name, shape)| (names.to_ssa(name).to_string(), shape.clone()))
        .collect()
}

/// Weights are workspace blobs that are not caller-declared inputs and are
/// not written by any node of the graph.
pub fn classify_weights(
    workspace: &MappedWorkspace<'_>,
    graph: &Graph,
    external_inputs: &[String],
    names: &NameMap,
) -> HashSet<String> {
    let inputs: HashSet<&str> = external_inputs.iter().map(|i| names.to_ssa(i)).collect();
    let produced = graph.produced_names();
    workspace
        .names()
        .into_iter()
        .filter(|name| !inputs.contains(name.as_str()) && !produced.contains(name.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float(dims: &[i64]) -> ShapeInfo {
        ShapeInfo::constant(TensorShape::new(DataType::Float, dims.to_vec()))
    }

    fn infer(graph: &Graph, seeded: &[(&str, Vec<i64>)]) -> ShapeMap {
        let seeded = seeded
            .iter()
            .map(|(name, dims)| (name.to_string(), float(dims)))
            .collect();
        PropagatingInferencer
            .infer(graph, &seeded, &BoundShapeSpec::default())
            .expect("inference")
    }

    #[test]
    fn fc_output_takes_weight_rows() {
        let mut graph = Graph::new("fc");
        graph.push(Node::new("FC", ["x", "w", "b"], ["y"]));
        let shapes = infer(&graph, &[("x", vec![-1, 4]), ("w", vec![8, 4]), ("b", vec![8])]);
        assert_eq!(shapes["y"].shape.dims, vec![1, 8]);
    }

    #[test]
    fn concat_reports_split_sizes() {
        let mut graph = Graph::new("concat");
        graph.push(Node::new("Concat", ["a", "b"], ["y", "split"]));
        let shapes = infer(&graph, &[("a", vec![2, 3]), ("b", vec![2, 5])]);
        assert_eq!(shapes["y"].shape.dims, vec![2, 8]);
        assert_eq!(shapes["split"].shape, TensorShape::new(DataType::Int32, vec![2]));
    }

    #[test]
    fn reshape_fills_wildcard_dim() {
        let mut graph = Graph::new("reshape");
        graph.push(
            Node::new("Reshape", ["x"], ["y", "old"])
                .with_arg("shape", Argument::Ints(vec![0, -1])),
        );
        let shapes = infer(&graph, &[("x", vec![2, 3, 4])]);
        assert_eq!(shapes["y"].shape.dims, vec![2, 12]);
    }

    #[test]
    fn unknown_ops_and_mismatched_operands_stay_absent() {
        let mut graph = Graph::new("mixed");
        graph.push(Node::new("Foo", ["x"], ["a"]));
        graph.push(Node::new("Relu", ["a"], ["b"]));
        graph.push(Node::new("Add", ["x", "y"], ["c"]));
        let shapes = infer(&graph, &[("x", vec![2, 3]), ("y", vec![3])]);
        assert!(shapes.is_empty());
    }
}
