use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use onnx_extractor::{AttributeValue, OnnxModel, OnnxTensor, TensorData};

use crate::error::OffloadError;
use crate::graph::{Argument, Graph, Node};
use crate::tensor::{DataType, Tensor, TensorShape};
use crate::workspace::Workspace;

/// A model loaded into the native representation: the graph, its
/// initializers as workspace tensors, and the declared input shapes.
pub struct ImportedModel {
    pub graph: Graph,
    pub workspace: Workspace,
    /// Caller-fed inputs, i.e. external inputs that are not initializers.
    pub inputs: Vec<String>,
    pub shape_hints: HashMap<String, TensorShape>,
}

pub fn import_onnx_file<P: AsRef<Path>>(path: P) -> Result<ImportedModel, OffloadError> {
    let bytes = fs::read(path)?;
    import_onnx_bytes(bytes)
}

pub fn import_onnx_bytes(bytes: Vec<u8>) -> Result<ImportedModel, OffloadError> {
    let model = OnnxModel::load_from_bytes(bytes)?;

    let mut workspace = Workspace::new();
    let mut initializer_names = HashSet::new();
    for tensor in model.get_weight_tensors() {
        let name = tensor.name().to_string();
        let Some(tensor) = model.tensors.get(&name).filter(|_| !name.is_empty()) else {
            continue;
        };
        workspace.insert(name.clone(), convert_tensor(&name, tensor)?);
        initializer_names.insert(name);
    }

    let mut graph = Graph::new("main");
    let mut inputs = Vec::new();
    let mut shape_hints = HashMap::new();
    for input in &model.inputs {
        if input.is_empty() || graph.external_inputs.contains(input) {
            continue;
        }
        graph.external_inputs.push(input.clone());
        if initializer_names.contains(input) {
            continue;
        }
        inputs.push(input.clone());
        if let Some(tensor) = model.tensors.get(input) {
            let shape = declared_shape(tensor);
            if !shape.is_unknown() {
                shape_hints.insert(input.clone(), shape);
            }
        }
    }
    // Older exporters do not list initializers among the graph inputs.
    let mut missing: Vec<&String> = initializer_names
        .iter()
        .filter(|name| !graph.external_inputs.contains(*name))
        .collect();
    missing.sort();
    graph
        .external_inputs
        .extend(missing.into_iter().cloned());

    for op in &model.operations {
        let mut args = BTreeMap::new();
        for (name, value) in &op.attributes {
            args.insert(name.clone(), convert_attribute(name, value)?);
        }
        // Optional slots left empty are dropped.
        graph.push(Node {
            name: op.name.clone(),
            op_type: op.op_type.clone(),
            inputs: op.inputs.iter().filter(|i| !i.is_empty()).cloned().collect(),
            outputs: op.outputs.iter().filter(|o| !o.is_empty()).cloned().collect(),
            args,
        });
    }
    graph.external_outputs = model
        .outputs
        .iter()
        .filter(|o| !o.is_empty())
        .cloned()
        .collect();

    log::debug!(
        "imported {} node(s), {} initializer(s), {} input(s)",
        graph.nodes.len(),
        workspace.len(),
        inputs.len()
    );

    Ok(ImportedModel {
        graph,
        workspace,
        inputs,
        shape_hints,
    })
}

fn declared_shape(tensor: &OnnxTensor) -> TensorShape {
    TensorShape::new(
        DataType::from_onnx(tensor.data_type() as i32),
        tensor.shape().to_vec(),
    )
}

fn convert_tensor(name: &str, tensor: &OnnxTensor) -> Result<Tensor, OffloadError> {
    let shape = declared_shape(tensor);
    let data = match tensor.data()? {
        TensorData::Raw(bytes) => bytes.as_ref().to_vec(),
        TensorData::Numeric(cow) => cow.as_ref().to_vec(),
        TensorData::Strings(_) => {
            return Err(OffloadError::unsupported_type(name, DataType::String));
        }
    };
    Ok(Tensor::new(shape.data_type, shape.dims, data))
}

fn convert_attribute(name: &str, value: &AttributeValue) -> Result<Argument, OffloadError> {
    Ok(match value {
        AttributeValue::Int(v) => Argument::Int(*v),
        AttributeValue::Float(v) => Argument::Float(*v),
        AttributeValue::String(v) => Argument::Str(v.clone()),
        AttributeValue::Tensor(t) => Argument::Tensor(convert_tensor(name, t.as_ref())?),
        AttributeValue::Ints(values) => Argument::Ints(values.clone()),
        AttributeValue::Floats(values) => Argument::Floats(values.clone()),
        AttributeValue::Strings(values) => Argument::Strings(values.clone()),
    })
}
