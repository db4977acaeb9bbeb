use std::collections::HashSet;

use onnx_protobuf::{
    attribute_proto, tensor_shape_proto, type_proto, AttributeProto, GraphProto, ModelProto,
    NodeProto, OperatorSetIdProto, TensorProto, TensorShapeProto, TypeProto, ValueInfoProto,
};
use protobuf::MessageField;

use crate::error::OffloadError;
use crate::graph::{Argument, Node};
use crate::schema::SchemaRegistry;
use crate::ssa::NET_POS;
use crate::strategy::split_info_output;
use crate::tensor::{DataType, Tensor, TensorShape};

pub const IR_VERSION: i64 = 3;
pub const OPSET_VERSION: i64 = 7;
pub const PRODUCER_NAME: &str = "netcut";

const DUMMY_PREFIX: &str = "netcut_const";

pub fn new_model() -> ModelProto {
    let mut model = ModelProto::new();
    model.ir_version = IR_VERSION;
    model.producer_name = PRODUCER_NAME.to_string();
    let mut opset = OperatorSetIdProto::new();
    opset.domain = String::new();
    opset.version = OPSET_VERSION;
    model.opset_import.push(opset);
    model.graph = MessageField::some(GraphProto::new());
    model
}

/// Interchange nodes for one native node, plus constants synthesized for
/// them that have no counterpart in the native graph.
#[derive(Debug, Default)]
pub struct ExportedNode {
    pub nodes: Vec<NodeProto>,
    pub constants: Vec<TensorProto>,
}

pub struct OnnxExporter<'a> {
    schemas: &'a SchemaRegistry,
    taken: HashSet<String>,
    next_dummy: usize,
}

impl<'a> OnnxExporter<'a> {
    pub fn new(schemas: &'a SchemaRegistry) -> Self {
        Self::with_reserved(schemas, HashSet::new())
    }

    /// Exporter whose synthesized constants avoid every name in `reserved`.
    pub fn with_reserved(schemas: &'a SchemaRegistry, reserved: HashSet<String>) -> Self {
        OnnxExporter {
            schemas,
            taken: reserved,
            next_dummy: 0,
        }
    }

    fn dummy_name(&mut self) -> String {
        loop {
            let name = format!("{}_{}", DUMMY_PREFIX, self.next_dummy);
            self.next_dummy += 1;
            if self.taken.insert(name.clone()) {
                return name;
            }
        }
    }

    pub fn export_node(&mut self, node: &Node) -> Result<ExportedNode, OffloadError> {
        let op_type = self
            .schemas
            .interchange_op(&node.op_type)
            .ok_or_else(|| OffloadError::NoInterchangeSchema(node.op_type.clone()))?
            .to_string();
        let schema = self.schemas.schema(&node.op_type);

        let mut proto = NodeProto::new();
        proto.name = node.name.clone();
        proto.op_type = op_type.clone();
        proto.input = node.inputs.clone();
        proto.output = node.outputs.clone();
        if split_info_output(node).is_some() {
            proto.output.truncate(1);
        }

        let lowers_reshape = op_type == "Reshape" && node.inputs.len() == 1;
        for (key, value) in &node.args {
            if key == NET_POS || (lowers_reshape && key == "shape") {
                continue;
            }
            let name = schema
                .map(|s| s.attribute_name(key))
                .unwrap_or(key.as_str());
            if let Some(attr) = attribute(name, value) {
                proto.attribute.push(attr);
            }
        }
        if let Some(schema) = schema {
            for (name, value) in &schema.fixed_attributes {
                if proto.attribute.iter().all(|a| &a.name != name) {
                    proto.attribute.push(int_attribute(name, *value));
                }
            }
        }

        let mut exported = ExportedNode::default();
        if lowers_reshape {
            if let Some(shape) = node.arg("shape").and_then(Argument::as_ints) {
                let name = self.dummy_name();
                let tensor = Tensor::from_i64(vec![shape.len() as i64], shape);
                exported.constants.push(tensor_to_proto(&name, &tensor));
                proto.input.push(name);
            }
        }
        exported.nodes.push(proto);
        Ok(exported)
    }
}

fn int_attribute(name: &str, value: i64) -> AttributeProto {
    let mut attr = AttributeProto::new();
    attr.name = name.to_string();
    attr.type_ = attribute_proto::AttributeType::INT.into();
    attr.i = value;
    attr
}

fn attribute(name: &str, value: &Argument) -> Option<AttributeProto> {
    let mut attr = AttributeProto::new();
    attr.name = name.to_string();
    match value {
        Argument::Int(v) => {
            attr.type_ = attribute_proto::AttributeType::INT.into();
            attr.i = *v;
        }
        Argument::Float(v) => {
            attr.type_ = attribute_proto::AttributeType::FLOAT.into();
            attr.f = *v;
        }
        Argument::Str(v) => {
            attr.type_ = attribute_proto::AttributeType::STRING.into();
            attr.s = v.as_bytes().to_vec();
        }
        Argument::Bytes(v) => {
            attr.type_ = attribute_proto::AttributeType::STRING.into();
            attr.s = v.clone();
        }
        Argument::Ints(v) => {
            attr.type_ = attribute_proto::AttributeType::INTS.into();
            attr.ints = v.clone();
        }
        Argument::Floats(v) => {
            attr.type_ = attribute_proto::AttributeType::FLOATS.into();
            attr.floats = v.clone();
        }
        Argument::Strings(v) => {
            attr.type_ = attribute_proto::AttributeType::STRINGS.into();
            attr.strings = v.iter().map(|s| s.as_bytes().to_vec()).collect();
        }
        Argument::Tensor(t) => {
            attr.type_ = attribute_proto::AttributeType::TENSOR.into();
            attr.t = MessageField::some(tensor_to_proto(name, t));
        }
        Argument::Shapes(_) => return None,
    }
    Some(attr)
}

/// `Constant` node producing `output` with the value of `tensor`.
pub fn constant_node(output: &str, tensor: &Tensor) -> NodeProto {
    let mut attr = AttributeProto::new();
    attr.name = "value".to_string();
    attr.type_ = attribute_proto::AttributeType::TENSOR.into();
    attr.t = MessageField::some(tensor_to_proto(output, tensor));

    let mut node = NodeProto::new();
    node.name = format!("{}_constant", output);
    node.op_type = "Constant".to_string();
    node.output.push(output.to_string());
    node.attribute.push(attr);
    node
}

pub fn tensor_to_proto(name: &str, tensor: &Tensor) -> TensorProto {
    let mut proto = TensorProto::new();
    proto.name = name.to_string();
    proto.data_type = tensor.data_type.onnx_code();
    proto.dims = tensor.dims.clone();
    proto.raw_data = tensor.data.clone();
    proto
}

/// Declared type of a synthesized constant.
pub fn constant_shape(proto: &TensorProto) -> TensorShape {
    TensorShape::new(DataType::from_onnx(proto.data_type), proto.dims.clone())
}

/// Materializes a synthesized constant as a workspace tensor. Only FLOAT,
/// INT32 and INT64 payloads can be materialized.
pub fn tensor_from_proto(proto: &TensorProto) -> Result<Tensor, OffloadError> {
    let data_type = DataType::from_onnx(proto.data_type);
    let data = match data_type {
        DataType::Float if proto.raw_data.is_empty() => proto
            .float_data
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect(),
        DataType::Int32 if proto.raw_data.is_empty() => proto
            .int32_data
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect(),
        DataType::Int64 if proto.raw_data.is_empty() => proto
            .int64_data
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect(),
        DataType::Float | DataType::Int32 | DataType::Int64 => proto.raw_data.clone(),
        other => return Err(OffloadError::unsupported_type(proto.name.clone(), other)),
    };
    Ok(Tensor::new(data_type, proto.dims.clone(), data))
}

/// Value info for a graph boundary. A missing shape yields an untyped entry.
pub fn value_info(name: &str, shape: Option<&TensorShape>) -> ValueInfoProto {
    let mut value = ValueInfoProto::new();
    value.name = name.to_string();
    let Some(shape) = shape else {
        log::warn!("Cannot get shape of {}", name);
        return value;
    };

    let mut tensor_type = type_proto::Tensor::new();
    tensor_type.elem_type = shape.data_type.onnx_code();
    let mut dims = TensorShapeProto::new();
    for d in &shape.dims {
        let mut dim = tensor_shape_proto::Dimension::new();
        dim.value = Some(tensor_shape_proto::dimension::Value::DimValue(*d));
        dims.dim.push(dim);
    }
    tensor_type.shape = MessageField::some(dims);

    let mut type_proto = TypeProto::new();
    type_proto.set_tensor_type(tensor_type);
    value.type_ = MessageField::some(type_proto);
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reshape_shape_argument_becomes_constant_input() {
        let schemas = SchemaRegistry::with_defaults();
        let mut exporter = OnnxExporter::new(&schemas);
        let node = Node::new("Reshape", ["x"], ["y"]).with_arg("shape", Argument::Ints(vec![2, -1]));

        let first = exporter.export_node(&node).unwrap();
        let second = exporter.export_node(&node).unwrap();

        assert_eq!(first.nodes[0].input.len(), 2);
        assert!(first.nodes[0].attribute.is_empty());
        assert_eq!(first.constants.len(), 1);
        assert_ne!(first.constants[0].name, second.constants[0].name);
        let tensor = tensor_from_proto(&first.constants[0]).unwrap();
        assert_eq!(tensor.data_type, DataType::Int64);
        assert_eq!(tensor.dims, vec![2]);
    }

    #[test]
    fn constant_names_skip_reserved_ones() {
        let schemas = SchemaRegistry::with_defaults();
        let reserved = ["netcut_const_0".to_string(), "netcut_const_1".to_string()];
        let mut exporter = OnnxExporter::with_reserved(&schemas, reserved.into_iter().collect());
        let node = Node::new("Reshape", ["x"], ["y"]).with_arg("shape", Argument::Ints(vec![-1]));

        let exported = exporter.export_node(&node).unwrap();
        assert_eq!(exported.constants[0].name, "netcut_const_2");
        assert_eq!(exported.nodes[0].input[1], "netcut_const_2");
    }

    #[test]
    fn constant_node_carries_tensor_value() {
        let node = constant_node("split", &Tensor::from_i32(vec![2], &[3, 5]));
        assert_eq!(node.op_type, "Constant");
        assert_eq!(node.output, vec!["split".to_string()]);
        let value = node.attribute[0].t.as_ref().expect("tensor attribute");
        let tensor = tensor_from_proto(value).unwrap();
        assert_eq!(tensor.data_type, DataType::Int32);
        assert_eq!(tensor.data, [3i32, 5].iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<_>>());
    }

    #[test]
    fn schema_attributes_are_renamed_and_fixed() {
        let schemas = SchemaRegistry::with_defaults();
        let mut exporter = OnnxExporter::new(&schemas);
        let expand = Node::new("ExpandDims", ["x"], ["y"]).with_arg("dims", Argument::Ints(vec![0]));
        let fc = Node::new("FC", ["x", "w", "b"], ["y"]);

        let expand = exporter.export_node(&expand).unwrap();
        let fc = exporter.export_node(&fc).unwrap();

        assert_eq!(expand.nodes[0].op_type, "Unsqueeze");
        assert_eq!(expand.nodes[0].attribute[0].name, "axes");
        assert_eq!(fc.nodes[0].op_type, "Gemm");
        assert_eq!(fc.nodes[0].attribute[0].name, "transB");
        assert_eq!(fc.nodes[0].attribute[0].i, 1);
    }

    #[test]
    fn unmapped_operator_is_an_error() {
        let schemas = SchemaRegistry::with_defaults();
        let mut exporter = OnnxExporter::new(&schemas);
        let node = Node::new("LayerNorm", ["x"], ["y"]);
        assert!(matches!(
            exporter.export_node(&node),
            Err(OffloadError::NoInterchangeSchema(_))
        ));
    }

    #[test]
    fn bool_constants_cannot_be_materialized() {
        let mut proto = TensorProto::new();
        proto.name = "mask".to_string();
        proto.data_type = DataType::Bool.onnx_code();
        proto.dims.push(1);
        proto.raw_data.push(1);
        assert!(matches!(
            tensor_from_proto(&proto),
            Err(OffloadError::UnsupportedDataType { .. })
        ));
    }
}
