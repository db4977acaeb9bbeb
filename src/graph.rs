use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::OffloadError;
use crate::tensor::{Tensor, TensorShape};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedShape {
    pub name: String,
    pub shape: TensorShape,
}

impl NamedShape {
    pub fn new(name: impl Into<String>, shape: TensorShape) -> Self {
        NamedShape {
            name: name.into(),
            shape,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Argument {
    Int(i64),
    Float(f32),
    Str(String),
    Bytes(Vec<u8>),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Strings(Vec<String>),
    Tensor(Tensor),
    Shapes(Vec<NamedShape>),
}

impl Argument {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Argument::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Argument::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            Argument::Ints(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            Argument::Strings(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Argument::Bytes(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub op_type: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub args: BTreeMap<String, Argument>,
}

impl Node {
    pub fn new<I, O>(op_type: impl Into<String>, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Node {
            name: String::new(),
            op_type: op_type.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
            args: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: Argument) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub fn set_arg(&mut self, key: impl Into<String>, value: Argument) {
        self.args.insert(key.into(), value);
    }

    pub fn arg(&self, key: &str) -> Option<&Argument> {
        self.args.get(key)
    }

    pub fn int_arg(&self, key: &str) -> Option<i64> {
        self.arg(key).and_then(Argument::as_int)
    }

    /// Display label used in log lines.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.op_type
        } else {
            &self.name
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOption {
    pub device_type: String,
    pub device_id: i32,
}

/// An ordered operator list. Node order is a topological order of the
/// dataflow: every input is either an external input or the output of an
/// earlier node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub name: String,
    pub nodes: Vec<Node>,
    pub external_inputs: Vec<String>,
    pub external_outputs: Vec<String>,
    pub device: DeviceOption,
    pub args: BTreeMap<String, Argument>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Graph {
            name: name.into(),
            ..Graph::default()
        }
    }

    pub fn push(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn arg(&self, key: &str) -> Option<&Argument> {
        self.args.get(key)
    }

    /// Checks the topological-order invariant and that every external output
    /// is bound.
    pub fn validate(&self) -> Result<(), OffloadError> {
        let mut available: HashSet<&str> =
            self.external_inputs.iter().map(String::as_str).collect();
        for (idx, node) in self.nodes.iter().enumerate() {
            for input in &node.inputs {
                if input.is_empty() {
                    continue;
                }
                if !available.contains(input.as_str()) {
                    return Err(OffloadError::malformed(format!(
                        "input `{}` of node #{} ({}) is neither an external input nor produced earlier",
                        input,
                        idx,
                        node.label()
                    )));
                }
            }
            for output in &node.outputs {
                available.insert(output.as_str());
            }
        }
        for output in &self.external_outputs {
            if !available.contains(output.as_str()) {
                return Err(OffloadError::malformed(format!(
                    "external output `{}` is never produced",
                    output
                )));
            }
        }
        Ok(())
    }

    pub fn produced_names(&self) -> HashSet<&str> {
        self.nodes
            .iter()
            .flat_map(|node| node.outputs.iter())
            .map(String::as_str)
            .collect()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, OffloadError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, OffloadError> {
        Ok(bincode::deserialize(bytes)?)
    }
}
