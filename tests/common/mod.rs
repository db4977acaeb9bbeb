#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use netcut::{
    Argument, BackendId, BackendLibrary, BackendStatus, BoundShapeSpec, DataType, Graph,
    GraphRunner, InfoKey, Node, OffloadError, OffloadStrategy, OffloadTransformer,
    PackagedPartition, Partition, ShapeInferencer, ShapeMap, Support, TensorShape,
    TransformOptions, Workspace, ARG_MODEL,
};
use onnx_protobuf::ModelProto;
use protobuf::Message;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadFormat {
    Native,
    Onnx,
}

/// Backend library that accepts a probe when every op in it is listed as
/// supported, and records every call.
pub struct MockBackend {
    format: PayloadFormat,
    supported: HashSet<String>,
    devices: Vec<String>,
    enumeration_failure: Option<BackendStatus>,
    probes: Mutex<Vec<(BackendId, Vec<String>)>>,
    released: Mutex<Vec<BackendId>>,
}

const FIRST_ID: u64 = 100;

impl MockBackend {
    pub fn new(format: PayloadFormat, supported: &[&str]) -> Self {
        MockBackend {
            format,
            supported: supported.iter().map(|s| s.to_string()).collect(),
            devices: vec!["mock cpu".to_string()],
            enumeration_failure: None,
            probes: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
        }
    }

    pub fn with_devices(mut self, devices: &[&str]) -> Self {
        self.devices = devices.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn failing(status: BackendStatus) -> Self {
        let mut backend = MockBackend::new(PayloadFormat::Native, &[]);
        backend.enumeration_failure = Some(status);
        backend
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Op types of every probe, in call order.
    pub fn probes(&self) -> Vec<Vec<String>> {
        let probes = self.probes.lock().expect("probe log");
        probes.iter().map(|(_, ops)| ops.clone()).collect()
    }

    pub fn probed_ids(&self) -> Vec<BackendId> {
        let probes = self.probes.lock().expect("probe log");
        probes.iter().map(|(id, _)| *id).collect()
    }

    pub fn released(&self) -> Vec<BackendId> {
        self.released.lock().expect("release log").clone()
    }

    fn op_types(&self, model: &[u8]) -> Option<Vec<String>> {
        match self.format {
            PayloadFormat::Native => {
                let graph = Graph::from_bytes(model).ok()?;
                Some(graph.nodes.iter().map(|n| n.op_type.clone()).collect())
            }
            PayloadFormat::Onnx => {
                let model = ModelProto::parse_from_bytes(model).ok()?;
                Some(model.graph.node.iter().map(|n| n.op_type.clone()).collect())
            }
        }
    }
}

impl BackendLibrary for MockBackend {
    fn backend_ids(&self) -> Result<Vec<BackendId>, BackendStatus> {
        if let Some(status) = self.enumeration_failure {
            return Err(status);
        }
        Ok((0..self.devices.len())
            .map(|idx| BackendId(FIRST_ID + idx as u64))
            .collect())
    }

    fn backend_info(&self, id: BackendId, key: InfoKey) -> Result<String, BackendStatus> {
        let device = self
            .devices
            .get((id.0 - FIRST_ID) as usize)
            .ok_or(BackendStatus::BackendUnavailable)?;
        Ok(match key {
            InfoKey::Device => device.clone(),
            InfoKey::Name => "mock".to_string(),
            InfoKey::Vendor => "netcut tests".to_string(),
            InfoKey::Version => "1.0".to_string(),
        })
    }

    fn check_compatibility(&self, id: BackendId, model: &[u8]) -> BackendStatus {
        let Some(ops) = self.op_types(model) else {
            return BackendStatus::InvalidModel;
        };
        let supported = !ops.is_empty() && ops.iter().all(|op| self.supported.contains(op));
        self.probes.lock().expect("probe log").push((id, ops));
        if supported {
            BackendStatus::Success
        } else {
            BackendStatus::UnsupportedOperator
        }
    }

    fn release_backend_id(&self, id: BackendId) -> BackendStatus {
        self.released.lock().expect("release log").push(id);
        BackendStatus::Success
    }
}

pub fn engine(backend: &Arc<MockBackend>, options: TransformOptions) -> OffloadTransformer {
    let library: Arc<dyn BackendLibrary> = backend.clone();
    OffloadTransformer::new(library, options).expect("acquire backends")
}

pub fn float(dims: &[i64]) -> TensorShape {
    TensorShape::new(DataType::Float, dims.to_vec())
}

pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// `x -> ops[0] -> v0 -> ops[1] -> v1 ...`, the last value being the only
/// external output.
pub fn chain(ops: &[&str]) -> Graph {
    let mut graph = Graph::new("chain");
    graph.external_inputs.push("x".to_string());
    let mut prev = "x".to_string();
    for (idx, op) in ops.iter().enumerate() {
        let out = format!("v{}", idx);
        graph.push(Node::new(*op, [prev.clone()], [out.clone()]).with_name(format!("n{}", idx)));
        prev = out;
    }
    graph.external_outputs.push(prev);
    graph
}

pub fn hints(entries: &[(&str, TensorShape)]) -> HashMap<String, TensorShape> {
    entries
        .iter()
        .map(|(name, shape)| (name.to_string(), shape.clone()))
        .collect()
}

pub fn native_payload(node: &Node) -> Graph {
    let bytes = node
        .arg(ARG_MODEL)
        .and_then(Argument::as_bytes)
        .expect("model payload");
    Graph::from_bytes(bytes).expect("decode native payload")
}

pub fn onnx_payload(node: &Node) -> ModelProto {
    let bytes = node
        .arg(ARG_MODEL)
        .and_then(Argument::as_bytes)
        .expect("model payload");
    ModelProto::parse_from_bytes(bytes).expect("decode onnx payload")
}

/// Inferencer that knows nothing beyond what was seeded.
pub struct SilentInferencer;

impl ShapeInferencer for SilentInferencer {
    fn infer(
        &self,
        _graph: &Graph,
        _seeded: &ShapeMap,
        _spec: &BoundShapeSpec,
    ) -> Result<ShapeMap, OffloadError> {
        Ok(ShapeMap::new())
    }
}

/// Runner that gives every output a copy of the node's first input.
pub struct CopyRunner;

impl GraphRunner for CopyRunner {
    fn run_once(&self, graph: &Graph, workspace: &mut Workspace) -> Result<(), OffloadError> {
        for node in &graph.nodes {
            let first = node.inputs.first().cloned().unwrap_or_default();
            let tensor = workspace
                .get(&first)
                .cloned()
                .ok_or_else(|| OffloadError::Execution(format!("`{}` was never fed", first)))?;
            for output in &node.outputs {
                workspace.insert(output.clone(), tensor.clone());
            }
        }
        Ok(())
    }
}

/// Strategy that accepts nodes by op type and packages each partition into a
/// `Fused` node wired to the partition's boundary.
pub struct StubStrategy {
    supported: HashSet<String>,
    fail_packaging: bool,
    pub packaged: Vec<Partition>,
}

impl StubStrategy {
    pub fn new(supported: &[&str]) -> Self {
        StubStrategy {
            supported: supported.iter().map(|s| s.to_string()).collect(),
            fail_packaging: false,
            packaged: Vec::new(),
        }
    }

    pub fn failing(supported: &[&str]) -> Self {
        let mut strategy = StubStrategy::new(supported);
        strategy.fail_packaging = true;
        strategy
    }
}

impl OffloadStrategy for StubStrategy {
    fn supports(&mut self, node: &Node) -> Support {
        if self.supported.contains(&node.op_type) {
            Support::Supported
        } else {
            Support::Unsupported
        }
    }

    fn package(&mut self, partition: &Partition) -> Result<PackagedPartition, OffloadError> {
        if self.fail_packaging {
            return Err(OffloadError::MissingShape(partition.outputs[0].clone()));
        }
        let node = Node::new("Fused", partition.inputs.clone(), partition.outputs.clone())
            .with_name(format!("fused_{}", self.packaged.len()));
        self.packaged.push(partition.clone());
        Ok(PackagedPartition {
            node,
            dropped_outputs: Vec::new(),
            materialized: Vec::new(),
        })
    }
}
