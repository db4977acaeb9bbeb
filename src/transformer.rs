use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{BackendHandles, BackendLibrary};
use crate::error::OffloadError;
use crate::graph::Graph;
use crate::interchange::InterchangeStrategy;
use crate::native::NativeStrategy;
use crate::partition::cut;
use crate::schema::SchemaRegistry;
use crate::shapes::{
    build_shape_map, classify_weights, remap_hints, BoundShapeSpec, GraphRunner,
    PropagatingInferencer, ShapeInferencer, ShapeMap, ShapeSource,
};
use crate::ssa::{ssa_rewrite, NameMap, NET_POS};
use crate::strategy::{PassContext, ARG_MODEL_ID};
use crate::tensor::TensorShape;
use crate::workspace::{MappedWorkspace, Workspace};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformOptions {
    pub use_onnx: bool,
    pub infer_shapes: bool,
    pub bound_shape_spec: BoundShapeSpec,
    pub native_device_marker: String,
    pub debug_dir: Option<PathBuf>,
}

impl Default for TransformOptions {
    fn default() -> Self {
        TransformOptions {
            use_onnx: true,
            infer_shapes: true,
            bound_shape_spec: BoundShapeSpec::default(),
            native_device_marker: "native".to_string(),
            debug_dir: None,
        }
    }
}

impl TransformOptions {
    pub fn with_use_onnx(mut self, use_onnx: bool) -> Self {
        self.use_onnx = use_onnx;
        self
    }

    pub fn with_infer_shapes(mut self, infer_shapes: bool) -> Self {
        self.infer_shapes = infer_shapes;
        self
    }

    pub fn with_bound_shape_spec(mut self, spec: BoundShapeSpec) -> Self {
        self.bound_shape_spec = spec;
        self
    }

    pub fn with_native_device_marker(mut self, marker: impl Into<String>) -> Self {
        self.native_device_marker = marker.into();
        self
    }

    pub fn with_debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = Some(dir.into());
        self
    }
}

/// Summary of one successful pass.
#[derive(Clone, Debug)]
pub struct TransformReport {
    pub model_id: String,
    pub partitions: usize,
    pub backend_index: usize,
    pub names: NameMap,
}

/// Rewrites graphs so that maximal runs of backend-supported nodes execute as
/// single offloaded nodes.
///
/// Backend ids are acquired on construction and released when the
/// transformer is dropped. A transformer runs one pass at a time.
pub struct OffloadTransformer {
    options: TransformOptions,
    backends: BackendHandles,
    schemas: SchemaRegistry,
    inferencer: Box<dyn ShapeInferencer>,
    runner: Option<Box<dyn GraphRunner>>,
    backend_index: usize,
    unnamed_models: usize,
}

impl OffloadTransformer {
    pub fn new(
        library: Arc<dyn BackendLibrary>,
        options: TransformOptions,
    ) -> Result<Self, OffloadError> {
        let backends = BackendHandles::acquire(library)?;
        Ok(OffloadTransformer {
            options,
            backends,
            schemas: SchemaRegistry::with_defaults(),
            inferencer: Box::new(PropagatingInferencer),
            runner: None,
            backend_index: 0,
            unnamed_models: 0,
        })
    }

    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn with_inferencer(mut self, inferencer: impl ShapeInferencer + 'static) -> Self {
        self.inferencer = Box::new(inferencer);
        self
    }

    pub fn with_runner(mut self, runner: impl GraphRunner + 'static) -> Self {
        self.runner = Some(Box::new(runner));
        self
    }

    pub fn options(&self) -> &TransformOptions {
        &self.options
    }

    pub fn backends(&self) -> &BackendHandles {
        &self.backends
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn backend_index(&self) -> usize {
        self.backend_index
    }

    /// Cuts `graph` into offloaded partitions in place.
    ///
    /// `external_inputs` are the values fed by the caller at run time and
    /// `shape_hints` their shapes, both under their original names.
    /// `blacklist` holds node positions (as annotated by the renamer) that
    /// must stay on the host.
    ///
    /// On error neither `graph` nor `workspace` is modified.
    pub fn transform(
        &mut self,
        workspace: &mut Workspace,
        graph: &mut Graph,
        external_inputs: &[String],
        shape_hints: &HashMap<String, TensorShape>,
        blacklist: &HashSet<i64>,
    ) -> Result<TransformReport, OffloadError> {
        graph.validate()?;
        let model_id = self.model_id(graph);

        let rewrite = ssa_rewrite(graph, workspace);
        let names = rewrite.names;
        let ssa_graph = rewrite.graph;
        log::debug!("{}: {} value(s) renamed", model_id, names.len());

        let hints = remap_hints(shape_hints, &names);
        let mapped = MappedWorkspace::new(workspace, &names);
        let source = if self.options.infer_shapes {
            ShapeSource::Infer {
                inferencer: self.inferencer.as_ref(),
                spec: &self.options.bound_shape_spec,
            }
        } else {
            let runner = self.runner.as_deref().ok_or_else(|| {
                OffloadError::Config(
                    "shape discovery by execution requires a graph runner".to_string(),
                )
            })?;
            ShapeSource::Execute(runner)
        };
        let shapes = build_shape_map(&mapped, &ssa_graph, &hints, source)?;
        let weights = classify_weights(&mapped, &ssa_graph, external_inputs, &names);
        log::debug!("{}: {} weight(s)", model_id, weights.len());

        self.backend_index = self.select_backend();

        let reserved = reserved_names(workspace, &ssa_graph, &shapes);
        let cx = PassContext {
            shapes: &shapes,
            weights: &weights,
            blacklist,
            names: &names,
            backends: &self.backends,
            backend_index: self.backend_index,
            use_onnx: self.options.use_onnx,
            model_id: &model_id,
            debug_dir: self.options.debug_dir.as_deref(),
            reserved_names: &reserved,
        };
        let result = if self.options.use_onnx {
            cut(&ssa_graph, &mut InterchangeStrategy::new(cx, &self.schemas))?
        } else {
            cut(&ssa_graph, &mut NativeStrategy::new(cx))?
        };

        for (name, _) in &result.materialized {
            if workspace.has(name) {
                return Err(OffloadError::DuplicateTensor(name.clone()));
            }
        }
        for (name, tensor) in result.materialized {
            workspace.insert(name, tensor);
        }

        let mut rewritten = result.graph;
        for node in rewritten.nodes.iter_mut() {
            node.args.remove(NET_POS);
        }
        *graph = rewritten;

        Ok(TransformReport {
            model_id,
            partitions: result.partitions,
            backend_index: self.backend_index,
            names,
        })
    }

    fn model_id(&mut self, graph: &Graph) -> String {
        if let Some(id) = graph.arg(ARG_MODEL_ID).and_then(|arg| arg.as_str()) {
            return id.to_string();
        }
        let id = format!("unnamed_{}", self.unnamed_models);
        self.unnamed_models += 1;
        id
    }

    fn select_backend(&self) -> usize {
        if self.options.use_onnx {
            return 0;
        }
        let marker = &self.options.native_device_marker;
        match self.backends.find_device(marker) {
            Some(index) => {
                log::info!("Using backend {} for native graphs ({})", index, marker);
                index
            }
            None => {
                log::info!("No backend matches device {:?}, using backend 0", marker);
                0
            }
        }
    }
}

fn reserved_names(workspace: &Workspace, graph: &Graph, shapes: &ShapeMap) -> HashSet<String> {
    let mut reserved: HashSet<String> = workspace.names().map(str::to_string).collect();
    reserved.extend(shapes.keys().cloned());
    reserved.extend(graph.external_inputs.iter().cloned());
    reserved.extend(graph.external_outputs.iter().cloned());
    for node in &graph.nodes {
        reserved.extend(node.inputs.iter().cloned());
        reserved.extend(node.outputs.iter().cloned());
    }
    reserved
}
