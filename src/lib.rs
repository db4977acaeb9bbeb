mod backend;
mod error;
mod fingerprint;
mod graph;
mod interchange;
mod model;
mod native;
mod onnx;
mod partition;
mod schema;
mod shapes;
mod ssa;
mod strategy;
mod tensor;
mod transformer;
mod workspace;

pub use backend::{BackendHandles, BackendId, BackendLibrary, BackendStatus, InfoKey};
pub use error::OffloadError;
pub use graph::{Argument, DeviceOption, Graph, NamedShape, Node};
pub use interchange::InterchangeStrategy;
pub use model::{import_onnx_bytes, import_onnx_file, ImportedModel};
pub use native::NativeStrategy;
pub use onnx::{ExportedNode, OnnxExporter, IR_VERSION, OPSET_VERSION, PRODUCER_NAME};
pub use partition::{cut, CutResult, Partition};
pub use schema::{OpSchema, SchemaRegistry};
pub use shapes::{
    build_shape_map, classify_weights, remap_hints, BoundShapeSpec, GraphRunner,
    PropagatingInferencer, ShapeInferencer, ShapeMap, ShapeSource,
};
pub use ssa::{annotate_positions, position_of, ssa_rewrite, NameMap, SsaRewrite, NET_POS};
pub use strategy::{
    OffloadStrategy, PackagedPartition, PassContext, Support, ARG_BACKEND_ID, ARG_INITIALIZERS,
    ARG_INPUT_NAMES, ARG_MODEL, ARG_MODEL_ID, ARG_OUTPUT_NAMES, ARG_OUTPUT_SHAPE_HINT,
    ARG_SEQ_ID, ARG_USE_ONNX, INPUT_SHAPE_INFO, OFFLOAD_OP_TYPE, OUTPUT_SHAPE_INFO,
};
pub use tensor::{DataType, DimType, ShapeInfo, Tensor, TensorShape};
pub use transformer::{OffloadTransformer, TransformOptions, TransformReport};
pub use workspace::{MappedWorkspace, Workspace};
