use thiserror::Error;

use crate::backend::BackendStatus;
use crate::tensor::DataType;

#[derive(Debug, Error)]
pub enum OffloadError {
    #[error("No backend is available")]
    NoBackend,

    #[error("Backend enumeration failed: {0}")]
    BackendEnumeration(BackendStatus),

    #[error("Cannot find shape info for `{0}`")]
    MissingShape(String),

    #[error("Unsupported tensor data type {data_type:?} for `{name}`")]
    UnsupportedDataType { name: String, data_type: DataType },

    #[error("Tensor `{0}` already exists in the workspace")]
    DuplicateTensor(String),

    #[error("Operator `{0}` has no interchange schema")]
    NoInterchangeSchema(String),

    #[error("Malformed graph: {0}")]
    MalformedGraph(String),

    #[error("Shape inference failed: {0}")]
    ShapeInference(String),

    #[error("Graph execution failed: {0}")]
    Execution(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("ONNX parsing error: {0}")]
    Onnx(#[from] onnx_extractor::Error),

    #[error("Protobuf error: {0}")]
    Protobuf(#[from] protobuf::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OffloadError {
    pub(crate) fn missing_shape(name: impl Into<String>) -> Self {
        OffloadError::MissingShape(name.into())
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        OffloadError::MalformedGraph(msg.into())
    }

    pub(crate) fn unsupported_type(name: impl Into<String>, data_type: DataType) -> Self {
        OffloadError::UnsupportedDataType {
            name: name.into(),
            data_type,
        }
    }
}
