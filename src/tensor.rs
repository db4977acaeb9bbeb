use serde::{Deserialize, Serialize};

/// Element type of a tensor. Discriminants follow the ONNX `TensorProto`
/// numbering so conversions to and from the interchange format are a cast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    #[default]
    Undefined = 0,
    Float = 1,
    Uint8 = 2,
    Int8 = 3,
    Uint16 = 4,
    Int16 = 5,
    Int32 = 6,
    Int64 = 7,
    String = 8,
    Bool = 9,
    Float16 = 10,
    Double = 11,
    Uint32 = 12,
    Uint64 = 13,
}

impl DataType {
    pub fn from_onnx(code: i32) -> Self {
        match code {
            1 => DataType::Float,
            2 => DataType::Uint8,
            3 => DataType::Int8,
            4 => DataType::Uint16,
            5 => DataType::Int16,
            6 => DataType::Int32,
            7 => DataType::Int64,
            8 => DataType::String,
            9 => DataType::Bool,
            10 => DataType::Float16,
            11 => DataType::Double,
            12 => DataType::Uint32,
            13 => DataType::Uint64,
            _ => DataType::Undefined,
        }
    }

    pub fn onnx_code(self) -> i32 {
        self as i32
    }

    /// Data type code written into replacement-node output shape hints.
    /// Types the backend ABI has no code for fall back to FLOAT.
    pub fn backend_code(self) -> i64 {
        match self {
            DataType::Float => 1,
            DataType::Uint8 => 2,
            DataType::Int8 => 3,
            DataType::Uint16 => 4,
            DataType::Int16 => 5,
            DataType::Int32 => 6,
            DataType::Int64 => 7,
            DataType::Float16 => 10,
            other => {
                log::warn!("Unsupported tensor type {:?}, fallback to FLOAT", other);
                1
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorShape {
    pub data_type: DataType,
    pub dims: Vec<i64>,
}

impl TensorShape {
    pub fn new(data_type: DataType, dims: Vec<i64>) -> Self {
        TensorShape { data_type, dims }
    }

    pub fn is_unknown(&self) -> bool {
        self.data_type == DataType::Undefined
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimType {
    Constant,
    Batch,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeInfo {
    pub dim_type: DimType,
    pub shape: TensorShape,
}

impl ShapeInfo {
    pub fn constant(shape: TensorShape) -> Self {
        ShapeInfo {
            dim_type: DimType::Constant,
            shape,
        }
    }
}

/// A dense tensor held in a workspace. `data` is the little-endian byte image
/// of the elements.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub data_type: DataType,
    pub dims: Vec<i64>,
    pub data: Vec<u8>,
}

impl Tensor {
    pub fn new(data_type: DataType, dims: Vec<i64>, data: Vec<u8>) -> Self {
        Tensor {
            data_type,
            dims,
            data,
        }
    }

    pub fn from_f32(dims: Vec<i64>, values: &[f32]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Tensor::new(DataType::Float, dims, data)
    }

    pub fn from_i32(dims: Vec<i64>, values: &[i32]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Tensor::new(DataType::Int32, dims, data)
    }

    pub fn from_i64(dims: Vec<i64>, values: &[i64]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Tensor::new(DataType::Int64, dims, data)
    }

    pub fn shape(&self) -> TensorShape {
        TensorShape::new(self.data_type, self.dims.clone())
    }
}
