use std::collections::HashMap;

/// How a native operator type maps onto the interchange format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpSchema {
    pub op_type: String,
    pub interchange_op: Option<String>,
    pub attribute_renames: Vec<(String, String)>,
    pub fixed_attributes: Vec<(String, i64)>,
}

impl OpSchema {
    pub fn new(op_type: impl Into<String>) -> Self {
        OpSchema {
            op_type: op_type.into(),
            interchange_op: None,
            attribute_renames: Vec::new(),
            fixed_attributes: Vec::new(),
        }
    }

    pub fn exports_as(mut self, interchange_op: impl Into<String>) -> Self {
        self.interchange_op = Some(interchange_op.into());
        self
    }

    pub fn rename_attribute(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.attribute_renames.push((from.into(), to.into()));
        self
    }

    pub fn fixed_attribute(mut self, name: impl Into<String>, value: i64) -> Self {
        self.fixed_attributes.push((name.into(), value));
        self
    }

    pub fn attribute_name<'a>(&'a self, native: &'a str) -> &'a str {
        self.attribute_renames
            .iter()
            .find(|(from, _)| from == native)
            .map(|(_, to)| to.as_str())
            .unwrap_or(native)
    }
}

#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, OpSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        SchemaRegistry::default()
    }

    /// Registry preloaded with the common operator set.
    pub fn with_defaults() -> Self {
        let mut registry = SchemaRegistry::new();
        for op in [
            "Relu", "Sigmoid", "Tanh", "Add", "Sub", "Mul", "Div", "Sum", "Conv", "MaxPool",
            "AveragePool", "Softmax", "Transpose", "MatMul", "Concat", "Reshape", "Flatten",
            "Identity", "Exp", "Log", "Sqrt", "Abs", "Neg",
        ] {
            registry.register(OpSchema::new(op).exports_as(op));
        }
        registry.register(
            OpSchema::new("FC")
                .exports_as("Gemm")
                .fixed_attribute("transB", 1),
        );
        registry.register(OpSchema::new("BatchMatMul").exports_as("MatMul"));
        registry.register(
            OpSchema::new("ExpandDims")
                .exports_as("Unsqueeze")
                .rename_attribute("dims", "axes"),
        );
        registry.register(
            OpSchema::new("Squeeze")
                .exports_as("Squeeze")
                .rename_attribute("dims", "axes"),
        );
        registry.register(OpSchema::new("SpatialBN").exports_as("BatchNormalization"));
        registry.register(OpSchema::new("ConstantFill"));
        registry.register(OpSchema::new("AveragedLoss"));
        registry.register(OpSchema::new("LayerNorm"));
        registry
    }

    pub fn register(&mut self, schema: OpSchema) -> Option<OpSchema> {
        self.schemas.insert(schema.op_type.clone(), schema)
    }

    pub fn schema(&self, op_type: &str) -> Option<&OpSchema> {
        self.schemas.get(op_type)
    }

    pub fn interchange_op(&self, op_type: &str) -> Option<&str> {
        self.schema(op_type)
            .and_then(|schema| schema.interchange_op.as_deref())
            .filter(|op| !op.is_empty())
    }
}
