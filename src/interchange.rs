use std::collections::{HashMap, HashSet};

use onnx_protobuf::NodeProto;
use protobuf::Message;

use crate::backend::BackendStatus;
use crate::error::OffloadError;
use crate::graph::Node;
use crate::onnx::{self, OnnxExporter};
use crate::partition::Partition;
use crate::schema::SchemaRegistry;
use crate::shapes::concat_sizes;
use crate::strategy::{
    dump_debug, exposed_outputs, output_hints, resolve_weights, split_info_output,
    OffloadStrategy, PackagedPartition, PassContext, ProbeCache, Replacement, ReplacementBuilder,
    Support,
};
use crate::tensor::{Tensor, TensorShape};

pub struct InterchangeStrategy<'a> {
    cx: PassContext<'a>,
    schemas: &'a SchemaRegistry,
    // Separate exporters keep synthesized constant names unique across the
    // packaged models regardless of how many probes ran.
    probe_exporter: OnnxExporter<'a>,
    package_exporter: OnnxExporter<'a>,
    extra_shapes: HashMap<String, TensorShape>,
    cache: ProbeCache,
    builder: ReplacementBuilder,
}

impl<'a> InterchangeStrategy<'a> {
    pub fn new(cx: PassContext<'a>, schemas: &'a SchemaRegistry) -> Self {
        let builder = ReplacementBuilder::new(&cx);
        let probe_exporter = OnnxExporter::with_reserved(schemas, cx.reserved_names.clone());
        let package_exporter = OnnxExporter::with_reserved(schemas, cx.reserved_names.clone());
        InterchangeStrategy {
            cx,
            schemas,
            probe_exporter,
            package_exporter,
            extra_shapes: HashMap::new(),
            cache: ProbeCache::default(),
            builder,
        }
    }

    fn shape(&self, name: &str) -> Option<TensorShape> {
        self.cx
            .shape(name)
            .or_else(|| self.extra_shapes.get(name))
            .cloned()
    }

    /// ONNX Concat has no split-info output, so one that is read outside the
    /// partition is produced by a constant holding the per-input extents.
    fn split_info_node(&self, node: &Node, split: &str) -> Result<NodeProto, OffloadError> {
        let inputs = node
            .inputs
            .iter()
            .map(|i| {
                self.shape(i)
                    .ok_or_else(|| OffloadError::missing_shape(i.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let sizes = concat_sizes(node, &inputs).ok_or_else(|| {
            OffloadError::malformed(format!("cannot size split info of {}", node.label()))
        })?;
        let sizes = sizes
            .into_iter()
            .map(i32::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| OffloadError::malformed(format!("split of {} overflows", node.label())))?;
        let tensor = Tensor::from_i32(vec![sizes.len() as i64], &sizes);
        Ok(onnx::constant_node(split, &tensor))
    }

    fn probe(&mut self, node: &Node) -> Result<BackendStatus, OffloadError> {
        let exported = self.probe_exporter.export_node(node)?;
        let mut model = onnx::new_model();
        let graph = model.graph.mut_or_insert_default();

        let mut used_inputs: HashSet<String> = HashSet::new();
        let mut used_outputs: HashSet<String> = HashSet::new();
        let mut boundary_inputs = Vec::new();
        let mut boundary_outputs = Vec::new();
        let mut reshape_info: HashSet<String> = HashSet::new();

        // Exported nodes are in topological order.
        for n in &exported.nodes {
            graph.node.push(n.clone());
            for i in &n.input {
                let is_new = used_inputs.insert(i.clone());
                if is_new && !used_outputs.contains(i) {
                    boundary_inputs.push(i.clone());
                }
            }
            for o in &n.output {
                used_outputs.insert(o.clone());
            }
            if n.op_type == "Reshape" && n.input.len() > 1 {
                reshape_info.insert(n.input[1].clone());
            }
        }
        used_outputs.clear();
        for n in &exported.nodes {
            for o in &n.output {
                let is_new = used_outputs.insert(o.clone());
                if is_new && !used_inputs.contains(o) {
                    boundary_outputs.push(o.clone());
                }
            }
        }

        let mut extra_hints: HashMap<&str, TensorShape> = HashMap::new();
        for t in &exported.constants {
            extra_hints.insert(t.name.as_str(), onnx::constant_shape(t));
            if reshape_info.contains(&t.name) {
                graph.initializer.push(t.clone());
            }
        }

        let lookup = |name: &str| {
            self.shape(name)
                .or_else(|| extra_hints.get(name).cloned())
        };
        for i in &boundary_inputs {
            graph.input.push(onnx::value_info(i, lookup(i).as_ref()));
        }
        for o in &boundary_outputs {
            graph.output.push(onnx::value_info(o, lookup(o).as_ref()));
        }

        let bytes = model.write_to_bytes()?;
        Ok(self
            .cache
            .check(self.cx.backends, self.cx.backend_index, &bytes))
    }
}

impl OffloadStrategy for InterchangeStrategy<'_> {
    fn supports(&mut self, node: &Node) -> Support {
        if self.cx.is_blacklisted(node) {
            log::debug!("{} is blacklisted", node.label());
            return Support::Unsupported;
        }
        if self.schemas.interchange_op(&node.op_type).is_none() {
            log::info!(
                "Cannot export op {} to onnx as there is no corresponding ONNX schema.",
                node.op_type
            );
            return Support::Unsupported;
        }
        match self.probe(node) {
            Ok(status) if status.is_success() => Support::Supported,
            Ok(status) => {
                log::info!("Don't support onnx for {} op ({})", node.op_type, status);
                Support::Unsupported
            }
            Err(err) => {
                log::error!(
                    "Caught error when converting op {}, what: {}",
                    node.op_type,
                    err
                );
                Support::Unsupported
            }
        }
    }

    fn package(&mut self, partition: &Partition) -> Result<PackagedPartition, OffloadError> {
        let seq = self.builder.peek_seq();
        let mut model = onnx::new_model();
        let mut extra_weights = Vec::new();
        let mut materialized = Vec::new();
        let (outputs, dropped) = exposed_outputs(partition);

        for node in &partition.nodes {
            let exported = self.package_exporter.export_node(node)?;
            let split = split_info_output(node)
                .filter(|split| outputs.iter().any(|o| o == *split))
                .map(|split| self.split_info_node(node, split))
                .transpose()?;
            let graph = model.graph.mut_or_insert_default();
            graph.node.extend(exported.nodes);
            graph.node.extend(split);
            for constant in exported.constants {
                log::debug!("Adding extra init tensor: {}", constant.name);
                if self.cx.shapes.contains_key(&constant.name)
                    || self.extra_shapes.contains_key(&constant.name)
                {
                    return Err(OffloadError::DuplicateTensor(constant.name.clone()));
                }
                let tensor = onnx::tensor_from_proto(&constant)?;
                self.extra_shapes
                    .insert(constant.name.clone(), onnx::constant_shape(&constant));
                extra_weights.push(constant.name.clone());
                materialized.push((constant.name.clone(), tensor));
                graph.initializer.push(constant);
            }
        }

        let hints = output_hints(&outputs, |o| self.shape(o))?;
        let resolution = resolve_weights(partition, self.cx.weights, &extra_weights);

        {
            let graph = model.graph.mut_or_insert_default();
            for (output, hint) in outputs.iter().zip(&hints) {
                graph.output.push(onnx::value_info(output, Some(hint)));
            }
            for input in &resolution.inputs {
                let shape = self
                    .shape(input)
                    .ok_or_else(|| OffloadError::missing_shape(input.clone()))?;
                graph.input.push(onnx::value_info(input, Some(&shape)));
            }
        }

        dump_debug(
            self.cx.debug_dir,
            &format!("{}_{}.onnx.txt", self.cx.model_id, seq),
            || format!("{:#?}", model),
        );

        let payload = model.write_to_bytes()?;
        let node = self.builder.build(
            Replacement {
                payload,
                partition,
                outputs: &outputs,
                output_hints: &hints,
                resolution: &resolution,
                extra_weights: &extra_weights,
            },
            self.cx.names,
        );
        Ok(PackagedPartition {
            node,
            dropped_outputs: dropped,
            materialized,
        })
    }
}
