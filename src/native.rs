use crate::backend::BackendStatus;
use crate::error::OffloadError;
use crate::graph::{Argument, Graph, NamedShape, Node};
use crate::partition::Partition;
use crate::strategy::{
    dump_debug, exposed_outputs, output_hints, resolve_weights, split_info_output,
    OffloadStrategy, PackagedPartition, PassContext, ProbeCache, Replacement,
    ReplacementBuilder, Support, INPUT_SHAPE_INFO, OUTPUT_SHAPE_INFO,
};

pub struct NativeStrategy<'a> {
    cx: PassContext<'a>,
    cache: ProbeCache,
    builder: ReplacementBuilder,
}

impl<'a> NativeStrategy<'a> {
    pub fn new(cx: PassContext<'a>) -> Self {
        let builder = ReplacementBuilder::new(&cx);
        NativeStrategy {
            cx,
            cache: ProbeCache::default(),
            builder,
        }
    }

    fn named_shapes(&self, names: &[String]) -> Result<Vec<NamedShape>, OffloadError> {
        names
            .iter()
            .map(|name| {
                self.cx
                    .shape(name)
                    .cloned()
                    .map(|shape| NamedShape::new(name.clone(), shape))
                    .ok_or_else(|| OffloadError::missing_shape(name.clone()))
            })
            .collect()
    }

    /// Serializes a one-node graph around `node` and asks the backend.
    fn probe(&mut self, node: &Node) -> Result<BackendStatus, OffloadError> {
        let mut net = Graph::new(format!("probe_{}", node.op_type));
        net.push(node.clone());
        for input in &node.inputs {
            if !input.is_empty() && !net.external_inputs.contains(input) {
                net.external_inputs.push(input.clone());
            }
        }
        net.external_outputs = node.outputs.clone();
        if split_info_output(node).is_some() {
            net.external_outputs.pop();
        }
        net.args.insert(
            INPUT_SHAPE_INFO.to_string(),
            Argument::Shapes(self.named_shapes(&node.inputs)?),
        );
        net.args.insert(
            OUTPUT_SHAPE_INFO.to_string(),
            Argument::Shapes(self.named_shapes(&node.outputs)?),
        );

        let bytes = net.to_bytes()?;
        Ok(self
            .cache
            .check(self.cx.backends, self.cx.backend_index, &bytes))
    }
}

impl OffloadStrategy for NativeStrategy<'_> {
    fn supports(&mut self, node: &Node) -> Support {
        if self.cx.is_blacklisted(node) {
            log::debug!("{} is blacklisted", node.label());
            return Support::Unsupported;
        }
        match self.probe(node) {
            Ok(status) if status.is_success() => Support::Supported,
            Ok(status) => {
                log::info!("Don't support native op {} ({})", node.op_type, status);
                Support::Unsupported
            }
            Err(err) => {
                log::error!(
                    "Caught error when probing op {}, what: {}",
                    node.op_type,
                    err
                );
                Support::Unsupported
            }
        }
    }

    fn package(&mut self, partition: &Partition) -> Result<PackagedPartition, OffloadError> {
        let (outputs, dropped) = exposed_outputs(partition);
        let hints = output_hints(&outputs, |o| self.cx.shape(o).cloned())?;
        let resolution = resolve_weights(partition, self.cx.weights, &[]);

        let seq = self.builder.peek_seq();
        let mut wrapper = Graph::new(format!("{}_{}", self.cx.model_id, seq));
        wrapper.nodes = partition.nodes.clone();
        wrapper.external_inputs = resolution.inputs.clone();
        wrapper.external_outputs = outputs.clone();
        wrapper.args.insert(
            INPUT_SHAPE_INFO.to_string(),
            Argument::Shapes(self.named_shapes(&resolution.inputs)?),
        );

        dump_debug(
            self.cx.debug_dir,
            &format!("{}_{}.graph.txt", self.cx.model_id, seq),
            || format!("{:#?}", wrapper),
        );

        let payload = wrapper.to_bytes()?;
        let node = self.builder.build(
            Replacement {
                payload,
                partition,
                outputs: &outputs,
                output_hints: &hints,
                resolution: &resolution,
                extra_weights: &[],
            },
            self.cx.names,
        );
        Ok(PackagedPartition {
            node,
            dropped_outputs: dropped,
            materialized: Vec::new(),
        })
    }
}
