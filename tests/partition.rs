mod common;

use common::{chain, init_logging, names, StubStrategy};
use netcut::{cut, Graph, Node, OffloadError};

fn op_types(graph: &Graph) -> Vec<&str> {
    graph.nodes.iter().map(|n| n.op_type.as_str()).collect()
}

#[test]
fn unsupported_node_splits_the_run() {
    init_logging();
    let graph = chain(&["Relu", "Sigmoid", "Relu"]);
    let mut strategy = StubStrategy::new(&["Relu"]);

    let result = cut(&graph, &mut strategy).expect("cut graph");

    assert_eq!(result.partitions, 2);
    assert_eq!(op_types(&result.graph), vec!["Fused", "Sigmoid", "Fused"]);
    assert_eq!(result.graph.nodes[0].inputs, names(&["x"]));
    assert_eq!(result.graph.nodes[0].outputs, names(&["v0"]));
    assert_eq!(result.graph.nodes[1], graph.nodes[1]);
    assert_eq!(result.graph.nodes[2].inputs, names(&["v1"]));
    assert_eq!(result.graph.nodes[2].outputs, names(&["v2"]));
    assert_eq!(strategy.packaged[0].positions, vec![0]);
    assert_eq!(strategy.packaged[1].positions, vec![2]);
}

#[test]
fn fully_supported_graph_collapses_to_one_node() {
    let graph = chain(&["Relu", "Sigmoid", "Relu"]);
    let mut strategy = StubStrategy::new(&["Relu", "Sigmoid"]);

    let result = cut(&graph, &mut strategy).expect("cut graph");

    assert_eq!(result.partitions, 1);
    assert_eq!(op_types(&result.graph), vec!["Fused"]);
    let partition = &strategy.packaged[0];
    assert_eq!(partition.inputs, names(&["x"]));
    assert_eq!(partition.outputs, names(&["v2"]));
    assert_eq!(result.graph.external_inputs, graph.external_inputs);
    assert_eq!(result.graph.external_outputs, graph.external_outputs);
}

#[test]
fn nothing_supported_leaves_graph_identical() {
    let graph = chain(&["Relu", "Sigmoid", "Relu"]);
    let mut strategy = StubStrategy::new(&[]);

    let result = cut(&graph, &mut strategy).expect("cut graph");

    assert_eq!(result.partitions, 0);
    assert_eq!(result.graph, graph);
    assert!(strategy.packaged.is_empty());
}

/// x -> A -> a; a -> B -> b; a -> C -> c; (b, c) -> D -> d
fn diamond() -> Graph {
    let mut graph = Graph::new("diamond");
    graph.external_inputs.push("x".to_string());
    graph.push(Node::new("Relu", ["x"], ["a"]).with_name("A"));
    graph.push(Node::new("Relu", ["a"], ["b"]).with_name("B"));
    graph.push(Node::new("Sigmoid", ["a"], ["c"]).with_name("C"));
    graph.push(Node::new("Add", ["b", "c"], ["d"]).with_name("D"));
    graph.external_outputs.push("d".to_string());
    graph
}

#[test]
fn values_read_outside_become_partition_outputs() {
    let graph = diamond();
    let mut strategy = StubStrategy::new(&["Relu", "Add"]);

    let result = cut(&graph, &mut strategy).expect("cut graph");

    assert_eq!(op_types(&result.graph), vec!["Fused", "Sigmoid", "Fused"]);
    let first = &strategy.packaged[0];
    assert_eq!(first.positions, vec![0, 1]);
    assert_eq!(first.outputs, names(&["a", "b"]));
    assert!(first.is_consumed_outside("a"));
    assert!(first.is_consumed_outside("b"));

    let second = &strategy.packaged[1];
    assert_eq!(second.inputs, names(&["b", "c"]));
    assert_eq!(second.outputs, names(&["d"]));
    assert!(!second.is_consumed_outside("d"));
}

#[test]
fn cut_graph_keeps_topological_order() {
    let graph = diamond();
    let mut strategy = StubStrategy::new(&["Relu", "Add"]);

    let result = cut(&graph, &mut strategy).expect("cut graph");

    result.graph.validate().expect("topologically ordered");
}

#[test]
fn packaging_failure_aborts_the_cut() {
    let graph = chain(&["Relu", "Relu"]);
    let mut strategy = StubStrategy::failing(&["Relu"]);

    let err = cut(&graph, &mut strategy).err().expect("packaging fails");

    assert!(matches!(err, OffloadError::MissingShape(ref name) if name == "v1"));
}
