use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use crate::error::ServiceError;
use crate::graph::FrozenGraph;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// `operation` reads `operand`, which is neither bound externally, constant, nor produced.
    MissingOperand { operand: u32, operation: usize },
    /// The listed operations depend on each other and can never be scheduled.
    Cycle { operations: Vec<usize> },
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyError::MissingOperand { operand, operation } => write!(
                f,
                "operand {} is missing before operation {}",
                operand, operation
            ),
            TopologyError::Cycle { operations } => {
                write!(f, "operations {:?} form a dependency cycle", operations)
            }
        }
    }
}

impl std::error::Error for TopologyError {}

impl From<TopologyError> for ServiceError {
    fn from(err: TopologyError) -> Self {
        ServiceError::BadData(err.to_string())
    }
}

fn externally_available(graph: &FrozenGraph) -> HashSet<u32> {
    graph
        .inputs
        .iter()
        .copied()
        .chain(graph.values.iter().map(|value| value.index))
        .collect()
}

/// Checks that the operations, in insertion order, only read operands already available.
pub fn validate_operation_order(graph: &FrozenGraph) -> Result<(), TopologyError> {
    let mut available = externally_available(graph);
    for (position, operation) in graph.operations.iter().enumerate() {
        for &operand in &operation.inputs {
            if !available.contains(&operand) {
                return Err(TopologyError::MissingOperand {
                    operand,
                    operation: position,
                });
            }
        }
        available.extend(operation.outputs.iter().copied());
    }
    Ok(())
}

/// Returns an execution order for the operations, preferring insertion order among ready ones.
pub fn topological_order(graph: &FrozenGraph) -> Result<Vec<usize>, TopologyError> {
    let external = externally_available(graph);
    let mut producers: HashMap<u32, Vec<usize>> = HashMap::new();
    for (position, operation) in graph.operations.iter().enumerate() {
        for &operand in &operation.outputs {
            producers.entry(operand).or_default().push(position);
        }
    }

    let count = graph.operations.len();
    let mut pending = vec![0usize; count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (position, operation) in graph.operations.iter().enumerate() {
        let mut upstream = BTreeSet::new();
        for &operand in &operation.inputs {
            match producers.get(&operand) {
                Some(found) => upstream.extend(found.iter().copied()),
                None if external.contains(&operand) => {}
                None => {
                    return Err(TopologyError::MissingOperand {
                        operand,
                        operation: position,
                    })
                }
            }
        }
        pending[position] = upstream.len();
        for producer in upstream {
            dependents[producer].push(position);
        }
    }

    let mut ready: BTreeSet<usize> = (0..count).filter(|&p| pending[p] == 0).collect();
    let mut order = Vec::with_capacity(count);
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &dependents[next] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != count {
        let operations = (0..count).filter(|&p| pending[p] > 0).collect();
        return Err(TopologyError::Cycle { operations });
    }
    Ok(order)
}

/// Number of operations reading each operand, indexed by operand.
pub fn consumer_counts(graph: &FrozenGraph) -> Vec<usize> {
    let mut counts = vec![0usize; graph.operands.len()];
    for operation in &graph.operations {
        for &operand in &operation.inputs {
            if let Some(slot) = counts.get_mut(operand as usize) {
                *slot += 1;
            }
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Operand, OperandType, Operation, OperationType};
    use crate::memory::SharedBuffer;

    fn graph(operand_count: usize, operations: Vec<Operation>, inputs: &[u32]) -> FrozenGraph {
        FrozenGraph {
            operands: (0..operand_count)
                .map(|_| Operand::tensor(OperandType::TensorFloat32, [1]))
                .collect(),
            operations,
            values: Vec::new(),
            inputs: inputs.to_vec(),
            outputs: vec![operand_count as u32 - 1],
            constants: SharedBuffer::create(0, 0).expect("empty blob"),
        }
    }

    #[test]
    fn insertion_order_is_kept_when_valid() {
        let g = graph(
            4,
            vec![
                Operation::new(OperationType::Relu, [0], [1]),
                Operation::new(OperationType::Tanh, [1], [2]),
                Operation::new(OperationType::Add, [1, 2], [3]),
            ],
            &[0],
        );
        validate_operation_order(&g).expect("ordered graph");
        assert_eq!(topological_order(&g).expect("order"), vec![0, 1, 2]);
        assert_eq!(consumer_counts(&g), vec![1, 2, 1, 0]);
    }

    #[test]
    fn out_of_order_operations_are_reordered() {
        let g = graph(
            3,
            vec![
                Operation::new(OperationType::Tanh, [1], [2]),
                Operation::new(OperationType::Relu, [0], [1]),
            ],
            &[0],
        );
        let err = validate_operation_order(&g).expect_err("operand 1 not yet produced");
        assert_eq!(
            err,
            TopologyError::MissingOperand {
                operand: 1,
                operation: 0
            }
        );
        assert_eq!(topological_order(&g).expect("order"), vec![1, 0]);
    }

    #[test]
    fn cycles_are_reported() {
        let g = graph(
            3,
            vec![
                Operation::new(OperationType::Relu, [0, 2], [1]),
                Operation::new(OperationType::Tanh, [1], [2]),
            ],
            &[0],
        );
        assert_eq!(
            topological_order(&g).expect_err("cycle"),
            TopologyError::Cycle {
                operations: vec![0, 1]
            }
        );
    }

    #[test]
    fn unproduced_operands_are_missing() {
        let g = graph(
            3,
            vec![Operation::new(OperationType::Add, [0, 1], [2])],
            &[0],
        );
        let err = topological_order(&g).expect_err("operand 1 has no source");
        assert!(matches!(err, TopologyError::MissingOperand { operand: 1, .. }));
        let service_err: ServiceError = err.into();
        assert!(matches!(service_err, ServiceError::BadData(_)));
    }
}
