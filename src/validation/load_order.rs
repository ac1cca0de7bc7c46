//! Foreign-key load order
//!
//! Parents must be loaded before their children. The order is either derived from the
//! foreign-key graph or checked against an explicit `load_sequence`.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use super::{ValidationError, ValidationResult};
use crate::models::DatasetSpec;

/// Edges point from parent dataset to child dataset; node weights are dataset indices
fn dependency_graph(datasets: &[DatasetSpec]) -> DiGraph<usize, ()> {
    let mut graph = DiGraph::with_capacity(datasets.len(), datasets.len());
    let nodes: Vec<NodeIndex> = (0..datasets.len()).map(|i| graph.add_node(i)).collect();
    let by_table: HashMap<&str, usize> = datasets
        .iter()
        .enumerate()
        .map(|(i, d)| (d.table.as_str(), i))
        .collect();

    for (child, dataset) in datasets.iter().enumerate() {
        for parent_table in dataset.parent_tables() {
            if let Some(&parent) = by_table.get(parent_table) {
                graph.update_edge(nodes[parent], nodes[child], ());
            }
        }
    }
    graph
}

/// Topological order of the datasets (as indices), parents first
///
/// Ties are broken by declaration order, so a configuration without foreign keys keeps
/// its declared order. Self-references are ignored. A cycle is an error naming the
/// datasets involved.
pub fn dependency_order(datasets: &[DatasetSpec]) -> ValidationResult<Vec<usize>> {
    let graph = dependency_graph(datasets);

    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(datasets.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(graph[NodeIndex::new(i)]);
        for child in graph.neighbors_directed(NodeIndex::new(i), Direction::Outgoing) {
            let c = child.index();
            in_degree[c] -= 1;
            if in_degree[c] == 0 {
                ready.push(Reverse(c));
            }
        }
    }

    if order.len() < datasets.len() {
        let placed: HashSet<usize> = order.iter().copied().collect();
        let cycle = (0..datasets.len())
            .filter(|i| !placed.contains(i))
            .map(|i| datasets[i].name.clone())
            .collect();
        return Err(ValidationError::Cycle(cycle));
    }

    Ok(order)
}

/// Check an explicit load sequence and return it as dataset indices
///
/// Every dataset must appear exactly once, and every referenced parent must come
/// before its child.
pub fn check_load_sequence(
    datasets: &[DatasetSpec],
    sequence: &[String],
) -> ValidationResult<Vec<usize>> {
    let by_name: HashMap<&str, usize> = datasets
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name.as_str(), i))
        .collect();

    let mut order = Vec::with_capacity(sequence.len());
    let mut position: HashMap<usize, usize> = HashMap::new();
    for name in sequence {
        let idx = *by_name.get(name.as_str()).ok_or_else(|| {
            ValidationError::LoadSequence(format!("'{}' is not a configured dataset", name))
        })?;
        if position.insert(idx, order.len()).is_some() {
            return Err(ValidationError::LoadSequence(format!(
                "'{}' is listed more than once",
                name
            )));
        }
        order.push(idx);
    }

    let missing: Vec<&str> = datasets
        .iter()
        .enumerate()
        .filter(|(i, _)| !position.contains_key(i))
        .map(|(_, d)| d.name.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::LoadSequence(format!(
            "missing datasets: {}",
            missing.join(", ")
        )));
    }

    let by_table: HashMap<&str, usize> = datasets
        .iter()
        .enumerate()
        .map(|(i, d)| (d.table.as_str(), i))
        .collect();
    for (pos, &idx) in order.iter().enumerate() {
        let dataset = &datasets[idx];
        for parent_table in dataset.parent_tables() {
            if let Some(parent) = by_table.get(parent_table)
                && position[parent] > pos
            {
                return Err(ValidationError::LoadSequence(format!(
                    "'{}' references '{}' but is loaded before it",
                    dataset.name, datasets[*parent].name
                )));
            }
        }
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnSpec, ColumnType, ForeignKey, ReferentialAction};
    use crate::transform::TransformSpec;

    fn dataset(name: &str, parents: &[&str]) -> DatasetSpec {
        DatasetSpec {
            name: name.to_string(),
            file: format!("{}.csv", name),
            table: name.to_string(),
            columns: vec![ColumnSpec::new("id", ColumnType::Integer)],
            primary_key: vec!["id".to_string()],
            key_columns: vec!["id".to_string()],
            unique_constraints: vec![],
            foreign_keys: parents
                .iter()
                .map(|p| ForeignKey {
                    columns: vec!["id".to_string()],
                    ref_table: p.to_string(),
                    ref_columns: vec!["id".to_string()],
                    on_delete: ReferentialAction::Restrict,
                    on_update: ReferentialAction::NoAction,
                })
                .collect(),
            transform: TransformSpec::default(),
            null_values: vec![],
        }
    }

    fn names(datasets: &[DatasetSpec], order: &[usize]) -> Vec<String> {
        order.iter().map(|&i| datasets[i].name.clone()).collect()
    }

    #[test]
    fn test_dependency_order_puts_parents_first() {
        let datasets = vec![
            dataset("order_items", &["orders", "products"]),
            dataset("orders", &["customers"]),
            dataset("products", &["brands"]),
            dataset("customers", &[]),
            dataset("brands", &[]),
        ];
        let order = dependency_order(&datasets).unwrap();
        assert_eq!(
            names(&datasets, &order),
            vec!["customers", "orders", "brands", "products", "order_items"]
        );
    }

    #[test]
    fn test_dependency_order_keeps_declaration_order_without_fks() {
        let datasets = vec![dataset("b", &[]), dataset("a", &[]), dataset("c", &[])];
        let order = dependency_order(&datasets).unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_self_reference_is_ignored() {
        let datasets = vec![dataset("staffs", &["staffs"])];
        assert_eq!(dependency_order(&datasets).unwrap(), vec![0]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let datasets = vec![dataset("a", &["b"]), dataset("b", &["a"]), dataset("c", &[])];
        match dependency_order(&datasets) {
            Err(ValidationError::Cycle(members)) => {
                assert_eq!(members, vec!["a".to_string(), "b".to_string()])
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_check_load_sequence() {
        let datasets = vec![dataset("brands", &[]), dataset("products", &["brands"])];
        let seq = vec!["brands".to_string(), "products".to_string()];
        assert_eq!(check_load_sequence(&datasets, &seq).unwrap(), vec![0, 1]);

        let reversed = vec!["products".to_string(), "brands".to_string()];
        assert!(matches!(
            check_load_sequence(&datasets, &reversed),
            Err(ValidationError::LoadSequence(_))
        ));

        let partial = vec!["brands".to_string()];
        assert!(check_load_sequence(&datasets, &partial).is_err());

        let unknown = vec!["brands".to_string(), "products".to_string(), "x".to_string()];
        assert!(check_load_sequence(&datasets, &unknown).is_err());

        let dup = vec!["brands".to_string(), "brands".to_string()];
        assert!(check_load_sequence(&datasets, &dup).is_err());
    }
}
