//! Structural checks and evaluation order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use serde::Serialize;
use tracing::warn;

use super::node::NodeKind;
use super::Circuit;
use crate::error::StructuralError;
use crate::types::{ClockId, Handle, NodeId};

/// A register-to-register path between clocks without a crossing marker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClockCrossingReport {
    pub from: NodeId,
    pub to: NodeId,
    pub from_clock: ClockId,
    pub to_clock: ClockId,
}

impl Circuit {
    /// Whole-graph consistency pass.
    ///
    /// Checks every node's shape, that each input is driven by a compatible
    /// output or explicitly allowed to float, that stateful nodes (and only
    /// those) carry an existing clock, and that there is no combinational
    /// cycle. Pin names must be unique across the design.
    pub fn assert_validity(&self) -> Result<(), StructuralError> {
        let mut pins: HashMap<&str, NodeId> = HashMap::new();
        for (id, node) in self.nodes.iter::<NodeId>() {
            node.kind
                .assert_validity()
                .map_err(|reason| StructuralError::MalformedNode { node: id, reason })?;

            if let NodeKind::Pin { name, .. } = &node.kind {
                if let Some(&first) = pins.get(name.as_str()) {
                    return Err(StructuralError::DuplicatePin {
                        name: name.clone(),
                        first,
                        second: id,
                    });
                }
                pins.insert(name.as_str(), id);
            }

            for (port, driver) in node.inputs.iter().enumerate() {
                let Some(driver) = driver else {
                    if !node.kind.input_is_optional(port) && !node.is_floating_allowed(port) {
                        return Err(StructuralError::UnconnectedInput {
                            node: id,
                            port,
                            name: node.kind.input_name(port),
                        });
                    }
                    continue;
                };
                let source = self.nodes.get(driver.node).ok_or_else(|| {
                    StructuralError::MalformedNode {
                        node: id,
                        reason: format!("input {port} is driven by removed node {}", driver.node),
                    }
                })?;
                let (Some(expected), Some(actual)) = (
                    node.kind.input_type(port),
                    source.kind.output_type(driver.port),
                ) else {
                    return Err(StructuralError::MalformedNode {
                        node: id,
                        reason: format!("input {port} is driven by missing output {driver}"),
                    });
                };
                if !actual.is_compatible(&expected) {
                    return Err(StructuralError::DriverMismatch {
                        node: id,
                        port,
                        expected,
                        actual,
                    });
                }
            }

            match (node.kind.is_stateful(), node.clock) {
                (true, None) => return Err(StructuralError::MissingClock { node: id }),
                (false, Some(_)) => return Err(StructuralError::UnexpectedClock { node: id }),
                (true, Some(clock)) if !self.clocks().contains(clock) => {
                    return Err(StructuralError::DanglingClock { node: id, clock });
                }
                _ => {}
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Evaluation order of all nodes.
    ///
    /// Only combinational dependencies order nodes; a register's inputs are
    /// sampled on clock edges and do not constrain it. Ties are broken by slot
    /// index so the order is stable for an unchanged graph.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, StructuralError> {
        let bound = self.nodes.capacity_bound();
        let mut in_degree = vec![0usize; bound];
        let mut dependents: Vec<Vec<NodeId>> = vec![Vec::new(); bound];

        for (id, node) in self.nodes.iter::<NodeId>() {
            for (port, driver) in node.inputs.iter().enumerate() {
                let Some(driver) = driver else { continue };
                if !node.kind.output_depends_on_input(port) {
                    continue;
                }
                in_degree[id.index()] += 1;
                dependents[driver.node.index()].push(id);
            }
        }

        let mut ready: BinaryHeap<Reverse<(usize, u32)>> = self
            .nodes
            .iter::<NodeId>()
            .filter(|(id, _)| in_degree[id.index()] == 0)
            .map(|(id, _)| Reverse((id.index(), id.generation())))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse((index, generation))) = ready.pop() {
            let id = NodeId::from_parts(index, generation);
            order.push(id);
            for next in &dependents[index] {
                let degree = &mut in_degree[next.index()];
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse((next.index(), next.generation())));
                }
            }
        }

        if order.len() != self.nodes.len() {
            let chain = self.find_cycle(&order);
            return Err(StructuralError::CombinationalCycle { chain });
        }
        Ok(order)
    }

    /// Extracts one cycle among the nodes Kahn's algorithm could not order.
    fn find_cycle(&self, ordered: &[NodeId]) -> Vec<NodeId> {
        let ordered: HashSet<NodeId> = ordered.iter().copied().collect();
        let Some(start) = self
            .nodes
            .iter::<NodeId>()
            .map(|(id, _)| id)
            .find(|id| !ordered.contains(id))
        else {
            return Vec::new();
        };

        // every unordered node has an unordered combinational driver, so
        // walking drivers backwards must revisit a node
        let mut path = vec![start];
        let mut current = start;
        loop {
            let Some(node) = self.nodes.get(current) else {
                return path;
            };
            let next = node
                .inputs
                .iter()
                .enumerate()
                .filter(|(port, _)| node.kind.output_depends_on_input(*port))
                .filter_map(|(_, driver)| *driver)
                .map(|driver| driver.node)
                .find(|driver| !ordered.contains(driver));
            let Some(next) = next else {
                return path;
            };
            if let Some(pos) = path.iter().position(|n| *n == next) {
                let mut cycle = path.split_off(pos);
                cycle.reverse();
                // rotate so the chain starts at the smallest handle
                if let Some(min) = cycle.iter().enumerate().min_by_key(|(_, n)| **n).map(|(i, _)| i) {
                    cycle.rotate_left(min);
                }
                return cycle;
            }
            path.push(next);
            current = next;
        }
    }

    /// Lists register-to-register paths between different clock domains
    /// that do not pass through a [`NodeKind::ClockCrossing`] node.
    ///
    /// Crossings are reported and logged, never rejected.
    pub fn detect_clock_crossings(&self) -> Vec<ClockCrossingReport> {
        let mut reports = Vec::new();
        for (to, node) in self.nodes.iter::<NodeId>() {
            let (true, Some(to_clock)) = (node.kind.is_stateful(), node.clock) else {
                continue;
            };
            let domain = self.clocks().clock_pin_source(to_clock).unwrap_or(to_clock);

            let mut seen = HashSet::new();
            let mut stack: Vec<NodeId> = node.inputs.iter().flatten().map(|d| d.node).collect();
            while let Some(id) = stack.pop() {
                if !seen.insert(id) {
                    continue;
                }
                let Some(source) = self.nodes.get(id) else {
                    continue;
                };
                if matches!(source.kind, NodeKind::ClockCrossing { .. }) {
                    continue;
                }
                if source.kind.is_stateful() {
                    let Some(from_clock) = source.clock else {
                        continue;
                    };
                    let from_domain =
                        self.clocks().clock_pin_source(from_clock).unwrap_or(from_clock);
                    if from_domain != domain {
                        warn!(from = %id, to = %to, %from_clock, %to_clock, "unmarked clock domain crossing");
                        reports.push(ClockCrossingReport {
                            from: id,
                            to,
                            from_clock,
                            to_clock,
                        });
                    }
                    continue;
                }
                stack.extend(source.inputs.iter().flatten().map(|d| d.node));
            }
        }
        reports
    }
}
