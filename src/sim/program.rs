//! Compilation of a circuit into a flat, simulation-ready program.
//!
//! Nodes are laid out in evaluation order and every output and internal
//! state slot gets a fixed offset in one [`BitVectorState`]. The program is a
//! snapshot: it owns copies of everything it needs, so the circuit can stay
//! untouched (and frozen) while a run is active.

use std::collections::HashMap;

use tracing::debug;

use super::eval::NodeSlots;
use super::state::BitVectorState;
use crate::clock::{ResetConfig, ResetKind, TriggerEvent};
use crate::error::SimError;
use crate::graph::node::{NodeKind, NodePort, PinDirection};
use crate::graph::Circuit;
use crate::types::{ClockId, NodeId, SimTime};

/// A node with its assigned state offsets.
#[derive(Clone, Debug)]
pub(crate) struct CompiledNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: Option<String>,
    pub slots: NodeSlots,
    /// Index into [`Program::domains`] for stateful nodes.
    pub domain: Option<usize>,
    /// Effective reset behavior: the local override or the clock's.
    pub reset: ResetConfig,
}

/// Everything scheduled by one clock.
#[derive(Clone, Debug)]
pub(crate) struct ClockDomain {
    pub clock: ClockId,
    pub name: String,
    pub half_period: SimTime,
    pub trigger: TriggerEvent,
    pub reset: ResetConfig,
    /// Clock whose reset pin drives this domain's reset.
    pub reset_source: ClockId,
    pub min_reset_cycles: u64,
    /// Stateful nodes advanced by this clock, in evaluation order.
    pub nodes: Vec<usize>,
}

#[derive(Clone, Debug)]
pub(crate) struct Program {
    pub nodes: Vec<CompiledNode>,
    pub index: HashMap<NodeId, usize>,
    pub state_size: usize,
    pub domains: Vec<ClockDomain>,
    pub domain_of: HashMap<ClockId, usize>,
    pub pins: HashMap<String, usize>,
}

impl Program {
    /// Validates the circuit and lays it out.
    pub(crate) fn compile(circuit: &Circuit) -> Result<Self, SimError> {
        circuit.assert_validity()?;
        let order = circuit.topological_order()?;

        let index: HashMap<NodeId, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut offset = 0;
        let mut nodes = Vec::with_capacity(order.len());
        for id in &order {
            let node = circuit.node(*id)?;
            let kind = node.kind().clone();
            let mut slots = NodeSlots::default();
            for port in 0..kind.num_outputs() {
                slots.outputs.push(offset);
                offset += kind.output_type(port).map_or(0, |ty| ty.width);
            }
            for size in kind.internal_state_sizes() {
                slots.internal.push(offset);
                offset += size;
            }
            nodes.push(CompiledNode {
                id: *id,
                kind,
                name: node.name().map(str::to_string),
                slots,
                domain: None,
                reset: ResetConfig::none(),
            });
        }

        // inputs point at the driver's output offset
        let outputs: Vec<Vec<usize>> = nodes.iter().map(|n| n.slots.outputs.clone()).collect();
        for compiled in nodes.iter_mut() {
            let node = circuit.node(compiled.id)?;
            compiled.slots.inputs = node
                .drivers()
                .iter()
                .map(|driver| {
                    driver.and_then(|d| {
                        let i = *index.get(&d.node)?;
                        outputs[i].get(d.port).copied()
                    })
                })
                .collect();
        }

        let clocks = circuit.clocks();
        let mut domains = Vec::with_capacity(clocks.len());
        let mut domain_of = HashMap::new();
        for clock in clocks.iter() {
            domain_of.insert(clock.id(), domains.len());
            domains.push(ClockDomain {
                clock: clock.id(),
                name: clock.name().to_string(),
                half_period: clocks.period(clock.id())? / SimTime::from_integer(2),
                trigger: clock.trigger(),
                reset: *clock.reset(),
                reset_source: clocks.reset_pin_source(clock.id())?,
                min_reset_cycles: clocks.min_reset_cycles(clock.id())?,
                nodes: Vec::new(),
            });
        }

        let mut pins = HashMap::new();
        for (i, compiled) in nodes.iter_mut().enumerate() {
            if let NodeKind::Pin { name, .. } = &compiled.kind {
                pins.insert(name.clone(), i);
            }
            if !compiled.kind.is_stateful() {
                continue;
            }
            let clock = circuit.node(compiled.id)?.clock();
            if let Some(&d) = clock.as_ref().and_then(|c| domain_of.get(c)) {
                compiled.domain = Some(d);
                compiled.reset = compiled
                    .kind
                    .reset_override()
                    .unwrap_or(domains[d].reset);
                domains[d].nodes.push(i);
            }
        }

        debug!(
            nodes = nodes.len(),
            state_bits = offset,
            domains = domains.len(),
            "compiled simulation program"
        );

        Ok(Self {
            nodes,
            index,
            state_size: offset,
            domains,
            domain_of,
            pins,
        })
    }

    pub(crate) fn node_index(&self, id: NodeId) -> Result<usize, SimError> {
        self.index
            .get(&id)
            .copied()
            .ok_or(SimError::UnknownPort { node: id, port: 0 })
    }

    pub(crate) fn domain_index(&self, clock: ClockId) -> Result<usize, SimError> {
        self.domain_of
            .get(&clock)
            .copied()
            .ok_or(SimError::UnknownClock(clock))
    }

    /// Whether driving the reset pin shared by `clock` to `level` asserts it.
    ///
    /// Polarity belongs to the pin, so it is read from the clock that owns the
    /// reset pin rather than from `clock` itself.
    pub(crate) fn reset_level_asserts(&self, clock: ClockId, level: bool) -> Result<bool, SimError> {
        let d = self.domain_index(clock)?;
        let source = self.domain_index(self.domains[d].reset_source)?;
        Ok(level == self.domains[source].reset.asserted_level())
    }

    pub(crate) fn pin_index(&self, name: &str) -> Result<usize, SimError> {
        self.pins
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownPin(name.to_string()))
    }

    /// Offset and width of an output.
    pub(crate) fn output_slot(&self, port: NodePort) -> Result<(usize, usize), SimError> {
        let unknown = SimError::UnknownPort {
            node: port.node,
            port: port.port,
        };
        let i = *self.index.get(&port.node).ok_or(unknown.clone())?;
        let node = &self.nodes[i];
        let offset = *node.slots.outputs.get(port.port).ok_or(unknown.clone())?;
        let width = node.kind.output_type(port.port).ok_or(unknown)?.width;
        Ok((offset, width))
    }

    /// Offset and width of the value a node presents: its first output, or
    /// for output pins the value driving it.
    pub(crate) fn value_slot(&self, index: usize) -> Option<(usize, usize)> {
        let node = &self.nodes[index];
        match &node.kind {
            NodeKind::Pin {
                direction: PinDirection::Output,
                ty,
                ..
            } => node.slots.inputs[0].map(|offset| (offset, ty.width)),
            kind => Some((*node.slots.outputs.first()?, kind.output_type(0)?.width)),
        }
    }

    /// Width of an input pin, or `None` if the node is not one.
    pub(crate) fn input_pin_width(&self, index: usize) -> Option<usize> {
        match &self.nodes[index].kind {
            NodeKind::Pin {
                direction: PinDirection::Input,
                ty,
                ..
            } => Some(ty.width),
            _ => None,
        }
    }

    /// Human readable name for reports.
    pub(crate) fn display_name(&self, index: usize) -> String {
        let node = &self.nodes[index];
        match (&node.kind, &node.name) {
            (NodeKind::Pin { name, .. }, _) => name.clone(),
            (_, Some(name)) => name.clone(),
            (kind, None) => format!("{}_{}", kind.type_name(), node.id),
        }
    }

    /// Whether the node resets when its domain's reset is asserted.
    pub(crate) fn resets(&self, index: usize) -> bool {
        self.nodes[index].reset.kind != ResetKind::None
    }

    pub(crate) fn new_state(&self) -> BitVectorState {
        BitVectorState::new(self.state_size)
    }
}
