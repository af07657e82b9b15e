//! Error types for graph construction and simulation.

use thiserror::Error;

use crate::graph::node::ConnectionType;
use crate::types::{ClockId, GroupId, NodeId, SignalGroupId};

/// A malformed graph, detected by [`Circuit::assert_validity`](crate::Circuit::assert_validity).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("input {port} ({name}) of node {node} is not connected")]
    UnconnectedInput {
        node: NodeId,
        port: usize,
        name: String,
    },

    #[error("stateful node {node} has no clock attached")]
    MissingClock { node: NodeId },

    #[error("combinational node {node} has a clock attached")]
    UnexpectedClock { node: NodeId },

    #[error("node {node} is attached to unknown clock {clock}")]
    DanglingClock { node: NodeId, clock: ClockId },

    #[error("driver of input {port} of node {node} is {actual}, expected {expected}")]
    DriverMismatch {
        node: NodeId,
        port: usize,
        expected: ConnectionType,
        actual: ConnectionType,
    },

    #[error("node {node} is malformed: {reason}")]
    MalformedNode { node: NodeId, reason: String },

    #[error("pin name '{name}' is used by nodes {first} and {second}")]
    DuplicatePin {
        name: String,
        first: NodeId,
        second: NodeId,
    },

    #[error("combinational cycle through {}", format_chain(.chain))]
    CombinationalCycle { chain: Vec<NodeId> },
}

fn format_chain(chain: &[NodeId]) -> String {
    chain
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors surfaced to the graph-building caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {0} does not exist (stale or foreign handle)")]
    InvalidNode(NodeId),

    #[error("group {0} does not exist (stale or foreign handle)")]
    InvalidGroup(GroupId),

    #[error("signal group {0} does not exist (stale or foreign handle)")]
    InvalidSignalGroup(SignalGroupId),

    #[error("clock {0} does not exist")]
    InvalidClock(ClockId),

    #[error("cannot connect {actual} to input {port} of node {node}, expected {expected}")]
    TypeMismatch {
        node: NodeId,
        port: usize,
        expected: ConnectionType,
        actual: ConnectionType,
    },

    #[error("port {port} of node {node} is out of range (node has {arity})")]
    PortOutOfRange {
        node: NodeId,
        port: usize,
        arity: usize,
    },

    #[error("invalid clock ratio {0}: must be a positive rational")]
    InvalidRatio(String),

    #[error("moving group {group} below {parent} would create a cycle")]
    CyclicGroup { group: GroupId, parent: GroupId },

    #[error("group {0} still contains nodes or child groups")]
    GroupNotEmpty(GroupId),

    #[error("the root group cannot be removed or moved")]
    RootGroup,

    #[error("graph is frozen by an active simulation run")]
    GraphFrozen,

    #[error("structural error: {0}")]
    Structural(#[from] StructuralError),
}

/// Errors raised by the simulation engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("output {port} of node {node} is not part of the simulation")]
    UnknownPort { node: NodeId, port: usize },

    #[error("no pin named '{0}'")]
    UnknownPin(String),

    #[error("clock {0} is not part of the simulation")]
    UnknownClock(ClockId),

    #[error("node {0} is not an input pin")]
    NotAnInputPin(NodeId),

    #[error("node {0} is not a register")]
    NotARegister(NodeId),

    #[error("value has {actual} bits, signal has {expected}")]
    WidthMismatch { expected: usize, actual: usize },

    #[error("processes did not settle after {0} delta cycles")]
    DeltaCycleLimit(usize),
}

/// Errors raised while writing memory images or clock constraints.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("node {0} is not a memory")]
    NotAMemory(NodeId),

    #[error("{bits} content bits do not split into words of width {width}")]
    Shape { bits: usize, width: usize },

    #[error("port '{port}' is constrained to {existing} ns and to {conflicting} ns; give clock {clock} its own name")]
    ConflictingClock {
        port: String,
        clock: ClockId,
        existing: String,
        conflicting: String,
    },
}

impl From<StructuralError> for SimError {
    fn from(err: StructuralError) -> Self {
        SimError::Graph(GraphError::Structural(err))
    }
}
