//! Node definitions: port types, node kinds and the per-node record.
//!
//! Node kinds form a closed sum type. Everything the graph and the simulator
//! need to know about an operation (arity, port types, whether it holds state)
//! is answered by methods on [`NodeKind`], so dispatch stays exhaustive.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::ResetConfig;
use crate::sim::state::BitVectorState;
use crate::types::{ClockId, GroupId, NodeId, SignalGroupId};

/// How the bits of a port are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interpretation {
    Bool,
    Unsigned,
    Signed,
}

/// Shape of the signal carried by a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionType {
    pub width: usize,
    pub interpretation: Interpretation,
}

impl ConnectionType {
    pub fn bool() -> Self {
        Self {
            width: 1,
            interpretation: Interpretation::Bool,
        }
    }

    pub fn unsigned(width: usize) -> Self {
        Self {
            width,
            interpretation: Interpretation::Unsigned,
        }
    }

    pub fn signed(width: usize) -> Self {
        Self {
            width,
            interpretation: Interpretation::Signed,
        }
    }

    /// Whether an output of type `self` may drive an input of type `input`.
    pub fn is_compatible(&self, input: &ConnectionType) -> bool {
        self == input
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.interpretation {
            Interpretation::Bool => write!(f, "bool"),
            Interpretation::Unsigned => write!(f, "uint{}", self.width),
            Interpretation::Signed => write!(f, "sint{}", self.width),
        }
    }
}

/// A specific output (or input slot) of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodePort {
    pub node: NodeId,
    pub port: usize,
}

impl NodePort {
    pub fn new(node: NodeId, port: usize) -> Self {
        Self { node, port }
    }

    /// The first output of `node`.
    pub fn output(node: NodeId) -> Self {
        Self { node, port: 0 }
    }
}

impl fmt::Display for NodePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.port)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicOp {
    And,
    Nand,
    Or,
    Nor,
    Xor,
    Eq,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Gt,
    Leq,
    Geq,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinDirection {
    Input,
    Output,
}

/// Register input slots.
pub mod register {
    pub const DATA: usize = 0;
    pub const RESET_VALUE: usize = 1;
    pub const ENABLE: usize = 2;
}

/// Memory input slots.
pub mod memory {
    pub const READ_ADDR: usize = 0;
    pub const WRITE_ADDR: usize = 1;
    pub const WRITE_DATA: usize = 2;
    pub const WRITE_ENABLE: usize = 3;
}

/// The operation a node performs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Constant {
        value: BitVectorState,
        ty: ConnectionType,
    },
    /// Named external port of the design.
    Pin {
        name: String,
        direction: PinDirection,
        ty: ConnectionType,
    },
    /// Named, user-visible pass-through value.
    Signal { ty: ConnectionType },
    Logic { op: LogicOp, ty: ConnectionType },
    /// N-ary arithmetic; operands may be added after creation.
    Arithmetic {
        op: ArithmeticOp,
        ty: ConnectionType,
        operands: usize,
    },
    Compare { op: CompareOp, operand: ConnectionType },
    /// Selector followed by a growable list of data inputs.
    Multiplexer {
        selector: ConnectionType,
        ty: ConnectionType,
        inputs: usize,
    },
    /// Extracts `ty.width` bits starting at `offset`.
    Slice {
        offset: usize,
        input: ConnectionType,
        ty: ConnectionType,
    },
    /// Concatenates parts, part 0 lands in the least significant bits.
    Concat { parts: Vec<ConnectionType> },
    Register {
        ty: ConnectionType,
        /// Local override of the reset configuration inherited from the clock.
        reset: Option<ResetConfig>,
    },
    /// Word addressed storage with asynchronous read and clocked write.
    Memory {
        words: usize,
        ty: ConnectionType,
        init: BitVectorState,
    },
    /// Explicit marker for a path that crosses clock domains.
    ClockCrossing { ty: ConnectionType },
}

impl NodeKind {
    pub fn constant(value: u64, ty: ConnectionType) -> Self {
        NodeKind::Constant {
            value: BitVectorState::from_u64(value, ty.width),
            ty,
        }
    }

    pub fn input_pin(name: impl Into<String>, ty: ConnectionType) -> Self {
        NodeKind::Pin {
            name: name.into(),
            direction: PinDirection::Input,
            ty,
        }
    }

    pub fn output_pin(name: impl Into<String>, ty: ConnectionType) -> Self {
        NodeKind::Pin {
            name: name.into(),
            direction: PinDirection::Output,
            ty,
        }
    }

    pub fn logic(op: LogicOp, ty: ConnectionType) -> Self {
        NodeKind::Logic { op, ty }
    }

    pub fn arithmetic(op: ArithmeticOp, ty: ConnectionType) -> Self {
        NodeKind::Arithmetic { op, ty, operands: 2 }
    }

    pub fn compare(op: CompareOp, operand: ConnectionType) -> Self {
        NodeKind::Compare { op, operand }
    }

    pub fn multiplexer(selector: ConnectionType, ty: ConnectionType, inputs: usize) -> Self {
        NodeKind::Multiplexer { selector, ty, inputs }
    }

    pub fn register(ty: ConnectionType) -> Self {
        NodeKind::Register { ty, reset: None }
    }

    /// An undefined memory of `words` entries.
    pub fn memory(words: usize, ty: ConnectionType) -> Self {
        NodeKind::Memory {
            words,
            ty,
            init: BitVectorState::new(words * ty.width),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Constant { .. } => "const",
            NodeKind::Pin {
                direction: PinDirection::Input,
                ..
            } => "pin_in",
            NodeKind::Pin { .. } => "pin_out",
            NodeKind::Signal { .. } => "signal",
            NodeKind::Logic { op, .. } => match op {
                LogicOp::And => "and",
                LogicOp::Nand => "nand",
                LogicOp::Or => "or",
                LogicOp::Nor => "nor",
                LogicOp::Xor => "xor",
                LogicOp::Eq => "bitwise-equal",
                LogicOp::Not => "not",
            },
            NodeKind::Arithmetic { op, .. } => match op {
                ArithmeticOp::Add => "add",
                ArithmeticOp::Sub => "sub",
                ArithmeticOp::Mul => "mul",
                ArithmeticOp::Div => "div",
                ArithmeticOp::Rem => "remainder",
            },
            NodeKind::Compare { .. } => "compare",
            NodeKind::Multiplexer { .. } => "mux",
            NodeKind::Slice { .. } => "slice",
            NodeKind::Concat { .. } => "concat",
            NodeKind::Register { .. } => "register",
            NodeKind::Memory { .. } => "memory",
            NodeKind::ClockCrossing { .. } => "clock_crossing",
        }
    }

    pub fn num_inputs(&self) -> usize {
        match self {
            NodeKind::Constant { .. } => 0,
            NodeKind::Pin { direction, .. } => match direction {
                PinDirection::Input => 0,
                PinDirection::Output => 1,
            },
            NodeKind::Signal { .. } | NodeKind::ClockCrossing { .. } | NodeKind::Slice { .. } => 1,
            NodeKind::Logic { op: LogicOp::Not, .. } => 1,
            NodeKind::Logic { .. } | NodeKind::Compare { .. } => 2,
            NodeKind::Arithmetic { operands, .. } => *operands,
            NodeKind::Multiplexer { inputs, .. } => 1 + inputs,
            NodeKind::Concat { parts } => parts.len(),
            NodeKind::Register { .. } => 3,
            NodeKind::Memory { .. } => 4,
        }
    }

    pub fn num_outputs(&self) -> usize {
        match self {
            NodeKind::Pin {
                direction: PinDirection::Output,
                ..
            } => 0,
            _ => 1,
        }
    }

    /// Whether inputs may be appended after creation.
    pub fn has_dynamic_arity(&self) -> bool {
        matches!(
            self,
            NodeKind::Arithmetic { .. } | NodeKind::Multiplexer { .. }
        )
    }

    /// Appends one input slot. Returns false for fixed-arity kinds.
    pub(crate) fn grow_inputs(&mut self) -> bool {
        match self {
            NodeKind::Arithmetic { operands, .. } => {
                *operands += 1;
                true
            }
            NodeKind::Multiplexer { inputs, .. } => {
                *inputs += 1;
                true
            }
            _ => false,
        }
    }

    /// Address width of a memory with `words` entries.
    pub fn address_width(words: usize) -> usize {
        let mut width = 1;
        while (1usize << width) < words {
            width += 1;
        }
        width
    }

    /// Type an input slot expects from its driver.
    pub fn input_type(&self, port: usize) -> Option<ConnectionType> {
        if port >= self.num_inputs() {
            return None;
        }
        let ty = match self {
            NodeKind::Constant { .. } => return None,
            NodeKind::Pin { ty, .. }
            | NodeKind::Signal { ty }
            | NodeKind::ClockCrossing { ty }
            | NodeKind::Logic { ty, .. }
            | NodeKind::Arithmetic { ty, .. } => *ty,
            NodeKind::Compare { operand, .. } => *operand,
            NodeKind::Multiplexer { selector, ty, .. } => {
                if port == 0 {
                    *selector
                } else {
                    *ty
                }
            }
            NodeKind::Slice { input, .. } => *input,
            NodeKind::Concat { parts } => parts[port],
            NodeKind::Register { ty, .. } => match port {
                register::ENABLE => ConnectionType::bool(),
                _ => *ty,
            },
            NodeKind::Memory { words, ty, .. } => match port {
                memory::READ_ADDR | memory::WRITE_ADDR => {
                    ConnectionType::unsigned(Self::address_width(*words))
                }
                memory::WRITE_DATA => *ty,
                _ => ConnectionType::bool(),
            },
        };
        Some(ty)
    }

    pub fn output_type(&self, port: usize) -> Option<ConnectionType> {
        if port >= self.num_outputs() {
            return None;
        }
        let ty = match self {
            NodeKind::Constant { ty, .. }
            | NodeKind::Pin { ty, .. }
            | NodeKind::Signal { ty }
            | NodeKind::ClockCrossing { ty }
            | NodeKind::Logic { ty, .. }
            | NodeKind::Arithmetic { ty, .. }
            | NodeKind::Multiplexer { ty, .. }
            | NodeKind::Slice { ty, .. }
            | NodeKind::Register { ty, .. }
            | NodeKind::Memory { ty, .. } => *ty,
            NodeKind::Compare { .. } => ConnectionType::bool(),
            NodeKind::Concat { parts } => {
                ConnectionType::unsigned(parts.iter().map(|p| p.width).sum())
            }
        };
        Some(ty)
    }

    pub fn input_name(&self, port: usize) -> String {
        match self {
            NodeKind::Register { .. } => match port {
                register::DATA => "data_in",
                register::RESET_VALUE => "reset_value",
                register::ENABLE => "enable",
                _ => "invalid",
            }
            .to_string(),
            NodeKind::Memory { .. } => match port {
                memory::READ_ADDR => "read_addr",
                memory::WRITE_ADDR => "write_addr",
                memory::WRITE_DATA => "write_data",
                memory::WRITE_ENABLE => "write_enable",
                _ => "invalid",
            }
            .to_string(),
            NodeKind::Multiplexer { .. } => {
                if port == 0 {
                    "select".to_string()
                } else {
                    format!("in_{}", port - 1)
                }
            }
            NodeKind::Logic { .. } | NodeKind::Compare { .. } | NodeKind::Arithmetic { .. } => {
                ((b'a' + (port % 26) as u8) as char).to_string()
            }
            NodeKind::Concat { .. } => format!("part_{port}"),
            _ => "in".to_string(),
        }
    }

    /// Inputs that may stay unconnected without being marked floating.
    pub fn input_is_optional(&self, port: usize) -> bool {
        match self {
            NodeKind::Register { .. } => port == register::RESET_VALUE || port == register::ENABLE,
            NodeKind::Memory { .. } => port != memory::READ_ADDR,
            _ => false,
        }
    }

    /// Whether the node holds state advanced by clock edges.
    pub fn is_stateful(&self) -> bool {
        matches!(self, NodeKind::Register { .. } | NodeKind::Memory { .. })
    }

    /// Whether the outputs depend combinationally on the given input.
    ///
    /// Register inputs are only sampled on clock edges; a memory's read port
    /// is combinational but its write ports are not.
    pub fn output_depends_on_input(&self, port: usize) -> bool {
        match self {
            NodeKind::Register { .. } => false,
            NodeKind::Memory { .. } => port == memory::READ_ADDR,
            _ => true,
        }
    }

    /// Sizes of the internal state slots the simulator allocates.
    pub fn internal_state_sizes(&self) -> Vec<usize> {
        match self {
            // latched data, latched reset value, enable, in-reset flag
            NodeKind::Register { ty, .. } => vec![ty.width, ty.width, 1, 1],
            // content, staged write address, staged write data, staged write enable
            NodeKind::Memory { words, ty, .. } => {
                vec![words * ty.width, Self::address_width(*words), ty.width, 1]
            }
            _ => Vec::new(),
        }
    }

    /// Checks the kind's own shape constraints.
    pub fn assert_validity(&self) -> Result<(), String> {
        for port in 0..self.num_inputs() {
            if self.input_type(port).is_some_and(|ty| ty.width == 0) {
                return Err(format!("input {port} ({}) has zero width", self.input_name(port)));
            }
        }
        for port in 0..self.num_outputs() {
            if self.output_type(port).is_some_and(|ty| ty.width == 0) {
                return Err(format!("output {port} has zero width"));
            }
        }
        match self {
            NodeKind::Constant { value, ty } => {
                if value.len() != ty.width {
                    return Err(format!(
                        "constant has {} bits but type {}",
                        value.len(),
                        ty
                    ));
                }
            }
            NodeKind::Pin { name, .. } if name.is_empty() => {
                return Err("pin without a name".to_string());
            }
            NodeKind::Arithmetic { ty, operands, .. } => {
                if ty.interpretation == Interpretation::Bool {
                    return Err("arithmetic on booleans".to_string());
                }
                if *operands < 2 {
                    return Err(format!("arithmetic needs two operands, has {operands}"));
                }
            }
            NodeKind::Compare { op, operand } => {
                if operand.interpretation == Interpretation::Bool
                    && !matches!(op, CompareOp::Eq | CompareOp::Neq)
                {
                    return Err("ordering comparison on booleans".to_string());
                }
            }
            NodeKind::Multiplexer { selector, inputs, .. } => {
                if *inputs == 0 {
                    return Err("multiplexer without data inputs".to_string());
                }
                if selector.width < 64 && *inputs > (1usize << selector.width) {
                    return Err(format!(
                        "{} data inputs cannot be addressed by a {}-bit selector",
                        inputs, selector.width
                    ));
                }
            }
            NodeKind::Slice { offset, input, ty } => {
                if offset + ty.width > input.width {
                    return Err(format!(
                        "slice [{}..{}) exceeds input width {}",
                        offset,
                        offset + ty.width,
                        input.width
                    ));
                }
            }
            NodeKind::Concat { parts } if parts.is_empty() => {
                return Err("concat without parts".to_string());
            }
            NodeKind::Memory { words, ty, init } => {
                if *words == 0 {
                    return Err("memory without words".to_string());
                }
                if init.len() != words * ty.width {
                    return Err(format!(
                        "memory init has {} bits, expected {}",
                        init.len(),
                        words * ty.width
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Effective reset configuration for a stateful node attached to a clock.
    pub(crate) fn reset_override(&self) -> Option<ResetConfig> {
        match self {
            NodeKind::Register { reset, .. } => *reset,
            NodeKind::Memory { .. } => Some(ResetConfig::none()),
            _ => None,
        }
    }
}

/// A node record inside the circuit arena.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) name: Option<String>,
    pub(crate) comment: Option<String>,
    pub(crate) group: GroupId,
    pub(crate) group_slot: usize,
    pub(crate) signal_group: Option<SignalGroupId>,
    pub(crate) inputs: Vec<Option<NodePort>>,
    pub(crate) floating_allowed: Vec<bool>,
    /// Per output: the input slots it drives.
    pub(crate) consumers: Vec<Vec<NodePort>>,
    pub(crate) clock: Option<ClockId>,
    pub(crate) external_refs: u32,
}

impl Node {
    pub(crate) fn new(kind: NodeKind, group: GroupId, group_slot: usize) -> Self {
        let inputs = kind.num_inputs();
        let outputs = kind.num_outputs();
        Self {
            kind,
            name: None,
            comment: None,
            group,
            group_slot,
            signal_group: None,
            inputs: vec![None; inputs],
            floating_allowed: vec![false; inputs],
            consumers: vec![Vec::new(); outputs],
            clock: None,
            external_refs: 1,
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn signal_group(&self) -> Option<SignalGroupId> {
        self.signal_group
    }

    pub fn clock(&self) -> Option<ClockId> {
        self.clock
    }

    pub fn driver(&self, port: usize) -> Option<NodePort> {
        self.inputs.get(port).copied().flatten()
    }

    pub fn drivers(&self) -> &[Option<NodePort>] {
        &self.inputs
    }

    pub fn consumers(&self, port: usize) -> &[NodePort] {
        self.consumers.get(port).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_floating_allowed(&self, port: usize) -> bool {
        self.floating_allowed.get(port).copied().unwrap_or(false)
    }

    /// External owning handles plus input slots this node drives.
    pub fn ref_count(&self) -> usize {
        self.external_refs as usize + self.consumers.iter().map(Vec::len).sum::<usize>()
    }

    pub fn external_refs(&self) -> u32 {
        self.external_refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_type_compatibility() {
        assert!(ConnectionType::unsigned(8).is_compatible(&ConnectionType::unsigned(8)));
        assert!(!ConnectionType::unsigned(8).is_compatible(&ConnectionType::unsigned(4)));
        assert!(!ConnectionType::unsigned(1).is_compatible(&ConnectionType::bool()));
        assert!(!ConnectionType::signed(8).is_compatible(&ConnectionType::unsigned(8)));
    }

    #[test]
    fn test_register_ports() {
        let kind = NodeKind::register(ConnectionType::unsigned(8));
        assert_eq!(kind.num_inputs(), 3);
        assert_eq!(kind.input_type(register::ENABLE), Some(ConnectionType::bool()));
        assert_eq!(kind.input_name(register::RESET_VALUE), "reset_value");
        assert!(kind.is_stateful());
        assert!(!kind.output_depends_on_input(register::DATA));
        assert_eq!(kind.internal_state_sizes(), vec![8, 8, 1, 1]);
    }

    #[test]
    fn test_dynamic_arity() {
        let mut kind = NodeKind::arithmetic(ArithmeticOp::Add, ConnectionType::unsigned(4));
        assert!(kind.has_dynamic_arity());
        assert!(kind.grow_inputs());
        assert_eq!(kind.num_inputs(), 3);
        assert_eq!(kind.input_type(2), Some(ConnectionType::unsigned(4)));

        let mut fixed = NodeKind::logic(LogicOp::And, ConnectionType::bool());
        assert!(!fixed.grow_inputs());
    }

    #[test]
    fn test_memory_address_width() {
        assert_eq!(NodeKind::address_width(1), 1);
        assert_eq!(NodeKind::address_width(16), 4);
        assert_eq!(NodeKind::address_width(17), 5);
        let mem = NodeKind::memory(16, ConnectionType::unsigned(4));
        assert_eq!(mem.input_type(memory::READ_ADDR), Some(ConnectionType::unsigned(4)));
        assert!(mem.output_depends_on_input(memory::READ_ADDR));
        assert!(!mem.output_depends_on_input(memory::WRITE_DATA));
    }

    #[test]
    fn test_shape_validation() {
        let slice = NodeKind::Slice {
            offset: 4,
            input: ConnectionType::unsigned(8),
            ty: ConnectionType::unsigned(8),
        };
        assert!(slice.assert_validity().is_err());

        let mux = NodeKind::multiplexer(ConnectionType::bool(), ConnectionType::unsigned(8), 3);
        assert!(mux.assert_validity().is_err());

        let concat = NodeKind::Concat {
            parts: vec![ConnectionType::unsigned(3), ConnectionType::bool()],
        };
        assert_eq!(concat.output_type(0), Some(ConnectionType::unsigned(4)));
    }

    #[test]
    fn test_zero_width_ports_are_rejected() {
        let empty = ConnectionType::unsigned(0);
        let kinds = [
            NodeKind::constant(0, empty),
            NodeKind::input_pin("p", empty),
            NodeKind::output_pin("q", empty),
            NodeKind::Signal { ty: empty },
            NodeKind::arithmetic(ArithmeticOp::Add, empty),
            NodeKind::compare(CompareOp::Eq, empty),
            NodeKind::multiplexer(ConnectionType::bool(), empty, 2),
            NodeKind::memory(4, empty),
            NodeKind::Concat {
                parts: vec![ConnectionType::unsigned(3), empty],
            },
            NodeKind::Slice {
                offset: 0,
                input: ConnectionType::unsigned(8),
                ty: empty,
            },
        ];
        for kind in &kinds {
            assert!(kind.assert_validity().is_err(), "{} accepted zero width", kind.type_name());
        }
        assert!(NodeKind::constant(0, ConnectionType::unsigned(1)).assert_validity().is_ok());
    }

    #[test]
    fn test_output_pin_has_no_outputs() {
        let pin = NodeKind::output_pin("led", ConnectionType::bool());
        assert_eq!(pin.num_outputs(), 0);
        assert_eq!(pin.num_inputs(), 1);
        assert_eq!(pin.output_type(0), None);
    }
}
