//! Per-node simulation behavior.
//!
//! Every node kind maps its inputs to its outputs inside the shared state
//! buffer. Offsets are assigned once by the compiler; unconnected inputs
//! read as fully undefined.

use num_bigint::{BigInt, BigUint};
use num_traits::Zero;

use super::state::{mask, BitVectorState, Plane};
use crate::graph::node::{
    memory, register, ArithmeticOp, CompareOp, ConnectionType, Interpretation, LogicOp, NodeKind,
    PinDirection,
};

/// Offsets of one node's ports and internal state in the state buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct NodeSlots {
    /// Offset of the driving output per input, if connected.
    pub inputs: Vec<Option<usize>>,
    pub outputs: Vec<usize>,
    pub internal: Vec<usize>,
}

/// Register internal slots.
pub(crate) mod reg_state {
    pub const DATA: usize = 0;
    pub const RESET_VALUE: usize = 1;
    pub const ENABLE: usize = 2;
    pub const IN_RESET: usize = 3;
}

/// Memory internal slots.
pub(crate) mod mem_state {
    pub const CONTENT: usize = 0;
    pub const WRITE_ADDR: usize = 1;
    pub const WRITE_DATA: usize = 2;
    pub const WRITE_ENABLE: usize = 3;
}

const CHUNK: usize = 64;

/// Reads `size` (<= 64) bits of an input at `pos`; unconnected reads undefined.
fn read(state: &BitVectorState, input: Option<usize>, pos: usize, size: usize) -> (u64, u64) {
    match input {
        Some(offset) => (
            state.extract(Plane::Value, offset + pos, size),
            state.extract(Plane::Defined, offset + pos, size),
        ),
        None => (0, 0),
    }
}

fn write(state: &mut BitVectorState, offset: usize, size: usize, value: u64, defined: u64) {
    state.insert(Plane::Value, offset, size, value & defined);
    state.insert(Plane::Defined, offset, size, defined);
}

fn set_undefined(state: &mut BitVectorState, offset: usize, size: usize) {
    state.set_range(Plane::Value, offset, size, false);
    state.set_range(Plane::Defined, offset, size, false);
}

/// Copies an input onto an output, undefined if unconnected.
fn pass_through(state: &mut BitVectorState, input: Option<usize>, output: usize, size: usize) {
    match input {
        Some(src) => state.copy_within(output, src, size),
        None => set_undefined(state, output, size),
    }
}

fn input_defined(state: &BitVectorState, input: Option<usize>, size: usize) -> bool {
    input.is_some_and(|offset| state.all_defined(offset, size))
}

/// Reads a small unsigned input, `None` if any bit is undefined.
fn read_index(state: &BitVectorState, input: Option<usize>, size: usize) -> Option<u64> {
    let offset = input?;
    if !state.all_defined(offset, size) {
        return None;
    }
    if size > CHUNK {
        // only the low word can address anything
        if state.any_set(offset + CHUNK, size - CHUNK) {
            return Some(u64::MAX);
        }
        return Some(state.extract(Plane::Value, offset, CHUNK));
    }
    Some(state.extract(Plane::Value, offset, size))
}

fn logic_chunk(op: LogicOp, l: u64, ld: u64, r: u64, rd: u64) -> (u64, u64) {
    match op {
        LogicOp::And => (l & r, (ld & !l) | (rd & !r) | (ld & rd)),
        LogicOp::Nand => (!(l & r), (ld & !l) | (rd & !r) | (ld & rd)),
        LogicOp::Or => (l | r, (ld & l) | (rd & r) | (ld & rd)),
        LogicOp::Nor => (!(l | r), (ld & l) | (rd & r) | (ld & rd)),
        LogicOp::Xor => (l ^ r, ld & rd),
        LogicOp::Eq => (!(l ^ r), ld & rd),
        LogicOp::Not => (!l, ld),
    }
}

fn sign_extend(value: u64, width: usize) -> i64 {
    if width >= CHUNK {
        return value as i64;
    }
    let shift = CHUNK - width;
    ((value << shift) as i64) >> shift
}

fn to_signed(value: BigUint, width: usize) -> BigInt {
    if width > 0 && value.bit(width as u64 - 1) {
        BigInt::from(value) - (BigInt::from(1u8) << width)
    } else {
        BigInt::from(value)
    }
}

fn from_signed(value: BigInt, width: usize) -> BigUint {
    let modulus = BigInt::from(1u8) << width;
    let wrapped = ((value % &modulus) + &modulus) % &modulus;
    wrapped.to_biguint().unwrap_or_default()
}

/// Folds `op` over operands of at most 64 bits. `None` on division by zero.
fn arithmetic_small(op: ArithmeticOp, ty: ConnectionType, operands: &[u64]) -> Option<u64> {
    let width = ty.width;
    let signed = ty.interpretation == Interpretation::Signed;
    let (&first, rest) = operands.split_first()?;
    let mut acc = first;
    for &rhs in rest {
        acc = match op {
            ArithmeticOp::Add => acc.wrapping_add(rhs),
            ArithmeticOp::Sub => acc.wrapping_sub(rhs),
            ArithmeticOp::Mul => acc.wrapping_mul(rhs),
            ArithmeticOp::Div | ArithmeticOp::Rem => {
                if rhs & mask(width) == 0 {
                    return None;
                }
                if signed {
                    let (a, b) = (sign_extend(acc, width), sign_extend(rhs, width));
                    if op == ArithmeticOp::Div {
                        a.wrapping_div(b) as u64
                    } else {
                        a.wrapping_rem(b) as u64
                    }
                } else if op == ArithmeticOp::Div {
                    (acc & mask(width)) / (rhs & mask(width))
                } else {
                    (acc & mask(width)) % (rhs & mask(width))
                }
            }
        };
        acc &= mask(width);
    }
    Some(acc)
}

/// Folds `op` over wide operands. `None` on division by zero.
fn arithmetic_wide(op: ArithmeticOp, ty: ConnectionType, operands: Vec<BigUint>) -> Option<BigUint> {
    let width = ty.width;
    let modulus = BigUint::from(1u8) << width;
    let signed = ty.interpretation == Interpretation::Signed;
    let mut iter = operands.into_iter();
    let mut acc = iter.next()?;
    for rhs in iter {
        acc = match op {
            ArithmeticOp::Add => (acc + rhs) % &modulus,
            ArithmeticOp::Sub => (acc + &modulus - rhs) % &modulus,
            ArithmeticOp::Mul => (acc * rhs) % &modulus,
            ArithmeticOp::Div | ArithmeticOp::Rem => {
                if rhs.is_zero() {
                    return None;
                }
                if signed {
                    let (a, b) = (to_signed(acc, width), to_signed(rhs, width));
                    let result = if op == ArithmeticOp::Div { a / b } else { a % b };
                    from_signed(result, width)
                } else if op == ArithmeticOp::Div {
                    acc / rhs
                } else {
                    acc % rhs
                }
            }
        };
    }
    Some(acc)
}

fn compare_values(op: CompareOp, ord: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        CompareOp::Eq => ord == Equal,
        CompareOp::Neq => ord != Equal,
        CompareOp::Lt => ord == Less,
        CompareOp::Gt => ord == Greater,
        CompareOp::Leq => ord != Greater,
        CompareOp::Geq => ord != Less,
    }
}

impl BitVectorState {
    /// Whether any value bit in the range is set.
    pub(crate) fn any_set(&self, offset: usize, size: usize) -> bool {
        let mut pos = 0;
        while pos < size {
            let chunk = (size - pos).min(CHUNK);
            if self.extract(Plane::Value, offset + pos, chunk) != 0 {
                return true;
            }
            pos += chunk;
        }
        false
    }
}

impl NodeKind {
    /// Initial contents of outputs and internal state before the first evaluation.
    pub(crate) fn simulate_reset(&self, state: &mut BitVectorState, slots: &NodeSlots) {
        for (port, &offset) in slots.outputs.iter().enumerate() {
            if let Some(ty) = self.output_type(port) {
                set_undefined(state, offset, ty.width);
            }
        }
        for (slot, size) in self.internal_state_sizes().into_iter().enumerate() {
            set_undefined(state, slots.internal[slot], size);
        }
        match self {
            NodeKind::Constant { value, .. } => state.insert_state(slots.outputs[0], value),
            NodeKind::Memory { init, .. } => {
                state.insert_state(slots.internal[mem_state::CONTENT], init);
            }
            _ => {}
        }
    }

    /// Combinational evaluation: outputs from current inputs and internal state.
    pub(crate) fn simulate_evaluate(&self, state: &mut BitVectorState, slots: &NodeSlots) {
        match self {
            NodeKind::Constant { .. } | NodeKind::Register { .. } => {}
            NodeKind::Pin { direction, .. } => {
                // input pins hold whatever the testbench drove
                debug_assert!(*direction == PinDirection::Input || slots.outputs.is_empty());
            }
            NodeKind::Signal { ty } | NodeKind::ClockCrossing { ty } => {
                pass_through(state, slots.inputs[0], slots.outputs[0], ty.width);
            }
            NodeKind::Logic { op, ty } => evaluate_logic(*op, *ty, state, slots),
            NodeKind::Arithmetic { op, ty, .. } => evaluate_arithmetic(*op, *ty, state, slots),
            NodeKind::Compare { op, operand } => evaluate_compare(*op, *operand, state, slots),
            NodeKind::Multiplexer { selector, ty, inputs } => {
                evaluate_mux(*selector, *ty, *inputs, state, slots)
            }
            NodeKind::Slice { offset, ty, .. } => match slots.inputs[0] {
                Some(src) => state.copy_within(slots.outputs[0], src + offset, ty.width),
                None => set_undefined(state, slots.outputs[0], ty.width),
            },
            NodeKind::Concat { parts } => {
                let mut pos = 0;
                for (port, part) in parts.iter().enumerate() {
                    pass_through(state, slots.inputs[port], slots.outputs[0] + pos, part.width);
                    pos += part.width;
                }
            }
            NodeKind::Memory { words, ty, .. } => {
                let addr_width = NodeKind::address_width(*words);
                let out = slots.outputs[0];
                match read_index(state, slots.inputs[memory::READ_ADDR], addr_width) {
                    Some(addr) if (addr as usize) < *words => {
                        let content = slots.internal[mem_state::CONTENT];
                        state.copy_within(out, content + addr as usize * ty.width, ty.width);
                    }
                    _ => set_undefined(state, out, ty.width),
                }
            }
        }
    }

    /// Samples the inputs a clock edge will commit.
    ///
    /// All triggered nodes sample before any of them commits, so registers
    /// sharing an edge see each other's pre-edge outputs.
    pub(crate) fn simulate_sample(&self, state: &mut BitVectorState, slots: &NodeSlots, in_reset: bool) {
        match self {
            NodeKind::Register { ty, .. } => {
                let internal = &slots.internal;
                pass_through(state, slots.inputs[register::DATA], internal[reg_state::DATA], ty.width);
                pass_through(
                    state,
                    slots.inputs[register::RESET_VALUE],
                    internal[reg_state::RESET_VALUE],
                    ty.width,
                );
                match slots.inputs[register::ENABLE] {
                    Some(src) => state.copy_within(internal[reg_state::ENABLE], src, 1),
                    // an unconnected enable means always enabled
                    None => write(state, internal[reg_state::ENABLE], 1, 1, 1),
                }
                let has_reset = slots.inputs[register::RESET_VALUE].is_some();
                write(state, internal[reg_state::IN_RESET], 1, u64::from(in_reset && has_reset), 1);
            }
            NodeKind::Memory { words, ty, .. } => {
                let internal = &slots.internal;
                let addr_width = NodeKind::address_width(*words);
                pass_through(
                    state,
                    slots.inputs[memory::WRITE_ADDR],
                    internal[mem_state::WRITE_ADDR],
                    addr_width,
                );
                pass_through(
                    state,
                    slots.inputs[memory::WRITE_DATA],
                    internal[mem_state::WRITE_DATA],
                    ty.width,
                );
                match slots.inputs[memory::WRITE_ENABLE] {
                    Some(src) => state.copy_within(internal[mem_state::WRITE_ENABLE], src, 1),
                    None => write(state, internal[mem_state::WRITE_ENABLE], 1, 0, 1),
                }
            }
            _ => {}
        }
    }

    /// Applies sampled state on a clock edge.
    pub(crate) fn simulate_commit(&self, state: &mut BitVectorState, slots: &NodeSlots) {
        match self {
            NodeKind::Register { ty, .. } => {
                let internal = &slots.internal;
                let out = slots.outputs[0];
                let (in_reset, _) = read(state, Some(internal[reg_state::IN_RESET]), 0, 1);
                if in_reset == 1 {
                    state.copy_within(out, internal[reg_state::RESET_VALUE], ty.width);
                    return;
                }
                let (enable, enable_defined) = read(state, Some(internal[reg_state::ENABLE]), 0, 1);
                match (enable_defined, enable) {
                    (0, _) => set_undefined(state, out, ty.width),
                    (_, 1) => state.copy_within(out, internal[reg_state::DATA], ty.width),
                    _ => {}
                }
            }
            NodeKind::Memory { words, ty, .. } => {
                let internal = &slots.internal;
                let content = internal[mem_state::CONTENT];
                let (enable, enable_defined) =
                    read(state, Some(internal[mem_state::WRITE_ENABLE]), 0, 1);
                if enable_defined == 1 && enable == 0 {
                    return;
                }
                let addr_width = NodeKind::address_width(*words);
                match read_index(state, Some(internal[mem_state::WRITE_ADDR]), addr_width) {
                    Some(addr) if (addr as usize) < *words => {
                        let word = content + addr as usize * ty.width;
                        if enable_defined == 1 {
                            state.copy_within(word, internal[mem_state::WRITE_DATA], ty.width);
                        } else {
                            set_undefined(state, word, ty.width);
                        }
                    }
                    // write to an unknown address may have hit any word
                    None => set_undefined(state, content, words * ty.width),
                    Some(_) => {}
                }
            }
            _ => {}
        }
    }

    /// Power-on value of a register: its reset value, or undefined without one.
    pub(crate) fn simulate_power_on(&self, state: &mut BitVectorState, slots: &NodeSlots) {
        if let NodeKind::Register { ty, .. } = self {
            pass_through(state, slots.inputs[register::RESET_VALUE], slots.outputs[0], ty.width);
        }
    }

    /// Asynchronous reset assertion forces the reset value immediately.
    pub(crate) fn simulate_async_reset(&self, state: &mut BitVectorState, slots: &NodeSlots) {
        if let NodeKind::Register { ty, .. } = self {
            if let Some(src) = slots.inputs[register::RESET_VALUE] {
                state.copy_within(slots.outputs[0], src, ty.width);
            }
        }
    }
}

fn evaluate_logic(op: LogicOp, ty: ConnectionType, state: &mut BitVectorState, slots: &NodeSlots) {
    let rhs = slots.inputs.get(1).copied().flatten();
    let mut pos = 0;
    while pos < ty.width {
        let size = (ty.width - pos).min(CHUNK);
        let (l, ld) = read(state, slots.inputs[0], pos, size);
        let (r, rd) = read(state, rhs, pos, size);
        let (value, defined) = logic_chunk(op, l, ld, r, rd);
        write(state, slots.outputs[0] + pos, size, value, defined);
        pos += size;
    }
}

fn evaluate_arithmetic(op: ArithmeticOp, ty: ConnectionType, state: &mut BitVectorState, slots: &NodeSlots) {
    let out = slots.outputs[0];
    let width = ty.width;

    // lowest undefined bit over all operands; results below it are exact
    let mut defined_bits = width;
    for input in &slots.inputs {
        let first = match input {
            Some(offset) => state.first_undefined(*offset, width),
            None => Some(0),
        };
        if let Some(bit) = first {
            defined_bits = defined_bits.min(bit);
        }
    }
    let bit_sliceable = matches!(op, ArithmeticOp::Add | ArithmeticOp::Sub | ArithmeticOp::Mul);
    if defined_bits == 0 || (!bit_sliceable && defined_bits < width) {
        set_undefined(state, out, width);
        return;
    }

    if width <= CHUNK {
        let operands: Vec<u64> = slots
            .inputs
            .iter()
            .map(|input| read(state, *input, 0, width).0 & mask(defined_bits))
            .collect();
        match arithmetic_small(op, ty, &operands) {
            Some(value) => {
                set_undefined(state, out, width);
                write(state, out, defined_bits, value, mask(defined_bits));
            }
            None => set_undefined(state, out, width),
        }
        return;
    }

    let operands: Vec<BigUint> = slots
        .inputs
        .iter()
        .map(|input| match input {
            Some(offset) => {
                let mut masked = state.extract_state(*offset, defined_bits);
                masked.resize(width);
                masked.set_range(Plane::Value, defined_bits, width - defined_bits, false);
                masked.extract_biguint(0, width)
            }
            None => BigUint::default(),
        })
        .collect();
    match arithmetic_wide(op, ty, operands) {
        Some(value) => {
            set_undefined(state, out, width);
            state.insert_biguint(out, defined_bits, &value);
            state.set_range(Plane::Defined, out, defined_bits, true);
        }
        None => set_undefined(state, out, width),
    }
}

fn evaluate_compare(op: CompareOp, operand: ConnectionType, state: &mut BitVectorState, slots: &NodeSlots) {
    let out = slots.outputs[0];
    let width = operand.width;
    let (lhs, rhs) = (slots.inputs[0], slots.inputs[1]);
    let (Some(l), Some(r)) = (lhs, rhs) else {
        set_undefined(state, out, 1);
        return;
    };
    if !input_defined(state, lhs, width) || !input_defined(state, rhs, width) {
        set_undefined(state, out, 1);
        return;
    }
    let ord = if operand.interpretation == Interpretation::Signed {
        to_signed(state.extract_biguint(l, width), width)
            .cmp(&to_signed(state.extract_biguint(r, width), width))
    } else {
        state.extract_biguint(l, width).cmp(&state.extract_biguint(r, width))
    };
    write(state, out, 1, u64::from(compare_values(op, ord)), 1);
}

fn evaluate_mux(
    selector: ConnectionType,
    ty: ConnectionType,
    inputs: usize,
    state: &mut BitVectorState,
    slots: &NodeSlots,
) {
    let out = slots.outputs[0];
    if let Some(sel) = read_index(state, slots.inputs[0], selector.width) {
        match usize::try_from(sel) {
            Ok(sel) if sel < inputs => pass_through(state, slots.inputs[1 + sel], out, ty.width),
            _ => set_undefined(state, out, ty.width),
        }
        return;
    }

    // unknown selector: a bit is known only where every input agrees on it
    let mut pos = 0;
    while pos < ty.width {
        let size = (ty.width - pos).min(CHUNK);
        let (first, mut defined) = read(state, slots.inputs[1], pos, size);
        for input in &slots.inputs[2..] {
            let (value, value_defined) = read(state, *input, pos, size);
            defined &= value_defined & !(value ^ first);
        }
        write(state, out + pos, size, first, defined);
        pos += size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(inputs: &[usize], output: usize) -> NodeSlots {
        NodeSlots {
            inputs: inputs.iter().map(|&o| Some(o)).collect(),
            outputs: vec![output],
            internal: Vec::new(),
        }
    }

    fn bits(s: &str) -> BitVectorState {
        BitVectorState::from_bit_str(s).unwrap()
    }

    /// Evaluates a two-input node whose operands sit at offsets 0 and `w`.
    fn eval2(kind: &NodeKind, a: &str, b: &str) -> String {
        let w = a.len();
        let out_w = kind.output_type(0).unwrap().width;
        let mut state = BitVectorState::new(2 * w + out_w);
        state.insert_state(0, &bits(a));
        state.insert_state(w, &bits(b));
        kind.simulate_evaluate(&mut state, &slots(&[0, w], 2 * w));
        state.extract_state(2 * w, out_w).to_string()
    }

    #[test]
    fn test_and_or_undefined_table() {
        let and = NodeKind::logic(LogicOp::And, ConnectionType::unsigned(4));
        assert_eq!(eval2(&and, "x0x1", "0x1x"), "00XX");
        let or = NodeKind::logic(LogicOp::Or, ConnectionType::unsigned(4));
        assert_eq!(eval2(&or, "x0x1", "1x0x"), "1XX1");
        let xor = NodeKind::logic(LogicOp::Xor, ConnectionType::unsigned(4));
        assert_eq!(eval2(&xor, "x011", "0101"), "X110");
    }

    #[test]
    fn test_add_keeps_bits_below_first_undefined() {
        let add = NodeKind::arithmetic(ArithmeticOp::Add, ConnectionType::unsigned(8));
        assert_eq!(eval2(&add, "00000101", "00001010"), "00001111");
        assert_eq!(eval2(&add, "0000x101", "00000001"), "XXXXX110");
        assert_eq!(eval2(&add, "11111111", "00000001"), "00000000");
    }

    #[test]
    fn test_division_rules() {
        let div = NodeKind::arithmetic(ArithmeticOp::Div, ConnectionType::unsigned(4));
        assert_eq!(eval2(&div, "1001", "0010"), "0100");
        assert_eq!(eval2(&div, "1001", "0000"), "XXXX");
        assert_eq!(eval2(&div, "100x", "0001"), "XXXX");

        let sdiv = NodeKind::arithmetic(ArithmeticOp::Div, ConnectionType::signed(4));
        // -6 / 2 = -3
        assert_eq!(eval2(&sdiv, "1010", "0010"), "1101");
        let srem = NodeKind::arithmetic(ArithmeticOp::Rem, ConnectionType::signed(4));
        // -7 % 2 = -1
        assert_eq!(eval2(&srem, "1001", "0010"), "1111");
    }

    #[test]
    fn test_wide_arithmetic() {
        let ty = ConnectionType::unsigned(100);
        let add = NodeKind::arithmetic(ArithmeticOp::Add, ty);
        let mut state = BitVectorState::new(300);
        let a = BigUint::from(1u8) << 80u32;
        let b = BigUint::from(3u8);
        state.insert_state(0, &BitVectorState::from_biguint(&a, 100));
        state.insert_state(100, &BitVectorState::from_biguint(&b, 100));
        add.simulate_evaluate(&mut state, &slots(&[0, 100], 200));
        assert!(state.all_defined(200, 100));
        assert_eq!(state.extract_biguint(200, 100), a + b);
    }

    #[test]
    fn test_compare_signed_and_undefined() {
        let lt = NodeKind::compare(CompareOp::Lt, ConnectionType::signed(4));
        assert_eq!(eval2(&lt, "1111", "0001"), "1");
        let ult = NodeKind::compare(CompareOp::Lt, ConnectionType::unsigned(4));
        assert_eq!(eval2(&ult, "1111", "0001"), "0");
        assert_eq!(eval2(&ult, "111x", "0001"), "X");
    }

    #[test]
    fn test_mux_with_unknown_selector() {
        let mux = NodeKind::multiplexer(ConnectionType::bool(), ConnectionType::unsigned(4), 2);
        let mut state = BitVectorState::new(1 + 4 + 4 + 4);
        state.insert_state(1, &bits("1100"));
        state.insert_state(5, &bits("1010"));
        let slots = slots(&[0, 1, 5], 9);
        mux.simulate_evaluate(&mut state, &slots);
        assert_eq!(state.extract_state(9, 4).to_string(), "1XX0");

        state.insert_state(0, &bits("1"));
        mux.simulate_evaluate(&mut state, &slots);
        assert_eq!(state.extract_state(9, 4).to_string(), "1010");
    }

    #[test]
    fn test_register_sample_commit() {
        let reg = NodeKind::register(ConnectionType::unsigned(4));
        // data@0, reset@4, out@8, internals from 12
        let slots = NodeSlots {
            inputs: vec![Some(0), Some(4), None],
            outputs: vec![8],
            internal: vec![12, 16, 20, 21],
        };
        let mut state = BitVectorState::new(22);
        state.insert_state(0, &bits("0110"));
        state.insert_state(4, &bits("0001"));
        reg.simulate_reset(&mut state, &slots);
        reg.simulate_power_on(&mut state, &slots);
        assert_eq!(state.extract_state(8, 4).to_string(), "0001");

        reg.simulate_sample(&mut state, &slots, false);
        reg.simulate_commit(&mut state, &slots);
        assert_eq!(state.extract_state(8, 4).to_string(), "0110");

        reg.simulate_sample(&mut state, &slots, true);
        reg.simulate_commit(&mut state, &slots);
        assert_eq!(state.extract_state(8, 4).to_string(), "0001");
    }
}
