//! End-to-end simulation tests.

use std::cell::RefCell;
use std::rc::Rc;

use kairo::{
    ArithmeticOp, BitVectorState, Circuit, ClockId, ClockRational, ConnectionType, EdgeConfig,
    LogicOp, MemoryTraceSink, NodeId, NodeKind, NodePort, ResetActive, ResetConfig, RunLimit,
    RunOutcome, SimError, SimPhase, SimulationParams, Simulator, Steps, TriggerEvent, Wait,
};

fn u8t() -> ConnectionType {
    ConnectionType::unsigned(8)
}

fn out(node: NodeId) -> NodePort {
    NodePort::output(node)
}

fn x(width: usize) -> BitVectorState {
    BitVectorState::new(width)
}

/// Two input pins feeding registers `a` and `b`, their sum, and an
/// accumulator `c` that loads the sum or adds 42 to itself.
struct Accumulator {
    circuit: Circuit,
    clk: ClockId,
    sum: NodeId,
    acc: NodeId,
    reg_a: NodeId,
}

fn accumulator() -> Accumulator {
    let mut circuit = Circuit::new();
    let top = circuit.root_group();
    let clk = circuit
        .create_clock("clk", ClockRational::from_integer(10_000))
        .unwrap();

    let in_a = circuit.create_node(NodeKind::input_pin("in_a", u8t()), top).unwrap();
    let in_b = circuit.create_node(NodeKind::input_pin("in_b", u8t()), top).unwrap();
    let load = circuit
        .create_node(NodeKind::input_pin("load", ConnectionType::bool()), top)
        .unwrap();

    let reg_a = circuit.create_named_node(NodeKind::register(u8t()), top, "a").unwrap();
    let reg_b = circuit.create_named_node(NodeKind::register(u8t()), top, "b").unwrap();
    circuit.connect_input(reg_a, 0, out(in_a)).unwrap();
    circuit.connect_input(reg_b, 0, out(in_b)).unwrap();

    let sum = circuit
        .create_named_node(NodeKind::arithmetic(ArithmeticOp::Add, u8t()), top, "sum")
        .unwrap();
    circuit.connect_input(sum, 0, out(reg_a)).unwrap();
    circuit.connect_input(sum, 1, out(reg_b)).unwrap();

    let acc = circuit.create_named_node(NodeKind::register(u8t()), top, "c").unwrap();
    let k42 = circuit.create_node(NodeKind::constant(42, u8t()), top).unwrap();
    let plus = circuit
        .create_node(NodeKind::arithmetic(ArithmeticOp::Add, u8t()), top)
        .unwrap();
    circuit.connect_input(plus, 0, out(acc)).unwrap();
    circuit.connect_input(plus, 1, out(k42)).unwrap();

    let mux = circuit
        .create_node(NodeKind::multiplexer(ConnectionType::bool(), u8t(), 2), top)
        .unwrap();
    circuit.connect_input(mux, 0, out(load)).unwrap();
    circuit.connect_input(mux, 1, out(plus)).unwrap();
    circuit.connect_input(mux, 2, out(sum)).unwrap();
    circuit.connect_input(acc, 0, out(mux)).unwrap();

    let result = circuit.create_node(NodeKind::output_pin("result", u8t()), top).unwrap();
    circuit.connect_input(result, 0, out(acc)).unwrap();

    for reg in [reg_a, reg_b, acc] {
        circuit.attach_clock(reg, clk).unwrap();
    }
    Accumulator {
        circuit,
        clk,
        sum,
        acc,
        reg_a,
    }
}

#[test]
fn test_accumulator_scenario() {
    let design = accumulator();
    let (clk, sum, acc, reg_a) = (design.clk, design.sum, design.acc, design.reg_a);
    let mut sim = Simulator::new(&design.circuit, SimulationParams::default()).unwrap();
    let trace = MemoryTraceSink::new();
    sim.attach_trace(Box::new(trace.clone()));

    let tb = Steps::new()
        .then(move |ctx| {
            assert_eq!(ctx.read(out(reg_a)).unwrap(), x(8));
            assert!(!ctx.read(out(sum)).unwrap().is_fully_defined());
            ctx.drive_pin("in_a", 5).unwrap();
            ctx.drive_pin("in_b", 10).unwrap();
            ctx.drive_pin("load", 1).unwrap();
            Wait::Clock(clk)
        })
        .then(move |ctx| {
            ctx.expect_u64(out(sum), 15, "a + b").unwrap();
            Wait::Clock(clk)
        })
        .then(move |ctx| {
            ctx.expect_u64(out(acc), 15, "load").unwrap();
            ctx.drive_pin("load", 0).unwrap();
            Wait::Clock(clk)
        })
        .then(move |ctx| {
            ctx.expect_u64(out(acc), 57, "c += 42").unwrap();
            Wait::Done
        });
    sim.add_process("tb", tb);

    assert_eq!(sim.run(RunLimit::Unbounded).unwrap(), RunOutcome::Idle);
    assert!(sim.failures().is_empty(), "{:?}", sim.failures());
    assert_eq!(sim.now(), ClockRational::new(3, 10_000));
    assert_eq!(sim.read_pin("result").unwrap().to_u64(), Some(57));

    let history = trace.history("sum");
    assert_eq!(history[0], (ClockRational::from_integer(0), x(8)));
    assert_eq!(history[1].0, ClockRational::new(1, 10_000));
    assert_eq!(history[1].1.to_u64(), Some(15));
}

#[test]
fn test_undefined_propagation_through_gates() {
    let mut circuit = Circuit::new();
    let top = circuit.root_group();
    let b1 = ConnectionType::bool();
    let a = circuit.create_node(NodeKind::input_pin("a", b1), top).unwrap();
    let b = circuit.create_node(NodeKind::input_pin("b", b1), top).unwrap();
    let and = circuit.create_node(NodeKind::logic(LogicOp::And, b1), top).unwrap();
    let or = circuit.create_node(NodeKind::logic(LogicOp::Or, b1), top).unwrap();
    let xor = circuit.create_node(NodeKind::logic(LogicOp::Xor, b1), top).unwrap();
    for gate in [and, or, xor] {
        circuit.connect_input(gate, 0, out(a)).unwrap();
        circuit.connect_input(gate, 1, out(b)).unwrap();
    }

    // b is never driven and stays undefined
    let mut sim = Simulator::new(&circuit, SimulationParams::default()).unwrap();
    sim.drive_u64(a, 0).unwrap();
    assert_eq!(sim.read_u64(out(and)).unwrap(), Some(0));
    assert_eq!(sim.read(out(or)).unwrap(), x(1));
    assert_eq!(sim.read(out(xor)).unwrap(), x(1));

    sim.drive_u64(a, 1).unwrap();
    assert_eq!(sim.read(out(and)).unwrap(), x(1));
    assert_eq!(sim.read_u64(out(or)).unwrap(), Some(1));
    assert_eq!(sim.read(out(xor)).unwrap(), x(1));

    sim.drive(a, x(1)).unwrap();
    assert_eq!(sim.read(out(and)).unwrap(), x(1));
    assert_eq!(sim.read(out(or)).unwrap(), x(1));
}

/// Register with reset value 0xA5 and data from pin `d`.
fn reset_register(reset: ResetConfig) -> (Circuit, ClockId, NodeId, NodeId) {
    let mut circuit = Circuit::new();
    let top = circuit.root_group();
    let clk = circuit
        .create_clock("clk", ClockRational::from_integer(1_000))
        .unwrap();
    circuit.set_clock_reset(clk, reset).unwrap();
    let d = circuit.create_node(NodeKind::input_pin("d", u8t()), top).unwrap();
    let init = circuit.create_node(NodeKind::constant(0xA5, u8t()), top).unwrap();
    let reg = circuit.create_named_node(NodeKind::register(u8t()), top, "r").unwrap();
    circuit.connect_input(reg, 0, out(d)).unwrap();
    circuit.connect_input(reg, 1, out(init)).unwrap();
    circuit.attach_clock(reg, clk).unwrap();
    (circuit, clk, d, reg)
}

fn one_ms() -> ClockRational {
    ClockRational::new(1, 1_000)
}

#[test]
fn test_register_holds_reset_value_while_reset_asserted() {
    let (circuit, clk, d, reg) = reset_register(ResetConfig::synchronous());
    let mut sim = Simulator::new(&circuit, SimulationParams::default()).unwrap();
    sim.drive_u64(d, 0x11).unwrap();
    sim.run(RunLimit::Duration(one_ms())).unwrap();
    assert_eq!(sim.read_u64(out(reg)).unwrap(), Some(0x11));

    sim.set_reset(clk, true).unwrap();
    // synchronous: nothing happens before the next edge
    assert_eq!(sim.read_u64(out(reg)).unwrap(), Some(0x11));
    for _ in 0..2 {
        sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
        assert_eq!(sim.read_u64(out(reg)).unwrap(), Some(0xA5));
    }

    sim.set_reset(clk, false).unwrap();
    sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
    assert_eq!(sim.read_u64(out(reg)).unwrap(), Some(0x11));
    assert_eq!(sim.active_edges(clk).unwrap(), 4);
}

#[test]
fn test_asynchronous_reset_applies_immediately() {
    let (circuit, clk, d, reg) = reset_register(ResetConfig::asynchronous());
    let mut sim = Simulator::new(&circuit, SimulationParams::default()).unwrap();
    sim.drive_u64(d, 0x11).unwrap();
    sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
    assert_eq!(sim.read_u64(out(reg)).unwrap(), Some(0x11));

    sim.set_reset(clk, true).unwrap();
    assert!(sim.reset_asserted(clk).unwrap());
    assert_eq!(sim.read_u64(out(reg)).unwrap(), Some(0xA5));
}

#[test]
fn test_power_on_reset_sequence() {
    let (circuit, clk, d, reg) = reset_register(ResetConfig::synchronous());
    let params = SimulationParams {
        power_on_reset_cycles: 2,
        ..Default::default()
    };
    let mut sim = Simulator::new(&circuit, params).unwrap();
    assert!(sim.reset_asserted(clk).unwrap());
    sim.drive_u64(d, 1).unwrap();

    sim.run(RunLimit::Ticks { clock: clk, count: 2 }).unwrap();
    assert_eq!(sim.read_u64(out(reg)).unwrap(), Some(0xA5));
    assert!(!sim.reset_asserted(clk).unwrap());

    sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
    assert_eq!(sim.read_u64(out(reg)).unwrap(), Some(1));
}

#[test]
fn test_register_without_reset_starts_undefined() {
    let (mut circuit, clk, d, _) = reset_register(ResetConfig::synchronous());
    let top = circuit.root_group();
    let plain = circuit.create_node(NodeKind::register(u8t()), top).unwrap();
    circuit.connect_input(plain, 0, out(d)).unwrap();
    circuit.attach_clock(plain, clk).unwrap();

    let mut sim = Simulator::new(&circuit, SimulationParams::default()).unwrap();
    assert_eq!(sim.read(out(plain)).unwrap(), x(8));
    sim.drive_u64(d, 9).unwrap();
    sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
    assert_eq!(sim.read_u64(out(plain)).unwrap(), Some(9));

    sim.override_register(plain, BitVectorState::from_u64(200, 8)).unwrap();
    assert_eq!(sim.read_u64(out(plain)).unwrap(), Some(200));
    sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
    assert_eq!(sim.read_u64(out(plain)).unwrap(), Some(9));
}

#[test]
fn test_active_low_reset_pin() {
    let (circuit, clk, d, reg) = reset_register(ResetConfig {
        active: ResetActive::Low,
        ..ResetConfig::synchronous()
    });
    let mut sim = Simulator::new(&circuit, SimulationParams::default()).unwrap();
    assert!(sim.reset_pin_level(clk).unwrap());

    sim.drive_u64(d, 0x11).unwrap();
    // high is the inactive level
    sim.set_reset_pin(clk, true).unwrap();
    assert!(!sim.reset_asserted(clk).unwrap());
    sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
    assert_eq!(sim.read_u64(out(reg)).unwrap(), Some(0x11));

    sim.set_reset_pin(clk, false).unwrap();
    assert!(sim.reset_asserted(clk).unwrap());
    assert!(!sim.reset_pin_level(clk).unwrap());
    sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
    assert_eq!(sim.read_u64(out(reg)).unwrap(), Some(0xA5));

    sim.set_reset_pin(clk, true).unwrap();
    sim.drive_u64(d, 0x22).unwrap();
    let tb = Steps::new()
        .then(move |ctx| {
            ctx.set_reset_pin(clk, false).unwrap();
            Wait::Clock(clk)
        })
        .then(move |ctx| {
            ctx.expect_u64(out(reg), 0xA5, "held in reset by a low pin").unwrap();
            ctx.set_reset_pin(clk, true).unwrap();
            Wait::Clock(clk)
        })
        .then(move |ctx| {
            ctx.expect_u64(out(reg), 0x22, "released by a high pin").unwrap();
            Wait::Done
        });
    sim.add_process("tb", tb);
    assert_eq!(sim.run(RunLimit::Unbounded).unwrap(), RunOutcome::Idle);
    assert!(sim.failures().is_empty(), "{:?}", sim.failures());
}

#[test]
fn test_active_high_reset_pin() {
    let (circuit, clk, d, reg) = reset_register(ResetConfig::synchronous());
    let mut sim = Simulator::new(&circuit, SimulationParams::default()).unwrap();
    assert!(!sim.reset_pin_level(clk).unwrap());
    sim.drive_u64(d, 0x11).unwrap();

    sim.set_reset_pin(clk, false).unwrap();
    sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
    assert_eq!(sim.read_u64(out(reg)).unwrap(), Some(0x11));

    sim.set_reset_pin(clk, true).unwrap();
    sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
    assert_eq!(sim.read_u64(out(reg)).unwrap(), Some(0xA5));
}

/// Registers `a` and `b` feeding each other, with reset values 1 and 2.
fn swap_pair() -> (Circuit, ClockId, NodeId, NodeId) {
    let mut circuit = Circuit::new();
    let top = circuit.root_group();
    let clk = circuit
        .create_clock("clk", ClockRational::from_integer(1_000))
        .unwrap();
    let one = circuit.create_node(NodeKind::constant(1, u8t()), top).unwrap();
    let two = circuit.create_node(NodeKind::constant(2, u8t()), top).unwrap();
    let a = circuit.create_named_node(NodeKind::register(u8t()), top, "a").unwrap();
    let b = circuit.create_named_node(NodeKind::register(u8t()), top, "b").unwrap();
    circuit.connect_input(a, 0, out(b)).unwrap();
    circuit.connect_input(b, 0, out(a)).unwrap();
    circuit.connect_input(a, 1, out(one)).unwrap();
    circuit.connect_input(b, 1, out(two)).unwrap();
    circuit.attach_clock(a, clk).unwrap();
    circuit.attach_clock(b, clk).unwrap();
    (circuit, clk, a, b)
}

#[test]
fn test_registers_swap_atomically_on_one_edge() {
    let (circuit, clk, a, b) = swap_pair();
    let mut sim = Simulator::new(&circuit, SimulationParams::default()).unwrap();
    assert_eq!(sim.read_u64(out(a)).unwrap(), Some(1));
    assert_eq!(sim.read_u64(out(b)).unwrap(), Some(2));

    sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
    assert_eq!(sim.read_u64(out(a)).unwrap(), Some(2));
    assert_eq!(sim.read_u64(out(b)).unwrap(), Some(1));

    sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
    assert_eq!(sim.read_u64(out(a)).unwrap(), Some(1));
    assert_eq!(sim.read_u64(out(b)).unwrap(), Some(2));
}

#[test]
fn test_register_reset_override_ignores_clock_reset() {
    let (mut circuit, clk, a, b) = swap_pair();
    circuit.set_register_reset(b, Some(ResetConfig::none())).unwrap();
    let mut sim = Simulator::new(&circuit, SimulationParams::default()).unwrap();

    sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
    assert_eq!(sim.read_u64(out(a)).unwrap(), Some(2));
    assert_eq!(sim.read_u64(out(b)).unwrap(), Some(1));

    sim.set_reset(clk, true).unwrap();
    sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
    // a takes its reset value, b keeps sampling a
    assert_eq!(sim.read_u64(out(a)).unwrap(), Some(1));
    assert_eq!(sim.read_u64(out(b)).unwrap(), Some(2));

    sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
    assert_eq!(sim.read_u64(out(a)).unwrap(), Some(1));
    assert_eq!(sim.read_u64(out(b)).unwrap(), Some(1));
}

/// Counter register `r = r + 1` with reset value 0.
fn counter(circuit: &mut Circuit, clock: ClockId, name: &str) -> NodeId {
    let top = circuit.root_group();
    let zero = circuit.create_node(NodeKind::constant(0, u8t()), top).unwrap();
    let one = circuit.create_node(NodeKind::constant(1, u8t()), top).unwrap();
    let reg = circuit.create_named_node(NodeKind::register(u8t()), top, name).unwrap();
    let inc = circuit
        .create_node(NodeKind::arithmetic(ArithmeticOp::Add, u8t()), top)
        .unwrap();
    circuit.connect_input(inc, 0, out(reg)).unwrap();
    circuit.connect_input(inc, 1, out(one)).unwrap();
    circuit.connect_input(reg, 0, out(inc)).unwrap();
    circuit.connect_input(reg, 1, out(zero)).unwrap();
    circuit.attach_clock(reg, clock).unwrap();
    reg
}

#[test]
fn test_derived_falling_edge_clock_shares_reset() {
    let mut circuit = Circuit::new();
    let clk = circuit
        .create_clock("clk", ClockRational::from_integer(1_000))
        .unwrap();
    let slow = circuit
        .derive_clock(
            clk,
            ClockRational::new(1, 2),
            EdgeConfig::new()
                .with_name("slow")
                .with_trigger(TriggerEvent::Falling),
        )
        .unwrap();
    let fast_count = counter(&mut circuit, clk, "fast");
    let slow_count = counter(&mut circuit, slow, "slow");
    let mut sim = Simulator::new(&circuit, SimulationParams::default()).unwrap();

    // clk rises at 1 ms; slow starts high and first falls at 1 ms
    sim.run(RunLimit::Duration(one_ms())).unwrap();
    assert_eq!(sim.read_u64(out(fast_count)).unwrap(), Some(1));
    assert_eq!(sim.read_u64(out(slow_count)).unwrap(), Some(1));

    // the derived clock inherits the reset pin
    sim.set_reset(clk, true).unwrap();
    assert!(sim.reset_asserted(slow).unwrap());
    sim.run(RunLimit::Duration(one_ms() * 2)).unwrap();
    assert_eq!(sim.now(), one_ms() * 3);
    assert_eq!(sim.read_u64(out(fast_count)).unwrap(), Some(0));
    assert_eq!(sim.read_u64(out(slow_count)).unwrap(), Some(0));

    sim.set_reset(clk, false).unwrap();
    assert!(!sim.reset_asserted(slow).unwrap());
    sim.run(RunLimit::Duration(one_ms() * 3)).unwrap();
    assert_eq!(sim.now(), one_ms() * 6);
    // clk edges at 4, 5, 6 ms; slow falls at 5 ms only
    assert_eq!(sim.read_u64(out(fast_count)).unwrap(), Some(3));
    assert_eq!(sim.read_u64(out(slow_count)).unwrap(), Some(1));
    assert_eq!(sim.active_edges(clk).unwrap(), 6);
    assert_eq!(sim.active_edges(slow).unwrap(), 3);
}

/// 8-bit register stepping through `r * 5 + 3`.
fn scrambler() -> (Circuit, NodeId) {
    let mut circuit = Circuit::new();
    let top = circuit.root_group();
    let clk = circuit
        .create_clock("clk", ClockRational::from_integer(1_000_000))
        .unwrap();
    let reg = circuit.create_named_node(NodeKind::register(u8t()), top, "r").unwrap();
    let five = circuit.create_node(NodeKind::constant(5, u8t()), top).unwrap();
    let three = circuit.create_node(NodeKind::constant(3, u8t()), top).unwrap();
    let mul = circuit
        .create_node(NodeKind::arithmetic(ArithmeticOp::Mul, u8t()), top)
        .unwrap();
    let add = circuit
        .create_named_node(NodeKind::arithmetic(ArithmeticOp::Add, u8t()), top, "next")
        .unwrap();
    circuit.connect_input(mul, 0, out(reg)).unwrap();
    circuit.connect_input(mul, 1, out(five)).unwrap();
    circuit.connect_input(add, 0, out(mul)).unwrap();
    circuit.connect_input(add, 1, out(three)).unwrap();
    circuit.connect_input(reg, 0, out(add)).unwrap();
    circuit.connect_input(reg, 1, out(three)).unwrap();
    circuit.attach_clock(reg, clk).unwrap();
    (circuit, reg)
}

#[test]
fn test_reruns_are_bit_identical() {
    let (circuit, reg) = scrambler();
    let run = || {
        let mut sim = Simulator::new(&circuit, SimulationParams::default()).unwrap();
        let trace = MemoryTraceSink::new();
        sim.attach_trace(Box::new(trace.clone()));
        sim.run(RunLimit::Duration(ClockRational::new(50, 1_000_000))).unwrap();
        (sim.read(out(reg)).unwrap(), trace.samples())
    };
    let (first, first_trace) = run();
    let (second, second_trace) = run();
    assert_eq!(first, second);
    assert_eq!(first_trace, second_trace);
    assert!(first_trace.len() > 50);
}

#[test]
fn test_processes_resume_in_registration_order() {
    let (circuit, _) = scrambler();
    let mut sim = Simulator::new(&circuit, SimulationParams::default()).unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));

    for name in ["first", "second", "third"] {
        let log = Rc::clone(&log);
        let mut woke = false;
        sim.add_process_fn(name, move |ctx| {
            log.borrow_mut().push((ctx.process_name().to_string(), ctx.now()));
            if woke {
                return Wait::Done;
            }
            woke = true;
            Wait::For(ClockRational::new(1, 1_000_000_000))
        });
    }
    assert_eq!(sim.run(RunLimit::Unbounded).unwrap(), RunOutcome::Idle);

    let names: Vec<String> = log.borrow().iter().map(|(n, _)| n.clone()).collect();
    assert_eq!(names, ["first", "second", "third", "first", "second", "third"]);
    assert_eq!(log.borrow()[5].1, ClockRational::new(1, 1_000_000_000));
}

#[test]
fn test_writes_become_visible_after_settle() {
    let design = accumulator();
    let reg_a = design.reg_a;
    let mut sim = Simulator::new(&design.circuit, SimulationParams::default()).unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_in = Rc::clone(&seen);
    let tb = Steps::new()
        .then(|ctx| {
            ctx.drive_pin("in_a", 7).unwrap();
            Wait::Settle
        })
        .then(move |ctx| {
            seen_in.borrow_mut().push(ctx.read_pin("in_a").unwrap().to_u64());
            // registers only move on clock edges
            seen_in.borrow_mut().push(ctx.read(out(reg_a)).unwrap().to_u64());
            Wait::Done
        });
    sim.add_process("tb", tb);
    sim.run(RunLimit::Unbounded).unwrap();
    assert_eq!(*seen.borrow(), vec![Some(7), None]);
    assert_eq!(sim.now(), ClockRational::from_integer(0));
}

#[test]
fn test_stop_terminates_pending_processes() {
    let design = accumulator();
    let clk = design.clk;
    let mut sim = Simulator::new(&design.circuit, SimulationParams::default()).unwrap();
    let ticks = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&ticks);
    sim.add_process_fn("watcher", move |_| {
        *counter.borrow_mut() += 1;
        Wait::Clock(clk)
    });
    let tb = Steps::new()
        .then(|_| Wait::For(ClockRational::new(25, 100_000)))
        .then(|_| Wait::Stop);
    sim.add_process("stopper", tb);

    assert_eq!(sim.run(RunLimit::Unbounded).unwrap(), RunOutcome::Stopped);
    assert_eq!(sim.phase(), SimPhase::Terminated);
    assert_eq!(sim.now(), ClockRational::new(25, 100_000));
    // initial resume plus edges at 100, 200 us
    assert_eq!(*ticks.borrow(), 3);
    assert_eq!(sim.run(RunLimit::Unbounded).unwrap(), RunOutcome::Stopped);
}

#[test]
fn test_failed_expectation_is_reported() {
    let design = accumulator();
    let (clk, sum) = (design.clk, design.sum);
    let mut sim = Simulator::new(&design.circuit, SimulationParams::default()).unwrap();
    let tb = Steps::new()
        .then(move |ctx| {
            ctx.drive_pin("in_a", 1).unwrap();
            ctx.drive_pin("in_b", 1).unwrap();
            Wait::Clock(clk)
        })
        .then(move |ctx| {
            assert!(!ctx.expect_u64(out(sum), 3, "one plus one").unwrap());
            Wait::Clock(clk)
        })
        .then(|_| Wait::Done);
    sim.add_process("tb", tb);
    assert_eq!(sim.run(RunLimit::Unbounded).unwrap(), RunOutcome::Idle);

    let failures = sim.failures();
    assert_eq!(failures.len(), 1);
    let failure = &failures[0];
    assert_eq!(failure.signal, "sum");
    assert_eq!(failure.process, "tb");
    assert_eq!(failure.time, ClockRational::new(1, 10_000));
    assert_eq!(failure.actual.to_u64(), Some(2));
    assert_eq!(failure.expected.to_u64(), Some(3));
    assert!(failure.to_string().contains("one plus one"));
    // the run went on to the next edge
    assert_eq!(sim.now(), ClockRational::new(2, 10_000));
}

#[test]
fn test_stop_on_first_failure() {
    let design = accumulator();
    let (clk, sum) = (design.clk, design.sum);
    let params = SimulationParams {
        stop_on_first_failure: true,
        ..Default::default()
    };
    let mut sim = Simulator::new(&design.circuit, params).unwrap();
    sim.add_process_fn("tb", move |ctx| {
        ctx.expect_u64(out(sum), 0, "undefined before the first edge").unwrap();
        Wait::Clock(clk)
    });
    assert_eq!(sim.run(RunLimit::Unbounded).unwrap(), RunOutcome::Stopped);
    assert_eq!(sim.failures().len(), 1);
    assert_eq!(sim.now(), ClockRational::from_integer(0));
}

#[test]
fn test_delta_cycle_limit() {
    let (circuit, _) = scrambler();
    let params = SimulationParams {
        max_delta_cycles: 10,
        ..Default::default()
    };
    let mut sim = Simulator::new(&circuit, params).unwrap();
    sim.add_process_fn("spin", |_| Wait::Settle);
    assert_eq!(sim.run(RunLimit::Unbounded), Err(SimError::DeltaCycleLimit(10)));
}

#[test]
fn test_max_time_limit() {
    let (circuit, _) = scrambler();
    let params = SimulationParams {
        max_time_ns: Some(10_000),
        ..Default::default()
    };
    let mut sim = Simulator::new(&circuit, params).unwrap();
    sim.add_process_fn("forever", |_| Wait::For(ClockRational::new(1, 1_000_000)));
    assert_eq!(sim.run(RunLimit::Unbounded).unwrap(), RunOutcome::LimitReached);
    assert_eq!(sim.now(), ClockRational::new(1, 100_000));
}

#[test]
fn test_drive_errors() {
    let design = accumulator();
    let mut sim = Simulator::new(&design.circuit, SimulationParams::default()).unwrap();
    assert_eq!(
        sim.drive(design.sum, BitVectorState::from_u64(1, 8)),
        Err(SimError::NotAnInputPin(design.sum))
    );
    let in_a = design.circuit.find_pin("in_a").unwrap();
    assert_eq!(
        sim.drive(in_a, BitVectorState::from_u64(1, 4)),
        Err(SimError::WidthMismatch { expected: 8, actual: 4 })
    );
    assert!(matches!(sim.read_pin("nope"), Err(SimError::UnknownPin(_))));
    assert!(matches!(
        sim.override_register(design.sum, BitVectorState::from_u64(1, 8)),
        Err(SimError::NotARegister(_))
    ));
}

#[test]
fn test_memory_write_then_read() {
    let mut circuit = Circuit::new();
    let top = circuit.root_group();
    let clk = circuit
        .create_clock("clk", ClockRational::from_integer(1_000))
        .unwrap();
    let u4 = ConnectionType::unsigned(4);
    let mem = circuit.create_named_node(NodeKind::memory(16, u4), top, "ram").unwrap();
    let raddr = circuit.create_node(NodeKind::input_pin("raddr", u4), top).unwrap();
    let waddr = circuit.create_node(NodeKind::input_pin("waddr", u4), top).unwrap();
    let wdata = circuit.create_node(NodeKind::input_pin("wdata", u4), top).unwrap();
    let we = circuit
        .create_node(NodeKind::input_pin("we", ConnectionType::bool()), top)
        .unwrap();
    circuit.connect_input(mem, 0, out(raddr)).unwrap();
    circuit.connect_input(mem, 1, out(waddr)).unwrap();
    circuit.connect_input(mem, 2, out(wdata)).unwrap();
    circuit.connect_input(mem, 3, out(we)).unwrap();
    circuit.attach_clock(mem, clk).unwrap();

    let mut sim = Simulator::new(&circuit, SimulationParams::default()).unwrap();
    sim.drive_pin("raddr", 3).unwrap();
    assert_eq!(sim.read(out(mem)).unwrap(), x(4));

    sim.drive_pin("waddr", 3).unwrap();
    sim.drive_pin("wdata", 0xC).unwrap();
    sim.drive_pin("we", 1).unwrap();
    sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
    // read is asynchronous: visible right after the edge
    assert_eq!(sim.read_u64(out(mem)).unwrap(), Some(0xC));

    let content = sim.read_internal(mem, 0).unwrap();
    assert_eq!(content.len(), 64);
    assert_eq!(content.extract_state(12, 4).to_u64(), Some(0xC));
    assert!(!content.extract_state(0, 4).is_fully_defined());

    sim.drive_pin("waddr", 4).unwrap();
    sim.drive_pin("wdata", 5).unwrap();
    sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
    let content = sim.read_internal(mem, 0).unwrap();
    assert_eq!(content.extract_state(16, 4).to_u64(), Some(5));

    // unknown write enable poisons the addressed word only
    sim.drive(we, x(1)).unwrap();
    sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
    let content = sim.read_internal(mem, 0).unwrap();
    assert_eq!(content.extract_state(16, 4), x(4));
    assert_eq!(sim.read_u64(out(mem)).unwrap(), Some(0xC));

    // unknown write address may have hit anything
    sim.drive_pin("we", 1).unwrap();
    sim.drive(waddr, x(4)).unwrap();
    sim.run(RunLimit::Ticks { clock: clk, count: 1 }).unwrap();
    assert_eq!(sim.read(out(mem)).unwrap(), x(4));
}

#[test]
fn test_export_stats() {
    let (circuit, _) = scrambler();
    let mut sim = Simulator::new(&circuit, SimulationParams::default()).unwrap();
    sim.run(RunLimit::Duration(ClockRational::new(10, 1_000_000))).unwrap();

    let stats = sim.export_stats();
    assert_eq!(stats["engine"]["clock_edges"], 20);
    assert_eq!(stats["engine"]["now_ns"], 10_000.0);
    assert_eq!(stats["metadata"]["node_count"], 5);

    let summary = sim.stats();
    let domain = summary.domains.values().next().unwrap();
    assert_eq!(domain.active_edges, 10);
    assert_eq!(domain.frequency_hz, 1_000_000.0);
    assert!(summary.to_json().unwrap().contains("clock_edges"));
}
