//! Accumulator Example
//!
//! Builds a small datapath and drives it from a testbench process:
//! - Two input registers `a` and `b` and their sum
//! - An accumulator `c` that either loads the sum or adds 42 to itself
//! - A 16-word memory logging every accumulator value
//!
//! The simulation showcases:
//! - Undefined power-on state and how it resolves after the first edges
//! - Cooperative processes waiting on clock edges
//! - Waveform recording, statistics and memory image export

use kairo::export::{clock_constraints, MifWriter};
use kairo::{
    ArithmeticOp, Circuit, ClockRational, ConnectionType, GroupType, MemoryTraceSink, NodeKind,
    NodePort, RunLimit, SimulationParams, Simulator, Steps, Wait,
};

// ============================================================================
// Design Configuration
// ============================================================================

const CLOCK_HZ: i64 = 10_000;
const DATA_WIDTH: usize = 8;
const LOG_WORDS: usize = 16;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    kairo::init_logging("info");

    println!("=== Kairo Accumulator Simulation ===\n");

    let u8t = ConnectionType::unsigned(DATA_WIDTH);
    let mut circuit = Circuit::new();
    let top = circuit.root_group();
    let datapath = circuit.create_group(top, "datapath", GroupType::Entity)?;
    let clk = circuit.create_clock("clk", ClockRational::from_integer(CLOCK_HZ))?;

    // ========================================================================
    // Inputs and operand registers
    // ========================================================================

    let in_a = circuit.create_node(NodeKind::input_pin("in_a", u8t), top)?;
    let in_b = circuit.create_node(NodeKind::input_pin("in_b", u8t), top)?;
    let load = circuit.create_node(NodeKind::input_pin("load", ConnectionType::bool()), top)?;

    let reg_a = circuit.create_named_node(NodeKind::register(u8t), datapath, "a")?;
    let reg_b = circuit.create_named_node(NodeKind::register(u8t), datapath, "b")?;
    circuit.connect_input(reg_a, 0, NodePort::output(in_a))?;
    circuit.connect_input(reg_b, 0, NodePort::output(in_b))?;

    let sum = circuit.create_named_node(NodeKind::arithmetic(ArithmeticOp::Add, u8t), datapath, "sum")?;
    circuit.connect_input(sum, 0, NodePort::output(reg_a))?;
    circuit.connect_input(sum, 1, NodePort::output(reg_b))?;

    // ========================================================================
    // Accumulator
    // ========================================================================

    let acc = circuit.create_named_node(NodeKind::register(u8t), datapath, "c")?;
    let k42 = circuit.create_node(NodeKind::constant(42, u8t), datapath)?;
    let plus = circuit.create_node(NodeKind::arithmetic(ArithmeticOp::Add, u8t), datapath)?;
    circuit.connect_input(plus, 0, NodePort::output(acc))?;
    circuit.connect_input(plus, 1, NodePort::output(k42))?;

    let select = circuit.create_node(NodeKind::multiplexer(ConnectionType::bool(), u8t, 2), datapath)?;
    circuit.connect_input(select, 0, NodePort::output(load))?;
    circuit.connect_input(select, 1, NodePort::output(plus))?;
    circuit.connect_input(select, 2, NodePort::output(sum))?;
    circuit.connect_input(acc, 0, NodePort::output(select))?;

    // ========================================================================
    // Value log: a write pointer counting through a small memory
    // ========================================================================

    let addr_t = ConnectionType::unsigned(NodeKind::address_width(LOG_WORDS));
    let ptr = circuit.create_named_node(NodeKind::register(addr_t), datapath, "ptr")?;
    let zero = circuit.create_node(NodeKind::constant(0, addr_t), datapath)?;
    let step = circuit.create_node(NodeKind::constant(1, addr_t), datapath)?;
    let next = circuit.create_node(NodeKind::arithmetic(ArithmeticOp::Add, addr_t), datapath)?;
    circuit.connect_input(next, 0, NodePort::output(ptr))?;
    circuit.connect_input(next, 1, NodePort::output(step))?;
    circuit.connect_input(ptr, 0, NodePort::output(next))?;
    circuit.connect_input(ptr, 1, NodePort::output(zero))?;

    let log = circuit.create_named_node(NodeKind::memory(LOG_WORDS, u8t), datapath, "log")?;
    let always = circuit.create_node(NodeKind::constant(1, ConnectionType::bool()), datapath)?;
    circuit.connect_input(log, 0, NodePort::output(ptr))?;
    circuit.connect_input(log, 1, NodePort::output(ptr))?;
    circuit.connect_input(log, 2, NodePort::output(acc))?;
    circuit.connect_input(log, 3, NodePort::output(always))?;

    let result = circuit.create_node(NodeKind::output_pin("result", u8t), top)?;
    circuit.connect_input(result, 0, NodePort::output(acc))?;

    for node in [reg_a, reg_b, acc, ptr, log] {
        circuit.attach_clock(node, clk)?;
    }

    println!("Design: {}", circuit.export_stats());
    for report in circuit.detect_clock_crossings() {
        println!("  unmarked clock crossing: {:?}", report);
    }

    // ========================================================================
    // Testbench
    // ========================================================================

    let params = SimulationParams {
        power_on_reset_cycles: 1,
        ..Default::default()
    };
    let mut sim = Simulator::new(&circuit, params)?;
    let trace = MemoryTraceSink::new();
    sim.attach_trace(Box::new(trace.clone()));

    let tb = Steps::new()
        .then(move |ctx| {
            ctx.drive_pin("in_a", 5).ok();
            ctx.drive_pin("in_b", 10).ok();
            ctx.drive_pin("load", 1).ok();
            Wait::Clock(clk)
        })
        .then(move |ctx| {
            ctx.expect_u64(NodePort::output(sum), 15, "a + b").ok();
            Wait::Clock(clk)
        })
        .then(move |ctx| {
            ctx.drive_pin("load", 0).ok();
            Wait::Clock(clk)
        })
        .repeat(4, move |ctx| {
            println!(
                "  [{}] c = {}",
                ctx.now(),
                ctx.read(NodePort::output(acc)).map(|v| v.to_string()).unwrap_or_default()
            );
            Wait::Clock(clk)
        });
    sim.add_process("tb", tb);

    let outcome = sim.run(RunLimit::Unbounded)?;
    println!("\nRun finished: {:?} at {} s", outcome, sim.now());
    println!("Failures: {}", sim.failures().len());
    for failure in sim.failures() {
        println!("  {failure}");
    }

    println!("\nAccumulator history:");
    for (time, value) in trace.history("c") {
        println!("  {time}: {value}");
    }

    println!("\nLog memory image:");
    let content = sim.read_internal(log, 0)?;
    print!("{}", MifWriter::new().render(DATA_WIDTH, &content)?);

    println!("\nClock constraints:");
    print!("{}", clock_constraints(circuit.clocks())?);

    println!();
    sim.stats().write_summary(std::io::stdout())?;
    Ok(())
}
