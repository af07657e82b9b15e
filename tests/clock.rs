//! Clock model tests through the circuit API.

use kairo::export::clock_constraints;
use kairo::{
    Circuit, ClockRational, ConnectionType, EdgeConfig, NodeKind, NodePort, ResetConfig,
    ResetKind, RunLimit, SimulationParams, Simulator, TriggerEvent,
};

#[test]
fn test_quarter_of_100mhz_is_exactly_25mhz() {
    let mut circuit = Circuit::new();
    let fast = circuit
        .create_clock("clk", ClockRational::from_integer(100_000_000))
        .unwrap();
    let slow = circuit
        .derive_clock(fast, ClockRational::new(1, 4), EdgeConfig::new())
        .unwrap();

    let freq = circuit.clocks().absolute_frequency(slow).unwrap();
    assert_eq!(freq, ClockRational::from_integer(25_000_000));
    assert!(freq.is_integer());
    assert_eq!(circuit.clocks().period(slow).unwrap(), ClockRational::new(1, 25_000_000));
    assert_eq!(circuit.clocks().period_ns_rounded(slow, 3).unwrap(), "40.000");
}

#[test]
fn test_derived_clock_settings() {
    let mut circuit = Circuit::new();
    let clk = circuit
        .create_clock("clk", ClockRational::from_integer(1_000))
        .unwrap();
    circuit.set_clock_reset(clk, ResetConfig::asynchronous()).unwrap();

    let edge = EdgeConfig::new()
        .with_name("ddr")
        .with_trigger(TriggerEvent::RisingAndFalling);
    let ddr = circuit.derive_clock(clk, ClockRational::from_integer(2), edge).unwrap();
    let clock = circuit.clocks().get(ddr).unwrap();
    assert_eq!(clock.parent(), Some(clk));
    assert_eq!(clock.reset().kind, ResetKind::Asynchronous);
    assert_eq!(clock.trigger(), TriggerEvent::RisingAndFalling);
    assert_eq!(
        circuit.clocks().frequency_relative_to(clk, ddr).unwrap(),
        ClockRational::new(1, 2)
    );
    assert_eq!(circuit.clocks().reset_pin_source(ddr).unwrap(), clk);

    let sdc = clock_constraints(circuit.clocks()).unwrap();
    assert_eq!(sdc.lines().count(), 2);
    assert!(sdc.contains("create_clock -period 1000000.000 [get_ports clk]"));
    assert!(sdc.contains("create_clock -period 500000.000 [get_ports ddr]"));
}

#[test]
fn test_invalid_clock_handle() {
    let mut circuit = Circuit::new();
    let other = {
        let mut elsewhere = Circuit::new();
        elsewhere
            .create_clock("a", ClockRational::from_integer(1))
            .unwrap();
        elsewhere
            .create_clock("b", ClockRational::from_integer(1))
            .unwrap()
    };
    let top = circuit.root_group();
    let reg = circuit
        .create_node(NodeKind::register(ConnectionType::bool()), top)
        .unwrap();
    assert!(circuit.attach_clock(reg, other).is_err());
}

#[test]
fn test_edges_follow_exact_period() {
    // 3 MHz: a period of 1/3 us never lands on a float-exact nanosecond
    let mut circuit = Circuit::new();
    let top = circuit.root_group();
    let clk = circuit
        .create_clock("clk", ClockRational::from_integer(3_000_000))
        .unwrap();
    let reg = circuit
        .create_node(NodeKind::register(ConnectionType::unsigned(8)), top)
        .unwrap();
    let one = circuit
        .create_node(NodeKind::constant(1, ConnectionType::unsigned(8)), top)
        .unwrap();
    let zero = circuit
        .create_node(NodeKind::constant(0, ConnectionType::unsigned(8)), top)
        .unwrap();
    let inc = circuit
        .create_node(
            NodeKind::arithmetic(kairo::ArithmeticOp::Add, ConnectionType::unsigned(8)),
            top,
        )
        .unwrap();
    circuit.connect_input(inc, 0, NodePort::output(reg)).unwrap();
    circuit.connect_input(inc, 1, NodePort::output(one)).unwrap();
    circuit.connect_input(reg, 0, NodePort::output(inc)).unwrap();
    circuit.connect_input(reg, 1, NodePort::output(zero)).unwrap();
    circuit.attach_clock(reg, clk).unwrap();

    let mut sim = Simulator::new(&circuit, SimulationParams::default()).unwrap();
    // power-on value is the reset value
    assert_eq!(sim.read_u64(NodePort::output(reg)).unwrap(), Some(0));

    sim.run(RunLimit::Duration(ClockRational::new(1, 1_000_000))).unwrap();
    assert_eq!(sim.now(), ClockRational::new(1, 1_000_000));
    // rising edges at 1/3, 2/3 and 3/3 us
    assert_eq!(sim.active_edges(clk).unwrap(), 3);
    assert_eq!(sim.read_u64(NodePort::output(reg)).unwrap(), Some(3));
}
