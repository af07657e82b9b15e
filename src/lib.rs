//! # Kairo
//!
//! Netlist graph IR, clock model and event-driven simulator for synchronous
//! digital circuits.
//!
//! ## Design Principles
//!
//! - **Graph IR**: a circuit is a graph of typed nodes (logic, arithmetic,
//!   multiplexers, registers, memories, pins) connected port to port. Nodes
//!   live in a generation-checked arena, so register feedback loops are plain
//!   edges and stale handles are detected.
//! - **Four-state-lite values**: every bit carries a value and a defined flag.
//!   Undefined bits propagate through the logic instead of raising errors.
//! - **Exact clocks**: frequencies, ratios and simulation time are exact
//!   rationals. A clock derived at 1/4 from 100 MHz runs at exactly 25 MHz.
//! - **Cooperative testbenches**: processes are resumable step functions
//!   driven by the simulator in registration order. Nothing runs concurrently.
//!
//! ## Quick Start
//!
//! ```rust
//! use kairo::{
//!     ArithmeticOp, Circuit, ConnectionType, NodeKind, NodePort, SimulationParams, Simulator,
//! };
//!
//! let mut circuit = Circuit::new();
//! let top = circuit.root_group();
//! let u8t = ConnectionType::unsigned(8);
//!
//! let a = circuit.create_node(NodeKind::input_pin("a", u8t), top).unwrap();
//! let b = circuit.create_node(NodeKind::input_pin("b", u8t), top).unwrap();
//! let sum = circuit.create_node(NodeKind::arithmetic(ArithmeticOp::Add, u8t), top).unwrap();
//! circuit.connect_input(sum, 0, NodePort::output(a)).unwrap();
//! circuit.connect_input(sum, 1, NodePort::output(b)).unwrap();
//!
//! let mut sim = Simulator::new(&circuit, SimulationParams::default()).unwrap();
//! sim.drive_pin("a", 5).unwrap();
//! sim.drive_pin("b", 10).unwrap();
//! assert_eq!(sim.read_u64(NodePort::output(sum)).unwrap(), Some(15));
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use kairo::config::SimConfig;
//!
//! let config = SimConfig::from_yaml_file("simulation.yaml")?;
//! circuit.apply_partition_config(&config.partitions)?;
//! let sim = Simulator::new(&circuit, config.simulation)?;
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod export;
pub mod graph;
pub mod sim;
pub mod stats;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ClockSource, ClockTree, EdgeConfig, ResetActive, ResetConfig, ResetKind, TriggerEvent};
pub use config::{ConfigError, ConfigTree, SimConfig, SimConfigBuilder, SimulationParams};
pub use error::{ExportError, GraphError, SimError, StructuralError};
pub use graph::{
    ArithmeticOp, Circuit, ClockCrossingReport, CompareOp, ConnectionType, GroupType,
    Interpretation, LogicOp, Node, NodeGroup, NodeKind, NodePort, PinDirection, SignalGroup,
};
pub use sim::{
    AssertionFailure, BitVectorState, MemoryTraceSink, Plane, Process, ProcessContext, RunLimit,
    RunOutcome, SimPhase, Simulator, Steps, Wait, WaveformSink,
};
pub use stats::{SimulationStats, Timer};
pub use types::{nanoseconds, ClockId, ClockRational, GroupId, Handle, NodeId, SignalGroupId, SimTime};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging. `RUST_LOG`
/// overrides `level`.
///
/// # Example
///
/// ```rust,ignore
/// kairo::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
