//! Simulation engine.
//!
//! A [`Simulator`] compiles a [`Circuit`](crate::Circuit) into a flat program,
//! keeps every signal as a [`BitVectorState`] slice of one shared buffer and
//! advances it with clock edges and cooperative testbench processes.

mod eval;
pub mod process;
mod program;
pub mod simulator;
pub mod state;
pub mod trace;

pub use process::{AssertionFailure, Process, ProcessContext, Steps, Wait};
pub use simulator::{RunLimit, RunOutcome, SimPhase, Simulator};
pub use state::{BitVectorState, Plane};
pub use trace::{MemoryTraceSink, SignalId, TraceSample, WaveformSink};
