//! Cooperative testbench processes.
//!
//! A process is a resumable step function. Each call to [`Process::resume`]
//! runs until the process decides what to wait for next and returns that as
//! a [`Wait`]. Processes never touch the state buffer directly: reads see the
//! settled state of the current round, writes are queued and applied together
//! once every process of the round has run.

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;
use tracing::error;

use super::program::Program;
use super::state::BitVectorState;
use crate::error::SimError;
use crate::graph::node::NodePort;
use crate::types::{ClockId, NodeId, SimTime};

/// What a process waits for before it is resumed again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Next triggering edge of the clock; registers have already advanced.
    Clock(ClockId),
    /// Next round at the same instant, after queued writes are applied.
    Settle,
    /// A duration from now.
    For(SimTime),
    /// An absolute point in time.
    Until(SimTime),
    /// The process is finished.
    Done,
    /// Ends the whole run; pending processes are dropped.
    Stop,
}

/// A testbench task.
pub trait Process {
    fn resume(&mut self, ctx: &mut ProcessContext<'_>) -> Wait;
}

impl<F> Process for F
where
    F: FnMut(&mut ProcessContext<'_>) -> Wait,
{
    fn resume(&mut self, ctx: &mut ProcessContext<'_>) -> Wait {
        self(ctx)
    }
}

type Step = Box<dyn FnMut(&mut ProcessContext<'_>) -> Wait>;

/// A process made of consecutive steps, one per resumption.
///
/// ```rust,ignore
/// let tb = Steps::new()
///     .then(move |ctx| { ctx.drive_u64(a, 5).ok(); Wait::Clock(clk) })
///     .then(move |ctx| { ctx.expect_u64(sum, 5, "sum").ok(); Wait::Done });
/// ```
#[derive(Default)]
pub struct Steps {
    steps: VecDeque<Step>,
}

impl Steps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then<F>(mut self, step: F) -> Self
    where
        F: FnMut(&mut ProcessContext<'_>) -> Wait + 'static,
    {
        self.steps.push_back(Box::new(step));
        self
    }

    /// Adds a step that repeats `times` times.
    pub fn repeat<F>(mut self, times: usize, step: F) -> Self
    where
        F: FnMut(&mut ProcessContext<'_>) -> Wait + Clone + 'static,
    {
        for _ in 0..times {
            self.steps.push_back(Box::new(step.clone()));
        }
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Process for Steps {
    fn resume(&mut self, ctx: &mut ProcessContext<'_>) -> Wait {
        match self.steps.pop_front() {
            Some(mut step) => step(ctx),
            None => Wait::Done,
        }
    }
}

/// A failed expectation, reported without aborting the run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AssertionFailure {
    pub time: SimTime,
    pub signal: String,
    pub node: NodeId,
    pub port: usize,
    pub expected: BitVectorState,
    pub actual: BitVectorState,
    pub message: String,
    pub process: String,
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} is {}, expected {} ({})",
            self.time, self.process, self.signal, self.actual, self.expected, self.message
        )
    }
}

/// Mutation queued by a process.
#[derive(Clone, Debug)]
pub(crate) enum Request {
    Drive { node: usize, value: BitVectorState },
    SetReset { clock: ClockId, asserted: bool },
    OverrideRegister { node: usize, value: BitVectorState },
}

/// The view a process gets while it runs.
pub struct ProcessContext<'a> {
    pub(crate) now: SimTime,
    pub(crate) process: &'a str,
    pub(crate) program: &'a Program,
    pub(crate) state: &'a BitVectorState,
    pub(crate) requests: &'a mut Vec<Request>,
    pub(crate) failures: &'a mut Vec<AssertionFailure>,
}

impl<'a> ProcessContext<'a> {
    /// Current simulation time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn process_name(&self) -> &str {
        self.process
    }

    /// Reads an output as of the current round.
    pub fn read(&self, port: NodePort) -> Result<BitVectorState, SimError> {
        let (offset, width) = self.program.output_slot(port)?;
        Ok(self.state.extract_state(offset, width))
    }

    /// Reads a fully defined output of at most 64 bits.
    pub fn read_u64(&self, port: NodePort) -> Result<Option<u64>, SimError> {
        Ok(self.read(port)?.to_u64())
    }

    /// Reads the value presented at a named pin.
    pub fn read_pin(&self, name: &str) -> Result<BitVectorState, SimError> {
        let index = self.program.pin_index(name)?;
        read_value(self.program, self.state, index)
    }

    /// Reads an internal state slot of a stateful node.
    pub fn read_internal(&self, node: NodeId, slot: usize) -> Result<BitVectorState, SimError> {
        read_internal(self.program, self.state, node, slot)
    }

    /// Queues driving an input pin.
    pub fn drive(&mut self, pin: NodeId, value: BitVectorState) -> Result<(), SimError> {
        let node = self.program.node_index(pin)?;
        check_input_pin(self.program, node, pin, &value)?;
        self.requests.push(Request::Drive { node, value });
        Ok(())
    }

    pub fn drive_u64(&mut self, pin: NodeId, value: u64) -> Result<(), SimError> {
        let node = self.program.node_index(pin)?;
        let width = self
            .program
            .input_pin_width(node)
            .ok_or(SimError::NotAnInputPin(pin))?;
        self.drive(pin, BitVectorState::from_u64(value, width))
    }

    /// Queues driving an input pin by name.
    pub fn drive_pin(&mut self, name: &str, value: u64) -> Result<(), SimError> {
        let index = self.program.pin_index(name)?;
        let pin = self.program.nodes[index].id;
        self.drive_u64(pin, value)
    }

    /// Queues asserting or releasing the reset of a clock.
    pub fn set_reset(&mut self, clock: ClockId, asserted: bool) -> Result<(), SimError> {
        self.program.domain_index(clock)?;
        self.requests.push(Request::SetReset { clock, asserted });
        Ok(())
    }

    /// Queues driving the reset pin of a clock to a logic level, honoring the
    /// pin's polarity.
    pub fn set_reset_pin(&mut self, clock: ClockId, level: bool) -> Result<(), SimError> {
        let asserted = self.program.reset_level_asserts(clock, level)?;
        self.requests.push(Request::SetReset { clock, asserted });
        Ok(())
    }

    /// Queues overwriting a register's current output.
    pub fn override_register(&mut self, node: NodeId, value: BitVectorState) -> Result<(), SimError> {
        let index = self.program.node_index(node)?;
        check_register(self.program, index, node, &value)?;
        self.requests.push(Request::OverrideRegister { node: index, value });
        Ok(())
    }

    /// Checks an output against an expected state.
    ///
    /// Definedness must match exactly and values must agree on every defined
    /// bit. A mismatch is recorded as an [`AssertionFailure`] and reported
    /// through `false`; the process keeps running.
    pub fn expect(
        &mut self,
        port: NodePort,
        expected: &BitVectorState,
        message: &str,
    ) -> Result<bool, SimError> {
        let actual = self.read(port)?;
        if actual.equal_on_defined(expected) {
            return Ok(true);
        }
        let index = self.program.node_index(port.node)?;
        let failure = AssertionFailure {
            time: self.now,
            signal: self.program.display_name(index),
            node: port.node,
            port: port.port,
            expected: expected.clone(),
            actual,
            message: message.to_string(),
            process: self.process.to_string(),
        };
        error!(
            time = %failure.time,
            signal = %failure.signal,
            actual = %failure.actual,
            expected = %failure.expected,
            process = %failure.process,
            "{}",
            failure.message
        );
        self.failures.push(failure);
        Ok(false)
    }

    /// Checks an output against a fully defined value.
    pub fn expect_u64(&mut self, port: NodePort, value: u64, message: &str) -> Result<bool, SimError> {
        let (_, width) = self.program.output_slot(port)?;
        self.expect(port, &BitVectorState::from_u64(value, width), message)
    }
}

pub(crate) fn read_value(
    program: &Program,
    state: &BitVectorState,
    index: usize,
) -> Result<BitVectorState, SimError> {
    let id = program.nodes[index].id;
    let (offset, width) = program
        .value_slot(index)
        .ok_or(SimError::UnknownPort { node: id, port: 0 })?;
    Ok(state.extract_state(offset, width))
}

pub(crate) fn read_internal(
    program: &Program,
    state: &BitVectorState,
    node: NodeId,
    slot: usize,
) -> Result<BitVectorState, SimError> {
    let index = program.node_index(node)?;
    let compiled = &program.nodes[index];
    let sizes = compiled.kind.internal_state_sizes();
    match (compiled.slots.internal.get(slot), sizes.get(slot)) {
        (Some(&offset), Some(&size)) => Ok(state.extract_state(offset, size)),
        _ => Err(SimError::UnknownPort { node, port: slot }),
    }
}

pub(crate) fn check_input_pin(
    program: &Program,
    index: usize,
    pin: NodeId,
    value: &BitVectorState,
) -> Result<(), SimError> {
    let width = program
        .input_pin_width(index)
        .ok_or(SimError::NotAnInputPin(pin))?;
    if value.len() != width {
        return Err(SimError::WidthMismatch {
            expected: width,
            actual: value.len(),
        });
    }
    Ok(())
}

pub(crate) fn check_register(
    program: &Program,
    index: usize,
    node: NodeId,
    value: &BitVectorState,
) -> Result<(), SimError> {
    let compiled = &program.nodes[index];
    let crate::graph::node::NodeKind::Register { ty, .. } = &compiled.kind else {
        return Err(SimError::NotARegister(node));
    };
    if value.len() != ty.width {
        return Err(SimError::WidthMismatch {
            expected: ty.width,
            actual: value.len(),
        });
    }
    Ok(())
}
