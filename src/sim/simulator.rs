//! Event-driven simulation of a compiled circuit.
//!
//! Time advances from instant to instant. At each instant the simulator
//!
//! 1. toggles every clock with an edge due, and lets all stateful nodes of
//!    the triggered domains sample their inputs before any of them commits,
//! 2. releases resets whose power-on hold has expired,
//! 3. settles the combinational logic,
//! 4. resumes ready processes in rounds, in registration order, applying
//!    their queued writes and settling again after every round.
//!
//! Everything runs on one thread; processes only yield at their waits.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use num_traits::Zero;
use serde_json::json;
use tracing::{debug, info, trace, warn};

use super::process::{
    check_input_pin, check_register, read_internal, read_value, AssertionFailure, Process,
    ProcessContext, Request, Wait,
};
use super::program::Program;
use super::state::BitVectorState;
use super::trace::{SignalId, WaveformSink};
use crate::clock::ResetKind;
use crate::config::SimulationParams;
use crate::error::SimError;
use crate::graph::node::{NodeKind, NodePort};
use crate::graph::{Circuit, FreezeGuard};
use crate::stats::{DomainStats, SimulationStats, Timer};
use crate::types::{to_nanoseconds, ClockId, NodeId, SimTime};

/// Where the simulator is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimPhase {
    Reset,
    Evaluation,
    ClockCommit,
    Terminated,
}

/// How far [`Simulator::run`] advances.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunLimit {
    /// Advance by a duration; events at the end time are included.
    Duration(SimTime),
    /// Until the clock has seen this many more triggering edges.
    Ticks { clock: ClockId, count: u64 },
    /// Until every process finished or the run was stopped.
    Unbounded,
}

/// Why [`Simulator::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// A process stopped the run, or a failed expectation did.
    Stopped,
    /// The requested duration, tick count or configured time limit was reached.
    LimitReached,
    /// Nothing is left to do.
    Idle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum EventKind {
    ClockEdge { domain: usize },
    Resume { process: usize },
}

/// Ordered by time, then clock edges before resumptions, then by domain or
/// process index, then by insertion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Event {
    time: SimTime,
    class: u8,
    key: usize,
    seq: u64,
    kind: EventKind,
}

struct ProcessEntry {
    name: String,
    process: Option<Box<dyn Process>>,
}

#[derive(Clone, Debug, Default)]
struct DomainState {
    level: bool,
    reset_asserted: bool,
    /// Triggering edges left before the power-on reset is released.
    power_on_edges: u64,
    active_edges: u64,
    waiters: Vec<usize>,
}

struct TracedSignal {
    index: usize,
    last: Option<BitVectorState>,
}

/// Simulates a circuit.
///
/// The circuit is compiled on construction and stays frozen until the
/// simulator is dropped.
pub struct Simulator {
    program: Program,
    state: BitVectorState,
    params: SimulationParams,
    now: SimTime,
    phase: SimPhase,
    events: BinaryHeap<Reverse<Event>>,
    seq: u64,
    processes: Vec<ProcessEntry>,
    domains: Vec<DomainState>,
    requests: Vec<Request>,
    failures: Vec<AssertionFailure>,
    sinks: Vec<Box<dyn WaveformSink>>,
    traced: Vec<TracedSignal>,
    stats: SimulationStats,
    timer: Timer,
    _freeze: FreezeGuard,
}

impl Simulator {
    /// Compiles `circuit` and brings the design to its power-on state.
    pub fn new(circuit: &Circuit, params: SimulationParams) -> Result<Self, SimError> {
        let program = Program::compile(circuit)?;
        let state = program.new_state();
        let domains = vec![
            DomainState {
                level: true,
                ..Default::default()
            };
            program.domains.len()
        ];
        let mut stats = SimulationStats::new();
        stats.metadata.node_count = program.nodes.len();
        stats.metadata.state_bits = program.state_size;

        let mut sim = Self {
            program,
            state,
            params,
            now: SimTime::zero(),
            phase: SimPhase::Reset,
            events: BinaryHeap::new(),
            seq: 0,
            processes: Vec::new(),
            domains,
            requests: Vec::new(),
            failures: Vec::new(),
            sinks: Vec::new(),
            traced: Vec::new(),
            stats,
            timer: Timer::start(),
            _freeze: circuit.freeze(),
        };
        sim.power_on()?;
        Ok(sim)
    }

    /// Compiles with default parameters.
    pub fn with_defaults(circuit: &Circuit) -> Result<Self, SimError> {
        Self::new(circuit, SimulationParams::default())
    }

    fn power_on(&mut self) -> Result<(), SimError> {
        self.phase = SimPhase::Reset;
        for node in &self.program.nodes {
            node.kind.simulate_reset(&mut self.state, &node.slots);
        }
        self.evaluate_all();
        for node in &self.program.nodes {
            node.kind.simulate_power_on(&mut self.state, &node.slots);
        }
        self.evaluate_all();

        let cycles = u64::from(self.params.power_on_reset_cycles);
        if cycles > 0 {
            for d in 0..self.program.domains.len() {
                let domain = &self.program.domains[d];
                let resettable = domain.nodes.iter().any(|&i| self.program.resets(i));
                if !resettable {
                    continue;
                }
                self.domains[d].power_on_edges = cycles.max(domain.min_reset_cycles);
                self.apply_reset_change(d, true);
            }
            self.evaluate_all();
        }

        for d in 0..self.program.domains.len() {
            let first = self.program.domains[d].half_period;
            self.schedule(first, EventKind::ClockEdge { domain: d });
        }
        self.phase = SimPhase::Evaluation;
        info!(
            nodes = self.program.nodes.len(),
            clocks = self.program.domains.len(),
            state_bits = self.program.state_size,
            "simulation powered on"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // processes
    // ------------------------------------------------------------------

    /// Registers a process. It first runs at the current instant.
    pub fn add_process<P>(&mut self, name: impl Into<String>, process: P) -> usize
    where
        P: Process + 'static,
    {
        let index = self.processes.len();
        self.processes.push(ProcessEntry {
            name: name.into(),
            process: Some(Box::new(process)),
        });
        self.schedule(self.now, EventKind::Resume { process: index });
        index
    }

    /// Registers a closure as a process.
    pub fn add_process_fn<F>(&mut self, name: impl Into<String>, step: F) -> usize
    where
        F: FnMut(&mut ProcessContext<'_>) -> Wait + 'static,
    {
        self.add_process(name, step)
    }

    fn has_live_processes(&self) -> bool {
        self.processes.iter().any(|p| p.process.is_some())
    }

    fn schedule(&mut self, time: SimTime, kind: EventKind) {
        let (class, key) = match kind {
            EventKind::ClockEdge { domain } => (0, domain),
            EventKind::Resume { process } => (1, process),
        };
        self.seq += 1;
        self.events.push(Reverse(Event {
            time,
            class,
            key,
            seq: self.seq,
            kind,
        }));
    }

    // ------------------------------------------------------------------
    // running
    // ------------------------------------------------------------------

    /// Advances the simulation.
    pub fn run(&mut self, limit: RunLimit) -> Result<RunOutcome, SimError> {
        if self.phase == SimPhase::Terminated {
            return Ok(RunOutcome::Stopped);
        }
        let deadline = match &limit {
            RunLimit::Duration(d) => Some(self.now + *d),
            _ => None,
        };
        let ticks = match &limit {
            RunLimit::Ticks { clock, count } => {
                let d = self.program.domain_index(*clock)?;
                Some((d, self.domains[d].active_edges + count))
            }
            _ => None,
        };
        info!(?limit, now = %self.now, "run started");

        let outcome = loop {
            if let Some((d, target)) = ticks {
                if self.domains[d].active_edges >= target {
                    break RunOutcome::LimitReached;
                }
            }
            if limit == RunLimit::Unbounded && !self.has_live_processes() {
                break RunOutcome::Idle;
            }
            let Some(next) = self.events.peek().map(|Reverse(e)| e.time) else {
                if let Some(end) = deadline {
                    self.now = end;
                    break RunOutcome::LimitReached;
                }
                break RunOutcome::Idle;
            };
            if let Some(end) = deadline {
                if next > end {
                    self.now = end;
                    break RunOutcome::LimitReached;
                }
            }
            if let Some(max) = self.params.max_time() {
                if next > max {
                    break RunOutcome::LimitReached;
                }
            }
            if self.step_instant(next)? {
                self.terminate();
                break RunOutcome::Stopped;
            }
        };

        self.stats.engine.final_time_ns = to_nanoseconds(self.now);
        info!(?outcome, now = %self.now, failures = self.failures.len(), "run finished");
        Ok(outcome)
    }

    /// Processes every event at `now`. Returns true when the run was stopped.
    fn step_instant(&mut self, now: SimTime) -> Result<bool, SimError> {
        self.now = now;
        self.stats.engine.instants += 1;

        let mut triggered = Vec::new();
        let mut ready = Vec::new();
        while let Some(Reverse(event)) = self.events.peek().copied() {
            if event.time != now {
                break;
            }
            self.events.pop();
            match event.kind {
                EventKind::ClockEdge { domain } => {
                    let rising = !self.domains[domain].level;
                    self.domains[domain].level = rising;
                    self.stats.engine.clock_edges += 1;
                    let next = now + self.program.domains[domain].half_period;
                    self.schedule(next, EventKind::ClockEdge { domain });
                    if self.program.domains[domain].trigger.triggers_on(rising) {
                        triggered.push(domain);
                    }
                }
                EventKind::Resume { process } => ready.push(process),
            }
        }

        if !triggered.is_empty() {
            self.commit(&triggered);
            for &d in &triggered {
                ready.append(&mut self.domains[d].waiters);
            }
        }

        let mut rounds = 0;
        while !ready.is_empty() {
            rounds += 1;
            if rounds > self.params.max_delta_cycles {
                return Err(SimError::DeltaCycleLimit(self.params.max_delta_cycles));
            }
            ready.sort_unstable();
            ready.dedup();

            let mut settle = Vec::new();
            let mut stop = false;
            for process in ready.drain(..) {
                let failures_before = self.failures.len();
                let wait = self.resume_process(process);
                if self.params.stop_on_first_failure && self.failures.len() > failures_before {
                    warn!(process = %self.processes[process].name, "stopping on failed expectation");
                    stop = true;
                }
                match wait {
                    Wait::Clock(clock) => {
                        let d = self.program.domain_index(clock)?;
                        self.domains[d].waiters.push(process);
                    }
                    Wait::Settle => settle.push(process),
                    Wait::For(delay) if delay > SimTime::zero() => {
                        self.schedule(now + delay, EventKind::Resume { process });
                    }
                    Wait::Until(time) if time > now => {
                        self.schedule(time, EventKind::Resume { process });
                    }
                    Wait::For(_) | Wait::Until(_) => settle.push(process),
                    Wait::Done => {
                        debug!(process = %self.processes[process].name, "process finished");
                        self.processes[process].process = None;
                    }
                    Wait::Stop => {
                        info!(process = %self.processes[process].name, "process stopped the run");
                        stop = true;
                    }
                }
                if stop {
                    break;
                }
            }

            self.apply_requests()?;
            self.evaluate_all();
            self.stats.engine.delta_cycles += 1;
            if stop {
                self.record_trace();
                return Ok(true);
            }
            ready = settle;
        }

        self.record_trace();
        Ok(false)
    }

    /// Samples every node of the triggered domains, then commits them all.
    fn commit(&mut self, triggered: &[usize]) {
        self.phase = SimPhase::ClockCommit;
        let nodes: Vec<usize> = triggered
            .iter()
            .flat_map(|&d| self.program.domains[d].nodes.iter().copied())
            .collect();

        for &i in &nodes {
            let node = &self.program.nodes[i];
            let in_reset = node
                .domain
                .is_some_and(|d| self.domains[d].reset_asserted)
                && self.program.resets(i);
            node.kind.simulate_sample(&mut self.state, &node.slots, in_reset);
        }
        for &i in &nodes {
            let node = &self.program.nodes[i];
            node.kind.simulate_commit(&mut self.state, &node.slots);
        }
        self.stats.engine.commits += nodes.len() as u64;

        for &d in triggered {
            let domain = &mut self.domains[d];
            domain.active_edges += 1;
            if domain.power_on_edges > 0 {
                domain.power_on_edges -= 1;
                if domain.power_on_edges == 0 {
                    debug!(clock = %self.program.domains[d].clock, "power-on reset released");
                    self.apply_reset_change(d, false);
                }
            }
        }
        trace!(now = %self.now, domains = triggered.len(), nodes = nodes.len(), "clock edge committed");

        self.evaluate_all();
        self.phase = SimPhase::Evaluation;
    }

    fn resume_process(&mut self, index: usize) -> Wait {
        self.stats.engine.process_resumes += 1;
        let entry = &mut self.processes[index];
        let Some(process) = entry.process.as_mut() else {
            return Wait::Done;
        };
        let mut ctx = ProcessContext {
            now: self.now,
            process: &entry.name,
            program: &self.program,
            state: &self.state,
            requests: &mut self.requests,
            failures: &mut self.failures,
        };
        process.resume(&mut ctx)
    }

    fn apply_requests(&mut self) -> Result<(), SimError> {
        for request in std::mem::take(&mut self.requests) {
            match request {
                Request::Drive { node, value } | Request::OverrideRegister { node, value } => {
                    let offset = self.program.nodes[node].slots.outputs[0];
                    self.state.insert_state(offset, &value);
                }
                Request::SetReset { clock, asserted } => self.set_reset_now(clock, asserted)?,
            }
        }
        Ok(())
    }

    /// Drops all pending processes and events.
    fn terminate(&mut self) {
        let dropped = self.processes.iter().filter(|p| p.process.is_some()).count();
        for entry in &mut self.processes {
            entry.process = None;
        }
        for domain in &mut self.domains {
            domain.waiters.clear();
        }
        self.events.clear();
        self.phase = SimPhase::Terminated;
        info!(dropped, now = %self.now, "simulation terminated");
    }

    fn evaluate_all(&mut self) {
        for node in &self.program.nodes {
            node.kind.simulate_evaluate(&mut self.state, &node.slots);
        }
        self.stats.engine.evaluations += 1;
    }

    // ------------------------------------------------------------------
    // resets
    // ------------------------------------------------------------------

    fn apply_reset_change(&mut self, domain: usize, asserted: bool) {
        let previous = std::mem::replace(&mut self.domains[domain].reset_asserted, asserted);
        if !asserted || previous {
            return;
        }
        for &i in &self.program.domains[domain].nodes {
            let node = &self.program.nodes[i];
            if node.reset.kind == ResetKind::Asynchronous {
                node.kind.simulate_async_reset(&mut self.state, &node.slots);
            }
        }
    }

    /// Changes the reset of every domain sharing the clock's reset pin.
    fn set_reset_now(&mut self, clock: ClockId, asserted: bool) -> Result<(), SimError> {
        let d = self.program.domain_index(clock)?;
        let source = self.program.domains[d].reset_source;
        for other in 0..self.program.domains.len() {
            if self.program.domains[other].reset_source == source {
                self.apply_reset_change(other, asserted);
            }
        }
        debug!(%clock, asserted, now = %self.now, "reset changed");
        Ok(())
    }

    /// Asserts or releases a clock's reset outside of a process.
    pub fn set_reset(&mut self, clock: ClockId, asserted: bool) -> Result<(), SimError> {
        self.set_reset_now(clock, asserted)?;
        self.evaluate_all();
        self.record_trace();
        Ok(())
    }

    /// Drives the reset pin of a clock to a logic level.
    ///
    /// The level is translated through the pin's polarity: for an active-low
    /// reset, `false` asserts it.
    pub fn set_reset_pin(&mut self, clock: ClockId, level: bool) -> Result<(), SimError> {
        let asserted = self.program.reset_level_asserts(clock, level)?;
        self.set_reset(clock, asserted)
    }

    pub fn reset_asserted(&self, clock: ClockId) -> Result<bool, SimError> {
        let d = self.program.domain_index(clock)?;
        Ok(self.domains[d].reset_asserted)
    }

    /// Current logic level of the reset pin driving `clock`.
    pub fn reset_pin_level(&self, clock: ClockId) -> Result<bool, SimError> {
        let asserted = self.reset_asserted(clock)?;
        let asserted_level = self.program.reset_level_asserts(clock, true)?;
        Ok(asserted == asserted_level)
    }

    // ------------------------------------------------------------------
    // state access
    // ------------------------------------------------------------------

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn phase(&self) -> SimPhase {
        self.phase
    }

    /// Triggering edges a clock has seen so far.
    pub fn active_edges(&self, clock: ClockId) -> Result<u64, SimError> {
        let d = self.program.domain_index(clock)?;
        Ok(self.domains[d].active_edges)
    }

    pub fn failures(&self) -> &[AssertionFailure] {
        &self.failures
    }

    pub fn read(&self, port: NodePort) -> Result<BitVectorState, SimError> {
        let (offset, width) = self.program.output_slot(port)?;
        Ok(self.state.extract_state(offset, width))
    }

    pub fn read_u64(&self, port: NodePort) -> Result<Option<u64>, SimError> {
        Ok(self.read(port)?.to_u64())
    }

    /// Value presented at a named pin.
    pub fn read_pin(&self, name: &str) -> Result<BitVectorState, SimError> {
        let index = self.program.pin_index(name)?;
        read_value(&self.program, &self.state, index)
    }

    /// Internal state slot of a stateful node, e.g. a memory's content.
    pub fn read_internal(&self, node: NodeId, slot: usize) -> Result<BitVectorState, SimError> {
        read_internal(&self.program, &self.state, node, slot)
    }

    /// Drives an input pin immediately and settles the logic.
    pub fn drive(&mut self, pin: NodeId, value: BitVectorState) -> Result<(), SimError> {
        let index = self.program.node_index(pin)?;
        check_input_pin(&self.program, index, pin, &value)?;
        let offset = self.program.nodes[index].slots.outputs[0];
        self.state.insert_state(offset, &value);
        self.evaluate_all();
        self.record_trace();
        Ok(())
    }

    pub fn drive_u64(&mut self, pin: NodeId, value: u64) -> Result<(), SimError> {
        let index = self.program.node_index(pin)?;
        let width = self
            .program
            .input_pin_width(index)
            .ok_or(SimError::NotAnInputPin(pin))?;
        self.drive(pin, BitVectorState::from_u64(value, width))
    }

    pub fn drive_pin(&mut self, name: &str, value: u64) -> Result<(), SimError> {
        let index = self.program.pin_index(name)?;
        let pin = self.program.nodes[index].id;
        self.drive_u64(pin, value)
    }

    /// Overwrites a register's output until its next commit.
    pub fn override_register(&mut self, node: NodeId, value: BitVectorState) -> Result<(), SimError> {
        let index = self.program.node_index(node)?;
        check_register(&self.program, index, node, &value)?;
        let offset = self.program.nodes[index].slots.outputs[0];
        self.state.insert_state(offset, &value);
        self.evaluate_all();
        self.record_trace();
        Ok(())
    }

    // ------------------------------------------------------------------
    // tracing
    // ------------------------------------------------------------------

    /// Attaches a waveform sink.
    ///
    /// Pins and named nodes are traced. The sink gets their declarations and
    /// current values right away, then every change at the end of an instant.
    pub fn attach_trace(&mut self, mut sink: Box<dyn WaveformSink>) {
        if self.traced.is_empty() {
            self.traced = (0..self.program.nodes.len())
                .filter(|&i| {
                    let node = &self.program.nodes[i];
                    (node.name.is_some() || matches!(node.kind, NodeKind::Pin { .. }))
                        && self.program.value_slot(i).is_some()
                })
                .map(|index| TracedSignal { index, last: None })
                .collect();
        }
        for (signal, traced) in self.traced.iter().enumerate() {
            let Some((offset, width)) = self.program.value_slot(traced.index) else {
                continue;
            };
            sink.declare(signal, &self.program.display_name(traced.index), width);
            sink.record(signal, self.now, &self.state.extract_state(offset, width));
        }
        self.sinks.push(sink);
        self.record_trace();
    }

    fn record_trace(&mut self) {
        if self.sinks.is_empty() {
            return;
        }
        for (signal, traced) in self.traced.iter_mut().enumerate() {
            let Some((offset, width)) = self.program.value_slot(traced.index) else {
                continue;
            };
            let value = self.state.extract_state(offset, width);
            if traced.last.as_ref().is_some_and(|last| last.equal_on_defined(&value)) {
                continue;
            }
            let first = traced.last.is_none();
            traced.last = Some(value.clone());
            if first {
                // already recorded when the sink was attached
                continue;
            }
            for sink in &mut self.sinks {
                sink.record(signal as SignalId, self.now, &value);
            }
        }
    }

    // ------------------------------------------------------------------
    // statistics
    // ------------------------------------------------------------------

    /// Snapshot of the run statistics.
    pub fn stats(&self) -> SimulationStats {
        let mut stats = self.stats.clone();
        stats.engine.final_time_ns = to_nanoseconds(self.now);
        stats.engine.processes = self.processes.len();
        stats.engine.assertion_failures = self.failures.len();
        for (d, domain) in self.program.domains.iter().enumerate() {
            let period = domain.half_period * SimTime::from_integer(2);
            stats.domains.insert(
                format!("{} ({})", domain.name, domain.clock),
                DomainStats {
                    frequency_hz: *period.denom() as f64 / *period.numer() as f64,
                    active_edges: self.domains[d].active_edges,
                    nodes: domain.nodes.len(),
                },
            );
        }
        stats.compute_timing(self.timer.elapsed_ms());
        stats
    }

    /// Exports statistics as JSON.
    pub fn export_stats(&self) -> serde_json::Value {
        let stats = self.stats();
        json!({
            "engine": {
                "now_ns": stats.engine.final_time_ns,
                "phase": format!("{:?}", self.phase),
                "instants": stats.engine.instants,
                "clock_edges": stats.engine.clock_edges,
                "commits": stats.engine.commits,
                "evaluations": stats.engine.evaluations,
                "delta_cycles": stats.engine.delta_cycles,
                "process_resumes": stats.engine.process_resumes,
                "processes": stats.engine.processes,
                "assertion_failures": stats.engine.assertion_failures,
            },
            "domains": serde_json::to_value(&stats.domains).unwrap_or_default(),
            "metadata": serde_json::to_value(&stats.metadata).unwrap_or_default(),
        })
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        for sink in &mut self.sinks {
            sink.finish(self.now);
        }
    }
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("now", &self.now)
            .field("phase", &self.phase)
            .field("nodes", &self.program.nodes.len())
            .field("processes", &self.processes.len())
            .field("pending_events", &self.events.len())
            .finish()
    }
}
