//! Statistics collection and export for simulation runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

/// Aggregate statistics for a simulation run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimulationStats {
    /// Run metadata
    pub metadata: SimulationMetadata,

    /// Engine counters
    pub engine: EngineStats,

    /// Per-clock statistics, keyed by clock name and id
    pub domains: BTreeMap<String, DomainStats>,

    /// Wall-clock performance
    pub timing: TimingStats,
}

/// Metadata about the run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimulationMetadata {
    pub name: String,
    pub version: String,
    /// Number of nodes in the compiled program
    pub node_count: usize,
    /// Bits in the shared state buffer
    pub state_bits: usize,
}

/// Engine counters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EngineStats {
    /// Final simulation time in nanoseconds (rounded)
    pub final_time_ns: f64,

    /// Distinct instants processed
    pub instants: u64,

    /// Clock transitions processed, active or not
    pub clock_edges: u64,

    /// Stateful node commits
    pub commits: u64,

    /// Combinational settle passes
    pub evaluations: u64,

    /// Process rounds within instants
    pub delta_cycles: u64,

    /// Process resumptions
    pub process_resumes: u64,

    /// Processes registered over the run
    pub processes: usize,

    /// Failed expectations
    pub assertion_failures: usize,
}

/// Statistics for one clock domain.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DomainStats {
    pub frequency_hz: f64,
    /// Triggering edges seen
    pub active_edges: u64,
    /// Stateful nodes clocked by this domain
    pub nodes: usize,
}

/// Timing/performance statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TimingStats {
    /// Total wall-clock time in milliseconds
    pub total_wall_time_ms: f64,

    /// Clock edges per wall-clock second
    pub edges_per_second: f64,

    /// Settle passes per wall-clock second
    pub evaluations_per_second: f64,
}

impl SimulationStats {
    /// Creates a new empty statistics container.
    pub fn new() -> Self {
        Self {
            metadata: SimulationMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Sets the run name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    /// Updates timing statistics based on wall clock time.
    pub fn compute_timing(&mut self, wall_time_ms: f64) {
        self.timing.total_wall_time_ms = wall_time_ms;

        if wall_time_ms > 0.0 {
            let seconds = wall_time_ms / 1000.0;
            self.timing.edges_per_second = self.engine.clock_edges as f64 / seconds;
            self.timing.evaluations_per_second = self.engine.evaluations as f64 / seconds;
        }
    }

    /// Exports statistics to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Exports statistics to JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Exports summary statistics to CSV.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();
        csv.push_str("metric,value\n");
        csv.push_str(&format!("final_time_ns,{}\n", self.engine.final_time_ns));
        csv.push_str(&format!("instants,{}\n", self.engine.instants));
        csv.push_str(&format!("clock_edges,{}\n", self.engine.clock_edges));
        csv.push_str(&format!("commits,{}\n", self.engine.commits));
        csv.push_str(&format!("evaluations,{}\n", self.engine.evaluations));
        csv.push_str(&format!("delta_cycles,{}\n", self.engine.delta_cycles));
        csv.push_str(&format!("process_resumes,{}\n", self.engine.process_resumes));
        csv.push_str(&format!("assertion_failures,{}\n", self.engine.assertion_failures));
        csv.push_str(&format!("wall_time_ms,{:.2}\n", self.timing.total_wall_time_ms));
        for (name, domain) in &self.domains {
            csv.push_str(&format!("{name}.active_edges,{}\n", domain.active_edges));
        }
        csv
    }

    /// Writes a human-readable summary to a writer.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, "=== Simulation Statistics ===")?;
        if !self.metadata.name.is_empty() {
            writeln!(w, "Name: {}", self.metadata.name)?;
        }
        writeln!(w, "Nodes: {} ({} state bits)", self.metadata.node_count, self.metadata.state_bits)?;
        writeln!(w)?;

        writeln!(w, "--- Engine ---")?;
        writeln!(w, "Final time: {} ns", self.engine.final_time_ns)?;
        writeln!(w, "Instants: {}", self.engine.instants)?;
        writeln!(w, "Clock edges: {}", self.engine.clock_edges)?;
        writeln!(w, "Commits: {}", self.engine.commits)?;
        writeln!(w, "Settle passes: {}", self.engine.evaluations)?;
        writeln!(w, "Process resumes: {}", self.engine.process_resumes)?;
        writeln!(w, "Assertion failures: {}", self.engine.assertion_failures)?;
        writeln!(w)?;

        writeln!(w, "--- Clocks ---")?;
        for (name, domain) in &self.domains {
            writeln!(
                w,
                "{}: {} Hz, {} active edges, {} nodes",
                name, domain.frequency_hz, domain.active_edges, domain.nodes
            )?;
        }
        Ok(())
    }

    /// Returns a summary string.
    pub fn summary(&self) -> String {
        let mut buf = Vec::new();
        if self.write_summary(&mut buf).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// A simple timer for measuring wall-clock time.
#[derive(Debug)]
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    /// Starts a new timer.
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Returns elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}
