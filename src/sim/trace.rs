//! Waveform sinks.
//!
//! The simulator reports value changes of traced signals as
//! `(signal, time, state)` tuples. Turning them into a file format is up to
//! the sink.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::state::BitVectorState;
use crate::types::SimTime;

/// Index of a traced signal, assigned at declaration.
pub type SignalId = usize;

/// Receiver of value changes.
pub trait WaveformSink {
    /// Announces a signal before any of its samples.
    fn declare(&mut self, signal: SignalId, name: &str, width: usize);

    /// A new value of `signal` at `time`.
    fn record(&mut self, signal: SignalId, time: SimTime, value: &BitVectorState);

    /// Called once when the simulator is dropped.
    fn finish(&mut self, _time: SimTime) {}
}

/// One recorded value change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TraceSample {
    pub signal: SignalId,
    pub time: SimTime,
    pub value: BitVectorState,
}

#[derive(Debug, Default)]
struct TraceLog {
    signals: Vec<(String, usize)>,
    samples: Vec<TraceSample>,
    finished_at: Option<SimTime>,
}

/// Records everything in memory.
///
/// Clones share the same log, so a test can keep one handle and give the
/// other to the simulator.
#[derive(Clone, Debug, Default)]
pub struct MemoryTraceSink {
    log: Arc<Mutex<TraceLog>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal_id(&self, name: &str) -> Option<SignalId> {
        self.log.lock().signals.iter().position(|(n, _)| n == name)
    }

    pub fn signal_names(&self) -> Vec<String> {
        self.log.lock().signals.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn samples(&self) -> Vec<TraceSample> {
        self.log.lock().samples.clone()
    }

    /// Value changes of one signal in time order.
    pub fn history(&self, name: &str) -> Vec<(SimTime, BitVectorState)> {
        let Some(id) = self.signal_id(name) else {
            return Vec::new();
        };
        self.log
            .lock()
            .samples
            .iter()
            .filter(|s| s.signal == id)
            .map(|s| (s.time, s.value.clone()))
            .collect()
    }

    pub fn finished_at(&self) -> Option<SimTime> {
        self.log.lock().finished_at
    }
}

impl WaveformSink for MemoryTraceSink {
    fn declare(&mut self, signal: SignalId, name: &str, width: usize) {
        let mut log = self.log.lock();
        if log.signals.len() <= signal {
            log.signals.resize(signal + 1, (String::new(), 0));
        }
        log.signals[signal] = (name.to_string(), width);
    }

    fn record(&mut self, signal: SignalId, time: SimTime, value: &BitVectorState) {
        self.log.lock().samples.push(TraceSample {
            signal,
            time,
            value: value.clone(),
        });
    }

    fn finish(&mut self, time: SimTime) {
        self.log.lock().finished_at = Some(time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_log() {
        let sink = MemoryTraceSink::new();
        let mut writer = sink.clone();
        writer.declare(0, "a", 4);
        writer.record(0, SimTime::from_integer(0), &BitVectorState::from_u64(3, 4));
        writer.record(0, SimTime::new(1, 2), &BitVectorState::from_u64(4, 4));

        let history = sink.history("a");
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].0, SimTime::new(1, 2));
        assert_eq!(history[1].1.to_u64(), Some(4));
        assert!(sink.history("b").is_empty());
    }
}
