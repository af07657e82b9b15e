//! Core type definitions shared by the graph, clock model and simulator.
//!
//! Graph entities are addressed by generation-checked handles: an index into
//! an arena slot plus the generation the slot had when the entity was created.
//! A handle outliving its entity is detected instead of aliasing whatever is
//! stored in the recycled slot.

use std::fmt;

use num_rational::Ratio;
use serde::{Deserialize, Serialize};

/// Exact rational used for frequencies, ratios and simulation time.
pub type ClockRational = Ratio<i64>;

/// Simulation time in seconds, kept exact.
///
/// Clock edges of clocks with unrelated frequencies land on exact instants,
/// so events never drift apart through floating point rounding.
pub type SimTime = ClockRational;

/// Common interface of arena handles.
pub trait Handle: Copy + Eq + std::hash::Hash + fmt::Debug {
    /// Builds a handle from slot index and generation.
    fn from_parts(index: usize, generation: u32) -> Self;
    /// Slot index inside the owning arena.
    fn index(self) -> usize;
    /// Generation of the slot at creation time.
    fn generation(self) -> u32;
}

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name {
            index: u32,
            generation: u32,
        }

        impl Handle for $name {
            fn from_parts(index: usize, generation: u32) -> Self {
                Self {
                    index: index as u32,
                    generation,
                }
            }

            fn index(self) -> usize {
                self.index as usize
            }

            fn generation(self) -> u32 {
                self.generation
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.generation == 0 {
                    write!(f, concat!($prefix, "{}"), self.index)
                } else {
                    write!(f, concat!($prefix, "{}.{}"), self.index, self.generation)
                }
            }
        }
    };
}

handle_type!(
    /// Handle of a node in the netlist graph.
    NodeId,
    "n"
);

handle_type!(
    /// Handle of a node group (naming/partitioning scope).
    GroupId,
    "g"
);

handle_type!(
    /// Handle of a signal group.
    SignalGroupId,
    "s"
);

/// Handle of a clock. Clocks live as long as the design, so no generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClockId(pub(crate) u32);

impl ClockId {
    /// Position of the clock inside its tree.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clk{}", self.0)
    }
}

/// Exact simulation time from nanoseconds.
pub fn nanoseconds(ns: i64) -> SimTime {
    SimTime::new(ns, 1_000_000_000)
}

/// Simulation time in nanoseconds, for reports.
pub fn to_nanoseconds(time: SimTime) -> f64 {
    *time.numer() as f64 * 1e9 / *time.denom() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_parts() {
        let id = NodeId::from_parts(7, 3);
        assert_eq!(id.index(), 7);
        assert_eq!(id.generation(), 3);
        assert_ne!(id, NodeId::from_parts(7, 4));
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(NodeId::from_parts(4, 0).to_string(), "n4");
        assert_eq!(GroupId::from_parts(2, 1).to_string(), "g2.1");
        assert_eq!(ClockId(3).to_string(), "clk3");
    }

    #[test]
    fn test_sim_time_is_exact() {
        let period = SimTime::new(1, 30_000_000);
        let sum = period * 3;
        assert_eq!(sum, SimTime::new(1, 10_000_000));
        assert_eq!(nanoseconds(100), SimTime::new(1, 10_000_000));
        assert_eq!(to_nanoseconds(sum), 100.0);
    }
}
