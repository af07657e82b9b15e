//! Clock model: timing domains, derivation and reset behavior.
//!
//! Clocks form a tree. A root clock carries an absolute frequency, a derived
//! clock carries an exact rational ratio relative to its parent. Absolute
//! frequencies are computed by walking to the root and multiplying ratios, so
//! a clock derived at 1/4 from 100 MHz is exactly 25 MHz.
//!
//! Reset configuration is a property of the clock and is inherited by every
//! register attached to it unless the register overrides it locally.

use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::types::{ClockId, ClockRational};

/// Which clock transitions advance the attached registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TriggerEvent {
    #[default]
    Rising,
    Falling,
    RisingAndFalling,
}

impl TriggerEvent {
    /// Whether a transition in the given direction triggers.
    pub fn triggers_on(self, rising: bool) -> bool {
        match self {
            TriggerEvent::Rising => rising,
            TriggerEvent::Falling => !rising,
            TriggerEvent::RisingAndFalling => true,
        }
    }
}

/// How an asserted reset reaches the registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ResetKind {
    /// Registers ignore the reset.
    None,
    /// Reset value is latched on the next active edge.
    #[default]
    Synchronous,
    /// Reset value is forced immediately on assertion.
    Asynchronous,
}

/// Polarity of the reset pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ResetActive {
    #[default]
    High,
    Low,
}

/// Reset behavior of a clock domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResetConfig {
    pub kind: ResetKind,
    pub active: ResetActive,
    /// Minimum number of active edges the reset must be held.
    pub min_reset_cycles: u32,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            kind: ResetKind::Synchronous,
            active: ResetActive::High,
            min_reset_cycles: 1,
        }
    }
}

impl ResetConfig {
    /// A reset configuration that registers ignore.
    pub fn none() -> Self {
        Self {
            kind: ResetKind::None,
            ..Self::default()
        }
    }

    pub fn synchronous() -> Self {
        Self::default()
    }

    pub fn asynchronous() -> Self {
        Self {
            kind: ResetKind::Asynchronous,
            ..Self::default()
        }
    }

    /// Pin level that corresponds to an asserted reset.
    pub fn asserted_level(&self) -> bool {
        self.active == ResetActive::High
    }
}

/// Overrides applied when deriving a clock. Unset fields inherit from the parent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EdgeConfig {
    pub name: Option<String>,
    pub reset_name: Option<String>,
    pub trigger: Option<TriggerEvent>,
    pub reset: Option<ResetConfig>,
    pub phase_synchronous: Option<bool>,
}

impl EdgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_reset_name(mut self, name: impl Into<String>) -> Self {
        self.reset_name = Some(name.into());
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerEvent) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn with_reset(mut self, reset: ResetConfig) -> Self {
        self.reset = Some(reset);
        self
    }

    pub fn with_phase_synchronous(mut self, synchronous: bool) -> Self {
        self.phase_synchronous = Some(synchronous);
        self
    }
}

/// Where a clock gets its frequency from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClockSource {
    Root { frequency: ClockRational },
    Derived { parent: ClockId, ratio: ClockRational },
}

/// A timing domain.
#[derive(Clone, Debug)]
pub struct Clock {
    pub(crate) id: ClockId,
    pub(crate) name: String,
    pub(crate) reset_name: String,
    pub(crate) source: ClockSource,
    pub(crate) trigger: TriggerEvent,
    pub(crate) reset: ResetConfig,
    pub(crate) phase_synchronous_with_parent: bool,
    pub(crate) derived: Vec<ClockId>,
}

impl Clock {
    pub fn id(&self) -> ClockId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reset_name(&self) -> &str {
        &self.reset_name
    }

    pub fn source(&self) -> &ClockSource {
        &self.source
    }

    pub fn parent(&self) -> Option<ClockId> {
        match self.source {
            ClockSource::Root { .. } => None,
            ClockSource::Derived { parent, .. } => Some(parent),
        }
    }

    pub fn trigger(&self) -> TriggerEvent {
        self.trigger
    }

    pub fn reset(&self) -> &ResetConfig {
        &self.reset
    }

    pub fn phase_synchronous_with_parent(&self) -> bool {
        self.phase_synchronous_with_parent
    }

    pub fn derived_clocks(&self) -> &[ClockId] {
        &self.derived
    }
}

/// All clocks of a design. Clocks are never removed.
#[derive(Clone, Debug, Default)]
pub struct ClockTree {
    clocks: Vec<Clock>,
}

fn check_positive(value: ClockRational) -> Result<ClockRational, GraphError> {
    if value <= ClockRational::zero() {
        return Err(GraphError::InvalidRatio(value.to_string()));
    }
    Ok(value)
}

impl ClockTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a root clock with an absolute frequency in Hz.
    pub fn create_root(
        &mut self,
        name: impl Into<String>,
        frequency: ClockRational,
    ) -> Result<ClockId, GraphError> {
        let frequency = check_positive(frequency)?;
        let id = ClockId(self.clocks.len() as u32);
        self.clocks.push(Clock {
            id,
            name: name.into(),
            reset_name: "reset".to_string(),
            source: ClockSource::Root { frequency },
            trigger: TriggerEvent::Rising,
            reset: ResetConfig::default(),
            phase_synchronous_with_parent: true,
            derived: Vec::new(),
        });
        tracing::debug!(clock = %id, %frequency, "created root clock");
        Ok(id)
    }

    /// Derives a clock running at `parent * ratio`.
    ///
    /// Name, reset name, trigger and reset configuration are inherited from
    /// the parent unless `edge` overrides them.
    pub fn derive_clock(
        &mut self,
        parent: ClockId,
        ratio: ClockRational,
        edge: EdgeConfig,
    ) -> Result<ClockId, GraphError> {
        let ratio = check_positive(ratio)?;
        let parent_clock = self.get(parent)?;

        let id = ClockId(self.clocks.len() as u32);
        let clock = Clock {
            id,
            name: edge.name.unwrap_or_else(|| parent_clock.name.clone()),
            reset_name: edge
                .reset_name
                .unwrap_or_else(|| parent_clock.reset_name.clone()),
            source: ClockSource::Derived { parent, ratio },
            trigger: edge.trigger.unwrap_or(parent_clock.trigger),
            reset: edge.reset.unwrap_or(parent_clock.reset),
            phase_synchronous_with_parent: edge
                .phase_synchronous
                .unwrap_or(parent_clock.phase_synchronous_with_parent),
            derived: Vec::new(),
        };
        self.clocks.push(clock);
        self.clocks[parent.index()].derived.push(id);
        tracing::debug!(clock = %id, %parent, %ratio, "derived clock");
        Ok(id)
    }

    pub fn get(&self, id: ClockId) -> Result<&Clock, GraphError> {
        self.clocks.get(id.index()).ok_or(GraphError::InvalidClock(id))
    }

    pub(crate) fn get_mut(&mut self, id: ClockId) -> Result<&mut Clock, GraphError> {
        self.clocks
            .get_mut(id.index())
            .ok_or(GraphError::InvalidClock(id))
    }

    pub fn contains(&self, id: ClockId) -> bool {
        id.index() < self.clocks.len()
    }

    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Clock> {
        self.clocks.iter()
    }

    /// Absolute frequency in Hz, exact.
    pub fn absolute_frequency(&self, id: ClockId) -> Result<ClockRational, GraphError> {
        let mut frequency = ClockRational::one();
        let mut current = self.get(id)?;
        loop {
            match current.source {
                ClockSource::Root { frequency: root } => return Ok(frequency * root),
                ClockSource::Derived { parent, ratio } => {
                    frequency *= ratio;
                    current = self.get(parent)?;
                }
            }
        }
    }

    /// Duration of one full clock cycle in seconds.
    pub fn period(&self, id: ClockId) -> Result<ClockRational, GraphError> {
        Ok(self.absolute_frequency(id)?.recip())
    }

    /// Period in nanoseconds, rounded half away from zero to `decimals` places.
    pub fn period_ns_rounded(&self, id: ClockId, decimals: u32) -> Result<String, GraphError> {
        let scale = 10i64.pow(decimals);
        let scaled = (self.period(id)? * ClockRational::from_integer(1_000_000_000 * scale))
            .round()
            .to_integer();
        if decimals == 0 {
            return Ok(scaled.to_string());
        }
        Ok(format!(
            "{}.{:0width$}",
            scaled / scale,
            scaled % scale,
            width = decimals as usize
        ))
    }

    /// Frequency of `id` expressed as a multiple of the frequency of `other`.
    pub fn frequency_relative_to(
        &self,
        id: ClockId,
        other: ClockId,
    ) -> Result<ClockRational, GraphError> {
        Ok(self.absolute_frequency(id)? / self.absolute_frequency(other)?)
    }

    /// The clock whose pin actually provides the signal of `id`.
    ///
    /// A derived clock shares its parent's pin if it has the same name, the
    /// same frequency and is phase synchronous with it.
    pub fn clock_pin_source(&self, id: ClockId) -> Result<ClockId, GraphError> {
        let clock = self.get(id)?;
        let Some(parent) = clock.parent() else {
            return Ok(id);
        };
        let parent_clock = self.get(parent)?;
        if parent_clock.name != clock.name
            || self.absolute_frequency(parent)? != self.absolute_frequency(id)?
            || !clock.phase_synchronous_with_parent
        {
            return Ok(id);
        }
        self.clock_pin_source(parent)
    }

    /// The clock whose reset pin drives the reset of `id`.
    pub fn reset_pin_source(&self, id: ClockId) -> Result<ClockId, GraphError> {
        let clock = self.get(id)?;
        match clock.parent() {
            Some(parent) if self.get(parent)?.reset_name == clock.reset_name => {
                self.reset_pin_source(parent)
            }
            _ => Ok(id),
        }
    }

    /// Minimum number of cycles the reset of `id` must be held, including
    /// what derived clocks require expressed in cycles of `id`.
    pub fn min_reset_cycles(&self, id: ClockId) -> Result<u64, GraphError> {
        let clock = self.get(id)?;
        let mut cycles = u64::from(clock.reset.min_reset_cycles);
        if clock.reset.kind == ResetKind::Synchronous {
            cycles = cycles.max(1);
        }
        for &child in &clock.derived {
            let child_cycles = ClockRational::from_integer(self.min_reset_cycles(child)? as i64);
            let ClockSource::Derived { ratio, .. } = self.get(child)?.source else {
                continue;
            };
            // child cycles in units of this clock's cycles
            let own = (child_cycles / ratio).ceil().to_integer();
            cycles = cycles.max(own.max(0) as u64);
        }
        Ok(cycles)
    }

    pub(crate) fn set_reset(&mut self, id: ClockId, reset: ResetConfig) -> Result<(), GraphError> {
        self.get_mut(id)?.reset = reset;
        Ok(())
    }

    pub(crate) fn set_trigger(&mut self, id: ClockId, trigger: TriggerEvent) -> Result<(), GraphError> {
        self.get_mut(id)?.trigger = trigger;
        Ok(())
    }
}
