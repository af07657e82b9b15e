//! Clock constraint (SDC) writer.
//!
//! One `create_clock` line per clock pin. Derived clocks that share their
//! parent's pin are covered by the parent's line. A derived clock that keeps
//! its parent's name but runs at another frequency would constrain the same
//! port twice and is rejected.

use std::collections::HashMap;
use std::io::Write;

use crate::clock::ClockTree;
use crate::error::ExportError;

/// Writes `create_clock -period <ns> [get_ports <name>]` lines.
pub fn write_clock_constraints<W: Write>(mut out: W, clocks: &ClockTree) -> Result<(), ExportError> {
    let mut emitted: HashMap<&str, String> = HashMap::new();
    for clock in clocks.iter() {
        if clocks.clock_pin_source(clock.id())? != clock.id() {
            continue;
        }
        let period = clocks.period_ns_rounded(clock.id(), 3)?;
        match emitted.get(clock.name()) {
            Some(existing) if *existing == period => continue,
            Some(existing) => {
                return Err(ExportError::ConflictingClock {
                    port: clock.name().to_string(),
                    clock: clock.id(),
                    existing: existing.clone(),
                    conflicting: period,
                });
            }
            None => {}
        }
        writeln!(out, "create_clock -period {period} [get_ports {}]", clock.name())?;
        emitted.insert(clock.name(), period);
    }
    Ok(())
}

pub fn clock_constraints(clocks: &ClockTree) -> Result<String, ExportError> {
    let mut buf = Vec::new();
    write_clock_constraints(&mut buf, clocks)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
