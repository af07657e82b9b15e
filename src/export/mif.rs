//! Memory initialization file (MIF) writer.
//!
//! ```text
//! DEPTH = 16;
//! WIDTH = 4;
//! ADDRESS_RADIX = HEX;
//! DATA_RADIX = BIN;
//! CONTENT BEGIN
//! 0 : 0011;
//! ...
//! END;
//! ```
//!
//! Words are written most significant bit first. Undefined bits are filled
//! from a deterministic pseudo random sequence instead of zeros, so content
//! that was never initialized stands out in review.

use std::io::Write;

use tracing::debug;

use crate::error::ExportError;
use crate::graph::node::NodeKind;
use crate::graph::Circuit;
use crate::sim::state::{BitVectorState, Plane};
use crate::types::NodeId;

const DEFAULT_SEED: u64 = 0x5EED_F111;

/// xorshift64
fn next_random(state: &mut u64) -> u64 {
    let mut x = *state;
    if x == 0 {
        x = 0xDEADBEEF;
    }
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

/// Writes memory images.
#[derive(Clone, Debug)]
pub struct MifWriter {
    seed: u64,
}

impl Default for MifWriter {
    fn default() -> Self {
        Self { seed: DEFAULT_SEED }
    }
}

impl MifWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed of the fill pattern for undefined bits.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Writes `content` as words of `width` bits, word 0 first.
    pub fn write<W: Write>(
        &self,
        mut out: W,
        width: usize,
        content: &BitVectorState,
    ) -> Result<(), ExportError> {
        if width == 0 || content.len() % width != 0 {
            return Err(ExportError::Shape {
                bits: content.len(),
                width,
            });
        }
        let depth = content.len() / width;

        writeln!(out, "DEPTH = {depth};")?;
        writeln!(out, "WIDTH = {width};")?;
        writeln!(out, "ADDRESS_RADIX = HEX;")?;
        writeln!(out, "DATA_RADIX = BIN;")?;
        writeln!(out, "CONTENT BEGIN")?;

        let mut rng = self.seed;
        let mut noise = 0u64;
        let mut filled = 0usize;
        let mut line = String::with_capacity(width + 16);
        for address in 0..depth {
            line.clear();
            let base = address * width;
            for bit in (0..width).rev() {
                let idx = base + bit;
                let value = if content.get(Plane::Defined, idx) {
                    content.get(Plane::Value, idx)
                } else {
                    if filled % 64 == 0 {
                        noise = next_random(&mut rng);
                    }
                    let fill = (noise >> (filled % 64)) & 1 == 1;
                    filled += 1;
                    fill
                };
                line.push(if value { '1' } else { '0' });
            }
            writeln!(out, "{address:X} : {line};")?;
        }
        writeln!(out, "END;")?;

        if filled > 0 {
            debug!(depth, width, undefined_bits = filled, "filled undefined memory bits");
        }
        Ok(())
    }

    pub fn render(&self, width: usize, content: &BitVectorState) -> Result<String, ExportError> {
        let mut buf = Vec::new();
        self.write(&mut buf, width, content)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Writes `content` with the default fill pattern.
pub fn write_mif<W: Write>(out: W, width: usize, content: &BitVectorState) -> Result<(), ExportError> {
    MifWriter::new().write(out, width, content)
}

/// Initial content of a memory node as a MIF document.
pub fn memory_to_mif(circuit: &Circuit, node: NodeId) -> Result<String, ExportError> {
    match circuit.node(node)?.kind() {
        NodeKind::Memory { ty, init, .. } => MifWriter::new().render(ty.width, init),
        _ => Err(ExportError::NotAMemory(node)),
    }
}
