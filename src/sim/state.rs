//! Dense two-plane bit buffer holding all simulated signal and node state.
//!
//! One plane stores logical values, the other marks which bits are defined
//! (1 = known, 0 = undefined). The simulator keeps every output and every
//! piece of internal node state in a single buffer addressed by offsets.

use std::fmt;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

const BLOCK_BITS: usize = 64;

/// Selects one of the two bit planes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Plane {
    Value,
    Defined,
}

/// Mask with the lowest `size` bits set.
pub(crate) fn mask(size: usize) -> u64 {
    if size >= BLOCK_BITS {
        u64::MAX
    } else {
        (1u64 << size) - 1
    }
}

/// A dynamically sized vector of (value, defined) bit pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitVectorState {
    size: usize,
    value: Vec<u64>,
    defined: Vec<u64>,
}

impl BitVectorState {
    /// Creates a vector of `size` undefined bits.
    pub fn new(size: usize) -> Self {
        let mut state = Self::default();
        state.resize(size);
        state
    }

    /// Creates a fully defined vector from the low `width` bits of `value`.
    pub fn from_u64(value: u64, width: usize) -> Self {
        let mut state = Self::new(width);
        let mut offset = 0;
        while offset < width {
            let chunk = (width - offset).min(BLOCK_BITS);
            let bits = if offset < BLOCK_BITS { value >> offset } else { 0 };
            state.insert(Plane::Value, offset, chunk, bits);
            state.insert(Plane::Defined, offset, chunk, u64::MAX);
            offset += chunk;
        }
        state
    }

    /// Creates a fully defined single bit.
    pub fn from_bool(bit: bool) -> Self {
        Self::from_u64(bit as u64, 1)
    }

    /// Creates a fully defined vector from an arbitrary precision integer,
    /// truncated to `width` bits.
    pub fn from_biguint(value: &BigUint, width: usize) -> Self {
        let mut state = Self::new(width);
        state.insert_biguint(0, width, value);
        state.set_range(Plane::Defined, 0, width, true);
        state
    }

    /// Parses an MSB-first string of `0`, `1` and `x`/`X` (undefined).
    /// Underscores are ignored.
    pub fn from_bit_str(bits: &str) -> Option<Self> {
        let chars: Vec<char> = bits.chars().filter(|c| *c != '_').collect();
        let mut state = Self::new(chars.len());
        for (i, c) in chars.iter().rev().enumerate() {
            match c {
                '0' => state.set(Plane::Defined, i, true),
                '1' => {
                    state.set(Plane::Value, i, true);
                    state.set(Plane::Defined, i, true);
                }
                'x' | 'X' => {}
                _ => return None,
            }
        }
        Some(state)
    }

    pub fn resize(&mut self, size: usize) {
        let blocks = size.div_ceil(BLOCK_BITS);
        self.value.resize(blocks, 0);
        self.defined.resize(blocks, 0);
        if size < self.size && size % BLOCK_BITS != 0 {
            let last = blocks - 1;
            self.value[last] &= mask(size % BLOCK_BITS);
            self.defined[last] &= mask(size % BLOCK_BITS);
        }
        self.size = size;
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Marks every bit undefined and zero.
    pub fn clear(&mut self) {
        self.value.iter_mut().for_each(|b| *b = 0);
        self.defined.iter_mut().for_each(|b| *b = 0);
    }

    fn plane(&self, plane: Plane) -> &[u64] {
        match plane {
            Plane::Value => &self.value,
            Plane::Defined => &self.defined,
        }
    }

    fn plane_mut(&mut self, plane: Plane) -> &mut [u64] {
        match plane {
            Plane::Value => &mut self.value,
            Plane::Defined => &mut self.defined,
        }
    }

    pub fn get(&self, plane: Plane, idx: usize) -> bool {
        debug_assert!(idx < self.size);
        (self.plane(plane)[idx / BLOCK_BITS] >> (idx % BLOCK_BITS)) & 1 == 1
    }

    pub fn set(&mut self, plane: Plane, idx: usize, bit: bool) {
        debug_assert!(idx < self.size);
        let block = &mut self.plane_mut(plane)[idx / BLOCK_BITS];
        let flag = 1u64 << (idx % BLOCK_BITS);
        if bit {
            *block |= flag;
        } else {
            *block &= !flag;
        }
    }

    pub fn set_range(&mut self, plane: Plane, offset: usize, size: usize, bit: bool) {
        let fill = if bit { u64::MAX } else { 0 };
        let mut pos = 0;
        while pos < size {
            let chunk = (size - pos).min(BLOCK_BITS - (offset + pos) % BLOCK_BITS);
            self.insert(plane, offset + pos, chunk, fill);
            pos += chunk;
        }
    }

    /// Extracts up to 64 bits starting at `offset`; the range may straddle blocks.
    pub fn extract(&self, plane: Plane, offset: usize, size: usize) -> u64 {
        debug_assert!(size <= BLOCK_BITS);
        debug_assert!(offset + size <= self.size);
        if size == 0 {
            return 0;
        }
        let words = self.plane(plane);
        let block = offset / BLOCK_BITS;
        let bit = offset % BLOCK_BITS;
        let mut value = words[block] >> bit;
        if bit + size > BLOCK_BITS {
            value |= words[block + 1] << (BLOCK_BITS - bit);
        }
        value & mask(size)
    }

    /// Inserts the low `size` (up to 64) bits of `value` at `offset`.
    pub fn insert(&mut self, plane: Plane, offset: usize, size: usize, value: u64) {
        debug_assert!(size <= BLOCK_BITS);
        debug_assert!(offset + size <= self.size);
        if size == 0 {
            return;
        }
        let m = mask(size);
        let value = value & m;
        let block = offset / BLOCK_BITS;
        let bit = offset % BLOCK_BITS;
        let words = self.plane_mut(plane);
        words[block] = (words[block] & !(m << bit)) | (value << bit);
        if bit + size > BLOCK_BITS {
            let high = mask(bit + size - BLOCK_BITS);
            words[block + 1] = (words[block + 1] & !high) | (value >> (BLOCK_BITS - bit));
        }
    }

    /// Copies `size` bits (both planes) from `src[src_offset..]` to `self[dst_offset..]`.
    pub fn copy_range(&mut self, dst_offset: usize, src: &BitVectorState, src_offset: usize, size: usize) {
        let mut pos = 0;
        while pos < size {
            let chunk = (size - pos).min(BLOCK_BITS);
            for plane in [Plane::Value, Plane::Defined] {
                let bits = src.extract(plane, src_offset + pos, chunk);
                self.insert(plane, dst_offset + pos, chunk, bits);
            }
            pos += chunk;
        }
    }

    /// Copies within the same buffer. Source and destination must not overlap.
    pub fn copy_within(&mut self, dst_offset: usize, src_offset: usize, size: usize) {
        debug_assert!(dst_offset + size <= src_offset || src_offset + size <= dst_offset);
        let mut pos = 0;
        while pos < size {
            let chunk = (size - pos).min(BLOCK_BITS);
            for plane in [Plane::Value, Plane::Defined] {
                let bits = self.extract(plane, src_offset + pos, chunk);
                self.insert(plane, dst_offset + pos, chunk, bits);
            }
            pos += chunk;
        }
    }

    /// Returns a copy of the bits `[offset, offset + size)`.
    pub fn extract_state(&self, offset: usize, size: usize) -> BitVectorState {
        let mut out = BitVectorState::new(size);
        out.copy_range(0, self, offset, size);
        out
    }

    /// Writes all of `src` at `offset`.
    pub fn insert_state(&mut self, offset: usize, src: &BitVectorState) {
        self.copy_range(offset, src, 0, src.len());
    }

    /// Appends `src` above the current most significant bit.
    pub fn append(&mut self, src: &BitVectorState) {
        let offset = self.size;
        self.resize(self.size + src.len());
        self.insert_state(offset, src);
    }

    /// Position of the lowest undefined bit in the range, relative to `offset`.
    pub fn first_undefined(&self, offset: usize, size: usize) -> Option<usize> {
        let mut pos = 0;
        while pos < size {
            let chunk = (size - pos).min(BLOCK_BITS);
            let undefined = !self.extract(Plane::Defined, offset + pos, chunk) & mask(chunk);
            if undefined != 0 {
                return Some(pos + undefined.trailing_zeros() as usize);
            }
            pos += chunk;
        }
        None
    }

    pub fn all_defined(&self, offset: usize, size: usize) -> bool {
        self.first_undefined(offset, size).is_none()
    }

    pub fn any_defined(&self, offset: usize, size: usize) -> bool {
        let mut pos = 0;
        while pos < size {
            let chunk = (size - pos).min(BLOCK_BITS);
            if self.extract(Plane::Defined, offset + pos, chunk) != 0 {
                return true;
            }
            pos += chunk;
        }
        false
    }

    pub fn is_fully_defined(&self) -> bool {
        self.all_defined(0, self.size)
    }

    /// Compares two ranges bit for bit on both planes.
    pub fn compare_range(&self, offset: usize, other: &BitVectorState, other_offset: usize, size: usize) -> bool {
        let mut pos = 0;
        while pos < size {
            let chunk = (size - pos).min(BLOCK_BITS);
            for plane in [Plane::Value, Plane::Defined] {
                if self.extract(plane, offset + pos, chunk) != other.extract(plane, other_offset + pos, chunk) {
                    return false;
                }
            }
            pos += chunk;
        }
        true
    }

    /// Equal definedness, and equal values wherever defined.
    pub fn equal_on_defined(&self, other: &BitVectorState) -> bool {
        if self.size != other.size {
            return false;
        }
        let mut pos = 0;
        while pos < self.size {
            let chunk = (self.size - pos).min(BLOCK_BITS);
            let defined = self.extract(Plane::Defined, pos, chunk);
            if defined != other.extract(Plane::Defined, pos, chunk) {
                return false;
            }
            let diff = self.extract(Plane::Value, pos, chunk) ^ other.extract(Plane::Value, pos, chunk);
            if diff & defined != 0 {
                return false;
            }
            pos += chunk;
        }
        true
    }

    /// Whether `self` may be replaced by `other`: every defined bit of `self`
    /// is defined with the same value in `other`.
    pub fn can_be_replaced_with(&self, other: &BitVectorState) -> bool {
        self.size == other.size
            && (0..self.size).all(|i| {
                !self.get(Plane::Defined, i)
                    || (other.get(Plane::Defined, i) && self.get(Plane::Value, i) == other.get(Plane::Value, i))
            })
    }

    /// The value if every bit is defined and the width fits into 64 bits.
    pub fn to_u64(&self) -> Option<u64> {
        if self.size > BLOCK_BITS || !self.is_fully_defined() {
            return None;
        }
        Some(self.extract(Plane::Value, 0, self.size))
    }

    /// Value bits of a range as an arbitrary precision integer.
    pub fn extract_biguint(&self, offset: usize, size: usize) -> BigUint {
        let mut digits = Vec::with_capacity(size.div_ceil(BLOCK_BITS));
        let mut pos = 0;
        while pos < size {
            let chunk = (size - pos).min(BLOCK_BITS);
            digits.push(self.extract(Plane::Value, offset + pos, chunk));
            pos += chunk;
        }
        let mut result = BigUint::default();
        for digit in digits.into_iter().rev() {
            result <<= BLOCK_BITS;
            result |= BigUint::from(digit);
        }
        result
    }

    /// Writes the low `size` bits of `value` into the value plane. Defined flags are untouched.
    pub fn insert_biguint(&mut self, offset: usize, size: usize, value: &BigUint) {
        let digits = value.to_u64_digits();
        let mut pos = 0;
        while pos < size {
            let chunk = (size - pos).min(BLOCK_BITS);
            let digit = digits.get(pos / BLOCK_BITS).copied().unwrap_or(0);
            self.insert(Plane::Value, offset + pos, chunk, digit);
            pos += chunk;
        }
    }
}

impl fmt::Display for BitVectorState {
    /// MSB first, `X` for undefined bits.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in (0..self.size).rev() {
            let c = match (self.get(Plane::Defined, i), self.get(Plane::Value, i)) {
                (false, _) => 'X',
                (true, true) => '1',
                (true, false) => '0',
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}
