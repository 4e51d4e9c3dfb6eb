//! # Identifiers and XOR-Metric Ordering
//!
//! This module defines the core identifier types of the routing table:
//!
//! - [`BitString`]: a variable-length big-endian bit string, used for bucket
//!   prefixes (which may be empty) and XOR distances
//! - [`Id`]: a fixed-bit-length identifier, the address of a peer in the
//!   XOR metric space
//!
//! ## Bit Layout
//!
//! Bits are stored big-endian and packed: bit 0 is the most significant bit
//! of byte 0. Trailing bits of the last byte are always zero, so equality
//! and ordering reduce to byte comparison for ids of equal length.
//!
//! ## XOR Metric
//!
//! Two ids are compared for closeness to a reference id `r` by interpreting
//! `a ^ r` and `b ^ r` as unsigned big-endian integers; smaller means
//! closer. [`Id::distance_cmp`] performs that comparison without
//! materializing either distance.
//!
//! Ordering operations are only defined between ids of equal bit length;
//! mixing widths is a caller bug and is checked with debug assertions here
//! and surfaced as [`RouteError::LengthMismatch`](crate::RouteError) by the
//! containers.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A big-endian bit string of arbitrary length, possibly empty.
///
/// Bucket prefixes are bit strings: the root bucket carries the empty
/// prefix, and each split appends one bit.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BitString {
    data: Vec<u8>,
    len: usize,
}

impl BitString {
    /// The empty bit string.
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            len: 0,
        }
    }

    /// Build a bit string from the leading `len` bits of `bytes`.
    ///
    /// # Panics
    /// Panics if `bytes` holds fewer than `len` bits.
    pub fn new(bytes: &[u8], len: usize) -> Self {
        assert!(
            len <= bytes.len() * 8,
            "bit string of {len} bits needs more than {} bytes",
            bytes.len()
        );
        let mut data = bytes[..len.div_ceil(8)].to_vec();
        mask_trailing(&mut data, len);
        Self { data, len }
    }

    /// Number of bits.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the string holds no bits.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The packed bytes, trailing bits zeroed.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Bit at position `i`, where bit 0 is the most significant.
    ///
    /// # Panics
    /// Panics if `i >= len`.
    pub fn bit(&self, i: usize) -> bool {
        assert!(i < self.len, "bit index {i} out of range for {} bits", self.len);
        (self.data[i / 8] >> (7 - i % 8)) & 1 == 1
    }

    /// Append one bit.
    pub fn push(&mut self, bit: bool) {
        if self.len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            self.data[self.len / 8] |= 0x80 >> (self.len % 8);
        }
        self.len += 1;
    }

    /// A copy of this bit string with one extra bit appended.
    pub fn with_bit(&self, bit: bool) -> Self {
        let mut child = self.clone();
        child.push(bit);
        child
    }

    /// Number of leading bits shared with `other`, capped at the shorter
    /// length.
    pub fn shared_prefix_len(&self, other: &BitString) -> usize {
        let limit = self.len.min(other.len);
        let mut count = 0;
        for (a, b) in self.data.iter().zip(other.data.iter()) {
            let diff = a ^ b;
            if diff == 0 {
                count += 8;
                if count >= limit {
                    return limit;
                }
            } else {
                count += diff.leading_zeros() as usize;
                return count.min(limit);
            }
        }
        limit
    }

    /// Whether this bit string is a prefix of `id`.
    pub fn is_prefix_of(&self, id: &Id) -> bool {
        self.len <= id.bit_len() && self.shared_prefix_len(id.bits()) == self.len
    }
}

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.len {
            f.write_str(if self.bit(i) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl fmt::Debug for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitString({self})")
    }
}

/// A fixed-bit-length identifier in the XOR metric space.
///
/// Ids have at least one bit. Construction normalizes trailing bits of the
/// last byte to zero, so equality is bit-for-bit and ordering of equal-width
/// ids is plain unsigned big-endian comparison.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id {
    bits: BitString,
}

impl Id {
    /// Build an id from `bit_len` bits packed big-endian into `bytes`.
    ///
    /// `bytes` must be exactly `ceil(bit_len / 8)` long; unused trailing
    /// bits of the last byte are masked off.
    ///
    /// # Panics
    /// Panics if `bit_len` is zero or `bytes` has the wrong length.
    pub fn from_bytes(bytes: &[u8], bit_len: usize) -> Self {
        assert!(bit_len >= 1, "id bit length must be at least 1");
        assert_eq!(
            bytes.len(),
            bit_len.div_ceil(8),
            "byte count must match the id bit length"
        );
        Self {
            bits: BitString::new(bytes, bit_len),
        }
    }

    /// Build an id from the low `bit_len` bits of `value`.
    ///
    /// Convenient for tests and small id spaces: `Id::from_u64(0b1000, 4)`
    /// is the 4-bit id `1000`.
    ///
    /// # Panics
    /// Panics unless `1 <= bit_len <= 64`.
    pub fn from_u64(value: u64, bit_len: usize) -> Self {
        assert!(
            (1..=64).contains(&bit_len),
            "u64 construction supports 1..=64 bits, got {bit_len}"
        );
        let masked = if bit_len == 64 {
            value
        } else {
            value & ((1u64 << bit_len) - 1)
        };
        let aligned = masked << (64 - bit_len);
        let bytes = aligned.to_be_bytes();
        Self::from_bytes(&bytes[..bit_len.div_ceil(8)], bit_len)
    }

    /// Number of bits in this id.
    pub fn bit_len(&self) -> usize {
        self.bits.len()
    }

    /// Bit at position `i`, where bit 0 is the most significant.
    pub fn bit(&self, i: usize) -> bool {
        self.bits.bit(i)
    }

    /// The underlying bit string.
    pub fn bits(&self) -> &BitString {
        &self.bits
    }

    /// The first `n` bits as a prefix.
    pub fn prefix(&self, n: usize) -> BitString {
        assert!(n <= self.bit_len(), "prefix of {n} bits exceeds the id");
        BitString::new(self.bits.as_bytes(), n)
    }

    /// Number of leading bits shared with `other`.
    pub fn shared_prefix_len(&self, other: &Id) -> usize {
        debug_assert_eq!(self.bit_len(), other.bit_len());
        self.bits.shared_prefix_len(&other.bits)
    }

    /// XOR distance to `other`, as a bit string of the same length.
    pub fn xor(&self, other: &Id) -> BitString {
        debug_assert_eq!(self.bit_len(), other.bit_len());
        let bytes: Vec<u8> = self
            .bits
            .as_bytes()
            .iter()
            .zip(other.bits.as_bytes())
            .map(|(a, b)| a ^ b)
            .collect();
        BitString::new(&bytes, self.bit_len())
    }

    /// Compare this id against `other` by XOR distance from `target`.
    ///
    /// `Ordering::Less` means `self` is closer to `target` than `other`.
    /// Equality implies `self == other`, since XOR with a fixed target is
    /// injective.
    pub fn distance_cmp(&self, other: &Id, target: &Id) -> Ordering {
        debug_assert_eq!(self.bit_len(), other.bit_len());
        debug_assert_eq!(self.bit_len(), target.bit_len());
        let a = self.bits.as_bytes();
        let b = other.bits.as_bytes();
        let t = target.bits.as_bytes();
        for i in 0..a.len() {
            let da = a[i] ^ t[i];
            let db = b[i] ^ t[i];
            if da != db {
                return da.cmp(&db);
            }
        }
        Ordering::Equal
    }

    /// Hex rendering of the packed bytes.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bits.as_bytes())
    }

    /// Parse an id from hex, with an explicit bit length.
    pub fn from_hex(s: &str, bit_len: usize) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bit_len < 1 || bytes.len() != bit_len.div_ceil(8) {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        Ok(Self::from_bytes(&bytes, bit_len))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short ids read best as bits, long ones as hex.
        if self.bit_len() <= 64 {
            write!(f, "{}", self.bits)
        } else {
            write!(f, "{}", self.to_hex())
        }
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({self})")
    }
}

/// Zero out the bits of `data` past position `len`.
fn mask_trailing(data: &mut [u8], len: usize) {
    if len % 8 != 0 {
        data[len / 8] &= 0xFFu8 << (8 - len % 8);
    }
}
