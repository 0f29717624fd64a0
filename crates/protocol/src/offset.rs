//! Stream offset algebra.
//!
//! An offset is the canonical string `SSSSSSSSSSSSSSSS_PPPPPPPPPPPPPPPP`
//! where each half is 16 lowercase hex digits: `S` is the number of
//! completed appends and `P` is the byte position after the last committed
//! byte. The literal `-1` is accepted on input and normalizes to the
//! initial offset.

use std::cmp::Ordering;
use std::fmt;

/// Sentinel accepted on input, meaning "from the beginning".
pub const SENTINEL: &str = "-1";

/// The initial offset of every stream.
pub const INITIAL: &str = "0000000000000000_0000000000000000";

const HALF_LEN: usize = 16;

/// A parsed offset: append count plus byte position.
///
/// Ordering is total and lexicographic on `(seq, position)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset {
    /// Number of completed appends.
    pub seq: u64,
    /// Byte position after the last committed byte.
    pub position: u64,
}

impl Offset {
    /// The offset of an empty, never-appended stream.
    pub const ZERO: Offset = Offset {
        seq: 0,
        position: 0,
    };

    /// Parse an offset string. The `-1` sentinel normalizes to
    /// [`Offset::ZERO`]; anything else must be the canonical 33-character
    /// form.
    pub fn parse(s: &str) -> Option<Offset> {
        if s == SENTINEL {
            return Some(Offset::ZERO);
        }
        let (seq, position) = s.split_once('_')?;
        Some(Offset {
            seq: parse_half(seq)?,
            position: parse_half(position)?,
        })
    }

    /// Advance the byte position by `n` bytes.
    pub fn advance(self, n: u64) -> Offset {
        Offset {
            seq: self.seq,
            position: self.position + n,
        }
    }

    /// Bump the append count.
    pub fn increment_seq(self) -> Offset {
        Offset {
            seq: self.seq + 1,
            position: self.position,
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}_{:016x}", self.seq, self.position)
    }
}

fn parse_half(s: &str) -> Option<u64> {
    if s.len() != HALF_LEN || !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

/// Format an offset from its two halves.
pub fn format_offset(seq: u64, position: u64) -> String {
    Offset { seq, position }.to_string()
}

/// Whether `s` is the sentinel or a well-formed canonical offset.
pub fn is_valid_offset(s: &str) -> bool {
    Offset::parse(s).is_some()
}

/// Total order over two canonical offset strings.
///
/// Both inputs must be valid; invalid input sorts as the initial offset.
pub fn compare_offsets(a: &str, b: &str) -> Ordering {
    let a = Offset::parse(a).unwrap_or(Offset::ZERO);
    let b = Offset::parse(b).unwrap_or(Offset::ZERO);
    a.cmp(&b)
}
