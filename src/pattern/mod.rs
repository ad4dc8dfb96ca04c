//! Wildcard-masked byte-pattern matching.
//!
//! Compiler-generated artifacts (dispatch sequences, padding runs, guard slots) are
//! recognized by matching raw bytes against masked signatures rather than by decoding
//! instructions. A [`ByteSequence`] pairs every pattern byte with a bitmask describing
//! which bits participate in the comparison - a mask of `0` turns the byte into a
//! wildcard, `0xf0`/`0x0f` wildcard a single nibble. Sequences carry an identifying
//! `mark` tag so a [`ByteSequenceMatcher`] can report *which* signature matched.
//!
//! # Example
//!
//! ```rust
//! use codescope::pattern::{ByteSequence, ByteSequenceMatcher};
//!
//! let mut matcher = ByteSequenceMatcher::new();
//! matcher.add(ByteSequence::parse("48 8b ?? c3", "mov-ret")?);
//!
//! let buffer = [0x48, 0x8b, 0x01, 0xc3];
//! assert_eq!(matcher.find(&buffer, 0), Some("mov-ret"));
//! # Ok::<(), codescope::Error>(())
//! ```

use crate::Result;

/// A byte pattern with per-byte bitmasks and an identifying mark.
///
/// Two sequences are equal iff their bytes, masks and mark are all equal element-wise;
/// sequences of different lengths are never equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteSequence {
    bytes: Vec<u8>,
    masks: Vec<u8>,
    mark: String,
}

impl ByteSequence {
    /// Create a sequence from explicit bytes and masks.
    ///
    /// # Errors
    ///
    /// Returns an error if the sequence is empty or `bytes` and `masks` differ in length.
    pub fn new(bytes: Vec<u8>, masks: Vec<u8>, mark: &str) -> Result<ByteSequence> {
        if bytes.is_empty() {
            return Err(malformed_error!("At least 1 byte must be specified"));
        }

        if bytes.len() != masks.len() {
            return Err(malformed_error!(
                "Byte and mask length mismatch - {} != {}",
                bytes.len(),
                masks.len()
            ));
        }

        Ok(ByteSequence {
            bytes,
            masks,
            mark: mark.to_string(),
        })
    }

    /// Create a sequence where every bit of every byte must match.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is empty.
    pub fn exact(bytes: Vec<u8>, mark: &str) -> Result<ByteSequence> {
        let masks = vec![0xff; bytes.len()];
        ByteSequence::new(bytes, masks, mark)
    }

    /// Parse a sequence from a whitespace-separated pattern string.
    ///
    /// Each token is one byte written as two hex digits, where either digit may be `?`
    /// to wildcard that nibble: `"48"` matches exactly, `"4?"` matches `0x40..=0x4f`,
    /// and `"??"` matches anything.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty pattern or a token that is not two hex-or-`?`
    /// characters.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use codescope::pattern::ByteSequence;
    ///
    /// let seq = ByteSequence::parse("4? 8b ?? c3", "dispatch")?;
    /// assert_eq!(seq.len(), 4);
    /// assert!(seq.matches_at(&[0x4c, 0x8b, 0xff, 0xc3], 0));
    /// assert!(!seq.matches_at(&[0x31, 0x8b, 0xff, 0xc3], 0));
    /// # Ok::<(), codescope::Error>(())
    /// ```
    pub fn parse(pattern: &str, mark: &str) -> Result<ByteSequence> {
        let mut bytes = Vec::new();
        let mut masks = Vec::new();

        for token in pattern.split_whitespace() {
            let chars: Vec<char> = token.chars().collect();
            if chars.len() != 2 {
                return Err(malformed_error!(
                    "Cannot parse pattern token '{}': expected two hex digits or '?'",
                    token
                ));
            }

            let (hi, hi_mask) = parse_nibble(chars[0], token)?;
            let (lo, lo_mask) = parse_nibble(chars[1], token)?;

            bytes.push(hi << 4 | lo);
            masks.push(hi_mask << 4 | lo_mask);
        }

        ByteSequence::new(bytes, masks, mark)
    }

    /// The number of bytes in this sequence.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the sequence holds no bytes. Construction rejects this, so `false`.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The pattern bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The per-byte bitmasks. A mask of 0 excludes the byte from comparison entirely.
    pub fn masks(&self) -> &[u8] {
        &self.masks
    }

    /// The identifying tag of this sequence.
    pub fn mark(&self) -> &str {
        &self.mark
    }

    /// Check whether this sequence matches `buffer` at `offset`.
    ///
    /// Every position with a non-zero mask must agree with the buffer on the masked
    /// bits; masked-out positions are skipped. A buffer with fewer than `len()` bytes
    /// remaining at `offset` never matches.
    pub fn matches_at(&self, buffer: &[u8], offset: usize) -> bool {
        let Some(window) = buffer.get(offset..) else {
            return false;
        };

        if window.len() < self.bytes.len() {
            return false;
        }

        for (i, &mask) in self.masks.iter().enumerate() {
            if window[i] & mask != self.bytes[i] & mask {
                return false;
            }
        }

        true
    }
}

fn parse_nibble(c: char, token: &str) -> Result<(u8, u8)> {
    match c {
        '?' => Ok((0, 0)),
        _ => match c.to_digit(16) {
            #[allow(clippy::cast_possible_truncation)]
            Some(value) => Ok((value as u8, 0x0f)),
            None => Err(malformed_error!(
                "Encountered invalid character '{}' in pattern token '{}'",
                c,
                token
            )),
        },
    }
}

/// A library of [`ByteSequence`] signatures queried as a unit.
#[derive(Debug, Default, Clone)]
pub struct ByteSequenceMatcher {
    sequences: Vec<ByteSequence>,
}

impl ByteSequenceMatcher {
    /// Create an empty matcher.
    pub fn new() -> ByteSequenceMatcher {
        ByteSequenceMatcher::default()
    }

    /// Create a matcher pre-populated with signatures.
    pub fn with_sequences(sequences: Vec<ByteSequence>) -> ByteSequenceMatcher {
        ByteSequenceMatcher { sequences }
    }

    /// Add a signature to the library.
    pub fn add(&mut self, sequence: ByteSequence) {
        self.sequences.push(sequence);
    }

    /// The signatures held by this matcher.
    pub fn sequences(&self) -> &[ByteSequence] {
        &self.sequences
    }

    /// Match all signatures against `buffer` at `offset`, returning the mark of the
    /// first one that matches, or `None`.
    pub fn find(&self, buffer: &[u8], offset: usize) -> Option<&str> {
        self.sequences
            .iter()
            .find(|sequence| sequence.matches_at(buffer, offset))
            .map(ByteSequence::mark)
    }
}
