//! # Change Masks
//!
//! Bit runs over a flat array of 32-bit words.
//!
//! ```text
//! word 0                            word 1
//! ┌────────────────────────────────┐┌────────────────────────────────┐
//! │            ....xxxx            ││xxxxx....                       │
//! └────────────────────────────────┘└────────────────────────────────┘
//!                 offset ─┘                └─ offset + count
//! ```
//!
//! A run may straddle a word boundary; bits outside `[offset, offset + count)`
//! are never touched.

use crate::bitstream::{BitReader, BitWriter};
use crate::error::{CoreError, CoreResult};
use crate::MASK_WORD_BITS;

/// Largest run a single call can address.
const MAX_RUN_BITS: i32 = 32;

#[inline]
const fn low_bits(count: u32) -> u32 {
    if count >= 32 {
        u32::MAX
    } else {
        (1u32 << count) - 1
    }
}

/// Validates a run and returns `(word index, bit shift, count)`.
fn locate(mask_words: usize, offset: i32, count: i32) -> CoreResult<(usize, u32, u32)> {
    if offset < 0 {
        return Err(CoreError::invalid("offset", offset));
    }
    if !(0..=MAX_RUN_BITS).contains(&count) {
        return Err(CoreError::invalid("count", count));
    }
    // Both are non-negative here.
    let (offset, count) = (offset.unsigned_abs() as usize, count.unsigned_abs());
    let end = offset + count as usize;
    if end > mask_words * MASK_WORD_BITS {
        return Err(CoreError::invalid("offset + count", end as i64));
    }
    Ok((offset / MASK_WORD_BITS, (offset % MASK_WORD_BITS) as u32, count))
}

/// Clears `count` bits starting at bit `offset`.
///
/// # Errors
///
/// [`CoreError::InvalidArgument`] for a negative offset, a count outside
/// `0..=32`, or a run past the end of `mask`.
pub fn reset_bits(mask: &mut [u32], offset: i32, count: i32) -> CoreResult<()> {
    let (word, shift, count) = locate(mask.len(), offset, count)?;
    if count == 0 {
        return Ok(());
    }
    let low = count.min(32 - shift);
    mask[word] &= !(low_bits(low) << shift);
    if count > low {
        mask[word + 1] &= !low_bits(count - low);
    }
    Ok(())
}

/// Writes the low `count` bits of `value` at bit `offset`.
///
/// Caller contract: bits of `value` above `count` must be zero. A value with
/// stray high bits corrupts the neighbouring run; this is not checked in
/// release builds.
///
/// # Errors
///
/// Same as [`reset_bits`].
pub fn set_bits(mask: &mut [u32], value: u32, offset: i32, count: i32) -> CoreResult<()> {
    debug_assert!(
        count >= 32 || count < 0 || value >> count == 0,
        "set_bits value {value:#x} has bits above count {count}"
    );
    reset_bits(mask, offset, count)?;
    let (word, shift, count) = locate(mask.len(), offset, count)?;
    if count == 0 {
        return Ok(());
    }
    mask[word] |= value << shift;
    let low = count.min(32 - shift);
    if count > low {
        mask[word + 1] |= value >> low;
    }
    Ok(())
}

/// Reads `count` bits starting at bit `offset`.
///
/// # Errors
///
/// Same as [`reset_bits`].
pub fn get_bits(mask: &[u32], offset: i32, count: i32) -> CoreResult<u32> {
    let (word, shift, count) = locate(mask.len(), offset, count)?;
    if count == 0 {
        return Ok(0);
    }
    let low = count.min(32 - shift);
    let mut value = (mask[word] >> shift) & low_bits(low);
    if count > low {
        value |= (mask[word + 1] & low_bits(count - low)) << low;
    }
    Ok(value)
}

/// Change mask with one bit per tracked field run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeMask {
    words: Vec<u32>,
    bits: usize,
}

impl ChangeMask {
    /// Creates an all-clear mask able to hold `bits` bits.
    #[must_use]
    pub fn new(bits: usize) -> Self {
        Self {
            words: vec![0; bits.div_ceil(MASK_WORD_BITS)],
            bits,
        }
    }

    /// Number of addressable bits.
    #[inline]
    #[must_use]
    pub const fn bits(&self) -> usize {
        self.bits
    }

    /// Backing words.
    #[inline]
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Backing words, mutable.
    #[inline]
    pub fn words_mut(&mut self) -> &mut [u32] {
        &mut self.words
    }

    /// Returns true if bit `index` is set. Out of range reads as clear.
    #[inline]
    #[must_use]
    pub fn is_set(&self, index: usize) -> bool {
        index < self.bits
            && self.words[index / MASK_WORD_BITS] & (1 << (index % MASK_WORD_BITS)) != 0
    }

    /// Returns true if any bit is set.
    #[inline]
    #[must_use]
    pub fn any(&self) -> bool {
        self.words.iter().any(|w| *w != 0)
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Writes a run of bits.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidArgument`] if the run is negative or leaves the mask.
    pub fn set_run(&mut self, offset: usize, count: usize, value: u32) -> CoreResult<()> {
        let (offset, count) = self.checked_run(offset, count)?;
        set_bits(&mut self.words, value, offset, count)
    }

    /// Reads a run of bits.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidArgument`] if the run leaves the mask.
    pub fn get_run(&self, offset: usize, count: usize) -> CoreResult<u32> {
        let (offset, count) = self.checked_run(offset, count)?;
        get_bits(&self.words, offset, count)
    }

    /// Clears every bit.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Sets every addressable bit.
    pub fn fill(&mut self) {
        self.words.fill(u32::MAX);
        let tail = self.bits % MASK_WORD_BITS;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last = low_bits(tail as u32);
            }
        }
    }

    /// Serializes exactly `bits` bits.
    ///
    /// # Errors
    ///
    /// [`CoreError::PayloadTooLarge`] if the writer is full.
    pub fn write(&self, writer: &mut BitWriter) -> CoreResult<()> {
        let mut remaining = self.bits;
        for word in &self.words {
            let take = remaining.min(MASK_WORD_BITS);
            writer.write_bits(*word, take as u32)?;
            remaining -= take;
        }
        Ok(())
    }

    /// Deserializes a mask of `bits` bits.
    ///
    /// # Errors
    ///
    /// [`CoreError::Truncated`] if the stream ends early.
    pub fn read(reader: &mut BitReader<'_>, bits: usize) -> CoreResult<Self> {
        let mut mask = Self::new(bits);
        let mut remaining = bits;
        for word in &mut mask.words {
            let take = remaining.min(MASK_WORD_BITS);
            *word = reader.read_bits(take as u32)?;
            remaining -= take;
        }
        Ok(mask)
    }

    fn checked_run(&self, offset: usize, count: usize) -> CoreResult<(i32, i32)> {
        if offset + count > self.bits {
            return Err(CoreError::invalid("offset + count", (offset + count) as i64));
        }
        let offset = i32::try_from(offset).map_err(|_| CoreError::invalid("offset", offset as i64))?;
        let count = i32::try_from(count).map_err(|_| CoreError::invalid("count", count as i64))?;
        Ok((offset, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_composite_runs_in_one_word() {
        let mut mask = [0u32; 2];
        set_bits(&mut mask, 0b1_0110_1101, 20, 9).unwrap();
        set_bits(&mut mask, 0b101, 14, 3).unwrap();
        set_bits(&mut mask, 0b1, 10, 1).unwrap();

        let expected = (0b1_0110_1101u32 << 20) | (0b101 << 14) | (1 << 10);
        assert_eq!(mask, [expected, 0]);
        assert_eq!(get_bits(&mask, 20, 9).unwrap(), 0b1_0110_1101);
        assert_eq!(get_bits(&mask, 14, 3).unwrap(), 0b101);
        assert_eq!(get_bits(&mask, 10, 1).unwrap(), 1);
    }

    #[test]
    fn test_run_straddling_word_boundary() {
        let mut mask = [0u32; 2];
        set_bits(&mut mask, 0b1_1111_1111, 28, 9).unwrap();
        set_bits(&mut mask, 0b111, 14, 3).unwrap();
        set_bits(&mut mask, 0b1, 10, 1).unwrap();

        assert_eq!(mask[0], (0b1111 << 28) | (0b111 << 14) | (1 << 10));
        assert_eq!(mask[1], 0b1_1111);
        assert_eq!(get_bits(&mask, 28, 9).unwrap(), 0b1_1111_1111);
    }

    #[test]
    fn test_set_overwrites_previous_run() {
        let mut mask = [u32::MAX; 2];
        set_bits(&mut mask, 0, 30, 4).unwrap();
        assert_eq!(mask[0], !(0b11 << 30));
        assert_eq!(mask[1], !0b11);
    }

    #[test]
    fn test_negative_arguments_rejected() {
        let mut mask = [0u32; 2];
        assert!(matches!(
            set_bits(&mut mask, 1, -1, 1),
            Err(CoreError::InvalidArgument { what: "offset", value: -1 })
        ));
        assert!(matches!(
            reset_bits(&mut mask, 0, -3),
            Err(CoreError::InvalidArgument { what: "count", value: -3 })
        ));
        assert!(matches!(
            get_bits(&mask, -5, 2),
            Err(CoreError::InvalidArgument { what: "offset", .. })
        ));
        assert_eq!(mask, [0, 0]);
    }

    #[test]
    fn test_run_past_end_rejected() {
        let mask = [0u32; 1];
        assert!(get_bits(&mask, 30, 3).is_err());
        assert!(get_bits(&mask, 0, 33).is_err());
        assert_eq!(get_bits(&mask, 32, 0).unwrap(), 0);
    }

    #[test]
    fn test_change_mask_fill_respects_bit_count() {
        let mut mask = ChangeMask::new(35);
        mask.fill();
        assert_eq!(mask.count_ones(), 35);
        assert!(mask.is_set(34));
        assert!(!mask.is_set(35));
    }

    #[test]
    fn test_change_mask_stream() {
        let mut mask = ChangeMask::new(40);
        mask.set_run(30, 5, 0b10101).unwrap();
        let mut writer = BitWriter::new(64);
        mask.write(&mut writer).unwrap();
        assert_eq!(writer.bit_len(), 40);

        let bytes = writer.into_bytes();
        let mut reader = BitReader::new(&bytes);
        assert_eq!(ChangeMask::read(&mut reader, 40).unwrap(), mask);
    }

    proptest! {
        #[test]
        fn prop_set_get_round_trip_without_interference(
            background in any::<[u32; 3]>(),
            offset in 0i32..64,
            count in 0i32..=32,
            raw in any::<u32>(),
        ) {
            let value = if count == 32 { raw } else { raw & ((1u32 << count) - 1) };
            let mut mask = background;
            set_bits(&mut mask, value, offset, count).unwrap();
            prop_assert_eq!(get_bits(&mask, offset, count).unwrap(), value);

            for bit in 0..96i32 {
                if bit < offset || bit >= offset + count {
                    prop_assert_eq!(
                        get_bits(&mask, bit, 1).unwrap(),
                        get_bits(&background, bit, 1).unwrap()
                    );
                }
            }
        }

        #[test]
        fn prop_reset_reads_zero(
            background in any::<[u32; 3]>(),
            offset in 0i32..64,
            count in 0i32..=32,
        ) {
            let mut mask = background;
            reset_bits(&mut mask, offset, count).unwrap();
            prop_assert_eq!(get_bits(&mask, offset, count).unwrap(), 0);
        }

        #[test]
        fn prop_negative_arguments_always_rejected(offset in -64i32..0, count in -32i32..0) {
            let mut mask = [0u32; 2];
            prop_assert!(
                matches!(reset_bits(&mut mask, offset, 1), Err(CoreError::InvalidArgument { .. })),
                "negative offset accepted"
            );
            prop_assert!(
                matches!(get_bits(&mask, 0, count), Err(CoreError::InvalidArgument { .. })),
                "negative count accepted"
            );
        }
    }
}
