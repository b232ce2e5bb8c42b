//! # Bit Stream
//!
//! LSB-first bit packing for snapshot and command payloads.
//!
//! ## Techniques
//!
//! 1. **Bit Packing**: Masks and flags use exactly the bits they need
//! 2. **Varints**: Small deltas cost one byte, large ones up to five
//! 3. **Zig-zag**: Signed deltas near zero stay small

use bytemuck::Pod;

use crate::error::{CoreError, CoreResult};

/// Bit writer with a hard byte capacity.
///
/// Writes that would exceed the capacity fail with
/// [`CoreError::PayloadTooLarge`] and leave the writer unchanged.
#[derive(Clone, Debug)]
pub struct BitWriter {
    buffer: Vec<u8>,
    bit_position: usize,
    capacity: usize,
}

impl BitWriter {
    /// Creates a writer that refuses to grow past `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity.min(4096)),
            bit_position: 0,
            capacity,
        }
    }

    /// Resets the writer for reuse.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.bit_position = 0;
    }

    /// Number of bits written.
    #[inline]
    #[must_use]
    pub const fn bit_len(&self) -> usize {
        self.bit_position
    }

    /// Number of bytes written (rounded up).
    #[inline]
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.bit_position.div_ceil(8)
    }

    /// Byte capacity.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bits still available before the capacity is hit.
    #[inline]
    #[must_use]
    pub const fn remaining_bits(&self) -> usize {
        self.capacity * 8 - self.bit_position
    }

    /// Written bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the writer, returning the written bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    fn reserve_bits(&self, bits: usize) -> CoreResult<()> {
        let required = (self.bit_position + bits).div_ceil(8);
        if required > self.capacity {
            return Err(CoreError::PayloadTooLarge {
                size: required,
                limit: self.capacity,
            });
        }
        Ok(())
    }

    /// Writes the low `bits` bits of `value` (0 to 32 bits).
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidArgument`] for more than 32 bits,
    /// [`CoreError::PayloadTooLarge`] if the capacity would be exceeded.
    pub fn write_bits(&mut self, value: u32, bits: u32) -> CoreResult<()> {
        if bits > 32 {
            return Err(CoreError::invalid("bits", bits));
        }
        self.reserve_bits(bits as usize)?;

        let mut remaining = bits;
        let mut value = u64::from(value) & ((1u64 << bits) - 1);
        while remaining > 0 {
            let byte_idx = self.bit_position / 8;
            let bit_idx = (self.bit_position % 8) as u32;
            if byte_idx == self.buffer.len() {
                self.buffer.push(0);
            }
            let take = remaining.min(8 - bit_idx);
            let chunk = (value & ((1u64 << take) - 1)) as u8;
            self.buffer[byte_idx] |= chunk << bit_idx;
            value >>= take;
            remaining -= take;
            self.bit_position += take as usize;
        }
        Ok(())
    }

    /// Writes a single bit.
    ///
    /// # Errors
    ///
    /// [`CoreError::PayloadTooLarge`] if full.
    #[inline]
    pub fn write_bool(&mut self, value: bool) -> CoreResult<()> {
        self.write_bits(u32::from(value), 1)
    }

    /// Writes an unsigned varint (7 bits per group, high bit = continue).
    ///
    /// # Errors
    ///
    /// [`CoreError::PayloadTooLarge`] if full. A failed write leaves the
    /// writer unchanged.
    pub fn write_varint(&mut self, value: u32) -> CoreResult<()> {
        let groups = varint_groups(value);
        self.reserve_bits(groups * 8)?;
        let mut value = value;
        loop {
            let group = value & 0x7F;
            value >>= 7;
            if value == 0 {
                return self.write_bits(group, 8);
            }
            self.write_bits(group | 0x80, 8)?;
        }
    }

    /// Writes a zig-zag encoded signed varint.
    ///
    /// # Errors
    ///
    /// [`CoreError::PayloadTooLarge`] if full.
    #[inline]
    pub fn write_varint_signed(&mut self, value: i32) -> CoreResult<()> {
        self.write_varint(zigzag(value))
    }

    /// Writes the raw bytes of a `Pod` value.
    ///
    /// # Errors
    ///
    /// [`CoreError::PayloadTooLarge`] if full.
    pub fn write_pod<T: Pod>(&mut self, value: &T) -> CoreResult<()> {
        let bytes = bytemuck::bytes_of(value);
        self.reserve_bits(bytes.len() * 8)?;
        for byte in bytes {
            self.write_bits(u32::from(*byte), 8)?;
        }
        Ok(())
    }

    /// Appends every bit written to `other`.
    ///
    /// # Errors
    ///
    /// [`CoreError::PayloadTooLarge`] if the combined size exceeds capacity.
    pub fn append(&mut self, other: &BitWriter) -> CoreResult<()> {
        self.reserve_bits(other.bit_position)?;
        let mut remaining = other.bit_position;
        for byte in &other.buffer {
            let take = remaining.min(8);
            self.write_bits(u32::from(*byte), take as u32)?;
            remaining -= take;
        }
        Ok(())
    }
}

/// Bit reader over a borrowed byte slice.
#[derive(Clone, Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_position: usize,
}

impl<'a> BitReader<'a> {
    /// Creates a reader positioned at the first bit.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, bit_position: 0 }
    }

    /// Bits left to read.
    #[inline]
    #[must_use]
    pub const fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.bit_position
    }

    /// Bits consumed so far.
    #[inline]
    #[must_use]
    pub const fn bit_position(&self) -> usize {
        self.bit_position
    }

    /// Reads `bits` bits (0 to 32).
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidArgument`] for more than 32 bits,
    /// [`CoreError::Truncated`] at end of stream.
    pub fn read_bits(&mut self, bits: u32) -> CoreResult<u32> {
        if bits > 32 {
            return Err(CoreError::invalid("bits", bits));
        }
        if bits as usize > self.remaining_bits() {
            return Err(CoreError::Truncated {
                needed: bits as usize,
                available: self.remaining_bits(),
            });
        }

        let mut value = 0u64;
        let mut read = 0u32;
        while read < bits {
            let byte = u64::from(self.data[self.bit_position / 8]);
            let bit_idx = (self.bit_position % 8) as u32;
            let take = (bits - read).min(8 - bit_idx);
            let chunk = (byte >> bit_idx) & ((1u64 << take) - 1);
            value |= chunk << read;
            read += take;
            self.bit_position += take as usize;
        }
        Ok(value as u32)
    }

    /// Reads a single bit.
    ///
    /// # Errors
    ///
    /// [`CoreError::Truncated`] at end of stream.
    #[inline]
    pub fn read_bool(&mut self) -> CoreResult<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    /// Reads an unsigned varint.
    ///
    /// # Errors
    ///
    /// [`CoreError::Truncated`] at end of stream, [`CoreError::InvalidArgument`]
    /// for a varint longer than five groups.
    pub fn read_varint(&mut self) -> CoreResult<u32> {
        let mut value = 0u32;
        for group in 0..5 {
            let byte = self.read_bits(8)?;
            value |= (byte & 0x7F) << (7 * group);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CoreError::invalid("varint groups", 6))
    }

    /// Reads a zig-zag encoded signed varint.
    ///
    /// # Errors
    ///
    /// Same as [`BitReader::read_varint`].
    #[inline]
    pub fn read_varint_signed(&mut self) -> CoreResult<i32> {
        Ok(unzigzag(self.read_varint()?))
    }

    /// Reads a `Pod` value written with [`BitWriter::write_pod`].
    ///
    /// # Errors
    ///
    /// [`CoreError::Truncated`] at end of stream.
    pub fn read_pod<T: Pod>(&mut self) -> CoreResult<T> {
        let size = std::mem::size_of::<T>();
        if size * 8 > self.remaining_bits() {
            return Err(CoreError::Truncated {
                needed: size * 8,
                available: self.remaining_bits(),
            });
        }
        let mut bytes = vec![0u8; size];
        for byte in &mut bytes {
            *byte = self.read_bits(8)? as u8;
        }
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }
}

#[inline]
const fn zigzag(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

#[inline]
const fn unzigzag(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

const fn varint_groups(value: u32) -> usize {
    let significant = 32 - value.leading_zeros() as usize;
    if significant == 0 {
        1
    } else {
        significant.div_ceil(7)
    }
}
