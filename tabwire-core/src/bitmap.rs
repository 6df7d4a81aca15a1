//! LSB-first validity and boolean bitmaps.

use bytes::Bytes;

/// Bytes needed to hold `len` bits.
pub fn byte_len(len: usize) -> usize {
    len.div_ceil(8)
}

#[inline]
pub fn get_bit(bits: &[u8], i: usize) -> bool {
    bits[i >> 3] & (1 << (i & 7)) != 0
}

#[inline]
pub fn set_bit(bits: &mut [u8], i: usize) {
    bits[i >> 3] |= 1 << (i & 7);
}

/// Number of set bits among the first `len` bits.
pub fn count_set_bits(bits: &[u8], len: usize) -> usize {
    let full = len / 8;
    let mut count: usize = bits[..full].iter().map(|b| b.count_ones() as usize).sum();
    for i in full * 8..len {
        if get_bit(bits, i) {
            count += 1;
        }
    }
    count
}

/// Accumulates bits and tracks how many are unset.
#[derive(Debug, Default)]
pub struct BitmapBuilder {
    bits: Vec<u8>,
    len: usize,
    unset: usize,
}

impl BitmapBuilder {
    pub fn with_capacity(len: usize) -> Self {
        Self {
            bits: Vec::with_capacity(byte_len(len)),
            len: 0,
            unset: 0,
        }
    }

    pub fn append(&mut self, bit: bool) {
        if self.len % 8 == 0 {
            self.bits.push(0);
        }
        if bit {
            set_bit(&mut self.bits, self.len);
        } else {
            self.unset += 1;
        }
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn unset_count(&self) -> usize {
        self.unset
    }

    /// Finishes as a plain bitmap, trailing bits zeroed.
    pub fn finish(self) -> Bytes {
        Bytes::from(self.bits)
    }

    /// Finishes as a validity bitmap; `None` when every bit is set.
    pub fn finish_validity(self) -> Option<Bytes> {
        if self.unset == 0 {
            None
        } else {
            Some(self.finish())
        }
    }
}
