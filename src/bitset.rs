//! Fixed-size bitset used for match vectors
//!
//! One bit per statistics row (or per tree slot during descent). Word
//! backed so combining match vectors is a few u64 ops per 64 rows.

/// Fixed-length bitset over u64 words
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitset {
    words: Vec<u64>,
    len: usize,
}

impl Bitset {
    /// All-zero bitset of `len` bits
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    /// All-one bitset of `len` bits
    pub fn ones(len: usize) -> Self {
        let mut bs = Self {
            words: vec![u64::MAX; len.div_ceil(64)],
            len,
        };
        bs.mask_tail();
        bs
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn set(&mut self, i: usize) {
        debug_assert!(i < self.len);
        self.words[i / 64] |= 1 << (i % 64);
    }

    #[inline]
    pub fn unset(&mut self, i: usize) {
        debug_assert!(i < self.len);
        self.words[i / 64] &= !(1 << (i % 64));
    }

    #[inline]
    pub fn is_set(&self, i: usize) -> bool {
        debug_assert!(i < self.len);
        self.words[i / 64] & (1 << (i % 64)) != 0
    }

    /// True when at least one bit is set
    pub fn any(&self) -> bool {
        self.words.iter().any(|&w| w != 0)
    }

    /// True when no bit is set
    pub fn none(&self) -> bool {
        !self.any()
    }

    /// Number of set bits
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// In-place intersection with another bitset of the same length
    pub fn and(&mut self, other: &Bitset) {
        debug_assert_eq!(self.len, other.len);
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= b;
        }
    }

    /// In-place union with another bitset of the same length
    pub fn or(&mut self, other: &Bitset) {
        debug_assert_eq!(self.len, other.len);
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= b;
        }
    }

    /// Flip every bit
    pub fn negate(&mut self) {
        for w in self.words.iter_mut() {
            *w = !*w;
        }
        self.mask_tail();
    }

    /// Clear all bits
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Iterate set bit positions in ascending order
    pub fn iter(&self) -> BitIter<'_> {
        BitIter {
            bs: self,
            word: 0,
            bits: self.words.first().copied().unwrap_or(0),
        }
    }

    fn mask_tail(&mut self) {
        let tail = self.len % 64;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }
}

/// Ascending iterator over set bit positions
pub struct BitIter<'a> {
    bs: &'a Bitset,
    word: usize,
    bits: u64,
}

impl Iterator for BitIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.bits == 0 {
            self.word += 1;
            if self.word >= self.bs.words.len() {
                return None;
            }
            self.bits = self.bs.words[self.word];
        }
        let tz = self.bits.trailing_zeros() as usize;
        self.bits &= self.bits - 1;
        Some(self.word * 64 + tz)
    }
}
