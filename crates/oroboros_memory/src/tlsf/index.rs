//! # Size-Class Index
//!
//! Two-level mapping from a block size to its free-list bucket, plus the
//! bitmaps that make "find a non-empty bucket" a couple of bit scans.
//!
//! ```text
//! size = 0b0000_0001_0110_1xxx      (exp = 3)
//!                  ^ fli = 8
//!                    ^^^ sli = 0b011
//! ```

/// Number of first-level classes (one per bit of a `u64` size).
pub const FL_COUNT: usize = 64;

/// Largest supported second-level exponent.
pub const MAX_SECOND_LEVEL_EXPONENT: u32 = 5;

/// Maximum number of second-level sub-buckets per class.
pub const SL_COUNT_MAX: usize = 1 << MAX_SECOND_LEVEL_EXPONENT;

/// `floor(log2(size))`. `size` must be non-zero.
#[inline]
#[must_use]
pub const fn first_level_index(size: u64) -> u32 {
    63 - size.leading_zeros()
}

/// The `exp` bits right below the most significant set bit of `size`.
///
/// Requires `fli >= exp`, which holds for every size at or above `1 << exp`.
#[inline]
#[must_use]
pub const fn second_level_index(size: u64, fli: u32, exp: u32) -> u32 {
    ((size & ((1u64 << fli) - 1)) >> (fli - exp)) as u32
}

/// A free-list bucket coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SizeClass {
    /// First-level index.
    pub fli: u32,
    /// Second-level index.
    pub sli: u32,
}

impl SizeClass {
    /// Bucket for a block (or request) of `size` bytes.
    #[inline]
    #[must_use]
    pub const fn of(size: u64, exp: u32) -> Self {
        let fli = first_level_index(size);
        Self {
            fli,
            sli: second_level_index(size, fli, exp),
        }
    }
}

/// First-level bitmap plus one second-level bitmap per class.
///
/// A bit is set if and only if the matching bucket is non-empty.
#[derive(Clone, Debug)]
pub struct FreeBitmaps {
    first: u64,
    second: [u32; FL_COUNT],
}

impl Default for FreeBitmaps {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeBitmaps {
    /// All buckets empty.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            first: 0,
            second: [0; FL_COUNT],
        }
    }

    /// Marks a bucket non-empty.
    #[inline]
    pub fn set(&mut self, class: SizeClass) {
        self.second[class.fli as usize] |= 1 << class.sli;
        self.first |= 1 << class.fli;
    }

    /// Marks a bucket empty, dropping the class bit once no sub-bucket is left.
    #[inline]
    pub fn clear(&mut self, class: SizeClass) {
        let slot = &mut self.second[class.fli as usize];
        *slot &= !(1 << class.sli);
        if *slot == 0 {
            self.first &= !(1 << class.fli);
        }
    }

    /// Whether a bucket is marked non-empty.
    #[inline]
    #[must_use]
    pub const fn is_set(&self, class: SizeClass) -> bool {
        self.second[class.fli as usize] & (1 << class.sli) != 0
    }

    /// Whether the class bit for `fli` is set.
    #[inline]
    #[must_use]
    pub const fn class_is_set(&self, fli: u32) -> bool {
        self.first & (1 << fli) != 0
    }

    /// Smallest class `>= fli` with any non-empty bucket.
    #[inline]
    #[must_use]
    pub fn smallest_nonempty_class_at_or_above(&self, fli: u32) -> Option<u32> {
        if fli as usize >= FL_COUNT {
            return None;
        }
        let masked = self.first & (u64::MAX << fli);
        (masked != 0).then(|| masked.trailing_zeros())
    }

    /// Smallest non-empty sub-bucket of class `fli`.
    #[inline]
    #[must_use]
    pub fn smallest_nonempty_subbucket(&self, fli: u32) -> Option<u32> {
        let bits = self.second[fli as usize];
        (bits != 0).then(|| bits.trailing_zeros())
    }

    /// Smallest non-empty sub-bucket of class `fli` strictly above `sli`.
    #[inline]
    #[must_use]
    pub fn nonempty_subbucket_above(&self, fli: u32, sli: u32) -> Option<u32> {
        let shift = sli + 1;
        if shift as usize >= SL_COUNT_MAX {
            return None;
        }
        let masked = self.second[fli as usize] & (u32::MAX << shift);
        (masked != 0).then(|| masked.trailing_zeros())
    }

    /// Raw first-level bitmap.
    #[inline]
    #[must_use]
    pub const fn first_level(&self) -> u64 {
        self.first
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_level_index() {
        assert_eq!(first_level_index(1), 0);
        assert_eq!(first_level_index(8), 3);
        assert_eq!(first_level_index(15), 3);
        assert_eq!(first_level_index(1 << 20), 20);
        assert_eq!(first_level_index(u64::MAX), 63);
    }

    #[test]
    fn test_second_level_index() {
        // 0b1_0110_1000: class 8, next three bits 011.
        assert_eq!(SizeClass::of(0b1_0110_1000, 3), SizeClass { fli: 8, sli: 3 });
        // Powers of two always land in sub-bucket 0.
        assert_eq!(SizeClass::of(64, 3), SizeClass { fli: 6, sli: 0 });
        // Minimum size for exp = 3 uses every bit below the MSB.
        assert_eq!(SizeClass::of(15, 3), SizeClass { fli: 3, sli: 7 });
        assert_eq!(SizeClass::of(190, 5).fli, 7);
        assert_eq!(SizeClass::of(190, 5).sli, 15);
    }

    #[test]
    fn test_bitmap_set_clear() {
        let mut maps = FreeBitmaps::new();
        let a = SizeClass { fli: 5, sli: 2 };
        let b = SizeClass { fli: 5, sli: 6 };

        maps.set(a);
        maps.set(b);
        assert!(maps.is_set(a));
        assert!(maps.class_is_set(5));

        maps.clear(a);
        assert!(!maps.is_set(a));
        assert!(maps.class_is_set(5));

        maps.clear(b);
        assert!(!maps.class_is_set(5));
        assert_eq!(maps.first_level(), 0);
    }

    #[test]
    fn test_bitmap_scans() {
        let mut maps = FreeBitmaps::new();
        maps.set(SizeClass { fli: 4, sli: 1 });
        maps.set(SizeClass { fli: 9, sli: 3 });
        maps.set(SizeClass { fli: 9, sli: 7 });

        assert_eq!(maps.smallest_nonempty_class_at_or_above(0), Some(4));
        assert_eq!(maps.smallest_nonempty_class_at_or_above(5), Some(9));
        assert_eq!(maps.smallest_nonempty_class_at_or_above(10), None);
        assert_eq!(maps.smallest_nonempty_class_at_or_above(64), None);

        assert_eq!(maps.smallest_nonempty_subbucket(9), Some(3));
        assert_eq!(maps.smallest_nonempty_subbucket(3), None);

        assert_eq!(maps.nonempty_subbucket_above(9, 3), Some(7));
        assert_eq!(maps.nonempty_subbucket_above(9, 7), None);
        assert_eq!(maps.nonempty_subbucket_above(9, 31), None);
    }
}
