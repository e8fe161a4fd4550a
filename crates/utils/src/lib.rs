#![cfg_attr(not(feature = "std"), no_std)]

// Lock for state shared between simulated cores.
pub use spin::Mutex;

pub use hashbrown::HashMap;

const WORDS: usize = 8;

/// Fixed 512-bit occupancy map, one bit per 4KB frame of a 2MB region.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct BitSet512 {
    words: [u64; WORDS],
}

impl BitSet512 {
    pub const BITS: usize = 512;

    /// [O1] New map has no bits set
    pub const fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    /// [O2] Set returns whether the bit was previously clear
    pub fn set(&mut self, idx: usize) -> bool {
        let (w, b) = Self::split(idx);
        let was_clear = self.words[w] & (1 << b) == 0;
        self.words[w] |= 1 << b;
        was_clear
    }

    /// [O3] Clear returns whether the bit was previously set
    pub fn clear(&mut self, idx: usize) -> bool {
        let (w, b) = Self::split(idx);
        let was_set = self.words[w] & (1 << b) != 0;
        self.words[w] &= !(1 << b);
        was_set
    }

    pub fn get(&self, idx: usize) -> bool {
        let (w, b) = Self::split(idx);
        self.words[w] & (1 << b) != 0
    }

    /// [O4] Population count across all words
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Fraction of the 512 bits that are set.
    pub fn occupancy(&self) -> f64 {
        self.count() as f64 / Self::BITS as f64
    }

    /// [O5] Iterate indices of clear bits in ascending order
    pub fn iter_clear(&self) -> impl Iterator<Item = usize> + '_ {
        (0..Self::BITS).filter(move |&i| !self.get(i))
    }

    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        (0..Self::BITS).filter(move |&i| self.get(i))
    }

    // Indices wrap at 512; callers pass `vpn & 511`.
    const fn split(idx: usize) -> (usize, usize) {
        let idx = idx % Self::BITS;
        (idx / 64, idx % 64)
    }
}

impl core::fmt::Debug for BitSet512 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "BitSet512({}/512)", self.count())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    /// Tests: [S1] exclusive access, [S3] release on drop, [S4] read, [S5] write
    #[test]
    fn test_spinlock_basic() {
        let lock = Mutex::new(42);
        {
            let mut guard = lock.lock(); // [S1] acquire
            assert_eq!(*guard, 42); // [S4] read access
            *guard = 43; // [S5] write access
        } // [S3] release on drop
        assert_eq!(*lock.lock(), 43);
    }

    /// Tests: [O1] new empty, [O2] set, [O3] clear, [O4] count
    #[test]
    fn test_bitset_set_clear_count() {
        let mut bits = BitSet512::new();
        assert!(bits.is_empty()); // [O1]
        assert!(bits.set(0)); // [O2] previously clear
        assert!(!bits.set(0)); // [O2] already set
        assert!(bits.set(63));
        assert!(bits.set(64));
        assert!(bits.set(511));
        assert_eq!(bits.count(), 4); // [O4]
        assert!(bits.clear(63)); // [O3]
        assert!(!bits.clear(63));
        assert_eq!(bits.count(), 3);
        assert!(bits.get(511));
        assert!(!bits.get(63));
    }

    /// Tests: occupancy fraction crosses one half at 257 bits
    #[test]
    fn test_bitset_occupancy() {
        let mut bits = BitSet512::new();
        for i in 0..256 {
            bits.set(i);
        }
        assert!((bits.occupancy() - 0.5).abs() < f64::EPSILON);
        bits.set(256);
        assert!(bits.occupancy() > 0.5);
    }

    /// Tests: [O5] clear-bit iteration is ascending and complementary
    #[test]
    fn test_bitset_iterators() {
        let mut bits = BitSet512::new();
        for i in (0..512).step_by(2) {
            bits.set(i);
        }
        let clear: std::vec::Vec<usize> = bits.iter_clear().take(3).collect();
        assert_eq!(clear, [1, 3, 5]);
        assert_eq!(bits.iter_set().count() + bits.iter_clear().count(), 512);
    }

    /// Tests: HashMap insert/get
    #[test]
    fn test_hashmap_basic() {
        let mut map = HashMap::new();
        map.insert(1u64, "region");
        assert_eq!(map.get(&1), Some(&"region"));
        assert_eq!(map.get(&3), None);
    }
}
