//! Set-associative storage with true LRU replacement.
//!
//! Shared by the TLB units and the page-walk caches; callers choose the key
//! and the set index.

struct Way<K, V> {
    key: K,
    value: V,
    last_use: u64,
}

pub struct SetAssocArray<K, V> {
    sets: Vec<Vec<Way<K, V>>>,
    ways: usize,
    tick: u64,
}

impl<K: Copy + Eq, V: Copy> SetAssocArray<K, V> {
    /// `entries` must be a non-zero multiple of `ways`.
    pub fn new(entries: usize, ways: usize) -> Self {
        let ways = ways.max(1);
        let num_sets = (entries / ways).max(1);
        Self {
            sets: (0..num_sets).map(|_| Vec::with_capacity(ways)).collect(),
            ways,
            tick: 0,
        }
    }

    pub fn num_sets(&self) -> usize {
        self.sets.len()
    }

    pub fn ways(&self) -> usize {
        self.ways
    }

    pub fn set_index(&self, hash: u64) -> usize {
        (hash % self.sets.len() as u64) as usize
    }

    /// Look up `key`, marking it most recently used on a hit.
    pub fn lookup(&mut self, set: usize, key: K) -> Option<V> {
        self.tick += 1;
        let tick = self.tick;
        let way = self.sets[set].iter_mut().find(|w| w.key == key)?;
        way.last_use = tick;
        Some(way.value)
    }

    /// Look up without touching replacement state.
    pub fn peek(&self, set: usize, key: K) -> Option<V> {
        self.sets[set].iter().find(|w| w.key == key).map(|w| w.value)
    }

    /// Insert or refresh `key`. Returns the evicted entry if the set was full.
    pub fn insert(&mut self, set: usize, key: K, value: V) -> Option<(K, V)> {
        self.tick += 1;
        let tick = self.tick;
        let lines = &mut self.sets[set];

        if let Some(way) = lines.iter_mut().find(|w| w.key == key) {
            way.value = value;
            way.last_use = tick;
            return None;
        }

        if lines.len() < self.ways {
            lines.push(Way { key, value, last_use: tick });
            return None;
        }

        let victim = lines.iter_mut().min_by_key(|w| w.last_use)?;
        let evicted = (victim.key, victim.value);
        *victim = Way { key, value, last_use: tick };
        Some(evicted)
    }

    pub fn invalidate(&mut self, set: usize, key: K) -> bool {
        let lines = &mut self.sets[set];
        let before = lines.len();
        lines.retain(|w| w.key != key);
        lines.len() != before
    }

    pub fn len(&self) -> usize {
        self.sets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
