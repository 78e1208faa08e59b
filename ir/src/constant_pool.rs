use hashbrown::HashMap;

/// Deduplicated pool of immediate doubles referenced by index from
/// `Constant` nodes (`spec.md` §3, §4.1).
///
/// Deduplication is by bit pattern, not `==`: `-0.0` and `0.0` are distinct
/// entries (they compare equal under IEEE-754 but are observably different
/// under `1.0 / x`), and `NaN` dedups against itself even though `NaN ==
/// NaN` is false.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    values: Vec<f64>,
    index: HashMap<u64, u32>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value`, returning its index. Repeated insertions of a
    /// bit-identical value return the same index.
    pub fn intern(&mut self, value: f64) -> u32 {
        let key = value.to_bits();
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.values.len() as u32;
        self.values.push(value);
        self.index.insert(key, idx);
        idx
    }

    pub fn get(&self, index: u32) -> Option<f64> {
        self.values.get(index as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    /// Build a pool directly from already-deduplicated values (used by the
    /// optimizer's constant-cleanup pass and by deserialization).
    pub fn from_values(values: Vec<f64>) -> Self {
        let mut index = HashMap::with_capacity(values.len());
        for (i, v) in values.iter().enumerate() {
            index.entry(v.to_bits()).or_insert(i as u32);
        }
        Self { values, index }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_by_bit_pattern() {
        let mut pool = ConstantPool::new();
        let a = pool.intern(1.0);
        let b = pool.intern(1.0);
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn distinguishes_signed_zero() {
        let mut pool = ConstantPool::new();
        let pos = pool.intern(0.0);
        let neg = pool.intern(-0.0);
        assert_ne!(pos, neg);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn dedups_nan() {
        let mut pool = ConstantPool::new();
        let a = pool.intern(f64::NAN);
        let b = pool.intern(f64::NAN);
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);
    }
}
