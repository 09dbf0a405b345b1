mod header;
mod table;

pub use self::table::RawTable;

use core::marker::PhantomData;

use crate::config::TableConfig;
use crate::data::{Key, Value};
use crate::error::{Result, TierTableError};
use crate::index::RandomOps;

/// Multiplier for the key mix (2^64 divided by the golden ratio).
const FIB: u64 = 0x9E37_79B9_7F4A_7C15;

/// Non-cryptographic multiplicative mix; the shift keeps only the top bits,
/// which double as the primary slot index.
#[inline]
pub(crate) fn calc_hash(key: u64, hash_shift: u8) -> u64 {
    (key ^ (key >> 33)).wrapping_mul(FIB) >> hash_shift
}

/// Reshuffles a primary index for overflow-tier addressing, to reduce
/// clustering between neighbouring chains. Insert and lookup must agree on
/// this exact scramble.
#[inline]
pub(crate) fn overflow_hash(index: u64) -> u64 {
    index ^ (index << 2)
}

/// A two-tier table with typed values.
///
/// Thin wrapper over [`RawTable`] that fixes the value width at compile time
/// through the [`Value`] encoding and applies the configured
/// [`SpillPolicy`](crate::config::SpillPolicy).
pub struct TierTable<V>
where
    V: Value,
{
    raw: RawTable,
    config: TableConfig,
    marker: PhantomData<V>,
}

impl<V> TierTable<V>
where
    V: Value,
{
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_config(capacity, TableConfig::default())
    }

    #[inline]
    pub fn with_config(capacity: usize, config: TableConfig) -> Self {
        Self {
            raw: RawTable::with_capacity(capacity, V::BYTES),
            config,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn try_with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self {
            raw: RawTable::try_with_capacity(capacity, V::BYTES)?,
            config: TableConfig::default(),
            marker: PhantomData,
        })
    }

    #[inline]
    pub fn contains(&self, key: Key) -> bool {
        self.raw.find(key).is_some()
    }

    /// Returns the primary slot a key hashes to.
    #[inline]
    pub fn home_index(&self, key: Key) -> usize {
        self.raw.home_index(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
    #[inline]
    pub fn above_spill_threshold(&self) -> bool {
        self.raw.above_spill_threshold()
    }
}

impl<V> RandomOps<V> for TierTable<V>
where
    V: Value,
{
    #[inline]
    fn get(&self, key: Key) -> Option<V> {
        self.raw.find(key).map(V::from_bytes)
    }

    #[inline]
    fn put(&mut self, key: Key, value: V) -> Result<()> {
        match self.raw.insert(key, value.to_bytes().as_ref()) {
            Err(TierTableError::OverflowFull) if !self.config.rejects_on_full() => Ok(()),
            other => other,
        }
    }

    #[inline]
    fn rmw<F: Sized>(&mut self, key: Key, mut f: F) -> bool
    where
        F: FnMut(&mut V),
    {
        if let Some(bytes) = self.raw.find_mut(key) {
            let mut value = V::from_bytes(bytes);
            f(&mut value);
            bytes.copy_from_slice(value.to_bytes().as_ref());
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpillPolicy;

    #[test]
    fn typed_roundtrip() {
        let mut table: TierTable<u64> = TierTable::with_capacity(128);
        for key in 1..=64u64 {
            table.put(key, key * 3).unwrap();
        }
        assert_eq!(table.len(), 64);
        for key in 1..=64u64 {
            assert_eq!(table.get(key), Some(key * 3));
        }
        assert_eq!(table.get(65), None);
        assert!(table.contains(1));
        assert!(!table.contains(65));
    }

    #[test]
    fn rmw() {
        let mut table: TierTable<u64> = TierTable::with_capacity(16);
        table.put(10, 1).unwrap();
        assert!(table.rmw(10, |v| {
            *v += 10;
        }));
        assert_eq!(table.get(10), Some(11));
        assert!(!table.rmw(11, |v| {
            *v += 10;
        }));
    }

    #[test]
    fn unit_values_act_as_set() {
        let mut table: TierTable<()> = TierTable::with_capacity(16);
        table.put(1, ()).unwrap();
        assert!(table.contains(1));
        assert!(!table.contains(2));
    }

    #[test]
    fn drop_policy_swallows_overflow() {
        // A single overflow slot: the second spill has nowhere to go.
        let mut table: TierTable<u64> =
            TierTable::with_config(8, TableConfig::new(SpillPolicy::Drop));
        let home = 4;
        let mut keys = Vec::new();
        let mut key = 1u64;
        while keys.len() < 5 {
            if table.home_index(key) == home {
                keys.push(key);
            }
            key += 1;
        }
        for key in keys.iter().take(4) {
            table.put(*key, 1).unwrap();
        }
        // Dropped, not an error.
        table.put(keys[4], 1).unwrap();
        assert_eq!(table.get(keys[4]), None);
        assert_eq!(table.len(), 4);
    }
}
