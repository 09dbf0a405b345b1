use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tiertable::{RandomOps, RawTable, TierTable};

/// Returns `count` distinct nonzero keys hashing to the same primary slot.
fn colliding_keys(table: &RawTable, count: usize) -> Vec<u64> {
    let home = table.t1_slots() / 2;
    let mut keys = Vec::with_capacity(count);
    let mut key = 1u64;
    while keys.len() < count {
        if table.home_index(key) == home {
            keys.push(key);
        }
        key += 1;
    }
    keys
}

#[test]
fn quadratic_key_workload() {
    let mut table: TierTable<u64> = TierTable::with_capacity(256);
    for i in 0..228u64 {
        table.put(i * i * 3, i * 100).unwrap();
    }
    for j in 0..230u64 {
        let found = table.get(j * j * 3);
        if j < 228 {
            assert_eq!(found, Some(j * 100));
        } else {
            assert_eq!(found, None);
        }
    }
}

#[test]
fn zero_key_overwrite() {
    let mut table: TierTable<u64> = TierTable::with_capacity(8);
    table.put(0, 42).unwrap();
    assert_eq!(table.get(0), Some(42));
    table.put(0, 99).unwrap();
    assert_eq!(table.get(0), Some(99));
}

#[test]
fn collision_chain_through_byte_api() {
    let mut table = RawTable::with_capacity(64, 8);
    let keys = colliding_keys(&table, 6);
    for (i, key) in keys.iter().enumerate() {
        table.insert(*key, &(i as u64).to_le_bytes()).unwrap();
    }
    // The first three fit the neighbourhood; the rest went through the
    // overflow tier. All must come back.
    for (i, key) in keys.iter().enumerate() {
        let bytes = table.find(*key).expect("collided key went missing");
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        assert_eq!(u64::from_le_bytes(raw), i as u64);
    }
    assert_eq!(table.len(), 6);
}

#[test]
fn zero_width_values() {
    let mut table = RawTable::with_capacity(16, 0);
    for key in [0u64, 3, 999].iter() {
        table.insert(*key, &[]).unwrap();
    }
    for key in [0u64, 3, 999].iter() {
        assert!(table.find(*key).is_some());
    }
    assert!(table.find(4).is_none());
}

#[test]
fn overflow_tier_fills_to_budget() {
    // 512 primary slots give 64 overflow slots; push 48 spills (0.75 of the
    // tier) through a single primary index.
    let mut table = RawTable::with_capacity(512, 8);
    let keys = colliding_keys(&table, 51);
    for (i, key) in keys.iter().enumerate() {
        table
            .insert(*key, &(i as u64).to_le_bytes())
            .expect("overflow tier filled before its budget");
    }
    for (i, key) in keys.iter().enumerate() {
        let bytes = table.find(*key).unwrap();
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        assert_eq!(u64::from_le_bytes(raw), i as u64);
    }
}

#[test]
fn mixed_workload_matches_model() {
    let mut table: TierTable<u64> = TierTable::with_capacity(1024);
    let mut model: HashMap<u64, u64> = HashMap::new();
    let mut rng = StdRng::seed_from_u64(0xBADC0DE);
    for _ in 0..2000 {
        let key = rng.gen_range(0, 700u64);
        let value: u64 = rng.gen();
        table.put(key, value).unwrap();
        model.insert(key, value);
    }
    assert_eq!(table.len(), model.len());
    for key in 0..700u64 {
        assert_eq!(table.get(key), model.get(&key).copied());
    }
}
