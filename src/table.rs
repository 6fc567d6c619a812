// File: src/table.rs
//
// Open-addressed hash table keyed by Values, used for string interning,
// globals, instance fields, class methods, module exports and maps.
// Linear probing with tombstones; capacity is always a power of two so
// the probe sequence is a masked increment.

use crate::value::{values_equal, Value};

const MAX_LOAD_NUMERATOR: usize = 3;
const MAX_LOAD_DENOMINATOR: usize = 4;

/// A single bucket. `key == undefined && value == nil` is an empty
/// bucket; `key == undefined && value == true` is a tombstone.
///
/// Each live entry caches its key's 32-bit hash so the table can be
/// rehashed without consulting the heap.
#[derive(Clone, Copy)]
pub struct Entry {
    pub key: Value,
    pub hash: u32,
    pub value: Value,
}

impl Entry {
    fn empty() -> Entry {
        Entry { key: Value::UNDEFINED, hash: 0, value: Value::NIL }
    }

    fn is_empty(&self) -> bool {
        self.key.is_undefined() && self.value.is_nil()
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_undefined() && !self.value.is_nil()
    }
}

#[derive(Default)]
pub struct Table {
    entries: Vec<Entry>,
    /// Live entries plus tombstones; drives the load-factor check.
    count: usize,
    /// Live entries only.
    size: usize,
}

impl Table {
    pub fn new() -> Table {
        Table { entries: Vec::new(), count: 0, size: 0 }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn mask(&self) -> usize {
        self.entries.len() - 1
    }

    fn find_slot(entries: &[Entry], mask: usize, key: Value, hash: u32) -> usize {
        let mut index = hash as usize & mask;
        let mut tombstone = None;

        loop {
            let entry = &entries[index];
            if entry.key.is_undefined() {
                if entry.is_empty() {
                    return tombstone.unwrap_or(index);
                }
                if tombstone.is_none() {
                    tombstone = Some(index);
                }
            } else if values_equal(entry.key, key) {
                return index;
            }

            index = (index + 1) & mask;
        }
    }

    fn grow(&mut self) {
        let capacity = if self.entries.is_empty() { 8 } else { self.entries.len() * 2 };
        let mut entries = vec![Entry::empty(); capacity];
        let mask = capacity - 1;

        self.count = 0;
        for entry in &self.entries {
            if entry.key.is_undefined() {
                continue;
            }

            let slot = Self::find_slot(&entries, mask, entry.key, entry.hash);
            entries[slot] = *entry;
            self.count += 1;
        }

        self.entries = entries;
    }

    pub fn get(&self, key: Value, hash: u32) -> Option<Value> {
        if self.count == 0 {
            return None;
        }

        let slot = Self::find_slot(&self.entries, self.mask(), key, hash);
        let entry = &self.entries[slot];
        if entry.key.is_undefined() {
            None
        } else {
            Some(entry.value)
        }
    }

    pub fn contains(&self, key: Value, hash: u32) -> bool {
        self.get(key, hash).is_some()
    }

    /// Inserts or overwrites. Returns true when the key was not present.
    pub fn put(&mut self, key: Value, hash: u32, value: Value) -> bool {
        if (self.count + 1) * MAX_LOAD_DENOMINATOR > self.entries.len() * MAX_LOAD_NUMERATOR {
            self.grow();
        }

        let slot = Self::find_slot(&self.entries, self.mask(), key, hash);
        let entry = &mut self.entries[slot];

        let is_new = entry.key.is_undefined();
        if is_new && entry.is_empty() {
            self.count += 1;
        }
        if is_new {
            self.size += 1;
        }

        *entry = Entry { key, hash, value };
        is_new
    }

    /// Removes by leaving a tombstone so probe chains stay intact.
    pub fn remove(&mut self, key: Value, hash: u32) -> bool {
        if self.count == 0 {
            return false;
        }

        let slot = Self::find_slot(&self.entries, self.mask(), key, hash);
        let entry = &mut self.entries[slot];
        if entry.key.is_undefined() {
            return false;
        }

        *entry = Entry { key: Value::UNDEFINED, hash: 0, value: Value::TRUE };
        self.size -= 1;
        true
    }

    /// Copies every entry of `self` into `destination`.
    pub fn put_all_into(&self, destination: &mut Table) {
        for entry in &self.entries {
            if !entry.key.is_undefined() {
                destination.put(entry.key, entry.hash, entry.value);
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.count = 0;
        self.size = 0;
    }

    /// Iterates the live entries in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = (Value, u32, Value)> + '_ {
        self.entries
            .iter()
            .filter(|e| !e.key.is_undefined())
            .map(|e| (e.key, e.hash, e.value))
    }

    /// Looks a string up by contents. Only the interning table uses
    /// this; `matches` checks a candidate key against the sought chars.
    pub fn find_string(&self, hash: u32, mut matches: impl FnMut(Value) -> bool) -> Option<Value> {
        if self.count == 0 {
            return None;
        }

        let mask = self.mask();
        let mut index = hash as usize & mask;
        loop {
            let entry = &self.entries[index];
            if entry.key.is_undefined() {
                if entry.is_empty() {
                    return None;
                }
            } else if entry.hash == hash && matches(entry.key) {
                return Some(entry.key);
            }

            index = (index + 1) & mask;
        }
    }

    /// Drops entries whose key is about to be swept. Called on the
    /// interning table before the sweep phase frees unmarked strings.
    pub fn remove_white(&mut self, mut is_white: impl FnMut(Value) -> bool) {
        for index in 0..self.entries.len() {
            let entry = self.entries[index];
            if !entry.key.is_undefined() && is_white(entry.key) {
                self.entries[index] =
                    Entry { key: Value::UNDEFINED, hash: 0, value: Value::TRUE };
                self.size -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::hash_non_object;
    use proptest::prelude::*;

    fn num(n: f64) -> (Value, u32) {
        let v = Value::number(n);
        (v, hash_non_object(v))
    }

    #[test]
    fn put_get_remove() {
        let mut table = Table::new();
        let (k, h) = num(42.0);

        assert_eq!(table.get(k, h), None);
        assert!(table.put(k, h, Value::TRUE));
        assert_eq!(table.get(k, h), Some(Value::TRUE));
        assert!(!table.put(k, h, Value::FALSE));
        assert_eq!(table.get(k, h), Some(Value::FALSE));
        assert!(table.remove(k, h));
        assert_eq!(table.get(k, h), None);
        assert!(!table.remove(k, h));
    }

    #[test]
    fn tombstones_keep_probe_chains_alive() {
        let mut table = Table::new();
        let keys: Vec<_> = (0..64).map(|i| num(i as f64)).collect();
        for (k, h) in &keys {
            table.put(*k, *h, Value::TRUE);
        }

        // Remove every other key, then confirm the rest still resolve.
        for (k, h) in keys.iter().step_by(2) {
            assert!(table.remove(*k, *h));
        }
        for (i, (k, h)) in keys.iter().enumerate() {
            assert_eq!(table.get(*k, *h).is_some(), i % 2 == 1);
        }
        assert_eq!(table.len(), 32);
    }

    #[test]
    fn put_all_into_copies_entries() {
        let mut source = Table::new();
        let mut destination = Table::new();
        for i in 0..10 {
            let (k, h) = num(i as f64);
            source.put(k, h, Value::number(i as f64 * 2.0));
        }

        source.put_all_into(&mut destination);
        assert_eq!(destination.len(), 10);
        let (k, h) = num(4.0);
        assert_eq!(destination.get(k, h), Some(Value::number(8.0)));
    }

    proptest! {
        #[test]
        fn model_check_against_std_map(ops in proptest::collection::vec((0u8..3, 0i64..48), 1..200)) {
            let mut table = Table::new();
            let mut model = std::collections::HashMap::new();

            for (op, raw) in ops {
                let (k, h) = num(raw as f64);
                match op {
                    0 => {
                        table.put(k, h, Value::number(raw as f64));
                        model.insert(raw, raw);
                    }
                    1 => {
                        table.remove(k, h);
                        model.remove(&raw);
                    }
                    _ => {
                        let expected = model.get(&raw).map(|v| Value::number(*v as f64));
                        prop_assert_eq!(table.get(k, h), expected);
                    }
                }
                prop_assert_eq!(table.len(), model.len());
            }
        }
    }
}
